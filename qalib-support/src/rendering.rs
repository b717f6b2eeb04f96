//! Text rendering utilities for diagnostics.
//!
//! Helpers used by the container to print type descriptors, dependency
//! chains and "did you mean?" hints.

/// Renders a chain of names joined by arrows.
///
/// # Examples
/// ```
/// use qalib_support::rendering::render_chain;
///
/// let chain = vec!["OrderService", "OrderRepo", "Database"];
/// assert_eq!(render_chain(&chain), "OrderService → OrderRepo → Database");
/// ```
pub fn render_chain(chain: &[impl AsRef<str>]) -> String {
    chain
        .iter()
        .map(|s| s.as_ref())
        .collect::<Vec<_>>()
        .join(" → ")
}

/// Renders a generic instantiation as `Name<A, B>`.
///
/// An empty argument list renders the bare name.
///
/// ```
/// use qalib_support::rendering::render_generic;
///
/// assert_eq!(render_generic("Repository", &["User"]), "Repository<User>");
/// assert_eq!(render_generic("Pair", &["_", "_"]), "Pair<_, _>");
/// assert_eq!(render_generic("Clock", &[] as &[&str]), "Clock");
/// ```
pub fn render_generic(name: &str, args: &[impl AsRef<str>]) -> String {
    if args.is_empty() {
        return name.to_string();
    }
    let joined = args.iter().map(|a| a.as_ref()).collect::<Vec<_>>().join(", ");
    format!("{name}<{joined}>")
}

/// Indents every line after the first by `depth` levels of two spaces.
///
/// Used to nest a wrapped error's message under its parent.
pub fn indent_continuation(text: &str, depth: usize) -> String {
    let pad = "  ".repeat(depth);
    let mut lines = text.lines();
    let mut out = lines.next().unwrap_or_default().to_string();
    for line in lines {
        out.push('\n');
        out.push_str(&pad);
        out.push_str(line);
    }
    out
}

/// Shortens a fully qualified type name for display.
///
/// Every path prefix is dropped, including those nested inside generic
/// arguments, slices and references.
///
/// ```
/// use qalib_support::rendering::shorten_type_name;
///
/// assert_eq!(shorten_type_name("shop::orders::OrderService"), "OrderService");
/// assert_eq!(
///     shorten_type_name("alloc::sync::Arc<dyn shop::ports::Clock>"),
///     "Arc<dyn Clock>"
/// );
/// assert_eq!(shorten_type_name("&[shop::Item]"), "&[Item]");
/// ```
pub fn shorten_type_name(full_name: &str) -> String {
    let mut result = String::with_capacity(full_name.len());
    let mut segment = String::new();
    let mut chars = full_name.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            ':' if chars.peek() == Some(&':') => {
                chars.next();
                segment.clear();
            }
            '<' | '>' | ',' | ' ' | '[' | ']' | ';' | '&' | '(' | ')' => {
                result.push_str(&segment);
                result.push(ch);
                segment.clear();
            }
            _ => segment.push(ch),
        }
    }

    result.push_str(&segment);
    result
}

/// Picks up to `max_suggestions` names from `available` that look like
/// `requested`, best match first.
///
/// Matching is done on shortened, lowercased names with any leading `dyn`
/// removed. Containment scores highest, then a shared prefix of at least
/// three characters.
pub fn suggest_similar(requested: &str, available: &[&str], max_suggestions: usize) -> Vec<String> {
    let normalize = |name: &str| {
        shorten_type_name(name)
            .trim_start_matches("dyn ")
            .to_lowercase()
    };
    let wanted = normalize(requested);

    let mut scored: Vec<(&str, usize)> = available
        .iter()
        .filter_map(|&name| {
            let candidate = normalize(name);
            if candidate == wanted {
                return None;
            }
            if candidate.contains(&wanted) || wanted.contains(&candidate) {
                return Some((name, 100));
            }
            let common = candidate
                .chars()
                .zip(wanted.chars())
                .take_while(|(a, b)| a == b)
                .count();
            (common >= 3).then_some((name, common * 10))
        })
        .collect();

    scored.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    scored
        .into_iter()
        .take(max_suggestions)
        .map(|(name, _)| name.to_string())
        .collect()
}
