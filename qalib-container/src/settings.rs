//! Container configuration.
//!
//! Settings are plain data so hosts can load them from their own config
//! files:
//!
//! ```
//! use qalib_container::settings::{ContainerSettings, DisposalPolicy};
//!
//! let settings = ContainerSettings::default()
//!     .with_name("billing")
//!     .with_disposal_policy(DisposalPolicy::ContinueOnError);
//! assert_eq!(settings.name, "billing");
//! ```

use serde::{Deserialize, Serialize};

/// What a life scope does when disposing one of its instances fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisposalPolicy {
    /// Stop at the first failure and return it. Instances not yet disposed
    /// are released without a disposal attempt.
    #[default]
    StopOnFirstError,
    /// Attempt every remaining instance, then return the first failure.
    ContinueOnError,
}

/// Settings shared by a container and every life scope it creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerSettings {
    /// Label attached to log events.
    pub name: String,
    /// Disposal behavior on failure.
    pub disposal_policy: DisposalPolicy,
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            name: "qalib".to_string(),
            disposal_policy: DisposalPolicy::default(),
        }
    }
}

impl ContainerSettings {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_disposal_policy(mut self, policy: DisposalPolicy) -> Self {
        self.disposal_policy = policy;
        self
    }
}
