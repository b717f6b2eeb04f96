//! A small billing service wired through Qalib.
//!
//! Run with `RUST_LOG=debug cargo run --example basic` to watch the
//! container register, build and dispose things.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use qalib::prelude::*;
use tracing::info;
use tracing_subscriber::EnvFilter;

trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default()
    }
}

trait Ledger: Send + Sync {
    fn record(&self, amount: u64) -> u64;
}

/// A ledger backed by a "connection" that must be closed.
struct MemoryLedger {
    total: AtomicU64,
}

impl Ledger for MemoryLedger {
    fn record(&self, amount: u64) -> u64 {
        self.total.fetch_add(amount, Ordering::SeqCst) + amount
    }
}

impl Dispose for MemoryLedger {
    fn dispose(&self) -> std::result::Result<(), BoxError> {
        info!(total = self.total.load(Ordering::SeqCst), "Closing ledger");
        Ok(())
    }
}

struct Billing {
    clock: Arc<dyn Clock>,
    ledger: Arc<dyn Ledger>,
    receipts: Factory<Receipt>,
}

struct Receipt {
    issued_at: u64,
}

impl Billing {
    fn charge(&self, amount: u64) -> Result<String> {
        let total = self.ledger.record(amount);
        let receipt = self.receipts.create()?;
        Ok(format!(
            "charged {amount} at {} (receipt issued at {}), ledger total {total}",
            self.clock.now(),
            receipt.issued_at
        ))
    }
}

struct CoreProvider;

impl Provider for CoreProvider {
    fn register(&self, registrar: &Registrar) -> Result<()> {
        registrar.register_implementation(
            TypeInfo::of::<SystemClock>()
                .constructor([], |_| Ok(SystemClock))
                .implements::<dyn Clock>(|this| this),
            [TypeDescriptor::of::<dyn Clock>()],
            Lifestyle::Singleton,
        )?;
        registrar.register_implementation(
            TypeInfo::of::<MemoryLedger>()
                .constructor([], |_| {
                    Ok(MemoryLedger {
                        total: AtomicU64::new(0),
                    })
                })
                .implements::<dyn Ledger>(|this| this)
                .disposable(),
            [TypeDescriptor::of::<dyn Ledger>()],
            Lifestyle::Singleton,
        )
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let container = Container::builder()
        .settings(ContainerSettings::default().with_name("billing"))
        .add_provider(CoreProvider)
        .register(|registrar| {
            registrar.register_factory_with(
                TypeInfo::of::<Receipt>(),
                [TypeDescriptor::of::<Receipt>()],
                Lifestyle::Transient,
                |resolver| {
                    let clock = resolver.resolve::<dyn Clock>()?;
                    Ok(Receipt {
                        issued_at: clock.now(),
                    })
                },
            )?;
            registrar.register_implementation(
                TypeInfo::of::<Billing>().constructor(
                    [
                        Param::of::<dyn Clock>(),
                        Param::of::<dyn Ledger>(),
                        Param::factory::<Receipt>(),
                    ],
                    |args| {
                        Ok(Billing {
                            clock: args.service::<dyn Clock>()?,
                            ledger: args.service::<dyn Ledger>()?,
                            receipts: args.factory::<Receipt>()?,
                        })
                    },
                ),
                [TypeDescriptor::of::<Billing>()],
                Lifestyle::Transient,
            )
        })
        .build()?;

    info!(?container, "Ready");

    let billing = container.resolve::<Billing>()?;
    println!("{}", billing.charge(120)?);
    println!("{}", billing.charge(30)?);
    billing.dispose()?;

    if let Err(err) = container.resolve::<u32>() {
        println!("expected failure: {err}");
    }

    container.dispose()
}
