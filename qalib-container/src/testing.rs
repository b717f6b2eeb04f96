//! Shared fixtures for unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::dispose::Dispose;
use crate::error::BoxError;

/// Records disposal order across several probes.
#[derive(Clone, Default)]
pub(crate) struct DisposalLog(Arc<Mutex<Vec<String>>>);

impl DisposalLog {
    pub(crate) fn push(&self, name: &str) {
        self.0.lock().push(name.to_string());
    }

    pub(crate) fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

/// A disposable that writes its name into a [`DisposalLog`].
pub(crate) struct Probe {
    name: String,
    log: DisposalLog,
    disposals: AtomicUsize,
    fail: bool,
}

impl Probe {
    pub(crate) fn new(name: &str, log: &DisposalLog) -> Arc<Self> {
        Arc::new(Self::unshared(name, log))
    }

    pub(crate) fn failing(name: &str, log: &DisposalLog) -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::unshared(name, log)
        })
    }

    pub(crate) fn unshared(name: &str, log: &DisposalLog) -> Self {
        Self {
            name: name.to_string(),
            log: log.clone(),
            disposals: AtomicUsize::new(0),
            fail: false,
        }
    }

    pub(crate) fn disposals(&self) -> usize {
        self.disposals.load(Ordering::SeqCst)
    }
}

impl Dispose for Probe {
    fn dispose(&self) -> Result<(), BoxError> {
        self.disposals.fetch_add(1, Ordering::SeqCst);
        self.log.push(&self.name);
        if self.fail {
            return Err(format!("{} refused to close", self.name).into());
        }
        Ok(())
    }
}
