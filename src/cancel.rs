//! Cooperative cancellation.
//!
//! Every externally invoked operation accepts a `CancelToken`. Indexing
//! checks it at file boundaries, search before the ANN pass, compression
//! between chunks. A cancelled run never leaves partial per-file state:
//! either the file was fully committed before the check or it was not
//! touched.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Bail out with the cancellation category if the token fired.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}
