//! The "fails silently, optionally observed" boundary wrapper
//!
//! Every call that crosses into storage, the network or host-supplied DOM
//! state goes through [`silently`]. Errors and panics are converted into
//! `None`; they are logged only when the instrument runs with `debug` set.
//!
//! Catching a panic does not bypass the process panic hook, which by
//! default still prints the panic message to stderr. Hosts that need a
//! quiet stderr install their own hook with [`std::panic::set_hook`].

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};

/// Which boundary a guarded call crossed, recorded on the log line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    Storage,
    Network,
    Dom,
    Capture,
    Track,
}

impl Boundary {
    pub fn as_str(&self) -> &'static str {
        match self {
            Boundary::Storage => "storage",
            Boundary::Network => "network",
            Boundary::Dom => "dom",
            Boundary::Capture => "capture",
            Boundary::Track => "track",
        }
    }
}

/// Run `f`, absorbing any error or panic it produces
pub fn silently<T>(boundary: Boundary, debug: bool, f: impl FnOnce() -> Result<T>) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Some(value),
        Ok(Err(error)) => {
            observe(boundary, debug, &error);
            None
        }
        Err(payload) => {
            observe(boundary, debug, &Error::Panicked(panic_message(payload.as_ref())));
            None
        }
    }
}

/// Log a swallowed failure when `debug` is set
pub fn observe(boundary: Boundary, debug: bool, error: &Error) {
    if debug {
        tracing::warn!(boundary = boundary.as_str(), error = %error, "Iris: swallowed failure");
    }
}

/// Lock a mutex, recovering the data if a previous holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
