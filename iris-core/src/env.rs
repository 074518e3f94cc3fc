//! Capabilities the instrument needs from its host page
//!
//! [`Environment`] covers ambient page state (location, referrer, viewport,
//! storage). [`Hooks`] covers the global hook points capture sources attach
//! to. A browser binding implements both; [`crate::headless::HeadlessPage`]
//! is the in-process implementation used by tests and the CLI.

use std::sync::Arc;

use crate::capture::vitals::{MetricName, MetricReport};
use crate::dom::ClickEvent;
use crate::error::Result;

/// Storage scope an identifier is persisted in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageScope {
    /// Durable, origin-scoped storage that survives sessions and reloads
    Local,
    /// Volatile storage scoped to one tab/window lifetime
    Session,
}

impl StorageScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageScope::Local => "local",
            StorageScope::Session => "session",
        }
    }
}

/// Ambient page state, read at call time
pub trait Environment: Send + Sync {
    /// Full URL of the current page
    fn current_url(&self) -> String;

    /// Referrer of the current document, if any
    fn referrer(&self) -> Option<String>;

    /// Current viewport width in CSS pixels
    fn viewport_width(&self) -> u32;

    fn read_persisted(&self, scope: StorageScope, key: &str) -> Result<Option<String>>;

    fn write_persisted(&self, scope: StorageScope, key: &str, value: &str) -> Result<()>;

    /// Persisted non-empty value of `key`, persisting `value` first when
    /// there is none
    ///
    /// Hosts whose storage is shared between processes override this to
    /// make the check and the write one atomic step.
    fn persist_if_absent(&self, scope: StorageScope, key: &str, value: &str) -> Result<String> {
        if let Some(existing) = self.read_persisted(scope, key)?.filter(|v| !v.is_empty()) {
            return Ok(existing);
        }
        self.write_persisted(scope, key, value)?;
        Ok(value.to_string())
    }
}

/// The history push entry point (`history.pushState` in a browser)
///
/// Takes the URL being pushed.
pub type PushStateFn = Arc<dyn Fn(&str) + Send + Sync>;

pub type PopStateListener = Arc<dyn Fn() + Send + Sync>;

pub type ClickListener = Arc<dyn Fn(&ClickEvent) + Send + Sync>;

pub type MetricListener = Arc<dyn Fn(&MetricReport) + Send + Sync>;

/// Handle of a registered listener, used to remove it again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Event dispatch phase a listener is registered for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Capture,
    Bubble,
}

/// Global hook points of the host page
pub trait Hooks: Send + Sync {
    /// The push entry point currently installed
    fn push_state_entry(&self) -> PushStateFn;

    /// Replace the push entry point
    fn set_push_state_entry(&self, entry: PushStateFn);

    /// Subscribe to back/forward navigation
    fn add_popstate_listener(&self, listener: PopStateListener) -> ListenerId;

    /// Subscribe to clicks anywhere in the document
    fn add_click_listener(&self, listener: ClickListener, phase: Phase) -> ListenerId;

    /// Subscribe to reports of one performance metric
    fn observe_metric(&self, metric: MetricName, listener: MetricListener) -> ListenerId;

    /// Remove a listener; unknown ids are ignored
    fn remove_listener(&self, id: ListenerId);
}
