//! Pageview capture, including client-side route changes
//!
//! Single-page applications change the URL through the history push entry
//! point without a page load, and there is no native "route changed"
//! notification for it. [`on_navigate`] wraps that entry point (calling
//! through to whatever was installed before) and listens for popstate; the
//! returned subscription puts the saved entry point back.
//!
//! Restoring is exact only if nobody wrapped the entry point after us. A
//! later wrapper is discarded on unsubscribe; this is not detected.

use std::sync::Arc;

use super::TrackFn;
use crate::env::{Hooks, ListenerId, PushStateFn};
use crate::event::PAGEVIEW;

pub type NavigateCallback = Arc<dyn Fn() + Send + Sync>;

/// An installed navigation observer
#[must_use = "dropping the subscription leaves the history entry point wrapped"]
pub struct NavigationSubscription {
    hooks: Arc<dyn Hooks>,
    previous: PushStateFn,
    popstate: ListenerId,
}

impl NavigationSubscription {
    /// Restore the entry point saved at install time and stop listening
    pub fn unsubscribe(self) {
        self.hooks.set_push_state_entry(self.previous);
        self.hooks.remove_listener(self.popstate);
    }
}

/// Call `callback` after every push navigation and every back/forward move
pub fn on_navigate(hooks: Arc<dyn Hooks>, callback: NavigateCallback) -> NavigationSubscription {
    let previous = hooks.push_state_entry();

    let original = Arc::clone(&previous);
    let after_push = Arc::clone(&callback);
    let wrapper: PushStateFn = Arc::new(move |url: &str| {
        original(url);
        after_push();
    });
    hooks.set_push_state_entry(wrapper);

    let popstate = hooks.add_popstate_listener(Arc::new(move || callback()));

    NavigationSubscription {
        hooks,
        previous,
        popstate,
    }
}

/// Emit a pageview now and one per subsequent navigation
pub fn activate(hooks: Arc<dyn Hooks>, track: TrackFn) -> NavigationSubscription {
    track(PAGEVIEW, None);
    on_navigate(hooks, Arc::new(move || track(PAGEVIEW, None)))
}
