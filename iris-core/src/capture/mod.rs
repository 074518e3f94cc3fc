//! Capture sources
//!
//! Each source attaches to the page through [`crate::env::Hooks`] and reports
//! what it observes through a [`TrackFn`]. Sources know nothing about
//! identity or delivery.

pub mod interaction;
pub mod navigation;
pub mod vitals;

use std::sync::Arc;

use crate::event::Properties;

/// Entry point sources emit events through
pub type TrackFn = Arc<dyn Fn(&str, Option<Properties>) + Send + Sync>;
