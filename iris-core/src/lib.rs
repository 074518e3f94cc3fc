//! # iris-core
//!
//! Embeddable analytics instrumentation.
//!
//! This library provides:
//! - An [`Instrument`] that captures pageviews, clicks and web-vitals and
//!   ships each one as a single JSON event to a collection endpoint
//! - Persistent visitor and per-tab session identity
//! - Best-effort delivery over a beacon with a keep-alive fetch fallback
//! - A [`headless::HeadlessPage`] so all of the above runs outside a browser
//! - Configuration management and logging infrastructure for native hosts
//!
//! ## Architecture
//!
//! - **Capture:** navigation, interaction and vitals sources attach to the
//!   host through the [`env::Hooks`] capability and report through `track`
//! - **Model:** `track` stamps identity and page context onto an [`Event`]
//! - **Delivery:** the [`transport::Transport`] sends it and forgets it
//!
//! Nothing here ever propagates a failure to the host page. Errors are
//! swallowed at each boundary and logged only in debug mode.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use iris_core::headless::{HeadlessPage, RecordingBeacon};
//! use iris_core::{Instrument, InstrumentConfig, Platform};
//!
//! let page = Arc::new(HeadlessPage::new("https://shop.example/cart"));
//! let beacon = Arc::new(RecordingBeacon::default());
//!
//! let config = InstrumentConfig::new("https://collect.example", "abc").with_autocapture(true);
//! let instrument = Instrument::new(config, Platform::new(page.clone()).with_beacon(beacon));
//!
//! instrument.start();
//! page.navigate("/checkout");
//! instrument.track("signup", None);
//! instrument.stop();
//! ```

// Re-export commonly used items at the crate root
pub use config::{Autocapture, AutocaptureConfig, Config, InstrumentConfig};
pub use error::{Error, Result};
pub use event::{Event, Properties};
pub use instrument::{Instrument, Platform};

// Public modules
pub mod capture;
pub mod config;
pub mod dom;
pub mod env;
pub mod error;
pub mod event;
pub mod guard;
pub mod headless;
pub mod identity;
pub mod instrument;
pub mod logging;
pub mod transport;
