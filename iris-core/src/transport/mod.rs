//! Best-effort event delivery
//!
//! ## Delivery paths
//!
//! - **Beacon**: an unload-safe primitive that accepts the payload and
//!   finishes sending it even if the page goes away right after. Preferred
//!   whenever the platform offers one.
//! - **Keep-alive fetch**: a POST allowed to outlive the initiating context.
//!   Used when there is no beacon or the beacon refuses the payload. The
//!   request future is spawned; nobody awaits it.
//!
//! There is no retry, acknowledgment or buffering. A lost event is lost.

mod http;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::runtime::Handle;

use crate::error::{Error, Result};
use crate::event::Event;
use crate::guard::{self, Boundary};

pub use http::{HttpBeacon, HttpFetch, MAX_BEACON_BYTES};

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Unload-safe fire-and-forget send (`navigator.sendBeacon` in a browser)
pub trait Beacon: Send + Sync {
    /// Queue `body` for delivery to `url`
    ///
    /// Returns `false` when the payload could not be queued.
    fn send_beacon(&self, url: &str, body: &str) -> bool;
}

pub type FetchFuture = Pin<Box<dyn Future<Output = Result<()>> + Send + 'static>>;

/// A POST that may outlive the context that issued it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepAliveRequest {
    pub url: String,
    pub body: String,
    pub content_type: &'static str,
}

impl KeepAliveRequest {
    pub fn json(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            body: body.into(),
            content_type: JSON_CONTENT_TYPE,
        }
    }
}

/// Keep-alive HTTP client (`fetch(url, {keepalive: true})` in a browser)
pub trait Fetch: Send + Sync {
    fn post(&self, request: KeepAliveRequest) -> FetchFuture;
}

/// Which path a send took
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Beacon,
    Fetch,
    Dropped,
}

pub struct Transport {
    endpoint: String,
    beacon: Option<Arc<dyn Beacon>>,
    fetch: Option<Arc<dyn Fetch>>,
    runtime: Option<Handle>,
    debug: bool,
}

impl Transport {
    /// Transport posting to `endpoint`, with no delivery primitives yet
    pub fn new(endpoint: impl Into<String>, debug: bool) -> Self {
        Self {
            endpoint: endpoint.into(),
            beacon: None,
            fetch: None,
            runtime: None,
            debug,
        }
    }

    pub fn with_beacon(mut self, beacon: Arc<dyn Beacon>) -> Self {
        self.beacon = Some(beacon);
        self
    }

    pub fn with_fetch(mut self, fetch: Arc<dyn Fetch>) -> Self {
        self.fetch = Some(fetch);
        self
    }

    /// Runtime keep-alive requests are spawned on
    ///
    /// Without one, the runtime current at send time is used.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send an event; never fails and never blocks on the network
    pub fn send(&self, event: &Event) {
        let delivery = self.dispatch(event);
        if self.debug {
            tracing::info!(
                event = %event.name,
                delivery = ?delivery,
                endpoint = %self.endpoint,
                "Iris: event sent"
            );
        }
    }

    pub(crate) fn dispatch(&self, event: &Event) -> Delivery {
        let Some(body) = guard::silently(Boundary::Network, self.debug, || event.to_wire()) else {
            return Delivery::Dropped;
        };

        if let Some(beacon) = &self.beacon {
            let queued = guard::silently(Boundary::Network, self.debug, || {
                Ok(beacon.send_beacon(&self.endpoint, &body))
            })
            .unwrap_or(false);
            if queued {
                return Delivery::Beacon;
            }
        }

        self.fetch_keepalive(body)
    }

    fn fetch_keepalive(&self, body: String) -> Delivery {
        let Some(fetch) = &self.fetch else {
            self.dropped("no delivery primitive available");
            return Delivery::Dropped;
        };

        let Some(runtime) = self.runtime.clone().or_else(|| Handle::try_current().ok()) else {
            self.dropped("no async runtime for keep-alive request");
            return Delivery::Dropped;
        };

        let request = KeepAliveRequest::json(self.endpoint.clone(), body);
        let Some(pending) = guard::silently(Boundary::Network, self.debug, || Ok(fetch.post(request)))
        else {
            return Delivery::Dropped;
        };

        let debug = self.debug;
        runtime.spawn(async move {
            if let Err(e) = pending.await {
                guard::observe(Boundary::Network, debug, &e);
            }
        });
        Delivery::Fetch
    }

    fn dropped(&self, reason: &str) {
        guard::observe(
            Boundary::Network,
            self.debug,
            &Error::Transport(reason.to_string()),
        );
    }
}
