//! Delivery primitives that record instead of sending

use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::event::Event;
use crate::guard::lock;
use crate::transport::{Beacon, Fetch, FetchFuture, KeepAliveRequest};

/// A payload handed to a [`RecordingBeacon`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentPayload {
    pub url: String,
    pub body: String,
}

impl SentPayload {
    /// Decode the body back into an event
    pub fn event(&self) -> Result<Event> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Beacon that keeps every payload it accepts
#[derive(Debug)]
pub struct RecordingBeacon {
    sent: Mutex<Vec<SentPayload>>,
    accept: bool,
}

impl Default for RecordingBeacon {
    fn default() -> Self {
        Self {
            sent: Mutex::default(),
            accept: true,
        }
    }
}

impl RecordingBeacon {
    /// Beacon that refuses every payload
    pub fn refusing() -> Self {
        Self {
            sent: Mutex::default(),
            accept: false,
        }
    }

    pub fn sent(&self) -> Vec<SentPayload> {
        lock(&self.sent).clone()
    }

    /// Accepted payloads decoded as events, skipping undecodable ones
    pub fn events(&self) -> Vec<Event> {
        lock(&self.sent)
            .iter()
            .filter_map(|p| p.event().ok())
            .collect()
    }
}

impl Beacon for RecordingBeacon {
    fn send_beacon(&self, url: &str, body: &str) -> bool {
        if self.accept {
            lock(&self.sent).push(SentPayload {
                url: url.to_string(),
                body: body.to_string(),
            });
        }
        self.accept
    }
}

/// Fetch client that records requests and resolves immediately
#[derive(Debug, Default)]
pub struct RecordingFetch {
    requests: Mutex<Vec<KeepAliveRequest>>,
    fail: bool,
}

impl RecordingFetch {
    /// Fetch whose requests all reject with a network error
    pub fn failing() -> Self {
        Self {
            requests: Mutex::default(),
            fail: true,
        }
    }

    pub fn requests(&self) -> Vec<KeepAliveRequest> {
        lock(&self.requests).clone()
    }
}

impl Fetch for RecordingFetch {
    fn post(&self, request: KeepAliveRequest) -> FetchFuture {
        lock(&self.requests).push(request);
        let fail = self.fail;
        Box::pin(async move {
            if fail {
                Err(Error::Transport("network unreachable".to_string()))
            } else {
                Ok(())
            }
        })
    }
}
