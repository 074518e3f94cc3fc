//! Native delivery primitives over `reqwest`
//!
//! [`HttpBeacon`] hands payloads to a dedicated worker thread and returns
//! immediately; closing (or dropping) the beacon waits for everything already
//! queued, so sends survive host shutdown the way a browser beacon survives
//! page unload. [`HttpFetch`] is the async keep-alive client.

use std::sync::mpsc;
use std::sync::Mutex;
use std::thread::JoinHandle;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;

use super::{Beacon, Fetch, FetchFuture, KeepAliveRequest, JSON_CONTENT_TYPE};
use crate::error::{Error, Result};
use crate::guard::lock;

/// Largest payload the beacon accepts, matching the browser quota
pub const MAX_BEACON_BYTES: usize = 64 * 1024;

struct BeaconJob {
    url: String,
    body: String,
}

/// Beacon backed by a background delivery thread
pub struct HttpBeacon {
    sender: Mutex<Option<mpsc::Sender<BeaconJob>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl HttpBeacon {
    pub fn new(timeout: Duration) -> Result<Self> {
        let (sender, receiver) = mpsc::channel::<BeaconJob>();

        let worker = std::thread::Builder::new()
            .name("iris-beacon".to_string())
            .spawn(move || run_worker(receiver, timeout))?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Stop accepting payloads and wait until queued ones are delivered
    pub fn close(&self) {
        drop(lock(&self.sender).take());

        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                tracing::warn!("Beacon worker panicked");
            }
        }
    }
}

impl Beacon for HttpBeacon {
    fn send_beacon(&self, url: &str, body: &str) -> bool {
        if body.len() > MAX_BEACON_BYTES {
            tracing::debug!(bytes = body.len(), "Beacon payload over quota");
            return false;
        }

        let sender = lock(&self.sender);
        match sender.as_ref() {
            Some(sender) => sender
                .send(BeaconJob {
                    url: url.to_string(),
                    body: body.to_string(),
                })
                .is_ok(),
            None => false,
        }
    }
}

impl Drop for HttpBeacon {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_worker(receiver: mpsc::Receiver<BeaconJob>, timeout: Duration) {
    // built on the worker so the blocking client never lives inside an async context
    let client = match reqwest::blocking::Client::builder().timeout(timeout).build() {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to create beacon HTTP client");
            // keep draining so senders never block on a dead worker
            for job in receiver {
                tracing::debug!(url = %job.url, "Dropping beacon payload");
            }
            return;
        }
    };

    for job in receiver {
        match client
            .post(&job.url)
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .body(job.body)
            .send()
        {
            Ok(response) if !response.status().is_success() => {
                tracing::debug!(url = %job.url, status = %response.status(), "Beacon rejected");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(url = %job.url, error = %e, "Beacon delivery failed");
            }
        }
    }
}

/// Async keep-alive client
#[derive(Clone)]
pub struct HttpFetch {
    client: reqwest::Client,
}

impl HttpFetch {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

impl Fetch for HttpFetch {
    fn post(&self, request: KeepAliveRequest) -> FetchFuture {
        let client = self.client.clone();
        Box::pin(async move {
            let response = client
                .post(&request.url)
                .header(CONTENT_TYPE, request.content_type)
                .body(request.body)
                .send()
                .await
                .map_err(|e| Error::Transport(format!("HTTP request failed: {}", e)))?;

            let status = response.status();
            if status.is_success() {
                Ok(())
            } else {
                Err(Error::Transport(format!("API error ({})", status)))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;

    /// Accept one request and return its body
    fn one_shot_server() -> (String, std::thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/api/event", listener.local_addr().unwrap());

        let handle = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if line == "\r\n" || line.is_empty() {
                    break;
                }
                let lower = line.to_ascii_lowercase();
                if let Some(value) = lower.strip_prefix("content-length:") {
                    content_length = value.trim().parse().unwrap();
                }
            }
            let mut body = vec![0u8; content_length];
            reader.read_exact(&mut body).unwrap();

            let mut stream = stream;
            stream
                .write_all(b"HTTP/1.1 204 No Content\r\nContent-Length: 0\r\n\r\n")
                .unwrap();
            String::from_utf8(body).unwrap()
        });

        (url, handle)
    }

    #[test]
    fn test_beacon_delivers_before_close_returns() {
        let (url, server) = one_shot_server();
        let beacon = HttpBeacon::new(Duration::from_secs(5)).unwrap();

        assert!(beacon.send_beacon(&url, r#"{"n":"$pageview"}"#));
        beacon.close();

        assert_eq!(server.join().unwrap(), r#"{"n":"$pageview"}"#);
    }

    #[test]
    fn test_beacon_refuses_oversized_payload() {
        let beacon = HttpBeacon::new(Duration::from_secs(1)).unwrap();
        let body = "x".repeat(MAX_BEACON_BYTES + 1);
        assert!(!beacon.send_beacon("http://127.0.0.1:9/api/event", &body));
    }

    #[test]
    fn test_closed_beacon_refuses() {
        let beacon = HttpBeacon::new(Duration::from_secs(1)).unwrap();
        beacon.close();
        assert!(!beacon.send_beacon("http://127.0.0.1:9/api/event", "{}"));
    }

    #[tokio::test]
    async fn test_fetch_reports_connection_failure() {
        // bind then drop to get a port nothing listens on
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let fetch = HttpFetch::new(Duration::from_secs(2)).unwrap();

        let result = fetch
            .post(KeepAliveRequest::json(
                format!("http://127.0.0.1:{}/api/event", port),
                "{}",
            ))
            .await;

        assert!(matches!(result, Err(Error::Transport(_))));
    }
}
