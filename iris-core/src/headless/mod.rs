//! An in-process page for running the instrument outside a browser
//!
//! [`HeadlessPage`] implements both [`Environment`] and [`Hooks`]. It owns a
//! location, referrer and viewport, one storage backend per scope, a
//! replaceable history push entry point and listener registries, plus
//! helpers that drive them the way a user would: push navigation, back/forward,
//! clicks and metric reports.
//!
//! The `iris` CLI runs the instrument on a headless page with file-backed
//! durable storage; tests use it with memory storage and the recorders in
//! [`recorder`].

mod recorder;
mod storage;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use rand::Rng;

pub use recorder::{RecordingBeacon, RecordingFetch, SentPayload};
pub use storage::{FileStorage, MemoryStorage, Storage};

use crate::capture::vitals::{MetricName, MetricReport};
use crate::dom::{ClickEvent, Element};
use crate::env::{
    ClickListener, Environment, Hooks, ListenerId, MetricListener, Phase, PopStateListener,
    PushStateFn, StorageScope,
};
use crate::error::Result;
use crate::guard::lock;

/// Viewport width used when none is configured
pub const DEFAULT_VIEWPORT_WIDTH: u32 = 1280;

#[derive(Debug, Clone)]
struct Location {
    url: String,
    referrer: Option<String>,
    viewport_width: u32,
}

#[derive(Default)]
struct Listeners {
    popstate: Vec<(ListenerId, PopStateListener)>,
    clicks: Vec<(ListenerId, Phase, ClickListener)>,
    metrics: Vec<(ListenerId, MetricName, MetricListener)>,
}

pub struct HeadlessPage {
    location: Arc<Mutex<Location>>,
    local: Arc<dyn Storage>,
    session: Arc<dyn Storage>,
    push_state: Mutex<PushStateFn>,
    listeners: Mutex<Listeners>,
    next_listener: AtomicU64,
}

/// Builder for [`HeadlessPage`]
pub struct HeadlessPageBuilder {
    url: String,
    referrer: Option<String>,
    viewport_width: u32,
    local: Option<Arc<dyn Storage>>,
    session: Option<Arc<dyn Storage>>,
}

impl HeadlessPageBuilder {
    pub fn referrer(mut self, referrer: impl Into<String>) -> Self {
        self.referrer = Some(referrer.into());
        self
    }

    pub fn viewport_width(mut self, width: u32) -> Self {
        self.viewport_width = width;
        self
    }

    /// Backend of the durable scope
    pub fn local_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.local = Some(storage);
        self
    }

    /// Backend of the tab-scoped scope
    pub fn session_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.session = Some(storage);
        self
    }

    pub fn build(self) -> HeadlessPage {
        let location = Arc::new(Mutex::new(Location {
            url: self.url,
            referrer: self.referrer,
            viewport_width: self.viewport_width,
        }));

        let native_location = Arc::clone(&location);
        let native_push_state: PushStateFn = Arc::new(move |url: &str| {
            let mut location = lock(&native_location);
            location.url = resolve(&location.url, url);
        });

        HeadlessPage {
            location,
            local: self
                .local
                .unwrap_or_else(|| Arc::new(MemoryStorage::default())),
            session: self
                .session
                .unwrap_or_else(|| Arc::new(MemoryStorage::default())),
            push_state: Mutex::new(native_push_state),
            listeners: Mutex::default(),
            next_listener: AtomicU64::new(1),
        }
    }
}

impl HeadlessPage {
    /// A page at `url` with memory storage and no referrer
    pub fn new(url: impl Into<String>) -> Self {
        Self::builder(url).build()
    }

    pub fn builder(url: impl Into<String>) -> HeadlessPageBuilder {
        HeadlessPageBuilder {
            url: url.into(),
            referrer: None,
            viewport_width: DEFAULT_VIEWPORT_WIDTH,
            local: None,
            session: None,
        }
    }

    pub fn url(&self) -> String {
        lock(&self.location).url.clone()
    }

    pub fn set_viewport_width(&self, width: u32) {
        lock(&self.location).viewport_width = width;
    }

    /// Client-side navigation through the current push entry point
    ///
    /// Relative URLs resolve against the current one.
    pub fn navigate(&self, url: &str) {
        let entry = self.push_state_entry();
        entry(url);
    }

    /// Back/forward navigation to `url`, firing popstate
    pub fn go_back(&self, url: &str) {
        {
            let mut location = lock(&self.location);
            location.url = resolve(&location.url, url);
        }
        let listeners: Vec<PopStateListener> = lock(&self.listeners)
            .popstate
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener();
        }
    }

    /// Click on `target`, capture-phase listeners first
    pub fn click(&self, target: Arc<Element>) {
        self.dispatch_click(&ClickEvent::on(target));
    }

    pub fn dispatch_click(&self, event: &ClickEvent) {
        let ordered: Vec<ClickListener> = {
            let listeners = lock(&self.listeners);
            let capture = listeners
                .clicks
                .iter()
                .filter(|(_, phase, _)| *phase == Phase::Capture);
            let bubble = listeners
                .clicks
                .iter()
                .filter(|(_, phase, _)| *phase == Phase::Bubble);
            capture
                .chain(bubble)
                .map(|(_, _, l)| Arc::clone(l))
                .collect()
        };
        for listener in ordered {
            listener(event);
        }
    }

    /// Deliver one metric report to its observers and return it
    pub fn report_metric(&self, name: MetricName, value: f64) -> MetricReport {
        let report = MetricReport {
            id: metric_id(),
            name,
            value,
        };
        let observers: Vec<MetricListener> = lock(&self.listeners)
            .metrics
            .iter()
            .filter(|(_, metric, _)| *metric == name)
            .map(|(_, _, l)| Arc::clone(l))
            .collect();
        for observer in observers {
            observer(&report);
        }
        report
    }

    pub fn popstate_listener_count(&self) -> usize {
        lock(&self.listeners).popstate.len()
    }

    pub fn click_listener_count(&self) -> usize {
        lock(&self.listeners).clicks.len()
    }

    pub fn metric_listener_count(&self) -> usize {
        lock(&self.listeners).metrics.len()
    }

    fn next_id(&self) -> ListenerId {
        ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed))
    }

    fn storage(&self, scope: StorageScope) -> &Arc<dyn Storage> {
        match scope {
            StorageScope::Local => &self.local,
            StorageScope::Session => &self.session,
        }
    }
}

impl Environment for HeadlessPage {
    fn current_url(&self) -> String {
        self.url()
    }

    fn referrer(&self) -> Option<String> {
        lock(&self.location).referrer.clone()
    }

    fn viewport_width(&self) -> u32 {
        lock(&self.location).viewport_width
    }

    fn read_persisted(&self, scope: StorageScope, key: &str) -> Result<Option<String>> {
        self.storage(scope).get(key)
    }

    fn write_persisted(&self, scope: StorageScope, key: &str, value: &str) -> Result<()> {
        self.storage(scope).set(key, value)
    }

    fn persist_if_absent(&self, scope: StorageScope, key: &str, value: &str) -> Result<String> {
        self.storage(scope).get_or_insert(key, value)
    }
}

impl Hooks for HeadlessPage {
    fn push_state_entry(&self) -> PushStateFn {
        Arc::clone(&lock(&self.push_state))
    }

    fn set_push_state_entry(&self, entry: PushStateFn) {
        *lock(&self.push_state) = entry;
    }

    fn add_popstate_listener(&self, listener: PopStateListener) -> ListenerId {
        let id = self.next_id();
        lock(&self.listeners).popstate.push((id, listener));
        id
    }

    fn add_click_listener(&self, listener: ClickListener, phase: Phase) -> ListenerId {
        let id = self.next_id();
        lock(&self.listeners).clicks.push((id, phase, listener));
        id
    }

    fn observe_metric(&self, metric: MetricName, listener: MetricListener) -> ListenerId {
        let id = self.next_id();
        lock(&self.listeners).metrics.push((id, metric, listener));
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        let mut listeners = lock(&self.listeners);
        listeners.popstate.retain(|(lid, _)| *lid != id);
        listeners.clicks.retain(|(lid, _, _)| *lid != id);
        listeners.metrics.retain(|(lid, _, _)| *lid != id);
    }
}

/// Resolve `target` against `base` the way `history.pushState` does
fn resolve(base: &str, target: &str) -> String {
    url::Url::parse(base)
        .and_then(|base| base.join(target))
        .map(String::from)
        .unwrap_or_else(|_| target.to_string())
}

/// Metric instance id in the `v4-<millis>-<random>` form browsers report
fn metric_id() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let suffix: u64 = rand::thread_rng().gen_range(1_000_000_000_000..9_000_000_000_000);
    format!("v4-{}-{}", millis, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_navigate_resolves_relative_urls() {
        let page = HeadlessPage::new("https://app.example/a/b");
        page.navigate("c?x=1");
        assert_eq!(page.url(), "https://app.example/a/c?x=1");
        page.navigate("/root");
        assert_eq!(page.url(), "https://app.example/root");
        page.navigate("https://other.example/");
        assert_eq!(page.url(), "https://other.example/");
    }

    #[test]
    fn test_referrer_survives_push_navigation() {
        let page = HeadlessPage::builder("https://app.example/")
            .referrer("https://news.example/")
            .build();
        page.navigate("/next");
        assert_eq!(page.referrer().as_deref(), Some("https://news.example/"));
    }

    #[test]
    fn test_listener_removal() {
        let page = HeadlessPage::new("https://app.example/");
        let popstate = page.add_popstate_listener(Arc::new(|| {}));
        let click = page.add_click_listener(Arc::new(|_: &ClickEvent| {}), Phase::Capture);
        let metric = page.observe_metric(MetricName::Cls, Arc::new(|_: &MetricReport| {}));
        assert_eq!(page.popstate_listener_count(), 1);
        assert_eq!(page.click_listener_count(), 1);
        assert_eq!(page.metric_listener_count(), 1);

        page.remove_listener(popstate);
        page.remove_listener(click);
        page.remove_listener(metric);
        page.remove_listener(ListenerId(999));
        assert_eq!(page.popstate_listener_count(), 0);
        assert_eq!(page.click_listener_count(), 0);
        assert_eq!(page.metric_listener_count(), 0);
    }

    #[test]
    fn test_capture_listeners_run_first() {
        let page = HeadlessPage::new("https://app.example/");
        let order = Arc::new(Mutex::new(Vec::new()));

        let bubble = Arc::clone(&order);
        page.add_click_listener(
            Arc::new(move |_: &ClickEvent| bubble.lock().unwrap().push("bubble")),
            Phase::Bubble,
        );
        let capture = Arc::clone(&order);
        page.add_click_listener(
            Arc::new(move |_: &ClickEvent| capture.lock().unwrap().push("capture")),
            Phase::Capture,
        );

        page.click(Arc::new(Element::new("button")));
        assert_eq!(*order.lock().unwrap(), vec!["capture", "bubble"]);
    }

    #[test]
    fn test_metric_ids() {
        let page = HeadlessPage::new("https://app.example/");
        let a = page.report_metric(MetricName::Lcp, 1000.0);
        let b = page.report_metric(MetricName::Lcp, 1000.0);
        assert!(a.id.starts_with("v4-"));
        assert_ne!(a.id, b.id);
    }
}
