//! The instrument: configuration, lifecycle and wiring
//!
//! ```text
//! capture sources ──track(name, props)──▶ identity + event model ──▶ transport
//! ```
//!
//! `start()` and `stop()` are idempotent. `track()` works in either state.
//! Capture callbacks hold only a weak reference to the instrument's core,
//! so listeners left registered on a page never keep it alive.

use std::sync::{Arc, Mutex, Weak};

use tokio::runtime::Handle;

use crate::capture::navigation::{self, NavigationSubscription};
use crate::capture::{interaction, vitals, TrackFn};
use crate::config::InstrumentConfig;
use crate::env::{Environment, Hooks, ListenerId};
use crate::event::{Event, EventContext, Properties};
use crate::guard::{self, lock, Boundary};
use crate::identity::IdentityStore;
use crate::transport::{Beacon, Fetch, Transport};

/// The host capabilities an instrument runs against
pub struct Platform {
    pub environment: Arc<dyn Environment>,
    pub hooks: Arc<dyn Hooks>,
    pub beacon: Option<Arc<dyn Beacon>>,
    pub fetch: Option<Arc<dyn Fetch>>,
    pub runtime: Option<Handle>,
}

impl Platform {
    /// Platform whose page provides both the environment and the hooks
    pub fn new<P>(page: Arc<P>) -> Self
    where
        P: Environment + Hooks + 'static,
    {
        Self {
            environment: page.clone(),
            hooks: page,
            beacon: None,
            fetch: None,
            runtime: None,
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

    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }
}

struct Core {
    config: InstrumentConfig,
    environment: Arc<dyn Environment>,
    identity: IdentityStore,
    transport: Transport,
}

impl Core {
    fn track(&self, name: &str, properties: Option<Properties>) {
        guard::silently(Boundary::Track, self.config.debug, || {
            let context = EventContext {
                site_id: &self.config.site_id,
                visitor_id: self.identity.visitor_id(),
                session_id: self.identity.session_id(),
            };
            let event = Event::build(name, properties, self.environment.as_ref(), context)?;
            self.transport.send(&event);
            Ok(())
        });
    }
}

/// Subscriptions owned by a started instrument
#[derive(Default)]
struct ActiveSources {
    navigation: Option<NavigationSubscription>,
    clicks: Option<ListenerId>,
    vitals: Vec<ListenerId>,
}

impl ActiveSources {
    fn deactivate(self, hooks: &dyn Hooks, debug: bool) {
        if let Some(navigation) = self.navigation {
            guard::silently(Boundary::Capture, debug, || {
                navigation.unsubscribe();
                Ok(())
            });
        }
        for id in self.clicks.into_iter().chain(self.vitals) {
            guard::silently(Boundary::Capture, debug, || {
                hooks.remove_listener(id);
                Ok(())
            });
        }
    }
}

enum Lifecycle {
    Stopped,
    /// Sources are being activated; no lock is held meanwhile
    ///
    /// Only one activation is ever in flight. A `stop()` in this window
    /// sets `cancelled`; a `start()` clears it again.
    Starting { cancelled: bool },
    Started(ActiveSources),
}

pub struct Instrument {
    core: Arc<Core>,
    hooks: Arc<dyn Hooks>,
    state: Mutex<Lifecycle>,
}

impl Instrument {
    pub fn new(config: InstrumentConfig, platform: Platform) -> Self {
        let mut transport = Transport::new(config.endpoint(), config.debug);
        if let Some(beacon) = platform.beacon {
            transport = transport.with_beacon(beacon);
        }
        if let Some(fetch) = platform.fetch {
            transport = transport.with_fetch(fetch);
        }
        if let Some(runtime) = platform.runtime {
            transport = transport.with_runtime(runtime);
        }

        let identity = IdentityStore::new(Arc::clone(&platform.environment), config.debug);

        Self {
            core: Arc::new(Core {
                config,
                environment: platform.environment,
                identity,
                transport,
            }),
            hooks: platform.hooks,
            state: Mutex::new(Lifecycle::Stopped),
        }
    }

    pub fn config(&self) -> &InstrumentConfig {
        &self.core.config
    }

    pub fn is_started(&self) -> bool {
        matches!(
            *lock(&self.state),
            Lifecycle::Started(_) | Lifecycle::Starting { cancelled: false }
        )
    }

    pub fn visitor_id(&self) -> String {
        self.core.identity.visitor_id()
    }

    pub fn session_id(&self) -> String {
        self.core.identity.session_id()
    }

    /// Activate the configured capture sources; no-op when already started
    pub fn start(&self) {
        {
            let mut state = lock(&self.state);
            match *state {
                Lifecycle::Stopped => *state = Lifecycle::Starting { cancelled: false },
                // the in-flight activation will complete
                Lifecycle::Starting { ref mut cancelled } => {
                    *cancelled = false;
                    return;
                }
                Lifecycle::Started(_) => return,
            }
        }

        let sources = self.activate_sources();

        let mut state = lock(&self.state);
        if matches!(*state, Lifecycle::Starting { cancelled: false }) {
            *state = Lifecycle::Started(sources);
        } else {
            // stopped while we were activating
            *state = Lifecycle::Stopped;
            drop(state);
            sources.deactivate(self.hooks.as_ref(), self.core.config.debug);
        }
    }

    /// Deactivate capture sources and restore the history entry point;
    /// no-op when already stopped
    pub fn stop(&self) {
        let sources = {
            let mut state = lock(&self.state);
            match std::mem::replace(&mut *state, Lifecycle::Stopped) {
                Lifecycle::Started(sources) => sources,
                Lifecycle::Starting { .. } => {
                    *state = Lifecycle::Starting { cancelled: true };
                    return;
                }
                Lifecycle::Stopped => return,
            }
        };
        sources.deactivate(self.hooks.as_ref(), self.core.config.debug);
        tracing::debug!(site_id = %self.core.config.site_id, "Instrument stopped");
    }

    /// Build and send one event; callable whether or not the instrument is started
    pub fn track(&self, name: &str, properties: Option<Properties>) {
        self.core.track(name, properties);
    }

    fn activate_sources(&self) -> ActiveSources {
        let config = &self.core.config;
        let debug = config.debug;
        let track = tracker(Arc::downgrade(&self.core));
        let mut sources = ActiveSources::default();

        if config.autocapture.pageviews() {
            let hooks = Arc::clone(&self.hooks);
            let track = Arc::clone(&track);
            sources.navigation = guard::silently(Boundary::Capture, debug, || {
                Ok(navigation::activate(hooks, track))
            });
        }
        if config.autocapture.clicks() {
            let track = Arc::clone(&track);
            sources.clicks = guard::silently(Boundary::Capture, debug, || {
                Ok(interaction::activate(self.hooks.as_ref(), track, debug))
            });
        }
        if config.autocapture.webvitals() {
            sources.vitals = guard::silently(Boundary::Capture, debug, || {
                Ok(vitals::activate(self.hooks.as_ref(), track))
            })
            .unwrap_or_default();
        }

        tracing::debug!(
            site_id = %config.site_id,
            pageviews = sources.navigation.is_some(),
            clicks = sources.clicks.is_some(),
            vitals = sources.vitals.len(),
            "Instrument started"
        );
        sources
    }
}

impl Drop for Instrument {
    fn drop(&mut self) {
        self.stop();
    }
}

fn tracker(core: Weak<Core>) -> TrackFn {
    Arc::new(move |name: &str, properties: Option<Properties>| {
        if let Some(core) = core.upgrade() {
            core.track(name, properties);
        }
    })
}
