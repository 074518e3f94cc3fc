//! Visitor and session identifiers
//!
//! Both identifiers are created on first read and written back to their
//! storage scope: the visitor id to durable storage, the session id to
//! tab-scoped storage. When storage is unavailable the store hands out a
//! fresh identifier that is never persisted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::{OsRng, SmallRng};
use rand::{RngCore, SeedableRng};

use crate::env::{Environment, StorageScope};
use crate::guard::{self, Boundary};

/// Storage key of the visitor id (durable scope)
pub const VISITOR_KEY: &str = "iris_vid";

/// Storage key of the session id (session scope)
pub const SESSION_KEY: &str = "iris_sid";

pub struct IdentityStore {
    env: Arc<dyn Environment>,
    debug: bool,
}

impl IdentityStore {
    pub fn new(env: Arc<dyn Environment>, debug: bool) -> Self {
        Self { env, debug }
    }

    /// Stable anonymous id of this browser profile
    pub fn visitor_id(&self) -> String {
        self.get_or_create(StorageScope::Local, VISITOR_KEY)
    }

    /// Id of the current browsing session
    pub fn session_id(&self) -> String {
        self.get_or_create(StorageScope::Session, SESSION_KEY)
    }

    fn get_or_create(&self, scope: StorageScope, key: &str) -> String {
        guard::silently(Boundary::Storage, self.debug, || {
            let candidate = generate_id();
            let id = self.env.persist_if_absent(scope, key, &candidate)?;
            if id == candidate {
                tracing::debug!(scope = scope.as_str(), key, "Created identifier");
            }
            Ok(id)
        })
        .unwrap_or_else(generate_id)
    }
}

/// Generate a random UUID v4 string
///
/// Uses the OS secure generator, falling back to a seeded
/// non-cryptographic generator when that is unavailable.
pub fn generate_id() -> String {
    id_from_source(|bytes| OsRng.try_fill_bytes(bytes))
}

fn id_from_source(
    fill: impl FnOnce(&mut [u8; 16]) -> Result<(), rand::Error>,
) -> String {
    let mut bytes = [0u8; 16];
    if let Err(e) = fill(&mut bytes) {
        tracing::debug!(error = %e, "Secure random source unavailable, using fallback generator");
        fallback_rng().fill_bytes(&mut bytes);
    }
    uuid::Builder::from_random_bytes(bytes)
        .into_uuid()
        .to_string()
}

static FALLBACK_COUNTER: AtomicU64 = AtomicU64::new(0);

fn fallback_rng() -> SmallRng {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    let count = FALLBACK_COUNTER.fetch_add(1, Ordering::Relaxed);
    SmallRng::seed_from_u64(nanos ^ count.wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{FileStorage, HeadlessPage, MemoryStorage};

    fn assert_uuid_v4(id: &str) {
        let parsed = uuid::Uuid::parse_str(id).expect("not a UUID");
        assert_eq!(parsed.get_version_num(), 4);
        assert_eq!(parsed.get_variant(), uuid::Variant::RFC4122);
    }

    #[test]
    fn test_visitor_id_is_stable_within_scope() {
        let page = Arc::new(HeadlessPage::new("https://shop.example/"));
        let store = IdentityStore::new(page.clone(), false);

        let first = store.visitor_id();
        assert_uuid_v4(&first);
        assert_eq!(store.visitor_id(), first);

        // a second store over the same storage sees the persisted value
        let other = IdentityStore::new(page.clone(), false);
        assert_eq!(other.visitor_id(), first);
        assert_eq!(
            page.read_persisted(StorageScope::Local, VISITOR_KEY).unwrap(),
            Some(first)
        );
    }

    #[test]
    fn test_visitor_id_differs_across_fresh_scopes() {
        let a = IdentityStore::new(Arc::new(HeadlessPage::new("https://a.example/")), false);
        let b = IdentityStore::new(Arc::new(HeadlessPage::new("https://a.example/")), false);
        assert_ne!(a.visitor_id(), b.visitor_id());
    }

    #[test]
    fn test_session_id_is_stable_and_distinct_from_visitor() {
        let store = IdentityStore::new(Arc::new(HeadlessPage::new("https://a.example/")), false);
        let sid = store.session_id();
        assert_uuid_v4(&sid);
        assert_eq!(store.session_id(), sid);
        assert_ne!(store.visitor_id(), sid);
    }

    #[test]
    fn test_new_session_keeps_visitor() {
        let local = Arc::new(MemoryStorage::default());
        let first_tab = HeadlessPage::builder("https://a.example/")
            .local_storage(local.clone())
            .build();
        let second_tab = HeadlessPage::builder("https://a.example/")
            .local_storage(local)
            .build();

        let a = IdentityStore::new(Arc::new(first_tab), false);
        let b = IdentityStore::new(Arc::new(second_tab), false);
        assert_eq!(a.visitor_id(), b.visitor_id());
        assert_ne!(a.session_id(), b.session_id());
    }

    #[test]
    fn test_empty_stored_value_is_replaced() {
        let page = Arc::new(HeadlessPage::new("https://a.example/"));
        page.write_persisted(StorageScope::Session, SESSION_KEY, "").unwrap();
        let store = IdentityStore::new(page, false);
        assert_uuid_v4(&store.session_id());
    }

    #[test]
    fn test_unavailable_storage_yields_ephemeral_ids() {
        let page = Arc::new(
            HeadlessPage::builder("https://a.example/")
                .local_storage(Arc::new(MemoryStorage::unavailable()))
                .build(),
        );
        let store = IdentityStore::new(page, true);

        let first = store.visitor_id();
        let second = store.visitor_id();
        assert_uuid_v4(&first);
        assert_uuid_v4(&second);
        assert_ne!(first, second);
    }

    #[test]
    fn test_concurrent_first_runs_share_one_visitor() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("storage.json");
        let barrier = Arc::new(std::sync::Barrier::new(4));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let path = path.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    let page = HeadlessPage::builder("https://a.example/")
                        .local_storage(Arc::new(FileStorage::new(path)))
                        .build();
                    let store = IdentityStore::new(Arc::new(page), false);
                    barrier.wait();
                    store.visitor_id()
                })
            })
            .collect();
        let ids: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_uuid_v4(&ids[0]);
        assert!(ids.iter().all(|id| *id == ids[0]), "{:?}", ids);
    }

    #[test]
    fn test_fallback_generator_keeps_format() {
        let no_entropy =
            || rand::Error::new(std::io::Error::new(std::io::ErrorKind::Other, "no entropy"));
        let id = id_from_source(|_| Err(no_entropy()));
        assert_uuid_v4(&id);

        let other = id_from_source(|_| Err(no_entropy()));
        assert_ne!(id, other);
    }
}
