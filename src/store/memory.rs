//! In-memory object store.
//!
//! Backs tests and local development. Clones share the same bucket, which
//! is what lets a test "restart" the scheduler over surviving state. The
//! failure switch makes every operation error, for exercising gateway
//! failure paths.

use std::{
    collections::BTreeMap,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use bytes::Bytes;

use super::ObjectStore;

#[derive(Clone, Default)]
pub struct MemoryObjectStore {
    objects: Arc<Mutex<BTreeMap<String, Bytes>>>,
    failing: Arc<AtomicBool>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// When set, every subsequent operation fails.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.objects
            .lock()
            .expect("object store poisoned")
            .get(key)
            .cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .expect("object store poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Raw insert, bypassing the gateway; for seeding test fixtures.
    pub fn insert(&self, key: impl Into<String>, body: impl Into<Bytes>) {
        self.objects
            .lock()
            .expect("object store poisoned")
            .insert(key.into(), body.into());
    }

    fn check(&self) -> eyre::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(eyre::eyre!("injected object store failure"))
        } else {
            Ok(())
        }
    }
}

impl ObjectStore for MemoryObjectStore {
    fn put(
        &self,
        key: &str,
        body: Bytes,
    ) -> Pin<Box<dyn Future<Output = eyre::Result<()>> + Send>> {
        let this = self.clone();
        let key = key.to_owned();
        Box::pin(async move {
            this.check()?;
            this.objects
                .lock()
                .expect("object store poisoned")
                .insert(key, body);
            Ok(())
        })
    }

    fn get(&self, key: &str) -> Pin<Box<dyn Future<Output = eyre::Result<Option<Bytes>>> + Send>> {
        let this = self.clone();
        let key = key.to_owned();
        Box::pin(async move {
            this.check()?;
            Ok(this
                .objects
                .lock()
                .expect("object store poisoned")
                .get(&key)
                .cloned())
        })
    }

    fn delete(&self, key: &str) -> Pin<Box<dyn Future<Output = eyre::Result<()>> + Send>> {
        let this = self.clone();
        let key = key.to_owned();
        Box::pin(async move {
            this.check()?;
            this.objects
                .lock()
                .expect("object store poisoned")
                .remove(&key);
            Ok(())
        })
    }

    fn list(
        &self,
        prefix: &str,
    ) -> Pin<Box<dyn Future<Output = eyre::Result<Vec<String>>> + Send>> {
        let this = self.clone();
        let prefix = prefix.to_owned();
        Box::pin(async move {
            this.check()?;
            Ok(this
                .objects
                .lock()
                .expect("object store poisoned")
                .range(prefix.clone()..)
                .take_while(|(key, _)| key.starts_with(&prefix))
                .map(|(key, _)| key.clone())
                .collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_is_prefix_scoped_and_ordered() {
        let store = MemoryObjectStore::new();
        store.insert("state/b.json", b"1".as_ref());
        store.insert("state/a.json", b"2".as_ref());
        store.insert("success/x.json", b"3".as_ref());

        let keys = store.list("state/").await.unwrap();
        assert_eq!(keys, vec!["state/a.json", "state/b.json"]);
    }

    #[tokio::test]
    async fn failure_switch_poisons_every_operation() {
        let store = MemoryObjectStore::new();
        store.set_failing(true);
        assert!(store.put("k", Bytes::from_static(b"v")).await.is_err());
        assert!(store.get("k").await.is_err());
        assert!(store.delete("k").await.is_err());
        assert!(store.list("").await.is_err());

        store.set_failing(false);
        store.put("k", Bytes::from_static(b"v")).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(Bytes::from_static(b"v")));
    }
}
