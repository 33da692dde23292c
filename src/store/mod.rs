//! Object store gateway.
//!
//! Two layers: [`ObjectStore`] is the raw capability over the bucket
//! (put/get/delete/list by key), with an S3 implementation and an in-memory
//! one for tests and local development. [`StateStore`] is the typed facade
//! the engine talks to; it owns the key layout and the JSON codec and
//! nothing else. Every write is a full-document overwrite; the gateway never
//! retries, the engine decides policy.
//!
//! # Key layout
//! - `{active_prefix}/{message_id}.json`: one per pending record
//! - `{success_prefix}/{epoch_millis}_{message_id}.json`: terminal success
//! - `{failed_prefix}/{epoch_millis}_{message_id}.json`: terminal failure
//!
//! Terminal keys lead with the update time in milliseconds so a prefix
//! listing reads chronologically.

use std::{future::Future, pin::Pin, sync::Arc};

use bytes::Bytes;

use crate::{error::Error, message::Record};

pub mod memory;
pub mod s3;

pub trait ObjectStore: Send + Sync + 'static {
    fn put(
        &self,
        key: &str,
        body: Bytes,
    ) -> Pin<Box<dyn Future<Output = eyre::Result<()>> + Send>>;

    /// Fetch a document; absence is `None`, not an error.
    fn get(&self, key: &str) -> Pin<Box<dyn Future<Output = eyre::Result<Option<Bytes>>> + Send>>;

    /// Remove a document; removing an absent key succeeds.
    fn delete(&self, key: &str) -> Pin<Box<dyn Future<Output = eyre::Result<()>> + Send>>;

    /// All keys under a prefix, lexicographically ordered.
    fn list(&self, prefix: &str)
        -> Pin<Box<dyn Future<Output = eyre::Result<Vec<String>>> + Send>>;
}

/// Typed gateway over the bucket: record documents in, record documents out.
#[derive(Clone)]
pub struct StateStore {
    store: Arc<dyn ObjectStore>,
    active_prefix: String,
    success_prefix: String,
    failed_prefix: String,
}

impl StateStore {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        active_prefix: impl Into<String>,
        success_prefix: impl Into<String>,
        failed_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            active_prefix: active_prefix.into(),
            success_prefix: success_prefix.into(),
            failed_prefix: failed_prefix.into(),
        }
    }

    fn active_key(&self, message_id: &str) -> String {
        format!("{}/{}.json", self.active_prefix, message_id)
    }

    fn terminal_key(prefix: &str, record: &Record) -> String {
        format!(
            "{}/{}_{}.json",
            prefix,
            record.epoch_millis(),
            record.message_id
        )
    }

    fn encode(key: &str, record: &Record) -> Result<Bytes, Error> {
        let body = serde_json::to_vec(record).map_err(|e| Error::serialization(key, e))?;
        Ok(Bytes::from(body))
    }

    /// Overwrite the active document for a pending record.
    pub async fn put_active(&self, record: &Record) -> Result<(), Error> {
        let key = self.active_key(&record.message_id);
        let body = Self::encode(&key, record)?;
        self.store.put(&key, body).await.map_err(Error::gateway)
    }

    pub async fn get_active(&self, message_id: &str) -> Result<Option<Record>, Error> {
        self.get_key(&self.active_key(message_id)).await
    }

    pub async fn delete_active(&self, message_id: &str) -> Result<(), Error> {
        self.store
            .delete(&self.active_key(message_id))
            .await
            .map_err(Error::gateway)
    }

    /// Every key under the active prefix; recovery only.
    pub async fn list_active(&self) -> Result<Vec<String>, Error> {
        self.store
            .list(&format!("{}/", self.active_prefix))
            .await
            .map_err(Error::gateway)
    }

    /// Fetch and decode a record by full key.
    pub async fn get_key(&self, key: &str) -> Result<Option<Record>, Error> {
        let Some(body) = self.store.get(key).await.map_err(Error::gateway)? else {
            return Ok(None);
        };
        let record =
            serde_json::from_slice(&body).map_err(|e| Error::serialization(key, e))?;
        Ok(Some(record))
    }

    /// Write the terminal success document. The caller deletes the active
    /// document afterwards, never before.
    pub async fn put_success(&self, record: &Record) -> Result<(), Error> {
        let key = Self::terminal_key(&self.success_prefix, record);
        let body = Self::encode(&key, record)?;
        self.store.put(&key, body).await.map_err(Error::gateway)
    }

    /// Write the terminal failure document. Same ordering contract as
    /// [`StateStore::put_success`].
    pub async fn put_failed(&self, record: &Record) -> Result<(), Error> {
        let key = Self::terminal_key(&self.failed_prefix, record);
        let body = Self::encode(&key, record)?;
        self.store.put(&key, body).await.map_err(Error::gateway)
    }

    pub async fn recent_success(&self, limit: usize) -> Result<Vec<serde_json::Value>, Error> {
        self.recent(&self.success_prefix, limit).await
    }

    pub async fn recent_failed(&self, limit: usize) -> Result<Vec<serde_json::Value>, Error> {
        self.recent(&self.failed_prefix, limit).await
    }

    /// Newest `limit` terminal documents under a prefix, newest first.
    /// Unreadable documents are logged and skipped.
    async fn recent(&self, prefix: &str, limit: usize) -> Result<Vec<serde_json::Value>, Error> {
        let mut keys = self
            .store
            .list(&format!("{prefix}/"))
            .await
            .map_err(Error::gateway)?;
        keys.sort_unstable_by(|a, b| b.cmp(a));
        keys.truncate(limit);

        let mut documents = Vec::with_capacity(keys.len());
        for key in keys {
            match self.store.get(&key).await {
                Ok(Some(body)) => match serde_json::from_slice(&body) {
                    Ok(value) => documents.push(value),
                    Err(error) => {
                        tracing::warn!(%key, %error, "skipping unreadable terminal document")
                    }
                },
                Ok(None) => {}
                Err(error) => tracing::warn!(%key, %error, "failed to fetch terminal document"),
            }
        }
        Ok(documents)
    }

    /// Cheap reachability check for the health endpoint.
    pub async fn probe(&self) -> Result<(), Error> {
        self.store
            .list(&format!("{}/", self.active_prefix))
            .await
            .map_err(Error::gateway)?;
        Ok(())
    }
}
