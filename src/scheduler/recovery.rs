//! Startup recovery.
//!
//! Rebuilds the engine's pending set from the active prefix before the
//! dispatcher starts. Recovery is read-only with one exception: active
//! documents in a terminal status are leftovers from a crash between the
//! terminal write and the active delete, and are deleted here.
//!
//! Records are re-seeded exactly as persisted. An overdue `next_retry_at`
//! makes the record immediately eligible; no catch-up back-off is applied.

use crate::{
    error::Error,
    message::{Record, Status},
    store::StateStore,
};

/// Loads every pending record under the active prefix.
///
/// Gateway failures abort recovery so the engine never starts on a partial
/// view. Undecodable documents abort too unless `skip_corrupt` is set, in
/// which case they are logged and left in place.
pub async fn load_pending(store: &StateStore, skip_corrupt: bool) -> Result<Vec<Record>, Error> {
    let keys = store.list_active().await?;
    tracing::info!(keys = keys.len(), "recovering state from object store");

    let mut records = Vec::new();
    for key in keys {
        let record = match store.get_key(&key).await {
            Ok(Some(record)) => record,
            // deleted between list and get
            Ok(None) => continue,
            Err(Error::Serialization { key, source }) if skip_corrupt => {
                tracing::warn!(%key, error = %source, "skipping undecodable active document");
                continue;
            }
            Err(err) => return Err(err),
        };

        if record.status != Status::Pending {
            tracing::warn!(
                message_id = %record.message_id,
                status = ?record.status,
                "discarding stale active document for terminal record"
            );
            store.delete_active(&record.message_id).await?;
            continue;
        }

        records.push(record);
    }

    tracing::info!(recovered = records.len(), "recovery complete");
    Ok(records)
}
