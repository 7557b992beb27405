use crate::{Error, ObjectInfo, ObjectSource};
use ahash::AHashMap as HashMap;
use doop_core::Report;
use std::{collections::BTreeMap, sync::Arc, time::SystemTime};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

/// Holds the most recently downloaded report of every cluster.
///
/// Every call to [`SnapshotCache::get_reports`] lists the bucket and only
/// downloads blobs whose size, content hash or modification time differ from
/// the cached entry. The whole refresh runs under one lock so that concurrent
/// callers never observe a partially refreshed snapshot.
#[derive(Debug)]
pub struct SnapshotCache<S> {
    source: S,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

#[derive(Clone, Debug)]
struct CacheEntry {
    size_bytes: u64,
    content_hash: String,
    last_modified: Option<SystemTime>,
    payload: Arc<Report>,
}

// === impl SnapshotCache ===

impl<S: ObjectSource> SnapshotCache<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            entries: Mutex::default(),
        }
    }

    /// Returns the current report of every cluster, keyed by blob name.
    ///
    /// If any blob fails to download or decode, the call fails and the cache
    /// keeps its previous contents. Blobs that are no longer listed are
    /// dropped once a refresh succeeds.
    #[instrument(skip(self))]
    pub async fn get_reports(&self) -> Result<BTreeMap<String, Arc<Report>>, Error> {
        let mut entries = self.entries.lock().await;

        let infos = self.source.list_objects().await.map_err(Error::List)?;
        let mut refreshed = HashMap::with_capacity(infos.len());
        for info in infos {
            let entry = match entries.get(&info.name) {
                Some(entry) if entry.is_current(&info) => entry.clone(),
                _ => self.pull(&info).await?,
            };
            refreshed.insert(info.name, entry);
        }

        let reports = refreshed
            .iter()
            .map(|(name, entry)| (name.clone(), entry.payload.clone()))
            .collect();
        *entries = refreshed;
        Ok(reports)
    }

    async fn pull(&self, info: &ObjectInfo) -> Result<CacheEntry, Error> {
        debug!(name = %info.name, "Pulling updated report");
        let bytes = self
            .source
            .download(&info.name)
            .await
            .map_err(|source| Error::Download {
                name: info.name.clone(),
                source,
            })?;
        let mut report: Report =
            serde_json::from_slice(&bytes).map_err(|source| Error::Decode {
                name: info.name.clone(),
                source,
            })?;
        report.set_cluster_name(&info.name);

        Ok(CacheEntry {
            size_bytes: info.size_bytes,
            content_hash: info.content_hash.clone(),
            last_modified: info.last_modified,
            payload: Arc::new(report),
        })
    }
}

// === impl CacheEntry ===

impl CacheEntry {
    fn is_current(&self, info: &ObjectInfo) -> bool {
        self.size_bytes == info.size_bytes
            && self.content_hash == info.content_hash
            && self.last_modified == info.last_modified
    }
}
