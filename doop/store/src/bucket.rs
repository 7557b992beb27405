use crate::{ObjectInfo, ObjectSink, ObjectSource};
use ahash::AHashMap as HashMap;
use bytes::Bytes;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::{
    fs::Metadata,
    io,
    path::{Path, PathBuf},
    sync::Arc,
    time::SystemTime,
};
use tokio::fs;

/// A bucket backed by a local directory, one file per blob.
///
/// Files whose names start with a dot are ignored so that in-flight uploads
/// never show up in a listing. Content hashes are remembered per file and only
/// recomputed when the file's size, modification time or inode change.
#[derive(Clone, Debug)]
pub struct FsBucket {
    root: PathBuf,
    digests: Arc<Mutex<HashMap<String, FileDigest>>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct FileDigest {
    size_bytes: u64,
    modified: Option<SystemTime>,
    file_id: u64,
    hash: String,
}

// === impl FsBucket ===

impl FsBucket {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            digests: Default::default(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, name: &str) -> io::Result<PathBuf> {
        if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid object name {name:?}"),
            ));
        }
        Ok(self.root.join(name))
    }

    async fn digest(&self, name: &str, path: &Path, meta: &Metadata) -> io::Result<FileDigest> {
        let size_bytes = meta.len();
        let modified = meta.modified().ok();
        let file_id = file_id(meta);

        let known = self.digests.lock().get(name).cloned();
        if let Some(known) = known.filter(|d| {
            d.size_bytes == size_bytes && d.modified == modified && d.file_id == file_id
        }) {
            return Ok(known);
        }

        tracing::trace!(%name, "Hashing blob");
        let contents = fs::read(path).await?;
        Ok(FileDigest {
            size_bytes,
            modified,
            file_id,
            hash: hex::encode(Sha256::digest(&contents)),
        })
    }
}

#[cfg(unix)]
fn file_id(meta: &Metadata) -> u64 {
    std::os::unix::fs::MetadataExt::ino(meta)
}

#[cfg(not(unix))]
fn file_id(_: &Metadata) -> u64 {
    0
}

#[async_trait::async_trait]
impl ObjectSource for FsBucket {
    async fn list_objects(&self) -> io::Result<Vec<ObjectInfo>> {
        let mut objects = Vec::new();
        let mut digests = HashMap::new();
        let mut dir = fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }

            let digest = self.digest(&name, &entry.path(), &meta).await?;
            objects.push(ObjectInfo {
                name: name.clone(),
                size_bytes: digest.size_bytes,
                content_hash: digest.hash.clone(),
                last_modified: digest.modified,
            });
            digests.insert(name, digest);
        }
        *self.digests.lock() = digests;

        objects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(objects)
    }

    async fn download(&self, name: &str) -> io::Result<Bytes> {
        let path = self.path(name)?;
        fs::read(path).await.map(Bytes::from)
    }
}

#[async_trait::async_trait]
impl ObjectSink for FsBucket {
    /// Writes to a hidden temporary file first and renames it into place.
    async fn upload(&self, name: &str, payload: Bytes) -> io::Result<()> {
        let path = self.path(name)?;
        fs::create_dir_all(&self.root).await?;
        let tmp = self.root.join(format!(".{name}.tmp"));
        fs::write(&tmp, &payload).await?;
        fs::rename(&tmp, &path).await
    }
}
