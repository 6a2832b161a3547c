//! Reference media resolution
//!
//! A metric's `reference` names external media (an image, video, pdf, or an
//! embeddable viewer URL). Resolution to a fetchable URL is I/O-bound and
//! runs on its own task per reference key; consumers observe the handle
//! through a watch channel and must tolerate rendering a still-loading
//! handle. The cache owns the single-writer side; projections only clone
//! handles.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use qcv_common::qc::S3Location;
use qcv_common::{Error, Result};

/// Synthetic reference-key prefix for metrics with no reference, so they
/// still group individually instead of collapsing into one bucket
pub const EMPTY_REFERENCE_PREFIX: &str = "__empty__";

/// Display kind of a referenced media object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Pdf,
    Iframe,
    Unknown,
}

/// Classify a reference by its extension (or viewer URL shape)
pub fn media_kind(reference: &str) -> MediaKind {
    const IMAGE_EXTS: [&str; 7] = [".png", ".jpg", ".gif", ".jpeg", ".svg", ".tiff", ".webp"];
    const VIDEO_EXTS: [&str; 3] = [".mp4", ".avi", ".webm"];

    let lower = reference.to_ascii_lowercase();
    if IMAGE_EXTS.iter().any(|ext| lower.ends_with(ext)) {
        MediaKind::Image
    } else if VIDEO_EXTS.iter().any(|ext| lower.ends_with(ext)) {
        MediaKind::Video
    } else if lower.ends_with(".pdf") {
        MediaKind::Pdf
    } else if lower.contains("neuroglancer") || lower.starts_with("http") {
        MediaKind::Iframe
    } else {
        MediaKind::Unknown
    }
}

/// Object-storage collaborator boundary
///
/// The core only asks for a fetchable URL; credentials and signing are the
/// collaborator's concern.
pub trait ObjectStore: Send + Sync {
    fn presign<'a>(&'a self, bucket: &'a str, key: &'a str) -> BoxFuture<'a, Result<String>>;
}

/// ObjectStore over publicly readable buckets (no signing)
#[derive(Debug, Default)]
pub struct PublicUrlStore;

impl ObjectStore for PublicUrlStore {
    fn presign<'a>(&'a self, bucket: &'a str, key: &'a str) -> BoxFuture<'a, Result<String>> {
        let url = format!("https://{}.s3.amazonaws.com/{}", bucket, key);
        Box::pin(async move { Ok(url) })
    }
}

/// Lifecycle of a media handle
///
/// Starts Loading and transitions to Ready or Failed exactly once. Absent
/// is the terminal state for synthetic no-reference keys.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaState {
    Absent,
    Loading,
    Ready { url: String, kind: MediaKind },
    Failed { message: String },
}

/// Shared, read-only view of one reference's media
///
/// Cheap to clone; all clones observe the same resolution.
#[derive(Debug, Clone)]
pub struct MediaHandle {
    reference: Arc<str>,
    rx: watch::Receiver<MediaState>,
}

impl MediaHandle {
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Current state snapshot
    pub fn state(&self) -> MediaState {
        self.rx.borrow().clone()
    }

    /// Wait for the terminal state (Ready, Failed, or Absent)
    pub async fn resolved(&mut self) -> MediaState {
        loop {
            let state = self.rx.borrow().clone();
            if state != MediaState::Loading {
                return state;
            }
            if self.rx.changed().await.is_err() {
                return self.rx.borrow().clone();
            }
        }
    }
}

struct CacheEntry {
    handle: MediaHandle,
    created: Instant,
    task: Option<JoinHandle<()>>,
}

/// Cache of reference key → media handle
///
/// Exactly one handle per distinct reference key: N metrics sharing a
/// reference load the media once. Entries expire after the configured TTL
/// and are rebuilt on next request. Only the group index constructs
/// entries; everything downstream borrows handles read-only.
pub struct MediaCache {
    store: Arc<dyn ObjectStore>,
    location: Option<S3Location>,
    ttl: Duration,
    entries: HashMap<String, CacheEntry>,
}

impl MediaCache {
    pub fn new(store: Arc<dyn ObjectStore>, location: Option<S3Location>, ttl: Duration) -> Self {
        MediaCache {
            store,
            location,
            ttl,
            entries: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Handle for a reference key, building and spawning resolution on first
    /// request (or after TTL expiry)
    pub fn handle_for(&mut self, reference_key: &str) -> MediaHandle {
        if let Some(entry) = self.entries.get(reference_key) {
            if entry.created.elapsed() < self.ttl {
                debug!("media cache hit for {}", reference_key);
                return entry.handle.clone();
            }
            // Expired: drop the stale entry and rebuild below
            if let Some(entry) = self.entries.remove(reference_key) {
                if let Some(task) = entry.task {
                    task.abort();
                }
            }
        }

        let entry = self.build_entry(reference_key);
        let handle = entry.handle.clone();
        self.entries.insert(reference_key.to_string(), entry);
        handle
    }

    fn build_entry(&self, reference_key: &str) -> CacheEntry {
        let reference: Arc<str> = Arc::from(reference_key);

        if reference_key.starts_with(EMPTY_REFERENCE_PREFIX) {
            let (_tx, rx) = watch::channel(MediaState::Absent);
            return CacheEntry {
                handle: MediaHandle { reference, rx },
                created: Instant::now(),
                task: None,
            };
        }

        let (tx, rx) = watch::channel(MediaState::Loading);
        let store = Arc::clone(&self.store);
        let location = self.location.clone();
        let key = reference_key.to_string();

        // One resolution per reference key; the state transitions exactly
        // once, and teardown aborts the task while it is still Loading
        let task = tokio::spawn(async move {
            let state = match resolve_reference(store.as_ref(), location.as_ref(), &key).await {
                Ok((url, kind)) => MediaState::Ready { url, kind },
                Err(e) => {
                    warn!("failed to resolve media for {}: {}", key, e);
                    MediaState::Failed {
                        message: e.to_string(),
                    }
                }
            };
            let _ = tx.send(state);
        });

        CacheEntry {
            handle: MediaHandle { reference, rx },
            created: Instant::now(),
            task: Some(task),
        }
    }

    /// Cancel every in-flight resolution and drop all entries
    pub fn abort_all(&mut self) {
        for (_, entry) in self.entries.drain() {
            if let Some(task) = entry.task {
                task.abort();
            }
        }
    }
}

impl Drop for MediaCache {
    fn drop(&mut self) {
        self.abort_all();
    }
}

/// Resolve a reference to a fetchable URL and its display kind
///
/// http(s) references pass through; `s3://bucket/key` goes through the
/// object store; anything else is treated as a key relative to the
/// document's storage location.
async fn resolve_reference(
    store: &dyn ObjectStore,
    location: Option<&S3Location>,
    reference: &str,
) -> Result<(String, MediaKind)> {
    let kind = media_kind(reference);
    let reference = reference.trim_start_matches('/');

    if reference.starts_with("http") {
        return Ok((reference.to_string(), kind));
    }

    if let Some(stripped) = reference.strip_prefix("s3://") {
        let (bucket, key) = stripped.split_once('/').ok_or_else(|| {
            Error::NotFound(format!("s3 reference missing key: {}", reference))
        })?;
        let url = store.presign(bucket, key).await?;
        return Ok((url, kind));
    }

    // Asset-relative reference; tolerate callers prepending the results path
    let relative = reference
        .split_once("results/")
        .map(|(_, rest)| rest)
        .unwrap_or(reference);

    let location = location.ok_or_else(|| {
        Error::NotFound(format!(
            "document has no storage location for reference {}",
            relative
        ))
    })?;
    let key = format!("{}/{}", location.prefix, relative);
    let url = store.presign(&location.bucket, &key).await?;
    Ok((url, kind))
}
