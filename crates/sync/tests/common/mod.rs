#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tessera_core::{CacheKey, KeyResolver, OriginKind, SizeClass};
use tessera_origin::{
    BearerToken, FetchedImage, ImageFetcher, MetadataLookup, MetadataSource, OriginError,
    OriginMetadata, OriginResult, TokenProvider,
};
use tessera_storage::{
    ContinuationToken, FilesystemBackend, ListingOptions, ListingPage, ListingResume, ObjectMeta,
    ObjectStore, ObjectSummary, StorageError, StorageResult, StoredObject,
};
use tessera_sync::{
    Populator, QueueError, ReconciliationSweep, SweepMessage, SweepOptions, WorkQueue,
};
use time::OffsetDateTime;

pub const ORIGIN_BYTES: &[u8] = b"\xff\xd8\xff\xe0fresh-jpeg";

/// A filesystem store rooted in a fresh temp directory.
pub async fn filesystem_store() -> (TempDir, Arc<FilesystemBackend>) {
    let dir = TempDir::new().unwrap();
    let backend = FilesystemBackend::new(dir.path().join("store")).await.unwrap();
    (dir, Arc::new(backend))
}

pub fn resolver() -> KeyResolver {
    KeyResolver::new("http://origin.test/thumbnail", 400, 2000)
}

pub fn key(identifier: &str, size: SizeClass) -> CacheKey {
    CacheKey::new(identifier, size, OriginKind::GoogleDrive).unwrap()
}

/// Token provider returning a fixed token, or nothing.
pub struct StaticTokens(pub Option<&'static str>);

#[async_trait]
impl TokenProvider for StaticTokens {
    async fn access_token(&self) -> Option<BearerToken> {
        self.0.map(BearerToken::new)
    }
}

/// Scripted origin metadata. Identifiers without an entry answer with
/// `default`, and `None` means the origin reports not found.
pub struct FakeMetadata {
    pub entries: Mutex<HashMap<String, Option<OffsetDateTime>>>,
    pub default: Option<OffsetDateTime>,
    pub failing: Mutex<Vec<String>>,
    pub calls: AtomicUsize,
}

impl FakeMetadata {
    pub fn modified_at(default: OffsetDateTime) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            default: Some(default),
            failing: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, identifier: &str, modified: Option<OffsetDateTime>) {
        self.entries
            .lock()
            .unwrap()
            .insert(identifier.to_string(), modified);
    }

    pub fn fail(&self, identifier: &str) {
        self.failing.lock().unwrap().push(identifier.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataSource for FakeMetadata {
    async fn metadata(
        &self,
        _origin: OriginKind,
        identifier: &str,
        token: &BearerToken,
    ) -> OriginResult<MetadataLookup> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(token.as_str(), "test-token");

        if self.failing.lock().unwrap().iter().any(|f| f == identifier) {
            return Err(OriginError::Status {
                status: 500,
                url: format!("http://origin.test/files/{identifier}"),
            });
        }

        let modified = self
            .entries
            .lock()
            .unwrap()
            .get(identifier)
            .copied()
            .unwrap_or(self.default);
        Ok(match modified {
            Some(modified_time) => MetadataLookup::Found(OriginMetadata {
                name: format!("{identifier}.jpg"),
                modified_time,
            }),
            None => MetadataLookup::NotFound,
        })
    }
}

/// Fetcher serving fixed bytes and counting requests.
pub struct FakeFetcher {
    pub body: Bytes,
    pub announce_length: bool,
    pub status: Option<u16>,
    pub calls: AtomicUsize,
    pub urls: Mutex<Vec<String>>,
}

impl FakeFetcher {
    pub fn serving(body: &'static [u8]) -> Self {
        Self {
            body: Bytes::from_static(body),
            announce_length: true,
            status: None,
            calls: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(status: u16) -> Self {
        Self {
            status: Some(status),
            ..Self::serving(b"")
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageFetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> OriginResult<FetchedImage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.to_string());
        if let Some(status) = self.status {
            return Err(OriginError::Status {
                status,
                url: url.to_string(),
            });
        }
        Ok(FetchedImage {
            data: self.body.clone(),
            content_type: Some("image/png".to_string()),
            content_length: self.announce_length.then_some(self.body.len() as u64),
        })
    }
}

/// Queue that records messages, or refuses them.
#[derive(Default)]
pub struct RecordingQueue {
    pub sent: Mutex<Vec<SweepMessage>>,
    pub refuse: bool,
}

#[async_trait]
impl WorkQueue for RecordingQueue {
    async fn send(&self, message: SweepMessage) -> Result<(), QueueError> {
        if self.refuse {
            return Err(QueueError::Closed);
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

/// In-memory store with caller-controlled upload times, including unknown ones.
///
/// Writes are logged as `"put {key}"` / `"delete {key}"`. With `failing_head`
/// set every head answers with an I/O error.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, (Bytes, Option<OffsetDateTime>)>>,
    pub ops: Mutex<Vec<String>>,
    pub failing_head: AtomicBool,
}

impl MemoryStore {
    pub fn insert(&self, key: &str, data: &'static [u8], uploaded: Option<OffsetDateTime>) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (Bytes::from_static(data), uploaded));
    }

    pub fn data(&self, key: &str) -> Option<Bytes> {
        self.objects.lock().unwrap().get(key).map(|(d, _)| d.clone())
    }

    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, key: &str) -> StorageResult<StoredObject> {
        let meta = self.head(key).await?;
        let data = self.data(key).ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        Ok(StoredObject { data, meta })
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        if self.failing_head.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::other("head unavailable")));
        }
        let objects = self.objects.lock().unwrap();
        let (data, uploaded) = objects
            .get(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        Ok(ObjectMeta {
            size: data.len() as u64,
            last_modified: *uploaded,
            content_type: Some("image/jpeg".to_string()),
        })
    }

    async fn put(&self, key: &str, data: Bytes, _content_type: &str) -> StorageResult<()> {
        self.ops.lock().unwrap().push(format!("put {key}"));
        self.objects.lock().unwrap().insert(
            key.to_string(),
            (data, Some(OffsetDateTime::now_utc())),
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.ops.lock().unwrap().push(format!("delete {key}"));
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn list_page(
        &self,
        prefix: &str,
        options: ListingOptions,
        resume: Option<ListingResume>,
    ) -> StorageResult<ListingPage> {
        let after = match resume {
            Some(resume) => Some(
                String::from_utf8(resume.start_token.as_bytes().to_vec())
                    .map_err(|_| StorageError::InvalidContinuationToken("not utf-8".into()))?,
            ),
            None => None,
        };
        let page_size = options.normalized_page_size();
        let objects = self.objects.lock().unwrap();
        let mut listed: Vec<ObjectSummary> = objects
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .filter(|(k, _)| after.as_ref().is_none_or(|a| k.as_str() > a.as_str()))
            .take(page_size + 1)
            .map(|(k, (data, uploaded))| ObjectSummary {
                key: k.clone(),
                size: data.len() as u64,
                last_modified: *uploaded,
            })
            .collect();

        let next_token = if listed.len() > page_size {
            listed.truncate(page_size);
            let last = listed.last().map(|o| o.key.clone()).unwrap_or_default();
            Some(ContinuationToken::new(last.into_bytes())?)
        } else {
            None
        };
        Ok(ListingPage {
            objects: listed,
            next_token,
        })
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// Everything a sweep test needs, wired to the fakes above.
pub struct Harness {
    pub store: Arc<dyn ObjectStore>,
    pub metadata: Arc<FakeMetadata>,
    pub fetcher: Arc<FakeFetcher>,
    pub queue: Arc<RecordingQueue>,
}

impl Harness {
    pub fn new(store: Arc<dyn ObjectStore>, metadata: FakeMetadata) -> Self {
        Self {
            store,
            metadata: Arc::new(metadata),
            fetcher: Arc::new(FakeFetcher::serving(ORIGIN_BYTES)),
            queue: Arc::new(RecordingQueue::default()),
        }
    }

    pub fn sweep(&self, tokens: StaticTokens, options: SweepOptions) -> ReconciliationSweep {
        self.sweep_with_queue(tokens, options, self.queue.clone())
    }

    pub fn sweep_with_queue(
        &self,
        tokens: StaticTokens,
        options: SweepOptions,
        queue: Arc<dyn WorkQueue>,
    ) -> ReconciliationSweep {
        ReconciliationSweep::new(
            self.store.clone(),
            Arc::new(tokens),
            self.metadata.clone(),
            Populator::new(self.store.clone(), self.fetcher.clone()),
            resolver(),
            queue,
            options,
        )
    }
}

pub fn options(page_size: usize) -> SweepOptions {
    SweepOptions {
        prefix: String::new(),
        page_size,
        max_concurrent_checks: 8,
    }
}
