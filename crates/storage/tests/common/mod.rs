use bytes::Bytes;
use tempfile::TempDir;
use tessera_storage::FilesystemBackend;
use tessera_storage::traits::ObjectStore;

/// A filesystem store rooted in a fresh temp directory.
pub async fn filesystem_store() -> (TempDir, FilesystemBackend) {
    let dir = TempDir::new().unwrap();
    let backend = FilesystemBackend::new(dir.path().join("store")).await.unwrap();
    (dir, backend)
}

#[allow(dead_code)]
/// Store `count` objects named `img{i:04}-small-google_drive`.
pub async fn seed_images(store: &dyn ObjectStore, count: usize) -> Vec<String> {
    let mut keys = Vec::with_capacity(count);
    for i in 0..count {
        let key = format!("img{i:04}-small-google_drive");
        store
            .put(&key, Bytes::from(vec![i as u8]), "image/jpeg")
            .await
            .unwrap();
        keys.push(key);
    }
    keys
}
