use std::future::Future;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use rand::Rng;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::{
    error::{AppError, AppResult},
    form::{resolve_attachment, FileRefInput, Upload},
};

/// Public prefix under which stored files are served.
pub const PUBLIC_PREFIX: &str = "/uploads";

#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Persists `body` and returns the generated file name.
    async fn put_object(
        &self,
        field: &str,
        body: Bytes,
        content_type: &str,
        original_name: Option<&str>,
    ) -> anyhow::Result<String>;
    async fn delete_object(&self, reference: &str) -> anyhow::Result<()>;
}

/// Flat directory on the local filesystem, served back under `/uploads`.
#[derive(Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub async fn new(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .with_context(|| format!("create upload dir {}", root.display()))?;
        Ok(Self { root })
    }
}

#[async_trait]
impl StorageClient for LocalStorage {
    async fn put_object(
        &self,
        field: &str,
        body: Bytes,
        content_type: &str,
        original_name: Option<&str>,
    ) -> anyhow::Result<String> {
        let name = generate_file_name(field, content_type, original_name);
        let path = self.root.join(&name);
        tokio::fs::write(&path, &body)
            .await
            .with_context(|| format!("write {}", path.display()))?;
        debug!(file = %name, bytes = body.len(), "file stored");
        Ok(name)
    }

    async fn delete_object(&self, reference: &str) -> anyhow::Result<()> {
        let Some(name) = local_file_name(reference) else {
            warn!(reference, "not a local upload; skipping delete");
            return Ok(());
        };
        let path = self.root.join(name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(file = %name, "file deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("remove {}", path.display())),
        }
    }
}

/// `<field>-<unix millis>-<random>.<ext>`
pub fn generate_file_name(field: &str, content_type: &str, original_name: Option<&str>) -> String {
    let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    let random: u32 = rand::thread_rng().gen_range(100_000_000..1_000_000_000);
    let ext = original_name
        .and_then(|n| Path::new(n).extension())
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| e.to_ascii_lowercase())
        .or_else(|| ext_from_mime(content_type).map(str::to_string))
        .unwrap_or_else(|| "bin".to_string());
    format!("{}-{}-{}.{}", field, millis, random, ext)
}

pub fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        "image/heic" => Some("heic"),
        _ => None,
    }
}

pub fn is_image(ct: &str) -> bool {
    ct.starts_with("image/")
}

/// Maps a stored reference to a bare file name inside the upload dir.
/// External URLs and anything with other path components yield `None`.
pub fn local_file_name(reference: &str) -> Option<&str> {
    if reference.contains("://") {
        return None;
    }
    let name = reference
        .strip_prefix(PUBLIC_PREFIX)
        .map(|r| r.trim_start_matches('/'))
        .unwrap_or(reference);
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\');
    valid.then_some(name)
}

/// URL a client can fetch a stored reference from.
pub fn public_url(reference: &str) -> String {
    match local_file_name(reference) {
        Some(name) => format!("{}/{}", PUBLIC_PREFIX, name),
        None => reference.to_string(),
    }
}

/// Best-effort delete: failures are logged, never returned.
pub async fn discard(storage: &dyn StorageClient, reference: &str) {
    if let Err(e) = storage.delete_object(reference).await {
        warn!(error = %e, reference, "failed to delete stored file");
    }
}

/// Stores an uploaded image under its form field name. Non-image
/// content types are rejected before anything is written.
pub async fn save_image(storage: &dyn StorageClient, upload: Upload) -> AppResult<String> {
    if !is_image(&upload.content_type) {
        return Err(AppError::bad_request(format!(
            "{} must be an image, got {}",
            upload.field, upload.content_type
        )));
    }
    let name = storage
        .put_object(
            &upload.field,
            upload.body,
            &upload.content_type,
            upload.file_name.as_deref(),
        )
        .await?;
    Ok(name)
}

/// Removes a file saved earlier in a request that is now failing.
pub async fn rollback_upload(storage: &dyn StorageClient, saved: Option<&str>) {
    if let Some(name) = saved {
        warn!(file = name, "request failed after upload; removing file");
        discard(storage, name).await;
    }
}

/// Saves an optional upload, resolves the reference to store and runs
/// `write` with it. A file saved here is removed again if `write` fails;
/// the file it replaces is removed only after `write` succeeds.
pub async fn write_with_attachment<T, F, Fut>(
    storage: &dyn StorageClient,
    field: &str,
    existing: Option<&str>,
    upload: Option<Upload>,
    input: &FileRefInput,
    write: F,
) -> AppResult<T>
where
    F: FnOnce(Option<String>) -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    input.ensure_not_foreign(existing, field)?;
    let saved = match upload {
        Some(upload) => Some(save_image(storage, upload).await?),
        None => None,
    };
    let plan = resolve_attachment(existing, saved.as_deref(), input);
    match write(plan.reference).await {
        Ok(done) => {
            if let Some(old) = &plan.discard {
                discard(storage, old).await;
            }
            Ok(done)
        }
        Err(e) => {
            rollback_upload(storage, saved.as_deref()).await;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::testing::FakeStorage;

    #[test]
    fn test_ext_from_mime() {
        assert_eq!(ext_from_mime("image/jpeg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/jpg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/png"), Some("png"));
        assert_eq!(ext_from_mime("image/webp"), Some("webp"));
        assert_eq!(ext_from_mime("application/octet-stream"), None);
    }

    #[test]
    fn generated_names_follow_layout() {
        let name = generate_file_name("photo", "image/png", Some("Me At Home.JPEG"));
        let parts: Vec<&str> = name.splitn(3, '-').collect();
        assert_eq!(parts[0], "photo");
        assert!(parts[1].parse::<i128>().is_ok());
        assert!(name.ends_with(".jpeg"));

        let from_mime = generate_file_name("poster", "image/webp", None);
        assert!(from_mime.starts_with("poster-"));
        assert!(from_mime.ends_with(".webp"));

        let unknown = generate_file_name("photo", "application/x-foo", Some("noext"));
        assert!(unknown.ends_with(".bin"));
    }

    #[test]
    fn local_file_name_rejects_escapes() {
        assert_eq!(local_file_name("photo-1-2.jpg"), Some("photo-1-2.jpg"));
        assert_eq!(local_file_name("/uploads/photo-1-2.jpg"), Some("photo-1-2.jpg"));
        assert_eq!(local_file_name("../etc/passwd"), None);
        assert_eq!(local_file_name("/uploads/../secret"), None);
        assert_eq!(local_file_name("https://cdn.example.com/a.jpg"), None);
        assert_eq!(local_file_name(".."), None);
        assert_eq!(local_file_name(""), None);
    }

    #[test]
    fn public_url_prefixes_local_names_only() {
        assert_eq!(public_url("photo-1-2.jpg"), "/uploads/photo-1-2.jpg");
        assert_eq!(public_url("https://cdn/x.png"), "https://cdn/x.png");
    }

    #[tokio::test]
    async fn local_storage_put_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();

        let name = storage
            .put_object("photo", Bytes::from_static(b"img"), "image/png", None)
            .await
            .unwrap();
        let path = dir.path().join(&name);
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"img");

        storage.delete_object(&format!("/uploads/{}", name)).await.unwrap();
        assert!(!path.exists());

        // already gone and foreign references are both no-ops
        storage.delete_object(&name).await.unwrap();
        storage.delete_object("../outside.txt").await.unwrap();
    }

    fn upload(content_type: &str) -> Upload {
        Upload {
            field: "photo".into(),
            file_name: Some("me.png".into()),
            content_type: content_type.into(),
            body: Bytes::from_static(b"x"),
        }
    }

    #[tokio::test]
    async fn save_image_rejects_non_images_without_writing() {
        let fake = FakeStorage::default();
        let err = save_image(&fake, upload("text/plain")).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        assert!(fake.stored.lock().unwrap().is_empty());

        let name = save_image(&fake, upload("image/png")).await.unwrap();
        assert!(name.starts_with("photo-"));
        assert_eq!(fake.stored.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rollback_swallows_delete_failures() {
        let fake = FakeStorage {
            fail_deletes: true,
            ..Default::default()
        };
        rollback_upload(&fake, Some("photo-1-2.png")).await;
        rollback_upload(&fake, None).await;
        assert_eq!(*fake.deleted.lock().unwrap(), vec!["photo-1-2.png".to_string()]);
    }

    #[tokio::test]
    async fn failed_write_removes_the_new_upload() {
        let fake = FakeStorage::default();
        let err = write_with_attachment(
            &fake,
            "photo",
            None,
            Some(upload("image/png")),
            &FileRefInput::Unchanged,
            |reference| async move {
                assert!(reference.is_some());
                Err::<(), _>(AppError::conflict("taken"))
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        let stored = fake.stored.lock().unwrap().clone();
        assert_eq!(stored.len(), 1);
        assert_eq!(*fake.deleted.lock().unwrap(), stored);
    }

    #[tokio::test]
    async fn replaced_file_is_discarded_only_after_write() {
        let fake = FakeStorage::default();
        let written = write_with_attachment(
            &fake,
            "photo",
            Some("photo-1-1.png"),
            Some(upload("image/png")),
            &FileRefInput::Unchanged,
            |reference| {
                let deleted_during_write = fake.deleted.lock().unwrap().len();
                async move {
                    assert_eq!(deleted_during_write, 0);
                    Ok(reference)
                }
            },
        )
        .await
        .unwrap();
        let stored = fake.stored.lock().unwrap().clone();
        assert_eq!(written, stored.first().cloned());
        assert_eq!(*fake.deleted.lock().unwrap(), vec!["photo-1-1.png".to_string()]);
    }

    #[tokio::test]
    async fn failed_write_keeps_the_old_file() {
        let fake = FakeStorage::default();
        let _ = write_with_attachment(
            &fake,
            "photo",
            Some("photo-1-1.png"),
            Some(upload("image/png")),
            &FileRefInput::Remove,
            |_| async { Err::<(), _>(AppError::bad_request("no")) },
        )
        .await;
        let deleted = fake.deleted.lock().unwrap().clone();
        assert_eq!(deleted.len(), 1);
        assert_ne!(deleted[0], "photo-1-1.png");
    }

    #[tokio::test]
    async fn removal_without_upload_clears_and_discards() {
        let fake = FakeStorage::default();
        let reference = write_with_attachment(
            &fake,
            "photo",
            Some("photo-1-1.png"),
            None,
            &FileRefInput::Remove,
            |reference| async move { Ok(reference) },
        )
        .await
        .unwrap();
        assert_eq!(reference, None);
        assert_eq!(*fake.deleted.lock().unwrap(), vec!["photo-1-1.png".to_string()]);
    }

    #[tokio::test]
    async fn literal_cannot_take_over_another_records_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();
        let poster = storage
            .put_object("poster", Bytes::from_static(b"img"), "image/png", None)
            .await
            .unwrap();

        let err = write_with_attachment(
            &storage,
            "photo",
            None,
            None,
            &FileRefInput::Replace(poster.clone()),
            |reference| async move { Ok(reference) },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        assert!(dir.path().join(&poster).exists());

        let remote = write_with_attachment(
            &storage,
            "photo",
            None,
            None,
            &FileRefInput::Replace("https://cdn.example/me.png".into()),
            |reference| async move { Ok(reference) },
        )
        .await
        .unwrap();
        assert_eq!(remote.as_deref(), Some("https://cdn.example/me.png"));
    }

    #[tokio::test]
    async fn discard_after_removal_swallows_failures() {
        let fake = FakeStorage {
            fail_deletes: true,
            ..Default::default()
        };
        discard(&fake, "photo-1-2.png").await;
        assert_eq!(*fake.deleted.lock().unwrap(), vec!["photo-1-2.png".to_string()]);
    }
}
