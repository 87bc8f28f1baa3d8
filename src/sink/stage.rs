//! Staging and verification of individual assets.

use crate::error::SinkError;
use crate::types::{AssetRef, Checksum};
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;

/// Suffix of files still being written
pub(crate) const PART_SUFFIX: &str = ".part";

/// In-progress path for a staged file
pub(crate) fn part_path(staging: &Path, file_name: &str) -> PathBuf {
    staging.join(format!("{}{}", file_name, PART_SUFFIX))
}

/// Storage names for every asset, numbering repeated media types
pub(crate) fn file_names(assets: &[AssetRef]) -> Vec<String> {
    assets
        .iter()
        .enumerate()
        .map(|(i, asset)| {
            let same_type_before = assets[..i]
                .iter()
                .filter(|a| a.media_type == asset.media_type)
                .count();
            asset.file_name(same_type_before)
        })
        .collect()
}

/// Remove `path`, ignoring a missing file
pub(crate) async fn remove_if_exists(path: &Path) -> Result<(), SinkError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SinkError::io(path, e)),
    }
}

/// Drop leftovers a new attempt cannot trust
///
/// Completed (non-`.part`) files are always cleared since the asset list may
/// have changed since they were staged. A `.part` file is only kept when its
/// asset advertises a size, which is what makes resuming it safe.
pub(crate) async fn prepare_staging(
    staging: &Path,
    assets: &[AssetRef],
    names: &[String],
) -> Result<(), SinkError> {
    tokio::fs::create_dir_all(staging)
        .await
        .map_err(|e| SinkError::io(staging, e))?;

    let resumable: Vec<String> = assets
        .iter()
        .zip(names)
        .filter(|(asset, _)| asset.expected_size.is_some())
        .map(|(_, name)| format!("{}{}", name, PART_SUFFIX))
        .collect();

    let mut entries = tokio::fs::read_dir(staging)
        .await
        .map_err(|e| SinkError::io(staging, e))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| SinkError::io(staging, e))?
    {
        let name = entry.file_name().to_string_lossy().into_owned();
        if resumable.contains(&name) {
            tracing::debug!(file = %name, "Keeping partial file for resume");
            continue;
        }
        remove_if_exists(&entry.path()).await?;
    }

    Ok(())
}

/// Check a fully downloaded `.part` file against the asset's advertised size and digest
///
/// A file that fails verification is deleted so the next attempt starts clean.
pub(crate) async fn verify(
    path: &Path,
    file_name: &str,
    asset: &AssetRef,
    bytes: u64,
) -> Result<(), SinkError> {
    let result = check(path, file_name, asset, bytes).await;
    if matches!(
        result,
        Err(SinkError::SizeMismatch { .. } | SinkError::ChecksumMismatch { .. })
    ) {
        remove_if_exists(path).await?;
    }
    result
}

async fn check(
    path: &Path,
    file_name: &str,
    asset: &AssetRef,
    bytes: u64,
) -> Result<(), SinkError> {
    if let Some(expected) = asset.expected_size
        && expected != bytes
    {
        return Err(SinkError::SizeMismatch {
            file: file_name.to_string(),
            expected,
            actual: bytes,
        });
    }

    let Some(checksum) = &asset.checksum else {
        return Ok(());
    };

    let (expected, actual) = match checksum {
        Checksum::Md5(expected) => (expected, md5_file(path).await?),
        Checksum::Sha256(expected) => (expected, sha256_file(path).await?),
    };

    if !expected.eq_ignore_ascii_case(&actual) {
        return Err(SinkError::ChecksumMismatch {
            file: file_name.to_string(),
            expected: expected.clone(),
            actual,
        });
    }

    Ok(())
}

const HASH_BUFFER: usize = 64 * 1024;

async fn md5_file(path: &Path) -> Result<String, SinkError> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| SinkError::io(path, e))?;
    let mut context = md5::Context::new();
    let mut buffer = vec![0_u8; HASH_BUFFER];
    loop {
        let n = file.read(&mut buffer).await.map_err(|e| SinkError::io(path, e))?;
        if n == 0 {
            break;
        }
        context.consume(&buffer[..n]);
    }
    Ok(format!("{:x}", context.compute()))
}

async fn sha256_file(path: &Path) -> Result<String, SinkError> {
    use sha2::{Digest, Sha256};

    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| SinkError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0_u8; HASH_BUFFER];
    loop {
        let n = file.read(&mut buffer).await.map_err(|e| SinkError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MediaType;
    use tempfile::tempdir;

    #[test]
    fn file_names_number_repeated_types() {
        let assets = vec![
            AssetRef::new("https://cdn.example/a.webp", MediaType::Image),
            AssetRef::new("https://cdn.example/b.webp", MediaType::Image),
            AssetRef::new("https://cdn.example/bgm", MediaType::Audio),
        ];
        assert_eq!(file_names(&assets), ["image_01.webp", "image_02.webp", "music.mp3"]);
    }

    #[tokio::test]
    async fn sha256_and_md5_of_known_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f");
        tokio::fs::write(&path, b"hello").await.unwrap();

        assert_eq!(
            sha256_file(&path).await.unwrap(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(md5_file(&path).await.unwrap(), "5d41402abc4b2a76b9719d911017c592");
    }

    #[tokio::test]
    async fn verify_accepts_matching_digest_case_insensitively() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("video.mp4.part");
        tokio::fs::write(&path, b"hello").await.unwrap();

        let asset = AssetRef::new("https://cdn.example/v.mp4", MediaType::Video)
            .with_size(Some(5))
            .with_checksum(Some(Checksum::Md5("5D41402ABC4B2A76B9719D911017C592".to_string())));
        verify(&path, "video.mp4", &asset, 5).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn verify_failure_removes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("video.mp4.part");
        tokio::fs::write(&path, b"hello").await.unwrap();

        let asset = AssetRef::new("https://cdn.example/v.mp4", MediaType::Video)
            .with_checksum(Some(Checksum::Sha256("00".repeat(32))));
        let err = verify(&path, "video.mp4", &asset, 5).await.unwrap_err();
        assert!(matches!(err, SinkError::ChecksumMismatch { .. }), "{err:?}");
        assert!(!path.exists());

        tokio::fs::write(&path, b"hello").await.unwrap();
        let asset = AssetRef::new("https://cdn.example/v.mp4", MediaType::Video).with_size(Some(6));
        let err = verify(&path, "video.mp4", &asset, 5).await.unwrap_err();
        assert!(matches!(err, SinkError::SizeMismatch { expected: 6, actual: 5, .. }), "{err:?}");
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn prepare_keeps_only_resumable_parts() {
        let dir = tempdir().unwrap();
        let staging = dir.path().join("7301");
        tokio::fs::create_dir_all(&staging).await.unwrap();
        for name in ["video.mp4.part", "music.mp3.part", "cover.jpeg", "stale.bin"] {
            tokio::fs::write(staging.join(name), b"x").await.unwrap();
        }

        let assets = vec![
            AssetRef::new("https://cdn.example/v.mp4", MediaType::Video).with_size(Some(10)),
            AssetRef::new("https://cdn.example/m.mp3", MediaType::Audio),
            AssetRef::new("https://cdn.example/c.jpeg", MediaType::Cover),
        ];
        let names = file_names(&assets);
        prepare_staging(&staging, &assets, &names).await.unwrap();

        assert!(staging.join("video.mp4.part").exists());
        assert!(!staging.join("music.mp3.part").exists());
        assert!(!staging.join("cover.jpeg").exists());
        assert!(!staging.join("stale.bin").exists());
    }
}
