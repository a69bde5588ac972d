//! All-or-nothing filesystem writes
//!
//! Content is staged in a temporary file on the same filesystem, flushed,
//! then moved into place with a single rename/link. Readers never observe a
//! partially written file.

use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tempfile::NamedTempFile;

static STAGING_COUNTER: AtomicU64 = AtomicU64::new(0);

fn staged_file(staging_dir: &Path, dest: &Path) -> io::Result<NamedTempFile> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::create_dir_all(staging_dir)?;
    NamedTempFile::new_in(staging_dir)
}

fn persist(staged: NamedTempFile, dest: &Path, clobber: bool) -> io::Result<bool> {
    staged.as_file().sync_all()?;
    if clobber {
        staged.persist(dest).map_err(|e| e.error)?;
        return Ok(true);
    }
    match staged.persist_noclobber(dest) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.error),
    }
}

/// Write `bytes` to `dest`
///
/// With `clobber == false` an existing `dest` wins and `Ok(false)` is
/// returned; exactly one of several racing writers succeeds.
pub(crate) fn write_atomic(
    staging_dir: &Path,
    dest: &Path,
    bytes: &[u8],
    clobber: bool,
) -> io::Result<bool> {
    let mut staged = staged_file(staging_dir, dest)?;
    staged.write_all(bytes)?;
    persist(staged, dest, clobber)
}

/// Stream the file at `src` into `dest`
pub(crate) fn copy_atomic(
    staging_dir: &Path,
    src: &Path,
    dest: &Path,
    clobber: bool,
) -> io::Result<bool> {
    let mut staged = staged_file(staging_dir, dest)?;
    let mut reader = File::open(src)?;
    io::copy(&mut reader, staged.as_file_mut())?;
    persist(staged, dest, clobber)
}

/// Share `src` at `dest` without copying when the filesystem allows it
///
/// Falls back to a copy (e.g. across devices). Returns `Ok(false)` when
/// `dest` already existed.
pub(crate) fn link_or_copy(staging_dir: &Path, src: &Path, dest: &Path) -> io::Result<bool> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::hard_link(src, dest) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => {
            tracing::debug!("hard link {} failed ({}), copying", dest.display(), e);
            copy_atomic(staging_dir, src, dest, false)
        }
    }
}

/// Point `dest` at the content of `src`, replacing whatever was there
pub(crate) fn replace_with_link(staging_dir: &Path, src: &Path, dest: &Path) -> io::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::create_dir_all(staging_dir)?;

    let staged = unique_staging_path(staging_dir);
    match fs::hard_link(src, &staged) {
        Ok(()) => {
            if let Err(e) = fs::rename(&staged, dest) {
                let _ = fs::remove_file(&staged);
                return Err(e);
            }
            Ok(())
        }
        Err(_) => copy_atomic(staging_dir, src, dest, true).map(|_| ()),
    }
}

fn unique_staging_path(staging_dir: &Path) -> PathBuf {
    let n = STAGING_COUNTER.fetch_add(1, Ordering::Relaxed);
    staging_dir.join(format!(".link-{}-{}", std::process::id(), n))
}

/// Resolve a caller-supplied retrieval target: directories receive the
/// asset's file name
pub(crate) fn resolve_target(target: &Path, file_name: &str) -> PathBuf {
    if target.is_dir() {
        target.join(file_name)
    } else {
        target.to_path_buf()
    }
}

/// Staging directory next to `target`, so the final rename stays on one
/// filesystem
pub(crate) fn sibling_staging(target: &Path) -> PathBuf {
    match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

pub(crate) fn make_read_only(path: &Path) -> io::Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();
    if !permissions.readonly() {
        permissions.set_readonly(true);
        fs::set_permissions(path, permissions)?;
    }
    Ok(())
}

/// Streaming SHA256 of a file: (hex digest, size in bytes)
pub(crate) fn hash_file(path: &Path) -> io::Result<(String, u64)> {
    let mut hasher = Sha256::new();
    let mut file = File::open(path)?;
    let size = io::copy(&mut file, &mut hasher)?;
    Ok((format!("{:x}", hasher.finalize()), size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_noclobber_keeps_first() {
        let dir = TempDir::new().unwrap();
        let staging = dir.path().join("tmp");
        let dest = dir.path().join("objects/ab/blob");

        assert!(write_atomic(&staging, &dest, b"first", false).unwrap());
        assert!(!write_atomic(&staging, &dest, b"second", false).unwrap());
        assert_eq!(fs::read(&dest).unwrap(), b"first");

        // Staging area holds nothing once persisted
        assert_eq!(fs::read_dir(&staging).unwrap().count(), 0);
    }

    #[test]
    fn test_write_atomic_clobber_replaces() {
        let dir = TempDir::new().unwrap();
        let staging = dir.path().join("tmp");
        let dest = dir.path().join("head");

        write_atomic(&staging, &dest, b"v1", true).unwrap();
        write_atomic(&staging, &dest, b"v2", true).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"v2");
    }

    #[test]
    fn test_replace_with_link_shares_content() {
        let dir = TempDir::new().unwrap();
        let staging = dir.path().join("tmp");
        let src = dir.path().join("blob");
        let dest = dir.path().join("files/a/b.png");
        fs::write(&src, b"pixels").unwrap();
        fs::create_dir_all(dest.parent().unwrap()).unwrap();
        fs::write(&dest, b"old").unwrap();

        replace_with_link(&staging, &src, &dest).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"pixels");
    }

    #[test]
    fn test_hash_file_matches_content_hash() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f");
        fs::write(&path, b"mesh").unwrap();

        let (hash, size) = hash_file(&path).unwrap();
        assert_eq!(hash, crate::domain::content_hash(b"mesh"));
        assert_eq!(size, 4);
    }
}
