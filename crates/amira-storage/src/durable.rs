//! Crash-safe file writes and secure erase.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::StorageResult;

pub const TMP_SUFFIX: &str = ".tmp";

const ERASE_CHUNK: usize = 64 * 1024;

/// Temp path used while writing `path`: `<name>.tmp` in the same directory.
pub fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(TMP_SUFFIX);
    path.with_file_name(name)
}

/// Write `data` to `path` so a reader sees either the old file or the complete new one.
///
/// tmp file → fsync → rename → fsync parent directory.
pub fn write_atomic(path: &Path, data: &[u8]) -> StorageResult<()> {
    let tmp = tmp_path(path);
    {
        let mut f = File::create(&tmp)?;
        f.write_all(data)?;
        f.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    sync_parent(path)?;
    Ok(())
}

#[cfg(unix)]
fn sync_parent(path: &Path) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        let dir = if parent.as_os_str().is_empty() {
            Path::new(".")
        } else {
            parent
        };
        File::open(dir)?.sync_all()?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> StorageResult<()> {
    Ok(())
}

/// Overwrite a file's contents with zeros, sync, then unlink it.
///
/// On copy-on-write or wear-levelled media the old blocks may survive the
/// overwrite; the data is ciphertext either way.
pub fn secure_erase(path: &Path) -> StorageResult<()> {
    let len = match fs::metadata(path) {
        Ok(m) => m.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    {
        let mut f = OpenOptions::new().write(true).open(path)?;
        let zeros = [0u8; ERASE_CHUNK];
        let mut remaining = len;
        while remaining > 0 {
            let n = remaining.min(ERASE_CHUNK as u64) as usize;
            f.write_all(&zeros[..n])?;
            remaining -= n as u64;
        }
        f.sync_all()?;
    }
    fs::remove_file(path)?;
    tracing::debug!(path = %path.display(), bytes = len, "securely erased");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_atomic_creates_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.amrb");

        write_atomic(&path, b"first").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"first");

        write_atomic(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");
        assert!(!tmp_path(&path).exists());
    }

    #[test]
    fn test_tmp_path() {
        assert_eq!(
            tmp_path(Path::new("/x/rec.amrb")),
            PathBuf::from("/x/rec.amrb.tmp")
        );
    }

    #[test]
    fn test_secure_erase_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.amrb");
        fs::write(&path, vec![0xAB; ERASE_CHUNK * 2 + 17]).unwrap();

        secure_erase(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_secure_erase_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        secure_erase(&dir.path().join("absent")).unwrap();
    }
}
