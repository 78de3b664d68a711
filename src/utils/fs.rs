use std::path::Path;

use tokio::fs;

use crate::error::Result;

/// Write `content` to `path` atomically: temp file, then rename.
pub async fn write_atomic(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let temp_file = path.with_extension("tmp");
    fs::write(&temp_file, content).await?;

    // rename() does not replace an existing file on Windows; keep the old
    // file as .bak until the new one is in place.
    #[cfg(windows)]
    {
        let backup_file = path.with_extension("bak");
        if path.exists() {
            if let Err(e) = fs::rename(path, &backup_file).await {
                tracing::warn!(error = %e, "Backup rename failed, attempting direct removal");
                let _ = fs::remove_file(path).await;
            }
        }

        match fs::rename(&temp_file, path).await {
            Ok(_) => {
                let _ = fs::remove_file(&backup_file).await;
            }
            Err(e) => {
                if backup_file.exists() {
                    let _ = fs::rename(&backup_file, path).await;
                }
                let _ = std::fs::remove_file(&temp_file);
                return Err(e.into());
            }
        }
    }

    #[cfg(not(windows))]
    fs::rename(&temp_file, path).await.inspect_err(|_| {
        let _ = std::fs::remove_file(&temp_file);
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_atomic_replaces_and_cleans_up() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("state.json");

        write_atomic(&path, "first").await.unwrap();
        write_atomic(&path, "second").await.unwrap();

        assert_eq!(fs::read_to_string(&path).await.unwrap(), "second");
        assert!(!path.with_extension("tmp").exists());
    }
}
