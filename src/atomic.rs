//! 上传写入的临时文件与原子替换。

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use uuid::Uuid;

/// Hidden sibling of the destination; renamed over it once fully written.
pub struct AtomicFile {
    target: PathBuf,
    temp_path: PathBuf,
    file: File,
}

impl AtomicFile {
    /// 在目标文件所在目录创建临时文件。
    pub async fn new(target: &Path) -> io::Result<Self> {
        let parent = target
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "target has no parent"))?;
        // fixed length, independent of the destination name
        let temp_path = parent.join(format!(".upload.{}.part", Uuid::new_v4().simple()));
        let file = File::create(&temp_path).await?;
        Ok(Self {
            target: target.to_path_buf(),
            temp_path,
            file,
        })
    }

    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }

    /// 放弃写入并删除临时文件。
    pub async fn cleanup(self) {
        drop(self.file);
        let _ = fs::remove_file(&self.temp_path).await;
    }

    /// Flushes to disk and renames over the destination (last writer wins).
    pub async fn finalize(self) -> io::Result<()> {
        if let Err(err) = self.file.sync_all().await {
            let _ = fs::remove_file(&self.temp_path).await;
            return Err(err);
        }
        drop(self.file);

        if let Err(err) = fs::rename(&self.temp_path, &self.target).await {
            #[cfg(windows)]
            {
                if fs::remove_file(&self.target).await.is_ok()
                    && fs::rename(&self.temp_path, &self.target).await.is_ok()
                {
                    return Ok(());
                }
            }
            let _ = fs::remove_file(&self.temp_path).await;
            return Err(err);
        }

        if let Some(parent) = self.target.parent() {
            let _ = sync_dir(parent).await;
        }
        Ok(())
    }
}

#[cfg(unix)]
async fn sync_dir(path: &Path) -> io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || std::fs::File::open(path)?.sync_all())
        .await
        .map_err(|err| io::Error::other(err.to_string()))?
}

#[cfg(not(unix))]
async fn sync_dir(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::AtomicFile;
    use tempfile::tempdir;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn destination_appears_only_after_finalize() {
        let temp = tempdir().expect("tempdir");
        let target = temp.path().join("talk.mp4");

        let mut atomic = AtomicFile::new(&target).await.expect("create temp");
        atomic.file_mut().write_all(b"frames").await.expect("write");
        assert!(!target.exists());

        atomic.finalize().await.expect("finalize");
        assert_eq!(std::fs::read(&target).expect("read"), b"frames");
        assert_eq!(std::fs::read_dir(temp.path()).expect("ls").count(), 1);
    }

    #[tokio::test]
    async fn temp_name_does_not_grow_with_target_name() {
        let temp = tempdir().expect("tempdir");
        let target = temp.path().join(format!("{}.mp4", "v".repeat(251)));

        let mut atomic = AtomicFile::new(&target).await.expect("create temp");
        atomic.file_mut().write_all(b"frames").await.expect("write");
        atomic.finalize().await.expect("finalize");
        assert_eq!(std::fs::read(&target).expect("read"), b"frames");
    }

    #[tokio::test]
    async fn cleanup_leaves_no_trace() {
        let temp = tempdir().expect("tempdir");
        let target = temp.path().join("talk.mp4");
        std::fs::write(&target, b"old").expect("seed");

        let mut atomic = AtomicFile::new(&target).await.expect("create temp");
        atomic.file_mut().write_all(b"partial").await.expect("write");
        atomic.cleanup().await;

        assert_eq!(std::fs::read(&target).expect("read"), b"old");
        assert_eq!(std::fs::read_dir(temp.path()).expect("ls").count(), 1);
    }
}
