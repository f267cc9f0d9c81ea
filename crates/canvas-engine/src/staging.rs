use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::{Builder as TempBuilder, TempDir};

const STAGING_PREFIX: &str = "canvas-images-";

/// Uploaded images written to a per-request directory with a random name.
///
/// `cleanup` removes every file and the directory and only logs failures.
/// Dropping without `cleanup` still removes the directory.
#[derive(Debug)]
pub struct StagedImages {
    dir: TempDir,
    paths: Vec<PathBuf>,
}

impl StagedImages {
    pub fn stage(root: Option<&Path>, images: &[Vec<u8>]) -> Result<Self> {
        let mut builder = TempBuilder::new();
        builder.prefix(STAGING_PREFIX);
        let dir = match root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .context("failed to create image staging directory")?;

        let mut paths = Vec::with_capacity(images.len());
        for (idx, bytes) in images.iter().enumerate() {
            let path = dir.path().join(format!("image-{idx}.png"));
            fs::write(&path, bytes)
                .with_context(|| format!("failed to stage {}", path.display()))?;
            paths.push(path);
        }
        tracing::debug!(dir = %dir.path().display(), count = paths.len(), "staged upload images");
        Ok(Self { dir, paths })
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn path(&self, index: usize) -> Option<&Path> {
        self.paths.get(index).map(PathBuf::as_path)
    }

    pub fn cleanup(self) {
        for path in &self.paths {
            if let Err(err) = fs::remove_file(path) {
                tracing::warn!(path = %path.display(), error = %err, "failed to remove staged image");
            }
        }
        let dir = self.dir.path().to_path_buf();
        if let Err(err) = self.dir.close() {
            tracing::warn!(dir = %dir.display(), error = %err, "failed to remove staging directory");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(path: &Path) -> Result<usize> {
        Ok(fs::read_dir(path)?.count())
    }

    #[test]
    fn stage_writes_one_file_per_image() -> Result<()> {
        let root = tempfile::tempdir()?;
        let staged = StagedImages::stage(Some(root.path()), &[b"one".to_vec(), b"two".to_vec()])?;

        assert!(staged
            .dir()
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(STAGING_PREFIX)));
        assert_eq!(staged.paths().len(), 2);
        assert_eq!(fs::read(staged.paths()[1].as_path())?, b"two".to_vec());
        assert_eq!(
            staged.path(0).and_then(Path::file_name).and_then(|n| n.to_str()),
            Some("image-0.png")
        );
        assert!(staged.path(2).is_none());

        staged.cleanup();
        assert_eq!(entries(root.path())?, 0);
        Ok(())
    }

    #[test]
    fn concurrent_requests_get_distinct_directories() -> Result<()> {
        let root = tempfile::tempdir()?;
        let first = StagedImages::stage(Some(root.path()), &[b"a".to_vec()])?;
        let second = StagedImages::stage(Some(root.path()), &[b"b".to_vec()])?;
        assert_ne!(first.dir(), second.dir());
        assert_eq!(entries(root.path())?, 2);

        first.cleanup();
        second.cleanup();
        assert_eq!(entries(root.path())?, 0);
        Ok(())
    }

    #[test]
    fn cleanup_tolerates_files_already_gone() -> Result<()> {
        let root = tempfile::tempdir()?;
        let staged = StagedImages::stage(Some(root.path()), &[b"a".to_vec(), b"b".to_vec()])?;
        fs::remove_file(&staged.paths()[0])?;

        staged.cleanup();
        assert_eq!(entries(root.path())?, 0);
        Ok(())
    }

    #[test]
    fn drop_without_cleanup_still_removes_directory() -> Result<()> {
        let root = tempfile::tempdir()?;
        {
            let _staged = StagedImages::stage(Some(root.path()), &[b"a".to_vec()])?;
            assert_eq!(entries(root.path())?, 1);
        }
        assert_eq!(entries(root.path())?, 0);
        Ok(())
    }
}
