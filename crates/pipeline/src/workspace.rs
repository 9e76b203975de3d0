//! Per-request scratch directory.
//!
//! Each request gets a fresh directory under the scratch root named after its
//! token. The directory is removed by [`RequestWorkspace::cleanup`] or, on any
//! other exit path (early return, panic, dropped future), when the workspace
//! is dropped.

use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

const SOURCE_DIR: &str = "source";
const OUTPUT_DIR: &str = "out";

/// Scoped temporary directory owned by one request.
#[derive(Debug)]
pub struct RequestWorkspace {
    dir: TempDir,
}

impl RequestWorkspace {
    /// Creates `<scratch_root>/courier-<token>-XXXXXX` with its `source/` subdirectory.
    pub async fn create(scratch_root: &Path, token: &str) -> io::Result<Self> {
        let root = scratch_root.to_path_buf();
        let prefix = format!("courier-{token}-");
        let dir = tokio::task::spawn_blocking(move || -> io::Result<TempDir> {
            std::fs::create_dir_all(&root)?;
            let dir = tempfile::Builder::new().prefix(&prefix).tempdir_in(&root)?;
            std::fs::create_dir(dir.path().join(SOURCE_DIR))?;
            Ok(dir)
        })
        .await
        .map_err(io::Error::other)??;

        debug!(request = token, dir = %dir.path().display(), "workspace created");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Where acquirers write the payload.
    pub fn source_dir(&self) -> PathBuf {
        self.dir.path().join(SOURCE_DIR)
    }

    /// Where the packager writes delivery units. Created by the packager.
    pub fn output_dir(&self) -> PathBuf {
        self.dir.path().join(OUTPUT_DIR)
    }

    /// Removes the directory and everything in it.
    pub async fn cleanup(self) -> io::Result<()> {
        let path = self.dir.path().to_path_buf();
        let result = tokio::task::spawn_blocking(move || self.dir.close())
            .await
            .map_err(io::Error::other)?;
        match &result {
            Ok(()) => debug!(dir = %path.display(), "workspace removed"),
            Err(e) => warn!(dir = %path.display(), error = %e, "failed to remove workspace"),
        }
        result
    }
}
