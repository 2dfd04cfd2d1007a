use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Process-identifier marker. Written on creation, removed by
/// [`PidFile::remove`] or on drop. Failures are logged, never fatal.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    written: bool,
}

impl PidFile {
    pub fn create(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let written = match write_pid(&path) {
            Ok(()) => {
                debug!("wrote pid marker {}", path.display());
                true
            }
            Err(err) => {
                warn!("failed to write pid marker {}: {err}", path.display());
                false
            }
        };

        Self { path, written }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn remove(mut self) {
        self.cleanup();
    }

    fn cleanup(&mut self) {
        if !self.written {
            return;
        }
        self.written = false;

        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("removed pid marker {}", self.path.display()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!("failed to remove pid marker {}: {err}", self.path.display()),
        }
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn write_pid(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, std::process::id().to_string())
}
