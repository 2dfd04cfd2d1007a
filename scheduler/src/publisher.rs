use std::{
    io::Write,
    path::{Path, PathBuf},
};

use tempfile::NamedTempFile;

use kiosk_common::{system, DesiredStatus, SnapshotError, StatusSnapshot};

/// Writes the externally readable status snapshot. Each write replaces the
/// whole file atomically through a sibling temp file.
pub struct SnapshotPublisher {
    path: PathBuf,
    device_id: String,
}

impl SnapshotPublisher {
    pub fn new(path: impl Into<PathBuf>, device_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            device_id: device_id.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn publish(&self, status: DesiredStatus) -> Result<StatusSnapshot, SnapshotError> {
        let snapshot = StatusSnapshot {
            device_id: self.device_id.clone(),
            status,
            timestamp: system::local_timestamp(),
            uptime: system::uptime_seconds(),
        };
        self.write(&snapshot)?;
        Ok(snapshot)
    }

    fn write(&self, snapshot: &StatusSnapshot) -> Result<(), SnapshotError> {
        let dir = match self.path.parent() {
            Some(dir) if dir.as_os_str().is_empty() => Path::new("."),
            Some(dir) => dir,
            None => return Err(SnapshotError::NoParent(self.path.clone())),
        };
        let io_error = |source| SnapshotError::Io {
            path: self.path.clone(),
            source,
        };

        let payload = serde_json::to_vec_pretty(snapshot)?;

        let mut staged = NamedTempFile::new_in(dir).map_err(io_error)?;
        staged.write_all(&payload).map_err(io_error)?;
        staged.as_file().sync_all().map_err(io_error)?;

        // Observers run under other users; the temp file starts out 0600.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            staged
                .as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o644))
                .map_err(io_error)?;
        }

        staged
            .persist(&self.path)
            .map_err(|err| io_error(err.error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn read(path: &Path) -> StatusSnapshot {
        serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
    }

    #[test]
    fn writes_snapshot_with_applied_status() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = SnapshotPublisher::new(dir.path().join("display_status"), "12");

        let written = publisher.publish(DesiredStatus::Active).unwrap();
        let on_disk = read(publisher.path());

        assert_eq!(on_disk, written);
        assert_eq!(on_disk.device_id, "12");
        assert_eq!(on_disk.status, DesiredStatus::Active);
        assert!(chrono::DateTime::parse_from_rfc3339(&on_disk.timestamp).is_ok());
    }

    #[test]
    fn overwrites_previous_snapshot_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = SnapshotPublisher::new(dir.path().join("display_status"), "12");

        publisher.publish(DesiredStatus::Active).unwrap();
        publisher.publish(DesiredStatus::TurnedOff).unwrap();

        assert_eq!(read(publisher.path()).status, DesiredStatus::TurnedOff);
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn uptime_is_a_json_integer() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = SnapshotPublisher::new(dir.path().join("display_status"), "3");
        publisher.publish(DesiredStatus::TurnedOff).unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(publisher.path()).unwrap()).unwrap();
        assert!(raw["uptime"].is_u64());
        assert_eq!(raw["status"], "TURNED_OFF");
    }

    #[test]
    fn missing_directory_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = SnapshotPublisher::new(dir.path().join("absent/display_status"), "3");

        let err = publisher.publish(DesiredStatus::Active).unwrap_err();
        assert!(matches!(err, SnapshotError::Io { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn snapshot_is_world_readable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let publisher = SnapshotPublisher::new(dir.path().join("display_status"), "3");
        publisher.publish(DesiredStatus::Active).unwrap();

        let mode = std::fs::metadata(publisher.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }
}
