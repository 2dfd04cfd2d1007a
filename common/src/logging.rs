use std::path::Path;

use tracing::warn;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt::writer::MakeWriterExt, EnvFilter};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Installs the global subscriber: one line per event (timestamp, level,
/// message) on stdout and appended to `log_file`. `RUST_LOG` overrides the
/// default `info` filter.
pub fn init(log_file: &Path) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match file_appender(log_file) {
        Ok(file) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(std::io::stdout.and(file))
                .init();
        }
        Err(err) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .init();
            warn!(
                "logging to stdout only, cannot open {}: {err}",
                log_file.display()
            );
        }
    }
}

fn file_appender(log_file: &Path) -> Result<RollingFileAppender, BoxError> {
    let name = log_file
        .file_name()
        .ok_or_else(|| format!("{} is not a file path", log_file.display()))?
        .to_string_lossy()
        .into_owned();
    let dir = log_file
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    std::fs::create_dir_all(dir)?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(name)
        .build(dir)?;
    Ok(appender)
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use std::{
        io,
        sync::{Arc, Mutex},
    };

    use tracing::subscriber::DefaultGuard;
    use tracing_subscriber::fmt::MakeWriter;

    /// Collects formatted events from the current thread. Keep the guard
    /// alive for as long as events should be captured.
    #[derive(Clone, Default)]
    pub struct CapturedLogs {
        buffer: Arc<Mutex<Vec<u8>>>,
    }

    impl CapturedLogs {
        pub fn install() -> (Self, DefaultGuard) {
            let logs = Self::default();
            let subscriber = tracing_subscriber::fmt()
                .with_writer(logs.clone())
                .with_ansi(false)
                .with_target(false)
                .with_max_level(tracing::Level::DEBUG)
                .finish();
            let guard = tracing::subscriber::set_default(subscriber);
            (logs, guard)
        }

        pub fn lines(&self) -> Vec<String> {
            let buffer = self.buffer.lock().unwrap();
            String::from_utf8_lossy(&buffer)
                .lines()
                .map(str::to_string)
                .collect()
        }

        pub fn warnings(&self) -> Vec<String> {
            self.lines()
                .into_iter()
                .filter(|line| line.contains(" WARN "))
                .collect()
        }

        pub fn has_warning(&self, fragment: &str) -> bool {
            self.warnings().iter().any(|line| line.contains(fragment))
        }
    }

    pub struct CapturedWriter {
        buffer: Arc<Mutex<Vec<u8>>>,
    }

    impl io::Write for CapturedWriter {
        fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
            self.buffer.lock().unwrap().extend_from_slice(bytes);
            Ok(bytes.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for CapturedLogs {
        type Writer = CapturedWriter;

        fn make_writer(&'a self) -> Self::Writer {
            CapturedWriter {
                buffer: self.buffer.clone(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appender_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/kiosk-agent.log");

        file_appender(&path).unwrap();

        assert!(path.parent().unwrap().is_dir());
    }

    #[test]
    fn captures_warnings_only_while_installed() {
        let (logs, guard) = testing::CapturedLogs::install();
        tracing::info!("routine");
        warn!("display power failed");
        drop(guard);
        warn!("after the guard");

        assert_eq!(logs.warnings().len(), 1);
        assert!(logs.has_warning("display power failed"));
        assert!(!logs.has_warning("routine"));
    }

    #[test]
    fn appender_rejects_directory_paths() {
        assert!(file_appender(Path::new("/")).is_err());
    }
}
