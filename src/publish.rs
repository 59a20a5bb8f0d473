//! Delivery of the rendered report.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

pub trait ReportSink {
    fn publish(&self, message: &str) -> Result<()>;

    fn describe(&self) -> String;
}

pub struct StdoutSink;

impl ReportSink for StdoutSink {
    fn publish(&self, message: &str) -> Result<()> {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", message)?;
        stdout.flush()?;
        Ok(())
    }

    fn describe(&self) -> String {
        "stdout".to_string()
    }
}

/// Appends each report to a file, separated by a rule line.
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ReportSink for FileSink {
    fn publish(&self, message: &str) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;

        let empty = file.metadata().map(|m| m.len() == 0).unwrap_or(true);
        if !empty {
            writeln!(file, "\n---\n")?;
        }
        writeln!(file, "{}", message)?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

pub fn create_sink(output: Option<&Path>) -> Box<dyn ReportSink> {
    match output {
        Some(path) => Box::new(FileSink::new(path)),
        None => Box::new(StdoutSink),
    }
}

/// Publish, logging rather than returning a failure. Returns whether it worked.
pub fn publish_report(sink: &dyn ReportSink, message: &str) -> bool {
    match sink.publish(message) {
        Ok(()) => {
            tracing::info!("Report published to {}", sink.describe());
            true
        }
        Err(e) => {
            tracing::error!("Failed to publish report to {}: {:#}", sink.describe(), e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_file_sink_appends() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reports/weekly.md");
        let sink = FileSink::new(&path);

        assert!(publish_report(&sink, "first"));
        assert!(publish_report(&sink, "second"));

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("first\n"));
        assert!(content.contains("\n---\n"));
        assert!(content.trim_end().ends_with("second"));
    }

    #[test]
    fn test_publish_failure_is_reported_not_raised() {
        let dir = tempdir().unwrap();
        // A directory cannot be opened for appending
        let sink = FileSink::new(dir.path());
        assert!(!publish_report(&sink, "report"));
    }

    #[test]
    fn test_create_sink_picks_destination() {
        assert_eq!(create_sink(None).describe(), "stdout");
        let path = Path::new("/tmp/report.md");
        assert_eq!(create_sink(Some(path)).describe(), "/tmp/report.md");
    }
}
