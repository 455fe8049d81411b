//! Rotating JSON Lines file for audit entries

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::FileStorageConfig;

use super::types::AuditEntry;

const FILE_NAME: &str = "audit.jsonl";

/// Append-only audit file with size-based rotation
/// (`audit.jsonl` -> `audit.jsonl.1` ... `audit.jsonl.N`).
#[derive(Debug)]
pub struct RotatingFileSink {
    log_path: PathBuf,
    max_file_size: u64,
    backup_count: usize,
}

impl RotatingFileSink {
    /// Opens the sink under `config.path`, creating the directory.
    pub fn open(config: &FileStorageConfig) -> io::Result<Self> {
        fs::create_dir_all(&config.path)?;
        Ok(Self {
            log_path: config.path.join(FILE_NAME),
            max_file_size: config.max_file_size,
            backup_count: config.backup_count,
        })
    }

    pub fn path(&self) -> &Path {
        &self.log_path
    }

    /// Writes one entry as a JSON line, rotating first if the line would
    /// push the file past its size limit.
    pub fn append(&mut self, entry: &AuditEntry) -> io::Result<()> {
        let json = serde_json::to_string(entry)?;
        let incoming = json.len() as u64 + 1;

        let current = fs::metadata(&self.log_path).map(|m| m.len()).unwrap_or(0);
        if current > 0 && current + incoming > self.max_file_size {
            self.rotate()?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{}", json)?;
        writer.flush()
    }

    fn backup_path(&self, index: usize) -> PathBuf {
        let mut name = self.log_path.as_os_str().to_owned();
        name.push(format!(".{index}"));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> io::Result<()> {
        if self.backup_count == 0 {
            File::create(&self.log_path)?;
            info!("Truncated audit log {}", self.log_path.display());
            return Ok(());
        }

        let oldest = self.backup_path(self.backup_count);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for index in (1..self.backup_count).rev() {
            let from = self.backup_path(index);
            if from.exists() {
                fs::rename(&from, self.backup_path(index + 1))?;
            }
        }
        fs::rename(&self.log_path, self.backup_path(1))?;
        info!("Rotated audit log {}", self.log_path.display());
        Ok(())
    }

    /// Reads back the newest `limit` entries of the current file, skipping
    /// lines that do not parse.
    pub fn load_recent(&self, limit: usize) -> io::Result<Vec<AuditEntry>> {
        if !self.log_path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(&self.log_path)?);
        let mut entries: Vec<AuditEntry> = reader
            .lines()
            .map_while(Result::ok)
            .filter_map(|line| serde_json::from_str(&line).ok())
            .collect();
        if entries.len() > limit {
            entries.drain(..entries.len() - limit);
        }
        debug!("Loaded {} audit entries from {}", entries.len(), self.log_path.display());
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::types::{AuditStatus, StatementKind};

    fn entry(n: u64) -> AuditEntry {
        AuditEntry {
            timestamp: format!("2026-01-01T00:00:{:02}.000000Z", n % 60),
            connection_name: "local".into(),
            table_name: "USERS".into(),
            operation: StatementKind::Insert,
            sql: "INSERT INTO users VALUES (?)".into(),
            affected_rows: n,
            status: AuditStatus::Success,
            execution_time_ms: 1.0,
            error_message: None,
            user_context: None,
        }
    }

    fn config(dir: &Path, max_file_size: u64, backup_count: usize) -> FileStorageConfig {
        FileStorageConfig {
            enabled: true,
            path: dir.to_path_buf(),
            max_file_size,
            backup_count,
        }
    }

    #[test]
    fn test_append_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = RotatingFileSink::open(&config(dir.path(), 1 << 20, 3)).unwrap();
        for n in 0..5 {
            sink.append(&entry(n)).unwrap();
        }
        let loaded = sink.load_recent(3).unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[0].affected_rows, 2);
        assert_eq!(loaded[2].affected_rows, 4);
    }

    #[test]
    fn test_rotation_keeps_backup_count() {
        let dir = tempfile::tempdir().unwrap();
        let line_len = serde_json::to_string(&entry(0)).unwrap().len() as u64 + 1;
        let mut sink = RotatingFileSink::open(&config(dir.path(), line_len * 2, 2)).unwrap();
        for n in 0..10 {
            sink.append(&entry(n)).unwrap();
        }

        assert!(sink.path().exists());
        assert!(dir.path().join("audit.jsonl.1").exists());
        assert!(dir.path().join("audit.jsonl.2").exists());
        assert!(!dir.path().join("audit.jsonl.3").exists());

        let current = sink.load_recent(usize::MAX).unwrap();
        assert_eq!(current.last().unwrap().affected_rows, 9);
        assert!(current.len() <= 2);
    }

    #[test]
    fn test_skips_corrupt_lines() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = RotatingFileSink::open(&config(dir.path(), 1 << 20, 1)).unwrap();
        sink.append(&entry(1)).unwrap();
        fs::write(
            sink.path(),
            format!("not json\n{}\n", serde_json::to_string(&entry(2)).unwrap()),
        )
        .unwrap();
        let loaded = sink.load_recent(10).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].affected_rows, 2);
    }
}
