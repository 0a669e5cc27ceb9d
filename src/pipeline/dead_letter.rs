//! Dead-letter spill for burst batches that could not be persisted
//!
//! One JSON object per line, appended. Records keep their original ids so a
//! later manual replay into `timestamps` stays idempotent.

use super::types::BurstRecord;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub struct DeadLetterWriter {
    path: PathBuf,
}

impl DeadLetterWriter {
    pub fn new(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        log::info!("📝 Dead-letter spill file: {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append every record as one JSONL line
    pub fn spill(&self, records: &[BurstRecord]) -> std::io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);

        for record in records {
            let json = serde_json::to_string(record)?;
            writeln!(writer, "{}", json)?;
        }

        writer.flush()
    }
}
