use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub const LEDGER_FILE_NAME: &str = "exams.txt";

#[derive(Debug, Clone)]
pub struct ProcessedLog {
    path: PathBuf,
    exams: BTreeSet<String>,
}

impl ProcessedLog {
    pub fn open(log_dir: &Path) -> Result<Self> {
        let path = log_dir.join(LEDGER_FILE_NAME);
        let exams = if path.exists() {
            fs::read_to_string(&path)
                .with_context(|| format!("failed to read exam log {}", path.display()))?
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect()
        } else {
            BTreeSet::new()
        };
        Ok(Self { path, exams })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, exam_id: &str) -> bool {
        self.exams.contains(exam_id.trim())
    }

    pub fn len(&self) -> usize {
        self.exams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exams.is_empty()
    }

    pub fn record(&mut self, exam_id: &str) -> Result<()> {
        let exam_id = exam_id.trim();
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open exam log {}", self.path.display()))?;
        writeln!(file, "{exam_id}")
            .with_context(|| format!("failed to append to {}", self.path.display()))?;
        self.exams.insert(exam_id.to_string());
        Ok(())
    }
}
