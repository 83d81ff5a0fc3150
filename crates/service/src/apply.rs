use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{bail, Context, Result};
use mritool_core::{FileOperation, Plan};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    #[default]
    Copy,
    Move,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub files: usize,
    pub bytes: u64,
}

pub fn apply_plan(plan: &Plan, mode: TransferMode) -> Result<ApplyReport> {
    let mut report = ApplyReport::default();
    for operation in &plan.operations {
        report.bytes += apply_operation(operation, mode)?;
        report.files += 1;
    }
    debug!(
        "applied {} operation(s), {} byte(s), mode {:?}",
        report.files, report.bytes, mode
    );
    Ok(report)
}

pub fn apply_operation(operation: &FileOperation, mode: TransferMode) -> Result<u64> {
    let FileOperation {
        source,
        destination,
    } = operation;

    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let bytes = fs::copy(source, destination).with_context(|| {
        format!(
            "failed to copy {} to {}",
            source.display(),
            destination.display()
        )
    })?;
    trace!("{} -> {}", source.display(), destination.display());

    if mode == TransferMode::Move {
        let expected = hash_file(source)?;
        let actual = hash_file(destination)?;
        if expected != actual {
            bail!(
                "copy of {} at {} failed verification; source kept",
                source.display(),
                destination.display()
            );
        }
        fs::remove_file(source)
            .with_context(|| format!("failed to remove {}", source.display()))?;
    }

    Ok(bytes)
}

fn hash_file(path: &Path) -> Result<String> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut hasher = blake3::Hasher::new();
    let mut buffer = [0_u8; 64 * 1024];

    loop {
        let bytes_read = reader
            .read(&mut buffer)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use mritool_core::{FileOperation, Plan};

    use super::{apply_plan, TransferMode};

    #[test]
    fn copies_into_new_folders_and_overwrites() {
        let temp = tempfile::tempdir().expect("tempdir");
        let source = temp.path().join("a.dcm");
        let destination = temp.path().join("exam/Ex00001_Se00001_T1/Ex00001Se00001Im00001.dcm");
        fs::write(&source, b"new").expect("write");
        fs::create_dir_all(destination.parent().expect("parent")).expect("mkdir");
        fs::write(&destination, b"stale contents").expect("write");

        let plan = Plan {
            operations: vec![FileOperation::new(&source, &destination)],
            warnings: Vec::new(),
        };
        let report = apply_plan(&plan, TransferMode::Copy).expect("apply");
        assert_eq!(report.files, 1);
        assert_eq!(report.bytes, 3);
        assert_eq!(fs::read(&destination).expect("read"), b"new");
        assert!(source.exists());
    }

    #[test]
    fn move_removes_source_after_copy() {
        let temp = tempfile::tempdir().expect("tempdir");
        let source = temp.path().join("P00512.7");
        let destination = temp.path().join("series/Ex02711_Se00007_P00512.7");
        fs::write(&source, vec![7_u8; 200_000]).expect("write");

        let plan = Plan {
            operations: vec![FileOperation::new(&source, &destination)],
            warnings: Vec::new(),
        };
        apply_plan(&plan, TransferMode::Move).expect("apply");
        assert!(!source.exists());
        assert_eq!(fs::read(&destination).expect("read").len(), 200_000);
    }

    #[test]
    fn missing_source_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let plan = Plan {
            operations: vec![FileOperation::new(
                temp.path().join("absent"),
                temp.path().join("out/absent"),
            )],
            warnings: Vec::new(),
        };
        assert!(apply_plan(&plan, TransferMode::Copy).is_err());
    }
}
