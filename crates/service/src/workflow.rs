use std::fs::{self, Permissions};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{SecondsFormat, Utc};
use mritool_core::{
    check_auxiliary_files, check_exam, find_staged_exam, is_service_exam, output_dir_for,
    plan_auxiliary_files, plan_sort, Decoders, Discrepancy, ExamMetadata, OutputDirs,
    ReconcileOptions,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::apply::{apply_plan, TransferMode};
use crate::ledger::ProcessedLog;
use crate::scanner::{ScannerQuery, ScannerService};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub inprocess_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub tech_dir: PathBuf,
    pub dailyqc_dir: PathBuf,
    pub pfile_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl Workspace {
    pub fn output_dirs(&self) -> OutputDirs {
        OutputDirs {
            inprocess: self.inprocess_dir.clone(),
            tech: self.tech_dir.clone(),
            dailyqc: self.dailyqc_dir.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub exam_id: String,
    #[serde(default)]
    pub series_number: Option<String>,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default)]
    pub bare: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullSummary {
    pub exam_id: String,
    pub exam_dir: PathBuf,
    pub images: usize,
    pub auxiliary_files: usize,
    pub warnings: Vec<String>,
    pub discrepancies: Vec<Discrepancy>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PullOutcome {
    ExamNotFound {
        exam_id: String,
    },
    SeriesNotFound {
        exam_id: String,
        series_number: String,
    },
    Pulled(PullSummary),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckReport {
    pub exam_id: String,
    pub exam_dir: PathBuf,
    pub discrepancies: Vec<Discrepancy>,
}

impl CheckReport {
    pub fn is_clean(&self) -> bool {
        self.discrepancies.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CompleteOutcome {
    Archived {
        destination: PathBuf,
        discrepancies: Vec<Discrepancy>,
    },
    DestinationExists {
        destination: PathBuf,
    },
    Refused {
        discrepancies: Vec<Discrepancy>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFailure {
    pub exam_id: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub run_id: String,
    pub started_at: String,
    pub pulled: Vec<String>,
    pub already_pulled: Vec<String>,
    pub service_exams: Vec<String>,
    pub not_pulled: Vec<String>,
    pub failed: Vec<SyncFailure>,
}

#[derive(Clone, Copy)]
pub struct Workflow<'a> {
    pub workspace: &'a Workspace,
    pub scanner: &'a dyn ScannerService,
    pub decoders: Decoders<'a>,
    pub options: &'a ReconcileOptions,
}

impl Workflow<'_> {
    pub fn pull_exam(&self, request: &PullRequest) -> Result<PullOutcome> {
        let exam_id = request.exam_id.trim();
        let exams = self.scanner.exams(&ScannerQuery::exam(exam_id, None))?;
        let Some(exam) = exams.into_iter().next() else {
            warn!("Exam {} not found on the scanner. Skipping.", exam_id);
            return Ok(PullOutcome::ExamNotFound {
                exam_id: exam_id.to_string(),
            });
        };
        self.pull_found_exam(&exam, request)
    }

    fn pull_found_exam(&self, exam: &ExamMetadata, request: &PullRequest) -> Result<PullOutcome> {
        let exam_id = request.exam_id.trim();
        let output_dir = match &request.output_dir {
            Some(dir) => dir.clone(),
            None => output_dir_for(&self.workspace.output_dirs(), exam).to_path_buf(),
        };
        debug!("Using {} output folder for exam {}.", output_dir.display(), exam_id);
        ensure_writable(&output_dir)?;

        let query = ScannerQuery::exam(exam_id, request.series_number.as_deref());
        if let Some(series_number) = &request.series_number {
            if self.scanner.find(&query)?.is_empty() {
                warn!(
                    "Exam {}, series {} not found on the scanner. Skipping.",
                    exam_id, series_number
                );
                return Ok(PullOutcome::SeriesNotFound {
                    exam_id: exam_id.to_string(),
                    series_number: series_number.clone(),
                });
            }
            info!(
                "Pulling exam {}, series {} to {}",
                exam_id,
                series_number,
                output_dir.display()
            );
        } else {
            info!("Pulling exam {} to {}", exam_id, output_dir.display());
        }

        let staging = tempfile::tempdir().context("failed to create DICOM staging folder")?;
        self.scanner
            .transfer(&query, staging.path())
            .with_context(|| format!("DICOM transfer failed for exam {exam_id}"))?;

        let exam_dir = output_dir.join(self.options.naming.exam_name(exam));
        fs::create_dir_all(&exam_dir)
            .with_context(|| format!("failed to create {}", exam_dir.display()))?;

        debug!(
            "Sorting dicoms from {} into {}",
            staging.path().display(),
            exam_dir.display()
        );
        let sort_plan = plan_sort(self.decoders.dicom, staging.path(), &exam_dir, self.options);
        let sorted = apply_plan(&sort_plan, TransferMode::Copy)?;
        let mut warnings = sort_plan.warnings;

        let mut auxiliary_files = 0;
        let mut discrepancies = Vec::new();
        if !request.bare {
            debug!("Searching for pfiles matching this exam...");
            let match_plan = plan_auxiliary_files(
                self.decoders.pfile,
                &self.workspace.pfile_dir,
                &exam_dir,
                exam_id,
                self.options,
            );
            auxiliary_files = apply_plan(&match_plan, TransferMode::Copy)?.files;
            warnings.extend(match_plan.warnings);

            debug!("Checking whether all pfiles have been found...");
            discrepancies = check_auxiliary_files(self.decoders, &exam_dir, self.options);
        }

        Ok(PullOutcome::Pulled(PullSummary {
            exam_id: exam_id.to_string(),
            exam_dir,
            images: sorted.files,
            auxiliary_files,
            warnings,
            discrepancies,
        }))
    }

    pub fn check_inprocess(&self, exam_id: &str) -> Result<CheckReport> {
        let exam_id = exam_id.trim();
        let exam_dir = self.locate_inprocess(exam_id)?;

        let series = match self.scanner.series(exam_id) {
            Ok(series) => Some(series),
            Err(err) => {
                warn!("failed to query series of exam {}: {:#}", exam_id, err);
                None
            }
        };
        let discrepancies = check_exam(
            self.decoders,
            &exam_dir,
            exam_id,
            series.as_deref(),
            self.options,
        );

        Ok(CheckReport {
            exam_id: exam_id.to_string(),
            exam_dir,
            discrepancies,
        })
    }

    /// Moves a checked exam into the processed folder and makes it read-only.
    /// Discrepancies or an existing destination stop the move unless forced.
    pub fn complete_exam(&self, exam_id: &str, force: bool) -> Result<CompleteOutcome> {
        let processed_dir = &self.workspace.processed_dir;
        ensure_writable(processed_dir)?;

        let report = self.check_inprocess(exam_id)?;
        let folder_name = report
            .exam_dir
            .file_name()
            .ok_or_else(|| anyhow!("{} has no folder name", report.exam_dir.display()))?;
        let destination = processed_dir.join(folder_name);

        if destination.exists() {
            if !force {
                warn!("{} folder already exists. Skipping.", destination.display());
                return Ok(CompleteOutcome::DestinationExists { destination });
            }
            warn!("replacing existing {}", destination.display());
            set_tree_read_only(&destination, false)?;
            fs::remove_dir_all(&destination)
                .with_context(|| format!("failed to remove {}", destination.display()))?;
        }

        if !report.is_clean() && !force {
            warn!(
                "Not packaging exam {} because of warnings. Use --force to do it anyway",
                report.exam_id
            );
            return Ok(CompleteOutcome::Refused {
                discrepancies: report.discrepancies,
            });
        }

        info!("Moving exam {} to {}", report.exam_id, destination.display());
        move_dir(&report.exam_dir, &destination)?;

        debug!("Setting read-only permissions on {}", destination.display());
        set_tree_read_only(&destination, true).with_context(|| {
            format!(
                "error setting read-only permissions on completed exam {}",
                destination.display()
            )
        })?;

        Ok(CompleteOutcome::Archived {
            destination,
            discrepancies: report.discrepancies,
        })
    }

    pub fn sync_exams(&self) -> Result<SyncReport> {
        let mut log = ProcessedLog::open(&self.workspace.log_dir)?;
        let exams = self.scanner.exams(&ScannerQuery::AllExams)?;

        let mut report = SyncReport {
            run_id: Uuid::new_v4().to_string(),
            started_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            pulled: Vec::new(),
            already_pulled: Vec::new(),
            service_exams: Vec::new(),
            not_pulled: Vec::new(),
            failed: Vec::new(),
        };
        info!("Starting sync {} at {}", report.run_id, report.started_at);

        for exam in exams {
            let Some(exam_id) = exam.exam_id.clone() else {
                continue;
            };
            if log.contains(&exam_id) {
                report.already_pulled.push(exam_id);
                continue;
            }
            if is_service_exam(&exam_id) {
                debug!("skipping service exam {}", exam_id);
                report.service_exams.push(exam_id);
                continue;
            }

            let request = PullRequest {
                exam_id: exam_id.clone(),
                ..PullRequest::default()
            };
            let pulled = self
                .pull_found_exam(&exam, &request)
                .and_then(|outcome| match outcome {
                    PullOutcome::Pulled(_) => log.record(&exam_id).map(|()| true),
                    _ => Ok(false),
                });
            match pulled {
                Ok(true) => report.pulled.push(exam_id),
                Ok(false) => report.not_pulled.push(exam_id),
                Err(err) => {
                    warn!("failed to pull exam {}: {:#}", exam_id, err);
                    report.failed.push(SyncFailure {
                        exam_id,
                        error: format!("{err:#}"),
                    });
                }
            }
        }

        info!(
            "Sync {} finished: {} pulled, {} failed",
            report.run_id,
            report.pulled.len(),
            report.failed.len()
        );
        Ok(report)
    }

    fn locate_inprocess(&self, exam_id: &str) -> Result<PathBuf> {
        let inprocess_dir = &self.workspace.inprocess_dir;
        find_staged_exam(self.decoders.dicom, inprocess_dir, exam_id).ok_or_else(|| {
            anyhow!(
                "Unable to find exam {} in the inprocess dir {}",
                exam_id,
                inprocess_dir.display()
            )
        })
    }
}

fn ensure_writable(dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        bail!("Output folder {} does not exist or is not a folder", dir.display());
    }
    tempfile::Builder::new()
        .prefix(".mritool-probe")
        .tempfile_in(dir)
        .map(drop)
        .with_context(|| format!("No write access to output folder {}", dir.display()))
}

fn move_dir(source: &Path, destination: &Path) -> Result<()> {
    if fs::rename(source, destination).is_ok() {
        return Ok(());
    }

    // different filesystem: copy the tree, then drop the original
    for entry in WalkDir::new(source) {
        let entry = entry.with_context(|| format!("failed to walk {}", source.display()))?;
        let relative = entry.path().strip_prefix(source)?;
        let target = destination.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("failed to create {}", target.display()))?;
        } else {
            fs::copy(entry.path(), &target).with_context(|| {
                format!("failed to copy {} to {}", entry.path().display(), target.display())
            })?;
        }
    }
    fs::remove_dir_all(source).with_context(|| format!("failed to remove {}", source.display()))
}

pub(crate) fn set_tree_read_only(root: &Path, read_only: bool) -> Result<()> {
    for entry in WalkDir::new(root) {
        let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
        let mut permissions = entry
            .metadata()
            .with_context(|| format!("failed to stat {}", entry.path().display()))?
            .permissions();
        set_write_bits(&mut permissions, read_only);
        fs::set_permissions(entry.path(), permissions)
            .with_context(|| format!("failed to chmod {}", entry.path().display()))?;
    }
    Ok(())
}

#[cfg(unix)]
fn set_write_bits(permissions: &mut Permissions, read_only: bool) {
    use std::os::unix::fs::PermissionsExt;

    let mode = permissions.mode();
    permissions.set_mode(if read_only { mode & !0o222 } else { mode | 0o200 });
}

#[cfg(not(unix))]
fn set_write_bits(permissions: &mut Permissions, read_only: bool) {
    permissions.set_readonly(read_only);
}
