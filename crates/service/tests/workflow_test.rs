use std::fs;
use std::path::{Path, PathBuf};

use mritool_core::{keys, DecodeError, Decoders, Discrepancy, HeaderDecoder, Headers, ReconcileOptions};
use mritool_service::{
    CompleteOutcome, PullOutcome, PullRequest, ScannerService, SpoolScanner, Workflow, Workspace,
};
use tempfile::TempDir;

/// Files hold their own headers as JSON; `required` tells DICOM and pfile
/// fixtures apart.
struct JsonDecoder {
    required: &'static str,
}

impl HeaderDecoder for JsonDecoder {
    fn decode(&self, path: &Path) -> Result<Headers, DecodeError> {
        let unsupported = |reason: String| DecodeError::Unsupported {
            path: path.to_path_buf(),
            reason,
        };
        let data = fs::read(path).map_err(|err| unsupported(err.to_string()))?;
        let headers: Headers =
            serde_json::from_slice(&data).map_err(|err| unsupported(err.to_string()))?;
        if !headers.contains(self.required) {
            return Err(unsupported(format!("missing {}", self.required)));
        }
        Ok(headers)
    }
}

const DICOM: JsonDecoder = JsonDecoder {
    required: keys::STUDY_ID,
};
const PFILE: JsonDecoder = JsonDecoder {
    required: keys::PFILE_EXAM_NUMBER,
};

struct Fixture {
    _temp: TempDir,
    spool: PathBuf,
    workspace: Workspace,
    options: ReconcileOptions,
}

fn write_headers(path: &Path, headers: &Headers) {
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    fs::write(path, serde_json::to_vec(headers).expect("json")).expect("write");
}

fn dicom(exam: &str, description: &str, series: &str, series_description: &str, instance: &str) -> Headers {
    Headers::new()
        .with(keys::STUDY_ID, exam)
        .with(keys::STUDY_DATE, "20240102")
        .with(keys::STUDY_DESCRIPTION, description)
        .with(keys::PATIENT_ID, "SPN01_CMH_0001")
        .with(keys::SERIES_NUMBER, series)
        .with(keys::SERIES_DESCRIPTION, series_description)
        .with(keys::INSTANCE_NUMBER, instance)
}

fn fixture() -> Fixture {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().to_path_buf();
    let spool = root.join("scanner");

    for instance in ["1", "2", "3"] {
        write_headers(
            &spool.join(format!("e2711/s6/{instance}.dcm")),
            &dicom("2711", "SPN01 MR", "6", "AX FSPGR", instance)
                .with(keys::IMAGES_IN_ACQUISITION, "3"),
        );
    }
    write_headers(
        &spool.join("e2711/s7/1.dcm"),
        &dicom("2711", "SPN01 MR", "7", "MRS PRESS", "1")
            .with(keys::IMAGES_IN_ACQUISITION, "1")
            .with(keys::PULSE_SEQUENCE_NAME, "presscsi")
            .with(keys::RAW_DATA_RUN_NUMBER, "P00512.7"),
    );
    write_headers(
        &spool.join("e2712/s1/1.dcm"),
        &dicom("2712", "SPN02 MR", "1", "Localizer", "1"),
    );
    write_headers(
        &spool.join("e955/s1/1.dcm"),
        &dicom("955", "DailyQC", "1", "QC", "1"),
    );
    write_headers(
        &spool.join("e60001/s1/1.dcm"),
        &dicom("60001", "Service", "1", "Cal", "1"),
    );

    let workspace = Workspace {
        inprocess_dir: root.join("output/inprocess"),
        processed_dir: root.join("output/processed"),
        tech_dir: root.join("output/tech"),
        dailyqc_dir: root.join("output/DailyQC"),
        pfile_dir: root.join("pfiles"),
        log_dir: root.join("output/logs"),
    };
    for dir in [
        &workspace.inprocess_dir,
        &workspace.processed_dir,
        &workspace.tech_dir,
        &workspace.dailyqc_dir,
    ] {
        fs::create_dir_all(dir).expect("mkdir");
    }
    write_headers(
        &workspace.pfile_dir.join("Pfiles_2711/P00512.7"),
        &Headers::new()
            .with(keys::PFILE_EXAM_NUMBER, "2711")
            .with(keys::PFILE_SERIES_NUMBER, "7")
            .with(keys::PFILE_SERIES_DESCRIPTION, "MRS Spectroscopy"),
    );

    Fixture {
        _temp: temp,
        spool,
        workspace,
        options: ReconcileOptions::default(),
    }
}

fn workflow<'a>(fixture: &'a Fixture, scanner: &'a dyn ScannerService) -> Workflow<'a> {
    Workflow {
        workspace: &fixture.workspace,
        scanner,
        decoders: Decoders {
            dicom: &DICOM,
            pfile: &PFILE,
        },
        options: &fixture.options,
    }
}

fn scanner(fixture: &Fixture) -> SpoolScanner {
    SpoolScanner::new(&fixture.spool, Box::new(JsonDecoder { required: keys::STUDY_ID }))
}

fn pull(workflow: &Workflow<'_>, exam_id: &str) -> PullOutcome {
    workflow
        .pull_exam(&PullRequest {
            exam_id: exam_id.to_string(),
            ..PullRequest::default()
        })
        .expect("pull")
}

#[test]
fn pull_sorts_exam_and_brings_in_pfiles() {
    let fixture = fixture();
    let scanner = scanner(&fixture);
    let workflow = workflow(&fixture, &scanner);

    let PullOutcome::Pulled(summary) = pull(&workflow, "2711") else {
        panic!("exam should be pulled");
    };
    assert_eq!(
        summary.exam_dir,
        fixture
            .workspace
            .inprocess_dir
            .join("20240102_Ex02711_SPN01-MR_SPN01-CMH-0001")
    );
    assert_eq!(summary.images, 4);
    assert_eq!(summary.auxiliary_files, 1);
    assert!(summary.warnings.is_empty());
    assert!(summary.discrepancies.is_empty());
    assert!(summary
        .exam_dir
        .join("Ex02711_Se00007_MRS-PRESS/Ex02711_Se00007_P00512.7")
        .is_file());
}

#[test]
fn pull_reports_unknown_exam_and_series() {
    let fixture = fixture();
    let scanner = scanner(&fixture);
    let workflow = workflow(&fixture, &scanner);

    assert!(matches!(
        pull(&workflow, "9999"),
        PullOutcome::ExamNotFound { .. }
    ));
    let outcome = workflow
        .pull_exam(&PullRequest {
            exam_id: "2711".to_string(),
            series_number: Some("42".to_string()),
            ..PullRequest::default()
        })
        .expect("pull");
    assert!(matches!(outcome, PullOutcome::SeriesNotFound { .. }));
}

#[test]
fn bare_single_series_pull_skips_pfiles() {
    let fixture = fixture();
    let scanner = scanner(&fixture);
    let workflow = workflow(&fixture, &scanner);
    let output = fixture.workspace.inprocess_dir.parent().expect("parent").join("custom");
    fs::create_dir_all(&output).expect("mkdir");

    let outcome = workflow
        .pull_exam(&PullRequest {
            exam_id: "2711".to_string(),
            series_number: Some("7".to_string()),
            output_dir: Some(output.clone()),
            bare: true,
        })
        .expect("pull");
    let PullOutcome::Pulled(summary) = outcome else {
        panic!("series should be pulled");
    };
    assert!(summary.exam_dir.starts_with(&output));
    assert_eq!(summary.images, 1);
    assert_eq!(summary.auxiliary_files, 0);
}

#[test]
fn check_detects_missing_images_after_pull() {
    let fixture = fixture();
    let scanner = scanner(&fixture);
    let workflow = workflow(&fixture, &scanner);
    let PullOutcome::Pulled(summary) = pull(&workflow, "2711") else {
        panic!("exam should be pulled");
    };

    assert!(workflow.check_inprocess("2711").expect("check").is_clean());

    fs::remove_file(
        summary
            .exam_dir
            .join("Ex02711_Se00006_AX-FSPGR/Ex02711Se00006Im00002.dcm"),
    )
    .expect("remove");
    let report = workflow.check_inprocess("2711").expect("check");
    assert_eq!(report.discrepancies.len(), 1);
    assert!(matches!(
        report.discrepancies[0],
        Discrepancy::ImageCountMismatch {
            found: 2,
            expected: 3,
            ..
        }
    ));

    assert!(workflow.check_inprocess("4242").is_err());
}

#[test]
fn complete_archives_clean_exam_read_only() {
    let fixture = fixture();
    let scanner = scanner(&fixture);
    let workflow = workflow(&fixture, &scanner);
    let PullOutcome::Pulled(summary) = pull(&workflow, "2711") else {
        panic!("exam should be pulled");
    };

    let outcome = workflow.complete_exam("2711", false).expect("complete");
    let CompleteOutcome::Archived { destination, .. } = outcome else {
        panic!("exam should be archived");
    };
    assert!(!summary.exam_dir.exists());
    let image = destination.join("Ex02711_Se00006_AX-FSPGR/Ex02711Se00006Im00001.dcm");
    assert!(fs::metadata(&image).expect("stat").permissions().readonly());

    restore_writable(&destination);
}

#[test]
fn complete_refuses_incomplete_exam_unless_forced() {
    let fixture = fixture();
    let scanner = scanner(&fixture);
    let workflow = workflow(&fixture, &scanner);
    let PullOutcome::Pulled(summary) = pull(&workflow, "2711") else {
        panic!("exam should be pulled");
    };
    fs::remove_file(
        summary
            .exam_dir
            .join("Ex02711_Se00007_MRS-PRESS/Ex02711_Se00007_P00512.7"),
    )
    .expect("remove");

    let refused = workflow.complete_exam("2711", false).expect("complete");
    assert!(matches!(
        &refused,
        CompleteOutcome::Refused { discrepancies }
            if matches!(discrepancies.as_slice(), [Discrepancy::MissingAuxiliaryFile { .. }])
    ));
    assert!(summary.exam_dir.exists());

    let forced = workflow.complete_exam("2711", true).expect("complete");
    let CompleteOutcome::Archived { destination, discrepancies } = forced else {
        panic!("forced completion should archive");
    };
    assert_eq!(discrepancies.len(), 1);
    restore_writable(&destination);
}

#[test]
fn complete_keeps_existing_archive_unless_forced() {
    let fixture = fixture();
    let scanner = scanner(&fixture);
    let workflow = workflow(&fixture, &scanner);
    pull(&workflow, "2711");
    let CompleteOutcome::Archived { destination, .. } =
        workflow.complete_exam("2711", false).expect("complete")
    else {
        panic!("exam should be archived");
    };
    let archived_image = destination.join("Ex02711_Se00006_AX-FSPGR/Ex02711Se00006Im00001.dcm");
    let original = fs::read(&archived_image).expect("read");

    let PullOutcome::Pulled(second) = pull(&workflow, "2711") else {
        panic!("exam should be pulled again");
    };
    let outcome = workflow.complete_exam("2711", false).expect("complete");
    assert!(matches!(
        &outcome,
        CompleteOutcome::DestinationExists { destination: existing } if existing == &destination
    ));
    assert!(second.exam_dir.is_dir());
    assert_eq!(fs::read(&archived_image).expect("read"), original);

    let forced = workflow.complete_exam("2711", true).expect("complete");
    assert!(matches!(forced, CompleteOutcome::Archived { .. }));
    assert!(!second.exam_dir.exists());
    assert!(fs::metadata(&archived_image).expect("stat").permissions().readonly());
    restore_writable(&destination);
}

#[test]
fn missing_output_roots_are_fatal() {
    let fixture = fixture();
    let scanner = scanner(&fixture);
    let workflow = workflow(&fixture, &scanner);

    let PullOutcome::Pulled(summary) = pull(&workflow, "2711") else {
        panic!("exam should be pulled");
    };
    fs::remove_dir(&fixture.workspace.processed_dir).expect("rmdir");
    assert!(workflow.complete_exam("2711", false).is_err());
    assert!(summary.exam_dir.is_dir());
    assert!(!fixture.workspace.processed_dir.exists());

    fs::remove_dir_all(&fixture.workspace.inprocess_dir).expect("rmdir");
    assert!(workflow
        .pull_exam(&PullRequest {
            exam_id: "2712".to_string(),
            ..PullRequest::default()
        })
        .is_err());
    assert!(!fixture.workspace.inprocess_dir.exists());
}

#[test]
fn sync_pulls_each_exam_once() {
    let fixture = fixture();
    let scanner = scanner(&fixture);
    let workflow = workflow(&fixture, &scanner);

    let first = workflow.sync_exams().expect("sync");
    assert!(!first.run_id.is_empty());
    assert_eq!(first.pulled, vec!["2711", "2712", "955"]);
    assert_eq!(first.service_exams, vec!["60001"]);
    assert!(first.failed.is_empty());
    assert!(fixture
        .workspace
        .dailyqc_dir
        .join("20240102_Ex00955_DailyQC_SPN01-CMH-0001")
        .is_dir());

    let second = workflow.sync_exams().expect("sync");
    assert!(second.pulled.is_empty());
    assert_eq!(second.already_pulled.len(), 3);
    assert_ne!(first.run_id, second.run_id);

    let ledger = fs::read_to_string(fixture.workspace.log_dir.join("exams.txt")).expect("read");
    assert_eq!(ledger.lines().count(), 3);
}

#[test]
fn sync_fails_fast_when_scanner_is_unreachable() {
    let fixture = fixture();
    let scanner = SpoolScanner::new(
        fixture.spool.join("offline"),
        Box::new(JsonDecoder { required: keys::STUDY_ID }),
    );
    let workflow = workflow(&fixture, &scanner);
    assert!(workflow.sync_exams().is_err());
}

fn restore_writable(root: &Path) {
    for entry in walkdir::WalkDir::new(root) {
        let entry = entry.expect("entry");
        let mut permissions = entry.metadata().expect("stat").permissions();
        #[allow(clippy::permissions_set_readonly_false)]
        permissions.set_readonly(false);
        fs::set_permissions(entry.path(), permissions).expect("chmod");
    }
}
