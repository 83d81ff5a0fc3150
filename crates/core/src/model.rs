use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub mod keys {
    pub const STUDY_ID: &str = "StudyID";
    pub const STUDY_DATE: &str = "StudyDate";
    pub const STUDY_DESCRIPTION: &str = "StudyDescription";
    pub const PATIENT_ID: &str = "PatientID";
    pub const PATIENT_NAME: &str = "PatientName";
    pub const SERIES_NUMBER: &str = "SeriesNumber";
    pub const SERIES_DESCRIPTION: &str = "SeriesDescription";
    pub const INSTANCE_NUMBER: &str = "InstanceNumber";
    pub const IMAGES_IN_ACQUISITION: &str = "ImagesInAcquisition";
    pub const PULSE_SEQUENCE_NAME: &str = "InternalPulseSequenceName";
    pub const RAW_DATA_RUN_NUMBER: &str = "RawDataRunNumber";

    pub const PFILE_EXAM_NUMBER: &str = "exam_number";
    pub const PFILE_EXAM_DESCRIPTION: &str = "exam_description";
    pub const PFILE_EXAM_TYPE: &str = "exam_type";
    pub const PFILE_SERIES_NUMBER: &str = "series_number";
    pub const PFILE_SERIES_DESCRIPTION: &str = "series_description";
}

pub const UNKNOWN: &str = "UNKNOWN";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Headers
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamMetadata {
    pub exam_id: Option<String>,
    pub exam_date: Option<String>,
    pub patient_id: Option<String>,
    pub study_description: Option<String>,
    pub patient_name: Option<String>,
}

impl ExamMetadata {
    pub fn from_headers(headers: &Headers) -> Self {
        Self {
            exam_id: owned(headers, keys::STUDY_ID),
            exam_date: owned(headers, keys::STUDY_DATE),
            patient_id: owned(headers, keys::PATIENT_ID),
            study_description: owned(headers, keys::STUDY_DESCRIPTION),
            patient_name: owned(headers, keys::PATIENT_NAME),
        }
    }

    pub fn booking_and_amendment(&self) -> (String, String) {
        let description = self.study_description.as_deref().unwrap_or(UNKNOWN);
        let mut words = description.split(' ');
        match words.next() {
            Some(first) if first.starts_with("e+") => {
                (words.collect::<Vec<_>>().join(" "), first.to_string())
            }
            _ => (description.to_string(), String::new()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesMetadata {
    pub exam_id: String,
    pub series_number: String,
    pub series_description: Option<String>,
    pub images_in_acquisition: Option<u32>,
}

impl SeriesMetadata {
    pub fn from_headers(headers: &Headers) -> Self {
        Self {
            exam_id: headers.get_or(keys::STUDY_ID, UNKNOWN).to_string(),
            series_number: headers.get_or(keys::SERIES_NUMBER, "").to_string(),
            series_description: owned(headers, keys::SERIES_DESCRIPTION),
            images_in_acquisition: headers
                .get(keys::IMAGES_IN_ACQUISITION)
                .and_then(|value| value.parse().ok()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub path: PathBuf,
    pub exam_id: String,
    pub series_number: Option<String>,
    pub series_description: Option<String>,
    pub instance_number: Option<String>,
    pub pulse_sequence_name: Option<String>,
    pub raw_data_run_number: Option<String>,
}

impl ImageRecord {
    pub fn from_headers(path: impl Into<PathBuf>, headers: &Headers) -> Self {
        Self {
            path: path.into(),
            exam_id: headers.get_or(keys::STUDY_ID, UNKNOWN).to_string(),
            series_number: owned(headers, keys::SERIES_NUMBER),
            series_description: owned(headers, keys::SERIES_DESCRIPTION),
            instance_number: owned(headers, keys::INSTANCE_NUMBER),
            pulse_sequence_name: owned(headers, keys::PULSE_SEQUENCE_NAME),
            raw_data_run_number: owned(headers, keys::RAW_DATA_RUN_NUMBER),
        }
    }

    pub fn has_spectroscopy_marker(&self, sequence: &str) -> bool {
        self.pulse_sequence_name
            .as_deref()
            .is_some_and(|value| value.eq_ignore_ascii_case(sequence))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFile {
    pub path: PathBuf,
    pub headers: Headers,
}

impl RawFile {
    pub fn new(path: impl Into<PathBuf>, headers: Headers) -> Self {
        Self {
            path: path.into(),
            headers,
        }
    }

    pub fn exam_number(&self) -> &str {
        self.headers.get_or(keys::PFILE_EXAM_NUMBER, "")
    }

    pub fn series_number(&self) -> &str {
        self.headers.get_or(keys::PFILE_SERIES_NUMBER, "")
    }

    pub fn series_description(&self) -> &str {
        self.headers.get_or(keys::PFILE_SERIES_DESCRIPTION, "")
    }

    pub fn exam_description(&self) -> &str {
        self.headers.get_or(keys::PFILE_EXAM_DESCRIPTION, "")
    }

    pub fn is_backup(&self) -> bool {
        self.path.to_string_lossy().contains(".bak")
    }

    pub fn parent_folder_name(&self) -> String {
        parent_folder_name(&self.path)
    }
}

pub(crate) fn parent_folder_name(path: &Path) -> String {
    path.parent()
        .and_then(|parent| parent.file_name())
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RawFileKind {
    Spectroscopy,
    Fmri,
    Hos,
    Raw,
    Unknown,
}

impl fmt::Display for RawFileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RawFileKind::Spectroscopy => "spectroscopy",
            RawFileKind::Fmri => "fmri",
            RawFileKind::Hos => "hos",
            RawFileKind::Raw => "raw",
            RawFileKind::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOperation {
    pub source: PathBuf,
    pub destination: PathBuf,
}

impl FileOperation {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub operations: Vec<FileOperation>,
    pub warnings: Vec<String>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub(crate) fn push_unique(&mut self, operation: FileOperation) -> bool {
        if self
            .operations
            .iter()
            .any(|existing| existing.destination == operation.destination)
        {
            return false;
        }
        self.operations.push(operation);
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Discrepancy {
    SeriesListUnavailable {
        exam_id: String,
    },
    MissingSeries {
        series_number: String,
        folder: PathBuf,
    },
    ImageCountMismatch {
        series_number: String,
        folder: PathBuf,
        found: usize,
        expected: u32,
    },
    MissingAuxiliaryFile {
        series_dir: PathBuf,
        raw_file_id: Option<String>,
    },
    MismatchedAuxiliaryFile {
        raw_file: PathBuf,
        series_dir: PathBuf,
        expected_exam: String,
        expected_series: String,
        found_exam: String,
        found_series: String,
    },
}

impl Discrepancy {
    pub fn series_number(&self) -> Option<&str> {
        match self {
            Discrepancy::MissingSeries { series_number, .. }
            | Discrepancy::ImageCountMismatch { series_number, .. } => Some(series_number),
            _ => None,
        }
    }
}

impl fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Discrepancy::SeriesListUnavailable { exam_id } => write!(
                f,
                "Exam {exam_id} not on scanner. Unable to check series count."
            ),
            Discrepancy::MissingSeries {
                series_number,
                folder,
            } => write!(
                f,
                "Series {series_number}: expected series folder {} does not exist.",
                folder.display()
            ),
            Discrepancy::ImageCountMismatch {
                folder,
                found,
                expected,
                ..
            } => write!(
                f,
                "Series {} has {found} dicoms, expected {expected}.",
                folder.display()
            ),
            Discrepancy::MissingAuxiliaryFile {
                series_dir,
                raw_file_id,
            } => write!(
                f,
                "Expected pfile (id: {}) in {} but none were found.",
                raw_file_id.as_deref().unwrap_or("unknown"),
                series_dir.display()
            ),
            Discrepancy::MismatchedAuxiliaryFile {
                raw_file,
                expected_exam,
                expected_series,
                found_exam,
                found_series,
                ..
            } => write!(
                f,
                "Pfile {} headers (exam {found_exam}, series {found_series}) do not match exam {expected_exam}, series {expected_series}.",
                raw_file.display()
            ),
        }
    }
}

fn owned(headers: &Headers, key: &str) -> Option<String> {
    headers.get(key).map(str::to_string)
}

pub fn same_number(left: &str, right: &str) -> bool {
    let (left, right) = (left.trim(), right.trim());
    match (left.parse::<i64>(), right.parse::<i64>()) {
        (Ok(a), Ok(b)) => a == b,
        _ => left == right,
    }
}

#[cfg(test)]
mod tests {
    use super::{keys, same_number, ExamMetadata, Headers, RawFile};

    #[test]
    fn headers_treat_blank_values_as_missing() {
        let headers = Headers::new()
            .with(keys::STUDY_ID, " 2711 ")
            .with(keys::SERIES_DESCRIPTION, "   ");
        assert_eq!(headers.get(keys::STUDY_ID), Some("2711"));
        assert_eq!(headers.get(keys::SERIES_DESCRIPTION), None);
        assert_eq!(headers.get_or(keys::SERIES_DESCRIPTION, "x"), "x");
    }

    #[test]
    fn splits_amendment_marker_from_booking_code() {
        let exam = ExamMetadata::from_headers(
            &Headers::new().with(keys::STUDY_DESCRIPTION, "e+1 SPN01 MR"),
        );
        let (booking, amendment) = exam.booking_and_amendment();
        assert_eq!(booking, "SPN01 MR");
        assert_eq!(amendment, "e+1");

        let plain = ExamMetadata::from_headers(&Headers::new());
        assert_eq!(
            plain.booking_and_amendment(),
            ("UNKNOWN".to_string(), String::new())
        );
    }

    #[test]
    fn detects_backup_copies_anywhere_in_path() {
        let raw = RawFile::new("/pool/fMRI_P1.bak/P1.7", Headers::new());
        assert!(raw.is_backup());
        let raw = RawFile::new("/pool/fMRI_P1/P1.7.bak", Headers::new());
        assert!(raw.is_backup());
        let raw = RawFile::new("/pool/fMRI_P1/P1.7", Headers::new());
        assert!(!raw.is_backup());
    }

    #[test]
    fn compares_numbers_with_padding() {
        assert!(same_number("00006", "6"));
        assert!(same_number("abc", "abc"));
        assert!(!same_number("7", "6"));
    }
}
