use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use mritool_core::{
    index, keys, same_number, ExamMetadata, HeaderDecoder, Headers, IndexOptions, SeriesMetadata,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "level", rename_all = "snake_case")]
pub enum ScannerQuery {
    AllExams,
    Exam { exam_id: String },
    SeriesOfExam { exam_id: String },
    Series { exam_id: String, series_number: String },
}

impl ScannerQuery {
    pub fn exam(exam_id: &str, series_number: Option<&str>) -> Self {
        match series_number {
            Some(series_number) => ScannerQuery::Series {
                exam_id: exam_id.to_string(),
                series_number: series_number.to_string(),
            },
            None => ScannerQuery::Exam {
                exam_id: exam_id.to_string(),
            },
        }
    }

    fn is_series_level(&self) -> bool {
        matches!(
            self,
            ScannerQuery::SeriesOfExam { .. } | ScannerQuery::Series { .. }
        )
    }

    fn matches(&self, headers: &Headers) -> bool {
        let exam = headers.get_or(keys::STUDY_ID, "");
        let series = headers.get_or(keys::SERIES_NUMBER, "");
        match self {
            ScannerQuery::AllExams => true,
            ScannerQuery::Exam { exam_id } | ScannerQuery::SeriesOfExam { exam_id } => {
                same_number(exam, exam_id)
            }
            ScannerQuery::Series {
                exam_id,
                series_number,
            } => same_number(exam, exam_id) && same_number(series, series_number),
        }
    }
}

/// The scanner as seen by the workflows: a queryable catalog of exams and
/// series, and a way to fetch their DICOM files.
pub trait ScannerService {
    /// One header record per matching exam (or series, for series-level
    /// queries).
    fn find(&self, query: &ScannerQuery) -> Result<Vec<Headers>>;

    /// Delivers every DICOM file matching `query` into `destination` and
    /// returns how many were delivered.
    fn transfer(&self, query: &ScannerQuery, destination: &Path) -> Result<usize>;

    fn exams(&self, query: &ScannerQuery) -> Result<Vec<ExamMetadata>> {
        Ok(self
            .find(query)?
            .iter()
            .map(ExamMetadata::from_headers)
            .collect())
    }

    fn series(&self, exam_id: &str) -> Result<Vec<SeriesMetadata>> {
        let query = ScannerQuery::SeriesOfExam {
            exam_id: exam_id.to_string(),
        };
        Ok(self
            .find(&query)?
            .iter()
            .map(SeriesMetadata::from_headers)
            .collect())
    }
}

const EXAM_LEVEL_KEYS: &[&str] = &[
    keys::STUDY_ID,
    keys::STUDY_DATE,
    keys::STUDY_DESCRIPTION,
    keys::PATIENT_ID,
    keys::PATIENT_NAME,
];

pub struct SpoolScanner {
    root: PathBuf,
    decoder: Box<dyn HeaderDecoder>,
}

impl SpoolScanner {
    pub fn new(root: impl Into<PathBuf>, decoder: Box<dyn HeaderDecoder>) -> Self {
        Self {
            root: root.into(),
            decoder,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn catalog(&self, query: &ScannerQuery) -> Result<Vec<(PathBuf, Headers)>> {
        if !self.root.is_dir() {
            bail!("scanner spool {} is not reachable", self.root.display());
        }
        let options = IndexOptions {
            follow_links: true,
            ..IndexOptions::complete()
        };
        Ok(index(self.decoder.as_ref(), &self.root, &options)
            .into_iter()
            .filter(|(_, headers)| query.matches(headers))
            .collect())
    }
}

impl ScannerService for SpoolScanner {
    fn find(&self, query: &ScannerQuery) -> Result<Vec<Headers>> {
        let catalog = self.catalog(query)?;

        if !query.is_series_level() {
            let mut exams: BTreeMap<String, Headers> = BTreeMap::new();
            for (_, headers) in catalog {
                let Some(exam_id) = headers.get(keys::STUDY_ID) else {
                    continue;
                };
                exams.entry(exam_id.to_string()).or_insert_with(|| {
                    EXAM_LEVEL_KEYS
                        .iter()
                        .filter_map(|key| headers.get(key).map(|value| (*key, value)))
                        .collect()
                });
            }
            return Ok(exams.into_values().collect());
        }

        let mut series: BTreeMap<String, (Headers, usize)> = BTreeMap::new();
        for (_, headers) in catalog {
            let Some(series_number) = headers.get(keys::SERIES_NUMBER) else {
                continue;
            };
            let entry = series
                .entry(series_number.to_string())
                .or_insert_with(|| {
                    let record = [
                        keys::STUDY_ID,
                        keys::SERIES_NUMBER,
                        keys::SERIES_DESCRIPTION,
                        keys::IMAGES_IN_ACQUISITION,
                    ]
                    .iter()
                    .filter_map(|key| headers.get(key).map(|value| (*key, value)))
                    .collect::<Headers>();
                    (record, 0)
                });
            entry.1 += 1;
        }

        Ok(series
            .into_values()
            .map(|(mut record, files)| {
                if !record.contains(keys::IMAGES_IN_ACQUISITION) {
                    record.insert(keys::IMAGES_IN_ACQUISITION, files.to_string());
                }
                record
            })
            .collect())
    }

    fn transfer(&self, query: &ScannerQuery, destination: &Path) -> Result<usize> {
        fs::create_dir_all(destination)
            .with_context(|| format!("failed to create {}", destination.display()))?;

        let mut delivered = 0;
        for (source, _) in self.catalog(query)? {
            let name = source
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default();
            let mut target = destination.join(&name);
            if target.exists() {
                target = destination.join(format!("{delivered:06}_{name}"));
            }
            fs::copy(&source, &target).with_context(|| {
                format!("failed to fetch {} from the scanner spool", source.display())
            })?;
            trace!("fetched {}", source.display());
            delivered += 1;
        }
        debug!(
            "fetched {} file(s) from {} into {}",
            delivered,
            self.root.display(),
            destination.display()
        );
        Ok(delivered)
    }
}
