use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use globset::{Glob, GlobMatcher};
use serde::{Deserialize, Serialize};

use crate::decode::HeaderDecoder;
use crate::index::{index_representative, list_dir};
use crate::model::{same_number, ExamMetadata, SeriesMetadata};
use crate::naming::NamingScheme;

#[derive(Debug, Clone, Default)]
pub struct ExamFilter {
    booking: Option<GlobMatcher>,
    exam_id: Option<GlobMatcher>,
    date: Option<GlobMatcher>,
}

impl ExamFilter {
    pub fn new(booking: Option<&str>, exam_id: Option<&str>, date: Option<&str>) -> Result<Self> {
        Ok(Self {
            booking: compile(booking)?,
            exam_id: compile(exam_id)?,
            date: compile(date)?,
        })
    }

    pub fn matches(&self, exam: &ExamMetadata) -> bool {
        field_matches(&self.booking, exam.study_description.as_deref())
            && field_matches(&self.exam_id, exam.exam_id.as_deref())
            && field_matches(&self.date, exam.exam_date.as_deref())
    }
}

fn compile(pattern: Option<&str>) -> Result<Option<GlobMatcher>> {
    let Some(pattern) = pattern.map(str::trim).filter(|pattern| !pattern.is_empty()) else {
        return Ok(None);
    };
    let glob = Glob::new(pattern).with_context(|| format!("invalid filter '{pattern}'"))?;
    Ok(Some(glob.compile_matcher()))
}

fn field_matches(matcher: &Option<GlobMatcher>, value: Option<&str>) -> bool {
    match matcher {
        Some(matcher) => matcher.is_match(value.unwrap_or("")),
        None => true,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamRow {
    #[serde(flatten)]
    pub exam: ExamMetadata,
    pub staged: bool,
}

pub fn exam_rows(
    exams: Vec<ExamMetadata>,
    filter: &ExamFilter,
    staged_dir: &Path,
    naming: &NamingScheme,
) -> Vec<ExamRow> {
    let staged_names = list_dir(staged_dir)
        .into_iter()
        .filter_map(|path| path.file_name().map(|name| name.to_string_lossy().to_string()))
        .collect::<Vec<_>>();

    let mut rows = exams
        .into_iter()
        .filter(|exam| filter.matches(exam))
        .map(|exam| {
            let staged = exam
                .exam_id
                .as_deref()
                .is_some_and(|id| is_staged(&staged_names, id, naming));
            ExamRow { exam, staged }
        })
        .collect::<Vec<_>>();
    rows.sort_by(|a, b| numeric_order(a.exam.exam_id.as_deref(), b.exam.exam_id.as_deref()));
    rows
}

fn is_staged(folder_names: &[String], exam_id: &str, naming: &NamingScheme) -> bool {
    let Ok(glob) = Glob::new(&naming.exam_folder_glob(exam_id)) else {
        return false;
    };
    let matcher = glob.compile_matcher();
    folder_names.iter().any(|name| matcher.is_match(name))
}

pub fn sort_series(mut series: Vec<SeriesMetadata>) -> Vec<SeriesMetadata> {
    series.sort_by(|a, b| numeric_order(Some(&a.series_number), Some(&b.series_number)));
    series
}

fn numeric_order(left: Option<&str>, right: Option<&str>) -> Ordering {
    let key = |value: Option<&str>| {
        let value = value.unwrap_or("").trim().to_string();
        (value.parse::<u64>().map_err(|_| ()), value)
    };
    let (left, right) = (key(left), key(right));
    match (&left.0, &right.0) {
        (Ok(a), Ok(b)) => a.cmp(b),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => left.1.cmp(&right.1),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedExam {
    pub path: PathBuf,
    #[serde(flatten)]
    pub exam: ExamMetadata,
}

pub fn staged_exams(decoder: &dyn HeaderDecoder, dir: &Path) -> Vec<StagedExam> {
    let mut exams = index_representative(decoder, &list_dir(dir))
        .into_iter()
        .map(|(path, (_, headers))| StagedExam {
            path,
            exam: ExamMetadata::from_headers(&headers),
        })
        .collect::<Vec<_>>();
    exams.sort_by(|a, b| numeric_order(a.exam.exam_id.as_deref(), b.exam.exam_id.as_deref()));
    exams
}

pub fn find_staged_exam(decoder: &dyn HeaderDecoder, dir: &Path, exam_id: &str) -> Option<PathBuf> {
    staged_exams(decoder, dir)
        .into_iter()
        .find(|staged| {
            staged
                .exam
                .exam_id
                .as_deref()
                .is_some_and(|id| same_number(id, exam_id))
        })
        .map(|staged| staged.path)
}
