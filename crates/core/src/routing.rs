use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::model::ExamMetadata;

pub const MIN_SERVICE_EXAM_NUMBER: u64 = 50_000;

const DAILY_QC_DESCRIPTION: &str = "DailyQC";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputDirs {
    pub inprocess: PathBuf,
    pub tech: PathBuf,
    pub dailyqc: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExamRoute {
    DailyQc,
    Technologist,
    InProcess,
}

pub fn route_exam(exam: &ExamMetadata) -> ExamRoute {
    let description = exam.study_description.as_deref().unwrap_or("").trim();
    if description == DAILY_QC_DESCRIPTION {
        ExamRoute::DailyQc
    } else if !(description.ends_with("MR") || description.ends_with("QA")) {
        ExamRoute::Technologist
    } else {
        ExamRoute::InProcess
    }
}

pub fn output_dir_for<'a>(dirs: &'a OutputDirs, exam: &ExamMetadata) -> &'a Path {
    match route_exam(exam) {
        ExamRoute::DailyQc => &dirs.dailyqc,
        ExamRoute::Technologist => &dirs.tech,
        ExamRoute::InProcess => &dirs.inprocess,
    }
}

pub fn is_service_exam(exam_id: &str) -> bool {
    exam_id
        .trim()
        .parse::<u64>()
        .is_ok_and(|number| number > MIN_SERVICE_EXAM_NUMBER)
}
