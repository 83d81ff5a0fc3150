use serde::{Deserialize, Serialize};

use crate::model::{ExamMetadata, UNKNOWN};

pub const SANITIZE_SEPARATOR: char = '-';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamingScheme {
    pub exam_id_width: usize,
    pub series_width: usize,
    pub instance_width: usize,
}

impl Default for NamingScheme {
    fn default() -> Self {
        Self {
            exam_id_width: 5,
            series_width: 5,
            instance_width: 5,
        }
    }
}

impl NamingScheme {
    pub fn exam_name(&self, exam: &ExamMetadata) -> String {
        let (booking, amendment) = exam.booking_and_amendment();
        let amendment = amendment
            .chars()
            .filter(|ch| ch.is_alphanumeric() || *ch == '_')
            .collect::<String>();
        format!(
            "{date}_Ex{exam}_{booking}_{patient}{amendment}",
            date = exam.exam_date.as_deref().unwrap_or(UNKNOWN),
            exam = zero_pad(exam.exam_id.as_deref().unwrap_or(UNKNOWN), self.exam_id_width),
            booking = sanitize(&booking),
            patient = sanitize(exam.patient_id.as_deref().unwrap_or(UNKNOWN)),
        )
    }

    pub fn series_name(&self, exam_id: &str, series_number: &str, description: &str) -> String {
        format!(
            "{}{}",
            self.series_prefix(exam_id, series_number),
            sanitize(description)
        )
    }

    pub fn series_prefix(&self, exam_id: &str, series_number: &str) -> String {
        format!(
            "Ex{}_Se{}_",
            zero_pad(exam_id, self.exam_id_width),
            zero_pad(series_number, self.series_width)
        )
    }

    pub fn image_name(&self, exam_id: &str, series_number: &str, instance_number: &str) -> String {
        format!(
            "Ex{}Se{}Im{}.dcm",
            zero_pad(exam_id, self.exam_id_width),
            zero_pad(series_number, self.series_width),
            zero_pad(instance_number, self.instance_width)
        )
    }

    pub fn exam_folder_glob(&self, exam_id: &str) -> String {
        format!("*_Ex{}_*", zero_pad(exam_id, self.exam_id_width))
    }
}

pub fn sanitize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_run = false;
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            out.push(ch);
            in_run = false;
        } else if !in_run {
            out.push(SANITIZE_SEPARATOR);
            in_run = true;
        }
    }
    out
}

pub fn zero_pad(value: &str, width: usize) -> String {
    let value = value.trim();
    let (sign, digits) = match value.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", value),
    };
    let fill = width.saturating_sub(value.chars().count());
    format!("{sign}{}{digits}", "0".repeat(fill))
}

#[cfg(test)]
mod tests {
    use super::{sanitize, zero_pad, NamingScheme};
    use crate::model::{keys, ExamMetadata, Headers};

    #[test]
    fn sanitize_collapses_runs_and_is_idempotent() {
        let samples = [
            "AX FSPGR",
            "Sag T1 -- BRAVO (3D)",
            "  leading and trailing  ",
            "a-  b",
            "under_score__pair",
            "---",
            "",
            "résumé 2",
        ];
        for sample in samples {
            let once = sanitize(sample);
            assert_eq!(sanitize(&once), once, "not idempotent for {sample:?}");
            assert!(!once.contains("--"), "double separator for {sample:?}");
        }
        assert_eq!(sanitize("AX FSPGR"), "AX-FSPGR");
        assert_eq!(sanitize("Sag T1 -- BRAVO (3D)"), "Sag-T1-BRAVO-3D-");
        assert_eq!(sanitize("under_score"), "under-score");
    }

    #[test]
    fn zero_pad_matches_fixed_width() {
        assert_eq!(zero_pad("6", 5), "00006");
        assert_eq!(zero_pad("123456", 5), "123456");
        assert_eq!(zero_pad("-3", 4), "-003");
        assert_eq!(zero_pad("UNKNOWN", 5), "UNKNOWN");
    }

    #[test]
    fn series_and_image_names_share_the_exam_series_convention() {
        let scheme = NamingScheme::default();
        assert_eq!(
            scheme.series_name("2711", "6", "AX FSPGR"),
            "Ex02711_Se00006_AX-FSPGR"
        );
        assert_eq!(scheme.series_prefix("2711", "6"), "Ex02711_Se00006_");
        assert_eq!(
            scheme.image_name("2711", "6", "12"),
            "Ex02711Se00006Im00012.dcm"
        );
    }

    #[test]
    fn exam_name_moves_amendment_to_suffix() {
        let headers = Headers::new()
            .with(keys::STUDY_ID, "2711")
            .with(keys::STUDY_DATE, "20240102")
            .with(keys::STUDY_DESCRIPTION, "e+1 SPN01 MR")
            .with(keys::PATIENT_ID, "SPN01_CMH_0001");
        let name = NamingScheme::default().exam_name(&ExamMetadata::from_headers(&headers));
        assert_eq!(name, "20240102_Ex02711_SPN01-MR_SPN01-CMH-0001e1");
    }

    #[test]
    fn exam_name_tolerates_sparse_metadata() {
        let name = NamingScheme::default().exam_name(&ExamMetadata::from_headers(&Headers::new()));
        assert_eq!(name, "UNKNOWN_ExUNKNOWN_UNKNOWN_UNKNOWN");
    }
}
