use crate::model::Discrepancy;

pub fn render_check_summary(exam_id: &str, exam_dir: &str, discrepancies: &[Discrepancy]) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Exam {exam_id} Completeness Check\n\n"));
    out.push_str(&format!(
        "- Exam folder: `{}`\n- Discrepancies: `{}`\n\n",
        exam_dir,
        discrepancies.len()
    ));

    if discrepancies.is_empty() {
        out.push_str(&format!("All dicom files present for exam {exam_id}.\n"));
        return out;
    }

    let sections: [(&str, fn(&Discrepancy) -> bool); 3] = [
        ("Scanner", |item| {
            matches!(item, Discrepancy::SeriesListUnavailable { .. })
        }),
        ("Series", |item| {
            matches!(
                item,
                Discrepancy::MissingSeries { .. } | Discrepancy::ImageCountMismatch { .. }
            )
        }),
        ("Auxiliary Files", |item| {
            matches!(
                item,
                Discrepancy::MissingAuxiliaryFile { .. }
                    | Discrepancy::MismatchedAuxiliaryFile { .. }
            )
        }),
    ];

    for (title, belongs) in sections {
        let items = discrepancies
            .iter()
            .filter(|item| belongs(item))
            .collect::<Vec<_>>();
        if items.is_empty() {
            continue;
        }
        out.push_str(&format!("## {title}\n\n"));
        for item in items {
            out.push_str(&format!("- `{}`: {}\n", kind_label(item), item));
        }
        out.push('\n');
    }

    out
}

fn kind_label(discrepancy: &Discrepancy) -> &'static str {
    match discrepancy {
        Discrepancy::SeriesListUnavailable { .. } => "series_list_unavailable",
        Discrepancy::MissingSeries { .. } => "missing_series",
        Discrepancy::ImageCountMismatch { .. } => "image_count_mismatch",
        Discrepancy::MissingAuxiliaryFile { .. } => "missing_auxiliary_file",
        Discrepancy::MismatchedAuxiliaryFile { .. } => "mismatched_auxiliary_file",
    }
}

#[cfg(test)]
mod tests {
    use super::render_check_summary;
    use crate::model::Discrepancy;

    #[test]
    fn renders_clean_exam() {
        let out = render_check_summary("2711", "/inprocess/exam", &[]);
        assert!(out.starts_with("# Exam 2711 Completeness Check"));
        assert!(out.contains("All dicom files present for exam 2711."));
    }

    #[test]
    fn groups_discrepancies_by_section() {
        let out = render_check_summary(
            "2711",
            "/inprocess/exam",
            &[
                Discrepancy::MissingAuxiliaryFile {
                    series_dir: "/inprocess/exam/Ex02711_Se00007_MRS".into(),
                    raw_file_id: None,
                },
                Discrepancy::MissingSeries {
                    series_number: "2".to_string(),
                    folder: "/inprocess/exam/Ex02711_Se00002_T2".into(),
                },
            ],
        );
        assert!(out.contains("- Discrepancies: `2`"));
        assert!(!out.contains("## Scanner"));
        let series = out.find("## Series").expect("series section");
        let auxiliary = out.find("## Auxiliary Files").expect("auxiliary section");
        assert!(series < auxiliary);
        assert!(out.contains("`missing_series`"));
    }
}
