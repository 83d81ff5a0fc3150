use std::path::Path;

use tracing::{debug, warn};

use crate::decode::Decoders;
use crate::index::{index, list_dir, IndexOptions};
use crate::model::{same_number, Discrepancy, ImageRecord, RawFile, SeriesMetadata, UNKNOWN};
use crate::options::ReconcileOptions;

pub fn check_exam(
    decoders: Decoders<'_>,
    exam_dir: &Path,
    exam_id: &str,
    series_list: Option<&[SeriesMetadata]>,
    options: &ReconcileOptions,
) -> Vec<Discrepancy> {
    let mut discrepancies = Vec::new();

    match series_list {
        Some(series_list) if !series_list.is_empty() => {
            discrepancies.extend(check_series_images(
                exam_dir,
                exam_id,
                series_list,
                options,
            ));
        }
        _ => {
            let discrepancy = Discrepancy::SeriesListUnavailable {
                exam_id: exam_id.to_string(),
            };
            warn!("{}", discrepancy);
            discrepancies.push(discrepancy);
        }
    }

    discrepancies.extend(check_auxiliary_files(decoders, exam_dir, options));
    discrepancies
}

pub fn check_series_images(
    exam_dir: &Path,
    exam_id: &str,
    series_list: &[SeriesMetadata],
    options: &ReconcileOptions,
) -> Vec<Discrepancy> {
    let mut discrepancies = Vec::new();

    for series in series_list {
        let folder = exam_dir.join(options.naming.series_name(
            exam_id,
            &series.series_number,
            series.series_description.as_deref().unwrap_or(UNKNOWN),
        ));

        if !folder.is_dir() {
            let discrepancy = Discrepancy::MissingSeries {
                series_number: series.series_number.clone(),
                folder,
            };
            warn!("{}", discrepancy);
            discrepancies.push(discrepancy);
            continue;
        }

        let Some(expected) = series.images_in_acquisition else {
            debug!(
                "series {} has no image count on the scanner; folder presence only",
                series.series_number
            );
            continue;
        };

        let found = count_images(&folder);
        if found != expected as usize {
            let discrepancy = Discrepancy::ImageCountMismatch {
                series_number: series.series_number.clone(),
                folder,
                found,
                expected,
            };
            warn!("{}", discrepancy);
            discrepancies.push(discrepancy);
        }
    }

    discrepancies
}

pub fn check_auxiliary_files(
    decoders: Decoders<'_>,
    exam_dir: &Path,
    options: &ReconcileOptions,
) -> Vec<Discrepancy> {
    let mut discrepancies = Vec::new();

    for (path, headers) in index(decoders.dicom, exam_dir, &IndexOptions::default()) {
        let record = ImageRecord::from_headers(path, &headers);
        if !record.has_spectroscopy_marker(&options.spectroscopy_sequence) {
            continue;
        }
        let Some(series_dir) = record.path.parent() else {
            continue;
        };
        let series_number = record.series_number.as_deref().unwrap_or("");

        let pfiles = index(decoders.pfile, series_dir, &IndexOptions::complete());
        if pfiles.is_empty() {
            let discrepancy = Discrepancy::MissingAuxiliaryFile {
                series_dir: series_dir.to_path_buf(),
                raw_file_id: record.raw_data_run_number.clone(),
            };
            warn!("{}", discrepancy);
            discrepancies.push(discrepancy);
            continue;
        }

        for (pfile_path, pfile_headers) in pfiles {
            let raw = RawFile::new(pfile_path, pfile_headers);
            if same_number(raw.exam_number(), &record.exam_id)
                && same_number(raw.series_number(), series_number)
            {
                continue;
            }
            let discrepancy = Discrepancy::MismatchedAuxiliaryFile {
                raw_file: raw.path.clone(),
                series_dir: series_dir.to_path_buf(),
                expected_exam: record.exam_id.clone(),
                expected_series: series_number.to_string(),
                found_exam: raw.exam_number().to_string(),
                found_series: raw.series_number().to_string(),
            };
            warn!("{}", discrepancy);
            discrepancies.push(discrepancy);
        }
    }

    discrepancies
}

fn count_images(folder: &Path) -> usize {
    list_dir(folder)
        .iter()
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("dcm"))
        })
        .count()
}
