use std::collections::HashSet;
use std::path::Path;

use tracing::{debug, trace, warn};

use crate::decode::HeaderDecoder;
use crate::index::{index, IndexOptions};
use crate::model::{FileOperation, ImageRecord, Plan, UNKNOWN};
use crate::options::ReconcileOptions;

struct SeriesGroup {
    exam_id: String,
    series_number: String,
    folder: String,
    images: Vec<ImageRecord>,
}

/// Plans how the loose DICOM files directly inside `unsorted_dir` move into
/// canonical series folders under `sorted_dir`.
///
/// The first file seen for a series names its folder. Files without an
/// instance number are numbered by position, in file-name order, skipping
/// numbers already claimed by an explicit instance number. That order is not
/// guaranteed to match acquisition order.
pub fn plan_sort(
    decoder: &dyn HeaderDecoder,
    unsorted_dir: &Path,
    sorted_dir: &Path,
    options: &ReconcileOptions,
) -> Plan {
    let naming = &options.naming;
    let mut plan = Plan::default();
    let mut groups: Vec<SeriesGroup> = Vec::new();

    for (path, headers) in index(decoder, unsorted_dir, &IndexOptions::top_level()) {
        let record = ImageRecord::from_headers(path, &headers);
        let Some(series_number) = record.series_number.clone() else {
            trace!(
                "{} has no series number; leaving it in place",
                record.path.display()
            );
            continue;
        };

        if let Some(first) = groups.first() {
            if !groups.iter().any(|group| group.exam_id == record.exam_id) {
                let message = format!(
                    "{} holds files from more than one exam ({} and {}); sorting each separately.",
                    unsorted_dir.display(),
                    first.exam_id,
                    record.exam_id
                );
                warn!("{}", message);
                plan.warnings.push(message);
            }
        }

        match groups.iter_mut().find(|group| {
            group.exam_id == record.exam_id && group.series_number == series_number
        }) {
            Some(group) => group.images.push(record),
            None => {
                let folder = naming.series_name(
                    &record.exam_id,
                    &series_number,
                    record.series_description.as_deref().unwrap_or(UNKNOWN),
                );
                groups.push(SeriesGroup {
                    exam_id: record.exam_id.clone(),
                    series_number,
                    folder,
                    images: vec![record],
                });
            }
        }
    }

    for group in groups {
        let series_dir = sorted_dir.join(&group.folder);
        debug!(
            "series {} -> {} ({} file(s))",
            group.series_number,
            series_dir.display(),
            group.images.len()
        );

        let claimed = group
            .images
            .iter()
            .filter_map(|image| image.instance_number.as_deref())
            .map(|instance| naming.image_name(&group.exam_id, &group.series_number, instance))
            .collect::<HashSet<_>>();
        let mut fallback = 0usize;

        for image in &group.images {
            let name = match &image.instance_number {
                Some(instance) => naming.image_name(&group.exam_id, &group.series_number, instance),
                None => loop {
                    let name = naming.image_name(
                        &group.exam_id,
                        &group.series_number,
                        &fallback.to_string(),
                    );
                    fallback += 1;
                    if !claimed.contains(&name) {
                        break name;
                    }
                },
            };
            let destination = series_dir.join(name);

            if !plan.push_unique(FileOperation::new(&image.path, &destination)) {
                let message = format!(
                    "{} maps to {} which is already taken; skipping.",
                    image.path.display(),
                    destination.display()
                );
                warn!("{}", message);
                plan.warnings.push(message);
            }
        }
    }

    plan
}
