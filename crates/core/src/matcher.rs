use std::path::{Path, PathBuf};

use tracing::{debug, trace, warn};

use crate::classify::classify;
use crate::decode::HeaderDecoder;
use crate::index::{index, list_dir, IndexOptions};
use crate::model::{FileOperation, Plan, RawFile, RawFileKind};
use crate::options::{RawPolicy, ReconcileOptions};

pub fn plan_auxiliary_files(
    decoder: &dyn HeaderDecoder,
    raw_pool_root: &Path,
    exam_dir: &Path,
    exam_id: &str,
    options: &ReconcileOptions,
) -> Plan {
    let exam_id = exam_id.trim();
    let index_options = IndexOptions {
        follow_links: true,
        ..IndexOptions::complete()
    };

    let mut plan = Plan::default();
    for (path, headers) in index(decoder, raw_pool_root, &index_options) {
        let raw = RawFile::new(path, headers);
        if raw.exam_number() != exam_id {
            continue;
        }
        if raw.is_backup() {
            trace!("skipping backup pfile {}", raw.path.display());
            continue;
        }
        if let Some(marker) = &options.pfile_folder_marker {
            if !raw.path.to_string_lossy().contains(marker.as_str()) {
                trace!(
                    "skipping {}: not inside a {}* folder",
                    raw.path.display(),
                    marker
                );
                continue;
            }
        }

        match classify(&raw.path, &raw.headers) {
            RawFileKind::Spectroscopy => plan_spectroscopy(&raw, exam_dir, exam_id, options, &mut plan),
            RawFileKind::Fmri => plan_fmri(&raw, exam_dir, exam_id, options, &mut plan),
            RawFileKind::Raw => plan_raw(&raw, exam_id, options, &mut plan),
            RawFileKind::Hos => debug!(
                "Ignoring pfile {} because it is type == {}",
                raw.path.display(),
                RawFileKind::Hos
            ),
            RawFileKind::Unknown => {
                let message = format!(
                    "Unknown pfile kind {}: description = {}.",
                    raw.path.display(),
                    raw.series_description()
                );
                warn!("{}", message);
                plan.warnings.push(message);
            }
        }
    }

    plan
}

fn plan_spectroscopy(
    raw: &RawFile,
    exam_dir: &Path,
    exam_id: &str,
    options: &ReconcileOptions,
    plan: &mut Plan,
) {
    let series_number = raw.series_number();
    let prefix = options.naming.series_prefix(exam_id, series_number);

    let series_dirs = list_dir(exam_dir)
        .into_iter()
        .filter(|path| path.is_dir() && file_name(path).starts_with(&prefix))
        .collect::<Vec<_>>();

    let [series_dir] = series_dirs.as_slice() else {
        let message = format!(
            "Couldn't find folder for series {} in exam dir {} for pfile {} ({} candidate(s)). Skipping.",
            series_number,
            exam_dir.display(),
            raw.path.display(),
            series_dirs.len()
        );
        warn!("{}", message);
        plan.warnings.push(message);
        return;
    };

    debug!(
        "Found pfile {} for series {}",
        raw.path.display(),
        series_number
    );
    let destination = series_dir.join(format!("{prefix}{}", file_name(&raw.path)));
    plan.push_unique(FileOperation::new(&raw.path, destination));
}

fn plan_fmri(
    raw: &RawFile,
    exam_dir: &Path,
    exam_id: &str,
    options: &ReconcileOptions,
    plan: &mut Plan,
) {
    let naming = &options.naming;
    let series_number = raw.series_number();
    let prefix = naming.series_prefix(exam_id, series_number);
    let series_dir = exam_dir.join(naming.series_name(
        exam_id,
        series_number,
        raw.series_description(),
    ));
    let Some(run_dir) = raw.path.parent() else {
        return;
    };

    let reconstruction = Path::new(&options.fmri_reconstruction_name);
    let reconstruction_ext = reconstruction
        .extension()
        .map(|ext| ext.to_string_lossy().to_string())
        .unwrap_or_default();
    let raw_name = file_name(&raw.path);
    let stem = pfile_stem(&raw_name);

    debug!(
        "Mirroring fMRI run {} into {}",
        run_dir.display(),
        series_dir.display()
    );
    for sibling in list_dir(run_dir) {
        if !sibling.is_file() || sibling.to_string_lossy().contains(".bak") {
            continue;
        }
        let sibling_name = file_name(&sibling);
        let destination_name = if sibling_name == options.fmri_reconstruction_name {
            format!("{prefix}{stem}.{reconstruction_ext}")
        } else {
            format!("{prefix}{sibling_name}")
        };
        plan.push_unique(FileOperation::new(sibling, series_dir.join(destination_name)));
    }
}

fn plan_raw(raw: &RawFile, exam_id: &str, options: &ReconcileOptions, plan: &mut Plan) {
    match &options.raw_policy {
        RawPolicy::Ignore => debug!(
            "Ignoring pfile {} because it is type == {}",
            raw.path.display(),
            RawFileKind::Raw
        ),
        RawPolicy::Backup { dir } => {
            let prefix = options.naming.series_prefix(exam_id, raw.series_number());
            let destination: PathBuf = dir.join(format!("{prefix}{}", file_name(&raw.path)));
            debug!(
                "Backing up raw spiral pfile {} to {}",
                raw.path.display(),
                destination.display()
            );
            plan.push_unique(FileOperation::new(&raw.path, destination));
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn pfile_stem(name: &str) -> &str {
    let name = name.strip_suffix(".hdr").unwrap_or(name);
    name.strip_suffix(".7").unwrap_or(name)
}
