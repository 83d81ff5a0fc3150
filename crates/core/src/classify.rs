use std::path::Path;

use crate::model::{keys, parent_folder_name, Headers, RawFileKind};

const SPECTROSCOPY_TOKEN: &str = "MRS";
const HOS_DESCRIPTION: &str = "HOS";
const FMRI_FOLDER_PREFIX: &str = "fMRI_P";
const RAW_SPIRAL_FOLDER_PREFIX: &str = "rawSprlioPfiles";

/// Decides how a pfile is handled from its series description and the name of
/// the folder it sits in. The first matching rule wins:
///
/// 1. description starts with the `MRS` token: spectroscopy
/// 2. description is exactly `HOS`: higher order shim
/// 3. folder starts with `fMRI_P`: fMRI spiral run
/// 4. folder starts with `rawSprlioPfiles`: raw spiral data
/// 5. anything else: unknown
pub fn classify(path: &Path, headers: &Headers) -> RawFileKind {
    let description = headers.get_or(keys::PFILE_SERIES_DESCRIPTION, "");
    let folder = parent_folder_name(path);
    classify_parts(description, &folder)
}

pub fn classify_parts(series_description: &str, folder_name: &str) -> RawFileKind {
    let series_description = series_description.trim();
    if series_description.split_whitespace().next() == Some(SPECTROSCOPY_TOKEN) {
        RawFileKind::Spectroscopy
    } else if series_description == HOS_DESCRIPTION {
        RawFileKind::Hos
    } else if folder_name.starts_with(FMRI_FOLDER_PREFIX) {
        RawFileKind::Fmri
    } else if folder_name.starts_with(RAW_SPIRAL_FOLDER_PREFIX) {
        RawFileKind::Raw
    } else {
        RawFileKind::Unknown
    }
}
