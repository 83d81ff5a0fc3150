use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::naming::NamingScheme;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "policy")]
pub enum RawPolicy {
    #[default]
    Ignore,
    Backup { dir: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileOptions {
    pub naming: NamingScheme,
    pub raw_policy: RawPolicy,
    pub pfile_folder_marker: Option<String>,
    pub spectroscopy_sequence: String,
    pub fmri_reconstruction_name: String,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            naming: NamingScheme::default(),
            raw_policy: RawPolicy::Ignore,
            pfile_folder_marker: None,
            spectroscopy_sequence: "presscsi".to_string(),
            fmri_reconstruction_name: "sprl.nii".to_string(),
        }
    }
}
