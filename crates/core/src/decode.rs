use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use dicom::core::Tag;
use dicom::dictionary_std::tags;
use dicom::object::{open_file, DefaultDicomObject};
use thiserror::Error;

use crate::model::{keys, Headers};

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("{} is not a decodable file: {reason}", .path.display())]
    Unsupported { path: PathBuf, reason: String },
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("header dump tool failed for {}: {reason}", .path.display())]
    Tool { path: PathBuf, reason: String },
}

pub trait HeaderDecoder {
    fn decode(&self, path: &Path) -> Result<Headers, DecodeError>;
}

impl<T: HeaderDecoder + ?Sized> HeaderDecoder for &T {
    fn decode(&self, path: &Path) -> Result<Headers, DecodeError> {
        (**self).decode(path)
    }
}

impl<T: HeaderDecoder + ?Sized> HeaderDecoder for Box<T> {
    fn decode(&self, path: &Path) -> Result<Headers, DecodeError> {
        (**self).decode(path)
    }
}

#[derive(Clone, Copy)]
pub struct Decoders<'a> {
    pub dicom: &'a dyn HeaderDecoder,
    pub pfile: &'a dyn HeaderDecoder,
}

const DICOM_FIELDS: &[(Tag, &str)] = &[
    (tags::STUDY_ID, keys::STUDY_ID),
    (tags::STUDY_DATE, keys::STUDY_DATE),
    (tags::STUDY_DESCRIPTION, keys::STUDY_DESCRIPTION),
    (tags::PATIENT_ID, keys::PATIENT_ID),
    (tags::PATIENT_NAME, keys::PATIENT_NAME),
    (tags::SERIES_NUMBER, keys::SERIES_NUMBER),
    (tags::SERIES_DESCRIPTION, keys::SERIES_DESCRIPTION),
    (tags::INSTANCE_NUMBER, keys::INSTANCE_NUMBER),
    (tags::IMAGES_IN_ACQUISITION, keys::IMAGES_IN_ACQUISITION),
    (Tag(0x0019, 0x109E), keys::PULSE_SEQUENCE_NAME),
    (Tag(0x0019, 0x10A2), keys::RAW_DATA_RUN_NUMBER),
];

#[derive(Debug, Clone, Copy, Default)]
pub struct DicomDecoder;

impl HeaderDecoder for DicomDecoder {
    fn decode(&self, path: &Path) -> Result<Headers, DecodeError> {
        let obj = open_file(path).map_err(|err| DecodeError::Unsupported {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;

        let mut headers = Headers::new();
        for (tag, key) in DICOM_FIELDS {
            if let Some(value) = element_text(&obj, *tag) {
                headers.insert(*key, value);
            }
        }
        Ok(headers)
    }
}

fn element_text(obj: &DefaultDicomObject, tag: Tag) -> Option<String> {
    let element = obj.element(tag).ok()?;
    let text = match element.to_str() {
        Ok(text) => text.to_string(),
        // private elements read without a dictionary entry arrive as raw bytes
        Err(_) => String::from_utf8_lossy(&element.to_bytes().ok()?).to_string(),
    };
    let text = text.trim_matches(|ch: char| ch == '\0' || ch.is_whitespace());
    (!text.is_empty()).then(|| text.to_string())
}

#[derive(Debug, Clone)]
pub struct CommandDecoder {
    program: String,
    args: Vec<String>,
}

impl CommandDecoder {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl HeaderDecoder for CommandDecoder {
    fn decode(&self, path: &Path) -> Result<Headers, DecodeError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .output()
            .map_err(|source| DecodeError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        if !output.status.success() {
            return Err(DecodeError::Tool {
                path: path.to_path_buf(),
                reason: format!(
                    "{} exited with {}",
                    self.program,
                    output.status.code().unwrap_or(-1)
                ),
            });
        }

        let headers = parse_header_dump(&String::from_utf8_lossy(&output.stdout));
        if headers.is_empty() {
            return Err(DecodeError::Unsupported {
                path: path.to_path_buf(),
                reason: "header dump was empty".to_string(),
            });
        }
        Ok(headers)
    }
}

pub fn parse_header_dump(text: &str) -> Headers {
    let mut headers = Headers::new();
    for line in text.lines() {
        let Some(split) = line.find([':', '=']) else {
            continue;
        };
        let (label, value) = line.split_at(split);
        let label = label.trim();
        if label.is_empty() {
            continue;
        }
        headers.insert(label, value[1..].trim());
    }
    headers
}

#[derive(Debug, Clone, Default)]
pub struct MemoryDecoder {
    entries: HashMap<PathBuf, Headers>,
}

impl MemoryDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, headers: Headers) {
        self.entries.insert(path.into(), headers);
    }

    pub fn with(mut self, path: impl Into<PathBuf>, headers: Headers) -> Self {
        self.insert(path, headers);
        self
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read header cache {}", path.display()))?;
        let entries: HashMap<PathBuf, Headers> = serde_json::from_str(&data)
            .with_context(|| format!("failed to parse header cache {}", path.display()))?;
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl HeaderDecoder for MemoryDecoder {
    fn decode(&self, path: &Path) -> Result<Headers, DecodeError> {
        self.entries
            .get(path)
            .cloned()
            .ok_or_else(|| DecodeError::Unsupported {
                path: path.to_path_buf(),
                reason: "no headers recorded".to_string(),
            })
    }
}
