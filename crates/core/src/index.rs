use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use tracing::trace;
use walkdir::WalkDir;

use crate::decode::HeaderDecoder;
use crate::model::Headers;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexOptions {
    pub recurse: bool,
    /// Subdirectory levels to descend when recursing; `None` is unlimited.
    pub max_depth: Option<usize>,
    pub complete: bool,
    pub follow_links: bool,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            recurse: true,
            max_depth: None,
            complete: false,
            follow_links: false,
        }
    }
}

impl IndexOptions {
    pub fn complete() -> Self {
        Self {
            complete: true,
            ..Self::default()
        }
    }

    pub fn top_level() -> Self {
        Self {
            recurse: false,
            complete: true,
            follow_links: true,
            ..Self::default()
        }
    }
}

pub type MetadataIndex = BTreeMap<PathBuf, Headers>;

pub fn index(decoder: &dyn HeaderDecoder, root: &Path, options: &IndexOptions) -> MetadataIndex {
    let mut manifest = MetadataIndex::new();
    let mut represented: HashSet<PathBuf> = HashSet::new();

    let walk_depth = if options.recurse {
        options.max_depth.map_or(usize::MAX, |depth| depth.saturating_add(1))
    } else {
        1
    };
    let walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(walk_depth)
        .follow_links(options.follow_links)
        .sort_by_file_name();

    for item in walker {
        let entry = match item {
            Ok(entry) => entry,
            Err(err) => {
                trace!("skipping unreadable entry under {}: {}", root.display(), err);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let parent = entry.path().parent().map(Path::to_path_buf).unwrap_or_default();
        if !options.complete && represented.contains(&parent) {
            continue;
        }

        match decoder.decode(entry.path()) {
            Ok(headers) => {
                represented.insert(parent);
                manifest.insert(entry.into_path(), headers);
            }
            Err(err) => trace!("{}", err),
        }
    }

    manifest
}

pub fn index_representative<P: AsRef<Path>>(
    decoder: &dyn HeaderDecoder,
    paths: &[P],
) -> BTreeMap<PathBuf, (PathBuf, Headers)> {
    let options = IndexOptions {
        recurse: true,
        max_depth: Some(1),
        complete: false,
        follow_links: false,
    };

    let mut manifest = BTreeMap::new();
    for exam_dir in paths {
        let exam_dir = exam_dir.as_ref();
        if !exam_dir.is_dir() {
            continue;
        }
        if let Some((file, headers)) = index(decoder, exam_dir, &options).into_iter().next() {
            manifest.insert(exam_dir.to_path_buf(), (file, headers));
        } else {
            trace!("no decodable file found in {}", exam_dir.display());
        }
    }
    manifest
}

pub fn list_dir(dir: &Path) -> Vec<PathBuf> {
    let mut entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .collect::<Vec<_>>(),
        Err(err) => {
            trace!("cannot list {}: {}", dir.display(), err);
            Vec::new()
        }
    };
    entries.sort();
    entries
}
