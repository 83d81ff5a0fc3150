pub mod check;
pub mod classify;
pub mod decode;
pub mod index;
pub mod listing;
pub mod markdown;
pub mod matcher;
pub mod model;
pub mod naming;
pub mod options;
pub mod routing;
pub mod sort;

pub use check::{check_auxiliary_files, check_exam, check_series_images};
pub use classify::{classify, classify_parts};
pub use decode::{
    parse_header_dump, CommandDecoder, DecodeError, Decoders, DicomDecoder, HeaderDecoder,
    MemoryDecoder,
};
pub use index::{index, index_representative, list_dir, IndexOptions, MetadataIndex};
pub use listing::{
    exam_rows, find_staged_exam, sort_series, staged_exams, ExamFilter, ExamRow, StagedExam,
};
pub use markdown::render_check_summary;
pub use matcher::plan_auxiliary_files;
pub use model::{
    keys, same_number, Discrepancy, ExamMetadata, FileOperation, Headers, ImageRecord, Plan,
    RawFile, RawFileKind, SeriesMetadata, UNKNOWN,
};
pub use naming::{sanitize, zero_pad, NamingScheme, SANITIZE_SEPARATOR};
pub use options::{RawPolicy, ReconcileOptions};
pub use routing::{
    is_service_exam, output_dir_for, route_exam, ExamRoute, OutputDirs, MIN_SERVICE_EXAM_NUMBER,
};
pub use sort::plan_sort;
