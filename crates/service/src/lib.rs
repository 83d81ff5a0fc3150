pub mod apply;
pub mod ledger;
pub mod scanner;
pub mod workflow;

pub use apply::{apply_operation, apply_plan, ApplyReport, TransferMode};
pub use ledger::{ProcessedLog, LEDGER_FILE_NAME};
pub use scanner::{ScannerQuery, ScannerService, SpoolScanner};
pub use workflow::{
    CheckReport, CompleteOutcome, PullOutcome, PullRequest, PullSummary, SyncFailure, SyncReport,
    Workflow, Workspace,
};
