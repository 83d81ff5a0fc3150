use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use mritool_core::{
    exam_rows, plan_auxiliary_files, plan_sort, render_check_summary, sort_series, staged_exams,
    CommandDecoder, Decoders, DicomDecoder, ExamFilter, ExamMetadata, HeaderDecoder, Plan,
    RawPolicy, ReconcileOptions,
};
use mritool_service::{
    apply_plan, CompleteOutcome, PullOutcome, PullRequest, ScannerQuery, ScannerService,
    SpoolScanner, TransferMode, Workflow, Workspace,
};
use serde::Serialize;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "mritool",
    version,
    about = "Finds and copies exam data into a well-organized folder structure."
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Args)]
struct GlobalArgs {
    /// Staging folder for research exams.
    #[arg(long, global = true, env = "MRITOOL_INPROCESS_DIR", default_value = "./output/inprocess")]
    inprocess_dir: PathBuf,

    /// Archive folder for completed exams.
    #[arg(long, global = true, env = "MRITOOL_PROCESSED_DIR", default_value = "./output/processed")]
    processed_dir: PathBuf,

    /// Folder for exams that are not research bookings.
    #[arg(long, global = true, env = "MRITOOL_TECH_DIR", default_value = "./output/tech")]
    tech_dir: PathBuf,

    #[arg(long, global = true, env = "MRITOOL_DAILYQC_DIR", default_value = "./output/DailyQC")]
    dailyqc_dir: PathBuf,

    /// Pool of raw scanner files (pfiles) searched during matching.
    #[arg(long, global = true, env = "MRITOOL_RAW_DIR", default_value = "./input/scanner")]
    pfile_dir: PathBuf,

    #[arg(long, global = true, env = "MRITOOL_LOGS_DIR", default_value = "./output/logs")]
    log_dir: PathBuf,

    /// Local DICOM export spool standing in for the scanner.
    #[arg(long, global = true, env = "MRITOOL_SPOOL_DIR", default_value = "./input/spool")]
    spool_dir: PathBuf,

    /// Header dump program run on candidate pfiles.
    #[arg(long, global = true, env = "MRITOOL_PFILE_DUMP", default_value = "pfile-dump")]
    pfile_dump: String,

    /// Only consider pfiles whose path contains this marker (e.g. `Pfiles_`).
    #[arg(long, global = true, value_name = "MARKER")]
    pfile_marker: Option<String>,

    /// Copy raw spiral pfiles into this folder instead of ignoring them.
    #[arg(long, global = true, value_name = "DIR")]
    raw_backup_dir: Option<PathBuf>,

    /// Show progress detail.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Show everything, including skipped files.
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Pull an exam (or one series) from the scanner into its staging folder.
    Pull(PullArgs),
    /// Check a staged exam for missing series, images and pfiles.
    Check(CheckArgs),
    /// Check a staged exam and move it, read-only, into the processed folder.
    Complete(CompleteArgs),
    /// List exams on the scanner.
    ListExams(ListExamsArgs),
    /// List the series of a scanner exam.
    ListSeries(ExamArg),
    /// List exams staged in the in-process folder.
    ListInprocess,
    /// Pull every scanner exam not pulled before.
    SyncExams(SyncArgs),
    /// Print every header field of a pfile.
    PfileHeaders(PfileHeadersArgs),
    /// Sort loose DICOM files into series folders.
    Sort(SortArgs),
    /// Copy the pfiles of an exam into its sorted folder.
    Match(MatchArgs),
}

#[derive(Debug, Args)]
struct ExamArg {
    exam: String,
}

#[derive(Debug, Args)]
struct PullArgs {
    exam: String,
    series: Option<String>,

    /// Output folder, bypassing routing by study description.
    #[arg(short = 'o', long = "output", value_name = "DIR")]
    output: Option<PathBuf>,

    /// Skip pfile matching.
    #[arg(long)]
    bare: bool,
}

#[derive(Debug, Args)]
struct CheckArgs {
    exam: String,

    /// Optional markdown summary output file.
    #[arg(long, value_name = "FILE")]
    md: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct CompleteArgs {
    exam: String,

    /// Archive even when checks fail or the destination exists.
    #[arg(long)]
    force: bool,
}

#[derive(Debug, Args)]
struct ListExamsArgs {
    /// Booking code glob.
    #[arg(short = 'b', value_name = "GLOB")]
    booking: Option<String>,

    /// Exam number glob.
    #[arg(short = 'e', value_name = "GLOB")]
    exam: Option<String>,

    /// Exam date glob (YYYYMMDD).
    #[arg(short = 'd', value_name = "GLOB")]
    date: Option<String>,
}

#[derive(Debug, Args)]
struct SyncArgs {
    /// Optional JSON output file for the sync summary.
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct PfileHeadersArgs {
    file: PathBuf,
}

#[derive(Debug, Args)]
struct SortArgs {
    unsorted_dir: PathBuf,
    sorted_dir: PathBuf,

    /// Print the planned operations without touching any file.
    #[arg(long)]
    dry_run: bool,

    /// Move files instead of copying them.
    #[arg(long = "move")]
    move_files: bool,
}

#[derive(Debug, Args)]
struct MatchArgs {
    exam_dir: PathBuf,
    exam: String,

    /// Print the planned operations without touching any file.
    #[arg(long)]
    dry_run: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.global.verbose, cli.global.debug);

    let app = App::new(&cli.global);
    match cli.command {
        Commands::Pull(args) => run_pull_command(&app, args),
        Commands::Check(args) => run_check_command(&app, args),
        Commands::Complete(args) => run_complete_command(&app, args),
        Commands::ListExams(args) => run_list_exams_command(&app, args),
        Commands::ListSeries(args) => run_list_series_command(&app, args),
        Commands::ListInprocess => {
            run_list_inprocess_command(&app);
            Ok(())
        }
        Commands::SyncExams(args) => run_sync_command(&app, args),
        Commands::PfileHeaders(args) => {
            run_pfile_headers_command(&app, args);
            Ok(())
        }
        Commands::Sort(args) => run_sort_command(&app, args),
        Commands::Match(args) => run_match_command(&app, args),
    }
}

/// Everything a command needs, built once from the global arguments.
struct App {
    workspace: Workspace,
    options: ReconcileOptions,
    scanner: SpoolScanner,
    dicom: DicomDecoder,
    pfile: CommandDecoder,
}

impl App {
    fn new(args: &GlobalArgs) -> Self {
        let raw_policy = match &args.raw_backup_dir {
            Some(dir) => RawPolicy::Backup { dir: dir.clone() },
            None => RawPolicy::Ignore,
        };
        Self {
            workspace: Workspace {
                inprocess_dir: args.inprocess_dir.clone(),
                processed_dir: args.processed_dir.clone(),
                tech_dir: args.tech_dir.clone(),
                dailyqc_dir: args.dailyqc_dir.clone(),
                pfile_dir: args.pfile_dir.clone(),
                log_dir: args.log_dir.clone(),
            },
            options: ReconcileOptions {
                raw_policy,
                pfile_folder_marker: args.pfile_marker.clone(),
                ..ReconcileOptions::default()
            },
            scanner: SpoolScanner::new(&args.spool_dir, Box::new(DicomDecoder)),
            dicom: DicomDecoder,
            pfile: CommandDecoder::new(&args.pfile_dump),
        }
    }

    fn decoders(&self) -> Decoders<'_> {
        Decoders {
            dicom: &self.dicom,
            pfile: &self.pfile,
        }
    }

    fn workflow(&self) -> Workflow<'_> {
        Workflow {
            workspace: &self.workspace,
            scanner: &self.scanner,
            decoders: self.decoders(),
            options: &self.options,
        }
    }
}

fn run_pull_command(app: &App, args: PullArgs) -> Result<()> {
    let request = PullRequest {
        exam_id: args.exam,
        series_number: args.series,
        output_dir: args.output,
        bare: args.bare,
    };

    let PullOutcome::Pulled(summary) = app.workflow().pull_exam(&request)? else {
        return Ok(());
    };

    println!(
        "Pulled exam {} into {}: {} image(s), {} pfile(s).",
        summary.exam_id,
        summary.exam_dir.display(),
        summary.images,
        summary.auxiliary_files
    );
    for warning in &summary.warnings {
        println!("Warning: {}", warning);
    }
    for discrepancy in &summary.discrepancies {
        println!("Warning: {}", discrepancy);
    }
    Ok(())
}

fn run_check_command(app: &App, args: CheckArgs) -> Result<()> {
    let report = app.workflow().check_inprocess(&args.exam)?;

    if report.is_clean() {
        println!("All dicom files present for exam {}", report.exam_id);
    } else {
        for discrepancy in &report.discrepancies {
            println!("Exam {}: {}", report.exam_id, discrepancy);
        }
    }

    if let Some(md_path) = args.md {
        let markdown = render_check_summary(
            &report.exam_id,
            &report.exam_dir.display().to_string(),
            &report.discrepancies,
        );
        fs::write(&md_path, markdown).with_context(|| {
            format!("failed to write markdown summary to {}", md_path.display())
        })?;
        println!("Markdown summary written to {}", md_path.display());
    }

    Ok(())
}

fn run_complete_command(app: &App, args: CompleteArgs) -> Result<()> {
    match app.workflow().complete_exam(&args.exam, args.force)? {
        CompleteOutcome::Archived {
            destination,
            discrepancies,
        } => {
            for discrepancy in &discrepancies {
                println!("Warning: {}", discrepancy);
            }
            println!("Exam {} archived to {}", args.exam, destination.display());
        }
        CompleteOutcome::DestinationExists { destination } => {
            println!("{} already exists; exam {} left in place.", destination.display(), args.exam);
        }
        CompleteOutcome::Refused { discrepancies } => {
            for discrepancy in &discrepancies {
                println!("Warning: {}", discrepancy);
            }
            println!(
                "Not packaging exam {} because of warnings. Use --force to do it anyway",
                args.exam
            );
        }
    }
    Ok(())
}

fn run_list_exams_command(app: &App, args: ListExamsArgs) -> Result<()> {
    let filter = ExamFilter::new(
        args.booking.as_deref(),
        args.exam.as_deref(),
        args.date.as_deref(),
    )?;
    let exams = app.scanner.exams(&ScannerQuery::AllExams)?;
    let rows = exam_rows(
        exams,
        &filter,
        &app.workspace.inprocess_dir,
        &app.options.naming,
    );

    let mut table = vec![exam_header(&["Staged"])];
    for row in rows {
        let mut cells = exam_cells(&row.exam);
        cells.push(if row.staged { "yes" } else { "no" }.to_string());
        table.push(cells);
    }
    print_table(&table);
    Ok(())
}

fn run_list_series_command(app: &App, args: ExamArg) -> Result<()> {
    let series = sort_series(app.scanner.series(&args.exam)?);

    let mut table = vec![vec![
        "SeriesNumber".to_string(),
        "SeriesDescription".to_string(),
        "ImagesInAcquisition".to_string(),
    ]];
    for item in series {
        table.push(vec![
            item.series_number,
            item.series_description.unwrap_or_default(),
            item.images_in_acquisition
                .map(|count| count.to_string())
                .unwrap_or_default(),
        ]);
    }
    print_table(&table);
    Ok(())
}

fn run_list_inprocess_command(app: &App) {
    let mut table = vec![["Path".to_string()]
        .into_iter()
        .chain(exam_header(&[]))
        .collect::<Vec<_>>()];
    for staged in staged_exams(&app.dicom, &app.workspace.inprocess_dir) {
        let mut cells = vec![staged.path.display().to_string()];
        cells.extend(exam_cells(&staged.exam));
        table.push(cells);
    }
    print_table(&table);
}

fn run_sync_command(app: &App, args: SyncArgs) -> Result<()> {
    let report = app.workflow().sync_exams()?;

    println!(
        "Sync {} ({}): {} pulled, {} already pulled, {} service exam(s) skipped, {} failed.",
        report.run_id,
        report.started_at,
        report.pulled.len(),
        report.already_pulled.len(),
        report.service_exams.len(),
        report.failed.len()
    );
    for failure in &report.failed {
        println!("- exam {}: {}", failure.exam_id, failure.error);
    }

    if let Some(output) = args.output {
        write_json(&output, &report)?;
        println!("Sync JSON written to {}", output.display());
    }
    Ok(())
}

fn run_pfile_headers_command(app: &App, args: PfileHeadersArgs) {
    let headers = match app.pfile.decode(&args.file) {
        Ok(headers) => headers,
        Err(err) => {
            warn!("{} is not a pfile. ({})", args.file.display(), err);
            return;
        }
    };

    let mut table = vec![vec!["Header".to_string(), "Value".to_string()]];
    for (key, value) in headers.iter() {
        table.push(vec![key.clone(), value.clone()]);
    }
    println!();
    print_table(&table);
    println!();
}

fn run_sort_command(app: &App, args: SortArgs) -> Result<()> {
    let plan = plan_sort(
        &app.dicom,
        &args.unsorted_dir,
        &args.sorted_dir,
        &app.options,
    );
    let mode = if args.move_files {
        TransferMode::Move
    } else {
        TransferMode::Copy
    };
    execute_plan(&plan, args.dry_run, mode)
}

fn run_match_command(app: &App, args: MatchArgs) -> Result<()> {
    let plan = plan_auxiliary_files(
        &app.pfile,
        &app.workspace.pfile_dir,
        &args.exam_dir,
        &args.exam,
        &app.options,
    );
    execute_plan(&plan, args.dry_run, TransferMode::Copy)
}

fn execute_plan(plan: &Plan, dry_run: bool, mode: TransferMode) -> Result<()> {
    for warning in &plan.warnings {
        println!("Warning: {}", warning);
    }
    if dry_run {
        for op in &plan.operations {
            println!("{} -> {}", op.source.display(), op.destination.display());
        }
        println!("{} operation(s) planned; nothing written.", plan.operations.len());
        return Ok(());
    }

    let report = apply_plan(plan, mode)?;
    println!("{} file(s) written ({} bytes).", report.files, report.bytes);
    Ok(())
}

fn exam_header(extra: &[&str]) -> Vec<String> {
    ["StudyID", "StudyDate", "PatientID", "StudyDescription", "PatientName"]
        .iter()
        .chain(extra)
        .map(|name| name.to_string())
        .collect()
}

fn exam_cells(exam: &ExamMetadata) -> Vec<String> {
    [
        &exam.exam_id,
        &exam.exam_date,
        &exam.patient_id,
        &exam.study_description,
        &exam.patient_name,
    ]
    .into_iter()
    .map(|value| value.clone().unwrap_or_default())
    .collect()
}

/// Left-aligned columns with a dashed rule under the header row.
fn print_table(rows: &[Vec<String>]) {
    let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
    let widths = (0..columns)
        .map(|column| {
            rows.iter()
                .filter_map(|row| row.get(column))
                .map(|cell| cell.chars().count())
                .max()
                .unwrap_or(0)
        })
        .collect::<Vec<_>>();

    for (index, row) in rows.iter().enumerate() {
        let line = row
            .iter()
            .zip(&widths)
            .map(|(cell, &width)| format!("{cell:<width$}"))
            .collect::<Vec<_>>()
            .join("  ");
        println!("{}", line.trim_end());
        if index == 0 {
            let rule = widths
                .iter()
                .map(|width| "-".repeat(*width))
                .collect::<Vec<_>>()
                .join("  ");
            println!("{}", rule);
        }
    }
}

fn write_json(path: &Path, value: &impl Serialize) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("failed to serialize output")?;
    fs::write(path, payload).with_context(|| format!("failed to write {}", path.display()))
}

fn init_tracing(verbose: bool, debug: bool) {
    let default_level = if debug {
        "trace"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
