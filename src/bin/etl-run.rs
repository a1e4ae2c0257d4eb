//! etl-run: push uploaded files through the pipeline and print each result as JSON.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};

use dynamic_etl::adapter::{Adapter, AdapterOptions, PipelineResult};
use dynamic_etl::batch::{BatchJob, BatchOptions, BatchRunner};
use dynamic_etl::config::load_config;
use dynamic_etl::extract::SheetSelection;
use dynamic_etl::load::{Destination, DestinationConfig, WriteMode};
use dynamic_etl::observability::{CompositeObserver, FileObserver, PipelineObserver, Severity, TracingObserver};
use dynamic_etl::schema::SchemaRegistry;
use dynamic_etl::telemetry::init_tracing;
use dynamic_etl::transform::parse_transform_spec;
use dynamic_etl::types::RawUpload;

/// Extract, transform and load tabular files of any supported format.
#[derive(Parser, Debug)]
#[command(name = "etl-run", version, about, long_about = None)]
struct Cli {
    /// Files to process; several files run as one batch
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Transform spec as JSON, e.g. '[{"drop_column":"name"}]'
    #[arg(short, long, conflicts_with = "steps_file")]
    steps: Option<String>,

    /// Read the transform spec from a JSON file
    #[arg(long)]
    steps_file: Option<PathBuf>,

    /// Write rows to this JSON-lines file (default: in-memory dry run)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// How the output file combines with existing rows
    #[arg(long, value_enum, default_value_t = Mode::Append)]
    mode: Mode,

    /// Sheet to read from workbooks: a name or a zero-based index
    #[arg(long)]
    sheet: Option<String>,

    /// Force the delimiter of delimited text
    #[arg(long)]
    delimiter: Option<char>,

    /// Source id reported for a single file (default: file stem)
    #[arg(long)]
    source_id: Option<String>,

    /// Configuration file path
    #[arg(short, long, env = "ETL_CONFIG")]
    config: Option<PathBuf>,

    /// Append run events as JSON lines to this file
    #[arg(long)]
    events_log: Option<PathBuf>,

    /// Pretty-print results
    #[arg(long)]
    pretty: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Append,
    Overwrite,
}

impl From<Mode> for WriteMode {
    fn from(m: Mode) -> Self {
        match m {
            Mode::Append => WriteMode::Append,
            Mode::Overwrite => WriteMode::Overwrite,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(message) => {
            eprintln!("etl-run: {message}");
            ExitCode::from(2)
        }
    }
}

/// `Ok(all_succeeded)`; `Err` for problems with the invocation itself.
fn run(cli: Cli) -> Result<bool, String> {
    let config = load_config(cli.config.as_deref()).map_err(|e| format!("config: {e}"))?;
    init_tracing(&config.logging).map_err(|e| format!("logging: {e}"))?;

    let spec_doc: serde_json::Value = match (&cli.steps, &cli.steps_file) {
        (Some(text), _) => serde_json::from_str(text).map_err(|e| format!("--steps: {e}"))?,
        (None, Some(path)) => {
            let text = std::fs::read_to_string(path).map_err(|e| format!("{}: {e}", path.display()))?;
            serde_json::from_str(&text).map_err(|e| format!("{}: {e}", path.display()))?
        }
        (None, None) => serde_json::Value::Array(Vec::new()),
    };

    let mut options = AdapterOptions::from(&config);
    if let Some(sheet) = &cli.sheet {
        options.extract.sheet = match sheet.parse::<usize>() {
            Ok(i) => SheetSelection::Index(i),
            Err(_) => SheetSelection::Name(sheet.clone()),
        };
    }
    if let Some(d) = cli.delimiter {
        let byte = u8::try_from(d).map_err(|_| format!("--delimiter must be a single-byte character, got '{d}'"))?;
        options.extract.delimiter = Some(byte);
    }

    let mut observers: Vec<Arc<dyn PipelineObserver>> = vec![Arc::new(TracingObserver)];
    if let Some(path) = &cli.events_log {
        observers.push(Arc::new(FileObserver::new(path)));
    }
    let adapter = Adapter::new(options)
        .with_observer(Arc::new(CompositeObserver::new(observers)))
        .with_alert_threshold(Severity::Critical)
        .with_schema_registry(Arc::new(SchemaRegistry::new()));

    let destination = Destination::from_config(&match &cli.output {
        Some(path) => DestinationConfig::JsonLines {
            path: path.clone(),
            mode: cli.mode.into(),
        },
        None => DestinationConfig::Memory {
            mode: cli.mode.into(),
        },
    });

    let results = match parse_transform_spec(&spec_doc) {
        Ok(steps) if cli.files.len() > 1 => {
            let jobs = cli
                .files
                .iter()
                .map(|f| Ok(BatchJob::new(read_upload(f)?, steps.clone(), destination.clone())))
                .collect::<Result<Vec<_>, String>>()?;
            let runner = BatchRunner::new(Arc::new(adapter), BatchOptions::from(&config.batch))
                .map_err(|e| format!("worker pool: {e}"))?;
            runner.run(jobs)
        }
        // One file, or a transform spec the adapter will reject for every file.
        _ => cli
            .files
            .iter()
            .map(|f| {
                let mut upload = read_upload(f)?;
                if let (Some(id), 1) = (&cli.source_id, cli.files.len()) {
                    upload = upload.with_source_id(id.clone());
                }
                Ok(adapter.process_document(upload, &spec_doc, &destination))
            })
            .collect::<Result<Vec<_>, String>>()?,
    };

    Ok(results
        .iter()
        .map(|r| print_result(r, cli.pretty))
        .fold(true, |ok, r| ok & r))
}

fn read_upload(path: &Path) -> Result<RawUpload, String> {
    let content = std::fs::read(path).map_err(|e| format!("{}: {e}", path.display()))?;
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    Ok(RawUpload::new(content, filename))
}

/// Print `result`; `true` on success.
fn print_result(result: &PipelineResult, pretty: bool) -> bool {
    let text = if pretty {
        serde_json::to_string_pretty(result)
    } else {
        serde_json::to_string(result)
    };
    match text {
        Ok(t) => println!("{t}"),
        Err(e) => eprintln!("etl-run: cannot serialize result: {e}"),
    }
    result.is_success()
}
