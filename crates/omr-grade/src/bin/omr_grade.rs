//! Grade a batch of scanned answer sheets from the command line.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::{error, info, LevelFilter};

use omr_grade::batch::{BatchProcessor, SheetInput};
use omr_grade::core::{init_with_level, AnswerKey, OptionAlphabet, SubjectMap, TemplateGeometry};
use omr_grade::pipeline::PipelineParams;

#[cfg(feature = "tracing")]
use omr_grade::core::init_tracing;

#[derive(Parser, Debug)]
#[command(name = "omr-grade", about = "Score scanned OMR answer sheets")]
struct Args {
    /// Sheet images (PNG/JPEG).
    #[arg(required = true)]
    images: Vec<PathBuf>,

    /// Answer key file, rows of `<question> - <option>`. Without it a
    /// deterministic demo key is used.
    #[arg(long)]
    key: Option<PathBuf>,

    /// Template geometry JSON (origin, pitch, radius bounds, alphabet).
    #[arg(long)]
    template: PathBuf,

    /// Subject ranges JSON; empty map when omitted.
    #[arg(long)]
    subjects: Option<PathBuf>,

    /// Pipeline parameter JSON overrides.
    #[arg(long)]
    params: Option<PathBuf>,

    /// Demo key size when --key is omitted.
    #[arg(long, default_value_t = 100)]
    questions: u32,

    /// Write the full batch result as JSON.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Write summary CSV rows.
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Increase verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let template: TemplateGeometry = serde_json::from_str(&fs::read_to_string(&args.template)?)?;
    let alphabet: OptionAlphabet = template.alphabet.clone();

    let key = match &args.key {
        Some(path) => AnswerKey::parse(&fs::read_to_string(path)?, &alphabet)?,
        None => {
            info!("no --key given, using demo key with {} questions", args.questions);
            AnswerKey::demo(args.questions, &alphabet)
        }
    };

    let subjects = match &args.subjects {
        Some(path) => serde_json::from_str(&fs::read_to_string(path)?)?,
        None => SubjectMap::new(Vec::new())?,
    };

    let params: PipelineParams = match &args.params {
        Some(path) => serde_json::from_str(&fs::read_to_string(path)?)?,
        None => PipelineParams::default(),
    };

    let mut sheets = Vec::with_capacity(args.images.len());
    for path in &args.images {
        let id = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned());
        let bytes = fs::read(path)?;
        sheets.push(SheetInput {
            student_id: id,
            bytes,
        });
    }

    let processor = BatchProcessor::new(key, subjects, template, params);
    let batch = processor.process(&sheets);

    for sheet in &batch.sheets {
        info!(
            "{}: total={} confidence={}% status={:?} flagged={}",
            sheet.student_id,
            sheet.total_score,
            sheet.confidence,
            sheet.status,
            sheet.flagged_for_review
        );
    }

    if let Some(path) = &args.out {
        fs::write(path, serde_json::to_string_pretty(&batch)?)?;
        info!("wrote {}", path.display());
    }
    if let Some(path) = &args.csv {
        let mut csv = batch.csv_rows(processor.subjects()).join("\n");
        csv.push('\n');
        fs::write(path, csv)?;
        info!("wrote {}", path.display());
    }

    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    let level = match args.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let _ = init_with_level(level);
    #[cfg(feature = "tracing")]
    init_tracing(level);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
