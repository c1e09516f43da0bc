//! Command-line front end for the case-encoding pipeline.
//!
//! ## Subcommands
//!
//! - `encode`  : statistics pass + encoding of a raw event log into `<output>/`
//! - `decode`  : rebuild raw values from `<output>/cases.bin` and the descriptor
//! - `prepare` : slice encoded cases into persisted prefix/suffix pairs
//! - `inspect` : print the descriptor of an encoded log
//!
//! ## Usage
//!
//! ```sh
//! cargo run --release --bin caseflow -- encode --input log.csv --output out \
//!     --editors SosForAll,EosForAll --auto-covariates
//! cargo run --release --bin caseflow -- prepare --output out --batch-size 64
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{HumanCount, HumanDuration, ProgressBar, ProgressStyle};
use tracing::info;

use caseflow::codec::{auto_covariate_codecs, Codec, CodecKind, CodecManager};
use caseflow::common::{ACTIVITY_COLUMN, CASE_ID_COLUMN, END_TIMESTAMP_COLUMN, TIMESTAMP_COLUMN};
use caseflow::editor::EditorChain;
use caseflow::orchestrator::{Orchestrator, OrchestratorConfig};
use caseflow::reader::infer_column_types;
use caseflow::slicer::{Padding, Slicer, SlicerConfig, Split};

// ============================================================================
// CLI
// ============================================================================

#[derive(Parser, Debug)]
#[command(about = "Encode process-mining event logs for sequence prediction")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the statistics pass and write encoded cases.
    Encode(EncodeArgs),
    /// Decode `cases.bin` back to raw values.
    Decode(OutputArgs),
    /// Persist prefix/suffix pairs and report epoch sizes.
    Prepare(PrepareArgs),
    /// Print the descriptor of an encoded log.
    Inspect(OutputArgs),
}

#[derive(Args, Debug)]
struct EncodeArgs {
    /// Raw event log (CSV with header: case, activity, timestamp[, end timestamp], covariates...).
    #[arg(long)]
    input: PathBuf,

    /// Output directory.
    #[arg(long)]
    output: PathBuf,

    /// Rows per chunk.
    #[arg(long, default_value_t = 10_000)]
    chunk_size: usize,

    /// Column 3 is an end timestamp.
    #[arg(long, default_value_t = false)]
    double_timestamps: bool,

    /// Extra date columns beyond the timestamp columns.
    #[arg(long, value_delimiter = ',')]
    dates: Vec<usize>,

    /// Case editors, applied in order (SosForAll, EosForAll).
    #[arg(long, value_delimiter = ',')]
    editors: Vec<String>,

    /// Infer covariate codecs from column types.
    #[arg(long, default_value_t = false)]
    auto_covariates: bool,

    /// Also write `encoded.csv`.
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// Also write the edited raw cases to `edited.csv`.
    #[arg(long, default_value_t = false)]
    export_edited: bool,
}

#[derive(Args, Debug)]
struct OutputArgs {
    /// Directory written by `encode`.
    #[arg(long)]
    output: PathBuf,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PaddingArg {
    Trailing,
    Leading,
}

#[derive(Args, Debug)]
struct PrepareArgs {
    /// Directory written by `encode`.
    #[arg(long)]
    output: PathBuf,

    #[arg(long, default_value_t = 32)]
    batch_size: usize,

    #[arg(long, value_enum, default_value_t = PaddingArg::Trailing)]
    padding: PaddingArg,

    /// Seed for the train/validation/test draw.
    #[arg(long, default_value_t = 123)]
    split_seed: u64,
}

// ============================================================================
// Helpers
// ============================================================================

fn spinner(message: &'static str) -> Result<ProgressBar, Box<dyn std::error::Error>> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::with_template("  {spinner} {msg} [{elapsed_precise}]")?);
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(120));
    Ok(pb)
}

fn codecs_for(
    args: &EncodeArgs,
    dates: &[usize],
) -> Result<CodecManager, Box<dyn std::error::Error>> {
    let mut codecs: Vec<Box<dyn Codec>> = vec![
        CodecKind::Delete.build(CASE_ID_COLUMN, false),
        CodecKind::OneHot.build(ACTIVITY_COLUMN, true),
        CodecKind::TimeDelta.build(TIMESTAMP_COLUMN, false),
    ];
    let mut skip = TIMESTAMP_COLUMN + 1;
    if args.double_timestamps {
        codecs.push(CodecKind::TimeDelta.build(END_TIMESTAMP_COLUMN, false));
        skip = END_TIMESTAMP_COLUMN + 1;
    }
    if args.auto_covariates {
        let types = infer_column_types(&args.input, args.chunk_size, dates)?;
        for (i, t) in types.iter().enumerate().skip(skip) {
            info!("  column {i}: {t:?}");
        }
        codecs.extend(auto_covariate_codecs(&types, skip));
    }
    Ok(CodecManager::new(codecs)?)
}

// ============================================================================
// Subcommands
// ============================================================================

fn encode(args: EncodeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let start = std::time::Instant::now();
    info!("Input:  {}", args.input.display());
    info!("Output: {}", args.output.display());

    let mut dates = vec![TIMESTAMP_COLUMN];
    if args.double_timestamps {
        dates.push(END_TIMESTAMP_COLUMN);
    }
    for d in &args.dates {
        if !dates.contains(d) {
            dates.push(*d);
        }
    }

    info!("Step 1: Selecting codecs...");
    let codecs = codecs_for(&args, &dates)?;
    let editors = EditorChain::from_names(args.editors.as_slice())
        .map_err(|name| format!("unknown editor '{name}'"))?;
    info!("  {} codecs, editors: {:?}", codecs.len(), editors.names());

    info!("Step 2: Statistics pass...");
    let config = OrchestratorConfig {
        input_path: args.input.clone(),
        output_dir: args.output.clone(),
        chunk_size: args.chunk_size,
        date_columns: dates,
        double_timestamps: args.double_timestamps,
    };
    let pb = spinner("Analyzing")?;
    let orchestrator = Orchestrator::build(config, codecs, editors)?;
    pb.finish_and_clear();
    info!(
        "  {} cases in {} chunks, {} features, max case length {}",
        HumanCount(orchestrator.metadata().case_count as u64),
        orchestrator.metadata().chunk_count,
        orchestrator.metadata().feature_count,
        orchestrator.metadata().max_case_length
    );

    info!("Step 3: Encoding cases...");
    let pb = spinner("Encoding")?;
    let written = orchestrator.encode_to_disk(args.debug)?;
    pb.finish_and_clear();
    info!("  Wrote {} cases", HumanCount(written as u64));

    if args.export_edited {
        info!("Step 4: Exporting edited cases...");
        let path = orchestrator.export_edited()?;
        info!("  Wrote {}", path.display());
    }

    info!("Encoding complete in {}!", HumanDuration(start.elapsed()));
    Ok(())
}

fn decode(args: OutputArgs) -> Result<(), Box<dyn std::error::Error>> {
    let orchestrator = Orchestrator::load(&args.output)?;
    let pb = spinner("Decoding")?;
    let count = orchestrator.decode_to_disk()?;
    pb.finish_and_clear();
    info!("Decoded {} cases into {}", HumanCount(count as u64), args.output.display());
    Ok(())
}

fn prepare(args: PrepareArgs) -> Result<(), Box<dyn std::error::Error>> {
    let orchestrator = Orchestrator::load(&args.output)?;
    let config = SlicerConfig {
        batch_size: args.batch_size,
        padding: match args.padding {
            PaddingArg::Trailing => Padding::Trailing,
            PaddingArg::Leading => Padding::Leading,
        },
        split_seed: args.split_seed,
        ..SlicerConfig::default()
    };
    let slicer = Slicer::new(&orchestrator, config)?;

    info!("Step 1: Slicing cases into prefix/suffix pairs...");
    let pb = spinner("Slicing")?;
    let pairs = slicer.persist_pairs()?;
    pb.finish_and_clear();
    info!("  {} pairs", HumanCount(pairs as u64));

    info!("Step 2: Counting epoch sizes...");
    for split in [Split::Train, Split::Validation, Split::Test] {
        let size = slicer.epoch_size_offline(Some(split))?;
        let batches = size.div_ceil(args.batch_size);
        info!("  {split:?}: {} pairs, {batches} batches", HumanCount(size as u64));
    }
    Ok(())
}

fn inspect(args: OutputArgs) -> Result<(), Box<dyn std::error::Error>> {
    let orchestrator = Orchestrator::load(&args.output)?;
    println!("{}", orchestrator.metadata());
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    match Cli::parse().command {
        Command::Encode(args) => encode(args),
        Command::Decode(args) => decode(args),
        Command::Prepare(args) => prepare(args),
        Command::Inspect(args) => inspect(args),
    }
}
