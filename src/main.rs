use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use serde::Serialize;

use ssam_core::{AnalysisConfig, Conflict, ConflictEngine, TrjReader};

#[derive(Parser, Debug)]
#[command(name = "ssam")]
#[command(about = "Surrogate safety analysis of recorded vehicle trajectories", long_about = None)]
struct Args {
    /// Trajectory (.trj) files to analyze
    #[arg(value_name = "TRJ_FILE", required = true)]
    trj_files: Vec<PathBuf>,

    /// JSON configuration file with analysis thresholds
    #[arg(long)]
    config: Option<PathBuf>,

    /// Maximum time-to-collision in seconds
    #[arg(long)]
    max_ttc: Option<f32>,

    /// Maximum post-encroachment time in seconds
    #[arg(long)]
    max_pet: Option<f32>,

    /// Rear-end angle threshold in degrees
    #[arg(long)]
    rear_end_angle: Option<f32>,

    /// Crossing angle threshold in degrees
    #[arg(long)]
    crossing_angle: Option<f32>,

    /// Compute the probabilistic measures P(UEA), mTTC and mPET
    #[arg(long)]
    probabilistic: bool,

    /// Worker threads for the detection pass
    #[arg(long)]
    workers: Option<usize>,

    /// Fixed RNG seed for reproducible probabilistic measures
    #[arg(long)]
    seed: Option<u64>,

    /// Output JSON path
    #[arg(long, default_value = "ssam_results.json")]
    output: PathBuf,
}

#[derive(Serialize)]
struct AnalysisOutput<'a> {
    generated_at: String,
    config: &'a AnalysisConfig,
    sources: Vec<String>,
    analysis_seconds: f64,
    conflicts: &'a [Conflict],
    summary: &'a ssam_core::SafetySummary,
}

fn load_config(args: &Args) -> Result<AnalysisConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => AnalysisConfig::default(),
    };
    if let Some(v) = args.max_ttc {
        config.max_ttc = v;
    }
    if let Some(v) = args.max_pet {
        config.max_pet = v;
    }
    if let Some(v) = args.rear_end_angle {
        config.rear_end_angle = v;
    }
    if let Some(v) = args.crossing_angle {
        config.crossing_angle = v;
    }
    if args.probabilistic {
        config.probabilistic = true;
    }
    if let Some(v) = args.workers {
        config.workers = v;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    Ok(config)
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let config = load_config(&args)?;

    println!("[{}] SSAM analysis starting", Utc::now().format("%Y-%m-%d %H:%M:%S"));
    println!("  Sources: {}", args.trj_files.len());
    println!("  Max TTC: {} s", config.max_ttc);
    println!("  Max PET: {} s", config.max_pet);
    println!("  Probabilistic measures: {}", config.probabilistic);
    println!("  Workers: {}", config.workers);

    let mut engine = ConflictEngine::new(config.clone())?;

    let mut sources = Vec::new();
    for path in &args.trj_files {
        let name = path.to_string_lossy().into_owned();
        let file = match File::open(path) {
            Ok(f) => f,
            Err(err) => {
                eprintln!("{}: cannot open, skipping: {err}", path.display());
                continue;
            }
        };
        let reader = TrjReader::new(BufReader::new(file));
        // a bad source aborts only its own analysis
        if let Err(err) = engine.analyze_source(&name, reader) {
            eprintln!("{name}: analysis aborted: {err}");
            continue;
        }
        println!(
            "[{}] {}: {} conflicts",
            Utc::now().format("%H:%M:%S"),
            name,
            engine.conflicts_for(&name).len()
        );
        sources.push(name);
    }

    let output = AnalysisOutput {
        generated_at: Utc::now().to_rfc3339(),
        config: &config,
        sources,
        analysis_seconds: engine.analysis_seconds(),
        conflicts: engine.conflicts(),
        summary: engine.summary(),
    };
    let json = serde_json::to_string_pretty(&output)?;
    std::fs::write(&args.output, json)
        .with_context(|| format!("writing {}", args.output.display()))?;

    println!(
        "[{}] Done: {} conflicts across {} file(s), results in {}",
        Utc::now().format("%H:%M:%S"),
        engine.conflicts().len(),
        args.trj_files.len(),
        args.output.display()
    );
    Ok(())
}
