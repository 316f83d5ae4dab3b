use anyhow::{Context, Result};
use clap::Parser;
use image_to_palette_wasm::progress::FnSink;
use image_to_palette_wasm::{
    Algorithm, ExtractionContext, PaletteRequest, ProgressEvent, decode, extract,
};
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::prelude::*;

/// Extract visual color palettes from images.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// One or more input image paths
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// density, median-cut, weighted or centroid
    #[arg(short, long, default_value = "density")]
    algorithm: String,

    /// Number of colors to extract [default: 5, or the config file's value]
    #[arg(short = 'k', long)]
    n_colors: Option<usize>,

    /// JSON request file with full tuning; replaces --algorithm
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// RNG seed for the centroid strategy
    #[arg(long)]
    seed: Option<u64>,

    /// Print one JSON object per image instead of hex lists
    #[arg(long)]
    json: bool,

    /// Print stage events to stderr
    #[arg(long)]
    progress: bool,
}

fn build_request(args: &Args) -> Result<PaletteRequest> {
    let mut request = match &args.config {
        Some(path) => PaletteRequest::from_json_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => PaletteRequest::new(args.algorithm.parse::<Algorithm>()?, 5),
    };
    if let Some(k) = args.n_colors {
        request.target_colors = k;
    }
    if let (Some(seed), Algorithm::Centroid(config)) = (args.seed, &mut request.algorithm) {
        config.seed = Some(seed);
    }
    request.validate()?;
    Ok(request)
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let request = build_request(&args)?;

    for input in &args.inputs {
        let bytes =
            fs::read(input).with_context(|| format!("failed to read {}", input.display()))?;
        let bitmap =
            decode(&bytes).with_context(|| format!("failed to decode {}", input.display()))?;

        let show_progress = args.progress;
        let mut sink = FnSink(move |event: ProgressEvent| {
            if show_progress {
                eprintln!("[{:>3.0}%] {:?}", event.progress * 100.0, event.stage);
            }
            true
        });
        let mut ctx = ExtractionContext::new(&mut sink);
        let colors = extract(&bitmap, &request, &mut ctx).context("palette extraction failed")?;

        let hex: Vec<String> = colors.iter().map(|c| c.to_hex()).collect();
        if args.json {
            let record = serde_json::json!({
                "path": input.display().to_string(),
                "algorithm": request.algorithm.name(),
                "colors": hex,
            });
            println!("{record}");
        } else {
            println!("{}: {}", input.display(), hex.join(" "));
        }
    }

    Ok(())
}
