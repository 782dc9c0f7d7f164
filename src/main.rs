//! RasterFlow CLI - streaming demonstration
//!
//! Streams a synthetic two-band raster through a neighbourhood pipeline
//! and prints the run report as JSON.
//!
//! ```text
//! rasterflow [config.toml] [output.raw]
//! ```

use anyhow::Context;
use log::info;
use rasterflow::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;

const DEMO_WIDTH: u64 = 4096;
const DEMO_HEIGHT: u64 = 4096;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    if matches!(args.get(1).map(String::as_str), Some("help" | "--help" | "-h")) {
        print_usage(&args[0]);
        return Ok(());
    }

    let config = match args.get(1) {
        Some(path) => StreamingConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path))?,
        None => StreamingConfig::ram_budget(64.0),
    }
    .with_env_overrides();
    config.validate()?;

    info!("RasterFlow v{}", rasterflow::VERSION);
    let (mut pipeline, terminal) = demo_pipeline(DEMO_WIDTH, DEMO_HEIGHT)?;
    let mut manager = config.build_manager()?;
    let writer = StreamingWriter::new(config.writer_options().with_observer(|fraction, status| {
        info!("{:>5.1}% {}", fraction * 100.0, status.unwrap_or(""));
    }))?;

    let report = match args.get(2).map(PathBuf::from) {
        Some(path) => {
            let registry = CodecRegistry::with_builtins();
            let mut sink = registry.for_path(&path)?;
            let report = writer.run(&mut pipeline, terminal, manager.as_mut(), sink.as_mut())?;
            info!("Output written to {}", path.display());
            report
        }
        None => {
            let mut sink = MemoryBlockSink::new();
            writer.run(&mut pipeline, terminal, manager.as_mut(), &mut sink)?
        }
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// pattern → mean(2) → (mean + pattern) → × 0.5
fn demo_pipeline(width: u64, height: u64) -> anyhow::Result<(Pipeline, NodeHandle)> {
    let info = ImageInfo::new(Region::from_size(width, height), 2, SampleType::F32);
    let mut pipeline = Pipeline::new();
    let source = pipeline.add_source(Arc::new(PatternSource::new(info, |x, y, band| {
        ((x * 7 + y * 13 + band as i64 * 29) % 256) as f64
    })));
    let mean = pipeline.add_stage(MeanFilterStage::new(2), &[source])?;
    let sum = pipeline.add_stage(BandMathStage::sum(2), &[mean, source])?;
    let half = pipeline.add_stage(PixelMapStage::linear(0.5, 0.0), &[sum])?;
    pipeline.set_label(half, "average")?;
    Ok((pipeline, half))
}

fn print_usage(program: &str) {
    println!("Usage: {} [config.toml] [output.raw]", program);
    println!();
    println!("Without a configuration a 64 MB RAM budget is used.");
    println!("Without an output path the result is assembled in memory.");
    println!();
    println!("Environment:");
    println!("  RUST_LOG            log level (default: info)");
    println!("  RASTERFLOW_RAM_MB   memory budget override in megabytes");
    println!("  RASTERFLOW_THREADS  worker pool size override");
}
