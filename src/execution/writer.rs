//! Streaming writer: the division loop.
//!
//! Divisions are processed strictly one after another. Each is pulled
//! through the [`DemandEngine`] and handed to the sink before the next one
//! starts, so peak memory stays around one division's footprint.
//! Cancellation is honoured only between divisions.

use crate::core::buffer::RasterBuffer;
use crate::core::error::{ConfigurationError, DivisionFailure, IoError, RunError};
use crate::core::region::Region;
use crate::execution::engine::{DemandEngine, EngineOptions, ExecutionStats};
use crate::execution::progress::{CancellationToken, ProgressTracker, ProgressUpdate};
use crate::io::block::{BlockSink, MemoryBlockSink};
use crate::pipeline::graph::{NodeHandle, Pipeline};
use crate::streaming::manager::StreamingManager;
use log::{debug, error, info};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Observer receiving the completed fraction and an optional status.
pub type FractionObserver = dyn Fn(f64, Option<&str>) + Send + Sync;

/// Shared progress listener.
pub type ProgressListener = dyn Fn(ProgressUpdate) + Send + Sync;

/// Writer options.
#[derive(Clone, Default)]
pub struct WriterOptions {
    /// Engine options (worker pool, buffer reuse).
    pub engine: EngineOptions,
    /// Progress callback.
    pub progress_callback: Option<Arc<ProgressListener>>,
    /// Fraction observer.
    pub observer: Option<Arc<FractionObserver>>,
    /// Cancellation token checked between divisions.
    pub cancellation: Option<CancellationToken>,
}

impl std::fmt::Debug for WriterOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterOptions")
            .field("engine", &self.engine)
            .field("progress_callback", &self.progress_callback.as_ref().map(|_| "<callback>"))
            .field("observer", &self.observer.as_ref().map(|_| "<observer>"))
            .field("cancellation", &self.cancellation)
            .finish()
    }
}

impl WriterOptions {
    /// Create a new options builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set engine options.
    pub fn with_engine(mut self, engine: EngineOptions) -> Self {
        self.engine = engine;
        self
    }

    /// Set progress callback.
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressUpdate) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(callback));
        self
    }

    /// Set a fraction observer.
    pub fn with_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(f64, Option<&str>) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Set the cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Manager policy used.
    pub manager: String,
    /// Region written.
    pub region: Region,
    /// Number of divisions processed.
    pub divisions: usize,
    /// Pixels handed to the sink.
    pub pixels_written: u64,
    /// Node executions across all divisions.
    pub nodes_executed: usize,
    /// Node executions avoided by buffer reuse.
    pub nodes_skipped: usize,
    /// Wall-clock duration.
    pub duration: Duration,
}

/// Drives a pipeline division by division into a sink.
#[derive(Debug)]
pub struct StreamingWriter {
    engine: DemandEngine,
    options: WriterOptions,
}

impl Default for StreamingWriter {
    fn default() -> Self {
        Self {
            engine: DemandEngine::default(),
            options: WriterOptions::default(),
        }
    }
}

impl StreamingWriter {
    /// Create a writer.
    pub fn new(options: WriterOptions) -> Result<Self, ConfigurationError> {
        Ok(Self {
            engine: DemandEngine::new(options.engine.clone())?,
            options,
        })
    }

    /// The engine used for each division.
    pub fn engine(&self) -> &DemandEngine {
        &self.engine
    }

    /// Stream the whole output of `terminal` into `sink`.
    ///
    /// On failure the sink is aborted and the error carries the division
    /// index, its region and the node it originated in. Blocks already
    /// written are not rolled back.
    pub fn run(
        &self,
        pipeline: &mut Pipeline,
        terminal: NodeHandle,
        manager: &mut dyn StreamingManager,
        sink: &mut dyn BlockSink,
    ) -> Result<RunReport, RunError> {
        let start = Instant::now();
        let info = self
            .engine
            .update_output_information(pipeline, terminal)
            .map_err(RunError::Setup)?;
        let region = info.extent;
        let total = manager
            .prepare(pipeline, terminal, &region)
            .map_err(RunError::Setup)?;
        info!(
            "Streaming {} in {} divisions ({} manager, {} workers)",
            region,
            total,
            manager.name(),
            self.engine.threads()
        );

        let mut tracker = self.tracker(total);
        tracker.start();

        if let Err(e) = sink.initialize(&info) {
            sink.abort();
            tracker.report_error(None, e.to_string());
            return Err(RunError::Sink(e));
        }

        let mut stats = ExecutionStats::default();
        let mut pixels_written = 0u64;
        for index in 0..total {
            if tracker.is_cancelled() {
                info!("Run cancelled after {}/{} divisions", index, total);
                sink.abort();
                tracker.report_cancelled();
                return Err(RunError::Cancelled {
                    completed: index,
                    total,
                });
            }

            let division = match manager.split(index) {
                Some(division) => division,
                None => {
                    sink.abort();
                    return Err(ConfigurationError::DivisionOutOfRange { index, total }.into());
                }
            };
            debug!("Division {}/{}: {}", index + 1, total, division);
            tracker.division_started(index, division);
            let division_start = Instant::now();

            let outcome = self
                .engine
                .pull_with_stats(pipeline, terminal, &division)
                .map_err(|e| (e.node().cloned(), DivisionFailure::from(e)))
                .and_then(|(block, pass)| {
                    sink.write_block(&division, &block)
                        .map(|_| pass)
                        .map_err(|e| (pipeline.node_ref(terminal).ok(), DivisionFailure::from(e)))
                });

            match outcome {
                Ok(pass) => stats += pass,
                Err((node, source)) => {
                    error!("Division {} ({}) failed: {}", index, division, source);
                    sink.abort();
                    tracker.report_error(Some(index), source.to_string());
                    return Err(RunError::Division {
                        index,
                        region: division,
                        node,
                        source,
                    });
                }
            }

            pixels_written += division.area();
            tracker.division_completed(index, division, division_start.elapsed().as_millis() as u64);
        }

        if let Err(e) = sink.finalize() {
            sink.abort();
            tracker.report_error(None, e.to_string());
            return Err(RunError::Sink(e));
        }
        tracker.complete();

        let report = RunReport {
            manager: manager.name().to_string(),
            region,
            divisions: total,
            pixels_written,
            nodes_executed: stats.nodes_executed,
            nodes_skipped: stats.nodes_skipped,
            duration: start.elapsed(),
        };
        info!(
            "Wrote {} pixels in {} divisions ({} node executions, {} reused) in {:?}",
            report.pixels_written,
            report.divisions,
            report.nodes_executed,
            report.nodes_skipped,
            report.duration
        );
        Ok(report)
    }

    /// Stream into memory and return the assembled output.
    pub fn run_to_buffer(
        &self,
        pipeline: &mut Pipeline,
        terminal: NodeHandle,
        manager: &mut dyn StreamingManager,
    ) -> Result<RasterBuffer, RunError> {
        let mut sink = MemoryBlockSink::new();
        self.run(pipeline, terminal, manager, &mut sink)?;
        sink.into_buffer().ok_or(RunError::Sink(IoError::NotInitialized))
    }

    fn tracker(&self, total: usize) -> ProgressTracker {
        let mut tracker = ProgressTracker::new(total);
        if let Some(token) = &self.options.cancellation {
            tracker = tracker.with_token(token.clone());
        }
        let callback = self.options.progress_callback.clone();
        let observer = self.options.observer.clone();
        if callback.is_some() || observer.is_some() {
            tracker = tracker.with_callback(Box::new(move |update: ProgressUpdate| {
                if let (Some(observer), ProgressUpdate::Progress { fraction, status, .. }) =
                    (&observer, &update)
                {
                    observer(*fraction, status.as_deref());
                }
                if let Some(callback) = &callback {
                    callback(update);
                }
            }));
        }
        tracker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::{IoResult, PipelineError};
    use crate::core::splitter::SplitStrategy;
    use crate::core::types::{ImageInfo, SampleType};
    use crate::io::block::{BlockSource, MemoryBlockSource, PatternSource};
    use crate::io::file::{AtomicFileSink, RawFileSource};
    use crate::stages::{AlignedStage, BandMathStage, MeanFilterStage, PixelMapStage};
    use crate::streaming::budget::MemoryBudget;
    use crate::streaming::manager::{FixedDivisionsManager, RamBudgetManager, TileSizeManager};
    use parking_lot::Mutex;

    fn pattern(x: i64, y: i64, band: usize) -> f64 {
        ((x * 31 + y * 17 + band as i64 * 7) % 251) as f64
    }

    /// source → mean(2) → scale, with the source also fed to a sum.
    fn build_pipeline(width: u64, height: u64) -> (Pipeline, NodeHandle) {
        let info = ImageInfo::new(Region::from_size(width, height), 2, SampleType::F32);
        let mut pipeline = Pipeline::new();
        let source = pipeline.add_source(Arc::new(PatternSource::new(info, pattern)));
        let mean = pipeline.add_stage(MeanFilterStage::new(2), &[source]).unwrap();
        let scaled = pipeline
            .add_stage(PixelMapStage::linear(3.0, -1.0), &[mean])
            .unwrap();
        let sum = pipeline
            .add_stage(BandMathStage::sum(2), &[scaled, source])
            .unwrap();
        (pipeline, sum)
    }

    fn single_pass(width: u64, height: u64) -> RasterBuffer {
        let (mut pipeline, terminal) = build_pipeline(width, height);
        StreamingWriter::default()
            .run_to_buffer(&mut pipeline, terminal, &mut FixedDivisionsManager::single_pass())
            .unwrap()
    }

    /// Sink failing on its `fail_at`-th write.
    #[derive(Default)]
    struct FailingSink {
        fail_at: usize,
        writes: usize,
        aborted: bool,
    }

    impl BlockSink for FailingSink {
        fn initialize(&mut self, _info: &ImageInfo) -> IoResult<()> {
            Ok(())
        }

        fn write_block(&mut self, region: &Region, _data: &RasterBuffer) -> IoResult<()> {
            if self.writes == self.fail_at {
                return Err(IoError::Write {
                    region: *region,
                    source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
                });
            }
            self.writes += 1;
            Ok(())
        }

        fn finalize(&mut self) -> IoResult<()> {
            Ok(())
        }

        fn abort(&mut self) {
            self.aborted = true;
        }
    }

    /// Source failing on any read touching row `bad_row`.
    struct FlakySource {
        inner: PatternSource,
        bad_row: i64,
    }

    impl BlockSource for FlakySource {
        fn info(&self) -> ImageInfo {
            self.inner.info()
        }

        fn read_block(&self, region: &Region) -> IoResult<RasterBuffer> {
            if region.y <= self.bad_row && self.bad_row < region.bottom() {
                return Err(IoError::Read {
                    region: *region,
                    source: std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "truncated"),
                });
            }
            self.inner.read_block(region)
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    /// Sink checking every block against `pattern` without storing it.
    #[derive(Default)]
    struct VerifyingSink {
        rows: u64,
        mismatches: usize,
    }

    impl BlockSink for VerifyingSink {
        fn initialize(&mut self, _info: &ImageInfo) -> IoResult<()> {
            Ok(())
        }

        fn write_block(&mut self, region: &Region, data: &RasterBuffer) -> IoResult<()> {
            for y in region.y..region.bottom() {
                for x in region.x..region.right() {
                    if data.get(x, y, 0) != Some(pattern(x, y, 0)) {
                        self.mismatches += 1;
                    }
                }
            }
            self.rows += region.height;
            Ok(())
        }

        fn finalize(&mut self) -> IoResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_streaming_equivalence_for_strips() {
        let expected = single_pass(61, 53);
        for k in [1, 3, 7, 37] {
            let (mut pipeline, terminal) = build_pipeline(61, 53);
            let mut manager = FixedDivisionsManager::new(k, SplitStrategy::Strip).unwrap();
            let output = StreamingWriter::default()
                .run_to_buffer(&mut pipeline, terminal, &mut manager)
                .unwrap();
            assert_eq!(output, expected, "strip streaming with {} divisions", k);
        }
    }

    #[test]
    fn test_streaming_equivalence_for_tiles() {
        let expected = single_pass(61, 53);
        for k in [3, 7, 37] {
            let (mut pipeline, terminal) = build_pipeline(61, 53);
            let mut manager =
                FixedDivisionsManager::new(k, SplitStrategy::Tile { alignment: 4 }).unwrap();
            let writer = StreamingWriter::new(
                WriterOptions::new().with_engine(EngineOptions::new().with_threads(3)),
            )
            .unwrap();
            let output = writer.run_to_buffer(&mut pipeline, terminal, &mut manager).unwrap();
            assert_eq!(output, expected, "tile streaming with {} divisions", k);
        }
    }

    #[test]
    fn test_radius_one_mean_over_five_strips() {
        let data = RasterBuffer::from_fn(Region::from_size(100, 100), 1, |x, y, _| pattern(x, y, 0));
        let source = Arc::new(MemoryBlockSource::new(data));
        let build = || {
            let mut pipeline = Pipeline::new();
            let leaf = pipeline.add_source(source.clone());
            let mean = pipeline.add_stage(MeanFilterStage::new(1), &[leaf]).unwrap();
            (pipeline, mean)
        };

        let (mut pipeline, terminal) = build();
        let expected = StreamingWriter::default()
            .run_to_buffer(&mut pipeline, terminal, &mut FixedDivisionsManager::single_pass())
            .unwrap();

        let (mut pipeline, terminal) = build();
        let mut manager = FixedDivisionsManager::new(5, SplitStrategy::Strip).unwrap();
        let mut sink = MemoryBlockSink::new();
        StreamingWriter::default()
            .run(&mut pipeline, terminal, &mut manager, &mut sink)
            .unwrap();
        assert_eq!(sink.writes().len(), 5);

        let output = sink.into_buffer().unwrap();
        for seam in [19, 20, 39, 40, 59, 60, 79, 80] {
            assert_eq!(output.row(seam), expected.row(seam), "row {}", seam);
        }
        assert_eq!(output, expected);
    }

    #[test]
    fn test_large_synthetic_source_under_ram_budget() {
        let info = ImageInfo::new(Region::from_size(10_000, 10_000), 1, SampleType::F32);
        let mut pipeline = Pipeline::new();
        let source = pipeline.add_source(Arc::new(PatternSource::new(info, pattern)));

        let budget = MemoryBudget::new(64.0, 0.5).unwrap();
        let mut manager = RamBudgetManager::new(budget, SplitStrategy::Strip).unwrap();
        let mut sink = VerifyingSink::default();
        let report = StreamingWriter::default()
            .run(&mut pipeline, source, &mut manager, &mut sink)
            .unwrap();

        assert!(report.divisions >= 12);
        assert_eq!(report.pixels_written, 100_000_000);
        assert_eq!(sink.rows, 10_000);
        assert_eq!(sink.mismatches, 0);
    }

    #[test]
    fn test_cancellation_between_divisions() {
        let (mut pipeline, terminal) = build_pipeline(20, 20);
        let token = CancellationToken::new();
        let trigger = token.clone();
        let options = WriterOptions::new()
            .with_cancellation(token)
            .with_progress(move |update| {
                if let ProgressUpdate::DivisionCompleted { index: 1, .. } = update {
                    trigger.cancel();
                }
            });

        let mut manager = FixedDivisionsManager::new(4, SplitStrategy::Strip).unwrap();
        let mut sink = MemoryBlockSink::new();
        let error = StreamingWriter::new(options)
            .unwrap()
            .run(&mut pipeline, terminal, &mut manager, &mut sink)
            .unwrap_err();

        assert!(matches!(error, RunError::Cancelled { completed: 2, total: 4 }));
        assert_eq!(sink.writes().len(), 2);
        assert!(sink.is_aborted());
        assert!(!sink.is_finalized());
    }

    #[test]
    fn test_sink_failure_reports_division_context() {
        let (mut pipeline, terminal) = build_pipeline(10, 30);
        let mut manager = FixedDivisionsManager::new(3, SplitStrategy::Strip).unwrap();
        let mut sink = FailingSink {
            fail_at: 1,
            ..Default::default()
        };
        let error = StreamingWriter::default()
            .run(&mut pipeline, terminal, &mut manager, &mut sink)
            .unwrap_err();

        assert_eq!(error.division_index(), Some(1));
        assert_eq!(error.region(), Some(Region::new(0, 10, 10, 10)));
        assert_eq!(error.node().map(|n| n.name.as_str()), Some("sum"));
        assert!(matches!(
            error,
            RunError::Division {
                source: DivisionFailure::Io(IoError::Write { .. }),
                ..
            }
        ));
        assert!(sink.aborted);
        assert_eq!(sink.writes, 1);
    }

    #[test]
    fn test_source_failure_names_the_source() {
        let mut pipeline = Pipeline::new();
        let source = pipeline.add_source(Arc::new(FlakySource {
            inner: PatternSource::gradient(8, 40),
            bad_row: 25,
        }));
        let mut manager = FixedDivisionsManager::new(4, SplitStrategy::Strip).unwrap();
        let mut sink = MemoryBlockSink::new();
        let error = StreamingWriter::default()
            .run(&mut pipeline, source, &mut manager, &mut sink)
            .unwrap_err();

        assert_eq!(error.division_index(), Some(2));
        assert_eq!(error.node().map(|n| n.name.as_str()), Some("flaky"));
        assert!(matches!(
            error,
            RunError::Division {
                source: DivisionFailure::Pipeline(PipelineError::Io { .. }),
                ..
            }
        ));
        assert_eq!(sink.writes().len(), 2);
    }

    #[test]
    fn test_observer_sees_monotonic_fractions() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = seen.clone();
        let options = WriterOptions::new().with_observer(move |fraction, status| {
            record.lock().push((fraction, status.map(str::to_string)));
        });

        let (mut pipeline, terminal) = build_pipeline(16, 16);
        let mut manager = FixedDivisionsManager::new(4, SplitStrategy::Strip).unwrap();
        StreamingWriter::new(options)
            .unwrap()
            .run_to_buffer(&mut pipeline, terminal, &mut manager)
            .unwrap();

        let seen = seen.lock();
        let fractions: Vec<f64> = seen.iter().map(|(f, _)| *f).collect();
        assert_eq!(fractions, vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        assert!(seen.iter().all(|(_, status)| status.is_some()));
    }

    #[test]
    fn test_report_counts_and_serializes() {
        let (mut pipeline, terminal) = build_pipeline(12, 12);
        let mut manager = FixedDivisionsManager::new(3, SplitStrategy::Strip).unwrap();
        let mut sink = MemoryBlockSink::new();
        let report = StreamingWriter::default()
            .run(&mut pipeline, terminal, &mut manager, &mut sink)
            .unwrap();

        assert_eq!(report.divisions, 3);
        assert_eq!(report.pixels_written, 144);
        assert_eq!(report.nodes_executed, 12);
        assert_eq!(report.manager, "fixed-divisions");

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["divisions"], 3);
        assert_eq!(json["region"]["width"], 12);
    }

    #[test]
    fn test_aligned_terminal_writes_exact_divisions() {
        let mut pipeline = Pipeline::new();
        let source = pipeline.add_source(Arc::new(PatternSource::gradient(50, 45)));
        let aligned = pipeline.add_stage(AlignedStage::new(16), &[source]).unwrap();

        let mut manager = TileSizeManager::new(10).unwrap();
        let mut sink = MemoryBlockSink::new();
        StreamingWriter::default()
            .run(&mut pipeline, aligned, &mut manager, &mut sink)
            .unwrap();

        let total: u64 = sink.writes().iter().map(|r| r.area()).sum();
        assert_eq!(total, 50 * 45);
        let output = sink.into_buffer().unwrap();
        assert_eq!(
            output,
            RasterBuffer::from_fn(Region::from_size(50, 45), 1, |x, y, _| (x + 50 * y) as f64)
        );
    }

    #[test]
    fn test_atomic_file_output_matches_single_pass() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("streamed.raw");
        let expected = single_pass(24, 18);

        let (mut pipeline, terminal) = build_pipeline(24, 18);
        let mut manager = FixedDivisionsManager::new(5, SplitStrategy::Strip).unwrap();
        let mut sink = AtomicFileSink::new(&path);
        StreamingWriter::default()
            .run(&mut pipeline, terminal, &mut manager, &mut sink)
            .unwrap();

        let written = RawFileSource::open(&path, Region::from_size(24, 18), 2)
            .unwrap()
            .read_block(&Region::from_size(24, 18))
            .unwrap();
        let as_f32: Vec<f64> = expected.data().iter().map(|&v| v as f32 as f64).collect();
        assert_eq!(written.data(), as_f32.as_slice());
    }

    #[test]
    fn test_failed_atomic_run_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never.raw");
        let mut pipeline = Pipeline::new();
        let source = pipeline.add_source(Arc::new(FlakySource {
            inner: PatternSource::gradient(8, 40),
            bad_row: 35,
        }));
        let mut manager = FixedDivisionsManager::new(4, SplitStrategy::Strip).unwrap();
        let mut sink = AtomicFileSink::new(&path);
        let staging = sink.staging_path().to_path_buf();

        assert!(StreamingWriter::default()
            .run(&mut pipeline, source, &mut manager, &mut sink)
            .is_err());
        assert!(!path.exists());
        assert!(!staging.exists());
    }
}
