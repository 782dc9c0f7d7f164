//! Demand-propagation engine.
//!
//! One pass of the engine serves one requested region of a terminal node:
//!
//! 1. output information is propagated source → terminal (once per run)
//! 2. the terminal's requested region is set and demand propagates back
//!    to the leaves, every node recomputing its input requests from scratch
//! 3. nodes execute leaves → terminal, skipping any whose buffered output
//!    is fresh, covers the new request and whose inputs did not re-execute
//! 4. exactly the requested region is extracted from the terminal's buffer
//!
//! Node generation may be split into row bands run on a worker pool; each
//! worker writes a disjoint band of the node's own output and only reads
//! upstream buffers. Requested and buffered regions are only touched by the
//! calling thread.

use crate::core::buffer::RasterBuffer;
use crate::core::error::{ConfigurationError, PipelineError, PipelineResult};
use crate::core::region::Region;
use crate::core::types::ImageInfo;
use crate::pipeline::graph::{NodeHandle, Pipeline};
use crate::pipeline::stage::{Stage, StageInputs};
use crate::pipeline::state::CacheValidity;
use log::{debug, trace};
use rayon::prelude::*;
use std::collections::HashSet;
use std::ops::AddAssign;
use std::sync::Arc;

/// Engine options.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Worker pool size (0 = rayon's global pool).
    pub threads: usize,
    /// Whether fresh buffered output may be reused instead of regenerated.
    pub reuse_buffers: bool,
    /// Rows per worker task (0 = split evenly across the pool).
    pub rows_per_task: u64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            threads: 0,
            reuse_buffers: true,
            rows_per_task: 0,
        }
    }
}

impl EngineOptions {
    /// Create a new options builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the worker pool size.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Enable/disable reuse of fresh buffers.
    pub fn with_reuse_buffers(mut self, reuse: bool) -> Self {
        self.reuse_buffers = reuse;
        self
    }

    /// Set rows per worker task.
    pub fn with_rows_per_task(mut self, rows: u64) -> Self {
        self.rows_per_task = rows;
        self
    }
}

/// Per-pass execution statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionStats {
    /// Number of nodes that generated data.
    pub nodes_executed: usize,
    /// Number of nodes whose buffered output was reused.
    pub nodes_skipped: usize,
}

impl AddAssign for ExecutionStats {
    fn add_assign(&mut self, other: Self) {
        self.nodes_executed += other.nodes_executed;
        self.nodes_skipped += other.nodes_skipped;
    }
}

/// The demand-propagation engine.
pub struct DemandEngine {
    pool: Option<rayon::ThreadPool>,
    options: EngineOptions,
}

impl std::fmt::Debug for DemandEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DemandEngine")
            .field("threads", &self.threads())
            .field("options", &self.options)
            .finish()
    }
}

impl Default for DemandEngine {
    fn default() -> Self {
        Self {
            pool: None,
            options: EngineOptions::default(),
        }
    }
}

impl DemandEngine {
    /// Create an engine, building a dedicated worker pool when
    /// `options.threads > 0`.
    pub fn new(options: EngineOptions) -> Result<Self, ConfigurationError> {
        let pool = if options.threads > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(options.threads)
                .thread_name(|i| format!("rasterflow-worker-{}", i))
                .build()
                .map_err(|e| ConfigurationError::ThreadPool(e.to_string()))?;
            Some(pool)
        } else {
            None
        };
        Ok(Self { pool, options })
    }

    /// Engine options.
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Number of worker threads available to one node.
    pub fn threads(&self) -> usize {
        match &self.pool {
            Some(pool) => pool.current_num_threads(),
            None => rayon::current_num_threads(),
        }
    }

    // ========================================================================
    // Output information
    // ========================================================================

    /// Compute output information for `terminal` and everything upstream.
    ///
    /// A node whose information changed is invalidated together with its
    /// downstream nodes.
    pub fn update_output_information(
        &self,
        pipeline: &mut Pipeline,
        terminal: NodeHandle,
    ) -> PipelineResult<ImageInfo> {
        let order = pipeline.upstream_of(terminal)?;
        for &handle in &order {
            let input_infos = input_infos(pipeline, handle)?;
            let node = pipeline.node(handle)?;
            let info = node
                .stage
                .output_information(&input_infos)
                .map_err(|source| PipelineError::OutputInformation {
                    node: node.node_ref(),
                    source,
                })?;
            if node.state.info != Some(info) {
                trace!("Output information of {} is now {:?}", node.node_ref(), info);
                pipeline.mark_modified(handle)?;
            }
            pipeline.node_mut(handle)?.state.info = Some(info);
        }
        information(pipeline, terminal)
    }

    // ========================================================================
    // Demand propagation
    // ========================================================================

    /// Set `region` as the terminal's requested region and propagate demand
    /// to every upstream node.
    ///
    /// Returns the nodes involved, producers first. Requests from a
    /// previous pass are discarded; a node feeding several consumers is
    /// asked for the bounding union of their requests.
    pub fn propagate_requested_region(
        &self,
        pipeline: &mut Pipeline,
        terminal: NodeHandle,
        region: &Region,
    ) -> PipelineResult<Vec<NodeHandle>> {
        let order = pipeline.upstream_of(terminal)?;
        for &handle in &order {
            pipeline.node_mut(handle)?.state.requested = None;
        }

        let extent = information(pipeline, terminal)?.extent;
        if !extent.contains(region) {
            return Err(PipelineError::BoundaryComputation {
                node: pipeline.node_ref(terminal)?,
                requested: *region,
                available: extent,
            });
        }
        pipeline.node_mut(terminal)?.state.requested = Some(*region);

        for &handle in order.iter().rev() {
            let node = pipeline.node(handle)?;
            let requested = node
                .state
                .requested
                .ok_or_else(|| PipelineError::MissingRequest {
                    node: node.node_ref(),
                })?;
            let stage = Arc::clone(&node.stage);
            let this = node.node_ref();

            for (slot, input) in pipeline.inputs_of(handle)?.into_iter().enumerate() {
                let input_info = information(pipeline, input)?;
                let input_request = stage
                    .input_requested_region(slot, &requested, &input_info)
                    .map_err(|e| PipelineError::from_stage(this.clone(), requested, e))?;
                if !input_request.is_empty() && !input_info.extent.contains(&input_request) {
                    return Err(PipelineError::BoundaryComputation {
                        node: this,
                        requested: input_request,
                        available: input_info.extent,
                    });
                }

                let state = &mut pipeline.node_mut(input)?.state;
                let merged = match state.requested {
                    Some(existing) => existing.union(&input_request),
                    None => input_request,
                };
                trace!(
                    "{} slot {} requests {} (merged {})",
                    stage.name(),
                    slot,
                    input_request,
                    merged
                );
                state.requested = Some(merged);
            }
        }
        Ok(order)
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Execute `order` (producers first) for the requests set by
    /// [`propagate_requested_region`](Self::propagate_requested_region).
    pub fn execute(&self, pipeline: &mut Pipeline, order: &[NodeHandle]) -> PipelineResult<ExecutionStats> {
        let mut stats = ExecutionStats::default();
        let mut executed: HashSet<NodeHandle> = HashSet::with_capacity(order.len());

        for &handle in order {
            let inputs = pipeline.inputs_of(handle)?;
            let node = pipeline.node(handle)?;
            let requested = node
                .state
                .requested
                .ok_or_else(|| PipelineError::MissingRequest {
                    node: node.node_ref(),
                })?;

            let inputs_changed = inputs.iter().any(|input| executed.contains(input));
            if self.options.reuse_buffers && !inputs_changed && node.state.satisfies(&requested) {
                trace!("Reusing buffer of {} for {}", node.node_ref(), requested);
                stats.nodes_skipped += 1;
                continue;
            }

            let info = node
                .state
                .info
                .ok_or_else(|| PipelineError::MissingInformation {
                    node: node.node_ref(),
                })?;
            let buffered = node.stage.buffered_region(&requested, &info);
            if !buffered.contains(&requested) {
                return Err(PipelineError::BufferUnderrun {
                    node: node.node_ref(),
                    requested,
                    buffered,
                });
            }
            if !buffered.is_empty() && !info.extent.contains(&buffered) {
                return Err(PipelineError::BoundaryComputation {
                    node: node.node_ref(),
                    requested: buffered,
                    available: info.extent,
                });
            }

            let output = self.generate_node(pipeline, handle, &inputs, buffered, info.bands)?;

            let state = &mut pipeline.node_mut(handle)?.state;
            state.buffered = Some(output);
            state.last_request = Some(requested);
            state.validity = CacheValidity::Fresh;
            executed.insert(handle);
            stats.nodes_executed += 1;
        }
        Ok(stats)
    }

    fn generate_node(
        &self,
        pipeline: &Pipeline,
        handle: NodeHandle,
        inputs: &[NodeHandle],
        buffered: Region,
        bands: usize,
    ) -> PipelineResult<RasterBuffer> {
        let node = pipeline.node(handle)?;
        let mut input_buffers = Vec::with_capacity(inputs.len());
        let mut infos = Vec::with_capacity(inputs.len());
        for &input in inputs {
            let upstream = pipeline.node(input)?;
            let buffer = upstream
                .state
                .buffered
                .as_ref()
                .ok_or_else(|| PipelineError::BufferUnderrun {
                    node: upstream.node_ref(),
                    requested: upstream.state.requested.unwrap_or_default(),
                    buffered: Region::empty_at(buffered.x, buffered.y),
                })?;
            input_buffers.push(buffer);
            infos.push(information(pipeline, input)?);
        }

        let stage_inputs = StageInputs::new(&input_buffers, &infos);
        let mut output = RasterBuffer::new(buffered, bands);
        self.run_stage(node.stage.as_ref(), &stage_inputs, &mut output)
            .map_err(|e| PipelineError::from_stage(node.node_ref(), buffered, e))?;
        debug!("Executed {} over {}", node.node_ref(), buffered);
        Ok(output)
    }

    fn run_stage(
        &self,
        stage: &dyn Stage,
        inputs: &StageInputs<'_>,
        output: &mut RasterBuffer,
    ) -> crate::core::error::StageResult<()> {
        let height = output.region().height;
        let threads = self.threads() as u64;
        if !stage.supports_threading() || threads <= 1 || height <= 1 {
            return stage.generate(inputs, &mut output.as_tile_mut());
        }

        let rows = match self.options.rows_per_task {
            0 => height.div_ceil(threads),
            rows => rows,
        };
        let tiles = output.row_tiles_mut(rows);
        let work = || {
            tiles
                .into_par_iter()
                .try_for_each(|mut tile| stage.generate(inputs, &mut tile))
        };
        match &self.pool {
            Some(pool) => pool.install(work),
            None => work(),
        }
    }

    // ========================================================================
    // Pull
    // ========================================================================

    /// Produce exactly `region` of `terminal`'s output.
    pub fn pull(
        &self,
        pipeline: &mut Pipeline,
        terminal: NodeHandle,
        region: &Region,
    ) -> PipelineResult<RasterBuffer> {
        self.pull_with_stats(pipeline, terminal, region)
            .map(|(buffer, _)| buffer)
    }

    /// [`pull`](Self::pull), also reporting what was executed.
    pub fn pull_with_stats(
        &self,
        pipeline: &mut Pipeline,
        terminal: NodeHandle,
        region: &Region,
    ) -> PipelineResult<(RasterBuffer, ExecutionStats)> {
        if pipeline.node(terminal)?.state.info.is_none() {
            self.update_output_information(pipeline, terminal)?;
        }
        let order = self.propagate_requested_region(pipeline, terminal, region)?;
        let stats = self.execute(pipeline, &order)?;

        let node = pipeline.node(terminal)?;
        let buffer = node
            .state
            .buffered
            .as_ref()
            .ok_or_else(|| PipelineError::BufferUnderrun {
                node: node.node_ref(),
                requested: *region,
                buffered: Region::empty_at(region.x, region.y),
            })?;
        Ok((buffer.extract(region)?, stats))
    }
}

fn information(pipeline: &Pipeline, handle: NodeHandle) -> PipelineResult<ImageInfo> {
    let node = pipeline.node(handle)?;
    node.state
        .info
        .ok_or_else(|| PipelineError::MissingInformation {
            node: node.node_ref(),
        })
}

fn input_infos(pipeline: &Pipeline, handle: NodeHandle) -> PipelineResult<Vec<ImageInfo>> {
    pipeline
        .inputs_of(handle)?
        .into_iter()
        .map(|input| information(pipeline, input))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::buffer::RasterTileMut;
    use crate::core::error::StageResult;
    use crate::core::types::SampleType;
    use crate::io::block::{MemoryBlockSource, PatternSource};
    use crate::pipeline::stage::{
        DataGenerator, OutputInformationProvider, RequestedRegionPropagator,
    };
    use crate::stages::{AlignedStage, BandMathStage, MeanFilterStage, PixelMapStage};

    fn gradient(width: u64, height: u64) -> Arc<PatternSource> {
        Arc::new(PatternSource::gradient(width, height))
    }

    /// Pads its request without clipping to the input extent.
    struct UnclippedBlur;

    impl OutputInformationProvider for UnclippedBlur {
        fn output_information(&self, inputs: &[ImageInfo]) -> StageResult<ImageInfo> {
            Ok(inputs[0])
        }
    }

    impl RequestedRegionPropagator for UnclippedBlur {
        fn input_requested_region(&self, _: usize, output: &Region, _: &ImageInfo) -> StageResult<Region> {
            Ok(output.pad(1))
        }
    }

    impl DataGenerator for UnclippedBlur {
        fn generate(&self, _: &StageInputs<'_>, _: &mut RasterTileMut<'_>) -> StageResult<()> {
            Ok(())
        }
    }

    impl Stage for UnclippedBlur {
        fn name(&self) -> &str {
            "unclipped-blur"
        }

        fn input_count(&self) -> usize {
            1
        }
    }

    #[test]
    fn test_output_information_flows_downstream() {
        let mut pipeline = Pipeline::new();
        let source = pipeline.add_source(gradient(30, 20));
        let mean = pipeline.add_stage(MeanFilterStage::new(2), &[source]).unwrap();
        let info = DemandEngine::default()
            .update_output_information(&mut pipeline, mean)
            .unwrap();
        assert_eq!(info.extent, Region::from_size(30, 20));
        assert_eq!(info.bands, 1);
    }

    #[test]
    fn test_fan_out_requests_are_merged() {
        // source feeds a mean filter and, directly, a sum with it
        let mut pipeline = Pipeline::new();
        let source = pipeline.add_source(gradient(50, 50));
        let mean = pipeline.add_stage(MeanFilterStage::new(3), &[source]).unwrap();
        let sum = pipeline
            .add_stage(BandMathStage::sum(2), &[mean, source])
            .unwrap();

        let engine = DemandEngine::default();
        engine.update_output_information(&mut pipeline, sum).unwrap();
        let request = Region::new(0, 10, 50, 10);
        engine
            .propagate_requested_region(&mut pipeline, sum, &request)
            .unwrap();

        let requested = pipeline.node(source).unwrap().state().requested;
        assert_eq!(requested, Some(Region::new(0, 7, 50, 16)));
        assert_eq!(pipeline.node(mean).unwrap().state().requested, Some(request));
    }

    #[test]
    fn test_requests_do_not_leak_between_passes() {
        let mut pipeline = Pipeline::new();
        let source = pipeline.add_source(gradient(20, 20));
        let mean = pipeline.add_stage(MeanFilterStage::new(1), &[source]).unwrap();
        let engine = DemandEngine::default();
        engine.update_output_information(&mut pipeline, mean).unwrap();

        engine
            .propagate_requested_region(&mut pipeline, mean, &Region::new(0, 0, 20, 5))
            .unwrap();
        engine
            .propagate_requested_region(&mut pipeline, mean, &Region::new(0, 15, 20, 5))
            .unwrap();
        assert_eq!(
            pipeline.node(source).unwrap().state().requested,
            Some(Region::new(0, 14, 20, 6))
        );
    }

    #[test]
    fn test_unclipped_request_is_a_boundary_error() {
        let mut pipeline = Pipeline::new();
        let source = pipeline.add_source(gradient(10, 10));
        let blur = pipeline.add_stage(UnclippedBlur, &[source]).unwrap();
        let engine = DemandEngine::default();
        engine.update_output_information(&mut pipeline, blur).unwrap();

        let error = engine
            .pull(&mut pipeline, blur, &Region::new(0, 0, 10, 5))
            .unwrap_err();
        assert!(error.is_boundary_error());
        assert_eq!(error.node().map(|n| n.name.as_str()), Some("unclipped-blur"));
    }

    #[test]
    fn test_request_outside_terminal_extent_fails() {
        let mut pipeline = Pipeline::new();
        let source = pipeline.add_source(gradient(10, 10));
        let result = DemandEngine::default().pull(&mut pipeline, source, &Region::new(5, 5, 10, 10));
        assert!(matches!(result, Err(PipelineError::BoundaryComputation { .. })));
    }

    #[test]
    fn test_pull_matches_direct_computation() {
        let mut pipeline = Pipeline::new();
        let source = pipeline.add_source(gradient(16, 16));
        let scaled = pipeline
            .add_stage(PixelMapStage::linear(0.5, 0.0), &[source])
            .unwrap();
        let region = Region::new(3, 4, 5, 6);
        let output = DemandEngine::default()
            .pull(&mut pipeline, scaled, &region)
            .unwrap();
        let expected = RasterBuffer::from_fn(region, 1, |x, y, _| (x + 16 * y) as f64 * 0.5);
        assert_eq!(output, expected);
    }

    #[test]
    fn test_idempotent_re_request_and_reuse() {
        let source = Arc::new(PatternSource::gradient(32, 32));
        let mut pipeline = Pipeline::new();
        let leaf = pipeline.add_source(source.clone());
        let mean = pipeline.add_stage(MeanFilterStage::new(1), &[leaf]).unwrap();
        let engine = DemandEngine::default();
        let region = Region::new(0, 8, 32, 8);

        let (first, stats) = engine.pull_with_stats(&mut pipeline, mean, &region).unwrap();
        assert_eq!(stats.nodes_executed, 2);
        let (second, stats) = engine.pull_with_stats(&mut pipeline, mean, &region).unwrap();
        assert_eq!(stats.nodes_skipped, 2);
        assert_eq!(first, second);
        assert_eq!(source.read_count(), 1);

        pipeline.mark_modified(leaf).unwrap();
        let (third, stats) = engine.pull_with_stats(&mut pipeline, mean, &region).unwrap();
        assert_eq!(stats.nodes_executed, 2);
        assert_eq!(first, third);
        assert_eq!(source.read_count(), 2);
    }

    #[test]
    fn test_release_data_forces_recompute() {
        let source = Arc::new(PatternSource::gradient(32, 32));
        let mut pipeline = Pipeline::new();
        let leaf = pipeline.add_source(source.clone());
        let mean = pipeline.add_stage(MeanFilterStage::new(1), &[leaf]).unwrap();
        let engine = DemandEngine::default();
        let region = Region::new(0, 8, 32, 8);

        let first = engine.pull(&mut pipeline, mean, &region).unwrap();
        pipeline.release_data();
        for handle in [leaf, mean] {
            let state = pipeline.node(handle).unwrap().state();
            assert!(state.info.is_some());
            assert_eq!(state.buffered_region(), None);
            assert_eq!(pipeline.validity(handle).unwrap(), CacheValidity::Stale);
        }

        let (second, stats) = engine.pull_with_stats(&mut pipeline, mean, &region).unwrap();
        assert_eq!(stats.nodes_executed, 2);
        assert_eq!(stats.nodes_skipped, 0);
        assert_eq!(first, second);
        assert_eq!(source.read_count(), 2);
    }

    #[test]
    fn test_reuse_disabled_always_recomputes() {
        let mut pipeline = Pipeline::new();
        let source = pipeline.add_source(gradient(8, 8));
        let engine = DemandEngine::new(EngineOptions::new().with_reuse_buffers(false)).unwrap();
        let region = Region::from_size(8, 8);
        engine.pull(&mut pipeline, source, &region).unwrap();
        let (_, stats) = engine.pull_with_stats(&mut pipeline, source, &region).unwrap();
        assert_eq!(stats.nodes_executed, 1);
        assert_eq!(stats.nodes_skipped, 0);
    }

    #[test]
    fn test_aligned_buffer_is_clipped_and_extracted() {
        let mut pipeline = Pipeline::new();
        let source = pipeline.add_source(gradient(40, 40));
        let aligned = pipeline.add_stage(AlignedStage::new(16), &[source]).unwrap();
        let engine = DemandEngine::default();
        let region = Region::new(5, 18, 7, 3);

        let output = engine.pull(&mut pipeline, aligned, &region).unwrap();
        assert_eq!(output.region(), region);
        assert_eq!(
            pipeline.node(aligned).unwrap().state().buffered_region(),
            Some(Region::new(0, 16, 16, 16))
        );
        assert_eq!(output.get(5, 18, 0), Some((5 + 18 * 40) as f64));
    }

    #[test]
    fn test_threaded_generation_matches_single_thread() {
        let data = RasterBuffer::from_fn(Region::from_size(64, 48), 2, |x, y, b| {
            ((x * 7 + y * 13 + b as i64 * 5) % 17) as f64
        });
        let source = Arc::new(MemoryBlockSource::new(data).with_sample_type(SampleType::F64));

        let build = || {
            let mut pipeline = Pipeline::new();
            let leaf = pipeline.add_source(source.clone());
            let mean = pipeline.add_stage(MeanFilterStage::new(2), &[leaf]).unwrap();
            (pipeline, mean)
        };
        let region = Region::new(0, 10, 64, 30);

        let (mut single, terminal) = build();
        let expected = DemandEngine::new(EngineOptions::new().with_threads(1))
            .unwrap()
            .pull(&mut single, terminal, &region)
            .unwrap();

        let (mut threaded, terminal) = build();
        let engine = DemandEngine::new(EngineOptions::new().with_threads(4).with_rows_per_task(3)).unwrap();
        assert_eq!(engine.threads(), 4);
        let output = engine.pull(&mut threaded, terminal, &region).unwrap();
        assert_eq!(output, expected);
    }
}
