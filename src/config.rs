//! Streaming configuration.
//!
//! A [`StreamingConfig`] is read from TOML, optionally adjusted from the
//! environment, validated, and turned into a [`StreamingManager`] plus
//! engine options:
//!
//! ```toml
//! mode = "ram_budget"
//! value = 256
//! bias = 0.5
//! strategy = "tile"
//! tile_alignment = 64
//! threads = 4
//! ```

use crate::core::error::ConfigurationError;
use crate::core::splitter::SplitStrategy;
use crate::execution::engine::EngineOptions;
use crate::execution::writer::WriterOptions;
use crate::streaming::budget::MemoryBudget;
use crate::streaming::manager::{
    FixedDivisionsManager, LinesPerBlockManager, RamBudgetManager, StreamingManager,
    TileSizeManager,
};
use log::debug;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

/// Environment variable overriding the RAM budget in megabytes.
pub const ENV_RAM_MB: &str = "RASTERFLOW_RAM_MB";

/// Environment variable overriding the worker pool size.
pub const ENV_THREADS: &str = "RASTERFLOW_THREADS";

/// Bias used by `ram_budget` when none is given.
pub const DEFAULT_RAM_BIAS: f64 = 0.5;

/// Default tile grid alignment in pixels.
pub const DEFAULT_TILE_ALIGNMENT: u64 = 16;

/// How the division count is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamingMode {
    /// `value` is the number of divisions.
    #[default]
    FixedDivisions,
    /// `value` is the number of rows per strip.
    LinesPerBlock,
    /// `value` is the side of a square target tile.
    TileSize,
    /// `value` is a memory ceiling in megabytes.
    RamBudget,
}

impl StreamingMode {
    fn parameter(&self) -> &'static str {
        match self {
            StreamingMode::FixedDivisions => "number of divisions",
            StreamingMode::LinesPerBlock => "lines per block",
            StreamingMode::TileSize => "tile size",
            StreamingMode::RamBudget => "memory budget",
        }
    }
}

/// Region splitting strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Full-width horizontal strips.
    #[default]
    Strip,
    /// Aligned near-square tiles.
    Tile,
}

/// Streaming and engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StreamingConfig {
    /// Division policy.
    pub mode: StreamingMode,
    /// Policy parameter, interpreted per `mode`.
    pub value: f64,
    /// Safety multiplier in `(0, 1]`. Defaults to 0.5 for `ram_budget`
    /// and 1.0 otherwise.
    pub bias: Option<f64>,
    /// Splitting strategy.
    pub strategy: StrategyKind,
    /// Tile grid alignment, used by the tile strategy.
    pub tile_alignment: u64,
    /// Worker pool size (0 = rayon's global pool).
    pub threads: usize,
    /// Whether fresh node output may be reused across passes.
    pub reuse_buffers: bool,
    /// Ignore `mode` and run the whole output in one division.
    pub force_single_pass: bool,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            mode: StreamingMode::FixedDivisions,
            value: 1.0,
            bias: None,
            strategy: StrategyKind::Strip,
            tile_alignment: DEFAULT_TILE_ALIGNMENT,
            threads: 0,
            reuse_buffers: true,
            force_single_pass: false,
        }
    }
}

impl StreamingConfig {
    /// A fixed number of divisions.
    pub fn fixed_divisions(divisions: usize) -> Self {
        Self::default().with_mode(StreamingMode::FixedDivisions, divisions as f64)
    }

    /// Strips of `lines` rows.
    pub fn lines_per_block(lines: u64) -> Self {
        Self::default().with_mode(StreamingMode::LinesPerBlock, lines as f64)
    }

    /// Square tiles of roughly `tile_size` pixels a side.
    pub fn tile_size(tile_size: u64) -> Self {
        Self::default()
            .with_mode(StreamingMode::TileSize, tile_size as f64)
            .with_strategy(StrategyKind::Tile)
    }

    /// Divisions sized to fit `megabytes`.
    pub fn ram_budget(megabytes: f64) -> Self {
        Self::default().with_mode(StreamingMode::RamBudget, megabytes)
    }

    /// Set the division policy and its parameter.
    pub fn with_mode(mut self, mode: StreamingMode, value: f64) -> Self {
        self.mode = mode;
        self.value = value;
        self
    }

    /// Set the bias.
    pub fn with_bias(mut self, bias: f64) -> Self {
        self.bias = Some(bias);
        self
    }

    /// Set the splitting strategy.
    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the tile grid alignment.
    pub fn with_tile_alignment(mut self, alignment: u64) -> Self {
        self.tile_alignment = alignment;
        self
    }

    /// Set the worker pool size.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Enable/disable buffer reuse.
    pub fn with_reuse_buffers(mut self, reuse: bool) -> Self {
        self.reuse_buffers = reuse;
        self
    }

    /// Force a single division.
    pub fn with_force_single_pass(mut self, force: bool) -> Self {
        self.force_single_pass = force;
        self
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigurationError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Loaded streaming configuration from {}", path.display());
        Self::from_toml_str(&source)
    }

    /// Apply `RASTERFLOW_RAM_MB` and `RASTERFLOW_THREADS`.
    ///
    /// A RAM override switches the mode to `ram_budget`. Unparseable
    /// values are ignored.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| env::var(key).ok())
    }

    fn with_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(megabytes) = lookup(ENV_RAM_MB).and_then(|v| v.trim().parse::<f64>().ok()) {
            debug!("{} overrides memory budget: {} MB", ENV_RAM_MB, megabytes);
            self.mode = StreamingMode::RamBudget;
            self.value = megabytes;
        }
        if let Some(threads) = lookup(ENV_THREADS).and_then(|v| v.trim().parse::<usize>().ok()) {
            debug!("{} overrides worker pool size: {}", ENV_THREADS, threads);
            self.threads = threads;
        }
        self
    }

    /// Bias in effect for the current mode.
    pub fn effective_bias(&self) -> f64 {
        self.bias.unwrap_or(match self.mode {
            StreamingMode::RamBudget => DEFAULT_RAM_BIAS,
            _ => 1.0,
        })
    }

    /// Check every parameter without building anything.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let bias = self.effective_bias();
        if !(bias > 0.0 && bias <= 1.0) {
            return Err(ConfigurationError::InvalidBias(bias));
        }
        if !(self.value.is_finite() && self.value > 0.0) {
            return Err(match self.mode {
                StreamingMode::RamBudget => ConfigurationError::NonPositiveBudget(self.value),
                mode => ConfigurationError::NonPositive {
                    parameter: mode.parameter(),
                    value: self.value,
                },
            });
        }
        if self.mode != StreamingMode::RamBudget && self.value.fract() != 0.0 {
            return Err(ConfigurationError::NotAnInteger {
                parameter: self.mode.parameter(),
                value: self.value,
            });
        }
        if self.mode == StreamingMode::LinesPerBlock && self.strategy == StrategyKind::Tile {
            return Err(ConfigurationError::UnsupportedStrategy {
                manager: "lines-per-block",
                strategy: "tile".to_string(),
            });
        }
        if self.strategy == StrategyKind::Tile && self.tile_alignment == 0 {
            return Err(ConfigurationError::NonPositive {
                parameter: "tile alignment",
                value: 0.0,
            });
        }
        Ok(())
    }

    /// The configured split strategy.
    pub fn split_strategy(&self) -> SplitStrategy {
        match self.strategy {
            StrategyKind::Strip => SplitStrategy::Strip,
            StrategyKind::Tile => SplitStrategy::Tile {
                alignment: self.tile_alignment,
            },
        }
    }

    /// Engine options for this configuration.
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions::new()
            .with_threads(self.threads)
            .with_reuse_buffers(self.reuse_buffers)
    }

    /// Writer options for this configuration.
    pub fn writer_options(&self) -> WriterOptions {
        WriterOptions::new().with_engine(self.engine_options())
    }

    /// Validate and build the streaming manager.
    pub fn build_manager(&self) -> Result<Box<dyn StreamingManager>, ConfigurationError> {
        self.validate()?;
        if self.force_single_pass {
            return Ok(Box::new(FixedDivisionsManager::single_pass()));
        }
        let manager: Box<dyn StreamingManager> = match self.mode {
            StreamingMode::FixedDivisions => Box::new(FixedDivisionsManager::new(
                self.value as usize,
                self.split_strategy(),
            )?),
            StreamingMode::LinesPerBlock => Box::new(LinesPerBlockManager::new(self.value as u64)?),
            StreamingMode::TileSize => Box::new(TileSizeManager::new(self.value as u64)?),
            StreamingMode::RamBudget => Box::new(RamBudgetManager::new(
                MemoryBudget::new(self.value, self.effective_bias())?,
                self.split_strategy(),
            )?),
        };
        Ok(manager)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::region::Region;
    use crate::execution::engine::DemandEngine;
    use crate::io::block::PatternSource;
    use crate::pipeline::graph::Pipeline;
    use std::io::Write;
    use std::sync::Arc;

    fn divisions_for(config: &StreamingConfig, width: u64, height: u64) -> usize {
        let mut pipeline = Pipeline::new();
        let source = pipeline.add_source(Arc::new(PatternSource::gradient(width, height)));
        DemandEngine::default()
            .update_output_information(&mut pipeline, source)
            .unwrap();
        let mut manager = config.build_manager().unwrap();
        manager
            .prepare(&pipeline, source, &Region::from_size(width, height))
            .unwrap()
    }

    #[test]
    fn test_default_is_single_division() {
        let config = StreamingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(divisions_for(&config, 64, 64), 1);
    }

    #[test]
    fn test_parse_toml() {
        let config = StreamingConfig::from_toml_str(
            r#"
            mode = "ram_budget"
            value = 256
            strategy = "tile"
            tile_alignment = 64
            threads = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.mode, StreamingMode::RamBudget);
        assert_eq!(config.value, 256.0);
        assert_eq!(config.effective_bias(), DEFAULT_RAM_BIAS);
        assert_eq!(config.split_strategy(), SplitStrategy::Tile { alignment: 64 });
        assert_eq!(config.engine_options().threads, 4);
    }

    #[test]
    fn test_parse_rejects_unknown_fields_and_modes() {
        assert!(matches!(
            StreamingConfig::from_toml_str("mode = \"guess\""),
            Err(ConfigurationError::Parse(_))
        ));
        assert!(matches!(
            StreamingConfig::from_toml_str("divisions = 4"),
            Err(ConfigurationError::Parse(_))
        ));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(
            StreamingConfig::ram_budget(0.0).validate(),
            Err(ConfigurationError::NonPositiveBudget(_))
        ));
        assert!(matches!(
            StreamingConfig::tile_size(0).validate(),
            Err(ConfigurationError::NonPositive { parameter: "tile size", .. })
        ));
        assert!(matches!(
            StreamingConfig::default()
                .with_mode(StreamingMode::FixedDivisions, 2.5)
                .validate(),
            Err(ConfigurationError::NotAnInteger { .. })
        ));
        assert!(matches!(
            StreamingConfig::ram_budget(64.0).with_bias(1.5).validate(),
            Err(ConfigurationError::InvalidBias(_))
        ));
        assert!(matches!(
            StreamingConfig::lines_per_block(8)
                .with_strategy(StrategyKind::Tile)
                .validate(),
            Err(ConfigurationError::UnsupportedStrategy { .. })
        ));
        assert!(matches!(
            StreamingConfig::fixed_divisions(4)
                .with_strategy(StrategyKind::Tile)
                .with_tile_alignment(0)
                .build_manager(),
            Err(ConfigurationError::NonPositive { .. })
        ));
    }

    #[test]
    fn test_build_manager_per_mode() {
        assert_eq!(divisions_for(&StreamingConfig::fixed_divisions(4), 40, 40), 4);
        assert_eq!(divisions_for(&StreamingConfig::lines_per_block(8), 40, 40), 5);
        assert_eq!(divisions_for(&StreamingConfig::tile_size(20), 40, 40), 4);

        // 1000 × 1000 × 4 bytes over 1 MB × 0.5
        let ram = StreamingConfig::ram_budget(1.0);
        assert_eq!(divisions_for(&ram, 1000, 1000), 8);
    }

    #[test]
    fn test_force_single_pass() {
        let config = StreamingConfig::fixed_divisions(9).with_force_single_pass(true);
        assert_eq!(divisions_for(&config, 40, 40), 1);
    }

    #[test]
    fn test_overrides() {
        let config = StreamingConfig::fixed_divisions(4).with_overrides_from(|key| match key {
            ENV_RAM_MB => Some("128".to_string()),
            ENV_THREADS => Some("not a number".to_string()),
            _ => None,
        });
        assert_eq!(config.mode, StreamingMode::RamBudget);
        assert_eq!(config.value, 128.0);
        assert_eq!(config.threads, 0);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "mode = \"lines_per_block\"\nvalue = 32\nreuse_buffers = false").unwrap();

        let config = StreamingConfig::load(file.path()).unwrap();
        assert_eq!(config.mode, StreamingMode::LinesPerBlock);
        assert!(!config.engine_options().reuse_buffers);

        assert!(matches!(
            StreamingConfig::load(file.path().with_extension("missing")),
            Err(ConfigurationError::Read { .. })
        ));
    }

    #[test]
    fn test_round_trip_through_toml() {
        let config = StreamingConfig::tile_size(256).with_threads(2);
        let text = toml::to_string(&config).unwrap();
        assert_eq!(StreamingConfig::from_toml_str(&text).unwrap(), config);
    }
}
