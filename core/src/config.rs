//! Process-wide runtime configuration.
//!
//! A single [`RuntimeConfig`] is built once at startup (defaults, a TOML file, or both) and shared
//! by `Arc` with the heap and the engine. Nothing in the runtime reads ambient globals.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Default deadline for interactive runs.
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;
/// Deadline used by [`RuntimeConfig::for_tests`].
pub const TEST_TIMEOUT_MS: u64 = 300_000;

/// Garbage collector tuning knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcConfig {
    /// Live-cell count that triggers the first collection.
    pub initial_threshold: usize,
    /// Factor applied to the threshold after an unproductive collection.
    pub growth_multiplier: f64,
    /// A pass freeing less than this fraction of the live cells grows the threshold.
    pub min_free_fraction: f64,
    /// Number of engine steps between threshold checks.
    pub check_interval: u64,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            initial_threshold: 4096,
            growth_multiplier: 2.0,
            min_free_fraction: 0.25,
            check_interval: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Convert loaded node documents on the branch runtime instead of inline.
    pub parallel_lowering: bool,
    /// Allow `collect` nodes flagged as parallel to explore alternatives on worker threads.
    pub parallel_branches: bool,
    /// When false the collector runs in no-op mode.
    pub gc_enabled: bool,
    pub timeout_ms: u64,
    pub gc: GcConfig,
    /// Low bits of a reference id that select the slot inside one page.
    pub page_bits: u32,
    /// Local cell count after which the current generation is sealed and a fresh one started.
    pub generation_cell_limit: usize,
    /// Worker threads for branch exploration; 0 picks the tokio default.
    pub branch_workers: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            parallel_lowering: false,
            parallel_branches: false,
            gc_enabled: true,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            gc: GcConfig::default(),
            page_bits: 10,
            generation_cell_limit: 1 << 16,
            branch_workers: 0,
        }
    }
}

impl RuntimeConfig {
    /// Defaults with the longer test-mode deadline.
    pub fn for_tests() -> Self {
        Self {
            timeout_ms: TEST_TIMEOUT_MS,
            ..Self::default()
        }
    }

    pub fn from_toml_str(src: &str) -> Result<Self> {
        let config: Self = toml::from_str(src).context("invalid runtime configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let src = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
        Self::from_toml_str(&src)
    }

    pub fn validate(&self) -> Result<()> {
        if !(4..=16).contains(&self.page_bits) {
            bail!("page_bits must be within 4..=16, got {}", self.page_bits);
        }
        if !(self.gc.growth_multiplier > 1.0) {
            bail!("gc.growth_multiplier must be greater than 1, got {}", self.gc.growth_multiplier);
        }
        if !(self.gc.min_free_fraction > 0.0 && self.gc.min_free_fraction < 1.0) {
            bail!(
                "gc.min_free_fraction must be within (0, 1), got {}",
                self.gc.min_free_fraction
            );
        }
        if self.gc.initial_threshold == 0 {
            bail!("gc.initial_threshold must be positive");
        }
        if self.gc.check_interval == 0 {
            bail!("gc.check_interval must be positive");
        }
        if self.generation_cell_limit == 0 {
            bail!("generation_cell_limit must be positive");
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
