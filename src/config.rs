//! Construction-time configuration of a vector environment.

use std::time::Duration;

use crate::core::{GymError, Result};
use crate::vector::RenderSpec;

/// Toggles for the environment transformation pipeline.
///
/// The vector manager does not interpret these; they are handed verbatim to
/// the environment factory for every slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PipelineOptions {
    pub skip: bool,
    pub stack: bool,
    pub grayscale: bool,
    pub resize: bool,
    pub scale: bool,
}

impl PipelineOptions {
    /// Whether any transformation stage was requested.
    pub fn any(&self) -> bool {
        self.skip || self.stack || self.grayscale || self.resize || self.scale
    }
}

/// Settings for [`VectorEnv`](crate::vector::VectorEnv).
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct VecEnvConfig {
    /// Registered environment id like "CartPole-v1".
    pub env_id: String,
    /// Number of slots.
    pub num_envs: usize,
    /// Base seed; slot `i` is seeded with `seed + i`.
    pub seed: u64,
    pub render_mode: RenderSpec,
    pub pipeline: PipelineOptions,
    /// Upper bound for one batched call. `None` waits indefinitely.
    pub step_timeout_ms: Option<u64>,
}

impl Default for VecEnvConfig {
    fn default() -> Self {
        Self {
            env_id: String::new(),
            num_envs: 1,
            seed: 0,
            render_mode: RenderSpec::default(),
            pipeline: PipelineOptions::default(),
            step_timeout_ms: None,
        }
    }
}

impl VecEnvConfig {
    pub fn new<S: Into<String>>(env_id: S, num_envs: usize) -> Self {
        Self { env_id: env_id.into(), num_envs, ..Self::default() }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_render_mode<R: Into<RenderSpec>>(mut self, render_mode: R) -> Self {
        self.render_mode = render_mode.into();
        self
    }

    pub fn with_pipeline(mut self, pipeline: PipelineOptions) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout_ms = Some(timeout.as_millis().min(u64::MAX as u128) as u64);
        self
    }

    pub fn step_timeout(&self) -> Option<Duration> {
        self.step_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_envs == 0 {
            return Err(GymError::InvalidConfig("num_envs must be at least 1".into()));
        }
        if self.step_timeout_ms == Some(0) {
            return Err(GymError::InvalidConfig("step_timeout_ms must be positive".into()));
        }
        Ok(())
    }
}
