// Core traits and types shared by environments and the vector manager.

use std::time::Duration;

use ndarray::ArrayD;

use crate::spaces::DynSpace;

/// Observations are dense `f32` tensors; vector observations are rank 1,
/// visual ones rank 3.
pub type Observation = ArrayD<f32>;

/// A small ordered info map. Keeps insertion order and replaces on duplicate keys.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Info {
    entries: Vec<(String, InfoValue)>,
}

impl Info {
    /// Create an empty Info map.
    pub fn new() -> Self { Self { entries: Vec::new() } }

    /// Insert or replace a key with the given value.
    pub fn insert<K: Into<String>>(&mut self, key: K, value: InfoValue) {
        let k = key.into();
        if let Some((_, v)) = self.entries.iter_mut().find(|(kk, _)| kk == &k) {
            *v = value;
        } else {
            self.entries.push((k, value));
        }
    }

    /// Get a reference to a value by key.
    pub fn get(&self, key: &str) -> Option<&InfoValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Iterate over entries.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &InfoValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    pub fn len(&self) -> usize { self.entries.len() }
}

/// Value types carried in an [`Info`] map.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum InfoValue {
    Bool(bool),
    I64(i64),
    F64(f64),
    Str(String),
}

impl InfoValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            InfoValue::F64(v) => Some(*v),
            InfoValue::I64(v) => Some(*v as f64),
            _ => None,
        }
    }
}

impl From<bool> for InfoValue { fn from(v: bool) -> Self { InfoValue::Bool(v) } }
impl From<i64> for InfoValue { fn from(v: i64) -> Self { InfoValue::I64(v) } }
impl From<i32> for InfoValue { fn from(v: i32) -> Self { InfoValue::I64(v as i64) } }
impl From<f64> for InfoValue { fn from(v: f64) -> Self { InfoValue::F64(v) } }
impl From<f32> for InfoValue { fn from(v: f32) -> Self { InfoValue::F64(v as f64) } }
impl From<&str> for InfoValue { fn from(v: &str) -> Self { InfoValue::Str(v.to_string()) } }
impl From<String> for InfoValue { fn from(v: String) -> Self { InfoValue::Str(v) } }

/// A frame returned by `Env::render`.
#[derive(Clone, Debug, PartialEq)]
pub enum RenderFrame {
    /// Textual representation of a frame (e.g., ASCII art or debug string).
    Text(String),
    /// Raw pixel buffer in row-major RGB or RGBA format.
    Pixels {
        width: u32,
        height: u32,
        data: Vec<u8>,
    },
}

/// An action for a single environment.
///
/// The variant follows the action space family: `Discrete` for `Discrete(n)`,
/// `Tuple` for a tuple of discrete slots, `Continuous` for a rank-1 box.
#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    Discrete(u32),
    Tuple(Vec<u32>),
    Continuous(Vec<f32>),
}

impl Action {
    /// Flatten into one row of an action batch.
    pub fn to_row(&self) -> Vec<f32> {
        match self {
            Action::Discrete(a) => vec![*a as f32],
            Action::Tuple(choices) => choices.iter().map(|&c| c as f32).collect(),
            Action::Continuous(values) => values.clone(),
        }
    }

    /// Number of scalars in this action's batch row.
    pub fn width(&self) -> usize {
        match self {
            Action::Discrete(_) => 1,
            Action::Tuple(choices) => choices.len(),
            Action::Continuous(values) => values.len(),
        }
    }
}

/// A step result from the environment.
#[derive(Clone, Debug, PartialEq)]
pub struct Step {
    pub observation: Observation,
    pub reward: f32,
    pub terminated: bool,
    pub truncated: bool,
    pub info: Info,
}

impl Step {
    pub fn new(observation: Observation, reward: f32, terminated: bool, truncated: bool, info: Info) -> Self {
        Self { observation, reward, terminated, truncated, info }
    }

    /// Whether the episode ended on this step, by termination or truncation.
    pub fn done(&self) -> bool { self.terminated || self.truncated }
}

/// Errors across environments, spaces and the vector manager.
#[derive(thiserror::Error, Debug)]
pub enum GymError {
    #[error("Invalid action: {0}")]
    InvalidAction(String),
    #[error("Invalid observation: {0}")]
    InvalidObservation(String),
    #[error("Environment not ready: {0}")]
    NotReady(String),
    #[error("Operation not supported: {0}")]
    NotSupported(String),
    #[error("Unsupported action space: {0}")]
    UnsupportedActionSpace(String),
    #[error("Unsupported observation space: {0}")]
    UnsupportedObservationSpace(String),
    #[error("Invalid render spec: {0}")]
    InvalidRenderSpec(String),
    #[error("Invalid action batch: expected {expected} values, got {actual}")]
    InvalidActionBatch { expected: usize, actual: usize },
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Unknown environment id: {0}")]
    UnknownEnv(String),
    #[error("Environment in slot {slot} failed: {source}")]
    InstanceTaskFailure {
        slot: usize,
        #[source]
        source: Box<GymError>,
    },
    #[error("Environment in slot {slot} did not finish within {timeout:?}")]
    InstanceTimeout { slot: usize, timeout: Duration },
    #[error("Environment in slot {0} is faulted after an earlier failure")]
    SlotFaulted(usize),
    #[error("Task panicked: {0}")]
    Panicked(String),
    #[error("Vector environment is closed")]
    Closed,
    #[error("Shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Other error: {0}")]
    Other(String),
}

impl GymError {
    /// Wrap an error raised inside the task of one slot.
    pub fn in_slot(slot: usize, source: GymError) -> Self {
        GymError::InstanceTaskFailure { slot, source: Box::new(source) }
    }
}

/// Convenience alias for results using GymError.
pub type Result<T> = std::result::Result<T, GymError>;

/// A single simulation instance.
///
/// Implementations own their state and RNG streams. Transformation stages
/// (time limits, statistics, scaling, ...) are `Env` implementations that wrap
/// an inner `Env` and delegate to it.
pub trait Env: Send {
    /// The space observations are drawn from.
    fn observation_space(&self) -> DynSpace;

    /// The space actions must belong to.
    fn action_space(&self) -> DynSpace;

    /// Score at which the task counts as solved, if the family defines one.
    fn reward_threshold(&self) -> Option<f32> { None }

    /// Reset the environment to an initial state.
    /// Implementations should re-seed internal RNGs when `seed` is provided.
    fn reset(&mut self, seed: Option<u64>) -> Result<(Observation, Info)>;

    /// Apply an action and advance the environment by one step.
    fn step(&mut self, action: &Action) -> Result<Step>;

    /// Render a frame of the current state, if supported.
    fn render(&self) -> Option<RenderFrame> { None }

    /// Close and release any external resources.
    fn close(&mut self) {}

    /// Draw a random action from this environment's action space.
    fn sample_action(&mut self) -> Result<Action> {
        self.action_space().sample_action(&mut rand::thread_rng())
    }
}

impl<E: Env + ?Sized> Env for Box<E> {
    fn observation_space(&self) -> DynSpace { (**self).observation_space() }
    fn action_space(&self) -> DynSpace { (**self).action_space() }
    fn reward_threshold(&self) -> Option<f32> { (**self).reward_threshold() }
    fn reset(&mut self, seed: Option<u64>) -> Result<(Observation, Info)> { (**self).reset(seed) }
    fn step(&mut self, action: &Action) -> Result<Step> { (**self).step(action) }
    fn render(&self) -> Option<RenderFrame> { (**self).render() }
    fn close(&mut self) { (**self).close() }
    fn sample_action(&mut self) -> Result<Action> { (**self).sample_action() }
}
