pub mod core;
pub mod spaces;
pub mod utils;
pub mod envs;
pub mod wrappers;
pub mod registry;
pub mod config;
pub mod vector;

pub use crate::core::{Action, Env, GymError, Info, InfoValue, Observation, RenderFrame, Result, Step};
pub use crate::spaces::{ActionKind, BoxSpace, Discrete, DynSpace, MultiDiscrete, ObservationKind, Space, SpaceDescriptor};
pub use crate::envs::{CartPoleEnv, MountainCarContinuousEnv};
pub use crate::wrappers::{RecordEpisodeStatistics, TimeLimit};
pub use crate::registry::{EnvSpec, make};
pub use crate::config::{PipelineOptions, VecEnvConfig};
pub use crate::vector::{BatchStep, PartialReset, RenderSpec, VectorEnv};
