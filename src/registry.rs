// Environment registry: construct environments by id with their EnvSpec.

use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

use tracing::debug;

use crate::config::PipelineOptions;
use crate::core::{Action, Env, GymError, Info, Observation, RenderFrame, Result, Step};
use crate::envs::{CartPoleEnv, MountainCarContinuousEnv};
use crate::spaces::DynSpace;
use crate::wrappers::{RecordEpisodeStatistics, TimeLimit};

/// Environment specification metadata.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EnvSpec {
    /// Unique identifier like "CartPole-v1".
    pub id: String,
    /// Episode length enforced with a TimeLimit stage.
    pub max_episode_steps: Option<u32>,
    /// Target reward threshold for a "solved" score, if defined.
    pub reward_threshold: Option<f32>,
    /// Whether environment has inherent nondeterminism beyond RNG seed.
    pub nondeterministic: bool,
    pub version: Option<String>,
}

impl EnvSpec {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self {
            id: id.into(),
            max_episode_steps: None,
            reward_threshold: None,
            nondeterministic: false,
            version: None,
        }
    }

    pub fn with_max_episode_steps(mut self, steps: u32) -> Self {
        self.max_episode_steps = Some(steps);
        self
    }

    pub fn with_reward_threshold(mut self, threshold: f32) -> Self {
        self.reward_threshold = Some(threshold);
        self
    }
}

/// Factory for one environment family. Receives the pipeline toggles verbatim.
pub type FactoryFn = Box<dyn Fn(&PipelineOptions) -> Result<Box<dyn Env>> + Send + Sync>;

/// Outermost stage of a registered environment; reports the EnvSpec threshold.
struct Registered {
    inner: Box<dyn Env>,
    reward_threshold: Option<f32>,
}

impl Env for Registered {
    fn observation_space(&self) -> DynSpace { self.inner.observation_space() }
    fn action_space(&self) -> DynSpace { self.inner.action_space() }
    fn reward_threshold(&self) -> Option<f32> { self.reward_threshold.or_else(|| self.inner.reward_threshold()) }
    fn reset(&mut self, seed: Option<u64>) -> Result<(Observation, Info)> { self.inner.reset(seed) }
    fn step(&mut self, action: &Action) -> Result<Step> { self.inner.step(action) }
    fn render(&self) -> Option<RenderFrame> { self.inner.render() }
    fn close(&mut self) { self.inner.close() }
    fn sample_action(&mut self) -> Result<Action> { self.inner.sample_action() }
}

#[derive(Default)]
struct RegistryInner {
    specs: HashMap<String, EnvSpec>,
    factories: HashMap<String, FactoryFn>,
}

struct Registry {
    inner: RwLock<RegistryInner>,
}

impl Registry {
    fn new() -> Self { Self { inner: RwLock::new(RegistryInner::default()) } }

    fn with_builtins() -> Self {
        let registry = Self::new();
        let builtins: [(EnvSpec, FactoryFn); 2] = [
            (
                EnvSpec::new("CartPole-v1").with_max_episode_steps(500).with_reward_threshold(475.0),
                builtin("CartPole-v1", CartPoleEnv::default),
            ),
            (
                EnvSpec::new("MountainCarContinuous-v0").with_max_episode_steps(999).with_reward_threshold(90.0),
                builtin("MountainCarContinuous-v0", MountainCarContinuousEnv::default),
            ),
        ];
        for (spec, factory) in builtins {
            // Fresh registry, ids are distinct.
            let _ = registry.register(spec, factory);
        }
        registry
    }

    fn register(&self, spec: EnvSpec, factory: FactoryFn) -> Result<()> {
        let mut g = self.inner.write().map_err(|_| GymError::Other("registry poisoned".into()))?;
        if g.specs.contains_key(&spec.id) {
            return Err(GymError::Other(format!("Env id already registered: {}", spec.id)));
        }
        debug!(id = %spec.id, "registered environment");
        g.factories.insert(spec.id.clone(), factory);
        g.specs.insert(spec.id.clone(), spec);
        Ok(())
    }

    fn get_spec(&self, id: &str) -> Option<EnvSpec> {
        let g = self.inner.read().ok()?;
        g.specs.get(id).cloned()
    }

    fn make(&self, id: &str, pipeline: &PipelineOptions) -> Result<Box<dyn Env>> {
        let guard = self.inner.read().map_err(|_| GymError::Other("registry poisoned".into()))?;
        let (Some(factory), Some(spec)) = (guard.factories.get(id), guard.specs.get(id)) else {
            return Err(GymError::UnknownEnv(id.to_string()));
        };
        let env = factory(pipeline)?;
        let env: Box<dyn Env> = match spec.max_episode_steps {
            Some(max) => Box::new(TimeLimit::new(env, max)),
            None => env,
        };
        Ok(Box::new(Registered {
            inner: Box::new(RecordEpisodeStatistics::new(env)),
            reward_threshold: spec.reward_threshold,
        }))
    }
}

static REGISTRY: OnceLock<Registry> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::with_builtins)
}

/// Register an environment spec and its factory globally.
pub fn register(spec: EnvSpec, factory: FactoryFn) -> Result<()> { registry().register(spec, factory) }

/// Fetch a registered EnvSpec by id.
pub fn get_spec(id: &str) -> Option<EnvSpec> { registry().get_spec(id) }

/// Construct an environment by id.
///
/// The registered factory builds the base environment; `make` then adds a
/// `TimeLimit` (when the `EnvSpec` has `max_episode_steps`) and episode statistics.
pub fn make<S: AsRef<str>>(id: S, pipeline: &PipelineOptions) -> Result<Box<dyn Env>> {
    registry().make(id.as_ref(), pipeline)
}

/// Factory of a built-in family. These have no transformation stages, so
/// requested pipeline toggles are reported and otherwise ignored.
fn builtin<E: Env + 'static>(id: &'static str, ctor: fn() -> E) -> FactoryFn {
    factory_of(move |pipeline: &PipelineOptions| {
        if pipeline.any() {
            debug!(id, ?pipeline, "built-in family has no transformation stages; pipeline toggles ignored");
        }
        Ok(ctor())
    })
}

/// Helper to adapt a concrete Env constructor into a factory function.
pub fn factory_of<E, F>(ctor: F) -> FactoryFn
where
    E: Env + 'static,
    F: Fn(&PipelineOptions) -> Result<E> + Send + Sync + 'static,
{
    Box::new(move |pipeline: &PipelineOptions| Ok(Box::new(ctor(pipeline)?) as Box<dyn Env>))
}
