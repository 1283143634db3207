// Vectorized environments.
// N slots, each a persistent environment on its own worker thread, driven in lock-step.

mod render_index;
mod runner;
mod workers;

use std::panic::{AssertUnwindSafe, catch_unwind};

use ndarray::{Array1, Array2, ArrayBase, ArrayD, Axis, Data, Dimension, IxDyn};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::config::{PipelineOptions, VecEnvConfig};
use crate::core::{Action, Env, GymError, Info, Observation, RenderFrame, Result, Step};
use crate::registry;
use crate::spaces::SpaceDescriptor;
use crate::utils::rng::{rng_from_seed, slot_seeds};

pub use render_index::{RenderSpec, resolve, resolve_with_rng};
pub use runner::run_all;

use runner::panic_message;

use workers::{SlotPool, SlotTask};

/// Batched outcome of [`VectorEnv::step`], aligned by slot.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchStep {
    /// Shape `[N, ..observation_shape]`.
    pub observations: ArrayD<f32>,
    pub rewards: Array1<f32>,
    /// Episode ended on this step (terminated or truncated).
    pub dones: Vec<bool>,
    /// Episode ended by truncation only.
    pub truncated: Vec<bool>,
    pub infos: Vec<Info>,
    /// Ascending slots whose `dones` entry is true.
    pub done_indices: Vec<usize>,
}

/// Fresh observations for a subset of slots.
#[derive(Clone, Debug, PartialEq)]
pub struct PartialReset {
    /// Slots that were reset, ascending.
    pub indices: Vec<usize>,
    /// Shape `[indices.len(), ..observation_shape]`, row `k` belongs to `indices[k]`.
    pub observations: ArrayD<f32>,
}

impl PartialReset {
    pub fn len(&self) -> usize { self.indices.len() }
    pub fn is_empty(&self) -> bool { self.indices.is_empty() }
}

/// Runs N copies of an environment concurrently.
///
/// Every batched call is a barrier: it dispatches one task per targeted slot,
/// waits for all of them, and returns results in slot order.
///
/// - Construct with `VectorEnv::new(&config, |pipeline| Ok(MyEnv::new()))`,
///   or `VectorEnv::make(&config)` for registered ids
/// - `reset()` all slots, then `step(&actions)` with one row per slot
/// - `partial_reset()` refreshes only the slots the last step finished
pub struct VectorEnv<E: Env + 'static> {
    descriptor: SpaceDescriptor,
    pool: SlotPool<E>,
    /// Seed for the first reset of each slot; later resets continue the slot's stream.
    pending_seeds: Vec<Option<u64>>,
    done_indices: Vec<usize>,
    render_indices: Vec<usize>,
    closed: bool,
}

impl VectorEnv<Box<dyn Env>> {
    /// Build a vector environment from the global registry using `config.env_id`.
    pub fn make(config: &VecEnvConfig) -> Result<Self> {
        let id = config.env_id.clone();
        Self::new(config, move |pipeline| registry::make(&id, pipeline))
    }
}

impl<E: Env + 'static> VectorEnv<E> {
    /// Create `config.num_envs` slots with `factory`.
    ///
    /// One extra instance is built first and used only to classify the spaces;
    /// it is closed before the slots are created. The slot instances are
    /// constructed in parallel on the rayon pool.
    pub fn new<F>(config: &VecEnvConfig, factory: F) -> Result<Self>
    where
        F: Fn(&PipelineOptions) -> Result<E> + Sync,
    {
        config.validate()?;
        let n = config.num_envs;

        let descriptor = SpaceDescriptor::classify(factory(&config.pipeline)?)?;
        let render_indices = resolve_with_rng(&config.render_mode, n, &mut rng_from_seed(config.seed))?;

        let pipeline = &config.pipeline;
        let built: Vec<Result<E>> = (0..n)
            .into_par_iter()
            .map(|_| {
                catch_unwind(AssertUnwindSafe(|| factory(pipeline)))
                    .unwrap_or_else(|payload| Err(GymError::Panicked(panic_message(payload.as_ref()))))
            })
            .collect();
        let mut envs = Vec::with_capacity(n);
        let mut first_err = None;
        for (slot, built) in built.into_iter().enumerate() {
            match built {
                Ok(env) => envs.push(env),
                Err(e) if first_err.is_none() => first_err = Some(GymError::in_slot(slot, e)),
                Err(_) => {}
            }
        }
        if let Some(e) = first_err {
            for mut env in envs {
                env.close();
            }
            return Err(e);
        }

        let pool = SlotPool::spawn(envs, config.step_timeout())?;
        info!(
            env_id = %config.env_id,
            num_envs = n,
            observation = ?descriptor.observation_kind,
            action = ?descriptor.action_kind,
            state_dim = descriptor.state_dim,
            action_dims = ?descriptor.action_dims,
            render = ?render_indices,
            "vector environment ready"
        );
        Ok(Self {
            descriptor,
            pool,
            pending_seeds: slot_seeds(config.seed, n).into_iter().map(Some).collect(),
            done_indices: Vec::new(),
            render_indices,
            closed: false,
        })
    }

    pub fn num_envs(&self) -> usize { self.pending_seeds.len() }

    pub fn descriptor(&self) -> &SpaceDescriptor { &self.descriptor }

    pub fn is_continuous(&self) -> bool { self.descriptor.is_continuous() }

    pub fn render_indices(&self) -> &[usize] { &self.render_indices }

    /// Slots the last `step` finished that have not been reset since.
    pub fn done_indices(&self) -> &[usize] { &self.done_indices }

    pub fn is_closed(&self) -> bool { self.closed }

    /// Reset every slot. Clears the pending done set.
    pub fn reset(&mut self) -> Result<ArrayD<f32>> {
        self.ensure_open()?;
        let slots: Vec<usize> = (0..self.num_envs()).collect();
        let observations = self.reset_many(&slots)?;
        self.done_indices.clear();
        Ok(observations)
    }

    /// Step every slot with a flat, slot-major action batch.
    ///
    /// The batch is reshaped by the action kind: discrete takes one value per
    /// slot, tuple-discrete one value per sub-action, continuous one row per slot.
    /// Any array shape with the right number of elements is accepted.
    pub fn step<S, D>(&mut self, actions: &ArrayBase<S, D>) -> Result<BatchStep>
    where
        S: Data<Elem = f32>,
        D: Dimension,
    {
        let flat: Vec<f32> = actions.iter().copied().collect();
        let actions = self.descriptor.split_actions(&flat, self.num_envs())?;
        self.step_actions(actions)
    }

    /// Step every slot with one typed action per slot.
    pub fn step_actions(&mut self, actions: Vec<Action>) -> Result<BatchStep> {
        self.ensure_open()?;
        if actions.len() != self.num_envs() {
            return Err(GymError::InvalidActionBatch { expected: self.num_envs(), actual: actions.len() });
        }
        if let Some(bad) = actions.iter().position(|a| !self.descriptor.accepts(a)) {
            return Err(GymError::InvalidAction(format!(
                "slot {bad}: {:?} does not fit a {:?} action space",
                actions[bad], self.descriptor.action_kind
            )));
        }

        let tasks: Vec<(usize, SlotTask<E, _>)> = actions
            .into_iter()
            .enumerate()
            .map(|(slot, action)| (slot, Box::new(move |env: &mut E| env.step(&action)) as SlotTask<E, _>))
            .collect();
        // A failed batch leaves no pending done set behind.
        self.done_indices.clear();
        let steps: Vec<Step> = self.pool.run(tasks)?;

        let mut observations = Vec::with_capacity(steps.len());
        let mut rewards = Vec::with_capacity(steps.len());
        let mut dones = Vec::with_capacity(steps.len());
        let mut truncated = Vec::with_capacity(steps.len());
        let mut infos = Vec::with_capacity(steps.len());
        for s in steps {
            dones.push(s.done());
            truncated.push(s.truncated && !s.terminated);
            rewards.push(s.reward);
            observations.push(s.observation);
            infos.push(s.info);
        }
        let done_indices: Vec<usize> = dones.iter().enumerate().filter(|(_, d)| **d).map(|(i, _)| i).collect();
        self.done_indices = done_indices.clone();

        Ok(BatchStep {
            observations: self.stack(&observations)?,
            rewards: Array1::from(rewards),
            dones,
            truncated,
            infos,
            done_indices,
        })
    }

    /// Reset exactly the slots the last `step` finished, in ascending order.
    ///
    /// Consumes the pending done set once the resets succeed: a second call
    /// before the next `step` returns an empty batch. If a reset fails the
    /// pending set is kept, so the call can be retried. Running slots are not
    /// touched.
    pub fn partial_reset(&mut self) -> Result<PartialReset> {
        self.ensure_open()?;
        let slots = self.done_indices.clone();
        debug!(count = slots.len(), "partial reset");
        let observations = self.reset_many(&slots)?;
        self.done_indices.clear();
        Ok(PartialReset { indices: slots, observations })
    }

    /// Reset an explicit set of slots, e.g. the `done_indices` of a [`BatchStep`].
    ///
    /// Slots are reset in ascending order without duplicates; the pending done
    /// set loses the slots that were reset.
    pub fn reset_slots(&mut self, slots: &[usize]) -> Result<PartialReset> {
        self.ensure_open()?;
        let mut slots = slots.to_vec();
        slots.sort_unstable();
        slots.dedup();
        if let Some(&bad) = slots.iter().find(|&&s| s >= self.num_envs()) {
            return Err(GymError::Other(format!("slot {bad} outside [0, {})", self.num_envs())));
        }
        let observations = self.reset_many(&slots)?;
        self.done_indices.retain(|s| slots.binary_search(s).is_err());
        Ok(PartialReset { indices: slots, observations })
    }

    /// Render the configured render slots. Slots without a frame are skipped.
    pub fn render(&mut self) -> Result<Vec<(usize, RenderFrame)>> {
        self.ensure_open()?;
        debug!(slots = ?self.render_indices, "render");
        let tasks: Vec<(usize, SlotTask<E, _>)> = self
            .render_indices
            .iter()
            .map(|&slot| (slot, Box::new(|env: &mut E| Ok(env.render())) as SlotTask<E, _>))
            .collect();
        let frames: Vec<Option<RenderFrame>> = self.pool.run(tasks)?;
        Ok(self
            .render_indices
            .iter()
            .zip(frames)
            .filter_map(|(&slot, frame)| frame.map(|f| (slot, f)))
            .collect())
    }

    /// One random action per slot from that slot's own action space, as a
    /// `[N, action_width]` batch that `step` accepts.
    pub fn sample_actions(&mut self) -> Result<Array2<f32>> {
        let actions = self.sample_action_list()?;
        let width = self.descriptor.action_width();
        let flat: Vec<f32> = actions.iter().flat_map(Action::to_row).collect();
        Ok(Array2::from_shape_vec((actions.len(), width), flat)?)
    }

    /// Like [`sample_actions`](Self::sample_actions) but typed.
    pub fn sample_action_list(&mut self) -> Result<Vec<Action>> {
        self.ensure_open()?;
        let tasks: Vec<(usize, SlotTask<E, _>)> = (0..self.num_envs())
            .map(|slot| (slot, Box::new(|env: &mut E| env.sample_action()) as SlotTask<E, _>))
            .collect();
        let actions = self.pool.run(tasks)?;
        if let Some(slot) = actions.iter().position(|a| !self.descriptor.accepts(a)) {
            return Err(GymError::UnsupportedActionSpace(format!(
                "slot {slot} sampled {:?}, expected a {:?} action",
                actions[slot], self.descriptor.action_kind
            )));
        }
        Ok(actions)
    }

    /// Close every slot and stop the workers. Calling it again does nothing.
    ///
    /// Slots faulted by a panic are still closed; only slots whose worker
    /// missed a deadline are skipped, since their environment may be stuck.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let tasks: Vec<(usize, SlotTask<E, ()>)> = self
            .pool
            .live_slots()
            .into_iter()
            .map(|slot| (slot, Box::new(|env: &mut E| { env.close(); Ok(()) }) as SlotTask<E, ()>))
            .collect();
        if let Err(e) = self.pool.run_on_live(tasks) {
            warn!(error = %e, "closing environments failed");
        }
        self.pool.shutdown();
        self.done_indices.clear();
        debug!("vector environment closed");
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed { Err(GymError::Closed) } else { Ok(()) }
    }

    fn reset_many(&mut self, slots: &[usize]) -> Result<ArrayD<f32>> {
        let tasks: Vec<(usize, SlotTask<E, Observation>)> = slots
            .iter()
            .map(|&slot| {
                let seed = self.pending_seeds[slot];
                (slot, Box::new(move |env: &mut E| env.reset(seed).map(|(obs, _)| obs)) as SlotTask<E, _>)
            })
            .collect();
        let observations = self.pool.run(tasks)?;
        for &slot in slots {
            self.pending_seeds[slot] = None;
        }
        self.stack(&observations)
    }

    fn stack(&self, observations: &[Observation]) -> Result<ArrayD<f32>> {
        if observations.is_empty() {
            let mut shape = vec![0];
            shape.extend(self.descriptor.observation_shape());
            return Ok(ArrayD::zeros(IxDyn(&shape)));
        }
        let views: Vec<_> = observations.iter().map(|o| o.view()).collect();
        Ok(ndarray::stack(Axis(0), &views)?)
    }
}

impl<E: Env + 'static> Drop for VectorEnv<E> {
    fn drop(&mut self) {
        self.close();
    }
}
