// Decorator stages over Env. Each stage owns the next one and delegates to it.
//
// - TimeLimit
// - RecordEpisodeStatistics

use crate::core::{Action, Env, Info, InfoValue, Observation, RenderFrame, Result, Step};
use crate::spaces::DynSpace;

/// Marks a step as truncated once `max_steps` steps have elapsed in the episode.
pub struct TimeLimit<E: Env> {
    inner: E,
    max_steps: u32,
    steps: u32,
}

impl<E: Env> TimeLimit<E> {
    pub fn new(inner: E, max_steps: u32) -> Self {
        Self { inner, max_steps, steps: 0 }
    }

    pub fn inner(&self) -> &E { &self.inner }
    pub fn into_inner(self) -> E { self.inner }
}

impl<E: Env> Env for TimeLimit<E> {
    fn observation_space(&self) -> DynSpace { self.inner.observation_space() }
    fn action_space(&self) -> DynSpace { self.inner.action_space() }
    fn reward_threshold(&self) -> Option<f32> { self.inner.reward_threshold() }

    fn reset(&mut self, seed: Option<u64>) -> Result<(Observation, Info)> {
        self.steps = 0;
        self.inner.reset(seed)
    }

    fn step(&mut self, action: &Action) -> Result<Step> {
        let mut s = self.inner.step(action)?;
        self.steps += 1;
        if !s.terminated && !s.truncated && self.steps >= self.max_steps {
            s.truncated = true;
        }
        Ok(s)
    }

    fn render(&self) -> Option<RenderFrame> { self.inner.render() }
    fn close(&mut self) { self.inner.close() }
    fn sample_action(&mut self) -> Result<Action> { self.inner.sample_action() }
}

/// Tracks cumulative return and episode length.
/// On episode end (terminated or truncated), it injects keys into the returned Step's Info:
/// - "episode_return": f64
/// - "episode_length": i64
pub struct RecordEpisodeStatistics<E: Env> {
    inner: E,
    ep_return: f64,
    ep_length: i64,
}

impl<E: Env> RecordEpisodeStatistics<E> {
    pub fn new(inner: E) -> Self { Self { inner, ep_return: 0.0, ep_length: 0 } }
}

impl<E: Env> Env for RecordEpisodeStatistics<E> {
    fn observation_space(&self) -> DynSpace { self.inner.observation_space() }
    fn action_space(&self) -> DynSpace { self.inner.action_space() }
    fn reward_threshold(&self) -> Option<f32> { self.inner.reward_threshold() }

    fn reset(&mut self, seed: Option<u64>) -> Result<(Observation, Info)> {
        self.ep_return = 0.0;
        self.ep_length = 0;
        self.inner.reset(seed)
    }

    fn step(&mut self, action: &Action) -> Result<Step> {
        let mut s = self.inner.step(action)?;
        self.ep_return += s.reward as f64;
        self.ep_length += 1;
        if s.done() {
            s.info.insert("episode_return", InfoValue::from(self.ep_return));
            s.info.insert("episode_length", InfoValue::from(self.ep_length));
            self.ep_return = 0.0;
            self.ep_length = 0;
        }
        Ok(s)
    }

    fn render(&self) -> Option<RenderFrame> { self.inner.render() }
    fn close(&mut self) { self.inner.close() }
    fn sample_action(&mut self) -> Result<Action> { self.inner.sample_action() }
}
