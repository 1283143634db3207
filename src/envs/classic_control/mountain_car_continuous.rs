use ndarray::Array1;
use rand::distributions::{Distribution, Uniform};

use crate::core::{Action, Env, GymError, Info, Observation, RenderFrame, Result, Step};
use crate::spaces::{BoxSpace, DynSpace, Space};
use crate::utils::rng::{RngStream, SeedSequence};

/// MountainCarContinuous environment (classic control)
/// Observation: [position, velocity]
/// Action space: Box([-1.0], [1.0]) -> scalar throttle in [-1, 1]
/// Reward: -0.1 * action^2 each step; +100 bonus and terminate when reaching the goal.
pub struct MountainCarContinuousEnv {
    position: f32,
    velocity: f32,

    rng: RngStream,
    action_rng: RngStream,

    min_position: f32,  // -1.2
    max_position: f32,  // 0.6
    max_speed: f32,     // 0.07
    goal_position: f32, // 0.45
    power: f32,         // 0.0015 (action scaled by this)
    gravity: f32,       // 0.0025
}

impl Default for MountainCarContinuousEnv { fn default() -> Self { Self::new(2024) } }

impl MountainCarContinuousEnv {
    pub fn new(seed: u64) -> Self {
        let mut seq = SeedSequence::new(seed);
        Self {
            position: 0.0,
            velocity: 0.0,
            rng: seq.next_rng(),
            action_rng: seq.next_rng(),
            min_position: -1.2,
            max_position: 0.6,
            max_speed: 0.07,
            goal_position: 0.45,
            power: 0.0015,
            gravity: 0.0025,
        }
    }

    fn obs(&self) -> Observation { Array1::from(vec![self.position, self.velocity]).into_dyn() }

    fn throttle_space() -> BoxSpace { BoxSpace::from_bounds(vec![-1.0], vec![1.0]) }
}

impl Env for MountainCarContinuousEnv {
    fn observation_space(&self) -> DynSpace {
        BoxSpace::from_bounds(
            vec![self.min_position, -self.max_speed],
            vec![self.max_position, self.max_speed],
        )
        .into()
    }

    fn action_space(&self) -> DynSpace { Self::throttle_space().into() }

    fn reset(&mut self, seed: Option<u64>) -> Result<(Observation, Info)> {
        if let Some(s) = seed {
            let mut seq = SeedSequence::new(s);
            self.rng = seq.next_rng();
            self.action_rng = seq.next_rng();
        }
        self.position = Uniform::new_inclusive(-0.6f32, -0.4f32).sample(&mut self.rng);
        self.velocity = 0.0;
        Ok((self.obs(), Info::new()))
    }

    fn step(&mut self, action: &Action) -> Result<Step> {
        let a = match action {
            Action::Continuous(values) if values.len() == 1 => values[0].clamp(-1.0, 1.0),
            other => return Err(GymError::InvalidAction(format!("expected one throttle value, got {other:?}"))),
        };
        self.velocity += a * self.power - self.gravity * (3.0 * self.position).cos();
        self.velocity = self.velocity.clamp(-self.max_speed, self.max_speed);
        self.position = (self.position + self.velocity).clamp(self.min_position, self.max_position);
        if self.position <= self.min_position && self.velocity < 0.0 { self.velocity = 0.0; }

        let terminated = self.position >= self.goal_position;
        let mut reward = -0.1 * a * a;
        if terminated { reward += 100.0; }
        Ok(Step::new(self.obs(), reward, terminated, false, Info::new()))
    }

    fn render(&self) -> Option<RenderFrame> {
        Some(RenderFrame::Text(format!(
            "position={:+.3} velocity={:+.4} goal={:.2}",
            self.position, self.velocity, self.goal_position
        )))
    }

    fn sample_action(&mut self) -> Result<Action> {
        Ok(Action::Continuous(Self::throttle_space().sample(&mut self.action_rng).iter().copied().collect()))
    }
}
