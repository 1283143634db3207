use ndarray::Array1;
use rand::distributions::{Distribution, Uniform};

use crate::core::{Action, Env, GymError, Info, Observation, RenderFrame, Result, Step};
use crate::spaces::{BoxSpace, Discrete, DynSpace, Space};
use crate::utils::rng::{RngStream, SeedSequence};

/// CartPole environment (classic control).
/// Observation: [x, x_dot, theta, theta_dot]
/// Action space: Discrete(2) {0: push left, 1: push right}
/// Reward: 1.0 per step until termination. Episode length is left to a `TimeLimit` stage.
pub struct CartPoleEnv {
    // State
    x: f32,
    x_dot: f32,
    theta: f32,
    theta_dot: f32,

    // RNG: one stream for initial states, one for sampled actions
    rng: RngStream,
    action_rng: RngStream,

    // Physics constants
    gravity: f32,        // 9.8
    masspole: f32,       // 0.1
    total_mass: f32,     // masscart + masspole
    length: f32,         // actually half the pole's length (0.5)
    polemass_length: f32,// masspole * length
    force_mag: f32,      // 10.0
    tau: f32,            // seconds between state updates (0.02)

    // Termination thresholds
    theta_threshold_radians: f32, // 12 degrees
    x_threshold: f32,             // 2.4
}

impl Default for CartPoleEnv {
    fn default() -> Self { Self::new(1_234_567) }
}

impl CartPoleEnv {
    pub fn new(seed: u64) -> Self {
        let masscart = 1.0f32;
        let masspole = 0.1;
        let length = 0.5; // half pole
        let mut seq = SeedSequence::new(seed);
        Self {
            x: 0.0,
            x_dot: 0.0,
            theta: 0.0,
            theta_dot: 0.0,
            rng: seq.next_rng(),
            action_rng: seq.next_rng(),
            gravity: 9.8,
            masspole,
            total_mass: masscart + masspole,
            length,
            polemass_length: masspole * length,
            force_mag: 10.0,
            tau: 0.02,
            theta_threshold_radians: 12.0_f32.to_radians(),
            x_threshold: 2.4,
        }
    }

    fn terminated(&self) -> bool {
        self.x < -self.x_threshold
            || self.x > self.x_threshold
            || self.theta < -self.theta_threshold_radians
            || self.theta > self.theta_threshold_radians
    }

    fn obs(&self) -> Observation {
        Array1::from(vec![self.x, self.x_dot, self.theta, self.theta_dot]).into_dyn()
    }
}

impl Env for CartPoleEnv {
    fn observation_space(&self) -> DynSpace {
        // Bounds are twice the termination thresholds so failing states are still observable.
        let x = self.x_threshold * 2.0;
        let theta = self.theta_threshold_radians * 2.0;
        BoxSpace::from_bounds(
            vec![-x, f32::NEG_INFINITY, -theta, f32::NEG_INFINITY],
            vec![x, f32::INFINITY, theta, f32::INFINITY],
        )
        .into()
    }

    fn action_space(&self) -> DynSpace { Discrete::new(2).into() }

    fn reset(&mut self, seed: Option<u64>) -> Result<(Observation, Info)> {
        if let Some(s) = seed {
            let mut seq = SeedSequence::new(s);
            self.rng = seq.next_rng();
            self.action_rng = seq.next_rng();
        }
        // small uniform noise in [-0.05, 0.05]
        let uni = Uniform::new_inclusive(-0.05f32, 0.05f32);
        self.x = uni.sample(&mut self.rng);
        self.x_dot = uni.sample(&mut self.rng);
        self.theta = uni.sample(&mut self.rng);
        self.theta_dot = uni.sample(&mut self.rng);
        Ok((self.obs(), Info::new()))
    }

    fn step(&mut self, action: &Action) -> Result<Step> {
        let force = match action {
            Action::Discrete(1) => self.force_mag,
            Action::Discrete(0) => -self.force_mag,
            other => return Err(GymError::InvalidAction(format!("CartPole expects Discrete(0|1), got {other:?}"))),
        };
        let cos_theta = self.theta.cos();
        let sin_theta = self.theta.sin();

        let temp = (force + self.polemass_length * self.theta_dot.powi(2) * sin_theta) / self.total_mass;
        let theta_acc = (self.gravity * sin_theta - cos_theta * temp)
            / (self.length * (4.0 / 3.0 - self.masspole * cos_theta.powi(2) / self.total_mass));
        let x_acc = temp - self.polemass_length * theta_acc * cos_theta / self.total_mass;

        // Euler integration
        self.x += self.tau * self.x_dot;
        self.x_dot += self.tau * x_acc;
        self.theta += self.tau * self.theta_dot;
        self.theta_dot += self.tau * theta_acc;

        Ok(Step::new(self.obs(), 1.0, self.terminated(), false, Info::new()))
    }

    fn render(&self) -> Option<RenderFrame> {
        // One text row: track of 41 cells over [-x_threshold, x_threshold], cart as '#'.
        const CELLS: usize = 41;
        let t = ((self.x + self.x_threshold) / (2.0 * self.x_threshold)).clamp(0.0, 1.0);
        let cart = (t * (CELLS - 1) as f32).round() as usize;
        let pole = if self.theta > 0.05 { '/' } else if self.theta < -0.05 { '\\' } else { '|' };
        let mut row: Vec<char> = vec!['-'; CELLS];
        row[cart] = '#';
        let track: String = row.into_iter().collect();
        Some(RenderFrame::Text(format!("{track} pole={pole} x={:+.3} theta={:+.3}", self.x, self.theta)))
    }

    fn sample_action(&mut self) -> Result<Action> {
        Ok(Action::Discrete(Discrete::new(2).sample(&mut self.action_rng)))
    }
}
