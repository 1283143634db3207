use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use gym_vector::{
    Action, ActionKind, BoxSpace, CartPoleEnv, Discrete, DynSpace, Env, GymError, Info, MultiDiscrete, Observation,
    ObservationKind, RenderFrame, RenderSpec, Result, Step, VecEnvConfig, VectorEnv,
};
use ndarray::{Array1, ArrayD, Axis, IxDyn, array};

/// Test environment. Observation is `[steps_in_episode, seed_of_last_reset or -1]`;
/// episodes terminate after `episode_len` steps.
struct Stub {
    action: DynSpace,
    episode_len: u32,
    t: u32,
    seed: Option<u64>,
    first_seed: Option<u64>,
    fail_for_seed: Option<u64>,
    slow_for_seed: Option<u64>,
    panic_for_seed: Option<u64>,
    /// While set, every reset and step fails.
    broken: Arc<AtomicBool>,
    closes: Arc<AtomicUsize>,
}

impl Stub {
    fn new(action: DynSpace, episode_len: u32) -> Self {
        Self {
            action,
            episode_len,
            t: 0,
            seed: None,
            first_seed: None,
            fail_for_seed: None,
            slow_for_seed: None,
            panic_for_seed: None,
            broken: Arc::new(AtomicBool::new(false)),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn obs(&self) -> Observation {
        let seed = self.seed.map_or(-1.0, |s| s as f32);
        Array1::from(vec![self.t as f32, seed]).into_dyn()
    }
}

impl Env for Stub {
    fn observation_space(&self) -> DynSpace { BoxSpace::uniform(&[2], -1.0, 1e6).into() }
    fn action_space(&self) -> DynSpace { self.action.clone() }
    fn reward_threshold(&self) -> Option<f32> { Some(2.0) }

    fn reset(&mut self, seed: Option<u64>) -> Result<(Observation, Info)> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(GymError::Other("reset rejected".into()));
        }
        self.t = 0;
        self.seed = seed;
        if self.first_seed.is_none() {
            self.first_seed = seed;
        }
        Ok((self.obs(), Info::new()))
    }

    fn step(&mut self, action: &Action) -> Result<Step> {
        if !self.action.contains_action(action) {
            return Err(GymError::InvalidAction(format!("{action:?}")));
        }
        if self.broken.load(Ordering::SeqCst)
            || (self.fail_for_seed.is_some() && self.fail_for_seed == self.first_seed)
        {
            return Err(GymError::Other("simulator crashed".into()));
        }
        if self.panic_for_seed.is_some() && self.panic_for_seed == self.first_seed {
            panic!("physics blew up");
        }
        if self.slow_for_seed.is_some() && self.slow_for_seed == self.first_seed {
            thread::sleep(Duration::from_millis(400));
        }
        self.t += 1;
        Ok(Step::new(self.obs(), 1.0, self.t >= self.episode_len, false, Info::new()))
    }

    fn render(&self) -> Option<RenderFrame> {
        Some(RenderFrame::Text(format!("seed={:?} t={}", self.first_seed, self.t)))
    }

    fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

fn column(batch: &ArrayD<f32>, index: usize) -> Vec<f32> {
    batch.index_axis(Axis(1), index).iter().copied().collect()
}

fn discrete_stub_env(num_envs: usize, seed: u64) -> VectorEnv<Stub> {
    let config = VecEnvConfig::new("Stub-v0", num_envs).with_seed(seed);
    VectorEnv::new(&config, |_| Ok(Stub::new(Discrete::new(2).into(), 2))).unwrap()
}

#[test]
fn single_vs_vector_n1_same_rollout() {
    let mut single = CartPoleEnv::default();
    let (first, _) = single.reset(Some(0)).unwrap();

    let config = VecEnvConfig::new("CartPole-v1", 1).with_seed(0);
    let mut vec_env = VectorEnv::new(&config, |_| Ok(CartPoleEnv::default())).unwrap();
    let obs = vec_env.reset().unwrap();
    assert_eq!(obs.shape(), &[1, 4]);
    assert_eq!(obs.index_axis(Axis(0), 0), first.view());

    for a in [1u32, 1, 0, 1, 0, 0, 1, 1, 1, 0] {
        let s = single.step(&Action::Discrete(a)).unwrap();
        let batch = vec_env.step(&array![a as f32]).unwrap();
        assert_eq!(batch.observations.index_axis(Axis(0), 0), s.observation.view());
        assert!((batch.rewards[0] - s.reward).abs() < 1e-6);
        assert_eq!(batch.dones[0], s.done());
        if s.done() { break; }
    }
}

#[test]
fn lockstep_episodes_end_together() {
    let mut env = discrete_stub_env(4, 0);
    let obs = env.reset().unwrap();
    assert_eq!(obs.shape(), &[4, 2]);

    let first = env.step(&array![0.0f32, 1.0, 0.0, 1.0]).unwrap();
    assert_eq!(first.dones, vec![false; 4]);
    assert!(first.done_indices.is_empty());
    assert_eq!(first.rewards.len(), 4);

    let second = env.step(&array![1.0f32, 0.0, 1.0, 0.0]).unwrap();
    assert_eq!(second.dones, vec![true; 4]);
    assert_eq!(second.done_indices, vec![0, 1, 2, 3]);
    assert_eq!(env.done_indices(), &[0, 1, 2, 3]);

    let fresh = env.partial_reset().unwrap();
    assert_eq!(fresh.indices, vec![0, 1, 2, 3]);
    assert_eq!(fresh.observations.shape(), &[4, 2]);
    assert!(fresh.observations.index_axis(Axis(1), 0).iter().all(|&t| t == 0.0));

    let again = env.partial_reset().unwrap();
    assert!(again.is_empty());
    assert_eq!(again.observations.shape(), &[0, 2]);
}

#[test]
fn partial_reset_touches_only_finished_slots() {
    let mut env = discrete_stub_env(4, 0);
    env.reset().unwrap();
    env.step(&array![0.0f32, 0.0, 0.0, 0.0]).unwrap();
    // Put slots 0 and 2 one step behind.
    let rewound = env.reset_slots(&[2, 0, 2]).unwrap();
    assert_eq!(rewound.indices, vec![0, 2]);

    let batch = env.step(&array![1.0f32, 1.0, 1.0, 1.0]).unwrap();
    assert_eq!(batch.done_indices, vec![1, 3]);
    assert_eq!(column(&batch.observations, 0), vec![1.0, 2.0, 1.0, 2.0]);

    let fresh = env.partial_reset().unwrap();
    assert_eq!(fresh.indices, vec![1, 3]);
    assert_eq!(fresh.len(), 2);
    assert!(env.partial_reset().unwrap().is_empty());

    // Slots 0 and 2 kept their episode running.
    let next = env.step(&array![0.0f32, 0.0, 0.0, 0.0]).unwrap();
    assert_eq!(next.done_indices, vec![0, 2]);
}

#[test]
fn reset_slots_rejects_unknown_slots() {
    let mut env = discrete_stub_env(2, 0);
    env.reset().unwrap();
    assert!(env.reset_slots(&[2]).is_err());
    assert!(env.reset_slots(&[]).unwrap().is_empty());
}

#[test]
fn slots_are_seeded_from_the_base_seed() {
    let mut env = discrete_stub_env(3, 100);
    let obs = env.reset().unwrap();
    assert_eq!(column(&obs, 1), vec![100.0, 101.0, 102.0]);

    env.step(&array![0.0f32, 0.0, 0.0]).unwrap();
    env.step(&array![0.0f32, 0.0, 0.0]).unwrap();
    // Later resets continue each slot's own stream.
    let fresh = env.partial_reset().unwrap();
    assert_eq!(column(&fresh.observations, 1), vec![-1.0; 3]);
}

#[test]
fn same_seed_same_cartpole_rollout() {
    let run = || {
        let config = VecEnvConfig::new("CartPole-v1", 3).with_seed(42);
        let mut env = VectorEnv::new(&config, |_| Ok(CartPoleEnv::default())).unwrap();
        let mut trace = vec![env.reset().unwrap()];
        for _ in 0..5 {
            trace.push(env.step(&array![1.0f32, 0.0, 1.0]).unwrap().observations);
        }
        trace
    };
    assert_eq!(run(), run());
}

#[test]
fn sampled_actions_are_accepted_by_step() {
    let spaces: Vec<DynSpace> = vec![
        Discrete::new(3).into(),
        MultiDiscrete::new(vec![3, 4]).into(),
        DynSpace::Tuple(vec![Discrete::new(2).into(), Discrete::new(5).into()]),
        BoxSpace::from_bounds(vec![-1.0, 0.0], vec![1.0, 2.0]).into(),
    ];
    for space in spaces {
        let config = VecEnvConfig::new("Stub-v0", 3);
        let proto = space.clone();
        let mut env = VectorEnv::new(&config, move |_| Ok(Stub::new(proto.clone(), 10))).unwrap();
        env.reset().unwrap();
        for _ in 0..5 {
            let actions = env.sample_actions().unwrap();
            assert_eq!(actions.shape(), &[3, env.descriptor().action_width()]);
            env.step(&actions).unwrap();
        }
        let typed = env.sample_action_list().unwrap();
        assert!(typed.iter().all(|a| space.contains_action(a)));
        env.step_actions(typed).unwrap();
    }
}

#[test]
fn classification_matches_the_family() {
    for n in [1usize, 2, 5] {
        let env = discrete_stub_env(n, 0);
        let d = env.descriptor();
        assert_eq!(env.num_envs(), n);
        assert_eq!(d.observation_kind, ObservationKind::Vector);
        assert_eq!(d.state_dim, 2);
        assert_eq!(d.action_kind, ActionKind::Discrete);
        assert_eq!(d.action_dims, vec![2]);
        assert_eq!(d.reward_threshold, Some(2.0));
        assert!(!env.is_continuous());
    }

    let config = VecEnvConfig::new("Stub-v0", 2);
    let continuous = VectorEnv::new(&config, |_| Ok(Stub::new(BoxSpace::uniform(&[3], -1.0, 1.0).into(), 5))).unwrap();
    assert!(continuous.is_continuous());
    assert_eq!(continuous.descriptor().action_dims, vec![3]);
}

#[test]
fn wrong_batch_size_is_rejected() {
    let mut env = discrete_stub_env(3, 0);
    env.reset().unwrap();
    match env.step(&array![0.0f32, 1.0]) {
        Err(GymError::InvalidActionBatch { expected, actual }) => assert_eq!((expected, actual), (3, 2)),
        other => panic!("expected InvalidActionBatch, got {other:?}"),
    }
    assert!(matches!(env.step(&array![0.5f32, 1.0, 0.0]), Err(GymError::InvalidAction(_))));
    assert!(env.step_actions(vec![Action::Discrete(0)]).is_err());
}

#[test]
fn failing_slot_is_reported() {
    let config = VecEnvConfig::new("Stub-v0", 4).with_seed(10);
    let mut env = VectorEnv::new(&config, |_| {
        let mut stub = Stub::new(Discrete::new(2).into(), 5);
        stub.fail_for_seed = Some(12);
        Ok(stub)
    })
    .unwrap();
    env.reset().unwrap();
    match env.step(&array![0.0f32, 0.0, 0.0, 0.0]) {
        Err(GymError::InstanceTaskFailure { slot, .. }) => assert_eq!(slot, 2),
        other => panic!("expected InstanceTaskFailure, got {other:?}"),
    }
    env.close();
}

#[test]
fn slow_slot_hits_the_deadline() {
    let config = VecEnvConfig::new("Stub-v0", 3).with_seed(0).with_step_timeout(Duration::from_millis(50));
    let mut env = VectorEnv::new(&config, |_| {
        let mut stub = Stub::new(Discrete::new(2).into(), 5);
        stub.slow_for_seed = Some(1);
        Ok(stub)
    })
    .unwrap();
    env.reset().unwrap();
    match env.step(&array![0.0f32, 0.0, 0.0]) {
        Err(GymError::InstanceTimeout { slot, .. }) => assert_eq!(slot, 1),
        other => panic!("expected InstanceTimeout, got {other:?}"),
    }
    assert!(matches!(env.step(&array![0.0f32, 0.0, 0.0]), Err(GymError::SlotFaulted(1))));
    env.close();
    assert!(env.is_closed());
}

#[test]
fn close_is_idempotent_and_closes_every_instance() {
    let closes = Arc::new(AtomicUsize::new(0));
    let counter = closes.clone();
    let config = VecEnvConfig::new("Stub-v0", 3);
    let mut env = VectorEnv::new(&config, move |_| {
        let mut stub = Stub::new(Discrete::new(2).into(), 2);
        stub.closes = counter.clone();
        Ok(stub)
    })
    .unwrap();
    // The classification prototype is closed during construction.
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    env.reset().unwrap();
    env.close();
    env.close();
    assert_eq!(closes.load(Ordering::SeqCst), 4);
    assert!(matches!(env.reset(), Err(GymError::Closed)));
    assert!(matches!(env.partial_reset(), Err(GymError::Closed)));
    drop(env);
    assert_eq!(closes.load(Ordering::SeqCst), 4);
}

#[test]
fn failed_construction_closes_built_slots() {
    let calls = Arc::new(AtomicUsize::new(0));
    let closes = Arc::new(AtomicUsize::new(0));
    let (calls_in, closes_in) = (calls.clone(), closes.clone());
    let config = VecEnvConfig::new("Stub-v0", 4);
    let result = VectorEnv::new(&config, move |_| {
        // Call 0 is the prototype; one of the slot builds fails.
        if calls_in.fetch_add(1, Ordering::SeqCst) == 2 {
            return Err(GymError::Other("no licence".into()));
        }
        let mut stub = Stub::new(Discrete::new(2).into(), 2);
        stub.closes = closes_in.clone();
        Ok(stub)
    });
    assert!(matches!(result, Err(GymError::InstanceTaskFailure { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 5);
    assert_eq!(closes.load(Ordering::SeqCst), 4);
}

#[test]
fn zero_envs_is_a_config_error() {
    let config = VecEnvConfig::new("Stub-v0", 0);
    let result = VectorEnv::new(&config, |_| Ok(Stub::new(Discrete::new(2).into(), 2)));
    assert!(matches!(result, Err(GymError::InvalidConfig(_))));
}

#[test]
fn render_follows_the_render_spec() {
    let config = VecEnvConfig::new("Stub-v0", 3).with_seed(5).with_render_mode("all");
    let mut env = VectorEnv::new(&config, |_| Ok(Stub::new(Discrete::new(2).into(), 2))).unwrap();
    env.reset().unwrap();
    let frames = env.render().unwrap();
    assert_eq!(frames.iter().map(|(slot, _)| *slot).collect::<Vec<_>>(), vec![0, 1, 2]);
    assert!(matches!(&frames[1].1, RenderFrame::Text(t) if t.contains("Some(6)")));

    let config = VecEnvConfig::new("Stub-v0", 3).with_render_mode(vec![2usize, 0]);
    let mut env = VectorEnv::new(&config, |_| Ok(Stub::new(Discrete::new(2).into(), 2))).unwrap();
    assert_eq!(env.render_indices(), &[2, 0]);
    env.reset().unwrap();
    let slots: Vec<usize> = env.render().unwrap().into_iter().map(|(slot, _)| slot).collect();
    assert_eq!(slots, vec![2, 0]);

    let config = VecEnvConfig::new("Stub-v0", 3).with_render_mode(RenderSpec::Indices(vec![3]));
    let bad = VectorEnv::new(&config, |_| Ok(Stub::new(Discrete::new(2).into(), 2)));
    assert!(matches!(bad, Err(GymError::InvalidRenderSpec(_))));
}

#[test]
fn registered_family_through_make() {
    let config = VecEnvConfig::new("CartPole-v1", 2).with_seed(3).with_render_mode("random_1");
    let mut env = VectorEnv::make(&config).unwrap();
    let d = env.descriptor();
    assert_eq!(d.state_dim, 4);
    assert_eq!(d.action_kind, ActionKind::Discrete);
    assert_eq!(d.reward_threshold, Some(475.0));
    assert_eq!(env.render_indices().len(), 1);

    env.reset().unwrap();
    let actions = env.sample_actions().unwrap();
    let batch = env.step(&actions).unwrap();
    assert_eq!(batch.observations.shape(), &[2, 4]);
    assert!(matches!(env.render().unwrap().as_slice(), [(_, RenderFrame::Text(_))]));

    let unknown = VectorEnv::make(&VecEnvConfig::new("Nope-v0", 2));
    assert!(matches!(unknown, Err(GymError::UnknownEnv(_))));
}

fn switchable_stub_env(num_envs: usize, episode_len: u32) -> (VectorEnv<Stub>, Arc<AtomicBool>) {
    let broken = Arc::new(AtomicBool::new(false));
    let switch = broken.clone();
    let config = VecEnvConfig::new("Stub-v0", num_envs);
    let env = VectorEnv::new(&config, move |_| {
        let mut stub = Stub::new(Discrete::new(2).into(), episode_len);
        stub.broken = switch.clone();
        Ok(stub)
    })
    .unwrap();
    (env, broken)
}

#[test]
fn failed_partial_reset_keeps_pending_slots() {
    let (mut env, broken) = switchable_stub_env(2, 2);
    env.reset().unwrap();
    env.step(&array![0.0f32, 1.0]).unwrap();
    env.step(&array![1.0f32, 0.0]).unwrap();
    assert_eq!(env.done_indices(), &[0, 1]);

    broken.store(true, Ordering::SeqCst);
    assert!(matches!(env.partial_reset(), Err(GymError::InstanceTaskFailure { .. })));
    assert_eq!(env.done_indices(), &[0, 1]);

    broken.store(false, Ordering::SeqCst);
    let retry = env.partial_reset().unwrap();
    assert_eq!(retry.indices, vec![0, 1]);
    assert!(env.partial_reset().unwrap().is_empty());
}

#[test]
fn failed_step_clears_the_done_set() {
    let (mut env, broken) = switchable_stub_env(2, 1);
    env.reset().unwrap();
    env.step(&array![0.0f32, 0.0]).unwrap();
    assert_eq!(env.done_indices(), &[0, 1]);

    broken.store(true, Ordering::SeqCst);
    assert!(env.step(&array![0.0f32, 0.0]).is_err());
    assert!(env.done_indices().is_empty());
    broken.store(false, Ordering::SeqCst);
    assert!(env.partial_reset().unwrap().is_empty());
}

#[test]
fn close_reaches_slots_that_panicked() {
    let closes = Arc::new(AtomicUsize::new(0));
    let counter = closes.clone();
    let config = VecEnvConfig::new("Stub-v0", 3).with_seed(0);
    let mut env = VectorEnv::new(&config, move |_| {
        let mut stub = Stub::new(Discrete::new(2).into(), 5);
        stub.panic_for_seed = Some(1);
        stub.closes = counter.clone();
        Ok(stub)
    })
    .unwrap();
    env.reset().unwrap();
    match env.step(&array![0.0f32, 0.0, 0.0]) {
        Err(GymError::InstanceTaskFailure { slot, source }) => {
            assert_eq!(slot, 1);
            assert!(matches!(*source, GymError::Panicked(ref msg) if msg.contains("physics blew up")));
        }
        other => panic!("expected InstanceTaskFailure, got {other:?}"),
    }
    assert!(matches!(env.step(&array![0.0f32, 0.0, 0.0]), Err(GymError::SlotFaulted(1))));

    env.close();
    // Prototype plus all three slots, the panicked one included.
    assert_eq!(closes.load(Ordering::SeqCst), 4);
}

/// Family with a fixed observation layout; episodes last one step.
struct Shaped {
    space: DynSpace,
    shape: Vec<usize>,
}

impl Env for Shaped {
    fn observation_space(&self) -> DynSpace { self.space.clone() }
    fn action_space(&self) -> DynSpace { Discrete::new(3).into() }

    fn reset(&mut self, _seed: Option<u64>) -> Result<(Observation, Info)> {
        Ok((ArrayD::zeros(IxDyn(&self.shape)), Info::new()))
    }

    fn step(&mut self, _action: &Action) -> Result<Step> {
        Ok(Step::new(ArrayD::ones(IxDyn(&self.shape)), 0.5, true, false, Info::new()))
    }
}

fn drive_shapes(space: DynSpace, obs_shape: &[usize]) {
    let num_envs = 3;
    let config = VecEnvConfig::new("Shaped-v0", num_envs);
    let shape = obs_shape.to_vec();
    let mut env = VectorEnv::new(&config, move |_| Ok(Shaped { space: space.clone(), shape: shape.clone() })).unwrap();
    assert_eq!(env.descriptor().observation_shape(), obs_shape);

    let batched = |lead: usize| -> Vec<usize> { std::iter::once(lead).chain(obs_shape.iter().copied()).collect() };

    assert_eq!(env.reset().unwrap().shape(), batched(num_envs).as_slice());
    let idle = env.partial_reset().unwrap();
    assert!(idle.is_empty());
    assert_eq!(idle.observations.shape(), batched(0).as_slice());

    let batch = env.step(&array![0.0f32, 1.0, 2.0]).unwrap();
    assert_eq!(batch.observations.shape(), batched(num_envs).as_slice());
    assert_eq!(batch.done_indices, vec![0, 1, 2]);

    let fresh = env.partial_reset().unwrap();
    assert_eq!(fresh.indices, vec![0, 1, 2]);
    assert_eq!(fresh.observations.shape(), batched(num_envs).as_slice());
    assert_eq!(env.partial_reset().unwrap().observations.shape(), batched(0).as_slice());
}

#[test]
fn visual_observations_batch_with_a_leading_slot_axis() {
    drive_shapes(BoxSpace::uniform(&[8, 6, 3], 0.0, 255.0).into(), &[8, 6, 3]);

    let config = VecEnvConfig::new("Shaped-v0", 2);
    let env = VectorEnv::new(&config, |_| {
        Ok(Shaped { space: BoxSpace::uniform(&[8, 6, 3], 0.0, 255.0).into(), shape: vec![8, 6, 3] })
    })
    .unwrap();
    assert_eq!(env.descriptor().observation_kind, ObservationKind::Visual);
    assert_eq!(env.descriptor().state_dim, 0);
}

#[test]
fn discrete_observations_batch_as_one_hot_rows() {
    drive_shapes(Discrete::new(5).into(), &[5]);

    let config = VecEnvConfig::new("Shaped-v0", 2);
    let env = VectorEnv::new(&config, |_| Ok(Shaped { space: Discrete::new(5).into(), shape: vec![5] })).unwrap();
    assert_eq!(env.descriptor().observation_kind, ObservationKind::Vector);
    assert_eq!(env.descriptor().state_dim, 5);
}
