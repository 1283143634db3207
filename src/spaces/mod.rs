//! Observation and action spaces.

pub mod space;
pub mod descriptor;

use ndarray::{Array1, ArrayD, IxDyn};
use rand::distributions::{Distribution, Uniform};
use rand::Rng;

use crate::core::{Action, GymError, Result};

pub use descriptor::{ActionKind, ObservationKind, SpaceDescriptor, VisualInfo};
pub use space::Space;

/// A discrete space of integers in [0, n).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Discrete {
    n: u32,
}

impl Discrete {
    pub fn new(n: u32) -> Self {
        assert!(n > 0, "Discrete space requires n > 0");
        Self { n }
    }

    pub fn n(&self) -> u32 { self.n }
}

impl Space for Discrete {
    type Element = u32;

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Self::Element {
        if self.n == 1 { return 0; }
        Uniform::from(0..self.n).sample(rng)
    }

    fn contains(&self, elem: &Self::Element) -> bool { *elem < self.n }
}

/// A multi-dimensional discrete space with per-dimension sizes nvec[i] (values in [0, nvec[i])).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MultiDiscrete {
    nvec: Vec<u32>,
}

impl MultiDiscrete {
    pub fn new<I: Into<Vec<u32>>>(nvec: I) -> Self {
        let nvec = nvec.into();
        assert!(!nvec.is_empty(), "MultiDiscrete requires at least one dimension");
        for (i, &n) in nvec.iter().enumerate() {
            assert!(n > 0, "MultiDiscrete nvec[{i}] must be > 0");
        }
        Self { nvec }
    }

    pub fn nvec(&self) -> &[u32] { &self.nvec }
    pub fn ndim(&self) -> usize { self.nvec.len() }
}

impl Space for MultiDiscrete {
    type Element = Vec<u32>;

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Self::Element {
        self.nvec
            .iter()
            .map(|&n| if n == 1 { 0 } else { Uniform::from(0..n).sample(rng) })
            .collect()
    }

    fn contains(&self, elem: &Self::Element) -> bool {
        if elem.len() != self.nvec.len() { return false; }
        elem.iter().zip(self.nvec.iter()).all(|(&v, &n)| v < n)
    }
}

/// A box of `f32` values with an arbitrary shape and per-element inclusive bounds.
///
/// Bounds may be infinite; sampling an unbounded dimension draws from a unit
/// window next to the finite bound, or from [-1, 1] when both are infinite.
#[derive(Clone, Debug, PartialEq)]
pub struct BoxSpace {
    low: ArrayD<f32>,
    high: ArrayD<f32>,
}

impl BoxSpace {
    pub fn new(low: ArrayD<f32>, high: ArrayD<f32>) -> Self {
        assert_eq!(low.shape(), high.shape(), "low and high must share a shape");
        for (i, (l, h)) in low.iter().zip(high.iter()).enumerate() {
            assert!(l <= h, "low[{i}] > high[{i}]");
        }
        Self { low, high }
    }

    /// A box where every element shares the same scalar bounds.
    pub fn uniform(shape: &[usize], low: f32, high: f32) -> Self {
        Self::new(ArrayD::from_elem(IxDyn(shape), low), ArrayD::from_elem(IxDyn(shape), high))
    }

    /// A rank-1 box from per-dimension bounds.
    pub fn from_bounds(low: Vec<f32>, high: Vec<f32>) -> Self {
        Self::new(Array1::from(low).into_dyn(), Array1::from(high).into_dyn())
    }

    pub fn shape(&self) -> &[usize] { self.low.shape() }
    pub fn rank(&self) -> usize { self.low.ndim() }
    pub fn low(&self) -> &ArrayD<f32> { &self.low }
    pub fn high(&self) -> &ArrayD<f32> { &self.high }

    fn sample_dim<R: Rng + ?Sized>(low: f32, high: f32, rng: &mut R) -> f32 {
        let (lo, hi) = match (low.is_finite(), high.is_finite()) {
            (true, true) => (low, high),
            (true, false) => (low, low + 1.0),
            (false, true) => (high - 1.0, high),
            (false, false) => (-1.0, 1.0),
        };
        if lo == hi { return lo; }
        Uniform::new_inclusive(lo, hi).sample(rng)
    }
}

impl Space for BoxSpace {
    type Element = ArrayD<f32>;

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Self::Element {
        let mut out = self.low.clone();
        for ((v, &l), &h) in out.iter_mut().zip(self.low.iter()).zip(self.high.iter()) {
            *v = Self::sample_dim(l, h, rng);
        }
        out
    }

    fn contains(&self, elem: &Self::Element) -> bool {
        elem.shape() == self.low.shape()
            && elem
                .iter()
                .zip(self.low.iter().zip(self.high.iter()))
                .all(|(v, (l, h))| l <= v && v <= h)
    }
}

/// A runtime description of any supported space, used for introspection.
#[derive(Clone, Debug, PartialEq)]
pub enum DynSpace {
    Discrete(Discrete),
    MultiDiscrete(MultiDiscrete),
    Box(BoxSpace),
    Tuple(Vec<DynSpace>),
}

impl DynSpace {
    /// Short family name used in log lines and errors.
    pub fn kind_name(&self) -> &'static str {
        match self {
            DynSpace::Discrete(_) => "Discrete",
            DynSpace::MultiDiscrete(_) => "MultiDiscrete",
            DynSpace::Box(_) => "Box",
            DynSpace::Tuple(_) => "Tuple",
        }
    }

    /// Shape of a single element. Tuples have no single shape and report their arity.
    pub fn shape(&self) -> Vec<usize> {
        match self {
            DynSpace::Discrete(_) => Vec::new(),
            DynSpace::MultiDiscrete(md) => vec![md.ndim()],
            DynSpace::Box(b) => b.shape().to_vec(),
            DynSpace::Tuple(items) => vec![items.len()],
        }
    }

    /// Per-slot cardinalities when every slot is discrete.
    pub fn discrete_slots(&self) -> Option<Vec<u32>> {
        match self {
            DynSpace::Discrete(d) => Some(vec![d.n()]),
            DynSpace::MultiDiscrete(md) => Some(md.nvec().to_vec()),
            DynSpace::Tuple(items) => items
                .iter()
                .map(|item| match item {
                    DynSpace::Discrete(d) => Some(d.n()),
                    _ => None,
                })
                .collect(),
            DynSpace::Box(_) => None,
        }
    }

    /// Draw an [`Action`] from this space.
    pub fn sample_action<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Action> {
        match self {
            DynSpace::Discrete(d) => Ok(Action::Discrete(d.sample(rng))),
            DynSpace::MultiDiscrete(md) => Ok(Action::Tuple(md.sample(rng))),
            DynSpace::Box(b) if b.rank() == 1 => Ok(Action::Continuous(b.sample(rng).iter().copied().collect())),
            DynSpace::Box(b) => Err(GymError::UnsupportedActionSpace(format!(
                "cannot sample a rank-{} box as an action",
                b.rank()
            ))),
            DynSpace::Tuple(_) => match self.discrete_slots() {
                Some(nvec) if !nvec.is_empty() => Ok(Action::Tuple(MultiDiscrete::new(nvec).sample(rng))),
                _ => Err(GymError::UnsupportedActionSpace(
                    "tuple action spaces must contain at least one slot, all Discrete".into(),
                )),
            },
        }
    }

    /// Whether `action` is a valid member of this space.
    pub fn contains_action(&self, action: &Action) -> bool {
        match (self, action) {
            (DynSpace::Discrete(d), Action::Discrete(a)) => d.contains(a),
            (DynSpace::Box(b), Action::Continuous(values)) => {
                b.rank() == 1 && b.contains(&Array1::from(values.clone()).into_dyn())
            }
            (DynSpace::MultiDiscrete(_) | DynSpace::Tuple(_), Action::Tuple(choices)) => {
                match self.discrete_slots() {
                    Some(nvec) => choices.len() == nvec.len() && choices.iter().zip(&nvec).all(|(c, n)| c < n),
                    None => false,
                }
            }
            _ => false,
        }
    }
}

impl From<Discrete> for DynSpace { fn from(s: Discrete) -> Self { DynSpace::Discrete(s) } }
impl From<MultiDiscrete> for DynSpace { fn from(s: MultiDiscrete) -> Self { DynSpace::MultiDiscrete(s) } }
impl From<BoxSpace> for DynSpace { fn from(s: BoxSpace) -> Self { DynSpace::Box(s) } }
