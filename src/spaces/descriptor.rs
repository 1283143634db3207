//! One-time classification of an environment family's spaces.
//!
//! A [`SpaceDescriptor`] is derived from a single prototype environment and is
//! then shared, read-only, by every slot of a vector environment.

use tracing::debug;

use crate::core::{Action, Env, GymError, Result};
use crate::spaces::DynSpace;

/// How observations are laid out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ObservationKind {
    Vector,
    Visual,
}

/// Action space family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ActionKind {
    Continuous,
    Discrete,
    TupleDiscrete,
}

/// Camera-like observation layout. Only present for visual observations.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VisualInfo {
    pub source_count: usize,
    pub resolution: Vec<usize>,
}

/// Observation and action layout shared by all slots of a vector environment.
#[derive(Clone, Debug, PartialEq)]
pub struct SpaceDescriptor {
    /// Length of a flat vector observation, 0 for visual observations.
    pub state_dim: usize,
    pub observation_kind: ObservationKind,
    pub visual: Option<VisualInfo>,
    pub action_kind: ActionKind,
    /// Continuous: shape of the action vector. Discrete: `[n]`. Tuple: per-slot counts.
    pub action_dims: Vec<usize>,
    /// "Solved" bar of the environment family. Informational only.
    pub reward_threshold: Option<f32>,
    pub observation_space: DynSpace,
    pub action_space: DynSpace,
}

impl SpaceDescriptor {
    /// Classify `prototype` and close it. The prototype is closed even when
    /// classification fails.
    pub fn classify<E: Env>(mut prototype: E) -> Result<Self> {
        let descriptor = Self::from_spaces(
            prototype.observation_space(),
            prototype.action_space(),
            prototype.reward_threshold(),
        );
        prototype.close();
        let descriptor = descriptor?;
        debug!(
            observation = ?descriptor.observation_kind,
            action = ?descriptor.action_kind,
            state_dim = descriptor.state_dim,
            "classified environment spaces"
        );
        Ok(descriptor)
    }

    /// Classify a pair of spaces directly.
    pub fn from_spaces(
        observation_space: DynSpace,
        action_space: DynSpace,
        reward_threshold: Option<f32>,
    ) -> Result<Self> {
        let (observation_kind, state_dim, visual) = match &observation_space {
            DynSpace::Box(b) if b.rank() == 1 => (ObservationKind::Vector, b.shape()[0], None),
            DynSpace::Box(b) if b.rank() == 3 => (
                ObservationKind::Visual,
                0,
                Some(VisualInfo { source_count: 1, resolution: b.shape().to_vec() }),
            ),
            // Discrete observations are one-hot encoded by the environment pipeline.
            DynSpace::Discrete(d) => (ObservationKind::Vector, d.n() as usize, None),
            other => {
                return Err(GymError::UnsupportedObservationSpace(format!(
                    "{} with shape {:?}; expected a rank-1 or rank-3 Box, or Discrete",
                    other.kind_name(),
                    other.shape()
                )));
            }
        };

        let (action_kind, action_dims) = match &action_space {
            DynSpace::Box(b) if b.rank() == 1 => (ActionKind::Continuous, b.shape().to_vec()),
            DynSpace::Box(b) => {
                return Err(GymError::UnsupportedActionSpace(format!(
                    "continuous actions must be rank 1, got shape {:?}",
                    b.shape()
                )));
            }
            DynSpace::Discrete(d) => (ActionKind::Discrete, vec![d.n() as usize]),
            DynSpace::MultiDiscrete(_) | DynSpace::Tuple(_) => match action_space.discrete_slots() {
                Some(nvec) if !nvec.is_empty() => {
                    (ActionKind::TupleDiscrete, nvec.into_iter().map(|n| n as usize).collect())
                }
                _ => {
                    return Err(GymError::UnsupportedActionSpace(
                        "every slot of a tuple action space must be Discrete".into(),
                    ));
                }
            },
        };

        Ok(Self {
            state_dim,
            observation_kind,
            visual,
            action_kind,
            action_dims,
            reward_threshold,
            observation_space,
            action_space,
        })
    }

    pub fn is_continuous(&self) -> bool { self.action_kind == ActionKind::Continuous }

    pub fn is_visual(&self) -> bool { self.observation_kind == ObservationKind::Visual }

    /// Shape of one observation as produced by the environment pipeline.
    pub fn observation_shape(&self) -> Vec<usize> {
        match &self.visual {
            Some(v) => v.resolution.clone(),
            None => vec![self.state_dim],
        }
    }

    /// Number of scalars one slot contributes to an action batch.
    pub fn action_width(&self) -> usize {
        match self.action_kind {
            ActionKind::Discrete => 1,
            ActionKind::TupleDiscrete => self.action_dims.len(),
            ActionKind::Continuous => self.action_dims.iter().product(),
        }
    }

    /// Reshape a flat, slot-major action batch into one [`Action`] per slot.
    pub fn split_actions(&self, flat: &[f32], num_envs: usize) -> Result<Vec<Action>> {
        let width = self.action_width();
        let expected = width * num_envs;
        if flat.len() != expected {
            return Err(GymError::InvalidActionBatch { expected, actual: flat.len() });
        }
        if width == 0 {
            return Ok((0..num_envs).map(|_| Action::Continuous(Vec::new())).collect());
        }
        flat.chunks(width)
            .map(|row| match self.action_kind {
                ActionKind::Continuous => Ok(Action::Continuous(row.to_vec())),
                ActionKind::Discrete => Ok(Action::Discrete(to_choice(row[0])?)),
                ActionKind::TupleDiscrete => {
                    Ok(Action::Tuple(row.iter().map(|&v| to_choice(v)).collect::<Result<_>>()?))
                }
            })
            .collect()
    }

    /// Whether `action` has the shape this descriptor expects.
    pub fn accepts(&self, action: &Action) -> bool {
        match (self.action_kind, action) {
            (ActionKind::Discrete, Action::Discrete(_)) => true,
            (ActionKind::TupleDiscrete, Action::Tuple(c)) => c.len() == self.action_dims.len(),
            (ActionKind::Continuous, Action::Continuous(v)) => v.len() == self.action_width(),
            _ => false,
        }
    }
}

fn to_choice(value: f32) -> Result<u32> {
    if value >= 0.0 && value.fract() == 0.0 && value <= u32::MAX as f32 {
        Ok(value as u32)
    } else {
        Err(GymError::InvalidAction(format!("{value} is not a discrete choice")))
    }
}
