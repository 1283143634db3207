//! Selection of the slots that are rendered.

use rand::Rng;
use rand::seq::index;

use crate::core::{GymError, Result};

/// Which slots to render.
///
/// `Mode` accepts `"first"`, `"last"`, `"all"` and `"random_K"`; `Indices` is an
/// explicit list of slot numbers.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum RenderSpec {
    Indices(Vec<i64>),
    Mode(String),
}

impl Default for RenderSpec {
    fn default() -> Self { RenderSpec::Mode("first".into()) }
}

impl From<&str> for RenderSpec {
    fn from(mode: &str) -> Self { RenderSpec::Mode(mode.to_string()) }
}

impl From<String> for RenderSpec {
    fn from(mode: String) -> Self { RenderSpec::Mode(mode) }
}

impl From<Vec<usize>> for RenderSpec {
    fn from(indices: Vec<usize>) -> Self {
        RenderSpec::Indices(indices.into_iter().map(|i| i as i64).collect())
    }
}

impl From<Vec<i64>> for RenderSpec {
    fn from(indices: Vec<i64>) -> Self { RenderSpec::Indices(indices) }
}

/// Resolve `spec` against `num_envs` slots, drawing `random_K` picks from the thread RNG.
pub fn resolve(spec: &RenderSpec, num_envs: usize) -> Result<Vec<usize>> {
    resolve_with_rng(spec, num_envs, &mut rand::thread_rng())
}

/// Resolve `spec` against `num_envs` slots.
///
/// Explicit lists are returned as given (order and duplicates kept) once every
/// entry is known to lie in `[0, num_envs)`.
pub fn resolve_with_rng<R: Rng + ?Sized>(spec: &RenderSpec, num_envs: usize, rng: &mut R) -> Result<Vec<usize>> {
    if num_envs == 0 {
        return Err(GymError::InvalidRenderSpec("no environments to render".into()));
    }
    match spec {
        RenderSpec::Indices(indices) => indices
            .iter()
            .map(|&i| {
                usize::try_from(i)
                    .ok()
                    .filter(|&i| i < num_envs)
                    .ok_or_else(|| GymError::InvalidRenderSpec(format!("index {i} outside [0, {num_envs})")))
            })
            .collect(),
        RenderSpec::Mode(mode) => match mode.as_str() {
            "first" => Ok(vec![0]),
            "last" => Ok(vec![num_envs - 1]),
            "all" => Ok((0..num_envs).collect()),
            other => {
                let count = parse_random(other)
                    .ok_or_else(|| GymError::InvalidRenderSpec(format!("unknown render mode {other:?}")))?;
                if count == 0 || count > num_envs {
                    return Err(GymError::InvalidRenderSpec(format!(
                        "{other:?} needs 0 < K <= {num_envs}"
                    )));
                }
                Ok(index::sample(rng, num_envs, count).into_vec())
            }
        },
    }
}

fn parse_random(mode: &str) -> Option<usize> {
    mode.strip_prefix("random_")?.parse().ok()
}
