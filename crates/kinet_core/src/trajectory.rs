use crate::error::{KineticsError, KineticsResult, NegativeConcentrationWarning};
use serde::{Deserialize, Serialize};

/// Concentrations sampled at the requested output times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub species: Vec<String>,
    pub times: Vec<f64>,
    /// One state per entry of `times`, in `species` order.
    pub states: Vec<Vec<f64>>,
    #[serde(default)]
    pub warnings: Vec<NegativeConcentrationWarning>,
}

impl Trajectory {
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn final_state(&self) -> Option<&[f64]> {
        self.states.last().map(Vec::as_slice)
    }

    /// Time series of one species.
    pub fn series(&self, name: &str) -> KineticsResult<Vec<f64>> {
        let i = self
            .species
            .iter()
            .position(|s| s == name)
            .ok_or_else(|| KineticsError::invalid(format!("trajectory has no species {}", name)))?;
        Ok(self.states.iter().map(|state| state[i]).collect())
    }

    /// `(time, state)` pairs in time order.
    pub fn iter(&self) -> impl Iterator<Item = (f64, &[f64])> + '_ {
        self.times
            .iter()
            .copied()
            .zip(self.states.iter().map(Vec::as_slice))
    }
}
