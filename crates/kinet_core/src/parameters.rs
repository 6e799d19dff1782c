use crate::error::{KineticsError, KineticsResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Named numeric parameters (rate constants, totals) for one solve.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSet {
    values: BTreeMap<String, f64>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`ParameterSet::insert`].
    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) -> Option<f64> {
        self.values.insert(name.into(), value)
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    /// Looks up a parameter that must be present and finite.
    pub fn require(&self, name: &str) -> KineticsResult<f64> {
        match self.get(name) {
            Some(value) if value.is_finite() => Ok(value),
            Some(value) => Err(KineticsError::invalid(format!(
                "parameter {} must be finite, got {}",
                name, value
            ))),
            None => Err(KineticsError::MissingParameter {
                name: name.to_string(),
            }),
        }
    }

    /// Resolves `names` in order into a dense vector.
    pub fn resolve(&self, names: &[String]) -> KineticsResult<Vec<f64>> {
        names.iter().map(|name| self.require(name)).collect()
    }

    /// Returns a copy where entries of `overrides` replace those of `self`.
    pub fn merged(&self, overrides: &ParameterSet) -> ParameterSet {
        let mut values = self.values.clone();
        values.extend(overrides.values.iter().map(|(k, v)| (k.clone(), *v)));
        ParameterSet { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for ParameterSet {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}
