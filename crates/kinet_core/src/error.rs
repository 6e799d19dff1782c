//! Error types for network construction and the three solution paths.

use thiserror::Error;

/// Errors raised while building, assembling or solving a reaction network.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum KineticsError {
    #[error("Inconsistent stoichiometry: {what}")]
    InconsistentStoichiometry { what: String },

    #[error("Invalid rate law for reaction {reaction}: {what}")]
    InvalidRateLaw { reaction: usize, what: String },

    #[error("Missing parameter: {name}")]
    MissingParameter { name: String },

    #[error("Dimension mismatch in {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid input: {what}")]
    InvalidInput { what: String },

    #[error("Integration diverged at t = {time}: {what}")]
    IntegrationDiverged { time: f64, what: String },

    #[error("Network is not first-order: {what}")]
    NotFirstOrder { what: String },

    #[error("Rate matrix is not diagonalizable: eigenvalue {eigenvalue} has multiplicity {multiplicity} but only {eigenvectors} eigenvector(s)")]
    NonDiagonalizable {
        eigenvalue: String,
        multiplicity: usize,
        eigenvectors: usize,
    },

    #[error("Eigenvector basis is singular (condition number {condition:e})")]
    SingularEigenbasis { condition: f64 },

    #[error("No physical steady state: {what}")]
    NoPhysicalSteadyState { what: String },

    #[error("Steady-state system could not be solved: {what}")]
    UnsolvableSteadyState { what: String },

    #[error("Computation cancelled")]
    Cancelled,
}

pub type KineticsResult<T> = Result<T, KineticsError>;

impl KineticsError {
    pub(crate) fn invalid(what: impl Into<String>) -> Self {
        KineticsError::InvalidInput { what: what.into() }
    }

    pub(crate) fn stoichiometry(what: impl Into<String>) -> Self {
        KineticsError::InconsistentStoichiometry { what: what.into() }
    }
}

/// Concentration clamping event recorded during rate evaluation.
///
/// Only the first clamp of each species within a solve is kept; it is a
/// warning, the solve carries on with the clamped value.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NegativeConcentrationWarning {
    pub species: String,
    pub value: f64,
    pub time: f64,
}
