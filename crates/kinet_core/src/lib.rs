//! The `kinet_core` crate is the computational engine behind Kinet.
//! It turns a chemical reaction network into its rate equations and solves them.
//!
//! Key components:
//! - **Network**: `Species`, `Reaction`, `RateLaw` and the frozen `ReactionNetwork`
//!   with its stoichiometric matrix.
//! - **Equation Engine**: a bytecode VM for rate expressions, generic over `Scalar`
//!   so the same code runs on `f64` and on dual numbers.
//! - **Integrator**: adaptive Tsitouras 5(4) integration onto a time grid.
//! - **Linear**: closed-form eigen-solution of first-order networks.
//! - **Steady State**: elimination of fast intermediates by algebraic constraints.
pub mod autodiff;
pub mod cancel;
pub mod equation_engine;
pub mod error;
pub mod integrator;
pub mod linear;
pub mod network;
pub mod ode;
pub mod parameters;
pub mod rates;
pub mod solvers;
pub mod steady_state;
pub mod stoichiometry;
pub mod traits;
pub mod trajectory;

pub use cancel::CancellationToken;
pub use error::{KineticsError, KineticsResult, NegativeConcentrationWarning};
pub use integrator::{integrate, Integrator, IntegratorSettings, TimeGrid};
pub use linear::{solve_linear, solve_linear_with, ClosedFormSolution, ExponentialMode, LinearSolverSettings};
pub use network::{build_network, RateLaw, Reaction, ReactionNetwork, Species};
pub use ode::{assemble, derivative, KineticModel, OdeSystem};
pub use parameters::ParameterSet;
pub use steady_state::{
    apply_steady_state, apply_steady_state_with, Constraint, NewtonSettings, ReducedNetwork,
    SteadyStateGroup, SteadyStateSettings,
};
pub use trajectory::Trajectory;
