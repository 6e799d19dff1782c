//! Adaptive time integration of kinetic models onto a caller-chosen time grid.

use crate::cancel::CancellationToken;
use crate::error::{KineticsError, KineticsResult};
use crate::ode::KineticModel;
use crate::parameters::ParameterSet;
use crate::solvers::{initial_step, Tsit5};
use crate::traits::DynamicalSystem;
use crate::trajectory::Trajectory;
use serde::{Deserialize, Serialize};

/// Settings for the adaptive integrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegratorSettings {
    pub rtol: f64,
    pub atol: f64,
    /// First trial step; `0` picks one from the local scale of the problem.
    pub initial_step: f64,
    pub min_step: f64,
    /// `None` leaves the step bounded only by the output grid.
    pub max_step: Option<f64>,
    /// Budget of attempted steps, rejected ones included.
    pub max_steps: usize,
}

impl Default for IntegratorSettings {
    fn default() -> Self {
        Self {
            rtol: 1e-8,
            atol: 1e-12,
            initial_step: 0.0,
            min_step: 1e-14,
            max_step: None,
            max_steps: 100_000,
        }
    }
}

impl IntegratorSettings {
    pub fn validate(&self) -> KineticsResult<()> {
        if !self.rtol.is_finite() || self.rtol <= 0.0 {
            return Err(KineticsError::invalid("rtol must be finite and > 0"));
        }
        if !self.atol.is_finite() || self.atol <= 0.0 {
            return Err(KineticsError::invalid("atol must be finite and > 0"));
        }
        if !self.initial_step.is_finite() || self.initial_step < 0.0 {
            return Err(KineticsError::invalid("initial_step must be finite and >= 0"));
        }
        if !self.min_step.is_finite() || self.min_step <= 0.0 {
            return Err(KineticsError::invalid("min_step must be finite and > 0"));
        }
        if let Some(max_step) = self.max_step {
            if !(max_step >= self.min_step) {
                return Err(KineticsError::invalid("max_step must be >= min_step"));
            }
        }
        if self.max_steps == 0 {
            return Err(KineticsError::invalid("max_steps must be > 0"));
        }
        Ok(())
    }

    fn bound(&self, h: f64) -> f64 {
        match self.max_step {
            Some(max_step) => h.min(max_step),
            None => h,
        }
    }
}

/// Output time grids.
pub struct TimeGrid;

impl TimeGrid {
    /// `n` evenly spaced points from `t0` to `t1`, both included.
    pub fn linspace(t0: f64, t1: f64, n: usize) -> KineticsResult<Vec<f64>> {
        if !t0.is_finite() || !t1.is_finite() {
            return Err(KineticsError::invalid("time grid bounds must be finite"));
        }
        match n {
            0 => Err(KineticsError::invalid("time grid needs at least one point")),
            1 => Ok(vec![t0]),
            _ => {
                if t1 <= t0 {
                    return Err(KineticsError::invalid("time grid end must exceed its start"));
                }
                let dt = (t1 - t0) / (n - 1) as f64;
                let mut grid: Vec<f64> = (0..n).map(|i| t0 + dt * i as f64).collect();
                grid[n - 1] = t1;
                Ok(grid)
            }
        }
    }

    /// Checks that a grid is non-empty, finite and strictly increasing.
    pub fn validate(times: &[f64]) -> KineticsResult<()> {
        if times.is_empty() {
            return Err(KineticsError::invalid("time grid is empty"));
        }
        if let Some(bad) = times.iter().find(|t| !t.is_finite()) {
            return Err(KineticsError::invalid(format!("time point {} is not finite", bad)));
        }
        if let Some(w) = times.windows(2).find(|w| w[1] <= w[0]) {
            return Err(KineticsError::invalid(format!(
                "time points must be strictly increasing ({} then {})",
                w[0], w[1]
            )));
        }
        Ok(())
    }
}

/// Configured integrator; holds no state between runs.
#[derive(Debug, Clone, Default)]
pub struct Integrator {
    settings: IntegratorSettings,
    cancel: CancellationToken,
}

impl Integrator {
    pub fn new(settings: IntegratorSettings) -> Self {
        Self {
            settings,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn settings(&self) -> &IntegratorSettings {
        &self.settings
    }

    /// Integrates `model` from `initial_state` at `time_points[0]`, sampling
    /// the state at every entry of `time_points`.
    pub fn integrate<M: KineticModel>(
        &self,
        model: &M,
        initial_state: &[f64],
        parameters: &ParameterSet,
        time_points: &[f64],
    ) -> KineticsResult<Trajectory> {
        self.settings.validate()?;
        TimeGrid::validate(time_points)?;
        let system = model.assemble(parameters, &self.cancel)?;
        let n = system.dimension();
        if initial_state.len() != n {
            return Err(KineticsError::DimensionMismatch {
                context: "initial state",
                expected: n,
                actual: initial_state.len(),
            });
        }
        if let Some(bad) = initial_state.iter().find(|v| !v.is_finite()) {
            return Err(KineticsError::invalid(format!(
                "initial state contains non-finite value {}",
                bad
            )));
        }

        let settings = &self.settings;
        let mut t = time_points[0];
        let mut y = initial_state.to_vec();
        let mut states = Vec::with_capacity(time_points.len());
        states.push(y.clone());

        let mut stepper = Tsit5::new(n);
        let mut h = if settings.initial_step > 0.0 {
            settings.initial_step
        } else if time_points.len() > 1 {
            initial_step(&system, t, &y, settings.rtol, settings.atol)?
        } else {
            0.0
        };
        h = settings.bound(h);

        let mut attempts = 0usize;
        let mut rejected = 0usize;
        for &target in &time_points[1..] {
            while t < target {
                self.cancel.check()?;
                if attempts >= settings.max_steps {
                    return Err(KineticsError::IntegrationDiverged {
                        time: t,
                        what: format!("step budget of {} exhausted", settings.max_steps),
                    });
                }
                attempts += 1;

                let remaining = target - t;
                let landing = h >= remaining;
                let dt = if landing { remaining } else { h };
                let err = stepper.attempt(&system, t, &y, dt, settings.rtol, settings.atol)?;

                if err <= 1.0 {
                    stepper.accept(&mut y);
                    t = if landing { target } else { t + dt };
                    if let Some(i) = y.iter().position(|v| !v.is_finite()) {
                        return Err(KineticsError::IntegrationDiverged {
                            time: t,
                            what: format!("state component {} became non-finite", i),
                        });
                    }
                    let factor = step_factor(err);
                    let proposed = dt * factor;
                    // A step shortened to hit the grid says nothing about the natural scale.
                    h = if landing && factor >= 1.0 {
                        proposed.max(h)
                    } else {
                        proposed
                    };
                } else {
                    rejected += 1;
                    h = dt * step_factor(err).min(1.0);
                }

                h = settings.bound(h);
                if h < settings.min_step {
                    return Err(KineticsError::IntegrationDiverged {
                        time: t,
                        what: format!(
                            "step size {:e} fell below min_step {:e}",
                            h, settings.min_step
                        ),
                    });
                }
            }
            states.push(y.clone());
        }

        log::debug!(
            "integrated {} states over [{}, {}]: {} steps, {} rejected",
            n,
            time_points[0],
            t,
            attempts,
            rejected
        );

        Ok(Trajectory {
            species: model.state_names(),
            times: time_points.to_vec(),
            states,
            warnings: system.clamp_warnings(),
        })
    }
}

// h_new / h = clamp(0.9 · err^(-1/5), 0.2, 5); a non-finite error means a blown-up stage.
fn step_factor(err: f64) -> f64 {
    if !err.is_finite() {
        0.2
    } else if err == 0.0 {
        5.0
    } else {
        (0.9 * err.powf(-0.2)).clamp(0.2, 5.0)
    }
}

/// Integrates with default settings and no cancellation.
pub fn integrate<M: KineticModel>(
    model: &M,
    initial_state: &[f64],
    parameters: &ParameterSet,
    time_points: &[f64],
) -> KineticsResult<Trajectory> {
    Integrator::default().integrate(model, initial_state, parameters, time_points)
}
