//! Steady-state and quasi-equilibrium elimination of fast intermediates.
//!
//! The grouped species are removed from the state vector. At every slow state
//! the algebraic constraints are solved for them by damped Newton iteration
//! from a fixed list of seeds, and the slow species evolve with the rates
//! evaluated at that root.

use crate::autodiff::{jacobian, Dual};
use crate::cancel::CancellationToken;
use crate::error::{KineticsError, KineticsResult, NegativeConcentrationWarning};
use crate::network::ReactionNetwork;
use crate::ode::KineticModel;
use crate::parameters::ParameterSet;
use crate::rates::RateEvaluator;
use crate::traits::{DynamicalSystem, Scalar};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;

/// Uniform seed magnitudes tried after the warm start, each with both signs.
const SEED_MAGNITUDES: [f64; 7] = [1.0, 0.1, 10.0, 1e-3, 1e3, 1e-6, 1e-9];
const MAX_BACKTRACKS: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewtonSettings {
    pub max_steps: usize,
    pub damping: f64,
    /// Residuals are converged when below `tolerance` times their own magnitude.
    pub tolerance: f64,
}

impl Default for NewtonSettings {
    fn default() -> Self {
        Self {
            max_steps: 25,
            damping: 1.0,
            tolerance: 1e-9,
        }
    }
}

impl NewtonSettings {
    pub fn validate(&self) -> KineticsResult<()> {
        if self.max_steps == 0 {
            return Err(KineticsError::invalid("max_steps must be greater than zero"));
        }
        if !(self.damping > 0.0 && self.damping <= 1.0) {
            return Err(KineticsError::invalid("damping must lie in (0, 1]"));
        }
        if !(self.tolerance > 0.0) {
            return Err(KineticsError::invalid("tolerance must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SteadyStateSettings {
    pub newton: NewtonSettings,
    /// Roots with a grouped concentration below `-positivity_tolerance` are unphysical.
    pub positivity_tolerance: f64,
}

impl Default for SteadyStateSettings {
    fn default() -> Self {
        Self {
            newton: NewtonSettings {
                max_steps: 50,
                ..NewtonSettings::default()
            },
            positivity_tolerance: 1e-9,
        }
    }
}

impl SteadyStateSettings {
    pub fn validate(&self) -> KineticsResult<()> {
        self.newton.validate()?;
        if !(self.positivity_tolerance >= 0.0) || !self.positivity_tolerance.is_finite() {
            return Err(KineticsError::invalid("positivity_tolerance must be finite and >= 0"));
        }
        Ok(())
    }
}

/// One algebraic equation used to eliminate a grouped species.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Constraint {
    /// dC/dt = 0 for the named species.
    ZeroNetRate { species: String },
    /// r[forward] = r[reverse] for a fast reversible pair of reactions.
    Equilibrium { forward: usize, reverse: usize },
    /// Σ wᵢ·Cᵢ = p[total].
    Conservation {
        terms: Vec<(String, f64)>,
        total: String,
    },
}

impl Constraint {
    pub fn zero_net_rate(species: &str) -> Self {
        Constraint::ZeroNetRate {
            species: species.to_string(),
        }
    }

    pub fn equilibrium(forward: usize, reverse: usize) -> Self {
        Constraint::Equilibrium { forward, reverse }
    }

    pub fn conservation(terms: &[(&str, f64)], total: &str) -> Self {
        Constraint::Conservation {
            terms: terms.iter().map(|(n, w)| (n.to_string(), *w)).collect(),
            total: total.to_string(),
        }
    }
}

/// Species to eliminate, with one constraint per species.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SteadyStateGroup {
    pub species: Vec<String>,
    pub constraints: Vec<Constraint>,
}

impl SteadyStateGroup {
    /// Classic steady-state approximation: every grouped species has dC/dt = 0.
    pub fn new(species: &[&str]) -> Self {
        Self {
            species: species.iter().map(|s| s.to_string()).collect(),
            constraints: species.iter().map(|s| Constraint::zero_net_rate(s)).collect(),
        }
    }

    pub fn with_constraints(species: &[&str], constraints: Vec<Constraint>) -> Self {
        Self {
            species: species.iter().map(|s| s.to_string()).collect(),
            constraints,
        }
    }
}

#[derive(Debug, Clone)]
enum CompiledConstraint {
    ZeroNetRate(usize),
    Equilibrium { forward: usize, reverse: usize },
    Conservation { terms: Vec<(usize, f64)>, total: String },
}

/// A network with its grouped species replaced by algebraic constraints.
///
/// The state of a reduced network holds only the slow species, in network order.
#[derive(Debug, Clone)]
pub struct ReducedNetwork<'n> {
    network: &'n ReactionNetwork,
    group: SteadyStateGroup,
    eliminated: Vec<usize>,
    slow: Vec<usize>,
    constraints: Vec<CompiledConstraint>,
    parameters: ParameterSet,
    settings: SteadyStateSettings,
}

pub fn apply_steady_state<'n>(
    network: &'n ReactionNetwork,
    group: &SteadyStateGroup,
    parameters: &ParameterSet,
) -> KineticsResult<ReducedNetwork<'n>> {
    apply_steady_state_with(network, group, parameters, &SteadyStateSettings::default())
}

pub fn apply_steady_state_with<'n>(
    network: &'n ReactionNetwork,
    group: &SteadyStateGroup,
    parameters: &ParameterSet,
    settings: &SteadyStateSettings,
) -> KineticsResult<ReducedNetwork<'n>> {
    settings.validate()?;
    if group.species.is_empty() {
        return Err(KineticsError::invalid("steady-state group is empty"));
    }
    if group.constraints.len() != group.species.len() {
        return Err(KineticsError::invalid(format!(
            "steady-state group has {} species but {} constraints",
            group.species.len(),
            group.constraints.len()
        )));
    }

    let mut eliminated = Vec::with_capacity(group.species.len());
    for name in &group.species {
        let i = network.require_species(name)?;
        if eliminated.contains(&i) {
            return Err(KineticsError::invalid(format!(
                "species {} appears twice in the steady-state group",
                name
            )));
        }
        eliminated.push(i);
    }
    if eliminated.len() == network.dimension() {
        return Err(KineticsError::invalid(
            "steady-state group would eliminate every species",
        ));
    }
    let slow: Vec<usize> = (0..network.dimension())
        .filter(|i| !eliminated.contains(i))
        .collect();

    let reaction_count = network.reactions().len();
    let constraints = group
        .constraints
        .iter()
        .map(|constraint| match constraint {
            Constraint::ZeroNetRate { species } => {
                let i = network.require_species(species)?;
                if !eliminated.contains(&i) {
                    return Err(KineticsError::invalid(format!(
                        "zero net rate of {} given, but {} is not in the group",
                        species, species
                    )));
                }
                Ok(CompiledConstraint::ZeroNetRate(i))
            }
            Constraint::Equilibrium { forward, reverse } => {
                if *forward >= reaction_count || *reverse >= reaction_count || forward == reverse {
                    return Err(KineticsError::invalid(format!(
                        "equilibrium needs two distinct reactions below {}, got {} and {}",
                        reaction_count, forward, reverse
                    )));
                }
                Ok(CompiledConstraint::Equilibrium {
                    forward: *forward,
                    reverse: *reverse,
                })
            }
            Constraint::Conservation { terms, total } => {
                let terms = terms
                    .iter()
                    .map(|(name, weight)| {
                        if !weight.is_finite() {
                            return Err(KineticsError::invalid(format!(
                                "conservation weight of {} is not finite",
                                name
                            )));
                        }
                        Ok((network.require_species(name)?, *weight))
                    })
                    .collect::<KineticsResult<Vec<_>>>()?;
                if !terms
                    .iter()
                    .any(|(i, w)| *w != 0.0 && eliminated.contains(i))
                {
                    return Err(KineticsError::invalid(format!(
                        "conservation of {} involves no grouped species",
                        total
                    )));
                }
                Ok(CompiledConstraint::Conservation {
                    terms,
                    total: total.clone(),
                })
            }
        })
        .collect::<KineticsResult<Vec<_>>>()?;

    let reduced = ReducedNetwork {
        network,
        group: group.clone(),
        eliminated,
        slow,
        constraints,
        parameters: parameters.clone(),
        settings: settings.clone(),
    };
    // Surface missing rate constants and totals now rather than mid-integration.
    reduced.system(parameters, CancellationToken::new())?;

    log::debug!(
        "eliminated {:?}, {} slow species remain",
        reduced.group.species,
        reduced.slow.len()
    );
    Ok(reduced)
}

impl<'n> ReducedNetwork<'n> {
    pub fn network(&self) -> &'n ReactionNetwork {
        self.network
    }

    pub fn group(&self) -> &SteadyStateGroup {
        &self.group
    }

    /// Parameters bound at reduction time.
    pub fn parameters(&self) -> &ParameterSet {
        &self.parameters
    }

    pub fn slow_species(&self) -> Vec<String> {
        self.slow
            .iter()
            .map(|&i| self.network.species()[i].name.clone())
            .collect()
    }

    pub fn eliminated_species(&self) -> &[String] {
        &self.group.species
    }

    /// Drops the grouped species from a full state.
    pub fn project(&self, full: &[f64]) -> KineticsResult<Vec<f64>> {
        self.check_full(full)?;
        Ok(self.slow.iter().map(|&i| full[i]).collect())
    }

    /// Concentrations of the grouped species, in group order, at a slow state.
    pub fn eliminated_concentrations(&self, t: f64, slow: &[f64]) -> KineticsResult<Vec<f64>> {
        self.system(&self.parameters, CancellationToken::new())?
            .solve_eliminated(t, slow)
    }

    /// Full network state with the grouped species at their steady values.
    pub fn full_state(&self, t: f64, slow: &[f64]) -> KineticsResult<Vec<f64>> {
        let fast = self.eliminated_concentrations(t, slow)?;
        Ok(self.compose(slow, &fast))
    }

    /// dC/dt of the slow species.
    pub fn reduced_rates(&self, t: f64, slow: &[f64]) -> KineticsResult<Vec<f64>> {
        let system = self.system(&self.parameters, CancellationToken::new())?;
        let mut out = vec![0.0; self.slow.len()];
        system.apply(t, slow, &mut out)?;
        Ok(out)
    }

    /// Constraint values at a full state; zero on the reduced manifold.
    pub fn constraint_residuals(&self, t: f64, full: &[f64]) -> KineticsResult<Vec<f64>> {
        self.check_full(full)?;
        let system = self.system(&self.parameters, CancellationToken::new())?;
        let mut rates = vec![0.0; self.network.reactions().len()];
        system.raw.evaluate(t, full, &mut rates)?;
        let mut out = vec![0.0; self.constraints.len()];
        system.constraint_values(&rates, full, &mut out);
        Ok(out)
    }

    fn check_full(&self, full: &[f64]) -> KineticsResult<()> {
        if full.len() != self.network.dimension() {
            return Err(KineticsError::DimensionMismatch {
                context: "full network state",
                expected: self.network.dimension(),
                actual: full.len(),
            });
        }
        Ok(())
    }

    fn compose<T: Scalar>(&self, slow: &[T], fast: &[T]) -> Vec<T> {
        let mut full = vec![T::zero(); self.network.dimension()];
        for (&i, &v) in self.slow.iter().zip(slow) {
            full[i] = v;
        }
        for (&i, &v) in self.eliminated.iter().zip(fast) {
            full[i] = v;
        }
        full
    }

    fn system<'a>(
        &'a self,
        parameters: &ParameterSet,
        cancel: CancellationToken,
    ) -> KineticsResult<ReducedSystem<'a>> {
        ReducedSystem::new(self, parameters, cancel)
    }
}

impl<'n> KineticModel for ReducedNetwork<'n> {
    type System<'a> = ReducedSystem<'a> where Self: 'a;

    fn state_names(&self) -> Vec<String> {
        self.slow_species()
    }

    /// `parameters` overlay the ones bound at reduction time.
    fn assemble<'a>(
        &'a self,
        parameters: &ParameterSet,
        cancel: &CancellationToken,
    ) -> KineticsResult<ReducedSystem<'a>> {
        self.system(&self.parameters.merged(parameters), cancel.clone())
    }
}

/// Derivative function of a reduced network for one parameter set.
///
/// Remembers the last accepted root and uses it as the warm start of the next
/// solve, so consecutive evaluations stay on one branch.
pub struct ReducedSystem<'a> {
    reduced: &'a ReducedNetwork<'a>,
    raw: RateEvaluator<'a, f64>,
    dual: RateEvaluator<'a, Dual>,
    clamped: RateEvaluator<'a, f64>,
    totals: Vec<f64>,
    cancel: CancellationToken,
    warm: RefCell<Option<Vec<f64>>>,
}

impl<'a> ReducedSystem<'a> {
    fn new(
        reduced: &'a ReducedNetwork<'a>,
        parameters: &ParameterSet,
        cancel: CancellationToken,
    ) -> KineticsResult<Self> {
        let totals = reduced
            .constraints
            .iter()
            .map(|constraint| match constraint {
                CompiledConstraint::Conservation { total, .. } => parameters.require(total),
                _ => Ok(0.0),
            })
            .collect::<KineticsResult<Vec<_>>>()?;
        let network = reduced.network;
        Ok(Self {
            reduced,
            raw: RateEvaluator::new(network, parameters)?.without_clamping(),
            dual: RateEvaluator::new(network, parameters)?.without_clamping(),
            clamped: RateEvaluator::new(network, parameters)?,
            totals,
            cancel,
            warm: RefCell::new(None),
        })
    }

    fn constraint_values<T: Scalar>(&self, rates: &[T], full: &[T], out: &mut [T]) {
        let stoichiometry = self.reduced.network.stoichiometry();
        for (k, (slot, constraint)) in out.iter_mut().zip(&self.reduced.constraints).enumerate() {
            *slot = match constraint {
                CompiledConstraint::ZeroNetRate(i) => stoichiometry.row_dot(*i, rates),
                CompiledConstraint::Equilibrium { forward, reverse } => rates[*forward] - rates[*reverse],
                CompiledConstraint::Conservation { terms, .. } => {
                    terms
                        .iter()
                        .fold(T::zero(), |acc, &(i, w)| acc + T::constant(w) * full[i])
                        - T::constant(self.totals[k])
                }
            };
        }
    }

    // Size of the largest term in each constraint, for relative convergence.
    fn constraint_scales(&self, rates: &[f64], full: &[f64]) -> Vec<f64> {
        let stoichiometry = self.reduced.network.stoichiometry();
        self.reduced
            .constraints
            .iter()
            .enumerate()
            .map(|(k, constraint)| match constraint {
                CompiledConstraint::ZeroNetRate(i) => (0..rates.len())
                    .map(|j| (stoichiometry.coefficient(*i, j) * rates[j]).abs())
                    .fold(0.0, f64::max),
                CompiledConstraint::Equilibrium { forward, reverse } => {
                    rates[*forward].abs().max(rates[*reverse].abs())
                }
                CompiledConstraint::Conservation { terms, .. } => terms
                    .iter()
                    .map(|&(i, w)| (w * full[i]).abs())
                    .fold(self.totals[k].abs(), f64::max),
            })
            .collect()
    }

    fn residual(&self, t: f64, slow: &[f64], fast: &[f64]) -> KineticsResult<(Vec<f64>, Vec<f64>)> {
        let full = self.reduced.compose(slow, fast);
        let mut rates = vec![0.0; self.reduced.network.reactions().len()];
        self.raw.evaluate(t, &full, &mut rates)?;
        let mut values = vec![0.0; fast.len()];
        self.constraint_values(&rates, &full, &mut values);
        Ok((values, self.constraint_scales(&rates, &full)))
    }

    fn converged(&self, values: &[f64], scales: &[f64]) -> bool {
        let tolerance = self.reduced.settings.newton.tolerance;
        values
            .iter()
            .zip(scales)
            .all(|(v, s)| v.abs() <= tolerance * s.max(f64::MIN_POSITIVE))
    }

    /// Damped Newton from `seed`; `None` when the iteration fails to converge.
    fn newton(&self, t: f64, slow: &[f64], seed: &[f64]) -> KineticsResult<Option<Vec<f64>>> {
        let settings = &self.reduced.settings.newton;
        let m = seed.len();
        let slow_dual: Vec<Dual> = slow.iter().map(|&v| Dual::constant(v)).collect();
        let mut rates = vec![Dual::constant(0.0); self.reduced.network.reactions().len()];

        let mut x = seed.to_vec();
        let (mut values, mut scales) = self.residual(t, slow, &x)?;
        for _ in 0..settings.max_steps {
            self.cancel.check()?;
            if self.converged(&values, &scales) {
                return Ok(Some(x));
            }
            let current = max_norm(&values);
            if !current.is_finite() {
                return Ok(None);
            }

            let jac = jacobian(m, &x, |u, out| {
                let full = self.reduced.compose(&slow_dual, u);
                self.dual.evaluate(Dual::constant(t), &full, &mut rates)?;
                self.constraint_values(&rates, &full, out);
                Ok(())
            })?;
            let delta = match jac.lu().solve(&DVector::from_column_slice(&values)) {
                Some(delta) if delta.iter().all(|d| d.is_finite()) => delta,
                _ => return Ok(None),
            };

            let mut step = settings.damping;
            let mut improved = None;
            for _ in 0..MAX_BACKTRACKS {
                let trial: Vec<f64> = x.iter().zip(delta.iter()).map(|(xi, di)| xi - step * di).collect();
                let (trial_values, trial_scales) = self.residual(t, slow, &trial)?;
                let norm = max_norm(&trial_values);
                if norm.is_finite() && norm < current {
                    improved = Some((trial, trial_values, trial_scales));
                    break;
                }
                step *= 0.5;
            }
            match improved {
                Some((next, next_values, next_scales)) => {
                    x = next;
                    values = next_values;
                    scales = next_scales;
                }
                None => return Ok(None),
            }
        }
        Ok(self.converged(&values, &scales).then_some(x))
    }

    fn is_physical(&self, root: &[f64]) -> bool {
        let scale = max_norm(root).max(1.0);
        root.iter()
            .all(|&v| v >= -self.reduced.settings.positivity_tolerance * scale)
    }

    // Tiny negative roots of non-negative species become exact zeros.
    fn snap(&self, mut root: Vec<f64>) -> Vec<f64> {
        let species = self.reduced.network.species();
        for (v, &i) in root.iter_mut().zip(&self.reduced.eliminated) {
            if *v < 0.0 && species[i].non_negative {
                *v = 0.0;
            }
        }
        root
    }

    fn remember(&self, root: Vec<f64>) -> Vec<f64> {
        let root = self.snap(root);
        *self.warm.borrow_mut() = Some(root.clone());
        root
    }

    /// Solves the constraints for the grouped species at one slow state.
    pub fn solve_eliminated(&self, t: f64, slow: &[f64]) -> KineticsResult<Vec<f64>> {
        if slow.len() != self.reduced.slow.len() {
            return Err(KineticsError::DimensionMismatch {
                context: "reduced state",
                expected: self.reduced.slow.len(),
                actual: slow.len(),
            });
        }
        let warm = self.warm.borrow().clone();
        if let Some(guess) = &warm {
            if let Some(root) = self.newton(t, slow, guess)? {
                if self.is_physical(&root) {
                    return Ok(self.remember(root));
                }
            }
        }

        let m = self.reduced.eliminated.len();
        let mut roots: Vec<Vec<f64>> = Vec::new();
        for magnitude in SEED_MAGNITUDES.iter().chain(SEED_MAGNITUDES.map(|v| -v).iter()) {
            let seed = vec![*magnitude; m];
            if let Some(root) = self.newton(t, slow, &seed)? {
                if !roots.iter().any(|known| same_root(known, &root)) {
                    roots.push(root);
                }
            }
        }

        if roots.is_empty() {
            return Err(KineticsError::UnsolvableSteadyState {
                what: format!(
                    "no seed converged for {:?} at t = {}",
                    self.reduced.group.species, t
                ),
            });
        }
        let total = roots.len();
        let mut physical: Vec<Vec<f64>> = roots.into_iter().filter(|r| self.is_physical(r)).collect();
        if physical.is_empty() {
            log::warn!(
                "all {} steady-state root(s) for {:?} at t = {} are negative",
                total,
                self.reduced.group.species,
                t
            );
            return Err(KineticsError::NoPhysicalSteadyState {
                what: format!(
                    "{} root(s) found for {:?}, each with a negative concentration",
                    total, self.reduced.group.species
                ),
            });
        }
        if total > physical.len() {
            log::debug!(
                "rejected {} negative steady-state branch(es)",
                total - physical.len()
            );
        }

        let key = |root: &Vec<f64>| match &warm {
            Some(guess) => root
                .iter()
                .zip(guess)
                .fold(0.0_f64, |m, (a, b)| m.max((a - b).abs())),
            None => max_norm(root),
        };
        physical.sort_by(|a, b| key(a).total_cmp(&key(b)));
        let chosen = physical.swap_remove(0);
        Ok(self.remember(chosen))
    }
}

impl DynamicalSystem<f64> for ReducedSystem<'_> {
    fn dimension(&self) -> usize {
        self.reduced.slow.len()
    }

    fn apply(&self, t: f64, x: &[f64], out: &mut [f64]) -> KineticsResult<()> {
        if out.len() != self.dimension() {
            return Err(KineticsError::DimensionMismatch {
                context: "reduced derivative output",
                expected: self.dimension(),
                actual: out.len(),
            });
        }
        let fast = self.solve_eliminated(t, x)?;
        let full = self.reduced.compose(x, &fast);
        let mut rates = vec![0.0; self.reduced.network.reactions().len()];
        self.clamped.evaluate(t, &full, &mut rates)?;
        let stoichiometry = self.reduced.network.stoichiometry();
        for (slot, &i) in out.iter_mut().zip(&self.reduced.slow) {
            *slot = stoichiometry.row_dot(i, &rates);
        }
        Ok(())
    }

    fn clamp_warnings(&self) -> Vec<NegativeConcentrationWarning> {
        self.clamped.warnings()
    }
}

fn max_norm(values: &[f64]) -> f64 {
    values.iter().fold(0.0_f64, |m, v| m.max(v.abs()))
}

fn same_root(a: &[f64], b: &[f64]) -> bool {
    let scale = max_norm(a).max(max_norm(b)).max(1.0);
    a.iter().zip(b).all(|(x, y)| (x - y).abs() <= 1e-6 * scale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{build_network, RateLaw, Reaction, Species};
    use approx::assert_relative_eq;

    fn species(names: &[&str]) -> Vec<Species> {
        names.iter().map(|&n| Species::from(n)).collect()
    }

    fn lindemann() -> ReactionNetwork {
        build_network(
            species(&["A", "Astar", "P"]),
            vec![
                Reaction::mass_action(&[("A", 2.0)], &[("Astar", 1.0), ("A", 1.0)], "k1"),
                Reaction::mass_action(&[("Astar", 1.0), ("A", 1.0)], &[("A", 2.0)], "k2"),
                Reaction::mass_action(&[("Astar", 1.0)], &[("P", 1.0)], "k3"),
            ],
        )
        .expect("valid network")
    }

    #[test]
    fn lindemann_intermediate() {
        let network = lindemann();
        let (k1, k2, k3) = (1.0, 10.0, 2.0);
        let params = ParameterSet::new().with("k1", k1).with("k2", k2).with("k3", k3);
        let reduced =
            apply_steady_state(&network, &SteadyStateGroup::new(&["Astar"]), &params).expect("reduces");
        assert_eq!(reduced.slow_species(), vec!["A", "P"]);

        let a = 2.0;
        let astar = reduced.eliminated_concentrations(0.0, &[a, 0.0]).expect("solvable");
        let expected = k1 * a * a / (k2 * a + k3);
        assert_relative_eq!(astar[0], expected, max_relative = 1e-9);

        let rates = reduced.reduced_rates(0.0, &[a, 0.0]).expect("evaluates");
        assert_relative_eq!(rates[1], k3 * expected, max_relative = 1e-9);
        assert_relative_eq!(rates[0], -rates[1], max_relative = 1e-9);

        let full = reduced.full_state(0.0, &[a, 0.0]).expect("solvable");
        let residuals = reduced.constraint_residuals(0.0, &full).expect("evaluates");
        assert!(residuals[0].abs() < 1e-9);
        assert_eq!(reduced.project(&full), Ok(vec![a, 0.0]));
    }

    #[test]
    fn michaelis_menten_through_enzyme_conservation() {
        let network = build_network(
            species(&["E", "S", "ES", "P"]),
            vec![
                Reaction::mass_action(&[("E", 1.0), ("S", 1.0)], &[("ES", 1.0)], "k1"),
                Reaction::mass_action(&[("ES", 1.0)], &[("E", 1.0), ("S", 1.0)], "km1"),
                Reaction::mass_action(&[("ES", 1.0)], &[("E", 1.0), ("P", 1.0)], "k2"),
            ],
        )
        .expect("valid network");
        let (k1, km1, k2, e0) = (10.0, 1.0, 1.0, 0.1);
        let params = ParameterSet::new()
            .with("k1", k1)
            .with("km1", km1)
            .with("k2", k2)
            .with("E0", e0);
        let group = SteadyStateGroup::with_constraints(
            &["ES", "E"],
            vec![
                Constraint::zero_net_rate("ES"),
                Constraint::conservation(&[("E", 1.0), ("ES", 1.0)], "E0"),
            ],
        );
        let reduced = apply_steady_state(&network, &group, &params).expect("reduces");
        assert_eq!(reduced.slow_species(), vec!["S", "P"]);

        let km = (km1 + k2) / k1;
        for s in [0.05, 1.0, 20.0] {
            let rates = reduced.reduced_rates(0.0, &[s, 0.0]).expect("evaluates");
            let v = k2 * e0 * s / (km + s);
            assert_relative_eq!(rates[1], v, max_relative = 1e-8);
            assert_relative_eq!(rates[0], -v, max_relative = 1e-8);
        }
    }

    #[test]
    fn ethane_pyrolysis_radicals() {
        // C1 C2H6, C2 CH3*, C3 CH4, C4 C2H5*, C5 H*, C6 C2H4, C7 H2, C8 C4H10
        let network = build_network(
            species(&["C1", "C2", "C3", "C4", "C5", "C6", "C7", "C8"]),
            vec![
                Reaction::mass_action(&[("C1", 1.0)], &[("C2", 2.0)], "k1"),
                Reaction::mass_action(&[("C2", 1.0), ("C1", 1.0)], &[("C3", 1.0), ("C4", 1.0)], "k2"),
                Reaction::mass_action(&[("C4", 1.0)], &[("C6", 1.0), ("C5", 1.0)], "k3"),
                Reaction::mass_action(&[("C1", 1.0), ("C5", 1.0)], &[("C4", 1.0), ("C7", 1.0)], "k4"),
                Reaction::mass_action(&[("C4", 2.0)], &[("C8", 1.0)], "k5"),
                Reaction::mass_action(&[("C4", 2.0)], &[("C6", 1.0), ("C1", 1.0)], "k6"),
            ],
        )
        .expect("valid network");
        let (k1, k2, k3, k4, k5, k6) = (1.0, 2.0, 3.0, 4.0, 0.5, 0.5);
        let params = ParameterSet::new()
            .with("k1", k1)
            .with("k2", k2)
            .with("k3", k3)
            .with("k4", k4)
            .with("k5", k5)
            .with("k6", k6);
        let reduced = apply_steady_state(&network, &SteadyStateGroup::new(&["C2", "C4", "C5"]), &params)
            .expect("reduces");

        let c = 2.0;
        let radicals = reduced
            .eliminated_concentrations(0.0, &[c, 0.0, 0.0, 0.0, 0.0])
            .expect("solvable");
        assert_relative_eq!(radicals[0], 2.0 * k1 / k2, max_relative = 1e-8);
        assert_relative_eq!(radicals[1], (k1 * c / (k5 + k6)).sqrt(), max_relative = 1e-8);
        assert_relative_eq!(
            radicals[2],
            k3 / k4 * (k1 / (c * (k5 + k6))).sqrt(),
            max_relative = 1e-8
        );
    }

    #[test]
    fn quasi_equilibrium_of_fast_pair() {
        // A <=> B fast, B -> C slow
        let network = build_network(
            species(&["A", "B", "C"]),
            vec![
                Reaction::mass_action(&[("A", 1.0)], &[("B", 1.0)], "k1"),
                Reaction::mass_action(&[("B", 1.0)], &[("A", 1.0)], "k2"),
                Reaction::mass_action(&[("B", 1.0)], &[("C", 1.0)], "k3"),
            ],
        )
        .expect("valid network");
        let params = ParameterSet::new().with("k1", 50.0).with("k2", 100.0).with("k3", 1.0);
        let group = SteadyStateGroup::with_constraints(&["B"], vec![Constraint::equilibrium(0, 1)]);
        let reduced = apply_steady_state(&network, &group, &params).expect("reduces");
        let b = reduced.eliminated_concentrations(0.0, &[0.8, 0.0]).expect("solvable");
        assert_relative_eq!(b[0], 0.5 * 0.8, max_relative = 1e-9);
    }

    #[test]
    fn negative_only_root_is_not_physical() {
        // dI/dt = k1 A - k2 (I + c): the root I = k1 A / k2 - c is negative for large c.
        let network = build_network(
            species(&["A", "I", "P"]),
            vec![
                Reaction::mass_action(&[("A", 1.0)], &[("A", 1.0), ("I", 1.0)], "k1"),
                Reaction::new(&[("I", 1.0)], &[("P", 1.0)], RateLaw::expression("k2*(I + c)")),
            ],
        )
        .expect("valid network");
        let params = ParameterSet::new().with("k1", 1.0).with("k2", 1.0).with("c", 5.0);
        let reduced = apply_steady_state(&network, &SteadyStateGroup::new(&["I"]), &params).expect("reduces");
        assert!(matches!(
            reduced.eliminated_concentrations(0.0, &[1.0, 0.0]),
            Err(KineticsError::NoPhysicalSteadyState { .. })
        ));
    }

    #[test]
    fn saturating_sink_below_source_has_no_root() {
        // dI/dt = k0 - k I^2 / (1 + I^2) never vanishes when k < k0.
        let network = build_network(
            species(&["I", "P"]),
            vec![
                Reaction::new(&[], &[("I", 1.0)], RateLaw::power_law("k0", &[])),
                Reaction::new(&[("I", 1.0)], &[("P", 1.0)], RateLaw::expression("k*I^2/(1 + I^2)")),
            ],
        )
        .expect("valid network");
        let params = ParameterSet::new().with("k0", 1.0).with("k", 0.5);
        let reduced = apply_steady_state(&network, &SteadyStateGroup::new(&["I"]), &params).expect("reduces");
        assert!(matches!(
            reduced.eliminated_concentrations(0.0, &[0.0]),
            Err(KineticsError::UnsolvableSteadyState { .. })
        ));
    }

    #[test]
    fn smallest_physical_root_wins_without_warm_start() {
        // dI/dt = k0 - k (I^2 - 3 I + 3) has roots 1 and 2 when k0 = k.
        let network = build_network(
            species(&["I", "P"]),
            vec![
                Reaction::new(&[], &[("I", 1.0)], RateLaw::power_law("k0", &[])),
                Reaction::new(
                    &[("I", 1.0)],
                    &[("P", 1.0)],
                    RateLaw::expression("k*(I^2 - 3*I + 3)"),
                ),
            ],
        )
        .expect("valid network");
        let params = ParameterSet::new().with("k0", 1.0).with("k", 1.0);
        let reduced = apply_steady_state(&network, &SteadyStateGroup::new(&["I"]), &params).expect("reduces");
        let root = reduced.eliminated_concentrations(0.0, &[0.0]).expect("solvable");
        assert_relative_eq!(root[0], 1.0, max_relative = 1e-9);
    }

    #[test]
    fn invalid_groups_are_rejected() {
        let network = lindemann();
        let params = ParameterSet::new().with("k1", 1.0).with("k2", 1.0).with("k3", 1.0);
        let bad = [
            SteadyStateGroup::new(&[]),
            SteadyStateGroup::new(&["X"]),
            SteadyStateGroup::new(&["Astar", "Astar"]),
            SteadyStateGroup::new(&["A", "Astar", "P"]),
            SteadyStateGroup::with_constraints(&["Astar"], vec![]),
            SteadyStateGroup::with_constraints(&["Astar"], vec![Constraint::zero_net_rate("P")]),
            SteadyStateGroup::with_constraints(&["Astar"], vec![Constraint::equilibrium(0, 0)]),
            SteadyStateGroup::with_constraints(
                &["Astar"],
                vec![Constraint::conservation(&[("A", 1.0)], "total")],
            ),
        ];
        for group in &bad {
            assert!(
                matches!(
                    apply_steady_state(&network, group, &params),
                    Err(KineticsError::InvalidInput { .. })
                ),
                "{:?}",
                group
            );
        }

        let missing_total = SteadyStateGroup::with_constraints(
            &["Astar"],
            vec![Constraint::conservation(&[("Astar", 1.0), ("A", 1.0)], "total")],
        );
        assert!(matches!(
            apply_steady_state(&network, &missing_total, &params),
            Err(KineticsError::MissingParameter { .. })
        ));
    }

    #[test]
    fn cancellation_interrupts_the_root_search() {
        let network = lindemann();
        let params = ParameterSet::new().with("k1", 1.0).with("k2", 10.0).with("k3", 2.0);
        let reduced =
            apply_steady_state(&network, &SteadyStateGroup::new(&["Astar"]), &params).expect("reduces");
        let token = CancellationToken::new();
        token.cancel();
        let system = reduced.assemble(&ParameterSet::new(), &token).expect("assembles");
        let mut out = [0.0; 2];
        assert_eq!(system.apply(0.0, &[1.0, 0.0], &mut out), Err(KineticsError::Cancelled));
    }

    #[test]
    fn groups_round_trip_through_json() {
        let group = SteadyStateGroup::with_constraints(
            &["ES", "E"],
            vec![
                Constraint::zero_net_rate("ES"),
                Constraint::conservation(&[("E", 1.0), ("ES", 1.0)], "E0"),
            ],
        );
        let json = serde_json::to_string(&group).expect("serializes");
        assert!(json.contains("\"kind\":\"zero_net_rate\""));
        let back: SteadyStateGroup = serde_json::from_str(&json).expect("deserializes");
        assert_eq!(back, group);

        let settings: SteadyStateSettings =
            serde_json::from_str(r#"{"newton": {"max_steps": 10}}"#).expect("deserializes");
        assert_eq!(settings.newton.max_steps, 10);
        assert_eq!(settings.newton.tolerance, 1e-9);
        assert_eq!(settings.positivity_tolerance, 1e-9);
    }
}
