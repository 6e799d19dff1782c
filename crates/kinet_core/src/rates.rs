//! Reaction-rate evaluation r(C, p, t).

use crate::equation_engine::VM;
use crate::error::{KineticsError, KineticsResult, NegativeConcentrationWarning};
use crate::network::{CompiledRateLaw, ReactionNetwork};
use crate::parameters::ParameterSet;
use crate::traits::Scalar;
use std::cell::RefCell;

/// Evaluates every reaction rate of a network for one parameter set.
///
/// Holds per-solve scratch space behind `RefCell`, so an evaluator belongs to
/// a single solve; the network itself stays shared and immutable.
pub struct RateEvaluator<'a, T: Scalar> {
    network: &'a ReactionNetwork,
    params: Vec<T>,
    clamp: bool,
    scratch: RefCell<Scratch<T>>,
    clamps: RefCell<ClampLog>,
}

struct Scratch<T> {
    vars: Vec<T>,
    stack: Vec<T>,
}

#[derive(Default)]
struct ClampLog {
    first: Vec<Option<NegativeConcentrationWarning>>,
    count: usize,
}

impl<'a, T: Scalar> RateEvaluator<'a, T> {
    pub fn new(network: &'a ReactionNetwork, parameters: &ParameterSet) -> KineticsResult<Self> {
        let params = parameters
            .resolve(network.parameter_names())?
            .into_iter()
            .map(T::constant)
            .collect();
        let n = network.dimension();
        Ok(Self {
            network,
            params,
            clamp: true,
            scratch: RefCell::new(Scratch {
                vars: vec![T::zero(); n + 1],
                stack: Vec::with_capacity(32),
            }),
            clamps: RefCell::new(ClampLog {
                first: vec![None; n],
                count: 0,
            }),
        })
    }

    /// Evaluates the raw rate laws even for negative concentrations.
    pub fn without_clamping(mut self) -> Self {
        self.clamp = false;
        self
    }

    pub fn network(&self) -> &'a ReactionNetwork {
        self.network
    }

    pub fn reaction_count(&self) -> usize {
        self.network.reactions().len()
    }

    /// Writes r(C, p, t) into `rates`.
    pub fn evaluate(&self, t: T, concentrations: &[T], rates: &mut [T]) -> KineticsResult<()> {
        let n = self.network.dimension();
        if concentrations.len() != n {
            return Err(KineticsError::DimensionMismatch {
                context: "rate evaluation state",
                expected: n,
                actual: concentrations.len(),
            });
        }
        if rates.len() != self.reaction_count() {
            return Err(KineticsError::DimensionMismatch {
                context: "rate evaluation output",
                expected: self.reaction_count(),
                actual: rates.len(),
            });
        }

        let mut scratch = self.scratch.borrow_mut();
        let Scratch { vars, stack } = &mut *scratch;
        for (i, (slot, &value)) in vars.iter_mut().zip(concentrations).enumerate() {
            *slot = if self.clamp && value < T::zero() && self.network.species()[i].non_negative {
                self.record_clamp(i, value, t);
                T::zero()
            } else {
                value
            };
        }
        vars[n] = t;

        for (rate, law) in rates.iter_mut().zip(self.network.compiled_rate_laws()) {
            *rate = match law {
                CompiledRateLaw::PowerLaw { constant, orders } => orders
                    .iter()
                    .fold(self.params[*constant], |acc, &(i, order)| {
                        acc * raise(vars[i], order)
                    }),
                CompiledRateLaw::Expression { code, .. } => {
                    VM::execute(code, vars, &self.params, stack)
                }
            };
        }
        Ok(())
    }

    fn record_clamp(&self, species: usize, value: T, t: T) {
        let mut log = self.clamps.borrow_mut();
        log.count += 1;
        if log.first[species].is_none() {
            let warning = NegativeConcentrationWarning {
                species: self.network.species()[species].name.clone(),
                value: value.to_f64().unwrap_or(f64::NAN),
                time: t.to_f64().unwrap_or(f64::NAN),
            };
            log::warn!(
                "clamped negative concentration of {} ({:e}) to zero at t = {}",
                warning.species,
                warning.value,
                warning.time
            );
            log.first[species] = Some(warning);
        }
    }

    /// First clamping event of each species, in species order.
    pub fn warnings(&self) -> Vec<NegativeConcentrationWarning> {
        self.clamps.borrow().first.iter().flatten().cloned().collect()
    }

    /// Total number of clamped values, including repeats.
    pub fn clamp_count(&self) -> usize {
        self.clamps.borrow().count
    }
}

fn raise<T: Scalar>(base: T, order: f64) -> T {
    if order == 1.0 {
        base
    } else if order.fract() == 0.0 && order.abs() <= i32::MAX as f64 {
        base.powi(order as i32)
    } else {
        base.powf(T::constant(order))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autodiff::Dual;
    use crate::network::{build_network, RateLaw, Reaction, Species};

    fn lindemann() -> ReactionNetwork {
        build_network(
            vec![Species::new("A"), Species::new("Astar"), Species::new("P")],
            vec![
                Reaction::mass_action(&[("A", 2.0)], &[("Astar", 1.0), ("A", 1.0)], "k1"),
                Reaction::mass_action(&[("Astar", 1.0), ("A", 1.0)], &[("A", 2.0)], "k2"),
                Reaction::mass_action(&[("Astar", 1.0)], &[("P", 1.0)], "k3"),
            ],
        )
        .expect("valid network")
    }

    fn params() -> ParameterSet {
        ParameterSet::new().with("k1", 1.0).with("k2", 10.0).with("k3", 2.0)
    }

    #[test]
    fn power_law_rates() {
        let network = lindemann();
        let evaluator = RateEvaluator::<f64>::new(&network, &params()).expect("parameters resolve");
        let mut rates = [0.0; 3];
        evaluator
            .evaluate(0.0, &[2.0, 0.5, 0.0], &mut rates)
            .expect("evaluates");
        assert_eq!(rates, [4.0, 10.0, 1.0]);
        assert!(evaluator.warnings().is_empty());
    }

    #[test]
    fn negative_concentrations_are_clamped_and_recorded_once() {
        let network = lindemann();
        let evaluator = RateEvaluator::<f64>::new(&network, &params()).expect("parameters resolve");
        let mut rates = [0.0; 3];
        evaluator
            .evaluate(0.25, &[1.0, -1e-9, 0.0], &mut rates)
            .expect("evaluates");
        assert_eq!(rates[1], 0.0);
        assert_eq!(rates[2], 0.0);
        evaluator
            .evaluate(0.5, &[1.0, -2e-9, 0.0], &mut rates)
            .expect("evaluates");

        let warnings = evaluator.warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].species, "Astar");
        assert_eq!(warnings[0].time, 0.25);
        assert_eq!(evaluator.clamp_count(), 2);
    }

    #[test]
    fn clamping_can_be_disabled() {
        let network = lindemann();
        let evaluator = RateEvaluator::<f64>::new(&network, &params())
            .expect("parameters resolve")
            .without_clamping();
        let mut rates = [0.0; 3];
        evaluator
            .evaluate(0.0, &[1.0, -0.5, 0.0], &mut rates)
            .expect("evaluates");
        assert_eq!(rates[2], -1.0);
        assert_eq!(evaluator.clamp_count(), 0);
    }

    #[test]
    fn expression_rates_see_time_and_parameters() {
        let network = build_network(
            vec![Species::new("A"), Species::new("B")],
            vec![Reaction::new(
                &[("A", 1.0)],
                &[("B", 1.0)],
                RateLaw::expression("k*A*exp(-t/tau)"),
            )],
        )
        .expect("valid network");
        let p = ParameterSet::new().with("k", 2.0).with("tau", 1.0);
        let evaluator = RateEvaluator::<Dual>::new(&network, &p).expect("parameters resolve");
        let mut rates = [Dual::constant(0.0)];
        evaluator
            .evaluate(
                Dual::constant(1.0),
                &[Dual::new(3.0, 1.0), Dual::constant(0.0)],
                &mut rates,
            )
            .expect("evaluates");
        let decay = (-1.0_f64).exp();
        assert!((rates[0].val - 6.0 * decay).abs() < 1e-12);
        assert!((rates[0].eps - 2.0 * decay).abs() < 1e-12);
    }

    #[test]
    fn missing_parameter_and_bad_dimensions() {
        let network = lindemann();
        let partial = ParameterSet::new().with("k1", 1.0);
        assert!(matches!(
            RateEvaluator::<f64>::new(&network, &partial),
            Err(KineticsError::MissingParameter { .. })
        ));
        let evaluator = RateEvaluator::<f64>::new(&network, &params()).expect("parameters resolve");
        let mut rates = [0.0; 3];
        assert!(matches!(
            evaluator.evaluate(0.0, &[1.0], &mut rates),
            Err(KineticsError::DimensionMismatch { .. })
        ));
    }
}
