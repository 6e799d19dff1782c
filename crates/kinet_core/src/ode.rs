//! Assembly of dC/dt = α · r(C, p, t).

use crate::cancel::CancellationToken;
use crate::error::{KineticsError, KineticsResult, NegativeConcentrationWarning};
use crate::network::ReactionNetwork;
use crate::parameters::ParameterSet;
use crate::rates::RateEvaluator;
use crate::traits::{DynamicalSystem, Scalar};
use std::cell::RefCell;

/// Anything the integrator can turn into a derivative function.
///
/// Implemented by full networks and by steady-state reduced networks, so the
/// two are interchangeable for [`crate::integrator::integrate`].
pub trait KineticModel {
    type System<'a>: DynamicalSystem<f64>
    where
        Self: 'a;

    /// Names of the state components, in state order.
    fn state_names(&self) -> Vec<String>;

    fn assemble<'a>(
        &'a self,
        parameters: &ParameterSet,
        cancel: &CancellationToken,
    ) -> KineticsResult<Self::System<'a>>;
}

/// The assembled right-hand side of a reaction network.
pub struct OdeSystem<'a, T: Scalar> {
    rates: RateEvaluator<'a, T>,
    buffer: RefCell<Vec<T>>,
}

impl<'a, T: Scalar> OdeSystem<'a, T> {
    pub fn new(rates: RateEvaluator<'a, T>) -> Self {
        let m = rates.reaction_count();
        Self {
            rates,
            buffer: RefCell::new(vec![T::zero(); m]),
        }
    }

    pub fn network(&self) -> &'a ReactionNetwork {
        self.rates.network()
    }

    pub fn rate_evaluator(&self) -> &RateEvaluator<'a, T> {
        &self.rates
    }

    /// Reaction rates at (t, C), without applying stoichiometry.
    pub fn rates(&self, t: T, x: &[T], out: &mut [T]) -> KineticsResult<()> {
        self.rates.evaluate(t, x, out)
    }
}

impl<T: Scalar> DynamicalSystem<T> for OdeSystem<'_, T> {
    fn dimension(&self) -> usize {
        self.network().dimension()
    }

    fn apply(&self, t: T, x: &[T], out: &mut [T]) -> KineticsResult<()> {
        if out.len() != self.dimension() {
            return Err(KineticsError::DimensionMismatch {
                context: "derivative output",
                expected: self.dimension(),
                actual: out.len(),
            });
        }
        let mut rates = self.buffer.borrow_mut();
        self.rates.evaluate(t, x, &mut rates)?;
        self.network().stoichiometry().apply(&rates, out);
        Ok(())
    }

    fn clamp_warnings(&self) -> Vec<NegativeConcentrationWarning> {
        self.rates.warnings()
    }
}

/// Assembles the f64 derivative function of `network` under `parameters`.
pub fn assemble<'a>(
    network: &'a ReactionNetwork,
    parameters: &ParameterSet,
) -> KineticsResult<OdeSystem<'a, f64>> {
    Ok(OdeSystem::new(RateEvaluator::new(network, parameters)?))
}

/// One-shot evaluation of dC/dt at (t, C).
pub fn derivative(
    network: &ReactionNetwork,
    t: f64,
    concentrations: &[f64],
    parameters: &ParameterSet,
) -> KineticsResult<Vec<f64>> {
    let system = assemble(network, parameters)?;
    let mut out = vec![0.0; network.dimension()];
    system.apply(t, concentrations, &mut out)?;
    Ok(out)
}

impl KineticModel for ReactionNetwork {
    type System<'a> = OdeSystem<'a, f64>;

    fn state_names(&self) -> Vec<String> {
        self.species_names()
    }

    fn assemble<'a>(
        &'a self,
        parameters: &ParameterSet,
        _cancel: &CancellationToken,
    ) -> KineticsResult<OdeSystem<'a, f64>> {
        assemble(self, parameters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{build_network, Reaction, Species};

    #[test]
    fn ethane_pyrolysis_net_rates_follow_alpha_times_r() {
        // C1 C2H6, C2 CH3*, C3 CH4, C4 C2H5*, C5 H*, C6 C2H4, C7 H2, C8 C4H10
        let species: Vec<Species> = ["C1", "C2", "C3", "C4", "C5", "C6", "C7", "C8"]
            .into_iter()
            .map(Species::from)
            .collect();
        let network = build_network(
            species,
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
        let params: ParameterSet = (1..=6).map(|i| (format!("k{}", i), i as f64)).collect();
        let c = [1.0, 0.5, 0.0, 0.25, 2.0, 0.0, 0.0, 0.0];
        let dc = derivative(&network, 0.0, &c, &params).expect("evaluates");

        let r = [1.0, 2.0 * 0.5, 3.0 * 0.25, 4.0 * 2.0, 5.0 * 0.0625, 6.0 * 0.0625];
        let expected = [
            -r[0] - r[1] - r[3] + r[5],
            2.0 * r[0] - r[1],
            r[1],
            r[1] - r[2] + r[3] - 2.0 * r[4] - 2.0 * r[5],
            r[2] - r[3],
            r[2] + r[5],
            r[3],
            r[4],
        ];
        for (got, want) in dc.iter().zip(expected) {
            assert!((got - want).abs() < 1e-12, "{} vs {}", got, want);
        }
    }

    #[test]
    fn output_length_is_checked() {
        let network = build_network(
            vec![Species::new("A"), Species::new("B")],
            vec![Reaction::mass_action(&[("A", 1.0)], &[("B", 1.0)], "k")],
        )
        .expect("valid network");
        let system = assemble(&network, &ParameterSet::new().with("k", 1.0)).expect("assembles");
        let mut out = [0.0; 3];
        assert!(matches!(
            system.apply(0.0, &[1.0, 0.0], &mut out),
            Err(KineticsError::DimensionMismatch { .. })
        ));
    }
}
