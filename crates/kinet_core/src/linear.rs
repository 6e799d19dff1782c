//! Closed-form solution of first-order networks, dC/dt = K·C.

use crate::autodiff::{jacobian, Dual};
use crate::error::{KineticsError, KineticsResult};
use crate::integrator::TimeGrid;
use crate::network::ReactionNetwork;
use crate::ode::OdeSystem;
use crate::parameters::ParameterSet;
use crate::rates::RateEvaluator;
use crate::traits::DynamicalSystem;
use crate::trajectory::Trajectory;
use nalgebra::linalg::SVD;
use nalgebra::{DMatrix, DVector};
use num_complex::Complex;
use serde::{Deserialize, Serialize};

// Relative agreement required between f(q) and K·q.
const LINEARITY_TOLERANCE: f64 = 1e-8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinearSolverSettings {
    /// Eigenvalues closer than this (relative to the spectral scale) are one cluster.
    ///
    /// A cluster is treated as a single repeated eigenvalue, so a diagonalizable
    /// matrix with eigenvalues closer than this is still reported as
    /// `NonDiagonalizable`. Lower it to accept such matrices; their eigenbasis
    /// condition number then decides.
    pub cluster_tolerance: f64,
    /// Singular values below this (relative) count towards the null space.
    pub rank_tolerance: f64,
    pub max_condition_number: f64,
}

impl Default for LinearSolverSettings {
    fn default() -> Self {
        Self {
            cluster_tolerance: 1e-6,
            rank_tolerance: 1e-9,
            max_condition_number: 1e12,
        }
    }
}

/// One exponential term of a closed-form solution: `amplitude · e^(rate·t)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExponentialMode {
    pub rate: Complex<f64>,
    pub amplitude: Vec<Complex<f64>>,
}

/// C(t) = Re[V · diag(e^(λt)) · V⁻¹ · C₀] for a diagonalizable rate matrix.
#[derive(Debug, Clone)]
pub struct ClosedFormSolution {
    species: Vec<String>,
    rate_matrix: DMatrix<f64>,
    eigenvalues: DVector<Complex<f64>>,
    eigenvectors: DMatrix<Complex<f64>>,
    inverse: DMatrix<Complex<f64>>,
}

impl ClosedFormSolution {
    pub fn species(&self) -> &[String] {
        &self.species
    }

    pub fn rate_matrix(&self) -> &DMatrix<f64> {
        &self.rate_matrix
    }

    pub fn eigenvalues(&self) -> &DVector<Complex<f64>> {
        &self.eigenvalues
    }

    /// Unit-norm eigenvectors, one column per eigenvalue.
    pub fn eigenvectors(&self) -> &DMatrix<Complex<f64>> {
        &self.eigenvectors
    }

    /// e^(Kt).
    pub fn propagator(&self, t: f64) -> DMatrix<f64> {
        let exp = self.eigenvalues.map(|lambda| (lambda * t).exp());
        let scaled = DMatrix::from_fn(self.eigenvectors.nrows(), self.eigenvectors.ncols(), |i, j| {
            self.eigenvectors[(i, j)] * exp[j]
        });
        (scaled * &self.inverse).map(|c| c.re)
    }

    pub fn evaluate(&self, c0: &[f64], t: f64) -> KineticsResult<Vec<f64>> {
        self.check_state(c0)?;
        let state = self.propagator(t) * DVector::from_column_slice(c0);
        Ok(state.iter().copied().collect())
    }

    /// Samples the solution on `times`, with `c0` taken at `times[0]`.
    pub fn trajectory(&self, c0: &[f64], times: &[f64]) -> KineticsResult<Trajectory> {
        self.check_state(c0)?;
        TimeGrid::validate(times)?;
        let t0 = times[0];
        let states = times
            .iter()
            .map(|&t| self.evaluate(c0, t - t0))
            .collect::<KineticsResult<Vec<_>>>()?;
        Ok(Trajectory {
            species: self.species.clone(),
            times: times.to_vec(),
            states,
            warnings: Vec::new(),
        })
    }

    /// Decomposes the solution from `c0` into its exponential modes.
    pub fn modes(&self, c0: &[f64]) -> KineticsResult<Vec<ExponentialMode>> {
        self.check_state(c0)?;
        let c0 = DVector::from_iterator(c0.len(), c0.iter().map(|&v| Complex::new(v, 0.0)));
        let weights = &self.inverse * c0;
        Ok(self
            .eigenvalues
            .iter()
            .enumerate()
            .map(|(k, &rate)| ExponentialMode {
                rate,
                amplitude: self
                    .eigenvectors
                    .column(k)
                    .iter()
                    .map(|&v| v * weights[k])
                    .collect(),
            })
            .collect())
    }

    fn check_state(&self, c0: &[f64]) -> KineticsResult<()> {
        if c0.len() != self.species.len() {
            return Err(KineticsError::DimensionMismatch {
                context: "closed-form initial state",
                expected: self.species.len(),
                actual: c0.len(),
            });
        }
        Ok(())
    }
}

/// Extracts K from a network whose right-hand side is linear and homogeneous.
pub fn rate_matrix(network: &ReactionNetwork, parameters: &ParameterSet) -> KineticsResult<DMatrix<f64>> {
    if network.is_time_dependent() {
        return Err(KineticsError::NotFirstOrder {
            what: "a rate law depends on time".into(),
        });
    }
    let n = network.dimension();

    let dual = OdeSystem::new(RateEvaluator::<Dual>::new(network, parameters)?.without_clamping());
    let probe: Vec<f64> = (0..n).map(|i| 0.7 + 0.31 * i as f64).collect();
    let k = jacobian(n, &probe, |x, out| dual.apply(Dual::constant(0.0), x, out))?;

    let real = OdeSystem::new(RateEvaluator::<f64>::new(network, parameters)?.without_clamping());
    let mut f = vec![0.0; n];
    let k_scale = k.amax().max(f64::MIN_POSITIVE);

    real.apply(0.0, &vec![0.0; n], &mut f)?;
    let offset = f.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    if !(offset <= LINEARITY_TOLERANCE * k_scale) {
        return Err(KineticsError::NotFirstOrder {
            what: format!("net rates at zero concentration are nonzero (max {:e})", offset),
        });
    }

    let q: Vec<f64> = (0..n).map(|i| 1.9 + 0.17 * i as f64).collect();
    real.apply(0.0, &q, &mut f)?;
    let predicted = &k * DVector::from_column_slice(&q);
    let scale = predicted.amax().max(k_scale);
    for (i, (&actual, &linear)) in f.iter().zip(predicted.iter()).enumerate() {
        if !((actual - linear).abs() <= LINEARITY_TOLERANCE * scale) {
            return Err(KineticsError::NotFirstOrder {
                what: format!(
                    "net rate of {} is not linear in the concentrations",
                    network.species()[i].name
                ),
            });
        }
    }
    Ok(k)
}

pub fn solve_linear(network: &ReactionNetwork, parameters: &ParameterSet) -> KineticsResult<ClosedFormSolution> {
    solve_linear_with(network, parameters, &LinearSolverSettings::default())
}

pub fn solve_linear_with(
    network: &ReactionNetwork,
    parameters: &ParameterSet,
    settings: &LinearSolverSettings,
) -> KineticsResult<ClosedFormSolution> {
    let k = rate_matrix(network, parameters)?;
    let n = k.nrows();

    let mut eigenvalues: Vec<Complex<f64>> = k.complex_eigenvalues().iter().copied().collect();
    // Slowest modes first.
    eigenvalues.sort_by(|a, b| b.re.total_cmp(&a.re).then(b.im.total_cmp(&a.im)));
    let spectral = eigenvalues.iter().fold(k.amax(), |m, l| m.max(l.norm()));
    let scale = if spectral > 0.0 { spectral } else { 1.0 };

    let complex_k = k.map(|v| Complex::new(v, 0.0));
    let tight = settings.cluster_tolerance * scale;
    let rank = settings.rank_tolerance * scale;

    let first = eigenbasis(&complex_k, &eigenvalues, tight, rank).and_then(|(values, vectors)| {
        let condition = condition_number(&vectors);
        if !(condition <= settings.max_condition_number) {
            return Err(KineticsError::SingularEigenbasis { condition });
        }
        let inverse = vectors
            .clone()
            .try_inverse()
            .ok_or(KineticsError::SingularEigenbasis { condition })?;
        Ok((values, vectors, inverse, condition))
    });
    let (values, eigenvectors, inverse, condition) = match first {
        Ok(found) => found,
        Err(err) => {
            // A defective block of size m splits its eigenvalues by about eps^(1/m),
            // so regroup with the widest split possible in n dimensions.
            let loose = (10.0 * f64::EPSILON.powf(1.0 / n as f64) * scale).max(tight);
            if loose > tight {
                if let Err(defect @ KineticsError::NonDiagonalizable { .. }) =
                    eigenbasis(&complex_k, &eigenvalues, loose, rank)
                {
                    return Err(defect);
                }
            }
            return Err(err);
        }
    };

    log::debug!(
        "closed-form solution over {} species, eigenbasis condition {:e}",
        n,
        condition
    );

    Ok(ClosedFormSolution {
        species: network.species_names(),
        rate_matrix: k,
        eigenvalues: DVector::from_vec(values),
        eigenvectors,
        inverse,
    })
}

// Eigenvalues (cluster means for repeated ones) and their unit eigenvectors as columns.
fn eigenbasis(
    k: &DMatrix<Complex<f64>>,
    eigenvalues: &[Complex<f64>],
    cluster_tolerance: f64,
    rank_tolerance: f64,
) -> KineticsResult<(Vec<Complex<f64>>, DMatrix<Complex<f64>>)> {
    let mut values = Vec::with_capacity(eigenvalues.len());
    let mut columns: Vec<DVector<Complex<f64>>> = Vec::with_capacity(eigenvalues.len());

    for members in cluster(eigenvalues, cluster_tolerance) {
        let multiplicity = members.len();
        let mean = members.iter().map(|&i| eigenvalues[i]).sum::<Complex<f64>>() / multiplicity as f64;
        let null = null_space(k, mean, rank_tolerance)?;
        if null.len() < multiplicity {
            log::warn!(
                "eigenvalue {} has multiplicity {} but {} eigenvector(s)",
                mean,
                multiplicity,
                null.len()
            );
            return Err(KineticsError::NonDiagonalizable {
                eigenvalue: format!("{}", mean),
                multiplicity,
                eigenvectors: null.len(),
            });
        }
        // A repeated eigenvalue is reported once per multiplicity at the cluster mean.
        for vector in null.into_iter().take(multiplicity) {
            values.push(if multiplicity > 1 { mean } else { eigenvalues[members[0]] });
            columns.push(vector);
        }
    }
    Ok((values, DMatrix::from_columns(&columns)))
}

fn condition_number(vectors: &DMatrix<Complex<f64>>) -> f64 {
    let singular = vectors.clone().svd(false, false).singular_values;
    let largest = singular.iter().fold(0.0_f64, |m, &s| m.max(s));
    let smallest = singular.iter().fold(f64::INFINITY, |m, &s| m.min(s));
    if smallest > 0.0 {
        largest / smallest
    } else {
        f64::INFINITY
    }
}

// Groups eigenvalue indices whose distance to the cluster seed is within `tolerance`.
fn cluster(eigenvalues: &[Complex<f64>], tolerance: f64) -> Vec<Vec<usize>> {
    let mut clusters: Vec<Vec<usize>> = Vec::new();
    for (i, lambda) in eigenvalues.iter().enumerate() {
        match clusters
            .iter_mut()
            .find(|members| (eigenvalues[members[0]] - lambda).norm() <= tolerance)
        {
            Some(members) => members.push(i),
            None => clusters.push(vec![i]),
        }
    }
    clusters
}

/// Unit vectors spanning the numerical null space of (K − λI).
fn null_space(
    k: &DMatrix<Complex<f64>>,
    lambda: Complex<f64>,
    tolerance: f64,
) -> KineticsResult<Vec<DVector<Complex<f64>>>> {
    let mut shifted = k.clone();
    for i in 0..shifted.nrows() {
        shifted[(i, i)] -= lambda;
    }
    let svd = SVD::new(shifted, false, true);
    let v_t = svd.v_t.ok_or_else(|| KineticsError::NonDiagonalizable {
        eigenvalue: format!("{}", lambda),
        multiplicity: 1,
        eigenvectors: 0,
    })?;

    let mut order: Vec<usize> = (0..svd.singular_values.len()).collect();
    order.sort_by(|&a, &b| svd.singular_values[a].total_cmp(&svd.singular_values[b]));
    Ok(order
        .into_iter()
        .filter(|&r| svd.singular_values[r] <= tolerance)
        .map(|r| {
            // Rows of Vᴴ are conjugated right singular vectors.
            v_t.row(r).transpose().map(|c| c.conj())
        })
        .collect())
}
