//! Stoichiometric matrix construction and conservation-law analysis.

use crate::error::{KineticsError, KineticsResult};
use crate::network::Reaction;
use crate::traits::Scalar;
use nalgebra::{DMatrix, DVector, SymmetricEigen};
use std::collections::{BTreeMap, HashMap};

/// Largest denominator accepted when checking that a coefficient is rational.
pub const MAX_DENOMINATOR: u32 = 1000;

/// Dense species × reaction matrix of net signed coefficients.
#[derive(Debug, Clone, PartialEq)]
pub struct StoichiometricMatrix {
    matrix: DMatrix<f64>,
    // Non-zero entries per species row, used by the hot derivative loop.
    rows: Vec<Vec<(usize, f64)>>,
}

impl StoichiometricMatrix {
    /// Builds α from the declared consumption/production vectors.
    ///
    /// `index` maps species names to row indices.
    pub fn build(index: &HashMap<String, usize>, reactions: &[Reaction]) -> KineticsResult<Self> {
        let n_species = index.len();
        let mut matrix = DMatrix::<f64>::zeros(n_species, reactions.len());

        for (j, reaction) in reactions.iter().enumerate() {
            for (sign, side, entries) in [
                (-1.0, "consumption", &reaction.consumption),
                (1.0, "production", &reaction.production),
            ] {
                for (name, coefficient) in entries {
                    check_coefficient(*coefficient).map_err(|what| {
                        KineticsError::stoichiometry(format!(
                            "reaction {} {} of {}: {}",
                            j, side, name, what
                        ))
                    })?;
                    let i = *index.get(name).ok_or_else(|| {
                        KineticsError::stoichiometry(format!(
                            "reaction {} references unknown species {}",
                            j, name
                        ))
                    })?;
                    matrix[(i, j)] += sign * coefficient;
                }
            }
        }

        for (j, reaction) in reactions.iter().enumerate() {
            let declared = declared_net(reaction);
            if declared.values().all(|c| c.abs() <= f64::EPSILON) {
                return Err(KineticsError::stoichiometry(format!(
                    "reaction {} has a zero net stoichiometric vector",
                    j
                )));
            }
            for (name, &i) in index {
                let expected = declared.get(name.as_str()).copied().unwrap_or(0.0);
                if (matrix[(i, j)] - expected).abs() > 1e-12 * expected.abs().max(1.0) {
                    return Err(KineticsError::stoichiometry(format!(
                        "column {} disagrees with the declared net coefficient of {}",
                        j, name
                    )));
                }
            }
        }

        let rows = (0..n_species)
            .map(|i| {
                (0..reactions.len())
                    .filter(|&j| matrix[(i, j)] != 0.0)
                    .map(|j| (j, matrix[(i, j)]))
                    .collect()
            })
            .collect();

        Ok(Self { matrix, rows })
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    pub fn species_count(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn reaction_count(&self) -> usize {
        self.matrix.ncols()
    }

    pub fn coefficient(&self, species: usize, reaction: usize) -> f64 {
        self.matrix[(species, reaction)]
    }

    /// Net production rate of one species: Σⱼ α[i][j]·rⱼ.
    pub fn row_dot<T: Scalar>(&self, species: usize, rates: &[T]) -> T {
        self.rows[species]
            .iter()
            .fold(T::zero(), |acc, &(j, coefficient)| {
                acc + T::constant(coefficient) * rates[j]
            })
    }

    /// Writes α·r into `out`.
    pub fn apply<T: Scalar>(&self, rates: &[T], out: &mut [T]) {
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.row_dot(i, rates);
        }
    }

    /// Orthonormal basis of the left null space of α.
    ///
    /// Each vector w satisfies wᵀα = 0, so wᵀC is constant along any solution.
    pub fn conservation_laws(&self) -> Vec<DVector<f64>> {
        let n = self.species_count();
        if n == 0 {
            return Vec::new();
        }
        let gram = &self.matrix * self.matrix.transpose();
        let eig = SymmetricEigen::new(gram);
        let scale = eig.eigenvalues.iter().fold(1.0_f64, |m, v| m.max(v.abs()));
        let tolerance = 1e-10 * scale * n as f64;

        eig
            .eigenvalues
            .iter()
            .enumerate()
            .filter(|(_, value)| value.abs() <= tolerance)
            .map(|(k, _)| {
                let mut w = eig.eigenvectors.column(k).into_owned();
                // Sign convention: the largest component is positive.
                let pivot = w.iter().fold(0.0_f64, |p, &v| if v.abs() > p.abs() { v } else { p });
                if pivot < 0.0 {
                    w.neg_mut();
                }
                w
            })
            .collect()
    }
}

fn declared_net(reaction: &Reaction) -> BTreeMap<&str, f64> {
    let mut net = BTreeMap::new();
    for (name, c) in &reaction.consumption {
        *net.entry(name.as_str()).or_insert(0.0) -= c;
    }
    for (name, c) in &reaction.production {
        *net.entry(name.as_str()).or_insert(0.0) += c;
    }
    net
}

/// Checks that a coefficient is finite, non-negative and a small rational.
pub(crate) fn check_coefficient(value: f64) -> Result<(), String> {
    if !value.is_finite() {
        return Err(format!("coefficient {} is not finite", value));
    }
    if value < 0.0 {
        return Err(format!("coefficient {} is negative", value));
    }
    let representable = (1..=MAX_DENOMINATOR).any(|q| {
        let scaled = value * q as f64;
        (scaled - scaled.round()).abs() <= 1e-9 * scaled.abs().max(1.0)
    });
    if representable {
        Ok(())
    } else {
        Err(format!(
            "coefficient {} is not a rational with denominator <= {}",
            value, MAX_DENOMINATOR
        ))
    }
}
