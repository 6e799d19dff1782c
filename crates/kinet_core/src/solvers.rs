use crate::error::KineticsResult;
use crate::traits::{DynamicalSystem, Scalar};

// Tsitouras 5(4) tableau.
const C: [f64; 6] = [0.161, 0.327, 0.9, 0.9800255409045097, 1.0, 1.0];

const A21: f64 = 0.161;
const A3: [f64; 2] = [-0.008480655492356989, 0.335480655492357];
const A4: [f64; 3] = [2.897153057105493, -6.359448489975075, 4.3622954328695815];
const A5: [f64; 4] = [
    5.325864828439257,
    -11.748883564062828,
    7.4955393428898365,
    -0.09249506636175525,
];
const A6: [f64; 5] = [
    5.86145544294642,
    -12.92096931784711,
    8.159367898576159,
    -0.071584973281401,
    -0.028269050394068383,
];
// 5th-order weights; also the last stage row, which makes the method FSAL.
const B: [f64; 6] = [
    0.09646076681806523,
    0.01,
    0.4798896504144996,
    1.379008574103742,
    -3.290069515436081,
    2.324710524099774,
];
// Difference between the 5th- and 4th-order solutions.
const BTILDE: [f64; 7] = [
    -0.00178001105222577714,
    -0.0008164344596567469,
    0.007880878010261995,
    -0.1447110071732629,
    0.5823571654525552,
    -0.45808210592918697,
    0.015151515151515152,
];

/// Weighted RMS norm used for step acceptance.
///
/// Each component is scaled by `atol + rtol * max(|y|, |y_new|)`.
pub fn error_norm<T: Scalar>(err: &[T], y: &[T], y_new: &[T], rtol: T, atol: T) -> T {
    if err.is_empty() {
        return T::zero();
    }
    let sum = err
        .iter()
        .zip(y.iter().zip(y_new))
        .fold(T::zero(), |acc, (&e, (&a, &b))| {
            let scale = atol + rtol * a.abs().max(b.abs());
            let ratio = e / scale;
            acc + ratio * ratio
        });
    (sum / T::constant(err.len() as f64)).sqrt()
}

/// Adaptive Tsitouras 5(4) stepper with first-same-as-last reuse.
///
/// A step is a two-phase affair: [`Tsit5::attempt`] computes a candidate and
/// its error norm, then [`Tsit5::accept`] commits it. A rejected attempt keeps
/// the first stage, so retrying with a smaller step costs six evaluations.
pub struct Tsit5<T: Scalar> {
    k: [Vec<T>; 7],
    tmp: Vec<T>,
    candidate: Vec<T>,
    err: Vec<T>,
    fsal: bool,
}

impl<T: Scalar> Tsit5<T> {
    pub fn new(dim: usize) -> Self {
        let z = T::zero();
        Self {
            k: std::array::from_fn(|_| vec![z; dim]),
            tmp: vec![z; dim],
            candidate: vec![z; dim],
            err: vec![z; dim],
            fsal: false,
        }
    }

    /// Forgets the cached first stage, e.g. after the state was edited externally.
    pub fn reset(&mut self) {
        self.fsal = false;
    }

    /// Derivative at the start of the next step, when already known.
    pub fn cached_derivative(&self) -> Option<&[T]> {
        self.fsal.then_some(self.k[0].as_slice())
    }

    /// Candidate state of the last attempt.
    pub fn candidate(&self) -> &[T] {
        &self.candidate
    }

    /// Computes y(t + dt) and returns the weighted error norm of the step.
    pub fn attempt(
        &mut self,
        system: &impl DynamicalSystem<T>,
        t: T,
        state: &[T],
        dt: T,
        rtol: T,
        atol: T,
    ) -> KineticsResult<T> {
        let n = state.len();
        if !self.fsal {
            system.apply(t, state, &mut self.k[0])?;
            self.fsal = true;
        }
        let c = C.map(T::constant);

        self.stage(state, dt, &[A21]);
        system.apply(t + c[0] * dt, &self.tmp, &mut self.k[1])?;
        self.stage(state, dt, &A3);
        system.apply(t + c[1] * dt, &self.tmp, &mut self.k[2])?;
        self.stage(state, dt, &A4);
        system.apply(t + c[2] * dt, &self.tmp, &mut self.k[3])?;
        self.stage(state, dt, &A5);
        system.apply(t + c[3] * dt, &self.tmp, &mut self.k[4])?;
        self.stage(state, dt, &A6);
        system.apply(t + c[4] * dt, &self.tmp, &mut self.k[5])?;

        self.stage(state, dt, &B);
        self.candidate.copy_from_slice(&self.tmp);
        system.apply(t + c[5] * dt, &self.candidate, &mut self.k[6])?;

        for i in 0..n {
            self.err[i] = dt
                * BTILDE
                    .iter()
                    .zip(&self.k)
                    .fold(T::zero(), |acc, (&b, k)| acc + T::constant(b) * k[i]);
        }
        Ok(error_norm(&self.err, state, &self.candidate, rtol, atol))
    }

    /// Commits the last attempt into `state`.
    pub fn accept(&mut self, state: &mut [T]) {
        state.copy_from_slice(&self.candidate);
        self.k.swap(0, 6);
        self.fsal = true;
    }

    // tmp = y + dt * Σ a_j k_j
    fn stage(&mut self, state: &[T], dt: T, row: &[f64]) {
        for (i, slot) in self.tmp.iter_mut().enumerate() {
            let increment = row
                .iter()
                .zip(&self.k)
                .fold(T::zero(), |acc, (&a, k)| acc + T::constant(a) * k[i]);
            *slot = state[i] + dt * increment;
        }
    }
}

/// Starting step size from the local scale of the problem (Hairer, Nørsett & Wanner).
pub fn initial_step<T: Scalar>(
    system: &impl DynamicalSystem<T>,
    t: T,
    state: &[T],
    rtol: T,
    atol: T,
) -> KineticsResult<T> {
    let n = state.len();
    let zeros = vec![T::zero(); n];
    let mut f0 = vec![T::zero(); n];
    system.apply(t, state, &mut f0)?;

    let d0 = error_norm(state, state, &zeros, rtol, atol);
    let d1 = error_norm(&f0, state, &zeros, rtol, atol);
    let small = T::constant(1e-5);
    let h0 = if d0 < small || d1 < small {
        T::constant(1e-6)
    } else {
        T::constant(0.01) * d0 / d1
    };

    let probe: Vec<T> = state.iter().zip(&f0).map(|(&y, &f)| y + h0 * f).collect();
    let mut f1 = vec![T::zero(); n];
    system.apply(t + h0, &probe, &mut f1)?;
    let diff: Vec<T> = f1.iter().zip(&f0).map(|(&a, &b)| a - b).collect();
    let d2 = error_norm(&diff, state, &zeros, rtol, atol) / h0;

    let dmax = d1.max(d2);
    let h1 = if dmax <= T::constant(1e-15) {
        (h0 * T::constant(1e-3)).max(T::constant(1e-6))
    } else {
        (T::constant(0.01) / dmax).powf(T::constant(0.2))
    };
    Ok((T::constant(100.0) * h0).min(h1))
}
