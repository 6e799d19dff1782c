use crate::error::KineticsResult;
use nalgebra::DMatrix;
use num_traits::{Float, FromPrimitive, Num, NumCast, One, ToPrimitive, Zero};
use std::num::FpCategory;
use std::ops::{
    Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Rem, RemAssign, Sub, SubAssign,
};

/// Dual number for forward-mode differentiation.
/// val: real part
/// eps: derivative part
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Dual {
    pub val: f64,
    pub eps: f64,
}

impl Dual {
    pub fn new(val: f64, eps: f64) -> Self {
        Self { val, eps }
    }

    pub fn constant(val: f64) -> Self {
        Self::new(val, 0.0)
    }

    /// Applies the chain rule for a scalar function with known derivative.
    fn chain(self, value: f64, derivative: f64) -> Self {
        // Avoid 0 * inf when the direction is not seeded.
        let eps = if self.eps == 0.0 {
            0.0
        } else {
            derivative * self.eps
        };
        Self::new(value, eps)
    }
}

/// Builds the Jacobian of `eval` at `x` column by column.
///
/// `eval` receives the seeded dual input and writes `rows` dual outputs.
pub fn jacobian<F>(rows: usize, x: &[f64], mut eval: F) -> KineticsResult<DMatrix<f64>>
where
    F: FnMut(&[Dual], &mut [Dual]) -> KineticsResult<()>,
{
    let cols = x.len();
    let mut jac = DMatrix::zeros(rows, cols);
    let mut input: Vec<Dual> = x.iter().map(|&v| Dual::constant(v)).collect();
    let mut output = vec![Dual::constant(0.0); rows];
    for j in 0..cols {
        input[j].eps = 1.0;
        eval(&input, &mut output)?;
        for i in 0..rows {
            jac[(i, j)] = output[i].eps;
        }
        input[j].eps = 0.0;
    }
    Ok(jac)
}

impl Zero for Dual {
    fn zero() -> Self {
        Self::constant(0.0)
    }
    fn is_zero(&self) -> bool {
        self.val == 0.0 && self.eps == 0.0
    }
}

impl One for Dual {
    fn one() -> Self {
        Self::constant(1.0)
    }
}

impl Add for Dual {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.val + rhs.val, self.eps + rhs.eps)
    }
}

impl Sub for Dual {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.val - rhs.val, self.eps - rhs.eps)
    }
}

impl Mul for Dual {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        Self::new(self.val * rhs.val, self.val * rhs.eps + self.eps * rhs.val)
    }
}

impl Div for Dual {
    type Output = Self;
    fn div(self, rhs: Self) -> Self {
        Self::new(
            self.val / rhs.val,
            (self.eps * rhs.val - self.val * rhs.eps) / (rhs.val * rhs.val),
        )
    }
}

impl Rem for Dual {
    type Output = Self;
    fn rem(self, rhs: Self) -> Self {
        Self::new(self.val % rhs.val, self.eps)
    }
}

impl Neg for Dual {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.val, -self.eps)
    }
}

macro_rules! assign_ops {
    ($($trait:ident $method:ident $op:tt),*) => {
        $(impl $trait for Dual {
            fn $method(&mut self, rhs: Self) {
                *self = *self $op rhs;
            }
        })*
    };
}

assign_ops!(
    AddAssign add_assign +,
    SubAssign sub_assign -,
    MulAssign mul_assign *,
    DivAssign div_assign /,
    RemAssign rem_assign %
);

impl Num for Dual {
    type FromStrRadixErr = <f64 as Num>::FromStrRadixErr;
    fn from_str_radix(str: &str, radix: u32) -> Result<Self, Self::FromStrRadixErr> {
        f64::from_str_radix(str, radix).map(Self::constant)
    }
}

impl ToPrimitive for Dual {
    fn to_i64(&self) -> Option<i64> {
        self.val.to_i64()
    }
    fn to_u64(&self) -> Option<u64> {
        self.val.to_u64()
    }
    fn to_f64(&self) -> Option<f64> {
        Some(self.val)
    }
}

impl FromPrimitive for Dual {
    fn from_i64(n: i64) -> Option<Self> {
        Some(Self::constant(n as f64))
    }
    fn from_u64(n: u64) -> Option<Self> {
        Some(Self::constant(n as f64))
    }
    fn from_f64(n: f64) -> Option<Self> {
        Some(Self::constant(n))
    }
}

impl NumCast for Dual {
    fn from<T: ToPrimitive>(n: T) -> Option<Self> {
        n.to_f64().map(Self::constant)
    }
}

macro_rules! smooth {
    ($($name:ident => |$v:ident| $deriv:expr;)*) => {
        $(fn $name(self) -> Self {
            let $v = self.val;
            self.chain($v.$name(), $deriv)
        })*
    };
}

macro_rules! piecewise_constant {
    ($($name:ident),*) => {
        $(fn $name(self) -> Self {
            Self::constant(self.val.$name())
        })*
    };
}

impl Float for Dual {
    fn nan() -> Self {
        Self::constant(f64::NAN)
    }
    fn infinity() -> Self {
        Self::constant(f64::INFINITY)
    }
    fn neg_infinity() -> Self {
        Self::constant(f64::NEG_INFINITY)
    }
    fn neg_zero() -> Self {
        Self::new(-0.0, 0.0)
    }
    fn min_value() -> Self {
        Self::constant(f64::MIN)
    }
    fn min_positive_value() -> Self {
        Self::constant(f64::MIN_POSITIVE)
    }
    fn max_value() -> Self {
        Self::constant(f64::MAX)
    }
    fn is_nan(self) -> bool {
        self.val.is_nan()
    }
    fn is_infinite(self) -> bool {
        self.val.is_infinite()
    }
    fn is_finite(self) -> bool {
        self.val.is_finite()
    }
    fn is_normal(self) -> bool {
        self.val.is_normal()
    }
    fn classify(self) -> FpCategory {
        self.val.classify()
    }

    piecewise_constant!(floor, ceil, round, trunc, signum);

    fn fract(self) -> Self {
        Self::new(self.val.fract(), self.eps)
    }
    fn abs(self) -> Self {
        if self.val >= 0.0 {
            self
        } else {
            -self
        }
    }
    fn is_sign_positive(self) -> bool {
        self.val.is_sign_positive()
    }
    fn is_sign_negative(self) -> bool {
        self.val.is_sign_negative()
    }
    fn mul_add(self, a: Self, b: Self) -> Self {
        self * a + b
    }
    fn recip(self) -> Self {
        Self::one() / self
    }
    fn powi(self, n: i32) -> Self {
        let derivative = if n == 0 {
            0.0
        } else {
            n as f64 * self.val.powi(n - 1)
        };
        self.chain(self.val.powi(n), derivative)
    }
    fn powf(self, n: Self) -> Self {
        let value = self.val.powf(n.val);
        let base = if n.val == 0.0 {
            0.0
        } else {
            n.val * self.val.powf(n.val - 1.0)
        };
        let mut out = self.chain(value, base);
        if n.eps != 0.0 {
            out.eps += value * self.val.ln() * n.eps;
        }
        out
    }

    smooth! {
        sqrt => |v| 0.5 / v.sqrt();
        exp => |v| v.exp();
        exp2 => |v| v.exp2() * std::f64::consts::LN_2;
        ln => |v| 1.0 / v;
        log2 => |v| 1.0 / (v * std::f64::consts::LN_2);
        log10 => |v| 1.0 / (v * std::f64::consts::LN_10);
        cbrt => |v| 1.0 / (3.0 * v.cbrt() * v.cbrt());
        sin => |v| v.cos();
        cos => |v| -v.sin();
        tan => |v| 1.0 + v.tan() * v.tan();
        asin => |v| 1.0 / (1.0 - v * v).sqrt();
        acos => |v| -1.0 / (1.0 - v * v).sqrt();
        atan => |v| 1.0 / (1.0 + v * v);
        exp_m1 => |v| v.exp();
        ln_1p => |v| 1.0 / (1.0 + v);
        sinh => |v| v.cosh();
        cosh => |v| v.sinh();
        tanh => |v| 1.0 - v.tanh() * v.tanh();
        asinh => |v| 1.0 / (v * v + 1.0).sqrt();
        acosh => |v| 1.0 / (v * v - 1.0).sqrt();
        atanh => |v| 1.0 / (1.0 - v * v);
    }

    fn log(self, base: Self) -> Self {
        self.ln() / base.ln()
    }
    fn max(self, other: Self) -> Self {
        if self.val >= other.val {
            self
        } else {
            other
        }
    }
    fn min(self, other: Self) -> Self {
        if self.val <= other.val {
            self
        } else {
            other
        }
    }
    fn abs_sub(self, other: Self) -> Self {
        if self.val > other.val {
            self - other
        } else {
            Self::zero()
        }
    }
    fn hypot(self, other: Self) -> Self {
        (self * self + other * other).sqrt()
    }
    fn atan2(self, other: Self) -> Self {
        let denom = self.val * self.val + other.val * other.val;
        Self::new(
            self.val.atan2(other.val),
            (other.val * self.eps - self.val * other.eps) / denom,
        )
    }
    fn sin_cos(self) -> (Self, Self) {
        (self.sin(), self.cos())
    }
    fn integer_decode(self) -> (u64, i16, i8) {
        self.val.integer_decode()
    }
}
