//! Continuous signals: pure functions of time.
//!
//! A [`Signal`] wraps `Fn(f64) -> f64`. Every operation returns a new signal
//! that closes over its inputs; nothing is ever mutated, so a signal can be
//! cloned freely and shared between streams and threads.
//!
//! ```
//! use contour::Signal;
//!
//! // Ten steps per second, wrapping every four steps
//! let step = Signal::time().mul(10.0).floor().modulo(4.0);
//! assert_eq!(step.at(0.55), 1.0);
//! assert_eq!(step.at(-0.05), 3.0);
//! ```

use std::fmt;
use std::sync::Arc;

/// Time in seconds since the start of the run.
pub type Time = f64;

/// An immutable, referentially transparent function of time.
#[derive(Clone)]
pub struct Signal {
    eval: Arc<dyn Fn(Time) -> f64 + Send + Sync>,
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal").finish_non_exhaustive()
    }
}

impl Signal {
    /// Build a signal from an evaluation function.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(Time) -> f64 + Send + Sync + 'static,
    {
        Self { eval: Arc::new(f) }
    }

    /// The identity signal `T`.
    pub fn time() -> Self {
        Self::from_fn(|t| t)
    }

    /// A signal that ignores time.
    pub fn constant(value: f64) -> Self {
        Self::from_fn(move |_| value)
    }

    /// Evaluate at `t`.
    #[inline]
    pub fn at(&self, t: Time) -> f64 {
        (self.eval)(t)
    }

    /// Apply `f` to every output value.
    pub fn map<F>(&self, f: F) -> Self
    where
        F: Fn(f64) -> f64 + Send + Sync + 'static,
    {
        let eval = Arc::clone(&self.eval);
        Self::from_fn(move |t| f(eval(t)))
    }

    /// Combine with another signal pointwise.
    pub fn zip_with<F>(&self, other: impl Into<Signal>, f: F) -> Self
    where
        F: Fn(f64, f64) -> f64 + Send + Sync + 'static,
    {
        let a = Arc::clone(&self.eval);
        let b = other.into().eval;
        Self::from_fn(move |t| f(a(t), b(t)))
    }

    pub fn add(&self, other: impl Into<Signal>) -> Self {
        self.zip_with(other, |a, b| a + b)
    }

    pub fn sub(&self, other: impl Into<Signal>) -> Self {
        self.zip_with(other, |a, b| a - b)
    }

    pub fn mul(&self, other: impl Into<Signal>) -> Self {
        self.zip_with(other, |a, b| a * b)
    }

    /// Division follows IEEE semantics: dividing by zero yields an infinity
    /// or NaN, which downstream consumers treat as invalid.
    pub fn div(&self, other: impl Into<Signal>) -> Self {
        self.zip_with(other, |a, b| a / b)
    }

    /// Mathematical modulo: the result lies in `[0, m)` for every input,
    /// including negative ones (`-1 mod 4 == 3`).
    pub fn modulo(&self, m: impl Into<Signal>) -> Self {
        self.zip_with(m, modulo)
    }

    pub fn sin(&self) -> Self {
        self.map(f64::sin)
    }

    pub fn cos(&self) -> Self {
        self.map(f64::cos)
    }

    pub fn floor(&self) -> Self {
        self.map(f64::floor)
    }

    pub fn ceil(&self) -> Self {
        self.map(f64::ceil)
    }

    pub fn abs(&self) -> Self {
        self.map(f64::abs)
    }

    /// `1.0` where `self < other`, else `0.0`.
    pub fn lt(&self, other: impl Into<Signal>) -> Self {
        self.zip_with(other, |a, b| bool_to_f64(a < b))
    }

    /// `1.0` where `self > other`, else `0.0`.
    pub fn gt(&self, other: impl Into<Signal>) -> Self {
        self.zip_with(other, |a, b| bool_to_f64(a > b))
    }

    /// `1.0` where `self <= other`, else `0.0`.
    pub fn lte(&self, other: impl Into<Signal>) -> Self {
        self.zip_with(other, |a, b| bool_to_f64(a <= b))
    }

    /// `1.0` where `self >= other`, else `0.0`.
    pub fn gte(&self, other: impl Into<Signal>) -> Self {
        self.zip_with(other, |a, b| bool_to_f64(a >= b))
    }

    pub fn min(&self, other: impl Into<Signal>) -> Self {
        self.zip_with(other, f64::min)
    }

    pub fn max(&self, other: impl Into<Signal>) -> Self {
        self.zip_with(other, f64::max)
    }

    /// Clamp into `[lo, hi]`. Bounds may themselves be signals.
    pub fn clamp(&self, lo: impl Into<Signal>, hi: impl Into<Signal>) -> Self {
        self.max(lo).min(hi)
    }

    /// Evaluate `factor` times faster.
    pub fn fast(&self, factor: f64) -> Self {
        let eval = Arc::clone(&self.eval);
        Self::from_fn(move |t| eval(t * factor))
    }

    /// Evaluate `factor` times slower. A zero factor leaves the signal as is.
    pub fn slow(&self, factor: f64) -> Self {
        if factor == 0.0 {
            return self.clone();
        }
        self.fast(1.0 / factor)
    }

    /// Delay by `amount` seconds.
    pub fn shift(&self, amount: Time) -> Self {
        let eval = Arc::clone(&self.eval);
        Self::from_fn(move |t| eval(t - amount))
    }
}

/// `x mod m` in `[0, m)` for `m > 0`.
#[inline]
pub fn modulo(x: f64, m: f64) -> f64 {
    // rem_euclid can return exactly m for tiny negative x
    ((x % m) + m) % m
}

#[inline]
fn bool_to_f64(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

impl From<f64> for Signal {
    fn from(value: f64) -> Self {
        Signal::constant(value)
    }
}

impl From<&Signal> for Signal {
    fn from(signal: &Signal) -> Self {
        signal.clone()
    }
}

macro_rules! signal_binop {
    ($trait:ident, $method:ident) => {
        impl<R: Into<Signal>> std::ops::$trait<R> for Signal {
            type Output = Signal;

            fn $method(self, rhs: R) -> Signal {
                Signal::$method(&self, rhs)
            }
        }

        impl<R: Into<Signal>> std::ops::$trait<R> for &Signal {
            type Output = Signal;

            fn $method(self, rhs: R) -> Signal {
                Signal::$method(self, rhs)
            }
        }

        impl std::ops::$trait<Signal> for f64 {
            type Output = Signal;

            fn $method(self, rhs: Signal) -> Signal {
                Signal::constant(self).$method(rhs)
            }
        }
    };
}

signal_binop!(Add, add);
signal_binop!(Sub, sub);
signal_binop!(Mul, mul);
signal_binop!(Div, div);

impl std::ops::Neg for Signal {
    type Output = Signal;

    fn neg(self) -> Signal {
        self.map(|v| -v)
    }
}
