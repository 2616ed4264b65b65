//! Per-step modifier values (velocity, gate, expression).

use std::fmt;
use std::sync::Arc;

use crate::signal::{Signal, Time};

/// How a modifier value is produced each tick.
#[derive(Clone)]
pub enum Modifier {
    /// Fixed value.
    Constant(f64),
    /// Evaluated at the tick's time.
    Signal(Signal),
    /// Evaluated at the stream's phase, `0.0 ≤ phase < 1.0` within each step.
    Phase(Arc<dyn Fn(f64) -> f64 + Send + Sync>),
}

impl Modifier {
    /// Wrap a function of phase.
    pub fn phase<F>(f: F) -> Self
    where
        F: Fn(f64) -> f64 + Send + Sync + 'static,
    {
        Modifier::Phase(Arc::new(f))
    }

    #[inline]
    pub fn eval(&self, t: Time, phase: f64) -> f64 {
        match self {
            Modifier::Constant(v) => *v,
            Modifier::Signal(s) => s.at(t),
            Modifier::Phase(f) => f(phase),
        }
    }
}

impl fmt::Debug for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Modifier::Constant(v) => f.debug_tuple("Constant").field(v).finish(),
            Modifier::Signal(_) => f.write_str("Signal(..)"),
            Modifier::Phase(_) => f.write_str("Phase(..)"),
        }
    }
}

impl From<f64> for Modifier {
    fn from(value: f64) -> Self {
        Modifier::Constant(value)
    }
}

impl From<Signal> for Modifier {
    fn from(signal: Signal) -> Self {
        Modifier::Signal(signal)
    }
}

impl From<&Signal> for Modifier {
    fn from(signal: &Signal) -> Self {
        Modifier::Signal(signal.clone())
    }
}
