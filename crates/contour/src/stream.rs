//! Sequence-driven trigger detection.
//!
//! A [`Stream`] steps through a list of [`NoteValue`]s, using the integer part
//! of a driver signal as the step counter. A trigger fires when the floor of
//! the driver changes between consecutive ticks:
//!
//! ```text
//! driver:   0.5   1.5   1.9   2.1   2.4   3.0
//! floor:     0     1     1     2     2     3
//! trigger:   -     ✓     -     ✓     -     ✓
//! ```
//!
//! The first tick of a stream never triggers; it only establishes the floor.
//! A mask below 0.5 drops the crossing that happens under it (the floor still
//! advances, so nothing is replayed once the mask opens). Gates only shape
//! the length of a note; they never add or remove triggers.

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::modifier::Modifier;
use crate::note::NoteValue;
use crate::signal::{modulo, Signal, Time};

/// Velocity for streams that set no velocity modifier.
pub const DEFAULT_VELOCITY: f64 = 0.7;

#[derive(Debug, Error, PartialEq)]
pub enum StreamError {
    #[error("a stream needs at least one value")]
    EmptySequence,
}

/// Everything a stream resolved during one tick.
///
/// This is the only thing the scheduler and observers see of a stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamState {
    pub trigger: bool,
    pub note: NoteValue,
    pub velocity: f64,
    pub phase: f64,
    pub index: usize,
    pub gate_open: bool,
    pub masked: bool,
    pub driver_value: f64,
    pub floor: f64,
    pub pressure: f64,
    pub slide: f64,
    pub bend: f64,
}

/// A value sequence driven by a signal.
///
/// Modifier setters return `&mut Self` for chaining. Calling the same setter
/// twice replaces the earlier value; modifiers never stack.
#[derive(Debug)]
pub struct Stream {
    values: Vec<NoteValue>,
    driver: Signal,
    velocity: Option<Modifier>,
    gate: Option<Modifier>,
    pressure: Option<Modifier>,
    slide: Option<Modifier>,
    bend: Option<Modifier>,
    mask: Option<Signal>,
    instrument: Option<String>,
    default_velocity: f64,

    name: String,
    last_floor: Option<f64>,
    warned_nan: bool,
    warned_driver: bool,
}

impl Stream {
    /// Build a stream over `values`, stepped by `driver`.
    pub fn new<I, V>(values: I, driver: impl Into<Signal>) -> Result<Self, StreamError>
    where
        I: IntoIterator<Item = V>,
        V: Into<NoteValue>,
    {
        let values: Vec<NoteValue> = values.into_iter().map(Into::into).collect();
        if values.is_empty() {
            return Err(StreamError::EmptySequence);
        }

        Ok(Self {
            values,
            driver: driver.into(),
            velocity: None,
            gate: None,
            pressure: None,
            slide: None,
            bend: None,
            mask: None,
            instrument: None,
            default_velocity: DEFAULT_VELOCITY,
            name: String::new(),
            last_floor: None,
            warned_nan: false,
            warned_driver: false,
        })
    }

    pub fn velocity(&mut self, velocity: impl Into<Modifier>) -> &mut Self {
        self.velocity = Some(velocity.into());
        self
    }

    /// Gate is open while the modifier reads `>= 0.5`.
    pub fn gate(&mut self, gate: impl Into<Modifier>) -> &mut Self {
        self.gate = Some(gate.into());
        self
    }

    pub fn pressure(&mut self, pressure: impl Into<Modifier>) -> &mut Self {
        self.pressure = Some(pressure.into());
        self
    }

    pub fn slide(&mut self, slide: impl Into<Modifier>) -> &mut Self {
        self.slide = Some(slide.into());
        self
    }

    /// Pitch bend in semitones.
    pub fn bend(&mut self, bend: impl Into<Modifier>) -> &mut Self {
        self.bend = Some(bend.into());
        self
    }

    /// Crossings are dropped while `mask < 0.5`.
    pub fn mask(&mut self, mask: impl Into<Signal>) -> &mut Self {
        self.mask = Some(mask.into());
        self
    }

    /// Route notes to a named instrument on every sink. Keys are
    /// case-insensitive and stored lowercase.
    pub fn instrument(&mut self, key: impl Into<String>) -> &mut Self {
        let mut key = key.into();
        key.make_ascii_lowercase();
        self.instrument = Some(key);
        self
    }

    /// Velocity used when no velocity modifier is set, or when it reads NaN.
    /// A non-finite value is ignored.
    pub fn default_velocity(&mut self, velocity: f64) -> &mut Self {
        if velocity.is_finite() {
            self.default_velocity = velocity.clamp(0.0, 1.0);
        } else {
            warn!(
                "ignoring default velocity {} for stream {:?}; keeping {}",
                velocity, self.name, self.default_velocity
            );
        }
        self
    }

    pub fn instrument_key(&self) -> Option<&str> {
        self.instrument.as_deref()
    }

    pub fn values(&self) -> &[NoteValue] {
        &self.values
    }

    /// Floor seen by the most recent tick, if any.
    pub fn last_floor(&self) -> Option<f64> {
        self.last_floor
    }

    pub(crate) fn set_name(&mut self, name: &str) {
        self.name.clear();
        self.name.push_str(name);
    }

    /// Carry trigger state over from the instance this one replaces, so an
    /// unchanged cycle keeps its place instead of retriggering.
    pub fn transfer_state_from(&mut self, previous: &Stream) {
        self.last_floor = previous.last_floor;
    }

    /// Advance to time `t`.
    pub fn tick(&mut self, t: Time) -> StreamState {
        let driver_value = self.driver.at(t);
        if !driver_value.is_finite() {
            return self.invalid_driver_state(driver_value);
        }

        let current_floor = driver_value.floor();
        let phase = driver_value - current_floor;

        let len = self.values.len();
        let index = (modulo(current_floor, len as f64) as usize).min(len - 1);
        let note = &self.values[index];

        let masked = self.mask.as_ref().is_some_and(|mask| mask.at(t) < 0.5);

        let trigger = matches!(self.last_floor, Some(last) if last != current_floor)
            && !masked
            && !note.is_rest();

        self.last_floor = Some(current_floor);

        let velocity = match self.velocity.as_ref().map(|m| m.eval(t, phase)) {
            Some(v) if v.is_nan() => {
                self.warn_nan("velocity");
                self.default_velocity
            }
            Some(v) => v.clamp(0.0, 1.0),
            None => self.default_velocity,
        };

        let gate_open = match self.gate.as_ref().map(|m| m.eval(t, phase)) {
            Some(g) if g.is_nan() => {
                self.warn_nan("gate");
                false
            }
            Some(g) => g >= 0.5,
            None => true,
        };

        let pressure = self.expression(t, phase, ExpressionKind::Pressure);
        let slide = self.expression(t, phase, ExpressionKind::Slide);
        let bend = self.expression(t, phase, ExpressionKind::Bend);

        StreamState {
            trigger,
            note: self.values[index].clone(),
            velocity,
            phase,
            index,
            gate_open,
            masked,
            driver_value,
            floor: current_floor,
            pressure,
            slide,
            bend,
        }
    }

    fn expression(&mut self, t: Time, phase: f64, kind: ExpressionKind) -> f64 {
        let modifier = match kind {
            ExpressionKind::Pressure => &self.pressure,
            ExpressionKind::Slide => &self.slide,
            ExpressionKind::Bend => &self.bend,
        };

        match modifier.as_ref().map(|m| m.eval(t, phase)) {
            Some(v) if v.is_nan() => {
                self.warn_nan(kind.as_str());
                0.0
            }
            Some(v) => v,
            None => 0.0,
        }
    }

    fn invalid_driver_state(&mut self, driver_value: f64) -> StreamState {
        if !self.warned_driver {
            self.warned_driver = true;
            warn!(
                stream = %self.name,
                "driver evaluated to {}; stream is silent until it is finite again",
                driver_value
            );
        }

        StreamState {
            trigger: false,
            note: NoteValue::Rest,
            velocity: self.default_velocity,
            phase: 0.0,
            index: 0,
            gate_open: false,
            masked: false,
            driver_value,
            floor: f64::NAN,
            pressure: 0.0,
            slide: 0.0,
            bend: 0.0,
        }
    }

    fn warn_nan(&mut self, modifier: &str) {
        if !self.warned_nan {
            self.warned_nan = true;
            warn!(
                stream = %self.name,
                "{} modifier evaluated to NaN; using its default",
                modifier
            );
        }
    }
}

#[derive(Clone, Copy)]
enum ExpressionKind {
    Pressure,
    Slide,
    Bend,
}

impl ExpressionKind {
    fn as_str(self) -> &'static str {
        match self {
            ExpressionKind::Pressure => "pressure",
            ExpressionKind::Slide => "slide",
            ExpressionKind::Bend => "bend",
        }
    }
}
