//! The signal-primitive collaborator.
//!
//! Modules never compute samples. They allocate primitives (oscillators,
//! filters, envelopes, ...) from a [`SignalEngine`], wire them together by
//! handle and push parameter changes into them. The engine is handed to
//! modules explicitly on every lifecycle call.

mod rack;

pub use rack::{EnvelopeStage, Rack};

use serde::Serialize;

pub type PrimitiveId = u64;

/// Opaque reference to an engine primitive, tagged with a gain.
///
/// Scaling a handle only changes the tag, so cable attenuation and mixer
/// levels never allocate primitives. Engines multiply the primitive's
/// output by the gain wherever the handle is read.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SignalHandle {
    id: PrimitiveId,
    gain: f64,
}

impl SignalHandle {
    pub fn new(id: PrimitiveId) -> Self {
        Self { id, gain: 1.0 }
    }

    pub fn id(&self) -> PrimitiveId {
        self.id
    }

    pub fn gain(&self) -> f64 {
        self.gain
    }

    pub fn scaled(self, factor: f64) -> Self {
        Self {
            id: self.id,
            gain: self.gain * factor,
        }
    }

    /// True when both handles refer to the same primitive, regardless of gain.
    pub fn same_primitive(&self, other: &SignalHandle) -> bool {
        self.id == other.id
    }
}

/// An input fed to a primitive: either a fixed value or another primitive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Source {
    Constant(f64),
    Signal(SignalHandle),
}

impl From<SignalHandle> for Source {
    fn from(handle: SignalHandle) -> Self {
        Source::Signal(handle)
    }
}

impl From<f64> for Source {
    fn from(value: f64) -> Self {
        Source::Constant(value)
    }
}

macro_rules! named_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $label:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            ::serde::Serialize,
            ::serde::Deserialize,
            ::schemars::JsonSchema,
        )]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn name(&self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($label => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.name())
            }
        }
    };
}

pub(crate) use named_enum;

named_enum!(
    /// Audio-rate generator shapes offered by the oscillator primitive.
    Waveform {
        Sine => "sine",
        Saw => "saw",
        Square => "square",
        Triangle => "triangle",
        Noise => "noise",
    }
);

impl Default for Waveform {
    fn default() -> Self {
        Waveform::Sine
    }
}

impl Waveform {
    pub fn is_periodic(&self) -> bool {
        !matches!(self, Waveform::Noise)
    }
}

named_enum!(
    /// Control-rate shapes offered by the LFO primitive.
    LfoShape {
        Sine => "sine",
        SawUp => "saw_up",
        SawDown => "saw_down",
        Square => "square",
        Triangle => "triangle",
        Pulse => "pulse",
        Random => "random",
    }
);

impl Default for LfoShape {
    fn default() -> Self {
        LfoShape::Sine
    }
}

named_enum!(
    FilterMode {
        Lowpass => "lowpass",
        Highpass => "highpass",
        Bandpass => "bandpass",
        Bandreject => "bandreject",
        Allpass => "allpass",
    }
);

impl Default for FilterMode {
    fn default() -> Self {
        FilterMode::Lowpass
    }
}

named_enum!(
    MathOp {
        Add => "add",
        Subtract => "subtract",
        Multiply => "multiply",
        Divide => "divide",
    }
);

impl Default for MathOp {
    fn default() -> Self {
        MathOp::Add
    }
}

impl MathOp {
    /// Added to every divisor so that dividing by a silent input stays finite.
    pub const DIVIDE_EPSILON: f64 = 0.001;

    pub fn apply(&self, a: f64, b: f64) -> f64 {
        match self {
            MathOp::Add => a + b,
            MathOp::Subtract => a - b,
            MathOp::Multiply => a * b,
            MathOp::Divide => a / (b + Self::DIVIDE_EPSILON),
        }
    }
}

/// Attack, decay and release in seconds, sustain as a level in 0..=1.
/// A non-zero `duration` releases automatically that many seconds after play.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvelopeShape {
    pub attack: f64,
    pub decay: f64,
    pub sustain: f64,
    pub release: f64,
    pub duration: f64,
}

impl Default for EnvelopeShape {
    fn default() -> Self {
        Self {
            attack: 0.01,
            decay: 0.1,
            sustain: 0.5,
            release: 1.0,
            duration: 0.0,
        }
    }
}

/// Construction request for a primitive. The variant's fields double as the
/// primitive's live configuration; [`Control`]s update them in place.
#[derive(Debug, Clone, PartialEq)]
pub enum PrimitiveSpec {
    Oscillator {
        waveform: Waveform,
        frequency: f64,
        amplitude: f64,
        pulse_width: f64,
    },
    Lfo {
        shape: LfoShape,
        frequency: f64,
        amplitude: f64,
        offset: f64,
        sharpness: f64,
    },
    Constant {
        value: f64,
    },
    Filter {
        input: Source,
        mode: FilterMode,
        cutoff: f64,
        q: f64,
        gain: f64,
    },
    Envelope {
        shape: EnvelopeShape,
    },
    /// Ramps towards `target`, taking `rise`/`fall` seconds per unit of change.
    Smoother {
        target: f64,
        rise: f64,
        fall: f64,
    },
    Product {
        a: Source,
        b: Source,
    },
    Sum {
        inputs: Vec<SignalHandle>,
    },
    Arithmetic {
        op: MathOp,
        a: Source,
        b: Source,
        scale: f64,
        offset: f64,
    },
}

impl PrimitiveSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            PrimitiveSpec::Oscillator { .. } => "oscillator",
            PrimitiveSpec::Lfo { .. } => "lfo",
            PrimitiveSpec::Constant { .. } => "constant",
            PrimitiveSpec::Filter { .. } => "filter",
            PrimitiveSpec::Envelope { .. } => "envelope",
            PrimitiveSpec::Smoother { .. } => "smoother",
            PrimitiveSpec::Product { .. } => "product",
            PrimitiveSpec::Sum { .. } => "sum",
            PrimitiveSpec::Arithmetic { .. } => "arithmetic",
        }
    }
}

/// In-place parameter change. Engines ignore controls that do not apply to
/// the addressed primitive, so every setter is safe to call on every tick.
#[derive(Debug, Clone, PartialEq)]
pub enum Control {
    Frequency(f64),
    Amplitude(f64),
    PulseWidth(f64),
    Offset(f64),
    Sharpness(f64),
    LfoShape(LfoShape),
    Cutoff(f64),
    Resonance(f64),
    Gain(f64),
    FilterMode(FilterMode),
    Input(Source),
    Operands(Source, Source),
    Inputs(Vec<SignalHandle>),
    Envelope(EnvelopeShape),
    Value(f64),
    Target(f64),
    RampTimes { rise: f64, fall: f64 },
    Operation(MathOp),
    Scale(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Play,
    Stop,
    /// Restart a periodic primitive at phase zero.
    Reset,
}

/// The contract modules rely on to get actual signals computed.
pub trait SignalEngine {
    fn create(&mut self, spec: PrimitiveSpec) -> SignalHandle;

    fn set(&mut self, handle: SignalHandle, control: Control);

    /// Returns false when the primitive does not support the command.
    fn transport(&mut self, handle: SignalHandle, command: Transport) -> bool;

    fn release(&mut self, handle: SignalHandle);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaling_a_handle_keeps_its_primitive() {
        let handle = SignalHandle::new(7);
        let scaled = handle.scaled(0.5).scaled(0.5);
        assert_eq!(scaled.id(), 7);
        assert_eq!(scaled.gain(), 0.25);
        assert!(scaled.same_primitive(&handle));
        assert_ne!(scaled, handle);
    }

    #[test]
    fn names_round_trip_through_lookup() {
        for shape in LfoShape::ALL {
            assert_eq!(LfoShape::from_name(shape.name()), Some(*shape));
        }
        assert_eq!(FilterMode::from_name("notch"), None);
        assert_eq!(Waveform::Triangle.to_string(), "triangle");
    }

    #[test]
    fn divide_never_hits_zero() {
        let out = MathOp::Divide.apply(1.0, 0.0);
        assert!((out - 1000.0).abs() < 1e-9);
        assert_eq!(MathOp::Subtract.apply(3.0, 5.0), -2.0);
    }

    #[test]
    fn waveform_deserializes_from_snake_case() {
        let shape: LfoShape = serde_json::from_value(serde_json::json!("saw_down")).unwrap();
        assert_eq!(shape, LfoShape::SawDown);
    }
}
