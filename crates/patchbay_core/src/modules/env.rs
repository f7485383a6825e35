use std::ops::RangeInclusive;

use rand::Rng;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{debug, info};

use crate::engine::{Control, EnvelopeShape, PrimitiveSpec, SignalEngine, SignalHandle, Transport};
use crate::error::{PatchError, Result};
use crate::module::{GateDetector, GateEdge, ModuleCore, SynthModule, clip, expect_number};
use crate::modules::ModuleKind;
use crate::types::{ParamValue, PortValue};

const ATTACK_RANGE: RangeInclusive<f64> = 0.001..=5.0;
const DECAY_RANGE: RangeInclusive<f64> = 0.0..=5.0;
const SUSTAIN_RANGE: RangeInclusive<f64> = 0.0..=1.0;
const RELEASE_RANGE: RangeInclusive<f64> = 0.001..=10.0;
const DURATION_RANGE: RangeInclusive<f64> = 0.0..=20.0;

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct EnvConfig {
    /// attack time in seconds
    pub attack: f64,
    /// decay time in seconds
    pub decay: f64,
    /// sustain level (0-1)
    pub sustain: f64,
    /// release time in seconds
    pub release: f64,
    /// total duration in seconds, 0 holds the sustain until the gate falls
    pub duration: f64,
}

impl Default for EnvConfig {
    fn default() -> Self {
        let shape = EnvelopeShape::default();
        Self {
            attack: shape.attack,
            decay: shape.decay,
            sustain: shape.sustain,
            release: shape.release,
            duration: shape.duration,
        }
    }
}

/// ADSR envelope generator.
///
/// A scalar on `gate_in` rising above 0.5 plays the envelope and falling back
/// releases it. A signal handle on the gate is not followed; hosts drive
/// such envelopes through [`Env::play`] and [`Env::stop_envelope`].
#[derive(Debug)]
pub struct Env {
    core: ModuleCore,
    envelope: Option<SignalHandle>,
    gate: GateDetector,
}

impl Env {
    pub const GATE_IN: &'static str = "gate_in";
    pub const CV_OUT: &'static str = "cv_out";

    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, EnvConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: EnvConfig) -> Self {
        let core = ModuleCore::with_ports(name, &[Self::GATE_IN], &[Self::CV_OUT]);
        let mut env = Self {
            core,
            envelope: None,
            gate: GateDetector::default(),
        };
        env.set_attack(config.attack);
        env.set_decay(config.decay);
        env.set_sustain(config.sustain);
        env.set_release(config.release);
        env.set_duration(config.duration);
        env
    }

    pub fn set_attack(&mut self, seconds: f64) {
        self.core.store("attack", clip(seconds, &ATTACK_RANGE));
    }

    pub fn set_decay(&mut self, seconds: f64) {
        self.core.store("decay", clip(seconds, &DECAY_RANGE));
    }

    pub fn set_sustain(&mut self, level: f64) {
        self.core.store("sustain", clip(level, &SUSTAIN_RANGE));
    }

    pub fn set_release(&mut self, seconds: f64) {
        self.core.store("release", clip(seconds, &RELEASE_RANGE));
    }

    pub fn set_duration(&mut self, seconds: f64) {
        self.core.store("duration", clip(seconds, &DURATION_RANGE));
    }

    pub fn shape(&self) -> EnvelopeShape {
        let defaults = EnvelopeShape::default();
        EnvelopeShape {
            attack: self.core.number("attack", defaults.attack),
            decay: self.core.number("decay", defaults.decay),
            sustain: self.core.number("sustain", defaults.sustain),
            release: self.core.number("release", defaults.release),
            duration: self.core.number("duration", defaults.duration),
        }
    }

    pub fn is_gate_high(&self) -> bool {
        self.gate.is_high()
    }

    /// Start the attack phase. Does nothing before the module is started.
    pub fn play(&mut self, engine: &mut dyn SignalEngine) {
        if let Some(envelope) = self.envelope {
            debug!(module = self.core.name(), "envelope play");
            engine.transport(envelope, Transport::Play);
        }
    }

    /// Enter the release phase.
    pub fn stop_envelope(&mut self, engine: &mut dyn SignalEngine) {
        if let Some(envelope) = self.envelope {
            debug!(module = self.core.name(), "envelope release");
            engine.transport(envelope, Transport::Stop);
        }
    }

    pub fn randomize_parameters<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.set_attack(rng.random_range(0.01..=0.5));
        self.set_decay(rng.random_range(0.1..=0.8));
        self.set_sustain(rng.random_range(0.2..=0.8));
        self.set_release(rng.random_range(0.5..=3.0));
        info!(module = self.core.name(), "randomized envelope parameters");
    }
}

impl SynthModule for Env {
    fn core(&self) -> &ModuleCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModuleCore {
        &mut self.core
    }

    fn module_type(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn initialize(&mut self, engine: &mut dyn SignalEngine) {
        let envelope = self.core.track(engine.create(PrimitiveSpec::Envelope {
            shape: self.shape(),
        }));
        self.envelope = Some(envelope);
        self.gate = GateDetector::default();
        self.core.set_output(Self::CV_OUT, envelope);
    }

    fn cleanup(&mut self, _engine: &mut dyn SignalEngine) {
        self.envelope = None;
    }

    fn process(&mut self, engine: &mut dyn SignalEngine) {
        let Some(envelope) = self.envelope else {
            return;
        };
        engine.set(envelope, Control::Envelope(self.shape()));

        let level = match self.core.input(Self::GATE_IN) {
            PortValue::Scalar(v) => v,
            PortValue::Absent => 0.0,
            PortValue::Handle(_) => return,
        };
        match self.gate.process(level) {
            GateEdge::Rising => self.play(engine),
            GateEdge::Falling => self.stop_envelope(engine),
            GateEdge::None => {}
        }
    }

    fn apply_parameter(&mut self, name: &str, value: &ParamValue) -> Result<()> {
        let module = self.core.name().to_string();
        let number = expect_number(&module, name, value);
        match name {
            "attack" => self.set_attack(number?),
            "decay" => self.set_decay(number?),
            "sustain" => self.set_sustain(number?),
            "release" => self.set_release(number?),
            "duration" => self.set_duration(number?),
            _ => return Err(PatchError::unknown_parameter(&module, name)),
        }
        Ok(())
    }
}

impl ModuleKind for Env {
    type Config = EnvConfig;
    const TYPE_NAME: &'static str = "env";
    const DESCRIPTION: &'static str = "Gate-driven ADSR envelope generator";

    fn from_config(name: &str, config: EnvConfig) -> Self {
        Self::with_config(name, config)
    }
}
