use std::ops::RangeInclusive;

use rand::Rng;
use rand::seq::IndexedRandom;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::engine::{Control, PrimitiveSpec, SignalEngine, SignalHandle, Source, named_enum};
use crate::error::{PatchError, Result};
use crate::module::{GateDetector, GateEdge, ModuleCore, SynthModule, clip, expect_number, expect_text};
use crate::modules::ModuleKind;
use crate::types::{ParamValue, PortValue};

const GAIN_RANGE: RangeInclusive<f64> = 0.0..=2.0;
const CV_AMOUNT_RANGE: RangeInclusive<f64> = 0.0..=2.0;
const OFFSET_RANGE: RangeInclusive<f64> = -1.0..=1.0;
const MAX_GAIN_RANGE: RangeInclusive<f64> = 0.1..=5.0;
const SMOOTHING_RANGE: RangeInclusive<f64> = 0.001..=1.0;

named_enum!(
    /// Response applied to the summed gain before clamping.
    ControlCurve {
        Linear => "linear",
        Exponential => "exponential",
        Logarithmic => "logarithmic",
    }
);

impl Default for ControlCurve {
    fn default() -> Self {
        ControlCurve::Exponential
    }
}

impl ControlCurve {
    pub fn apply(&self, gain: f64) -> f64 {
        if gain <= 0.0 {
            return gain;
        }
        match self {
            ControlCurve::Linear => gain,
            ControlCurve::Exponential => gain * gain,
            ControlCurve::Logarithmic => (1.0 + gain).ln() / 2f64.ln(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct VcaConfig {
    /// base gain (0-2)
    pub gain: f64,
    pub control_curve: ControlCurve,
    /// sensitivity of gain_cv (0-2)
    pub cv_amount: f64,
    /// added to the gain before the curve (-1 to 1)
    pub offset: f64,
    /// upper bound of the final gain (0.1-5)
    pub max_gain: f64,
    /// gain ramp time in seconds
    pub smoothing_time: f64,
}

impl Default for VcaConfig {
    fn default() -> Self {
        Self {
            gain: 1.0,
            control_curve: ControlCurve::Exponential,
            cv_amount: 1.0,
            offset: 0.0,
            max_gain: 2.0,
            smoothing_time: 0.01,
        }
    }
}

/// Voltage controlled amplifier.
///
/// The gain is computed from the base gain and the control inputs, shaped
/// by the control curve and fed through a smoother so that stepped changes
/// do not click. `envelope_out` publishes the smoothed gain itself.
#[derive(Debug)]
pub struct Vca {
    core: ModuleCore,
    smoother: Option<SignalHandle>,
    multiplier: Option<SignalHandle>,
    silence: Option<SignalHandle>,
    routed: Option<SignalHandle>,
    gate: GateDetector,
    envelope_gate: GateDetector,
    current_gain: f64,
}

impl Vca {
    pub const AUDIO_IN: &'static str = "audio_in";
    pub const GAIN_CV: &'static str = "gain_cv";
    pub const AM_INPUT: &'static str = "am_input";
    pub const GATE_INPUT: &'static str = "gate_input";
    pub const VELOCITY_CV: &'static str = "velocity_cv";
    pub const AUDIO_OUT: &'static str = "audio_out";
    pub const ENVELOPE_OUT: &'static str = "envelope_out";

    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, VcaConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: VcaConfig) -> Self {
        let core = ModuleCore::with_ports(
            name,
            &[
                Self::AUDIO_IN,
                Self::GAIN_CV,
                Self::AM_INPUT,
                Self::GATE_INPUT,
                Self::VELOCITY_CV,
            ],
            &[Self::AUDIO_OUT, Self::ENVELOPE_OUT],
        );
        let mut vca = Self {
            core,
            smoother: None,
            multiplier: None,
            silence: None,
            routed: None,
            gate: GateDetector::default(),
            envelope_gate: GateDetector::default(),
            current_gain: 0.0,
        };
        vca.set_gain(config.gain);
        vca.set_control_curve(config.control_curve);
        vca.set_cv_amount(config.cv_amount);
        vca.set_offset(config.offset);
        vca.set_max_gain(config.max_gain);
        vca.set_smoothing_time(config.smoothing_time);
        vca
    }

    pub fn set_gain(&mut self, gain: f64) {
        self.core.store("gain", clip(gain, &GAIN_RANGE));
    }

    pub fn set_control_curve(&mut self, curve: ControlCurve) {
        self.core.store("control_curve", curve.name());
    }

    /// Select a curve by name. Unknown names select exponential and are reported.
    pub fn set_control_curve_named(&mut self, name: &str) -> Result<()> {
        match ControlCurve::from_name(name) {
            Some(curve) => {
                self.set_control_curve(curve);
                Ok(())
            }
            None => {
                warn!(module = self.core.name(), curve = name, "unknown control curve, using exponential");
                self.set_control_curve(ControlCurve::Exponential);
                Err(PatchError::invalid_value(self.core.name(), "control_curve", name))
            }
        }
    }

    pub fn set_cv_amount(&mut self, amount: f64) {
        self.core.store("cv_amount", clip(amount, &CV_AMOUNT_RANGE));
    }

    pub fn set_offset(&mut self, offset: f64) {
        self.core.store("offset", clip(offset, &OFFSET_RANGE));
    }

    pub fn set_max_gain(&mut self, max_gain: f64) {
        self.core.store("max_gain", clip(max_gain, &MAX_GAIN_RANGE));
    }

    pub fn set_smoothing_time(&mut self, seconds: f64) {
        self.core.store("smoothing_time", clip(seconds, &SMOOTHING_RANGE));
    }

    pub fn control_curve(&self) -> ControlCurve {
        self.core
            .text("control_curve")
            .and_then(ControlCurve::from_name)
            .unwrap_or_default()
    }

    pub fn available_curves() -> &'static [ControlCurve] {
        ControlCurve::ALL
    }

    pub fn smoothing_time(&self) -> f64 {
        self.core.number("smoothing_time", 0.01)
    }

    pub fn mute(&mut self) {
        self.set_gain(0.0);
    }

    pub fn unmute(&mut self, gain: f64) {
        self.set_gain(gain);
    }

    /// Gain computed by the most recent recompute.
    pub fn current_gain(&self) -> f64 {
        self.current_gain
    }

    pub fn envelope_value(&self) -> f64 {
        self.current_gain
    }

    pub fn is_gate_active(&self) -> bool {
        self.gate.is_high()
    }

    /// Gate multiplier. Only scalar gates close the amplifier; an unpatched
    /// or signal-carrying gate input leaves it open.
    fn gate_level(&self) -> f64 {
        match self.core.input(Self::GATE_INPUT) {
            PortValue::Scalar(v) if v > GateDetector::THRESHOLD => 1.0,
            PortValue::Scalar(_) => 0.0,
            PortValue::Handle(_) | PortValue::Absent => 1.0,
        }
    }

    /// Compute the target gain from parameters and control inputs.
    pub fn compute_gain(&self) -> f64 {
        let base = self.core.number("gain", 1.0);
        let cv_amount = self.core.number("cv_amount", 1.0);
        let offset = self.core.number("offset", 0.0);
        let max_gain = self.core.number("max_gain", 2.0);

        let cv = self.core.input_scalar(Self::GAIN_CV).unwrap_or(0.0);
        let am = self.core.input_scalar(Self::AM_INPUT).unwrap_or(0.0);
        let velocity = self.core.input_scalar(Self::VELOCITY_CV).unwrap_or(1.0);

        let mut gain = base + cv * cv_amount + offset + am;
        gain *= velocity;
        gain *= self.gate_level();
        clip(self.control_curve().apply(gain), &(0.0..=max_gain))
    }

    /// Drive the base gain from the gate input as a two-stage envelope.
    ///
    /// A rising gate ramps to unity over `attack` seconds, a falling gate
    /// ramps to zero over `release`. Anything but a scalar above the gate
    /// threshold counts as low. Call before a recompute to take effect.
    pub fn apply_envelope(&mut self, attack: f64, release: f64) -> GateEdge {
        let level = self.core.input_scalar(Self::GATE_INPUT).unwrap_or(0.0);
        let edge = self.envelope_gate.process(level);
        match edge {
            GateEdge::Rising => {
                self.set_smoothing_time(attack);
                self.set_gain(1.0);
            }
            GateEdge::Falling => {
                self.set_smoothing_time(release);
                self.set_gain(0.0);
            }
            GateEdge::None => {}
        }
        if edge != GateEdge::None {
            debug!(module = self.core.name(), ?edge, "vca envelope edge");
        }
        edge
    }

    pub fn randomize_parameters<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.set_gain(rng.random_range(0.3..=1.5));
        self.set_cv_amount(rng.random_range(0.5..=1.5));
        self.set_offset(rng.random_range(-0.2..=0.2));
        if let Some(curve) = ControlCurve::ALL.choose(rng) {
            self.set_control_curve(*curve);
        }
        self.set_smoothing_time(rng.random_range(0.005..=0.05));
        info!(module = self.core.name(), "randomized vca parameters");
    }
}

impl SynthModule for Vca {
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
        let ramp = self.smoothing_time();
        let smoother = self.core.track(engine.create(PrimitiveSpec::Smoother {
            target: 0.0,
            rise: ramp,
            fall: ramp,
        }));
        let silence = self
            .core
            .track(engine.create(PrimitiveSpec::Constant { value: 0.0 }));
        self.smoother = Some(smoother);
        self.silence = Some(silence);
        self.multiplier = None;
        self.routed = None;
        self.process(engine);
    }

    fn cleanup(&mut self, _engine: &mut dyn SignalEngine) {
        self.smoother = None;
        self.multiplier = None;
        self.silence = None;
        self.routed = None;
        self.current_gain = 0.0;
    }

    fn process(&mut self, engine: &mut dyn SignalEngine) {
        let (Some(smoother), Some(silence)) = (self.smoother, self.silence) else {
            return;
        };
        let ramp = self.smoothing_time();
        engine.set(smoother, Control::RampTimes { rise: ramp, fall: ramp });

        if let Some(level) = self.core.input_scalar(Self::GATE_INPUT) {
            self.gate.process(level);
        }
        let gain = self.compute_gain();
        match self.core.input_handle(Self::AUDIO_IN) {
            Some(audio) => {
                engine.set(smoother, Control::Target(gain));
                let product = match self.multiplier {
                    Some(product) => {
                        if self.routed != Some(audio) {
                            engine.set(
                                product,
                                Control::Operands(Source::Signal(audio), Source::Signal(smoother)),
                            );
                        }
                        product
                    }
                    None => {
                        let product = self.core.track(engine.create(PrimitiveSpec::Product {
                            a: Source::Signal(audio),
                            b: Source::Signal(smoother),
                        }));
                        self.multiplier = Some(product);
                        product
                    }
                };
                self.routed = Some(audio);
                self.current_gain = gain;
                self.core.set_output(Self::AUDIO_OUT, product);
            }
            None => {
                engine.set(smoother, Control::Target(0.0));
                self.routed = None;
                self.current_gain = 0.0;
                self.core.set_output(Self::AUDIO_OUT, silence);
            }
        }
        self.core.set_output(Self::ENVELOPE_OUT, smoother);
    }

    fn apply_parameter(&mut self, name: &str, value: &ParamValue) -> Result<()> {
        let module = self.core.name().to_string();
        match name {
            "gain" => self.set_gain(expect_number(&module, name, value)?),
            "control_curve" => {
                return self.set_control_curve_named(expect_text(&module, name, value)?);
            }
            "cv_amount" => self.set_cv_amount(expect_number(&module, name, value)?),
            "offset" => self.set_offset(expect_number(&module, name, value)?),
            "max_gain" => self.set_max_gain(expect_number(&module, name, value)?),
            "smoothing_time" => self.set_smoothing_time(expect_number(&module, name, value)?),
            _ => return Err(PatchError::unknown_parameter(&module, name)),
        }
        Ok(())
    }
}

impl ModuleKind for Vca {
    type Config = VcaConfig;
    const TYPE_NAME: &'static str = "vca";
    const DESCRIPTION: &'static str = "Voltage controlled amplifier with selectable control curve";

    fn from_config(name: &str, config: VcaConfig) -> Self {
        Self::with_config(name, config)
    }
}
