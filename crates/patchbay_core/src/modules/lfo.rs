use std::ops::RangeInclusive;

use rand::Rng;
use rand::seq::IndexedRandom;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{info, warn};

use crate::engine::{Control, LfoShape, PrimitiveSpec, SignalEngine, SignalHandle, Transport};
use crate::error::{PatchError, Result};
use crate::module::{ModuleCore, SynthModule, clip, expect_number, expect_text};
use crate::modules::ModuleKind;
use crate::types::ParamValue;

const FREQ_RANGE: RangeInclusive<f64> = 0.01..=100.0;
const AMPLITUDE_RANGE: RangeInclusive<f64> = 0.0..=10.0;
const OFFSET_RANGE: RangeInclusive<f64> = -5.0..=5.0;
const SHARPNESS_RANGE: RangeInclusive<f64> = 0.0..=1.0;

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct LfoConfig {
    /// rate in Hz (0.01-100)
    pub frequency: f64,
    pub waveform: LfoShape,
    pub amplitude: f64,
    pub offset: f64,
    /// pulse shape control (0-1)
    pub sharpness: f64,
}

impl Default for LfoConfig {
    fn default() -> Self {
        Self {
            frequency: 1.0,
            waveform: LfoShape::Sine,
            amplitude: 1.0,
            offset: 0.0,
            sharpness: 0.5,
        }
    }
}

/// Low frequency oscillator publishing a control signal on `cv_out`.
#[derive(Debug)]
pub struct Lfo {
    core: ModuleCore,
    oscillator: Option<SignalHandle>,
}

impl Lfo {
    pub const FREQ_CV: &'static str = "freq_cv";
    pub const RESET_INPUT: &'static str = "reset_input";
    pub const CV_OUT: &'static str = "cv_out";

    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, LfoConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: LfoConfig) -> Self {
        let core = ModuleCore::with_ports(name, &[Self::FREQ_CV, Self::RESET_INPUT], &[Self::CV_OUT]);
        let mut lfo = Self {
            core,
            oscillator: None,
        };
        lfo.set_frequency(config.frequency);
        lfo.set_waveform(config.waveform);
        lfo.set_amplitude(config.amplitude);
        lfo.set_offset(config.offset);
        lfo.set_sharpness(config.sharpness);
        lfo
    }

    pub fn set_frequency(&mut self, hz: f64) {
        self.core.store("frequency", clip(hz, &FREQ_RANGE));
    }

    pub fn set_waveform(&mut self, shape: LfoShape) {
        self.core.store("waveform", shape.name());
    }

    /// Select a shape by name. Unknown names select sine and are reported.
    pub fn set_waveform_named(&mut self, name: &str) -> Result<()> {
        match LfoShape::from_name(name) {
            Some(shape) => {
                self.set_waveform(shape);
                Ok(())
            }
            None => {
                warn!(module = self.core.name(), waveform = name, "unknown lfo waveform, using sine");
                self.set_waveform(LfoShape::Sine);
                Err(PatchError::invalid_value(self.core.name(), "waveform", name))
            }
        }
    }

    pub fn set_amplitude(&mut self, amplitude: f64) {
        self.core.store("amplitude", clip(amplitude, &AMPLITUDE_RANGE));
    }

    pub fn set_offset(&mut self, offset: f64) {
        self.core.store("offset", clip(offset, &OFFSET_RANGE));
    }

    pub fn set_sharpness(&mut self, sharpness: f64) {
        self.core.store("sharpness", clip(sharpness, &SHARPNESS_RANGE));
    }

    pub fn waveform(&self) -> LfoShape {
        self.core
            .text("waveform")
            .and_then(LfoShape::from_name)
            .unwrap_or_default()
    }

    pub fn available_waveforms() -> &'static [LfoShape] {
        LfoShape::ALL
    }

    /// Base rate plus `freq_cv`, clipped to the LFO range.
    pub fn compute_frequency(&self) -> f64 {
        let base = self.core.number("frequency", 1.0);
        let cv = self.core.input_scalar(Self::FREQ_CV).unwrap_or(0.0);
        clip(base + cv, &FREQ_RANGE)
    }

    fn primitive_spec(&self) -> PrimitiveSpec {
        PrimitiveSpec::Lfo {
            shape: self.waveform(),
            frequency: self.compute_frequency(),
            amplitude: self.core.number("amplitude", 1.0),
            offset: self.core.number("offset", 0.0),
            sharpness: self.core.number("sharpness", 0.5),
        }
    }

    pub fn randomize_parameters<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.set_frequency(rng.random_range(0.1..=10.0));
        if let Some(shape) = LfoShape::ALL.choose(rng) {
            self.set_waveform(*shape);
        }
        self.set_amplitude(rng.random_range(0.5..=2.0));
        self.set_offset(rng.random_range(-1.0..=1.0));
        info!(module = self.core.name(), "randomized lfo parameters");
    }
}

impl SynthModule for Lfo {
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
        let oscillator = self.core.track(engine.create(self.primitive_spec()));
        self.oscillator = Some(oscillator);
        self.core.set_output(Self::CV_OUT, oscillator);
    }

    fn cleanup(&mut self, _engine: &mut dyn SignalEngine) {
        self.oscillator = None;
    }

    fn process(&mut self, engine: &mut dyn SignalEngine) {
        let Some(oscillator) = self.oscillator else {
            return;
        };
        engine.set(oscillator, Control::LfoShape(self.waveform()));
        engine.set(oscillator, Control::Frequency(self.compute_frequency()));
        engine.set(oscillator, Control::Amplitude(self.core.number("amplitude", 1.0)));
        engine.set(oscillator, Control::Offset(self.core.number("offset", 0.0)));
        engine.set(oscillator, Control::Sharpness(self.core.number("sharpness", 0.5)));
        if self.core.input(Self::RESET_INPUT).is_truthy() {
            engine.transport(oscillator, Transport::Reset);
        }
    }

    fn apply_parameter(&mut self, name: &str, value: &ParamValue) -> Result<()> {
        let module = self.core.name().to_string();
        match name {
            "frequency" | "freq" => self.set_frequency(expect_number(&module, name, value)?),
            "waveform" => return self.set_waveform_named(expect_text(&module, name, value)?),
            "amplitude" => self.set_amplitude(expect_number(&module, name, value)?),
            "offset" => self.set_offset(expect_number(&module, name, value)?),
            "sharpness" => self.set_sharpness(expect_number(&module, name, value)?),
            _ => return Err(PatchError::unknown_parameter(&module, name)),
        }
        Ok(())
    }
}

impl ModuleKind for Lfo {
    type Config = LfoConfig;
    const TYPE_NAME: &'static str = "lfo";
    const DESCRIPTION: &'static str = "Low frequency oscillator for modulation";

    fn from_config(name: &str, config: LfoConfig) -> Self {
        Self::with_config(name, config)
    }
}
