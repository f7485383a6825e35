use std::ops::RangeInclusive;

use rand::Rng;
use rand::seq::IndexedRandom;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{info, warn};

use crate::engine::{Control, PrimitiveSpec, SignalEngine, SignalHandle, Transport, Waveform};
use crate::error::{PatchError, Result};
use crate::module::{ModuleCore, SynthModule, clip, expect_number, expect_text};
use crate::modules::ModuleKind;
use crate::types::ParamValue;

const FREQ_RANGE: RangeInclusive<f64> = 20.0..=20000.0;
const AMPLITUDE_RANGE: RangeInclusive<f64> = 0.0..=1.0;
const OCTAVE_RANGE: RangeInclusive<i32> = -2..=2;
const FINE_TUNE_RANGE: RangeInclusive<f64> = -100.0..=100.0;
const FM_DEPTH_RANGE: RangeInclusive<f64> = 0.0..=10000.0;
const PULSE_WIDTH_RANGE: RangeInclusive<f64> = 0.05..=0.95;

/// Noise is much louder than the periodic shapes at the same amplitude.
const NOISE_ATTENUATION: f64 = 0.1;

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct VcoConfig {
    /// base frequency in Hz
    pub base_freq: f64,
    pub waveform: Waveform,
    /// output level (0-1)
    pub amplitude: f64,
    /// octave offset (-2 to 2)
    pub octave: i32,
    /// fine tune in cents (-100 to 100)
    pub fine_tune: f64,
    /// Hz of deviation per unit of FM input
    pub fm_depth: f64,
}

impl Default for VcoConfig {
    fn default() -> Self {
        Self {
            base_freq: 440.0,
            waveform: Waveform::Sine,
            amplitude: 0.5,
            octave: 0,
            fine_tune: 0.0,
            fm_depth: 100.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Generators {
    sine: SignalHandle,
    saw: SignalHandle,
    square: SignalHandle,
    triangle: SignalHandle,
    noise: SignalHandle,
}

impl Generators {
    fn get(&self, waveform: Waveform) -> SignalHandle {
        match waveform {
            Waveform::Sine => self.sine,
            Waveform::Saw => self.saw,
            Waveform::Square => self.square,
            Waveform::Triangle => self.triangle,
            Waveform::Noise => self.noise,
        }
    }

    fn periodic(&self) -> [SignalHandle; 4] {
        [self.sine, self.saw, self.square, self.triangle]
    }
}

/// Voltage controlled oscillator.
///
/// All five generators are allocated on start; switching waveform only
/// changes which one is published on `audio_out` and `sync_out`.
///
/// Frequency is `base · 2^octave · 2^(fine/1200)`, then multiplied by
/// `2^freq_cv` (1V/oct) and offset by `fm_input · fm_depth`, clipped to
/// 20-20000 Hz.
#[derive(Debug)]
pub struct Vco {
    core: ModuleCore,
    generators: Option<Generators>,
    published: Option<Waveform>,
    current_frequency: f64,
}

impl Vco {
    pub const FREQ_CV: &'static str = "freq_cv";
    pub const FM_INPUT: &'static str = "fm_input";
    pub const PWM_INPUT: &'static str = "pwm_input";
    pub const SYNC_INPUT: &'static str = "sync_input";
    pub const RESET_INPUT: &'static str = "reset_input";
    pub const AUDIO_OUT: &'static str = "audio_out";
    pub const SYNC_OUT: &'static str = "sync_out";

    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, VcoConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: VcoConfig) -> Self {
        let core = ModuleCore::with_ports(
            name,
            &[
                Self::FREQ_CV,
                Self::FM_INPUT,
                Self::PWM_INPUT,
                Self::SYNC_INPUT,
                Self::RESET_INPUT,
            ],
            &[Self::AUDIO_OUT, Self::SYNC_OUT],
        );
        let mut vco = Self {
            core,
            generators: None,
            published: None,
            current_frequency: config.base_freq,
        };
        vco.set_frequency(config.base_freq);
        vco.set_waveform(config.waveform);
        vco.set_amplitude(config.amplitude);
        vco.set_octave(config.octave);
        vco.set_fine_tune(config.fine_tune);
        vco.set_fm_depth(config.fm_depth);
        vco.current_frequency = vco.compute_frequency();
        vco
    }

    pub fn set_frequency(&mut self, hz: f64) {
        self.core.store("base_freq", clip(hz, &FREQ_RANGE));
    }

    pub fn set_waveform(&mut self, waveform: Waveform) {
        self.core.store("waveform", waveform.name());
    }

    /// Select a waveform by name. Unknown names select sine and are reported.
    pub fn set_waveform_named(&mut self, name: &str) -> Result<()> {
        match Waveform::from_name(name) {
            Some(waveform) => {
                self.set_waveform(waveform);
                Ok(())
            }
            None => {
                warn!(module = self.core.name(), waveform = name, "unknown waveform, using sine");
                self.set_waveform(Waveform::Sine);
                Err(PatchError::invalid_value(self.core.name(), "waveform", name))
            }
        }
    }

    pub fn set_amplitude(&mut self, amplitude: f64) {
        self.core.store("amplitude", clip(amplitude, &AMPLITUDE_RANGE));
    }

    pub fn set_octave(&mut self, octave: i32) {
        let octave = octave.clamp(*OCTAVE_RANGE.start(), *OCTAVE_RANGE.end());
        self.core.store("octave", octave);
    }

    pub fn set_fine_tune(&mut self, cents: f64) {
        self.core.store("fine_tune", clip(cents, &FINE_TUNE_RANGE));
    }

    pub fn set_fm_depth(&mut self, hz_per_unit: f64) {
        self.core.store("fm_depth", clip(hz_per_unit, &FM_DEPTH_RANGE));
    }

    pub fn waveform(&self) -> Waveform {
        self.core
            .text("waveform")
            .and_then(Waveform::from_name)
            .unwrap_or_default()
    }

    pub fn available_waveforms() -> &'static [Waveform] {
        Waveform::ALL
    }

    pub fn amplitude(&self) -> f64 {
        self.core.number("amplitude", 0.5)
    }

    pub fn octave(&self) -> i32 {
        self.core.number("octave", 0.0) as i32
    }

    /// Frequency computed by the most recent recompute.
    pub fn current_frequency(&self) -> f64 {
        self.current_frequency
    }

    pub fn compute_frequency(&self) -> f64 {
        let base = self.core.number("base_freq", 440.0);
        let octave = self.core.number("octave", 0.0);
        let fine = self.core.number("fine_tune", 0.0);
        let depth = self.core.number("fm_depth", 100.0);

        let mut freq = base * 2f64.powf(octave) * 2f64.powf(fine / 1200.0);
        if let Some(cv) = self.core.input_scalar(Self::FREQ_CV) {
            freq *= 2f64.powf(cv);
        }
        if let Some(fm) = self.core.input_scalar(Self::FM_INPUT) {
            freq += fm * depth;
        }
        clip(freq, &FREQ_RANGE)
    }

    fn publish(&mut self, generators: &Generators, waveform: Waveform) {
        let handle = generators.get(waveform);
        self.core.set_output(Self::AUDIO_OUT, handle);
        self.core.set_output(Self::SYNC_OUT, handle);
        self.published = Some(waveform);
    }

    pub fn randomize_parameters<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.set_frequency(55.0 * 2f64.powi(rng.random_range(0..=5)));
        if let Some(waveform) = Waveform::ALL.choose(rng) {
            self.set_waveform(*waveform);
        }
        self.set_octave(rng.random_range(-1..=1));
        self.set_fine_tune(rng.random_range(-50.0..=50.0));
        self.set_amplitude(rng.random_range(0.3..=0.8));
        info!(module = self.core.name(), "randomized vco parameters");
    }
}

impl SynthModule for Vco {
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
        let frequency = self.compute_frequency();
        let amplitude = self.amplitude();
        let mut oscillator = |waveform: Waveform| {
            let amplitude = if waveform.is_periodic() {
                amplitude
            } else {
                amplitude * NOISE_ATTENUATION
            };
            engine.create(PrimitiveSpec::Oscillator {
                waveform,
                frequency,
                amplitude,
                pulse_width: 0.5,
            })
        };
        let generators = Generators {
            sine: oscillator(Waveform::Sine),
            saw: oscillator(Waveform::Saw),
            square: oscillator(Waveform::Square),
            triangle: oscillator(Waveform::Triangle),
            noise: oscillator(Waveform::Noise),
        };
        for handle in generators.periodic() {
            self.core.track(handle);
        }
        self.core.track(generators.noise);

        self.current_frequency = frequency;
        self.generators = Some(generators);
        self.publish(&generators, self.waveform());
    }

    fn cleanup(&mut self, _engine: &mut dyn SignalEngine) {
        self.generators = None;
        self.published = None;
    }

    fn process(&mut self, engine: &mut dyn SignalEngine) {
        let Some(generators) = self.generators else {
            return;
        };

        let frequency = self.compute_frequency();
        self.current_frequency = frequency;
        let amplitude = self.amplitude();
        for handle in generators.periodic() {
            engine.set(handle, Control::Frequency(frequency));
            engine.set(handle, Control::Amplitude(amplitude));
        }
        engine.set(
            generators.noise,
            Control::Amplitude(amplitude * NOISE_ATTENUATION),
        );

        let pwm = self.core.input_scalar(Self::PWM_INPUT).unwrap_or(0.0);
        engine.set(
            generators.square,
            Control::PulseWidth(clip(0.5 + 0.5 * pwm, &PULSE_WIDTH_RANGE)),
        );

        let waveform = self.waveform();
        if self.published != Some(waveform) {
            self.publish(&generators, waveform);
        }

        let active = generators.get(waveform);
        if self.core.input(Self::SYNC_INPUT).is_truthy()
            || self.core.input(Self::RESET_INPUT).is_truthy()
        {
            engine.transport(active, Transport::Reset);
        }
    }

    fn apply_parameter(&mut self, name: &str, value: &ParamValue) -> Result<()> {
        let module = self.core.name().to_string();
        match name {
            "base_freq" | "frequency" => self.set_frequency(expect_number(&module, name, value)?),
            "waveform" => return self.set_waveform_named(expect_text(&module, name, value)?),
            "amplitude" => self.set_amplitude(expect_number(&module, name, value)?),
            "octave" => self.set_octave(expect_number(&module, name, value)?.round() as i32),
            "fine_tune" => self.set_fine_tune(expect_number(&module, name, value)?),
            "fm_depth" => self.set_fm_depth(expect_number(&module, name, value)?),
            _ => return Err(PatchError::unknown_parameter(&module, name)),
        }
        Ok(())
    }
}

impl ModuleKind for Vco {
    type Config = VcoConfig;
    const TYPE_NAME: &'static str = "vco";
    const DESCRIPTION: &'static str = "Voltage controlled oscillator with five waveforms";

    fn from_config(name: &str, config: VcoConfig) -> Self {
        Self::with_config(name, config)
    }
}
