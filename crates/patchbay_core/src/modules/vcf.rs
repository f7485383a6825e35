use std::ops::RangeInclusive;

use rand::Rng;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::engine::{Control, FilterMode, PrimitiveSpec, SignalEngine, SignalHandle, Source};
use crate::error::{PatchError, Result};
use crate::module::{ModuleCore, SynthModule, clip, expect_number, expect_text};
use crate::modules::ModuleKind;
use crate::types::{ParamValue, PortValue};

const FREQ_RANGE: RangeInclusive<f64> = 20.0..=20000.0;
const Q_RANGE: RangeInclusive<f64> = 0.1..=100.0;
const GAIN_RANGE: RangeInclusive<f64> = 0.0..=2.0;
const CV_DEPTH_RANGE: RangeInclusive<f64> = 0.0..=10000.0;

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct VcfConfig {
    /// base cutoff in Hz
    pub cutoff: f64,
    /// resonance
    pub q: f64,
    /// output gain (0-2)
    pub gain: f64,
    pub filter_type: FilterMode,
    /// Hz of cutoff movement per unit of freq_cv
    pub freq_cv_depth: f64,
}

impl Default for VcfConfig {
    fn default() -> Self {
        Self {
            cutoff: 1000.0,
            q: 1.0,
            gain: 1.0,
            filter_type: FilterMode::Lowpass,
            freq_cv_depth: 2000.0,
        }
    }
}

/// Voltage controlled filter.
///
/// Cutoff is `base + freq_cv · depth`, clipped to 20-20000 Hz. The filter
/// primitive is allocated once; its source is re-routed only when the
/// handle on `audio_in` changes, and falls back to a silent constant when
/// nothing is patched.
#[derive(Debug)]
pub struct Vcf {
    core: ModuleCore,
    filter: Option<SignalHandle>,
    silence: Option<SignalHandle>,
    routed: Option<SignalHandle>,
}

impl Vcf {
    pub const AUDIO_IN: &'static str = "audio_in";
    pub const FREQ_CV: &'static str = "freq_cv";
    pub const AUDIO_OUT: &'static str = "audio_out";

    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, VcfConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: VcfConfig) -> Self {
        let core = ModuleCore::with_ports(name, &[Self::AUDIO_IN, Self::FREQ_CV], &[Self::AUDIO_OUT]);
        let mut vcf = Self {
            core,
            filter: None,
            silence: None,
            routed: None,
        };
        vcf.set_cutoff(config.cutoff);
        vcf.set_q(config.q);
        vcf.set_gain(config.gain);
        vcf.set_filter_type(config.filter_type);
        vcf.set_freq_cv_depth(config.freq_cv_depth);
        vcf
    }

    pub fn set_cutoff(&mut self, hz: f64) {
        self.core.store("freq", clip(hz, &FREQ_RANGE));
    }

    pub fn set_q(&mut self, q: f64) {
        self.core.store("q", clip(q, &Q_RANGE));
    }

    pub fn set_gain(&mut self, gain: f64) {
        self.core.store("gain", clip(gain, &GAIN_RANGE));
    }

    pub fn set_freq_cv_depth(&mut self, depth: f64) {
        self.core.store("freq_cv_depth", clip(depth, &CV_DEPTH_RANGE));
    }

    pub fn set_filter_type(&mut self, mode: FilterMode) {
        self.core.store("filter_type", mode.name());
    }

    /// Select a filter type by name. Unknown names select lowpass and are reported.
    pub fn set_filter_type_named(&mut self, name: &str) -> Result<()> {
        match FilterMode::from_name(name) {
            Some(mode) => {
                self.set_filter_type(mode);
                Ok(())
            }
            None => {
                warn!(module = self.core.name(), filter_type = name, "unknown filter type, using lowpass");
                self.set_filter_type(FilterMode::Lowpass);
                Err(PatchError::invalid_value(self.core.name(), "filter_type", name))
            }
        }
    }

    pub fn filter_type(&self) -> FilterMode {
        self.core
            .text("filter_type")
            .and_then(FilterMode::from_name)
            .unwrap_or_default()
    }

    pub fn q(&self) -> f64 {
        self.core.number("q", 1.0)
    }

    pub fn gain(&self) -> f64 {
        self.core.number("gain", 1.0)
    }

    pub fn compute_cutoff(&self) -> f64 {
        let base = self.core.number("freq", 1000.0);
        let depth = self.core.number("freq_cv_depth", 2000.0);
        let cv = self.core.input_scalar(Self::FREQ_CV).unwrap_or(0.0);
        clip(base + cv * depth, &FREQ_RANGE)
    }

    fn route_audio(&mut self, engine: &mut dyn SignalEngine, filter: SignalHandle) {
        match self.core.input(Self::AUDIO_IN) {
            PortValue::Handle(audio) => {
                if self.routed != Some(audio) {
                    debug!(module = self.core.name(), source = audio.id(), "routing audio");
                    engine.set(filter, Control::Input(Source::Signal(audio)));
                    self.routed = Some(audio);
                }
            }
            PortValue::Scalar(_) | PortValue::Absent => {
                if self.routed.take().is_some() {
                    if let Some(silence) = self.silence {
                        engine.set(filter, Control::Input(Source::Signal(silence)));
                    }
                }
            }
        }
    }

    pub fn available_filter_types() -> &'static [FilterMode] {
        FilterMode::ALL
    }

    pub fn randomize_parameters<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.set_cutoff(rng.random_range(100.0..=5000.0));
        self.set_q(rng.random_range(0.5..=10.0));
        self.set_gain(rng.random_range(0.8..=1.2));
        info!(module = self.core.name(), "randomized vcf parameters");
    }
}

impl SynthModule for Vcf {
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
        let silence = self
            .core
            .track(engine.create(PrimitiveSpec::Constant { value: 0.0 }));
        let filter = self.core.track(engine.create(PrimitiveSpec::Filter {
            input: Source::Signal(silence),
            mode: self.filter_type(),
            cutoff: self.compute_cutoff(),
            q: self.q(),
            gain: self.gain(),
        }));
        self.silence = Some(silence);
        self.filter = Some(filter);
        self.routed = None;
        self.core.set_output(Self::AUDIO_OUT, filter);
        self.route_audio(engine, filter);
    }

    fn cleanup(&mut self, _engine: &mut dyn SignalEngine) {
        self.filter = None;
        self.silence = None;
        self.routed = None;
    }

    fn process(&mut self, engine: &mut dyn SignalEngine) {
        let Some(filter) = self.filter else {
            return;
        };
        self.route_audio(engine, filter);
        engine.set(filter, Control::Cutoff(self.compute_cutoff()));
        engine.set(filter, Control::Resonance(self.q()));
        engine.set(filter, Control::Gain(self.gain()));
        engine.set(filter, Control::FilterMode(self.filter_type()));
    }

    fn apply_parameter(&mut self, name: &str, value: &ParamValue) -> Result<()> {
        let module = self.core.name().to_string();
        match name {
            "freq" | "cutoff" => self.set_cutoff(expect_number(&module, name, value)?),
            "q" => self.set_q(expect_number(&module, name, value)?),
            "gain" => self.set_gain(expect_number(&module, name, value)?),
            "freq_cv_depth" => self.set_freq_cv_depth(expect_number(&module, name, value)?),
            "filter_type" => return self.set_filter_type_named(expect_text(&module, name, value)?),
            _ => return Err(PatchError::unknown_parameter(&module, name)),
        }
        Ok(())
    }
}

impl ModuleKind for Vcf {
    type Config = VcfConfig;
    const TYPE_NAME: &'static str = "vcf";
    const DESCRIPTION: &'static str = "Voltage controlled multimode filter";

    fn from_config(name: &str, config: VcfConfig) -> Self {
        Self::with_config(name, config)
    }
}
