use std::ops::RangeInclusive;

use schemars::JsonSchema;
use serde::Deserialize;

use crate::engine::{Control, PrimitiveSpec, SignalEngine, SignalHandle};
use crate::error::{PatchError, Result};
use crate::module::{ModuleCore, SynthModule, clip, expect_number};
use crate::modules::{MAX_PORT_COUNT, ModuleKind};
use crate::types::ParamValue;

const LEVEL_RANGE: RangeInclusive<f64> = 0.0..=1.0;

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct MixerConfig {
    /// number of inputs (at most 64)
    pub inputs: usize,
    /// initial level of every input (0-1)
    pub level: f64,
    /// master level (0-1)
    pub master_level: f64,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            inputs: 4,
            level: 0.5,
            master_level: 0.8,
        }
    }
}

/// N-input mixer.
///
/// Inputs carrying a signal handle with a level above zero are summed and
/// the sum is scaled by the master level. With nothing to mix the output is
/// a silent constant.
#[derive(Debug)]
pub struct Mixer {
    core: ModuleCore,
    inputs: usize,
    sum: Option<SignalHandle>,
    silence: Option<SignalHandle>,
}

impl Mixer {
    pub const OUTPUT: &'static str = "output";

    pub fn new(name: impl Into<String>, inputs: usize) -> Self {
        Self::with_config(
            name,
            MixerConfig {
                inputs,
                ..Default::default()
            },
        )
    }

    pub fn with_config(name: impl Into<String>, config: MixerConfig) -> Self {
        let inputs = config.inputs.min(MAX_PORT_COUNT);
        let mut core = ModuleCore::with_ports(name, &[], &[Self::OUTPUT]);
        for index in 0..inputs {
            core.add_input(Self::input_name(index));
        }
        let mut mixer = Self {
            core,
            inputs,
            sum: None,
            silence: None,
        };
        for index in 0..inputs {
            mixer.store_level(index, config.level);
        }
        mixer.set_master_level(config.master_level);
        mixer
    }

    pub fn input_name(index: usize) -> String {
        format!("input{index}")
    }

    fn level_name(index: usize) -> String {
        format!("level{index}")
    }

    pub fn input_count(&self) -> usize {
        self.inputs
    }

    fn store_level(&mut self, index: usize, level: f64) {
        self.core.store(&Self::level_name(index), clip(level, &LEVEL_RANGE));
    }

    pub fn set_input_level(&mut self, index: usize, level: f64) -> Result<()> {
        if index >= self.inputs {
            return Err(PatchError::unknown_parameter(
                self.core.name(),
                &Self::level_name(index),
            ));
        }
        self.store_level(index, level);
        Ok(())
    }

    pub fn set_master_level(&mut self, level: f64) {
        self.core.store("master_level", clip(level, &LEVEL_RANGE));
    }

    pub fn input_level(&self, index: usize) -> f64 {
        self.core.number(&Self::level_name(index), 0.5)
    }

    pub fn master_level(&self) -> f64 {
        self.core.number("master_level", 0.8)
    }

    fn active_inputs(&self) -> Vec<SignalHandle> {
        (0..self.inputs)
            .filter_map(|index| {
                let handle = self.core.input_handle(&Self::input_name(index))?;
                let level = self.input_level(index);
                (level > 0.0).then(|| handle.scaled(level))
            })
            .collect()
    }
}

impl SynthModule for Mixer {
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
        let sum = self
            .core
            .track(engine.create(PrimitiveSpec::Sum { inputs: Vec::new() }));
        self.silence = Some(silence);
        self.sum = Some(sum);
        self.process(engine);
    }

    fn cleanup(&mut self, _engine: &mut dyn SignalEngine) {
        self.sum = None;
        self.silence = None;
    }

    fn process(&mut self, engine: &mut dyn SignalEngine) {
        let (Some(sum), Some(silence)) = (self.sum, self.silence) else {
            return;
        };
        let active = self.active_inputs();
        if active.is_empty() {
            engine.set(sum, Control::Inputs(Vec::new()));
            self.core.set_output(Self::OUTPUT, silence);
        } else {
            engine.set(sum, Control::Inputs(active));
            let master = self.master_level();
            self.core.set_output(Self::OUTPUT, sum.scaled(master));
        }
    }

    fn apply_parameter(&mut self, name: &str, value: &ParamValue) -> Result<()> {
        let module = self.core.name().to_string();
        if name == "master_level" {
            self.set_master_level(expect_number(&module, name, value)?);
            return Ok(());
        }
        let index = name
            .strip_prefix("level")
            .and_then(|i| i.parse::<usize>().ok())
            .ok_or_else(|| PatchError::unknown_parameter(&module, name))?;
        self.set_input_level(index, expect_number(&module, name, value)?)
    }
}

impl ModuleKind for Mixer {
    type Config = MixerConfig;
    const TYPE_NAME: &'static str = "mixer";
    const DESCRIPTION: &'static str = "Level-controlled signal mixer";

    fn from_config(name: &str, config: MixerConfig) -> Self {
        Self::with_config(name, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Rack;

    #[test]
    fn declares_numbered_inputs() {
        let mixer = Mixer::new("mix", 3);
        assert_eq!(
            mixer.core().input_names(),
            vec!["input0", "input1", "input2"]
        );
        assert_eq!(mixer.input_level(2), 0.5);
        assert_eq!(mixer.master_level(), 0.8);
    }

    #[test]
    fn empty_mixer_outputs_silence() {
        let mut rack = Rack::default();
        let mut mixer = Mixer::new("mix", 2);
        mixer.start(&mut rack);
        assert_eq!(mixer.core().output(Mixer::OUTPUT).as_handle(), mixer.silence);
    }

    #[test]
    fn levels_are_validated() {
        let mut mixer = Mixer::new("mix", 2);
        mixer.set_input_level(1, 3.0).unwrap();
        assert_eq!(mixer.input_level(1), 1.0);
        assert!(mixer.set_input_level(2, 0.5).is_err());
        assert!(mixer.apply_parameter("level0", &ParamValue::from(0.25)).is_ok());
        assert_eq!(mixer.input_level(0), 0.25);
        assert!(mixer.apply_parameter("pan0", &ParamValue::from(0.25)).is_err());
    }

    #[test]
    fn input_count_is_capped() {
        let mixer = Mixer::new("mix", 10_000);
        assert_eq!(mixer.input_count(), MAX_PORT_COUNT);
        assert_eq!(mixer.core().input_names().len(), MAX_PORT_COUNT);
        assert!(!mixer.core().has_input(&Mixer::input_name(MAX_PORT_COUNT)));
    }
}
