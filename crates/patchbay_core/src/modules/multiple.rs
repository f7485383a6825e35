use schemars::JsonSchema;
use serde::Deserialize;

use crate::engine::SignalEngine;
use crate::error::{PatchError, Result};
use crate::module::{ModuleCore, SynthModule};
use crate::modules::{MAX_PORT_COUNT, ModuleKind};
use crate::types::ParamValue;

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct MultipleConfig {
    /// number of copies of the input (at most 64)
    pub outputs: usize,
}

impl Default for MultipleConfig {
    fn default() -> Self {
        Self { outputs: 4 }
    }
}

/// Copies its input unchanged onto every output.
#[derive(Debug)]
pub struct Multiple {
    core: ModuleCore,
    outputs: usize,
}

impl Multiple {
    pub const INPUT: &'static str = "input";

    pub fn new(name: impl Into<String>, outputs: usize) -> Self {
        let outputs = outputs.min(MAX_PORT_COUNT);
        let mut core = ModuleCore::with_ports(name, &[Self::INPUT], &[]);
        for index in 0..outputs {
            core.add_output(Self::output_name(index));
        }
        Self { core, outputs }
    }

    pub fn output_name(index: usize) -> String {
        format!("output{index}")
    }

    pub fn output_count(&self) -> usize {
        self.outputs
    }

    fn broadcast(&mut self) {
        let value = self.core.input(Self::INPUT);
        for index in 0..self.outputs {
            self.core.set_output(&Self::output_name(index), value);
        }
    }
}

impl SynthModule for Multiple {
    fn core(&self) -> &ModuleCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModuleCore {
        &mut self.core
    }

    fn module_type(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn initialize(&mut self, _engine: &mut dyn SignalEngine) {
        self.broadcast();
    }

    fn process(&mut self, _engine: &mut dyn SignalEngine) {
        self.broadcast();
    }

    fn apply_parameter(&mut self, name: &str, _value: &ParamValue) -> Result<()> {
        Err(PatchError::unknown_parameter(self.core.name(), name))
    }
}

impl ModuleKind for Multiple {
    type Config = MultipleConfig;
    const TYPE_NAME: &'static str = "multiple";
    const DESCRIPTION: &'static str = "Copies one input to several outputs";

    fn from_config(name: &str, config: MultipleConfig) -> Self {
        Self::new(name, config.outputs)
    }
}
