use std::ops::RangeInclusive;

use schemars::JsonSchema;
use serde::Deserialize;

use crate::engine::SignalEngine;
use crate::error::{PatchError, Result};
use crate::module::{ModuleCore, SynthModule, clip, expect_number};
use crate::modules::ModuleKind;
use crate::types::ParamValue;

const VALUE_RANGE: RangeInclusive<f64> = -10.0..=10.0;

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct CvSourceConfig {
    /// published value (-10 to 10)
    pub value: f64,
}

/// Publishes a fixed scalar on `cv_out`, e.g. a gate or a pitch offset that
/// the host changes by parameter.
#[derive(Debug)]
pub struct CvSource {
    core: ModuleCore,
}

impl CvSource {
    pub const CV_OUT: &'static str = "cv_out";

    pub fn new(name: impl Into<String>, value: f64) -> Self {
        let mut source = Self {
            core: ModuleCore::with_ports(name, &[], &[Self::CV_OUT]),
        };
        source.set_value(value);
        source
    }

    pub fn set_value(&mut self, value: f64) {
        self.core.store("value", clip(value, &VALUE_RANGE));
    }

    pub fn value(&self) -> f64 {
        self.core.number("value", 0.0)
    }
}

impl SynthModule for CvSource {
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
        let value = self.value();
        self.core.set_output(Self::CV_OUT, value);
    }

    fn process(&mut self, _engine: &mut dyn SignalEngine) {
        let value = self.value();
        self.core.set_output(Self::CV_OUT, value);
    }

    fn apply_parameter(&mut self, name: &str, value: &ParamValue) -> Result<()> {
        let module = self.core.name().to_string();
        match name {
            "value" => self.set_value(expect_number(&module, name, value)?),
            _ => return Err(PatchError::unknown_parameter(&module, name)),
        }
        Ok(())
    }
}

impl ModuleKind for CvSource {
    type Config = CvSourceConfig;
    const TYPE_NAME: &'static str = "cv_source";
    const DESCRIPTION: &'static str = "Constant control voltage set by parameter";

    fn from_config(name: &str, config: CvSourceConfig) -> Self {
        Self::new(name, config.value)
    }
}
