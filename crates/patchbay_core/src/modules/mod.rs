use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;

use crate::config::{ModuleConstructor, ModuleSchema, ParamsValidator};
use crate::error::{PatchError, Result};
use crate::module::{ModuleRef, SynthModule};

pub mod cv_math;
pub mod cv_source;
pub mod env;
pub mod lfo;
pub mod mixer;
pub mod multiple;
pub mod vca;
pub mod vcf;
pub mod vco;

pub use cv_math::{CvMath, CvMathConfig};
pub use cv_source::{CvSource, CvSourceConfig};
pub use env::{Env, EnvConfig};
pub use lfo::{Lfo, LfoConfig};
pub use mixer::{Mixer, MixerConfig};
pub use multiple::{Multiple, MultipleConfig};
pub use vca::{ControlCurve, Vca, VcaConfig};
pub use vcf::{Vcf, VcfConfig};
pub use vco::{Vco, VcoConfig};

/// Upper bound on the port count of mixers and multiples.
pub const MAX_PORT_COUNT: usize = 64;

/// A module type the registry can build from JSON params.
pub trait ModuleKind: SynthModule + Sized + 'static {
    type Config: DeserializeOwned + JsonSchema + Default;

    const TYPE_NAME: &'static str;
    const DESCRIPTION: &'static str;

    fn from_config(name: &str, config: Self::Config) -> Self;

    fn parse_config(params: &serde_json::Value) -> Result<Self::Config> {
        if params.is_null() {
            return Ok(Self::Config::default());
        }
        serde_json::from_value(params.clone()).map_err(|err| PatchError::InvalidConfig {
            module_type: Self::TYPE_NAME.to_string(),
            reason: err.to_string(),
        })
    }

    fn install_constructor(map: &mut HashMap<String, ModuleConstructor>) {
        map.insert(Self::TYPE_NAME.to_string(), construct::<Self>);
    }

    fn install_params_validator(map: &mut HashMap<String, ParamsValidator>) {
        map.insert(Self::TYPE_NAME.to_string(), |params| {
            Self::parse_config(params).map(|_| ())
        });
    }

    fn get_schema() -> ModuleSchema {
        let sample = Self::from_config(Self::TYPE_NAME, Self::Config::default());
        ModuleSchema {
            name: Self::TYPE_NAME.to_string(),
            description: Self::DESCRIPTION.to_string(),
            inputs: sample.core().input_names(),
            outputs: sample.core().output_names(),
            params_schema: schemars::schema_for!(Self::Config),
        }
    }
}

fn construct<M: ModuleKind>(name: &str, params: &serde_json::Value) -> Result<ModuleRef> {
    let config = M::parse_config(params)?;
    let module: ModuleRef = Arc::new(Mutex::new(M::from_config(name, config)));
    Ok(module)
}

pub fn get_constructors() -> HashMap<String, ModuleConstructor> {
    let mut map = HashMap::new();
    Vco::install_constructor(&mut map);
    Vcf::install_constructor(&mut map);
    Vca::install_constructor(&mut map);
    Env::install_constructor(&mut map);
    Lfo::install_constructor(&mut map);
    Mixer::install_constructor(&mut map);
    Multiple::install_constructor(&mut map);
    CvMath::install_constructor(&mut map);
    CvSource::install_constructor(&mut map);
    map
}

pub fn get_param_validators() -> HashMap<String, ParamsValidator> {
    let mut map = HashMap::new();
    Vco::install_params_validator(&mut map);
    Vcf::install_params_validator(&mut map);
    Vca::install_params_validator(&mut map);
    Env::install_params_validator(&mut map);
    Lfo::install_params_validator(&mut map);
    Mixer::install_params_validator(&mut map);
    Multiple::install_params_validator(&mut map);
    CvMath::install_params_validator(&mut map);
    CvSource::install_params_validator(&mut map);
    map
}

pub fn schemas() -> Vec<ModuleSchema> {
    vec![
        Vco::get_schema(),
        Vcf::get_schema(),
        Vca::get_schema(),
        Env::get_schema(),
        Lfo::get_schema(),
        Mixer::get_schema(),
        Multiple::get_schema(),
        CvMath::get_schema(),
        CvSource::get_schema(),
    ]
}
