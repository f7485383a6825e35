//! Module configuration records: what a host hands the registry to build a
//! module, and what the registry reports about each module type.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{PatchError, Result};
use crate::module::ModuleRef;

/// Builds a module instance named by the first argument from JSON params.
pub type ModuleConstructor = fn(&str, &serde_json::Value) -> Result<ModuleRef>;

/// Checks JSON params against a module type without building anything.
pub type ParamsValidator = fn(&serde_json::Value) -> Result<()>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleState {
    pub id: String,
    pub module_type: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl ModuleState {
    pub fn new(id: &str, module_type: &str, params: serde_json::Value) -> Self {
        Self {
            id: id.to_string(),
            module_type: module_type.to_string(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleSchema {
    pub name: String,
    pub description: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub params_schema: schemars::Schema,
}

/// Build the module described by `state` with the given registry.
pub fn build_module(
    state: &ModuleState,
    constructors: &HashMap<String, ModuleConstructor>,
) -> Result<ModuleRef> {
    let constructor = constructors
        .get(&state.module_type)
        .ok_or_else(|| PatchError::UnknownModuleType(state.module_type.clone()))?;
    let module = constructor(&state.id, &state.params)?;
    info!(id = %state.id, module_type = %state.module_type, "module built");
    Ok(module)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn module_state_params_default_to_null() {
        let state: ModuleState =
            serde_json::from_value(json!({ "id": "osc", "moduleType": "vco" })).unwrap();
        assert_eq!(state.params, serde_json::Value::Null);
    }

    #[test]
    fn unknown_types_are_rejected() {
        let state = ModuleState::new("x", "theremin", json!({}));
        let err = build_module(&state, &HashMap::new()).err().unwrap();
        assert_eq!(err, PatchError::UnknownModuleType("theremin".into()));
    }
}
