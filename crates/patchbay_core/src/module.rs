//! Shared module contract: named ports, parameter storage and lifecycle.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info};

use crate::engine::{SignalEngine, SignalHandle};
use crate::error::{PatchError, Result};
use crate::types::{
    CableTap, InputSlot, OutputBus, OutputPorts, ParamValue, PortTable, PortValue,
};

/// Shared handle to a module. The host keeps these alive; a [`Patch`] only
/// holds weak registrations.
///
/// [`Patch`]: crate::patch::Patch
pub type ModuleRef = Arc<Mutex<dyn SynthModule>>;

/// Clip `value` into `range`. NaN collapses to the lower bound.
pub fn clip(value: f64, range: &RangeInclusive<f64>) -> f64 {
    if value.is_nan() {
        return *range.start();
    }
    value.clamp(*range.start(), *range.end())
}

/// State every module carries: identity, active flag, ports, parameters and
/// the engine primitives it owns.
#[derive(Debug)]
pub struct ModuleCore {
    name: String,
    active: bool,
    inputs: PortTable<InputSlot>,
    outputs: OutputBus,
    parameters: PortTable<ParamValue>,
    primitives: Vec<SignalHandle>,
}

impl ModuleCore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            active: false,
            inputs: PortTable::new(),
            outputs: Arc::new(RwLock::new(PortTable::new())),
            parameters: PortTable::new(),
            primitives: Vec::new(),
        }
    }

    pub fn with_ports(name: impl Into<String>, inputs: &[&str], outputs: &[&str]) -> Self {
        let mut core = Self::new(name);
        for input in inputs {
            core.add_input(*input);
        }
        for output in outputs {
            core.add_output(*output);
        }
        core
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub(crate) fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn add_input(&mut self, name: impl Into<String>) {
        self.inputs.declare(name, InputSlot::default());
    }

    pub fn add_output(&mut self, name: impl Into<String>) {
        self.outputs.write().declare(name, PortValue::Absent);
    }

    pub fn has_input(&self, name: &str) -> bool {
        self.inputs.contains(name)
    }

    pub fn has_output(&self, name: &str) -> bool {
        self.outputs.read().contains(name)
    }

    pub fn input_names(&self) -> Vec<String> {
        self.inputs.names().map(str::to_string).collect()
    }

    pub fn output_names(&self) -> Vec<String> {
        self.outputs.read().names().map(str::to_string).collect()
    }

    /// Current value of an input, following its cable if patched.
    pub fn input(&self, name: &str) -> PortValue {
        self.inputs
            .get(name)
            .map_or(PortValue::Absent, InputSlot::resolve)
    }

    pub fn input_scalar(&self, name: &str) -> Option<f64> {
        self.input(name).as_scalar()
    }

    pub fn input_handle(&self, name: &str) -> Option<SignalHandle> {
        self.input(name).as_handle()
    }

    pub fn is_patched(&self, name: &str) -> bool {
        self.inputs.get(name).is_some_and(InputSlot::is_patched)
    }

    pub(crate) fn attach(&mut self, name: &str, tap: CableTap) -> bool {
        self.inputs.set(name, InputSlot::Cable(tap))
    }

    pub(crate) fn reset_input(&mut self, name: &str) -> bool {
        self.inputs.set(name, InputSlot::default())
    }

    pub fn output(&self, name: &str) -> PortValue {
        self.outputs.read().get(name).copied().unwrap_or_default()
    }

    /// Publish a value on a declared output. Undeclared names are ignored.
    pub fn set_output(&mut self, name: &str, value: impl Into<PortValue>) {
        self.outputs.write().set(name, value.into());
    }

    pub fn clear_outputs(&mut self) {
        for value in self.outputs.write().values_mut() {
            *value = PortValue::Absent;
        }
    }

    pub fn outputs(&self) -> OutputPorts {
        self.outputs.read().clone()
    }

    pub(crate) fn output_bus(&self) -> &OutputBus {
        &self.outputs
    }

    pub fn parameter(&self, name: &str) -> Option<&ParamValue> {
        self.parameters.get(name)
    }

    pub fn number(&self, name: &str, default: f64) -> f64 {
        self.parameters
            .get(name)
            .and_then(ParamValue::as_number)
            .unwrap_or(default)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).and_then(ParamValue::as_text)
    }

    /// Store a parameter without validation. Concrete modules route their
    /// typed setters through here after clipping.
    pub fn store(&mut self, name: &str, value: impl Into<ParamValue>) {
        let value = value.into();
        debug!(module = %self.name, parameter = name, %value, "parameter stored");
        self.parameters.declare(name, value);
    }

    pub fn parameters(&self) -> &PortTable<ParamValue> {
        &self.parameters
    }

    /// Remember a primitive so it is released when the module stops.
    pub fn track(&mut self, handle: SignalHandle) -> SignalHandle {
        self.primitives.push(handle);
        handle
    }

    pub(crate) fn release_primitives(&mut self, engine: &mut dyn SignalEngine) {
        for handle in self.primitives.drain(..) {
            engine.release(handle);
        }
    }
}

/// Serializable snapshot of a module for host-side inspection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleInfo {
    pub name: String,
    pub module_type: String,
    pub is_active: bool,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub parameters: BTreeMap<String, ParamValue>,
}

/// A processing unit with named ports.
///
/// Implementors provide the hooks; the lifecycle methods are provided and
/// should not be overridden. Engine access is passed in on every call that
/// may allocate, update or release primitives.
pub trait SynthModule: Send {
    fn core(&self) -> &ModuleCore;

    fn core_mut(&mut self) -> &mut ModuleCore;

    fn module_type(&self) -> &'static str;

    /// Allocate primitives and publish initial outputs.
    fn initialize(&mut self, engine: &mut dyn SignalEngine);

    /// Forget module-held handles. Tracked primitives are released by `stop`.
    fn cleanup(&mut self, _engine: &mut dyn SignalEngine) {}

    /// Recompute outputs from the current inputs and parameters.
    fn process(&mut self, engine: &mut dyn SignalEngine);

    /// Route a named parameter write to the module's typed setter.
    fn apply_parameter(&mut self, name: &str, value: &ParamValue) -> Result<()>;

    fn name(&self) -> &str {
        self.core().name()
    }

    fn is_active(&self) -> bool {
        self.core().is_active()
    }

    fn start(&mut self, engine: &mut dyn SignalEngine) {
        if self.core().is_active() {
            return;
        }
        self.core_mut().set_active(true);
        self.initialize(engine);
        info!(module = self.name(), kind = self.module_type(), "module started");
    }

    fn stop(&mut self, engine: &mut dyn SignalEngine) {
        if !self.core().is_active() {
            return;
        }
        self.core_mut().set_active(false);
        self.cleanup(engine);
        let core = self.core_mut();
        core.release_primitives(engine);
        core.clear_outputs();
        info!(module = self.name(), "module stopped");
    }

    /// Recompute while active. Inactive modules ignore the call.
    fn recompute(&mut self, engine: &mut dyn SignalEngine) {
        if self.core().is_active() {
            self.process(engine);
        }
    }

    fn get_input(&self, name: &str, default: PortValue) -> PortValue {
        match self.core().input(name) {
            PortValue::Absent => default,
            value => value,
        }
    }

    fn get_parameter(&self, name: &str, default: ParamValue) -> ParamValue {
        self.core().parameter(name).cloned().unwrap_or(default)
    }

    fn set_parameter(&mut self, name: &str, value: ParamValue) {
        self.core_mut().store(name, value);
    }

    fn outputs(&self) -> OutputPorts {
        self.core().outputs()
    }

    fn info(&self) -> ModuleInfo {
        let core = self.core();
        ModuleInfo {
            name: core.name().to_string(),
            module_type: self.module_type().to_string(),
            is_active: core.is_active(),
            inputs: core.input_names(),
            outputs: core.output_names(),
            parameters: core
                .parameters()
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }
}

pub(crate) fn expect_number(module: &str, name: &str, value: &ParamValue) -> Result<f64> {
    value
        .as_number()
        .ok_or_else(|| PatchError::invalid_value(module, name, value))
}

pub(crate) fn expect_text<'a>(module: &str, name: &str, value: &'a ParamValue) -> Result<&'a str> {
    value
        .as_text()
        .ok_or_else(|| PatchError::invalid_value(module, name, value))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GateEdge {
    #[default]
    None,
    Rising,
    Falling,
}

/// Edge detector for scalar gate inputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct GateDetector {
    high: bool,
}

impl GateDetector {
    pub const THRESHOLD: f64 = 0.5;

    pub fn process(&mut self, value: f64) -> GateEdge {
        let high = value > Self::THRESHOLD;
        let edge = match (self.high, high) {
            (false, true) => GateEdge::Rising,
            (true, false) => GateEdge::Falling,
            _ => GateEdge::None,
        };
        self.high = high;
        edge
    }

    pub fn is_high(&self) -> bool {
        self.high
    }
}
