//! Port model: the values that travel between modules, the parameter values
//! modules are configured with, and the ordered port tables that hold them.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::engine::SignalHandle;

/// What a port carries at a given moment.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum PortValue {
    #[default]
    Absent,
    Scalar(f64),
    Handle(SignalHandle),
}

impl PortValue {
    pub fn is_absent(&self) -> bool {
        matches!(self, PortValue::Absent)
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            PortValue::Scalar(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_handle(&self) -> Option<SignalHandle> {
        match self {
            PortValue::Handle(h) => Some(*h),
            _ => None,
        }
    }

    pub fn scalar_or(&self, default: f64) -> f64 {
        self.as_scalar().unwrap_or(default)
    }

    /// Multiply by `factor`. Handles are scaled through their gain tag.
    pub fn scaled(self, factor: f64) -> Self {
        match self {
            PortValue::Absent => PortValue::Absent,
            PortValue::Scalar(v) => PortValue::Scalar(v * factor),
            PortValue::Handle(h) => PortValue::Handle(h.scaled(factor)),
        }
    }

    /// Trigger semantics for sync/reset style inputs: only a non-zero scalar
    /// fires. A connected signal handle never counts as a trigger.
    pub fn is_truthy(&self) -> bool {
        matches!(self, PortValue::Scalar(v) if *v != 0.0)
    }
}

impl From<f64> for PortValue {
    fn from(value: f64) -> Self {
        PortValue::Scalar(value)
    }
}

impl From<SignalHandle> for PortValue {
    fn from(handle: SignalHandle) -> Self {
        PortValue::Handle(handle)
    }
}

impl From<Option<SignalHandle>> for PortValue {
    fn from(handle: Option<SignalHandle>) -> Self {
        handle.map_or(PortValue::Absent, PortValue::Handle)
    }
}

/// Informational tag on a connection. Routing never depends on it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub enum SignalType {
    #[default]
    Audio,
    Cv,
    Gate,
    Trigger,
}

impl SignalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::Audio => "audio",
            SignalType::Cv => "cv",
            SignalType::Gate => "gate",
            SignalType::Trigger => "trigger",
        }
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PortDirection {
    Input,
    Output,
}

impl fmt::Display for PortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortDirection::Input => f.write_str("input"),
            PortDirection::Output => f.write_str("output"),
        }
    }
}

/// A stored parameter: numeric settings or named choices such as a waveform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum ParamValue {
    Number(f64),
    Text(String),
}

impl ParamValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            ParamValue::Number(v) => Some(*v),
            ParamValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ParamValue::Text(s) => Some(s),
            ParamValue::Number(_) => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Number(v) => write!(f, "{v}"),
            ParamValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Number(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        ParamValue::Number(f64::from(value))
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Text(value)
    }
}

/// Name-keyed table that remembers declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct PortTable<T> {
    entries: Vec<(String, T)>,
}

impl<T> Default for PortTable<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> PortTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `name`, or overwrite it in place if already declared.
    pub fn declare(&mut self, name: impl Into<String>, value: T) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut T> {
        self.entries
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Overwrite a declared entry. Returns false for unknown names.
    pub fn set(&mut self, name: &str, value: T) -> bool {
        match self.get_mut(name) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.entries.iter_mut().map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub type OutputPorts = PortTable<PortValue>;

/// A module's published outputs, shared with the cable taps that read them.
pub type OutputBus = Arc<RwLock<OutputPorts>>;

/// Read side of a connection, bound into the target module's input slot.
///
/// The tap holds a weak reference to the source module's output table and
/// resolves on every read, so the target always sees what the source
/// currently publishes.
#[derive(Debug, Clone)]
pub struct CableTap {
    source_module: String,
    source_port: String,
    attenuation: f64,
    bus: Weak<RwLock<OutputPorts>>,
}

impl CableTap {
    pub(crate) fn new(
        source_module: &str,
        source_port: &str,
        attenuation: f64,
        bus: &OutputBus,
    ) -> Self {
        Self {
            source_module: source_module.to_string(),
            source_port: source_port.to_string(),
            attenuation,
            bus: Arc::downgrade(bus),
        }
    }

    pub fn source_module(&self) -> &str {
        &self.source_module
    }

    pub fn source_port(&self) -> &str {
        &self.source_port
    }

    pub fn attenuation(&self) -> f64 {
        self.attenuation
    }

    /// Current value of the source port with attenuation applied. A dropped
    /// source reads as absent.
    pub fn resolve(&self) -> PortValue {
        let Some(bus) = self.bus.upgrade() else {
            return PortValue::Absent;
        };
        let value = bus.read().get(&self.source_port).copied().unwrap_or_default();
        if self.attenuation != 1.0 {
            value.scaled(self.attenuation)
        } else {
            value
        }
    }
}

#[derive(Debug, Clone)]
pub enum InputSlot {
    Value(PortValue),
    Cable(CableTap),
}

impl Default for InputSlot {
    fn default() -> Self {
        InputSlot::Value(PortValue::Absent)
    }
}

impl InputSlot {
    pub fn resolve(&self) -> PortValue {
        match self {
            InputSlot::Value(v) => *v,
            InputSlot::Cable(tap) => tap.resolve(),
        }
    }

    pub fn is_patched(&self) -> bool {
        matches!(self, InputSlot::Cable(_))
    }
}
