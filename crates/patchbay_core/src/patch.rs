//! The connection graph: registered modules and the cables between them.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::engine::SignalEngine;
use crate::error::{PatchError, Result};
use crate::module::{ModuleRef, SynthModule};
use crate::types::{CableTap, PortDirection, PortValue, SignalType};

/// One cable from a module output to a module input.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub source_module: String,
    pub source_port: String,
    pub target_module: String,
    pub target_port: String,
    pub signal_type: SignalType,
    pub attenuation: f64,
}

impl Connection {
    pub fn new(
        source_module: &str,
        source_port: &str,
        target_module: &str,
        target_port: &str,
        signal_type: SignalType,
        attenuation: f64,
    ) -> Self {
        Self {
            source_module: source_module.to_string(),
            source_port: source_port.to_string(),
            target_module: target_module.to_string(),
            target_port: target_port.to_string(),
            signal_type,
            attenuation: if attenuation.is_nan() {
                1.0
            } else {
                attenuation.clamp(0.0, 1.0)
            },
        }
    }

    fn links(
        &self,
        source_module: &str,
        source_port: &str,
        target_module: &str,
        target_port: &str,
    ) -> bool {
        self.source_module == source_module
            && self.source_port == source_port
            && self.target_module == target_module
            && self.target_port == target_port
    }

    fn touches(&self, module: &str) -> bool {
        self.source_module == module || self.target_module == module
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} -> {}.{} ({})",
            self.source_module, self.source_port, self.target_module, self.target_port, self.signal_type
        )
    }
}

fn describe(source_module: &str, source_port: &str, target_module: &str, target_port: &str) -> String {
    format!("{source_module}.{source_port} -> {target_module}.{target_port}")
}

type ModuleSlot = Weak<Mutex<dyn SynthModule>>;

/// Registered modules plus the ordered list of connections between them.
///
/// Modules are held weakly; a module dropped by the host simply stops
/// resolving. Connections are bound into target inputs as live taps, so a
/// target always reads what the source currently publishes.
#[derive(Default)]
pub struct Patch {
    modules: HashMap<String, ModuleSlot>,
    order: Vec<String>,
    connections: Vec<Connection>,
}

impl fmt::Debug for Patch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Patch")
            .field("modules", &self.order)
            .field("connections", &self.connections)
            .finish()
    }
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `module` under `name`, replacing any module already there.
    pub fn register(&mut self, name: &str, module: &ModuleRef) {
        if self.modules.insert(name.to_string(), Arc::downgrade(module)).is_none() {
            self.order.push(name.to_string());
        }
        info!(module = name, "module registered");
    }

    /// Forget a module. Its connections stay recorded and are reported by
    /// [`validate`](Patch::validate) until removed.
    pub fn unregister(&mut self, name: &str) -> bool {
        let removed = self.modules.remove(name).is_some();
        if removed {
            self.order.retain(|n| n != name);
            info!(module = name, "module unregistered");
        }
        removed
    }

    pub fn module(&self, name: &str) -> Option<ModuleRef> {
        self.modules.get(name).and_then(Weak::upgrade)
    }

    /// Registered names in registration order.
    pub fn module_names(&self) -> &[String] {
        &self.order
    }

    fn require(&self, name: &str) -> Result<ModuleRef> {
        self.module(name)
            .ok_or_else(|| PatchError::ModuleNotFound(name.to_string()))
    }

    pub fn connect(
        &mut self,
        source_module: &str,
        source_port: &str,
        target_module: &str,
        target_port: &str,
        signal_type: SignalType,
    ) -> Result<()> {
        self.connect_attenuated(source_module, source_port, target_module, target_port, signal_type, 1.0)
    }

    /// Record a connection and bind it immediately. Attenuation is clamped
    /// into 0..=1.
    pub fn connect_attenuated(
        &mut self,
        source_module: &str,
        source_port: &str,
        target_module: &str,
        target_port: &str,
        signal_type: SignalType,
        attenuation: f64,
    ) -> Result<()> {
        let source = self.require(source_module)?;
        let target = self.require(target_module)?;

        if !source.lock().core().has_output(source_port) {
            return Err(PatchError::PortNotFound {
                module: source_module.to_string(),
                port: source_port.to_string(),
                direction: PortDirection::Output,
            });
        }
        if !target.lock().core().has_input(target_port) {
            return Err(PatchError::PortNotFound {
                module: target_module.to_string(),
                port: target_port.to_string(),
                direction: PortDirection::Input,
            });
        }
        if self.find_connection(source_module, source_port, target_module, target_port).is_some() {
            return Err(PatchError::DuplicateConnection(describe(
                source_module,
                source_port,
                target_module,
                target_port,
            )));
        }

        let connection = Connection::new(
            source_module,
            source_port,
            target_module,
            target_port,
            signal_type,
            attenuation,
        );
        bind(&connection, &source, &target);
        info!(%connection, attenuation = connection.attenuation, "connected");
        self.connections.push(connection);
        Ok(())
    }

    /// Remove a connection and return its target input to absent.
    pub fn disconnect(
        &mut self,
        source_module: &str,
        source_port: &str,
        target_module: &str,
        target_port: &str,
    ) -> Result<Connection> {
        let index = self
            .connections
            .iter()
            .position(|c| c.links(source_module, source_port, target_module, target_port))
            .ok_or_else(|| {
                PatchError::ConnectionNotFound(describe(
                    source_module,
                    source_port,
                    target_module,
                    target_port,
                ))
            })?;
        let connection = self.connections.remove(index);
        if let Some(target) = self.module(target_module) {
            target.lock().core_mut().reset_input(target_port);
        }
        info!(%connection, "disconnected");
        Ok(connection)
    }

    /// Re-bind every connection in insertion order, resolving modules by
    /// name again. Returns how many connections were bound; the rest name a
    /// module that is gone and are skipped.
    pub fn apply_all(&self) -> usize {
        let mut bound = 0;
        for connection in &self.connections {
            match (
                self.module(&connection.source_module),
                self.module(&connection.target_module),
            ) {
                (Some(source), Some(target)) => {
                    bind(connection, &source, &target);
                    bound += 1;
                }
                _ => warn!(%connection, "skipping connection to missing module"),
            }
        }
        debug!(bound, total = self.connections.len(), "connections applied");
        bound
    }

    pub fn find_connection(
        &self,
        source_module: &str,
        source_port: &str,
        target_module: &str,
        target_port: &str,
    ) -> Option<&Connection> {
        self.connections
            .iter()
            .find(|c| c.links(source_module, source_port, target_module, target_port))
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn connections_for_module(&self, module: &str) -> Vec<&Connection> {
        self.connections.iter().filter(|c| c.touches(module)).collect()
    }

    pub fn input_connections(&self, module: &str, port: &str) -> Vec<&Connection> {
        self.connections
            .iter()
            .filter(|c| c.target_module == module && c.target_port == port)
            .collect()
    }

    pub fn output_connections(&self, module: &str, port: &str) -> Vec<&Connection> {
        self.connections
            .iter()
            .filter(|c| c.source_module == module && c.source_port == port)
            .collect()
    }

    /// Drop every connection, returning all connected inputs to absent.
    pub fn clear_connections(&mut self) {
        for connection in &self.connections {
            if let Some(target) = self.module(&connection.target_module) {
                target.lock().core_mut().reset_input(&connection.target_port);
            }
        }
        let cleared = self.connections.len();
        self.connections.clear();
        info!(cleared, "connections cleared");
    }

    /// Report every connection whose modules or ports no longer exist.
    /// Nothing is modified.
    pub fn validate(&self) -> Vec<PatchError> {
        let mut errors = Vec::new();
        for connection in &self.connections {
            let source = self.module(&connection.source_module);
            let target = self.module(&connection.target_module);

            match &source {
                None => errors.push(PatchError::ModuleNotFound(connection.source_module.clone())),
                Some(source) if !source.lock().core().has_output(&connection.source_port) => {
                    errors.push(PatchError::PortNotFound {
                        module: connection.source_module.clone(),
                        port: connection.source_port.clone(),
                        direction: PortDirection::Output,
                    })
                }
                Some(_) => {}
            }
            match &target {
                None => errors.push(PatchError::ModuleNotFound(connection.target_module.clone())),
                Some(target) if !target.lock().core().has_input(&connection.target_port) => {
                    errors.push(PatchError::PortNotFound {
                        module: connection.target_module.clone(),
                        port: connection.target_port.clone(),
                        direction: PortDirection::Input,
                    })
                }
                Some(_) => {}
            }
        }
        errors
    }

    /// Current value of a module input, with its cable resolved.
    pub fn input_value(&self, module: &str, port: &str) -> Result<PortValue> {
        let module_ref = self.require(module)?;
        let guard = module_ref.lock();
        if !guard.core().has_input(port) {
            return Err(PatchError::PortNotFound {
                module: module.to_string(),
                port: port.to_string(),
                direction: PortDirection::Input,
            });
        }
        Ok(guard.core().input(port))
    }

    /// Registered modules ordered so that every module comes after the
    /// modules feeding it. Ties keep registration order.
    pub fn processing_order(&self) -> Result<Vec<String>> {
        let index: HashMap<&str, usize> = self
            .order
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();
        let mut in_degree = vec![0usize; self.order.len()];
        let mut downstream: Vec<Vec<usize>> = vec![Vec::new(); self.order.len()];

        for connection in &self.connections {
            let (Some(&from), Some(&to)) = (
                index.get(connection.source_module.as_str()),
                index.get(connection.target_module.as_str()),
            ) else {
                continue;
            };
            downstream[from].push(to);
            in_degree[to] += 1;
        }

        let mut ready: BTreeSet<usize> = (0..self.order.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut sorted = Vec::with_capacity(self.order.len());
        while let Some(node) = ready.pop_first() {
            sorted.push(node);
            for &next in &downstream[node] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.insert(next);
                }
            }
        }

        if sorted.len() != self.order.len() {
            let stuck = (0..self.order.len())
                .filter(|&i| in_degree[i] > 0)
                .map(|i| self.order[i].clone())
                .collect();
            return Err(PatchError::CycleDetected(stuck));
        }
        Ok(sorted.into_iter().map(|i| self.order[i].clone()).collect())
    }

    /// Start every registered module in registration order.
    pub fn start_all(&self, engine: &mut dyn SignalEngine) {
        for name in &self.order {
            if let Some(module) = self.module(name) {
                module.lock().start(engine);
            }
        }
    }

    /// Stop every registered module in registration order.
    pub fn stop_all(&self, engine: &mut dyn SignalEngine) {
        for name in &self.order {
            if let Some(module) = self.module(name) {
                module.lock().stop(engine);
            }
        }
    }

    /// Recompute every module in [`processing_order`](Patch::processing_order).
    pub fn recompute_all(&self, engine: &mut dyn SignalEngine) -> Result<()> {
        profiling::scope!("Patch::recompute_all");
        let order = self.processing_order()?;
        for name in &order {
            if let Some(module) = self.module(name) {
                module.lock().recompute(engine);
            }
        }
        debug!(modules = order.len(), "patch recomputed");
        Ok(())
    }
}

fn bind(connection: &Connection, source: &ModuleRef, target: &ModuleRef) {
    let bus = Arc::clone(source.lock().core().output_bus());
    let tap = CableTap::new(
        &connection.source_module,
        &connection.source_port,
        connection.attenuation,
        &bus,
    );
    if !target.lock().core_mut().attach(&connection.target_port, tap) {
        warn!(%connection, "target input missing, connection not bound");
    }
}
