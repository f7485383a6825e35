//! Signal routing and parameter computation for a modular synthesizer.
//!
//! Modules ([`modules`]) expose named input and output ports and compute
//! their outputs from inputs and parameters. A [`Patch`] records which
//! output feeds which input. Sample generation is delegated to a
//! [`SignalEngine`](engine::SignalEngine) passed in by the host; [`engine::Rack`]
//! is a small in-process implementation.
//!
//! ```
//! use std::sync::Arc;
//! use parking_lot::Mutex;
//! use patchbay_core::engine::Rack;
//! use patchbay_core::modules::{Vca, Vco};
//! use patchbay_core::{ModuleRef, Patch, SignalType};
//!
//! let mut rack = Rack::default();
//! let vco: ModuleRef = Arc::new(Mutex::new(Vco::new("vco")));
//! let vca: ModuleRef = Arc::new(Mutex::new(Vca::new("vca")));
//!
//! let mut patch = Patch::new();
//! patch.register("vco", &vco);
//! patch.register("vca", &vca);
//! patch.connect("vco", "audio_out", "vca", "audio_in", SignalType::Audio).unwrap();
//!
//! patch.start_all(&mut rack);
//! patch.recompute_all(&mut rack).unwrap();
//! rack.tick();
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod module;
pub mod modules;
pub mod patch;
pub mod types;

pub use error::{PatchError, Result};
pub use module::{ModuleCore, ModuleInfo, ModuleRef, SynthModule};
pub use patch::{Connection, Patch};
pub use types::{ParamValue, PortValue, SignalType};
