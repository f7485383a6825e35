use std::ops::RangeInclusive;

use schemars::JsonSchema;
use serde::Deserialize;
use tracing::warn;

use crate::engine::{Control, MathOp, PrimitiveSpec, SignalEngine, SignalHandle, Source};
use crate::error::{PatchError, Result};
use crate::module::{ModuleCore, SynthModule, clip, expect_number, expect_text};
use crate::modules::ModuleKind;
use crate::types::{ParamValue, PortValue};

const SCALE_RANGE: RangeInclusive<f64> = -1000.0..=1000.0;
const OFFSET_RANGE: RangeInclusive<f64> = -1000.0..=1000.0;

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct CvMathConfig {
    pub operation: MathOp,
    pub scale: f64,
    pub offset: f64,
}

impl Default for CvMathConfig {
    fn default() -> Self {
        Self {
            operation: MathOp::Add,
            scale: 1.0,
            offset: 0.0,
        }
    }
}

fn as_source(value: PortValue) -> Source {
    match value {
        PortValue::Handle(handle) => Source::Signal(handle),
        PortValue::Scalar(v) => Source::Constant(v),
        PortValue::Absent => Source::Constant(0.0),
    }
}

/// `output = (a op b) · scale + offset`.
///
/// Two scalar (or unpatched) operands produce a scalar directly. Once
/// either operand is a signal, the result comes from an arithmetic
/// primitive and `output` carries its handle.
#[derive(Debug)]
pub struct CvMath {
    core: ModuleCore,
    arithmetic: Option<SignalHandle>,
}

impl CvMath {
    pub const INPUT_A: &'static str = "input_a";
    pub const INPUT_B: &'static str = "input_b";
    pub const OUTPUT: &'static str = "output";

    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, CvMathConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: CvMathConfig) -> Self {
        let core = ModuleCore::with_ports(name, &[Self::INPUT_A, Self::INPUT_B], &[Self::OUTPUT]);
        let mut math = Self {
            core,
            arithmetic: None,
        };
        math.set_operation(config.operation);
        math.set_scale(config.scale);
        math.set_offset(config.offset);
        math
    }

    pub fn set_operation(&mut self, op: MathOp) {
        self.core.store("operation", op.name());
    }

    /// Select an operation by name. Unknown names select add and are reported.
    pub fn set_operation_named(&mut self, name: &str) -> Result<()> {
        match MathOp::from_name(name) {
            Some(op) => {
                self.set_operation(op);
                Ok(())
            }
            None => {
                warn!(module = self.core.name(), operation = name, "unknown operation, using add");
                self.set_operation(MathOp::Add);
                Err(PatchError::invalid_value(self.core.name(), "operation", name))
            }
        }
    }

    pub fn set_scale(&mut self, scale: f64) {
        self.core.store("scale", clip(scale, &SCALE_RANGE));
    }

    pub fn set_offset(&mut self, offset: f64) {
        self.core.store("offset", clip(offset, &OFFSET_RANGE));
    }

    pub fn operation(&self) -> MathOp {
        self.core
            .text("operation")
            .and_then(MathOp::from_name)
            .unwrap_or_default()
    }

    pub fn scale(&self) -> f64 {
        self.core.number("scale", 1.0)
    }

    pub fn offset(&self) -> f64 {
        self.core.number("offset", 0.0)
    }

    /// Scalar result for scalar operands; absent operands count as zero.
    pub fn compute(&self, a: f64, b: f64) -> f64 {
        self.operation().apply(a, b) * self.scale() + self.offset()
    }
}

impl SynthModule for CvMath {
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
        self.arithmetic = None;
        self.process(engine);
    }

    fn cleanup(&mut self, _engine: &mut dyn SignalEngine) {
        self.arithmetic = None;
    }

    fn process(&mut self, engine: &mut dyn SignalEngine) {
        let a = self.core.input(Self::INPUT_A);
        let b = self.core.input(Self::INPUT_B);

        if a.as_handle().is_none() && b.as_handle().is_none() {
            let result = self.compute(a.scalar_or(0.0), b.scalar_or(0.0));
            self.core.set_output(Self::OUTPUT, result);
            return;
        }

        let (a, b) = (as_source(a), as_source(b));
        let op = self.operation();
        let (scale, offset) = (self.scale(), self.offset());
        let arithmetic = match self.arithmetic {
            Some(handle) => {
                engine.set(handle, Control::Operands(a, b));
                engine.set(handle, Control::Operation(op));
                engine.set(handle, Control::Scale(scale));
                engine.set(handle, Control::Offset(offset));
                handle
            }
            None => {
                let handle = self.core.track(engine.create(PrimitiveSpec::Arithmetic {
                    op,
                    a,
                    b,
                    scale,
                    offset,
                }));
                self.arithmetic = Some(handle);
                handle
            }
        };
        self.core.set_output(Self::OUTPUT, arithmetic);
    }

    fn apply_parameter(&mut self, name: &str, value: &ParamValue) -> Result<()> {
        let module = self.core.name().to_string();
        match name {
            "operation" => return self.set_operation_named(expect_text(&module, name, value)?),
            "scale" => self.set_scale(expect_number(&module, name, value)?),
            "offset" => self.set_offset(expect_number(&module, name, value)?),
            _ => return Err(PatchError::unknown_parameter(&module, name)),
        }
        Ok(())
    }
}

impl ModuleKind for CvMath {
    type Config = CvMathConfig;
    const TYPE_NAME: &'static str = "cv_math";
    const DESCRIPTION: &'static str = "Arithmetic on two control voltages";

    fn from_config(name: &str, config: CvMathConfig) -> Self {
        Self::with_config(name, config)
    }
}
