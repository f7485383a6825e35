use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;

use patchbay_core::config::{ModuleState, build_module};
use patchbay_core::engine::{
    Control, EnvelopeStage, PrimitiveSpec, Rack, SignalEngine, SignalHandle, Source, Transport,
    Waveform,
};
use patchbay_core::module::GateEdge;
use patchbay_core::modules::{
    ControlCurve, CvMath, CvSource, Env, MAX_PORT_COUNT, Vca, VcaConfig, Vcf, Vco, VcoConfig,
    get_constructors, get_param_validators, schemas,
};
use patchbay_core::{ModuleRef, ParamValue, Patch, PatchError, PortValue, SignalType, SynthModule};

fn shared<M: SynthModule + 'static>(module: M) -> ModuleRef {
    Arc::new(Mutex::new(module))
}

/// Rack wrapper that counts how often a filter input is re-routed.
#[derive(Default)]
struct RoutingCounter {
    rack: Rack,
    input_routes: usize,
}

impl SignalEngine for RoutingCounter {
    fn create(&mut self, spec: PrimitiveSpec) -> SignalHandle {
        self.rack.create(spec)
    }

    fn set(&mut self, handle: SignalHandle, control: Control) {
        if matches!(control, Control::Input(_)) {
            self.input_routes += 1;
        }
        self.rack.set(handle, control);
    }

    fn transport(&mut self, handle: SignalHandle, command: Transport) -> bool {
        self.rack.transport(handle, command)
    }

    fn release(&mut self, handle: SignalHandle) {
        self.rack.release(handle);
    }
}

fn linear_vca() -> Arc<Mutex<Vca>> {
    Arc::new(Mutex::new(Vca::with_config(
        "vca",
        VcaConfig {
            control_curve: ControlCurve::Linear,
            ..Default::default()
        },
    )))
}

/// An oscillator patched into `vca`, with `control` feeding `port`.
fn amplifier_patch(vca: &Arc<Mutex<Vca>>, control: &ModuleRef, port: &str) -> (Patch, Rack) {
    let mut rack = Rack::default();
    let mut patch = Patch::new();
    let vco = shared(Vco::new("vco"));
    let vca_ref: ModuleRef = vca.clone();
    patch.register("vco", &vco);
    patch.register("control", control);
    patch.register("vca", &vca_ref);
    patch.connect("vco", "audio_out", "vca", "audio_in", SignalType::Audio).unwrap();
    patch.connect("control", "cv_out", "vca", port, SignalType::Cv).unwrap();
    patch.start_all(&mut rack);
    patch.recompute_all(&mut rack).unwrap();
    (patch, rack)
}

#[test]
fn every_module_type_has_a_constructor_validator_and_schema() {
    let constructors = get_constructors();
    let validators = get_param_validators();
    let schemas = schemas();

    assert_eq!(constructors.len(), schemas.len());
    assert_eq!(validators.len(), schemas.len());
    for schema in &schemas {
        assert!(constructors.contains_key(&schema.name), "{}", schema.name);
        assert!(validators.contains_key(&schema.name), "{}", schema.name);
        assert!(!schema.outputs.is_empty(), "{} has no outputs", schema.name);
    }
}

#[test]
fn schemas_list_module_ports() {
    let vco = schemas().into_iter().find(|s| s.name == "vco").unwrap();
    assert!(vco.inputs.contains(&"freq_cv".to_string()));
    assert!(vco.outputs.contains(&"audio_out".to_string()));

    let params = serde_json::to_value(&vco.params_schema).unwrap();
    assert!(params["properties"].get("baseFreq").is_some());
}

#[test]
fn build_module_applies_config() {
    let constructors = get_constructors();
    let state = ModuleState::new("osc", "vco", json!({ "baseFreq": 220.0, "waveform": "saw" }));
    let module = build_module(&state, &constructors).unwrap();

    let module = module.lock();
    assert_eq!(module.name(), "osc");
    assert_eq!(module.module_type(), "vco");
    assert_eq!(module.get_parameter("base_freq", ParamValue::Number(0.0)), ParamValue::Number(220.0));
    assert_eq!(module.get_parameter("waveform", "sine".into()), ParamValue::Text("saw".into()));
}

#[test]
fn validators_reject_bad_params() {
    let validators = get_param_validators();
    let vcf = validators["vcf"];
    assert!(vcf(&json!({ "cutoff": 500.0 })).is_ok());
    assert!(vcf(&serde_json::Value::Null).is_ok());
    assert!(matches!(
        vcf(&json!({ "filterType": "comb" })),
        Err(PatchError::InvalidConfig { .. })
    ));
}

#[test]
fn env_follows_gate_edges() {
    let mut rack = Rack::default();
    let mut patch = Patch::new();
    let gate = shared(CvSource::new("gate", 0.0));
    let env = shared(Env::new("env"));
    patch.register("gate", &gate);
    patch.register("env", &env);
    patch.connect("gate", "cv_out", "env", "gate_in", SignalType::Gate).unwrap();
    patch.start_all(&mut rack);
    patch.recompute_all(&mut rack).unwrap();

    let envelope = env.lock().core().output(Env::CV_OUT).as_handle().unwrap();
    assert_eq!(rack.envelope_stage(envelope), Some(EnvelopeStage::Idle));

    gate.lock().apply_parameter("value", &1.0.into()).unwrap();
    patch.recompute_all(&mut rack).unwrap();
    assert_eq!(rack.envelope_stage(envelope), Some(EnvelopeStage::Attack));

    // holding the gate high does not retrigger
    rack.render(envelope, 4800);
    patch.recompute_all(&mut rack).unwrap();
    assert_ne!(rack.envelope_stage(envelope), Some(EnvelopeStage::Attack));

    gate.lock().apply_parameter("value", &0.0.into()).unwrap();
    patch.recompute_all(&mut rack).unwrap();
    assert_eq!(rack.envelope_stage(envelope), Some(EnvelopeStage::Release));
}

#[test]
fn vca_gate_opens_and_closes() {
    let gate = shared(CvSource::new("gate", 0.0));
    let vca = Arc::new(Mutex::new(Vca::new("vca")));
    let (patch, mut rack) = amplifier_patch(&vca, &gate, Vca::GATE_INPUT);

    assert!(!vca.lock().is_gate_active());
    assert_eq!(vca.lock().current_gain(), 0.0);

    gate.lock().apply_parameter("value", &1.0.into()).unwrap();
    patch.recompute_all(&mut rack).unwrap();
    assert!(vca.lock().is_gate_active());
    assert_eq!(vca.lock().current_gain(), 1.0);

    gate.lock().apply_parameter("value", &0.0.into()).unwrap();
    patch.recompute_all(&mut rack).unwrap();
    assert!(!vca.lock().is_gate_active());
    assert_eq!(vca.lock().current_gain(), 0.0);
}

#[test]
fn vca_gain_stays_within_bounds() {
    for curve in ControlCurve::ALL {
        for gain in [0.0, 0.25, 0.5, 1.0, 1.5, 2.0] {
            for cv in [-10.0, -1.0, 0.0, 1.0, 10.0] {
                let source = shared(CvSource::new("cv", cv));
                let vca = Arc::new(Mutex::new(Vca::new("vca")));
                {
                    let mut vca = vca.lock();
                    vca.set_gain(gain);
                    vca.set_control_curve(*curve);
                }
                let _patch = amplifier_patch(&vca, &source, Vca::GAIN_CV);

                let computed = vca.lock().current_gain();
                assert!(
                    (0.0..=2.0).contains(&computed),
                    "{curve} gain {gain} cv {cv} gave {computed}"
                );
            }
        }
    }
}

#[test]
fn exponential_curve_sits_below_linear_inside_unity() {
    for g in [0.1, 0.3, 0.5, 0.7, 0.9] {
        let linear = ControlCurve::Linear.apply(g);
        let exponential = ControlCurve::Exponential.apply(g);
        let logarithmic = ControlCurve::Logarithmic.apply(g);
        assert!(exponential < linear);
        assert!(logarithmic > linear);
    }
}

#[test]
fn vca_passes_audio_through_a_product() {
    let mut rack = Rack::default();
    let mut patch = Patch::new();
    let vco = shared(Vco::new("vco"));
    let vca = shared(Vca::new("vca"));
    patch.register("vco", &vco);
    patch.register("vca", &vca);
    patch.connect("vco", "audio_out", "vca", "audio_in", SignalType::Audio).unwrap();
    patch.start_all(&mut rack);
    patch.recompute_all(&mut rack).unwrap();

    let out = vca.lock().core().output(Vca::AUDIO_OUT).as_handle().unwrap();
    assert!(matches!(rack.spec(out), Some(PrimitiveSpec::Product { .. })));
    let envelope = vca.lock().core().output(Vca::ENVELOPE_OUT).as_handle().unwrap();
    assert!(matches!(rack.spec(envelope), Some(PrimitiveSpec::Smoother { .. })));
}

#[test]
fn vcf_cutoff_tracks_cv() {
    let mut rack = Rack::default();
    let mut patch = Patch::new();
    let cv = shared(CvSource::new("cv", 0.5));
    let vcf = Arc::new(Mutex::new(Vcf::new("vcf")));
    let vcf_ref: ModuleRef = vcf.clone();
    patch.register("cv", &cv);
    patch.register("vcf", &vcf_ref);
    patch.connect("cv", "cv_out", "vcf", "freq_cv", SignalType::Cv).unwrap();
    patch.start_all(&mut rack);

    assert_eq!(vcf.lock().compute_cutoff(), 2000.0);

    cv.lock().apply_parameter("value", &10.0.into()).unwrap();
    patch.recompute_all(&mut rack).unwrap();
    assert_eq!(vcf.lock().compute_cutoff(), 20000.0);
}

#[test]
fn cv_math_stays_scalar_for_scalar_operands() {
    let mut rack = Rack::default();
    let mut patch = Patch::new();
    let a = shared(CvSource::new("a", 3.0));
    let b = shared(CvSource::new("b", 4.0));
    let math = shared(CvMath::new("math"));
    patch.register("a", &a);
    patch.register("b", &b);
    patch.register("math", &math);
    patch.connect("a", "cv_out", "math", "input_a", SignalType::Cv).unwrap();
    patch.connect("b", "cv_out", "math", "input_b", SignalType::Cv).unwrap();
    math.lock().apply_parameter("operation", &"multiply".into()).unwrap();
    patch.start_all(&mut rack);
    patch.recompute_all(&mut rack).unwrap();

    assert_eq!(math.lock().core().output(CvMath::OUTPUT), PortValue::Scalar(12.0));
}

#[test]
fn cv_math_builds_a_primitive_for_signal_operands() {
    let mut rack = Rack::default();
    let mut patch = Patch::new();
    let vco = shared(Vco::new("vco"));
    let math = shared(CvMath::new("math"));
    patch.register("vco", &vco);
    patch.register("math", &math);
    patch.connect("vco", "audio_out", "math", "input_a", SignalType::Audio).unwrap();
    patch.start_all(&mut rack);
    patch.recompute_all(&mut rack).unwrap();

    let out = math.lock().core().output(CvMath::OUTPUT).as_handle().unwrap();
    assert!(matches!(rack.spec(out), Some(PrimitiveSpec::Arithmetic { .. })));
}

#[test]
fn stopped_modules_release_their_primitives() {
    let mut rack = Rack::default();
    let vco = shared(Vco::new("vco"));
    vco.lock().start(&mut rack);
    assert_eq!(rack.len(), 5);

    vco.lock().stop(&mut rack);
    assert!(rack.is_empty());
    assert!(!vco.lock().is_active());
    assert_eq!(vco.lock().core().output(Vco::AUDIO_OUT), PortValue::Absent);
}

#[test]
fn mixer_config_caps_the_input_count() {
    let constructors = get_constructors();
    let state = ModuleState::new("mix", "mixer", json!({ "inputs": 100_000 }));
    let mixer = build_module(&state, &constructors).unwrap();
    assert_eq!(mixer.lock().core().input_names().len(), MAX_PORT_COUNT);

    let state = ModuleState::new("mult", "multiple", json!({ "outputs": 100_000 }));
    let mult = build_module(&state, &constructors).unwrap();
    assert_eq!(mult.lock().core().output_names().len(), MAX_PORT_COUNT);
}

#[test]
fn vco_sync_resets_the_active_generator() {
    let mut rack = Rack::default();
    let mut patch = Patch::new();
    let sync = shared(CvSource::new("sync", 0.0));
    let vco = shared(Vco::with_config(
        "vco",
        VcoConfig {
            waveform: Waveform::Saw,
            amplitude: 0.5,
            ..Default::default()
        },
    ));
    patch.register("sync", &sync);
    patch.register("vco", &vco);
    patch.connect("sync", "cv_out", "vco", "sync_input", SignalType::Gate).unwrap();
    patch.start_all(&mut rack);
    patch.recompute_all(&mut rack).unwrap();

    let saw = vco.lock().core().output(Vco::AUDIO_OUT).as_handle().unwrap();
    let free_running = rack.render(saw, 10);
    assert!(free_running[9] > -0.5);

    sync.lock().apply_parameter("value", &1.0.into()).unwrap();
    patch.recompute_all(&mut rack).unwrap();
    rack.tick();
    assert_eq!(rack.value(saw), -0.5);
}

#[test]
fn vco_pwm_moves_the_square_pulse_width() {
    let mut rack = Rack::default();
    let mut patch = Patch::new();
    let pwm = shared(CvSource::new("pwm", 0.5));
    let vco = shared(Vco::with_config(
        "vco",
        VcoConfig {
            waveform: Waveform::Square,
            ..Default::default()
        },
    ));
    patch.register("pwm", &pwm);
    patch.register("vco", &vco);
    patch.connect("pwm", "cv_out", "vco", "pwm_input", SignalType::Cv).unwrap();
    patch.start_all(&mut rack);
    patch.recompute_all(&mut rack).unwrap();

    let square = vco.lock().core().output(Vco::AUDIO_OUT).as_handle().unwrap();
    let pulse_width = |rack: &Rack| match rack.spec(square) {
        Some(PrimitiveSpec::Oscillator { pulse_width, .. }) => *pulse_width,
        other => panic!("unexpected primitive {other:?}"),
    };
    assert!((pulse_width(&rack) - 0.75).abs() < 1e-12);

    pwm.lock().apply_parameter("value", &(-2.0).into()).unwrap();
    patch.recompute_all(&mut rack).unwrap();
    assert!((pulse_width(&rack) - 0.05).abs() < 1e-12);
}

#[test]
fn vca_velocity_scales_the_gain() {
    let velocity = shared(CvSource::new("velocity", 0.5));
    let vca = linear_vca();
    let _patch = amplifier_patch(&vca, &velocity, Vca::VELOCITY_CV);
    assert!((vca.lock().current_gain() - 0.5).abs() < 1e-12);
}

#[test]
fn vca_am_input_adds_to_the_gain() {
    let am = shared(CvSource::new("am", 0.5));
    let vca = linear_vca();
    let _patch = amplifier_patch(&vca, &am, Vca::AM_INPUT);
    assert!((vca.lock().current_gain() - 1.5).abs() < 1e-12);
}

#[test]
fn vca_gain_query_leaves_gate_state_alone() {
    let gate = shared(CvSource::new("gate", 0.0));
    let vca = Arc::new(Mutex::new(Vca::new("vca")));
    let (patch, mut rack) = amplifier_patch(&vca, &gate, Vca::GATE_INPUT);

    gate.lock().apply_parameter("value", &1.0.into()).unwrap();
    gate.lock().recompute(&mut rack);
    assert_eq!(vca.lock().compute_gain(), 1.0);
    assert_eq!(vca.lock().compute_gain(), 1.0);
    assert!(!vca.lock().is_gate_active());

    patch.recompute_all(&mut rack).unwrap();
    assert!(vca.lock().is_gate_active());
}

#[test]
fn vca_envelope_follows_gate_edges() {
    let gate = shared(CvSource::new("gate", 0.0));
    let vca = linear_vca();
    let (patch, mut rack) = amplifier_patch(&vca, &gate, Vca::GATE_INPUT);
    assert_eq!(vca.lock().apply_envelope(0.02, 0.4), GateEdge::None);

    gate.lock().apply_parameter("value", &1.0.into()).unwrap();
    patch.recompute_all(&mut rack).unwrap();
    {
        let mut vca = vca.lock();
        assert_eq!(vca.apply_envelope(0.02, 0.4), GateEdge::Rising);
        assert_eq!(vca.get_parameter("gain", ParamValue::Number(-1.0)), ParamValue::Number(1.0));
        assert_eq!(vca.smoothing_time(), 0.02);
        assert_eq!(vca.apply_envelope(0.02, 0.4), GateEdge::None);
    }

    gate.lock().apply_parameter("value", &0.0.into()).unwrap();
    patch.recompute_all(&mut rack).unwrap();
    let mut vca = vca.lock();
    assert_eq!(vca.apply_envelope(0.02, 0.4), GateEdge::Falling);
    assert_eq!(vca.get_parameter("gain", ParamValue::Number(-1.0)), ParamValue::Number(0.0));
    assert_eq!(vca.smoothing_time(), 0.4);
}

#[test]
fn vcf_routes_audio_only_when_the_source_changes() {
    let mut engine = RoutingCounter::default();
    let mut patch = Patch::new();
    let vco = shared(Vco::new("vco"));
    let vcf = shared(Vcf::new("vcf"));
    patch.register("vco", &vco);
    patch.register("vcf", &vcf);
    patch.connect("vco", "audio_out", "vcf", "audio_in", SignalType::Audio).unwrap();
    patch.start_all(&mut engine);
    patch.recompute_all(&mut engine).unwrap();

    let routed = engine.input_routes;
    for _ in 0..3 {
        patch.recompute_all(&mut engine).unwrap();
    }
    assert_eq!(engine.input_routes, routed);

    patch.disconnect("vco", "audio_out", "vcf", "audio_in").unwrap();
    patch.recompute_all(&mut engine).unwrap();
    assert_eq!(engine.input_routes, routed + 1);

    let filter = vcf.lock().core().output(Vcf::AUDIO_OUT).as_handle().unwrap();
    let input = match engine.rack.spec(filter) {
        Some(PrimitiveSpec::Filter { input: Source::Signal(input), .. }) => *input,
        other => panic!("unexpected primitive {other:?}"),
    };
    assert!(matches!(
        engine.rack.spec(input),
        Some(PrimitiveSpec::Constant { value }) if *value == 0.0
    ));
}

#[test]
fn env_ignores_a_signal_on_the_gate() {
    let mut rack = Rack::default();
    let mut patch = Patch::new();
    let vco = shared(Vco::new("vco"));
    let env = Arc::new(Mutex::new(Env::new("env")));
    let env_ref: ModuleRef = env.clone();
    patch.register("vco", &vco);
    patch.register("env", &env_ref);
    patch.connect("vco", "audio_out", "env", "gate_in", SignalType::Gate).unwrap();
    patch.start_all(&mut rack);
    patch.recompute_all(&mut rack).unwrap();
    rack.render(env.lock().core().output(Env::CV_OUT).as_handle().unwrap(), 64);
    patch.recompute_all(&mut rack).unwrap();

    let envelope = env.lock().core().output(Env::CV_OUT).as_handle().unwrap();
    assert_eq!(rack.envelope_stage(envelope), Some(EnvelopeStage::Idle));
    assert!(!env.lock().is_gate_high());
}
