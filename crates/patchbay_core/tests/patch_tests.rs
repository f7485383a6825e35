use std::sync::Arc;

use parking_lot::Mutex;

use patchbay_core::engine::{PrimitiveSpec, Rack};
use patchbay_core::modules::{CvSource, Mixer, Multiple, Vca, VcaConfig, Vco, VcoConfig};
use patchbay_core::{ModuleRef, Patch, PatchError, PortValue, SignalType, SynthModule};

fn shared<M: SynthModule + 'static>(module: M) -> ModuleRef {
    Arc::new(Mutex::new(module))
}

fn output(module: &ModuleRef, port: &str) -> PortValue {
    module.lock().core().output(port)
}

fn input(module: &ModuleRef, port: &str) -> PortValue {
    module.lock().get_input(port, PortValue::Absent)
}

#[test]
fn vca_reads_the_oscillator_output() {
    let mut rack = Rack::default();
    let mut patch = Patch::new();
    let vco = shared(Vco::with_config(
        "vco",
        VcoConfig {
            base_freq: 440.0,
            ..Default::default()
        },
    ));
    let vca = shared(Vca::with_config(
        "vca",
        VcaConfig {
            gain: 0.5,
            ..Default::default()
        },
    ));
    patch.register("vco", &vco);
    patch.register("vca", &vca);
    patch.start_all(&mut rack);

    patch
        .connect("vco", "audio_out", "vca", "audio_in", SignalType::Audio)
        .unwrap();
    patch.apply_all();

    let source = output(&vco, Vco::AUDIO_OUT);
    assert!(source.as_handle().is_some());
    assert_eq!(input(&vca, Vca::AUDIO_IN), source);
}

#[test]
fn connecting_an_unknown_module_adds_nothing() {
    let mut patch = Patch::new();
    let vca = shared(Vca::new("vca"));
    patch.register("vca", &vca);

    let result = patch.connect("ghost", "audio_out", "vca", "audio_in", SignalType::Audio);
    assert_eq!(result, Err(PatchError::ModuleNotFound("ghost".into())));
    assert!(patch.connections().is_empty());
}

#[test]
fn inputs_follow_outputs_without_reapplying() {
    let mut rack = Rack::default();
    let mut patch = Patch::new();
    let vco = shared(Vco::new("vco"));
    let mult = shared(Multiple::new("mult", 2));
    patch.register("vco", &vco);
    patch.register("mult", &mult);
    patch
        .connect("vco", "audio_out", "mult", "input", SignalType::Audio)
        .unwrap();

    assert_eq!(input(&mult, Multiple::INPUT), PortValue::Absent);

    patch.start_all(&mut rack);
    let first = output(&vco, Vco::AUDIO_OUT);
    assert_eq!(input(&mult, Multiple::INPUT), first);

    if let Some(module) = patch.module("vco") {
        module
            .lock()
            .apply_parameter("waveform", &"square".into())
            .unwrap();
    }
    patch.recompute_all(&mut rack).unwrap();

    let switched = output(&vco, Vco::AUDIO_OUT);
    assert_ne!(switched, first);
    assert_eq!(input(&mult, Multiple::INPUT), switched);
    assert_eq!(output(&mult, "output1"), switched);
}

#[test]
fn attenuated_handles_keep_their_primitive() {
    let mut rack = Rack::default();
    let mut patch = Patch::new();
    let vco = shared(Vco::new("vco"));
    let vca = shared(Vca::new("vca"));
    patch.register("vco", &vco);
    patch.register("vca", &vca);
    patch.start_all(&mut rack);
    patch
        .connect_attenuated("vco", "audio_out", "vca", "audio_in", SignalType::Audio, 0.5)
        .unwrap();

    let source = output(&vco, Vco::AUDIO_OUT).as_handle().unwrap();
    let seen = input(&vca, Vca::AUDIO_IN).as_handle().unwrap();
    assert!(seen.same_primitive(&source));
    assert_eq!(seen.gain(), 0.5);
}

#[test]
fn disconnect_then_connect_round_trips() {
    let mut rack = Rack::default();
    let mut patch = Patch::new();
    let cv = shared(CvSource::new("cv", 1.5));
    let vco = shared(Vco::new("vco"));
    patch.register("cv", &cv);
    patch.register("vco", &vco);
    patch.start_all(&mut rack);

    patch.connect("cv", "cv_out", "vco", "freq_cv", SignalType::Cv).unwrap();
    let connected = input(&vco, Vco::FREQ_CV);

    patch.disconnect("cv", "cv_out", "vco", "freq_cv").unwrap();
    assert_eq!(input(&vco, Vco::FREQ_CV), PortValue::Absent);

    patch.connect("cv", "cv_out", "vco", "freq_cv", SignalType::Cv).unwrap();
    assert_eq!(input(&vco, Vco::FREQ_CV), connected);
    assert_eq!(connected, PortValue::Scalar(1.5));
}

#[test]
fn extreme_pitch_cv_clamps_frequency() {
    let mut rack = Rack::default();
    let mut patch = Patch::new();
    let cv = shared(CvSource::new("cv", 10.0));
    let vco = Arc::new(Mutex::new(Vco::new("vco")));
    let vco_ref: ModuleRef = vco.clone();
    patch.register("cv", &cv);
    patch.register("vco", &vco_ref);
    patch.connect("cv", "cv_out", "vco", "freq_cv", SignalType::Cv).unwrap();
    patch.start_all(&mut rack);
    patch.recompute_all(&mut rack).unwrap();

    assert_eq!(vco.lock().current_frequency(), 20000.0);

    cv.lock()
        .apply_parameter("value", &(-10.0).into())
        .unwrap();
    patch.recompute_all(&mut rack).unwrap();
    assert_eq!(vco.lock().current_frequency(), 20.0);
}

#[test]
fn frequency_is_monotonic_in_octave_and_fine_tune() {
    let mut last = 0.0;
    for octave in -2..=2 {
        for cents in [-100.0, -50.0, 0.0, 50.0, 100.0] {
            let mut vco = Vco::new("vco");
            vco.set_frequency(200.0);
            vco.set_octave(octave);
            vco.set_fine_tune(cents);
            let freq = vco.compute_frequency();
            assert!(freq >= last, "{freq} < {last} at octave {octave}, {cents} cents");
            assert!((20.0..=20000.0).contains(&freq));
            last = freq;
        }
    }
}

#[test]
fn fm_input_offsets_frequency_by_depth() {
    let mut rack = Rack::default();
    let mut patch = Patch::new();
    let fm = shared(CvSource::new("fm", 0.5));
    let vco = Arc::new(Mutex::new(Vco::new("vco")));
    let vco_ref: ModuleRef = vco.clone();
    patch.register("fm", &fm);
    patch.register("vco", &vco_ref);
    patch.connect("fm", "cv_out", "vco", "fm_input", SignalType::Cv).unwrap();
    patch.start_all(&mut rack);
    patch.recompute_all(&mut rack).unwrap();

    assert!((vco.lock().current_frequency() - 490.0).abs() < 1e-9);
}

#[test]
fn mixer_at_unity_outputs_the_plain_sum() {
    let mut rack = Rack::default();
    let mut patch = Patch::new();
    let a = shared(Vco::with_config(
        "a",
        VcoConfig {
            base_freq: 220.0,
            ..Default::default()
        },
    ));
    let b = shared(Vco::with_config(
        "b",
        VcoConfig {
            base_freq: 330.0,
            amplitude: 0.3,
            ..Default::default()
        },
    ));
    let mixer = Arc::new(Mutex::new(Mixer::new("mix", 4)));
    {
        let mut mixer = mixer.lock();
        mixer.set_input_level(0, 1.0).unwrap();
        mixer.set_input_level(1, 1.0).unwrap();
        mixer.set_master_level(1.0);
    }
    let mixer_ref: ModuleRef = mixer.clone();
    patch.register("a", &a);
    patch.register("b", &b);
    patch.register("mix", &mixer_ref);
    patch.connect("a", "audio_out", "mix", "input0", SignalType::Audio).unwrap();
    patch.connect("b", "audio_out", "mix", "input1", SignalType::Audio).unwrap();
    patch.start_all(&mut rack);
    patch.recompute_all(&mut rack).unwrap();

    let out = output(&mixer_ref, Mixer::OUTPUT).as_handle().unwrap();
    assert_eq!(out.gain(), 1.0);
    let a_out = output(&a, Vco::AUDIO_OUT).as_handle().unwrap();
    let b_out = output(&b, Vco::AUDIO_OUT).as_handle().unwrap();
    for _ in 0..64 {
        rack.tick();
        let expected = rack.value(a_out) + rack.value(b_out);
        assert!((rack.value(out) - expected).abs() < 1e-12);
    }
}

#[test]
fn mixer_skips_silent_levels_and_scalars() {
    let mut rack = Rack::default();
    let mut patch = Patch::new();
    let vco = shared(Vco::new("vco"));
    let cv = shared(CvSource::new("cv", 1.0));
    let mixer = Arc::new(Mutex::new(Mixer::new("mix", 2)));
    mixer.lock().set_input_level(0, 0.0).unwrap();
    let mixer_ref: ModuleRef = mixer.clone();
    patch.register("vco", &vco);
    patch.register("cv", &cv);
    patch.register("mix", &mixer_ref);
    patch.connect("vco", "audio_out", "mix", "input0", SignalType::Audio).unwrap();
    patch.connect("cv", "cv_out", "mix", "input1", SignalType::Cv).unwrap();
    patch.start_all(&mut rack);
    patch.recompute_all(&mut rack).unwrap();

    let out = output(&mixer_ref, Mixer::OUTPUT).as_handle().unwrap();
    assert!(matches!(
        rack.spec(out),
        Some(PrimitiveSpec::Constant { value }) if *value == 0.0
    ));
}

#[test]
fn validate_reports_unregistered_modules() {
    let mut patch = Patch::new();
    let vco = shared(Vco::new("vco"));
    let vca = shared(Vca::new("vca"));
    patch.register("vco", &vco);
    patch.register("vca", &vca);
    patch.connect("vco", "audio_out", "vca", "audio_in", SignalType::Audio).unwrap();

    assert!(patch.unregister("vco"));
    assert_eq!(patch.validate(), vec![PatchError::ModuleNotFound("vco".into())]);
    assert_eq!(patch.apply_all(), 0);
    assert_eq!(patch.connections().len(), 1);
}

#[test]
fn recompute_all_rejects_cycles() {
    let mut rack = Rack::default();
    let mut patch = Patch::new();
    let a = shared(Multiple::new("a", 1));
    let b = shared(Multiple::new("b", 1));
    patch.register("a", &a);
    patch.register("b", &b);
    patch.connect("a", "output0", "b", "input", SignalType::Cv).unwrap();
    patch.connect("b", "output0", "a", "input", SignalType::Cv).unwrap();

    assert!(matches!(
        patch.recompute_all(&mut rack),
        Err(PatchError::CycleDetected(_))
    ));
}
