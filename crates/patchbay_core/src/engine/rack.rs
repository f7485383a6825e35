use std::collections::BTreeMap;
use std::f64::consts::TAU;

use tracing::trace;

use super::{
    Control, FilterMode, LfoShape, PrimitiveId, PrimitiveSpec, SignalEngine, SignalHandle, Source,
    Transport, Waveform,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnvelopeStage {
    #[default]
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
}

#[derive(Debug, Clone, Copy, Default)]
struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    z1: f64,
    z2: f64,
}

impl Biquad {
    fn design(&mut self, mode: FilterMode, cutoff: f64, q: f64, sample_rate: f64) {
        let freq = cutoff.min(sample_rate * 0.45).max(20.0);
        let omega = TAU * freq / sample_rate;
        let sin = omega.sin();
        let cos = omega.cos();
        let alpha = sin / (2.0 * q.max(0.1));

        let (b0, b1, b2) = match mode {
            FilterMode::Lowpass => ((1.0 - cos) / 2.0, 1.0 - cos, (1.0 - cos) / 2.0),
            FilterMode::Highpass => ((1.0 + cos) / 2.0, -(1.0 + cos), (1.0 + cos) / 2.0),
            FilterMode::Bandpass => (alpha, 0.0, -alpha),
            FilterMode::Bandreject => (1.0, -2.0 * cos, 1.0),
            FilterMode::Allpass => (1.0 - alpha, -2.0 * cos, 1.0 + alpha),
        };
        let a0 = 1.0 + alpha;

        self.b0 = b0 / a0;
        self.b1 = b1 / a0;
        self.b2 = b2 / a0;
        self.a1 = -2.0 * cos / a0;
        self.a2 = (1.0 - alpha) / a0;
    }

    fn process(&mut self, x: f64) -> f64 {
        let y = self.b0 * x + self.z1;
        self.z1 = self.b1 * x - self.a1 * y + self.z2;
        self.z2 = self.b2 * x - self.a2 * y;
        y
    }
}

fn next_random(state: &mut u64) -> f64 {
    *state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
    ((*state >> 33) as f64 / (1u64 << 31) as f64) * 2.0 - 1.0
}

fn periodic_sample(waveform: Waveform, phase: f64, pulse_width: f64) -> f64 {
    match waveform {
        Waveform::Sine => (TAU * phase).sin(),
        Waveform::Saw => 2.0 * phase - 1.0,
        Waveform::Square => {
            if phase < pulse_width {
                1.0
            } else {
                -1.0
            }
        }
        Waveform::Triangle => 1.0 - 4.0 * (phase - 0.5).abs(),
        Waveform::Noise => 0.0,
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Inputs {
    a: f64,
    b: f64,
}

#[derive(Debug)]
struct Primitive {
    spec: PrimitiveSpec,
    value: f64,
    running: bool,
    phase: f64,
    rng: u64,
    held: f64,
    biquad: Biquad,
    designed_for: Option<(FilterMode, f64, f64)>,
    stage: EnvelopeStage,
    elapsed: f64,
}

impl Primitive {
    fn new(spec: PrimitiveSpec, seed: u64) -> Self {
        let value = match &spec {
            PrimitiveSpec::Constant { value } => *value,
            PrimitiveSpec::Smoother { target, .. } => *target,
            _ => 0.0,
        };
        Self {
            spec,
            value,
            running: true,
            phase: 0.0,
            rng: seed,
            held: 0.0,
            biquad: Biquad::default(),
            designed_for: None,
            stage: EnvelopeStage::Idle,
            elapsed: 0.0,
        }
    }

    fn advance(&mut self, inputs: Inputs, sample_rate: f64) {
        let dt = 1.0 / sample_rate;
        match &self.spec {
            PrimitiveSpec::Oscillator {
                waveform,
                frequency,
                amplitude,
                pulse_width,
            } => {
                if !self.running {
                    self.value = 0.0;
                    return;
                }
                let raw = match waveform {
                    Waveform::Noise => next_random(&mut self.rng),
                    periodic => {
                        let out = periodic_sample(*periodic, self.phase, *pulse_width);
                        self.phase = (self.phase + frequency * dt).rem_euclid(1.0);
                        out
                    }
                };
                self.value = raw * amplitude;
            }
            PrimitiveSpec::Lfo {
                shape,
                frequency,
                amplitude,
                offset,
                sharpness,
            } => {
                if !self.running {
                    self.value = *offset;
                    return;
                }
                let p = self.phase;
                let raw = match shape {
                    LfoShape::Sine => (TAU * p).sin(),
                    LfoShape::SawUp => 2.0 * p - 1.0,
                    LfoShape::SawDown => 1.0 - 2.0 * p,
                    LfoShape::Square => {
                        if p < 0.5 {
                            1.0
                        } else {
                            -1.0
                        }
                    }
                    LfoShape::Triangle => 1.0 - 4.0 * (p - 0.5).abs(),
                    LfoShape::Pulse => {
                        if p < (1.0 - sharpness).clamp(0.05, 0.95) {
                            1.0
                        } else {
                            -1.0
                        }
                    }
                    LfoShape::Random => self.held,
                };
                let next = p + frequency * dt;
                if next >= 1.0 && *shape == LfoShape::Random {
                    self.held = next_random(&mut self.rng);
                }
                self.phase = next.rem_euclid(1.0);
                self.value = raw * amplitude + offset;
            }
            PrimitiveSpec::Constant { value } => self.value = *value,
            PrimitiveSpec::Filter {
                mode,
                cutoff,
                q,
                gain,
                ..
            } => {
                let key = (*mode, *cutoff, *q);
                if self.designed_for != Some(key) {
                    self.biquad.design(*mode, *cutoff, *q, sample_rate);
                    self.designed_for = Some(key);
                }
                self.value = self.biquad.process(inputs.a) * gain;
            }
            PrimitiveSpec::Envelope { shape } => {
                let sustain = shape.sustain.clamp(0.0, 1.0);
                if matches!(
                    self.stage,
                    EnvelopeStage::Attack | EnvelopeStage::Decay | EnvelopeStage::Sustain
                ) {
                    self.elapsed += dt;
                }
                match self.stage {
                    EnvelopeStage::Idle => self.value = 0.0,
                    EnvelopeStage::Attack => {
                        if shape.attack < 0.0001 {
                            self.value = 1.0;
                        } else {
                            self.value += dt / shape.attack;
                        }
                        if self.value >= 1.0 {
                            self.value = 1.0;
                            self.stage = EnvelopeStage::Decay;
                        }
                    }
                    EnvelopeStage::Decay => {
                        if shape.decay < 0.0001 || self.value <= sustain {
                            self.value = sustain;
                        } else {
                            let step = (1.0 - sustain) * dt / shape.decay;
                            self.value = (self.value - step).max(sustain);
                        }
                        if self.value <= sustain {
                            self.stage = EnvelopeStage::Sustain;
                        }
                    }
                    EnvelopeStage::Sustain => self.value = sustain,
                    EnvelopeStage::Release => {
                        if shape.release < 0.0001 {
                            self.value = 0.0;
                        } else {
                            self.value -= dt / shape.release;
                        }
                        if self.value <= 0.0 {
                            self.value = 0.0;
                            self.stage = EnvelopeStage::Idle;
                        }
                    }
                }
                if shape.duration > 0.0
                    && self.elapsed >= shape.duration
                    && self.stage != EnvelopeStage::Idle
                    && self.stage != EnvelopeStage::Release
                {
                    self.stage = EnvelopeStage::Release;
                }
            }
            PrimitiveSpec::Smoother { target, rise, fall } => {
                let delta = target - self.value;
                let time = if delta > 0.0 { *rise } else { *fall };
                let max_step = 1.0 / (time.max(0.0001) * sample_rate);
                self.value += delta.clamp(-max_step, max_step);
            }
            PrimitiveSpec::Product { .. } => self.value = inputs.a * inputs.b,
            PrimitiveSpec::Sum { .. } => self.value = inputs.a,
            PrimitiveSpec::Arithmetic {
                op, scale, offset, ..
            } => self.value = op.apply(inputs.a, inputs.b) * scale + offset,
        }
    }
}

/// A small in-process [`SignalEngine`].
///
/// Every primitive produces one value per [`tick`](Rack::tick). Primitives are
/// advanced in allocation order and read the values their inputs hold at that
/// moment, so a primitive allocated before its source sees the source one
/// sample late.
#[derive(Debug)]
pub struct Rack {
    sample_rate: f64,
    next_id: PrimitiveId,
    primitives: BTreeMap<PrimitiveId, Primitive>,
}

impl Default for Rack {
    fn default() -> Self {
        Self::new(48000.0)
    }
}

impl Rack {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            sample_rate,
            next_id: 1,
            primitives: BTreeMap::new(),
        }
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.primitives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primitives.is_empty()
    }

    pub fn contains(&self, handle: SignalHandle) -> bool {
        self.primitives.contains_key(&handle.id())
    }

    /// Current configuration of the primitive behind `handle`.
    pub fn spec(&self, handle: SignalHandle) -> Option<&PrimitiveSpec> {
        self.primitives.get(&handle.id()).map(|p| &p.spec)
    }

    pub fn envelope_stage(&self, handle: SignalHandle) -> Option<EnvelopeStage> {
        self.primitives
            .get(&handle.id())
            .filter(|p| matches!(p.spec, PrimitiveSpec::Envelope { .. }))
            .map(|p| p.stage)
    }

    pub fn is_running(&self, handle: SignalHandle) -> bool {
        self.primitives
            .get(&handle.id())
            .is_some_and(|p| p.running)
    }

    /// Latest output of the primitive, scaled by the handle's gain. Released
    /// or unknown primitives read as silence.
    pub fn value(&self, handle: SignalHandle) -> f64 {
        self.primitives
            .get(&handle.id())
            .map_or(0.0, |p| p.value * handle.gain())
    }

    fn read(&self, source: &Source) -> f64 {
        match source {
            Source::Constant(v) => *v,
            Source::Signal(handle) => self.value(*handle),
        }
    }

    fn gather(&self, spec: &PrimitiveSpec) -> Inputs {
        match spec {
            PrimitiveSpec::Filter { input, .. } => Inputs {
                a: self.read(input),
                b: 0.0,
            },
            PrimitiveSpec::Product { a, b } | PrimitiveSpec::Arithmetic { a, b, .. } => Inputs {
                a: self.read(a),
                b: self.read(b),
            },
            PrimitiveSpec::Sum { inputs } => Inputs {
                a: inputs.iter().map(|h| self.value(*h)).sum(),
                b: 0.0,
            },
            _ => Inputs::default(),
        }
    }

    /// Advance every primitive by one sample.
    pub fn tick(&mut self) {
        profiling::scope!("Rack::tick");
        let ids: Vec<PrimitiveId> = self.primitives.keys().copied().collect();
        for id in ids {
            let inputs = match self.primitives.get(&id) {
                Some(primitive) => self.gather(&primitive.spec),
                None => continue,
            };
            if let Some(primitive) = self.primitives.get_mut(&id) {
                primitive.advance(inputs, self.sample_rate);
            }
        }
    }

    /// Tick `frames` times, collecting the value of `handle` after each tick.
    pub fn render(&mut self, handle: SignalHandle, frames: usize) -> Vec<f64> {
        (0..frames)
            .map(|_| {
                self.tick();
                self.value(handle)
            })
            .collect()
    }
}

impl SignalEngine for Rack {
    fn create(&mut self, spec: PrimitiveSpec) -> SignalHandle {
        let id = self.next_id;
        self.next_id += 1;
        trace!(id, kind = spec.kind(), "allocated primitive");
        let seed = 0x9E37_79B9_7F4A_7C15 ^ id;
        self.primitives.insert(id, Primitive::new(spec, seed));
        SignalHandle::new(id)
    }

    fn set(&mut self, handle: SignalHandle, control: Control) {
        let Some(primitive) = self.primitives.get_mut(&handle.id()) else {
            return;
        };
        match (&mut primitive.spec, control) {
            (
                PrimitiveSpec::Oscillator { frequency, .. } | PrimitiveSpec::Lfo { frequency, .. },
                Control::Frequency(hz),
            ) => *frequency = hz,
            (
                PrimitiveSpec::Oscillator { amplitude, .. } | PrimitiveSpec::Lfo { amplitude, .. },
                Control::Amplitude(amp),
            ) => *amplitude = amp,
            (PrimitiveSpec::Oscillator { pulse_width, .. }, Control::PulseWidth(width)) => {
                *pulse_width = width.clamp(0.01, 0.99)
            }
            (
                PrimitiveSpec::Lfo { offset, .. } | PrimitiveSpec::Arithmetic { offset, .. },
                Control::Offset(v),
            ) => *offset = v,
            (PrimitiveSpec::Lfo { sharpness, .. }, Control::Sharpness(v)) => *sharpness = v,
            (PrimitiveSpec::Lfo { shape, .. }, Control::LfoShape(next)) => *shape = next,
            (PrimitiveSpec::Filter { cutoff, .. }, Control::Cutoff(hz)) => *cutoff = hz,
            (PrimitiveSpec::Filter { q, .. }, Control::Resonance(v)) => *q = v,
            (PrimitiveSpec::Filter { gain, .. }, Control::Gain(v)) => *gain = v,
            (PrimitiveSpec::Filter { mode, .. }, Control::FilterMode(next)) => *mode = next,
            (PrimitiveSpec::Filter { input, .. }, Control::Input(source)) => *input = source,
            (
                PrimitiveSpec::Product { a, b } | PrimitiveSpec::Arithmetic { a, b, .. },
                Control::Operands(x, y),
            ) => {
                *a = x;
                *b = y;
            }
            (PrimitiveSpec::Sum { inputs }, Control::Inputs(list)) => *inputs = list,
            (PrimitiveSpec::Envelope { shape }, Control::Envelope(next)) => *shape = next,
            (PrimitiveSpec::Constant { value }, Control::Value(v)) => *value = v,
            (PrimitiveSpec::Smoother { target, .. }, Control::Target(v)) => *target = v,
            (PrimitiveSpec::Smoother { rise, fall, .. }, Control::RampTimes { rise: r, fall: f }) => {
                *rise = r;
                *fall = f;
            }
            (PrimitiveSpec::Arithmetic { op, .. }, Control::Operation(next)) => *op = next,
            (PrimitiveSpec::Arithmetic { scale, .. }, Control::Scale(v)) => *scale = v,
            (spec, control) => {
                trace!(kind = spec.kind(), ?control, "control ignored");
            }
        }
    }

    fn transport(&mut self, handle: SignalHandle, command: Transport) -> bool {
        let Some(primitive) = self.primitives.get_mut(&handle.id()) else {
            return false;
        };
        match (command, &primitive.spec) {
            (Transport::Play, PrimitiveSpec::Envelope { .. }) => {
                primitive.stage = EnvelopeStage::Attack;
                primitive.elapsed = 0.0;
                true
            }
            (Transport::Stop, PrimitiveSpec::Envelope { .. }) => {
                if primitive.stage != EnvelopeStage::Idle {
                    primitive.stage = EnvelopeStage::Release;
                }
                true
            }
            (Transport::Reset, PrimitiveSpec::Oscillator { waveform, .. })
                if waveform.is_periodic() =>
            {
                primitive.phase = 0.0;
                true
            }
            (Transport::Reset, PrimitiveSpec::Lfo { .. }) => {
                primitive.phase = 0.0;
                true
            }
            (Transport::Reset, _) => false,
            (Transport::Play, _) => {
                primitive.running = true;
                true
            }
            (Transport::Stop, _) => {
                primitive.running = false;
                true
            }
        }
    }

    fn release(&mut self, handle: SignalHandle) {
        if self.primitives.remove(&handle.id()).is_some() {
            trace!(id = handle.id(), "released primitive");
        }
    }
}
