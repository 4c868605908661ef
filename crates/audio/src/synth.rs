// Click synthesis: oscillator -> optional biquad -> two-segment envelope -> master

use std::f32::consts::PI;
use std::time::Duration;

use project::model::{FilterSettings, FilterType, SoundParameters, Waveform};

use crate::MasterVolume;

/// Rate every click is rendered at; the output mixer resamples as needed
pub const SAMPLE_RATE: u32 = 44_100;

/// Naive (non band-limited) oscillator, phase in [0, 1)
pub struct Oscillator {
    waveform: Waveform,
    phase: f32,
    phase_increment: f32,
}

impl Oscillator {
    pub fn new(waveform: Waveform, frequency: f32, sample_rate: u32) -> Self {
        Self {
            waveform,
            phase: 0.0,
            phase_increment: frequency / sample_rate as f32,
        }
    }

    pub fn next_sample(&mut self) -> f32 {
        let sample = match self.waveform {
            Waveform::Sine => (self.phase * 2.0 * PI).sin(),
            Waveform::Square => {
                if self.phase < 0.5 { 1.0 } else { -1.0 }
            }
            Waveform::Sawtooth => (self.phase * 2.0) - 1.0,
            Waveform::Triangle => {
                if self.phase < 0.5 {
                    (self.phase * 4.0) - 1.0
                } else {
                    3.0 - (self.phase * 4.0)
                }
            }
        };

        self.phase += self.phase_increment;
        if self.phase >= 1.0 {
            self.phase -= self.phase.floor();
        }

        sample
    }
}

/// Linear rise to `peak` over the attack, linear fall to zero over the decay.
/// No sustain stage.
#[derive(Debug, Clone, Copy)]
pub struct Envelope {
    peak: f32,
    attack_samples: u64,
    decay_samples: u64,
}

impl Envelope {
    pub fn new(peak: f32, attack_secs: f32, decay_secs: f32, sample_rate: u32) -> Self {
        let to_samples = |secs: f32| ((secs as f64 * sample_rate as f64).round() as u64).max(1);
        Self {
            peak,
            attack_samples: to_samples(attack_secs),
            decay_samples: to_samples(decay_secs),
        }
    }

    pub fn total_samples(&self) -> u64 {
        self.attack_samples + self.decay_samples
    }

    pub fn level_at(&self, sample: u64) -> f32 {
        if sample < self.attack_samples {
            self.peak * sample as f32 / self.attack_samples as f32
        } else if sample < self.total_samples() {
            let into_decay = sample - self.attack_samples;
            self.peak * (1.0 - into_decay as f32 / self.decay_samples as f32)
        } else {
            0.0
        }
    }
}

/// RBJ cookbook biquad, Direct Form II transposed
pub struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    z1: f64,
    z2: f64,
}

impl Biquad {
    /// `None` when the filter is bypassed
    pub fn new(settings: &FilterSettings, sample_rate: u32) -> Option<Self> {
        let fs = sample_rate as f64;
        // Keep the cutoff under Nyquist so the coefficients stay stable
        let f0 = (settings.cutoff_frequency as f64).clamp(1.0, fs * 0.49);
        let q = (settings.q as f64).max(0.01);

        let w0 = 2.0 * std::f64::consts::PI * f0 / fs;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * q);

        let (b0, b1, b2) = match settings.kind {
            FilterType::None => return None,
            FilterType::Lowpass => ((1.0 - cos_w0) / 2.0, 1.0 - cos_w0, (1.0 - cos_w0) / 2.0),
            FilterType::Highpass => ((1.0 + cos_w0) / 2.0, -(1.0 + cos_w0), (1.0 + cos_w0) / 2.0),
            FilterType::Bandpass => (alpha, 0.0, -alpha),
        };
        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cos_w0;
        let a2 = 1.0 - alpha;

        Some(Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
            z1: 0.0,
            z2: 0.0,
        })
    }

    pub fn process(&mut self, input: f32) -> f32 {
        let x = input as f64;
        let y = self.b0 * x + self.z1;
        self.z1 = self.b1 * x - self.a1 * y + self.z2;
        self.z2 = self.b2 * x - self.a2 * y;
        y as f32
    }
}

/// One-shot mono click voice. Ends by itself after attack + decay.
pub struct Click {
    oscillator: Oscillator,
    filter: Option<Biquad>,
    envelope: Envelope,
    master: MasterVolume,
    sample_rate: u32,
    duration: Duration,
    position: u64,
}

impl Click {
    pub fn new(params: &SoundParameters, sample_rate: u32, master: MasterVolume) -> Self {
        Self {
            oscillator: Oscillator::new(params.waveform, params.frequency, sample_rate),
            filter: Biquad::new(&params.filter, sample_rate),
            envelope: Envelope::new(params.gain, params.attack, params.decay, sample_rate),
            master,
            sample_rate,
            duration: params.duration(),
            position: 0,
        }
    }

    pub fn total_samples(&self) -> u64 {
        self.envelope.total_samples()
    }

    pub fn is_filtered(&self) -> bool {
        self.filter.is_some()
    }
}

impl Iterator for Click {
    type Item = f32;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.envelope.total_samples() {
            return None;
        }

        let mut sample = self.oscillator.next_sample();
        if let Some(filter) = self.filter.as_mut() {
            sample = filter.process(sample);
        }
        sample *= self.envelope.level_at(self.position) * self.master.get();

        self.position += 1;
        Some(sample)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.envelope.total_samples().saturating_sub(self.position) as usize;
        (remaining, Some(remaining))
    }
}

impl rodio::Source for Click {
    fn current_frame_len(&self) -> Option<usize> {
        Some(self.envelope.total_samples().saturating_sub(self.position) as usize)
    }

    fn channels(&self) -> u16 {
        1
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        Some(self.duration)
    }
}
