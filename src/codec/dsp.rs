//! Native audio DSP chain
//!
//! `SdrDsp` is the decoder instance owned by the decode engine: noise
//! blanker, LMS noise reduction, LMS auto-notch and a linear resampler from
//! the stream rate to the output device rate.

use std::collections::VecDeque;

use crate::codec::decoder::DecoderConfig;
use crate::error::CodecError;

/// A stateful PCM processor with runtime DSP toggles.
///
/// Implementations are not reentrant: toggles are applied only between
/// `process` calls.
pub trait DspProcessor {
    fn set_nr(&mut self, enabled: bool);
    fn set_nb(&mut self, enabled: bool);
    fn set_an(&mut self, enabled: bool);

    /// Process one frame of PCM at the input rate, returning PCM at the output rate
    fn process(&mut self, input: &[f32]) -> Result<Vec<f32>, CodecError>;
}

/// Builds processors for a session
pub trait DspFactory {
    type Processor: DspProcessor;

    fn create(&mut self, config: &DecoderConfig) -> Result<Self::Processor, CodecError>;
}

/// Factory for [`SdrDsp`]
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeDspFactory;

impl DspFactory for NativeDspFactory {
    type Processor = SdrDsp;

    fn create(&mut self, config: &DecoderConfig) -> Result<SdrDsp, CodecError> {
        SdrDsp::new(config.input_rate, config.output_rate)
    }
}

const NR_TAPS: usize = 32;
const NR_DELAY: usize = 16;
const NR_MU: f32 = 0.05;
const AN_TAPS: usize = 32;
const AN_DELAY: usize = 16;
const AN_MU: f32 = 0.05;
const LMS_LEAKAGE: f32 = 0.9999;

const NB_THRESHOLD: f32 = 6.0;
const NB_HANG_SAMPLES: usize = 8;
const NB_AVG_ALPHA: f32 = 0.002;

/// Native DSP processor
pub struct SdrDsp {
    blanker: NoiseBlanker,
    reducer: LmsFilter,
    notch: LmsFilter,
    resampler: LinearResampler,
    nb_enabled: bool,
    nr_enabled: bool,
    an_enabled: bool,
}

impl SdrDsp {
    pub fn new(input_rate: u32, output_rate: u32) -> Result<Self, CodecError> {
        if input_rate == 0 {
            return Err(CodecError::InvalidSampleRate(input_rate));
        }
        if output_rate == 0 {
            return Err(CodecError::InvalidSampleRate(output_rate));
        }

        Ok(Self {
            blanker: NoiseBlanker::new(),
            reducer: LmsFilter::new(NR_TAPS, NR_DELAY, NR_MU),
            notch: LmsFilter::new(AN_TAPS, AN_DELAY, AN_MU),
            resampler: LinearResampler::new(input_rate, output_rate),
            nb_enabled: false,
            nr_enabled: false,
            an_enabled: false,
        })
    }
}

impl DspProcessor for SdrDsp {
    fn set_nr(&mut self, enabled: bool) {
        if enabled && !self.nr_enabled {
            self.reducer.reset();
        }
        self.nr_enabled = enabled;
    }

    fn set_nb(&mut self, enabled: bool) {
        self.nb_enabled = enabled;
    }

    fn set_an(&mut self, enabled: bool) {
        if enabled && !self.an_enabled {
            self.notch.reset();
        }
        self.an_enabled = enabled;
    }

    fn process(&mut self, input: &[f32]) -> Result<Vec<f32>, CodecError> {
        let mut stage = input.to_vec();

        if self.nb_enabled {
            self.blanker.process(&mut stage);
        }
        if self.nr_enabled {
            for s in stage.iter_mut() {
                *s = self.reducer.step(*s).0;
            }
        }
        if self.an_enabled {
            for s in stage.iter_mut() {
                *s = self.notch.step(*s).1;
            }
        }

        if let Some(pos) = stage.iter().position(|s| !s.is_finite()) {
            return Err(CodecError::DecodingFailed(format!(
                "non-finite sample at {} of {}",
                pos,
                stage.len()
            )));
        }

        let mut out = Vec::with_capacity(self.resampler.output_len_hint(stage.len()));
        self.resampler.process(&stage, &mut out);
        Ok(out)
    }
}

/// Impulse blanker: zeroes samples far above the running mean magnitude
struct NoiseBlanker {
    avg: f32,
    hang: usize,
}

impl NoiseBlanker {
    fn new() -> Self {
        Self { avg: 0.0, hang: 0 }
    }

    fn process(&mut self, buf: &mut [f32]) {
        for s in buf.iter_mut() {
            let mag = s.abs();
            if self.hang > 0 {
                self.hang -= 1;
                *s = 0.0;
                continue;
            }
            if self.avg > 0.0 && mag > NB_THRESHOLD * self.avg {
                self.hang = NB_HANG_SAMPLES;
                *s = 0.0;
                continue;
            }
            self.avg += (mag - self.avg) * NB_AVG_ALPHA;
        }
    }
}

/// Normalised LMS linear predictor.
///
/// The prediction carries the correlated (tonal/voice) part of the signal,
/// the error carries the uncorrelated remainder.
struct LmsFilter {
    weights: Vec<f32>,
    history: VecDeque<f32>,
    delay: usize,
    mu: f32,
}

impl LmsFilter {
    fn new(taps: usize, delay: usize, mu: f32) -> Self {
        Self {
            weights: vec![0.0; taps],
            history: VecDeque::from(vec![0.0; taps + delay]),
            delay,
            mu,
        }
    }

    fn reset(&mut self) {
        self.weights.iter_mut().for_each(|w| *w = 0.0);
        self.history.iter_mut().for_each(|h| *h = 0.0);
    }

    /// Returns `(prediction, error)`
    fn step(&mut self, x: f32) -> (f32, f32) {
        let mut prediction = 0.0f32;
        let mut energy = 1e-6f32;
        for (w, h) in self.weights.iter().zip(self.history.iter().skip(self.delay)) {
            prediction += w * h;
            energy += h * h;
        }
        let error = x - prediction;

        let gain = self.mu * error / energy;
        for (w, h) in self
            .weights
            .iter_mut()
            .zip(self.history.iter().skip(self.delay))
        {
            *w = *w * LMS_LEAKAGE + gain * h;
        }

        self.history.pop_back();
        self.history.push_front(x);
        (prediction, error)
    }
}

/// Linear-interpolating resampler that carries its phase across calls
struct LinearResampler {
    /// Input samples advanced per output sample
    step: f64,
    /// Read position relative to the next input block; -1 is `prev`
    pos: f64,
    prev: f32,
}

impl LinearResampler {
    fn new(input_rate: u32, output_rate: u32) -> Self {
        Self {
            step: input_rate as f64 / output_rate as f64,
            pos: 0.0,
            prev: 0.0,
        }
    }

    fn output_len_hint(&self, input_len: usize) -> usize {
        (input_len as f64 / self.step).ceil() as usize + 1
    }

    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        if input.is_empty() {
            return;
        }
        if (self.step - 1.0).abs() < f64::EPSILON {
            out.extend_from_slice(input);
            return;
        }

        let last = (input.len() - 1) as f64;
        while self.pos < last {
            let idx = self.pos.floor();
            let frac = (self.pos - idx) as f32;
            let i = idx as isize;
            let a = if i < 0 { self.prev } else { input[i as usize] };
            let b = input[(i + 1) as usize];
            out.push(a + (b - a) * frac);
            self.pos += self.step;
        }

        self.pos -= input.len() as f64;
        self.prev = input[input.len() - 1];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(freq: f32, rate: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / rate).sin() * 0.5)
            .collect()
    }

    fn energy(buf: &[f32]) -> f32 {
        buf.iter().map(|s| s * s).sum()
    }

    #[test]
    fn test_dsp_creation() {
        assert!(SdrDsp::new(8000, 12000).is_ok());
        assert!(matches!(
            SdrDsp::new(0, 12000),
            Err(CodecError::InvalidSampleRate(0))
        ));
    }

    #[test]
    fn test_passthrough_same_rate() {
        let mut dsp = SdrDsp::new(8000, 8000).unwrap();
        let input = tone(440.0, 8000.0, 256);
        assert_eq!(dsp.process(&input).unwrap(), input);
    }

    #[test]
    fn test_resample_ratio_across_frames() {
        let mut dsp = SdrDsp::new(8000, 12000).unwrap();
        let mut produced = 0;
        for _ in 0..100 {
            produced += dsp.process(&vec![0.1; 80]).unwrap().len();
        }
        // 8000 input samples -> ~12000 output samples
        assert!((produced as i64 - 12000).abs() <= 2, "produced {}", produced);
    }

    #[test]
    fn test_resampler_interpolates() {
        let mut r = LinearResampler::new(1, 2);
        let mut out = Vec::new();
        r.process(&[0.0, 1.0, 2.0], &mut out);
        assert_eq!(out, vec![0.0, 0.5, 1.0, 1.5]);

        out.clear();
        r.process(&[3.0, 4.0], &mut out);
        assert_eq!(out, vec![2.0, 2.5, 3.0, 3.5]);
    }

    #[test]
    fn test_noise_blanker_removes_impulse() {
        let mut dsp = SdrDsp::new(8000, 8000).unwrap();
        dsp.set_nb(true);
        let mut input = tone(300.0, 8000.0, 2000);
        input[1500] = 1.0 * 40.0;
        let out = dsp.process(&input).unwrap();
        assert_eq!(out[1500], 0.0);
        assert!(out[1400].abs() > 0.0 || out[1401].abs() > 0.0);
    }

    #[test]
    fn test_auto_notch_suppresses_tone() {
        let mut dsp = SdrDsp::new(8000, 8000).unwrap();
        dsp.set_an(true);
        let input = tone(1000.0, 8000.0, 8000);
        let out = dsp.process(&input).unwrap();
        let tail_in = energy(&input[7000..]);
        let tail_out = energy(&out[7000..]);
        assert!(tail_out < tail_in * 0.5, "in {} out {}", tail_in, tail_out);
    }

    #[test]
    fn test_non_finite_is_fault() {
        let mut dsp = SdrDsp::new(8000, 8000).unwrap();
        let result = dsp.process(&[0.0, f32::NAN, 0.0]);
        assert!(matches!(result, Err(CodecError::DecodingFailed(_))));
    }
}
