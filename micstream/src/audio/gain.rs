use crate::audio::chunk::AudioChunk;

/// Gain applied to captured audio unless configured otherwise
pub const DEFAULT_GAIN: f32 = 5.0;

/// Multiply every sample by `gain`, saturating at the i16 range
///
/// The product is computed in `f32`, rounded, clamped to
/// `[-32768, 32767]` and only then narrowed, so loud input clips instead
/// of wrapping around.
pub fn apply(chunk: AudioChunk, gain: f32) -> AudioChunk {
    chunk.map_samples(|sample| {
        let boosted = (sample as f32 * gain).round();
        boosted.clamp(i16::MIN as f32, i16::MAX as f32) as i16
    })
}

/// Fixed amplification stage
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainStage {
    gain: f32,
}

impl GainStage {
    pub fn new(gain: f32) -> Self {
        Self { gain }
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn apply(&self, chunk: AudioChunk) -> AudioChunk {
        apply(chunk, self.gain)
    }
}

impl Default for GainStage {
    fn default() -> Self {
        Self::new(DEFAULT_GAIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::chunk::CHUNK_SAMPLES;

    fn chunk_of(value: i16) -> AudioChunk {
        AudioChunk::from_samples(vec![value; CHUNK_SAMPLES]).unwrap()
    }

    fn expected(v: i16, gain: f32) -> i16 {
        (v as f32 * gain).round().clamp(-32768.0, 32767.0) as i16
    }

    #[test]
    fn test_positive_saturation() {
        let out = apply(chunk_of(i16::MAX), DEFAULT_GAIN);
        assert!(out.samples().iter().all(|&s| s == i16::MAX));
    }

    #[test]
    fn test_negative_saturation() {
        let out = apply(chunk_of(i16::MIN), DEFAULT_GAIN);
        assert!(out.samples().iter().all(|&s| s == i16::MIN));
    }

    #[test]
    fn test_saturation_threshold() {
        // 6553 * 5 fits, 6554 * 5 does not
        assert_eq!(apply(chunk_of(6553), 5.0).samples()[0], 32765);
        assert_eq!(apply(chunk_of(6554), 5.0).samples()[0], 32767);
        assert_eq!(apply(chunk_of(-6553), 5.0).samples()[0], -32765);
        assert_eq!(apply(chunk_of(-6554), 5.0).samples()[0], -32768);
    }

    #[test]
    fn test_matches_formula_over_full_range() {
        let stage = GainStage::default();
        for v in (i16::MIN..=i16::MAX).step_by(97).chain([i16::MIN, -1, 0, 1, i16::MAX]) {
            let out = stage.apply(chunk_of(v));
            assert_eq!(out.samples()[0], expected(v, 5.0), "sample {}", v);
        }
    }

    #[test]
    fn test_unity_and_fractional_gain() {
        let mut samples: Vec<i16> = (0..CHUNK_SAMPLES as i16).collect();
        samples[0] = -3;
        let chunk = AudioChunk::from_samples(samples.clone()).unwrap();

        assert_eq!(apply(chunk.clone(), 1.0), chunk);

        let halved = apply(chunk, 0.5);
        assert_eq!(halved.samples()[0], -2); // -1.5 rounds away from zero
        assert_eq!(halved.samples()[3], 2); // 1.5 rounds away from zero
        assert_eq!(halved.len(), CHUNK_SAMPLES);
    }

    #[test]
    fn test_silence_stays_silent() {
        assert!(apply(AudioChunk::silence(), DEFAULT_GAIN).is_silent());
    }
}
