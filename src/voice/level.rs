//! Signal level estimation

/// Full-scale magnitude of a signed 16-bit sample
const FULL_SCALE: f64 = 32768.0;

/// Root-mean-square level of PCM16 samples, normalized to [0, 1]
///
/// An empty slice has level 0.0.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
pub fn level(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples
        .iter()
        .map(|&s| {
            let x = f64::from(s) / FULL_SCALE;
            x * x
        })
        .sum();
    let rms = (sum_squares / samples.len() as f64).sqrt();
    rms.min(1.0) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_zero() {
        assert!(level(&[]).abs() < f32::EPSILON);
    }

    #[test]
    fn silence_is_zero() {
        assert!(level(&[0; 1024]).abs() < f32::EPSILON);
    }

    #[test]
    fn constant_magnitude_level() {
        let samples: Vec<i16> = (0..1024)
            .map(|i| if i % 2 == 0 { 16384 } else { -16384 })
            .collect();
        assert!((level(&samples) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn full_scale_is_clamped_to_one() {
        assert!((level(&[i16::MIN; 16]) - 1.0).abs() < f32::EPSILON);
    }
}
