//! Sample-rate conversion for ingested clips.
//! Uses rubato's sinc resampler.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::{FeatureError, FeatureResult};

const BLOCK: usize = 4096;

/// Resamples a mono signal from `from_rate` to `to_rate`.
///
/// The output holds `round(len * to_rate / from_rate)` samples. Equal rates
/// return a copy of the input.
///
/// # Errors
/// Returns an error if either rate is zero, the input is empty, or rubato
/// rejects the parameters.
pub fn resample_mono(samples: &[f32], from_rate: u32, to_rate: u32) -> FeatureResult<Vec<f32>> {
    if from_rate == 0 || to_rate == 0 {
        return Err(FeatureError::InvalidParameter(
            "Sample rates must be greater than 0".to_string(),
        ));
    }
    if samples.is_empty() {
        return Err(FeatureError::InvalidParameter(
            "Cannot resample empty audio".to_string(),
        ));
    }
    if from_rate == to_rate {
        return Ok(samples.to_vec());
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let expected = (samples.len() as f64 * ratio).round() as usize;

    let mut resampler = SincFixedIn::<f64>::new(
        ratio,
        2.0,
        SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        },
        samples.len().min(BLOCK),
        1,
    )
    .map_err(|e| FeatureError::Resampling(format!("Failed to create resampler: {e}")))?;

    let input: Vec<f64> = samples.iter().map(|&s| s as f64).collect();
    let chunk_size = resampler.input_frames_max();
    let mut chunk = vec![vec![0.0f64; chunk_size]; 1];
    let delay = resampler.output_delay();
    let mut output: Vec<f64> = Vec::with_capacity(expected + delay + chunk_size);

    // Feed full chunks, zero-pad the tail, then keep flushing until the
    // filter delay has been drained.
    let mut pos = 0;
    while output.len() < expected + delay {
        let end = (pos + chunk_size).min(input.len());
        let taken = end.saturating_sub(pos);
        if taken > 0 {
            chunk[0][..taken].copy_from_slice(&input[pos..end]);
        }
        chunk[0][taken..].fill(0.0);
        pos = end;

        let processed = resampler
            .process(&chunk, None)
            .map_err(|e| FeatureError::Resampling(format!("Resampling failed: {e}")))?;
        output.extend_from_slice(&processed[0]);

        if taken == 0 && processed[0].is_empty() {
            break;
        }
    }

    // Drop the leading filter delay so the output stays aligned with the input.
    let delay = delay.min(output.len());
    let mut aligned: Vec<f32> = output[delay..].iter().map(|&s| s as f32).collect();
    aligned.resize(expected, 0.0);
    Ok(aligned)
}
