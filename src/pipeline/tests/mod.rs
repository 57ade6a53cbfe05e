//! Tests for the stage drivers.

use std::path::PathBuf;

use ndarray::{Array1, Array2};

use crate::audio::AudioClip;
use crate::family::InstrumentFamily;

mod report_tests;

/// Fresh scratch directory under the system temp dir.
pub(crate) fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("multigram-{name}-{}", std::process::id()));
    if dir.exists() {
        std::fs::remove_dir_all(&dir).ok();
    }
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Two-partial tone whose pitch depends on the family and clip index.
pub(crate) fn toy_clip(family: InstrumentFamily, index: usize, samples: usize) -> AudioClip {
    let base = 110.0 * (1.0 + family as usize as f32 * 0.25) * (1.0 + index as f32 * 0.5);
    let data = Array1::from_shape_fn(samples, |i| {
        let t = i as f32 / 16_000.0;
        0.6 * (2.0 * std::f32::consts::PI * base * t).sin()
            + 0.2 * (2.0 * std::f32::consts::PI * 3.0 * base * t).sin()
    });
    AudioClip::new(data, 16_000, family)
}

/// Waveform matrix for a family, one row per clip.
pub(crate) fn waveform_matrix(clips: &[AudioClip]) -> Array2<f32> {
    let len = clips[0].len();
    Array2::from_shape_fn((clips.len(), len), |(r, c)| clips[r].samples()[c])
}
