//! Clip ingestion: WAV decoding, length fitting and per-family quota fill.
//!
//! Downloading the source corpus is out of scope; clips are read from a local
//! tree laid out as `<root>/<family>/*.wav`, where `<family>` is the family
//! name or its raw dataset id.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2};
use tracing::{debug, info, warn};

use crate::config::{DatasetLayout, PipelineConfig};
use crate::family::{InstrumentFamily, LabelMap};
use crate::pipeline::{ErrorHandling, StageReport};
use crate::resampling::resample_mono;
use crate::storage::{read_array, write_array};
use crate::{FeatureError, FeatureResult};

/// A mono waveform belonging to one instrument family.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    samples: Array1<f32>,
    sample_rate: u32,
    family: InstrumentFamily,
}

impl AudioClip {
    /// Wraps an existing waveform.
    pub fn new(samples: Array1<f32>, sample_rate: u32, family: InstrumentFamily) -> Self {
        Self {
            samples,
            sample_rate,
            family,
        }
    }

    /// Decodes a WAV file, mixes it down to mono and resamples it to `target_rate`.
    ///
    /// Integer PCM is scaled to `[-1, 1)` by its bit depth.
    pub fn from_wav<P: AsRef<Path>>(
        path: P,
        family: InstrumentFamily,
        target_rate: u32,
    ) -> FeatureResult<Self> {
        let path = path.as_ref();
        let mut reader = hound::WavReader::open(path)?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
            hound::SampleFormat::Int => {
                let scale = 1.0 / (1u64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 * scale))
                    .collect::<Result<_, _>>()?
            }
        };

        let mono: Vec<f32> = if channels == 1 {
            interleaved
        } else {
            interleaved
                .chunks_exact(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                .collect()
        };

        if mono.is_empty() {
            return Err(FeatureError::InvalidParameter(format!(
                "{} contains no samples",
                path.display()
            )));
        }

        let samples = if spec.sample_rate != target_rate {
            debug!(
                path = %path.display(),
                from = spec.sample_rate,
                to = target_rate,
                "resampling clip"
            );
            resample_mono(&mono, spec.sample_rate, target_rate)?
        } else {
            mono
        };

        Ok(Self::new(Array1::from_vec(samples), target_rate, family))
    }

    /// Waveform samples.
    pub fn samples(&self) -> &Array1<f32> {
        &self.samples
    }

    /// Sample rate in Hz.
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Owning family.
    pub const fn family(&self) -> InstrumentFamily {
        self.family
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns true when the clip holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Zero-pads or truncates a waveform to exactly `length` samples.
pub fn fit_length(samples: &Array1<f32>, length: usize) -> Array1<f32> {
    let mut out = Array1::zeros(length);
    let n = samples.len().min(length);
    out.slice_mut(ndarray::s![..n])
        .assign(&samples.slice(ndarray::s![..n]));
    out
}

/// Brings a family's items to exactly `quota` entries.
///
/// Extra items are dropped. A short family is back-filled by whole-list
/// repetition followed by a prefix, so the result is no longer a set of
/// independent samples; this is logged. A family with no items cannot be
/// back-filled.
pub fn fill_quota<T: Clone>(
    items: Vec<T>,
    quota: usize,
    family: InstrumentFamily,
) -> FeatureResult<Vec<T>> {
    let available = items.len();
    if available == 0 {
        return Err(FeatureError::QuotaShortfall {
            family: family.to_string(),
            available,
            quota,
        });
    }
    if available >= quota {
        let mut items = items;
        items.truncate(quota);
        return Ok(items);
    }

    warn!(
        %family,
        available,
        quota,
        "quota shortfall, repeating existing clips"
    );
    let mut filled = Vec::with_capacity(quota);
    for _ in 0..quota / available {
        filled.extend(items.iter().cloned());
    }
    filled.extend(items.iter().take(quota % available).cloned());
    Ok(filled)
}

/// WAV files directly under `dir`, sorted by file name.
pub fn list_wav_files(dir: &Path) -> FeatureResult<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| FeatureError::io(dir, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| FeatureError::io(dir, e))?.path();
        let is_wav = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"));
        if path.is_file() && is_wav {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Family directories under `root`.
///
/// A directory may be named after the family (`guitar`) or after its raw
/// dataset id (`3`), translated through `label_map`. Directories that name no
/// mapped family, such as the excluded `synth_lead` id, are skipped. When a
/// family appears under both forms the first in file-name order wins.
pub fn family_directories(
    root: &Path,
    label_map: &LabelMap,
) -> FeatureResult<BTreeMap<InstrumentFamily, PathBuf>> {
    let entries = std::fs::read_dir(root).map_err(|e| FeatureError::io(root, e))?;
    let mut dirs = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| FeatureError::io(root, e))?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();

    let mut found = BTreeMap::new();
    for dir in dirs {
        let Some(name) = dir.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let family = name
            .parse::<InstrumentFamily>()
            .ok()
            .filter(|&f| label_map.index_of(f).is_some())
            .or_else(|| name.parse::<u8>().ok().and_then(|id| label_map.from_raw(id)));
        match family {
            Some(family) if found.contains_key(&family) => {
                warn!(%family, dir = %dir.display(), "duplicate family directory, ignoring");
            }
            Some(family) => {
                found.insert(family, dir);
            }
            None => debug!(dir = %dir.display(), "directory names no mapped family, skipping"),
        }
    }
    Ok(found)
}

/// Loads, fits and quota-fills the clips in `dir` into a `quota × clip_samples` matrix.
///
/// A missing directory counts as a family with no clips.
pub fn ingest_family(
    dir: &Path,
    family: InstrumentFamily,
    config: &PipelineConfig,
) -> FeatureResult<Array2<f32>> {
    let files = if dir.is_dir() {
        list_wav_files(dir)?
    } else {
        Vec::new()
    };

    let dataset = &config.dataset;
    let mut clips = Vec::with_capacity(files.len().min(dataset.quota));
    for file in files.iter().take(dataset.quota) {
        let clip = AudioClip::from_wav(file, family, config.extraction.sample_rate)?;
        clips.push(fit_length(clip.samples(), dataset.clip_samples));
    }
    let clips = fill_quota(clips, dataset.quota, family)?;

    let mut matrix = Array2::zeros((clips.len(), dataset.clip_samples));
    for (mut row, clip) in matrix.rows_mut().into_iter().zip(&clips) {
        row.assign(clip);
    }
    Ok(matrix)
}

/// Ingests every family of `label_map` from its directory under `root` into `base/{family}.npy`.
pub fn ingest_directory(
    root: &Path,
    config: &PipelineConfig,
    label_map: &LabelMap,
    handling: ErrorHandling,
) -> FeatureResult<StageReport> {
    let layout = config.layout();
    let dirs = family_directories(root, label_map)?;
    let mut report = StageReport::new("ingest");
    for family in label_map.families() {
        let dir = dirs
            .get(&family)
            .cloned()
            .unwrap_or_else(|| root.join(family.name()));
        let result = ingest_family(&dir, family, config).and_then(|matrix| {
            let path = layout.clips(family);
            info!(%family, clips = matrix.nrows(), path = %path.display(), "storing waveforms");
            write_array(&path, &matrix)
        });
        report.record(family, "waveform", result, handling)?;
    }
    Ok(report)
}

/// Reads the stored waveforms of one family as clips.
pub fn load_family_clips(
    layout: &DatasetLayout,
    family: InstrumentFamily,
    sample_rate: u32,
) -> FeatureResult<Vec<AudioClip>> {
    let matrix: Array2<f32> = read_array(layout.clips(family))?;
    Ok(matrix
        .rows()
        .into_iter()
        .map(|row| AudioClip::new(row.to_owned(), sample_rate, family))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_fit_length_pads_and_truncates() {
        let samples = array![1.0f32, 2.0, 3.0];
        assert_eq!(fit_length(&samples, 5), array![1.0, 2.0, 3.0, 0.0, 0.0]);
        assert_eq!(fit_length(&samples, 2), array![1.0, 2.0]);
    }

    #[test]
    fn test_fill_quota_repeats_cyclically() {
        let filled = fill_quota(vec![1, 2, 3], 8, InstrumentFamily::Bass).unwrap();
        assert_eq!(filled, vec![1, 2, 3, 1, 2, 3, 1, 2]);

        let capped = fill_quota((0..10).collect(), 4, InstrumentFamily::Bass).unwrap();
        assert_eq!(capped, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_fill_quota_empty_family_fails() {
        let err = fill_quota(Vec::<u8>::new(), 200, InstrumentFamily::Vocal).unwrap_err();
        assert!(matches!(
            err,
            FeatureError::QuotaShortfall {
                available: 0,
                quota: 200,
                ..
            }
        ));
    }

    fn write_mono_wav(path: &Path, value: i16, len: usize) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for _ in 0..len {
            writer.write_sample(value).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_ingest_directory_orders_caps_and_isolates() {
        let base = std::env::temp_dir().join(format!("multigram-ingest-{}", std::process::id()));
        std::fs::remove_dir_all(&base).ok();
        let root = base.join("corpus");

        // named directory, files out of name order, more files than the quota
        let guitar = root.join("guitar");
        std::fs::create_dir_all(&guitar).unwrap();
        write_mono_wav(&guitar.join("c.wav"), 16_384, 12);
        write_mono_wav(&guitar.join("a.wav"), 4_096, 12);
        write_mono_wav(&guitar.join("b.wav"), 8_192, 12);
        std::fs::write(guitar.join("notes.txt"), "not audio").unwrap();

        // raw id directory (flute = 2) with a single short clip
        let flute = root.join("2");
        std::fs::create_dir_all(&flute).unwrap();
        write_mono_wav(&flute.join("only.wav"), 16_384, 5);

        // synth_lead has no mapping and is skipped
        let synth = root.join("9");
        std::fs::create_dir_all(&synth).unwrap();
        write_mono_wav(&synth.join("lead.wav"), 1_000, 12);

        let mut config = PipelineConfig::new(base.join("data"), base.join("out"));
        config.dataset.quota = 2;
        config.dataset.clip_samples = 8;
        let map = LabelMap::nsynth();

        let dirs = family_directories(&root, &map).unwrap();
        assert_eq!(dirs.len(), 2);
        assert_eq!(dirs[&InstrumentFamily::Flute], flute);

        let report = ingest_directory(&root, &config, &map, ErrorHandling::CollectErrors).unwrap();
        assert_eq!(report.completed(), 2);
        assert_eq!(report.failures().len(), 8);
        let bass = report
            .failures()
            .iter()
            .find(|f| f.family == InstrumentFamily::Bass)
            .unwrap();
        assert!(matches!(
            bass.error,
            FeatureError::QuotaShortfall {
                available: 0,
                quota: 2,
                ..
            }
        ));

        let layout = config.layout();
        let guitar_matrix: Array2<f32> = read_array(layout.clips(InstrumentFamily::Guitar)).unwrap();
        assert_eq!(guitar_matrix.dim(), (2, 8));
        assert!(guitar_matrix.row(0).iter().all(|&s| s == 0.125));
        assert!(guitar_matrix.row(1).iter().all(|&s| s == 0.25));

        let flute_clips = load_family_clips(&layout, InstrumentFamily::Flute, 16_000).unwrap();
        assert_eq!(flute_clips.len(), 2);
        assert_eq!(flute_clips[0], flute_clips[1]);
        assert_eq!(flute_clips[0].samples().to_vec(), vec![0.5, 0.5, 0.5, 0.5, 0.5, 0.0, 0.0, 0.0]);

        let strict = ingest_directory(&root, &config, &map, ErrorHandling::StopOnFirstError);
        assert!(matches!(strict, Err(FeatureError::Stage { .. })));

        std::fs::remove_dir_all(&base).ok();
    }

    #[test]
    fn test_from_wav_scales_and_mixes_down() {
        let dir = std::env::temp_dir().join(format!("multigram-wav-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("stereo.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..4 {
            writer.write_sample(16_384i16).unwrap();
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();

        let clip = AudioClip::from_wav(&path, InstrumentFamily::Flute, 16_000).unwrap();
        assert_eq!(clip.len(), 4);
        assert_eq!(clip.family(), InstrumentFamily::Flute);
        assert!(clip.samples().iter().all(|&s| (s - 0.25).abs() < 1e-6));
        std::fs::remove_dir_all(&dir).ok();
    }
}
