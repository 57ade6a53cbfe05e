//! Instrument families and the label map shared by every stage.
//!
//! The dataset labels families with raw ids that skip `synth_lead` (9), so the
//! dense class index used by classifiers and label vectors differs from the raw
//! id for `vocal`. All translation goes through one [`LabelMap`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{FeatureError, FeatureResult};

/// One of the ten instrument families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentFamily {
    /// Bass
    Bass,
    /// Brass
    Brass,
    /// Flute
    Flute,
    /// Guitar
    Guitar,
    /// Keyboard
    Keyboard,
    /// Mallet
    Mallet,
    /// Organ
    Organ,
    /// Reed
    Reed,
    /// String
    String,
    /// Vocal
    Vocal,
}

impl InstrumentFamily {
    /// All families in dense index order.
    pub const ALL: [InstrumentFamily; 10] = [
        InstrumentFamily::Bass,
        InstrumentFamily::Brass,
        InstrumentFamily::Flute,
        InstrumentFamily::Guitar,
        InstrumentFamily::Keyboard,
        InstrumentFamily::Mallet,
        InstrumentFamily::Organ,
        InstrumentFamily::Reed,
        InstrumentFamily::String,
        InstrumentFamily::Vocal,
    ];

    /// Lowercase name used in file names.
    pub const fn name(&self) -> &'static str {
        match self {
            InstrumentFamily::Bass => "bass",
            InstrumentFamily::Brass => "brass",
            InstrumentFamily::Flute => "flute",
            InstrumentFamily::Guitar => "guitar",
            InstrumentFamily::Keyboard => "keyboard",
            InstrumentFamily::Mallet => "mallet",
            InstrumentFamily::Organ => "organ",
            InstrumentFamily::Reed => "reed",
            InstrumentFamily::String => "string",
            InstrumentFamily::Vocal => "vocal",
        }
    }
}

impl fmt::Display for InstrumentFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for InstrumentFamily {
    type Err = FeatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        InstrumentFamily::ALL
            .iter()
            .copied()
            .find(|family| family.name() == lowered)
            .ok_or_else(|| FeatureError::InvalidParameter(format!("unknown instrument family '{s}'")))
    }
}

/// One row of a [`LabelMap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelEntry {
    /// Family.
    pub family: InstrumentFamily,
    /// Id used by the source dataset.
    pub raw_id: u8,
    /// Contiguous class index used by classifiers and label vectors.
    pub index: usize,
}

/// Versioned mapping between raw dataset ids, dense indices and families.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMap {
    version: u32,
    entries: Vec<LabelEntry>,
}

impl LabelMap {
    /// Builds a map from explicit entries and checks it for consistency.
    pub fn new(version: u32, entries: Vec<LabelEntry>) -> FeatureResult<Self> {
        let map = Self { version, entries };
        map.validate()?;
        Ok(map)
    }

    /// The NSynth family map with `synth_lead` (raw id 9) excluded.
    pub fn nsynth() -> Self {
        let entries = InstrumentFamily::ALL
            .iter()
            .enumerate()
            .map(|(index, &family)| LabelEntry {
                family,
                raw_id: if family == InstrumentFamily::Vocal {
                    10
                } else {
                    index as u8
                },
                index,
            })
            .collect();
        Self {
            version: 1,
            entries,
        }
    }

    /// Map version.
    pub const fn version(&self) -> u32 {
        self.version
    }

    /// Number of classes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in dense index order.
    pub fn entries(&self) -> &[LabelEntry] {
        &self.entries
    }

    /// Families in dense index order.
    pub fn families(&self) -> impl Iterator<Item = InstrumentFamily> + '_ {
        self.entries.iter().map(|e| e.family)
    }

    /// Dense index of `family`, if mapped.
    pub fn index_of(&self, family: InstrumentFamily) -> Option<usize> {
        self.entries.iter().find(|e| e.family == family).map(|e| e.index)
    }

    /// Family for a dense index.
    pub fn family_at(&self, index: usize) -> Option<InstrumentFamily> {
        self.entries.iter().find(|e| e.index == index).map(|e| e.family)
    }

    /// Family for a raw dataset id. Unmapped ids (e.g. `synth_lead`) return `None`.
    pub fn from_raw(&self, raw_id: u8) -> Option<InstrumentFamily> {
        self.entries.iter().find(|e| e.raw_id == raw_id).map(|e| e.family)
    }

    /// Checks that dense indices are exactly `0..len`, and that families and raw ids are unique.
    pub fn validate(&self) -> FeatureResult<()> {
        if self.entries.is_empty() {
            return Err(FeatureError::Configuration("label map is empty".to_string()));
        }
        let n = self.entries.len();
        let mut seen_index = vec![false; n];
        for (pos, entry) in self.entries.iter().enumerate() {
            if entry.index >= n || seen_index[entry.index] {
                return Err(FeatureError::Configuration(format!(
                    "label map v{}: index {} for {} is out of range or duplicated",
                    self.version, entry.index, entry.family
                )));
            }
            seen_index[entry.index] = true;
            if self.entries[..pos].iter().any(|e| e.family == entry.family) {
                return Err(FeatureError::Configuration(format!(
                    "label map v{}: family {} listed twice",
                    self.version, entry.family
                )));
            }
            if self.entries[..pos].iter().any(|e| e.raw_id == entry.raw_id) {
                return Err(FeatureError::Configuration(format!(
                    "label map v{}: raw id {} listed twice",
                    self.version, entry.raw_id
                )));
            }
        }
        Ok(())
    }
}

impl Default for LabelMap {
    fn default() -> Self {
        Self::nsynth()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nsynth_map_skips_synth_lead() {
        let map = LabelMap::nsynth();
        map.validate().unwrap();
        assert_eq!(map.len(), 10);
        assert_eq!(map.from_raw(9), None);
        assert_eq!(map.from_raw(10), Some(InstrumentFamily::Vocal));
        assert_eq!(map.index_of(InstrumentFamily::Vocal), Some(9));
        assert_eq!(map.family_at(0), Some(InstrumentFamily::Bass));
    }

    #[test]
    fn test_duplicate_index_rejected() {
        let entries = vec![
            LabelEntry {
                family: InstrumentFamily::Bass,
                raw_id: 0,
                index: 0,
            },
            LabelEntry {
                family: InstrumentFamily::Vocal,
                raw_id: 10,
                index: 0,
            },
        ];
        assert!(matches!(
            LabelMap::new(2, entries),
            Err(FeatureError::Configuration(_))
        ));
    }

    #[test]
    fn test_family_parse() {
        assert_eq!("Guitar".parse::<InstrumentFamily>().unwrap(), InstrumentFamily::Guitar);
        assert!("synth_lead".parse::<InstrumentFamily>().is_err());
    }
}
