//! Pipeline settings loaded from an optional YAML file.
//!
//! Every knob defaults to the named constant used by the stage that owns it,
//! so an absent file and an empty file behave identically.

use std::{fs, path::Path};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::{
    import::SAMPLE_VALIDATION_ROWS,
    mapping::{HIGH_CONFIDENCE_THRESHOLD, MAPPING_SAMPLE_ROWS, MATCH_THRESHOLD},
    parser::MAX_FILE_BYTES,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ImportSettings {
    /// Uploads larger than this are rejected before parsing.
    pub max_file_bytes: u64,
    /// Rows checked by the sample validation pass.
    pub sample_size: usize,
    /// Rows scanned for example values shown next to each mapping.
    pub mapping_sample_rows: usize,
    pub match_threshold: f64,
    pub high_confidence_threshold: f64,
    /// Validate and transform rows on the rayon pool.
    pub parallel: bool,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            max_file_bytes: MAX_FILE_BYTES,
            sample_size: SAMPLE_VALIDATION_ROWS,
            mapping_sample_rows: MAPPING_SAMPLE_ROWS,
            match_threshold: MATCH_THRESHOLD,
            high_confidence_threshold: HIGH_CONFIDENCE_THRESHOLD,
            parallel: true,
        }
    }
}

impl ImportSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Opening settings file {path:?}"))?;
        let settings = if contents.trim().is_empty() {
            ImportSettings::default()
        } else {
            serde_yaml::from_str(&contents).context("Parsing settings YAML")?
        };
        settings.ensure_valid()?;
        Ok(settings)
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn ensure_valid(&self) -> Result<()> {
        ensure!(self.max_file_bytes > 0, "max_file_bytes must be positive");
        ensure!(self.sample_size > 0, "sample_size must be positive");
        ensure!(
            self.match_threshold > 0.0 && self.match_threshold <= 1.0,
            "match_threshold must be within (0, 1]"
        );
        ensure!(
            self.high_confidence_threshold >= self.match_threshold
                && self.high_confidence_threshold <= 1.0,
            "high_confidence_threshold ({}) must be between match_threshold ({}) and 1",
            self.high_confidence_threshold,
            self.match_threshold
        );
        Ok(())
    }
}
