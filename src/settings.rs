use std::{fs::File, io::BufReader, path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

/// Runtime knobs for preview and execution, loadable from YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub preview_sample_rows: usize,
    /// Hard cap on any requested preview sample.
    pub preview_max_rows: usize,
    pub batch_size: usize,
    /// Confidence at or above which a value-only match is DETECTED rather
    /// than NEEDS_REVIEW. Column-name matches are always DETECTED.
    pub detected_threshold: f64,
    pub max_rows: Option<u64>,
    pub timeout_secs: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            preview_sample_rows: 100,
            preview_max_rows: 1000,
            batch_size: 500,
            detected_threshold: 0.8,
            max_rows: None,
            timeout_secs: None,
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening settings {path:?}"))?;
        let settings: Settings = serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("Parsing settings YAML {path:?}"))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Loads `path` when given, otherwise returns the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.batch_size > 0, "batch_size must be greater than zero");
        ensure!(
            self.preview_sample_rows > 0,
            "preview_sample_rows must be greater than zero"
        );
        ensure!(
            self.preview_max_rows >= self.preview_sample_rows,
            "preview_max_rows must be at least preview_sample_rows"
        );
        ensure!(
            (0.0..=1.0).contains(&self.detected_threshold),
            "detected_threshold must be within [0, 1]"
        );
        Ok(())
    }

    /// Preview sample size for an optional request, capped by the hard limit.
    pub fn sample_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.preview_sample_rows)
            .clamp(1, self.preview_max_rows)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().expect("defaults validate");
        assert_eq!(settings.sample_limit(None), 100);
        assert_eq!(settings.sample_limit(Some(5000)), 1000);
        assert_eq!(settings.sample_limit(Some(0)), 1);
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let mut file = NamedTempFile::new().expect("temp file");
        writeln!(file, "batch_size: 2\ntimeout_secs: 5").expect("write");
        let settings = Settings::load(file.path()).expect("load");
        assert_eq!(settings.batch_size, 2);
        assert_eq!(settings.timeout(), Some(Duration::from_secs(5)));
        assert_eq!(settings.preview_sample_rows, 100);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let mut file = NamedTempFile::new().expect("temp file");
        writeln!(file, "batch_size: 0").expect("write");
        let err = Settings::load(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("batch_size"));
    }
}
