use ardhi_types::{PipelineError, PipelineResult};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// How tile samples are scaled before they reach the model
#[derive(Serialize, Deserialize, JsonSchema, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// Sample values as stored (0-255)
    #[default]
    Raw,
    /// Divide by 255
    Unit,
    /// Unit scaling followed by ImageNet mean/std
    Imagenet,
}

/// What happens to the run when a tile's inference fails
#[derive(Serialize, Deserialize, JsonSchema, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Fail the whole run
    #[default]
    Abort,
    /// Drop the failing tiles, log them and report them in the output
    Skip,
}

/// Reducer for pixels covered by more than one mask.
/// Masks are visited in tile order (row, then column).
#[derive(Serialize, Deserialize, JsonSchema, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    #[default]
    Last,
    First,
    /// Highest class label wins
    Max,
}

/// Pixel adjacency used when grouping same-class pixels into regions
#[derive(Serialize, Deserialize, JsonSchema, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    /// Edge neighbours only
    Four,
    /// Edge and corner neighbours
    #[default]
    Eight,
}

macro_rules! impl_from_str_via_serde {
    ($($ty:ty),*) => {
        $(impl FromStr for $ty {
            type Err = PipelineError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                parse_snake_case(s)
            }
        })*
    };
}

impl_from_str_via_serde!(Normalization, FailurePolicy, MergeStrategy, Connectivity);

fn parse_snake_case<T: DeserializeOwned>(s: &str) -> PipelineResult<T> {
    let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
    serde_json::from_value(serde_json::Value::String(normalized))
        .map_err(|_| PipelineError::InvalidConfig(format!("Unknown option value: {s}")))
}

#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, PartialEq)]
pub struct InferenceOptions {
    /// Tiles per model invocation
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Concurrent batches in flight
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub normalization: Normalization,
    /// Zero-pad truncated edge tiles to the full tile size for the model
    #[serde(default = "default_pad_edge_tiles")]
    pub pad_edge_tiles: bool,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, PartialEq, Default)]
pub struct MosaicOptions {
    #[serde(default)]
    pub strategy: MergeStrategy,
}

#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, PartialEq)]
pub struct VectorizeOptions {
    #[serde(default)]
    pub connectivity: Connectivity,
    /// Label treated as "no feature"
    #[serde(default)]
    pub background: u8,
    /// Regions with fewer pixels are dropped; 0 keeps everything
    #[serde(default)]
    pub min_region_pixels: usize,
    /// Names indexed by class label, emitted as the `label` property
    #[serde(default)]
    pub class_labels: Option<Vec<String>>,
    /// Reproject output coordinates to EPSG:4326
    #[serde(default)]
    pub reproject_to_wgs84: bool,
}

/// Configuration of one pipeline invocation
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    /// Tile edge length in pixels
    #[serde(default = "default_tile_size")]
    pub tile_size: u32,
    #[serde(default)]
    pub inference: InferenceOptions,
    #[serde(default)]
    pub mosaic: MosaicOptions,
    #[serde(default)]
    pub vectorize: VectorizeOptions,
    /// When set, tiles, masks and the mosaic are written as GeoTIFFs under
    /// `<artifacts_dir>/<run id>/`
    #[serde(default)]
    pub artifacts_dir: Option<PathBuf>,
}

fn default_tile_size() -> u32 {
    256
}
fn default_batch_size() -> usize {
    8
}
fn default_workers() -> usize {
    std::cmp::max(1, num_cpus::get())
}
fn default_pad_edge_tiles() -> bool {
    true
}

impl Default for InferenceOptions {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            workers: default_workers(),
            normalization: Normalization::default(),
            pad_edge_tiles: default_pad_edge_tiles(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl Default for VectorizeOptions {
    fn default() -> Self {
        Self {
            connectivity: Connectivity::default(),
            background: 0,
            min_region_pixels: 0,
            class_labels: None,
            reproject_to_wgs84: false,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tile_size: default_tile_size(),
            inference: InferenceOptions::default(),
            mosaic: MosaicOptions::default(),
            vectorize: VectorizeOptions::default(),
            artifacts_dir: None,
        }
    }
}

fn env_var<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring unparsable {}={}", key, raw);
            None
        }
    }
}

impl PipelineConfig {
    pub fn with_tile_size(mut self, tile_size: u32) -> Self {
        self.tile_size = tile_size;
        self
    }

    /// Defaults overridden by `ARDHI_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Reads a JSON config file, then applies environment overrides.
    pub fn from_file(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::InvalidConfig(format!("Cannot read {}: {e}", path.display()))
        })?;
        let mut config: PipelineConfig = serde_json::from_str(&content).map_err(|e| {
            PipelineError::InvalidConfig(format!("Cannot parse {}: {e}", path.display()))
        })?;
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Some(v) = env_var("ARDHI_TILE_SIZE") {
            self.tile_size = v;
        }
        if let Some(v) = env_var("ARDHI_BATCH_SIZE") {
            self.inference.batch_size = v;
        }
        if let Some(v) = env_var("ARDHI_WORKERS") {
            self.inference.workers = v;
        }
        if let Some(v) = env_var("ARDHI_NORMALIZATION") {
            self.inference.normalization = v;
        }
        if let Some(v) = env_var("ARDHI_PAD_EDGE_TILES") {
            self.inference.pad_edge_tiles = v;
        }
        if let Some(v) = env_var("ARDHI_FAILURE_POLICY") {
            self.inference.failure_policy = v;
        }
        if let Some(v) = env_var("ARDHI_MERGE_STRATEGY") {
            self.mosaic.strategy = v;
        }
        if let Some(v) = env_var("ARDHI_CONNECTIVITY") {
            self.vectorize.connectivity = v;
        }
        if let Some(v) = env_var("ARDHI_MIN_REGION_PIXELS") {
            self.vectorize.min_region_pixels = v;
        }
        if let Some(v) = env_var("ARDHI_REPROJECT_WGS84") {
            self.vectorize.reproject_to_wgs84 = v;
        }
        if let Ok(dir) = std::env::var("ARDHI_ARTIFACTS_DIR") {
            self.artifacts_dir = (!dir.is_empty()).then(|| PathBuf::from(dir));
        }
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if self.tile_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "tile_size must be positive".to_string(),
            ));
        }
        if self.inference.batch_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "batch_size must be positive".to_string(),
            ));
        }
        if self.inference.workers == 0 {
            return Err(PipelineError::InvalidConfig(
                "workers must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.tile_size, 256);
        assert_eq!(config.inference.batch_size, 8);
        assert!(config.inference.workers >= 1);
        assert_eq!(config.inference.failure_policy, FailurePolicy::Abort);
        assert_eq!(config.mosaic.strategy, MergeStrategy::Last);
        assert_eq!(config.vectorize.connectivity, Connectivity::Eight);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: PipelineConfig = serde_json::from_str(
            r#"{"tile_size": 512, "inference": {"failure_policy": "skip"}, "vectorize": {"connectivity": "four"}}"#,
        )
        .unwrap();
        assert_eq!(config.tile_size, 512);
        assert_eq!(config.inference.failure_policy, FailurePolicy::Skip);
        assert_eq!(config.inference.batch_size, 8);
        assert_eq!(config.vectorize.connectivity, Connectivity::Four);
        assert_eq!(config.mosaic.strategy, MergeStrategy::Last);
    }

    #[test]
    fn test_option_values_parse() {
        assert_eq!("Imagenet".parse::<Normalization>().unwrap(), Normalization::Imagenet);
        assert_eq!("max".parse::<MergeStrategy>().unwrap(), MergeStrategy::Max);
        assert_eq!(" SKIP ".parse::<FailurePolicy>().unwrap(), FailurePolicy::Skip);
        assert!("diagonal".parse::<Connectivity>().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        let config = PipelineConfig::default().with_tile_size(0);
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfig(_))
        ));

        let mut config = PipelineConfig::default();
        config.inference.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_reports_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = PipelineConfig::from_file(&path).unwrap_err();
        assert_eq!(err.kind(), "invalid_config_error");

        std::fs::write(&path, r#"{"tile_size": 128}"#).unwrap();
        let config = PipelineConfig::from_file(&path).unwrap();
        assert!(config.tile_size == 128 || std::env::var("ARDHI_TILE_SIZE").is_ok());
    }
}
