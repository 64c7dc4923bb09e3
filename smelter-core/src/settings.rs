//! Per-estate pipeline settings, supplied by the catalogue importer and
//! re-read at the start of every run so changes apply without a deploy.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::error::SettingsError;

pub const DEFAULT_DOC_PATH_PATTERNS: &[&str] = &["docs/**", "**/*.md", "**/*.mdx", "**/*.rst"];

fn default_true() -> bool {
    true
}

/// Noise filter configuration, stored as JSONB. Every field defaults so a
/// partial document (or an empty one) decodes to "keep everything". The
/// per-kind toggles let an estate switch one dimension off while keeping its
/// ignore lists around.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NoiseFilterSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub filter_authors: bool,
    #[serde(default = "default_true")]
    pub filter_labels: bool,
    #[serde(default = "default_true")]
    pub filter_paths: bool,
    #[serde(default = "default_true")]
    pub filter_titles: bool,
    #[serde(default)]
    pub ignore_authors: Vec<String>,
    #[serde(default)]
    pub ignore_labels: Vec<String>,
    #[serde(default)]
    pub ignore_paths: Vec<String>,
    #[serde(default)]
    pub ignore_title_prefixes: Vec<String>,
}

impl Default for NoiseFilterSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            filter_authors: true,
            filter_labels: true,
            filter_paths: true,
            filter_titles: true,
            ignore_authors: Vec::new(),
            ignore_labels: Vec::new(),
            ignore_paths: Vec::new(),
            ignore_title_prefixes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EstateSettings {
    pub noise_filter: NoiseFilterSettings,
    /// Globs classifying which paths count as documentation.
    pub doc_path_patterns: Vec<String>,
}

impl Default for EstateSettings {
    fn default() -> Self {
        Self {
            noise_filter: NoiseFilterSettings::default(),
            doc_path_patterns: DEFAULT_DOC_PATH_PATTERNS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Read side of the estate settings. A trait so the poller can be driven with
/// canned settings in tests, and so a transient store outage is
/// distinguishable from settings that no longer decode.
#[async_trait]
pub trait SettingsSource: Send + Sync {
    async fn estate_settings(&self, estate_id: i32) -> Result<EstateSettings, SettingsError>;
}

pub struct PgSettingsSource {
    pool: PgPool,
}

impl PgSettingsSource {
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettingsSource for PgSettingsSource {
    async fn estate_settings(&self, estate_id: i32) -> Result<EstateSettings, SettingsError> {
        let row: Option<(serde_json::Value, Vec<String>)> = sqlx::query_as(
            "SELECT noise_filter, doc_path_patterns FROM estate_settings WHERE estate_id = $1",
        )
        .bind(estate_id)
        .fetch_optional(&self.pool)
        .await?;

        // No row means the estate was never configured: keep everything.
        let Some((noise_filter, doc_path_patterns)) = row else {
            return Ok(EstateSettings::default());
        };

        let noise_filter = serde_json::from_value(noise_filter)
            .map_err(|error| SettingsError::Invalid { estate_id, error })?;

        Ok(EstateSettings {
            noise_filter,
            doc_path_patterns,
        })
    }
}
