//! Configuration management
//!
//! Settings live in `settings.json` inside the tally directory:
//! ```json
//! {
//!   "app": { "userId": "local" },
//!   "import": {
//!     "defaultCategory": "uncategorized",
//!     "keywordFallback": false,
//!     "dateFormats": { "generic_csv": ["%d.%m.%Y"] },
//!     "defaultProfile": "chase",
//!     "profiles": { "chase": { "columnMappings": { ... }, "skipRows": 0 } }
//!   }
//! }
//! ```
//! Keys the import core does not manage are preserved on save.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::domain::{StatementFormat, DEFAULT_CATEGORY};

const DEFAULT_USER: &str = "local";

/// Raw settings.json structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsFile {
    #[serde(default)]
    app: AppSettings,
    #[serde(default)]
    import: ImportSettings,
    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

/// Tally configuration (simplified view of settings)
#[derive(Debug, Clone)]
pub struct Config {
    /// Owner of batches and rules created from this installation
    pub user_id: String,
    pub import: ImportSettings,
    // Keep the raw settings for preservation when saving
    _raw_settings: SettingsFile,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user_id: DEFAULT_USER.to_string(),
            import: ImportSettings::default(),
            _raw_settings: SettingsFile::default(),
        }
    }
}

impl Config {
    /// Load config from the tally directory
    ///
    /// Environment overrides:
    /// - `TALLY_USER` replaces `app.userId`
    /// - `TALLY_KEYWORD_FALLBACK` replaces `import.keywordFallback`
    pub fn load(tally_dir: &Path) -> Result<Self> {
        let settings_path = tally_dir.join("settings.json");

        let raw: SettingsFile = if settings_path.exists() {
            let content = std::fs::read_to_string(&settings_path)?;
            serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!(path = %settings_path.display(), error = %e, "ignoring unreadable settings file");
                SettingsFile::default()
            })
        } else {
            SettingsFile::default()
        };

        let user_id = std::env::var("TALLY_USER")
            .ok()
            .filter(|u| !u.trim().is_empty())
            .or_else(|| raw.app.user_id.clone())
            .unwrap_or_else(|| DEFAULT_USER.to_string());

        let mut import = raw.import.clone();
        if let Some(flag) = env_flag("TALLY_KEYWORD_FALLBACK") {
            import.keyword_fallback = flag;
        }

        Ok(Self {
            user_id,
            import,
            _raw_settings: raw,
        })
    }

    /// Save config to the tally directory
    /// Preserves other settings that tally doesn't manage
    pub fn save(&self, tally_dir: &Path) -> Result<()> {
        let settings_path = tally_dir.join("settings.json");

        // Load existing settings to preserve fields we don't manage
        let mut settings = if settings_path.exists() {
            let content = std::fs::read_to_string(&settings_path)?;
            serde_json::from_str::<SettingsFile>(&content).unwrap_or_default()
        } else {
            self._raw_settings.clone()
        };

        settings.app.user_id = Some(self.user_id.clone());
        settings.import = self.import.clone();

        let content = serde_json::to_string_pretty(&settings)?;
        std::fs::write(&settings_path, content)?;
        Ok(())
    }
}

fn env_flag(name: &str) -> Option<bool> {
    match std::env::var(name).ok().as_deref() {
        Some("true" | "1" | "yes" | "TRUE" | "YES") => Some(true),
        Some("false" | "0" | "no" | "FALSE" | "NO") => Some(false),
        _ => None,
    }
}

/// Import pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSettings {
    /// Category assigned when no rule matches
    #[serde(default = "default_category")]
    pub default_category: String,
    /// Consult the built-in keyword table after user rules miss
    #[serde(default)]
    pub keyword_fallback: bool,
    /// Per-format date format lists, replacing the built-in ones
    #[serde(default)]
    pub date_formats: HashMap<StatementFormat, Vec<String>>,
    /// Profile used when an upload names none
    #[serde(default)]
    pub default_profile: Option<String>,
    #[serde(default)]
    pub profiles: HashMap<String, ImportProfile>,
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            default_category: default_category(),
            keyword_fallback: false,
            date_formats: HashMap::new(),
            default_profile: None,
            profiles: HashMap::new(),
        }
    }
}

impl ImportSettings {
    /// Ordered date formats tried for a statement format. A profile's own
    /// `dateFormat` goes first.
    pub fn date_formats_for(
        &self,
        format: StatementFormat,
        profile: Option<&ImportProfile>,
    ) -> Vec<String> {
        let mut formats: Vec<String> = profile
            .and_then(|p| p.date_format.clone())
            .into_iter()
            .collect();
        match self.date_formats.get(&format) {
            Some(configured) if !configured.is_empty() => formats.extend(configured.iter().cloned()),
            _ => formats.extend(builtin_date_formats(format).iter().map(|f| f.to_string())),
        }
        formats
    }

    /// Resolve a named profile, falling back to the default profile
    pub fn profile(&self, name: Option<&str>) -> Option<&ImportProfile> {
        name.or(self.default_profile.as_deref())
            .and_then(|n| self.profiles.get(n))
    }
}

/// Built-in date formats, tried in order
pub fn builtin_date_formats(format: StatementFormat) -> &'static [&'static str] {
    match format {
        StatementFormat::CibcCredit => &["%Y-%m-%d"],
        StatementFormat::RbcChecking => &["%m/%d/%Y", "%Y-%m-%d"],
        StatementFormat::GenericCsv | StatementFormat::Excel => &[
            "%Y-%m-%d",
            "%Y-%m-%d %H:%M:%S",
            "%Y-%m-%dT%H:%M:%S",
            "%m/%d/%Y",
            "%m/%d/%Y %H:%M",
            "%d/%m/%Y",
            "%m-%d-%Y",
            "%d-%m-%Y",
            "%Y/%m/%d",
            "%d %b %Y",
            "%b %d, %Y",
        ],
    }
}

/// How decimal and thousands separators are written
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumberFormat {
    /// `1,234.56`
    #[default]
    Us,
    /// `1.234,56`
    European,
}

/// Import profile for statement files whose columns need explicit mapping
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportProfile {
    #[serde(default)]
    pub column_mappings: Option<ColumnMappings>,
    /// Tried before the format's configured date formats
    #[serde(default)]
    pub date_format: Option<String>,
    /// Preamble lines before the header row
    #[serde(default)]
    pub skip_rows: usize,
    #[serde(default)]
    pub delimiter: Option<char>,
    #[serde(default)]
    pub options: ImportOptions,
}

/// Import options for profile storage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOptions {
    /// Flip signs on all amounts (credit card exports listing charges as positive)
    #[serde(default)]
    pub flip_signs: bool,
    #[serde(default)]
    pub number_format: NumberFormat,
}

/// Column mappings for header-based imports
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMappings {
    pub date: String,
    pub amount: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub credit: Option<String>,
    #[serde(default)]
    pub debit: Option<String>,
    #[serde(default)]
    pub merchant: Option<String>,
    #[serde(default)]
    pub posted_date: Option<String>,
    #[serde(default)]
    pub card: Option<String>,
    #[serde(default)]
    pub account_number: Option<String>,
}

impl Default for ColumnMappings {
    fn default() -> Self {
        Self {
            date: "Date".to_string(),
            amount: "Amount".to_string(),
            description: Some("Description".to_string()),
            credit: None,
            debit: None,
            merchant: None,
            posted_date: None,
            card: None,
            account_number: None,
        }
    }
}
