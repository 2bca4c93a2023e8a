use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::patch::DisplayTextPolicy;
use crate::summary::{DEFAULT_SUMMARY_MAX_CHARS, MIN_SUMMARY_MAX_CHARS, SummaryOptions};

pub const DEFAULT_USER_AGENT: &str = "dabtool/0.1";
pub const DEFAULT_API_URL: &str = "https://en.wikipedia.org/w/api.php";
pub const DEFAULT_CONFIG_PATH: &str = ".dabtool/config.toml";

/// Templates whose presence marks a page as a disambiguation page.
pub const DEFAULT_DISAMBIGUATION_TEMPLATES: &[&str] = &[
    "Template:Disambiguation",
    "Template:Airport disambiguation",
    "Template:Biology disambiguation",
    "Template:Call sign disambiguation",
    "Template:Caselaw disambiguation",
    "Template:Chinese title disambiguation",
    "Template:Disambiguation cleanup",
    "Template:Genus disambiguation",
    "Template:Hospital disambiguation",
    "Template:Human name disambiguation",
    "Template:Human name disambiguation cleanup",
    "Template:Letter-number combination disambiguation",
    "Template:Mathematical disambiguation",
    "Template:Military unit disambiguation",
    "Template:Music disambiguation",
    "Template:Number disambiguation",
    "Template:Opus number disambiguation",
    "Template:Phonetics disambiguation",
    "Template:Place name disambiguation",
    "Template:Portal disambiguation",
    "Template:Road disambiguation",
    "Template:School disambiguation",
    "Template:Species Latin name abbreviation disambiguation",
    "Template:Species Latin name disambiguation",
    "Template:Station disambiguation",
    "Template:Synagogue disambiguation",
    "Template:Taxonomic authority disambiguation",
    "Template:Taxonomy disambiguation",
    "Template:Template disambiguation",
    "Template:WoO number disambiguation",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigLocation {
    pub path: PathBuf,
    pub source: ValueSource,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct DabtoolConfig {
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub dab: DabSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct DabSection {
    pub display_text: Option<DisplayTextPolicy>,
    pub summary_max_chars: Option<usize>,
    pub summary_suffix: Option<String>,
    #[serde(default)]
    pub templates: Vec<String>,
}

impl DabtoolConfig {
    /// Resolve the wiki API URL: env WIKI_API_URL > config > DEFAULT_API_URL.
    pub fn api_url(&self) -> String {
        if let Some(value) = non_empty_env("WIKI_API_URL") {
            return value;
        }
        self.wiki
            .api_url
            .clone()
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
    }

    /// Resolve user agent: env WIKI_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        if let Some(value) = non_empty_env("WIKI_USER_AGENT") {
            return value;
        }
        self.wiki
            .user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn display_text_policy(&self) -> DisplayTextPolicy {
        self.dab.display_text.unwrap_or_default()
    }

    pub fn summary_options(&self) -> SummaryOptions {
        SummaryOptions {
            max_chars: self
                .dab
                .summary_max_chars
                .unwrap_or(DEFAULT_SUMMARY_MAX_CHARS),
            suffix: self
                .dab
                .summary_suffix
                .clone()
                .filter(|suffix| !suffix.trim().is_empty()),
        }
    }

    pub fn disambiguation_templates(&self) -> Vec<String> {
        if self.dab.templates.is_empty() {
            return DEFAULT_DISAMBIGUATION_TEMPLATES
                .iter()
                .map(|template| (*template).to_string())
                .collect();
        }
        self.dab.templates.clone()
    }
}

/// Config path precedence: flag > env DABTOOL_CONFIG > `.dabtool/config.toml`
/// under `cwd`.
pub fn resolve_config_path(cwd: &Path, flag: Option<&Path>) -> ConfigLocation {
    resolve_config_path_with_lookup(cwd, flag, |key| env::var(key).ok())
}

fn resolve_config_path_with_lookup<F>(
    cwd: &Path,
    flag: Option<&Path>,
    lookup_env: F,
) -> ConfigLocation
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = flag {
        return ConfigLocation {
            path: absolutize(path, cwd),
            source: ValueSource::Flag,
        };
    }
    if let Some(value) = lookup_env("DABTOOL_CONFIG")
        && !value.trim().is_empty()
    {
        return ConfigLocation {
            path: absolutize(Path::new(value.trim()), cwd),
            source: ValueSource::Env,
        };
    }
    ConfigLocation {
        path: cwd.join(DEFAULT_CONFIG_PATH),
        source: ValueSource::Default,
    }
}

/// Load and parse a config file. Returns default if the file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<DabtoolConfig> {
    if !config_path.exists() {
        return Ok(DabtoolConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: DabtoolConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    if let Some(max_chars) = parsed.dab.summary_max_chars
        && max_chars < MIN_SUMMARY_MAX_CHARS
    {
        bail!(
            "{}: dab.summary_max_chars must be at least {MIN_SUMMARY_MAX_CHARS}, got {max_chars}",
            config_path.display()
        );
    }
    Ok(parsed)
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
