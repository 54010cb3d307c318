use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use standup_core::EngineConfig;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
/// Optional overrides read from `--config`.
pub struct ConfigFile {
    #[serde(default)]
    pub extractor: Option<ExtractorSection>,
    #[serde(default)]
    pub transitions: Option<TransitionSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtractorSection {
    pub keywords: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransitionSection {
    pub to_do: Option<Vec<String>>,
    pub in_progress: Option<Vec<String>>,
    pub done: Option<Vec<String>>,
}

pub fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file '{}'", path.display()))?;
    parse_config_file(&raw).with_context(|| format!("invalid config file '{}'", path.display()))
}

pub fn parse_config_file(raw: &str) -> Result<ConfigFile> {
    Ok(toml::from_str(raw)?)
}

impl ConfigFile {
    /// Replaces only the lists present in the file.
    pub fn apply(self, config: &mut EngineConfig) {
        if let Some(keywords) = self.extractor.and_then(|section| section.keywords) {
            config.keywords = keywords;
        }
        if let Some(transitions) = self.transitions {
            let aliases = &mut config.transition_aliases;
            if let Some(to_do) = transitions.to_do {
                aliases.to_do = to_do;
            }
            if let Some(in_progress) = transitions.in_progress {
                aliases.in_progress = in_progress;
            }
            if let Some(done) = transitions.done {
                aliases.done = done;
            }
        }
    }
}
