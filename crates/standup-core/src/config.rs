use std::path::PathBuf;
use std::time::Duration;

use crate::subtask_extractor::DEFAULT_KEYWORDS;
use crate::transition_resolver::TransitionAliasTable;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_MAX_SUB_ITEMS: usize = 3;
pub const DEFAULT_MODEL_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_EXTRACTOR_MAX_TOKENS: u32 = 400;
pub const DEFAULT_RECONCILER_MAX_TOKENS: u32 = 600;

#[derive(Debug, Clone, PartialEq)]
/// Runtime settings for the reconciliation engine.
pub struct EngineConfig {
    pub model: String,
    pub max_sub_items: usize,
    pub model_timeout: Duration,
    pub extractor_max_tokens: u32,
    pub reconciler_max_tokens: u32,
    pub keywords: Vec<String>,
    pub project_keys: Vec<String>,
    pub attachment_root: Option<PathBuf>,
    pub transition_aliases: TransitionAliasTable,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_sub_items: DEFAULT_MAX_SUB_ITEMS,
            model_timeout: Duration::from_millis(DEFAULT_MODEL_TIMEOUT_MS),
            extractor_max_tokens: DEFAULT_EXTRACTOR_MAX_TOKENS,
            reconciler_max_tokens: DEFAULT_RECONCILER_MAX_TOKENS,
            keywords: DEFAULT_KEYWORDS.iter().map(|kw| kw.to_string()).collect(),
            project_keys: Vec::new(),
            attachment_root: None,
            transition_aliases: TransitionAliasTable::default(),
        }
    }
}
