//! Derives a bounded list of sub-items from an issue description.
//!
//! The model path asks for deliverable-level items grounded in the text. Any model
//! failure or malformed reply falls back to a pure line/sentence splitter that prefers
//! candidates containing domain keywords.

use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::completion::CompletionModel;
use crate::model_json::{parse_model_object, required_list, ModelOutputError};

pub const SUB_ITEM_MAX_CHARS: usize = 160;
pub const DEFAULT_KEYWORDS: [&str; 6] = [
    "request",
    "prepare",
    "deliverable",
    "report",
    "access",
    "training",
];

const EXTRACTION_SYSTEM_PROMPT: &str = "You are a concise task summarizer. Return only JSON.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Candidate sub-item; extraction always yields `is_done = false`.
pub struct ExtractedSubItem {
    pub content: String,
    pub is_done: bool,
}

impl ExtractedSubItem {
    fn pending(content: String) -> Self {
        Self {
            content,
            is_done: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Which path produced an extraction.
pub enum ExtractionSource {
    Model,
    Fallback,
    EmptyDescription,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub items: Vec<ExtractedSubItem>,
    pub source: ExtractionSource,
}

pub struct SubtaskExtractor {
    model: Arc<CompletionModel>,
    keyword_pattern: Option<Regex>,
    sentence_boundary: Regex,
    max_output_tokens: u32,
}

impl SubtaskExtractor {
    pub fn new(
        model: Arc<CompletionModel>,
        keywords: &[String],
        max_output_tokens: u32,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            model,
            keyword_pattern: build_keyword_pattern(keywords)?,
            sentence_boundary: Regex::new(r"[.?!]\s*")?,
            max_output_tokens,
        })
    }

    /// Never fails: model errors and malformed output resolve to [`Self::fallback`].
    pub async fn extract(&self, issue_key: &str, description: &str, max_items: usize) -> Extraction {
        if description.trim().is_empty() || max_items == 0 {
            return Extraction {
                items: Vec::new(),
                source: ExtractionSource::EmptyDescription,
            };
        }

        let prompt = build_extraction_prompt(issue_key, description, max_items);
        let max_tokens = self.max_output_tokens;
        let reply = self
            .model
            .complete(EXTRACTION_SYSTEM_PROMPT, &prompt, max_tokens)
            .await;

        let parsed = match reply {
            Ok(raw) => parse_extraction_response(&raw, max_items),
            Err(error) => {
                tracing::warn!(issue_key, %error, "sub-item extraction model call failed; using fallback");
                return self.fallback_extraction(description, max_items);
            }
        };

        match parsed {
            Ok(items) => Extraction {
                items,
                source: ExtractionSource::Model,
            },
            Err(error) => {
                tracing::warn!(issue_key, %error, "sub-item extraction output malformed; using fallback");
                self.fallback_extraction(description, max_items)
            }
        }
    }

    fn fallback_extraction(&self, description: &str, max_items: usize) -> Extraction {
        Extraction {
            items: self.fallback(description, max_items),
            source: ExtractionSource::Fallback,
        }
    }

    /// Deterministic rule-based extraction.
    ///
    /// Candidates are the description's lines, or its sentences when it has no line
    /// breaks. Keyword candidates are chosen first, remaining slots are filled from the
    /// rest, and the chosen candidates are emitted in source order.
    pub fn fallback(&self, description: &str, max_items: usize) -> Vec<ExtractedSubItem> {
        if max_items == 0 {
            return Vec::new();
        }

        let candidates: Vec<String> = self
            .split_candidates(description)
            .into_iter()
            .filter_map(|candidate| normalize_fallback_content(&candidate))
            .collect();

        let is_priority = |candidate: &str| {
            self.keyword_pattern
                .as_ref()
                .is_some_and(|pattern| pattern.is_match(candidate))
        };
        let mut chosen: Vec<usize> = (0..candidates.len())
            .filter(|&index| is_priority(&candidates[index]))
            .take(max_items)
            .collect();
        if chosen.len() < max_items {
            let remaining = max_items - chosen.len();
            let fillers: Vec<usize> = (0..candidates.len())
                .filter(|index| !chosen.contains(index))
                .take(remaining)
                .collect();
            chosen.extend(fillers);
        }
        chosen.sort_unstable();

        let mut items: Vec<ExtractedSubItem> = Vec::with_capacity(chosen.len());
        for index in chosen {
            let content = candidates[index].clone();
            if items.iter().all(|item| item.content != content) {
                items.push(ExtractedSubItem::pending(content));
            }
        }
        items
    }

    fn split_candidates(&self, description: &str) -> Vec<String> {
        let has_line_breaks = description.contains(['\n', '\r']);
        let pieces: Vec<&str> = if has_line_breaks {
            description.split(['\n', '\r']).collect()
        } else {
            self.sentence_boundary.split(description).collect()
        };
        pieces
            .into_iter()
            .map(collapse_whitespace)
            .filter(|piece| !piece.is_empty())
            .collect()
    }
}

fn build_keyword_pattern(keywords: &[String]) -> Result<Option<Regex>, regex::Error> {
    let escaped: Vec<String> = keywords
        .iter()
        .map(|keyword| keyword.trim())
        .filter(|keyword| !keyword.is_empty())
        .map(regex::escape)
        .collect();
    if escaped.is_empty() {
        return Ok(None);
    }
    // Leading boundary only so inflections ("requested", "reports") still count.
    Regex::new(&format!(r"(?i)\b(?:{})", escaped.join("|"))).map(Some)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn build_extraction_prompt(issue_key: &str, description: &str, max_items: usize) -> String {
    let task_key = serde_json::to_string(issue_key).unwrap_or_else(|_| "\"\"".to_string());
    format!(
        r#"You are a task-summarization assistant. Given a tracker issue description, output only a JSON object with at most {max_items} top-level deliverable sub-items.
Rules:
- Consider the whole description to identify top-level deliverables.
- Every item must be explicitly grounded in the description; never invent work the text does not imply.
- Do not break the work into many small steps.
- Use concise, imperative phrasing.
- Return JSON only, with no explanation or markdown.

Return JSON exactly in this shape:
{{"task_key": {task_key}, "subtasks": [{{"content": "..."}}]}}

Description:
"""{description}""""#
    )
}

/// Strict parse-then-validate of an extraction reply.
pub fn parse_extraction_response(
    raw: &str,
    max_items: usize,
) -> Result<Vec<ExtractedSubItem>, ModelOutputError> {
    let object = parse_model_object(raw)?;
    let subtasks = required_list(&object, "subtasks")?;

    let mut items: Vec<ExtractedSubItem> = Vec::new();
    for entry in subtasks {
        if items.len() >= max_items {
            break;
        }
        let raw_content = match entry {
            Value::Object(fields) => fields.get("content").and_then(Value::as_str),
            Value::String(text) => Some(text.as_str()),
            _ => None,
        };
        let Some(content) = raw_content.and_then(normalize_model_content) else {
            continue;
        };
        if items.iter().any(|item| item.content == content) {
            continue;
        }
        items.push(ExtractedSubItem::pending(content));
    }
    Ok(items)
}

/// Trim, drop trailing periods, and truncate at a word boundary.
pub fn normalize_fallback_content(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_end_matches('.').trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(truncate_at_word_boundary(trimmed, SUB_ITEM_MAX_CHARS))
}

/// Fallback normalization plus capitalization of a leading lowercase letter.
pub fn normalize_model_content(raw: &str) -> Option<String> {
    let normalized = normalize_fallback_content(&collapse_whitespace(raw))?;
    let mut chars = normalized.chars();
    let first = chars.next()?;
    if first.is_lowercase() {
        Some(first.to_uppercase().chain(chars).collect())
    } else {
        Some(normalized)
    }
}

fn truncate_at_word_boundary(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    let cut = match head.rfind(char::is_whitespace) {
        Some(index) if index > 0 => head[..index].trim_end(),
        _ => head.as_str(),
    };
    format!("{cut}...")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use proptest::prelude::*;
    use serde_json::json;

    use super::{
        normalize_model_content, parse_extraction_response, ExtractedSubItem, ExtractionSource,
        SubtaskExtractor, DEFAULT_KEYWORDS, SUB_ITEM_MAX_CHARS,
    };
    use crate::completion::test_support::{ScriptedLlm, ScriptedReply};
    use crate::completion::CompletionModel;
    use crate::model_json::ModelOutputError;

    fn extractor_with(client: ScriptedLlm) -> (SubtaskExtractor, Arc<ScriptedLlm>) {
        let client = Arc::new(client);
        let model = Arc::new(CompletionModel::new(
            client.clone(),
            "gpt-4o-mini",
            Duration::from_millis(200),
        ));
        let keywords: Vec<String> = DEFAULT_KEYWORDS.iter().map(|k| k.to_string()).collect();
        let extractor = SubtaskExtractor::new(model, &keywords, 400).expect("extractor");
        (extractor, client)
    }

    fn current_thread_runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime")
    }

    fn well_formed(items: &[ExtractedSubItem], max_items: usize) -> Result<(), TestCaseError> {
        prop_assert!(items.len() <= max_items);
        for item in items {
            prop_assert!(!item.content.is_empty());
            prop_assert_eq!(item.content.trim(), item.content.as_str());
            prop_assert!(!item.is_done);
        }
        Ok(())
    }

    #[tokio::test]
    async fn functional_model_unavailable_falls_back_to_line_candidates() {
        let (extractor, _) = extractor_with(ScriptedLlm::unavailable());
        let extraction = extractor
            .extract(
                "OPS-1",
                "Prepare quarterly report.\nShare with finance team.",
                2,
            )
            .await;

        assert_eq!(extraction.source, ExtractionSource::Fallback);
        let contents: Vec<&str> = extraction
            .items
            .iter()
            .map(|item| item.content.as_str())
            .collect();
        assert_eq!(
            contents,
            vec!["Prepare quarterly report", "Share with finance team"]
        );
        assert!(extraction.items.iter().all(|item| !item.is_done));
    }

    #[tokio::test]
    async fn functional_fenced_model_reply_is_parsed_and_capitalized() {
        let (extractor, client) = extractor_with(ScriptedLlm::text(
            "```json\n{\"task_key\":\"X-1\",\"subtasks\":[{\"content\":\"draft memo\"}]}\n```",
        ));
        let extraction = extractor.extract("X-1", "Draft the memo for legal.", 3).await;

        assert_eq!(extraction.source, ExtractionSource::Model);
        assert_eq!(extraction.items.len(), 1);
        assert_eq!(extraction.items[0].content, "Draft memo");
        assert!(!extraction.items[0].is_done);
        let prompts = client.prompts.lock().expect("prompts");
        assert!(prompts[0].contains("at most 3"));
        assert!(prompts[0].contains("Draft the memo for legal."));
    }

    #[tokio::test]
    async fn regression_missing_subtasks_field_triggers_fallback() {
        let (extractor, _) = extractor_with(ScriptedLlm::text("{\"items\": []}"));
        let extraction = extractor
            .extract("X-2", "Request VPN access. Book a meeting room.", 1)
            .await;
        assert_eq!(extraction.source, ExtractionSource::Fallback);
        assert_eq!(extraction.items.len(), 1);
        assert_eq!(extraction.items[0].content, "Request VPN access");
    }

    #[tokio::test]
    async fn regression_model_timeout_triggers_fallback() {
        let (extractor, _) = extractor_with(ScriptedLlm::with_replies(vec![ScriptedReply::Stall(
            Duration::from_secs(2),
        )]));
        let extraction = extractor.extract("X-3", "Prepare onboarding deck", 2).await;
        assert_eq!(extraction.source, ExtractionSource::Fallback);
        assert_eq!(extraction.items[0].content, "Prepare onboarding deck");
    }

    #[tokio::test]
    async fn unit_empty_description_or_zero_budget_short_circuits() {
        let (extractor, client) = extractor_with(ScriptedLlm::text("{\"subtasks\": []}"));
        let blank = extractor.extract("X-4", "   \n ", 3).await;
        assert_eq!(blank.source, ExtractionSource::EmptyDescription);
        assert!(blank.items.is_empty());
        let zero = extractor.extract("X-4", "Prepare report", 0).await;
        assert!(zero.items.is_empty());
        assert_eq!(client.call_count(), 0);
    }

    #[test]
    fn functional_fallback_prefers_keyword_candidates_in_source_order() {
        let (extractor, _) = extractor_with(ScriptedLlm::unavailable());
        let description = "Sync with Ali.\nBook travel.\nRequest budget approval.\nPrepare slides.";
        let items = extractor.fallback(description, 2);
        let contents: Vec<&str> = items.iter().map(|item| item.content.as_str()).collect();
        assert_eq!(contents, vec!["Request budget approval", "Prepare slides"]);
    }

    #[test]
    fn unit_fallback_is_deterministic_and_bounded() {
        let (extractor, _) = extractor_with(ScriptedLlm::unavailable());
        let description = "Collect metrics! Write summary? Send it.";
        let first = extractor.fallback(description, 2);
        let second = extractor.fallback(description, 2);
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].content, "Collect metrics");
        assert!(extractor.fallback(description, 0).is_empty());
        for item in extractor.fallback(description, 10) {
            assert_eq!(item.content, item.content.trim());
            assert!(!item.content.is_empty());
        }
    }

    #[test]
    fn unit_parse_extraction_response_caps_and_skips_invalid_entries() {
        let raw = r#"{"subtasks": [{"content": "  "}, 7, "ship release.", {"content": "write notes"}, {"content": "extra"}]}"#;
        let items = parse_extraction_response(raw, 2).expect("items");
        let contents: Vec<&str> = items.iter().map(|item| item.content.as_str()).collect();
        assert_eq!(contents, vec!["Ship release", "Write notes"]);

        assert!(matches!(
            parse_extraction_response(r#"{"subtasks": {}}"#, 2),
            Err(ModelOutputError::MissingList("subtasks"))
        ));
    }

    #[test]
    fn regression_long_content_truncates_at_word_boundary() {
        let long = format!("{} tail", "word ".repeat(40));
        let normalized = normalize_model_content(&long).expect("content");
        assert!(normalized.ends_with("..."));
        assert!(normalized.chars().count() <= SUB_ITEM_MAX_CHARS + 3);
        assert!(!normalized.trim_end_matches("...").ends_with(' '));
        assert_eq!(normalize_model_content("ödev hazırla."), Some("Ödev hazırla".to_string()));
    }

    proptest! {
        #[test]
        fn property_fallback_is_bounded_trimmed_and_deterministic(
            description in "[A-Za-z .!?,\n\t]{0,240}",
            max_items in 0usize..6,
        ) {
            let (extractor, _) = extractor_with(ScriptedLlm::unavailable());
            let first = extractor.fallback(&description, max_items);
            well_formed(&first, max_items)?;
            let second = extractor.fallback(&description, max_items);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn property_model_reply_items_respect_budget(
            contents in proptest::collection::vec(any::<String>(), 0..8),
            max_items in 0usize..6,
        ) {
            let subtasks: Vec<_> = contents.iter().map(|content| json!({ "content": content })).collect();
            let raw = json!({ "task_key": "X-1", "subtasks": subtasks }).to_string();
            let items = parse_extraction_response(&raw, max_items).expect("well-formed reply");
            well_formed(&items, max_items)?;
        }

        #[test]
        fn property_extract_without_model_never_exceeds_budget(
            description in any::<String>(),
            max_items in 0usize..6,
        ) {
            let (extractor, _) = extractor_with(ScriptedLlm::unavailable());
            let extraction = current_thread_runtime()
                .block_on(extractor.extract("X-9", &description, max_items));
            well_formed(&extraction.items, max_items)?;
            if extraction.source == ExtractionSource::EmptyDescription {
                prop_assert!(extraction.items.is_empty());
            }
        }
    }
}
