//! Completion verdicts for existing sub-items against a new report.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::completion::CompletionModel;
use crate::model_json::{parse_model_object, required_list, ModelOutputError};

const RECONCILER_SYSTEM_PROMPT: &str =
    "You are a careful progress auditor. Return only JSON.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubItemState {
    pub content: String,
    pub is_done: bool,
}

impl SubItemState {
    pub fn new(content: impl Into<String>, is_done: bool) -> Self {
        Self {
            content: content.into(),
            is_done,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationSource {
    Model,
    Fallback,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub items: Vec<SubItemState>,
    pub source: ReconciliationSource,
}

#[derive(Debug, Clone, PartialEq)]
/// One parsed verdict; `content` is `None` when the model did not echo it.
pub struct Verdict {
    pub content: Option<String>,
    pub is_done: bool,
}

pub struct StatusReconciler {
    model: Arc<CompletionModel>,
    max_output_tokens: u32,
}

impl StatusReconciler {
    pub fn new(model: Arc<CompletionModel>, max_output_tokens: u32) -> Self {
        Self {
            model,
            max_output_tokens,
        }
    }

    /// Output always has the input's length and order. Model failures return the input unchanged.
    pub async fn reconcile(
        &self,
        issue_key: &str,
        current: &[SubItemState],
        report_text: &str,
    ) -> Reconciliation {
        if current.is_empty() {
            return Reconciliation {
                items: Vec::new(),
                source: ReconciliationSource::Skipped,
            };
        }

        let prompt = build_reconciliation_prompt(issue_key, current, report_text);
        let verdicts = match self
            .model
            .complete(RECONCILER_SYSTEM_PROMPT, &prompt, self.max_output_tokens)
            .await
        {
            Ok(raw) => parse_reconciliation_response(&raw),
            Err(error) => {
                tracing::warn!(issue_key, %error, "status reconciliation model call failed; keeping previous state");
                return fallback(current);
            }
        };

        match verdicts {
            Ok(verdicts) => {
                if verdicts.len() != current.len() {
                    tracing::debug!(
                        issue_key,
                        expected = current.len(),
                        returned = verdicts.len(),
                        "reconciler returned a different item count"
                    );
                }
                Reconciliation {
                    items: merge_verdicts(current, &verdicts),
                    source: ReconciliationSource::Model,
                }
            }
            Err(error) => {
                tracing::warn!(issue_key, %error, "status reconciliation output malformed; keeping previous state");
                fallback(current)
            }
        }
    }
}

fn fallback(current: &[SubItemState]) -> Reconciliation {
    Reconciliation {
        items: current.to_vec(),
        source: ReconciliationSource::Fallback,
    }
}

pub fn build_reconciliation_prompt(
    issue_key: &str,
    current: &[SubItemState],
    report_text: &str,
) -> String {
    let items = Value::Array(
        current
            .iter()
            .map(|item| json!({ "content": item.content, "is_done": item.is_done }))
            .collect(),
    );
    let items_json = serde_json::to_string_pretty(&items).unwrap_or_else(|_| "[]".to_string());
    format!(
        r#"You are reviewing progress on tracker issue {issue_key}.
Below is the current list of sub-items and the worker's latest daily report.
Rules:
- Mark an item done only if the report clearly indicates it is complete.
- Keep items that are already done marked as done unless the report clearly says otherwise.
- Never invent, merge, reorder, or drop items; return exactly one entry per sub-item.
- Echo each item's content unchanged next to its verdict.
- Return JSON only, with no explanation or markdown.

Return JSON exactly in this shape:
{{"subtasks": [{{"content": "...", "is_done": true}}]}}

Sub-items:
{items_json}

Report:
"""{report_text}""""#
    )
}

/// Parses verdicts without judging their count; alignment is done by [`merge_verdicts`].
pub fn parse_reconciliation_response(raw: &str) -> Result<Vec<Verdict>, ModelOutputError> {
    let object = parse_model_object(raw)?;
    let entries = required_list(&object, "subtasks")?;
    Ok(entries.iter().map(parse_verdict).collect())
}

fn parse_verdict(entry: &Value) -> Verdict {
    let Value::Object(fields) = entry else {
        return Verdict {
            content: None,
            is_done: false,
        };
    };
    let content = fields
        .get("content")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|content| !content.is_empty())
        .map(str::to_string);
    Verdict {
        content,
        is_done: fields.get("is_done").map(coerce_is_done).unwrap_or(false),
    }
}

/// `true`, `"true"` (any case) and `1` count as done; everything else is not done.
pub fn coerce_is_done(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::String(text) => text.trim().eq_ignore_ascii_case("true"),
        Value::Number(number) => number.as_i64() == Some(1) || number.as_f64() == Some(1.0),
        _ => false,
    }
}

/// Aligns verdicts onto `current`.
///
/// Echoed content is matched exactly, then case-insensitively, each input consumed once.
/// Verdicts without echoed content take the input at their own position if it is still
/// unmatched. Inputs left unmatched keep their previous state.
pub fn merge_verdicts(current: &[SubItemState], verdicts: &[Verdict]) -> Vec<SubItemState> {
    let mut assigned: Vec<Option<bool>> = vec![None; current.len()];
    let mut pending: Vec<usize> = Vec::new();

    for (position, verdict) in verdicts.iter().enumerate() {
        let Some(content) = verdict.content.as_deref() else {
            continue;
        };
        let exact = (0..current.len())
            .find(|&index| assigned[index].is_none() && current[index].content.trim() == content);
        match exact {
            Some(index) => assigned[index] = Some(verdict.is_done),
            None => pending.push(position),
        }
    }
    for position in pending {
        let Some(content) = verdicts[position].content.as_deref() else {
            continue;
        };
        let loose = (0..current.len()).find(|&index| {
            assigned[index].is_none() && current[index].content.trim().eq_ignore_ascii_case(content)
        });
        if let Some(index) = loose {
            assigned[index] = Some(verdicts[position].is_done);
        }
    }
    for (position, verdict) in verdicts.iter().enumerate() {
        if verdict.content.is_none() && position < current.len() && assigned[position].is_none() {
            assigned[position] = Some(verdict.is_done);
        }
    }

    current
        .iter()
        .zip(assigned)
        .map(|(item, verdict)| SubItemState::new(item.content.clone(), verdict.unwrap_or(item.is_done)))
        .collect()
}
