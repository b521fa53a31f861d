//! Interpretation of `GET /history/{prompt_id}` responses.
//!
//! The worker answers with a map keyed by prompt ID. An absent key means
//! the prompt has not finished yet.

use serde::Deserialize;

/// One prompt's history record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryEntry {
    /// Node ID to output descriptor.
    #[serde(default)]
    pub outputs: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub errors: Vec<serde_json::Value>,
    #[serde(default)]
    pub status: Option<HistoryStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryStatus {
    #[serde(default)]
    pub status_str: Option<String>,
    #[serde(default)]
    pub completed: bool,
}

/// What a history response says about one prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryState {
    /// No record yet, or a record without outputs.
    Pending,
    /// The prompt produced outputs on this many nodes.
    Completed { outputs: usize },
    /// The worker recorded errors for the prompt.
    Failed { errors: Vec<String> },
}

/// Extract the record for `prompt_id`, if the worker has one.
pub fn history_entry(
    history: &serde_json::Value,
    prompt_id: &str,
) -> Result<Option<HistoryEntry>, serde_json::Error> {
    match history.get(prompt_id) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(entry) => HistoryEntry::deserialize(entry).map(Some),
    }
}

/// Classify a history response for `prompt_id`.
pub fn history_state(
    history: &serde_json::Value,
    prompt_id: &str,
) -> Result<HistoryState, serde_json::Error> {
    let Some(entry) = history_entry(history, prompt_id)? else {
        return Ok(HistoryState::Pending);
    };

    let status_error = entry
        .status
        .as_ref()
        .and_then(|s| s.status_str.as_deref())
        .is_some_and(|s| s.eq_ignore_ascii_case("error"));
    if !entry.errors.is_empty() || status_error {
        let mut errors: Vec<String> = entry.errors.iter().map(describe_error).collect();
        if errors.is_empty() {
            errors.push("worker reported status 'error'".to_string());
        }
        return Ok(HistoryState::Failed { errors });
    }

    if entry.outputs.is_empty() {
        Ok(HistoryState::Pending)
    } else {
        Ok(HistoryState::Completed {
            outputs: entry.outputs.len(),
        })
    }
}

fn describe_error(error: &serde_json::Value) -> String {
    match error {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
