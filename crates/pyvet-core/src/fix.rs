//! Fix stage: ask the model for a revised file and recover it from the reply.
//!
//! Replies are parsed in layers, strictest first:
//! 1. the whole reply as a JSON object with a `code` field,
//! 2. JSON inside a fenced block,
//! 3. the first balanced `{...}` object in free text that carries `code`,
//! 4. the body of the first fenced block, or the reply with stray fences
//!    stripped.
//!
//! When nothing non-empty is recovered the input code is returned as is.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::backend::{dispatch, GenerateRequest, InferenceBackend};
use crate::config::AuditConfig;
use crate::error::Result;
use crate::issues::IssueList;
use crate::prompt::{PromptTemplate, TemplateKind, CODE_PLACEHOLDER, ISSUES_PLACEHOLDER};

/// Appended to every fix prompt.
pub const OUTPUT_CONTRACT: &str = "\n\nRespond with a single JSON object of the form \
{\"code\": \"<the complete revised file>\"} and nothing else. \
If you cannot produce JSON, respond with the complete revised file in one \
```python fenced block.";

/// Which parsing layer recovered the code.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FixParse {
    DirectJson,
    FencedJson,
    EmbeddedJson,
    FencedCode,
    PlainText,
}

/// Result of one fix request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixOutcome {
    pub code: String,

    /// `None` when the reply was unusable and the input was returned.
    pub recovered_by: Option<FixParse>,
}

#[derive(Debug, Deserialize)]
struct FixPayload {
    code: String,
}

fn fence_regex() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n(.*?)```").ok())
        .as_ref()
}

fn decode_payload(text: &str) -> Option<String> {
    serde_json::from_str::<FixPayload>(text.trim())
        .ok()
        .map(|p| p.code)
}

fn non_empty(code: String) -> Option<String> {
    if code.trim().is_empty() {
        None
    } else {
        Some(code)
    }
}

/// Balanced `{...}` fragment starting at byte `start`, skipping braces in strings.
fn balanced_object(text: &str, start: usize) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (offset, c) in text[start..].char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

fn embedded_payload(text: &str) -> Option<String> {
    text.match_indices('{')
        .filter_map(|(start, _)| balanced_object(text, start))
        .find_map(decode_payload)
}

fn strip_stray_fences(text: &str) -> &str {
    let mut body = text.trim();
    if body.starts_with("```") {
        body = match body.find('\n') {
            Some(newline) => &body[newline + 1..],
            None => "",
        };
    }
    if let Some(stripped) = body.trim_end().strip_suffix("```") {
        body = stripped;
    }
    body
}

/// Recover replacement code from a model reply.
///
/// A decodable payload whose `code` is blank ends the search.
pub fn parse_fix_response(response: &str) -> Option<(String, FixParse)> {
    if let Some(code) = decode_payload(response) {
        return non_empty(code).map(|c| (c, FixParse::DirectJson));
    }

    let fenced: Vec<&str> = match fence_regex() {
        Some(re) => re
            .captures_iter(response)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect(),
        None => Vec::new(),
    };

    if let Some(code) = fenced.iter().find_map(|body| decode_payload(body)) {
        return non_empty(code).map(|c| (c, FixParse::FencedJson));
    }

    if let Some(code) = embedded_payload(response) {
        return non_empty(code).map(|c| (c, FixParse::EmbeddedJson));
    }

    let (text, layer) = match fenced.first() {
        Some(body) => (body.trim(), FixParse::FencedCode),
        None => (strip_stray_fences(response).trim(), FixParse::PlainText),
    };
    non_empty(text.to_string()).map(|c| (c, layer))
}

/// The fix stage.
#[derive(Debug, Clone)]
pub struct FixStage {
    model: String,
    timeout: Duration,
    template: PromptTemplate,
    keep_alive: bool,
}

impl FixStage {
    pub fn new(model: impl Into<String>, timeout: Duration, template: PromptTemplate) -> Self {
        Self {
            model: model.into(),
            timeout,
            template,
            keep_alive: false,
        }
    }

    pub fn from_config(config: &AuditConfig) -> Result<Self> {
        let template = PromptTemplate::load(TemplateKind::Fix, config.paths.prompt_dir.as_deref())?;
        let mut stage = Self::new(config.models.fix.clone(), config.timeouts.fix(), template);
        stage.keep_alive = config.backend.keep_alive;
        Ok(stage)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Render the full fix prompt including the output contract.
    pub fn prompt(&self, code: &str, issues: &IssueList) -> String {
        let issue_text = issues.as_text();
        let mut prompt = self
            .template
            .render(&[(ISSUES_PLACEHOLDER, issue_text.as_str()), (CODE_PLACEHOLDER, code)]);
        prompt.push_str(OUTPUT_CONTRACT);
        prompt
    }

    /// Request a revision of `code` addressing `issues`.
    pub async fn fix(
        &self,
        backend: &dyn InferenceBackend,
        code: &str,
        issues: &IssueList,
    ) -> Result<FixOutcome> {
        let request = GenerateRequest::new(&self.model, self.prompt(code, issues), self.timeout)
            .with_keep_alive(self.keep_alive);
        let response = dispatch(backend, &request).await?;

        match parse_fix_response(&response) {
            Some((revised, layer)) => {
                debug!(model = %self.model, layer = ?layer, chars = revised.len(), "fix recovered");
                Ok(FixOutcome {
                    code: revised,
                    recovered_by: Some(layer),
                })
            }
            None => {
                warn!(model = %self.model, "fix response unusable; keeping current code");
                Ok(FixOutcome {
                    code: code.to_string(),
                    recovered_by: None,
                })
            }
        }
    }
}
