//! HTTP reasoning provider implementation
//!
//! Implements `ReasoningProvider` on top of any OpenAI-compatible
//! `/v1/chat/completions` endpoint, asking for JSON-object responses.
//!
//! Configured from the `llm` section (`LLM_URL`, `LLM_MODEL` and
//! `LLM_API_KEY` override it).
//!
//! Every successful call appends a [`UsageRecord`] to the optional ledger,
//! priced with the configured [`LlmPricing`].

use super::error::{classify_llm_error, LlmError};
use super::models::{AlignmentVerdict, ExtractedTask, LlmPricing, ThreadSummary};
use super::traits::ReasoningProvider;
use crate::store::models::{MatchedPriorities, StrategicPriorities, Task, Thread, UsageRecord};
use crate::store::EngineStore;
use crate::LlmConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// HTTP-based reasoning provider using the OpenAI chat completions format.
#[derive(Clone)]
pub struct HttpReasoningProvider {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
    pricing: LlmPricing,
    ledger: Option<Arc<dyn EngineStore>>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    r#type: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// Alignment payload the model is asked to produce
#[derive(Debug, Deserialize)]
struct AlignmentPayload {
    score: f64,
    #[serde(default)]
    okrs: Vec<String>,
    #[serde(default)]
    focus_areas: Vec<String>,
    #[serde(default)]
    projects: Vec<String>,
    #[serde(default)]
    key_stakeholder: bool,
    #[serde(default)]
    rationale: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExtractionPayload {
    #[serde(default)]
    tasks: Vec<ExtractedTask>,
}

const ALIGNMENT_SYSTEM: &str = "You judge how well a work item serves a person's strategic \
priorities. Answer with a JSON object: {\"score\": number 0-5, \"okrs\": [..], \
\"focus_areas\": [..], \"projects\": [..], \"key_stakeholder\": bool, \"rationale\": string}. \
Only list priorities from the provided lists.";

const SUMMARY_SYSTEM: &str = "You summarize a conversation for a busy professional. Answer \
with a JSON object: {\"summary\": string, \"relevant_to_user\": bool}. relevant_to_user is \
true only when the reader is expected to act or decide.";

const EXTRACT_SYSTEM: &str = "You extract concrete action items for the reader from a \
conversation summary. Answer with a JSON object: {\"tasks\": [{\"title\": string, \
\"description\": string, \"due_at\": RFC3339 or null, \"impact\": 1-5, \"effort\": \
\"small\"|\"medium\"|\"large\", \"stakeholder\": \"none\"|\"internal\"|\"external\"|\"executive\", \
\"project\": string or null, \"requester\": string or null}]}. Return an empty list when \
nothing is asked of the reader.";

impl HttpReasoningProvider {
    /// Create a new provider with explicit configuration.
    pub fn new(
        url: String,
        model: String,
        api_key: Option<String>,
        pricing: LlmPricing,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            url,
            model,
            api_key,
            pricing,
            ledger: None,
        })
    }

    /// Build a provider from the `llm` config section.
    ///
    /// Returns `None` when the URL is empty or "disabled".
    pub fn from_config(config: &LlmConfig) -> Result<Option<Self>> {
        if config.url.is_empty() || config.url.eq_ignore_ascii_case("disabled") {
            return Ok(None);
        }
        Self::new(
            config.url.clone(),
            config.model.clone(),
            config.api_key.clone().filter(|k| !k.is_empty()),
            config.pricing(),
        )
        .map(Some)
    }

    /// Record every call's token usage in `ledger`
    pub fn with_ledger(mut self, ledger: Arc<dyn EngineStore>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Send one chat completion and decode its JSON content as `T`.
    async fn complete_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        system: &str,
        user: String,
    ) -> Result<T> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: 0.0,
            response_format: ResponseFormat {
                r#type: "json_object",
            },
        };

        let mut req = self.client.post(&self.url).json(&body);
        if let Some(ref key) = self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let response = req
            .send()
            .await
            .with_context(|| format!("Failed to connect to reasoning API at {}", self.url))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_llm_error(status.as_u16(), &text).into());
        }

        let resp: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::MalformedResponse(e.to_string()))?;

        let usage = resp.usage.unwrap_or_default();
        self.record_usage(operation, &usage).await;

        let content = resp
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::MalformedResponse("empty choices".into()))?;

        serde_json::from_str(strip_code_fence(&content))
            .map_err(|e| LlmError::MalformedResponse(format!("{}: {}", operation, e)).into())
    }

    async fn record_usage(&self, operation: &str, usage: &Usage) {
        let Some(ledger) = self.ledger.as_ref() else {
            return;
        };
        let cost = self
            .pricing
            .cost(usage.prompt_tokens, usage.completion_tokens);
        let record = UsageRecord::new(
            operation,
            usage.prompt_tokens,
            usage.completion_tokens,
            cost,
        );
        if let Err(e) = ledger.append_usage(&record).await {
            warn!(operation, "Failed to append usage record: {}", e);
        }
    }
}

/// Models sometimes wrap JSON in a ```json fence despite response_format
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

fn bullet_list(title: &str, items: &[String]) -> String {
    if items.is_empty() {
        return format!("{}: (none)\n", title);
    }
    let mut out = format!("{}:\n", title);
    for item in items {
        out.push_str("- ");
        out.push_str(item);
        out.push('\n');
    }
    out
}

fn alignment_prompt(task: &Task, priorities: &StrategicPriorities) -> String {
    let mut prompt = String::new();
    prompt.push_str(&bullet_list("OKRs", &priorities.okrs));
    prompt.push_str(&bullet_list("Focus areas", &priorities.focus_areas));
    prompt.push_str(&bullet_list("Projects", &priorities.projects));
    prompt.push_str(&bullet_list("Key stakeholders", &priorities.key_stakeholders));
    prompt.push_str(&format!(
        "\nWork item: {}\nDetails: {}\nOrigin: {}\n",
        task.title,
        task.description,
        task.source_descriptor()
    ));
    if let Some(due) = task.due_at {
        prompt.push_str(&format!("Due: {}\n", due.to_rfc3339()));
    }
    prompt
}

#[async_trait]
impl ReasoningProvider for HttpReasoningProvider {
    async fn evaluate_alignment(
        &self,
        task: &Task,
        priorities: &StrategicPriorities,
    ) -> Result<AlignmentVerdict> {
        let payload: AlignmentPayload = self
            .complete_json(
                "alignment",
                ALIGNMENT_SYSTEM,
                alignment_prompt(task, priorities),
            )
            .await?;

        Ok(AlignmentVerdict {
            score: payload.score.clamp(0.0, 5.0),
            matches: MatchedPriorities {
                okrs: payload.okrs,
                focus_areas: payload.focus_areas,
                projects: payload.projects,
                key_stakeholder: payload.key_stakeholder,
            },
            rationale: payload.rationale,
        })
    }

    async fn summarize_thread(&self, thread: &Thread) -> Result<ThreadSummary> {
        let prompt = format!(
            "Source: {}\nSubject: {}\n\n{}",
            thread.source.label(),
            thread.subject,
            thread.content
        );
        self.complete_json("summarize", SUMMARY_SYSTEM, prompt).await
    }

    async fn extract_tasks(&self, thread: &Thread, summary: &str) -> Result<Vec<ExtractedTask>> {
        let prompt = format!(
            "Source: {}\nSubject: {}\nSummary:\n{}",
            thread.source.label(),
            thread.subject,
            summary
        );
        let payload: ExtractionPayload = self
            .complete_json("extract", EXTRACT_SYSTEM, prompt)
            .await?;
        Ok(payload.tasks)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
