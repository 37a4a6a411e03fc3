//! Batch phone-candidate classification against a Gemini-style
//! `generateContent` endpoint.
//!
//! One request per site carries every candidate as JSON inside the prompt.
//! The response must echo the candidates in order; mismatched items are
//! re-sent in bounded retry passes. Transport faults are retried with
//! backoff; anything unrecoverable becomes a per-item error record instead
//! of an error return, so one bad site never stops the run.

pub mod parse;

use std::path::Path;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, error, info, warn};

use phonescout_core::config::{LlmConfig, PhoneConfig};
use phonescout_core::{ClassifiedPhone, PhoneCandidate, TokenUsage};
use phonescout_phone::NormalizedPhone;

use crate::parse::{extract_json_block, LlmExtractionResult};

/// The literal the prompt template marks for candidate substitution.
pub const PROMPT_PLACEHOLDER: &str =
    "[Insert JSON list of (candidate_number, source_url, snippet) objects here]";

pub const TEMPLATE_COPY_FILENAME: &str = "llm_prompt_template.txt";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);
const TRANSPORT_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_SECS: u64 = 2;
const BACKOFF_CAP_SECS: u64 = 10;

pub mod tags {
    pub const PERSISTENT_MISMATCH: &str = "Error_PersistentMismatchAfterRetries";
    pub const INITIAL_JSON_PARSE: &str = "Error_InitialJsonParse";
    pub const INITIAL_EMPTY_RESPONSE: &str = "Error_InitialEmptyResponse";
    pub const INITIAL_NO_JSON_BLOCK: &str = "Error_InitialNoJsonBlock";
    pub const NOT_PROCESSED: &str = "Error_NotProcessed";
    pub const PROMPT_LOADING: &str = "Error_PromptLoading";
    pub const ITEM_COUNT_MISMATCH: &str = "Error_LLMItemCountMismatch";

    pub fn initial_api_error(kind: &str) -> String {
        format!("Error_InitialApiError_{kind}")
    }
}

/// Everything one `classify` call produced.
#[derive(Debug)]
pub struct ClassifyOutput {
    /// Index-aligned with the input candidates.
    pub results: Vec<ClassifiedPhone>,
    pub raw_response: Option<String>,
    pub token_usage: TokenUsage,
}

pub struct LlmClassifier {
    client: reqwest::Client,
    llm: LlmConfig,
    phone: PhoneConfig,
}

#[derive(Debug)]
enum PassFailure {
    /// Transport or API failure; `kind` feeds the error tag.
    Api { kind: String, detail: String },
    EmptyResponse,
    NoJsonBlock,
    JsonParse,
    CountMismatch,
}

struct PassSuccess {
    items: Vec<parse::LlmNumberItem>,
    raw: String,
}

impl LlmClassifier {
    pub fn new(llm: LlmConfig, phone: PhoneConfig) -> Result<Self, phonescout_core::PipelineError> {
        if llm.api_key.trim().is_empty() {
            return Err(phonescout_core::PipelineError::Config(
                "LLM API key is not set".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| phonescout_core::PipelineError::Config(format!("llm client: {e}")))?;
        Ok(Self { client, llm, phone })
    }

    /// Classify one site's candidates. The result list is aligned with the
    /// input; failures surface as tagged error items, never as `Err`.
    pub async fn classify(
        &self,
        candidates: &[PhoneCandidate],
        prompt_template_path: &Path,
        context_dir: &Path,
        file_prefix: &str,
    ) -> ClassifyOutput {
        let mut usage = TokenUsage::default();
        if candidates.is_empty() {
            return ClassifyOutput {
                results: Vec::new(),
                raw_response: None,
                token_usage: usage,
            };
        }

        let template = match std::fs::read_to_string(prompt_template_path) {
            Ok(template) => template,
            Err(e) => {
                error!(path = %prompt_template_path.display(), "prompt template unreadable: {e}");
                return ClassifyOutput {
                    results: error_items(candidates, tags::PROMPT_LOADING),
                    raw_response: Some(format!("Error loading prompt: {e}")),
                    token_usage: usage,
                };
            }
        };
        self.persist_template_once(context_dir, &template);
        persist_context(context_dir, file_prefix, "_llm_input_data.json", &candidate_json(candidates));

        let mut results: Vec<Option<ClassifiedPhone>> = vec![None; candidates.len()];

        // Initial pass over the full batch.
        let first_pass = self.run_pass(&template, candidates, &mut usage).await;
        let raw_response = match &first_pass {
            Ok(success) => Some(success.raw.clone()),
            Err(PassFailure::Api { detail, kind }) => {
                Some(json!({ "error": detail, "type": kind }).to_string())
            }
            Err(_) => None,
        };
        if let Some(raw) = &raw_response {
            persist_context(context_dir, file_prefix, "_llm_raw_output.json", raw);
        }

        let mut needs_retry: Vec<usize> = Vec::new();
        match first_pass {
            Ok(success) => {
                for (i, item) in success.items.into_iter().enumerate() {
                    if item.number == candidates[i].number {
                        results[i] = Some(self.successful_item(item, &candidates[i]));
                    } else {
                        debug!(
                            input = %candidates[i].number,
                            output = %item.number,
                            "number mismatch, queueing for retry"
                        );
                        needs_retry.push(i);
                    }
                }
            }
            Err(failure) => {
                let tag = failure_tag(&failure);
                return ClassifyOutput {
                    results: error_items(candidates, &tag),
                    raw_response,
                    token_usage: usage,
                };
            }
        }

        // Bounded retry passes over the still-mismatched subset.
        let mut pass = 0;
        while !needs_retry.is_empty() && pass < self.llm.max_retries_on_number_mismatch {
            pass += 1;
            info!(
                pass,
                items = needs_retry.len(),
                prefix = file_prefix,
                "re-sending mismatched candidates"
            );
            let subset: Vec<PhoneCandidate> =
                needs_retry.iter().map(|&i| candidates[i].clone()).collect();

            match self.run_pass(&template, &subset, &mut usage).await {
                Ok(success) => {
                    persist_context(
                        context_dir,
                        file_prefix,
                        &format!("_llm_raw_output_retry{pass}.json"),
                        &success.raw,
                    );
                    let mut still_mismatched = Vec::new();
                    for (slot, item) in needs_retry.iter().zip(success.items.into_iter()) {
                        if item.number == candidates[*slot].number {
                            results[*slot] = Some(self.successful_item(item, &candidates[*slot]));
                        } else {
                            still_mismatched.push(*slot);
                        }
                    }
                    needs_retry = still_mismatched;
                }
                Err(failure) => {
                    warn!(pass, "retry pass failed: {failure:?}, keeping items for next pass");
                }
            }
        }

        for &i in &needs_retry {
            results[i] = Some(error_item(&candidates[i], tags::PERSISTENT_MISMATCH));
        }

        let results = results
            .into_iter()
            .enumerate()
            .map(|(i, slot)| slot.unwrap_or_else(|| error_item(&candidates[i], tags::NOT_PROCESSED)))
            .collect();

        ClassifyOutput {
            results,
            raw_response,
            token_usage: usage,
        }
    }

    /// One prompt-render + request + parse + count check.
    async fn run_pass(
        &self,
        template: &str,
        candidates: &[PhoneCandidate],
        usage: &mut TokenUsage,
    ) -> Result<PassSuccess, PassFailure> {
        let prompt = template.replace(PROMPT_PLACEHOLDER, &candidate_json(candidates));
        let (text, pass_usage) = self.send_with_backoff(&prompt).await?;
        usage.add(&pass_usage);

        let Some(text) = text.filter(|t| !t.trim().is_empty()) else {
            return Err(PassFailure::EmptyResponse);
        };
        let Some(block) = extract_json_block(&text) else {
            let preview: String = text.chars().take(200).collect();
            warn!("no JSON block in model output: {preview}");
            return Err(PassFailure::NoJsonBlock);
        };
        let parsed: LlmExtractionResult = match serde_json::from_str(block) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("model output failed schema validation: {e}");
                return Err(PassFailure::JsonParse);
            }
        };
        if parsed.extracted_numbers.len() != candidates.len() {
            error!(
                input = candidates.len(),
                output = parsed.extracted_numbers.len(),
                "item count mismatch, cannot map results"
            );
            return Err(PassFailure::CountMismatch);
        }
        Ok(PassSuccess {
            items: parsed.extracted_numbers,
            raw: text,
        })
    }

    /// Send one generateContent request, retrying transient failures with
    /// exponential backoff (2s, 4s, capped at 10s).
    async fn send_with_backoff(
        &self,
        prompt: &str,
    ) -> Result<(Option<String>, TokenUsage), PassFailure> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.llm.endpoint_base.trim_end_matches('/'),
            self.llm.model_name,
            self.llm.api_key
        );
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "candidateCount": 1,
                "temperature": self.llm.temperature,
                "maxOutputTokens": self.llm.max_tokens,
            }
        });

        let mut last_failure = PassFailure::Api {
            kind: "Unknown".into(),
            detail: "no attempt made".into(),
        };

        for attempt in 1..=TRANSPORT_ATTEMPTS {
            match self.client.post(&url).json(&body).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return match response.json::<serde_json::Value>().await {
                            Ok(value) => Ok(parse_generate_response(&value)),
                            Err(e) => Err(PassFailure::Api {
                                kind: "BodyRead".into(),
                                detail: e.to_string(),
                            }),
                        };
                    }
                    let retryable = status.as_u16() == 429 || status.is_server_error();
                    let kind = if status.as_u16() == 429 {
                        "RateLimited".to_string()
                    } else if status.is_server_error() {
                        "ServerError".to_string()
                    } else {
                        format!("Http_{}", status.as_u16())
                    };
                    let detail = response.text().await.unwrap_or_default();
                    last_failure = PassFailure::Api { kind, detail };
                    if !retryable {
                        return Err(last_failure);
                    }
                }
                Err(e) => {
                    let kind = if e.is_timeout() { "Timeout" } else { "Network" };
                    last_failure = PassFailure::Api {
                        kind: kind.to_string(),
                        detail: e.to_string(),
                    };
                    if !(e.is_timeout() || e.is_connect() || e.is_request()) {
                        return Err(last_failure);
                    }
                }
            }

            if attempt < TRANSPORT_ATTEMPTS {
                let delay = (BACKOFF_BASE_SECS << (attempt - 1)).min(BACKOFF_CAP_SECS);
                debug!(attempt, delay_secs = delay, "transient LLM transport failure, backing off");
                tokio::time::sleep(Duration::from_secs(delay)).await;
            }
        }

        Err(last_failure)
    }

    /// Enrich a matched item: normalize the number, copy source and company
    /// from the input (the model is never trusted to echo them).
    fn successful_item(
        &self,
        item: parse::LlmNumberItem,
        candidate: &PhoneCandidate,
    ) -> ClassifiedPhone {
        let hints = &self.phone.target_country_codes;
        let number = match phonescout_phone::normalize_phone(
            &item.number,
            hints,
            Some(&self.phone.default_region_code),
        ) {
            NormalizedPhone::E164(e164) => e164,
            _ => {
                debug!(number = %item.number, "classified number kept un-normalized");
                item.number
            }
        };
        ClassifiedPhone {
            number,
            phone_type: item.phone_type,
            classification: item.classification,
            source_url: candidate.source_url.clone(),
            original_input_company_name: candidate.original_input_company_name.clone(),
            error_tag: None,
        }
    }

    fn persist_template_once(&self, context_dir: &Path, template: &str) {
        let Some(run_dir) = context_dir.parent() else {
            return;
        };
        let path = run_dir.join(TEMPLATE_COPY_FILENAME);
        if path.exists() {
            return;
        }
        if let Err(e) = std::fs::write(&path, template) {
            warn!(path = %path.display(), "could not persist prompt template: {e}");
        }
    }
}

fn candidate_json(candidates: &[PhoneCandidate]) -> String {
    serde_json::to_string_pretty(candidates).unwrap_or_else(|_| "[]".to_string())
}

fn failure_tag(failure: &PassFailure) -> String {
    match failure {
        PassFailure::Api { kind, .. } => tags::initial_api_error(kind),
        PassFailure::EmptyResponse => tags::INITIAL_EMPTY_RESPONSE.to_string(),
        PassFailure::NoJsonBlock => tags::INITIAL_NO_JSON_BLOCK.to_string(),
        PassFailure::JsonParse => tags::INITIAL_JSON_PARSE.to_string(),
        PassFailure::CountMismatch => tags::ITEM_COUNT_MISMATCH.to_string(),
    }
}

fn error_item(candidate: &PhoneCandidate, tag: &str) -> ClassifiedPhone {
    ClassifiedPhone {
        number: candidate.number.clone(),
        phone_type: tag.to_string(),
        classification: "Non-Business".to_string(),
        source_url: candidate.source_url.clone(),
        original_input_company_name: candidate.original_input_company_name.clone(),
        error_tag: Some(tag.to_string()),
    }
}

fn error_items(candidates: &[PhoneCandidate], tag: &str) -> Vec<ClassifiedPhone> {
    candidates.iter().map(|c| error_item(c, tag)).collect()
}

fn persist_context(context_dir: &Path, prefix: &str, suffix: &str, content: &str) {
    if let Err(e) = std::fs::create_dir_all(context_dir) {
        warn!(dir = %context_dir.display(), "cannot create llm context dir: {e}");
        return;
    }
    let path = context_dir.join(format!("{prefix}{suffix}"));
    if let Err(e) = std::fs::write(&path, content) {
        warn!(path = %path.display(), "could not persist llm context file: {e}");
    }
}

/// Pull the concatenated text and token usage out of a generateContent
/// response body.
fn parse_generate_response(value: &serde_json::Value) -> (Option<String>, TokenUsage) {
    let text = value
        .get("candidates")
        .and_then(|c| c.get(0))
        .and_then(|c| c.pointer("/content/parts"))
        .and_then(|parts| parts.as_array())
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("")
        })
        .filter(|t| !t.is_empty());

    let usage_value = value.get("usageMetadata");
    let count = |key: &str| {
        usage_value
            .and_then(|u| u.get(key))
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
    };
    let usage = TokenUsage {
        prompt_tokens: count("promptTokenCount"),
        completion_tokens: count("candidatesTokenCount"),
        total_tokens: count("totalTokenCount"),
    };
    (text, usage)
}
