//! End-to-end classifier tests against a mock generateContent endpoint.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use serde_json::json;
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use phonescout_classifier::{tags, LlmClassifier, TEMPLATE_COPY_FILENAME};
use phonescout_core::config::{LlmConfig, PhoneConfig};
use phonescout_core::PhoneCandidate;

fn candidate(number: &str) -> PhoneCandidate {
    PhoneCandidate {
        number: number.to_string(),
        source_url: "http://acme.de/kontakt".to_string(),
        snippet: format!("Telefon: {number} erreichbar Mo-Fr"),
        original_input_company_name: "Acme GmbH".to_string(),
    }
}

fn classifier_for(server_uri: &str) -> LlmClassifier {
    let llm = LlmConfig {
        api_key: "test-key".to_string(),
        endpoint_base: server_uri.to_string(),
        max_retries_on_number_mismatch: 2,
        ..LlmConfig::default()
    };
    LlmClassifier::new(llm, PhoneConfig::default()).unwrap()
}

fn write_template(dir: &std::path::Path) -> PathBuf {
    let path = dir.join("prompt.txt");
    std::fs::write(
        &path,
        format!(
            "Classify these phone candidates.\n{}\nReturn JSON.",
            phonescout_classifier::PROMPT_PLACEHOLDER
        ),
    )
    .unwrap();
    path
}

fn generate_body(numbers: &[(&str, &str, &str)], prompt: u64, completion: u64) -> serde_json::Value {
    let extracted: Vec<_> = numbers
        .iter()
        .map(|(number, phone_type, classification)| {
            json!({ "number": number, "type": phone_type, "classification": classification })
        })
        .collect();
    json!({
        "candidates": [{ "content": { "parts": [{
            "text": json!({ "extracted_numbers": extracted }).to_string()
        }] } }],
        "usageMetadata": {
            "promptTokenCount": prompt,
            "candidatesTokenCount": completion,
            "totalTokenCount": prompt + completion
        }
    })
}

#[tokio::test]
async fn aligned_response_classifies_and_normalizes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/v1beta/models/.*:generateContent$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(generate_body(
            &[("+49 30 123456", "Main Line", "Primary")],
            100,
            20,
        )))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let context_dir = dir.path().join("run/llm_context");
    let template = write_template(dir.path());
    let classifier = classifier_for(&server.uri());

    let output = classifier
        .classify(&[candidate("+49 30 123456")], &template, &context_dir, "CANONICAL_acme_de")
        .await;

    assert_eq!(output.results.len(), 1);
    let result = &output.results[0];
    assert_eq!(result.number, "+4930123456", "post-normalization to E.164");
    assert_eq!(result.phone_type, "Main Line");
    assert_eq!(result.classification, "Primary");
    assert_eq!(result.source_url, "http://acme.de/kontakt");
    assert_eq!(result.original_input_company_name, "Acme GmbH");
    assert!(result.error_tag.is_none());
    assert_eq!(output.token_usage.total_tokens, 120);

    // Context artifacts: template copy in the run dir, input + raw output.
    assert!(context_dir.parent().unwrap().join(TEMPLATE_COPY_FILENAME).exists());
    assert!(context_dir.join("CANONICAL_acme_de_llm_input_data.json").exists());
    assert!(context_dir.join("CANONICAL_acme_de_llm_raw_output.json").exists());
}

#[tokio::test]
async fn permuted_first_pass_is_fixed_by_retry_and_tokens_sum() {
    let server = MockServer::start().await;
    let attempt = AtomicU32::new(0);

    Mock::given(method("POST"))
        .and(path_regex(r":generateContent$"))
        .respond_with(move |_: &Request| {
            let n = attempt.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                // Both numbers come back, but swapped.
                ResponseTemplate::new(200).set_body_json(generate_body(
                    &[
                        ("+49 30 222222", "Fax", "Secondary"),
                        ("+49 30 111111", "Main Line", "Primary"),
                    ],
                    50,
                    10,
                ))
            } else {
                // Retry pass re-sends the two mismatched items, aligned now.
                ResponseTemplate::new(200).set_body_json(generate_body(
                    &[
                        ("+49 30 111111", "Main Line", "Primary"),
                        ("+49 30 222222", "Fax", "Secondary"),
                    ],
                    30,
                    8,
                ))
            }
        })
        .expect(2)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let context_dir = dir.path().join("run/llm_context");
    let template = write_template(dir.path());
    let classifier = classifier_for(&server.uri());

    let candidates = [candidate("+49 30 111111"), candidate("+49 30 222222")];
    let output = classifier
        .classify(&candidates, &template, &context_dir, "CANONICAL_acme_de")
        .await;

    assert_eq!(output.results[0].number, "+4930111111");
    assert_eq!(output.results[0].phone_type, "Main Line");
    assert_eq!(output.results[1].number, "+4930222222");
    assert_eq!(output.results[1].phone_type, "Fax");
    assert!(output.results.iter().all(|r| r.error_tag.is_none()));
    assert_eq!(output.token_usage.prompt_tokens, 80);
    assert_eq!(output.token_usage.total_tokens, 98);
}

#[tokio::test]
async fn short_result_list_tags_every_item_count_mismatch() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path_regex(r":generateContent$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(generate_body(
            &[("+49 30 111111", "Main Line", "Primary")],
            10,
            5,
        )))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let template = write_template(dir.path());
    let classifier = classifier_for(&server.uri());

    let candidates = [candidate("+49 30 111111"), candidate("+49 30 222222")];
    let output = classifier
        .classify(&candidates, &template, &dir.path().join("run/llm_context"), "CANONICAL_x")
        .await;

    assert_eq!(output.results.len(), 2);
    for result in &output.results {
        assert_eq!(result.error_tag.as_deref(), Some(tags::ITEM_COUNT_MISMATCH));
        assert_eq!(result.classification, "Non-Business");
    }
    // Input numbers are preserved on error items.
    assert_eq!(output.results[0].number, "+49 30 111111");
}

#[tokio::test]
async fn prose_without_json_is_no_json_block() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path_regex(r":generateContent$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{ "content": { "parts": [{ "text": "I could not find any numbers." }] } }]
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let template = write_template(dir.path());
    let classifier = classifier_for(&server.uri());

    let output = classifier
        .classify(&[candidate("+49 30 111111")], &template, &dir.path().join("c"), "CANONICAL_x")
        .await;
    assert_eq!(
        output.results[0].error_tag.as_deref(),
        Some(tags::INITIAL_NO_JSON_BLOCK)
    );
}

#[tokio::test]
async fn transient_server_errors_are_retried_then_succeed() {
    let server = MockServer::start().await;
    let attempt = AtomicU32::new(0);

    Mock::given(method("POST"))
        .and(path_regex(r":generateContent$"))
        .respond_with(move |_: &Request| {
            if attempt.fetch_add(1, Ordering::SeqCst) == 0 {
                ResponseTemplate::new(503)
            } else {
                ResponseTemplate::new(200).set_body_json(generate_body(
                    &[("+49 30 111111", "Main Line", "Primary")],
                    10,
                    5,
                ))
            }
        })
        .expect(2)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let template = write_template(dir.path());
    let classifier = classifier_for(&server.uri());

    let output = classifier
        .classify(&[candidate("+49 30 111111")], &template, &dir.path().join("c"), "CANONICAL_x")
        .await;
    assert!(output.results[0].error_tag.is_none());
}

#[tokio::test]
async fn client_error_fails_fast_with_api_tag() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path_regex(r":generateContent$"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let template = write_template(dir.path());
    let classifier = classifier_for(&server.uri());

    let output = classifier
        .classify(&[candidate("+49 30 111111")], &template, &dir.path().join("c"), "CANONICAL_x")
        .await;
    assert_eq!(
        output.results[0].error_tag.as_deref(),
        Some("Error_InitialApiError_Http_400")
    );
}

#[tokio::test]
async fn missing_template_tags_prompt_loading() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let classifier = classifier_for(&server.uri());

    let output = classifier
        .classify(
            &[candidate("+49 30 111111")],
            &dir.path().join("does_not_exist.txt"),
            &dir.path().join("c"),
            "CANONICAL_x",
        )
        .await;
    assert_eq!(output.results[0].error_tag.as_deref(), Some(tags::PROMPT_LOADING));
}

#[tokio::test]
async fn empty_candidate_list_makes_no_request() {
    let server = MockServer::start().await;
    // No mock mounted: any request would 404 and the test would still pass,
    // but expect(0) on a catch-all pins the behavior down.
    Mock::given(method("POST"))
        .and(path_regex(".*"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let template = write_template(dir.path());
    let classifier = classifier_for(&server.uri());

    let output = classifier
        .classify(&[], &template, &dir.path().join("c"), "CANONICAL_x")
        .await;
    assert!(output.results.is_empty());
    assert_eq!(output.token_usage.total_tokens, 0);
}
