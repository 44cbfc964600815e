use std::env;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use log::debug;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Value};

use super::VisionModel;
use crate::error::{truncate_text, ExternalServiceError};
use crate::prompt::PromptPart;

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";
const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeminiConfig {
    pub api_base: String,
    pub model: String,
    pub timeout: Duration,
    /// Environment variables consulted, in order, for the API key on every
    /// request.
    pub api_key_vars: Vec<String>,
}

impl GeminiConfig {
    pub fn new(model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            api_base: env::var("GEMINI_API_BASE")
                .ok()
                .map(|value| value.trim().trim_end_matches('/').to_owned())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            model: model.into(),
            timeout,
            api_key_vars: vec!["GEMINI_API_KEY".to_string(), "GOOGLE_API_KEY".to_string()],
        }
    }

    /// Value of the first key variable that holds a non-blank key.
    fn api_key(&self) -> Option<String> {
        self.api_key_vars
            .iter()
            .filter_map(|var| env::var(var).ok())
            .map(|value| value.trim().to_owned())
            .find(|value| !value.is_empty())
    }
}

/// Gemini `generateContent` over HTTPS. No retries: a failed request is
/// final for that question.
pub struct GeminiModel {
    config: GeminiConfig,
    http: HttpClient,
}

impl GeminiModel {
    pub fn new(config: GeminiConfig) -> Self {
        Self {
            config,
            http: HttpClient::new(),
        }
    }

    fn endpoint(&self) -> String {
        let trimmed = self.config.model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.config.api_base, model_path)
    }

    fn generate_text(&self, parts: &[PromptPart<'_>]) -> Result<String> {
        let Some(api_key) = self.config.api_key() else {
            bail!("{} not set", self.config.api_key_vars.join(" or "));
        };
        let endpoint = self.endpoint();
        let payload = build_request_payload(parts)?;
        debug!(
            "POST {endpoint} ({} parts, timeout {:?})",
            parts.len(),
            self.config.timeout
        );

        let response = self
            .http
            .post(&endpoint)
            .header(API_KEY_HEADER, api_key)
            .timeout(self.config.timeout)
            .json(&payload)
            .send()
            .map_err(|err| {
                if err.is_timeout() {
                    anyhow!(
                        "Gemini request timed out after {}s",
                        self.config.timeout.as_secs_f64()
                    )
                } else {
                    anyhow::Error::new(err.without_url())
                        .context(format!("Gemini request failed ({endpoint})"))
                }
            })?;
        let response_payload = response_json_or_error(response)?;
        extract_response_text(&response_payload)
    }
}

impl VisionModel for GeminiModel {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model_id(&self) -> &str {
        &self.config.model
    }

    fn generate(&self, parts: &[PromptPart<'_>]) -> Result<String, ExternalServiceError> {
        self.generate_text(parts)
            .map_err(|err| ExternalServiceError::from_anyhow(&err))
    }
}

pub(crate) fn build_request_payload(parts: &[PromptPart<'_>]) -> Result<Value> {
    if parts.is_empty() {
        bail!("Gemini request has no content parts");
    }
    let mut rendered = Vec::with_capacity(parts.len());
    for part in parts {
        rendered.push(match part {
            PromptPart::Text(text) => json!({ "text": text }),
            PromptPart::Image(image) => {
                let bytes = image.encode()?;
                json!({
                    "inlineData": {
                        "mimeType": image.kind().mime_type(),
                        "data": BASE64.encode(bytes),
                    }
                })
            }
        });
    }
    Ok(json!({
        "contents": [{
            "role": "user",
            "parts": rendered,
        }]
    }))
}

fn response_json_or_error(response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .context("Gemini response body read failed")?;
    if !status.is_success() {
        bail!("Gemini request failed ({code}): {}", truncate_text(&body, 512));
    }
    serde_json::from_str(&body).context("Gemini returned invalid JSON payload")
}

/// Concatenated text parts of the first candidate, as returned.
pub(crate) fn extract_response_text(payload: &Value) -> Result<String> {
    if let Some(reason) = payload
        .pointer("/promptFeedback/blockReason")
        .and_then(Value::as_str)
    {
        bail!("Gemini blocked the prompt ({reason})");
    }
    let Some(candidate) = payload
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|rows| rows.first())
    else {
        bail!("Gemini returned no candidates");
    };
    let text: String = candidate
        .pointer("/content/parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();
    if text.is_empty() {
        let reason = candidate
            .get("finishReason")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        bail!("Gemini returned no text (finish reason: {reason})");
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread::{self, JoinHandle};
    use std::time::Duration;

    use base64::Engine as _;
    use serde_json::{json, Value};

    use super::{
        build_request_payload, extract_response_text, GeminiConfig, GeminiModel, BASE64,
    };
    use crate::image_input::{fixtures, ingest_image, UploadLimits};
    use crate::prompt::PromptPart;
    use crate::providers::VisionModel;

    fn test_config(base: &str, key_var: &str, timeout: Duration) -> GeminiConfig {
        GeminiConfig {
            api_base: base.to_string(),
            model: "gemini-1.5-flash".to_string(),
            timeout,
            api_key_vars: vec![key_var.to_string()],
        }
    }

    /// Answers one HTTP request with `status` and `body`, returning the raw
    /// request head and body it received.
    fn serve_once(status: &str, body: &str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let status = status.to_string();
        let body = body.to_string();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream);
            let mut head = String::new();
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if let Some(value) = line.to_ascii_lowercase().strip_prefix("content-length:") {
                    content_length = value.trim().parse().unwrap_or(0);
                }
                head.push_str(&line);
                if line == "\r\n" || line.is_empty() {
                    break;
                }
            }
            let mut request_body = vec![0u8; content_length];
            reader.read_exact(&mut request_body).unwrap();
            let mut stream = reader.into_inner();
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).unwrap();
            head + &String::from_utf8_lossy(&request_body)
        });
        (base, handle)
    }

    #[test]
    fn payload_keeps_part_order_and_inlines_images() -> anyhow::Result<()> {
        let image = ingest_image("menu.png", &fixtures::png(3, 2), &UploadLimits::default())?;
        let payload = build_request_payload(&[
            PromptPart::Text("instruction"),
            PromptPart::Image(&image),
        ])?;

        assert_eq!(payload["contents"][0]["role"], json!("user"));
        let parts = payload["contents"][0]["parts"].as_array().cloned().unwrap_or_default();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0], json!({ "text": "instruction" }));
        assert_eq!(parts[1]["inlineData"]["mimeType"], json!("image/png"));

        let data = parts[1]["inlineData"]["data"].as_str().unwrap_or_default();
        let bytes = BASE64.decode(data)?;
        assert_eq!(image::load_from_memory(&bytes)?.width(), 3);
        Ok(())
    }

    #[test]
    fn payload_requires_at_least_one_part() {
        assert!(build_request_payload(&[]).is_err());
    }

    #[test]
    fn extracts_concatenated_text_of_first_candidate() -> anyhow::Result<()> {
        let payload = json!({
            "candidates": [
                {"content": {"parts": [{"text": "**Luigi's** "}, {"text": "Trattoria"}]}},
                {"content": {"parts": [{"text": "ignored"}]}}
            ]
        });
        assert_eq!(extract_response_text(&payload)?, "**Luigi's** Trattoria");
        Ok(())
    }

    #[test]
    fn missing_text_reports_reason() {
        let blocked = json!({"promptFeedback": {"blockReason": "SAFETY"}});
        assert_eq!(
            extract_response_text(&blocked).unwrap_err().to_string(),
            "Gemini blocked the prompt (SAFETY)"
        );

        let empty = json!({"candidates": [{"finishReason": "MAX_TOKENS", "content": {"parts": []}}]});
        assert_eq!(
            extract_response_text(&empty).unwrap_err().to_string(),
            "Gemini returned no text (finish reason: MAX_TOKENS)"
        );

        let none = json!({"candidates": []});
        assert!(extract_response_text(&none).is_err());
    }

    #[test]
    fn endpoint_accepts_bare_and_prefixed_model_names() {
        let mut config = test_config("https://example.test/v1beta", "UNUSED", Duration::from_secs(5));
        let model = GeminiModel::new(config.clone());
        assert_eq!(
            model.endpoint(),
            "https://example.test/v1beta/models/gemini-1.5-flash:generateContent"
        );
        config.model = "models/gemini-1.5-pro".to_string();
        assert_eq!(
            GeminiModel::new(config).endpoint(),
            "https://example.test/v1beta/models/gemini-1.5-pro:generateContent"
        );
    }

    #[test]
    fn api_key_falls_through_blank_variables() {
        std::env::set_var("GLANCE_TEST_KEY_BLANK", "   ");
        std::env::set_var("GLANCE_TEST_KEY_FALLBACK", " secret-0 ");
        let mut config = test_config("http://unused", "GLANCE_TEST_KEY_UNSET", Duration::from_secs(1));
        config.api_key_vars.push("GLANCE_TEST_KEY_BLANK".to_string());
        config.api_key_vars.push("GLANCE_TEST_KEY_FALLBACK".to_string());
        assert_eq!(config.api_key().as_deref(), Some("secret-0"));
    }

    #[test]
    fn missing_api_key_fails_at_call_time() {
        let model = GeminiModel::new(test_config(
            "http://127.0.0.1:9",
            "GLANCE_TEST_KEY_NEVER_SET",
            Duration::from_secs(1),
        ));
        let err = model.generate(&[PromptPart::Text("Hello")]).unwrap_err();
        assert_eq!(err.message(), "GLANCE_TEST_KEY_NEVER_SET not set");
    }

    #[test]
    fn successful_call_returns_text_verbatim() {
        std::env::set_var("GLANCE_TEST_KEY_SUCCESS", "secret-1");
        let body = json!({
            "candidates": [{"content": {"parts": [{"text": "# Answer\n\nIt is *Luigi's*."}]}}]
        })
        .to_string();
        let (base, server) = serve_once("200 OK", &body);
        let model = GeminiModel::new(test_config(
            &base,
            "GLANCE_TEST_KEY_SUCCESS",
            Duration::from_secs(5),
        ));

        let answer = model.generate(&[PromptPart::Text("Hello")]);
        assert_eq!(answer.as_deref(), Ok("# Answer\n\nIt is *Luigi's*."));

        let request = server.join().unwrap();
        assert!(request.starts_with("POST /models/gemini-1.5-flash:generateContent"));
        assert!(request.to_ascii_lowercase().contains("x-goog-api-key: secret-1"));
        let sent: Value = serde_json::from_str(request.rsplit("\r\n\r\n").next().unwrap_or("{}"))
            .unwrap_or(Value::Null);
        assert_eq!(sent["contents"][0]["parts"][0]["text"], json!("Hello"));
    }

    #[test]
    fn error_status_is_wrapped_with_code_and_body() {
        std::env::set_var("GLANCE_TEST_KEY_QUOTA", "secret-2");
        let (base, server) = serve_once(
            "429 Too Many Requests",
            r#"{"error":{"message":"Resource has been exhausted"}}"#,
        );
        let model = GeminiModel::new(test_config(
            &base,
            "GLANCE_TEST_KEY_QUOTA",
            Duration::from_secs(5),
        ));

        let err = model.generate(&[PromptPart::Text("Hello")]).unwrap_err();
        assert!(err.message().starts_with("Gemini request failed (429)"));
        assert!(err.message().contains("Resource has been exhausted"));
        server.join().unwrap();
    }

    #[test]
    fn slow_service_times_out() {
        std::env::set_var("GLANCE_TEST_KEY_TIMEOUT", "secret-3");
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        thread::spawn(move || {
            if let Ok((_stream, _)) = listener.accept() {
                thread::sleep(Duration::from_secs(3));
            }
        });
        let model = GeminiModel::new(test_config(
            &base,
            "GLANCE_TEST_KEY_TIMEOUT",
            Duration::from_millis(200),
        ));

        let err = model.generate(&[PromptPart::Text("Hello")]).unwrap_err();
        assert!(err.message().contains("timed out"), "{}", err.message());
    }
}
