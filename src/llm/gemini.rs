use std::{fmt, time::Duration};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::{
    config::PipelineConfig,
    error::{AnimathError, AnimathResult},
    llm::TextGenerator,
};

#[derive(Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

impl fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl GeminiConfig {
    pub fn from_pipeline(api_key: impl Into<String>, cfg: &PipelineConfig) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: cfg.api_base_url.clone(),
            model: cfg.model.clone(),
            timeout: cfg.request_timeout(),
        }
    }

    pub fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }
}

#[derive(Serialize)]
struct GenerateContentRequest<'a> {
    contents: [Content<'a>; 1],
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: [RequestPart<'a>; 1],
}

#[derive(Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Blocking client for the Gemini `generateContent` endpoint.
pub struct GeminiClient {
    config: GeminiConfig,
    client: reqwest::blocking::Client,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> AnimathResult<Self> {
        if config.api_key.trim().is_empty() {
            return Err(AnimathError::validation("Gemini API key must be non-empty"));
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("build http client")?;
        Ok(Self { config, client })
    }
}

impl TextGenerator for GeminiClient {
    #[tracing::instrument(skip(self, prompt), fields(model = %self.config.model, prompt_len = prompt.len()))]
    fn generate(&self, prompt: &str) -> AnimathResult<String> {
        let body = GenerateContentRequest {
            contents: [Content {
                role: "user",
                parts: [RequestPart { text: prompt }],
            }],
        };

        let resp = self
            .client
            .post(self.config.endpoint())
            .header("x-goog-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .map_err(|e| {
                AnimathError::generation(format!("request to {} failed: {e}", self.config.model))
            })?;

        let status = resp.status();
        let text = resp
            .text()
            .map_err(|e| AnimathError::generation(format!("failed to read response body: {e}")))?;
        tracing::debug!(status = status.as_u16(), bytes = text.len(), "gemini response");

        if !status.is_success() {
            return Err(map_error(status.as_u16(), &text));
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&text)
            .map_err(|e| AnimathError::serde(format!("gemini response parse failed: {e}")))?;
        extract_text(&parsed)
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}

/// Joins the text parts of the first candidate, trimmed.
pub(crate) fn extract_text(resp: &GenerateContentResponse) -> AnimathResult<String> {
    let Some(candidate) = resp.candidates.first() else {
        let reason = resp
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref());
        return Err(match reason {
            Some(r) => AnimathError::generation(format!("prompt was blocked ({r})")),
            None => AnimathError::generation("response contained no candidates"),
        });
    };

    let text: String = candidate
        .content
        .iter()
        .flat_map(|c| c.parts.iter())
        .filter_map(|p| p.text.as_deref())
        .collect();
    let text = text.trim();

    if text.is_empty() {
        let reason = candidate.finish_reason.as_deref().unwrap_or("unknown");
        return Err(AnimathError::generation(format!(
            "response contained no text (finish reason: {reason})"
        )));
    }
    Ok(text.to_string())
}

fn map_error(status: u16, body: &str) -> AnimathError {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.trim().to_string());
    AnimathError::api(status, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(base_url: String) -> GeminiConfig {
        GeminiConfig {
            api_key: "test-key".into(),
            base_url,
            model: "gemini-1.5-flash".into(),
            timeout: Duration::from_secs(5),
        }
    }

    fn parse(body: &str) -> GenerateContentResponse {
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn extract_text_joins_parts_of_first_candidate() {
        let resp = parse(
            r#"{"candidates":[
                {"content":{"parts":[{"text":"  Hello "},{"text":"world  "}],"role":"model"}},
                {"content":{"parts":[{"text":"ignored"}]}}
            ]}"#,
        );
        assert_eq!(extract_text(&resp).unwrap(), "Hello world");
    }

    #[test]
    fn blocked_prompt_reports_reason() {
        let resp = parse(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#);
        let err = extract_text(&resp).unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }

    #[test]
    fn candidate_without_text_is_an_error() {
        let resp = parse(r#"{"candidates":[{"finishReason":"MAX_TOKENS"}]}"#);
        let err = extract_text(&resp).unwrap_err();
        assert!(matches!(err, AnimathError::Generation(_)));
        assert!(err.to_string().contains("MAX_TOKENS"));
    }

    #[test]
    fn endpoint_trims_trailing_slash() {
        let cfg = test_config("http://localhost:1234/".into());
        assert_eq!(
            cfg.endpoint(),
            "http://localhost:1234/v1beta/models/gemini-1.5-flash:generateContent"
        );
    }

    #[test]
    fn debug_output_hides_api_key() {
        let cfg = test_config("http://localhost".into());
        let dbg = format!("{cfg:?}");
        assert!(!dbg.contains("test-key"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn empty_api_key_is_rejected() {
        let mut cfg = test_config("http://localhost".into());
        cfg.api_key = String::new();
        assert!(GeminiClient::new(cfg).is_err());
    }

    #[test]
    fn generate_posts_prompt_and_returns_text() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/v1beta/models/gemini-1.5-flash:generateContent")
            .match_header("x-goog-api-key", "test-key")
            .match_body(mockito::Matcher::Regex("Explain limits".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"candidates":[{"content":{"parts":[{"text":"refined"}]}}]}"#)
            .create();

        let client = GeminiClient::new(test_config(server.url())).unwrap();
        let out = client.generate("Explain limits").unwrap();
        assert_eq!(out, "refined");
        mock.assert();
    }

    #[test]
    fn non_success_status_surfaces_api_message() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("POST", "/v1beta/models/gemini-1.5-flash:generateContent")
            .with_status(403)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error":{"code":403,"message":"API key not valid","status":"PERMISSION_DENIED"}}"#)
            .create();

        let client = GeminiClient::new(test_config(server.url())).unwrap();
        let err = client.generate("anything").unwrap_err();
        match err {
            AnimathError::Api { status, message } => {
                assert_eq!(status, 403);
                assert_eq!(message, "API key not valid");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn malformed_body_is_a_serde_error() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("POST", "/v1beta/models/gemini-1.5-flash:generateContent")
            .with_status(200)
            .with_body("<html>gateway</html>")
            .create();

        let client = GeminiClient::new(test_config(server.url())).unwrap();
        let err = client.generate("anything").unwrap_err();
        assert!(matches!(err, AnimathError::Serde(_)));
    }
}
