//! Remote text generation: prompt construction and the HTTP backends.

use crate::config::{AnalysisConfig, GeneratorBackend};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Value, json};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error};

const CONTEXT_SEPARATOR: &str = "\n---\n";
const TRUNCATION_MARKER: &str = "...[truncated]";
const BODY_PREVIEW_CHARS: usize = 100;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("endpoint answered HTTP {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("invalid JSON. Raw: {0}")]
    Malformed(String),

    #[error("no {0} field in response")]
    MissingField(&'static str),
}

/// Anything that turns a prompt into text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

// ── Prompt ────────────────────────────────────────────────────────────────────

/// Cut `context` to at most `budget` characters, marking the cut.
pub fn truncate_context(context: &str, budget: usize) -> String {
    match context.char_indices().nth(budget) {
        Some((cut, _)) => format!("{}{}", &context[..cut], TRUNCATION_MARKER),
        None => context.to_string(),
    }
}

pub fn build_prompt(question: &str, context_pages: &[&str], budget: usize) -> String {
    let context = truncate_context(&context_pages.join(CONTEXT_SEPARATOR), budget);
    format!(
        r#"You are an ESG analyst extracting data for a BRSR report.

CONTEXT from Annual Report:
{context}

QUESTION:
{question}

INSTRUCTIONS:
1. Answer the question specifically using the Context provided.
2. If data is tabular, strictly format it as a markdown table or structured list.
3. If the answer is NOT in the context, say "Data not found in relevant pages".
4. Be concise and factual.

ANSWER:"#
    )
}

// ── Backends ──────────────────────────────────────────────────────────────────

/// POST `{"prompt": ..}` and read `answer`.
pub struct PromptEndpoint {
    client: reqwest::Client,
    url: String,
}

/// Ollama-style `POST <base>/api/generate` and read `response`.
pub struct OllamaEndpoint {
    client: reqwest::Client,
    url: String,
    model: String,
}

fn build_client(timeout: Duration) -> Result<reqwest::Client, GenerationError> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

impl PromptEndpoint {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, GenerationError> {
        Ok(Self {
            client: build_client(timeout)?,
            url: url.to_string(),
        })
    }
}

impl OllamaEndpoint {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self, GenerationError> {
        Ok(Self {
            client: build_client(timeout)?,
            url: format!("{}/api/generate", base_url.trim_end_matches('/')),
            model: model.to_string(),
        })
    }
}

/// POST `body` and pull the string `field` out of the JSON reply.
async fn post_for_field(
    client: &reqwest::Client,
    url: &str,
    body: &Value,
    field: &'static str,
) -> Result<String, GenerationError> {
    debug!("POST {} ({} byte body)", url, body.to_string().len());
    let resp = client.post(url).json(body).send().await?;

    let status = resp.status();
    let text = resp.text().await?;
    if !status.is_success() {
        error!("Generation endpoint answered HTTP {}", status);
        return Err(GenerationError::Status {
            status,
            body: text.chars().take(BODY_PREVIEW_CHARS).collect(),
        });
    }

    let parsed: Value = serde_json::from_str(&text)
        .map_err(|_| GenerationError::Malformed(text.chars().take(BODY_PREVIEW_CHARS).collect()))?;
    parsed
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(GenerationError::MissingField(field))
}

#[async_trait]
impl TextGenerator for PromptEndpoint {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        post_for_field(&self.client, &self.url, &json!({ "prompt": prompt }), "answer").await
    }
}

#[async_trait]
impl TextGenerator for OllamaEndpoint {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let body = json!({ "model": self.model, "prompt": prompt, "stream": false });
        let text = post_for_field(&self.client, &self.url, &body, "response").await?;
        Ok(text.trim().to_string())
    }
}

/// The backend selected in `config`, talking to `endpoint`.
pub fn generator_for(
    config: &AnalysisConfig,
    endpoint: &str,
) -> Result<Box<dyn TextGenerator>, GenerationError> {
    let timeout = Duration::from_secs(config.timeout_secs);
    Ok(match config.backend {
        GeneratorBackend::Prompt => Box::new(PromptEndpoint::new(endpoint, timeout)?),
        GeneratorBackend::Ollama => {
            Box::new(OllamaEndpoint::new(endpoint, &config.model, timeout)?)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::spawn_server;
    use axum::http::StatusCode as AxumStatus;
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::{Json, Router};

    #[test]
    fn truncation_is_char_safe() {
        assert_eq!(truncate_context("short", 10), "short");
        assert_eq!(truncate_context("exactly", 7), "exactly");
        assert_eq!(truncate_context("abcdef", 3), "abc...[truncated]");
        assert_eq!(truncate_context("₹₹₹₹", 2), "₹₹...[truncated]");
    }

    #[test]
    fn prompt_embeds_joined_context_and_question() {
        let prompt = build_prompt("What is the CIN?", &["page one", "page two"], 25_000);
        assert!(prompt.starts_with("You are an ESG analyst"));
        assert!(prompt.contains("page one\n---\npage two"));
        assert!(prompt.contains("QUESTION:\nWhat is the CIN?\n"));
        assert!(prompt.ends_with("ANSWER:"));
    }

    async fn server() -> String {
        let app = Router::new()
            .route(
                "/answer",
                post(|Json(body): Json<Value>| async move {
                    let prompt = body["prompt"].as_str().unwrap_or_default().to_string();
                    Json(json!({ "answer": format!("{} chars", prompt.len()) }))
                }),
            )
            .route(
                "/api/generate",
                post(|Json(body): Json<Value>| async move {
                    assert_eq!(body["stream"], json!(false));
                    let model = body["model"].as_str().unwrap_or("?");
                    Json(json!({ "response": format!("  {} says hi \n", model) }))
                }),
            )
            .route("/no-field", post(|| async { Json(json!({ "result": "x" })) }))
            .route("/not-json", post(|| async { "<html>oops</html>" }))
            .route(
                "/down",
                post(|| async { (AxumStatus::SERVICE_UNAVAILABLE, "cold start").into_response() }),
            );
        spawn_server(app).await
    }

    #[tokio::test]
    async fn prompt_endpoint_reads_answer() {
        let base = server().await;
        let endpoint =
            PromptEndpoint::new(&format!("{}/answer", base), Duration::from_secs(5)).unwrap();
        assert_eq!(endpoint.generate("hello").await.unwrap(), "5 chars");
    }

    #[tokio::test]
    async fn ollama_endpoint_reads_trimmed_response() {
        let base = server().await;
        let endpoint =
            OllamaEndpoint::new(&format!("{}/", base), "gemma:7b", Duration::from_secs(5)).unwrap();
        assert_eq!(endpoint.generate("hello").await.unwrap(), "gemma:7b says hi");
    }

    #[tokio::test]
    async fn failures_are_typed() {
        let base = server().await;
        let at = |path: &str| {
            PromptEndpoint::new(&format!("{}{}", base, path), Duration::from_secs(5)).unwrap()
        };

        let err = at("/no-field").generate("q").await;
        assert!(matches!(err, Err(GenerationError::MissingField("answer"))));

        let err = at("/not-json").generate("q").await;
        assert!(
            matches!(err, Err(GenerationError::Malformed(ref raw)) if raw == "<html>oops</html>")
        );

        let err = at("/down").generate("q").await;
        assert!(matches!(
            err,
            Err(GenerationError::Status { status: StatusCode::SERVICE_UNAVAILABLE, .. })
        ));
    }
}
