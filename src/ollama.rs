//! Blocking client for a local Ollama server.
//!
//! One [`OllamaClient`] serves both embedding (`/api/embeddings`) and
//! relevance scoring (`/api/generate`). The underlying HTTP client keeps
//! connections alive between calls.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::{
    config::OllamaConfig,
    error::{Error, Result},
    provider::{EmbeddingProvider, RelevanceScorer},
};

/// A model installed on the server, as reported by `/api/tags`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<String>,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

pub struct OllamaClient {
    http: reqwest::blocking::Client,
    base_url: String,
    embed_model: String,
    rerank_model: String,
}

impl OllamaClient {
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| {
                Error::Configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            embed_model: config.embed_model.clone(),
            rerank_model: config.rerank_model.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn rerank_model(&self) -> &str {
        &self.rerank_model
    }

    /// Models installed on the server.
    pub fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| provider_error(&url, e))?;
        let tags: TagsResponse =
            response.json().map_err(|e| provider_error(&url, e))?;
        Ok(tags.models)
    }

    fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}{path}", self.base_url);
        self.http
            .post(&url)
            .json(body)
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.json::<Value>())
            .map_err(|e| provider_error(&url, e))
    }
}

impl EmbeddingProvider for OllamaClient {
    fn embed(&self, text: &str) -> Result<Vec<f64>> {
        debug!(model = %self.embed_model, chars = text.len(), "embedding");
        let body = json!({ "model": self.embed_model, "prompt": text });
        let response = self.post_json("/api/embeddings", &body)?;
        parse_embedding_response(&response)
    }

    fn model_name(&self) -> &str {
        &self.embed_model
    }
}

impl RelevanceScorer for OllamaClient {
    fn score_relevance(&self, query: &str, passage: &str) -> Result<f64> {
        let body = json!({
            "model": self.rerank_model,
            "prompt": relevance_prompt(query, passage),
            "stream": false,
            "options": { "temperature": 0 },
        });
        let response = self.post_json("/api/generate", &body)?;
        let reply = response
            .get("response")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::Provider("generate response has no 'response' field".into())
            })?;
        parse_relevance_score(reply)
    }
}

impl std::fmt::Debug for OllamaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaClient")
            .field("base_url", &self.base_url)
            .field("embed_model", &self.embed_model)
            .field("rerank_model", &self.rerank_model)
            .finish_non_exhaustive()
    }
}

fn provider_error(url: &str, err: reqwest::Error) -> Error {
    Error::Provider(format!("request to {url} failed: {err}"))
}

fn relevance_prompt(query: &str, passage: &str) -> String {
    format!(
        "Rate how relevant the passage is to the query on a scale from 0 to 1, \
         where 0 means unrelated and 1 means it fully answers the query.\n\
         Reply with a single number and nothing else.\n\n\
         Query: {query}\n\nPassage:\n{passage}\n\nRelevance:"
    )
}

/// Extract an embedding from any of the response shapes Ollama versions
/// have returned.
///
/// # Examples
///
/// ```
/// use ragsync::ollama::parse_embedding_response;
///
/// let v = serde_json::json!({ "embeddings": [[0.5, 1.0]] });
/// assert_eq!(parse_embedding_response(&v).unwrap(), vec![0.5, 1.0]);
/// ```
pub fn parse_embedding_response(response: &Value) -> Result<Vec<f64>> {
    let candidate = match response {
        Value::Object(map) => {
            if let Some(embedding) = map.get("embedding") {
                Some(embedding)
            } else {
                match map.get("embeddings") {
                    // a batch of one: [[..]]
                    Some(Value::Array(items))
                        if items.first().is_some_and(Value::is_array) =>
                    {
                        items.first()
                    }
                    other => other,
                }
            }
        }
        Value::Array(items) => match items.first() {
            Some(Value::Object(first)) => first.get("embedding"),
            Some(_) => Some(response),
            None => None,
        },
        _ => None,
    };

    let vector = candidate
        .and_then(Value::as_array)
        .map(|values| values.iter().map(Value::as_f64).collect::<Option<Vec<_>>>())
        .ok_or_else(|| {
            Error::Provider(format!(
                "unexpected embedding response: {}",
                abbreviate(response)
            ))
        })?
        .ok_or_else(|| {
            Error::Provider("embedding contains non-numeric values".into())
        })?;

    if vector.is_empty() {
        return Err(Error::Provider("model returned an empty embedding".into()));
    }
    Ok(vector)
}

/// A decimal number, optionally signed, with an optional exponent.
static SCORE_PATTERN: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"-?\d*\.?\d+(?:[eE][-+]?\d+)?"));

/// First number in a model reply, clamped to `[0, 1]`.
pub fn parse_relevance_score(reply: &str) -> Result<f64> {
    let pattern = SCORE_PATTERN.as_ref().map_err(|e| {
        Error::Provider(format!("invalid relevance score pattern: {e}"))
    })?;

    pattern
        .find_iter(reply)
        .find_map(|m| m.as_str().parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .map(|value| value.clamp(0.0, 1.0))
        .ok_or_else(|| {
            Error::Provider(format!(
                "no relevance score in reply: {:?}",
                reply.chars().take(80).collect::<String>()
            ))
        })
}

fn abbreviate(value: &Value) -> String {
    let text = value.to_string();
    match text.char_indices().nth(120) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_response_shapes() {
        let shapes = [
            json!({ "embedding": [1.0, 2.0] }),
            json!({ "embeddings": [[1.0, 2.0]] }),
            json!({ "embeddings": [1.0, 2.0] }),
            json!([{ "embedding": [1.0, 2.0] }]),
            json!([1.0, 2.0]),
        ];
        for shape in &shapes {
            assert_eq!(
                parse_embedding_response(shape).unwrap(),
                vec![1.0, 2.0],
                "shape {shape}"
            );
        }
    }

    #[test]
    fn embedding_response_rejects_garbage() {
        assert!(parse_embedding_response(&json!({ "error": "no model" })).is_err());
        assert!(parse_embedding_response(&json!({ "embedding": [] })).is_err());
        assert!(parse_embedding_response(&json!({ "embedding": ["x"] })).is_err());
        assert!(parse_embedding_response(&json!([])).is_err());
        assert!(parse_embedding_response(&json!("text")).is_err());
    }

    #[test]
    fn relevance_score_parsing() {
        assert_eq!(parse_relevance_score("0.75").unwrap(), 0.75);
        assert_eq!(parse_relevance_score("Score: 0.4\n").unwrap(), 0.4);
        assert_eq!(parse_relevance_score(".5").unwrap(), 0.5);
        assert_eq!(parse_relevance_score("1.").unwrap(), 1.0);
        assert_eq!(parse_relevance_score("1e-1").unwrap(), 0.1);
        assert_eq!(parse_relevance_score("Relevance: 2.5E-1.").unwrap(), 0.25);
    }

    #[test]
    fn relevance_score_is_clamped() {
        assert_eq!(parse_relevance_score("7").unwrap(), 1.0);
        assert_eq!(parse_relevance_score("-0.3").unwrap(), 0.0);
        assert_eq!(parse_relevance_score("score -2e3").unwrap(), 0.0);
        assert_eq!(parse_relevance_score("9e9").unwrap(), 1.0);
    }

    #[test]
    fn relevance_score_requires_a_number() {
        let err = parse_relevance_score("I cannot rate this").unwrap_err();
        assert!(matches!(err, Error::Provider(_)));
    }

    #[test]
    fn client_trims_base_url() {
        let config = OllamaConfig {
            base_url: "http://localhost:11434/".into(),
            ..OllamaConfig::default()
        };
        let client = OllamaClient::new(&config).unwrap();
        assert_eq!(client.base_url(), "http://localhost:11434");
        assert_eq!(client.model_name(), config.embed_model);
    }
}
