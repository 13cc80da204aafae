//! LLM boundary for query expansion and cross-encoder reranking.
//!
//! Both calls are strictly best-effort: any transport error, non-success
//! status, or response that fails to parse as the expected JSON shape
//! yields `None`, and the caller degrades (original query only, keyword
//! reranker). Nothing in this module returns an error to retrieval.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::config::LlmConfig;

const EXPANSION_SYSTEM_PROMPT: &str = "You rewrite search queries for a document retrieval \
system. Given a user query, produce alternative phrasings that could match relevant \
documents the original wording would miss. Respond with strict JSON only: \
{\"expanded\": [\"...\"], \"reasoning\": \"...\"}. No markdown, no prose outside the JSON.";

const RERANK_SYSTEM_PROMPT: &str = "You score how well each passage answers a query. \
Respond with strict JSON only: an array of numbers between 0.0 and 1.0, one per passage, \
in the same order. No markdown, no prose.";

#[derive(Deserialize)]
struct ExpansionResponse {
    expanded: Vec<String>,
    #[allow(dead_code)]
    #[serde(default)]
    reasoning: String,
}

pub struct LlmClient {
    config: LlmConfig,
    http: Option<reqwest::Client>,
}

impl LlmClient {
    pub fn new(config: &LlmConfig) -> Self {
        let http = if config.is_enabled() {
            reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()
                .ok()
        } else {
            None
        };
        Self {
            config: config.clone(),
            http,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.http.is_some()
    }

    /// Ask the model for up to `max` alternative phrasings of `query`.
    /// `None` means the caller should search the original query only.
    pub async fn expand_query(&self, query: &str, max: usize) -> Option<Vec<String>> {
        let user = format!("Query: {}\nProduce at most {} alternatives.", query, max);
        let content = self.chat(EXPANSION_SYSTEM_PROMPT, &user).await?;
        let parsed: ExpansionResponse = match serde_json::from_str(&content) {
            Ok(p) => p,
            Err(e) => {
                debug!(error = %e, "query expansion response was not valid JSON");
                return None;
            }
        };
        let mut variants: Vec<String> = parsed
            .expanded
            .into_iter()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case(query))
            .collect();
        variants.truncate(max);
        Some(variants)
    }

    /// Score each passage's relevance to the query, in order. `None`
    /// on any failure, including a score count mismatch.
    pub async fn rerank_scores(&self, query: &str, passages: &[String]) -> Option<Vec<f32>> {
        if passages.is_empty() {
            return Some(Vec::new());
        }
        let mut user = format!("Query: {}\n\nPassages:\n", query);
        for (i, passage) in passages.iter().enumerate() {
            // Long passages are truncated; the head carries the signal.
            let head: String = passage.chars().take(600).collect();
            user.push_str(&format!("{}. {}\n", i + 1, head));
        }
        let content = self.chat(RERANK_SYSTEM_PROMPT, &user).await?;
        let scores: Vec<f32> = match serde_json::from_str(&content) {
            Ok(s) => s,
            Err(e) => {
                debug!(error = %e, "rerank response was not a JSON number array");
                return None;
            }
        };
        if scores.len() != passages.len() {
            debug!(
                expected = passages.len(),
                got = scores.len(),
                "rerank score count mismatch"
            );
            return None;
        }
        Some(scores.into_iter().map(|s| s.clamp(0.0, 1.0)).collect())
    }

    async fn chat(&self, system: &str, user: &str) -> Option<String> {
        let http = self.http.as_ref()?;
        let model = self.config.model.as_deref()?;
        let body = json!({
            "model": model,
            "temperature": 0.0,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
        });
        let resp = http
            .post(format!("{}/chat/completions", self.config.base_url))
            .json(&body)
            .send()
            .await;
        let resp = match resp {
            Ok(r) => r,
            Err(e) => {
                debug!(error = %e, "llm request failed");
                return None;
            }
        };
        if !resp.status().is_success() {
            debug!(status = %resp.status(), "llm request returned non-success");
            return None;
        }
        let value: serde_json::Value = resp.json().await.ok()?;
        value
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(|s| s.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_client_returns_none() {
        let client = LlmClient::new(&LlmConfig::default());
        assert!(!client.is_enabled());
        assert!(client.expand_query("how do refunds work", 3).await.is_none());
        assert!(client
            .rerank_scores("q", &["passage".to_string()])
            .await
            .is_none());
    }

    #[tokio::test]
    async fn rerank_of_nothing_is_empty() {
        let client = LlmClient::new(&LlmConfig::default());
        assert_eq!(client.rerank_scores("q", &[]).await, Some(Vec::new()));
    }

    #[test]
    fn expansion_response_shape_parses() {
        let parsed: ExpansionResponse = serde_json::from_str(
            r#"{"expanded": ["return policy", "money back"], "reasoning": "synonyms"}"#,
        )
        .unwrap();
        assert_eq!(parsed.expanded.len(), 2);
    }
}
