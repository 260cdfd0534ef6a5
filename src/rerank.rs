//! Relevance reranking
//!
//! A [`RelevanceJudge`] sees the query and the filtered candidates (index,
//! path and text, never scores) and answers with candidate indexes in
//! order of relevance. Reranking is best effort: callers fall back to
//! similarity order whenever the judge fails.

use crate::config::RemoteConfig;
use crate::embedder::API_KEY_ENV;
use crate::error::{Result, SiftError};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::debug;

/// What the judge is shown for each candidate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RerankCandidate {
    /// Position in the candidate list
    pub index: usize,
    /// Path relative to the project root
    pub path: String,
    /// Chunk text
    pub text: String,
}

/// External relevance judgment
#[async_trait]
pub trait RelevanceJudge: Send + Sync {
    /// Return up to `limit` candidate indexes, most relevant first
    async fn judge(&self, query: &str, candidates: &[RerankCandidate], limit: usize)
        -> Result<Vec<usize>>;
}

/// Build the default judge; `None` when no API key is configured
pub fn create_judge(config: &RemoteConfig) -> Result<Option<Arc<dyn RelevanceJudge>>> {
    match std::env::var(API_KEY_ENV) {
        Ok(key) if !key.trim().is_empty() => {
            Ok(Some(Arc::new(ChatJudge::new(config.clone(), key)?)))
        }
        _ => Ok(None),
    }
}

/// Asks an OpenAI-compatible chat model to rank candidates
pub struct ChatJudge {
    client: reqwest::Client,
    config: RemoteConfig,
    api_key: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

impl ChatJudge {
    pub fn new(config: RemoteConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            config,
            api_key,
        })
    }
}

#[async_trait]
impl RelevanceJudge for ChatJudge {
    async fn judge(
        &self,
        query: &str,
        candidates: &[RerankCandidate],
        limit: usize,
    ) -> Result<Vec<usize>> {
        let prompt = build_prompt(query, candidates, limit)?;
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let body = serde_json::json!({
            "model": self.config.chat_model,
            "temperature": 0,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(SiftError::Rerank(format!(
                "chat API error {}: {}",
                status, body_text
            )));
        }

        let parsed: ChatResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| SiftError::Rerank("empty chat response".into()))?;

        debug!("Rerank reply: {}", content);
        parse_ranking(&content)
    }
}

fn build_prompt(query: &str, candidates: &[RerankCandidate], limit: usize) -> Result<String> {
    let listing = serde_json::to_string(candidates)?;
    Ok(format!(
        "I am making some code changes and I am searching the project codebase for code \
         relevant to this query: {query}\n\n\
         Search engine results are:\n\n{listing}\n\n\
         Which array indexes of the search result objects in the JSON array above are the \
         most relevant code snippets for my query? Respond with a JSON array only, containing \
         the indexes in order of relevance and dropping irrelevant results. \
         Return at most {limit} indexes, for example [3, 1, 4]."
    ))
}

/// Pull the first JSON array of integers out of a model reply
pub fn parse_ranking(reply: &str) -> Result<Vec<usize>> {
    static ARRAY: OnceLock<Regex> = OnceLock::new();
    let array = ARRAY.get_or_init(|| Regex::new(r"\[[\s\d,]*\]").expect("valid regex"));

    let found = array
        .find(reply)
        .ok_or_else(|| SiftError::Rerank(format!("no index array in reply: {}", reply)))?;
    Ok(serde_json::from_str(found.as_str())?)
}

/// Keep in-range, first-seen indexes from a judge's answer
pub fn sanitize_ranking(ranking: Vec<usize>, candidate_count: usize) -> Vec<usize> {
    let mut seen = vec![false; candidate_count];
    ranking
        .into_iter()
        .filter(|&i| {
            if i >= candidate_count || seen[i] {
                return false;
            }
            seen[i] = true;
            true
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ranking() {
        assert_eq!(parse_ranking("[2, 0, 1]").unwrap(), vec![2, 0, 1]);
        assert_eq!(
            parse_ranking("Sure! The most relevant are:\n```json\n[4,1]\n```").unwrap(),
            vec![4, 1]
        );
        assert_eq!(parse_ranking("[]").unwrap(), Vec::<usize>::new());
        assert!(parse_ranking("nothing relevant").is_err());
    }

    #[test]
    fn test_sanitize_drops_out_of_range_and_duplicates() {
        assert_eq!(sanitize_ranking(vec![1, 7, 1, 0, 3], 3), vec![1, 0]);
        assert!(sanitize_ranking(vec![5, 9], 3).is_empty());
    }

    #[test]
    fn test_prompt_lists_candidates_without_scores() {
        let candidates = vec![RerankCandidate {
            index: 0,
            path: "src/json.rs".into(),
            text: "fn parse_json() {}".into(),
        }];
        let prompt = build_prompt("parse JSON", &candidates, 5).unwrap();

        assert!(prompt.contains("parse JSON"));
        assert!(prompt.contains("\"path\":\"src/json.rs\""));
        assert!(prompt.contains("at most 5"));
        assert!(!prompt.contains("score"));
    }
}
