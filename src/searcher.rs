//! Search functionality and result formatting
//!
//! Runs semantic queries against the last committed index, applies the
//! score threshold and optional reranking, and formats hits for terminal
//! display or JSON output.

use crate::chunker::Language;
use crate::config::SearchOptions;
use crate::embedder::{embed_with_retry, EmbeddingProvider};
use crate::error::{Result, SiftError};
use crate::index::{ScoredChunk, SharedIndex};
use crate::rerank::{sanitize_ranking, RelevanceJudge, RerankCandidate};
use colored::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Candidates with this many characters or fewer are noise
const MIN_TEXT_CHARS: usize = 5;

/// Extra attempts for the query embedding
const QUERY_RETRIES: u32 = 1;

/// A search result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    /// Path relative to the project root
    pub file_path: String,
    /// Chunk text
    pub text: String,
    pub start_line: usize,
    pub end_line: usize,
    /// Cosine similarity to the query
    pub score: f32,
    pub language: Language,
}

/// Index statistics
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    /// Number of indexed files
    pub files: usize,
    /// Number of chunks
    pub chunks: usize,
    /// Model name used for embeddings
    pub model: String,
    /// Embedding dimension
    pub dimension: usize,
}

/// Semantic search over one project's committed index
#[derive(Clone)]
pub struct SearchService {
    index: SharedIndex,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    judge: Option<Arc<dyn RelevanceJudge>>,
    root: PathBuf,
}

impl SearchService {
    pub fn new(
        index: SharedIndex,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        judge: Option<Arc<dyn RelevanceJudge>>,
        root: PathBuf,
    ) -> Self {
        Self {
            index,
            embedder,
            judge,
            root,
        }
    }

    /// Find the chunks most relevant to `query`.
    ///
    /// Over-fetches `2 * limit` candidates, drops those under the score
    /// threshold or with near-empty text, optionally reranks, and returns at
    /// most `limit` hits. Without an embedding provider the result is empty.
    pub async fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchHit>> {
        let Some(embedder) = &self.embedder else {
            debug!("No embedding provider, search disabled");
            return Ok(vec![]);
        };
        if query.trim().is_empty() || options.limit == 0 {
            return Ok(vec![]);
        }

        let vectors = embed_with_retry(
            embedder.as_ref(),
            &[query.to_string()],
            QUERY_RETRIES,
            Duration::from_millis(200),
        )
        .await?;
        let vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| SiftError::Embedding("no vector for query".into()))?;

        let index = self.index.current().await;
        let candidates: Vec<ScoredChunk> = index
            .query(&vector, options.limit.saturating_mul(2))
            .into_iter()
            .filter(|c| c.score >= options.score_threshold)
            .filter(|c| c.record.text.trim().chars().count() > MIN_TEXT_CHARS)
            .collect();
        debug!(
            "{} candidates above threshold {}",
            candidates.len(),
            options.score_threshold
        );

        let mut hits: Vec<SearchHit> = candidates.into_iter().map(|c| self.to_hit(c)).collect();

        if options.rerank && !hits.is_empty() {
            if let Some(judge) = &self.judge {
                hits = rerank(judge.as_ref(), query, hits, options.limit).await;
            }
        }

        hits.truncate(options.limit);
        Ok(hits)
    }

    /// Get index statistics
    pub async fn stats(&self) -> IndexStats {
        let index = self.index.current().await;
        IndexStats {
            files: index.file_count(),
            chunks: index.chunk_count(),
            model: index.model_name().to_string(),
            dimension: index.dimension(),
        }
    }

    fn to_hit(&self, chunk: ScoredChunk) -> SearchHit {
        let record = chunk.record;
        SearchHit {
            file_path: relative_to(&self.root, &record.file_path),
            text: record.text,
            start_line: record.start_line,
            end_line: record.end_line,
            score: chunk.score,
            language: record.language,
        }
    }
}

/// Reorder hits by the judge's ranking; any failure keeps similarity order
async fn rerank(
    judge: &dyn RelevanceJudge,
    query: &str,
    hits: Vec<SearchHit>,
    limit: usize,
) -> Vec<SearchHit> {
    let candidates: Vec<RerankCandidate> = hits
        .iter()
        .enumerate()
        .map(|(index, hit)| RerankCandidate {
            index,
            path: hit.file_path.clone(),
            text: hit.text.clone(),
        })
        .collect();

    let ranking = match judge.judge(query, &candidates, limit).await {
        Ok(ranking) => sanitize_ranking(ranking, hits.len()),
        Err(e) => {
            warn!("Rerank failed, keeping similarity order: {}", e);
            return hits;
        }
    };
    if ranking.is_empty() {
        debug!("Rerank returned no usable indexes, keeping similarity order");
        return hits;
    }

    let mut slots: Vec<Option<SearchHit>> = hits.into_iter().map(Some).collect();
    ranking
        .into_iter()
        .filter_map(|i| slots[i].take())
        .collect()
}

fn relative_to(root: &Path, file_path: &str) -> String {
    let path = Path::new(file_path);
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .to_string()
}

/// Format search results for terminal display
pub fn format_results(results: &[SearchHit], show_content: bool) -> String {
    let mut output = String::new();

    for (i, result) in results.iter().enumerate() {
        // File path and line range
        let file_display = format!(
            "{}:{}",
            result.file_path,
            if result.start_line == result.end_line {
                format!("{}", result.start_line)
            } else {
                format!("{}-{}", result.start_line, result.end_line)
            }
        );

        // Score indicator with color
        let score_pct = (result.score * 100.0) as i32;
        let score_color = if score_pct >= 80 {
            "green"
        } else if score_pct >= 60 {
            "yellow"
        } else {
            "red"
        };

        output.push_str(&format!(
            "\n{} {} ({}%)\n",
            format!("[{}]", i + 1).dimmed(),
            file_display.cyan().bold(),
            format!("{}", score_pct).color(score_color)
        ));

        if show_content {
            output.push_str(&format!("{}\n", "─".repeat(60).dimmed()));

            let lines: Vec<&str> = result.text.lines().collect();
            let max_lines = 15;
            let show_lines = if lines.len() > max_lines {
                &lines[..max_lines]
            } else {
                &lines
            };

            for (j, line) in show_lines.iter().enumerate() {
                let line_num = result.start_line + j;
                output.push_str(&format!("{} {}\n", format!("{:4}", line_num).dimmed(), line));
            }

            if lines.len() > max_lines {
                output.push_str(&format!(
                    "{}\n",
                    format!("     ... ({} more lines)", lines.len() - max_lines).dimmed()
                ));
            }
        }
    }

    output
}

/// Format results as JSON
pub fn format_results_json(results: &[SearchHit]) -> Result<String> {
    #[derive(Serialize)]
    struct JsonResult<'a> {
        file: &'a str,
        start_line: usize,
        end_line: usize,
        score: f32,
        content: &'a str,
        language: Language,
    }

    let json_results: Vec<JsonResult> = results
        .iter()
        .map(|r| JsonResult {
            file: &r.file_path,
            start_line: r.start_line,
            end_line: r.end_line,
            score: r.score,
            content: &r.text,
            language: r.language,
        })
        .collect();

    Ok(serde_json::to_string_pretty(&json_results)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::testing::KeywordEmbedder;
    use crate::index::{ChunkDraft, VectorIndex};
    use async_trait::async_trait;
    use std::sync::Mutex;

    const ROOT: &str = "/work/app";

    /// Returns a fixed answer and records what it was shown
    struct ScriptedJudge {
        answer: Result<Vec<usize>>,
        shown: Mutex<Vec<RerankCandidate>>,
    }

    impl ScriptedJudge {
        fn new(answer: Result<Vec<usize>>) -> Arc<Self> {
            Arc::new(Self {
                answer,
                shown: Mutex::new(vec![]),
            })
        }
    }

    #[async_trait]
    impl RelevanceJudge for ScriptedJudge {
        async fn judge(
            &self,
            _query: &str,
            candidates: &[RerankCandidate],
            _limit: usize,
        ) -> Result<Vec<usize>> {
            *self.shown.lock().unwrap() = candidates.to_vec();
            match &self.answer {
                Ok(ranking) => Ok(ranking.clone()),
                Err(e) => Err(SiftError::Rerank(e.to_string())),
            }
        }
    }

    fn indexed(chunks: &[(&str, &str)]) -> SharedIndex {
        let mut index = VectorIndex::new("keyword-test", KeywordEmbedder::default().dimension());
        let drafts = chunks
            .iter()
            .map(|(file, text)| ChunkDraft {
                file_path: format!("{}/{}", ROOT, file),
                vector: KeywordEmbedder::vector(text),
                text: text.to_string(),
                start_line: 1,
                end_line: text.lines().count().max(1),
                file_tag: "tag".into(),
                language: Language::JavaScript,
            })
            .collect();
        index.upsert(drafts).unwrap();
        SharedIndex::new(index)
    }

    fn service(index: SharedIndex, judge: Option<Arc<dyn RelevanceJudge>>) -> SearchService {
        SearchService::new(
            index,
            Some(Arc::new(KeywordEmbedder::default())),
            judge,
            PathBuf::from(ROOT),
        )
    }

    fn options(limit: usize, threshold: f32, rerank: bool) -> SearchOptions {
        SearchOptions::new(limit, threshold, rerank).unwrap()
    }

    fn ranked_sample() -> SharedIndex {
        indexed(&[
            ("a.js", "function parseJson(input) { return JSON.parse(input) }"),
            ("b.js", "function parseAlpha(input) { return input }"),
            ("c.js", "function jsonBeta(value) { return value }"),
        ])
    }

    #[tokio::test]
    async fn test_parse_json_query_returns_only_relevant_chunk() {
        let index = indexed(&[
            ("json.js", "function parseJson(text) { return JSON.parse(text) }"),
            ("ui.js", "function renderButton() { return '<button/>' }"),
        ]);
        let service = service(index, None);

        let hits = service
            .search("parse JSON", &options(10, 0.5, false))
            .await
            .unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].file_path, "json.js");
        assert!((hits[0].score - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_results_respect_threshold_and_order() {
        let service = service(ranked_sample(), None);

        let hits = service
            .search("parse json", &options(10, 0.4, false))
            .await
            .unwrap();

        assert_eq!(hits.len(), 3);
        assert!(hits.iter().all(|h| h.score >= 0.4));
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
        assert_eq!(hits[0].file_path, "a.js");

        let strict = service
            .search("parse json", &options(10, 0.9, false))
            .await
            .unwrap();
        assert_eq!(strict.len(), 1);
    }

    #[tokio::test]
    async fn test_limit_truncates() {
        let service = service(ranked_sample(), None);
        let hits = service
            .search("parse json", &options(2, 0.0, false))
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn test_huge_limit_does_not_overflow() {
        let service = service(ranked_sample(), None);
        let hits = service
            .search("parse json", &options(usize::MAX, 0.0, false))
            .await
            .unwrap();
        assert_eq!(hits.len(), 3);
    }

    #[tokio::test]
    async fn test_near_empty_chunks_are_dropped() {
        let index = indexed(&[("a.js", "json"), ("b.js", "parse the json")]);
        let service = service(index, None);

        let hits = service
            .search("json", &options(10, 0.0, false))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].file_path, "b.js");
    }

    #[tokio::test]
    async fn test_rerank_reorders_and_sees_no_scores() {
        let judge = ScriptedJudge::new(Ok(vec![2, 0]));
        let service = service(ranked_sample(), Some(judge.clone()));

        let hits = service
            .search("parse json", &options(10, 0.4, true))
            .await
            .unwrap();

        let files: Vec<&str> = hits.iter().map(|h| h.file_path.as_str()).collect();
        assert_eq!(files.len(), 2);
        assert_eq!(files[1], "a.js");

        let shown = judge.shown.lock().unwrap().clone();
        assert_eq!(shown.len(), 3);
        assert_eq!(shown[0].path, "a.js");
        assert_eq!(shown[0].index, 0);
    }

    #[tokio::test]
    async fn test_rerank_fallbacks_keep_similarity_order() {
        let baseline = service(ranked_sample(), None)
            .search("parse json", &options(10, 0.4, false))
            .await
            .unwrap();

        for answer in [
            Ok(vec![7, 9]),
            Ok(vec![]),
            Err(SiftError::Rerank("timeout".into())),
        ] {
            let service = service(ranked_sample(), Some(ScriptedJudge::new(answer)));
            let hits = service
                .search("parse json", &options(10, 0.4, true))
                .await
                .unwrap();
            assert_eq!(hits, baseline);
        }
    }

    #[tokio::test]
    async fn test_rerank_disabled_skips_judge() {
        let judge = ScriptedJudge::new(Ok(vec![1]));
        let service = service(ranked_sample(), Some(judge.clone()));

        service
            .search("parse json", &options(10, 0.5, false))
            .await
            .unwrap();
        assert!(judge.shown.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_without_provider_search_is_empty() {
        let service = SearchService::new(ranked_sample(), None, None, PathBuf::from(ROOT));
        let hits = service
            .search("parse json", &SearchOptions::default())
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_stats() {
        let stats = service(ranked_sample(), None).stats().await;
        assert_eq!(stats.files, 3);
        assert_eq!(stats.chunks, 3);
        assert_eq!(stats.model, "keyword-test");
    }

    #[test]
    fn test_format_results_json() {
        let hits = vec![SearchHit {
            file_path: "src/lib.rs".into(),
            text: "fn main() {}".into(),
            start_line: 3,
            end_line: 4,
            score: 0.75,
            language: Language::Rust,
        }];

        let json: serde_json::Value =
            serde_json::from_str(&format_results_json(&hits).unwrap()).unwrap();
        assert_eq!(json[0]["file"], "src/lib.rs");
        assert_eq!(json[0]["start_line"], 3);
        assert_eq!(json[0]["content"], "fn main() {}");
    }

    #[test]
    fn test_format_results_shows_line_range() {
        colored::control::set_override(false);
        let hits = vec![SearchHit {
            file_path: "src/lib.rs".into(),
            text: "fn main() {}\n".into(),
            start_line: 3,
            end_line: 4,
            score: 0.75,
            language: Language::Rust,
        }];

        let output = format_results(&hits, true);
        assert!(output.contains("src/lib.rs:3-4"));
        assert!(output.contains("(75%)"));
        assert!(output.contains("fn main() {}"));
    }
}
