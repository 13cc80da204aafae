//! Retrieval pipeline: query expansion, multi-query vector search,
//! deduplication, reranking, context expansion, and context assembly.
//!
//! Retrieval never fails outright: the mandatory stages degrade to the
//! original query and raw similarity order, and a store outage yields an
//! empty result set rather than an error. Each degraded stage logs at
//! `warn` so operators can see what was skipped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::config::Config;
use crate::embedding::EmbeddingClient;
use crate::llm::LlmClient;
use crate::models::{ChunkMetadata, RagContext, RetrievedChunk, RetrievedFaq};
use crate::store::{Filter, ScoredPoint, VectorStore};

/// How candidate chunks are reordered after deduplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RerankMode {
    Off,
    #[default]
    Keyword,
    /// Cross-encoder scoring over the top candidates; falls back to
    /// keyword reranking when the model call fails.
    Llm,
}

/// Whether query expansion actually ran for a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpansionOutcome {
    Applied,
    /// Expansion was requested but the model call failed or parsed to
    /// nothing; only the original query was searched.
    Degraded,
    Disabled,
}

/// Per-call retrieval knobs. `None` fields fall back to the configured
/// defaults.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub limit: Option<usize>,
    pub min_score: Option<f32>,
    pub source_ids: Vec<String>,
    pub category: Option<String>,
    pub include_faqs: bool,
    pub expand_query: bool,
    pub rerank: RerankMode,
    pub expand_context: bool,
    pub hybrid: bool,
}

pub struct RetrievalService {
    store: Arc<dyn VectorStore>,
    embedder: EmbeddingClient,
    llm: LlmClient,
    config: Config,
}

/// How many of the top candidates the cross-encoder actually scores.
const RERANK_DEPTH: usize = 10;
const RANK_TAIL_PENALTY: f32 = 0.75;
const PHRASE_BOOST: f32 = 1.2;

impl RetrievalService {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: EmbeddingClient,
        llm: LlmClient,
        config: Config,
    ) -> Self {
        Self {
            store,
            embedder,
            llm,
            config,
        }
    }

    pub async fn search(
        &self,
        query: &str,
        tenant_id: &str,
        options: &SearchOptions,
    ) -> RagContext {
        let started = Instant::now();
        let limit = options.limit.unwrap_or(self.config.retrieval.limit).max(1);
        let min_score = options.min_score.unwrap_or(self.config.retrieval.min_score);

        let (queries, expansion) = self.expand(query, options).await;
        if expansion == ExpansionOutcome::Degraded {
            warn!("query expansion degraded, searching the original query only");
        }

        let vectors = match self.embedder.embed_batch(&queries).await {
            Ok(batch) => batch.vectors,
            Err(e) => {
                warn!(error = %e, "query embedding failed, returning empty results");
                return empty_context(&queries, started);
            }
        };

        let fetch = limit * self.config.retrieval.fetch_multiplier.max(1);
        let chunk_filter = self.chunk_filter(tenant_id, options);
        let faq_filter = self.faq_filter(tenant_id, options);

        let chunk_searches = vectors.iter().map(|v| {
            self.store.search(
                &self.config.vector_store.chunk_collection,
                v,
                fetch,
                &chunk_filter,
                Some(min_score),
            )
        });
        let mut chunk_hits: Vec<ScoredPoint> = Vec::new();
        for result in join_all(chunk_searches).await {
            match result {
                Ok(hits) => chunk_hits.extend(hits),
                Err(e) => warn!(error = %e, "chunk search failed for one query variant"),
            }
        }

        let mut faq_hits: Vec<ScoredPoint> = Vec::new();
        if options.include_faqs {
            let faq_searches = vectors.iter().map(|v| {
                self.store.search(
                    &self.config.vector_store.faq_collection,
                    v,
                    fetch,
                    &faq_filter,
                    Some(min_score),
                )
            });
            for result in join_all(faq_searches).await {
                match result {
                    Ok(hits) => faq_hits.extend(hits),
                    Err(e) => warn!(error = %e, "faq search failed for one query variant"),
                }
            }
        }

        let mut candidates = dedup_chunks(chunk_hits);
        let faqs = dedup_faqs(faq_hits);

        if options.hybrid {
            self.blend_keyword_scan(query, &chunk_filter, &mut candidates)
                .await;
        }

        match options.rerank {
            RerankMode::Off => {
                candidates.sort_by(compare_points);
            }
            RerankMode::Keyword => rerank_keyword(query, &mut candidates),
            RerankMode::Llm => self.rerank_llm(query, &mut candidates).await,
        }
        candidates.truncate(limit);

        let mut chunks: Vec<RetrievedChunk> = candidates
            .into_iter()
            .map(|p| RetrievedChunk {
                id: p.id,
                source_id: p.payload.source_id,
                chunk_index: p.payload.chunk_index,
                content: p.payload.content,
                score: p.score,
                metadata: p.payload.metadata,
                expanded_context: Vec::new(),
            })
            .collect();

        if options.expand_context {
            self.expand_context(tenant_id, &mut chunks).await;
        }

        let mut faqs: Vec<RetrievedFaq> = faqs
            .into_iter()
            .map(|p| {
                let (question, answer) = split_faq_content(&p.payload.content);
                RetrievedFaq {
                    id: p.id,
                    question,
                    answer,
                    score: p.score,
                }
            })
            .collect();
        faqs.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        faqs.truncate(limit);

        let context = assemble_context(&chunks, &faqs, &queries);
        debug!(
            chunks = chunks.len(),
            faqs = faqs.len(),
            variants = queries.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "retrieval complete"
        );

        RagContext {
            chunks,
            faqs,
            queries,
            elapsed_ms: started.elapsed().as_millis() as u64,
            context,
        }
    }

    async fn expand(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> (Vec<String>, ExpansionOutcome) {
        let mut queries = vec![query.to_string()];
        if !options.expand_query {
            return (queries, ExpansionOutcome::Disabled);
        }
        if !self.llm.is_enabled() {
            return (queries, ExpansionOutcome::Disabled);
        }
        match self
            .llm
            .expand_query(query, self.config.retrieval.max_expansions)
            .await
        {
            Some(variants) if !variants.is_empty() => {
                queries.extend(variants);
                (queries, ExpansionOutcome::Applied)
            }
            _ => (queries, ExpansionOutcome::Degraded),
        }
    }

    fn chunk_filter(&self, tenant_id: &str, options: &SearchOptions) -> Filter {
        let mut filter = Filter::tenant(tenant_id);
        if let Some(category) = &options.category {
            filter = filter.with_category(category);
        }
        filter.with_sources(&options.source_ids)
    }

    fn faq_filter(&self, tenant_id: &str, options: &SearchOptions) -> Filter {
        let mut filter = Filter::tenant(tenant_id);
        if let Some(category) = &options.category {
            filter = filter.with_category(category);
        }
        filter
    }

    /// Hybrid mode: a bounded keyword scan over the tenant's chunks,
    /// blended into the semantic scores. The page cap bounds latency on
    /// large tenants; a partial scan is acceptable by design of the knob.
    async fn blend_keyword_scan(
        &self,
        query: &str,
        filter: &Filter,
        candidates: &mut Vec<ScoredPoint>,
    ) {
        let keywords = query_keywords(query);
        if keywords.is_empty() {
            return;
        }
        let alpha = self.config.retrieval.hybrid_alpha;
        let collection = &self.config.vector_store.chunk_collection;

        let mut keyword_scores: HashMap<String, (f32, ScoredPoint)> = HashMap::new();
        let mut offset = None;
        for _ in 0..self.config.retrieval.max_scan_pages {
            let page = match self
                .store
                .scroll(
                    collection,
                    filter,
                    self.config.retrieval.scan_page_size,
                    offset.clone(),
                )
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    warn!(error = %e, "hybrid keyword scan aborted");
                    break;
                }
            };
            for point in page.points {
                let score = keyword_overlap(&keywords, &point.payload.content);
                if score > 0.0 {
                    keyword_scores.insert(
                        point.id.clone(),
                        (
                            score,
                            ScoredPoint {
                                id: point.id,
                                score: 0.0,
                                payload: point.payload,
                            },
                        ),
                    );
                }
            }
            match page.next_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        for candidate in candidates.iter_mut() {
            let keyword = keyword_scores
                .remove(&candidate.id)
                .map(|(s, _)| s)
                .unwrap_or(0.0);
            candidate.score = alpha * candidate.score + (1.0 - alpha) * keyword;
        }
        // Keyword-only hits enter with zero semantic contribution.
        for (_, (score, mut point)) in keyword_scores {
            point.score = (1.0 - alpha) * score;
            candidates.push(point);
        }
    }

    /// Cross-encoder rerank over the head of the ranking. Candidates the
    /// model never saw keep their similarity score scaled by a flat
    /// penalty so they cannot outrank freshly scored ones by default.
    async fn rerank_llm(&self, query: &str, candidates: &mut Vec<ScoredPoint>) {
        candidates.sort_by(compare_points);
        let depth = candidates.len().min(RERANK_DEPTH);
        let passages: Vec<String> = candidates[..depth]
            .iter()
            .map(|p| p.payload.content.clone())
            .collect();
        match self.llm.rerank_scores(query, &passages).await {
            Some(scores) => {
                for (candidate, llm_score) in candidates[..depth].iter_mut().zip(scores) {
                    candidate.score *= 0.5 + llm_score;
                }
                for candidate in candidates[depth..].iter_mut() {
                    candidate.score *= RANK_TAIL_PENALTY;
                }
                candidates.sort_by(compare_points);
            }
            None => {
                warn!("cross-encoder rerank unavailable, falling back to keyword rerank");
                rerank_keyword(query, candidates);
            }
        }
    }

    /// Attach sibling chunk content to topic-chunked results. Sibling
    /// lookups are tenant-checked even though ids are unguessable.
    async fn expand_context(&self, tenant_id: &str, chunks: &mut [RetrievedChunk]) {
        let collection = &self.config.vector_store.chunk_collection;
        for chunk in chunks.iter_mut() {
            let sibling_ids = match &chunk.metadata {
                ChunkMetadata::Topic { sibling_ids, .. } if !sibling_ids.is_empty() => {
                    sibling_ids.clone()
                }
                _ => continue,
            };
            match self.store.get_by_ids(collection, &sibling_ids).await {
                Ok(points) => {
                    chunk.expanded_context = points
                        .into_iter()
                        .filter(|p| p.payload.tenant_id == tenant_id)
                        .map(|p| p.payload.content)
                        .collect();
                }
                Err(e) => warn!(error = %e, "context expansion lookup failed"),
            }
        }
    }
}

fn empty_context(queries: &[String], started: Instant) -> RagContext {
    RagContext {
        chunks: Vec::new(),
        faqs: Vec::new(),
        queries: queries.to_vec(),
        elapsed_ms: started.elapsed().as_millis() as u64,
        context: String::new(),
    }
}

fn compare_points(a: &ScoredPoint, b: &ScoredPoint) -> std::cmp::Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| a.id.cmp(&b.id))
}

/// Collapse multi-variant hits: one candidate per `(source_id,
/// chunk_index)`, keeping the best score seen.
fn dedup_chunks(hits: Vec<ScoredPoint>) -> Vec<ScoredPoint> {
    let mut best: HashMap<(String, usize), ScoredPoint> = HashMap::new();
    for hit in hits {
        let key = (hit.payload.source_id.clone(), hit.payload.chunk_index);
        match best.get(&key) {
            Some(existing) if existing.score >= hit.score => {}
            _ => {
                best.insert(key, hit);
            }
        }
    }
    best.into_values().collect()
}

fn dedup_faqs(hits: Vec<ScoredPoint>) -> Vec<ScoredPoint> {
    let mut best: HashMap<String, ScoredPoint> = HashMap::new();
    for hit in hits {
        match best.get(&hit.id) {
            Some(existing) if existing.score >= hit.score => {}
            _ => {
                best.insert(hit.id.clone(), hit);
            }
        }
    }
    best.into_values().collect()
}

/// Lowercased query terms of three or more characters.
fn query_keywords(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 3)
        .map(|w| w.to_lowercase())
        .collect()
}

/// Fraction of query keywords present in the content.
fn keyword_overlap(keywords: &[String], content: &str) -> f32 {
    if keywords.is_empty() {
        return 0.0;
    }
    let content = content.to_lowercase();
    let present = keywords.iter().filter(|k| content.contains(k.as_str())).count();
    present as f32 / keywords.len() as f32
}

/// Keyword rerank: similarity scaled by keyword overlap, with a boost
/// when the content contains the query verbatim.
fn rerank_keyword(query: &str, candidates: &mut Vec<ScoredPoint>) {
    let keywords = query_keywords(query);
    let phrase = query.trim().to_lowercase();
    for candidate in candidates.iter_mut() {
        let mut keyword_score = keyword_overlap(&keywords, &candidate.payload.content);
        if !phrase.is_empty() && candidate.payload.content.to_lowercase().contains(&phrase) {
            keyword_score *= PHRASE_BOOST;
        }
        candidate.score *= 0.5 + keyword_score;
    }
    candidates.sort_by(compare_points);
}

/// FAQ payload content is `question \n answer` with a single-line
/// question; see the FAQ upsert path.
fn split_faq_content(content: &str) -> (String, String) {
    match content.split_once('\n') {
        Some((q, a)) => (q.to_string(), a.to_string()),
        None => (content.to_string(), String::new()),
    }
}

/// Build the generation-ready context block: FAQs first, then numbered
/// chunks with source attribution, then a trailing note naming the
/// expanded queries that were searched.
fn assemble_context(
    chunks: &[RetrievedChunk],
    faqs: &[RetrievedFaq],
    queries: &[String],
) -> String {
    let mut out = String::new();
    for faq in faqs {
        out.push_str(&format!("Q: {}\nA: {}\n\n", faq.question, faq.answer));
    }
    for (i, chunk) in chunks.iter().enumerate() {
        out.push_str(&format!(
            "[{}] (source {}, chunk {}) {}\n",
            i + 1,
            chunk.source_id,
            chunk.chunk_index,
            chunk.content
        ));
        for extra in &chunk.expanded_context {
            out.push_str(&format!("    related: {}\n", extra));
        }
        out.push('\n');
    }
    if queries.len() > 1 {
        out.push_str(&format!(
            "# expanded queries: {}\n",
            queries[1..].join(" | ")
        ));
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VectorPayload;

    fn point(id: &str, source: &str, index: usize, content: &str, score: f32) -> ScoredPoint {
        ScoredPoint {
            id: id.to_string(),
            score,
            payload: VectorPayload {
                tenant_id: "t".to_string(),
                source_id: source.to_string(),
                category: None,
                content: content.to_string(),
                chunk_index: index,
                token_count: 1,
                metadata: ChunkMetadata::Fixed,
            },
        }
    }

    #[test]
    fn dedup_keeps_max_score_per_chunk() {
        let hits = vec![
            point("a", "s1", 0, "x", 0.8),
            point("a", "s1", 0, "x", 0.9),
            point("b", "s1", 1, "y", 0.7),
        ];
        let mut deduped = dedup_chunks(hits);
        deduped.sort_by(compare_points);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].id, "a");
        assert!((deduped[0].score - 0.9).abs() < 1e-6);
    }

    #[test]
    fn keyword_overlap_is_a_fraction() {
        let keywords = query_keywords("refund policy timeline");
        assert_eq!(keywords.len(), 3);
        assert!((keyword_overlap(&keywords, "Our refund policy") - 2.0 / 3.0).abs() < 1e-6);
        assert_eq!(keyword_overlap(&keywords, "unrelated text"), 0.0);
    }

    #[test]
    fn short_words_are_not_keywords() {
        assert_eq!(query_keywords("is it on"), Vec::<String>::new());
        assert_eq!(query_keywords("how do refunds work"), vec!["how", "refunds", "work"]);
    }

    #[test]
    fn keyword_rerank_prefers_matching_content() {
        let mut candidates = vec![
            point("a", "s1", 0, "nothing relevant here", 0.80),
            point("b", "s1", 1, "the refund policy explained", 0.78),
        ];
        rerank_keyword("refund policy", &mut candidates);
        assert_eq!(candidates[0].id, "b");
    }

    #[test]
    fn exact_phrase_gets_boosted_over_scattered_keywords() {
        let mut candidates = vec![
            point("a", "s1", 0, "policy on travel; refund rules apply", 0.8),
            point("b", "s1", 1, "our refund policy is simple", 0.8),
        ];
        rerank_keyword("refund policy", &mut candidates);
        assert_eq!(candidates[0].id, "b");
    }

    #[test]
    fn faq_content_splits_on_first_newline() {
        let (q, a) = split_faq_content("How long?\n30 days.\nNo exceptions.");
        assert_eq!(q, "How long?");
        assert_eq!(a, "30 days.\nNo exceptions.");
    }

    #[test]
    fn context_lists_faqs_before_chunks() {
        let chunks = vec![RetrievedChunk {
            id: "c1".to_string(),
            source_id: "s1".to_string(),
            chunk_index: 0,
            content: "Refunds take 30 days.".to_string(),
            score: 0.9,
            metadata: ChunkMetadata::Fixed,
            expanded_context: vec!["Contact support to start one.".to_string()],
        }];
        let faqs = vec![RetrievedFaq {
            id: "f1".to_string(),
            question: "How long do refunds take?".to_string(),
            answer: "About 30 days.".to_string(),
            score: 0.95,
        }];
        let queries = vec!["refunds".to_string(), "money back".to_string()];
        let context = assemble_context(&chunks, &faqs, &queries);
        let faq_pos = context.find("Q: How long").unwrap();
        let chunk_pos = context.find("[1] (source s1").unwrap();
        assert!(faq_pos < chunk_pos);
        assert!(context.contains("related: Contact support"));
        assert!(context.ends_with("# expanded queries: money back"));
    }
}
