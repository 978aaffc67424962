//! LLM-based chunk relevance scoring.
//!
//! Each candidate chunk gets one model call asking for a 0-10 relevance
//! rating of the chunk text against the question. Ratings are parsed from
//! the first token of the reply; a failed call or unparseable reply scores
//! 0.0 and is logged rather than aborting the request. Chunks at or above
//! `min_score` are ranked descending (stable, so ties keep original chunk
//! order) and truncated to `top_k`.
//!
//! Calls are issued sequentially. This is one model round-trip per chunk,
//! sized for small documents; there is no batching and no cross-request
//! cache.

use anyhow::{anyhow, Result};
use tracing::warn;

use crate::config::RetrievalConfig;
use crate::gateway::ModelGateway;
use crate::models::Chunk;

/// A chunk that survived ranking, with its relevance rating.
#[derive(Debug, Clone)]
pub struct RankedChunk {
    pub chunk: Chunk,
    pub score: f64,
}

fn score_prompt(question: &str, chunk_text: &str) -> String {
    format!(
        "Question: {}\n\nText: {}\n\nOn a scale of 0-10, how relevant is this text to answering the question? Reply with only a number.",
        question, chunk_text
    )
}

/// Extracts a 0-10 rating from a model reply: the first whitespace-separated
/// token parsed as a float, clamped into range. Returns `None` when the
/// reply does not start with a number.
pub(crate) fn parse_score(reply: &str) -> Option<f64> {
    let token = reply.split_whitespace().next()?;
    let token = token.trim_matches(|c: char| !c.is_ascii_digit() && c != '.');
    let value: f64 = token.parse().ok()?;
    Some(value.clamp(0.0, 10.0))
}

/// Ranks `chunks` by LLM-rated relevance to `question`.
///
/// A single failing or unparseable scoring call demotes that chunk to the
/// minimum score without failing the request. Only when every call fails
/// (the runtime is plainly unreachable) does the whole ranking error out.
pub async fn rank_chunks(
    gateway: &dyn ModelGateway,
    question: &str,
    chunks: &[Chunk],
    model: &str,
    retrieval: &RetrievalConfig,
) -> Result<Vec<RankedChunk>> {
    let mut scored: Vec<(f64, &Chunk)> = Vec::with_capacity(chunks.len());
    let mut failures = 0usize;
    let mut last_error: Option<anyhow::Error> = None;

    for (index, chunk) in chunks.iter().enumerate() {
        let prompt = score_prompt(question, &chunk.text);
        let score = match gateway.generate(model, &prompt).await {
            Ok(reply) => match parse_score(&reply) {
                Some(score) => score,
                None => {
                    warn!(chunk = index, reply = %reply.trim(), "unparseable relevance rating, scoring 0");
                    0.0
                }
            },
            Err(e) => {
                warn!(chunk = index, error = %e, "relevance call failed, scoring 0");
                failures += 1;
                last_error = Some(e);
                0.0
            }
        };
        scored.push((score, chunk));
    }

    if !chunks.is_empty() && failures == chunks.len() {
        let cause = last_error.unwrap_or_else(|| anyhow!("no scoring calls succeeded"));
        return Err(cause.context("relevance scoring failed for every chunk"));
    }

    scored.retain(|(score, _)| *score >= retrieval.min_score);
    // Stable sort: equal scores keep original chunk order.
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(retrieval.top_k);

    Ok(scored
        .into_iter()
        .map(|(score, chunk)| RankedChunk {
            chunk: chunk.clone(),
            score,
        })
        .collect())
}
