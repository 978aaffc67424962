//! Answer composition: prompt assembly, citation parsing, and confidence.
//!
//! Builds one prompt from the top-ranked chunks plus caller-supplied
//! conversation context, issues a single generate call (blocking or
//! streamed), and parses the reply into an [`Answer`] with provenance.
//!
//! Mapping model free-text back to structured locators is inherently fuzzy,
//! so it is isolated in [`parse_citations`] with a fixed grammar. Only
//! citations matching a locator actually present in the top-ranked chunk
//! set survive into the structured output; hallucinated citations are
//! dropped, and an answer with no valid citation is graded `low`.

use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;
use tracing::debug;

use crate::config::AnswerConfig;
use crate::gateway::{ModelGateway, TokenStream};
use crate::models::{Answer, Confidence, ConversationTurn, Locator, Reference};
use crate::score::RankedChunk;

/// Maximum reference snippet length in chars.
const SNIPPET_MAX_CHARS: usize = 200;

/// Canned reply when ranking produced no relevant chunks; no model call is
/// made in that case.
pub const NO_CONTEXT_ANSWER: &str =
    "I couldn't find relevant information in the document to answer this question.";

/// Recognized citation formats, case-insensitive:
/// `Page N`, `Section N`, `Lines N-M` (also `Line N-M`).
static CITATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:page\s+(\d+)|section\s+(\d+)|lines?\s+(\d+)\s*-\s*(\d+))").unwrap()
});

/// Builds the single answer prompt: system instruction, prior turns in
/// chronological order, locator-tagged excerpts, then the question.
pub(crate) fn build_prompt(
    question: &str,
    turns: &[ConversationTurn],
    ranked: &[RankedChunk],
) -> String {
    let mut prompt = String::from(
        "Based on the following document excerpts, answer the question. \
         If the answer isn't in the excerpts, say so clearly.\n\n",
    );

    if !turns.is_empty() {
        prompt.push_str("Previous conversation:\n");
        for turn in turns {
            prompt.push_str(&format!("Q: {}\nA: {}\n", turn.question, turn.answer));
        }
        prompt.push('\n');
    }

    prompt.push_str("Document excerpts:\n");
    for ranked_chunk in ranked {
        let labels = ranked_chunk
            .chunk
            .source_locators
            .iter()
            .map(|loc| loc.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        prompt.push_str(&format!("[{}]\n{}\n\n", labels, ranked_chunk.chunk.text));
    }

    prompt.push_str(&format!(
        "Question: {}\n\nAnswer with specific references to the document \
         (mention page numbers, sections, or line ranges where applicable, \
         e.g. \"Page 3\" or \"Lines 10-24\"). If the information is not in \
         the provided excerpts, clearly state that.",
        question
    ));
    prompt
}

/// Parses location citations out of model free text.
///
/// Grammar (case-insensitive): `Page N` | `Section N` | `Lines N-M`
/// (`Line N-M` also accepted). Returns locators in first-mention order,
/// de-duplicated. Matching against the actual top-K locator set happens
/// in [`finish`]; this function reports everything the text claims.
pub fn parse_citations(text: &str) -> Vec<Locator> {
    let mut cited = Vec::new();
    for caps in CITATION_RE.captures_iter(text) {
        let locator = if let Some(page) = caps.get(1) {
            match page.as_str().parse() {
                Ok(n) => Locator::Page(n),
                Err(_) => continue,
            }
        } else if let Some(section) = caps.get(2) {
            match section.as_str().parse() {
                Ok(n) => Locator::Section(n),
                Err(_) => continue,
            }
        } else {
            let (Ok(start), Ok(end)) = (caps[3].parse(), caps[4].parse()) else {
                continue;
            };
            Locator::Lines(start, end)
        };
        if !cited.contains(&locator) {
            cited.push(locator);
        }
    }
    cited
}

fn snippet(text: &str) -> String {
    if text.chars().count() <= SNIPPET_MAX_CHARS {
        text.to_string()
    } else {
        let head: String = text.chars().take(SNIPPET_MAX_CHARS).collect();
        format!("{}...", head)
    }
}

/// Maps a finished answer text onto references and a confidence grade.
///
/// Citations are filtered against the locators of the ranked chunks; each
/// surviving locator becomes a reference carrying a snippet of the first
/// ranked chunk that contains it. Confidence: `high` needs at least
/// `high_confidence_refs` references and `min_answer_chars` of answer text,
/// `medium` exactly one reference, `low` otherwise.
pub fn finish(
    ranked: &[RankedChunk],
    answer_text: &str,
    options: &AnswerConfig,
) -> (Vec<Reference>, Confidence) {
    let mut references = Vec::new();
    for locator in parse_citations(answer_text) {
        let source = ranked
            .iter()
            .find(|r| r.chunk.source_locators.contains(&locator));
        if let Some(ranked_chunk) = source {
            references.push(Reference {
                text: snippet(&ranked_chunk.chunk.text),
                metadata: locator,
            });
        }
    }

    if references.is_empty() {
        debug!("no valid citations found in answer, downgrading confidence");
    }

    let answer_chars = answer_text.trim().chars().count();
    let confidence = if references.len() >= options.high_confidence_refs
        && answer_chars >= options.min_answer_chars
    {
        Confidence::High
    } else if references.len() == 1 {
        Confidence::Medium
    } else {
        Confidence::Low
    };

    (references, confidence)
}

/// Composes a blocking answer for `question` over the ranked chunks.
///
/// An empty ranked set short-circuits to [`NO_CONTEXT_ANSWER`] with `low`
/// confidence and no model call.
pub async fn compose(
    gateway: &dyn ModelGateway,
    question: &str,
    ranked: &[RankedChunk],
    turns: &[ConversationTurn],
    model: &str,
    options: &AnswerConfig,
) -> Result<Answer> {
    if ranked.is_empty() {
        return Ok(Answer {
            answer: NO_CONTEXT_ANSWER.to_string(),
            references: Vec::new(),
            confidence: Confidence::Low,
        });
    }

    let prompt = build_prompt(question, turns, ranked);
    let answer_text = gateway.generate(model, &prompt).await?;
    let (references, confidence) = finish(ranked, &answer_text, options);

    Ok(Answer {
        answer: answer_text,
        references,
        confidence,
    })
}

/// Starts a streamed answer over the same prompt [`compose`] would build.
///
/// The caller forwards tokens as they arrive, accumulates the full text,
/// and calls [`finish`] once the stream ends to obtain references and
/// confidence. Callers must handle the empty-ranked case themselves (see
/// [`NO_CONTEXT_ANSWER`]); this function expects at least one chunk.
pub async fn compose_stream(
    gateway: &dyn ModelGateway,
    question: &str,
    ranked: &[RankedChunk],
    turns: &[ConversationTurn],
    model: &str,
) -> Result<TokenStream> {
    let prompt = build_prompt(question, turns, ranked);
    gateway.generate_stream(model, &prompt).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;

    fn ranked(text: &str, locators: Vec<Locator>) -> RankedChunk {
        RankedChunk {
            chunk: Chunk {
                text: text.to_string(),
                source_locators: locators,
            },
            score: 8.0,
        }
    }

    fn options() -> AnswerConfig {
        AnswerConfig {
            min_answer_chars: 80,
            high_confidence_refs: 2,
        }
    }

    #[test]
    fn citations_parse_documented_grammar() {
        let text = "See Page 3 and section 12; details in Lines 10-24 and line 1-5.";
        assert_eq!(
            parse_citations(text),
            vec![
                Locator::Page(3),
                Locator::Section(12),
                Locator::Lines(10, 24),
                Locator::Lines(1, 5),
            ]
        );
    }

    #[test]
    fn citations_deduplicated_in_first_mention_order() {
        let text = "Page 2 says X. Later, Page 1 and again Page 2.";
        assert_eq!(
            parse_citations(text),
            vec![Locator::Page(2), Locator::Page(1)]
        );
    }

    #[test]
    fn citations_ignore_unrelated_numbers() {
        assert!(parse_citations("There were 3 meetings over 10-24 days.").is_empty());
    }

    #[test]
    fn finish_drops_hallucinated_citations() {
        let top = vec![ranked("content about the topic", vec![Locator::Page(2)])];
        let answer = "As stated on Page 2 and Page 99, the topic is covered. ".repeat(3);
        let (refs, confidence) = finish(&top, &answer, &options());
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].metadata, Locator::Page(2));
        assert_eq!(confidence, Confidence::Medium);
    }

    #[test]
    fn finish_no_citations_means_low_and_empty() {
        let top = vec![ranked("some content", vec![Locator::Page(1)])];
        let (refs, confidence) = finish(&top, "The document does not say.", &options());
        assert!(refs.is_empty());
        assert_eq!(confidence, Confidence::Low);
    }

    #[test]
    fn finish_two_refs_and_long_answer_is_high() {
        let top = vec![
            ranked("first chunk", vec![Locator::Page(1)]),
            ranked("second chunk", vec![Locator::Page(2)]),
        ];
        let answer =
            "The schedule is described on Page 1, while the budget appears on Page 2; together \
             they show the project finishing in March.";
        let (refs, confidence) = finish(&top, answer, &options());
        assert_eq!(refs.len(), 2);
        assert_eq!(confidence, Confidence::High);
    }

    #[test]
    fn finish_two_refs_but_short_answer_is_not_high() {
        let top = vec![
            ranked("first", vec![Locator::Page(1)]),
            ranked("second", vec![Locator::Page(2)]),
        ];
        let (refs, confidence) = finish(&top, "Page 1 and Page 2.", &options());
        assert_eq!(refs.len(), 2);
        assert_eq!(confidence, Confidence::Low);
    }

    #[test]
    fn reference_snippet_truncated_to_200_chars() {
        let long = "z".repeat(500);
        let top = vec![ranked(&long, vec![Locator::Section(1)])];
        let answer = "Covered in Section 1. ".repeat(5);
        let (refs, _) = finish(&top, &answer, &options());
        assert_eq!(refs[0].text.chars().count(), SNIPPET_MAX_CHARS + 3);
        assert!(refs[0].text.ends_with("..."));
    }

    #[test]
    fn prompt_is_deterministic_and_chronological() {
        let turns = vec![
            ConversationTurn {
                question: "first?".to_string(),
                answer: "one".to_string(),
            },
            ConversationTurn {
                question: "second?".to_string(),
                answer: "two".to_string(),
            },
        ];
        let top = vec![ranked("excerpt text", vec![Locator::Lines(16, 30)])];
        let prompt = build_prompt("third?", &turns, &top);

        assert!(prompt.find("first?").unwrap() < prompt.find("second?").unwrap());
        assert!(prompt.contains("[Lines 16-30]\nexcerpt text"));
        assert!(prompt.contains("Question: third?"));
        assert_eq!(prompt, build_prompt("third?", &turns, &top));
    }

    #[tokio::test]
    async fn compose_short_circuits_on_empty_ranking() {
        struct PanicGateway;

        #[async_trait::async_trait]
        impl ModelGateway for PanicGateway {
            async fn list_models(&self) -> Result<Vec<String>> {
                unreachable!()
            }
            async fn generate(&self, _: &str, _: &str) -> Result<String> {
                panic!("compose must not call the model with no chunks");
            }
            async fn generate_stream(&self, _: &str, _: &str) -> Result<TokenStream> {
                unreachable!()
            }
        }

        let answer = compose(&PanicGateway, "q", &[], &[], "test", &options())
            .await
            .unwrap();
        assert_eq!(answer.answer, NO_CONTEXT_ANSWER);
        assert!(answer.references.is_empty());
        assert_eq!(answer.confidence, Confidence::Low);
    }
}
