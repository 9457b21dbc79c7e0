//! Grounding-context assembly and the system instruction built around it.
//!
//! Passages are rendered in retrieval order, each tagged with its source so the model can
//! cite it. An optional token budget (estimated with the `cl100k_base` encoding) stops the
//! context from growing past what the language model should be sent; passages that do not
//! fit are left out entirely rather than truncated mid-sentence.

use crate::processing::DocumentChunk;
use std::sync::Arc;
use tiktoken_rs::cl100k_base;

type TokenCounter = Arc<dyn Fn(&str) -> usize + Send + Sync>;

const SYSTEM_PREAMBLE: &str = "You are a helpful AI assistant who answers the user query based on the available context from PDF File.";
const EMPTY_CONTEXT_NOTE: &str = "(no matching passages were found)";

/// Token limit applied to the grounding context.
#[derive(Clone)]
pub struct ContextBudget {
    max_tokens: Option<usize>,
    counter: TokenCounter,
}

impl std::fmt::Debug for ContextBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextBudget")
            .field("max_tokens", &self.max_tokens)
            .finish_non_exhaustive()
    }
}

impl ContextBudget {
    /// Build a budget; `None` admits every passage but still estimates the token count.
    pub fn new(max_tokens: Option<usize>) -> Self {
        Self {
            max_tokens,
            counter: build_counter(),
        }
    }

    /// Configured limit, if any.
    pub fn max_tokens(&self) -> Option<usize> {
        self.max_tokens
    }

    /// Estimated token count for `text`.
    pub fn count(&self, text: &str) -> usize {
        (self.counter)(text)
    }
}

fn build_counter() -> TokenCounter {
    match cl100k_base() {
        Ok(encoding) => {
            let encoding = Arc::new(encoding);
            Arc::new(move |segment: &str| encoding.encode_ordinary(segment).len())
        }
        Err(error) => {
            tracing::warn!(%error, "cl100k_base unavailable; estimating tokens by whitespace");
            Arc::new(|segment: &str| segment.split_whitespace().count())
        }
    }
}

/// Context text plus how many of the offered passages made it in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledContext {
    /// Rendered passages, separated by blank lines.
    pub text: String,
    /// Number of leading passages included.
    pub included: usize,
    /// Estimated tokens in `text`.
    pub tokens: usize,
}

fn render_passage(position: usize, chunk: &DocumentChunk) -> String {
    match chunk.page_number {
        Some(page) => format!(
            "[{position}] {} (page {page})\n{}",
            chunk.source_filename,
            chunk.text.trim()
        ),
        None => format!("[{position}] {}\n{}", chunk.source_filename, chunk.text.trim()),
    }
}

/// Render `chunks` in order until the budget is exhausted.
pub fn assemble_context(chunks: &[DocumentChunk], budget: &ContextBudget) -> AssembledContext {
    let mut blocks = Vec::with_capacity(chunks.len());
    let mut tokens = 0usize;

    for (index, chunk) in chunks.iter().enumerate() {
        let block = render_passage(index + 1, chunk);
        let cost = budget.count(&block);
        if let Some(limit) = budget.max_tokens
            && tokens + cost > limit
        {
            tracing::debug!(
                included = blocks.len(),
                offered = chunks.len(),
                limit,
                "Context budget reached; remaining passages left out"
            );
            break;
        }
        tokens += cost;
        blocks.push(block);
    }

    AssembledContext {
        included: blocks.len(),
        text: blocks.join("\n\n"),
        tokens,
    }
}

/// System instruction embedding the grounding context.
pub fn system_prompt(context: &str) -> String {
    let body = if context.trim().is_empty() {
        EMPTY_CONTEXT_NOTE
    } else {
        context
    };
    format!("{SYSTEM_PREAMBLE}\nContext:\n{body}\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(index: usize, text: &str, page: Option<u32>) -> DocumentChunk {
        DocumentChunk {
            text: text.into(),
            sequence_index: index,
            source_filename: "policy.pdf".into(),
            page_number: page,
        }
    }

    #[test]
    fn renders_passages_in_order_with_sources() {
        let chunks = vec![
            chunk(3, "Refunds are issued within 30 days.", Some(2)),
            chunk(0, "Shipping is free.", None),
        ];
        let context = assemble_context(&chunks, &ContextBudget::new(None));
        assert_eq!(context.included, 2);
        assert_eq!(
            context.text,
            "[1] policy.pdf (page 2)\nRefunds are issued within 30 days.\n\n[2] policy.pdf\nShipping is free."
        );
        assert!(context.tokens > 0);
    }

    #[test]
    fn budget_leaves_out_passages_that_do_not_fit() {
        let long = "word ".repeat(400);
        let chunks = vec![chunk(0, "Short passage.", None), chunk(1, &long, None)];
        let budget = ContextBudget::new(Some(50));
        let context = assemble_context(&chunks, &budget);
        assert_eq!(context.included, 1);
        assert!(context.tokens <= 50);
        assert!(!context.text.contains("word word"));
    }

    #[test]
    fn zero_budget_yields_empty_context() {
        let chunks = vec![chunk(0, "Anything.", None)];
        let context = assemble_context(&chunks, &ContextBudget::new(Some(0)));
        assert_eq!(context.included, 0);
        assert!(context.text.is_empty());
    }

    #[test]
    fn system_prompt_embeds_context() {
        let prompt = system_prompt("[1] a.pdf\nhello");
        assert!(prompt.starts_with(SYSTEM_PREAMBLE));
        assert!(prompt.contains("Context:\n[1] a.pdf\nhello"));
        assert!(system_prompt("").contains(EMPTY_CONTEXT_NOTE));
    }
}
