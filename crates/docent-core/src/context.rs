//! Bounded context assembly.
//!
//! Turns a retrieval result into the text block handed to the QA prompt.
//! Each chunk becomes a block headed by a numeric label, its source, and
//! its locator. The labels are what the model cites.

use crate::models::{Chunk, ScoredChunk};

/// Smallest tail of a chunk worth including when the budget runs out.
const MIN_PARTIAL_CHARS: usize = 64;

/// A chunk that made it into the context, with its citation label.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextSource {
    /// 1-based label shown to the model as `[label]`.
    pub label: usize,
    pub chunk: Chunk,
    pub score: f64,
    /// The chunk text was cut to fit the budget.
    pub truncated: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssembledContext {
    pub text: String,
    pub sources: Vec<ContextSource>,
}

impl AssembledContext {
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn source(&self, label: usize) -> Option<&ContextSource> {
        label
            .checked_sub(1)
            .and_then(|i| self.sources.get(i))
    }
}

/// Concatenate `results` in rank order into at most `max_chars` bytes.
///
/// Whole blocks are added while they fit. The first block that does not
/// fit is cut to the remaining budget if at least a short tail of text
/// fits, and assembly stops there. Chunks with identical text are only
/// included once.
pub fn assemble(results: &[ScoredChunk], max_chars: usize) -> AssembledContext {
    let mut ctx = AssembledContext::default();

    for result in results {
        if ctx
            .sources
            .iter()
            .any(|s| s.chunk.hash == result.chunk.hash)
        {
            continue;
        }
        let label = ctx.sources.len() + 1;
        let separator = if ctx.text.is_empty() { "" } else { "\n\n" };
        let header = format!(
            "[{}] {} ({})\n",
            label, result.chunk.source, result.chunk.locator
        );
        let body = result.chunk.text.trim();
        let fixed = ctx.text.len() + separator.len() + header.len();

        if fixed + body.len() <= max_chars {
            ctx.text.push_str(separator);
            ctx.text.push_str(&header);
            ctx.text.push_str(body);
            ctx.sources.push(ContextSource {
                label,
                chunk: result.chunk.clone(),
                score: result.score,
                truncated: false,
            });
            continue;
        }

        let room = max_chars.saturating_sub(fixed);
        let cut = floor_char_boundary(body, room);
        if cut >= MIN_PARTIAL_CHARS.min(body.len()) && cut > 0 {
            ctx.text.push_str(separator);
            ctx.text.push_str(&header);
            ctx.text.push_str(&body[..cut]);
            ctx.sources.push(ContextSource {
                label,
                chunk: result.chunk.clone(),
                score: result.score,
                truncated: true,
            });
        }
        break;
    }

    ctx
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}
