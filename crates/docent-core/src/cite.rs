//! Citation post-processing.
//!
//! The QA prompt asks the model to cite context blocks as `[n]` or
//! `[n, m]`. This module resolves those markers against the assembled
//! context. Markers naming a label that is not in the context are removed
//! from the answer, so an answer can only ever cite retrieved chunks.

use std::fmt;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::context::{AssembledContext, ContextSource};
use crate::models::Locator;

/// A reference from an answer back to a retrieved chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub label: usize,
    pub chunk_id: String,
    pub document_id: String,
    pub source: String,
    pub locator: Locator,
    pub score: f64,
    /// The answer text carries a `[label]` marker for this chunk. False
    /// when the model cited nothing and every context chunk is listed.
    pub referenced: bool,
}

impl Citation {
    fn from_source(src: &ContextSource, referenced: bool) -> Self {
        Self {
            label: src.label,
            chunk_id: src.chunk.id.clone(),
            document_id: src.chunk.document_id.clone(),
            source: src.chunk.source.clone(),
            locator: src.chunk.locator.clone(),
            score: src.score,
            referenced,
        }
    }
}

impl fmt::Display for Citation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}, {}", self.label, self.source, self.locator)
    }
}

/// Answer text with its resolved citations.
#[derive(Debug, Clone, PartialEq)]
pub struct CitedText {
    pub text: String,
    pub citations: Vec<Citation>,
}

fn marker_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([ \t]?)\[(\d+(?:\s*,\s*\d+)*)\]").expect("citation marker pattern"))
}

/// Resolve `[n]` markers in `completion` against `context`.
///
/// Citations come back in order of first mention. If the completion has
/// no valid marker but the context is non-empty, every context chunk is
/// listed with `referenced = false`.
pub fn attach_citations(completion: &str, context: &AssembledContext) -> CitedText {
    let mut cited: Vec<usize> = Vec::new();

    let text = marker_pattern().replace_all(completion, |caps: &Captures<'_>| {
        let valid: Vec<usize> = caps[2]
            .split(',')
            .filter_map(|n| n.trim().parse::<usize>().ok())
            .filter(|n| context.source(*n).is_some())
            .collect();
        for n in &valid {
            if !cited.contains(n) {
                cited.push(*n);
            }
        }
        // A dropped marker takes its leading blank with it.
        if valid.is_empty() {
            String::new()
        } else {
            let labels: Vec<String> = valid.iter().map(|n| n.to_string()).collect();
            format!("{}[{}]", &caps[1], labels.join(", "))
        }
    });
    let text = text.into_owned();

    let citations = if cited.is_empty() {
        context
            .sources
            .iter()
            .map(|s| Citation::from_source(s, false))
            .collect()
    } else {
        cited
            .iter()
            .filter_map(|n| context.source(*n))
            .map(|s| Citation::from_source(s, true))
            .collect()
    };

    CitedText { text, citations }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{chunk_pages, ChunkOptions};
    use crate::context::assemble;
    use crate::models::ScoredChunk;

    fn context() -> AssembledContext {
        let pages = vec![
            "Overview.".to_string(),
            "Revenue was 4.2M.".to_string(),
            "Hiring.".to_string(),
        ];
        let results: Vec<ScoredChunk> =
            chunk_pages("doc", "report.pdf", &pages, &ChunkOptions::default())
                .into_iter()
                .map(|chunk| ScoredChunk { chunk, score: 0.5 })
                .collect();
        assemble(&results, 10_000)
    }

    #[test]
    fn test_markers_resolve_in_mention_order() {
        let out = attach_citations("Revenue was 4.2M [2]. See also [1, 2].", &context());
        assert_eq!(out.text, "Revenue was 4.2M [2]. See also [1, 2].");
        let labels: Vec<usize> = out.citations.iter().map(|c| c.label).collect();
        assert_eq!(labels, vec![2, 1]);
        assert!(out.citations.iter().all(|c| c.referenced));
        assert_eq!(out.citations[0].locator, Locator::Page { page: 2 });
    }

    #[test]
    fn test_unknown_markers_are_removed() {
        let out = attach_citations("Profit rose [7]. Revenue fell [2, 9].", &context());
        assert_eq!(out.text, "Profit rose. Revenue fell [2].");
        assert_eq!(out.citations.len(), 1);
        assert_eq!(out.citations[0].label, 2);
    }

    #[test]
    fn test_no_markers_lists_all_sources_unreferenced() {
        let out = attach_citations("Revenue was 4.2M.", &context());
        assert_eq!(out.citations.len(), 3);
        assert!(out.citations.iter().all(|c| !c.referenced));
    }

    #[test]
    fn test_empty_context_never_cites() {
        let out = attach_citations("I think [1] says so.", &AssembledContext::default());
        assert!(out.citations.is_empty());
        assert_eq!(out.text, "I think says so.");
    }

    #[test]
    fn test_surrounding_text_is_left_alone() {
        let completion = "Steps:\n    - nested  item [2]\n\n```\nfn main()  { let x = a .b; }\n```\nUse .NET or [2024] data , ok.";
        let out = attach_citations(completion, &context());
        assert_eq!(
            out.text,
            "Steps:\n    - nested  item [2]\n\n```\nfn main()  { let x = a .b; }\n```\nUse .NET or data , ok."
        );
        assert_eq!(out.citations.len(), 1);
    }

    #[test]
    fn test_display() {
        let out = attach_citations("x [3]", &context());
        assert_eq!(out.citations[0].to_string(), "[3] report.pdf, page 3");
    }
}
