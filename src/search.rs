//! `docent search`: retrieval without generation.
//!
//! Prints the chunks the answer pipeline would see for a query, best
//! first, with their locators and scores.

use anyhow::Result;

use docent_core::index::VectorIndex;
use docent_core::models::ScoredChunk;

use crate::bases::{resolve_base_name, DocumentBaseManager};
use crate::config::Config;
use crate::embedding::create_provider;

const EXCERPT_CHARS: usize = 200;

pub async fn run_search(
    config: &Config,
    base: Option<&str>,
    query: &str,
    k: Option<usize>,
) -> Result<()> {
    let manager = DocumentBaseManager::new(&config.bases.root);
    let base = manager.load(&resolve_base_name(config, base)?)?;
    let embedder = create_provider(&config.embedding)?;
    let store = base.open_store().await?;
    let k = k.unwrap_or(config.retrieval.top_k);

    let results = VectorIndex::new(&store, embedder.as_ref())
        .search(query, k)
        .await;
    store.close().await;
    let results = results?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, result) in results.iter().enumerate() {
        print!("{}", format_result(i + 1, result));
    }
    Ok(())
}

fn format_result(rank: usize, result: &ScoredChunk) -> String {
    let chunk = &result.chunk;
    format!(
        "{}. [{:.2}] {} ({})\n    excerpt: \"{}\"\n    id: {}\n\n",
        rank,
        result.score,
        chunk.source,
        chunk.locator,
        excerpt(&chunk.text, EXCERPT_CHARS),
        chunk.id
    )
}

/// First `max` chars of `text` on one line, with `...` if cut.
fn excerpt(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &flat[..cut]),
        None => flat,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docent_core::models::{Chunk, Locator};

    #[test]
    fn test_excerpt_flattens_and_cuts() {
        assert_eq!(excerpt("a\n b\t c", 10), "a b c");
        assert_eq!(excerpt("héllo wörld", 5), "héllo...");
    }

    #[test]
    fn test_format_result() {
        let r = ScoredChunk {
            chunk: Chunk {
                id: "c1".into(),
                document_id: "d".into(),
                source: "report.pdf".into(),
                chunk_index: 0,
                text: "Revenue was\n4.2M".into(),
                hash: "h".into(),
                locator: Locator::Page { page: 2 },
            },
            score: 0.876,
        };
        assert_eq!(
            format_result(1, &r),
            "1. [0.88] report.pdf (page 2)\n    excerpt: \"Revenue was 4.2M\"\n    id: c1\n\n"
        );
    }
}
