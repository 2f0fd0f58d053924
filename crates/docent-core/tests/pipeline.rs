use std::sync::Mutex;

use async_trait::async_trait;

use docent_core::chunk::{chunk_pages, ChunkOptions};
use docent_core::embedding::HashingProvider;
use docent_core::history::{Conversation, Turn};
use docent_core::index::VectorIndex;
use docent_core::llm::{ChatMessage, ChatModel, Role};
use docent_core::models::Locator;
use docent_core::prompt::PromptTemplate;
use docent_core::rag::{RagParams, RagPipeline, NO_DOCUMENTS_NOTICE};
use docent_core::store::memory::InMemoryStore;
use docent_core::store::Store;
use docent_core::RagError;

const REWRITE_MARKER: &str = "Rewrite the question";

type Reply = Box<dyn Fn(&[ChatMessage]) -> anyhow::Result<String> + Send + Sync>;

/// Chat fake that answers through a closure and records every prompt.
struct ScriptedChat {
    reply: Reply,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedChat {
    fn new(reply: impl Fn(&[ChatMessage]) -> anyhow::Result<String> + Send + Sync + 'static) -> Self {
        Self {
            reply: Box::new(reply),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedChat {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, messages: &[ChatMessage]) -> anyhow::Result<String> {
        self.calls.lock().unwrap().push(messages.to_vec());
        (self.reply)(messages)
    }
}

fn is_rewrite(messages: &[ChatMessage]) -> bool {
    messages
        .first()
        .map(|m| m.content.contains(REWRITE_MARKER))
        .unwrap_or(false)
}

fn rewriter() -> PromptTemplate {
    serde_json::from_value(serde_json::json!({
        "name": "query_rewriter",
        "messages": [
            {"role": "system", "content": "Rewrite the question so it stands alone."},
            {"role": "placeholder", "variable": "chat_history"},
            {"role": "user", "content": "{question}"}
        ]
    }))
    .unwrap()
}

fn qa() -> PromptTemplate {
    serde_json::from_value(serde_json::json!({
        "name": "qa_system",
        "messages": [
            {"role": "system", "content": "Answer from the context and cite [n].\n\nContext:\n{context}\n\nHistory:\n{history}"},
            {"role": "user", "content": "{question}"}
        ]
    }))
    .unwrap()
}

fn report_pages() -> Vec<String> {
    vec![
        "Annual report overview. This document covers company operations and strategy.".into(),
        "Financial results: the total revenue for the year was 4.2 million dollars.".into(),
        "Outlook: hiring plans and office expansion for next spring.".into(),
    ]
}

async fn indexed_report(store: &InMemoryStore, embedder: &HashingProvider) -> usize {
    let chunks = chunk_pages("report-hash", "report.pdf", &report_pages(), &ChunkOptions::default());
    let index = VectorIndex::new(store, embedder);
    index.add(&chunks).await.unwrap()
}

#[tokio::test]
async fn test_report_scenario_cites_revenue_page() {
    let store = InMemoryStore::new();
    let embedder = HashingProvider::new(512);
    let added = indexed_report(&store, &embedder).await;
    assert!(added >= 3);

    let chat = ScriptedChat::new(|messages| {
        let system = &messages[0].content;
        assert!(system.contains("[1] report.pdf (page 2)"));
        Ok("The total revenue was 4.2 million dollars [1].".to_string())
    });
    let (rw, qa) = (rewriter(), qa());
    let pipeline = RagPipeline::new(&chat, &rw, &qa, RagParams::default());
    let index = VectorIndex::new(&store, &embedder);

    let answer = pipeline
        .answer(Some(&index), &Conversation::new(), "What is the total revenue?")
        .await
        .unwrap();

    assert_eq!(answer.retrieved[0].chunk.locator, Locator::Page { page: 2 });
    assert!(answer.retrieved.len() <= RagParams::default().top_k);
    assert_eq!(answer.citations.len(), 1);
    assert_eq!(answer.citations[0].locator, Locator::Page { page: 2 });
    assert!(answer.citations[0].referenced);
    // No history: the rewriter is never consulted.
    assert_eq!(chat.calls().len(), 1);
}

#[tokio::test]
async fn test_citations_are_subset_of_retrieval() {
    let store = InMemoryStore::new();
    let embedder = HashingProvider::new(512);
    indexed_report(&store, &embedder).await;

    let chat = ScriptedChat::new(|_| Ok("Sources disagree [1] [2] [3] [4] [12].".to_string()));
    let (rw, qa) = (rewriter(), qa());
    let params = RagParams {
        top_k: 2,
        ..RagParams::default()
    };
    let pipeline = RagPipeline::new(&chat, &rw, &qa, params);
    let index = VectorIndex::new(&store, &embedder);

    let answer = pipeline
        .answer(Some(&index), &Conversation::new(), "revenue and hiring")
        .await
        .unwrap();

    assert!(answer.retrieved.len() <= 2);
    for pair in answer.retrieved.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    for c in &answer.citations {
        assert!(answer.retrieved.iter().any(|r| r.chunk.id == c.chunk_id));
    }
    assert!(!answer.text.contains("[12]"));
    assert!(!answer.text.contains("[3]"));
}

#[tokio::test]
async fn test_follow_up_uses_rewritten_query() {
    let store = InMemoryStore::new();
    let embedder = HashingProvider::new(512);
    indexed_report(&store, &embedder).await;

    let chat = ScriptedChat::new(|messages| {
        if is_rewrite(messages) {
            // History is spliced in as role-tagged messages.
            assert_eq!(messages[1].role, Role::User);
            assert_eq!(messages[2].role, Role::Assistant);
            return Ok("What were the hiring plans for next spring?".to_string());
        }
        Ok("Hiring will expand [1].".to_string())
    });
    let (rw, qa) = (rewriter(), qa());
    let pipeline = RagPipeline::new(&chat, &rw, &qa, RagParams::default());
    let index = VectorIndex::new(&store, &embedder);

    let mut history = Conversation::new();
    history.push(Turn {
        question: "What does the outlook section cover?".into(),
        answer: "It covers hiring.".into(),
        citations: Vec::new(),
    });

    let answer = pipeline
        .answer(Some(&index), &history, "And when?")
        .await
        .unwrap();
    assert_eq!(answer.question, "And when?");
    assert_eq!(
        answer.standalone_question,
        "What were the hiring plans for next spring?"
    );
    assert_eq!(answer.citations[0].locator, Locator::Page { page: 3 });

    let calls = chat.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[1][0].content.contains("Question 1: What does the outlook section cover?"));
}

#[tokio::test]
async fn test_rewrite_failure_falls_back_to_raw_question() {
    let store = InMemoryStore::new();
    let embedder = HashingProvider::new(512);
    indexed_report(&store, &embedder).await;

    let chat = ScriptedChat::new(|messages| {
        if is_rewrite(messages) {
            anyhow::bail!("429 rate limited");
        }
        Ok("Revenue was 4.2 million [1].".to_string())
    });
    let (rw, qa) = (rewriter(), qa());
    let pipeline = RagPipeline::new(&chat, &rw, &qa, RagParams::default());
    let index = VectorIndex::new(&store, &embedder);

    let mut history = Conversation::new();
    history.push(Turn {
        question: "hello".into(),
        answer: "hi".into(),
        citations: Vec::new(),
    });

    let answer = pipeline
        .answer(Some(&index), &history, "total revenue?")
        .await
        .unwrap();
    assert_eq!(answer.standalone_question, "total revenue?");
    assert_eq!(answer.citations[0].locator, Locator::Page { page: 2 });
}

#[tokio::test]
async fn test_absent_or_empty_index_states_no_documents() {
    let chat = ScriptedChat::new(|messages| {
        assert!(messages[0].content.contains("no documents matched"));
        Ok("I cannot answer that from the documents.".to_string())
    });
    let (rw, qa) = (rewriter(), qa());
    let pipeline = RagPipeline::new(&chat, &rw, &qa, RagParams::default());

    let answer = pipeline
        .answer(None, &Conversation::new(), "What is the total revenue?")
        .await
        .unwrap();
    assert!(answer.text.starts_with(NO_DOCUMENTS_NOTICE));
    assert!(answer.citations.is_empty());
    assert!(answer.retrieved.is_empty());

    let store = InMemoryStore::new();
    let embedder = HashingProvider::new(64);
    let index = VectorIndex::new(&store, &embedder);
    let answer = pipeline
        .answer(Some(&index), &Conversation::new(), "What is the total revenue?")
        .await
        .unwrap();
    assert!(answer.text.starts_with(NO_DOCUMENTS_NOTICE));
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_streaming_sends_notice_before_reply() {
    let chat = ScriptedChat::new(|_| Ok("I can only guess.".to_string()));
    let (rw, qa) = (rewriter(), qa());
    let pipeline = RagPipeline::new(&chat, &rw, &qa, RagParams::default());

    let mut tokens: Vec<String> = Vec::new();
    let mut sink = |token: &str| tokens.push(token.to_string());
    let answer = pipeline
        .answer_streaming(None, &Conversation::new(), "Anything?", &mut sink)
        .await
        .unwrap();

    assert_eq!(tokens.len(), 2);
    assert!(tokens[0].starts_with(NO_DOCUMENTS_NOTICE));
    assert_eq!(tokens[1], "I can only guess.");
    assert_eq!(tokens.concat(), answer.text);
}

#[tokio::test]
async fn test_streamed_reply_gets_citations_afterwards() {
    let store = InMemoryStore::new();
    let embedder = HashingProvider::new(512);
    indexed_report(&store, &embedder).await;

    let chat = ScriptedChat::new(|_| Ok("Revenue was 4.2 million [1] [9].".to_string()));
    let (rw, qa) = (rewriter(), qa());
    let pipeline = RagPipeline::new(&chat, &rw, &qa, RagParams::default());
    let index = VectorIndex::new(&store, &embedder);

    let mut streamed = String::new();
    let mut sink = |token: &str| streamed.push_str(token);
    let answer = pipeline
        .answer_streaming(Some(&index), &Conversation::new(), "What is the total revenue?", &mut sink)
        .await
        .unwrap();

    // The raw reply is streamed; the unknown marker is dropped only from the answer.
    assert_eq!(streamed, "Revenue was 4.2 million [1] [9].");
    assert_eq!(answer.text, "Revenue was 4.2 million [1].");
    assert_eq!(answer.citations.len(), 1);
    assert!(answer.render_sources().starts_with("\n\nSources:\n  [1] report.pdf"));
}

#[tokio::test]
async fn test_generation_failure_is_surfaced() {
    let store = InMemoryStore::new();
    let embedder = HashingProvider::new(512);
    indexed_report(&store, &embedder).await;

    let chat = ScriptedChat::new(|_| anyhow::bail!("request timed out"));
    let (rw, qa) = (rewriter(), qa());
    let pipeline = RagPipeline::new(&chat, &rw, &qa, RagParams::default());
    let index = VectorIndex::new(&store, &embedder);

    let history = Conversation::new();
    let err = pipeline
        .answer(Some(&index), &history, "total revenue?")
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::Generation(ref m) if m.contains("timed out")));
    assert!(history.is_empty());
}

#[tokio::test]
async fn test_blank_question_rejected() {
    let chat = ScriptedChat::new(|_| Ok("unused".to_string()));
    let (rw, qa) = (rewriter(), qa());
    let pipeline = RagPipeline::new(&chat, &rw, &qa, RagParams::default());
    let err = pipeline
        .answer(None, &Conversation::new(), "   ")
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::InvalidInput(_)));
    assert!(chat.calls().is_empty());
}
