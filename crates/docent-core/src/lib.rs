//! # Docent Core
//!
//! Shared logic for Docent: data models, chunking, the store abstraction,
//! the vector index, prompt rendering, conversation history, and the
//! retrieval-and-answer pipeline.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or HTTP clients.
//! External services sit behind three narrow capabilities:
//!
//! | Capability | Trait | Method |
//! |------------|-------|--------|
//! | Embedding | [`embedding::EmbeddingProvider`] | `embed` |
//! | Persistence | [`store::Store`] | `search` |
//! | Generation | [`llm::ChatModel`] | `complete` |
//!
//! The application crate supplies network-backed implementations; tests
//! supply deterministic ones ([`embedding::HashingProvider`],
//! [`store::memory::InMemoryStore`]).

pub mod chunk;
pub mod cite;
pub mod context;
pub mod embedding;
pub mod error;
pub mod history;
pub mod index;
pub mod llm;
pub mod models;
pub mod prompt;
pub mod rag;
pub mod store;

pub use error::RagError;
