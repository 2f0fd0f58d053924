//! # Docent
//!
//! A local-first document question-answering assistant. Upload PDFs,
//! Word documents, spreadsheets and text files into named document
//! bases, then ask questions and get answers that cite the exact page,
//! rows or span they came from.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Extract    │──▶│ Chunk+Embed  │──▶│ Base (SQLite │
//! │ PDF/DOCX/.. │   │  (processor) │   │  + base.json)│
//! └─────────────┘   └──────────────┘   └──────┬───────┘
//!                                             │
//!                   ┌──────────────┐          │
//!     question ────▶│ RAG pipeline │◀─────────┘
//!                   │ rewrite+cite │
//!                   └──────────────┘
//! ```
//!
//! Pure logic (chunking, ranking, prompts, history, the pipeline) lives
//! in `docent-core`; this crate supplies the file formats, SQLite
//! persistence, HTTP providers and the CLI.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`extract`] | Text extraction per file format |
//! | [`processor`] | File → chunks with locators |
//! | [`bases`] | Document base directories and metadata |
//! | [`sqlite_store`] | SQLite-backed vector store |
//! | [`embedding`] | Embedding providers |
//! | [`llm`] | Chat model providers |
//! | [`prompts`] | Prompt templates |
//! | [`ingest`] | Batch ingestion into a base |
//! | [`session`] | Chat sessions and the REPL |
//! | [`search`] | Retrieval-only search |
//! | [`base_cmd`] | `docent base` commands |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`logging`] | Tracing setup |

pub mod base_cmd;
pub mod bases;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod ingest;
pub mod llm;
pub mod logging;
pub mod migrate;
pub mod processor;
pub mod prompts;
pub mod search;
pub mod session;
pub mod sqlite_store;
