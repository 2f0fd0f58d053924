//! Chat sessions: one active document base plus a conversation.
//!
//! [`ChatSession`] ties the document base manager, the processor, the
//! vector index and the answer pipeline together. A turn is appended to
//! the history only when an answer is produced; a failed question leaves
//! both the history and the active base as they were.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

use docent_core::embedding::EmbeddingProvider;
use docent_core::history::Conversation;
use docent_core::index::VectorIndex;
use docent_core::llm::{ChatModel, TokenSink};
use docent_core::rag::{Answer, RagParams, RagPipeline};
use docent_core::store::Store;
use docent_core::RagError;

use crate::bases::{DocumentBase, DocumentBaseManager};
use crate::config::Config;
use crate::embedding::create_provider;
use crate::ingest::{collect_inputs, ingest_files, print_report, IngestReport};
use crate::llm::create_chat_model;
use crate::processor::DocumentProcessor;
use crate::prompts::PromptSet;
use crate::sqlite_store::SqliteStore;

struct ActiveBase {
    base: DocumentBase,
    store: SqliteStore,
}

pub struct ChatSession {
    manager: DocumentBaseManager,
    processor: DocumentProcessor,
    embedder: Arc<dyn EmbeddingProvider>,
    chat: Arc<dyn ChatModel>,
    prompts: PromptSet,
    params: RagParams,
    batch_size: usize,
    active: Option<ActiveBase>,
    history: Conversation,
}

impl ChatSession {
    /// Build a session with the providers named in `config`.
    pub fn open(config: &Config) -> Result<Self> {
        let embedder = create_provider(&config.embedding)?;
        let chat = create_chat_model(&config.llm)?;
        Self::with_providers(config, embedder, chat)
    }

    /// Build a session with explicit providers.
    pub fn with_providers(
        config: &Config,
        embedder: Arc<dyn EmbeddingProvider>,
        chat: Arc<dyn ChatModel>,
    ) -> Result<Self> {
        Ok(Self {
            manager: DocumentBaseManager::new(&config.bases.root),
            processor: DocumentProcessor::new(&config.chunking, &config.ingest)?,
            embedder,
            chat,
            prompts: PromptSet::load(&config.prompts)?,
            params: config.retrieval.params(),
            batch_size: config.embedding.batch_size,
            active: None,
            history: Conversation::new(),
        })
    }

    pub fn manager(&self) -> &DocumentBaseManager {
        &self.manager
    }

    pub fn active_base(&self) -> Option<&DocumentBase> {
        self.active.as_ref().map(|a| &a.base)
    }

    pub fn history(&self) -> &Conversation {
        &self.history
    }

    pub fn set_top_k(&mut self, k: usize) {
        self.params.top_k = k.max(1);
    }

    /// Make `name` the active base. History is kept across switches.
    pub async fn use_base(&mut self, name: &str) -> Result<(), RagError> {
        let base = self.manager.load(name)?;
        let store = base.open_store().await?;
        if let Some(previous) = self.active.replace(ActiveBase { base, store }) {
            previous.store.close().await;
        }
        info!(base = name, "switched document base");
        Ok(())
    }

    /// Create `name` and make it the active base.
    pub async fn create_base(&mut self, name: &str, description: &str) -> Result<(), RagError> {
        self.manager.create(name, description)?;
        self.use_base(name).await
    }

    /// Number of chunks in the active base's index (0 without one).
    pub async fn chunk_count(&self) -> Result<usize, RagError> {
        match &self.active {
            Some(active) => Ok(active.store.count().await?),
            None => Ok(0),
        }
    }

    /// Ingest files and/or a directory into the active base.
    pub async fn load_documents(
        &mut self,
        files: &[PathBuf],
        dir: Option<&Path>,
    ) -> Result<IngestReport, RagError> {
        let inputs = collect_inputs(&self.processor, files, dir)?;
        self.ingest(&inputs).await
    }

    /// Ingest a mix of files and directories into the active base.
    pub async fn load_paths(&mut self, paths: &[PathBuf]) -> Result<IngestReport, RagError> {
        let (dirs, files): (Vec<PathBuf>, Vec<PathBuf>) =
            paths.iter().cloned().partition(|p| p.is_dir());
        let mut inputs = collect_inputs(&self.processor, &files, None)?;
        for dir in &dirs {
            inputs.extend(self.processor.collect_dir(dir)?);
        }
        self.ingest(&inputs).await
    }

    async fn ingest(&mut self, inputs: &[(PathBuf, String)]) -> Result<IngestReport, RagError> {
        let active = self
            .active
            .as_mut()
            .ok_or_else(|| RagError::InvalidInput("no active document base".into()))?;
        let index = VectorIndex::new(&active.store, self.embedder.as_ref())
            .with_batch_size(self.batch_size);
        ingest_files(&mut active.base, &index, &self.processor, inputs).await
    }

    /// Answer `question` against the active base (or none).
    pub async fn ask(&mut self, question: &str) -> Result<Answer, RagError> {
        self.respond(question, None).await
    }

    /// Like [`ask`](Self::ask), handing reply text to `on_token` as the
    /// model produces it.
    pub async fn ask_streaming(
        &mut self,
        question: &str,
        on_token: TokenSink<'_>,
    ) -> Result<Answer, RagError> {
        self.respond(question, Some(on_token)).await
    }

    async fn respond(
        &mut self,
        question: &str,
        on_token: Option<TokenSink<'_>>,
    ) -> Result<Answer, RagError> {
        let pipeline = RagPipeline::new(
            self.chat.as_ref(),
            &self.prompts.rewriter,
            &self.prompts.qa,
            self.params,
        );
        let index = self
            .active
            .as_ref()
            .map(|active| VectorIndex::new(&active.store, self.embedder.as_ref()));
        let answer = match on_token {
            Some(sink) => {
                pipeline
                    .answer_streaming(index.as_ref(), &self.history, question, sink)
                    .await?
            }
            None => pipeline.answer(index.as_ref(), &self.history, question).await?,
        };
        self.history.push(answer.to_turn());
        Ok(answer)
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Remove every document from the active base, index and metadata.
    pub async fn clear_documents(&mut self) -> Result<(), RagError> {
        let active = self
            .active
            .as_mut()
            .ok_or_else(|| RagError::InvalidInput("no active document base".into()))?;
        active.base.clear_documents(&active.store).await?;
        Ok(())
    }

    pub async fn close(self) {
        if let Some(active) = self.active {
            active.store.close().await;
        }
    }
}

/// Open a session on `base`, the configured default, or no base at all.
async fn session_for(config: &Config, base: Option<&str>) -> Result<ChatSession> {
    let mut session = ChatSession::open(config)?;
    if let Some(name) = base.or(config.bases.default.as_deref()) {
        session.use_base(name).await?;
    }
    Ok(session)
}

/// `docent ask`: answer one question and print it with its sources.
pub async fn run_ask(
    config: &Config,
    base: Option<&str>,
    question: &str,
    k: Option<usize>,
) -> Result<()> {
    let mut session = session_for(config, base).await?;
    if let Some(k) = k {
        session.set_top_k(k);
    }
    let result = session.ask(question).await;
    session.close().await;
    println!("{}", result?.render());
    Ok(())
}

/// A line typed at the chat prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Ask(String),
    Help,
    History,
    Clear,
    Sources,
    Bases,
    Use(String),
    Load(Vec<PathBuf>),
    ClearDocs,
    Quit,
    Empty,
    Unknown(String),
}

pub fn parse_command(line: &str) -> ReplCommand {
    let line = line.trim();
    if line.is_empty() {
        return ReplCommand::Empty;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return ReplCommand::Ask(line.to_string());
    };
    let (cmd, arg) = match rest.split_once(char::is_whitespace) {
        Some((cmd, arg)) => (cmd, arg.trim()),
        None => (rest, ""),
    };
    match cmd {
        "help" | "?" => ReplCommand::Help,
        "history" => ReplCommand::History,
        "clear" => ReplCommand::Clear,
        "sources" => ReplCommand::Sources,
        "bases" => ReplCommand::Bases,
        "use" if !arg.is_empty() => ReplCommand::Use(arg.to_string()),
        "load" if !arg.is_empty() => {
            ReplCommand::Load(arg.split_whitespace().map(PathBuf::from).collect())
        }
        "clear-docs" => ReplCommand::ClearDocs,
        "quit" | "exit" | "q" => ReplCommand::Quit,
        _ => ReplCommand::Unknown(line.to_string()),
    }
}

const HELP: &str = "\
Commands:
  /help         show this help
  /history      show the conversation so far
  /clear        forget the conversation
  /sources      show the sources of the last answer
  /bases        list document bases
  /use NAME     switch to another document base
  /load PATH..  add files or directories to the active base
  /clear-docs   remove every document from the active base
  /quit         leave
Anything else is asked as a question.";

/// `docent chat`: interactive question answering with history.
pub async fn run_chat(config: &Config, base: Option<&str>) -> Result<()> {
    let mut session = session_for(config, base).await?;
    let interactive = atty::is(atty::Stream::Stdin);

    match session.active_base() {
        Some(b) => println!("docent chat: base '{}'. Type /help for commands.", b.name()),
        None => println!("docent chat: no document base selected. Type /help for commands."),
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        if interactive {
            stdout.write_all(b"> ").await?;
            stdout.flush().await?;
        }
        let Some(line) = lines.next_line().await? else {
            break;
        };

        match parse_command(&line) {
            ReplCommand::Empty => {}
            ReplCommand::Quit => break,
            ReplCommand::Help => println!("{}", HELP),
            ReplCommand::History => {
                if session.history().is_empty() {
                    println!("(no conversation yet)");
                }
                for (i, turn) in session.history().turns().iter().enumerate() {
                    println!("Q{}: {}\nA{}: {}\n", i + 1, turn.question, i + 1, turn.answer);
                }
            }
            ReplCommand::Clear => {
                session.clear_history();
                println!("conversation cleared");
            }
            ReplCommand::Sources => match session.history().turns().last() {
                Some(turn) if !turn.citations.is_empty() => {
                    for c in &turn.citations {
                        println!("  {}", c);
                    }
                }
                _ => println!("(no sources)"),
            },
            ReplCommand::Bases => {
                let active = session.active_base().map(|b| b.name().to_string());
                for b in session.manager().list()? {
                    let marker = if Some(b.name()) == active.as_deref() { "*" } else { " " };
                    println!(
                        "{} {}  ({} documents, {} chunks)",
                        marker,
                        b.name(),
                        b.meta.num_documents(),
                        b.meta.num_chunks
                    );
                }
            }
            ReplCommand::Use(name) => match session.use_base(&name).await {
                Ok(()) => println!("using base '{}'", name),
                Err(e) => eprintln!("error: {}", e),
            },
            ReplCommand::Load(paths) => match session.load_paths(&paths).await {
                Ok(report) => {
                    let name = session.active_base().map(|b| b.name().to_string());
                    print_report(name.as_deref().unwrap_or_default(), &report);
                }
                Err(e) => eprintln!("error: {}", e),
            },
            ReplCommand::ClearDocs => match session.clear_documents().await {
                Ok(()) => println!("documents cleared"),
                Err(e) => eprintln!("error: {}", e),
            },
            ReplCommand::Unknown(cmd) => eprintln!("unknown command: {} (try /help)", cmd),
            ReplCommand::Ask(question) => {
                let mut print_token = |token: &str| {
                    print!("{}", token);
                    let _ = std::io::stdout().flush();
                };
                match session.ask_streaming(&question, &mut print_token).await {
                    // Markers are resolved only once the reply is complete.
                    Ok(answer) => println!("{}\n", answer.render_sources()),
                    Err(e) => eprintln!("\nerror: {}", e),
                }
            }
        }
    }

    session.close().await;
    Ok(())
}
