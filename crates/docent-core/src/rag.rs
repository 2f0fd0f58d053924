//! The retrieval-and-answer pipeline.
//!
//! One call to [`RagPipeline::answer`] (or [`RagPipeline::answer_streaming`])
//! runs five sequential steps:
//!
//! ```text
//! rewrite ──▶ retrieve ──▶ assemble ──▶ generate ──▶ cite
//!   │            │
//!   │            └─ no index / empty index → empty context
//!   └─ no history → question as-is; LLM failure → question as-is
//! ```
//!
//! The conversation is an explicit argument; the pipeline holds no
//! per-session state, so the caller decides whether a turn is recorded.
//!
//! # Prompt variables
//!
//! | Variable | Rewriter | QA | Value |
//! |----------|----------|----|-------|
//! | `question` | ✓ | ✓ | raw question (rewriter) / standalone question (QA) |
//! | `original_question` | | ✓ | the question as the user typed it |
//! | `history` | ✓ | ✓ | numbered recent turns, or `No previous conversation.` |
//! | `chat_history` | ✓ | ✓ | recent turns as user/assistant messages |
//! | `context` | | ✓ | labelled context blocks |

use tracing::{debug, warn};

use crate::cite::{attach_citations, Citation};
use crate::context::assemble;
use crate::error::RagError;
use crate::history::{Conversation, Turn};
use crate::index::VectorIndex;
use crate::llm::{ChatModel, TokenSink};
use crate::models::ScoredChunk;
use crate::prompt::{PromptTemplate, PromptVars};

/// Prefix of every answer produced without any retrieved context.
pub const NO_DOCUMENTS_NOTICE: &str =
    "No relevant documents were found in the active document base.";

/// What the QA prompt sees as `{context}` when nothing was retrieved.
const EMPTY_CONTEXT: &str = "(no documents matched this question)";

/// Retrieval and prompt sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RagParams {
    pub top_k: usize,
    pub max_context_chars: usize,
    pub history_turns: usize,
}

impl Default for RagParams {
    fn default() -> Self {
        Self {
            top_k: 4,
            max_context_chars: 6000,
            history_turns: 3,
        }
    }
}

/// A finished answer.
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub question: String,
    /// The query actually used for retrieval.
    pub standalone_question: String,
    pub text: String,
    /// Always drawn from `retrieved`.
    pub citations: Vec<Citation>,
    /// The retrieval result, best first.
    pub retrieved: Vec<ScoredChunk>,
}

impl Answer {
    pub fn context_found(&self) -> bool {
        !self.citations.is_empty()
    }

    pub fn to_turn(&self) -> Turn {
        Turn {
            question: self.question.clone(),
            answer: self.text.clone(),
            citations: self.citations.clone(),
        }
    }

    /// Answer text followed by a `Sources:` list.
    pub fn render(&self) -> String {
        format!("{}{}", self.text, self.render_sources())
    }

    /// The `Sources:` list alone, with its leading blank line. Empty when
    /// there are no citations.
    pub fn render_sources(&self) -> String {
        if self.citations.is_empty() {
            return String::new();
        }
        let mut out = String::from("\n\nSources:");
        for c in &self.citations {
            out.push_str(&format!("\n  {}", c));
        }
        out
    }
}

pub struct RagPipeline<'a> {
    chat: &'a dyn ChatModel,
    rewriter: &'a PromptTemplate,
    qa: &'a PromptTemplate,
    params: RagParams,
}

impl<'a> RagPipeline<'a> {
    pub fn new(
        chat: &'a dyn ChatModel,
        rewriter: &'a PromptTemplate,
        qa: &'a PromptTemplate,
        params: RagParams,
    ) -> Self {
        Self {
            chat,
            rewriter,
            qa,
            params,
        }
    }

    /// Answer `question` against `index` (or no index at all).
    ///
    /// # Errors
    ///
    /// - [`RagError::InvalidInput`] for a blank question.
    /// - [`RagError::EmbeddingService`] if the query cannot be embedded.
    /// - [`RagError::Prompt`] if the QA template cannot be rendered.
    /// - [`RagError::Generation`] if the model call fails or returns nothing.
    pub async fn answer(
        &self,
        index: Option<&VectorIndex<'_>>,
        history: &Conversation,
        question: &str,
    ) -> Result<Answer, RagError> {
        self.run(index, history, question, None).await
    }

    /// [`answer`](Self::answer), handing the reply to `on_token` while it is
    /// generated.
    ///
    /// Tokens are the model's raw output. Citation markers are resolved
    /// once the reply is complete, so the returned [`Answer::text`] may
    /// differ from the streamed text where unknown markers were dropped.
    /// Without context, [`NO_DOCUMENTS_NOTICE`] is streamed first.
    pub async fn answer_streaming(
        &self,
        index: Option<&VectorIndex<'_>>,
        history: &Conversation,
        question: &str,
        on_token: TokenSink<'_>,
    ) -> Result<Answer, RagError> {
        self.run(index, history, question, Some(on_token)).await
    }

    async fn run(
        &self,
        index: Option<&VectorIndex<'_>>,
        history: &Conversation,
        question: &str,
        on_token: Option<TokenSink<'_>>,
    ) -> Result<Answer, RagError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::InvalidInput("question is empty".into()));
        }

        let standalone = self.rewrite(history, question).await;

        let retrieved = match index {
            Some(index) => index.search(&standalone, self.params.top_k).await?,
            None => Vec::new(),
        };
        debug!(query = %standalone, hits = retrieved.len(), "retrieved context");

        let context = assemble(&retrieved, self.params.max_context_chars);

        let history_text = history.format_for_prompt(self.params.history_turns);
        let history_msgs = history.to_messages(self.params.history_turns);
        let context_text = if context.is_empty() {
            EMPTY_CONTEXT
        } else {
            context.text.as_str()
        };
        let messages = self.qa.render(
            &PromptVars::new()
                .text("context", context_text)
                .text("question", &standalone)
                .text("original_question", question)
                .text("history", &history_text)
                .messages("chat_history", &history_msgs),
        )?;

        let completion = match on_token {
            Some(on_token) => {
                if context.is_empty() {
                    on_token(&format!("{}\n\n", NO_DOCUMENTS_NOTICE));
                }
                self.chat.complete_streaming(&messages, on_token).await
            }
            None => self.chat.complete(&messages).await,
        }
        .map_err(|e| RagError::Generation(format!("{:#}", e)))?;
        if completion.trim().is_empty() {
            return Err(RagError::Generation("model returned an empty completion".into()));
        }

        let cited = attach_citations(&completion, &context);
        let text = if context.is_empty() && !cited.text.contains(NO_DOCUMENTS_NOTICE) {
            format!("{}\n\n{}", NO_DOCUMENTS_NOTICE, cited.text)
        } else {
            cited.text
        };

        Ok(Answer {
            question: question.to_string(),
            standalone_question: standalone,
            text,
            citations: cited.citations,
            retrieved,
        })
    }

    /// Resolve references in `question` against `history`.
    ///
    /// Never fails: without history, or when the model call fails, the
    /// question is returned unchanged.
    pub async fn rewrite(&self, history: &Conversation, question: &str) -> String {
        if history.is_empty() {
            return question.to_string();
        }

        let history_text = history.format_for_prompt(self.params.history_turns);
        let history_msgs = history.to_messages(self.params.history_turns);
        let messages = match self.rewriter.render(
            &PromptVars::new()
                .text("question", question)
                .text("history", &history_text)
                .messages("chat_history", &history_msgs),
        ) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "query rewrite prompt failed; using the original question");
                return question.to_string();
            }
        };

        match self.chat.complete(&messages).await {
            Ok(rewritten) if !rewritten.trim().is_empty() => {
                let rewritten = rewritten.trim().to_string();
                debug!(original = %question, rewritten = %rewritten, "rewrote question");
                rewritten
            }
            Ok(_) => {
                warn!("query rewrite returned nothing; using the original question");
                question.to_string()
            }
            Err(e) => {
                let err = format!("{:#}", e);
                warn!(error = %err, "query rewrite failed; using the original question");
                question.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cite::Citation;
    use crate::models::Locator;

    fn answer_with(citations: Vec<Citation>) -> Answer {
        Answer {
            question: "q".into(),
            standalone_question: "q".into(),
            text: "Revenue was 4.2M [1].".into(),
            citations,
            retrieved: Vec::new(),
        }
    }

    #[test]
    fn test_render_lists_sources() {
        let a = answer_with(vec![Citation {
            label: 1,
            chunk_id: "c".into(),
            document_id: "d".into(),
            source: "report.pdf".into(),
            locator: Locator::Page { page: 2 },
            score: 0.9,
            referenced: true,
        }]);
        assert_eq!(
            a.render(),
            "Revenue was 4.2M [1].\n\nSources:\n  [1] report.pdf, page 2"
        );
        assert_eq!(a.to_turn().citations.len(), 1);
    }

    #[test]
    fn test_render_without_sources() {
        let a = answer_with(Vec::new());
        assert_eq!(a.render(), "Revenue was 4.2M [1].");
        assert!(!a.context_found());
    }
}
