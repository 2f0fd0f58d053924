//! The prompt template store.
//!
//! Built-in templates are compiled into the binary. A template file
//! `<dir>/<name>.toml` in the configured `[prompts].dir` replaces the
//! built-in of the same name.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use docent_core::prompt::PromptTemplate;

use crate::config::PromptsConfig;

pub const QUERY_REWRITER: &str = "query_rewriter";
pub const QA_SYSTEM: &str = "qa_system";

const BUILTIN_QUERY_REWRITER: &str = include_str!("../prompts/query_rewriter.toml");
const BUILTIN_QA_SYSTEM: &str = include_str!("../prompts/qa_system.toml");

/// The two templates the answer pipeline needs.
#[derive(Debug, Clone)]
pub struct PromptSet {
    pub rewriter: PromptTemplate,
    pub qa: PromptTemplate,
}

impl PromptSet {
    /// Load both templates, applying overrides from `config.dir`.
    pub fn load(config: &PromptsConfig) -> Result<Self> {
        let dir = config.dir.as_deref();
        let rewriter = load_prompt(QUERY_REWRITER, dir)?;
        rewriter
            .require(&["question"])
            .with_context(|| format!("invalid {} template", QUERY_REWRITER))?;
        let qa = load_prompt(QA_SYSTEM, dir)?;
        qa.require(&["context", "question"])
            .with_context(|| format!("invalid {} template", QA_SYSTEM))?;
        Ok(Self { rewriter, qa })
    }

    pub fn builtin() -> Result<Self> {
        Self::load(&PromptsConfig::default())
    }
}

/// Load the template `name`, preferring `<dir>/<name>.toml` when present.
pub fn load_prompt(name: &str, dir: Option<&Path>) -> Result<PromptTemplate> {
    if let Some(dir) = dir {
        let path = dir.join(format!("{}.toml", name));
        if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read prompt file: {}", path.display()))?;
            info!(path = %path.display(), "using prompt override");
            return parse_prompt(&content)
                .with_context(|| format!("Failed to parse prompt file: {}", path.display()));
        }
    }

    let builtin = match name {
        QUERY_REWRITER => BUILTIN_QUERY_REWRITER,
        QA_SYSTEM => BUILTIN_QA_SYSTEM,
        other => anyhow::bail!("Unknown prompt: '{}'", other),
    };
    parse_prompt(builtin).with_context(|| format!("built-in prompt '{}' is invalid", name))
}

pub fn parse_prompt(content: &str) -> Result<PromptTemplate> {
    Ok(toml::from_str(content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use docent_core::llm::{ChatMessage, Role};
    use docent_core::prompt::PromptVars;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_builtins_parse_and_validate() {
        let set = PromptSet::builtin().unwrap();
        assert_eq!(set.rewriter.name, QUERY_REWRITER);
        assert_eq!(set.qa.name, QA_SYSTEM);
        assert!(set.rewriter.messages[0]
            .content
            .starts_with("Given a chat history and the latest user question"));
    }

    #[test]
    fn test_rewriter_splices_history() {
        let set = PromptSet::builtin().unwrap();
        let history = [ChatMessage::user("Who wrote it?"), ChatMessage::assistant("Ann.")];
        let msgs = set
            .rewriter
            .render(
                &PromptVars::new()
                    .text("question", "When?")
                    .messages("chat_history", &history),
            )
            .unwrap();
        assert_eq!(msgs.len(), 4);
        assert_eq!(msgs[1].role, Role::User);
        assert_eq!(msgs[3].content, "When?");
    }

    #[test]
    fn test_qa_renders_context() {
        let set = PromptSet::builtin().unwrap();
        let msgs = set
            .qa
            .render(
                &PromptVars::new()
                    .text("context", "[1] report.pdf (page 2)\nRevenue was 4.2M.")
                    .text("question", "Revenue?")
                    .text("history", "No previous conversation."),
            )
            .unwrap();
        assert!(msgs[0].content.contains("[1] report.pdf (page 2)"));
        assert!(msgs[0].content.contains("No previous conversation."));
        assert_eq!(msgs[1].content, "Revenue?");
    }

    #[test]
    fn test_override_directory() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("qa_system.toml"),
            r#"
name = "qa_system"
[[messages]]
role = "system"
content = "Terse. {context}"
[[messages]]
role = "user"
content = "{question}"
"#,
        )
        .unwrap();
        let config = PromptsConfig {
            dir: Some(tmp.path().to_path_buf()),
        };
        let set = PromptSet::load(&config).unwrap();
        assert!(set.qa.messages[0].content.starts_with("Terse."));
        // Not overridden: falls back to the built-in.
        assert_eq!(set.rewriter.name, QUERY_REWRITER);
    }

    #[test]
    fn test_override_missing_context_is_rejected() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("qa_system.toml"),
            "name = \"qa_system\"\n[[messages]]\nrole = \"user\"\ncontent = \"{question}\"\n",
        )
        .unwrap();
        let config = PromptsConfig {
            dir: Some(tmp.path().to_path_buf()),
        };
        let err = PromptSet::load(&config).unwrap_err();
        assert!(format!("{:#}", err).contains("{context}"));
    }

    #[test]
    fn test_unknown_prompt() {
        assert!(load_prompt("nope", None::<&Path>).is_err());
        assert!(load_prompt("nope", Some(PathBuf::from("/nonexistent").as_path())).is_err());
    }
}
