//! Prompt templates.
//!
//! A template is a list of role-tagged messages whose content may contain
//! `{name}` placeholders. `{{` and `}}` produce literal braces. A message
//! with role `placeholder` names a variable that expands to a list of
//! [`ChatMessage`]s (conversation history) instead of a single message.
//!
//! Templates are plain data; loading them from disk is the app's job.
//!
//! ```rust
//! use docent_core::prompt::{PromptTemplate, PromptVars};
//!
//! let t: PromptTemplate = serde_json::from_str(r#"{
//!     "name": "greet",
//!     "messages": [{"role": "user", "content": "Hello {who}!"}]
//! }"#).unwrap();
//! let msgs = t.render(&PromptVars::new().text("who", "world")).unwrap();
//! assert_eq!(msgs[0].content, "Hello world!");
//! ```

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::RagError;
use crate::llm::{ChatMessage, Role};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub messages: Vec<MessageTemplate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageTemplate {
    pub role: TemplateRole,
    #[serde(default)]
    pub content: String,
    /// For `placeholder` messages: the message-list variable to splice in.
    #[serde(default)]
    pub variable: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateRole {
    System,
    User,
    Assistant,
    Placeholder,
}

/// Values for a single render call.
#[derive(Debug, Default)]
pub struct PromptVars<'a> {
    text: HashMap<&'a str, &'a str>,
    lists: HashMap<&'a str, &'a [ChatMessage]>,
}

impl<'a> PromptVars<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: &'a str, value: &'a str) -> Self {
        self.text.insert(name, value);
        self
    }

    pub fn messages(mut self, name: &'a str, value: &'a [ChatMessage]) -> Self {
        self.lists.insert(name, value);
        self
    }
}

#[derive(Debug, PartialEq)]
enum Segment<'t> {
    Literal(String),
    Var(&'t str),
}

impl PromptTemplate {
    /// Render into chat messages, failing on any unresolved variable.
    pub fn render(&self, vars: &PromptVars<'_>) -> Result<Vec<ChatMessage>, RagError> {
        let mut out = Vec::new();
        for msg in &self.messages {
            let role = match msg.role {
                TemplateRole::Placeholder => {
                    let name = self.placeholder_name(msg)?;
                    let list = vars.lists.get(name).ok_or_else(|| {
                        RagError::Prompt(format!(
                            "template '{}' needs message list '{}'",
                            self.name, name
                        ))
                    })?;
                    out.extend(list.iter().cloned());
                    continue;
                }
                TemplateRole::System => Role::System,
                TemplateRole::User => Role::User,
                TemplateRole::Assistant => Role::Assistant,
            };

            let mut content = String::with_capacity(msg.content.len());
            for seg in self.segments(&msg.content)? {
                match seg {
                    Segment::Literal(s) => content.push_str(&s),
                    Segment::Var(name) => {
                        let value = vars.text.get(name).ok_or_else(|| {
                            RagError::Prompt(format!(
                                "template '{}' needs variable '{}'",
                                self.name, name
                            ))
                        })?;
                        content.push_str(value);
                    }
                }
            }
            out.push(ChatMessage { role, content });
        }
        Ok(out)
    }

    /// Every variable the template references, text and message-list alike.
    pub fn variables(&self) -> Result<BTreeSet<String>, RagError> {
        let mut names = BTreeSet::new();
        for msg in &self.messages {
            if msg.role == TemplateRole::Placeholder {
                names.insert(self.placeholder_name(msg)?.to_string());
                continue;
            }
            for seg in self.segments(&msg.content)? {
                if let Segment::Var(name) = seg {
                    names.insert(name.to_string());
                }
            }
        }
        Ok(names)
    }

    /// Fail unless the template is well formed and references each of `required`.
    pub fn require(&self, required: &[&str]) -> Result<(), RagError> {
        let names = self.variables()?;
        for r in required {
            if !names.contains(*r) {
                return Err(RagError::Prompt(format!(
                    "template '{}' must reference {{{}}}",
                    self.name, r
                )));
            }
        }
        Ok(())
    }

    fn placeholder_name<'m>(&self, msg: &'m MessageTemplate) -> Result<&'m str, RagError> {
        msg.variable.as_deref().ok_or_else(|| {
            RagError::Prompt(format!(
                "template '{}' has a placeholder message without a variable",
                self.name
            ))
        })
    }

    fn segments<'t>(&self, template: &'t str) -> Result<Vec<Segment<'t>>, RagError> {
        parse_segments(template)
            .map_err(|e| RagError::Prompt(format!("template '{}': {}", self.name, e)))
    }
}

fn parse_segments(template: &str) -> Result<Vec<Segment<'_>>, String> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let bytes = template.as_bytes();
    let mut i = 0;

    while i < template.len() {
        match bytes[i] {
            b'{' if bytes.get(i + 1) == Some(&b'{') => {
                literal.push('{');
                i += 2;
            }
            b'}' if bytes.get(i + 1) == Some(&b'}') => {
                literal.push('}');
                i += 2;
            }
            b'{' => {
                let close = template[i + 1..]
                    .find('}')
                    .ok_or_else(|| format!("unclosed '{{' at byte {}", i))?;
                let name = &template[i + 1..i + 1 + close];
                if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                    return Err(format!("invalid placeholder '{{{}}}'", name));
                }
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Var(name));
                i += close + 2;
            }
            _ => {
                let ch = template[i..].chars().next().unwrap_or_default();
                literal.push(ch);
                i += ch.len_utf8().max(1);
            }
        }
    }
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}
