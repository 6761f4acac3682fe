//! Conversation persistence between command invocations.
//!
//! Each agent keeps its own context file, `ctx_<agent>.json`, holding the
//! chat history. Files are replaced atomically so an interrupted save never
//! leaves a truncated context behind.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::{ChatMessage, Role};

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Cannot access context file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt context file {path}: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Chat history of one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationContext {
    pub agent: String,
    pub model: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationContext {
    pub fn new(agent: &str, model: &str) -> Self {
        Self {
            agent: agent.to_string(),
            model: model.to_string(),
            messages: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Record a completed exchange.
    pub fn record_exchange(&mut self, question: &str, answer: &str) {
        self.messages.push(ChatMessage::user(question));
        self.messages.push(ChatMessage::assistant(answer));
        self.updated_at = Utc::now();
    }

    /// Forget the conversation.
    pub fn reset(&mut self) {
        self.messages.clear();
        self.updated_at = Utc::now();
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Number of user turns so far.
    pub fn turns(&self) -> usize {
        self.messages.iter().filter(|m| m.role == Role::User).count()
    }

    /// Read a context file. A missing file is not an error.
    pub fn load(path: &Path) -> Result<Option<Self>, ContextError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ContextError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|source| ContextError::Format {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Write the context via a temp file in the same directory, then rename.
    pub fn save(&self, path: &Path) -> Result<(), ContextError> {
        let io_err = |source| ContextError::Io {
            path: path.to_path_buf(),
            source,
        };
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(io_err)?;

        let json = serde_json::to_vec_pretty(self).map_err(|source| ContextError::Format {
            path: path.to_path_buf(),
            source,
        })?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(io_err)?;
        tmp.write_all(&json).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(path).map_err(|e| io_err(e.error))?;
        Ok(())
    }
}

/// Locates context files for each agent under one directory.
#[derive(Debug, Clone)]
pub struct ContextStore {
    dir: PathBuf,
}

impl ContextStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, agent: &str) -> PathBuf {
        self.dir.join(format!("ctx_{}.json", agent))
    }

    /// Load the agent's context, or start a fresh one.
    ///
    /// A corrupt file is logged and replaced by an empty context rather
    /// than locking the user out of the agent. File access runs on the
    /// blocking pool.
    pub async fn load_or_new(&self, agent: &str, model: &str) -> ConversationContext {
        let path = self.path_for(agent);
        let loaded = {
            let path = path.clone();
            tokio::task::spawn_blocking(move || ConversationContext::load(&path)).await
        };
        match loaded {
            Ok(Ok(Some(ctx))) => {
                tracing::info!(
                    "Loaded context for '{}' ({} turns) from {}",
                    agent,
                    ctx.turns(),
                    path.display()
                );
                ctx
            }
            Ok(Ok(None)) => ConversationContext::new(agent, model),
            Ok(Err(e)) => {
                tracing::warn!("{}; starting a new conversation", e);
                ConversationContext::new(agent, model)
            }
            Err(e) => {
                tracing::warn!("Loading {} panicked: {}", path.display(), e);
                ConversationContext::new(agent, model)
            }
        }
    }

    pub async fn save(&self, ctx: &ConversationContext) -> Result<PathBuf, ContextError> {
        let path = self.path_for(&ctx.agent);
        let saved = {
            let (ctx, path) = (ctx.clone(), path.clone());
            tokio::task::spawn_blocking(move || ctx.save(&path)).await
        };
        saved.map_err(|e| ContextError::Io {
            path: path.clone(),
            source: std::io::Error::other(e),
        })??;
        tracing::debug!("Saved context for '{}' to {}", ctx.agent, path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = ConversationContext::load(&dir.path().join("ctx_broker.json"));
        assert!(tokio_test::assert_ok!(loaded).is_none());
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContextStore::new(dir.path().join("contexts"));

        let mut ctx = store.load_or_new("travel", "llama3.1").await;
        assert!(ctx.is_empty());
        ctx.record_exchange("Flights FRA to STR in March?", "The cheapest is 89 EUR.");
        let path = store.save(&ctx).await.unwrap();
        assert_eq!(path.file_name().unwrap(), "ctx_travel.json");

        let reloaded = store.load_or_new("travel", "llama3.1").await;
        assert_eq!(reloaded.turns(), 1);
        assert_eq!(
            reloaded.messages[1].text_content(),
            Some("The cheapest is 89 EUR.")
        );

        // no temp files left next to the context
        let entries = std::fs::read_dir(dir.path().join("contexts")).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[tokio::test]
    async fn test_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContextStore::new(dir.path());
        std::fs::write(store.path_for("broker"), "not json").unwrap();

        assert!(matches!(
            ConversationContext::load(&store.path_for("broker")),
            Err(ContextError::Format { .. })
        ));
        assert!(store.load_or_new("broker", "llama3.1").await.is_empty());
    }

    #[test]
    fn test_reset() {
        let mut ctx = ConversationContext::new("alfred", "llama3.1");
        ctx.record_exchange("hi", "Good evening, sir.");
        ctx.reset();
        assert!(ctx.is_empty());
        assert_eq!(ctx.turns(), 0);
    }
}
