//! Conversation history and its JSON file store
//!
//! The history file is a single JSON array of `{role, content}` objects,
//! read and overwritten wholesale.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Who a turn is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One message in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Ordered turns, oldest first; a non-empty history starts with a system turn
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationHistory {
    turns: Vec<ConversationTurn>,
}

impl ConversationHistory {
    /// Fresh history holding only the system prompt
    pub fn seeded(system_prompt: impl Into<String>) -> Self {
        Self {
            turns: vec![ConversationTurn::system(system_prompt)],
        }
    }

    /// Wrap loaded turns, putting `system_prompt` first if no system turn leads
    #[must_use]
    pub fn from_turns(mut turns: Vec<ConversationTurn>, system_prompt: &str) -> Self {
        if turns.first().is_none_or(|t| t.role != Role::System) {
            tracing::warn!("history does not start with a system turn, prepending one");
            turns.insert(0, ConversationTurn::system(system_prompt));
        }
        Self { turns }
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.turns.push(ConversationTurn::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.turns.push(ConversationTurn::assistant(content));
    }

    #[must_use]
    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Most recent assistant reply
    #[must_use]
    pub fn last_reply(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .find(|t| t.role == Role::Assistant)
            .map(|t| t.content.as_str())
    }
}

/// JSON file holding one conversation
#[derive(Debug, Clone)]
pub struct ConversationStore {
    path: PathBuf,
}

impl ConversationStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored turns, `None` if nothing has been stored yet
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if the file exists but cannot be read or parsed
    pub fn load(&self) -> Result<Option<Vec<ConversationTurn>>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::Persistence(format!(
                    "failed to read {}: {e}",
                    self.path.display()
                )));
            }
        };

        let turns = serde_json::from_str(&content).map_err(|e| {
            Error::Persistence(format!("failed to parse {}: {e}", self.path.display()))
        })?;
        Ok(Some(turns))
    }

    /// Load the history, or start one seeded with `system_prompt`
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if an existing file cannot be read or parsed
    pub fn load_or_seed(&self, system_prompt: &str) -> Result<ConversationHistory> {
        match self.load()? {
            Some(turns) => {
                tracing::debug!(path = %self.path.display(), turns = turns.len(), "loaded history");
                Ok(ConversationHistory::from_turns(turns, system_prompt))
            }
            None => {
                tracing::debug!(path = %self.path.display(), "no history yet, seeding");
                Ok(ConversationHistory::seeded(system_prompt))
            }
        }
    }

    /// Replace the stored history
    ///
    /// Writes to a temporary file beside the target and renames it into
    /// place, so readers never observe a partial file.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if a turn is empty or the file cannot be written
    pub fn save(&self, history: &ConversationHistory) -> Result<()> {
        if let Some(turn) = history.turns().iter().find(|t| t.content.trim().is_empty()) {
            return Err(Error::Persistence(format!(
                "refusing to store empty {} turn",
                turn.role.as_str()
            )));
        }

        let json = serde_json::to_vec(history.turns())?;
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let write = || -> std::io::Result<()> {
            fs::create_dir_all(dir)?;
            let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
            tmp.write_all(&json)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&self.path).map_err(|e| e.error)?;
            Ok(())
        };

        write().map_err(|e| {
            Error::Persistence(format!("failed to write {}: {e}", self.path.display()))
        })?;

        tracing::debug!(path = %self.path.display(), turns = history.len(), "stored history");
        Ok(())
    }

    /// Forget the conversation; returns whether anything was stored
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if the file exists but cannot be removed
    pub fn clear(&self) -> Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Persistence(format!(
                "failed to remove {}: {e}",
                self.path.display()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> ConversationStore {
        ConversationStore::new(dir.path().join("history").join("chat.json"))
    }

    #[test]
    fn round_trip_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let mut history = ConversationHistory::seeded("be brief");
        history.push_user("hi");
        history.push_assistant("hello");
        history.push_user("how are you?");
        history.push_assistant("fine");
        store.save(&history).unwrap();

        let loaded = store.load_or_seed("ignored").unwrap();
        assert_eq!(loaded, history);
        assert_eq!(loaded.last_reply(), Some("fine"));
    }

    #[test]
    fn absent_file_seeds_single_system_turn() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        assert!(store.load().unwrap().is_none());
        let history = store.load_or_seed("be brief").unwrap();
        assert_eq!(history.turns(), &[ConversationTurn::system("be brief")]);
        assert!(!store.path().exists());
    }

    #[test]
    fn file_is_flat_role_content_array() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let mut history = ConversationHistory::seeded("sys");
        history.push_user("hi");
        store.save(&history).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(
            raw,
            serde_json::json!([
                {"role": "system", "content": "sys"},
                {"role": "user", "content": "hi"}
            ])
        );
    }

    #[test]
    fn corrupt_file_is_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), "{not json").unwrap();

        assert!(matches!(store.load_or_seed("sys"), Err(Error::Persistence(_))));
    }

    #[test]
    fn unknown_role_is_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), r#"[{"role":"robot","content":"beep"}]"#).unwrap();

        assert!(matches!(store.load(), Err(Error::Persistence(_))));
    }

    #[test]
    fn history_without_system_turn_gets_one() {
        let history = ConversationHistory::from_turns(vec![ConversationTurn::user("hi")], "sys");
        assert_eq!(history.turns()[0], ConversationTurn::system("sys"));
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn empty_turn_is_not_stored() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let mut history = ConversationHistory::seeded("sys");
        history.push_assistant("   ");
        assert!(matches!(store.save(&history), Err(Error::Persistence(_))));
        assert!(!store.path().exists());
    }

    #[test]
    fn save_overwrites_wholesale() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let mut long = ConversationHistory::seeded("sys");
        long.push_user("one");
        long.push_assistant("two");
        store.save(&long).unwrap();

        let short = ConversationHistory::seeded("sys");
        store.save(&short).unwrap();
        assert_eq!(store.load_or_seed("sys").unwrap(), short);
    }

    #[test]
    fn clear_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        assert!(!store.clear().unwrap());
        store.save(&ConversationHistory::seeded("sys")).unwrap();
        assert!(store.clear().unwrap());
        assert!(store.load().unwrap().is_none());
    }
}
