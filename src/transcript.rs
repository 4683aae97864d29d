//! Conversation files and run metadata.
//!
//! This module handles:
//! - Writing each conversation as plain text into the output directory
//! - Run ID generation
//! - Per-run metadata (`runs/<run-id>/.dialogue-meta.json`)
//! - The `latest` symlink pointing at the newest run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::config::{Config, Language};
use crate::error::{DialogueError, Result};
use crate::loop_controller::{ConversationResult, ConversationStatus};

const METADATA_FILE: &str = ".dialogue-meta.json";

/// Status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Run is currently active
    Running,
    /// Every conversation produced a body
    Completed,
    /// At least one conversation aborted
    Partial,
    /// Run was interrupted (Ctrl+C)
    Interrupted,
}

/// Metadata about one generated conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    /// Conversation number within the run (1-indexed)
    pub index: u32,
    pub status: ConversationStatus,
    /// Exchange counter when the run ended
    pub next_exchange_index: u32,
    /// Remote calls made, closing call included
    pub remote_calls: u32,
    pub total_tokens: usize,
    /// Where the text was written, if anything was
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    pub finished_at: DateTime<Utc>,
}

/// Settings a run was started with
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSettings {
    pub language: Language,
    pub model: String,
    pub max_tokens: u32,
    pub max_exchanges: u32,
    pub exchanges_per_call: u32,
    pub requests_per_minute: u32,
    pub num_conversations: u32,
}

impl From<&Config> for RunSettings {
    fn from(config: &Config) -> Self {
        Self {
            language: config.language,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            max_exchanges: config.max_exchanges,
            exchanges_per_call: config.exchanges_per_call,
            requests_per_minute: config.requests_per_minute,
            num_conversations: config.num_conversations,
        }
    }
}

/// Metadata about a run stored in .dialogue-meta.json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Unique run identifier
    pub run_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub settings: RunSettings,
    /// One record per finished conversation
    pub conversations: Vec<ConversationRecord>,
}

impl RunMetadata {
    /// Create new run metadata
    pub fn new(run_id: String, config: &Config) -> Self {
        Self {
            run_id,
            status: RunStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            settings: RunSettings::from(config),
            conversations: Vec::new(),
        }
    }

    /// Get total tokens across all conversations
    pub fn total_tokens(&self) -> usize {
        self.conversations.iter().map(|c| c.total_tokens).sum()
    }
}

/// File name for a conversation's text
pub fn conversation_file_name(language: Language, index: u32, status: ConversationStatus) -> String {
    match status {
        ConversationStatus::Aborted => {
            format!("conversation_leukemia_{}_{}.partial.txt", language, index)
        }
        _ => format!("conversation_leukemia_{}_{}.txt", language, index),
    }
}

/// Writes conversation files and keeps the run metadata up to date
pub struct TranscriptWriter {
    /// Output directory holding conversation files
    output_dir: PathBuf,
    /// Run directory (<output_dir>/runs/<run-id>)
    run_dir: PathBuf,
    language: Language,
    metadata: RunMetadata,
    /// Whether the output directory did not exist before this run
    created_output_dir: bool,
}

impl TranscriptWriter {
    /// Create the output structure for a new run
    pub fn new(config: &Config, run_id: Option<String>) -> Result<Self> {
        let run_id = run_id.unwrap_or_else(generate_run_id);
        let output_dir = config.output_dir.clone();

        let created_output_dir = !output_dir.exists();
        let run_dir = output_dir.join("runs").join(&run_id);
        fs::create_dir_all(&run_dir).map_err(DialogueError::OutputDirError)?;

        let writer = Self {
            output_dir,
            run_dir,
            language: config.language,
            metadata: RunMetadata::new(run_id, config),
            created_output_dir,
        };

        writer.write_metadata()?;
        writer.update_latest_symlink()?;

        Ok(writer)
    }

    /// Get the run ID
    pub fn run_id(&self) -> &str {
        &self.metadata.run_id
    }

    /// Get the run directory path
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Whether this writer created the output directory
    pub fn created_output_dir(&self) -> bool {
        self.created_output_dir
    }

    /// Get a reference to the metadata
    pub fn metadata(&self) -> &RunMetadata {
        &self.metadata
    }

    /// Persist a finished conversation and record it in the metadata.
    ///
    /// Aborted conversations are written as `.partial.txt` when they hold
    /// any text, and not written at all when empty.
    pub fn save_conversation(
        &mut self,
        index: u32,
        result: &ConversationResult,
    ) -> Result<Option<PathBuf>> {
        let status = result.status();
        let conversation = result.conversation();

        let file = if status == ConversationStatus::Aborted && conversation.is_empty() {
            None
        } else {
            let path = self
                .output_dir
                .join(conversation_file_name(self.language, index, status));
            fs::write(&path, conversation.text())
                .map_err(|e| DialogueError::TranscriptWriteError(format!("{}: {}", path.display(), e)))?;
            Some(path)
        };

        self.metadata.conversations.push(ConversationRecord {
            index,
            status,
            next_exchange_index: conversation.next_exchange_index(),
            remote_calls: conversation.remote_calls(),
            total_tokens: conversation.total_tokens(),
            file: file.clone(),
            finished_at: Utc::now(),
        });
        self.write_metadata()?;

        Ok(file)
    }

    /// Mark the run as finished
    pub fn complete(&mut self, status: RunStatus) -> Result<()> {
        self.metadata.status = status;
        self.metadata.completed_at = Some(Utc::now());
        self.write_metadata()
    }

    fn write_metadata(&self) -> Result<()> {
        let meta_path = self.run_dir.join(METADATA_FILE);
        let json = serde_json::to_string_pretty(&self.metadata)
            .map_err(|e| DialogueError::TranscriptWriteError(e.to_string()))?;
        fs::write(&meta_path, json).map_err(|e| DialogueError::TranscriptWriteError(e.to_string()))
    }

    /// Update the 'latest' symlink to point to this run
    fn update_latest_symlink(&self) -> Result<()> {
        let latest_link = self.output_dir.join("latest");

        if latest_link.exists() || latest_link.is_symlink() {
            let _ = fs::remove_file(&latest_link);
        }

        // relative: latest -> runs/<run-id>
        let target = Path::new("runs").join(&self.metadata.run_id);

        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(&target, &latest_link)
                .map_err(|e| DialogueError::TranscriptWriteError(e.to_string()))?;
        }

        #[cfg(windows)]
        {
            std::os::windows::fs::symlink_dir(&target, &latest_link)
                .map_err(|e| DialogueError::TranscriptWriteError(e.to_string()))?;
        }

        Ok(())
    }
}

/// Generate a unique run ID in format: YYYYMMDD-HHMMSS-<short-uuid>
pub fn generate_run_id() -> String {
    let now = Utc::now();
    let uuid_short = &Uuid::new_v4().simple().to_string()[..8];
    format!("{}-{}", now.format("%Y%m%d-%H%M%S"), uuid_short)
}
