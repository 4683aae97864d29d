use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::error::{DialogueError, Result};
use crate::generator::Generator;
use crate::loop_controller::{ConversationStatus, LoopController};
use crate::transcript::{RunStatus, TranscriptWriter};

/// Totals for a finished batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub run_id: String,
    /// Conversations with body and closing exchange
    pub completed: u32,
    /// Conversations whose closing call came back empty
    pub unclosed: u32,
    /// Conversations stopped by an empty body response
    pub aborted: u32,
    /// Conversations whose file could not be written
    pub write_failures: u32,
    pub total_tokens: usize,
}

impl BatchSummary {
    /// Whether every conversation produced a full body and was saved
    pub fn is_success(&self) -> bool {
        self.aborted == 0 && self.write_failures == 0
    }
}

/// Generates a batch of conversations strictly one after another
pub struct BatchRunner<G: Generator> {
    controller: LoopController<G>,
    writer: TranscriptWriter,
}

impl<G: Generator> BatchRunner<G> {
    /// Create a runner from a controller and the run's transcript writer
    pub fn new(controller: LoopController<G>, writer: TranscriptWriter) -> Self {
        Self { controller, writer }
    }

    /// Get the transcript writer
    pub fn writer(&self) -> &TranscriptWriter {
        &self.writer
    }

    /// Run every conversation of the batch.
    ///
    /// Per-conversation failures are logged and counted; only a shutdown
    /// signal or a metadata failure at the end stops the batch with an error.
    pub async fn run(&mut self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<BatchSummary> {
        let config = self.controller.config().clone();
        let mut summary = BatchSummary {
            run_id: self.writer.run_id().to_string(),
            ..BatchSummary::default()
        };

        for index in 1..=config.num_conversations {
            info!(
                "--- Starting generation for conversation #{} (language: {}) ---",
                index,
                config.language.code().to_uppercase()
            );

            let outcome = tokio::select! {
                result = self.controller.run() => Some(result),
                Ok(()) = shutdown_rx.recv() => None,
            };
            let Some(result) = outcome else {
                warn!("Shutdown requested during conversation #{}", index);
                if let Err(e) = self.writer.complete(RunStatus::Interrupted) {
                    error!("{}", e);
                }
                return Err(DialogueError::ShutdownRequested);
            };

            let conversation = result.conversation();
            summary.total_tokens += conversation.total_tokens();
            match result.status() {
                ConversationStatus::Completed => summary.completed += 1,
                ConversationStatus::CompletedWithoutClosing => summary.unclosed += 1,
                ConversationStatus::Aborted => summary.aborted += 1,
            }
            info!(
                "Total tokens generated for this conversation: {}",
                conversation.total_tokens()
            );

            match self.writer.save_conversation(index, &result) {
                Ok(Some(path)) => info!(
                    "--- Conversation #{} {} and saved to '{}' ---",
                    index,
                    describe(result.status()),
                    path.display()
                ),
                Ok(None) => warn!("--- Conversation #{} aborted with no text, nothing saved ---", index),
                Err(e) => {
                    summary.write_failures += 1;
                    error!("Conversation #{} could not be saved: {}", index, e);
                }
            }
        }

        let status = if summary.aborted == 0 {
            RunStatus::Completed
        } else {
            RunStatus::Partial
        };
        self.writer.complete(status)?;

        Ok(summary)
    }
}

fn describe(status: ConversationStatus) -> &'static str {
    match status {
        ConversationStatus::Completed => "completed",
        ConversationStatus::CompletedWithoutClosing => "completed without closing",
        ConversationStatus::Aborted => "aborted",
    }
}
