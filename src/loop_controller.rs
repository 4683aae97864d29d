use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::conversation::{Conversation, Target};
use crate::error::Result;
use crate::exchange::last_exchange_number;
use crate::generator::{GenerationChunk, Generator};
use crate::prompts::PromptTemplates;
use crate::rate_limiter::RateLimiter;

/// How a conversation run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    /// Body and closing exchange were generated
    Completed,
    /// Body was generated but the closing call returned nothing
    CompletedWithoutClosing,
    /// A body call returned nothing and the run stopped early
    Aborted,
}

/// Result of generating one conversation
#[derive(Debug, Clone)]
pub enum ConversationResult {
    /// The body reached the target and the closing call was made
    Completed {
        conversation: Conversation,
        /// Whether the closing exchange was appended
        closed: bool,
    },
    /// A body chunk came back empty; no closing call was made
    Aborted { conversation: Conversation },
}

impl ConversationResult {
    /// The conversation as it stood when the run ended
    pub fn conversation(&self) -> &Conversation {
        match self {
            ConversationResult::Completed { conversation, .. }
            | ConversationResult::Aborted { conversation } => conversation,
        }
    }

    /// Consume the result, handing over the conversation
    pub fn into_conversation(self) -> Conversation {
        match self {
            ConversationResult::Completed { conversation, .. }
            | ConversationResult::Aborted { conversation } => conversation,
        }
    }

    /// Status recorded for this conversation in the run metadata
    pub fn status(&self) -> ConversationStatus {
        match self {
            ConversationResult::Completed { closed: true, .. } => ConversationStatus::Completed,
            ConversationResult::Completed { closed: false, .. } => {
                ConversationStatus::CompletedWithoutClosing
            }
            ConversationResult::Aborted { .. } => ConversationStatus::Aborted,
        }
    }
}

/// How the exchange counter moved after a body chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// The chunk's highest marker moved the counter to `next`
    Marker { last: u32, next: u32 },
    /// No usable marker; the counter moved forward by the per-call size
    Failsafe { from: u32, to: u32 },
}

enum BodyOutcome {
    Complete,
    Aborted,
}

/// Update the exchange counter from a freshly generated chunk.
///
/// Only the new chunk is scanned. When it has no marker, or its markers do
/// not move the counter forward, the counter is advanced by `per_call`.
/// That failsafe is a heuristic: the chunk may hold more or fewer exchanges.
pub fn advance_after_chunk(conversation: &mut Conversation, chunk: &str, target: Target) -> Advance {
    let from = conversation.next_exchange_index();
    let last = last_exchange_number(chunk);

    if last > 0 && conversation.advance_to(last.saturating_add(1)) {
        return Advance::Marker {
            last,
            next: conversation.next_exchange_index(),
        };
    }

    let to = from.saturating_add(target.per_call);
    conversation.advance_to(to);
    Advance::Failsafe { from, to }
}

/// Drives the chunked generation of a single conversation
pub struct LoopController<G: Generator> {
    config: Arc<Config>,
    generator: G,
    templates: &'static PromptTemplates,
    rate_limiter: RateLimiter,
}

impl<G: Generator> LoopController<G> {
    /// Create a new LoopController
    pub fn new(config: Config, generator: G) -> Result<Self> {
        Self::with_config(Arc::new(config), generator)
    }

    /// Create a new LoopController sharing an existing config
    pub fn with_config(config: Arc<Config>, generator: G) -> Result<Self> {
        let rate_limiter = RateLimiter::from_rpm(config.requests_per_minute)?;
        Ok(Self {
            templates: PromptTemplates::for_language(config.language),
            config,
            generator,
            rate_limiter,
        })
    }

    /// Replace the rate limiter derived from the config
    pub fn with_rate_limiter(mut self, rate_limiter: RateLimiter) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    /// Get a reference to the config
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Generate one conversation: the body loop, then the closing exchange
    pub async fn run(&self) -> ConversationResult {
        let mut conversation = Conversation::new();

        if let BodyOutcome::Aborted = self.run_body(&mut conversation).await {
            return ConversationResult::Aborted { conversation };
        }

        let closed = self.finalize(&mut conversation).await;
        ConversationResult::Completed {
            conversation,
            closed,
        }
    }

    async fn run_body(&self, conversation: &mut Conversation) -> BodyOutcome {
        let target = self.config.target();

        while conversation.next_exchange_index() < target.total {
            let next = conversation.next_exchange_index();
            info!("Generating exchanges starting from #{}...", next);

            let prompt = self
                .templates
                .body_prompt(target.per_call, next, conversation.text());
            let chunk = self.call(&prompt).await;
            conversation.record_call(chunk.token_count);

            if chunk.is_empty() {
                warn!("API response was empty. Stopping this conversation.");
                self.rate_limiter.wait().await;
                return BodyOutcome::Aborted;
            }

            conversation.append_chunk(&chunk.text);
            match advance_after_chunk(conversation, &chunk.text, target) {
                Advance::Marker { last, next } => {
                    debug!("Chunk ended at exchange #{}, next is #{}", last, next);
                }
                Advance::Failsafe { from, to } => {
                    warn!(
                        "Could not parse the last exchange number, advancing from #{} to #{}",
                        from, to
                    );
                }
            }

            self.rate_limiter.wait().await;
        }

        BodyOutcome::Complete
    }

    /// Request the closing exchange using the whole conversation as context.
    /// Returns false if nothing came back; the body is kept as it is.
    async fn finalize(&self, conversation: &mut Conversation) -> bool {
        let final_number = self.config.max_exchanges;
        info!("Generating final closing exchange (#{})...", final_number);

        let prompt = self
            .templates
            .closing_prompt(final_number, conversation.text());
        let chunk = self.call(&prompt).await;
        conversation.record_call(chunk.token_count);
        self.rate_limiter.wait().await;

        if chunk.is_empty() {
            warn!("Closing exchange came back empty, keeping the conversation without it");
            return false;
        }

        conversation.append_closing(&chunk.text);
        true
    }

    /// Generation failures count as empty responses
    async fn call(&self, prompt: &str) -> GenerationChunk {
        match self.generator.generate(prompt, self.config.max_tokens).await {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!("Generation request failed: {}", e);
                GenerationChunk::empty()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DialogueError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Mock generator replaying scripted responses
    struct ScriptedGenerator {
        responses: Mutex<VecDeque<Result<GenerationChunk>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedGenerator {
        fn new(responses: Vec<Result<GenerationChunk>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn texts(texts: &[&str]) -> Self {
            Self::new(
                texts
                    .iter()
                    .map(|t| Ok(GenerationChunk::new(*t, 10)))
                    .collect(),
            )
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Generator for ScriptedGenerator {
        async fn generate(&self, prompt: &str, _max: u32) -> Result<GenerationChunk> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(GenerationChunk::empty()))
        }
    }

    fn config(total: u32, per_call: u32) -> Config {
        Config {
            max_exchanges: total,
            exchanges_per_call: per_call,
            ..Config::default()
        }
    }

    fn controller(config: Config, generator: ScriptedGenerator) -> LoopController<ScriptedGenerator> {
        LoopController::new(config, generator)
            .unwrap()
            .with_rate_limiter(RateLimiter::with_delay(Duration::ZERO))
    }

    #[tokio::test]
    async fn test_body_then_closing_in_order() {
        let generator = ScriptedGenerator::texts(&[
            "#1\n>dr: Good morning.\n>pz: Morning.\n#2\n>dr: How are you?\n>pz: Tired.",
            "#3\n>dr: See you next week.\n>pz: Goodbye.",
        ]);
        let controller = controller(config(3, 5), generator);
        let result = controller.run().await;

        assert_eq!(result.status(), ConversationStatus::Completed);
        let conversation = result.conversation();
        let text = conversation.text();
        let (p1, p2, p3) = (
            text.find("#1").unwrap(),
            text.find("#2").unwrap(),
            text.find("#3").unwrap(),
        );
        assert!(p1 < p2 && p2 < p3);
        assert_eq!(conversation.next_exchange_index(), 3);
        assert_eq!(conversation.remote_calls(), 2);
        assert_eq!(conversation.total_tokens(), 20);

        let prompts = controller.generator.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0].contains("(#1)"));
        assert!(prompts[1].contains("number #3,"));
        assert!(prompts[1].contains(">pz: Tired."));
    }

    #[tokio::test]
    async fn test_continuation_prompt_uses_next_index_and_history() {
        let generator = ScriptedGenerator::texts(&[
            "#1\n>dr: a\n>pz: b\n#2\n>dr: c\n>pz: d",
            "#3\n>dr: e\n>pz: f\n#4\n>dr: g\n>pz: h",
            "#5\n>dr: bye\n>pz: bye",
        ]);
        let controller = controller(config(5, 2), generator);
        let result = controller.run().await;

        assert_eq!(result.status(), ConversationStatus::Completed);
        let prompts = controller.generator.prompts();
        assert_eq!(prompts.len(), 3);
        assert!(prompts[1].contains("next exchange (#3)"));
        assert!(prompts[1].contains("CONVERSATION SO FAR:\n---\n#1\n>dr: a"));
        assert!(prompts[1].contains("more than 2 exchanges"));
        // closing sees the whole body, not only the last chunk
        assert!(prompts[2].contains(">dr: a"));
        assert!(prompts[2].contains(">dr: g"));
    }

    #[tokio::test]
    async fn test_unparseable_chunk_uses_failsafe() {
        let generator = ScriptedGenerator::texts(&[
            ">dr: Hello\n>pz: Hi",
            ">dr: Goodbye\n>pz: Bye",
        ]);
        let controller = controller(config(3, 5), generator);
        let result = controller.run().await;

        assert_eq!(result.status(), ConversationStatus::Completed);
        assert_eq!(result.conversation().next_exchange_index(), 6);
        assert_eq!(result.conversation().remote_calls(), 2);
    }

    #[tokio::test]
    async fn test_failsafe_still_terminates_with_small_chunks() {
        let generator = ScriptedGenerator::texts(&["no marker", "still none", "nope", "closing"]);
        let controller = controller(config(4, 1), generator);
        let result = controller.run().await;

        assert_eq!(result.status(), ConversationStatus::Completed);
        assert_eq!(result.conversation().next_exchange_index(), 4);
        assert_eq!(result.conversation().remote_calls(), 4);
    }

    #[tokio::test]
    async fn test_empty_first_response_aborts() {
        let generator = ScriptedGenerator::texts(&["", "#1 should never be requested"]);
        let controller = controller(config(3, 5), generator);
        let result = controller.run().await;

        assert_eq!(result.status(), ConversationStatus::Aborted);
        assert!(result.conversation().is_empty());
        assert_eq!(controller.generator.prompts().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_response_mid_body_keeps_partial_text() {
        let generator = ScriptedGenerator::texts(&["#1\n>dr: a\n>pz: b", "   "]);
        let controller = controller(config(6, 1), generator);
        let result = controller.run().await;

        assert_eq!(result.status(), ConversationStatus::Aborted);
        assert_eq!(result.conversation().text(), "#1\n>dr: a\n>pz: b\n\n");
        assert_eq!(controller.generator.prompts().len(), 2);
    }

    #[tokio::test]
    async fn test_generation_error_counts_as_empty() {
        let generator = ScriptedGenerator::new(vec![Err(DialogueError::Api {
            status: 500,
            body: "internal".into(),
        })]);
        let controller = controller(config(3, 5), generator);
        let result = controller.run().await;

        assert_eq!(result.status(), ConversationStatus::Aborted);
        assert_eq!(result.conversation().total_tokens(), 0);
    }

    #[tokio::test]
    async fn test_empty_closing_keeps_body() {
        let generator = ScriptedGenerator::texts(&["#1\n>dr: a\n>pz: b\n#2\n>dr: c\n>pz: d", ""]);
        let controller = controller(config(3, 5), generator);
        let result = controller.run().await;

        assert_eq!(result.status(), ConversationStatus::CompletedWithoutClosing);
        let text = result.into_conversation().into_text();
        assert!(text.contains("#2"));
        assert!(!text.contains("#3"));
    }

    #[tokio::test]
    async fn test_single_exchange_target_only_requests_closing() {
        let generator = ScriptedGenerator::texts(&["#1\n>dr: bye\n>pz: bye"]);
        let controller = controller(config(1, 5), generator);
        let result = controller.run().await;

        assert_eq!(result.status(), ConversationStatus::Completed);
        assert_eq!(result.conversation().text(), "#1\n>dr: bye\n>pz: bye");
        let prompts = controller.generator.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("number #1,"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_applied_after_every_call() {
        let generator = ScriptedGenerator::texts(&["#1\n>dr: a\n>pz: b", "#2\n>dr: bye\n>pz: bye"]);
        let config = Config {
            requests_per_minute: 60,
            ..config(2, 1)
        };
        let controller = LoopController::new(config, generator).unwrap();

        let start = tokio::time::Instant::now();
        let result = controller.run().await;
        assert_eq!(result.status(), ConversationStatus::Completed);
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[test]
    fn test_advance_uses_highest_marker_of_chunk() {
        let mut conversation = Conversation::new();
        let target = Target::new(10, 3);
        let advance = advance_after_chunk(&mut conversation, "#1\n#3\n#2", target);
        assert_eq!(advance, Advance::Marker { last: 3, next: 4 });
        assert_eq!(conversation.next_exchange_index(), 4);
    }

    #[test]
    fn test_advance_failsafe_without_marker() {
        let mut conversation = Conversation::new();
        let target = Target::new(10, 3);
        let advance = advance_after_chunk(&mut conversation, ">dr: hi\n#abc", target);
        assert_eq!(advance, Advance::Failsafe { from: 1, to: 4 });
        assert_eq!(conversation.next_exchange_index(), 4);
    }

    #[test]
    fn test_advance_failsafe_on_regressing_marker() {
        let mut conversation = Conversation::new();
        let target = Target::new(20, 2);
        advance_after_chunk(&mut conversation, "#5", target);
        // the model restarted numbering
        let advance = advance_after_chunk(&mut conversation, "#1\n#2", target);
        assert_eq!(advance, Advance::Failsafe { from: 6, to: 8 });
    }

    #[test]
    fn test_progress_is_strict_for_any_chunk_sequence() {
        let chunks = [
            "#1\n#2", "garbage", "#2", "#abc", "#10", "#3", "", "# 11 ", "#11",
        ];
        let target = Target::new(100, 1);
        let mut conversation = Conversation::new();
        let mut previous = conversation.next_exchange_index();

        for chunk in chunks {
            advance_after_chunk(&mut conversation, chunk, target);
            let current = conversation.next_exchange_index();
            assert!(current > previous, "{} did not advance past {}", current, previous);
            previous = current;
        }
    }

    #[test]
    fn test_iterations_bounded_by_target() {
        let target = Target::new(25, 1);
        let mut conversation = Conversation::new();
        let mut iterations = 0;
        while conversation.next_exchange_index() < target.total {
            advance_after_chunk(&mut conversation, "no markers at all", target);
            iterations += 1;
        }
        assert!(iterations <= target.total);
    }
}
