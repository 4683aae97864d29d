//! Clinical Dialogue: generates long synthetic doctor-patient conversations
//! by calling a text-generation API in numbered chunks.
//!
//! This crate provides the chunked generation loop, the exchange marker
//! parser that drives it, and the persistence of finished conversations.

pub mod batch;
pub mod config;
pub mod conversation;
pub mod error;
pub mod exchange;
pub mod generator;
pub mod loop_controller;
pub mod prompts;
pub mod rate_limiter;
pub mod token_counter;
pub mod transcript;

pub use batch::{BatchRunner, BatchSummary};
pub use config::{Config, Language};
pub use conversation::{Conversation, Target};
pub use error::{DialogueError, Result};
pub use generator::{GeminiGenerator, GenerationChunk, Generator};
pub use loop_controller::{ConversationResult, ConversationStatus, LoopController};
