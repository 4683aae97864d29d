use thiserror::Error;

/// Errors that can occur while generating dialogues
#[derive(Error, Debug)]
pub enum DialogueError {
    /// A required credential is not present in the environment
    #[error("missing credential: the {0} environment variable is not set")]
    MissingCredential(String),

    /// The requested prompt language has no templates
    #[error("language '{0}' not supported, available languages are: en, it")]
    UnsupportedLanguage(String),

    /// Error reading, parsing or validating configuration
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Error creating output directory
    #[error("failed to create output directory: {0}")]
    OutputDirError(#[source] std::io::Error),

    /// Error writing a conversation file or run metadata
    #[error("transcript write error: {0}")]
    TranscriptWriteError(String),

    /// Transport-level failure talking to the generation service
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The generation service answered with a non-success status
    #[error("generation API error: HTTP {status}: {body}")]
    Api { status: u16, body: String },

    /// The generation service answered with a body we could not decode
    #[error("malformed generation response: {0}")]
    MalformedResponse(String),

    /// Shutdown was requested (e.g., via Ctrl+C)
    #[error("shutdown requested")]
    ShutdownRequested,
}

impl DialogueError {
    /// Whether this error must stop the whole run rather than one conversation
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DialogueError::MissingCredential(_)
                | DialogueError::UnsupportedLanguage(_)
                | DialogueError::ConfigError(_)
                | DialogueError::OutputDirError(_)
                | DialogueError::ShutdownRequested
        )
    }
}

/// Result type alias for dialogue operations
pub type Result<T> = std::result::Result<T, DialogueError>;
