/// Exchange target for one conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    /// Total exchanges desired, closing exchange included
    pub total: u32,
    /// Maximum exchanges requested per remote call
    pub per_call: u32,
}

impl Target {
    /// Create a new target; `per_call` is clamped to at least 1
    pub fn new(total: u32, per_call: u32) -> Self {
        Self {
            total,
            per_call: per_call.max(1),
        }
    }
}

/// Accumulated text and progress of a single conversation.
///
/// Owned by one controller run at a time; handed to persistence once the
/// run ends and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    text: String,
    next_exchange_index: u32,
    total_tokens: usize,
    remote_calls: u32,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

impl Conversation {
    /// Create an empty conversation starting at exchange 1
    pub fn new() -> Self {
        Self {
            text: String::new(),
            next_exchange_index: 1,
            total_tokens: 0,
            remote_calls: 0,
        }
    }

    /// The accumulated dialogue text
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Consume the conversation, returning its text
    pub fn into_text(self) -> String {
        self.text
    }

    /// Whether no text has been accumulated yet
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Smallest exchange number not yet confirmed present
    pub fn next_exchange_index(&self) -> u32 {
        self.next_exchange_index
    }

    /// Running sum of tokens reported for every call
    pub fn total_tokens(&self) -> usize {
        self.total_tokens
    }

    /// Number of remote calls made for this conversation
    pub fn remote_calls(&self) -> u32 {
        self.remote_calls
    }

    /// Record one remote call and the tokens it produced
    pub fn record_call(&mut self, tokens: usize) {
        self.remote_calls += 1;
        self.total_tokens += tokens;
    }

    /// Append a body chunk followed by a blank-line separator
    pub fn append_chunk(&mut self, chunk: &str) {
        self.text.push_str(chunk.trim());
        self.text.push_str("\n\n");
    }

    /// Append the closing exchange without a trailing separator
    pub fn append_closing(&mut self, chunk: &str) {
        self.text.push_str(chunk.trim());
    }

    /// Move the exchange counter forward to `next`.
    ///
    /// Returns false and leaves the counter alone if `next` would not
    /// advance it; the counter never decreases.
    pub fn advance_to(&mut self, next: u32) -> bool {
        if next > self.next_exchange_index {
            self.next_exchange_index = next;
            true
        } else {
            false
        }
    }
}
