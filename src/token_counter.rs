use crate::config::TokenEstimationMethod;

/// Estimates output tokens for responses that carry no usage metadata
pub struct TokenCounter {
    method: TokenEstimationMethod,
    bpe: Option<tiktoken_rs::CoreBPE>,
}

impl TokenCounter {
    /// Create a new TokenCounter with the specified estimation method
    pub fn new(method: TokenEstimationMethod) -> Self {
        let bpe = match method {
            TokenEstimationMethod::Tiktoken => tiktoken_rs::cl100k_base().ok(),
            _ => None,
        };
        Self { method, bpe }
    }

    /// Estimate the token count for the given text
    pub fn estimate(&self, text: &str) -> usize {
        match (self.method, &self.bpe) {
            (TokenEstimationMethod::Tiktoken, Some(bpe)) => {
                bpe.encode_with_special_tokens(text).len()
            }
            // tiktoken failed to initialize
            (TokenEstimationMethod::Tiktoken, None) => text.len() / 4,
            (TokenEstimationMethod::ByteRatio, _) => text.len() / 4,
            (TokenEstimationMethod::CharRatio, _) => text.chars().count() / 4,
        }
    }

    /// Prefer the count reported by the service, estimating only when absent
    pub fn resolve(&self, reported: Option<usize>, text: &str) -> usize {
        match reported {
            Some(count) => count,
            None if text.is_empty() => 0,
            None => self.estimate(text),
        }
    }
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new(TokenEstimationMethod::default())
    }
}
