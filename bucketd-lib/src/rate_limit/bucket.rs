use crate::address::{BucketKey, MAX_ADDRESS_LEN};

/// Token-bucket state for a single address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBucket {
    key: BucketKey,
    tokens: u32,
    label: String,
}

impl TokenBucket {
    /// `label` is the address text as received; it is kept for diagnostics
    /// only and cut to [`MAX_ADDRESS_LEN`] characters.
    pub fn new(key: BucketKey, tokens: u32, label: &str) -> Self {
        Self { key, tokens, label: label.chars().take(MAX_ADDRESS_LEN).collect() }
    }

    pub fn key(&self) -> BucketKey {
        self.key
    }

    pub fn tokens(&self) -> u32 {
        self.tokens
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Consumes one token if any is left.
    pub fn take(&mut self) -> bool {
        match self.tokens.checked_sub(1) {
            Some(rest) => {
                self.tokens = rest;
                true
            }
            None => false,
        }
    }

    /// Adds `amount` tokens and returns the new count.
    pub fn refill(&mut self, amount: u32) -> u32 {
        self.tokens = self.tokens.saturating_add(amount);
        self.tokens
    }
}

/// Bucket sizing shared by the admission worker and the refill sweeper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketPolicy {
    /// Burst size. A new bucket starts one below this, the creating request
    /// having spent the first token.
    pub max_tokens: u32,
    /// Tokens added to every bucket per sweep.
    pub refill_tokens: u32,
}

impl Default for BucketPolicy {
    fn default() -> Self {
        Self { max_tokens: 50, refill_tokens: 1 }
    }
}

impl BucketPolicy {
    pub fn fresh_bucket(&self, key: BucketKey, label: &str) -> TokenBucket {
        TokenBucket::new(key, self.max_tokens.saturating_sub(1), label)
    }

    /// A bucket over the maximum has been idle long enough to be dropped.
    pub fn is_saturated(&self, bucket: &TokenBucket) -> bool {
        bucket.tokens() > self.max_tokens
    }
}
