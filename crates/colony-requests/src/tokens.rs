//! Deterministic token minting.
//!
//! Tokens are drawn from a seeded ChaCha stream, so two managers built with
//! the same seed mint the same token sequence. That keeps whole runs
//! replayable and lets snapshots resume the exact stream.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use requestable::Token;
use serde::{Deserialize, Serialize};

/// Source of fresh tokens.
///
/// # Example
///
/// ```
/// use colony_requests::tokens::TokenFactory;
///
/// let mut a = TokenFactory::new(42);
/// let mut b = TokenFactory::new(42);
/// assert_eq!(a.mint(), b.mint());
/// assert_ne!(a.mint(), TokenFactory::new(43).mint());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenFactory {
    rng: ChaCha8Rng,
}

impl TokenFactory {
    /// Create a factory seeded with `seed`.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Mint the next token in the stream.
    pub fn mint(&mut self) -> Token {
        Token::new(self.rng.gen())
    }

    /// Mint tokens until one is not `taken`.
    pub fn mint_unique(&mut self, taken: impl Fn(Token) -> bool) -> Token {
        loop {
            let token = self.mint();
            if !taken(token) {
                return token;
            }
        }
    }
}
