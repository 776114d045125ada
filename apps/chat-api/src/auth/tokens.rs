//! Chat session token generation.

use parley_common::id::prefix;

/// Random bytes behind each session token.
pub const SESSION_TOKEN_BYTES: usize = 32;

// ---------------------------------------------------------------------------
// Opaque token generation
// ---------------------------------------------------------------------------

/// Generate an opaque random token with the given prefix.
pub fn generate_opaque_token(prefix: &str, bytes: usize) -> String {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    use rand::Rng;
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill(&mut buf[..]);
    format!("{}_{}", prefix, URL_SAFE_NO_PAD.encode(&buf))
}

// ---------------------------------------------------------------------------
// Session token generator
// ---------------------------------------------------------------------------

/// Produces unguessable session tokens. `None` means no token could be made.
pub trait TokenGenerator: Send + Sync {
    fn generate(&self) -> Option<String>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RandomTokenGenerator;

impl TokenGenerator for RandomTokenGenerator {
    fn generate(&self) -> Option<String> {
        Some(generate_opaque_token(prefix::CHAT_SESSION, SESSION_TOKEN_BYTES))
    }
}
