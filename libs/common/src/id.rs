use ulid::Ulid;

/// Generates a new ULID-based ID with the given prefix.
///
/// # Examples
/// ```
/// let id = parley_common::id::prefixed_ulid("gw");
/// assert!(id.starts_with("gw_"));
/// ```
pub fn prefixed_ulid(prefix: &str) -> String {
    format!("{}_{}", prefix, Ulid::new().to_string())
}

/// Well-known ID prefixes.
pub mod prefix {
    /// Chat presence session tokens.
    pub const CHAT_SESSION: &str = "cs";
    /// Push gateway connections.
    pub const GATEWAY: &str = "gw";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_ulid_format() {
        let id = prefixed_ulid("gw");
        assert!(id.starts_with("gw_"));
        // ULID is 26 chars, plus prefix + underscore
        assert_eq!(id.len(), 3 + 26);
    }

    #[test]
    fn test_uniqueness() {
        let a = prefixed_ulid("gw");
        let b = prefixed_ulid("gw");
        assert_ne!(a, b);
    }

    #[test]
    fn test_prefixes_are_distinct() {
        assert_ne!(prefix::CHAT_SESSION, prefix::GATEWAY);
        assert!(prefixed_ulid(prefix::CHAT_SESSION).starts_with("cs_"));
    }
}
