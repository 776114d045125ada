/// Where a message body is being posted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SanitizeContext {
    pub room_id: i64,
    pub user_id: i64,
}

/// Turns raw user text into text that is safe to store and display.
pub trait TextSanitizer: Send + Sync {
    fn sanitize(&self, raw: &str, ctx: &SanitizeContext) -> String;
}

/// Trims surrounding whitespace and escapes HTML metacharacters.
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlSanitizer;

impl TextSanitizer for HtmlSanitizer {
    fn sanitize(&self, raw: &str, _ctx: &SanitizeContext) -> String {
        let trimmed = raw.trim();
        let mut out = String::with_capacity(trimmed.len());
        for c in trimmed.chars() {
            match c {
                '&' => out.push_str("&amp;"),
                '<' => out.push_str("&lt;"),
                '>' => out.push_str("&gt;"),
                '"' => out.push_str("&quot;"),
                '\'' => out.push_str("&#39;"),
                c => out.push(c),
            }
        }
        out
    }
}
