//! Collaborators supplied by the host application.

pub mod clock;
pub mod sanitize;
pub mod users;

pub use clock::{Clock, ManualClock, SystemClock};
pub use sanitize::{HtmlSanitizer, SanitizeContext, TextSanitizer};
pub use users::{MemoryUserDirectory, UserDirectory, UserDisplay};
