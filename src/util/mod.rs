//! Utility functions shared by the parser, the sync pipeline and the CLI.
//!
//! - **Text sanitizing**: feed-supplied HTML to plain text ([`sanitize`])
//! - **URL validation**: SSRF checks for subscription URLs ([`validate_url`])
//! - **Display helpers**: width-aware truncation for excerpts and CLI output
//!
//! # Examples
//!
//! ```
//! use feedsync::util::{sanitize, validate_url};
//!
//! let text = sanitize("<p>Hello &amp; welcome</p>");
//! assert_eq!(text, "Hello & welcome");
//!
//! assert!(validate_url("https://example.com/feed.xml").is_ok());
//! ```

mod text;
mod url_validator;

pub use text::{excerpt, sanitize, strip_control_chars, truncate_to_width};
pub use url_validator::{validate_url, UrlValidationError};
