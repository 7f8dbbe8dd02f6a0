//! # Payload parsing
//!
//! Repairs and decodes the untrusted structured text returned by the
//! generative service. Handles think blocks, markdown fences, leading prose,
//! and output truncated mid-string or mid-structure, without another service
//! call.
//!
//! | Function | Purpose |
//! |----------|---------|
//! | [`sanitize`] | Repair raw text into a best-effort JSON document |
//! | [`decode`] | Sanitize, then deserialize into a typed struct |
//! | [`decode_value`] | Sanitize, then deserialize into `serde_json::Value` |
//! | [`extract::extract_string_field`] | Salvage one string field from a broken payload |
//! | [`extract::extract_array_field`] | Salvage one array field from a broken payload |
//! | [`strip_think_tags`] | Remove `<think>` blocks from text |

pub mod error;
pub mod extract;
pub mod json;
pub mod sanitize;

pub use error::ParseError;
pub use extract::strip_think_tags;
pub use json::{decode, decode_value};
pub use sanitize::sanitize;
