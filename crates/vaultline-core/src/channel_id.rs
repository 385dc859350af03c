//! Channel identifier validation.
//!
//! Channel (chat room) identifiers are 24-character hexadecimal strings,
//! matching the document store's object id format. Join requests with
//! anything else are rejected before any membership lookup happens.

/// Required identifier length.
pub const CHANNEL_ID_LEN: usize = 24;

/// Whether `id` is a well-formed channel identifier.
///
/// Accepts exactly 24 ASCII hex digits, either case.
#[must_use]
pub fn is_well_formed(id: &str) -> bool {
    id.len() == CHANNEL_ID_LEN && id.bytes().all(|b| b.is_ascii_hexdigit())
}
