//! Spamgate Storage - Message file storage abstraction
//!
//! This crate provides the message store the anti-spam engine reads
//! messages from and writes scanned messages back to.

pub mod file;
pub mod message;

pub use file::{FileStorage, LocalStorage};
pub use message::{parse_headers, MessageData, MessageStorage, StoredMessage};
