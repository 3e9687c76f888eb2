//! Stored messages and their header view

use crate::file::FileStorage;
use spamgate_common::Result;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Message storage helper
#[derive(Clone)]
pub struct MessageStorage {
    storage: Arc<dyn FileStorage>,
}

impl MessageStorage {
    /// Create a new message storage
    pub fn new(storage: Arc<dyn FileStorage>) -> Self {
        Self { storage }
    }

    /// Generate storage path for a message
    pub fn generate_path(message_id: &Uuid) -> String {
        let id = message_id.simple().to_string();
        format!("{}/{}.eml", &id[..2], id)
    }

    /// Store a new message and return a handle to it
    pub async fn store_message(&self, message_id: &Uuid, data: &[u8]) -> Result<StoredMessage> {
        let path = Self::generate_path(message_id);
        let path = self.storage.store(&path, data).await?;
        Ok(StoredMessage {
            storage: self.storage.clone(),
            path,
        })
    }

    /// Handle to a message that is already stored at `path`
    pub fn open(&self, path: impl Into<String>) -> StoredMessage {
        StoredMessage {
            storage: self.storage.clone(),
            path: path.into(),
        }
    }
}

/// A message file in the store
#[derive(Clone)]
pub struct StoredMessage {
    storage: Arc<dyn FileStorage>,
    path: String,
}

impl StoredMessage {
    /// Path of the message relative to the store
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Read the whole message
    pub async fn read(&self) -> Result<Vec<u8>> {
        self.storage.read(&self.path).await
    }

    /// Size of the message in bytes
    pub async fn size(&self) -> Result<u64> {
        self.storage.size(&self.path).await
    }

    /// Overwrite the message with a rewritten copy
    pub async fn replace(&self, data: &[u8]) -> Result<()> {
        self.storage.replace(&self.path, data).await
    }
}

impl std::fmt::Debug for StoredMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredMessage")
            .field("path", &self.path)
            .finish()
    }
}

/// Header view of a stored message.
///
/// The view is a snapshot; call [`MessageData::refresh`] to pick up changes
/// made to the stored file since the view was taken.
#[derive(Debug, Clone)]
pub struct MessageData {
    message: StoredMessage,
    headers: Vec<(String, String)>,
}

impl MessageData {
    /// Load the header view of a stored message
    pub async fn load(message: StoredMessage) -> Result<Self> {
        let mut data = Self {
            message,
            headers: Vec::new(),
        };
        data.refresh().await?;
        Ok(data)
    }

    /// Re-read headers from the stored message
    pub async fn refresh(&mut self) -> Result<()> {
        let raw = self.message.read().await?;
        self.headers = parse_headers(&raw);
        debug!(path = %self.message.path(), headers = self.headers.len(), "Refreshed message headers");
        Ok(())
    }

    /// The underlying stored message
    pub fn message(&self) -> &StoredMessage {
        &self.message
    }

    /// First value of the header named exactly `name`
    pub fn field_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// All headers in message order
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }
}

/// Parse the header block of a raw message. Folded lines are unfolded.
pub fn parse_headers(raw: &[u8]) -> Vec<(String, String)> {
    let text = String::from_utf8_lossy(raw);
    let header_block = match text.find("\r\n\r\n").or_else(|| text.find("\n\n")) {
        Some(pos) => &text[..pos],
        None => text.as_ref(),
    };

    let mut headers: Vec<(String, String)> = Vec::new();

    for line in header_block.lines() {
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some((_, value)) = headers.last_mut() {
                if !value.is_empty() {
                    value.push(' ');
                }
                value.push_str(line.trim());
            }
        } else if let Some(colon_pos) = line.find(':') {
            let name = line[..colon_pos].trim_end().to_string();
            let value = line[colon_pos + 1..].trim().to_string();
            headers.push((name, value));
        }
    }

    headers
}
