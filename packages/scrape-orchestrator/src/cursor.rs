//! Opaque scan tokens for corpus pagination.
//!
//! A token pins the scan to the store's high-water mark at the moment the
//! scan was opened and remembers the last domain key handed out. Keyset
//! ordering on the domain key plus the high-water bound means rows updated
//! during the scan are neither skipped nor repeated, and rows inserted
//! after the scan opened are never yielded.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Decoded scan position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanCursor {
    /// Highest insertion sequence visible to this scan
    #[serde(rename = "hw")]
    pub high_water: i64,
    /// Last domain yielded; `None` before the first page
    #[serde(rename = "after", default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    /// Page size chosen when the scan was opened
    #[serde(rename = "ps")]
    pub page_size: u32,
}

impl ScanCursor {
    pub fn start(high_water: i64, page_size: u32) -> Self {
        Self {
            high_water,
            after: None,
            page_size: page_size.max(1),
        }
    }

    /// Cursor for the page following one that ended at `last_domain`.
    pub fn advance(&self, last_domain: impl Into<String>) -> Self {
        Self {
            high_water: self.high_water,
            after: Some(last_domain.into()),
            page_size: self.page_size,
        }
    }

    /// Encode the cursor as a URL-safe base64 string.
    pub fn encode(&self) -> String {
        // Serializing a struct of plain fields cannot fail
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    /// Decode a token produced by [`ScanCursor::encode`].
    pub fn decode(token: &str) -> Result<Self, StoreError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| StoreError::InvalidCursor("not valid base64".to_string()))?;
        let cursor: ScanCursor = serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::InvalidCursor(e.to_string()))?;
        if cursor.page_size == 0 {
            return Err(StoreError::InvalidCursor("page size is zero".to_string()));
        }
        Ok(cursor)
    }

    /// Token for the next page, or `None` when this page came back short.
    pub fn next_token(&self, page: &[String]) -> Option<String> {
        if page.len() < self.page_size as usize {
            return None;
        }
        page.last().map(|last| self.advance(last.clone()).encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            ScanCursor::decode("%%%"),
            Err(StoreError::InvalidCursor(_))
        ));
        let not_json = URL_SAFE_NO_PAD.encode(b"hello");
        assert!(matches!(
            ScanCursor::decode(&not_json),
            Err(StoreError::InvalidCursor(_))
        ));
    }

    #[test]
    fn test_token_is_opaque_and_decodable() {
        let cursor = ScanCursor::start(42, 100).advance("example.com");
        let token = cursor.encode();
        assert!(!token.contains("example.com"));
        assert_eq!(ScanCursor::decode(&token).unwrap(), cursor);
    }

    #[test]
    fn test_short_page_ends_scan() {
        let cursor = ScanCursor::start(10, 3);
        let full = vec!["a.com".to_string(), "b.com".to_string(), "c.com".to_string()];
        let next = cursor.next_token(&full).expect("full page continues");
        assert_eq!(ScanCursor::decode(&next).unwrap().after.as_deref(), Some("c.com"));

        assert_eq!(cursor.next_token(&full[..2]), None);
        assert_eq!(cursor.next_token(&[]), None);
    }
}
