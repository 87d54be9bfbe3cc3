//! Opaque, owner-bound pagination cursor (C2).
//!
//! The cursor is not a secret — it's opaque so callers don't build
//! assumptions on its shape, and owner-bound so a cursor minted for one
//! principal's listing can't be replayed against another principal's view of
//! the same collection.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use uuid::Uuid;

use crate::error::RpcError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub owner_principal_id: Uuid,
    pub position: u64,
}

impl Cursor {
    pub fn first(owner_principal_id: Uuid) -> Self {
        Self {
            owner_principal_id,
            position: 0,
        }
    }

    pub fn next(&self, advance_by: u64) -> Self {
        Self {
            owner_principal_id: self.owner_principal_id,
            position: self.position + advance_by,
        }
    }

    pub fn encode(&self) -> String {
        let raw = format!("{}:{}", self.owner_principal_id, self.position);
        URL_SAFE_NO_PAD.encode(raw)
    }

    /// Decode a cursor string, verifying it was minted for `requesting_principal`.
    /// Absence of a cursor (`None`) is the caller's own first page.
    pub fn decode(
        encoded: Option<&str>,
        requesting_principal: Uuid,
    ) -> Result<Self, RpcError> {
        let Some(encoded) = encoded else {
            return Ok(Cursor::first(requesting_principal));
        };

        let raw = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| RpcError::InvalidCursor)?;
        let raw = String::from_utf8(raw).map_err(|_| RpcError::InvalidCursor)?;
        let (owner_str, position_str) = raw.split_once(':').ok_or(RpcError::InvalidCursor)?;
        let owner_principal_id: Uuid = owner_str.parse().map_err(|_| RpcError::InvalidCursor)?;
        let position: u64 = position_str.parse().map_err(|_| RpcError::InvalidCursor)?;

        if owner_principal_id != requesting_principal {
            return Err(RpcError::InvalidCursor);
        }

        Ok(Cursor {
            owner_principal_id,
            position,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_cursor_decodes_to_first_page_for_caller() {
        let principal = Uuid::new_v4();
        let cursor = Cursor::decode(None, principal).unwrap();
        assert_eq!(cursor.owner_principal_id, principal);
        assert_eq!(cursor.position, 0);
    }

    #[test]
    fn round_trips_through_encode_decode() {
        let principal = Uuid::new_v4();
        let cursor = Cursor::first(principal).next(20);
        let encoded = cursor.encode();
        let decoded = Cursor::decode(Some(&encoded), principal).unwrap();
        assert_eq!(decoded, cursor);
    }

    #[test]
    fn cursor_minted_for_another_principal_is_rejected() {
        let owner = Uuid::new_v4();
        let impersonator = Uuid::new_v4();
        let cursor = Cursor::first(owner).next(10);
        let encoded = cursor.encode();
        let result = Cursor::decode(Some(&encoded), impersonator);
        assert!(matches!(result, Err(RpcError::InvalidCursor)));
    }

    #[test]
    fn malformed_cursor_is_rejected() {
        let result = Cursor::decode(Some("not-valid-base64!!"), Uuid::new_v4());
        assert!(matches!(result, Err(RpcError::InvalidCursor)));
    }
}
