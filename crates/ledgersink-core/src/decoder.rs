//! Payload decoding seam.
//!
//! The stream hands over raw module output bytes; a [`PayloadDecoder`]
//! turns them into a [`BlockOutput`]. The wire format is the decoder's
//! business. [`JsonPayloadDecoder`] reads the serde representation of
//! `BlockOutput`.

use crate::error::SinkError;
use crate::types::BlockOutput;

/// Decodes one block's module output.
pub trait PayloadDecoder: Send + Sync {
    fn decode(&self, payload: &[u8]) -> Result<BlockOutput, SinkError>;
}

/// JSON decoder for [`BlockOutput`].
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonPayloadDecoder;

impl PayloadDecoder for JsonPayloadDecoder {
    fn decode(&self, payload: &[u8]) -> Result<BlockOutput, SinkError> {
        serde_json::from_slice(payload)
            .map_err(|e| SinkError::Decode(format!("unmarshal module output: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TokenAmount;

    #[test]
    fn decodes_every_kind() {
        let payload = br#"{
            "initialized_accounts": [{"trx_hash": "h1", "owner": "A", "account": "D1"}],
            "transfers": [{"trx_hash": "h1", "from": "D1", "to": "B", "amount": "1000000000"}],
            "mints": [{"trx_hash": "h2", "to": "B", "amount": 5}],
            "burns": [{"trx_hash": "h3", "from": "B", "amount": "2"}]
        }"#;
        let out = JsonPayloadDecoder.decode(payload).unwrap();
        assert_eq!(out.event_count(), 4);
        assert_eq!(out.initialized_accounts[0].account, "D1");
        assert_eq!(out.transfers[0].amount, TokenAmount::from(1_000_000_000));
        assert_eq!(out.mints[0].amount, TokenAmount::from(5));
    }

    #[test]
    fn malformed_payload_is_a_decode_error() {
        let err = JsonPayloadDecoder.decode(b"{not json").unwrap_err();
        assert!(matches!(err, SinkError::Decode(_)));
    }
}
