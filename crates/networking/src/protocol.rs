// networking/src/protocol.rs

//! Wire protocol `eirene/1`: 16 reserved message codes, a 10 MiB frame cap,
//! and the decoding rules that feed `SecurityManager` violations.

use chain_types::{Amount, Block, Transaction};
use crypto::{Address, Hash};
use serde::{Deserialize, Serialize};

/// Maximum size of a single encoded frame. Larger frames are a protocol
/// violation and the connection is dropped without decoding.
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Interval at which `P2PHandler` expects (and sends) keep-alive pings.
pub const PING_INTERVAL_SECS: u64 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageCode {
    Status = 0x00,
    NewBlock = 0x01,
    BlockRequest = 0x02,
    BlockResponse = 0x03,
    NewTx = 0x04,
    TxRequest = 0x05,
    TxResponse = 0x06,
    ValidatorSet = 0x07,
    Vote = 0x08,
    Proposal = 0x09,
    Evidence = 0x0A,
    Ping = 0x0B,
    Pong = 0x0C,
}

impl MessageCode {
    pub fn of(msg: &ProtocolMessage) -> Self {
        match msg {
            ProtocolMessage::Status(_) => Self::Status,
            ProtocolMessage::NewBlock(_) => Self::NewBlock,
            ProtocolMessage::BlockRequest(_) => Self::BlockRequest,
            ProtocolMessage::BlockResponse(_) => Self::BlockResponse,
            ProtocolMessage::NewTx(_) => Self::NewTx,
            ProtocolMessage::TxRequest(_) => Self::TxRequest,
            ProtocolMessage::TxResponse(_) => Self::TxResponse,
            ProtocolMessage::ValidatorSet(_) => Self::ValidatorSet,
            ProtocolMessage::Vote(_) => Self::Vote,
            ProtocolMessage::Proposal(_) => Self::Proposal,
            ProtocolMessage::Evidence(_) => Self::Evidence,
            ProtocolMessage::Ping => Self::Ping,
            ProtocolMessage::Pong => Self::Pong,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusPayload {
    pub protocol_version: u64,
    pub head: Hash,
    pub total_difficulty: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBlockPayload {
    pub block: Block,
    pub total_difficulty: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BlockQuery {
    Hashes(Vec<Hash>),
    Range { start: u64, max_blocks: u32 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockRequestPayload {
    pub query: BlockQuery,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockResponsePayload {
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTxPayload {
    pub transactions: Vec<Transaction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxRequestPayload {
    pub hashes: Vec<Hash>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxResponsePayload {
    pub transactions: Vec<Transaction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorSetPayload {
    pub addresses: Vec<Address>,
}

/// Vote/Proposal/Evidence carry opaque bytes: no BFT round state machine is
/// implemented here (out of scope), only the plumbing to pass them through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpaquePayload {
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProtocolMessage {
    Status(StatusPayload),
    NewBlock(NewBlockPayload),
    BlockRequest(BlockRequestPayload),
    BlockResponse(BlockResponsePayload),
    NewTx(NewTxPayload),
    TxRequest(TxRequestPayload),
    TxResponse(TxResponsePayload),
    ValidatorSet(ValidatorSetPayload),
    Vote(OpaquePayload),
    Proposal(OpaquePayload),
    Evidence(OpaquePayload),
    Ping,
    Pong,
}

impl ProtocolMessage {
    pub fn code(&self) -> MessageCode {
        MessageCode::of(self)
    }

    pub fn encode(&self) -> Result<Vec<u8>, crate::NetworkError> {
        let bytes = bincode::serialize(self)
            .map_err(|e| crate::NetworkError::SerializationError(e.to_string()))?;
        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(crate::NetworkError::ProtocolError(format!(
                "frame of {} bytes exceeds {} byte cap",
                bytes.len(),
                MAX_MESSAGE_SIZE
            )));
        }
        Ok(bytes)
    }

    /// Decodes a frame per the wire rules: oversize and malformed payloads
    /// are both `ProtocolError`s, which callers must treat as connection
    /// drops plus a `SecurityManager` violation.
    pub fn decode(bytes: &[u8]) -> Result<Self, crate::NetworkError> {
        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(crate::NetworkError::ProtocolError(format!(
                "frame of {} bytes exceeds {} byte cap",
                bytes.len(),
                MAX_MESSAGE_SIZE
            )));
        }
        bincode::deserialize(bytes)
            .map_err(|e| crate::NetworkError::InvalidMessage(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_status() {
        let msg = ProtocolMessage::Status(StatusPayload {
            protocol_version: 1,
            head: Hash::zero(),
            total_difficulty: Amount::zero(),
        });
        let bytes = msg.encode().unwrap();
        let decoded = ProtocolMessage::decode(&bytes).unwrap();
        assert_eq!(decoded.code(), MessageCode::Status);
    }

    #[test]
    fn test_oversize_frame_rejected() {
        let oversize = vec![0u8; MAX_MESSAGE_SIZE + 1];
        assert!(ProtocolMessage::decode(&oversize).is_err());
    }

    #[test]
    fn test_malformed_payload_rejected() {
        let garbage = vec![0xFFu8; 16];
        assert!(ProtocolMessage::decode(&garbage).is_err());
    }

    #[test]
    fn test_ping_pong_codes() {
        assert_eq!(ProtocolMessage::Ping.code(), MessageCode::Ping);
        assert_eq!(ProtocolMessage::Pong.code(), MessageCode::Pong);
    }
}
