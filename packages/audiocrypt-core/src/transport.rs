//! Transport boundary (§6): the four request types carried between
//! producer and consumer. Implementation-free — no assumption about
//! framing (HTTP, WebSocket, or otherwise) appears here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreResult;
use crate::keyexchange::{KeyExchangeRequest, KeyExchangeResponse};

/// Per-track metadata published as part of a multi-track [`SessionInfo`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    pub track_id: String,
    pub track_index: u32,
    pub total_slices: u32,
    pub slice_duration_ms: u32,
    pub sample_rate: u32,
    pub channels: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bit_depth: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_float32: Option<bool>,
    pub slice_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// Wire shape returned by CreateSession/GetSessionInfo/PerformKeyExchange.
///
/// Backward-compatibility rule (§6): in multi-track sessions the top-level
/// `total_slices`/`slice_ids`/... fields mirror the active track's values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: String,
    pub total_slices: u32,
    pub slice_duration_ms: u32,
    pub sample_rate: u32,
    pub channels: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bit_depth: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_float32: Option<bool>,
    pub slice_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracks: Option<Vec<TrackInfo>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_track_id: Option<String>,
}

/// Response envelope for PerformKeyExchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyExchangeWireResponse {
    pub public_key: String,
    pub session_info: SessionInfo,
    #[serde(default)]
    pub metadata: Value,
}

/// An encrypted slice as carried by the transport.
///
/// The transport conveys `{id, sequence, session_id, encrypted_data_length,
/// iv_length, track_id?}` as metadata alongside a contiguous binary payload
/// of `encrypted_data || iv`; the consumer splits on `encrypted_data_length`
/// (§6). This struct models the already-split, in-memory form both peers
/// operate on once the framing has been stripped away by the transport
/// implementation.
#[derive(Debug, Clone)]
pub struct EncryptedSlice {
    pub id: String,
    pub sequence: u32,
    pub session_id: String,
    pub track_id: Option<String>,
    pub encrypted_data: Vec<u8>,
    pub iv: Vec<u8>,
}

impl EncryptedSlice {
    /// Serializes to the `encrypted_data || iv` wire payload plus the
    /// `encrypted_data_length` needed to split it back apart.
    #[must_use]
    pub fn to_wire_payload(&self) -> (Vec<u8>, usize) {
        let mut payload = Vec::with_capacity(self.encrypted_data.len() + self.iv.len());
        payload.extend_from_slice(&self.encrypted_data);
        payload.extend_from_slice(&self.iv);
        (payload, self.encrypted_data.len())
    }

    /// Reconstructs from a wire payload and its metadata fields.
    #[must_use]
    pub fn from_wire_payload(
        id: String,
        sequence: u32,
        session_id: String,
        track_id: Option<String>,
        payload: &[u8],
        encrypted_data_length: usize,
    ) -> Self {
        let (encrypted_data, iv) = payload.split_at(encrypted_data_length.min(payload.len()));
        Self {
            id,
            sequence,
            session_id,
            track_id,
            encrypted_data: encrypted_data.to_vec(),
            iv: iv.to_vec(),
        }
    }
}

/// Producer-side transport contract: everything SessionRegistry needs to
/// serve over the wire.
#[async_trait]
pub trait ProducerTransport: Send + Sync {
    async fn create_session(&self, audio_data: Vec<u8>, metadata: Value) -> CoreResult<String>;
    async fn perform_key_exchange(
        &self,
        session_id: &str,
        request: KeyExchangeRequest,
        track_id: Option<String>,
    ) -> CoreResult<KeyExchangeWireResponse>;
    async fn get_session_info(&self, session_id: &str) -> CoreResult<SessionInfo>;
    async fn fetch_slice(
        &self,
        session_id: &str,
        slice_id: &str,
        track_id: Option<String>,
    ) -> CoreResult<EncryptedSlice>;
    async fn add_track(
        &self,
        session_id: &str,
        audio_data: Vec<u8>,
        metadata: Value,
    ) -> CoreResult<TrackInfo>;
    async fn remove_track(&self, session_id: &str, track_id: &str) -> CoreResult<SessionInfo>;
}

/// Consumer-side transport contract: everything SliceLoader needs to call
/// out to a producer.
#[async_trait]
pub trait ConsumerTransport: Send + Sync {
    async fn create_session(&self, audio_data: Vec<u8>, metadata: Value) -> CoreResult<String>;
    async fn perform_key_exchange(
        &self,
        session_id: &str,
        request: KeyExchangeRequest,
        track_id: Option<String>,
    ) -> CoreResult<KeyExchangeResponseWithSession>;
    async fn get_session_info(&self, session_id: &str) -> CoreResult<SessionInfo>;
    async fn fetch_slice(
        &self,
        session_id: &str,
        slice_id: &str,
        track_id: Option<String>,
    ) -> CoreResult<EncryptedSlice>;
}

/// Client-visible view of a key-exchange response: the processor only
/// needs `public_key` to derive the shared key, but the caller also wants
/// the fresh `SessionInfo` that came back with it.
#[derive(Debug, Clone)]
pub struct KeyExchangeResponseWithSession {
    pub response: KeyExchangeResponse,
    pub session_info: SessionInfo,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_payload_round_trips_split() {
        let slice = EncryptedSlice {
            id: "slice-1".to_string(),
            sequence: 0,
            session_id: "session-1".to_string(),
            track_id: None,
            encrypted_data: vec![1, 2, 3, 4],
            iv: vec![9, 9, 9],
        };

        let (payload, encrypted_len) = slice.to_wire_payload();
        let rebuilt = EncryptedSlice::from_wire_payload(
            slice.id.clone(),
            slice.sequence,
            slice.session_id.clone(),
            slice.track_id.clone(),
            &payload,
            encrypted_len,
        );

        assert_eq!(rebuilt.encrypted_data, slice.encrypted_data);
        assert_eq!(rebuilt.iv, slice.iv);
    }

    #[test]
    fn session_info_serializes_with_camel_case_keys() {
        let info = SessionInfo {
            session_id: "s1".to_string(),
            total_slices: 4,
            slice_duration_ms: 5000,
            sample_rate: 44_100,
            channels: 2,
            bit_depth: Some(16),
            is_float32: Some(false),
            slice_ids: vec!["a".to_string(), "b".to_string()],
            format: Some("wav".to_string()),
            tracks: None,
            active_track_id: None,
        };

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["sessionId"], "s1");
        assert_eq!(json["totalSlices"], 4);
        assert!(json.get("tracks").is_none());
    }
}
