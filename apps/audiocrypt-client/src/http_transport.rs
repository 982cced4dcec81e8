//! Binds an HTTP producer server to the [`ConsumerTransport`] contract.

use async_trait::async_trait;
use audiocrypt_core::{
    ContainerTag, CoreError, CoreResult, EncryptedSlice, KeyExchangeRequest, KeyExchangeResponse,
    KeyExchangeResponseWithSession, KeyExchangeWireResponse, SessionInfo,
};
use serde_json::Value;

pub struct HttpConsumerTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpConsumerTransport {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

/// Maps the lowercase container tag the producer puts on the wire back to
/// [`ContainerTag`]. Unrecognized values fall back to `Unknown`, matching
/// the producer's own fallback for unparseable assets.
#[must_use]
pub fn parse_container_tag(raw: Option<&str>) -> ContainerTag {
    match raw {
        Some("wav") => ContainerTag::Wav,
        Some("mp3") => ContainerTag::Mp3,
        Some("flac") => ContainerTag::Flac,
        Some("ogg") => ContainerTag::Ogg,
        _ => ContainerTag::Unknown,
    }
}

#[async_trait]
impl audiocrypt_core::ConsumerTransport for HttpConsumerTransport {
    async fn create_session(&self, audio_data: Vec<u8>, _metadata: Value) -> CoreResult<String> {
        let response = self
            .client
            .post(format!("{}/sessions", self.base_url))
            .body(audio_data)
            .send()
            .await
            .map_err(|e| CoreError::transport(e.to_string()))?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| CoreError::malformed(e.to_string()))?;
        body["sessionId"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| CoreError::malformed("response missing sessionId"))
    }

    async fn perform_key_exchange(
        &self,
        session_id: &str,
        request: KeyExchangeRequest,
        track_id: Option<String>,
    ) -> CoreResult<KeyExchangeResponseWithSession> {
        let mut body = serde_json::json!({
            "publicKey": request.public_key,
            "metadata": request.metadata,
        });
        if let Some(track_id) = track_id {
            body["trackId"] = Value::String(track_id);
        }

        let response = self
            .client
            .post(format!(
                "{}/sessions/{session_id}/key-exchange",
                self.base_url
            ))
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::transport(e.to_string()))?;

        let wire: KeyExchangeWireResponse = response
            .json()
            .await
            .map_err(|e| CoreError::malformed(e.to_string()))?;

        Ok(KeyExchangeResponseWithSession {
            response: KeyExchangeResponse {
                public_key: wire.public_key,
                metadata: wire.metadata,
            },
            session_info: wire.session_info,
        })
    }

    async fn get_session_info(&self, session_id: &str) -> CoreResult<SessionInfo> {
        let response = self
            .client
            .get(format!("{}/sessions/{session_id}", self.base_url))
            .send()
            .await
            .map_err(|e| CoreError::transport(e.to_string()))?;

        response
            .json()
            .await
            .map_err(|e| CoreError::malformed(e.to_string()))
    }

    async fn fetch_slice(
        &self,
        session_id: &str,
        slice_id: &str,
        track_id: Option<String>,
    ) -> CoreResult<EncryptedSlice> {
        let mut request = self.client.get(format!(
            "{}/sessions/{session_id}/slices/{slice_id}",
            self.base_url
        ));
        if let Some(track_id) = &track_id {
            request = request.query(&[("trackId", track_id.as_str())]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CoreError::transport(e.to_string()))?;

        let sequence: u32 = response
            .headers()
            .get("x-audiocrypt-sequence")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| CoreError::malformed("missing x-audiocrypt-sequence header"))?;
        let encrypted_len: usize = response
            .headers()
            .get("x-audiocrypt-encrypted-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| CoreError::malformed("missing x-audiocrypt-encrypted-length header"))?;

        let payload = response
            .bytes()
            .await
            .map_err(|e| CoreError::transport(e.to_string()))?;

        Ok(EncryptedSlice::from_wire_payload(
            slice_id.to_string(),
            sequence,
            session_id.to_string(),
            track_id,
            &payload,
            encrypted_len,
        ))
    }
}
