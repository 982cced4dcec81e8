//! Binds [`SessionRegistry`] to the [`ProducerTransport`] contract so the
//! HTTP layer talks to a trait object rather than the registry directly.

use std::sync::Arc;

use async_trait::async_trait;
use audiocrypt_core::{
    CoreResult, EncryptedSlice, KeyExchangeRequest, KeyExchangeWireResponse, ProducerTransport,
    SessionInfo, SessionRegistry, TrackInfo,
};
use serde_json::Value;

pub struct RegistryProducerTransport {
    registry: Arc<SessionRegistry>,
}

impl RegistryProducerTransport {
    #[must_use]
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ProducerTransport for RegistryProducerTransport {
    async fn create_session(&self, audio_data: Vec<u8>, _metadata: Value) -> CoreResult<String> {
        Ok(self.registry.create_session(audio_data))
    }

    async fn perform_key_exchange(
        &self,
        session_id: &str,
        request: KeyExchangeRequest,
        track_id: Option<String>,
    ) -> CoreResult<KeyExchangeWireResponse> {
        let (response, session_info) =
            self.registry.handle_key_exchange(session_id, request, track_id)?;
        Ok(KeyExchangeWireResponse {
            public_key: response.public_key,
            session_info,
            metadata: response.metadata,
        })
    }

    async fn get_session_info(&self, session_id: &str) -> CoreResult<SessionInfo> {
        self.registry.get_session_info(session_id)
    }

    async fn fetch_slice(
        &self,
        session_id: &str,
        slice_id: &str,
        track_id: Option<String>,
    ) -> CoreResult<EncryptedSlice> {
        self.registry.get_slice(session_id, slice_id, track_id).await
    }

    async fn add_track(
        &self,
        session_id: &str,
        audio_data: Vec<u8>,
        metadata: Value,
    ) -> CoreResult<TrackInfo> {
        self.registry.add_track(session_id, audio_data, metadata)
    }

    async fn remove_track(&self, session_id: &str, track_id: &str) -> CoreResult<SessionInfo> {
        self.registry.remove_track(session_id, track_id)
    }
}
