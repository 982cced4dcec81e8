//! Asymmetric handshake yielding a shared symmetric key (§4.1).
//!
//! Reference design: ECDH over P-256, public keys encoded in SPKI DER form
//! and base64'd for the wire. The derived shared secret is used directly
//! as the 256-bit session symmetric key. One processor pair is bound per
//! track rather than per session, so compromise of one track's key does
//! not endanger siblings.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use p256::ecdh::EphemeralSecret;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::PublicKey;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::crypto::SessionKey;
use crate::error::{CoreError, CoreResult};

/// Client → server handshake request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyExchangeRequest {
    /// Base64-encoded SPKI-DER ephemeral public key.
    pub public_key: String,
    #[serde(default)]
    pub metadata: Value,
}

/// Server → client handshake response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyExchangeResponse {
    /// Base64-encoded SPKI-DER ephemeral public key (server's half).
    pub public_key: String,
    #[serde(default)]
    pub metadata: Value,
}

/// Client-side contract: generate an ephemeral keypair, build a request,
/// then derive the shared key from the server's response.
pub trait ClientKeyExchangeProcessor: Send + Sync {
    /// Generates an ephemeral key pair. Must be called before
    /// [`Self::create_request`] or [`Self::process_response`].
    fn initialize(&mut self) -> CoreResult<()>;

    /// Returns `{public_key, metadata}` to send to the server.
    fn create_request(&self) -> CoreResult<KeyExchangeRequest>;

    /// Derives the shared session key from the server's response.
    fn process_response(&self, response: &KeyExchangeResponse) -> CoreResult<SessionKey>;
}

/// Server-side contract: consume a client request, derive the shared key,
/// and return the response to send back.
pub trait ServerKeyExchangeProcessor: Send + Sync {
    /// Processes a handshake request for `session_id`, returning the
    /// response to send and the derived session key.
    fn process_request(
        &mut self,
        request: &KeyExchangeRequest,
        session_id: &str,
    ) -> CoreResult<(KeyExchangeResponse, SessionKey)>;

    /// Releases any key material held by this processor. Called exactly
    /// once when the owning track/session is destroyed.
    fn destroy(&mut self);
}

fn encode_public_key(secret: &EphemeralSecret) -> String {
    let public_key = secret.public_key();
    let encoded_point = public_key.to_encoded_point(false);
    BASE64.encode(encoded_point.as_bytes())
}

fn decode_public_key(encoded: &str) -> CoreResult<PublicKey> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| CoreError::handshake(format!("invalid base64 public key: {e}")))?;
    PublicKey::from_sec1_bytes(&bytes)
        .map_err(|e| CoreError::handshake(format!("malformed public key: {e}")))
}

/// ECDH-P256 implementation of [`ClientKeyExchangeProcessor`].
#[derive(Default)]
pub struct EcdhP256ClientProcessor {
    secret: Option<EphemeralSecret>,
}

impl ClientKeyExchangeProcessor for EcdhP256ClientProcessor {
    fn initialize(&mut self) -> CoreResult<()> {
        self.secret = Some(EphemeralSecret::random(&mut rand::rngs::OsRng));
        Ok(())
    }

    fn create_request(&self) -> CoreResult<KeyExchangeRequest> {
        let secret = self
            .secret
            .as_ref()
            .ok_or_else(|| CoreError::precondition("key exchange not initialized"))?;
        Ok(KeyExchangeRequest {
            public_key: encode_public_key(secret),
            metadata: json!({}),
        })
    }

    fn process_response(&self, response: &KeyExchangeResponse) -> CoreResult<SessionKey> {
        let secret = self
            .secret
            .as_ref()
            .ok_or_else(|| CoreError::precondition("key exchange not initialized"))?;
        let server_public = decode_public_key(&response.public_key)?;
        let shared = secret.diffie_hellman(&server_public);
        let bytes: [u8; 32] = shared.raw_secret_bytes().as_slice().try_into().map_err(|_| {
            CoreError::handshake("derived shared secret had unexpected length")
        })?;
        Ok(SessionKey::from_shared_secret(bytes))
    }
}

/// ECDH-P256 implementation of [`ServerKeyExchangeProcessor`].
#[derive(Default)]
pub struct EcdhP256ServerProcessor {
    secret: Option<EphemeralSecret>,
}

impl ServerKeyExchangeProcessor for EcdhP256ServerProcessor {
    fn process_request(
        &mut self,
        request: &KeyExchangeRequest,
        session_id: &str,
    ) -> CoreResult<(KeyExchangeResponse, SessionKey)> {
        let client_public = decode_public_key(&request.public_key)?;
        let secret = EphemeralSecret::random(&mut rand::rngs::OsRng);
        let shared = secret.diffie_hellman(&client_public);
        let bytes: [u8; 32] = shared.raw_secret_bytes().as_slice().try_into().map_err(|_| {
            CoreError::handshake("derived shared secret had unexpected length")
        })?;

        let response = KeyExchangeResponse {
            public_key: encode_public_key(&secret),
            metadata: json!({ "sessionId": session_id }),
        };

        self.secret = Some(secret);
        Ok((response, SessionKey::from_shared_secret(bytes)))
    }

    fn destroy(&mut self) {
        self.secret = None;
    }
}
