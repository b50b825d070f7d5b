//! Event records: signing payload derivation, content-addressed event IDs,
//! and the signed-event construction/verification contract.

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::crypto::{self, KeyPair};
use crate::error::{VaultError, VaultErrorKind};

/// Canonical event-type tags defined by the protocol. Anything else is a
/// reverse-domain custom tag, handled by the reducer's `Unknown` fallback.
pub mod event_type {
    pub const GENESIS: &str = "GENESIS";
    pub const OBSERVATION: &str = "OBSERVATION";
    pub const ATTESTATION: &str = "ATTESTATION";
    pub const RETRACTION: &str = "RETRACTION";
    pub const KEY_REVOCATION: &str = "KEY_REVOCATION";
    pub const KEY_PROMOTION: &str = "KEY_PROMOTION";
    pub const REDUCER_EPOCH: &str = "REDUCER_EPOCH";
}

/// A single vault event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Event type: one of the well-known tags above, or a custom reverse-domain tag.
    #[serde(rename = "type")]
    pub event_type: String,

    /// Content-addressed event ID: `evt_` + first 24 hex chars of SHA-256 over
    /// the canonical signing payload.
    pub event_id: String,

    /// Key ID of the signer; identifies this event's causal chain.
    pub actor: String,

    /// `event_id` of this actor's previous event, or absent for its first event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_event_hash: Option<String>,

    /// ISO-8601 UTC timestamp. Informational; never used for intra-vault ordering.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_utc: Option<String>,

    /// Event payload.
    pub payload: Value,

    /// Base64-encoded Ed25519 signature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Event {
    /// Construct an unsigned event shell with no `event_id` yet.
    pub fn new(
        event_type: &str,
        actor: &str,
        prev_event_hash: Option<String>,
        payload: Value,
    ) -> Self {
        Event {
            event_type: event_type.to_string(),
            event_id: String::new(),
            actor: actor.to_string(),
            prev_event_hash,
            payload,
            timestamp_utc: None,
            signature: None,
        }
    }

    /// The subset of fields hashed to derive `event_id`: everything except
    /// `event_id` and `signature`.
    fn id_payload(&self) -> Value {
        let mut map = Map::new();
        map.insert("type".to_string(), json!(self.event_type));
        map.insert("actor".to_string(), json!(self.actor));
        if let Some(ref prev) = self.prev_event_hash {
            map.insert("prev_event_hash".to_string(), json!(prev));
        }
        if let Some(ref ts) = self.timestamp_utc {
            map.insert("timestamp_utc".to_string(), json!(ts));
        }
        map.insert("payload".to_string(), self.payload.clone());
        Value::Object(map)
    }

    /// The signing payload: everything except `signature`, but with
    /// `event_id` present.
    pub fn signing_payload(&self) -> Value {
        let mut map = Map::new();
        map.insert("type".to_string(), json!(self.event_type));
        map.insert("event_id".to_string(), json!(self.event_id));
        map.insert("actor".to_string(), json!(self.actor));
        if let Some(ref prev) = self.prev_event_hash {
            map.insert("prev_event_hash".to_string(), json!(prev));
        }
        if let Some(ref ts) = self.timestamp_utc {
            map.insert("timestamp_utc".to_string(), json!(ts));
        }
        map.insert("payload".to_string(), self.payload.clone());
        Value::Object(map)
    }
}

/// Derive `event_id = "evt_" + hex(SHA-256(canonical(id_payload)))[0..24]`.
pub fn derive_event_id(event: &Event) -> Result<String, VaultError> {
    let hash = jcs_rs::canonical_hash(&event.id_payload())?;
    Ok(format!("evt_{}", hex::encode(&hash[0..12])))
}

/// Create and sign a fully-formed event.
pub fn create_event_full(
    event_type: &str,
    keypair: &KeyPair,
    prev_event_hash: Option<String>,
    payload: Value,
    timestamp_utc: Option<String>,
) -> Result<Event, VaultError> {
    let actor = keypair.key_id();
    let mut event = Event::new(event_type, &actor, prev_event_hash, payload);
    event.timestamp_utc = timestamp_utc;
    event.event_id = derive_event_id(&event)?;

    let canonical_bytes = jcs_rs::canonicalize(&event.signing_payload())?;
    let hash = jcs_rs::sha256(&canonical_bytes);
    let signature = keypair.sign(&hash);
    event.signature = Some(base64::engine::general_purpose::STANDARD.encode(signature.to_bytes()));

    Ok(event)
}

/// Create and sign an event with no explicit timestamp.
pub fn create_event(
    event_type: &str,
    keypair: &KeyPair,
    prev_event_hash: Option<String>,
    payload: Value,
) -> Result<Event, VaultError> {
    create_event_full(event_type, keypair, prev_event_hash, payload, None)
}

/// Verify an event's signature under the given public key.
///
/// Recomputes the exact signing payload hash; any mismatch fails with
/// `SignatureInvalid`.
pub fn verify_event_signature(event: &Event, public_key: &[u8; 32]) -> Result<bool, VaultError> {
    let signature_b64 = event.signature.as_ref().ok_or_else(|| {
        VaultError::new(VaultErrorKind::SignatureInvalid, format!("{}: missing signature", event.event_id))
    })?;
    let sig_bytes = crypto::decode_signature_b64(signature_b64)?;

    let canonical_bytes = jcs_rs::canonicalize(&event.signing_payload())?;
    let hash = jcs_rs::sha256(&canonical_bytes);

    crypto::verify_signature(&hash, &sig_bytes, public_key)
}
