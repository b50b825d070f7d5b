//! Key registry: tracks active/revoked keys per actor and enforces the
//! two-event rotation ceremony. The registry is a per-vault object, never a
//! global singleton, and its on-disk form (`identity/keys.json`) is a
//! regenerable cache over the event log — the log remains the sole source
//! of truth.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::event::{event_type, Event};
use crate::error::{json_error, VaultError, VaultErrorKind};

/// Lifecycle status of a registered key. Revocation is terminal: a revoked
/// key never transitions back to active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Active,
    Revoked,
}

/// A single registered key and its lifecycle state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyRecord {
    pub public_key_b64: String,
    pub actor_label: String,
    pub status: KeyStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trust_boundary_event_id: Option<String>,
}

/// On-disk form of `identity/keys.json`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct KeysFile {
    #[serde(default)]
    keys: BTreeMap<String, KeyRecord>,
}

/// Per-vault key registry.
#[derive(Debug, Default, Clone)]
pub struct KeyRegistry {
    keys: BTreeMap<String, KeyRecord>,
}

impl KeyRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        KeyRegistry { keys: BTreeMap::new() }
    }

    /// Load a registry snapshot from `identity/keys.json`.
    pub fn load(path: &Path) -> Result<Self, VaultError> {
        let raw = std::fs::read_to_string(path)?;
        let file: KeysFile = serde_json::from_str(&raw)
            .map_err(|e| json_error(format!("invalid keys.json at {}", path.display()), e))?;
        Ok(KeyRegistry { keys: file.keys })
    }

    /// Persist the current snapshot to `identity/keys.json`.
    pub fn save(&self, path: &Path) -> Result<(), VaultError> {
        let file = KeysFile { keys: self.keys.clone() };
        let rendered = serde_json::to_string_pretty(&file)
            .map_err(|e| json_error("serializing keys.json", e))?;
        std::fs::write(path, rendered)?;
        Ok(())
    }

    /// Look up a key record by key ID.
    pub fn get(&self, key_id: &str) -> Option<&KeyRecord> {
        self.keys.get(key_id)
    }

    /// Whether `key_id` is known and currently active.
    pub fn is_active(&self, key_id: &str) -> bool {
        matches!(self.keys.get(key_id), Some(r) if r.status == KeyStatus::Active)
    }

    /// Whether `key_id` is known at all (active or revoked).
    pub fn is_known(&self, key_id: &str) -> bool {
        self.keys.contains_key(key_id)
    }

    /// Register a brand-new active key (genesis or promotion). Fails if the
    /// key is already known, active or revoked.
    pub fn register_active(
        &mut self,
        key_id: &str,
        public_key_b64: &str,
        actor_label: &str,
    ) -> Result<(), VaultError> {
        if self.keys.contains_key(key_id) {
            return Err(VaultError::new(
                VaultErrorKind::RotationRuleViolation,
                format!("{key_id}: already registered"),
            ));
        }
        self.keys.insert(
            key_id.to_string(),
            KeyRecord {
                public_key_b64: public_key_b64.to_string(),
                actor_label: actor_label.to_string(),
                status: KeyStatus::Active,
                trust_boundary_event_id: None,
            },
        );
        Ok(())
    }

    /// Transition a key active -> revoked, recording its trust boundary.
    pub fn revoke(
        &mut self,
        key_id: &str,
        trust_boundary_event_id: Option<String>,
    ) -> Result<(), VaultError> {
        let record = self.keys.get_mut(key_id).ok_or_else(|| {
            VaultError::new(VaultErrorKind::KeyNotAuthorized, format!("{key_id}: not registered"))
        })?;
        if record.status == KeyStatus::Revoked {
            return Err(VaultError::new(
                VaultErrorKind::RotationRuleViolation,
                format!("{key_id}: already revoked"),
            ));
        }
        record.status = KeyStatus::Revoked;
        record.trust_boundary_event_id = trust_boundary_event_id;
        Ok(())
    }

    /// Acceptance test for a `KEY_REVOCATION` signed by `signer` targeting `target`.
    pub fn can_revoke(&self, signer: &str, target: &str) -> Result<(), VaultError> {
        if !self.is_active(signer) {
            return Err(VaultError::new(
                VaultErrorKind::KeyNotAuthorized,
                format!("{signer}: signer is not an active key"),
            ));
        }
        if signer == target {
            return Err(VaultError::new(
                VaultErrorKind::RotationRuleViolation,
                format!("{signer}: a key may not sign its own revocation"),
            ));
        }
        if !self.is_active(target) {
            return Err(VaultError::new(
                VaultErrorKind::RotationRuleViolation,
                format!("{target}: target is not an active key"),
            ));
        }
        Ok(())
    }

    /// Acceptance test for a `KEY_PROMOTION` signed by `signer` introducing `new_key`.
    pub fn can_promote(&self, signer: &str, new_key: &str) -> Result<(), VaultError> {
        if !self.is_active(signer) {
            return Err(VaultError::new(
                VaultErrorKind::KeyNotAuthorized,
                format!("{signer}: signer is not an active key"),
            ));
        }
        if self.is_known(new_key) {
            return Err(VaultError::new(
                VaultErrorKind::RotationRuleViolation,
                format!("{new_key}: already known (active or revoked); self-promotion or reuse forbidden"),
            ));
        }
        Ok(())
    }

    /// Whether this registry has more than one active key (rotation is possible).
    pub fn has_quorum_key(&self) -> bool {
        self.keys.values().filter(|r| r.status == KeyStatus::Active).count() > 1
    }

    /// Rebuild a registry snapshot by folding `GENESIS`, `KEY_PROMOTION`, and
    /// `KEY_REVOCATION` events in append order. Malformed or out-of-protocol
    /// events are skipped rather than aborting the fold — the registry is
    /// derived and discardable, never the source of truth.
    pub fn derive_from_events(events: &[Event]) -> Self {
        let mut registry = KeyRegistry::new();

        for event in events {
            match event.event_type.as_str() {
                event_type::GENESIS => {
                    let actor_label = event
                        .payload
                        .get("actor_label")
                        .and_then(|v| v.as_str())
                        .unwrap_or("root");
                    let public_key_b64 = event
                        .payload
                        .get("public_key_b64")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default();
                    let _ = registry.register_active(&event.actor, public_key_b64, actor_label);
                }
                event_type::KEY_PROMOTION => {
                    let new_key_id = event.payload.get("new_key_id").and_then(|v| v.as_str());
                    let new_public_key = event
                        .payload
                        .get("new_public_key")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default();
                    let actor_label = registry
                        .get(&event.actor)
                        .map(|r| r.actor_label.clone())
                        .unwrap_or_else(|| "root".to_string());
                    if let Some(new_key_id) = new_key_id {
                        if registry.can_promote(&event.actor, new_key_id).is_ok() {
                            let _ = registry.register_active(new_key_id, new_public_key, &actor_label);
                        }
                    }
                }
                event_type::KEY_REVOCATION => {
                    let revoked_key_id = event.payload.get("revoked_key_id").and_then(|v| v.as_str());
                    let trust_boundary = event
                        .payload
                        .get("trust_boundary_event_id")
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string());
                    if let Some(revoked_key_id) = revoked_key_id {
                        if registry.can_revoke(&event.actor, revoked_key_id).is_ok() {
                            let _ = registry.revoke(revoked_key_id, trust_boundary);
                        }
                    }
                }
                _ => {}
            }
        }

        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revoked_key_never_reactivates() {
        let mut reg = KeyRegistry::new();
        reg.register_active("bp1_a", "pk_a", "alice").unwrap();
        reg.register_active("bp1_b", "pk_b", "alice").unwrap();
        reg.revoke("bp1_a", None).unwrap();
        assert!(!reg.is_active("bp1_a"));
        assert!(reg.revoke("bp1_a", None).is_err());
    }

    #[test]
    fn self_revocation_rejected() {
        let mut reg = KeyRegistry::new();
        reg.register_active("bp1_a", "pk_a", "alice").unwrap();
        assert!(reg.can_revoke("bp1_a", "bp1_a").is_err());
    }

    #[test]
    fn self_promotion_rejected() {
        let mut reg = KeyRegistry::new();
        reg.register_active("bp1_a", "pk_a", "alice").unwrap();
        assert!(reg.can_promote("bp1_a", "bp1_a").is_err());
    }

    #[test]
    fn promotion_of_already_known_target_rejected() {
        let mut reg = KeyRegistry::new();
        reg.register_active("bp1_a", "pk_a", "alice").unwrap();
        reg.register_active("bp1_b", "pk_b", "alice").unwrap();
        reg.revoke("bp1_b", None).unwrap();
        assert!(reg.can_promote("bp1_a", "bp1_b").is_err());
    }

    #[test]
    fn single_key_vault_has_no_quorum() {
        let mut reg = KeyRegistry::new();
        reg.register_active("bp1_a", "pk_a", "alice").unwrap();
        assert!(!reg.has_quorum_key());
        reg.register_active("bp1_b", "pk_b", "alice").unwrap();
        assert!(reg.has_quorum_key());
    }
}
