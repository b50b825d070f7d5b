//! Pure fold from an event sequence to a four-namespace belief state with a
//! deterministic state hash.
//!
//! `BeliefReducer` is total (unknown event types are recorded as ignored,
//! never fatal), order-sensitive (append order per actor; cross-actor order
//! is whatever order the caller presents), and deterministic (same sequence
//! in, byte-identical `state_hash` out).

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::event::{event_type, Event};

const REDUCER_NAME: &str = "BeliefReducerV1";
const REDUCER_VERSION: &str = "1.0.0";
const DEFAULT_CONTESTED_THRESHOLD: f64 = 0.50;
const DEFAULT_OBSERVATION_CONFIDENCE: f64 = 0.50;
const DEFAULT_ATTESTATION_CONFIDENCE: f64 = 1.0;

/// A single piece of evidence contributing to a contested belief.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Evidence {
    pub event_id: String,
    pub actor: String,
    pub value: Value,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_utc: Option<String>,
}

/// A belief held in `canonical` or `local`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeliefEntry {
    pub value: Value,
    pub confidence: f64,
    pub source_event_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update_utc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attested_by: Option<String>,
}

/// A belief under active dispute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContestedEntry {
    pub reason: String,
    pub evidence: Vec<Evidence>,
}

/// A superseded or retracted belief, retained with provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedEntry {
    pub value: Value,
    pub confidence: f64,
    pub source_event_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retraction_event_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReducerMetadata {
    pub name: String,
    pub version: String,
    pub contested_confidence_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateMetadata {
    pub last_event_id: Option<String>,
    pub event_count: u64,
    pub state_hash: Option<String>,
    pub current_epoch: Option<Value>,
    pub ignored_types: BTreeSet<String>,
    pub reducer: ReducerMetadata,
}

/// The four-namespace belief state plus its metadata block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReducerState {
    pub canonical: BTreeMap<String, BeliefEntry>,
    pub local: BTreeMap<String, BeliefEntry>,
    pub contested: BTreeMap<String, ContestedEntry>,
    pub archived: BTreeMap<String, Vec<ArchivedEntry>>,
    pub metadata: StateMetadata,
}

struct KeyRevocationState {
    trust_boundary_position: usize,
}

/// Pure, deterministic reducer over a vault's events.
pub struct BeliefReducer {
    pub state: ReducerState,
    evidence_by_key: BTreeMap<String, Vec<Evidence>>,
    event_position: BTreeMap<String, usize>,
    event_actor: BTreeMap<String, String>,
    revoked_keys: BTreeMap<String, KeyRevocationState>,
    next_position: usize,
}

impl BeliefReducer {
    /// A fresh reducer. `contested_confidence_threshold` defaults to 0.50.
    pub fn new(contested_confidence_threshold: Option<f64>) -> Self {
        let threshold = contested_confidence_threshold.unwrap_or(DEFAULT_CONTESTED_THRESHOLD);
        let mut reducer = BeliefReducer {
            state: ReducerState {
                canonical: BTreeMap::new(),
                local: BTreeMap::new(),
                contested: BTreeMap::new(),
                archived: BTreeMap::new(),
                metadata: StateMetadata {
                    last_event_id: None,
                    event_count: 0,
                    state_hash: None,
                    current_epoch: None,
                    ignored_types: BTreeSet::new(),
                    reducer: ReducerMetadata {
                        name: REDUCER_NAME.to_string(),
                        version: REDUCER_VERSION.to_string(),
                        contested_confidence_threshold: threshold,
                    },
                },
            },
            evidence_by_key: BTreeMap::new(),
            event_position: BTreeMap::new(),
            event_actor: BTreeMap::new(),
            revoked_keys: BTreeMap::new(),
            next_position: 0,
        };
        reducer.update_state_hash();
        reducer
    }

    /// Fold a full event sequence and return the resulting state.
    pub fn reduce(events: &[Event]) -> ReducerState {
        let mut reducer = BeliefReducer::new(None);
        reducer.apply_events(events);
        reducer.state
    }

    /// Apply a batch of events, recomputing the state hash once at the end.
    pub fn apply_events(&mut self, events: &[Event]) {
        for event in events {
            self.apply_internal(event);
        }
        self.update_state_hash();
    }

    /// Apply a single event, recomputing the state hash immediately.
    pub fn apply_event(&mut self, event: &Event) {
        self.apply_internal(event);
        self.update_state_hash();
    }

    fn apply_internal(&mut self, event: &Event) {
        let position = self.next_position;
        self.next_position += 1;
        self.event_position.insert(event.event_id.clone(), position);
        self.event_actor.insert(event.event_id.clone(), event.actor.clone());

        match event.event_type.as_str() {
            event_type::GENESIS => self.handle_genesis(event),
            event_type::OBSERVATION => self.handle_observation(event),
            event_type::ATTESTATION => self.handle_attestation(event),
            event_type::RETRACTION => self.handle_retraction(event),
            event_type::KEY_REVOCATION => self.handle_key_revocation(event, position),
            event_type::KEY_PROMOTION => {}
            event_type::REDUCER_EPOCH => self.handle_reducer_epoch(event),
            other => {
                self.state.metadata.ignored_types.insert(other.to_string());
            }
        }

        self.state.metadata.last_event_id = Some(event.event_id.clone());
        self.state.metadata.event_count += 1;
    }

    fn handle_genesis(&mut self, event: &Event) {
        self.state.canonical.insert(
            "_identity:genesis".to_string(),
            BeliefEntry {
                value: event.payload.clone(),
                confidence: 1.0,
                source_event_ids: vec![event.event_id.clone()],
                last_update_utc: event.timestamp_utc.clone(),
                attested_by: Some(event.actor.clone()),
            },
        );
    }

    fn handle_observation(&mut self, event: &Event) {
        let (subject, predicate) = match subject_predicate(event) {
            Some(sp) => sp,
            None => return,
        };
        let key = format!("{subject}:{predicate}");
        let value = event.payload.get("value").cloned().unwrap_or(Value::Null);
        let confidence = event
            .payload
            .get("confidence")
            .and_then(|v| v.as_f64())
            .unwrap_or(DEFAULT_OBSERVATION_CONFIDENCE);
        let threshold = self.state.metadata.reducer.contested_confidence_threshold;

        self.record_evidence(&key, event, &value, confidence);

        if self.state.contested.contains_key(&key) {
            return;
        }

        if let Some(centry) = self.state.canonical.get(&key) {
            if centry.value != value {
                if centry.confidence >= threshold && confidence >= threshold {
                    self.mark_contested(&key, "conflicts_with_canonical");
                }
                return;
            } else {
                return;
            }
        }

        match self.state.local.get(&key).cloned() {
            None => {
                self.state.local.insert(
                    key,
                    BeliefEntry {
                        value,
                        confidence,
                        source_event_ids: vec![event.event_id.clone()],
                        last_update_utc: event.timestamp_utc.clone(),
                        attested_by: None,
                    },
                );
            }
            Some(existing) if existing.value == value => {
                let mut updated = existing;
                updated.confidence = updated.confidence.max(confidence);
                updated.source_event_ids.push(event.event_id.clone());
                updated.last_update_utc = event.timestamp_utc.clone();
                self.state.local.insert(key, updated);
            }
            Some(existing) => {
                if existing.confidence >= threshold && confidence >= threshold {
                    self.mark_contested(&key, "conflicts_with_local");
                } else if confidence > existing.confidence {
                    self.state.local.insert(
                        key,
                        BeliefEntry {
                            value,
                            confidence,
                            source_event_ids: vec![event.event_id.clone()],
                            last_update_utc: event.timestamp_utc.clone(),
                            attested_by: None,
                        },
                    );
                }
                // else: lower-confidence disagreement, existing local entry stands.
            }
        }
    }

    fn handle_attestation(&mut self, event: &Event) {
        let (subject, predicate) = match subject_predicate(event) {
            Some(sp) => sp,
            None => return,
        };
        let key = format!("{subject}:{predicate}");
        let value = event.payload.get("value").cloned().unwrap_or(Value::Null);
        let confidence = event
            .payload
            .get("confidence")
            .and_then(|v| v.as_f64())
            .unwrap_or(DEFAULT_ATTESTATION_CONFIDENCE);

        self.record_evidence(&key, event, &value, confidence);

        if let Some(contested) = self.state.contested.remove(&key) {
            let resolved = contested.evidence.iter().any(|e| e.value == value);
            for ev in contested.evidence {
                let superseded = if ev.value == value { Some(event.event_id.clone()) } else { None };
                self.archive(&key, ev.value, ev.confidence, vec![ev.event_id], superseded, None);
            }
            if !resolved {
                // Attestation didn't match any contested branch; still authoritative.
            }
            self.state.canonical.insert(key, self.new_canonical_entry(event, value, confidence));
            return;
        }

        if let Some(existing) = self.state.canonical.get(&key).cloned() {
            if existing.value != value {
                self.archive(
                    &key,
                    existing.value,
                    existing.confidence,
                    existing.source_event_ids,
                    Some(event.event_id.clone()),
                    None,
                );
                self.state.canonical.insert(key.clone(), self.new_canonical_entry(event, value, confidence));
            } else {
                let mut updated = existing;
                updated.source_event_ids.push(event.event_id.clone());
                updated.confidence = updated.confidence.max(confidence);
                self.state.canonical.insert(key.clone(), updated);
            }
            self.state.local.remove(&key);
            return;
        }

        if let Some(local_entry) = self.state.local.remove(&key) {
            self.archive(
                &key,
                local_entry.value,
                local_entry.confidence,
                local_entry.source_event_ids,
                Some(event.event_id.clone()),
                None,
            );
        }
        self.state.canonical.insert(key, self.new_canonical_entry(event, value, confidence));
    }

    fn new_canonical_entry(&self, event: &Event, value: Value, confidence: f64) -> BeliefEntry {
        BeliefEntry {
            value,
            confidence,
            source_event_ids: vec![event.event_id.clone()],
            last_update_utc: event.timestamp_utc.clone(),
            attested_by: Some(event.actor.clone()),
        }
    }

    fn handle_retraction(&mut self, event: &Event) {
        let (subject, predicate) = match subject_predicate(event) {
            Some(sp) => sp,
            None => return,
        };
        let key = format!("{subject}:{predicate}");

        if let Some(entry) = self.state.canonical.remove(&key) {
            self.archive(&key, entry.value, entry.confidence, entry.source_event_ids, None, Some(event.event_id.clone()));
        }
        if let Some(entry) = self.state.local.remove(&key) {
            self.archive(&key, entry.value, entry.confidence, entry.source_event_ids, None, Some(event.event_id.clone()));
        }
        if let Some(contested) = self.state.contested.remove(&key) {
            for ev in contested.evidence {
                self.archive(&key, ev.value, ev.confidence, vec![ev.event_id], None, Some(event.event_id.clone()));
            }
        }
    }

    fn handle_key_revocation(&mut self, event: &Event, position: usize) {
        let revoked_key_id = match event.payload.get("revoked_key_id").and_then(|v| v.as_str()) {
            Some(v) => v.to_string(),
            None => return,
        };
        let trust_boundary_position = event
            .payload
            .get("trust_boundary_event_id")
            .and_then(|v| v.as_str())
            .and_then(|id| self.event_position.get(id).copied())
            .unwrap_or(position.saturating_sub(1));

        self.revoked_keys.insert(revoked_key_id.clone(), KeyRevocationState { trust_boundary_position });
        self.migrate_suspect_claims(&revoked_key_id, trust_boundary_position);
    }

    fn handle_reducer_epoch(&mut self, event: &Event) {
        self.state.metadata.current_epoch = Some(json!({
            "epoch_id": event.payload.get("epoch_id"),
            "effective_from_event_id": event
                .payload
                .get("effective_from_event_id")
                .and_then(|v| v.as_str())
                .unwrap_or(&event.event_id),
            "reducer_hash": event.payload.get("reducer_hash"),
        }));
    }

    fn migrate_suspect_claims(&mut self, revoked_key: &str, trust_boundary_position: usize) {
        let candidate_keys: Vec<String> = self
            .state
            .canonical
            .keys()
            .chain(self.state.local.keys())
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        for key in candidate_keys {
            let canonical_suspect = self
                .state
                .canonical
                .get(&key)
                .map(|e| self.sourced_solely_from(&e.source_event_ids, revoked_key, trust_boundary_position))
                .unwrap_or(false);
            let local_suspect = self
                .state
                .local
                .get(&key)
                .map(|e| self.sourced_solely_from(&e.source_event_ids, revoked_key, trust_boundary_position))
                .unwrap_or(false);

            if canonical_suspect || local_suspect {
                self.mark_contested(&key, "key_revoked_post_trust_boundary");
            }
        }
    }

    fn sourced_solely_from(&self, source_ids: &[String], actor: &str, boundary_position: usize) -> bool {
        if source_ids.is_empty() {
            return false;
        }
        source_ids.iter().all(|id| {
            let right_actor = self.event_actor.get(id).map(|a| a == actor).unwrap_or(false);
            let after_boundary = self.event_position.get(id).map(|&p| p > boundary_position).unwrap_or(false);
            right_actor && after_boundary
        })
    }

    fn record_evidence(&mut self, key: &str, event: &Event, value: &Value, confidence: f64) {
        self.evidence_by_key.entry(key.to_string()).or_default().push(Evidence {
            event_id: event.event_id.clone(),
            actor: event.actor.clone(),
            value: value.clone(),
            confidence,
            timestamp_utc: event.timestamp_utc.clone(),
        });
    }

    fn mark_contested(&mut self, key: &str, reason: &str) {
        let mut evidence = self.evidence_by_key.get(key).cloned().unwrap_or_default();
        evidence.sort_by(|a, b| a.event_id.cmp(&b.event_id));

        self.state.contested.insert(
            key.to_string(),
            ContestedEntry { reason: reason.to_string(), evidence },
        );
        self.state.canonical.remove(key);
        self.state.local.remove(key);
    }

    fn archive(
        &mut self,
        key: &str,
        value: Value,
        confidence: f64,
        source_event_ids: Vec<String>,
        superseded_by: Option<String>,
        retraction_event_id: Option<String>,
    ) {
        self.state.archived.entry(key.to_string()).or_default().push(ArchivedEntry {
            value,
            confidence,
            source_event_ids,
            superseded_by,
            retraction_event_id,
        });
    }

    fn update_state_hash(&mut self) {
        let hashable = json!({
            "canonical": self.state.canonical,
            "local": self.state.local,
            "contested": self.state.contested,
            "archived": self.state.archived,
            "metadata": {
                "last_event_id": self.state.metadata.last_event_id,
                "event_count": self.state.metadata.event_count,
                "current_epoch": self.state.metadata.current_epoch,
                "ignored_types": self.state.metadata.ignored_types,
                "reducer": self.state.metadata.reducer,
            },
        });
        self.state.metadata.state_hash = Some(jcs_rs::canonical_hash_hex(&hashable).unwrap_or_default());
    }
}

fn subject_predicate(event: &Event) -> Option<(String, String)> {
    let subject = event.payload.get("subject")?.as_str()?.to_string();
    let predicate = event.payload.get("predicate")?.as_str()?.to_string();
    Some((subject, predicate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::event::{create_event, event_type};
    use rand::thread_rng;

    fn signed(event_type: &str, kp: &KeyPair, prev: Option<String>, payload: Value) -> Event {
        create_event(event_type, kp, prev, payload).unwrap()
    }

    #[test]
    fn empty_state_hash_is_deterministic() {
        let a = BeliefReducer::new(None);
        let b = BeliefReducer::new(None);
        assert_eq!(a.state.metadata.state_hash, b.state.metadata.state_hash);
    }

    #[test]
    fn observation_lands_in_local() {
        let kp = KeyPair::generate(&mut thread_rng());
        let e = signed(event_type::OBSERVATION, &kp, None, json!({"subject": "door", "predicate": "status", "value": "open", "confidence": 0.9}));
        let state = BeliefReducer::reduce(&[e]);
        assert_eq!(state.local.get("door:status").unwrap().value, json!("open"));
        assert_eq!(state.metadata.event_count, 1);
    }

    #[test]
    fn conflicting_high_confidence_observations_become_contested() {
        let alice = KeyPair::generate(&mut thread_rng());
        let bob = KeyPair::generate(&mut thread_rng());
        let e1 = signed(event_type::OBSERVATION, &alice, None, json!({"subject": "system", "predicate": "status", "value": "healthy", "confidence": 1.0}));
        let e2 = signed(event_type::OBSERVATION, &bob, None, json!({"subject": "system", "predicate": "status", "value": "degraded", "confidence": 0.9}));
        let state = BeliefReducer::reduce(&[e1, e2]);
        assert!(state.contested.contains_key("system:status"));
        assert!(!state.local.contains_key("system:status"));
        assert_eq!(state.contested["system:status"].evidence.len(), 2);
    }

    #[test]
    fn observation_against_contested_key_stays_out_of_local() {
        let alice = KeyPair::generate(&mut thread_rng());
        let bob = KeyPair::generate(&mut thread_rng());
        let carol = KeyPair::generate(&mut thread_rng());
        let e1 = signed(event_type::OBSERVATION, &alice, None, json!({"subject": "system", "predicate": "status", "value": "healthy", "confidence": 1.0}));
        let e2 = signed(event_type::OBSERVATION, &bob, None, json!({"subject": "system", "predicate": "status", "value": "degraded", "confidence": 0.9}));
        let e3 = signed(event_type::OBSERVATION, &carol, None, json!({"subject": "system", "predicate": "status", "value": "offline", "confidence": 0.7}));
        let state = BeliefReducer::reduce(&[e1, e2, e3]);
        assert!(state.contested.contains_key("system:status"));
        assert!(!state.local.contains_key("system:status"), "a contested key must never also live in local");
        assert_eq!(state.contested["system:status"].evidence.len(), 3, "the third observation is still retained as evidence");
    }

    #[test]
    fn attestation_resolves_contested_entry() {
        let alice = KeyPair::generate(&mut thread_rng());
        let bob = KeyPair::generate(&mut thread_rng());
        let oracle = KeyPair::generate(&mut thread_rng());
        let e1 = signed(event_type::OBSERVATION, &alice, None, json!({"subject": "system", "predicate": "status", "value": "healthy", "confidence": 1.0}));
        let e2 = signed(event_type::OBSERVATION, &bob, None, json!({"subject": "system", "predicate": "status", "value": "degraded", "confidence": 0.9}));
        let e3 = signed(event_type::ATTESTATION, &oracle, None, json!({"subject": "system", "predicate": "status", "value": "degraded"}));
        let state = BeliefReducer::reduce(&[e1, e2, e3]);
        assert!(!state.contested.contains_key("system:status"));
        assert_eq!(state.canonical["system:status"].value, json!("degraded"));
        assert!(state.archived.contains_key("system:status"));
    }

    #[test]
    fn attestation_archives_prior_canonical_on_contradiction() {
        let oracle = KeyPair::generate(&mut thread_rng());
        let e1 = signed(event_type::ATTESTATION, &oracle, None, json!({"subject": "a", "predicate": "b", "value": "v1"}));
        let e2 = signed(event_type::ATTESTATION, &oracle, Some(e1.event_id.clone()), json!({"subject": "a", "predicate": "b", "value": "v2"}));
        let state = BeliefReducer::reduce(&[e1, e2]);
        assert_eq!(state.canonical["a:b"].value, json!("v2"));
        let archived = &state.archived["a:b"];
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].value, json!("v1"));
    }

    #[test]
    fn retraction_archives_current_entry() {
        let kp = KeyPair::generate(&mut thread_rng());
        let e1 = signed(event_type::OBSERVATION, &kp, None, json!({"subject": "x", "predicate": "y", "value": 1, "confidence": 0.6}));
        let e2 = signed(event_type::RETRACTION, &kp, Some(e1.event_id.clone()), json!({"subject": "x", "predicate": "y"}));
        let state = BeliefReducer::reduce(&[e1, e2]);
        assert!(!state.local.contains_key("x:y"));
        assert!(!state.canonical.contains_key("x:y"));
        assert_eq!(state.archived["x:y"].len(), 1);
        assert!(state.archived["x:y"][0].retraction_event_id.is_some());
    }

    #[test]
    fn post_revocation_claims_move_to_contested() {
        let root = KeyPair::generate(&mut thread_rng());
        let quorum = KeyPair::generate(&mut thread_rng());

        let e_boundary = signed(event_type::OBSERVATION, &root, None, json!({"subject": "sys", "predicate": "a", "value": 1, "confidence": 0.9}));
        let e_suspect = signed(event_type::OBSERVATION, &root, Some(e_boundary.event_id.clone()), json!({"subject": "sys", "predicate": "b", "value": 1, "confidence": 0.9}));
        let e_revoke = signed(
            event_type::KEY_REVOCATION,
            &quorum,
            None,
            json!({
                "revoked_key_id": root.key_id(),
                "reason": "compromised",
                "trust_boundary_event_id": e_boundary.event_id,
            }),
        );

        let state = BeliefReducer::reduce(&[e_boundary, e_suspect, e_revoke]);
        assert!(state.local.contains_key("sys:a"), "evidence at/before boundary stays valid");
        assert!(!state.local.contains_key("sys:b"), "evidence after boundary is suspect");
        assert!(state.contested.contains_key("sys:b"));
    }

    #[test]
    fn unknown_event_type_is_recorded_but_not_fatal() {
        let kp = KeyPair::generate(&mut thread_rng());
        let e = signed("com.example.custom", &kp, None, json!({"anything": true}));
        let state = BeliefReducer::reduce(&[e]);
        assert_eq!(state.metadata.event_count, 1);
        assert!(state.metadata.ignored_types.contains("com.example.custom"));
    }

    #[test]
    fn reduce_then_snapshot_equivalence() {
        let kp = KeyPair::generate(&mut thread_rng());
        let e1 = signed(event_type::OBSERVATION, &kp, None, json!({"subject": "a", "predicate": "b", "value": 1, "confidence": 0.7}));
        let e2 = signed(event_type::OBSERVATION, &kp, Some(e1.event_id.clone()), json!({"subject": "c", "predicate": "d", "value": 2, "confidence": 0.7}));

        let full = BeliefReducer::reduce(&[e1.clone(), e2.clone()]);

        let mut incremental = BeliefReducer::new(None);
        incremental.apply_event(&e1);
        let checkpoint_hash = incremental.state.metadata.state_hash.clone();
        incremental.apply_event(&e2);

        // Replaying zero further events from a checkpoint after e1 must match
        // a reducer that only ever saw e1.
        let mut checkpoint_only = BeliefReducer::new(None);
        checkpoint_only.apply_event(&e1);
        assert_eq!(checkpoint_only.state.metadata.state_hash, checkpoint_hash);

        assert_eq!(full.metadata.event_count, incremental.state.metadata.event_count);
        assert_eq!(full.metadata.state_hash, incremental.state.metadata.state_hash);
    }
}
