//! `vault-core`: a self-sovereign, append-only event vault.
//!
//! Every event is Ed25519-signed and content-addressed by its canonical
//! encoding (see [`jcs_rs`]). Events form a per-actor causal chain; a
//! two-event ceremony (`KEY_REVOCATION` followed by `KEY_PROMOTION`) lets an
//! actor rotate keys without losing continuity. A deterministic reducer
//! folds the log into a four-namespace belief state (`canonical`, `local`,
//! `contested`, `archived`) with a reproducible `state_hash`. A vault can be
//! sealed: every tracked file hashed into a Merkle tree and the root signed.
//!
//! The [`vault`] module is the entry point for most callers: [`vault::init`],
//! [`vault::append`], [`vault::verify`], [`vault::replay`], [`vault::rotate`],
//! [`vault::union_merge`], and [`vault::seal`].

pub mod crypto;
pub mod error;
pub mod event;
pub mod eventlog;
pub mod manifest;
pub mod reducer;
pub mod registry;
pub mod vault;

pub use crypto::KeyPair;
pub use error::{VaultError, VaultErrorKind};
pub use event::{Event, event_type};
pub use eventlog::{ChainFault, EventLog};
pub use manifest::{Manifest, Seal};
pub use reducer::{BeliefReducer, ReducerState};
pub use registry::KeyRegistry;
pub use vault::{InitOptions, InitOutcome, RotationOutcome, VerifyReport};
