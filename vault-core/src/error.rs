//! Stable error taxonomy shared by every fallible vault-core operation.
//!
//! Every public operation returns `Result<_, VaultError>`. Callers branch on
//! `VaultError::kind()`; the `context` string names the offending event ID,
//! file path, or key ID so operators can triage without re-deriving it.

use std::fmt;

/// Stable error kinds external collaborators can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultErrorKind {
    /// Non-finite numeric, non-string map key, or non-UTF-8 input during canonicalization.
    CanonicalizationError,
    /// Ed25519 signature did not verify.
    SignatureInvalid,
    /// Signer is unregistered or revoked.
    KeyNotAuthorized,
    /// `prev_event_hash` does not match the actor's last event.
    ChainBroken,
    /// Two events from the same actor reference the same `prev_event_hash`.
    ForkDetected,
    /// `event_id` already present in the log.
    DuplicateEventId,
    /// Self-revocation, self-promotion, or an already-known rotation target.
    RotationRuleViolation,
    /// Recomputed Merkle root does not match the sealed one.
    MerkleRootMismatch,
    /// A tracked file's content hash does not match its manifest entry.
    FileHashMismatch,
    /// A tracked file listed in the manifest is absent on disk.
    FileMissing,
    /// A resolved path escapes the vault root.
    PathEscape,
    /// A tracked path is a symbolic link.
    SymlinkRejected,
    /// Another writer holds the vault's exclusive append lock.
    VaultLocked,
    /// Underlying filesystem operation failed.
    IoError,
}

impl fmt::Display for VaultErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VaultErrorKind::CanonicalizationError => "CanonicalizationError",
            VaultErrorKind::SignatureInvalid => "SignatureInvalid",
            VaultErrorKind::KeyNotAuthorized => "KeyNotAuthorized",
            VaultErrorKind::ChainBroken => "ChainBroken",
            VaultErrorKind::ForkDetected => "ForkDetected",
            VaultErrorKind::DuplicateEventId => "DuplicateEventId",
            VaultErrorKind::RotationRuleViolation => "RotationRuleViolation",
            VaultErrorKind::MerkleRootMismatch => "MerkleRootMismatch",
            VaultErrorKind::FileHashMismatch => "FileHashMismatch",
            VaultErrorKind::FileMissing => "FileMissing",
            VaultErrorKind::PathEscape => "PathEscape",
            VaultErrorKind::SymlinkRejected => "SymlinkRejected",
            VaultErrorKind::VaultLocked => "VaultLocked",
            VaultErrorKind::IoError => "IoError",
        };
        f.write_str(s)
    }
}

/// A vault operation error: a stable kind plus actionable context.
#[derive(Debug)]
pub struct VaultError {
    kind: VaultErrorKind,
    context: String,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl VaultError {
    /// Construct a new error of the given kind with a human-readable context string.
    pub fn new(kind: VaultErrorKind, context: impl Into<String>) -> Self {
        VaultError {
            kind,
            context: context.into(),
            source: None,
        }
    }

    /// Attach an underlying cause.
    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// The stable error kind.
    pub fn kind(&self) -> VaultErrorKind {
        self.kind
    }

    /// The actionable context string (event ID / file path / key ID).
    pub fn context(&self) -> &str {
        &self.context
    }
}

impl fmt::Display for VaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.context)
    }
}

impl std::error::Error for VaultError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_deref().map(|e| e as _)
    }
}

impl From<jcs_rs::CanonicalizeError> for VaultError {
    fn from(e: jcs_rs::CanonicalizeError) -> Self {
        VaultError::new(VaultErrorKind::CanonicalizationError, e.to_string())
    }
}

impl From<std::io::Error> for VaultError {
    fn from(e: std::io::Error) -> Self {
        VaultError::new(VaultErrorKind::IoError, e.to_string()).with_source(e)
    }
}

/// Construct a `VaultError` from a `serde_json` parse failure, tagged as a
/// canonicalization problem since malformed JSON can never be canonicalized.
pub fn json_error(context: impl Into<String>, e: serde_json::Error) -> VaultError {
    VaultError::new(VaultErrorKind::CanonicalizationError, context.into()).with_source(e)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_context() {
        let err = VaultError::new(VaultErrorKind::ChainBroken, "evt_deadbeef");
        assert_eq!(err.to_string(), "ChainBroken: evt_deadbeef");
        assert_eq!(err.kind(), VaultErrorKind::ChainBroken);
        assert_eq!(err.context(), "evt_deadbeef");
    }

    #[test]
    fn wraps_canonicalize_error() {
        let c = jcs_rs::CanonicalizeError::NonFiniteNumber;
        let err: VaultError = c.into();
        assert_eq!(err.kind(), VaultErrorKind::CanonicalizationError);
    }
}
