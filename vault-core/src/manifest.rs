//! Vault sealing: a Merkle tree over every tracked file, recorded in a
//! manifest with a detached Ed25519 signature.
//!
//! On disk a seal is three artifacts: `manifest.json` (the file inventory
//! and Merkle root), `manifest.sig` (a detached Base64 signature over the
//! canonical manifest bytes), and `merkle_root.txt` (a plain-text copy of
//! the root for anyone grepping without a JSON parser).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::crypto::{self, KeyPair};
use crate::error::{json_error, VaultError, VaultErrorKind};

pub const MANIFEST_FILE_NAME: &str = "manifest.json";
pub const SIGNATURE_FILE_NAME: &str = "manifest.sig";
pub const MERKLE_ROOT_FILE_NAME: &str = "merkle_root.txt";
const LOCK_FILE_NAME: &str = ".vault.lock";

/// One tracked file, relative to the vault root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct FileEntry {
    pub path: String,
    pub sha256: String,
    pub size: u64,
}

/// The unsigned file inventory plus Merkle root sealing a vault snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub merkle_root: String,
    pub sealed_by_key_id: String,
    pub file_count: u64,
    pub entries: Vec<FileEntry>,
}

/// A complete seal: the manifest plus its detached signature.
#[derive(Debug, Clone)]
pub struct Seal {
    pub manifest: Manifest,
    pub signature_b64: String,
}

/// Walk the vault directory, hashing every file except the seal artifacts
/// and lock file, producing sorted entries relative to `vault_root`.
pub fn collect_file_entries(vault_root: &Path) -> Result<Vec<FileEntry>, VaultError> {
    let mut entries = Vec::new();
    walk(vault_root, vault_root, &mut entries)?;
    entries.sort();
    Ok(entries)
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<FileEntry>) -> Result<(), VaultError> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_symlink() {
            return Err(VaultError::new(VaultErrorKind::SymlinkRejected, path.display().to_string()));
        }

        let relative = path
            .strip_prefix(root)
            .map_err(|_| VaultError::new(VaultErrorKind::PathEscape, path.display().to_string()))?;
        let relative_str = relative.to_string_lossy().replace('\\', "/");

        if matches!(
            relative_str.as_str(),
            MANIFEST_FILE_NAME | SIGNATURE_FILE_NAME | MERKLE_ROOT_FILE_NAME | LOCK_FILE_NAME
        ) {
            continue;
        }

        if file_type.is_dir() {
            walk(root, &path, out)?;
        } else {
            let bytes = fs::read(&path)?;
            out.push(FileEntry {
                path: relative_str,
                sha256: jcs_rs::sha256_hex(&bytes),
                size: bytes.len() as u64,
            });
        }
    }
    Ok(())
}

fn leaf_hash(entry: &FileEntry) -> Result<[u8; 32], VaultError> {
    let record = json!({"path": entry.path, "sha256": entry.sha256, "size": entry.size});
    jcs_rs::canonical_hash(&record).map_err(VaultError::from)
}

/// Compute the Merkle root over sorted file entries. Leaves are SHA-256 of
/// the canonical JSON of each `{path, sha256, size}` record; an odd node at
/// any level is duplicated and paired with itself.
pub fn compute_merkle_root(entries: &[FileEntry]) -> Result<String, VaultError> {
    if entries.is_empty() {
        return Ok(jcs_rs::sha256_hex(b""));
    }

    let mut level: Vec<[u8; 32]> = entries.iter().map(leaf_hash).collect::<Result<_, _>>()?;

    while level.len() > 1 {
        let mut next = Vec::with_capacity((level.len() + 1) / 2);
        for pair in level.chunks(2) {
            let mut buf = Vec::with_capacity(64);
            buf.extend_from_slice(&pair[0]);
            buf.extend_from_slice(pair.get(1).unwrap_or(&pair[0]));
            next.push(jcs_rs::sha256(&buf));
        }
        level = next;
    }

    Ok(hex::encode(level[0]))
}

fn signing_payload(manifest: &Manifest) -> serde_json::Value {
    json!({
        "merkle_root": manifest.merkle_root,
        "sealed_by_key_id": manifest.sealed_by_key_id,
        "file_count": manifest.file_count,
        "entries": manifest.entries,
    })
}

/// Build and sign a manifest over the vault's current on-disk state.
pub fn seal(vault_root: &Path, sealing_key: &KeyPair) -> Result<Seal, VaultError> {
    let entries = collect_file_entries(vault_root)?;
    let merkle_root = compute_merkle_root(&entries)?;

    let manifest = Manifest {
        merkle_root,
        sealed_by_key_id: sealing_key.key_id(),
        file_count: entries.len() as u64,
        entries,
    };

    let hash = jcs_rs::canonical_hash(&signing_payload(&manifest))?;
    let signature = sealing_key.sign(&hash);
    let signature_b64 = base64::engine::general_purpose::STANDARD.encode(signature.to_bytes());

    Ok(Seal { manifest, signature_b64 })
}

/// Persist a seal as `manifest.json` + `manifest.sig` + `merkle_root.txt`.
pub fn save(vault_root: &Path, seal: &Seal) -> Result<(), VaultError> {
    let rendered = serde_json::to_string_pretty(&seal.manifest)
        .map_err(|e| json_error("serializing manifest.json", e))?;
    fs::write(vault_root.join(MANIFEST_FILE_NAME), rendered)?;
    fs::write(vault_root.join(SIGNATURE_FILE_NAME), &seal.signature_b64)?;
    fs::write(vault_root.join(MERKLE_ROOT_FILE_NAME), &seal.manifest.merkle_root)?;
    Ok(())
}

/// Load a seal from `manifest.json` + `manifest.sig` under the vault root.
pub fn load(vault_root: &Path) -> Result<Seal, VaultError> {
    let manifest_path = vault_root.join(MANIFEST_FILE_NAME);
    let raw = fs::read_to_string(&manifest_path)?;
    let manifest: Manifest = serde_json::from_str(&raw)
        .map_err(|e| json_error(format!("invalid {}", manifest_path.display()), e))?;

    let signature_b64 = fs::read_to_string(vault_root.join(SIGNATURE_FILE_NAME))?.trim().to_string();
    Ok(Seal { manifest, signature_b64 })
}

/// The outcome of a full seal verification.
#[derive(Debug, Default)]
pub struct SealVerification {
    pub merkle_root_matches: bool,
    pub signature_valid: bool,
    pub missing_files: Vec<String>,
    pub mismatched_files: Vec<String>,
}

impl SealVerification {
    pub fn is_valid(&self) -> bool {
        self.merkle_root_matches && self.signature_valid && self.missing_files.is_empty() && self.mismatched_files.is_empty()
    }
}

/// Verify a sealed vault: every manifest entry exists and hashes match, the
/// recomputed Merkle root matches the manifest, and the detached signature
/// verifies under `sealer_public_key`.
pub fn verify_seal(vault_root: &Path, seal: &Seal, sealer_public_key: &[u8; 32]) -> Result<SealVerification, VaultError> {
    let mut result = SealVerification::default();

    let on_disk: BTreeMap<String, (String, u64)> = collect_file_entries(vault_root)?
        .into_iter()
        .map(|e| (e.path, (e.sha256, e.size)))
        .collect();

    for entry in &seal.manifest.entries {
        match on_disk.get(&entry.path) {
            None => result.missing_files.push(entry.path.clone()),
            Some((sha256, size)) if sha256 != &entry.sha256 || *size != entry.size => {
                result.mismatched_files.push(entry.path.clone())
            }
            _ => {}
        }
    }

    let recomputed_root = compute_merkle_root(&seal.manifest.entries)?;
    result.merkle_root_matches = recomputed_root == seal.manifest.merkle_root;

    let hash = jcs_rs::canonical_hash(&signing_payload(&seal.manifest))?;
    let sig_bytes = crypto::decode_signature_b64(&seal.signature_b64)?;
    result.signature_valid = crypto::verify_signature(&hash, &sig_bytes, sealer_public_key)?;

    Ok(result)
}

/// Resolve a relative vault path, rejecting any path that would escape the
/// vault root (`..` components or absolute paths).
pub fn resolve_within_vault(vault_root: &Path, relative: &str) -> Result<PathBuf, VaultError> {
    let candidate = vault_root.join(relative);
    let canonical_root = vault_root.canonicalize().map_err(VaultError::from)?;
    let parent = candidate.parent().unwrap_or(vault_root);
    let canonical_parent = parent.canonicalize().unwrap_or_else(|_| parent.to_path_buf());
    if !canonical_parent.starts_with(&canonical_root) {
        return Err(VaultError::new(VaultErrorKind::PathEscape, relative.to_string()));
    }
    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::thread_rng;
    use tempfile::tempdir;

    fn entry(path: &str, content: &[u8]) -> FileEntry {
        FileEntry { path: path.into(), sha256: jcs_rs::sha256_hex(content), size: content.len() as u64 }
    }

    #[test]
    fn merkle_root_is_order_sensitive_and_content_sensitive() {
        let a = vec![entry("a", b"1"), entry("b", b"2")];
        let mut b = a.clone();
        b.reverse();
        assert_ne!(compute_merkle_root(&a).unwrap(), compute_merkle_root(&b).unwrap(), "leaf order matters, callers must sort first");

        let mut c = a.clone();
        c[0] = entry("a", b"tampered");
        assert_ne!(compute_merkle_root(&a).unwrap(), compute_merkle_root(&c).unwrap());
    }

    #[test]
    fn merkle_root_handles_odd_leaf_count_by_duplication() {
        let entries = vec![entry("a", b"1"), entry("b", b"2"), entry("c", b"3")];
        let root = compute_merkle_root(&entries).unwrap();
        assert_eq!(root.len(), 64);
    }

    #[test]
    fn seal_and_verify_round_trip() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/b.txt"), b"world").unwrap();

        let kp = KeyPair::generate(&mut thread_rng());
        let sealed = seal(dir.path(), &kp).unwrap();
        assert_eq!(sealed.manifest.file_count, 2);
        save(dir.path(), &sealed).unwrap();

        let loaded = load(dir.path()).unwrap();
        let result = verify_seal(dir.path(), &loaded, &kp.public_key()).unwrap();
        assert!(result.is_valid());
    }

    #[test]
    fn verify_seal_detects_tampered_file() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"hello").unwrap();

        let kp = KeyPair::generate(&mut thread_rng());
        let sealed = seal(dir.path(), &kp).unwrap();

        fs::write(dir.path().join("a.txt"), b"tampered").unwrap();
        let result = verify_seal(dir.path(), &sealed, &kp.public_key()).unwrap();
        assert!(!result.is_valid());
        assert_eq!(result.mismatched_files, vec!["a.txt".to_string()]);
    }

    #[test]
    fn verify_seal_detects_missing_file() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"hello").unwrap();

        let kp = KeyPair::generate(&mut thread_rng());
        let sealed = seal(dir.path(), &kp).unwrap();

        fs::remove_file(dir.path().join("a.txt")).unwrap();
        let result = verify_seal(dir.path(), &sealed, &kp.public_key()).unwrap();
        assert!(!result.is_valid());
        assert_eq!(result.missing_files, vec!["a.txt".to_string()]);
    }

    #[test]
    fn verify_seal_rejects_wrong_sealer_key() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"hello").unwrap();

        let kp = KeyPair::generate(&mut thread_rng());
        let other = KeyPair::generate(&mut thread_rng());
        let sealed = seal(dir.path(), &kp).unwrap();

        let result = verify_seal(dir.path(), &sealed, &other.public_key()).unwrap();
        assert!(!result.signature_valid);
    }

    #[test]
    fn resolve_within_vault_rejects_traversal() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("events")).unwrap();
        assert!(resolve_within_vault(dir.path(), "events/events.ndjson").is_ok());
        assert!(resolve_within_vault(dir.path(), "../escape.txt").is_err());
    }
}
