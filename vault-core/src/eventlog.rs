//! Append-only event log backed by `events/events.ndjson`.
//!
//! Writers take an exclusive advisory lock on `.vault.lock` before
//! appending; appends are durable (write to a temp segment, `fsync`, then
//! atomically rename over the log) so a crash mid-write never corrupts
//! previously-committed events. Reads tolerate a truncated trailing line
//! left by a writer that died between the temp write and the rename.

use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::{json_error, VaultError, VaultErrorKind};
use crate::event::Event;

const EVENTS_FILE_NAME: &str = "events.ndjson";
const LOCK_FILE_NAME: &str = ".vault.lock";

/// Handle onto a vault's on-disk event log.
pub struct EventLog {
    events_dir: PathBuf,
    lock_path: PathBuf,
}

/// A chain-integrity problem found during verification. Verification
/// collects every failure rather than stopping at the first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainFault {
    /// An actor's first event carries a `prev_event_hash`.
    GenesisHasPrev { event_id: String },
    /// `prev_event_hash` does not resolve to the actor's preceding event.
    BrokenLink { event_id: String, expected_prev: Option<String> },
    /// Two events from the same actor reference the same predecessor.
    Fork { actor: String, event_ids: Vec<String> },
    /// The same `event_id` appears more than once in the log.
    DuplicateEventId { event_id: String },
}

impl EventLog {
    /// Open (without creating) the event log rooted at `vault_root`.
    pub fn open(vault_root: &Path) -> Self {
        EventLog {
            events_dir: vault_root.join("events"),
            lock_path: vault_root.join(LOCK_FILE_NAME),
        }
    }

    /// Ensure the `events/` directory and lock file exist.
    pub fn init(vault_root: &Path) -> Result<Self, VaultError> {
        let log = EventLog::open(vault_root);
        fs::create_dir_all(&log.events_dir)?;
        OpenOptions::new().create(true).append(true).open(&log.lock_path)?;
        let events_path = log.events_dir.join(EVENTS_FILE_NAME);
        if !events_path.exists() {
            File::create(&events_path)?;
        }
        Ok(log)
    }

    fn events_path(&self) -> PathBuf {
        self.events_dir.join(EVENTS_FILE_NAME)
    }

    fn lock(&self) -> Result<File, VaultError> {
        let file = OpenOptions::new().create(true).append(true).open(&self.lock_path)?;
        file.try_lock_exclusive().map_err(|e| {
            VaultError::new(VaultErrorKind::VaultLocked, self.lock_path.display().to_string()).with_source(e)
        })?;
        Ok(file)
    }

    /// Read every event currently committed to the log, in file order.
    /// A final line with no trailing newline that fails to parse is
    /// silently discarded as an incomplete write.
    pub fn read_all(&self) -> Result<Vec<Event>, VaultError> {
        let path = self.events_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&path)?;
        let reader = BufReader::new(file);
        let lines: Vec<String> = reader.lines().collect::<Result<_, _>>()?;

        let mut events = Vec::with_capacity(lines.len());
        for (idx, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Event>(line) {
                Ok(event) => events.push(event),
                Err(e) => {
                    if idx == lines.len() - 1 {
                        break; // tolerate a torn final line from a crashed writer
                    }
                    return Err(json_error(format!("corrupt event at line {}", idx + 1), e));
                }
            }
        }
        Ok(events)
    }

    /// Append one event under the exclusive lock. Fails with
    /// `DuplicateEventId` if the event is already present.
    pub fn append(&self, event: &Event) -> Result<(), VaultError> {
        let lock_file = self.lock()?;
        let result = self.append_locked(event);
        FileExt::unlock(&lock_file).ok();
        result
    }

    fn append_locked(&self, event: &Event) -> Result<(), VaultError> {
        let existing = self.read_all()?;
        if existing.iter().any(|e| e.event_id == event.event_id) {
            return Err(VaultError::new(VaultErrorKind::DuplicateEventId, event.event_id.clone()));
        }

        let path = self.events_path();
        let tmp_path = self.events_dir.join(format!(".{}.tmp", event.event_id));

        let mut line = serde_json::to_string(event).map_err(|e| json_error("serializing event", e))?;
        line.push('\n');

        {
            let mut tmp = File::create(&tmp_path)?;
            let existing_bytes = fs::read(&path).unwrap_or_default();
            tmp.write_all(&existing_bytes)?;
            tmp.write_all(line.as_bytes())?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &path)?;

        let dir = File::open(&self.events_dir)?;
        dir.sync_all().ok(); // best-effort directory-entry durability; not all filesystems support it

        Ok(())
    }

    /// All events signed by a given actor (key ID), in log order.
    pub fn events_for(&self, actor: &str) -> Result<Vec<Event>, VaultError> {
        Ok(self.read_all()?.into_iter().filter(|e| e.actor == actor).collect())
    }

    /// Verify every actor's causal chain: no missing genesis, no broken
    /// links, no forks, and no duplicate event IDs log-wide. Returns every
    /// fault found rather than stopping at the first.
    pub fn verify_chain(&self) -> Result<Vec<ChainFault>, VaultError> {
        let events = self.read_all()?;
        Ok(verify_chain_faults(&events))
    }

    /// Merge another vault's events into this log: union by event ID,
    /// re-verify the combined chain, and report any forks introduced by
    /// the merge. Events already present are skipped; new events are
    /// appended in `(timestamp_utc, actor, event_id)` order.
    pub fn union_merge(&self, other: &[Event]) -> Result<Vec<ChainFault>, VaultError> {
        let mut existing = self.read_all()?;
        let known: HashSet<String> = existing.iter().map(|e| e.event_id.clone()).collect();

        let mut incoming: Vec<Event> = other.iter().filter(|e| !known.contains(&e.event_id)).cloned().collect();
        incoming.sort_by(|a, b| {
            (a.timestamp_utc.clone(), a.actor.clone(), a.event_id.clone())
                .cmp(&(b.timestamp_utc.clone(), b.actor.clone(), b.event_id.clone()))
        });

        for event in &incoming {
            self.append(event)?;
        }

        existing.extend(incoming);
        Ok(verify_chain_faults(&existing))
    }
}

pub(crate) fn verify_chain_faults(events: &[Event]) -> Vec<ChainFault> {
    let mut faults = Vec::new();
    let mut seen_ids: HashSet<String> = HashSet::new();

    for event in events {
        if !seen_ids.insert(event.event_id.clone()) {
            faults.push(ChainFault::DuplicateEventId { event_id: event.event_id.clone() });
        }
    }

    let mut by_actor: BTreeMap<&str, Vec<&Event>> = BTreeMap::new();
    for event in events {
        by_actor.entry(event.actor.as_str()).or_default().push(event);
    }

    for (_, actor_events) in by_actor {
        let mut seen_event_ids: HashSet<&str> = HashSet::new();
        let mut children_of: BTreeMap<Option<&str>, Vec<&str>> = BTreeMap::new();

        for event in &actor_events {
            let prev = event.prev_event_hash.as_deref();
            if prev.is_none() && seen_event_ids.is_empty() {
                // first event seen for this actor carries no prev: fine
            } else if prev.is_none() {
                faults.push(ChainFault::GenesisHasPrev { event_id: event.event_id.clone() });
            } else if let Some(prev_id) = prev {
                if !seen_event_ids.contains(prev_id) {
                    faults.push(ChainFault::BrokenLink {
                        event_id: event.event_id.clone(),
                        expected_prev: Some(prev_id.to_string()),
                    });
                }
            }
            children_of.entry(prev).or_default().push(event.event_id.as_str());
            seen_event_ids.insert(event.event_id.as_str());
        }

        for (prev, children) in children_of {
            if children.len() > 1 {
                faults.push(ChainFault::Fork {
                    actor: actor_events[0].actor.clone(),
                    event_ids: children.into_iter().map(|s| s.to_string()).collect(),
                });
            }
            let _ = prev;
        }
    }

    faults
}
