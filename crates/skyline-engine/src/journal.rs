//! Apply journal
//!
//! Append-only, hash-chained record of every provider mutation. Each entry
//! commits to its predecessor, so editing or dropping an entry in a stored
//! state file is detected by [`Journal::verify_integrity`].

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use skyline_graph::NodeName;
use uuid::Uuid;

const GENESIS: [u8; 32] = [0u8; 32];

/// One journaled provider mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Position in the journal, starting at 0
    pub sequence: u64,
    /// Update this entry belongs to
    pub update_id: Uuid,
    /// When the mutation finished
    pub timestamp: DateTime<Utc>,
    /// Node acted on
    pub node: NodeName,
    /// `create`, `update` or `delete`
    pub action: String,
    /// `ok` or the failure message
    pub result: String,
    /// Hash of the previous entry, hex
    pub prev_hash: String,
    /// Hash of this entry, hex
    pub hash: String,
}

/// Hash-chained journal
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Journal {
    entries: Vec<JournalEntry>,
}

impl Journal {
    /// Empty journal
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, chaining it to the last one
    pub fn append(
        &mut self,
        update_id: Uuid,
        node: &NodeName,
        action: &str,
        result: impl Into<String>,
    ) -> &JournalEntry {
        let sequence = self.entries.len() as u64;
        let prev_hash = self
            .entries
            .last()
            .map_or_else(|| hex::encode(GENESIS), |e| e.hash.clone());
        let mut entry = JournalEntry {
            sequence,
            update_id,
            timestamp: Utc::now(),
            node: node.clone(),
            action: action.to_owned(),
            result: result.into(),
            prev_hash,
            hash: String::new(),
        };
        entry.hash = hex::encode(compute_hash(&entry));
        self.entries.push(entry);
        &self.entries[self.entries.len() - 1]
    }

    /// All entries in order
    #[must_use]
    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the journal is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries recorded by one update
    pub fn for_update(&self, update_id: Uuid) -> impl Iterator<Item = &JournalEntry> + '_ {
        self.entries.iter().filter(move |e| e.update_id == update_id)
    }

    /// Verify the hash chain
    ///
    /// # Errors
    /// Returns the sequence number of the first entry that does not verify.
    pub fn verify_integrity(&self) -> Result<(), u64> {
        let mut prev = hex::encode(GENESIS);
        for (position, entry) in self.entries.iter().enumerate() {
            let position = position as u64;
            if entry.sequence != position || entry.prev_hash != prev {
                return Err(position);
            }
            if entry.hash != hex::encode(compute_hash(entry)) {
                return Err(position);
            }
            prev.clone_from(&entry.hash);
        }
        Ok(())
    }
}

fn compute_hash(entry: &JournalEntry) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(entry.sequence.to_le_bytes());
    hasher.update(entry.update_id.as_bytes());
    hasher.update(
        entry
            .timestamp
            .to_rfc3339_opts(SecondsFormat::Nanos, true)
            .as_bytes(),
    );
    hasher.update(entry.node.as_str().as_bytes());
    hasher.update([0]);
    hasher.update(entry.action.as_bytes());
    hasher.update([0]);
    hasher.update(entry.result.as_bytes());
    hasher.update([0]);
    hasher.update(entry.prev_hash.as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> NodeName {
        NodeName::new(s).unwrap()
    }

    #[test]
    fn chain_verifies() {
        let mut journal = Journal::new();
        let update = Uuid::new_v4();
        journal.append(update, &name("lambdaRole"), "create", "ok");
        journal.append(update, &name("myLambdaFunction"), "create", "ok");
        assert_eq!(journal.len(), 2);
        assert_eq!(journal.entries()[1].prev_hash, journal.entries()[0].hash);
        assert!(journal.verify_integrity().is_ok());
    }

    #[test]
    fn tampering_is_detected() {
        let mut journal = Journal::new();
        let update = Uuid::new_v4();
        journal.append(update, &name("a"), "create", "ok");
        journal.append(update, &name("b"), "create", "ok");
        journal.entries[0].result = "AccessDenied: nope".into();
        assert_eq!(journal.verify_integrity(), Err(0));
    }

    #[test]
    fn dropped_entry_is_detected() {
        let mut journal = Journal::new();
        let update = Uuid::new_v4();
        for n in ["a", "b", "c"] {
            journal.append(update, &name(n), "create", "ok");
        }
        journal.entries.remove(1);
        assert_eq!(journal.verify_integrity(), Err(1));
    }

    #[test]
    fn survives_serde_round_trip() {
        let mut journal = Journal::new();
        journal.append(Uuid::new_v4(), &name("route"), "delete", "ok");
        let json = serde_json::to_string(&journal).unwrap();
        let back: Journal = serde_json::from_str(&json).unwrap();
        assert!(back.verify_integrity().is_ok());
        assert_eq!(back, journal);
    }
}
