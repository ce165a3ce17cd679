//! Substitution ledger for backup CRNs
//!
//! Tracks which declared backups are still unused and which backups are
//! currently standing in for their primary. Only one level of substitution
//! exists: a backup never has a backup of its own.
//!
//! Edge transitions for a declaration `primary → backup`:
//! - `take_backup(primary)`: pending → active (`backup → primary` recorded)
//! - `reverse(backup)`: active → consumed, primary goes back in the list
//! - `finalize(backup)`: active → consumed, backup succeeded
//!
//! A consumed declaration is never offered again.

use std::collections::HashMap;

use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct SubstitutionLedger {
    /// Backup declarations as loaded from configuration, never mutated.
    declared: HashMap<String, String>,
    /// primary → backup, declarations not yet used.
    pending: HashMap<String, String>,
    /// backup → primary, substitutions currently in effect.
    active: HashMap<String, String>,
}

impl SubstitutionLedger {
    /// Create a ledger from `primary → backup` declarations.
    pub fn new(declared: HashMap<String, String>) -> Self {
        Self {
            pending: declared.clone(),
            declared,
            active: HashMap::new(),
        }
    }

    pub fn declared(&self) -> &HashMap<String, String> {
        &self.declared
    }

    /// Whether `item` was declared as somebody's backup.
    pub fn is_declared_backup(&self, item: &str) -> bool {
        self.declared.values().any(|backup| backup == item)
    }

    /// Primary that `backup` is currently standing in for.
    pub fn primary_for(&self, backup: &str) -> Option<&str> {
        self.active.get(backup).map(String::as_str)
    }

    /// Backup currently standing in for `primary`.
    pub fn active_backup_for(&self, primary: &str) -> Option<&str> {
        self.active
            .iter()
            .find(|(_, p)| p.as_str() == primary)
            .map(|(backup, _)| backup.as_str())
    }

    /// Whether `primary` still has an unused backup.
    pub fn has_pending_backup(&self, primary: &str) -> bool {
        self.pending.contains_key(primary)
    }

    /// Consume the pending backup for `primary` and record the reverse edge.
    ///
    /// Returns `None` if there is no unused backup, or if `primary` is itself
    /// a backup (no second-level substitution).
    pub fn take_backup(&mut self, primary: &str) -> Option<String> {
        if self.active.contains_key(primary) || self.is_declared_backup(primary) {
            return None;
        }
        let backup = self.pending.remove(primary)?;
        debug!(primary, backup = %backup, "backup activated");
        self.active.insert(backup.clone(), primary.to_string());
        Some(backup)
    }

    /// Undo an active substitution, returning the primary to reinstate.
    pub fn reverse(&mut self, backup: &str) -> Option<String> {
        let primary = self.active.remove(backup)?;
        debug!(backup, primary = %primary, "backup reversed");
        Some(primary)
    }

    /// Close an active substitution after the backup succeeded.
    pub fn finalize(&mut self, backup: &str) -> Option<String> {
        let primary = self.active.remove(backup)?;
        debug!(backup, primary = %primary, "backup finalized");
        Some(primary)
    }

    /// Number of substitutions currently in effect.
    pub fn active_len(&self) -> usize {
        self.active.len()
    }
}
