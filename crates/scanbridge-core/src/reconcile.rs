//! Recipient reconciliation
//!
//! After the script returns, the Working sequence it may have edited is
//! diffed against the Original list and the delta is applied to the host
//! store. Removals go by index from the highest index down, because every
//! removal shifts the entries above it.

use crate::host::MessageAccess;
use crate::marshal::RECIPIENTS_KEY;
use mlua::{Table, Value};
use tracing::{debug, warn};

/// The Working recipient state as found after the call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkingRecipients {
    /// Deleted, rebound to a non-table, or emptied
    Missing,
    /// Entries in script order
    Entries(Vec<String>),
}

/// Re-fetch the Working sequence from the builtin table
pub fn read_working(builtin: &Table<'_>) -> mlua::Result<WorkingRecipients> {
    let table = match builtin.raw_get::<_, Value>(RECIPIENTS_KEY)? {
        Value::Table(table) => table,
        other => {
            debug!(kind = other.type_name(), "Working recipients are not a table");
            return Ok(WorkingRecipients::Missing);
        }
    };

    let len = table.raw_len();
    if len == 0 {
        return Ok(WorkingRecipients::Missing);
    }

    let mut entries = Vec::with_capacity(len);
    for index in 1..=len {
        match table.raw_get::<_, Value>(index)? {
            Value::String(address) => match address.to_str() {
                Ok(address) => entries.push(address.to_string()),
                Err(_) => warn!(index, "Ignoring non-UTF-8 recipient entry"),
            },
            other => warn!(
                index,
                kind = other.type_name(),
                "Ignoring non-string recipient entry"
            ),
        }
    }

    Ok(WorkingRecipients::Entries(entries))
}

/// Delta between the Original and Working recipient lists
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecipientPlan {
    pub clear_all: bool,
    /// Original indices to remove, highest first
    pub removals: Vec<usize>,
    /// Addresses to append, in descending Working order
    pub additions: Vec<String>,
}

impl RecipientPlan {
    /// Compute the delta. Presence is tested by membership, so duplicates
    /// of a new address in Working are each appended.
    pub fn plan(original: &[String], working: &WorkingRecipients) -> Self {
        let working = match working {
            WorkingRecipients::Missing => {
                return Self {
                    clear_all: true,
                    ..Default::default()
                }
            }
            WorkingRecipients::Entries(entries) => entries,
        };

        let removals = (0..original.len())
            .rev()
            .filter(|&i| !working.contains(&original[i]))
            .collect();

        let additions = working
            .iter()
            .rev()
            .filter(|address| !original.contains(address))
            .cloned()
            .collect();

        Self {
            clear_all: false,
            removals,
            additions,
        }
    }

    /// Whether applying the plan changes nothing
    pub fn is_noop(&self) -> bool {
        !self.clear_all && self.removals.is_empty() && self.additions.is_empty()
    }

    /// Apply the delta to the host recipient store
    pub fn apply<S: MessageAccess + ?Sized>(&self, store: &mut S) {
        if self.clear_all {
            store.clear_recipients();
            debug!("Recipients cleared");
            return;
        }

        for &index in &self.removals {
            store.remove_recipient(index);
        }
        for address in &self.additions {
            store.add_recipient(address);
        }

        if !self.is_noop() {
            debug!(
                removed = self.removals.len(),
                added = self.additions.len(),
                "Recipients reconciled"
            );
        }
    }
}
