//! Latest usable backup per class.
//!
//! A differential backup is only as fresh as the better of the last
//! differential and the last full; an incremental one is as fresh as the
//! best of all three classes. [`reduce`] folds a stanza's backups into one
//! slot per class following that rule.

use crate::normalize::NormalizedBackup;
use crate::record::BackupClass;

/// The backup a lineage slot currently points to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineageSlot<'a> {
    backup: &'a NormalizedBackup,
}

impl<'a> LineageSlot<'a> {
    pub fn label(&self) -> &'a str {
        &self.backup.label
    }

    /// Completion timestamp, epoch seconds.
    pub fn stop(&self) -> i64 {
        self.backup.stop
    }

    pub fn backup(&self) -> &'a NormalizedBackup {
        self.backup
    }

    /// Seconds elapsed between completion and `now`.
    pub fn age_secs(&self, now: i64) -> f64 {
        now.saturating_sub(self.backup.stop) as f64
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LineageState<'a> {
    slots: [Option<LineageSlot<'a>>; 3],
}

impl<'a> LineageState<'a> {
    pub fn get(&self, class: BackupClass) -> Option<&LineageSlot<'a>> {
        self.slots[class.slot()].as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Non-empty slots in `full`, `diff`, `incr` order.
    pub fn iter(&self) -> impl Iterator<Item = (BackupClass, &LineageSlot<'a>)> + '_ {
        BackupClass::ALL
            .into_iter()
            .filter_map(move |class| self.get(class).map(|slot| (class, slot)))
    }

    /// Later completion wins; on equal completion the later offer wins.
    fn offer(&mut self, class: BackupClass, backup: &'a NormalizedBackup) {
        let slot = &mut self.slots[class.slot()];
        let replace = match slot {
            Some(current) => backup.stop >= current.stop(),
            None => true,
        };
        if replace {
            *slot = Some(LineageSlot { backup });
        }
    }
}

/// Fold a stanza's backups, in the order the tool listed them.
///
/// Without any full backup there is no restorable chain and every slot is
/// left empty.
pub fn reduce(backups: &[NormalizedBackup]) -> LineageState<'_> {
    let mut state = LineageState::default();
    for backup in backups {
        for &class in backup.class.cascade() {
            state.offer(class, backup);
        }
    }

    if state.get(BackupClass::Full).is_none() {
        if !state.is_empty() {
            tracing::debug!(
                backups = backups.len(),
                "No full backup found, ignoring differential and incremental backups for lineage"
            );
        }
        return LineageState::default();
    }

    state
}
