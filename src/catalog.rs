//! Program catalog shared by all instances.
//!
//! Scanning banks touches the filesystem and every instrument name, so it
//! happens once per process: the first instance scans, later ones read the
//! finished list.

use crate::engine::{SynthEngine, BANK_SIZE};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

/// One selectable program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramEntry {
    /// Index of the bank in the engine's bank list.
    pub bank: u32,
    /// Slot within the bank, below [`BANK_SIZE`].
    pub program: u32,
    /// Display name of the instrument.
    pub name: String,
}

/// Ordered list of every program found in every bank.
///
/// Entries are in bank order, then slot order within a bank.
#[derive(Debug, Default)]
pub struct ProgramCatalog {
    scanned: AtomicBool,
    entries: RwLock<Vec<ProgramEntry>>,
}

impl ProgramCatalog {
    /// Creates an empty, unscanned catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scans the engine's banks unless a scan already happened.
    ///
    /// The scan runs with the engine lock held so it never overlaps a
    /// render on that engine.
    ///
    /// # Arguments
    ///
    /// * `engine` - Engine used to browse the banks
    ///
    /// # Returns
    ///
    /// true if this call performed the scan
    pub fn ensure_scanned<E: SynthEngine>(&self, engine: &Mutex<E>) -> bool {
        if self.scanned.swap(true, Ordering::AcqRel) {
            return false;
        }

        let mut engine = engine.lock().unwrap_or_else(PoisonError::into_inner);
        let entries = scan_programs(&mut *engine);
        drop(engine);

        tracing::info!("program catalog holds {} entries", entries.len());
        *self.entries.write().unwrap_or_else(PoisonError::into_inner) = entries;
        true
    }

    /// Returns whether a scan has been performed since the last clear.
    pub fn is_scanned(&self) -> bool {
        self.scanned.load(Ordering::Acquire)
    }

    /// Returns the number of programs.
    pub fn count(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns the program at `index`, or None when out of range.
    pub fn at(&self, index: usize) -> Option<ProgramEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(index)
            .cloned()
    }

    /// Returns a copy of every entry.
    pub fn entries(&self) -> Vec<ProgramEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drops every entry and re-arms the scan.
    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.scanned.store(false, Ordering::Release);
    }
}

/// Walks all banks of an engine and collects the named slots.
fn scan_programs<E: SynthEngine + ?Sized>(engine: &mut E) -> Vec<ProgramEntry> {
    engine.rescan_banks();

    let bank_dirs: Vec<_> = engine.banks().iter().map(|b| b.dir.clone()).collect();
    let mut entries = Vec::new();

    for (bank, dir) in bank_dirs.iter().enumerate() {
        if dir.as_os_str().is_empty() {
            continue;
        }
        if let Err(e) = engine.load_bank(dir) {
            tracing::warn!("skipping bank {}: {}", dir.display(), e);
            continue;
        }

        for program in 0..BANK_SIZE {
            let name = engine.slot_name(program);
            if name.is_empty() || name.starts_with(char::is_whitespace) {
                continue;
            }
            entries.push(ProgramEntry {
                bank: bank as u32,
                program: program as u32,
                name: name.to_string(),
            });
        }
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingEngine, TestBank};

    fn engine() -> Mutex<RecordingEngine> {
        Mutex::new(RecordingEngine::with_banks(vec![
            TestBank::new("Keys", &[(0, "Piano"), (2, "Organ"), (3, " Hidden"), (4, "")]),
            TestBank::unreachable("Broken"),
            TestBank::new("Leads", &[(159, "Saw"), (1, "Square")]),
        ]))
    }

    #[test]
    fn test_scan_order_and_filtering() {
        let catalog = ProgramCatalog::new();
        assert!(catalog.ensure_scanned(&engine()));

        let names: Vec<_> = catalog.entries().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["Piano", "Organ", "Square", "Saw"]);

        assert_eq!(
            catalog.at(3),
            Some(ProgramEntry {
                bank: 2,
                program: 159,
                name: "Saw".to_string()
            })
        );
        assert_eq!(catalog.at(4), None);
    }

    #[test]
    fn test_scan_is_idempotent() {
        let catalog = ProgramCatalog::new();
        let first_engine = engine();
        assert!(catalog.ensure_scanned(&first_engine));
        let first = catalog.entries();

        // A second engine with different banks does not trigger a rescan.
        let other = Mutex::new(RecordingEngine::with_banks(vec![TestBank::new(
            "Other",
            &[(0, "Bell")],
        )]));
        assert!(!catalog.ensure_scanned(&other));
        assert!(!catalog.ensure_scanned(&first_engine));

        assert_eq!(catalog.entries(), first);
        assert_eq!(other.lock().unwrap().rescans, 0);
    }

    #[test]
    fn test_clear_rearms_scan() {
        let catalog = ProgramCatalog::new();
        catalog.ensure_scanned(&engine());
        assert!(catalog.is_scanned());

        catalog.clear();
        assert_eq!(catalog.count(), 0);
        assert!(!catalog.is_scanned());

        assert!(catalog.ensure_scanned(&engine()));
        assert_eq!(catalog.count(), 4);
    }
}
