//! Instrument bank discovery.
//!
//! A bank is a directory of SoundFont files living under one of the
//! configured bank roots. File names carry the slot number and display
//! name, e.g. `0003-Warm Pad.sf2` is slot 2 (slots are 1-based on disk)
//! named "Warm Pad". Files without a numeric prefix fill the first free
//! slots in name order.

use super::BANK_SIZE;
use crate::error::{BridgeError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// File extension of instrument files.
pub const INSTRUMENT_EXTENSION: &str = "sf2";

/// A discovered bank directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankInfo {
    /// Display name (the directory name).
    pub name: String,
    /// Absolute or root-relative directory path.
    pub dir: PathBuf,
}

/// One occupied slot of a loaded bank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankSlot {
    /// Display name parsed from the file name.
    pub name: String,
    /// Path to the instrument file.
    pub path: PathBuf,
}

/// Lists the banks found under the given roots, sorted by name.
///
/// Roots that do not exist are skipped. A subdirectory counts as a bank
/// only if it holds at least one instrument file.
pub fn scan_bank_roots(roots: &[PathBuf]) -> Vec<BankInfo> {
    let mut banks = Vec::new();

    for root in roots {
        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!("skipping bank root {}: {}", root.display(), e);
                continue;
            }
        };

        for entry in entries.flatten() {
            let dir = entry.path();
            if !dir.is_dir() || !contains_instruments(&dir) {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if banks.iter().any(|b: &BankInfo| b.dir == dir) {
                continue;
            }
            banks.push(BankInfo { name, dir });
        }
    }

    banks.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.dir.cmp(&b.dir))
    });
    banks
}

fn contains_instruments(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .any(|e| parse_instrument_file_name(&e.file_name().to_string_lossy()).is_some())
        })
        .unwrap_or(false)
}

/// Splits an instrument file name into its optional 0-based slot and its
/// display name. Returns None for files that are not instruments.
pub fn parse_instrument_file_name(file_name: &str) -> Option<(Option<usize>, String)> {
    let (stem, extension) = file_name.rsplit_once('.')?;
    if !extension.eq_ignore_ascii_case(INSTRUMENT_EXTENSION) {
        return None;
    }

    let digits = stem.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        if let Some(name) = stem[digits..].strip_prefix('-') {
            let slot = stem[..digits].parse::<usize>().ok().and_then(|n| n.checked_sub(1));
            return Some((slot, name.to_string()));
        }
    }

    Some((None, stem.to_string()))
}

/// The slot table of one bank directory.
#[derive(Debug, Clone)]
pub struct BankContents {
    dir: PathBuf,
    slots: Vec<Option<BankSlot>>,
}

impl Default for BankContents {
    fn default() -> Self {
        Self {
            dir: PathBuf::new(),
            slots: vec![None; BANK_SIZE],
        }
    }
}

impl BankContents {
    /// Reads a bank directory into a slot table.
    ///
    /// # Arguments
    ///
    /// * `dir` - The bank directory
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be listed
    pub fn load(dir: &Path) -> Result<Self> {
        let entries = fs::read_dir(dir).map_err(|source| BridgeError::BankIo {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut files: Vec<(String, PathBuf)> = entries
            .flatten()
            .filter(|e| e.path().is_file())
            .map(|e| (e.file_name().to_string_lossy().into_owned(), e.path()))
            .collect();
        files.sort();

        let mut bank = Self {
            dir: dir.to_path_buf(),
            ..Self::default()
        };
        let mut unplaced = Vec::new();

        for (file_name, path) in files {
            let Some((slot, name)) = parse_instrument_file_name(&file_name) else {
                continue;
            };
            match slot {
                Some(slot) if slot < BANK_SIZE && bank.slots[slot].is_none() => {
                    bank.slots[slot] = Some(BankSlot { name, path });
                }
                _ => unplaced.push(BankSlot { name, path }),
            }
        }

        // Unnumbered and colliding files take the first free slots.
        let mut free = (0..BANK_SIZE).filter(|i| bank.slots[*i].is_none()).collect::<Vec<_>>();
        free.reverse();
        for slot in unplaced {
            match free.pop() {
                Some(index) => bank.slots[index] = Some(slot),
                None => {
                    tracing::warn!("bank {} is full, ignoring {}", dir.display(), slot.path.display());
                }
            }
        }

        Ok(bank)
    }

    /// Returns the directory this table was read from.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the slot contents, if occupied.
    pub fn slot(&self, index: usize) -> Option<&BankSlot> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Returns the display name of a slot, or "" when empty.
    pub fn name(&self, index: usize) -> &str {
        self.slot(index).map(|s| s.name.as_str()).unwrap_or("")
    }

    /// Returns the number of occupied slots.
    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::tempdir;

    fn touch(dir: &Path, name: &str) {
        File::create(dir.join(name)).unwrap();
    }

    #[test]
    fn test_parse_file_names() {
        assert_eq!(
            parse_instrument_file_name("0003-Warm Pad.sf2"),
            Some((Some(2), "Warm Pad".to_string()))
        );
        assert_eq!(
            parse_instrument_file_name("Strings.SF2"),
            Some((None, "Strings".to_string()))
        );
        assert_eq!(
            parse_instrument_file_name("12 Bells.sf2"),
            Some((None, "12 Bells".to_string()))
        );
        assert_eq!(parse_instrument_file_name("0000-Zero.sf2"), Some((None, "Zero".to_string())));
        assert_eq!(parse_instrument_file_name("readme.txt"), None);
        assert_eq!(parse_instrument_file_name("noextension"), None);
    }

    #[test]
    fn test_scan_bank_roots() {
        let root = tempdir().unwrap();
        for name in ["Strings", "brass", "Empty"] {
            fs::create_dir(root.path().join(name)).unwrap();
        }
        touch(&root.path().join("Strings"), "0001-Violin.sf2");
        touch(&root.path().join("brass"), "0001-Trumpet.sf2");
        touch(&root.path().join("Empty"), "notes.txt");
        touch(root.path(), "0001-Loose.sf2");

        let banks = scan_bank_roots(&[root.path().to_path_buf(), PathBuf::from("/nonexistent")]);
        let names: Vec<_> = banks.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["brass", "Strings"]);
    }

    #[test]
    fn test_load_bank_slots() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "0002-Second.sf2");
        touch(dir.path(), "0001-First.sf2");
        touch(dir.path(), "Loose.sf2");
        touch(dir.path(), "0002-Duplicate.sf2");
        touch(dir.path(), "cover.png");

        let bank = BankContents::load(dir.path()).unwrap();
        assert_eq!(bank.name(0), "First");
        // "0002-Duplicate" sorts before "0002-Second" and claims slot 1 first.
        assert_eq!(bank.name(1), "Duplicate");
        assert_eq!(bank.name(2), "Second");
        assert_eq!(bank.name(3), "Loose");
        assert_eq!(bank.occupied(), 4);
        assert_eq!(bank.name(BANK_SIZE), "");
        assert_eq!(bank.dir(), dir.path());
    }

    #[test]
    fn test_load_missing_bank() {
        let result = BankContents::load(Path::new("/nonexistent/bank"));
        assert!(matches!(result, Err(BridgeError::BankIo { .. })));
    }
}
