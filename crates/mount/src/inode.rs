//! Inode number allocation for the local metadata root.

use std::collections::HashMap;

/// Inode of the filesystem root.
pub(crate) const ROOT_INO: u64 = 1;

/// Bidirectional ino ↔ root-relative path table.
///
/// The root directory is ino 1 with the empty relative path; files get
/// stable inos for the lifetime of the mount (or until unlinked).
pub(crate) struct InodeTable {
    by_ino: HashMap<u64, String>,
    by_path: HashMap<String, u64>,
    next_ino: u64,
}

impl InodeTable {
    pub fn new() -> Self {
        let mut by_ino = HashMap::new();
        let mut by_path = HashMap::new();
        by_ino.insert(ROOT_INO, String::new());
        by_path.insert(String::new(), ROOT_INO);
        Self {
            by_ino,
            by_path,
            next_ino: ROOT_INO + 1,
        }
    }

    /// Returns the ino for `path`, allocating one on first sight.
    pub fn assign(&mut self, path: &str) -> u64 {
        if let Some(ino) = self.by_path.get(path) {
            return *ino;
        }
        let ino = self.next_ino;
        self.next_ino += 1;
        self.by_ino.insert(ino, path.to_owned());
        self.by_path.insert(path.to_owned(), ino);
        ino
    }

    /// Looks up the path registered for `ino`.
    pub fn path_of(&self, ino: u64) -> Option<&str> {
        self.by_ino.get(&ino).map(String::as_str)
    }

    /// Drops an unlinked file from the table.
    pub fn forget(&mut self, path: &str) {
        if let Some(ino) = self.by_path.remove(path) {
            self.by_ino.remove(&ino);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_preassigned() {
        let table = InodeTable::new();
        assert_eq!(table.path_of(ROOT_INO), Some(""));
    }

    #[test]
    fn assign_is_stable_per_path() {
        let mut table = InodeTable::new();
        let a = table.assign("alpha.bin");
        let b = table.assign("beta.bin");
        assert_ne!(a, b);
        assert_eq!(table.assign("alpha.bin"), a);
        assert_eq!(table.path_of(a), Some("alpha.bin"));
    }

    #[test]
    fn forget_releases_the_name_but_not_the_ino() {
        let mut table = InodeTable::new();
        let old = table.assign("gone.bin");
        table.forget("gone.bin");
        assert_eq!(table.path_of(old), None);

        let fresh = table.assign("gone.bin");
        assert_ne!(fresh, old);
    }
}
