//! Directory iteration.

/// Iterator over entry names of one directory.
///
/// For virtual directories the order is: child virtual directories, then
/// real mounts, then read-only-pack mounts. Real directories delegate to
/// the host filesystem (sorted for determinism); pack directories yield
/// child directories, then files with recomposed names.
pub struct DirectoryIterator {
    names: std::vec::IntoIter<String>,
}

impl DirectoryIterator {
    pub(crate) fn new(names: Vec<String>) -> Self {
        Self {
            names: names.into_iter(),
        }
    }
}

impl Iterator for DirectoryIterator {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.names.next()
    }
}
