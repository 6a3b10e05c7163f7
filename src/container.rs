use std::fmt;
use std::path::{Path, PathBuf};

use log::warn;

use crate::error::Result;
use crate::timestamp::Timestamp;

/// One item of a container: a file with its contents, or a directory marker.
#[derive(Clone, PartialEq, Eq)]
pub struct Entry {
    /// Slash-separated location inside the container, without a leading or trailing slash.
    pub path: String,
    /// Absent when the format records no time for this entry.
    pub timestamp: Option<Timestamp>,
    /// File contents, or `None` for a directory.
    pub payload: Option<Vec<u8>>,
}
impl Entry {
    pub fn directory(path: String, timestamp: Option<Timestamp>) -> Self {
        Entry {
            path,
            timestamp,
            payload: None,
        }
    }

    pub fn file(path: String, timestamp: Option<Timestamp>, payload: Vec<u8>) -> Self {
        Entry {
            path,
            timestamp,
            payload: Some(payload),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.payload.is_none()
    }

    /// Last path component.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Relative path to write this entry to on a real file system.
    ///
    /// The `;N` version suffix is removed from the final component.
    pub fn extraction_path(&self) -> PathBuf {
        let mut path = PathBuf::new();
        let mut components = self.path.split('/').filter(|c| !c.is_empty()).peekable();
        while let Some(component) = components.next() {
            if components.peek().is_none() {
                path.push(strip_version_suffix(component));
            } else {
                path.push(component);
            }
        }
        path
    }
}
impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("path", &self.path)
            .field("timestamp", &self.timestamp)
            .field("payload", &self.payload.as_ref().map(|p| format!("[{} bytes]", p.len())))
            .finish()
    }
}

/// A field that could not be decoded cleanly and was kept in degraded form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldWarning {
    /// Which structure and field, e.g. `"primary volume descriptor: publisher identifier"`.
    pub context: String,
    pub message: String,
}
impl fmt::Display for FieldWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.context, self.message)
    }
}

/// Accumulates non-fatal diagnostics for one decoder.
///
/// Repeated walks revisit the same fields, so a warning already recorded is not added again.
#[derive(Debug, Default, Clone)]
pub(crate) struct Warnings(Vec<FieldWarning>);
impl Warnings {
    pub fn push(&mut self, context: impl Into<String>, message: impl Into<String>) {
        self.add(FieldWarning {
            context: context.into(),
            message: message.into(),
        });
    }

    pub fn extend(&mut self, warnings: Vec<FieldWarning>) {
        for warning in warnings {
            self.add(warning);
        }
    }

    fn add(&mut self, warning: FieldWarning) {
        if self.0.contains(&warning) {
            return;
        }
        warn!("{}", warning);
        self.0.push(warning);
    }

    pub fn as_slice(&self) -> &[FieldWarning] {
        &self.0
    }
}

/// A lazy, finite, single-pass sequence of entries.
pub type EntryIter<'a> = Box<dyn Iterator<Item = Result<Entry>> + 'a>;

/// A read-only container image that can be walked entry by entry.
///
/// Each decoder reads headers and tables on demand from its byte source and never holds more than
/// one file's payload at a time. Only one iteration may be in flight per container.
pub trait Container {
    /// Where the image came from, for display.
    fn path(&self) -> Option<&Path>;

    /// Starts a new walk over all entries.
    ///
    /// Fails with [`Error::ReentrantIteration`](crate::Error::ReentrantIteration) if an earlier
    /// iterator was leaked without being dropped.
    fn entries(&mut self) -> Result<EntryIter<'_>>;

    /// Non-fatal field problems seen so far.
    fn warnings(&self) -> &[FieldWarning];
}

/// Removes a trailing `;N` file version from a name.
pub fn strip_version_suffix(name: &str) -> &str {
    match name.rfind(';') {
        Some(idx)
            if idx + 1 < name.len() && name[idx + 1..].bytes().all(|b| b.is_ascii_digit()) =>
        {
            &name[..idx]
        }
        _ => name,
    }
}

/// Orders entries by path, which decoders do not guarantee.
pub fn sort_by_path(entries: &mut [Entry]) {
    entries.sort_by(|a, b| a.path.cmp(&b.path));
}

/// Pulls every entry out of a container and sorts them by path, as a listing would show them.
pub fn collect_sorted<C: Container + ?Sized>(container: &mut C) -> Result<Vec<Entry>> {
    let mut entries = container.entries()?.collect::<Result<Vec<_>>>()?;
    sort_by_path(&mut entries);
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_version_suffix() {
        assert_eq!(strip_version_suffix("A.TXT;1"), "A.TXT");
        assert_eq!(strip_version_suffix("README;32767"), "README");
        assert_eq!(strip_version_suffix("A.TXT"), "A.TXT");
        assert_eq!(strip_version_suffix("A;B"), "A;B");
        assert_eq!(strip_version_suffix("A.TXT;"), "A.TXT;");
    }

    #[test]
    fn test_extraction_path() {
        let entry = Entry::file("DIR;1/SUB/FILE.BIN;1".to_string(), None, vec![]);
        assert_eq!(entry.extraction_path(), PathBuf::from("DIR;1/SUB/FILE.BIN"));
        let entry = Entry::directory("DIR".to_string(), None);
        assert_eq!(entry.extraction_path(), PathBuf::from("DIR"));
    }

    #[test]
    fn test_entry_kinds() {
        let dir = Entry::directory("a/b".to_string(), None);
        assert!(dir.is_dir());
        assert_eq!(dir.name(), "b");
        let file = Entry::file("c".to_string(), None, vec![1, 2]);
        assert!(!file.is_dir());
        assert_eq!(file.name(), "c");
        assert_eq!(format!("{:?}", file), "Entry { path: \"c\", timestamp: None, payload: Some(\"[2 bytes]\") }");
    }

    #[test]
    fn test_sort_by_path() {
        let mut entries = vec![
            Entry::directory("b".to_string(), None),
            Entry::file("a/z".to_string(), None, vec![]),
            Entry::directory("a".to_string(), None),
        ];
        sort_by_path(&mut entries);
        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["a", "a/z", "b"]);
    }

    #[test]
    fn test_warnings_are_collected() {
        let mut warnings = Warnings::default();
        warnings.push("header", "bad magic");
        assert_eq!(warnings.as_slice().len(), 1);
        assert_eq!(warnings.as_slice()[0].to_string(), "header: bad magic");
        warnings.push("header", "bad magic");
        assert_eq!(warnings.as_slice().len(), 1);
    }
}
