//! Backing stores for the rule set.
//!
//! The on-disk format is one rule per line: a plain name blocks exactly that
//! name, `*.name` blocks the name and all its subdomains. Blank lines and
//! lines starting with `#` are ignored.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::RuleError;

use super::rule_set::Rules;

/// Where the rule set loads from and persists to.
pub trait RuleSource: Send + Sync {
    /// Read the full rule data. Errors when the source is missing or unreadable.
    fn load(&self) -> Result<Rules, RuleError>;

    /// Replace the stored rules with `rules`.
    fn persist(&self, rules: &Rules) -> Result<(), RuleError>;

    /// Human-readable location, for logs.
    fn describe(&self) -> String;
}

impl<S: RuleSource + ?Sized> RuleSource for Arc<S> {
    fn load(&self) -> Result<Rules, RuleError> {
        (**self).load()
    }

    fn persist(&self, rules: &Rules) -> Result<(), RuleError> {
        (**self).persist(rules)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Plain-text rule file.
pub struct RuleFile {
    path: PathBuf,
}

impl RuleFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn source_error(&self, source: io::Error) -> RuleError {
        RuleError::Source {
            path: self.path.clone(),
            source,
        }
    }
}

impl RuleSource for RuleFile {
    fn load(&self) -> Result<Rules, RuleError> {
        let text = fs::read_to_string(&self.path).map_err(|e| self.source_error(e))?;
        Ok(Rules::parse(&text))
    }

    /// Writes a sibling temp file and renames it over the target, so readers
    /// of the file never see a partial write.
    fn persist(&self, rules: &Rules) -> Result<(), RuleError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.source_error(e))?;
        }

        let mut tmp_name = self.path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = self.path.with_file_name(tmp_name);

        fs::write(&tmp_path, rules.to_text()).map_err(|e| self.source_error(e))?;
        fs::rename(&tmp_path, &self.path).map_err(|e| self.source_error(e))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-memory source, for embedding and tests.
///
/// `None` behaves like a missing file.
#[derive(Default)]
pub struct MemorySource {
    text: Mutex<Option<String>>,
}

impl MemorySource {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: Mutex::new(Some(text.into())),
        }
    }

    /// A source that fails every load, like a missing file.
    pub fn missing() -> Self {
        Self::default()
    }

    /// Replace the stored text, as an external edit of the rule file would.
    pub fn set(&self, text: Option<&str>) {
        *self.text.lock().unwrap_or_else(|e| e.into_inner()) = text.map(str::to_owned);
    }

    pub fn text(&self) -> Option<String> {
        self.text.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl RuleSource for MemorySource {
    fn load(&self) -> Result<Rules, RuleError> {
        match self.text() {
            Some(text) => Ok(Rules::parse(&text)),
            None => Err(RuleError::Source {
                path: PathBuf::from("<memory>"),
                source: io::Error::from(io::ErrorKind::NotFound),
            }),
        }
    }

    fn persist(&self, rules: &Rules) -> Result<(), RuleError> {
        self.set(Some(&rules.to_text()));
        Ok(())
    }

    fn describe(&self) -> String {
        "<memory>".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_file_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let file = RuleFile::new(dir.path().join("nested/blocked_domains.txt"));
        let rules = Rules::parse("ads.example.com\n*.tracking.example\n");

        file.persist(&rules).unwrap();

        let text = fs::read_to_string(file.path()).unwrap();
        assert_eq!(text, "ads.example.com\n*.tracking.example\n");
        assert_eq!(file.load().unwrap().lines(), rules.lines());
    }

    #[test]
    fn rule_file_load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = RuleFile::new(dir.path().join("absent.txt"));

        let err = file.load().unwrap_err();

        assert!(matches!(err, RuleError::Source { ref source, .. } if source.kind() == io::ErrorKind::NotFound));
    }

    #[test]
    fn rule_file_persist_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = RuleFile::new(dir.path().join("rules.txt"));

        file.persist(&Rules::parse("a.example\n")).unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["rules.txt"]);
    }

    #[test]
    fn empty_rules_persist_as_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = RuleFile::new(dir.path().join("rules.txt"));

        file.persist(&Rules::default()).unwrap();

        assert_eq!(fs::read_to_string(file.path()).unwrap(), "");
    }

    #[test]
    fn memory_source_missing_fails_load() {
        let source = MemorySource::missing();

        assert!(source.load().is_err());

        source.set(Some("x.example"));
        assert!(source.load().unwrap().is_blocked("x.example"));
    }
}
