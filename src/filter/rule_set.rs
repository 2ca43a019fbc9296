//! The mutable block-list.
//!
//! Holds exact-name rules and suffix rules behind one lock, so that a
//! classification always sees both sets from the same generation.

use std::sync::{Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rustc_hash::FxHashSet;
use tracing::{info, warn};

use crate::error::RuleError;

use super::source::{RuleFile, RuleSource};

/// Marker that turns a rule into a suffix rule.
const SUFFIX_MARKER: &str = "*.";

/// A single normalized rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Rule {
    /// Blocks only this name.
    Exact(String),
    /// Blocks this name and every name below it.
    Suffix(String),
}

impl Rule {
    /// Parse a rule as written in the rule file or sent by the API.
    ///
    /// Trims, lowercases and drops a trailing dot. Returns `Ok(None)` for a
    /// blank input.
    pub fn parse(input: &str) -> Result<Option<Self>, RuleError> {
        let s = input.trim().to_lowercase();
        if s.is_empty() {
            return Ok(None);
        }
        if s.chars().any(char::is_whitespace) {
            return Err(RuleError::Invalid(input.to_string()));
        }

        let (suffix, name) = match s.strip_prefix(SUFFIX_MARKER) {
            Some(rest) => (true, rest),
            None => (false, s.as_str()),
        };
        let name = name.strip_suffix('.').unwrap_or(name);

        if name.is_empty() || name.starts_with('.') {
            return Err(RuleError::Invalid(input.to_string()));
        }

        Ok(Some(if suffix {
            Rule::Suffix(name.to_string())
        } else {
            Rule::Exact(name.to_string())
        }))
    }
}

/// One generation of rule data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rules {
    exact: FxHashSet<String>,
    suffix: FxHashSet<String>,
}

impl Rules {
    /// Parse rule file text. Lines that are not valid rules are skipped.
    pub fn parse(text: &str) -> Self {
        let mut rules = Self::default();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match Rule::parse(line) {
                Ok(Some(rule)) => {
                    rules.insert(rule);
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Skipping rule line"),
            }
        }

        rules
    }

    /// Returns true if the rule was not already present.
    pub fn insert(&mut self, rule: Rule) -> bool {
        match rule {
            Rule::Exact(name) => self.exact.insert(name),
            Rule::Suffix(name) => self.suffix.insert(name),
        }
    }

    /// Returns true if the rule was present.
    pub fn remove(&mut self, rule: &Rule) -> bool {
        match rule {
            Rule::Exact(name) => self.exact.remove(name),
            Rule::Suffix(name) => self.suffix.remove(name),
        }
    }

    /// Check if a name should be blocked.
    ///
    /// Ignores case and a trailing dot. Suffix rules match on label
    /// boundaries: `*.example.com` blocks `example.com` and
    /// `ads.example.com`, never `badexample.com`.
    pub fn is_blocked(&self, name: &str) -> bool {
        let name = name.strip_suffix('.').unwrap_or(name).to_lowercase();
        if name.is_empty() {
            return false;
        }
        if self.exact.contains(&name) {
            return true;
        }
        if self.suffix.is_empty() {
            return false;
        }

        let mut current = name.as_str();
        loop {
            if self.suffix.contains(current) {
                return true;
            }
            match current.find('.') {
                Some(pos) => current = &current[pos + 1..],
                None => return false,
            }
        }
    }

    /// Rules in file notation: sorted exact names, then sorted `*.` suffixes.
    pub fn lines(&self) -> Vec<String> {
        let mut exact: Vec<_> = self.exact.iter().cloned().collect();
        exact.sort_unstable();
        let mut suffix: Vec<_> = self
            .suffix
            .iter()
            .map(|s| format!("{SUFFIX_MARKER}{s}"))
            .collect();
        suffix.sort_unstable();

        exact.extend(suffix);
        exact
    }

    /// File text for `lines`, newline-terminated unless empty.
    pub fn to_text(&self) -> String {
        self.lines().iter().map(|l| format!("{l}\n")).collect()
    }

    pub fn len(&self) -> usize {
        self.exact.len() + self.suffix.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The live rule set shared by the dispatcher and the management API.
///
/// Reads take the lock shared and mutations take it exclusively. Persisting
/// is serialized by a second lock and always writes a snapshot taken while
/// holding it, so overlapping mutations cannot interleave their writes and
/// the last write reflects the latest state.
pub struct RuleSet {
    rules: RwLock<Rules>,
    persist_lock: Mutex<()>,
    source: Box<dyn RuleSource>,
}

impl RuleSet {
    /// Create a rule set backed by `source` and load it.
    pub fn load(source: impl RuleSource + 'static) -> Self {
        let set = Self {
            rules: RwLock::new(Rules::default()),
            persist_lock: Mutex::new(()),
            source: Box::new(source),
        };
        set.reload();
        set
    }

    /// Create a rule set backed by a plain-text rule file.
    pub fn from_file(path: impl Into<std::path::PathBuf>) -> Self {
        Self::load(RuleFile::new(path))
    }

    /// Check if a name is blocked by the current rules.
    pub fn classify(&self, name: &str) -> bool {
        self.read().is_blocked(name)
    }

    /// Replace all rules from the source and return the new rule count.
    ///
    /// An unavailable source leaves the set empty: the relay keeps answering
    /// and blocks nothing rather than failing queries.
    pub fn reload(&self) -> usize {
        let rules = match self.source.load() {
            Ok(rules) => rules,
            Err(e) => {
                warn!(error = %e, "Rule source unavailable, serving without rules");
                Rules::default()
            }
        };
        let count = rules.len();

        *self.write() = rules;

        info!(source = %self.source.describe(), rules = count, "Rules loaded");
        count
    }

    /// Add a rule. Returns whether the set changed.
    ///
    /// A change is persisted to the source. If persisting fails the error is
    /// returned but the in-memory rule stays active.
    pub fn add(&self, name: &str) -> Result<bool, RuleError> {
        let Some(rule) = Rule::parse(name)? else {
            return Ok(false);
        };
        let changed = self.write().insert(rule);
        if changed {
            self.persist()?;
        }
        Ok(changed)
    }

    /// Remove a rule. Removing an absent rule is a no-op.
    pub fn remove(&self, name: &str) -> Result<bool, RuleError> {
        let Some(rule) = Rule::parse(name)? else {
            return Ok(false);
        };
        let changed = self.write().remove(&rule);
        if changed {
            self.persist()?;
        }
        Ok(changed)
    }

    /// Current rules in file notation.
    pub fn snapshot(&self) -> Vec<String> {
        self.read().lines()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn persist(&self) -> Result<(), RuleError> {
        let _guard = self.persist_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let snapshot = self.read().clone();
        self.source.persist(&snapshot).inspect_err(|e| {
            warn!(error = %e, "Failed to persist rules");
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, Rules> {
        self.rules.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Rules> {
        self.rules.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::filter::MemorySource;

    fn rules(text: &str) -> RuleSet {
        RuleSet::load(MemorySource::new(text))
    }

    #[test]
    fn rule_parse_normalizes() {
        assert_eq!(
            Rule::parse("  Ads.Example.COM. ").unwrap(),
            Some(Rule::Exact("ads.example.com".into()))
        );
        assert_eq!(
            Rule::parse("*.Tracking.Example").unwrap(),
            Some(Rule::Suffix("tracking.example".into()))
        );
        assert_eq!(Rule::parse("   ").unwrap(), None);
    }

    #[test]
    fn rule_parse_rejects_bare_marker() {
        assert!(Rule::parse("*.").is_err());
        assert!(Rule::parse("*..").is_err());
        assert!(Rule::parse("two words").is_err());
    }

    #[test]
    fn rules_parse_skips_comments_and_blanks() {
        let parsed = Rules::parse("# header\n\nads.example.com\n  *.tracking.example  \n*.\n");

        assert_eq!(parsed.lines(), vec!["ads.example.com", "*.tracking.example"]);
    }

    #[test]
    fn classify_exact_match() {
        let set = rules("ads.example.com\n");

        assert!(set.classify("ads.example.com"));
        assert!(!set.classify("sub.ads.example.com"));
        assert!(!set.classify("example.com"));
    }

    #[test]
    fn classify_suffix_matches_itself_and_subdomains() {
        let set = rules("*.tracking.example\n");

        assert!(set.classify("tracking.example"));
        assert!(set.classify("sub.tracking.example"));
        assert!(set.classify("a.b.c.tracking.example"));
    }

    #[test]
    fn classify_suffix_requires_label_boundary() {
        let set = rules("*.tracking.example\n");

        assert!(!set.classify("eviltracking.example"));
        assert!(!set.classify("example"));
        assert!(!set.classify("tracking.example.org"));
    }

    #[test]
    fn classify_ignores_case_and_trailing_dot() {
        let set = rules("example.com\n");

        assert!(set.classify("Example.COM"));
        assert!(set.classify("example.com"));
        assert!(set.classify("example.com."));
    }

    #[test]
    fn classify_handles_empty_input() {
        let set = rules("*.example\nexample.com\n");

        assert!(!set.classify(""));
        assert!(!set.classify("."));
    }

    #[test]
    fn add_and_remove_take_effect_immediately() {
        let set = rules("");

        assert!(set.add("test.block").unwrap());
        assert!(set.classify("test.block."));

        assert!(set.remove("test.block").unwrap());
        assert!(!set.classify("test.block."));
    }

    #[test]
    fn add_suffix_rule() {
        let set = rules("");

        set.add("*.Ads.Example").unwrap();

        assert!(set.classify("x.ads.example"));
        assert!(set.classify("ads.example"));
        assert_eq!(set.snapshot(), vec!["*.ads.example"]);
    }

    #[test]
    fn remove_absent_rule_is_noop() {
        let source = Arc::new(MemorySource::new("keep.example\n"));
        let set = RuleSet::load(source.clone());

        assert!(!set.remove("missing.example").unwrap());
        assert!(!set.remove("*.missing.example").unwrap());
        assert_eq!(source.text().as_deref(), Some("keep.example\n"));
    }

    #[test]
    fn mutations_persist_to_source() {
        let source = Arc::new(MemorySource::new(""));
        let set = RuleSet::load(source.clone());

        set.add("b.example").unwrap();
        set.add("*.a.example").unwrap();
        set.add("a.example").unwrap();
        assert_eq!(
            source.text().as_deref(),
            Some("a.example\nb.example\n*.a.example\n")
        );

        set.remove("b.example").unwrap();
        assert_eq!(source.text().as_deref(), Some("a.example\n*.a.example\n"));
    }

    #[test]
    fn reload_replaces_rules() {
        let source = Arc::new(MemorySource::new("old.example\n"));
        let set = RuleSet::load(source.clone());
        assert!(set.classify("old.example"));

        source.set(Some("*.new.example\n"));
        assert_eq!(set.reload(), 1);

        assert!(!set.classify("old.example"));
        assert!(set.classify("x.new.example"));
    }

    #[test]
    fn reload_from_missing_source_fails_open() {
        let source = Arc::new(MemorySource::new("ads.example.com\n*.tracking.example\n"));
        let set = RuleSet::load(source.clone());
        assert!(set.classify("ads.example.com"));

        source.set(None);
        assert_eq!(set.reload(), 0);

        assert!(set.is_empty());
        assert!(!set.classify("ads.example.com"));
        assert!(!set.classify("sub.tracking.example"));
    }

    #[test]
    fn from_file_with_missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let set = RuleSet::from_file(dir.path().join("none.txt"));

        assert!(set.is_empty());

        set.add("later.example").unwrap();
        assert!(dir.path().join("none.txt").exists());
    }

    #[test]
    fn concurrent_reloads_never_expose_mixed_generations() {
        const GEN_A: &str = "a.example\n*.a.example\n";
        const GEN_B: &str = "b.example\n*.b.example\n";

        let source = Arc::new(MemorySource::new(GEN_A));
        let set = Arc::new(RuleSet::load(source.clone()));

        let writer = {
            let set = set.clone();
            let source = source.clone();
            thread::spawn(move || {
                for i in 0..500 {
                    source.set(Some(if i % 2 == 0 { GEN_B } else { GEN_A }));
                    set.reload();
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let set = set.clone();
                thread::spawn(move || {
                    for _ in 0..2000 {
                        let snapshot = set.snapshot();
                        assert!(
                            snapshot == ["a.example", "*.a.example"]
                                || snapshot == ["b.example", "*.b.example"],
                            "mixed generation: {snapshot:?}"
                        );
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    }

    #[test]
    fn concurrent_add_remove_and_classify() {
        let set = Arc::new(rules("stable.example\n"));

        let writers: Vec<_> = (0..4)
            .map(|t| {
                let set = set.clone();
                thread::spawn(move || {
                    for i in 0..200 {
                        let name = format!("*.w{t}-{i}.example");
                        set.add(&name).unwrap();
                        assert!(set.classify(&format!("x.w{t}-{i}.example")));
                        set.remove(&name).unwrap();
                    }
                })
            })
            .collect();

        for _ in 0..1000 {
            assert!(set.classify("stable.example"));
        }
        for writer in writers {
            writer.join().unwrap();
        }

        assert_eq!(set.snapshot(), vec!["stable.example"]);
    }
}
