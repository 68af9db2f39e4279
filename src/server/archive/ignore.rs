//! Export ignore patterns
//!
//! Matching is a literal prefix test on the archive-relative path: a path is
//! ignored when it equals a pattern or starts with `pattern/`. Glob syntax in
//! `.gitignore` lines is not interpreted.

use std::fs;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoreRules {
    patterns: Vec<String>,
}

impl IgnoreRules {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut rules = Self::default();
        for pattern in patterns {
            rules.push(pattern.as_ref());
        }
        rules
    }

    /// Rules for exporting `source`: the configured defaults plus, when
    /// enabled, the lines of `source/.gitignore`.
    pub fn for_source(source: &Path, defaults: &[String], use_gitignore: bool) -> Self {
        let mut rules = Self::new(defaults);
        if use_gitignore {
            if let Ok(content) = fs::read_to_string(source.join(".gitignore")) {
                for line in content.lines() {
                    rules.push(line);
                }
                debug!("Loaded .gitignore from {:?}: {:?}", source, rules.patterns);
            }
        }
        rules
    }

    fn push(&mut self, raw: &str) {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            return;
        }
        let pattern = line.trim_start_matches('/').trim_end_matches('/');
        if pattern.is_empty() || self.patterns.iter().any(|p| p == pattern) {
            return;
        }
        self.patterns.push(pattern.to_string());
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// `relative` uses `/` separators and has no leading slash.
    pub fn is_ignored(&self, relative: &str) -> bool {
        self.patterns.iter().any(|pattern| {
            relative == pattern
                || (relative.len() > pattern.len()
                    && relative.starts_with(pattern.as_str())
                    && relative.as_bytes()[pattern.len()] == b'/')
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn prefix_matching() {
        let rules = IgnoreRules::new(["node_modules"]);
        assert!(rules.is_ignored("node_modules"));
        assert!(rules.is_ignored("node_modules/a/b/c.js"));
        assert!(!rules.is_ignored("node_modules_old"));
        assert!(!rules.is_ignored("src/node_modules"));
        assert!(!rules.is_ignored("src/main.rs"));
    }

    #[test]
    fn gitignore_lines_are_normalized() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(".gitignore"),
            "# build output\n/target/\n\n!keep.txt\ndist\nnode_modules/\n",
        )
        .unwrap();

        let rules = IgnoreRules::for_source(temp.path(), &["node_modules".to_string()], true);
        assert_eq!(rules.patterns(), &["node_modules", "target", "dist"]);

        let without = IgnoreRules::for_source(temp.path(), &[], false);
        assert!(without.patterns().is_empty());
    }

    #[test]
    fn glob_patterns_are_literal() {
        let rules = IgnoreRules::new(["*.log"]);
        assert!(!rules.is_ignored("app.log"));
        assert!(rules.is_ignored("*.log"));
    }
}
