//! Gitignore-style path filtering with always-include overrides.
//!
//! Supports the subset of gitignore syntax projects actually use: comments,
//! `!` negation (last matching rule wins), anchored patterns (`/build`),
//! directory-only patterns (`cache/`) and `**` globs. Once a directory is
//! ignored everything below it is ignored too, except for paths listed as
//! always-include.
//!
//! Patterns are relative to the directory holding the ignore file. A filter
//! applied to a subdirectory of it carries that subdirectory as its base, so
//! `config/secrets.yaml` or `/build` keep their meaning there.

use globset::{Glob, GlobBuilder, GlobMatcher};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct Rule {
    matcher: GlobMatcher,
    negated: bool,
    dir_only: bool,
}

/// Matches relative paths against ignore patterns.
#[derive(Debug, Clone, Default)]
pub struct GitignoreFilter {
    rules: Vec<Rule>,
    always_include: Vec<String>,
    /// Location of the filtered root relative to the ignore file's directory
    base: String,
}

impl GitignoreFilter {
    /// Build a filter from pattern lines and always-include paths.
    /// Lines that are not valid globs are skipped with a warning.
    pub fn new<S: AsRef<str>>(patterns: &[S], always_include: &[S]) -> Self {
        let rules = patterns
            .iter()
            .filter_map(|line| parse_rule(line.as_ref()))
            .collect();

        let always_include = always_include
            .iter()
            .map(|p| normalize(p.as_ref()))
            .filter(|p| !p.is_empty())
            .collect();

        Self {
            rules,
            always_include,
            base: String::new(),
        }
    }

    /// Apply the patterns to a tree rooted at `base`, a path relative to the
    /// directory the patterns came from. Always-include paths stay relative
    /// to the filtered root.
    pub fn with_base(mut self, base: &Path) -> Self {
        self.base = normalize(&base.to_string_lossy());
        self
    }

    /// Filter that ignores nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Read patterns from a `.gitignore` file, then append `extra` patterns.
    /// A missing file just means no file patterns.
    pub fn from_file<S: AsRef<str>>(path: &Path, extra: &[S], always_include: &[S]) -> Self {
        let mut lines: Vec<String> = match fs::read_to_string(path) {
            Ok(content) => content.lines().map(str::to_string).collect(),
            Err(e) => {
                debug!("No ignore file at {} ({}), using extra patterns only", path.display(), e);
                Vec::new()
            }
        };
        lines.extend(extra.iter().map(|p| p.as_ref().to_string()));

        let always: Vec<String> = always_include.iter().map(|p| p.as_ref().to_string()).collect();
        Self::new(&lines, &always)
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Is `rel` (relative to the filtered root) excluded? Directories above
    /// the filtered root are not consulted: the root itself is always walked.
    pub fn is_ignored(&self, rel: &Path, is_dir: bool) -> bool {
        let rel = normalize(&rel.to_string_lossy());
        if rel.is_empty() || self.rules.is_empty() {
            return false;
        }
        if self.is_always_included(&rel) {
            return false;
        }

        let mut ancestor = self.base.clone();
        let mut parts = rel.split('/').peekable();
        while let Some(part) = parts.next() {
            if !ancestor.is_empty() {
                ancestor.push('/');
            }
            ancestor.push_str(part);
            if parts.peek().is_none() {
                return self.matches(&ancestor, is_dir);
            }
            if self.matches(&ancestor, true) {
                return true;
            }
        }
        false
    }

    /// True for an always-include path, anything beneath one, and the
    /// directories leading to one (those must be walked, not pruned).
    pub fn is_always_included(&self, rel: &str) -> bool {
        self.always_include.iter().any(|inc| {
            rel == inc
                || rel.strip_prefix(inc.as_str()).is_some_and(|rest| rest.starts_with('/'))
                || inc.strip_prefix(rel).is_some_and(|rest| rest.starts_with('/'))
        })
    }

    fn matches(&self, rel: &str, is_dir: bool) -> bool {
        let mut ignored = false;
        for rule in &self.rules {
            if rule.dir_only && !is_dir {
                continue;
            }
            if rule.matcher.is_match(rel) {
                ignored = !rule.negated;
            }
        }
        ignored
    }
}

fn parse_rule(line: &str) -> Option<Rule> {
    let line = line.trim_end();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let (negated, body) = match line.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, line.strip_prefix('\\').unwrap_or(line)),
    };

    let (dir_only, body) = match body.strip_suffix('/') {
        Some(rest) => (true, rest),
        None => (false, body),
    };

    // A slash anywhere but the end anchors the pattern to the root.
    let anchored = body.contains('/');
    let body = body.trim_start_matches('/');
    if body.is_empty() {
        return None;
    }

    let glob = if anchored {
        body.to_string()
    } else {
        format!("**/{}", body)
    };

    match build_glob(&glob) {
        Ok(glob) => Some(Rule {
            matcher: glob.compile_matcher(),
            negated,
            dir_only,
        }),
        Err(e) => {
            warn!("Skipping invalid ignore pattern {:?}: {}", line, e);
            None
        }
    }
}

fn build_glob(pattern: &str) -> Result<Glob, globset::Error> {
    GlobBuilder::new(pattern).literal_separator(true).build()
}

fn normalize(path: &str) -> String {
    path.replace('\\', "/").trim_matches('/').to_string()
}
