//! Pattern engines for registry / image policy lists
//!
//! A target complies with a pattern list when it matches any one pattern.
//! An empty list never matches; callers decide what "no patterns" means.

use crate::error::{RelayError, Result};
use dashmap::DashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Matching semantics for a single pattern
pub trait PatternEngine: Send + Sync {
    fn is_match(&self, pattern: &str, target: &str) -> bool;

    /// Reject patterns the engine can't compile
    fn validate(&self, pattern: &str) -> Result<()>;
}

/// True when `target` matches at least one of `patterns`
pub fn complies_with_policies(engine: &dyn PatternEngine, patterns: &[String], target: &str) -> bool {
    patterns.iter().any(|p| engine.is_match(p, target))
}

/// Pattern syntax selectable from config
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternSyntax {
    #[default]
    Glob,
    Regex,
}

impl PatternSyntax {
    pub fn build(self) -> Arc<dyn PatternEngine> {
        match self {
            PatternSyntax::Glob => Arc::new(GlobEngine),
            PatternSyntax::Regex => Arc::new(RegexEngine::new()),
        }
    }
}

/// Shell-style wildcards: `*`, `?`, `[abc]`
///
/// `*` also crosses `/`, so `library/*` matches `library/alpine:3.18`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobEngine;

impl PatternEngine for GlobEngine {
    fn is_match(&self, pattern: &str, target: &str) -> bool {
        match glob::Pattern::new(pattern) {
            Ok(p) => p.matches(target),
            // Unparseable patterns only match literally
            Err(_) => pattern == target,
        }
    }

    fn validate(&self, pattern: &str) -> Result<()> {
        glob::Pattern::new(pattern)
            .map(|_| ())
            .map_err(|e| RelayError::Config(format!("invalid glob pattern {:?}: {}", pattern, e)))
    }
}

/// Regular expressions, unanchored (use `^...$` for a full match)
#[derive(Debug, Default)]
pub struct RegexEngine {
    cache: DashMap<String, Option<Regex>>,
}

impl RegexEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PatternEngine for RegexEngine {
    fn is_match(&self, pattern: &str, target: &str) -> bool {
        if let Some(compiled) = self.cache.get(pattern) {
            return compiled.as_ref().is_some_and(|re| re.is_match(target));
        }

        let compiled = Regex::new(pattern).ok();
        let matched = compiled.as_ref().is_some_and(|re| re.is_match(target));
        self.cache.insert(pattern.to_string(), compiled);
        matched
    }

    fn validate(&self, pattern: &str) -> Result<()> {
        Regex::new(pattern)
            .map(|_| ())
            .map_err(|e| RelayError::Config(format!("invalid regex pattern {:?}: {}", pattern, e)))
    }
}
