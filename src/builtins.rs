//! The closed set of builtin predicates usable in rule bodies.

use std::cell::RefCell;

use regex::Regex;
use thiserror::Error;

use crate::util::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    /// `match(Pattern, Text)`: the pattern matches somewhere in the text.
    Match,
    /// `starts_with(Text, Prefix)`
    StartsWith,
    /// `ends_with(Text, Suffix)`
    EndsWith,
    /// `contains(Text, Needle)`
    Contains,
}

impl Builtin {
    pub const ALL: [Builtin; 4] = [
        Builtin::Match,
        Builtin::StartsWith,
        Builtin::EndsWith,
        Builtin::Contains,
    ];

    pub fn from_name(name: &str) -> Option<Builtin> {
        Self::ALL.into_iter().find(|b| b.name() == name)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Builtin::Match => "match",
            Builtin::StartsWith => "starts_with",
            Builtin::EndsWith => "ends_with",
            Builtin::Contains => "contains",
        }
    }

    pub fn arity(&self) -> usize {
        2
    }

    /// Stable tag used by the compiled format.
    pub fn tag(&self) -> u8 {
        match self {
            Builtin::Match => 0,
            Builtin::StartsWith => 1,
            Builtin::EndsWith => 2,
            Builtin::Contains => 3,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Builtin> {
        Self::ALL.into_iter().find(|b| b.tag() == tag)
    }

    pub(crate) fn apply(
        &self,
        matcher: &dyn Matcher,
        a: &str,
        b: &str,
    ) -> Result<bool, MatchError> {
        Ok(match self {
            Builtin::Match => matcher.is_match(a, b)?,
            Builtin::StartsWith => a.starts_with(b),
            Builtin::EndsWith => a.ends_with(b),
            Builtin::Contains => a.contains(b),
        })
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid pattern {pattern:?}: {message}")]
pub struct MatchError {
    pub pattern: String,
    pub message: String,
}

/// The string-matching capability behind the `match` builtin.
pub trait Matcher {
    fn is_match(&self, pattern: &str, text: &str) -> Result<bool, MatchError>;
}

/// The default [`Matcher`], using the `regex` crate with a cache of compiled
/// patterns.
#[derive(Debug, Default)]
pub struct RegexMatcher {
    cache: RefCell<HashMap<String, Regex>>,
}

impl Matcher for RegexMatcher {
    fn is_match(&self, pattern: &str, text: &str) -> Result<bool, MatchError> {
        let mut cache = self.cache.borrow_mut();
        if let Some(re) = cache.get(pattern) {
            return Ok(re.is_match(text));
        }
        let re = Regex::new(pattern).map_err(|e| MatchError {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;
        let matched = re.is_match(text);
        cache.insert(pattern.to_string(), re);
        Ok(matched)
    }
}
