//! String matching for filter criteria.
//!
//! Pseudo-regexp (the default): `*` matches anything, every other character is literal and the
//! pattern must match the whole value. Regexp mode: the pattern is a regular expression anchored
//! at the start of the value.

use crate::error::{Error, Result};
use regex::Regex;

/// Allowed variable depth, as given to the `level` filter key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LevelSpec {
    Exact(Vec<usize>),
    AtMost(usize),
    AtLeast(usize),
    Between(usize, usize),
}

impl LevelSpec {
    /// `"2"`, `"2-"` or `"-2"` (at most 2), `"2+"` (at least 2), `"1-3"` (inclusive).
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let num = |t: &str| {
            t.trim()
                .parse::<usize>()
                .map_err(|_| Error::unsupported_filter("level", format!("invalid level `{s}`")))
        };
        if let Some(n) = s.strip_suffix('+') {
            return Ok(LevelSpec::AtLeast(num(n)?));
        }
        if let Some(n) = s.strip_suffix('-') {
            return Ok(LevelSpec::AtMost(num(n)?));
        }
        if let Some(n) = s.strip_prefix('-') {
            return Ok(LevelSpec::AtMost(num(n)?));
        }
        if let Some((lo, hi)) = s.split_once('-') {
            return Ok(LevelSpec::Between(num(lo)?, num(hi)?));
        }
        Ok(LevelSpec::Exact(vec![num(s)?]))
    }

    pub fn contains(&self, depth: usize) -> bool {
        match self {
            LevelSpec::Exact(levels) => levels.contains(&depth),
            LevelSpec::AtMost(n) => depth <= *n,
            LevelSpec::AtLeast(n) => depth >= *n,
            LevelSpec::Between(lo, hi) => (*lo..=*hi).contains(&depth),
        }
    }
}

/// Escape regex metacharacters except `*`, which becomes `.*`.
pub fn escape_pseudo(pattern: &str) -> String {
    pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*")
}

#[derive(Debug, Clone)]
enum Matcher {
    Exact(String),
    Regex(Regex),
}

/// A compiled list of patterns; a value matches if any pattern does.
#[derive(Debug, Clone)]
pub struct PatternSet {
    matchers: Vec<Matcher>,
}

impl PatternSet {
    pub fn new<S: AsRef<str>>(patterns: &[S], regexp: bool) -> Result<Self> {
        let matchers = patterns
            .iter()
            .map(|p| {
                let p = p.as_ref();
                if regexp {
                    Ok(Matcher::Regex(Regex::new(&format!("^(?:{p})"))?))
                } else if p.contains('*') {
                    Ok(Matcher::Regex(Regex::new(&format!(
                        "^{}$",
                        escape_pseudo(p)
                    ))?))
                } else {
                    Ok(Matcher::Exact(p.to_string()))
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { matchers })
    }

    pub fn is_match(&self, value: &str) -> bool {
        self.matchers.iter().any(|m| match m {
            Matcher::Exact(s) => s == value,
            Matcher::Regex(re) => re.is_match(value),
        })
    }
}

/// Number of `|` separators below the part of `value` matched by `prefix`.
///
/// `prefix` is a pseudo-regexp; trailing `*` are ignored so that `"Emissions|*"` measures depth
/// below `Emissions|`. Returns `None` when `value` does not start with the prefix.
pub fn depth_below(value: &str, prefix: &Regex) -> Option<usize> {
    let m = prefix.find(value)?;
    Some(value[m.end()..].matches('|').count())
}

/// Start-anchored regex for the part of `pattern` before any trailing wildcard.
pub fn prefix_regex(pattern: &str) -> Result<Regex> {
    let trimmed = pattern.trim_end_matches('*');
    Ok(Regex::new(&format!("^{}", escape_pseudo(trimmed)))?)
}

/// Mask of values matching any pattern, and, when `level` is given, lying at that depth below the
/// matching pattern's prefix. Missing values never match.
pub fn pattern_match<'a, S: AsRef<str>>(
    values: impl IntoIterator<Item = Option<&'a str>>,
    patterns: &[S],
    level: Option<&LevelSpec>,
    regexp: bool,
) -> Result<Vec<bool>> {
    let values: Vec<Option<&str>> = values.into_iter().collect();
    let Some(level) = level else {
        let set = PatternSet::new(patterns, regexp)?;
        return Ok(values
            .iter()
            .map(|v| v.is_some_and(|v| set.is_match(v)))
            .collect());
    };

    let mut mask = vec![false; values.len()];
    for pattern in patterns {
        let set = PatternSet::new(&[pattern.as_ref()], regexp)?;
        let prefix = prefix_regex(pattern.as_ref())?;
        for (hit, value) in mask.iter_mut().zip(&values) {
            if let Some(v) = value {
                if !*hit && set.is_match(v) {
                    *hit = depth_below(v, &prefix).is_some_and(|d| level.contains(d));
                }
            }
        }
    }
    Ok(mask)
}

/// Mask of values whose total depth (number of `|`) satisfies `level`.
pub fn find_depth<'a>(
    values: impl IntoIterator<Item = Option<&'a str>>,
    level: &LevelSpec,
) -> Vec<bool> {
    values
        .into_iter()
        .map(|v| v.is_some_and(|v| level.contains(v.matches('|').count())))
        .collect()
}
