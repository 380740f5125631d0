//! Ref rules and the release gate.
//!
//! A rule set is an ordered pair of allow (`only`) and deny (`except`)
//! pattern lists. A ref is admitted when it matches at least one allow
//! pattern and no deny pattern. Absence of a match is a normal outcome,
//! never an error; unmatched jobs are Skipped, not failed.
//!
//! The same machinery drives per-job trigger predicates and the release
//! gate (`except: branches` + a tag regex mirrors a tags-only release).

use crate::context::GitRef;
use crate::error::DefinitionError;
use glob_match::glob_match;
use regex::Regex;

/// One compiled ref pattern.
///
/// Syntax, decided at definition-validation time:
/// - `branches` / `tags`: keyword matching the ref kind
/// - `/.../`: anchored-as-written regular expression on the ref name
/// - anything containing `*`, `?` or `[`: glob on the ref name
/// - otherwise: exact ref name comparison
#[derive(Debug, Clone)]
pub enum RefPattern {
    Exact(String),
    Glob(String),
    Regex(Regex),
    Branches,
    Tags,
}

impl RefPattern {
    /// Parse one pattern string. Invalid regexes are rejected here so that
    /// admission checks can never fail at run time.
    pub fn parse(input: &str) -> Result<Self, DefinitionError> {
        match input {
            "branches" => return Ok(RefPattern::Branches),
            "tags" => return Ok(RefPattern::Tags),
            _ => {}
        }

        if let Some(body) = input.strip_prefix('/').and_then(|s| s.strip_suffix('/')) {
            let regex = Regex::new(body).map_err(|e| DefinitionError::InvalidRefPattern {
                pattern: input.to_string(),
                reason: e.to_string(),
            })?;
            return Ok(RefPattern::Regex(regex));
        }

        if input.contains(['*', '?', '[']) {
            Ok(RefPattern::Glob(input.to_string()))
        } else {
            Ok(RefPattern::Exact(input.to_string()))
        }
    }

    /// Whether the pattern matches the given ref.
    pub fn matches(&self, git_ref: &GitRef) -> bool {
        match self {
            RefPattern::Exact(name) => name == git_ref.name(),
            RefPattern::Glob(pattern) => glob_match(pattern, git_ref.name()),
            RefPattern::Regex(regex) => regex.is_match(git_ref.name()),
            RefPattern::Branches => git_ref.is_branch(),
            RefPattern::Tags => git_ref.is_tag(),
        }
    }
}

/// Compiled allow/deny rule sets for one job.
#[derive(Debug, Clone, Default)]
pub struct RefRules {
    /// Allow patterns. Empty means every ref is allowed.
    pub only: Vec<RefPattern>,

    /// Deny patterns. Any match rejects the ref.
    pub except: Vec<RefPattern>,
}

impl RefRules {
    /// Compile rule strings from a pipeline definition.
    pub fn parse(only: &[String], except: &[String]) -> Result<Self, DefinitionError> {
        Ok(Self {
            only: only
                .iter()
                .map(|p| RefPattern::parse(p))
                .collect::<Result<_, _>>()?,
            except: except
                .iter()
                .map(|p| RefPattern::parse(p))
                .collect::<Result<_, _>>()?,
        })
    }

    /// Whether this rule set admits the given ref.
    pub fn admits(&self, git_ref: &GitRef) -> bool {
        let allowed =
            self.only.is_empty() || self.only.iter().any(|pattern| pattern.matches(git_ref));
        let denied = self.except.iter().any(|pattern| pattern.matches(git_ref));
        allowed && !denied
    }
}

/// The release gate: decides whether the release job may run at all.
pub struct ReleaseGate;

impl ReleaseGate {
    /// Admission requires the ref to match at least one allow pattern and
    /// zero deny patterns. Returns `false` on no match; never errors.
    pub fn admit(git_ref: &GitRef, rules: &RefRules) -> bool {
        rules.admits(git_ref)
    }
}
