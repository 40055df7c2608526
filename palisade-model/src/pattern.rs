/*
    Copyright 2025 MydriaTech AB

    Licensed under the Apache License 2.0 with Free world makers exception
    1.0.0 (the "License"); you may not use this file except in compliance with
    the License. You should have obtained a copy of the License with the source
    or binary distribution in file named

        LICENSE-Apache-2.0-with-FWM-Exception-1.0.0

    Unless required by applicable law or agreed to in writing, software
    distributed under the License is distributed on an "AS IS" BASIS,
    WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
    See the License for the specific language governing permissions and
    limitations under the License.
*/

//! Matching of action and resource names against configured expressions.

mod template;

pub use self::template::*;

use crate::error::AuthzError;
use crate::error::AuthzErrorKind;
use regex::Regex;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/** A compiled matcher over action or resource names.

Supported expression syntax:

* `*` on its own matches every name.
* Expressions containing `*` (any run of characters) or `?` (a single
  character) are glob style patterns.
* `/.../` delimited expressions are regular expressions.
* Everything else matches literally.

Patterns are compiled once and are cheap to match and to clone.
*/
#[derive(Clone)]
pub struct Pattern {
    inner: Arc<PatternInner>,
}

enum PatternInner {
    /// Matches nothing.
    Blank,
    /// Matches everything.
    Wildcard,
    Constant(String),
    ConstantSet(BTreeSet<String>),
    Glob { source: String, regex: Regex },
    Regex { source: String, regex: Regex },
    Join(Vec<Pattern>),
    Excluding { base: Pattern, exclusions: Pattern },
}

impl Pattern {
    /// Return the pattern that matches nothing.
    pub fn blank() -> Self {
        Self {
            inner: Arc::new(PatternInner::Blank),
        }
    }

    /// Return the pattern that matches every name.
    pub fn wildcard() -> Self {
        Self {
            inner: Arc::new(PatternInner::Wildcard),
        }
    }

    /// Return `true` if `expression` contains no glob or regex syntax.
    pub fn is_constant(expression: &str) -> bool {
        !(expression == "*"
            || expression.contains('*')
            || expression.contains('?')
            || (expression.len() >= 2 && expression.starts_with('/') && expression.ends_with('/')))
    }

    /// Compile a single expression.
    pub fn create(expression: &str) -> Result<Self, AuthzError> {
        if expression == "*" {
            return Ok(Self::wildcard());
        }
        if expression.is_empty() {
            return Ok(Self::blank());
        }
        if expression.len() >= 2 && expression.starts_with('/') && expression.ends_with('/') {
            let source = &expression[1..expression.len() - 1];
            let regex = Regex::new(&format!("^(?:{source})$")).map_err(|e| {
                AuthzErrorKind::InvalidPattern
                    .error_with_msg(format!("Invalid regex pattern '{expression}': {e}"))
            })?;
            return Ok(Self {
                inner: Arc::new(PatternInner::Regex {
                    source: expression.to_string(),
                    regex,
                }),
            });
        }
        if Self::is_constant(expression) {
            return Ok(Self {
                inner: Arc::new(PatternInner::Constant(expression.to_string())),
            });
        }
        let regex = Regex::new(&glob_to_regex(expression)).map_err(|e| {
            AuthzErrorKind::InvalidPattern
                .error_with_msg(format!("Invalid pattern '{expression}': {e}"))
        })?;
        Ok(Self {
            inner: Arc::new(PatternInner::Glob {
                source: expression.to_string(),
                regex,
            }),
        })
    }

    /// Compile the union of several expressions.
    pub fn create_many<S: AsRef<str>>(expressions: &[S]) -> Result<Self, AuthzError> {
        let mut constants = BTreeSet::new();
        let mut patterns = Vec::new();
        for expression in expressions {
            let expression = expression.as_ref();
            if expression == "*" {
                return Ok(Self::wildcard());
            }
            if expression.is_empty() {
                continue;
            }
            if Self::is_constant(expression) {
                constants.insert(expression.to_string());
            } else {
                patterns.push(Self::create(expression)?);
            }
        }
        match constants.len() {
            0 => {}
            1 => patterns.push(Self {
                inner: Arc::new(PatternInner::Constant(
                    constants.into_iter().next().unwrap_or_default(),
                )),
            }),
            _ => patterns.push(Self {
                inner: Arc::new(PatternInner::ConstantSet(constants)),
            }),
        }
        Ok(Self::join(patterns))
    }

    /// Return the union of the given patterns.
    pub fn join(patterns: Vec<Pattern>) -> Self {
        let mut flattened = Vec::new();
        for pattern in patterns {
            if pattern.is_wildcard() {
                return Self::wildcard();
            }
            if pattern.is_blank() {
                continue;
            }
            if let PatternInner::Join(inner) = pattern.inner.as_ref() {
                flattened.extend(inner.iter().cloned());
            } else {
                flattened.push(pattern);
            }
        }
        match flattened.len() {
            0 => Self::blank(),
            1 => flattened.into_iter().next().unwrap_or_else(Self::blank),
            _ => Self {
                inner: Arc::new(PatternInner::Join(flattened)),
            },
        }
    }

    /// Return this pattern minus everything matched by `exclusions`.
    pub fn excluding(&self, exclusions: Pattern) -> Self {
        if exclusions.is_blank() {
            return self.clone();
        }
        if exclusions.is_wildcard() || self.is_blank() {
            return Self::blank();
        }
        Self {
            inner: Arc::new(PatternInner::Excluding {
                base: self.clone(),
                exclusions,
            }),
        }
    }

    /// Return `true` if this pattern matches every name.
    pub fn is_wildcard(&self) -> bool {
        matches!(self.inner.as_ref(), PatternInner::Wildcard)
    }

    /// Return `true` if this pattern matches nothing.
    pub fn is_blank(&self) -> bool {
        matches!(self.inner.as_ref(), PatternInner::Blank)
    }

    /// Return `true` if this pattern matches `name`.
    pub fn matches(&self, name: &str) -> bool {
        match self.inner.as_ref() {
            PatternInner::Blank => false,
            PatternInner::Wildcard => true,
            PatternInner::Constant(constant) => constant == name,
            PatternInner::ConstantSet(constants) => constants.contains(name),
            PatternInner::Glob { regex, .. } => regex.is_match(name),
            PatternInner::Regex { regex, .. } => regex.is_match(name),
            PatternInner::Join(patterns) => patterns.iter().any(|pattern| pattern.matches(name)),
            PatternInner::Excluding { base, exclusions } => {
                base.matches(name) && !exclusions.matches(name)
            }
        }
    }

    /// Return `true` if this pattern matches any of `names`.
    pub fn matches_any<'a, I: IntoIterator<Item = &'a str>>(&self, names: I) -> bool {
        names.into_iter().any(|name| self.matches(name))
    }

    /// Return the subset of `candidates` whose name matches this pattern.
    pub fn iterate_matching<'a, T, F>(
        &'a self,
        candidates: impl IntoIterator<Item = T> + 'a,
        name_of: F,
    ) -> impl Iterator<Item = T> + 'a
    where
        F: Fn(&T) -> &str + 'a,
    {
        candidates
            .into_iter()
            .filter(move |candidate| self.matches(name_of(candidate)))
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Pattern({self})")
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.inner.as_ref() {
            PatternInner::Blank => write!(f, "-/-"),
            PatternInner::Wildcard => write!(f, "*"),
            PatternInner::Constant(constant) => write!(f, "{constant}"),
            PatternInner::ConstantSet(constants) => {
                let joined = constants.iter().cloned().collect::<Vec<_>>().join(",");
                write!(f, "{joined}")
            }
            PatternInner::Glob { source, .. } => write!(f, "{source}"),
            PatternInner::Regex { source, .. } => write!(f, "{source}"),
            PatternInner::Join(patterns) => {
                let joined = patterns
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(",");
                write!(f, "{joined}")
            }
            PatternInner::Excluding { base, exclusions } => write!(f, "{base} -{exclusions}"),
        }
    }
}

/// Translate glob syntax (`*`, `?`) into an anchored regex.
fn glob_to_regex(expression: &str) -> String {
    let mut regex = String::with_capacity(expression.len() + 8);
    regex.push('^');
    for c in expression.chars() {
        match c {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            c if regex_syntax_char(c) => {
                regex.push('\\');
                regex.push(c);
            }
            c => regex.push(c),
        }
    }
    regex.push('$');
    regex
}

/// Return `true` for characters that carry meaning in regex syntax.
fn regex_syntax_char(c: char) -> bool {
    matches!(
        c,
        '.' | '+' | '(' | ')' | '[' | ']' | '{' | '}' | '^' | '$' | '|' | '\\'
    )
}
