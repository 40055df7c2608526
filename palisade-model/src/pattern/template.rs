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

//! Dynamic pattern expressions rendered per user at evaluation time.

use super::Pattern;
use crate::error::AuthzError;
use crate::error::AuthzErrorKind;
use crate::user::User;
use chrono::DateTime;
use chrono::Datelike;
use chrono::Duration;
use chrono::Months;
use chrono::TimeZone;
use chrono::Timelike;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;

/// Placeholder syntax: `${user.name}` or `${user.attrs.<key>}`.
static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z0-9_.-]+)\}").unwrap_or_else(|e| panic!("{e}")));

/** A pattern expression containing user attribute placeholders.

The expression is rendered into a concrete [Pattern] per user at evaluation
time. Rendering fails when a referenced attribute is not carried by the
user; such failures are collected per role and never abort an evaluation.
*/
#[derive(Clone, Debug)]
pub struct PatternTemplate {
    source: String,
    exclusions: Pattern,
}

impl PatternTemplate {
    /// Return `true` if `expression` contains `${...}` placeholders.
    pub fn contains_placeholders(expression: &str) -> bool {
        expression.contains("${")
    }

    /// Return a new instance for the given expression.
    pub fn new<S: AsRef<str>>(source: S) -> Self {
        Self {
            source: source.as_ref().to_string(),
            exclusions: Pattern::blank(),
        }
    }

    /// Attach an exclusion pattern applied after the template matches.
    pub fn with_exclusions(mut self, exclusions: Pattern) -> Self {
        self.exclusions = exclusions;
        self
    }

    /// Return the raw expression including placeholders.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Return the exclusion pattern applied after the template matches.
    pub fn exclusions(&self) -> &Pattern {
        &self.exclusions
    }

    /// Render the template for `user` and compile the result.
    pub fn render(&self, user: &User) -> Result<Pattern, AuthzError> {
        let rendered = substitute_placeholders(&self.source, user)?;
        Pattern::create(&rendered)
    }
}

/// Substitute every `${...}` placeholder in `expression` with user data.
fn substitute_placeholders(expression: &str, user: &User) -> Result<String, AuthzError> {
    let mut result = String::with_capacity(expression.len());
    let mut last_end = 0;
    for captures in PLACEHOLDER.captures_iter(expression) {
        let whole = captures.get(0).ok_or_else(|| {
            AuthzErrorKind::ExpressionEvaluation.error_with_msg("Empty placeholder capture.")
        })?;
        let reference = &captures[1];
        let value = if reference == "user.name" {
            user.name().to_string()
        } else if let Some(attribute) = reference.strip_prefix("user.attrs.") {
            user.attribute(attribute)
                .ok_or_else(|| {
                    AuthzErrorKind::ExpressionEvaluation.error_with_msg(format!(
                        "User '{user}' does not carry the attribute '{attribute}'."
                    ))
                })?
                .to_string()
        } else {
            Err(AuthzErrorKind::ExpressionEvaluation
                .error_with_msg(format!("Unknown placeholder '${{{reference}}}'.")))?
        };
        result.push_str(&expression[last_end..whole.start()]);
        result.push_str(&value);
        last_end = whole.end();
    }
    result.push_str(&expression[last_end..]);
    Ok(result)
}

/** A date math index expression like `<logs-{now/d}>`.

Each `{...}` segment is resolved against the current clock when the
expression is rendered. The use of date math in privileges is deprecated
upstream; it is retained for configurations that still carry it.
*/
#[derive(Clone, Debug)]
pub struct DateMathExpression {
    expression: String,
    exclusions: Pattern,
}

impl DateMathExpression {
    /// Return `true` if `expression` is date math (`<...>` delimited).
    pub fn is_date_math(expression: &str) -> bool {
        expression.len() >= 2 && expression.starts_with('<') && expression.ends_with('>')
    }

    /// Return a new instance for the given `<...>` delimited expression.
    pub fn new<S: AsRef<str>>(expression: S) -> Self {
        Self {
            expression: expression.as_ref().to_string(),
            exclusions: Pattern::blank(),
        }
    }

    /// Attach an exclusion pattern applied after the expression matches.
    pub fn with_exclusions(mut self, exclusions: Pattern) -> Self {
        self.exclusions = exclusions;
        self
    }

    /// Return the raw expression.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Return the exclusion pattern applied after the expression matches.
    pub fn exclusions(&self) -> &Pattern {
        &self.exclusions
    }

    /// Render against the current clock and `user`, then compile.
    pub fn render(&self, user: &User) -> Result<Pattern, AuthzError> {
        self.render_at(user, Utc::now())
    }

    /// Render against a fixed clock. Exposed for deterministic testing.
    pub fn render_at(&self, user: &User, now: DateTime<Utc>) -> Result<Pattern, AuthzError> {
        let inner = self
            .expression
            .strip_prefix('<')
            .and_then(|rest| rest.strip_suffix('>'))
            .ok_or_else(|| {
                AuthzErrorKind::ExpressionEvaluation.error_with_msg(format!(
                    "Date math expression '{}' is not '<...>' delimited.",
                    self.expression
                ))
            })?;
        let resolved = resolve_date_math(inner, now)?;
        let resolved = if PatternTemplate::contains_placeholders(&resolved) {
            substitute_placeholders(&resolved, user)?
        } else {
            resolved
        };
        Pattern::create(&resolved)
    }
}

/// Resolve every `{now...}` segment of `expression` against `now`.
fn resolve_date_math(expression: &str, now: DateTime<Utc>) -> Result<String, AuthzError> {
    let mut result = String::with_capacity(expression.len());
    let mut rest = expression;
    while let Some(start) = rest.find('{') {
        result.push_str(&rest[..start]);
        let after_brace = &rest[start + 1..];
        let end = find_segment_end(after_brace).ok_or_else(|| {
            AuthzErrorKind::ExpressionEvaluation
                .error_with_msg(format!("Unbalanced braces in date math '{expression}'."))
        })?;
        result.push_str(&resolve_date_segment(&after_brace[..end], now)?);
        rest = &after_brace[end + 1..];
    }
    result.push_str(rest);
    Ok(result)
}

/// Return the offset of the `}` closing the segment, honoring one nested
/// brace level used by explicit format specifications.
fn find_segment_end(segment: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (offset, c) in segment.char_indices() {
        match c {
            '{' => depth += 1,
            '}' if depth == 0 => return Some(offset),
            '}' => depth -= 1,
            _ => {}
        }
    }
    None
}

/// Resolve a single `now[+-N<unit>|/<unit>][{format}]` segment.
fn resolve_date_segment(segment: &str, now: DateTime<Utc>) -> Result<String, AuthzError> {
    let (math, format) = match segment.find('{') {
        Some(offset) => {
            let format = segment[offset + 1..]
                .strip_suffix('}')
                .unwrap_or(&segment[offset + 1..]);
            (&segment[..offset], Some(format))
        }
        None => (segment, None),
    };
    let math = math.strip_prefix("now").ok_or_else(|| {
        AuthzErrorKind::ExpressionEvaluation
            .error_with_msg(format!("Date math segment '{segment}' does not start with 'now'."))
    })?;
    let mut moment = now;
    let mut rest = math;
    while !rest.is_empty() {
        let op = rest.chars().next().unwrap_or_default();
        rest = &rest[1..];
        match op {
            '+' | '-' => {
                let digits_end = rest
                    .find(|c: char| !c.is_ascii_digit())
                    .ok_or_else(|| invalid_segment(segment))?;
                let amount: i64 = rest[..digits_end]
                    .parse()
                    .map_err(|_| invalid_segment(segment))?;
                let amount = if op == '-' { -amount } else { amount };
                let unit = rest[digits_end..]
                    .chars()
                    .next()
                    .ok_or_else(|| invalid_segment(segment))?;
                moment = apply_offset(moment, amount, unit).ok_or_else(|| invalid_segment(segment))?;
                rest = &rest[digits_end + unit.len_utf8()..];
            }
            '/' => {
                let unit = rest.chars().next().ok_or_else(|| invalid_segment(segment))?;
                moment = truncate_to(moment, unit).ok_or_else(|| invalid_segment(segment))?;
                rest = &rest[unit.len_utf8()..];
            }
            _ => Err(invalid_segment(segment))?,
        }
    }
    let format = format.map(translate_format).unwrap_or("%Y.%m.%d".to_string());
    Ok(moment.format(&format).to_string())
}

fn invalid_segment(segment: &str) -> AuthzError {
    AuthzErrorKind::ExpressionEvaluation
        .error_with_msg(format!("Invalid date math segment '{{{segment}}}'."))
}

/// Shift `moment` by `amount` of `unit`.
fn apply_offset(moment: DateTime<Utc>, amount: i64, unit: char) -> Option<DateTime<Utc>> {
    match unit {
        'y' => shift_months(moment, amount.checked_mul(12)?),
        'M' => shift_months(moment, amount),
        'w' => moment.checked_add_signed(Duration::weeks(amount)),
        'd' => moment.checked_add_signed(Duration::days(amount)),
        'h' | 'H' => moment.checked_add_signed(Duration::hours(amount)),
        'm' => moment.checked_add_signed(Duration::minutes(amount)),
        's' => moment.checked_add_signed(Duration::seconds(amount)),
        _ => None,
    }
}

fn shift_months(moment: DateTime<Utc>, months: i64) -> Option<DateTime<Utc>> {
    let months_u32 = u32::try_from(months.unsigned_abs()).ok()?;
    if months >= 0 {
        moment.checked_add_months(Months::new(months_u32))
    } else {
        moment.checked_sub_months(Months::new(months_u32))
    }
}

/// Truncate `moment` down to the start of `unit`.
fn truncate_to(moment: DateTime<Utc>, unit: char) -> Option<DateTime<Utc>> {
    match unit {
        'y' => Utc
            .with_ymd_and_hms(moment.year(), 1, 1, 0, 0, 0)
            .single(),
        'M' => Utc
            .with_ymd_and_hms(moment.year(), moment.month(), 1, 0, 0, 0)
            .single(),
        'd' => Utc
            .with_ymd_and_hms(moment.year(), moment.month(), moment.day(), 0, 0, 0)
            .single(),
        'h' | 'H' => Utc
            .with_ymd_and_hms(
                moment.year(),
                moment.month(),
                moment.day(),
                moment.hour(),
                0,
                0,
            )
            .single(),
        _ => None,
    }
}

/// Translate the upstream `yyyy.MM.dd` style format into strftime syntax.
fn translate_format(format: &str) -> String {
    format
        .replace("yyyy", "%Y")
        .replace("MM", "%m")
        .replace("dd", "%d")
        .replace("HH", "%H")
        .replace("mm", "%M")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn template_renders_user_attributes() {
        let user = User::new("jdoe").with_attribute("department", "sales");
        let template = PatternTemplate::new("${user.attrs.department}-*");
        let pattern = template.render(&user).unwrap();
        assert!(pattern.matches("sales-2024"));
        assert!(!pattern.matches("hr-2024"));
    }

    #[test]
    fn template_renders_user_name() {
        let user = User::new("jdoe");
        let template = PatternTemplate::new("private-${user.name}");
        let pattern = template.render(&user).unwrap();
        assert!(pattern.matches("private-jdoe"));
        assert!(!pattern.matches("private-other"));
    }

    #[test]
    fn template_fails_on_missing_attribute() {
        let user = User::new("jdoe");
        let template = PatternTemplate::new("${user.attrs.department}-*");
        assert!(template.render(&user).is_err());
    }

    #[test]
    fn date_math_resolves_day_rounding() {
        let user = User::new("jdoe");
        let now = Utc.with_ymd_and_hms(2024, 3, 17, 13, 45, 0).single().unwrap();
        let expression = DateMathExpression::new("<logs-{now/d}>");
        let pattern = expression.render_at(&user, now).unwrap();
        assert!(pattern.matches("logs-2024.03.17"));
        assert!(!pattern.matches("logs-2024.03.16"));
    }

    #[test]
    fn date_math_resolves_offset_and_format() {
        let user = User::new("jdoe");
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 0, 30, 0).single().unwrap();
        let expression = DateMathExpression::new("<logs-{now-1d{yyyy-MM-dd}}>");
        let pattern = expression.render_at(&user, now).unwrap();
        assert!(pattern.matches("logs-2024-02-29"));
    }

    #[test]
    fn date_math_rejects_malformed_segments() {
        let user = User::new("jdoe");
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).single().unwrap();
        assert!(
            DateMathExpression::new("<logs-{tomorrow}>")
                .render_at(&user, now)
                .is_err()
        );
        assert!(
            DateMathExpression::new("<logs-{now/x}>")
                .render_at(&user, now)
                .is_err()
        );
    }
}
