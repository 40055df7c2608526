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

//! The outcome algebra of privilege evaluations.

use crate::actions::Action;
use crate::check::CheckTable;
use crate::context::PrivilegesEvaluationContext;
use crate::error::AuthzError;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;

/// Terminal and intermediate states of a privilege evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EvaluationStatus {
    /// Full grant. Safe to let the request proceed unchanged.
    Ok,
    /// Grant on a strict subset; the caller must rewrite the request to
    /// the available resources.
    PartiallyOk,
    /// Grant contingent on replacing alias or pattern references by their
    /// currently resolved concrete members.
    OkWhenResolved,
    /// No privileges on any requested resource; the caller should produce
    /// an empty result instead of an error.
    Empty,
    /// Denied. User visible error.
    Insufficient,
    /// Not decided yet; a later phase will decide. Never a terminal
    /// outward facing result.
    Pending,
}

impl EvaluationStatus {
    /// Dominance rank used by [PrivilegesEvaluationResult::with_additional].
    /// Higher ranks win the merge.
    fn dominance(&self) -> u8 {
        match self {
            Self::Ok => 0,
            Self::OkWhenResolved => 1,
            Self::PartiallyOk => 2,
            Self::Empty => 3,
            Self::Pending => 4,
            Self::Insufficient => 5,
        }
    }

    /// Merge two statuses. Commutative and total.
    pub fn merge(self, other: Self) -> Self {
        if self.dominance() >= other.dominance() {
            self
        } else {
            other
        }
    }
}

impl fmt::Display for EvaluationStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// A role attributed error recorded during compilation or evaluation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvaluationError {
    message: String,
    role: Option<String>,
    cause: Option<String>,
}

impl EvaluationError {
    /// Return a new instance without role attribution.
    pub fn new<S: AsRef<str>>(message: S) -> Self {
        Self {
            message: message.as_ref().to_string(),
            role: None,
            cause: None,
        }
    }

    /// Attribute the error to a role.
    pub fn for_role<S: AsRef<str>>(mut self, role: S) -> Self {
        self.role = Some(role.as_ref().to_string());
        self
    }

    /// Attach the underlying cause.
    pub fn caused_by(mut self, cause: &AuthzError) -> Self {
        self.cause = Some(cause.to_string());
        self
    }

    /// Return the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Return the role the error is attributed to, if any.
    pub fn role(&self) -> Option<&str> {
        self.role.as_deref()
    }
}

impl fmt::Display for EvaluationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match (&self.role, &self.cause) {
            (Some(role), Some(cause)) => write!(f, "{} (role '{role}') [{cause}]", self.message),
            (Some(role), None) => write!(f, "{} (role '{role}')", self.message),
            (None, Some(cause)) => write!(f, "{} [{cause}]", self.message),
            (None, None) => write!(f, "{}", self.message),
        }
    }
}

/** The immutable outcome of one privilege evaluation.

Carries the status, an optional human readable reason, the set of
resources that gained privileges, the privilege matrix for diagnostics,
collected per role errors, and available resource sets of additional
dimensions merged in via [Self::with_additional]. Every mutator returns a
new instance.
*/
#[derive(Clone, Debug)]
pub struct PrivilegesEvaluationResult {
    status: EvaluationStatus,
    reason: Option<String>,
    available_indices: Option<BTreeSet<String>>,
    privilege_matrix: Option<CheckTable<String, Action>>,
    errors: Vec<EvaluationError>,
    additional_dimensions: BTreeMap<String, BTreeSet<String>>,
}

impl PrivilegesEvaluationResult {
    fn with_status(status: EvaluationStatus) -> Self {
        Self {
            status,
            reason: None,
            available_indices: None,
            privilege_matrix: None,
            errors: Vec::new(),
            additional_dimensions: BTreeMap::new(),
        }
    }

    /// Full grant.
    pub fn ok() -> Self {
        Self::with_status(EvaluationStatus::Ok)
    }

    /// Grant on a strict subset of the requested resources.
    pub fn partially_ok() -> Self {
        Self::with_status(EvaluationStatus::PartiallyOk)
    }

    /// Grant contingent on resolving references to concrete members.
    pub fn ok_when_resolved() -> Self {
        Self::with_status(EvaluationStatus::OkWhenResolved)
    }

    /// No privileges on any requested resource.
    pub fn empty() -> Self {
        Self::with_status(EvaluationStatus::Empty)
    }

    /// Denied.
    pub fn insufficient() -> Self {
        Self::with_status(EvaluationStatus::Insufficient)
    }

    /// Not decided yet.
    pub fn pending() -> Self {
        Self::with_status(EvaluationStatus::Pending)
    }

    /// Return a copy with the given status.
    pub fn status(mut self, status: EvaluationStatus) -> Self {
        self.status = status;
        self
    }

    /// Return a copy with the given human readable reason.
    pub fn reason<S: AsRef<str>>(mut self, reason: S) -> Self {
        self.reason = Some(reason.as_ref().to_string());
        self
    }

    /// Return a copy with the given privilege matrix attached.
    pub fn with_table(mut self, table: CheckTable<String, Action>) -> Self {
        self.privilege_matrix = Some(table);
        self
    }

    /// Return a copy with the given errors appended.
    pub fn with_errors(mut self, errors: Vec<EvaluationError>) -> Self {
        if errors.is_empty() {
            return self;
        }
        self.errors.extend(errors);
        self
    }

    /// Return a copy carrying the resources the user has privileges for.
    pub fn available_indices(mut self, available: BTreeSet<String>) -> Self {
        self.available_indices = Some(available);
        self
    }

    /// Return a copy whose privilege matrix reports the given action as
    /// missing.
    pub fn missing_privileges(mut self, action: &Action) -> Self {
        self.privilege_matrix = Some(CheckTable::new(
            ["_".to_string()],
            [action.clone()],
        ));
        self
    }

    /** Merge the result of an additional evaluation dimension into this
    result.

    The merged status follows the dominance table (INSUFFICIENT over
    everything, PENDING over all but INSUFFICIENT, EMPTY over the grant
    states, PARTIALLY_OK over OK_WHEN_RESOLVED over OK). Reasons are
    newline joined, error lists concatenate, and the other result's
    available resources are recorded under `dimension`.
    */
    pub fn with_additional<S: AsRef<str>>(mut self, dimension: S, other: Self) -> Self {
        self.status = self.status.merge(other.status);
        self.reason = match (self.reason.take(), other.reason) {
            (Some(mine), Some(theirs)) => Some(format!("{mine}\n{theirs}")),
            (mine, theirs) => mine.or(theirs),
        };
        self.errors.extend(other.errors);
        if let Some(available) = other.available_indices {
            self.additional_dimensions
                .entry(dimension.as_ref().to_string())
                .or_default()
                .extend(available);
        }
        for (other_dimension, resources) in other.additional_dimensions {
            self.additional_dimensions
                .entry(other_dimension)
                .or_default()
                .extend(resources);
        }
        self
    }

    /// Return the status.
    pub fn get_status(&self) -> EvaluationStatus {
        self.status
    }

    /// Return `true` for a full grant.
    pub fn is_ok(&self) -> bool {
        self.status == EvaluationStatus::Ok
    }

    /// Return `true` while the decision is deferred to a later phase.
    pub fn is_pending(&self) -> bool {
        self.status == EvaluationStatus::Pending
    }

    /// Return the human readable reason, if any.
    pub fn get_reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// Return the resources the user has privileges for, if computed.
    pub fn get_available_indices(&self) -> Option<&BTreeSet<String>> {
        self.available_indices.as_ref()
    }

    /// Return the available resource sets of merged additional dimensions.
    pub fn get_additional_dimensions(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.additional_dimensions
    }

    /// Return the collected errors.
    pub fn get_errors(&self) -> &[EvaluationError] {
        &self.errors
    }

    /// Return `true` if any errors were collected.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Return the privilege matrix, if attached.
    pub fn get_privilege_matrix(&self) -> Option<&CheckTable<String, Action>> {
        self.privilege_matrix.as_ref()
    }

    /** Render a denial for the end user.

    Without debug mode only the generic denial and the missing privilege
    names are exposed. With debug mode the full reason, the per resource
    missing privileges, the effective roles and the user attribute names
    are included for troubleshooting.
    */
    pub fn to_denial_message(&self, context: &PrivilegesEvaluationContext) -> String {
        let mut message = String::from("Insufficient permissions");
        if let Some(matrix) = &self.privilege_matrix {
            let missing = matrix
                .columns()
                .iter()
                .map(|action| action.name().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            message.push_str(&format!(" (missing: {missing})"));
        }
        if context.is_debug() {
            if let Some(reason) = &self.reason {
                message.push_str(&format!("\nReason: {reason}"));
            }
            if let Some(matrix) = &self.privilege_matrix {
                message.push_str(&format!(
                    "\nEvaluated privileges:\n{}",
                    matrix.to_table_string("ok", "MISSING")
                ));
            }
            let roles = context
                .mapped_roles()
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(", ");
            message.push_str(&format!("\nEffective roles: {roles}"));
            let attributes = context
                .user()
                .attribute_names()
                .collect::<Vec<_>>()
                .join(", ");
            message.push_str(&format!("\nUser attributes: {attributes}"));
            for error in &self.errors {
                message.push_str(&format!("\nError: {error}"));
            }
        }
        message
    }
}

impl fmt::Display for PrivilegesEvaluationResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.status)?;
        if let Some(reason) = &self.reason {
            write!(f, " reason: {reason}")?;
        }
        if let Some(available) = &self.available_indices {
            let joined = available.iter().cloned().collect::<Vec<_>>().join(",");
            write!(f, " available: [{joined}]")?;
        }
        if !self.errors.is_empty() {
            write!(f, " errors: {}", self.errors.len())?;
        }
        Ok(())
    }
}
