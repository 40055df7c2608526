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

//! Per request evaluation context.

use crate::error::AuthzError;
use crate::pattern::Pattern;
use crate::pattern::PatternTemplate;
use crate::user::User;
use crossbeam_skiplist::SkipMap;
use std::collections::BTreeSet;

/** The per request context of one privilege evaluation.

Carries the authenticated user, the roles mapped to the user, and the
request derived flags the evaluator branches on. Dynamic pattern
templates referenced by several roles are rendered at most once per
context through a lock free cache.
*/
pub struct PrivilegesEvaluationContext {
    user: User,
    mapped_roles: BTreeSet<String>,
    resolve_local_all: bool,
    debug: bool,
    rendered_patterns: SkipMap<String, Pattern>,
}

impl PrivilegesEvaluationContext {
    /// Return a new instance for the given user and mapped roles.
    pub fn new(user: User, mapped_roles: BTreeSet<String>) -> Self {
        Self {
            user,
            mapped_roles,
            resolve_local_all: true,
            debug: false,
            rendered_patterns: SkipMap::new(),
        }
    }

    /** Control whether a request for "all local resources" may be reduced
    to the resources the user actually has privileges for. Callers disable
    this when they already determined that a request rewrite is not safe
    for the action. */
    pub fn with_resolve_local_all(mut self, resolve_local_all: bool) -> Self {
        self.resolve_local_all = resolve_local_all;
        self
    }

    /// Enable verbose denial diagnostics for this request.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Return the authenticated user.
    pub fn user(&self) -> &User {
        &self.user
    }

    /// Return the roles mapped to the user.
    pub fn mapped_roles(&self) -> &BTreeSet<String> {
        &self.mapped_roles
    }

    /// Return `true` if a local-all request may be rewritten.
    pub fn is_resolve_local_all(&self) -> bool {
        self.resolve_local_all
    }

    /// Return `true` if verbose denial diagnostics were requested.
    pub fn is_debug(&self) -> bool {
        self.debug
    }

    /// Render `template` for this context's user, caching the result for
    /// the lifetime of the context.
    pub fn rendered_pattern(&self, template: &PatternTemplate) -> Result<Pattern, AuthzError> {
        if let Some(entry) = self.rendered_patterns.get(template.source()) {
            return Ok(entry.value().clone());
        }
        let rendered = template.render(&self.user)?;
        if log::log_enabled!(log::Level::Trace) {
            log::trace!(
                "Rendered pattern template '{}' for user '{}' to '{rendered}'.",
                template.source(),
                self.user
            );
        }
        self.rendered_patterns
            .insert(template.source().to_string(), rendered.clone());
        Ok(rendered)
    }
}
