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

//! Parsing of configuration for privilege evaluation behavior.

use config::ConfigBuilder;
use config::builder::BuilderState;
use serde::{Deserialize, Serialize};

use super::AppConfigDefaults;

/// Configuration for privilege evaluation behavior.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthzConfig {
    /// See [Self::ignore_unauthorized_indices()].
    #[serde(rename = "ignoreunauthorizedindices")]
    ignore_unauthorized_indices: bool,
    /// See [Self::ignore_unauthorized_indices_actions()].
    #[serde(rename = "ignoreunauthorizedindicesactions")]
    ignore_unauthorized_indices_actions: Vec<String>,
    /// See [Self::allow_alias_if_all_indices_allowed()].
    #[serde(rename = "allowaliasifallindicesallowed")]
    allow_alias_if_all_indices_allowed: bool,
    /// See [Self::universally_denied_indices()].
    #[serde(rename = "universallydeniedindices")]
    universally_denied_indices: Vec<String>,
    /// See [Self::debug()].
    debug: bool,
}

impl AppConfigDefaults for AuthzConfig {
    /// Provide defaults for this part of the configuration
    fn set_defaults<T: BuilderState>(
        config_builder: ConfigBuilder<T>,
        prefix: &str,
    ) -> ConfigBuilder<T> {
        config_builder
            .set_default(
                prefix.to_string() + "." + "ignoreunauthorizedindices",
                "true",
            )
            .unwrap()
            .set_default(
                prefix.to_string() + "." + "ignoreunauthorizedindicesactions",
                Vec::<String>::new(),
            )
            .unwrap()
            .set_default(
                prefix.to_string() + "." + "allowaliasifallindicesallowed",
                "true",
            )
            .unwrap()
            .set_default(
                prefix.to_string() + "." + "universallydeniedindices",
                Vec::<String>::new(),
            )
            .unwrap()
            .set_default(prefix.to_string() + "." + "debug", "false")
            .unwrap()
    }
}

impl AuthzConfig {
    /// Override the do-not-fail-on-forbidden behavior.
    pub fn with_ignore_unauthorized_indices(mut self, ignore_unauthorized_indices: bool) -> Self {
        self.ignore_unauthorized_indices = ignore_unauthorized_indices;
        self
    }

    /// Override the patterns of resources that are denied to everyone.
    pub fn with_universally_denied_indices<S: AsRef<str>>(mut self, patterns: &[S]) -> Self {
        self.universally_denied_indices = patterns
            .iter()
            .map(|pattern| pattern.as_ref().to_string())
            .collect();
        self
    }

    /** Return `true` if requests may be silently narrowed to the resources
    the user is authorized for instead of denying the whole request
    (do-not-fail-on-forbidden). */
    pub fn ignore_unauthorized_indices(&self) -> bool {
        self.ignore_unauthorized_indices
    }

    /// Return the action name patterns for which request narrowing is
    /// allowed even when it is globally disabled.
    pub fn ignore_unauthorized_indices_actions(&self) -> &[String] {
        &self.ignore_unauthorized_indices_actions
    }

    /// Return `true` if a request for an alias may proceed when all its
    /// member indices are authorized.
    pub fn allow_alias_if_all_indices_allowed(&self) -> bool {
        self.allow_alias_if_all_indices_allowed
    }

    /// Return patterns of resources that are denied to everyone.
    pub fn universally_denied_indices(&self) -> &[String] {
        &self.universally_denied_indices
    }

    /// Return `true` if denial responses may include evaluation internals.
    pub fn debug(&self) -> bool {
        self.debug
    }
}

impl Default for AuthzConfig {
    fn default() -> Self {
        Self {
            ignore_unauthorized_indices: true,
            ignore_unauthorized_indices_actions: Vec::new(),
            allow_alias_if_all_indices_allowed: true,
            universally_denied_indices: Vec::new(),
            debug: false,
        }
    }
}
