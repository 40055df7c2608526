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

//! Authenticated user identity.

use std::collections::BTreeMap;

/** An already authenticated user.

Authentication is performed by an external collaborator. The evaluator only
needs the user name and the attributes referenced by dynamic permission
patterns like `logs-${user.attrs.department}-*`.
*/
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    name: String,
    attributes: BTreeMap<String, String>,
}

impl std::fmt::Display for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl User {
    /// Return a new instance without attributes.
    pub fn new<S: AsRef<str>>(name: S) -> Self {
        Self {
            name: name.as_ref().to_string(),
            attributes: BTreeMap::new(),
        }
    }

    /// Attach an attribute usable in dynamic permission patterns.
    pub fn with_attribute<K: AsRef<str>, V: AsRef<str>>(mut self, key: K, value: V) -> Self {
        self.attributes
            .insert(key.as_ref().to_string(), value.as_ref().to_string());
        self
    }

    /// Return the user name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Return the attribute value for `key`, if present.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Return the names of all attributes carried by this user.
    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }
}
