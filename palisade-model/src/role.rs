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

//! Role configuration structures.

use crate::error::AuthzError;
use crate::pattern::DateMathExpression;
use crate::pattern::Pattern;
use crate::pattern::PatternTemplate;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::collections::BTreeSet;

/** A named bundle of permissions.

Roles are immutable snapshots: a new configuration version produces an
entirely new role set, it is never mutated in place. Parsing and
validation of the configuration source happen in an external
collaborator; this structure is the already validated form.
*/
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Role {
    /// Cluster permission patterns.
    #[serde(default)]
    pub cluster_permissions: Vec<String>,
    /// Cluster permission patterns that are denied even when granted
    /// elsewhere.
    #[serde(default)]
    pub exclude_cluster_permissions: Vec<String>,
    /// Permissions on concrete indices.
    #[serde(default)]
    pub index_permissions: Vec<IndexPermissionsBlock>,
    /// Permissions on aliases.
    #[serde(default)]
    pub alias_permissions: Vec<IndexPermissionsBlock>,
    /// Permissions on data streams.
    #[serde(default)]
    pub data_stream_permissions: Vec<IndexPermissionsBlock>,
    /// Index permissions that are denied even when granted elsewhere.
    #[serde(default)]
    pub exclude_index_permissions: Vec<ExcludeIndexBlock>,
    /// Permissions on tenants.
    #[serde(default)]
    pub tenant_permissions: Vec<TenantPermissionsBlock>,
}

/// One index/alias/data-stream permission block of a role.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IndexPermissionsBlock {
    /// Resource name patterns. Constant, glob, regex, `${...}` templated
    /// and `<...>` date math entries are supported; entries prefixed with
    /// `-` subtract from the constant patterns.
    pub index_patterns: Vec<String>,
    /// Action name patterns allowed on the matched resources.
    pub allowed_actions: Vec<String>,
    /// Document level security query restricting readable documents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dls: Option<String>,
    /// Field level security: fields visible in returned documents.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fls: Vec<String>,
    /// Fields that are masked in returned documents.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub masked_fields: Vec<String>,
}

/// One index permission exclusion block of a role.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExcludeIndexBlock {
    /// Resource name patterns the exclusion applies to.
    pub index_patterns: Vec<String>,
    /// Action name patterns that are denied on the matched resources.
    pub actions: Vec<String>,
}

/// One tenant permission block of a role.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TenantPermissionsBlock {
    /// Tenant name patterns, optionally `${...}` templated.
    pub tenant_patterns: Vec<String>,
    /// Action name patterns allowed on the matched tenants.
    pub allowed_actions: Vec<String>,
}

/** The parsed form of a block's `index_patterns` entries.

Constant entries are compiled into one joined [Pattern]; `${...}`
templated entries and `<...>` date math entries stay dynamic and are
rendered per user at evaluation time.
*/
#[derive(Clone, Debug)]
pub struct IndexPatternSpec {
    pattern: Pattern,
    pattern_templates: Vec<PatternTemplate>,
    date_math_expressions: Vec<DateMathExpression>,
}

impl IndexPatternSpec {
    /// Parse the raw pattern entries of a permission block.
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Result<Self, AuthzError> {
        let mut constants = Vec::new();
        let mut negations = Vec::new();
        let mut pattern_templates = Vec::new();
        let mut date_math_expressions = Vec::new();
        for entry in entries {
            let entry = entry.as_ref();
            if let Some(negated) = entry.strip_prefix('-') {
                negations.push(negated.to_string());
            } else if DateMathExpression::is_date_math(entry) {
                date_math_expressions.push(DateMathExpression::new(entry));
            } else if PatternTemplate::contains_placeholders(entry) {
                pattern_templates.push(PatternTemplate::new(entry));
            } else {
                constants.push(entry.to_string());
            }
        }
        let mut pattern = Pattern::create_many(&constants)?;
        if !negations.is_empty() {
            let exclusions = Pattern::create_many(&negations)?;
            pattern = pattern.excluding(exclusions.clone());
            pattern_templates = pattern_templates
                .into_iter()
                .map(|template| template.with_exclusions(exclusions.clone()))
                .collect();
            date_math_expressions = date_math_expressions
                .into_iter()
                .map(|expression| expression.with_exclusions(exclusions.clone()))
                .collect();
        }
        Ok(Self {
            pattern,
            pattern_templates,
            date_math_expressions,
        })
    }

    /// Return the joined constant pattern.
    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    /// Return the templated entries.
    pub fn pattern_templates(&self) -> &[PatternTemplate] {
        &self.pattern_templates
    }

    /// Return the date math entries.
    pub fn date_math_expressions(&self) -> &[DateMathExpression] {
        &self.date_math_expressions
    }

    /// Return `true` if the spec has no dynamic (templated or date math)
    /// entries.
    pub fn is_constant(&self) -> bool {
        self.pattern_templates.is_empty() && self.date_math_expressions.is_empty()
    }
}

/** Already flattened action groups.

Action group definitions may reference other groups; the flattening here
resolves those references once so that permission compilation only deals
with plain action name patterns. Cyclic references are tolerated (each
group is expanded at most once per resolution).
*/
#[derive(Clone, Debug, Default)]
pub struct FlattenedActionGroups {
    groups: BTreeMap<String, BTreeSet<String>>,
}

impl FlattenedActionGroups {
    /// Return an empty instance that resolves every entry to itself.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Flatten raw group definitions.
    pub fn new(raw_groups: BTreeMap<String, Vec<String>>) -> Self {
        let mut groups = BTreeMap::new();
        for group_name in raw_groups.keys() {
            let mut flattened = BTreeSet::new();
            let mut worklist = vec![group_name.clone()];
            let mut visited = BTreeSet::new();
            while let Some(current) = worklist.pop() {
                if !visited.insert(current.clone()) {
                    continue;
                }
                if let Some(members) = raw_groups.get(&current) {
                    for member in members {
                        if raw_groups.contains_key(member) {
                            worklist.push(member.clone());
                        } else {
                            flattened.insert(member.clone());
                        }
                    }
                } else {
                    flattened.insert(current);
                }
            }
            groups.insert(group_name.clone(), flattened);
        }
        Self { groups }
    }

    /// Resolve permission entries, substituting group references by their
    /// flattened members.
    pub fn resolve<S: AsRef<str>>(&self, entries: &[S]) -> BTreeSet<String> {
        let mut resolved = BTreeSet::new();
        for entry in entries {
            let entry = entry.as_ref();
            if let Some(members) = self.groups.get(entry) {
                resolved.extend(members.iter().cloned());
            } else {
                resolved.insert(entry.to_string());
            }
        }
        resolved
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn index_pattern_spec_partitions_entries() {
        let spec = IndexPatternSpec::parse(&[
            "logs-*",
            "metrics-2024",
            "-logs-secret*",
            "${user.attrs.department}-*",
            "<audit-{now/d}>",
        ])
        .unwrap();
        assert!(spec.pattern().matches("logs-2024"));
        assert!(spec.pattern().matches("metrics-2024"));
        assert!(!spec.pattern().matches("logs-secret-2024"));
        assert_eq!(spec.pattern_templates().len(), 1);
        assert_eq!(spec.date_math_expressions().len(), 1);
        assert!(!spec.is_constant());
    }

    #[test]
    fn constant_spec_is_marked_constant() {
        let spec = IndexPatternSpec::parse(&["logs-*"]).unwrap();
        assert!(spec.is_constant());
    }

    #[test]
    fn action_groups_flatten_nested_references() {
        let mut raw = BTreeMap::new();
        raw.insert(
            "SGS_READ".to_string(),
            vec![
                "indices:data/read/*".to_string(),
                "SGS_GET".to_string(),
            ],
        );
        raw.insert(
            "SGS_GET".to_string(),
            vec!["indices:data/read/get".to_string()],
        );
        let groups = FlattenedActionGroups::new(raw);
        let resolved = groups.resolve(&["SGS_READ", "cluster:monitor/health"]);
        assert!(resolved.contains("indices:data/read/*"));
        assert!(resolved.contains("indices:data/read/get"));
        assert!(resolved.contains("cluster:monitor/health"));
        assert!(!resolved.contains("SGS_GET"));
    }

    #[test]
    fn roles_deserialize_from_json() {
        let role: Role = serde_json::from_str(
            r#"{
                "cluster_permissions": ["cluster:monitor/*"],
                "index_permissions": [
                    {
                        "index_patterns": ["logs-*"],
                        "allowed_actions": ["indices:data/read/search"],
                        "fls": ["message", "timestamp"]
                    }
                ],
                "tenant_permissions": [
                    {
                        "tenant_patterns": ["hr_tenant"],
                        "allowed_actions": ["tenant:saved_objects/*"]
                    }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(role.cluster_permissions, vec!["cluster:monitor/*"]);
        assert_eq!(role.index_permissions.len(), 1);
        assert_eq!(role.index_permissions[0].fls.len(), 2);
        assert_eq!(role.tenant_permissions.len(), 1);
    }
}
