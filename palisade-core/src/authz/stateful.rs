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

//! Precomputed, metadata aware permission index.

use palisade_model::Action;
use palisade_model::Actions;
use palisade_model::AliasResolutionMode;
use palisade_model::AuthzError;
use palisade_model::CheckTable;
use palisade_model::FlattenedActionGroups;
use palisade_model::Meta;
use palisade_model::Pattern;
use palisade_model::PrivilegesEvaluationContext;
use palisade_model::PrivilegesEvaluationResult;
use palisade_model::ResourceId;
use palisade_model::Role;
use palisade_model::result::EvaluationError;
use palisade_model::role::IndexPatternSpec;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;

/// Estimated fixed bookkeeping bytes per `(action, resource, role)` entry.
/// The estimate only needs to grow monotonically with the real footprint.
const ENTRY_OVERHEAD_BYTES: u64 = 64;

type ActionResourceRoles = HashMap<Action, HashMap<String, BTreeSet<String>>>;

/// Incremental size accounting against the configured heap budget.
struct HeapBudget {
    limit_bytes: u64,
    used_bytes: u64,
    exhausted: bool,
}

impl HeapBudget {
    fn new(limit_bytes: u64) -> Self {
        Self {
            limit_bytes,
            used_bytes: 0,
            exhausted: false,
        }
    }

    /// Account for one entry. Return `false` once the budget is spent;
    /// from then on all further grant entries are declined.
    fn admit(&mut self, entry_bytes: u64) -> bool {
        if self.exhausted {
            return false;
        }
        if self.used_bytes + entry_bytes > self.limit_bytes {
            self.exhausted = true;
            log::warn!(
                "Stateful permission index exceeds the configured budget of {} bytes. Remaining roles fall back to pattern evaluation.",
                self.limit_bytes
            );
            return false;
        }
        self.used_bytes += entry_bytes;
        true
    }
}

fn entry_estimate(action: &Action, resource: &str, role: &str) -> u64 {
    (action.name().len() + resource.len() + role.len()) as u64 + ENTRY_OVERHEAD_BYTES
}

fn insert_entry(
    map: &mut ActionResourceRoles,
    budget: &mut HeapBudget,
    action: &Action,
    resource: &str,
    role: &str,
) {
    if !budget.admit(entry_estimate(action, resource, role)) {
        return;
    }
    map.entry(action.clone())
        .or_default()
        .entry(resource.to_string())
        .or_default()
        .insert(role.to_string());
}

#[cfg(test)]
fn roles_containing(map: &ActionResourceRoles, action: &Action, resource: &str) -> bool {
    map.get(action)
        .and_then(|by_resource| by_resource.get(resource))
        .is_some()
}

fn any_mapped_role(
    map: &ActionResourceRoles,
    action: &Action,
    resource: &str,
    mapped_roles: &BTreeSet<String>,
) -> bool {
    map.get(action)
        .and_then(|by_resource| by_resource.get(resource))
        .is_some_and(|roles| mapped_roles.iter().any(|role| roles.contains(role)))
}

/** Precomputed `action -> resource name -> roles` tables for the current
metadata snapshot.

Built once per metadata version from every permission block whose index
pattern is constant (not wildcard, not templated, not blank), resolved
eagerly against the live resource names. Wildcard and dynamic patterns
stay on the pattern evaluation path. The structure is replaced wholesale
on rebuild, never mutated.

Only complete coverage produces a result: an incomplete lookup leaves the
partially filled check table for the pattern phases to finish, so entries
missing here (including those dropped by the heap budget) cost latency,
never correctness.
*/
pub struct StatefulPermissions {
    action_to_index_to_roles: ActionResourceRoles,
    action_to_alias_to_roles: ActionResourceRoles,
    action_to_data_stream_to_roles: ActionResourceRoles,
    excluded_action_to_index_to_roles: ActionResourceRoles,
    roles_with_templated_exclusions: BTreeSet<String>,
    universally_denied_indices: Pattern,
    meta_version: u64,
    estimated_size_bytes: u64,
    truncated: bool,
    initialization_errors: Vec<EvaluationError>,
}

impl StatefulPermissions {
    /// Build the precomputed tables for the given metadata snapshot.
    pub fn new(
        roles: &BTreeMap<String, Role>,
        action_groups: &FlattenedActionGroups,
        actions: &Actions,
        meta: &Meta,
        universally_denied_indices: Pattern,
        max_heap_size_bytes: u64,
    ) -> Self {
        let mut action_to_index_to_roles = ActionResourceRoles::new();
        let mut action_to_alias_to_roles = ActionResourceRoles::new();
        let mut action_to_data_stream_to_roles = ActionResourceRoles::new();
        let mut excluded_action_to_index_to_roles = ActionResourceRoles::new();
        let mut roles_with_templated_exclusions = BTreeSet::new();
        let mut initialization_errors = Vec::new();
        let mut budget = HeapBudget::new(max_heap_size_bytes);

        for (role_name, role) in roles {
            let result = Self::compile_role(
                role_name,
                role,
                action_groups,
                actions,
                meta,
                &mut budget,
                &mut action_to_index_to_roles,
                &mut action_to_alias_to_roles,
                &mut action_to_data_stream_to_roles,
                &mut excluded_action_to_index_to_roles,
                &mut roles_with_templated_exclusions,
            );
            if let Err(e) = result {
                log::error!(
                    "Invalid pattern in role '{role_name}'. This should have been caught before. Ignoring role: {e}"
                );
                initialization_errors.push(
                    EvaluationError::new("Invalid pattern in role")
                        .for_role(role_name)
                        .caused_by(&e),
                );
            }
        }
        Self {
            action_to_index_to_roles,
            action_to_alias_to_roles,
            action_to_data_stream_to_roles,
            excluded_action_to_index_to_roles,
            roles_with_templated_exclusions,
            universally_denied_indices,
            meta_version: meta.version(),
            estimated_size_bytes: budget.used_bytes,
            truncated: budget.exhausted,
            initialization_errors,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn compile_role(
        role_name: &str,
        role: &Role,
        action_groups: &FlattenedActionGroups,
        actions: &Actions,
        meta: &Meta,
        budget: &mut HeapBudget,
        action_to_index_to_roles: &mut ActionResourceRoles,
        action_to_alias_to_roles: &mut ActionResourceRoles,
        action_to_data_stream_to_roles: &mut ActionResourceRoles,
        excluded_action_to_index_to_roles: &mut ActionResourceRoles,
        roles_with_templated_exclusions: &mut BTreeSet<String>,
    ) -> Result<(), AuthzError> {
        // Exclusions are never budget gated: a dropped exclusion entry
        // could turn into an unintended grant.
        for block in &role.exclude_index_permissions {
            let spec = IndexPatternSpec::parse(&block.index_patterns)?;
            if spec.pattern().is_wildcard() {
                // Handled by the static IndexPermissionExclusions object.
                continue;
            }
            if !spec.is_constant() {
                // Templated exclusions cannot be precomputed; mark the
                // role so lookups bail out to the pattern path.
                roles_with_templated_exclusions.insert(role_name.to_string());
                continue;
            }
            if spec.pattern().is_blank() {
                continue;
            }
            for action in Self::expand_actions(&block.actions, action_groups, actions)? {
                for index_name in spec
                    .pattern()
                    .iterate_matching(meta.index_names(), |name| name)
                {
                    excluded_action_to_index_to_roles
                        .entry(action.clone())
                        .or_default()
                        .entry(index_name.to_string())
                        .or_default()
                        .insert(role_name.to_string());
                }
            }
        }

        for block in &role.index_permissions {
            let spec = IndexPatternSpec::parse(&block.index_patterns)?;
            if !Self::precomputable(&spec) {
                continue;
            }
            for action in Self::expand_actions(&block.allowed_actions, action_groups, actions)? {
                for index_name in spec
                    .pattern()
                    .iterate_matching(meta.index_names(), |name| name)
                {
                    insert_entry(action_to_index_to_roles, budget, &action, index_name, role_name);
                }
            }
        }

        for block in &role.alias_permissions {
            let spec = IndexPatternSpec::parse(&block.index_patterns)?;
            if !Self::precomputable(&spec) {
                continue;
            }
            for action in Self::expand_actions(&block.allowed_actions, action_groups, actions)? {
                for alias_name in spec
                    .pattern()
                    .iterate_matching(meta.alias_names(), |name| name)
                {
                    insert_entry(action_to_alias_to_roles, budget, &action, alias_name, role_name);
                    // Alias grants carry down to the current members.
                    for member in meta.alias_members(alias_name) {
                        if member.is_data_stream() {
                            insert_entry(
                                action_to_data_stream_to_roles,
                                budget,
                                &action,
                                member.name(),
                                role_name,
                            );
                        }
                        for index_name in
                            meta.resolve_deep_to_names(&member, AliasResolutionMode::Normal)
                        {
                            insert_entry(
                                action_to_index_to_roles,
                                budget,
                                &action,
                                &index_name,
                                role_name,
                            );
                        }
                    }
                }
            }
        }

        for block in &role.data_stream_permissions {
            let spec = IndexPatternSpec::parse(&block.index_patterns)?;
            if !Self::precomputable(&spec) {
                continue;
            }
            for action in Self::expand_actions(&block.allowed_actions, action_groups, actions)? {
                for data_stream_name in spec
                    .pattern()
                    .iterate_matching(meta.data_stream_names(), |name| name)
                {
                    insert_entry(
                        action_to_data_stream_to_roles,
                        budget,
                        &action,
                        data_stream_name,
                        role_name,
                    );
                }
            }
        }
        Ok(())
    }

    /// Wildcard patterns are handled by the static wildcard tier and
    /// dynamic patterns cannot be precomputed.
    fn precomputable(spec: &IndexPatternSpec) -> bool {
        spec.is_constant() && !spec.pattern().is_wildcard() && !spec.pattern().is_blank()
    }

    /// Expand permission entries into the well known actions they cover.
    fn expand_actions(
        permissions: &[String],
        action_groups: &FlattenedActionGroups,
        actions: &Actions,
    ) -> Result<Vec<Action>, AuthzError> {
        let mut expanded = Vec::new();
        for permission in &action_groups.resolve(permissions) {
            if Pattern::is_constant(permission) {
                let action = actions.get(permission);
                if action.is_well_known() {
                    expanded.push(action);
                }
            } else {
                let pattern = Pattern::create(permission)?;
                for action in actions.index_actions() {
                    if pattern.matches(action.name()) {
                        expanded.push(action.clone());
                    }
                }
            }
        }
        Ok(expanded)
    }

    /// Return `true` if the fast path may serve this action set at all.
    pub fn applicable(actions: &BTreeSet<Action>) -> bool {
        actions
            .iter()
            .all(|action| action.is_well_known() && action.is_performance_critical())
    }

    /// Return the metadata version the tables were built against.
    pub fn meta_version(&self) -> u64 {
        self.meta_version
    }

    /// Return the incremental size estimate of the tables.
    pub fn estimated_size_bytes(&self) -> u64 {
        self.estimated_size_bytes
    }

    /// Return `true` if the heap budget cut the tables short.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Return the role attributed errors recorded while building.
    pub fn initialization_errors(&self) -> &[EvaluationError] {
        &self.initialization_errors
    }

    fn is_excluded(
        &self,
        action: &Action,
        resource_name: &str,
        mapped_roles: &BTreeSet<String>,
    ) -> bool {
        if self.universally_denied_indices.matches(resource_name) {
            return true;
        }
        any_mapped_role(
            &self.excluded_action_to_index_to_roles,
            action,
            resource_name,
            mapped_roles,
        )
    }

    /** Check the given concrete indices against the precomputed index
    table. Cells of granted (and not excluded) pairs are checked in
    `check_table` as a side effect; `Some(OK)` is only returned when that
    completes the whole table. */
    pub fn has_index_permission(
        &self,
        context: &PrivilegesEvaluationContext,
        actions: &BTreeSet<Action>,
        indices: &BTreeSet<ResourceId>,
        check_table: &mut CheckTable<ResourceId, Action>,
    ) -> Option<PrivilegesEvaluationResult> {
        if indices.is_empty() || !Self::applicable(actions) {
            return None;
        }
        let mapped_roles = context.mapped_roles();
        if mapped_roles
            .iter()
            .any(|role| self.roles_with_templated_exclusions.contains(role))
        {
            // Templated exclusions cannot be evaluated here.
            return None;
        }
        for action in actions {
            for index in indices {
                if any_mapped_role(&self.action_to_index_to_roles, action, index.name(), mapped_roles)
                    && !self.is_excluded(action, index.name(), mapped_roles)
                    && check_table.check(index, action)
                {
                    return Some(PrivilegesEvaluationResult::ok());
                }
            }
        }
        if check_table.is_complete() {
            Some(PrivilegesEvaluationResult::ok())
        } else {
            None
        }
    }

    /// Check the given aliases against the precomputed alias table.
    /// Mirrors [Self::has_index_permission].
    pub fn has_alias_permission(
        &self,
        context: &PrivilegesEvaluationContext,
        actions: &BTreeSet<Action>,
        aliases: &BTreeSet<ResourceId>,
        check_table: &mut CheckTable<ResourceId, Action>,
    ) -> Option<PrivilegesEvaluationResult> {
        self.has_collection_permission(
            &self.action_to_alias_to_roles,
            context,
            actions,
            aliases,
            check_table,
        )
    }

    /// Check the given data streams against the precomputed data stream
    /// table. Mirrors [Self::has_index_permission].
    pub fn has_data_stream_permission(
        &self,
        context: &PrivilegesEvaluationContext,
        actions: &BTreeSet<Action>,
        data_streams: &BTreeSet<ResourceId>,
        check_table: &mut CheckTable<ResourceId, Action>,
    ) -> Option<PrivilegesEvaluationResult> {
        self.has_collection_permission(
            &self.action_to_data_stream_to_roles,
            context,
            actions,
            data_streams,
            check_table,
        )
    }

    fn has_collection_permission(
        &self,
        map: &ActionResourceRoles,
        context: &PrivilegesEvaluationContext,
        actions: &BTreeSet<Action>,
        resources: &BTreeSet<ResourceId>,
        check_table: &mut CheckTable<ResourceId, Action>,
    ) -> Option<PrivilegesEvaluationResult> {
        if resources.is_empty() || !Self::applicable(actions) {
            return None;
        }
        let mapped_roles = context.mapped_roles();
        for action in actions {
            for resource in resources {
                if any_mapped_role(map, action, resource.name(), mapped_roles)
                    && !self.universally_denied_indices.matches(resource.name())
                    && check_table.check(resource, action)
                {
                    return Some(PrivilegesEvaluationResult::ok());
                }
            }
        }
        if check_table.is_complete() {
            Some(PrivilegesEvaluationResult::ok())
        } else {
            None
        }
    }

    /// Return `true` if the table carries an entry for the pair,
    /// regardless of roles. Exposed for equivalence testing.
    #[cfg(test)]
    pub fn has_any_entry(&self, action: &Action, index_name: &str) -> bool {
        roles_containing(&self.action_to_index_to_roles, action, index_name)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use palisade_model::User;
    use palisade_model::role::IndexPermissionsBlock;
    use std::sync::Arc;

    fn role_with_index_block(patterns: &[&str], allowed_actions: &[&str]) -> Role {
        Role {
            index_permissions: vec![IndexPermissionsBlock {
                index_patterns: patterns.iter().map(ToString::to_string).collect(),
                allowed_actions: allowed_actions.iter().map(ToString::to_string).collect(),
                ..IndexPermissionsBlock::default()
            }],
            ..Role::default()
        }
    }

    fn sample_meta() -> Arc<Meta> {
        Meta::builder()
            .version(1)
            .indices(&["logs-2024", "logs-2025", "metrics-2024"])
            .alias("sales-alias", &["sales-1", "sales-2"])
            .data_stream("ds-web", &[".ds-web-000001"])
            .build()
    }

    fn build(
        roles: Vec<(&str, Role)>,
        meta: &Meta,
        max_heap_size_bytes: u64,
    ) -> StatefulPermissions {
        let role_map: BTreeMap<String, Role> = roles
            .into_iter()
            .map(|(name, role)| (name.to_string(), role))
            .collect();
        StatefulPermissions::new(
            &role_map,
            &FlattenedActionGroups::empty(),
            &Actions::default_catalog(),
            meta,
            Pattern::blank(),
            max_heap_size_bytes,
        )
    }

    fn context() -> PrivilegesEvaluationContext {
        PrivilegesEvaluationContext::new(User::new("jdoe"), ["r1".to_string()].into())
    }

    #[test]
    fn literal_patterns_are_precomputed_per_index() {
        let meta = sample_meta();
        let stateful = build(
            vec![(
                "r1",
                role_with_index_block(&["logs-*"], &["indices:data/read/search"]),
            )],
            &meta,
            u64::MAX,
        );
        let actions = Actions::default_catalog();
        let search = actions.get("indices:data/read/search");
        assert!(stateful.has_any_entry(&search, "logs-2024"));
        assert!(stateful.has_any_entry(&search, "logs-2025"));
        assert!(!stateful.has_any_entry(&search, "metrics-2024"));
    }

    #[test]
    fn wildcard_and_templated_patterns_are_skipped() {
        let meta = sample_meta();
        let stateful = build(
            vec![
                (
                    "r1",
                    role_with_index_block(&["*"], &["indices:data/read/search"]),
                ),
                (
                    "r2",
                    role_with_index_block(
                        &["${user.attrs.department}-*"],
                        &["indices:data/read/search"],
                    ),
                ),
            ],
            &meta,
            u64::MAX,
        );
        let actions = Actions::default_catalog();
        let search = actions.get("indices:data/read/search");
        assert!(!stateful.has_any_entry(&search, "logs-2024"));
        assert_eq!(stateful.estimated_size_bytes(), 0);
    }

    #[test]
    fn complete_lookup_returns_ok() {
        let meta = sample_meta();
        let stateful = build(
            vec![(
                "r1",
                role_with_index_block(&["logs-*"], &["indices:data/read/search"]),
            )],
            &meta,
            u64::MAX,
        );
        let actions = Actions::default_catalog();
        let search = actions.get("indices:data/read/search");
        let rows: BTreeSet<ResourceId> = [ResourceId::index("logs-2024")].into();
        let action_set: BTreeSet<Action> = [search.clone()].into();
        let mut table = CheckTable::new(rows.iter().cloned(), [search.clone()]);
        let result =
            stateful.has_index_permission(&context(), &action_set, &rows, &mut table);
        assert!(result.unwrap().is_ok());
    }

    #[test]
    fn incomplete_lookup_leaves_partial_table_for_the_pattern_path() {
        let meta = sample_meta();
        let stateful = build(
            vec![(
                "r1",
                role_with_index_block(&["logs-*"], &["indices:data/read/search"]),
            )],
            &meta,
            u64::MAX,
        );
        let actions = Actions::default_catalog();
        let search = actions.get("indices:data/read/search");
        let rows: BTreeSet<ResourceId> = [
            ResourceId::index("logs-2024"),
            ResourceId::index("metrics-2024"),
        ]
        .into();
        let action_set: BTreeSet<Action> = [search.clone()].into();
        let mut table = CheckTable::new(rows.iter().cloned(), [search.clone()]);
        let result =
            stateful.has_index_permission(&context(), &action_set, &rows, &mut table);
        assert!(result.is_none());
        assert!(table.is_checked(&ResourceId::index("logs-2024"), &search));
        assert!(!table.is_checked(&ResourceId::index("metrics-2024"), &search));
    }

    #[test]
    fn non_performance_critical_actions_are_not_applicable() {
        let actions = Actions::default_catalog();
        let create: BTreeSet<Action> = [actions.get("indices:admin/create")].into();
        assert!(!StatefulPermissions::applicable(&create));
        let search: BTreeSet<Action> = [actions.get("indices:data/read/search")].into();
        assert!(StatefulPermissions::applicable(&search));
    }

    #[test]
    fn alias_grants_carry_down_to_members() {
        let meta = sample_meta();
        let role = Role {
            alias_permissions: vec![IndexPermissionsBlock {
                index_patterns: vec!["sales-alias".to_string()],
                allowed_actions: vec!["indices:data/read/search".to_string()],
                ..IndexPermissionsBlock::default()
            }],
            ..Role::default()
        };
        let stateful = build(vec![("r1", role)], &meta, u64::MAX);
        let actions = Actions::default_catalog();
        let search = actions.get("indices:data/read/search");
        assert!(stateful.has_any_entry(&search, "sales-1"));
        assert!(stateful.has_any_entry(&search, "sales-2"));
        let rows: BTreeSet<ResourceId> = [ResourceId::alias("sales-alias")].into();
        let action_set: BTreeSet<Action> = [search.clone()].into();
        let mut table = CheckTable::new(rows.iter().cloned(), [search.clone()]);
        assert!(
            stateful
                .has_alias_permission(&context(), &action_set, &rows, &mut table)
                .unwrap()
                .is_ok()
        );
    }

    #[test]
    fn exhausted_budget_truncates_but_keeps_exclusions() {
        let meta = sample_meta();
        let granting = role_with_index_block(&["logs-*"], &["indices:data/read/search"]);
        let excluding = Role {
            exclude_index_permissions: vec![palisade_model::role::ExcludeIndexBlock {
                index_patterns: vec!["logs-2025".to_string()],
                actions: vec!["indices:data/read/search".to_string()],
            }],
            ..Role::default()
        };
        let stateful = build(vec![("r1", granting), ("r2", excluding)], &meta, 1);
        assert!(stateful.is_truncated());
        let actions = Actions::default_catalog();
        let search = actions.get("indices:data/read/search");
        // Grant entries were dropped, exclusion entries were not.
        assert!(!stateful.has_any_entry(&search, "logs-2024"));
        assert!(stateful.is_excluded(
            &search,
            "logs-2025",
            &["r2".to_string()].into()
        ));
    }

    #[test]
    fn stateful_lookup_honors_exclusions() {
        let meta = sample_meta();
        let granting = role_with_index_block(&["logs-*"], &["indices:data/read/search"]);
        let excluding = Role {
            exclude_index_permissions: vec![palisade_model::role::ExcludeIndexBlock {
                index_patterns: vec!["logs-2025".to_string()],
                actions: vec!["indices:data/read/search".to_string()],
            }],
            ..Role::default()
        };
        let stateful = build(vec![("r1", granting), ("r2", excluding)], &meta, u64::MAX);
        let actions = Actions::default_catalog();
        let search = actions.get("indices:data/read/search");
        let context = PrivilegesEvaluationContext::new(
            User::new("jdoe"),
            ["r1".to_string(), "r2".to_string()].into(),
        );
        let rows: BTreeSet<ResourceId> = [ResourceId::index("logs-2025")].into();
        let action_set: BTreeSet<Action> = [search.clone()].into();
        let mut table = CheckTable::new(rows.iter().cloned(), [search.clone()]);
        let result = stateful.has_index_permission(&context, &action_set, &rows, &mut table);
        assert!(result.is_none());
        assert!(table.is_blank());
    }
}
