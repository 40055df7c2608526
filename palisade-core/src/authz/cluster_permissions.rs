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

//! Compiled cluster permission lookup structures.

use palisade_model::Action;
use palisade_model::Actions;
use palisade_model::AuthzError;
use palisade_model::FlattenedActionGroups;
use palisade_model::Pattern;
use palisade_model::PrivilegesEvaluationResult;
use palisade_model::Role;
use palisade_model::result::EvaluationError;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;

/// Return `true` if `permission` follows the `prefix:operation` action
/// name convention (as opposed to an action group reference that failed
/// to resolve).
fn is_action_name(permission: &str) -> bool {
    permission.contains(':')
}

/// The per role portion of the compiled structures. Merged into the
/// shared maps only when the whole role compiled, so a broken role never
/// contributes partially.
struct CompiledRoleEntries {
    wildcard: bool,
    exact_actions: Vec<Action>,
    action_pattern: Option<Pattern>,
}

/** Compiled cluster permissions of all roles.

One scan over the role configuration builds an exact `action -> roles`
map for well known actions, the set of roles granting `*` without
exclusions, and a per role action pattern retained for non well known
action names. Roles that fail to compile are recorded and grant nothing.
*/
pub struct ClusterPermissions {
    action_to_roles: HashMap<Action, BTreeSet<String>>,
    roles_with_wildcard_permissions: BTreeSet<String>,
    roles_to_action_pattern: HashMap<String, Pattern>,
    initialization_errors: Vec<EvaluationError>,
}

impl ClusterPermissions {
    /// Compile the cluster permissions of all roles.
    pub fn new(
        roles: &BTreeMap<String, Role>,
        action_groups: &FlattenedActionGroups,
        actions: &Actions,
    ) -> Self {
        let mut action_to_roles: HashMap<Action, BTreeSet<String>> = HashMap::new();
        let mut roles_with_wildcard_permissions = BTreeSet::new();
        let mut roles_to_action_pattern = HashMap::new();
        let mut initialization_errors = Vec::new();
        for (role_name, role) in roles {
            match Self::compile_role(role, action_groups, actions) {
                Ok(compiled) => {
                    if compiled.wildcard {
                        roles_with_wildcard_permissions.insert(role_name.clone());
                    }
                    for action in compiled.exact_actions {
                        action_to_roles
                            .entry(action)
                            .or_default()
                            .insert(role_name.clone());
                    }
                    if let Some(pattern) = compiled.action_pattern {
                        roles_to_action_pattern.insert(role_name.clone(), pattern);
                    }
                }
                Err(e) => {
                    log::error!(
                        "Invalid cluster permissions in role '{role_name}'. This should have been caught before. Ignoring role: {e}"
                    );
                    initialization_errors.push(
                        EvaluationError::new("Invalid pattern in role")
                            .for_role(role_name)
                            .caused_by(&e),
                    );
                }
            }
        }
        if !initialization_errors.is_empty() {
            log::warn!(
                "Cluster permissions are only partially initialized. {} role(s) were skipped.",
                initialization_errors.len()
            );
        }
        Self {
            action_to_roles,
            roles_with_wildcard_permissions,
            roles_to_action_pattern,
            initialization_errors,
        }
    }

    fn compile_role(
        role: &Role,
        action_groups: &FlattenedActionGroups,
        actions: &Actions,
    ) -> Result<CompiledRoleEntries, AuthzError> {
        let permissions = action_groups.resolve(&role.cluster_permissions);
        let excluded_permissions = action_groups.resolve(&role.exclude_cluster_permissions);
        let excluded_expressions = excluded_permissions.iter().collect::<Vec<_>>();
        let excluded_pattern = Pattern::create_many(&excluded_expressions)?;
        if permissions.contains("*") && excluded_permissions.is_empty() {
            return Ok(CompiledRoleEntries {
                wildcard: true,
                exact_actions: Vec::new(),
                action_pattern: None,
            });
        }
        let mut exact_actions = Vec::new();
        let mut patterns = Vec::new();
        for permission in &permissions {
            if Pattern::is_constant(permission) {
                if !excluded_pattern.matches(permission) && is_action_name(permission) {
                    exact_actions.push(actions.get(permission));
                }
            } else {
                let pattern = Pattern::create(permission)?;
                for action in actions.cluster_actions() {
                    if pattern.matches(action.name()) && !excluded_pattern.matches(action.name()) {
                        exact_actions.push(action.clone());
                    }
                }
                patterns.push(pattern);
            }
        }
        let action_pattern = if patterns.is_empty() {
            None
        } else {
            Some(Pattern::join(patterns).excluding(excluded_pattern))
        };
        Ok(CompiledRoleEntries {
            wildcard: false,
            exact_actions,
            action_pattern,
        })
    }

    /// Return whether any of `mapped_roles` grants `action`.
    pub fn contains(
        &self,
        action: &Action,
        mapped_roles: &BTreeSet<String>,
    ) -> PrivilegesEvaluationResult {
        if mapped_roles
            .iter()
            .any(|role| self.roles_with_wildcard_permissions.contains(role))
        {
            return PrivilegesEvaluationResult::ok();
        }
        if let Some(roles_with_privileges) = self.action_to_roles.get(action) {
            if mapped_roles
                .iter()
                .any(|role| roles_with_privileges.contains(role))
            {
                return PrivilegesEvaluationResult::ok();
            }
        }
        if !action.is_well_known() {
            // Well known actions are guaranteed to be in the maps above.
            for role in mapped_roles {
                if let Some(pattern) = self.roles_to_action_pattern.get(role) {
                    if pattern.matches(action.name()) {
                        return PrivilegesEvaluationResult::ok();
                    }
                }
            }
        }
        PrivilegesEvaluationResult::insufficient()
            .with_errors(self.initialization_errors.clone())
            .missing_privileges(action)
    }
}

/** Compiled cluster permission exclusions of all roles.

Queried before the grant structures; a non pending outcome means the
action is denied no matter what any other role grants.
*/
pub struct ClusterPermissionExclusions {
    action_to_roles: HashMap<Action, BTreeSet<String>>,
    roles_to_action_pattern: HashMap<String, Pattern>,
    initialization_errors: Vec<EvaluationError>,
}

impl ClusterPermissionExclusions {
    /// Compile the cluster permission exclusions of all roles.
    pub fn new(
        roles: &BTreeMap<String, Role>,
        action_groups: &FlattenedActionGroups,
        actions: &Actions,
    ) -> Self {
        let mut action_to_roles: HashMap<Action, BTreeSet<String>> = HashMap::new();
        let mut roles_to_action_pattern = HashMap::new();
        let mut initialization_errors = Vec::new();
        for (role_name, role) in roles {
            match Self::compile_role(role, action_groups, actions) {
                Ok((exact_actions, action_pattern)) => {
                    for action in exact_actions {
                        action_to_roles
                            .entry(action)
                            .or_default()
                            .insert(role_name.clone());
                    }
                    if let Some(pattern) = action_pattern {
                        roles_to_action_pattern.insert(role_name.clone(), pattern);
                    }
                }
                Err(e) => {
                    log::error!(
                        "Invalid cluster permission exclusions in role '{role_name}'. This should have been caught before. Ignoring role: {e}"
                    );
                    initialization_errors.push(
                        EvaluationError::new("Invalid pattern in role")
                            .for_role(role_name)
                            .caused_by(&e),
                    );
                }
            }
        }
        Self {
            action_to_roles,
            roles_to_action_pattern,
            initialization_errors,
        }
    }

    fn compile_role(
        role: &Role,
        action_groups: &FlattenedActionGroups,
        actions: &Actions,
    ) -> Result<(Vec<Action>, Option<Pattern>), AuthzError> {
        let permissions = action_groups.resolve(&role.exclude_cluster_permissions);
        let mut exact_actions = Vec::new();
        let mut patterns = Vec::new();
        for permission in &permissions {
            if Pattern::is_constant(permission) {
                exact_actions.push(actions.get(permission));
            } else {
                let pattern = Pattern::create(permission)?;
                for action in actions.cluster_actions() {
                    if pattern.matches(action.name()) {
                        exact_actions.push(action.clone());
                    }
                }
                patterns.push(pattern);
            }
        }
        let action_pattern = if patterns.is_empty() {
            None
        } else {
            Some(Pattern::join(patterns))
        };
        Ok((exact_actions, action_pattern))
    }

    /// Return whether any of `mapped_roles` excludes `action`. Denial
    /// always wins over any grant in other roles.
    pub fn contains(
        &self,
        action: &Action,
        mapped_roles: &BTreeSet<String>,
    ) -> PrivilegesEvaluationResult {
        if let Some(roles_with_exclusion) = self.action_to_roles.get(action) {
            let excluding = mapped_roles
                .iter()
                .filter(|role| roles_with_exclusion.contains(*role))
                .cloned()
                .collect::<Vec<_>>();
            if !excluding.is_empty() {
                return PrivilegesEvaluationResult::insufficient().reason(format!(
                    "Privilege exclusion in role(s) {}",
                    excluding.join(", ")
                ));
            }
        }
        if !action.is_well_known() {
            // Well known actions are guaranteed to be in the map above.
            for role in mapped_roles {
                if let Some(pattern) = self.roles_to_action_pattern.get(role) {
                    if pattern.matches(action.name()) {
                        return PrivilegesEvaluationResult::insufficient()
                            .reason(format!("Privilege exclusion in role {role}"));
                    }
                }
            }
        }
        PrivilegesEvaluationResult::pending().with_errors(self.initialization_errors.clone())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use palisade_model::EvaluationStatus;
    use std::collections::BTreeMap;

    fn role_with_cluster_permissions(permissions: &[&str]) -> Role {
        Role {
            cluster_permissions: permissions.iter().map(ToString::to_string).collect(),
            ..Role::default()
        }
    }

    fn roles(entries: Vec<(&str, Role)>) -> BTreeMap<String, Role> {
        entries
            .into_iter()
            .map(|(name, role)| (name.to_string(), role))
            .collect()
    }

    #[test]
    fn pattern_grant_covers_matching_actions_only() {
        let actions = Actions::default_catalog();
        let cluster = ClusterPermissions::new(
            &roles(vec![(
                "r1",
                role_with_cluster_permissions(&["cluster:monitor/*"]),
            )]),
            &FlattenedActionGroups::empty(),
            &actions,
        );
        let mapped = ["r1".to_string()].into();
        assert!(
            cluster
                .contains(&actions.get("cluster:monitor/health"), &mapped)
                .is_ok()
        );
        assert_eq!(
            cluster
                .contains(&actions.get("cluster:admin/repository/put"), &mapped)
                .get_status(),
            EvaluationStatus::Insufficient
        );
    }

    #[test]
    fn wildcard_grants_registered_and_unregistered_actions() {
        let actions = Actions::default_catalog();
        let cluster = ClusterPermissions::new(
            &roles(vec![("admin", role_with_cluster_permissions(&["*"]))]),
            &FlattenedActionGroups::empty(),
            &actions,
        );
        let mapped = ["admin".to_string()].into();
        for action in actions.cluster_actions() {
            assert!(cluster.contains(action, &mapped).is_ok());
        }
        assert!(
            cluster
                .contains(&actions.get("cluster:admin/never/registered"), &mapped)
                .is_ok()
        );
    }

    #[test]
    fn pattern_grant_covers_non_well_known_actions() {
        let actions = Actions::default_catalog();
        let cluster = ClusterPermissions::new(
            &roles(vec![(
                "r1",
                role_with_cluster_permissions(&["cluster:monitor/*"]),
            )]),
            &FlattenedActionGroups::empty(),
            &actions,
        );
        let mapped = ["r1".to_string()].into();
        assert!(
            cluster
                .contains(&actions.get("cluster:monitor/brand/new"), &mapped)
                .is_ok()
        );
    }

    #[test]
    fn broken_role_is_skipped_and_grants_nothing() {
        let actions = Actions::default_catalog();
        let cluster = ClusterPermissions::new(
            &roles(vec![
                ("broken", role_with_cluster_permissions(&["/cluster:[/"])),
                (
                    "working",
                    role_with_cluster_permissions(&["cluster:monitor/*"]),
                ),
            ]),
            &FlattenedActionGroups::empty(),
            &actions,
        );
        assert_eq!(cluster.initialization_errors.len(), 1);
        assert_eq!(cluster.initialization_errors[0].role(), Some("broken"));
        let broken_only = ["broken".to_string()].into();
        let result = cluster.contains(&actions.get("cluster:monitor/health"), &broken_only);
        assert_eq!(result.get_status(), EvaluationStatus::Insufficient);
        assert!(result.has_errors());
        let working = ["working".to_string()].into();
        assert!(
            cluster
                .contains(&actions.get("cluster:monitor/health"), &working)
                .is_ok()
        );
    }

    #[test]
    fn exclusion_dominates_explicit_grant() {
        let actions = Actions::default_catalog();
        let excluding_role = Role {
            exclude_cluster_permissions: vec!["palisade:*".to_string()],
            ..Role::default()
        };
        let granting_role = role_with_cluster_permissions(&["palisade:config/update"]);
        let role_map = roles(vec![("r4", excluding_role), ("r5", granting_role)]);
        let exclusions =
            ClusterPermissionExclusions::new(&role_map, &FlattenedActionGroups::empty(), &actions);
        let mapped = ["r4".to_string(), "r5".to_string()].into();
        let result = exclusions.contains(&actions.get("palisade:config/update"), &mapped);
        assert_eq!(result.get_status(), EvaluationStatus::Insufficient);
        assert!(result.get_reason().unwrap().contains("r4"));
    }

    #[test]
    fn exclusions_stay_pending_without_a_match() {
        let actions = Actions::default_catalog();
        let exclusions = ClusterPermissionExclusions::new(
            &roles(vec![("r1", Role::default())]),
            &FlattenedActionGroups::empty(),
            &actions,
        );
        let mapped = ["r1".to_string()].into();
        assert!(
            exclusions
                .contains(&actions.get("cluster:monitor/health"), &mapped)
                .is_pending()
        );
    }

    #[test]
    fn wildcard_with_exclusions_is_not_a_wildcard_grant() {
        let actions = Actions::default_catalog();
        let role = Role {
            cluster_permissions: vec!["*".to_string()],
            exclude_cluster_permissions: vec!["cluster:admin/*".to_string()],
            ..Role::default()
        };
        let cluster = ClusterPermissions::new(
            &roles(vec![("r1", role)]),
            &FlattenedActionGroups::empty(),
            &actions,
        );
        let mapped = ["r1".to_string()].into();
        assert_eq!(
            cluster
                .contains(&actions.get("cluster:admin/reroute"), &mapped)
                .get_status(),
            EvaluationStatus::Insufficient
        );
        assert!(
            cluster
                .contains(&actions.get("cluster:monitor/health"), &mapped)
                .is_ok()
        );
    }
}
