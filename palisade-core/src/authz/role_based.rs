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

//! Role based privilege evaluation over cluster, index and tenant scopes.

use super::cluster_permissions::ClusterPermissionExclusions;
use super::cluster_permissions::ClusterPermissions;
use super::index_permissions::IndexPermissionExclusions;
use super::index_permissions::IndexPermissions;
use super::refresher::MetadataSource;
use super::refresher::StatefulRefresher;
use super::tenant_permissions::TenantPermissions;
use crate::conf::AuthzConfig;
use crate::conf::StatefulConfig;
use palisade_model::Action;
use palisade_model::ActionScope;
use palisade_model::Actions;
use palisade_model::AuthzError;
use palisade_model::AuthzErrorKind;
use palisade_model::CheckList;
use palisade_model::CheckTable;
use palisade_model::Meta;
use palisade_model::Pattern;
use palisade_model::PrivilegesEvaluationContext;
use palisade_model::PrivilegesEvaluationResult;
use palisade_model::ResolvedIndices;
use palisade_model::ResourceId;
use palisade_model::Role;
use palisade_model::FlattenedActionGroups;
use palisade_model::meta::ResourceKind;
use palisade_model::result::EvaluationError;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

/// The tenant identifier addressing the user's private tenant.
const USER_TENANT: &str = "__user__";
/// The tenant identifier addressing the shared global tenant.
const GLOBAL_TENANT_ID: &str = "global_tenant";

/** Role based action authorization.

Compiles a role configuration once into fast lookup structures and
evaluates cluster, index and tenant privilege checks against them. Index
checks run a multi phase algorithm with progressively more expensive
resource resolution; every phase writes into one shared check table and
no phase re-checks an already proven cell.
*/
pub struct RoleBasedActionAuthorization {
    actions: Arc<Actions>,
    tenants: BTreeSet<String>,
    cluster: ClusterPermissions,
    cluster_exclusions: ClusterPermissionExclusions,
    index: IndexPermissions,
    alias: IndexPermissions,
    data_stream: IndexPermissions,
    index_exclusions: IndexPermissionExclusions,
    tenant: TenantPermissions,
    universally_denied_indices: Pattern,
    authz_config: AuthzConfig,
    ignore_unauthorized_indices_actions: Pattern,
    refresher: Arc<StatefulRefresher>,
}

fn index_blocks(role: &Role) -> &[palisade_model::role::IndexPermissionsBlock] {
    &role.index_permissions
}

fn alias_blocks(role: &Role) -> &[palisade_model::role::IndexPermissionsBlock] {
    &role.alias_permissions
}

fn data_stream_blocks(role: &Role) -> &[palisade_model::role::IndexPermissionsBlock] {
    &role.data_stream_permissions
}

impl RoleBasedActionAuthorization {
    /** Compile the given role configuration.

    When `initial_meta` is provided, the stateful permission index is
    built synchronously so the first evaluations already benefit from the
    fast path. Later metadata changes are handled by
    [Self::update_stateful_index_privileges_async].
    */
    pub fn new(
        roles: BTreeMap<String, Role>,
        action_groups: FlattenedActionGroups,
        actions: Arc<Actions>,
        tenants: BTreeSet<String>,
        initial_meta: Option<&Meta>,
        authz_config: AuthzConfig,
        stateful_config: StatefulConfig,
    ) -> Result<Self, AuthzError> {
        let universally_denied_indices =
            Pattern::create_many(authz_config.universally_denied_indices())?;
        let ignore_unauthorized_indices_actions =
            Pattern::create_many(authz_config.ignore_unauthorized_indices_actions())?;
        let cluster = ClusterPermissions::new(&roles, &action_groups, &actions);
        let cluster_exclusions = ClusterPermissionExclusions::new(&roles, &action_groups, &actions);
        let index = IndexPermissions::new(&roles, &action_groups, &actions, index_blocks);
        let alias = IndexPermissions::new(&roles, &action_groups, &actions, alias_blocks);
        let data_stream =
            IndexPermissions::new(&roles, &action_groups, &actions, data_stream_blocks);
        let index_exclusions = IndexPermissionExclusions::new(&roles, &action_groups, &actions);
        let tenant = TenantPermissions::new(&roles, &action_groups, &actions, &tenants);
        let refresher = Arc::new(StatefulRefresher::new(
            Arc::new(roles),
            Arc::new(action_groups),
            Arc::clone(&actions),
            universally_denied_indices.clone(),
            stateful_config,
        ));
        if let Some(meta) = initial_meta {
            refresher.rebuild_now(meta);
        }
        log::info!("Role based action authorization initialized.");
        Ok(Self {
            actions,
            tenants,
            cluster,
            cluster_exclusions,
            index,
            alias,
            data_stream,
            index_exclusions,
            tenant,
            universally_denied_indices,
            authz_config,
            ignore_unauthorized_indices_actions,
            refresher,
        })
    }

    /// Return whether the user of `context` may perform the cluster
    /// scoped `action`. Exclusions are consulted first; an exclusion
    /// match denies no matter what other roles grant.
    pub fn has_cluster_permission(
        &self,
        context: &PrivilegesEvaluationContext,
        action: &Action,
    ) -> PrivilegesEvaluationResult {
        let required = self.actions.expand_privileges(action);
        let mut check_list = CheckList::new(required.iter().cloned());
        let mut errors = Vec::new();
        for required_action in &required {
            let exclusion = self
                .cluster_exclusions
                .contains(required_action, context.mapped_roles());
            if !exclusion.is_pending() {
                return exclusion.missing_privileges(required_action);
            }
            let granted = self.cluster.contains(required_action, context.mapped_roles());
            errors.extend(granted.get_errors().to_vec());
            if granted.is_ok() {
                check_list.check(required_action);
            }
        }
        if check_list.is_complete() {
            return PrivilegesEvaluationResult::ok().with_errors(errors);
        }
        let mut result = PrivilegesEvaluationResult::insufficient().with_errors(errors);
        for missing in check_list.unchecked_elements() {
            result = result.missing_privileges(missing);
        }
        result
    }

    /// Return whether the user of `context` may perform the tenant scoped
    /// `action` on `requested_tenant`.
    pub fn has_tenant_permission(
        &self,
        context: &PrivilegesEvaluationContext,
        action: &Action,
        requested_tenant: &str,
    ) -> PrivilegesEvaluationResult {
        let mut errors = self.tenant.initialization_errors().to_vec();
        if let Some(roles_with_privileges) = self.tenant.roles_for(action, requested_tenant) {
            if context
                .mapped_roles()
                .iter()
                .any(|role| roles_with_privileges.contains(role))
            {
                return PrivilegesEvaluationResult::ok();
            }
        }
        if !self.is_tenant_valid(requested_tenant) {
            log::info!("Invalid tenant requested: {requested_tenant}");
            return PrivilegesEvaluationResult::insufficient().reason("Invalid requested tenant");
        }
        for role in context.mapped_roles() {
            if let Some(templates) = self.tenant.tenant_templates(role, action) {
                for template in templates {
                    match context.rendered_pattern(template) {
                        Ok(pattern) => {
                            if pattern.matches(requested_tenant) {
                                return PrivilegesEvaluationResult::ok();
                            }
                        }
                        Err(e) => {
                            log::error!("Error while evaluating tenant pattern of role {role}: {e}");
                            errors.push(
                                EvaluationError::new("Error while evaluating tenant pattern")
                                    .for_role(role)
                                    .caused_by(&e),
                            );
                        }
                    }
                }
            }
        }
        PrivilegesEvaluationResult::insufficient()
            .with_errors(errors)
            .missing_privileges(action)
    }

    fn is_tenant_valid(&self, requested_tenant: &str) -> bool {
        GLOBAL_TENANT_ID == requested_tenant
            || USER_TENANT == requested_tenant
            || self.tenants.contains(requested_tenant)
    }

    /** Return whether the user of `context` may perform all
    `required_actions` on the resources of `resolved`.

    Runs the multi phase algorithm: local-all shortcut, empty-local
    shortcut, shallow check over the directly named resources, semi deep
    resolution of aliases into member data streams and finally deep
    resolution into concrete indices. Deep resolved completeness is never
    reported as plain OK since membership can drift between check and
    execution. `required_actions` must contain `primary_action` (use
    [Actions::expand_privileges]).
    */
    pub fn has_index_permission(
        &self,
        context: &PrivilegesEvaluationContext,
        primary_action: &Action,
        required_actions: &BTreeSet<Action>,
        resolved: &ResolvedIndices,
        scope: ActionScope,
    ) -> PrivilegesEvaluationResult {
        let meta = Arc::clone(resolved.local().meta());
        let mut local_errors = self.index.initialization_errors().to_vec();
        local_errors.extend(self.index_exclusions.initialization_errors().to_vec());

        if log::log_enabled!(log::Level::Trace) {
            log::trace!(
                "has_index_permission() user: {} actions: {:?} resolved: {:?}",
                context.user(),
                required_actions,
                resolved
            );
        }

        // If the request addresses all local resources, roles granting `*`
        // index patterns decide without any resource resolution.
        if resolved.is_local_all() && self.universally_denied_indices.is_blank() {
            let all_row = ResourceId::index("*");
            let mut check_table =
                CheckTable::new([all_row.clone()], required_actions.iter().cloned());
            'wildcard: for action in required_actions {
                if let Some(roles_with_privileges) =
                    self.index.roles_with_wildcard_index_privileges(action)
                {
                    if context
                        .mapped_roles()
                        .iter()
                        .any(|role| roles_with_privileges.contains(role))
                        && check_table.check(&all_row, action)
                    {
                        break 'wildcard;
                    }
                }
            }
            if check_table.is_complete()
                && !self
                    .index_exclusions
                    .contains(context.mapped_roles(), required_actions)
            {
                log::trace!("Granting local_all request on wildcard index privileges");
                return PrivilegesEvaluationResult::ok();
            }
            if !context.is_resolve_local_all() {
                let reason = if check_table.is_complete() {
                    "Privileges excluded"
                } else {
                    "Insufficient privileges"
                };
                return PrivilegesEvaluationResult::insufficient()
                    .reason(reason)
                    .with_table(check_table.map_rows(|row| row.name().to_string()))
                    .with_errors(local_errors);
            }
        }

        // Remote authorization is delegated to the remote cluster.
        if resolved.local().is_empty() {
            log::debug!("No local resources; grant the request");
            return PrivilegesEvaluationResult::ok();
        }

        // --------------------
        // Shallow checks
        // --------------------
        let shallow_rows = resolved.local().union();
        let mut shallow_table =
            CheckTable::new(shallow_rows.iter().cloned(), required_actions.iter().cloned());

        // One stateful snapshot per evaluation; a concurrent swap must not
        // produce a torn read.
        let stateful = self.refresher.snapshot();
        let stateful_usable = stateful.is_some()
            && !self
                .index_exclusions
                .contains(context.mapped_roles(), required_actions);
        if stateful_usable {
            if let Some(stateful) = &stateful {
                // Only the check table side effects are needed here; the
                // completeness decision is made after the exclusion passes.
                let _ = stateful.has_alias_permission(
                    context,
                    required_actions,
                    resolved.local().aliases(),
                    &mut shallow_table,
                );
                let _ = stateful.has_data_stream_permission(
                    context,
                    required_actions,
                    resolved.local().data_streams(),
                    &mut shallow_table,
                );
                let _ = stateful.has_index_permission(
                    context,
                    required_actions,
                    resolved.local().pure_indices(),
                    &mut shallow_table,
                );
            }
        }

        self.check_actions_with_index_patterns(context, &mut shallow_table, &mut local_errors);
        if !shallow_table.is_complete() && resolved.local().has_alias_or_data_stream_members() {
            self.check_actions_via_parents(context, &meta, &mut shallow_table, &mut local_errors);
        }

        self.uncheck_denied(&mut shallow_table, context, &meta, &mut local_errors);

        let mut stable_collections: BTreeSet<ResourceId> = BTreeSet::new();
        if !shallow_table.is_complete() && primary_action.is_single_index_request() {
            stable_collections = self.apply_single_member_alias_shortcut(
                context,
                primary_action,
                &meta,
                &mut shallow_table,
                &mut local_errors,
            );
        }

        if shallow_table.is_complete() {
            return self.granted(
                primary_action,
                &meta,
                &shallow_table,
                &stable_collections,
                local_errors,
            );
        }

        let incomplete_collections = shallow_table
            .incomplete_rows()
            .into_iter()
            .filter(|row| row.is_collection())
            .cloned()
            .collect::<Vec<_>>();

        // Aliases and data streams are the only rows that further
        // resolution phases can still complete. Scopes that cannot refer
        // past aliases are terminal here.
        if incomplete_collections.is_empty()
            || !(scope.can_refer_to_indices() || scope.can_refer_to_data_streams())
        {
            return self.partial_or_denied(
                primary_action,
                resolved,
                &shallow_table,
                local_errors,
            );
        }

        // --------------------------------------------------------------
        // Resolve aliases with data stream members one level down
        // --------------------------------------------------------------
        let incomplete_aliases_for_data_streams = incomplete_collections
            .iter()
            .filter(|row| row.is_alias() && meta.alias_has_data_stream_members(row.name()))
            .cloned()
            .collect::<Vec<_>>();

        let prev_table = if incomplete_aliases_for_data_streams.is_empty() {
            shallow_table
        } else {
            let mut resolved_data_streams = BTreeSet::new();
            let mut retained_aliases = Vec::new();
            for alias_row in &incomplete_aliases_for_data_streams {
                let mut non_data_stream_members = 0;
                for member in meta.alias_members(alias_row.name()) {
                    if member.is_data_stream() {
                        resolved_data_streams.insert(member);
                    } else {
                        non_data_stream_members += 1;
                    }
                }
                if non_data_stream_members != 0 {
                    retained_aliases.push(alias_row.clone());
                }
            }
            let mut semi_deep_rows = shallow_table
                .rows()
                .iter()
                .filter(|row| !incomplete_aliases_for_data_streams.contains(row))
                .cloned()
                .collect::<BTreeSet<_>>();
            semi_deep_rows.extend(retained_aliases);
            semi_deep_rows.extend(resolved_data_streams.iter().cloned());
            let mut semi_deep_table = Self::carry_over(&shallow_table, semi_deep_rows, required_actions);

            if stateful_usable {
                if let Some(stateful) = &stateful {
                    let _ = stateful.has_data_stream_permission(
                        context,
                        required_actions,
                        &resolved_data_streams,
                        &mut semi_deep_table,
                    );
                }
            }
            self.check_actions_with_index_patterns(context, &mut semi_deep_table, &mut local_errors);
            self.uncheck_denied(&mut semi_deep_table, context, &meta, &mut local_errors);

            if semi_deep_table.is_complete() {
                // The grant now covers one level of resolved members, so it
                // only holds for the membership seen in this snapshot.
                return PrivilegesEvaluationResult::ok_when_resolved()
                    .available_indices(Self::row_names(&semi_deep_table))
                    .with_errors(local_errors);
            }
            semi_deep_table
        };

        // --------------------------------------------------------------
        // Resolve the remaining aliases and data streams to concrete
        // indices
        // --------------------------------------------------------------
        if !scope.can_refer_to_indices() {
            return self.partial_or_denied(primary_action, resolved, &prev_table, local_errors);
        }
        let remaining_collections = prev_table
            .incomplete_rows()
            .into_iter()
            .filter(|row| row.is_collection())
            .cloned()
            .collect::<Vec<_>>();
        let mut deep_resolved = BTreeSet::new();
        for collection in &remaining_collections {
            deep_resolved.extend(
                meta.resolve_deep(collection, primary_action.alias_resolution_mode()),
            );
        }
        let mut deep_rows = prev_table
            .rows()
            .iter()
            .filter(|row| !remaining_collections.contains(row))
            .cloned()
            .collect::<BTreeSet<_>>();
        deep_rows.extend(deep_resolved.iter().cloned());
        let mut deep_table = Self::carry_over(&prev_table, deep_rows, required_actions);

        if stateful_usable {
            if let Some(stateful) = &stateful {
                let _ = stateful.has_index_permission(
                    context,
                    required_actions,
                    &deep_resolved,
                    &mut deep_table,
                );
            }
        }
        self.check_actions_with_index_patterns(context, &mut deep_table, &mut local_errors);
        self.check_actions_via_parents(context, &meta, &mut deep_table, &mut local_errors);
        self.uncheck_denied(&mut deep_table, context, &meta, &mut local_errors);

        // Deep resolved completeness never becomes plain OK: the alias
        // membership checked here can be stale by the time the request
        // executes, so the caller must rewrite to the checked set.
        if deep_table.is_complete() {
            return PrivilegesEvaluationResult::ok_when_resolved()
                .available_indices(Self::row_names(&deep_table))
                .with_errors(local_errors);
        }
        let available = deep_table
            .complete_rows()
            .into_iter()
            .map(|row| row.name().to_string())
            .collect::<BTreeSet<_>>();
        if !available.is_empty() {
            return PrivilegesEvaluationResult::partially_ok()
                .available_indices(available)
                .with_table(deep_table.map_rows(|row| row.name().to_string()))
                .with_errors(local_errors)
                .reason(self.rewrite_hints(primary_action, resolved));
        }
        self.denied(primary_action, resolved, &prev_table, local_errors)
    }

    /// Produce the final grant for a complete table, downgrading to
    /// OK_WHEN_RESOLVED when collection rows carry the grant.
    fn granted(
        &self,
        primary_action: &Action,
        meta: &Meta,
        table: &CheckTable<ResourceId, Action>,
        stable_collections: &BTreeSet<ResourceId>,
        local_errors: Vec<EvaluationError>,
    ) -> PrivilegesEvaluationResult {
        let volatile_collections = table
            .rows()
            .iter()
            .filter(|row| row.is_collection() && !stable_collections.contains(row))
            .collect::<Vec<_>>();
        if volatile_collections.is_empty() {
            return PrivilegesEvaluationResult::ok()
                .available_indices(Self::row_names(table))
                .with_errors(local_errors);
        }
        // Membership of the checked aliases and data streams can change
        // between this check and execution; force a rewrite to the
        // currently resolved members.
        let mut available = BTreeSet::new();
        for row in table.rows() {
            if row.is_collection() {
                available.extend(
                    meta.resolve_deep_to_names(row, primary_action.alias_resolution_mode()),
                );
            } else {
                available.insert(row.name().to_string());
            }
        }
        PrivilegesEvaluationResult::ok_when_resolved()
            .available_indices(available)
            .with_errors(local_errors)
    }

    /// Terminal decision when no further resolution phase can help.
    fn partial_or_denied(
        &self,
        primary_action: &Action,
        resolved: &ResolvedIndices,
        table: &CheckTable<ResourceId, Action>,
        local_errors: Vec<EvaluationError>,
    ) -> PrivilegesEvaluationResult {
        let available = table
            .complete_rows()
            .into_iter()
            .map(|row| row.name().to_string())
            .collect::<BTreeSet<_>>();
        if !available.is_empty() {
            return PrivilegesEvaluationResult::partially_ok()
                .available_indices(available)
                .with_table(table.map_rows(|row| row.name().to_string()))
                .with_errors(local_errors)
                .reason(self.rewrite_hints(primary_action, resolved));
        }
        self.denied(primary_action, resolved, table, local_errors)
    }

    fn denied(
        &self,
        primary_action: &Action,
        resolved: &ResolvedIndices,
        table: &CheckTable<ResourceId, Action>,
        local_errors: Vec<EvaluationError>,
    ) -> PrivilegesEvaluationResult {
        if resolved.is_ignore_unavailable() {
            // List/search semantics: the caller returns an empty result
            // instead of a user visible error.
            return PrivilegesEvaluationResult::empty()
                .with_table(table.map_rows(|row| row.name().to_string()))
                .with_errors(local_errors);
        }
        let base_reason = if resolved.local().len() == 1 {
            "Insufficient permissions for the referenced index".to_string()
        } else {
            format!(
                "None of {} referenced indices has sufficient permissions",
                resolved.local().len()
            )
        };
        PrivilegesEvaluationResult::insufficient()
            .with_table(table.map_rows(|row| row.name().to_string()))
            .with_errors(local_errors)
            .reason(format!(
                "{base_reason}. {}",
                self.rewrite_hints(primary_action, resolved)
            ))
    }

    /// Name the configuration knobs that would have to change for the
    /// request to be rewriteable to the authorized subset.
    fn rewrite_hints(&self, primary_action: &Action, resolved: &ResolvedIndices) -> String {
        let mut hints = Vec::new();
        if !self.authz_config.ignore_unauthorized_indices()
            && !self
                .ignore_unauthorized_indices_actions
                .matches(primary_action.name())
        {
            hints.push(format!(
                "ignore_unauthorized_indices is disabled and action '{}' is not covered by ignore_unauthorized_indices_actions",
                primary_action.name()
            ));
        }
        if !resolved.is_ignore_unavailable() {
            hints.push("the request does not set ignore_unavailable".to_string());
        }
        if !resolved.local().aliases().is_empty()
            && !self.authz_config.allow_alias_if_all_indices_allowed()
        {
            hints.push("aliases.allow_if_all_indices_are_allowed is disabled".to_string());
        }
        if hints.is_empty() {
            "The request can be reduced to the authorized resources".to_string()
        } else {
            format!("Request reduction requires: {}", hints.join("; "))
        }
    }

    /// Copy the checked cells of `previous` into a new table over `rows`.
    fn carry_over(
        previous: &CheckTable<ResourceId, Action>,
        rows: BTreeSet<ResourceId>,
        required_actions: &BTreeSet<Action>,
    ) -> CheckTable<ResourceId, Action> {
        let mut table = CheckTable::new(rows, required_actions.iter().cloned());
        for row in previous.rows() {
            if !table.rows().contains(row) {
                continue;
            }
            for action in previous.columns() {
                if previous.is_checked(row, action) {
                    table.check(row, action);
                }
            }
        }
        table
    }

    fn row_names(table: &CheckTable<ResourceId, Action>) -> BTreeSet<String> {
        table
            .rows()
            .iter()
            .map(|row| row.name().to_string())
            .collect()
    }

    fn category_for(&self, kind: ResourceKind) -> &IndexPermissions {
        match kind {
            ResourceKind::Index | ResourceKind::NonExistent => &self.index,
            ResourceKind::Alias => &self.alias,
            ResourceKind::DataStream => &self.data_stream,
        }
    }

    fn record_pattern_error(
        local_errors: &mut Vec<EvaluationError>,
        role: &str,
        e: &AuthzError,
    ) {
        // A failed render only costs this role's contribution.
        log::error!("Error while evaluating index pattern of role {role}. Ignoring entry: {e}");
        local_errors.push(
            EvaluationError::new("Error while evaluating index pattern")
                .for_role(role)
                .caused_by(e),
        );
    }

    /** Check every unchecked cell against the per role compiled index
    patterns: exact action lookups first, then the retained action
    patterns for non well known actions. */
    fn check_actions_with_index_patterns(
        &self,
        context: &PrivilegesEvaluationContext,
        table: &mut CheckTable<ResourceId, Action>,
        local_errors: &mut Vec<EvaluationError>,
    ) {
        let columns = table.columns().to_vec();
        let rows = table.rows().to_vec();
        let all_actions_well_known = columns.iter().all(Action::is_well_known);
        for role in context.mapped_roles() {
            for action in &columns {
                for row in &rows {
                    if table.is_checked(row, action) {
                        continue;
                    }
                    let permissions = self.category_for(row.kind());
                    if let Some(by_action) = permissions.action_to_index_pattern(role) {
                        if let Some(index_pattern) = by_action.get(action) {
                            match index_pattern.matches(row.name(), context) {
                                Ok(true) => {
                                    if table.check(row, action) {
                                        return;
                                    }
                                }
                                Ok(false) => {}
                                Err(e) => Self::record_pattern_error(local_errors, role, &e),
                            }
                        }
                    }
                }
            }
        }
        if table.is_complete() || all_actions_well_known {
            return;
        }
        // Non well known action names are only reachable through the
        // retained action patterns.
        for role in context.mapped_roles() {
            for action in &columns {
                if action.is_well_known() {
                    continue;
                }
                for row in &rows {
                    if table.is_checked(row, action) {
                        continue;
                    }
                    let permissions = self.category_for(row.kind());
                    if let Some(entries) = permissions.action_pattern_to_index_pattern(role) {
                        for (action_pattern, index_pattern) in entries {
                            if !action_pattern.matches(action.name()) {
                                continue;
                            }
                            match index_pattern.matches(row.name(), context) {
                                Ok(true) => {
                                    if table.check(row, action) {
                                        return;
                                    }
                                }
                                Ok(false) => {}
                                Err(e) => Self::record_pattern_error(local_errors, role, &e),
                            }
                        }
                    }
                }
            }
        }
    }

    /** Check unchecked cells of concrete resources through permissions
    granted on their containing aliases or data streams. */
    fn check_actions_via_parents(
        &self,
        context: &PrivilegesEvaluationContext,
        meta: &Meta,
        table: &mut CheckTable<ResourceId, Action>,
        local_errors: &mut Vec<EvaluationError>,
    ) {
        let rows = table.rows().to_vec();
        for row in &rows {
            let parent_data_stream = meta.parent_data_stream_name(row.name()).map(str::to_string);
            let ancestor_aliases = meta.ancestor_alias_names(row);
            if parent_data_stream.is_none() && ancestor_aliases.is_empty() {
                continue;
            }
            for role in context.mapped_roles() {
                let columns = table.unchecked_columns(row).into_iter().cloned().collect::<Vec<_>>();
                for action in &columns {
                    if let Some(parent_data_stream) = &parent_data_stream {
                        if let Some(by_action) = self.data_stream.action_to_index_pattern(role) {
                            if let Some(index_pattern) = by_action.get(action) {
                                match index_pattern.matches(parent_data_stream, context) {
                                    Ok(true) => {
                                        if table.check(row, action) {
                                            return;
                                        }
                                        continue;
                                    }
                                    Ok(false) => {}
                                    Err(e) => Self::record_pattern_error(local_errors, role, &e),
                                }
                            }
                        }
                    }
                    if !ancestor_aliases.is_empty() {
                        if let Some(by_action) = self.alias.action_to_index_pattern(role) {
                            if let Some(index_pattern) = by_action.get(action) {
                                match index_pattern.matches_any(
                                    ancestor_aliases.iter().map(String::as_str),
                                    context,
                                ) {
                                    Ok(true) => {
                                        if table.check(row, action) {
                                            return;
                                        }
                                    }
                                    Ok(false) => {}
                                    Err(e) => Self::record_pattern_error(local_errors, role, &e),
                                }
                            }
                        }
                    }
                    if action.is_well_known() {
                        continue;
                    }
                    // Non well known actions via parent action patterns.
                    if let Some(parent_data_stream) = &parent_data_stream {
                        if let Some(entries) =
                            self.data_stream.action_pattern_to_index_pattern(role)
                        {
                            for (action_pattern, index_pattern) in entries {
                                if !action_pattern.matches(action.name()) {
                                    continue;
                                }
                                match index_pattern.matches(parent_data_stream, context) {
                                    Ok(true) => {
                                        if table.check(row, action) {
                                            return;
                                        }
                                    }
                                    Ok(false) => {}
                                    Err(e) => Self::record_pattern_error(local_errors, role, &e),
                                }
                            }
                        }
                    }
                    if !ancestor_aliases.is_empty() {
                        if let Some(entries) = self.alias.action_pattern_to_index_pattern(role) {
                            for (action_pattern, index_pattern) in entries {
                                if !action_pattern.matches(action.name()) {
                                    continue;
                                }
                                match index_pattern.matches_any(
                                    ancestor_aliases.iter().map(String::as_str),
                                    context,
                                ) {
                                    Ok(true) => {
                                        if table.check(row, action) {
                                            return;
                                        }
                                    }
                                    Ok(false) => {}
                                    Err(e) => Self::record_pattern_error(local_errors, role, &e),
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    /// Apply the universal deny pattern and the per role exclusions.
    /// Denial always wins, so this runs after every grant phase.
    fn uncheck_denied(
        &self,
        table: &mut CheckTable<ResourceId, Action>,
        context: &PrivilegesEvaluationContext,
        meta: &Meta,
        local_errors: &mut Vec<EvaluationError>,
    ) {
        if !self.universally_denied_indices.is_blank() {
            table.uncheck_row_if(|row| {
                let deep_names = meta
                    .resolve_deep_to_names(row, palisade_model::AliasResolutionMode::Normal);
                self.universally_denied_indices.matches(row.name())
                    || self
                        .universally_denied_indices
                        .matches_any(deep_names.iter().map(String::as_str))
            });
        }
        self.index_exclusions
            .uncheck_exclusions(table, context, meta, local_errors);
    }

    /** Point read/write requests can only ever address one concrete
    index. When such a request names an alias with exactly one resolvable
    member and that member is fully authorized, the alias row is granted
    without forcing a request rewrite. Returns the alias rows proven this
    way. */
    fn apply_single_member_alias_shortcut(
        &self,
        context: &PrivilegesEvaluationContext,
        primary_action: &Action,
        meta: &Meta,
        table: &mut CheckTable<ResourceId, Action>,
        local_errors: &mut Vec<EvaluationError>,
    ) -> BTreeSet<ResourceId> {
        let mut stable = BTreeSet::new();
        let incomplete_aliases = table
            .incomplete_rows()
            .into_iter()
            .filter(|row| row.is_alias())
            .cloned()
            .collect::<Vec<_>>();
        for alias_row in incomplete_aliases {
            let members =
                meta.resolve_deep(&alias_row, primary_action.alias_resolution_mode());
            let [member] = members.as_slice() else {
                continue;
            };
            let missing_actions = table
                .unchecked_columns(&alias_row)
                .into_iter()
                .cloned()
                .collect::<BTreeSet<_>>();
            let mut member_table =
                CheckTable::new([member.clone()], missing_actions.iter().cloned());
            self.check_actions_with_index_patterns(context, &mut member_table, local_errors);
            if !member_table.is_complete() {
                self.check_actions_via_parents(context, meta, &mut member_table, local_errors);
            }
            self.uncheck_denied(&mut member_table, context, meta, local_errors);
            if member_table.is_complete() {
                for action in &missing_actions {
                    table.check(&alias_row, action);
                }
                stable.insert(alias_row);
            }
        }
        stable
    }

    /// Trigger an asynchronous rebuild of the stateful permission index
    /// against the source's current metadata.
    pub fn update_stateful_index_privileges_async(&self, source: Arc<dyn MetadataSource>) {
        self.refresher.request_update(source);
    }

    /// Rebuild the stateful permission index synchronously if `meta` is
    /// newer than the current snapshot.
    pub fn update(&self, meta: &Meta) {
        let current_version = self
            .refresher
            .snapshot()
            .map(|snapshot| snapshot.meta_version());
        if current_version != Some(meta.version()) {
            self.refresher.rebuild_now(meta);
        }
    }

    /// Stop background work. Safe to call more than once.
    pub fn shutdown(&self) {
        self.refresher.shutdown();
    }

    /// Return the metadata version of the current stateful snapshot.
    pub fn stateful_meta_version(&self) -> Option<u64> {
        self.refresher
            .snapshot()
            .map(|snapshot| snapshot.meta_version())
    }

    /// Return a not-yet-initialized error for callers that require the
    /// evaluator before configuration arrived.
    pub fn not_initialized_error() -> AuthzError {
        AuthzErrorKind::NotInitialized
            .error_with_msg("Action authorization is not initialized yet.")
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use palisade_model::EvaluationStatus;
    use palisade_model::User;
    use palisade_model::role::ExcludeIndexBlock;
    use palisade_model::role::IndexPermissionsBlock;
    use palisade_model::role::TenantPermissionsBlock;

    pub fn initialize_env_logger() {
        env_logger::builder()
            .is_test(true)
            .filter_level(log::LevelFilter::Debug)
            .try_init()
            .map_err(|e| {
                log::trace!("Env logger for testing was probably already initialized: {e:?}")
            })
            .ok();
    }

    fn index_role(patterns: &[&str], allowed_actions: &[&str]) -> Role {
        Role {
            index_permissions: vec![IndexPermissionsBlock {
                index_patterns: patterns.iter().map(ToString::to_string).collect(),
                allowed_actions: allowed_actions.iter().map(ToString::to_string).collect(),
                ..IndexPermissionsBlock::default()
            }],
            ..Role::default()
        }
    }

    fn alias_role(patterns: &[&str], allowed_actions: &[&str]) -> Role {
        Role {
            alias_permissions: vec![IndexPermissionsBlock {
                index_patterns: patterns.iter().map(ToString::to_string).collect(),
                allowed_actions: allowed_actions.iter().map(ToString::to_string).collect(),
                ..IndexPermissionsBlock::default()
            }],
            ..Role::default()
        }
    }

    fn role_map(entries: Vec<(&str, Role)>) -> BTreeMap<String, Role> {
        entries
            .into_iter()
            .map(|(name, role)| (name.to_string(), role))
            .collect()
    }

    fn evaluator(
        roles: BTreeMap<String, Role>,
        initial_meta: Option<&Meta>,
    ) -> RoleBasedActionAuthorization {
        evaluator_with_config(
            roles,
            initial_meta,
            AuthzConfig::default(),
            StatefulConfig::default(),
        )
    }

    fn evaluator_with_config(
        roles: BTreeMap<String, Role>,
        initial_meta: Option<&Meta>,
        authz_config: AuthzConfig,
        stateful_config: StatefulConfig,
    ) -> RoleBasedActionAuthorization {
        RoleBasedActionAuthorization::new(
            roles,
            FlattenedActionGroups::empty(),
            Actions::default_catalog(),
            ["hr_tenant".to_string()].into(),
            initial_meta,
            authz_config,
            stateful_config,
        )
        .unwrap()
    }

    fn context(roles: &[&str]) -> PrivilegesEvaluationContext {
        PrivilegesEvaluationContext::new(
            User::new("jdoe").with_attribute("department", "sales"),
            roles.iter().map(ToString::to_string).collect(),
        )
    }

    fn search_actions(authorization: &RoleBasedActionAuthorization) -> (Action, BTreeSet<Action>) {
        let search = authorization.actions.get("indices:data/read/search");
        let set: BTreeSet<Action> = [search.clone()].into();
        (search, set)
    }

    #[test]
    fn cluster_pattern_grant_and_denial() {
        initialize_env_logger();
        let authorization = evaluator(
            role_map(vec![(
                "r1",
                Role {
                    cluster_permissions: vec!["cluster:monitor/*".to_string()],
                    ..Role::default()
                },
            )]),
            None,
        );
        let ctx = context(&["r1"]);
        let health = authorization.actions.get("cluster:monitor/health");
        assert!(authorization.has_cluster_permission(&ctx, &health).is_ok());
        let repository_put = authorization.actions.get("cluster:admin/repository/put");
        let denied = authorization.has_cluster_permission(&ctx, &repository_put);
        assert_eq!(denied.get_status(), EvaluationStatus::Insufficient);
        assert!(denied.get_privilege_matrix().is_some());
    }

    #[test]
    fn cluster_exclusion_dominates_explicit_grant() {
        initialize_env_logger();
        let authorization = evaluator(
            role_map(vec![
                (
                    "r4",
                    Role {
                        exclude_cluster_permissions: vec!["palisade:*".to_string()],
                        ..Role::default()
                    },
                ),
                (
                    "r5",
                    Role {
                        cluster_permissions: vec!["palisade:config/update".to_string()],
                        ..Role::default()
                    },
                ),
            ]),
            None,
        );
        let ctx = context(&["r4", "r5"]);
        let config_update = authorization.actions.get("palisade:config/update");
        let result = authorization.has_cluster_permission(&ctx, &config_update);
        assert_eq!(result.get_status(), EvaluationStatus::Insufficient);
        assert!(result.get_reason().unwrap().contains("r4"));
    }

    #[test]
    fn partial_grant_reports_the_available_subset() {
        initialize_env_logger();
        let meta = Meta::builder()
            .version(1)
            .indices(&["logs-2024", "metrics-2024"])
            .build();
        let authorization = evaluator(
            role_map(vec![(
                "r2",
                index_role(&["logs-*"], &["indices:data/read/search"]),
            )]),
            None,
        );
        let ctx = context(&["r2"]);
        let (search, required) = search_actions(&authorization);
        let resolved = ResolvedIndices::of(&meta, &["logs-2024", "metrics-2024"]);
        let result = authorization.has_index_permission(
            &ctx,
            &search,
            &required,
            &resolved,
            ActionScope::IndexLike,
        );
        assert_eq!(result.get_status(), EvaluationStatus::PartiallyOk);
        assert_eq!(
            result.get_available_indices().unwrap(),
            &["logs-2024".to_string()].into()
        );
    }

    #[test]
    fn local_all_shortcut_grants_on_wildcard_index_privileges() {
        initialize_env_logger();
        let meta = Meta::builder()
            .version(1)
            .indices(&["logs-2024"])
            .build();
        let authorization = evaluator(
            role_map(vec![(
                "r2",
                index_role(&["*"], &["indices:data/read/search"]),
            )]),
            None,
        );
        let ctx = context(&["r2"]);
        let (search, required) = search_actions(&authorization);
        let resolved = ResolvedIndices::local_all(&meta);
        let result = authorization.has_index_permission(
            &ctx,
            &search,
            &required,
            &resolved,
            ActionScope::IndexLike,
        );
        assert_eq!(result.get_status(), EvaluationStatus::Ok);
    }

    #[test]
    fn unrewriteable_local_all_denies_immediately() {
        initialize_env_logger();
        let meta = Meta::builder().version(1).index("logs-2024").build();
        let authorization = evaluator(
            role_map(vec![(
                "r2",
                index_role(&["logs-*"], &["indices:data/read/search"]),
            )]),
            None,
        );
        let ctx = context(&["r2"]).with_resolve_local_all(false);
        let (search, required) = search_actions(&authorization);
        let resolved = ResolvedIndices::local_all(&meta);
        let result = authorization.has_index_permission(
            &ctx,
            &search,
            &required,
            &resolved,
            ActionScope::IndexLike,
        );
        assert_eq!(result.get_status(), EvaluationStatus::Insufficient);
        assert_eq!(result.get_reason(), Some("Insufficient privileges"));
    }

    #[test]
    fn remote_only_requests_are_granted() {
        initialize_env_logger();
        let meta = Meta::builder().version(1).build();
        let authorization = evaluator(role_map(vec![("r1", Role::default())]), None);
        let ctx = context(&["r1"]);
        let (search, required) = search_actions(&authorization);
        let resolved = ResolvedIndices::of(&meta, &["remote:logs-*"]);
        let result = authorization.has_index_permission(
            &ctx,
            &search,
            &required,
            &resolved,
            ActionScope::IndexLike,
        );
        assert_eq!(result.get_status(), EvaluationStatus::Ok);
    }

    #[test]
    fn alias_grant_forces_a_rewrite_to_current_members() {
        initialize_env_logger();
        let meta = Meta::builder()
            .version(1)
            .alias("sales-alias", &["sales-1", "sales-2", "sales-3"])
            .build();
        let authorization = evaluator_with_config(
            role_map(vec![(
                "r3",
                alias_role(&["sales-al*"], &["indices:data/read/search"]),
            )]),
            None,
            AuthzConfig::default().with_ignore_unauthorized_indices(false),
            StatefulConfig::default(),
        );
        let ctx = context(&["r3"]);
        let (search, required) = search_actions(&authorization);
        let resolved = ResolvedIndices::of(&meta, &["sales-alias"]);
        let result = authorization.has_index_permission(
            &ctx,
            &search,
            &required,
            &resolved,
            ActionScope::IndexLike,
        );
        assert_eq!(result.get_status(), EvaluationStatus::OkWhenResolved);
        assert_eq!(
            result.get_available_indices().unwrap(),
            &[
                "sales-1".to_string(),
                "sales-2".to_string(),
                "sales-3".to_string()
            ]
            .into()
        );
    }

    #[test]
    fn deep_resolution_grants_via_member_indices() {
        initialize_env_logger();
        let meta = Meta::builder()
            .version(1)
            .alias("sales-alias", &["sales-1", "sales-2"])
            .build();
        // The role knows nothing about the alias, only about the members.
        let authorization = evaluator(
            role_map(vec![(
                "r1",
                index_role(&["sales-*"], &["indices:data/read/search"]),
            )]),
            None,
        );
        let ctx = context(&["r1"]);
        let (search, required) = search_actions(&authorization);
        let resolved = ResolvedIndices::of(&meta, &["sales-alias"]);
        let result = authorization.has_index_permission(
            &ctx,
            &search,
            &required,
            &resolved,
            ActionScope::IndexLike,
        );
        assert_eq!(result.get_status(), EvaluationStatus::OkWhenResolved);
        assert_eq!(
            result.get_available_indices().unwrap(),
            &["sales-1".to_string(), "sales-2".to_string()].into()
        );
    }

    #[test]
    fn parent_alias_grant_covers_the_concrete_index() {
        initialize_env_logger();
        let meta = Meta::builder()
            .version(1)
            .alias("sales-alias", &["sales-1"])
            .build();
        let authorization = evaluator(
            role_map(vec![(
                "r1",
                alias_role(&["sales-alias"], &["indices:data/read/search"]),
            )]),
            None,
        );
        let ctx = context(&["r1"]);
        let (search, required) = search_actions(&authorization);
        // The request names the concrete index, the grant sits on the
        // containing alias.
        let resolved = ResolvedIndices::of(&meta, &["sales-1"]);
        let result = authorization.has_index_permission(
            &ctx,
            &search,
            &required,
            &resolved,
            ActionScope::IndexLike,
        );
        assert_eq!(result.get_status(), EvaluationStatus::Ok);
    }

    #[test]
    fn index_exclusion_overrides_grant_regardless_of_order() {
        initialize_env_logger();
        let meta = Meta::builder().version(1).index("logs-2024").build();
        let granting = index_role(&["logs-*"], &["indices:data/read/search"]);
        let excluding = Role {
            exclude_index_permissions: vec![ExcludeIndexBlock {
                index_patterns: vec!["logs-*".to_string()],
                actions: vec!["indices:data/read/search".to_string()],
            }],
            ..Role::default()
        };
        let authorization = evaluator(
            role_map(vec![("r1", granting), ("r2", excluding)]),
            Some(&meta),
        );
        let ctx = PrivilegesEvaluationContext::new(
            User::new("jdoe"),
            ["r1".to_string(), "r2".to_string()].into(),
        );
        let (search, required) = search_actions(&authorization);
        let resolved = ResolvedIndices::of(&meta, &["logs-2024"]);
        let result = authorization.has_index_permission(
            &ctx,
            &search,
            &required,
            &resolved,
            ActionScope::IndexLike,
        );
        assert_eq!(result.get_status(), EvaluationStatus::Insufficient);
    }

    #[test]
    fn universally_denied_indices_always_lose() {
        initialize_env_logger();
        let meta = Meta::builder().version(1).index("logs-2024").build();
        let authorization = evaluator_with_config(
            role_map(vec![(
                "r1",
                index_role(&["logs-*"], &["indices:data/read/search"]),
            )]),
            None,
            AuthzConfig::default().with_universally_denied_indices(&["logs-*"]),
            StatefulConfig::default(),
        );
        let ctx = context(&["r1"]);
        let (search, required) = search_actions(&authorization);
        let resolved = ResolvedIndices::of(&meta, &["logs-2024"]);
        let result = authorization.has_index_permission(
            &ctx,
            &search,
            &required,
            &resolved,
            ActionScope::IndexLike,
        );
        assert_eq!(result.get_status(), EvaluationStatus::Insufficient);
    }

    #[test]
    fn denied_search_with_ignore_unavailable_is_empty() {
        initialize_env_logger();
        let meta = Meta::builder().version(1).index("metrics-2024").build();
        let authorization = evaluator(
            role_map(vec![(
                "r1",
                index_role(&["logs-*"], &["indices:data/read/search"]),
            )]),
            None,
        );
        let ctx = context(&["r1"]);
        let (search, required) = search_actions(&authorization);
        let resolved =
            ResolvedIndices::of(&meta, &["metrics-2024"]).with_ignore_unavailable(true);
        let result = authorization.has_index_permission(
            &ctx,
            &search,
            &required,
            &resolved,
            ActionScope::IndexLike,
        );
        assert_eq!(result.get_status(), EvaluationStatus::Empty);
    }

    #[test]
    fn denial_reason_names_the_configuration_knobs() {
        initialize_env_logger();
        let meta = Meta::builder().version(1).index("metrics-2024").build();
        let authorization = evaluator_with_config(
            role_map(vec![(
                "r1",
                index_role(&["logs-*"], &["indices:data/read/search"]),
            )]),
            None,
            AuthzConfig::default().with_ignore_unauthorized_indices(false),
            StatefulConfig::default(),
        );
        let ctx = context(&["r1"]);
        let (search, required) = search_actions(&authorization);
        let resolved = ResolvedIndices::of(&meta, &["metrics-2024"]);
        let result = authorization.has_index_permission(
            &ctx,
            &search,
            &required,
            &resolved,
            ActionScope::IndexLike,
        );
        assert_eq!(result.get_status(), EvaluationStatus::Insufficient);
        let reason = result.get_reason().unwrap();
        assert!(reason.contains("ignore_unauthorized_indices"));
        assert!(reason.contains("ignore_unavailable"));
    }

    #[test]
    fn single_member_alias_shortcut_for_point_requests() {
        initialize_env_logger();
        let meta = Meta::builder()
            .version(1)
            .alias("current-sales", &["sales-000002"])
            .build();
        let authorization = evaluator(
            role_map(vec![(
                "r1",
                index_role(&["sales-*"], &["indices:data/read/get"]),
            )]),
            None,
        );
        let ctx = context(&["r1"]);
        let get = authorization.actions.get("indices:data/read/get");
        let required: BTreeSet<Action> = [get.clone()].into();
        let resolved = ResolvedIndices::of(&meta, &["current-sales"]);
        let result = authorization.has_index_permission(
            &ctx,
            &get,
            &required,
            &resolved,
            ActionScope::IndexLike,
        );
        // The alias can only ever address its single member, so no
        // rewrite is forced.
        assert_eq!(result.get_status(), EvaluationStatus::Ok);
    }

    #[test]
    fn multi_member_alias_gets_no_point_request_shortcut() {
        initialize_env_logger();
        let meta = Meta::builder()
            .version(1)
            .alias("current-sales", &["sales-1", "sales-2"])
            .build();
        let authorization = evaluator(
            role_map(vec![(
                "r1",
                index_role(&["sales-*"], &["indices:data/read/get"]),
            )]),
            None,
        );
        let ctx = context(&["r1"]);
        let get = authorization.actions.get("indices:data/read/get");
        let required: BTreeSet<Action> = [get.clone()].into();
        let resolved = ResolvedIndices::of(&meta, &["current-sales"]);
        let result = authorization.has_index_permission(
            &ctx,
            &get,
            &required,
            &resolved,
            ActionScope::IndexLike,
        );
        assert_eq!(result.get_status(), EvaluationStatus::OkWhenResolved);
    }

    #[test]
    fn semi_deep_resolution_covers_data_stream_members_of_aliases() {
        initialize_env_logger();
        let meta = Meta::builder()
            .version(1)
            .data_stream("ds-web", &[".ds-web-000001"])
            .alias("web-alias", &["ds-web"])
            .build();
        let authorization = evaluator(
            role_map(vec![(
                "r1",
                Role {
                    data_stream_permissions: vec![IndexPermissionsBlock {
                        index_patterns: vec!["ds-*".to_string()],
                        allowed_actions: vec!["indices:data/read/search".to_string()],
                        ..IndexPermissionsBlock::default()
                    }],
                    ..Role::default()
                },
            )]),
            None,
        );
        let ctx = context(&["r1"]);
        let (search, required) = search_actions(&authorization);
        let resolved = ResolvedIndices::of(&meta, &["web-alias"]);
        let result = authorization.has_index_permission(
            &ctx,
            &search,
            &required,
            &resolved,
            ActionScope::IndexLike,
        );
        assert_eq!(result.get_status(), EvaluationStatus::OkWhenResolved);
        assert!(
            result
                .get_available_indices()
                .unwrap()
                .contains("ds-web")
        );
    }

    #[test]
    fn non_well_known_actions_match_through_action_patterns() {
        initialize_env_logger();
        let meta = Meta::builder().version(1).index("logs-2024").build();
        let authorization = evaluator(
            role_map(vec![(
                "r1",
                index_role(&["logs-*"], &["indices:data/read/*"]),
            )]),
            None,
        );
        let ctx = context(&["r1"]);
        let exotic = authorization.actions.get("indices:data/read/brand/new");
        assert!(!exotic.is_well_known());
        let required: BTreeSet<Action> = [exotic.clone()].into();
        let resolved = ResolvedIndices::of(&meta, &["logs-2024"]);
        let result = authorization.has_index_permission(
            &ctx,
            &exotic,
            &required,
            &resolved,
            ActionScope::IndexLike,
        );
        assert_eq!(result.get_status(), EvaluationStatus::Ok);
    }

    #[test]
    fn stateful_and_pattern_paths_agree() {
        initialize_env_logger();
        let meta = Meta::builder()
            .version(1)
            .indices(&["logs-2024", "metrics-2024"])
            .build();
        let roles = role_map(vec![(
            "r1",
            index_role(&["logs-2024"], &["indices:data/read/search"]),
        )]);
        let with_stateful = evaluator(roles.clone(), Some(&meta));
        let pattern_only = evaluator(roles, None);
        assert!(with_stateful.stateful_meta_version().is_some());
        assert!(pattern_only.stateful_meta_version().is_none());
        for index_name in ["logs-2024", "metrics-2024"] {
            let ctx = context(&["r1"]);
            let (search, required) = search_actions(&with_stateful);
            let resolved = ResolvedIndices::of(&meta, &[index_name]);
            let fast = with_stateful.has_index_permission(
                &ctx,
                &search,
                &required,
                &resolved,
                ActionScope::IndexLike,
            );
            let slow = pattern_only.has_index_permission(
                &ctx,
                &search,
                &required,
                &resolved,
                ActionScope::IndexLike,
            );
            assert_eq!(fast.get_status(), slow.get_status());
        }
    }

    #[test]
    fn shrunk_stateful_budget_does_not_change_decisions() {
        initialize_env_logger();
        let meta = Meta::builder()
            .version(1)
            .indices(&["logs-2024", "logs-2025", "metrics-2024"])
            .build();
        let roles = role_map(vec![
            ("r1", index_role(&["logs-*"], &["indices:data/read/search"])),
            (
                "r2",
                index_role(&["metrics-*"], &["indices:data/read/search"]),
            ),
        ]);
        let unbounded = evaluator_with_config(
            roles.clone(),
            Some(&meta),
            AuthzConfig::default(),
            StatefulConfig::default().with_max_heap_size_bytes(u64::MAX),
        );
        let shrunk = evaluator_with_config(
            roles,
            Some(&meta),
            AuthzConfig::default(),
            StatefulConfig::default().with_max_heap_size_bytes(1),
        );
        for index_name in ["logs-2024", "logs-2025", "metrics-2024", "other"] {
            for mapped in [&["r1"][..], &["r2"][..], &["r1", "r2"][..]] {
                let (search, required) = search_actions(&unbounded);
                let resolved = ResolvedIndices::of(&meta, &[index_name]);
                let fast = unbounded.has_index_permission(
                    &context(mapped),
                    &search,
                    &required,
                    &resolved,
                    ActionScope::IndexLike,
                );
                let slow = shrunk.has_index_permission(
                    &context(mapped),
                    &search,
                    &required,
                    &resolved,
                    ActionScope::IndexLike,
                );
                assert_eq!(
                    fast.get_status(),
                    slow.get_status(),
                    "diverging decision for {index_name} with roles {mapped:?}"
                );
            }
        }
    }

    #[test]
    fn tenant_permission_checks() {
        initialize_env_logger();
        let authorization = evaluator(
            role_map(vec![(
                "r1",
                Role {
                    tenant_permissions: vec![TenantPermissionsBlock {
                        tenant_patterns: vec!["hr_tenant".to_string()],
                        allowed_actions: vec!["tenant:saved_objects/*".to_string()],
                    }],
                    ..Role::default()
                },
            )]),
            None,
        );
        let ctx = context(&["r1"]);
        let write = authorization.actions.get("tenant:saved_objects/write");
        assert!(
            authorization
                .has_tenant_permission(&ctx, &write, "hr_tenant")
                .is_ok()
        );
        let unknown = authorization.has_tenant_permission(&ctx, &write, "unknown_tenant");
        assert_eq!(unknown.get_status(), EvaluationStatus::Insufficient);
        assert_eq!(unknown.get_reason(), Some("Invalid requested tenant"));
        // Reserved tenants are structurally valid but still need a grant.
        let global = authorization.has_tenant_permission(&ctx, &write, GLOBAL_TENANT_ID);
        assert_eq!(global.get_status(), EvaluationStatus::Insufficient);
        assert_ne!(global.get_reason(), Some("Invalid requested tenant"));
    }

    #[test]
    fn templated_tenant_patterns_render_per_user() {
        initialize_env_logger();
        let authorization = RoleBasedActionAuthorization::new(
            role_map(vec![(
                "r1",
                Role {
                    tenant_permissions: vec![TenantPermissionsBlock {
                        tenant_patterns: vec!["${user.attrs.department}_tenant".to_string()],
                        allowed_actions: vec!["tenant:saved_objects/read".to_string()],
                    }],
                    ..Role::default()
                },
            )]),
            FlattenedActionGroups::empty(),
            Actions::default_catalog(),
            ["sales_tenant".to_string()].into(),
            None,
            AuthzConfig::default(),
            StatefulConfig::default(),
        )
        .unwrap();
        let ctx = context(&["r1"]);
        let read = authorization.actions.get("tenant:saved_objects/read");
        assert!(
            authorization
                .has_tenant_permission(&ctx, &read, "sales_tenant")
                .is_ok()
        );
    }

    #[test]
    fn broken_role_keeps_other_roles_working_and_reports_errors() {
        initialize_env_logger();
        let meta = Meta::builder().version(1).index("logs-2024").build();
        let authorization = evaluator(
            role_map(vec![
                ("broken", index_role(&["/logs-[/"], &["indices:data/read/search"])),
                ("working", index_role(&["logs-*"], &["indices:data/read/search"])),
            ]),
            None,
        );
        let ctx = PrivilegesEvaluationContext::new(
            User::new("jdoe"),
            ["broken".to_string(), "working".to_string()].into(),
        );
        let (search, required) = search_actions(&authorization);
        let resolved = ResolvedIndices::of(&meta, &["logs-2024"]);
        let result = authorization.has_index_permission(
            &ctx,
            &search,
            &required,
            &resolved,
            ActionScope::IndexLike,
        );
        assert_eq!(result.get_status(), EvaluationStatus::Ok);
        assert!(result.has_errors());
        assert_eq!(result.get_errors()[0].role(), Some("broken"));
    }
}
