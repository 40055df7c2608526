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

//! The action catalog: operation names and their capability flags.

use crate::meta::AliasResolutionMode;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::hash::Hasher;
use std::sync::Arc;

/// Name prefix marking engine-internal cluster actions.
const INTERNAL_CLUSTER_PREFIX: &str = "palisade:";
/// Name prefix marking tenant scoped actions.
const TENANT_PREFIX: &str = "tenant:";

/// The kind of resources an action name may refer to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionScope {
    /// Indices, aliases and data streams.
    IndexLike,
    /// Concrete indices only.
    Index,
    /// Aliases only.
    Alias,
    /// Data streams only.
    DataStream,
    /// Cluster wide operations without resource references.
    Cluster,
    /// Tenant scoped operations.
    Tenant,
    /// Operations that are always permitted.
    Open,
}

impl ActionScope {
    /// Return `true` if the scope may refer to concrete indices.
    pub fn can_refer_to_indices(&self) -> bool {
        matches!(self, Self::IndexLike | Self::Index)
    }

    /// Return `true` if the scope may refer to aliases.
    pub fn can_refer_to_aliases(&self) -> bool {
        matches!(self, Self::IndexLike | Self::Alias)
    }

    /// Return `true` if the scope may refer to data streams.
    pub fn can_refer_to_data_streams(&self) -> bool {
        matches!(self, Self::IndexLike | Self::DataStream)
    }

    /// Return `true` if the scope may refer to tenants.
    pub fn can_refer_to_tenants(&self) -> bool {
        matches!(self, Self::Tenant)
    }

    /// Return `true` if the scope may refer to any index like object.
    pub fn can_refer_to_index_like_objects(&self) -> bool {
        self.can_refer_to_indices()
            || self.can_refer_to_aliases()
            || self.can_refer_to_data_streams()
    }

    /// Return `true` if aliases are the only resources the scope may name.
    pub fn can_only_refer_to_aliases(&self) -> bool {
        self.can_refer_to_aliases()
            && !self.can_refer_to_indices()
            && !self.can_refer_to_data_streams()
    }
}

/** A statically registered action with full capability information.

Well known actions are registered once in the [Actions] catalog and carry
the flags the evaluator branches on: scope, eligibility for the stateful
fast path, alias resolution behavior, whether a request of this kind can
only ever address a single concrete index, and additional privileges that
must be granted together with the action itself.
*/
#[derive(Debug)]
pub struct WellKnownAction {
    name: String,
    scope: ActionScope,
    performance_critical: bool,
    single_index_request: bool,
    alias_resolution_mode: AliasResolutionMode,
    additional_privileges: BTreeSet<String>,
}

impl WellKnownAction {
    /// Return the action name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Return the resource scope.
    pub fn scope(&self) -> ActionScope {
        self.scope
    }

    /// Return `true` if the stateful fast path may serve this action.
    pub fn is_performance_critical(&self) -> bool {
        self.performance_critical
    }

    /// Return `true` if a request of this kind addresses one concrete index.
    pub fn is_single_index_request(&self) -> bool {
        self.single_index_request
    }

    /// Return how aliases resolve for this action.
    pub fn alias_resolution_mode(&self) -> AliasResolutionMode {
        self.alias_resolution_mode
    }

    /// Return the names of privileges required together with this action.
    pub fn additional_privileges(&self) -> &BTreeSet<String> {
        &self.additional_privileges
    }
}

/** An operation identified by name, with cluster, index or tenant scope.

Either statically registered with full capability information
(`WellKnown`), or an arbitrary name whose scope is inferred from its
prefix (`Other`). Equality and ordering are by action name so actions can
key hash and tree maps.
*/
#[derive(Clone, Debug)]
pub enum Action {
    /// Statically registered action with capability flags.
    WellKnown(Arc<WellKnownAction>),
    /// Any action name outside the static catalog.
    Other {
        /// The action name.
        name: String,
        /// Scope inferred from the name prefix.
        scope: ActionScope,
    },
}

impl Action {
    /// Return the action name.
    pub fn name(&self) -> &str {
        match self {
            Self::WellKnown(well_known) => well_known.name(),
            Self::Other { name, .. } => name,
        }
    }

    /// Return the resource scope.
    pub fn scope(&self) -> ActionScope {
        match self {
            Self::WellKnown(well_known) => well_known.scope(),
            Self::Other { scope, .. } => *scope,
        }
    }

    /// Return `true` if this action is in the static catalog.
    pub fn is_well_known(&self) -> bool {
        matches!(self, Self::WellKnown(_))
    }

    /// Return the well known registration, if any.
    pub fn well_known(&self) -> Option<&Arc<WellKnownAction>> {
        match self {
            Self::WellKnown(well_known) => Some(well_known),
            Self::Other { .. } => None,
        }
    }

    /// Return `true` if this is a cluster scoped privilege.
    pub fn is_cluster_privilege(&self) -> bool {
        matches!(self.scope(), ActionScope::Cluster)
    }

    /// Return `true` if this privilege refers to index like objects.
    pub fn is_index_like_privilege(&self) -> bool {
        self.scope().can_refer_to_index_like_objects()
    }

    /// Return `true` if this is a tenant scoped privilege.
    pub fn is_tenant_privilege(&self) -> bool {
        matches!(self.scope(), ActionScope::Tenant)
    }

    /// Return `true` if this action is always permitted.
    pub fn is_open(&self) -> bool {
        matches!(self.scope(), ActionScope::Open)
    }

    /// Return `true` if the stateful fast path may serve this action.
    pub fn is_performance_critical(&self) -> bool {
        self.well_known()
            .is_some_and(|well_known| well_known.is_performance_critical())
    }

    /// Return `true` if a request of this kind addresses one concrete index.
    pub fn is_single_index_request(&self) -> bool {
        self.well_known()
            .is_some_and(|well_known| well_known.is_single_index_request())
    }

    /// Return how aliases resolve for this action.
    pub fn alias_resolution_mode(&self) -> AliasResolutionMode {
        self.well_known()
            .map(|well_known| well_known.alias_resolution_mode())
            .unwrap_or(AliasResolutionMode::Normal)
    }
}

impl PartialEq for Action {
    fn eq(&self, other: &Self) -> bool {
        self.name() == other.name()
    }
}

impl Eq for Action {}

impl Hash for Action {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name().hash(state);
    }
}

impl PartialOrd for Action {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Action {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name().cmp(other.name())
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/** The catalog of well known actions.

Lookups never fail: names outside the catalog come back as
[Action::Other] with the scope inferred from the name prefix (`cluster:`
and the engine internal prefix mean cluster scope, the tenant prefix
means tenant scope, everything else is an index action).
*/
pub struct Actions {
    by_name: HashMap<String, Action>,
    cluster_actions: Vec<Action>,
    index_actions: Vec<Action>,
    tenant_actions: Vec<Action>,
}

impl Actions {
    /// Return a builder for a catalog.
    pub fn builder() -> ActionsBuilder {
        ActionsBuilder {
            actions: Vec::new(),
        }
    }

    /// Look the action up by name. Never fails.
    pub fn get(&self, name: &str) -> Action {
        self.by_name.get(name).cloned().unwrap_or_else(|| {
            let scope = if name.starts_with("cluster:") || name.starts_with(INTERNAL_CLUSTER_PREFIX)
            {
                ActionScope::Cluster
            } else if name.starts_with(TENANT_PREFIX) {
                ActionScope::Tenant
            } else {
                ActionScope::Index
            };
            Action::Other {
                name: name.to_string(),
                scope,
            }
        })
    }

    /// Return the set of privileges required to perform `action`, which is
    /// the action itself plus its registered additional privileges.
    pub fn expand_privileges(&self, action: &Action) -> BTreeSet<Action> {
        let mut expanded = BTreeSet::new();
        if let Some(well_known) = action.well_known() {
            for name in well_known.additional_privileges() {
                expanded.insert(self.get(name));
            }
        }
        expanded.insert(action.clone());
        expanded
    }

    /// Return all cluster scoped well known actions.
    pub fn cluster_actions(&self) -> &[Action] {
        &self.cluster_actions
    }

    /// Return all index like well known actions.
    pub fn index_actions(&self) -> &[Action] {
        &self.index_actions
    }

    /// Return all tenant scoped well known actions.
    pub fn tenant_actions(&self) -> &[Action] {
        &self.tenant_actions
    }

    /** Return the default catalog.

    The selection mirrors the operations of the protected search engine
    that are relevant for privilege evaluation. Embedders with custom
    operations register them through [Actions::builder].
    */
    pub fn default_catalog() -> Arc<Self> {
        Self::builder()
            .index_action("indices:data/read/search", |a| a.performance_critical())
            .index_action("indices:data/read/get", |a| {
                a.performance_critical().single_index_request()
            })
            .index_action("indices:data/read/mget", |a| a.performance_critical())
            .index_action("indices:data/write/index", |a| {
                a.performance_critical()
                    .single_index_request()
                    .alias_resolution_mode(AliasResolutionMode::WriteTarget)
            })
            .index_action("indices:data/write/bulk[s]", |a| {
                a.performance_critical()
                    .single_index_request()
                    .alias_resolution_mode(AliasResolutionMode::WriteTarget)
            })
            .index_action("indices:data/write/delete", |a| {
                a.alias_resolution_mode(AliasResolutionMode::WriteTarget)
            })
            .index_action("indices:data/write/update", |a| {
                a.alias_resolution_mode(AliasResolutionMode::WriteTarget)
            })
            .index_action("indices:admin/create", |a| a)
            .index_action("indices:admin/delete", |a| a)
            .index_action("indices:admin/mapping/put", |a| a)
            .index_action("indices:admin/refresh", |a| a)
            .index_action("indices:monitor/stats", |a| a)
            .index_action("indices:monitor/settings/get", |a| a)
            .alias_action("indices:admin/aliases/get", |a| a)
            .cluster_action("cluster:monitor/health", |a| a)
            .cluster_action("cluster:monitor/state", |a| a)
            .cluster_action("cluster:monitor/nodes/stats", |a| a)
            .cluster_action("cluster:admin/repository/put", |a| a)
            .cluster_action("cluster:admin/repository/get", |a| a)
            .cluster_action("cluster:admin/reroute", |a| a)
            .cluster_action("palisade:config/update", |a| a)
            .tenant_action("tenant:saved_objects/read", |a| a)
            .tenant_action("tenant:saved_objects/write", |a| a)
            .build()
    }
}

/// Staged registration of one well known action.
pub struct ActionRegistration {
    name: String,
    scope: ActionScope,
    performance_critical: bool,
    single_index_request: bool,
    alias_resolution_mode: AliasResolutionMode,
    additional_privileges: BTreeSet<String>,
}

impl ActionRegistration {
    /// Mark the action as eligible for the stateful fast path.
    pub fn performance_critical(mut self) -> Self {
        self.performance_critical = true;
        self
    }

    /// Mark the action as addressing a single concrete index per request.
    pub fn single_index_request(mut self) -> Self {
        self.single_index_request = true;
        self
    }

    /// Set how aliases resolve for this action.
    pub fn alias_resolution_mode(mut self, mode: AliasResolutionMode) -> Self {
        self.alias_resolution_mode = mode;
        self
    }

    /// Require `privilege` to be granted together with this action.
    pub fn additional_privilege<S: AsRef<str>>(mut self, privilege: S) -> Self {
        self.additional_privileges
            .insert(privilege.as_ref().to_string());
        self
    }
}

/// Builder for an [Actions] catalog.
pub struct ActionsBuilder {
    actions: Vec<ActionRegistration>,
}

impl ActionsBuilder {
    fn action<F>(mut self, name: &str, scope: ActionScope, customize: F) -> Self
    where
        F: FnOnce(ActionRegistration) -> ActionRegistration,
    {
        self.actions.push(customize(ActionRegistration {
            name: name.to_string(),
            scope,
            performance_critical: false,
            single_index_request: false,
            alias_resolution_mode: AliasResolutionMode::Normal,
            additional_privileges: BTreeSet::new(),
        }));
        self
    }

    /// Register an index scoped action.
    pub fn index_action<F>(self, name: &str, customize: F) -> Self
    where
        F: FnOnce(ActionRegistration) -> ActionRegistration,
    {
        self.action(name, ActionScope::IndexLike, customize)
    }

    /// Register an alias scoped action.
    pub fn alias_action<F>(self, name: &str, customize: F) -> Self
    where
        F: FnOnce(ActionRegistration) -> ActionRegistration,
    {
        self.action(name, ActionScope::Alias, customize)
    }

    /// Register a cluster scoped action.
    pub fn cluster_action<F>(self, name: &str, customize: F) -> Self
    where
        F: FnOnce(ActionRegistration) -> ActionRegistration,
    {
        self.action(name, ActionScope::Cluster, customize)
    }

    /// Register a tenant scoped action.
    pub fn tenant_action<F>(self, name: &str, customize: F) -> Self
    where
        F: FnOnce(ActionRegistration) -> ActionRegistration,
    {
        self.action(name, ActionScope::Tenant, customize)
    }

    /// Freeze the registrations into a catalog.
    pub fn build(self) -> Arc<Actions> {
        let mut by_name = HashMap::new();
        let mut cluster_actions = Vec::new();
        let mut index_actions = Vec::new();
        let mut tenant_actions = Vec::new();
        for registration in self.actions {
            let action = Action::WellKnown(Arc::new(WellKnownAction {
                name: registration.name.clone(),
                scope: registration.scope,
                performance_critical: registration.performance_critical,
                single_index_request: registration.single_index_request,
                alias_resolution_mode: registration.alias_resolution_mode,
                additional_privileges: registration.additional_privileges,
            }));
            match registration.scope {
                ActionScope::Cluster => cluster_actions.push(action.clone()),
                ActionScope::Tenant => tenant_actions.push(action.clone()),
                _ => index_actions.push(action.clone()),
            }
            by_name.insert(registration.name, action);
        }
        Arc::new(Actions {
            by_name,
            cluster_actions,
            index_actions,
            tenant_actions,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lookup_returns_registered_action() {
        let actions = Actions::default_catalog();
        let search = actions.get("indices:data/read/search");
        assert!(search.is_well_known());
        assert!(search.is_performance_critical());
        assert!(search.is_index_like_privilege());
    }

    #[test]
    fn lookup_infers_scope_for_unknown_names() {
        let actions = Actions::default_catalog();
        assert!(
            actions
                .get("cluster:admin/something/new")
                .is_cluster_privilege()
        );
        assert!(actions.get("palisade:internal/op").is_cluster_privilege());
        assert!(actions.get("tenant:custom/op").is_tenant_privilege());
        assert!(
            actions
                .get("indices:data/read/something/new")
                .is_index_like_privilege()
        );
    }

    #[test]
    fn action_equality_is_by_name() {
        let actions = Actions::default_catalog();
        let well_known = actions.get("indices:data/read/search");
        let other = Action::Other {
            name: "indices:data/read/search".to_string(),
            scope: ActionScope::Index,
        };
        assert_eq!(well_known, other);
    }

    #[test]
    fn expand_privileges_includes_the_action_itself() {
        let actions = Actions::builder()
            .index_action("indices:admin/resize", |a| {
                a.additional_privilege("indices:admin/create")
            })
            .index_action("indices:admin/create", |a| a)
            .build();
        let resize = actions.get("indices:admin/resize");
        let expanded = actions.expand_privileges(&resize);
        assert_eq!(expanded.len(), 2);
        assert!(expanded.contains(&actions.get("indices:admin/create")));
        assert!(expanded.contains(&resize));
    }

    #[test]
    fn write_actions_resolve_aliases_to_the_write_target() {
        let actions = Actions::default_catalog();
        assert_eq!(
            actions
                .get("indices:data/write/index")
                .alias_resolution_mode(),
            AliasResolutionMode::WriteTarget
        );
        assert_eq!(
            actions
                .get("indices:data/read/search")
                .alias_resolution_mode(),
            AliasResolutionMode::Normal
        );
    }
}
