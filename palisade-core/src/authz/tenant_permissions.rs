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

//! Compiled tenant permission lookup structures.

use palisade_model::Action;
use palisade_model::Actions;
use palisade_model::AuthzError;
use palisade_model::FlattenedActionGroups;
use palisade_model::Pattern;
use palisade_model::Role;
use palisade_model::pattern::PatternTemplate;
use palisade_model::result::EvaluationError;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;

/// Per role builder state, merged into the shared maps only when the
/// whole role compiled.
#[derive(Default)]
struct CompiledRoleEntries {
    action_to_tenants: Vec<(Action, String)>,
    action_to_tenant_templates: HashMap<Action, Vec<PatternTemplate>>,
}

/** Compiled tenant permissions of all roles.

Constant tenant patterns are expanded eagerly against the configured
tenant catalog into an `action -> tenant -> roles` map; templated tenant
patterns stay dynamic and are rendered per user at evaluation time.
*/
pub struct TenantPermissions {
    action_to_tenant_to_roles: HashMap<Action, HashMap<String, BTreeSet<String>>>,
    roles_to_action_to_tenant_templates: HashMap<String, HashMap<Action, Vec<PatternTemplate>>>,
    initialization_errors: Vec<EvaluationError>,
}

impl TenantPermissions {
    /// Compile the tenant permissions of all roles against the configured
    /// tenant catalog.
    pub fn new(
        roles: &BTreeMap<String, Role>,
        action_groups: &FlattenedActionGroups,
        actions: &Actions,
        tenants: &BTreeSet<String>,
    ) -> Self {
        let mut action_to_tenant_to_roles: HashMap<Action, HashMap<String, BTreeSet<String>>> =
            HashMap::new();
        let mut roles_to_action_to_tenant_templates = HashMap::new();
        let mut initialization_errors = Vec::new();
        for (role_name, role) in roles {
            match Self::compile_role(role, action_groups, actions, tenants) {
                Ok(compiled) => {
                    for (action, tenant) in compiled.action_to_tenants {
                        action_to_tenant_to_roles
                            .entry(action)
                            .or_default()
                            .entry(tenant)
                            .or_default()
                            .insert(role_name.clone());
                    }
                    if !compiled.action_to_tenant_templates.is_empty() {
                        roles_to_action_to_tenant_templates
                            .insert(role_name.clone(), compiled.action_to_tenant_templates);
                    }
                }
                Err(e) => {
                    log::error!(
                        "Invalid tenant permissions in role '{role_name}'. This should have been caught before. Ignoring role: {e}"
                    );
                    initialization_errors.push(
                        EvaluationError::new("Invalid configuration in role")
                            .for_role(role_name)
                            .caused_by(&e),
                    );
                }
            }
        }
        Self {
            action_to_tenant_to_roles,
            roles_to_action_to_tenant_templates,
            initialization_errors,
        }
    }

    fn compile_role(
        role: &Role,
        action_groups: &FlattenedActionGroups,
        actions: &Actions,
        tenants: &BTreeSet<String>,
    ) -> Result<CompiledRoleEntries, AuthzError> {
        let mut compiled = CompiledRoleEntries::default();
        for block in &role.tenant_permissions {
            let permissions = action_groups.resolve(&block.allowed_actions);
            for permission in &permissions {
                let expanded_actions = if Pattern::is_constant(permission) {
                    vec![actions.get(permission)]
                } else {
                    let action_pattern = Pattern::create(permission)?;
                    actions
                        .tenant_actions()
                        .iter()
                        .filter(|action| action_pattern.matches(action.name()))
                        .cloned()
                        .collect()
                };
                for tenant_pattern in &block.tenant_patterns {
                    if PatternTemplate::contains_placeholders(tenant_pattern) {
                        let template = PatternTemplate::new(tenant_pattern);
                        for action in &expanded_actions {
                            compiled
                                .action_to_tenant_templates
                                .entry(action.clone())
                                .or_default()
                                .push(template.clone());
                        }
                    } else {
                        let pattern = Pattern::create(tenant_pattern)?;
                        for tenant in tenants {
                            if pattern.matches(tenant) {
                                for action in &expanded_actions {
                                    compiled
                                        .action_to_tenants
                                        .push((action.clone(), tenant.clone()));
                                }
                            }
                        }
                    }
                }
            }
        }
        Ok(compiled)
    }

    /// Return the roles granting `action` on `tenant` via constant
    /// patterns.
    pub fn roles_for(&self, action: &Action, tenant: &str) -> Option<&BTreeSet<String>> {
        self.action_to_tenant_to_roles
            .get(action)?
            .get(tenant)
    }

    /// Return the templated tenant patterns of a role for `action`.
    pub fn tenant_templates(&self, role: &str, action: &Action) -> Option<&[PatternTemplate]> {
        self.roles_to_action_to_tenant_templates
            .get(role)?
            .get(action)
            .map(Vec::as_slice)
    }

    /// Return the role attributed errors recorded during compilation.
    pub fn initialization_errors(&self) -> &[EvaluationError] {
        &self.initialization_errors
    }
}
