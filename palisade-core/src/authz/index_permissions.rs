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

//! Compiled index, alias and data stream permission lookup structures.

use palisade_model::Action;
use palisade_model::Actions;
use palisade_model::AuthzError;
use palisade_model::CheckTable;
use palisade_model::FlattenedActionGroups;
use palisade_model::Meta;
use palisade_model::Pattern;
use palisade_model::PrivilegesEvaluationContext;
use palisade_model::ResourceId;
use palisade_model::Role;
use palisade_model::pattern::DateMathExpression;
use palisade_model::pattern::PatternTemplate;
use palisade_model::result::EvaluationError;
use palisade_model::role::IndexPatternSpec;
use palisade_model::role::IndexPermissionsBlock;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;

/** The index patterns granted to one role for one action.

Aggregates the constant patterns of all contributing permission blocks
into one joined [Pattern] and keeps the dynamic (templated and date math)
entries for per user rendering at evaluation time.
*/
pub struct CompiledIndexPattern {
    pattern: Pattern,
    pattern_templates: Vec<PatternTemplate>,
    date_math_expressions: Vec<DateMathExpression>,
}

impl CompiledIndexPattern {
    /** Return whether `name` is matched, rendering dynamic entries for
    the context's user. A render failure means this role contributes
    nothing for the name; the caller records the error and continues with
    other roles. */
    pub fn matches(
        &self,
        name: &str,
        context: &PrivilegesEvaluationContext,
    ) -> Result<bool, AuthzError> {
        if self.pattern.matches(name) {
            return Ok(true);
        }
        for template in &self.pattern_templates {
            let rendered = context.rendered_pattern(template)?;
            if rendered.matches(name) && !template.exclusions().matches(name) {
                return Ok(true);
            }
        }
        for expression in &self.date_math_expressions {
            let rendered = expression.render(context.user())?;
            if rendered.matches(name) && !expression.exclusions().matches(name) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Return whether any of `names` is matched.
    pub fn matches_any<'a, I: IntoIterator<Item = &'a str>>(
        &self,
        names: I,
        context: &PrivilegesEvaluationContext,
    ) -> Result<bool, AuthzError> {
        for name in names {
            if self.matches(name, context)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[derive(Default)]
struct CompiledIndexPatternBuilder {
    constant_patterns: Vec<Pattern>,
    pattern_templates: Vec<PatternTemplate>,
    date_math_expressions: Vec<DateMathExpression>,
}

impl CompiledIndexPatternBuilder {
    fn add(&mut self, spec: &IndexPatternSpec) {
        self.constant_patterns.push(spec.pattern().clone());
        self.pattern_templates
            .extend(spec.pattern_templates().iter().cloned());
        self.date_math_expressions
            .extend(spec.date_math_expressions().iter().cloned());
    }

    fn build(self) -> CompiledIndexPattern {
        CompiledIndexPattern {
            pattern: Pattern::join(self.constant_patterns),
            pattern_templates: self.pattern_templates,
            date_math_expressions: self.date_math_expressions,
        }
    }
}

/// Per role builder state, merged into the shared maps only when the
/// whole role compiled.
#[derive(Default)]
struct CompiledRoleEntries {
    action_to_index_pattern: HashMap<Action, CompiledIndexPatternBuilder>,
    action_pattern_to_index_pattern: BTreeMap<String, (Pattern, CompiledIndexPatternBuilder)>,
    wildcard_actions: Vec<Action>,
}

/** Compiled index like permissions of all roles for one category
(index, alias or data stream).

One scan over the role configuration builds `role -> action ->
IndexPattern` for well known actions (with action patterns expanded
eagerly against the catalog), `role -> action pattern -> IndexPattern`
for non well known action names, and `action -> roles with wildcard index
pattern` as the cheapest lookup tier.
*/
pub struct IndexPermissions {
    roles_to_action_to_index_pattern: HashMap<String, HashMap<Action, CompiledIndexPattern>>,
    roles_to_action_pattern_to_index_pattern:
        HashMap<String, Vec<(Pattern, CompiledIndexPattern)>>,
    action_to_roles_with_wildcard_index_privileges: HashMap<Action, BTreeSet<String>>,
    initialization_errors: Vec<EvaluationError>,
}

impl IndexPermissions {
    /// Compile one permission category of all roles. `get_blocks` selects
    /// the category's permission blocks from a role.
    pub fn new(
        roles: &BTreeMap<String, Role>,
        action_groups: &FlattenedActionGroups,
        actions: &Actions,
        get_blocks: fn(&Role) -> &[IndexPermissionsBlock],
    ) -> Self {
        let mut roles_to_action_to_index_pattern = HashMap::new();
        let mut roles_to_action_pattern_to_index_pattern = HashMap::new();
        let mut action_to_roles_with_wildcard_index_privileges: HashMap<Action, BTreeSet<String>> =
            HashMap::new();
        let mut initialization_errors = Vec::new();
        for (role_name, role) in roles {
            match Self::compile_role(get_blocks(role), action_groups, actions) {
                Ok(compiled) => {
                    if !compiled.action_to_index_pattern.is_empty() {
                        roles_to_action_to_index_pattern.insert(
                            role_name.clone(),
                            compiled
                                .action_to_index_pattern
                                .into_iter()
                                .map(|(action, builder)| (action, builder.build()))
                                .collect::<HashMap<_, _>>(),
                        );
                    }
                    if !compiled.action_pattern_to_index_pattern.is_empty() {
                        roles_to_action_pattern_to_index_pattern.insert(
                            role_name.clone(),
                            compiled
                                .action_pattern_to_index_pattern
                                .into_values()
                                .map(|(pattern, builder)| (pattern, builder.build()))
                                .collect::<Vec<_>>(),
                        );
                    }
                    for action in compiled.wildcard_actions {
                        action_to_roles_with_wildcard_index_privileges
                            .entry(action)
                            .or_default()
                            .insert(role_name.clone());
                    }
                }
                Err(e) => {
                    log::error!(
                        "Invalid index permissions in role '{role_name}'. This should have been caught before. Ignoring role: {e}"
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
            roles_to_action_to_index_pattern,
            roles_to_action_pattern_to_index_pattern,
            action_to_roles_with_wildcard_index_privileges,
            initialization_errors,
        }
    }

    fn compile_role(
        blocks: &[IndexPermissionsBlock],
        action_groups: &FlattenedActionGroups,
        actions: &Actions,
    ) -> Result<CompiledRoleEntries, AuthzError> {
        let mut compiled = CompiledRoleEntries::default();
        for block in blocks {
            let spec = IndexPatternSpec::parse(&block.index_patterns)?;
            let permissions = action_groups.resolve(&block.allowed_actions);
            for permission in &permissions {
                if Pattern::is_constant(permission) {
                    let action = actions.get(permission);
                    compiled
                        .action_to_index_pattern
                        .entry(action.clone())
                        .or_default()
                        .add(&spec);
                    if spec.pattern().is_wildcard() {
                        compiled.wildcard_actions.push(action);
                    }
                } else {
                    let action_pattern = Pattern::create(permission)?;
                    for action in actions.index_actions() {
                        if action_pattern.matches(action.name()) {
                            compiled
                                .action_to_index_pattern
                                .entry(action.clone())
                                .or_default()
                                .add(&spec);
                            if spec.pattern().is_wildcard() {
                                compiled.wildcard_actions.push(action.clone());
                            }
                        }
                    }
                    compiled
                        .action_pattern_to_index_pattern
                        .entry(permission.clone())
                        .or_insert_with(|| (action_pattern, CompiledIndexPatternBuilder::default()))
                        .1
                        .add(&spec);
                }
            }
        }
        Ok(compiled)
    }

    /// Return the compiled `action -> IndexPattern` map of a role.
    pub fn action_to_index_pattern(
        &self,
        role: &str,
    ) -> Option<&HashMap<Action, CompiledIndexPattern>> {
        self.roles_to_action_to_index_pattern.get(role)
    }

    /// Return the compiled `action pattern -> IndexPattern` entries of a
    /// role, used for non well known action names.
    pub fn action_pattern_to_index_pattern(
        &self,
        role: &str,
    ) -> Option<&[(Pattern, CompiledIndexPattern)]> {
        self.roles_to_action_pattern_to_index_pattern
            .get(role)
            .map(Vec::as_slice)
    }

    /// Return the roles granting `action` on a wildcard index pattern.
    pub fn roles_with_wildcard_index_privileges(
        &self,
        action: &Action,
    ) -> Option<&BTreeSet<String>> {
        self.action_to_roles_with_wildcard_index_privileges
            .get(action)
    }

    /// Return the role attributed errors recorded during compilation.
    pub fn initialization_errors(&self) -> &[EvaluationError] {
        &self.initialization_errors
    }
}

/** Compiled index permission exclusions of all roles.

Applied to check tables after all grant phases: a checked cell whose
resource (or any of its concrete members) is matched by an exclusion is
unchecked again, so denial wins regardless of evaluation order.
*/
pub struct IndexPermissionExclusions {
    roles_to_action_to_index_pattern: HashMap<String, HashMap<Action, CompiledIndexPattern>>,
    roles_to_action_pattern_to_index_pattern:
        HashMap<String, Vec<(Pattern, CompiledIndexPattern)>>,
    initialization_errors: Vec<EvaluationError>,
}

impl IndexPermissionExclusions {
    /// Compile the index permission exclusions of all roles.
    pub fn new(
        roles: &BTreeMap<String, Role>,
        action_groups: &FlattenedActionGroups,
        actions: &Actions,
    ) -> Self {
        let mut roles_to_action_to_index_pattern = HashMap::new();
        let mut roles_to_action_pattern_to_index_pattern = HashMap::new();
        let mut initialization_errors = Vec::new();
        for (role_name, role) in roles {
            let blocks = role
                .exclude_index_permissions
                .iter()
                .map(|block| IndexPermissionsBlock {
                    index_patterns: block.index_patterns.clone(),
                    allowed_actions: block.actions.clone(),
                    ..IndexPermissionsBlock::default()
                })
                .collect::<Vec<_>>();
            match IndexPermissions::compile_role(&blocks, action_groups, actions) {
                Ok(compiled) => {
                    if !compiled.action_to_index_pattern.is_empty() {
                        roles_to_action_to_index_pattern.insert(
                            role_name.clone(),
                            compiled
                                .action_to_index_pattern
                                .into_iter()
                                .map(|(action, builder)| (action, builder.build()))
                                .collect::<HashMap<_, _>>(),
                        );
                    }
                    if !compiled.action_pattern_to_index_pattern.is_empty() {
                        roles_to_action_pattern_to_index_pattern.insert(
                            role_name.clone(),
                            compiled
                                .action_pattern_to_index_pattern
                                .into_values()
                                .map(|(pattern, builder)| (pattern, builder.build()))
                                .collect::<Vec<_>>(),
                        );
                    }
                }
                Err(e) => {
                    log::error!(
                        "Invalid index permission exclusions in role '{role_name}'. This should have been caught before. Ignoring role: {e}"
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
            roles_to_action_to_index_pattern,
            roles_to_action_pattern_to_index_pattern,
            initialization_errors,
        }
    }

    /// Return `true` if any of `mapped_roles` excludes any of `actions`.
    pub fn contains(&self, mapped_roles: &BTreeSet<String>, actions: &BTreeSet<Action>) -> bool {
        let all_actions_well_known = actions.iter().all(Action::is_well_known);
        for role in mapped_roles {
            if let Some(action_to_index_pattern) = self.roles_to_action_to_index_pattern.get(role)
            {
                if actions
                    .iter()
                    .any(|action| action_to_index_pattern.contains_key(action))
                {
                    return true;
                }
            }
            if !all_actions_well_known {
                if let Some(entries) = self.roles_to_action_pattern_to_index_pattern.get(role) {
                    for (action_pattern, _) in entries {
                        if actions
                            .iter()
                            .any(|action| action_pattern.matches(action.name()))
                        {
                            return true;
                        }
                    }
                }
            }
        }
        false
    }

    /** Uncheck every checked cell whose resource is matched by an
    exclusion of any mapped role. Applied last so denial overrides any
    grant. */
    pub fn uncheck_exclusions(
        &self,
        check_table: &mut CheckTable<ResourceId, Action>,
        context: &PrivilegesEvaluationContext,
        meta: &Meta,
        errors: &mut Vec<EvaluationError>,
    ) {
        let actions = check_table.columns().to_vec();
        let all_actions_well_known = actions.iter().all(Action::is_well_known);
        for role in context.mapped_roles() {
            if check_table.is_blank() {
                return;
            }
            if let Some(action_to_index_pattern) = self.roles_to_action_to_index_pattern.get(role)
            {
                for action in &actions {
                    if let Some(index_pattern) = action_to_index_pattern.get(action) {
                        Self::uncheck_matching(
                            check_table,
                            context,
                            meta,
                            role,
                            action,
                            index_pattern,
                            errors,
                        );
                    }
                }
            }
        }
        if all_actions_well_known {
            return;
        }
        for role in context.mapped_roles() {
            if check_table.is_blank() {
                return;
            }
            if let Some(entries) = self.roles_to_action_pattern_to_index_pattern.get(role) {
                for action in &actions {
                    if action.is_well_known() {
                        continue;
                    }
                    for (action_pattern, index_pattern) in entries {
                        if action_pattern.matches(action.name()) {
                            Self::uncheck_matching(
                                check_table,
                                context,
                                meta,
                                role,
                                action,
                                index_pattern,
                                errors,
                            );
                        }
                    }
                }
            }
        }
    }

    fn uncheck_matching(
        check_table: &mut CheckTable<ResourceId, Action>,
        context: &PrivilegesEvaluationContext,
        meta: &Meta,
        role: &str,
        action: &Action,
        index_pattern: &CompiledIndexPattern,
        errors: &mut Vec<EvaluationError>,
    ) {
        let checked_rows = check_table
            .checked_rows(action)
            .into_iter()
            .cloned()
            .collect::<Vec<_>>();
        for row in checked_rows {
            let deep_names =
                meta.resolve_deep_to_names(&row, palisade_model::AliasResolutionMode::Normal);
            let matched = index_pattern.matches(row.name(), context).and_then(|direct| {
                if direct {
                    Ok(true)
                } else {
                    index_pattern
                        .matches_any(deep_names.iter().map(String::as_str), context)
                }
            });
            match matched {
                Ok(true) => check_table.uncheck(&row, action),
                Ok(false) => {}
                Err(e) => {
                    // An unrenderable exclusion must not silently grant:
                    // treat the resource as excluded for this role.
                    log::error!(
                        "Error while evaluating exclusion pattern of role {role}. Excluding entry: {e}"
                    );
                    errors.push(
                        EvaluationError::new("Error while evaluating exclusion pattern")
                            .for_role(role)
                            .caused_by(&e),
                    );
                    check_table.uncheck(&row, action);
                }
            }
        }
    }

    /// Return the role attributed errors recorded during compilation.
    pub fn initialization_errors(&self) -> &[EvaluationError] {
        &self.initialization_errors
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use palisade_model::User;
    use std::collections::BTreeMap;

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

    fn index_blocks(role: &Role) -> &[IndexPermissionsBlock] {
        &role.index_permissions
    }

    fn compile(roles: Vec<(&str, Role)>) -> IndexPermissions {
        let role_map: BTreeMap<String, Role> = roles
            .into_iter()
            .map(|(name, role)| (name.to_string(), role))
            .collect();
        IndexPermissions::new(
            &role_map,
            &FlattenedActionGroups::empty(),
            &Actions::default_catalog(),
            index_blocks,
        )
    }

    fn context() -> PrivilegesEvaluationContext {
        PrivilegesEvaluationContext::new(
            User::new("jdoe").with_attribute("department", "sales"),
            ["r1".to_string()].into(),
        )
    }

    #[test]
    fn constant_action_entries_land_in_the_exact_map() {
        let actions = Actions::default_catalog();
        let permissions = compile(vec![(
            "r1",
            role_with_index_block(&["logs-*"], &["indices:data/read/search"]),
        )]);
        let by_action = permissions.action_to_index_pattern("r1").unwrap();
        let index_pattern = by_action
            .get(&actions.get("indices:data/read/search"))
            .unwrap();
        assert!(index_pattern.matches("logs-2024", &context()).unwrap());
        assert!(!index_pattern.matches("metrics-2024", &context()).unwrap());
        assert!(permissions.action_pattern_to_index_pattern("r1").is_none());
    }

    #[test]
    fn pattern_action_entries_expand_against_the_catalog() {
        let actions = Actions::default_catalog();
        let permissions = compile(vec![(
            "r1",
            role_with_index_block(&["logs-*"], &["indices:data/read/*"]),
        )]);
        let by_action = permissions.action_to_index_pattern("r1").unwrap();
        assert!(by_action.contains_key(&actions.get("indices:data/read/search")));
        assert!(by_action.contains_key(&actions.get("indices:data/read/get")));
        assert!(!by_action.contains_key(&actions.get("indices:data/write/index")));
        // Retained for action names outside the catalog.
        assert_eq!(
            permissions
                .action_pattern_to_index_pattern("r1")
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn wildcard_index_patterns_feed_the_wildcard_tier() {
        let actions = Actions::default_catalog();
        let permissions = compile(vec![
            (
                "r1",
                role_with_index_block(&["*"], &["indices:data/read/search"]),
            ),
            (
                "r2",
                role_with_index_block(&["logs-*"], &["indices:data/read/search"]),
            ),
        ]);
        let wildcard_roles = permissions
            .roles_with_wildcard_index_privileges(&actions.get("indices:data/read/search"))
            .unwrap();
        assert!(wildcard_roles.contains("r1"));
        assert!(!wildcard_roles.contains("r2"));
    }

    #[test]
    fn templated_patterns_render_per_user() {
        let actions = Actions::default_catalog();
        let permissions = compile(vec![(
            "r1",
            role_with_index_block(
                &["${user.attrs.department}-*"],
                &["indices:data/read/search"],
            ),
        )]);
        let by_action = permissions.action_to_index_pattern("r1").unwrap();
        let index_pattern = by_action
            .get(&actions.get("indices:data/read/search"))
            .unwrap();
        assert!(index_pattern.matches("sales-2024", &context()).unwrap());
        assert!(!index_pattern.matches("hr-2024", &context()).unwrap());
        // A user without the attribute yields a render error, not a grant.
        let plain_context =
            PrivilegesEvaluationContext::new(User::new("nobody"), ["r1".to_string()].into());
        assert!(index_pattern.matches("sales-2024", &plain_context).is_err());
    }

    #[test]
    fn exclusions_uncheck_granted_cells() {
        let actions = Actions::default_catalog();
        let search = actions.get("indices:data/read/search");
        let role = Role {
            exclude_index_permissions: vec![palisade_model::role::ExcludeIndexBlock {
                index_patterns: vec!["logs-secret*".to_string()],
                actions: vec!["indices:data/read/*".to_string()],
            }],
            ..Role::default()
        };
        let role_map: BTreeMap<String, Role> = [("r1".to_string(), role)].into();
        let exclusions = IndexPermissionExclusions::new(
            &role_map,
            &FlattenedActionGroups::empty(),
            &actions,
        );
        let meta = Meta::builder()
            .indices(&["logs-2024", "logs-secret-1"])
            .build();
        let rows = [
            ResourceId::index("logs-2024"),
            ResourceId::index("logs-secret-1"),
        ];
        let mut table = CheckTable::new(rows.clone(), [search.clone()]);
        table.check(&rows[0], &search);
        table.check(&rows[1], &search);
        let mut errors = Vec::new();
        exclusions.uncheck_exclusions(&mut table, &context(), &meta, &mut errors);
        assert!(table.is_checked(&rows[0], &search));
        assert!(!table.is_checked(&rows[1], &search));
        assert!(errors.is_empty());
    }
}
