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

//! Snapshot of the cluster resource catalog.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// How an alias resolves to concrete resources for a given action.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AliasResolutionMode {
    /// All members of the alias.
    Normal,
    /// Only the designated write target of the alias.
    WriteTarget,
}

/// The kind of an index like object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    /// A concrete index.
    Index,
    /// A referenced index that does not exist in the catalog.
    NonExistent,
    /// An alias over indices and/or data streams.
    Alias,
    /// A data stream over backing indices.
    DataStream,
}

/** A named reference to an index like object.

The reference is a lightweight value usable as a row in check tables;
membership and parent relations are resolved through the owning [Meta]
snapshot by name, never through owning pointers.
*/
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId {
    name: String,
    kind: ResourceKind,
}

impl ResourceId {
    /// Reference a concrete index.
    pub fn index<S: AsRef<str>>(name: S) -> Self {
        Self {
            name: name.as_ref().to_string(),
            kind: ResourceKind::Index,
        }
    }

    /// Reference an index that does not exist in the catalog.
    pub fn non_existent<S: AsRef<str>>(name: S) -> Self {
        Self {
            name: name.as_ref().to_string(),
            kind: ResourceKind::NonExistent,
        }
    }

    /// Reference an alias.
    pub fn alias<S: AsRef<str>>(name: S) -> Self {
        Self {
            name: name.as_ref().to_string(),
            kind: ResourceKind::Alias,
        }
    }

    /// Reference a data stream.
    pub fn data_stream<S: AsRef<str>>(name: S) -> Self {
        Self {
            name: name.as_ref().to_string(),
            kind: ResourceKind::DataStream,
        }
    }

    /// Return the resource name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Return the resource kind.
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Return `true` for aliases.
    pub fn is_alias(&self) -> bool {
        self.kind == ResourceKind::Alias
    }

    /// Return `true` for data streams.
    pub fn is_data_stream(&self) -> bool {
        self.kind == ResourceKind::DataStream
    }

    /// Return `true` for concrete or non-existent indices.
    pub fn is_index_or_non_existent(&self) -> bool {
        matches!(self.kind, ResourceKind::Index | ResourceKind::NonExistent)
    }

    /// Return `true` for aliases and data streams.
    pub fn is_collection(&self) -> bool {
        matches!(self.kind, ResourceKind::Alias | ResourceKind::DataStream)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[derive(Debug, Default)]
struct IndexNode {
    parent_aliases: Vec<String>,
    parent_data_stream: Option<String>,
}

#[derive(Debug, Default)]
struct AliasNode {
    members: Vec<String>,
    write_target: Option<String>,
}

#[derive(Debug, Default)]
struct DataStreamNode {
    backing_indices: Vec<String>,
    parent_aliases: Vec<String>,
}

/** Immutable snapshot of all indices, aliases and data streams.

Alias and data stream membership can change between privilege evaluation
and request execution; consumers therefore always pin one versioned
snapshot for the duration of an evaluation and treat deep resolutions
obtained from it as valid only for that snapshot version.
*/
#[derive(Debug, Default)]
pub struct Meta {
    version: u64,
    indices: BTreeMap<String, IndexNode>,
    aliases: BTreeMap<String, AliasNode>,
    data_streams: BTreeMap<String, DataStreamNode>,
}

impl Meta {
    /// Return a builder for a snapshot.
    pub fn builder() -> MetaBuilder {
        MetaBuilder {
            meta: Meta::default(),
        }
    }

    /// Return the metadata version of this snapshot.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Return the names of all concrete indices.
    pub fn index_names(&self) -> impl Iterator<Item = &str> {
        self.indices.keys().map(String::as_str)
    }

    /// Return the names of all aliases.
    pub fn alias_names(&self) -> impl Iterator<Item = &str> {
        self.aliases.keys().map(String::as_str)
    }

    /// Return the names of all data streams.
    pub fn data_stream_names(&self) -> impl Iterator<Item = &str> {
        self.data_streams.keys().map(String::as_str)
    }

    /// Return `true` if `name` refers to a known resource of any kind.
    pub fn exists(&self, name: &str) -> bool {
        self.indices.contains_key(name)
            || self.aliases.contains_key(name)
            || self.data_streams.contains_key(name)
    }

    /// Classify `name` into a resource reference.
    pub fn lookup(&self, name: &str) -> ResourceId {
        if self.aliases.contains_key(name) {
            ResourceId::alias(name)
        } else if self.data_streams.contains_key(name) {
            ResourceId::data_stream(name)
        } else if self.indices.contains_key(name) {
            ResourceId::index(name)
        } else {
            ResourceId::non_existent(name)
        }
    }

    /// Return the direct member references of an alias.
    pub fn alias_members(&self, alias_name: &str) -> Vec<ResourceId> {
        self.aliases
            .get(alias_name)
            .map(|node| {
                node.members
                    .iter()
                    .map(|member| self.lookup(member))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Return `true` if the alias has at least one data stream member.
    pub fn alias_has_data_stream_members(&self, alias_name: &str) -> bool {
        self.alias_members(alias_name)
            .iter()
            .any(ResourceId::is_data_stream)
    }

    /// Return the name of the data stream backing `index_name`, if any.
    pub fn parent_data_stream_name(&self, index_name: &str) -> Option<&str> {
        self.indices
            .get(index_name)
            .and_then(|node| node.parent_data_stream.as_deref())
    }

    /** Return the names of all aliases through which `resource` can be
    addressed: its direct parent aliases plus, for backing indices, the
    aliases of the parent data stream. */
    pub fn ancestor_alias_names(&self, resource: &ResourceId) -> Vec<String> {
        let mut ancestors = Vec::new();
        match resource.kind() {
            ResourceKind::Index | ResourceKind::NonExistent => {
                if let Some(node) = self.indices.get(resource.name()) {
                    ancestors.extend(node.parent_aliases.iter().cloned());
                    if let Some(data_stream) = &node.parent_data_stream {
                        if let Some(ds_node) = self.data_streams.get(data_stream) {
                            ancestors.extend(ds_node.parent_aliases.iter().cloned());
                        }
                    }
                }
            }
            ResourceKind::DataStream => {
                if let Some(node) = self.data_streams.get(resource.name()) {
                    ancestors.extend(node.parent_aliases.iter().cloned());
                }
            }
            ResourceKind::Alias => {}
        }
        ancestors.sort();
        ancestors.dedup();
        ancestors
    }

    /** Resolve `resource` down to concrete indices.

    Aliases resolve through their members (honoring `mode`); data streams
    resolve to their backing indices; indices resolve to themselves.
    */
    pub fn resolve_deep(&self, resource: &ResourceId, mode: AliasResolutionMode) -> Vec<ResourceId> {
        let mut resolved = Vec::new();
        self.resolve_deep_into(resource, mode, &mut resolved);
        resolved.sort();
        resolved.dedup();
        resolved
    }

    /// Resolve `resource` down to concrete index names.
    pub fn resolve_deep_to_names(
        &self,
        resource: &ResourceId,
        mode: AliasResolutionMode,
    ) -> Vec<String> {
        self.resolve_deep(resource, mode)
            .into_iter()
            .map(|id| id.name().to_string())
            .collect()
    }

    fn resolve_deep_into(
        &self,
        resource: &ResourceId,
        mode: AliasResolutionMode,
        resolved: &mut Vec<ResourceId>,
    ) {
        match resource.kind() {
            ResourceKind::Index | ResourceKind::NonExistent => resolved.push(resource.clone()),
            ResourceKind::DataStream => {
                if let Some(node) = self.data_streams.get(resource.name()) {
                    resolved.extend(node.backing_indices.iter().map(ResourceId::index));
                }
            }
            ResourceKind::Alias => {
                if let Some(node) = self.aliases.get(resource.name()) {
                    match mode {
                        AliasResolutionMode::Normal => {
                            for member in &node.members {
                                self.resolve_deep_into(&self.lookup(member), mode, resolved);
                            }
                        }
                        AliasResolutionMode::WriteTarget => {
                            if let Some(write_target) = &node.write_target {
                                self.resolve_deep_into(&self.lookup(write_target), mode, resolved);
                            }
                        }
                    }
                }
            }
        }
    }

    /** Return references for every addressable local resource: aliases,
    data streams and the concrete indices that are not hidden behind a
    data stream. */
    pub fn all_index_like_objects(&self) -> Vec<ResourceId> {
        let mut all = Vec::new();
        all.extend(self.aliases.keys().map(ResourceId::alias));
        all.extend(self.data_streams.keys().map(ResourceId::data_stream));
        all.extend(
            self.indices
                .iter()
                .filter(|(_, node)| node.parent_data_stream.is_none())
                .map(|(name, _)| ResourceId::index(name)),
        );
        all
    }
}

/// Builder for [Meta] snapshots.
pub struct MetaBuilder {
    meta: Meta,
}

impl MetaBuilder {
    /// Set the metadata version.
    pub fn version(mut self, version: u64) -> Self {
        self.meta.version = version;
        self
    }

    /// Add a concrete index.
    pub fn index<S: AsRef<str>>(mut self, name: S) -> Self {
        self.meta.indices.entry(name.as_ref().to_string()).or_default();
        self
    }

    /// Add several concrete indices.
    pub fn indices<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        for name in names {
            self = self.index(name);
        }
        self
    }

    /// Add an alias over the given members (indices or data streams).
    pub fn alias<S: AsRef<str>, M: AsRef<str>>(self, name: S, members: &[M]) -> Self {
        self.alias_internal(name, members, None)
    }

    /// Add an alias with a designated write target member.
    pub fn alias_with_write_target<S: AsRef<str>, M: AsRef<str>>(
        self,
        name: S,
        members: &[M],
        write_target: M,
    ) -> Self {
        let write_target = write_target.as_ref().to_string();
        self.alias_internal(name, members, Some(write_target))
    }

    fn alias_internal<S: AsRef<str>, M: AsRef<str>>(
        mut self,
        name: S,
        members: &[M],
        write_target: Option<String>,
    ) -> Self {
        let alias_name = name.as_ref().to_string();
        let mut member_names = Vec::new();
        for member in members {
            let member_name = member.as_ref().to_string();
            if let Some(data_stream) = self.meta.data_streams.get_mut(&member_name) {
                data_stream.parent_aliases.push(alias_name.clone());
            } else {
                self.meta
                    .indices
                    .entry(member_name.clone())
                    .or_default()
                    .parent_aliases
                    .push(alias_name.clone());
            }
            member_names.push(member_name);
        }
        self.meta.aliases.insert(
            alias_name,
            AliasNode {
                members: member_names,
                write_target,
            },
        );
        self
    }

    /// Add a data stream over the given backing indices.
    pub fn data_stream<S: AsRef<str>, M: AsRef<str>>(mut self, name: S, backing: &[M]) -> Self {
        let data_stream_name = name.as_ref().to_string();
        let mut backing_names = Vec::new();
        for backing_index in backing {
            let backing_name = backing_index.as_ref().to_string();
            self.meta
                .indices
                .entry(backing_name.clone())
                .or_default()
                .parent_data_stream = Some(data_stream_name.clone());
            backing_names.push(backing_name);
        }
        self.meta.data_streams.insert(
            data_stream_name,
            DataStreamNode {
                backing_indices: backing_names,
                parent_aliases: Vec::new(),
            },
        );
        self
    }

    /// Freeze the snapshot.
    pub fn build(self) -> Arc<Meta> {
        Arc::new(self.meta)
    }
}
