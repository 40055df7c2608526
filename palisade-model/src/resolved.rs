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

//! The resource set a request actually targets after resolution.

use crate::meta::Meta;
use crate::meta::ResourceId;
use std::collections::BTreeSet;
use std::sync::Arc;

/** The local (this cluster) part of a resolved resource set.

Resources are partitioned by kind as they were named in the request, not
yet expanded through alias or data stream membership. The partitioning is
what allows the evaluator to run its cheap shallow checks before paying
for deeper resolutions.
*/
#[derive(Clone, Debug)]
pub struct ResolvedLocal {
    meta: Arc<Meta>,
    local_all: bool,
    pure_indices: BTreeSet<ResourceId>,
    non_existent: BTreeSet<ResourceId>,
    aliases: BTreeSet<ResourceId>,
    data_streams: BTreeSet<ResourceId>,
}

impl ResolvedLocal {
    /// Return the metadata snapshot the resolution was made against.
    pub fn meta(&self) -> &Arc<Meta> {
        &self.meta
    }

    /// Return `true` if the request denotes "all local resources".
    pub fn is_local_all(&self) -> bool {
        self.local_all
    }

    /// Return the concrete indices named by the request.
    pub fn pure_indices(&self) -> &BTreeSet<ResourceId> {
        &self.pure_indices
    }

    /// Return the named resources that do not exist in the catalog.
    pub fn non_existent(&self) -> &BTreeSet<ResourceId> {
        &self.non_existent
    }

    /// Return the aliases named by the request.
    pub fn aliases(&self) -> &BTreeSet<ResourceId> {
        &self.aliases
    }

    /// Return the data streams named by the request.
    pub fn data_streams(&self) -> &BTreeSet<ResourceId> {
        &self.data_streams
    }

    /// Return all named resources.
    pub fn union(&self) -> BTreeSet<ResourceId> {
        let mut union = BTreeSet::new();
        union.extend(self.pure_indices.iter().cloned());
        union.extend(self.non_existent.iter().cloned());
        union.extend(self.aliases.iter().cloned());
        union.extend(self.data_streams.iter().cloned());
        union
    }

    /// Return the number of named resources.
    pub fn len(&self) -> usize {
        self.pure_indices.len()
            + self.non_existent.len()
            + self.aliases.len()
            + self.data_streams.len()
    }

    /// Return `true` if no local resource is named.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return `true` if any named concrete index can also be addressed
    /// through a containing alias or data stream.
    pub fn has_alias_or_data_stream_members(&self) -> bool {
        self.pure_indices.iter().any(|index| {
            self.meta.parent_data_stream_name(index.name()).is_some()
                || !self.meta.ancestor_alias_names(index).is_empty()
        })
    }
}

/** The resolved resource set of one request.

Supplied by the request introspector (an external collaborator); the
evaluator only consumes it. Remote cluster resources are authorized by
the remote cluster and are therefore only counted, never evaluated.
*/
#[derive(Clone, Debug)]
pub struct ResolvedIndices {
    local: ResolvedLocal,
    remote_indices: BTreeSet<String>,
    ignore_unavailable: bool,
}

impl ResolvedIndices {
    /// Resolve the given names against a metadata snapshot.
    pub fn of<S: AsRef<str>>(meta: &Arc<Meta>, names: &[S]) -> Self {
        let mut pure_indices = BTreeSet::new();
        let mut non_existent = BTreeSet::new();
        let mut aliases = BTreeSet::new();
        let mut data_streams = BTreeSet::new();
        let mut remote_indices = BTreeSet::new();
        for name in names {
            let name = name.as_ref();
            if name.contains(':') {
                // Remote cluster reference like `remote:logs-*`.
                remote_indices.insert(name.to_string());
                continue;
            }
            let resource = meta.lookup(name);
            match resource.kind() {
                crate::meta::ResourceKind::Index => {
                    pure_indices.insert(resource);
                }
                crate::meta::ResourceKind::NonExistent => {
                    non_existent.insert(resource);
                }
                crate::meta::ResourceKind::Alias => {
                    aliases.insert(resource);
                }
                crate::meta::ResourceKind::DataStream => {
                    data_streams.insert(resource);
                }
            }
        }
        Self {
            local: ResolvedLocal {
                meta: Arc::clone(meta),
                local_all: false,
                pure_indices,
                non_existent,
                aliases,
                data_streams,
            },
            remote_indices,
            ignore_unavailable: false,
        }
    }

    /// Return the resolution of a request denoting "all local resources".
    pub fn local_all(meta: &Arc<Meta>) -> Self {
        let mut pure_indices = BTreeSet::new();
        let mut aliases = BTreeSet::new();
        let mut data_streams = BTreeSet::new();
        for resource in meta.all_index_like_objects() {
            match resource.kind() {
                crate::meta::ResourceKind::Alias => {
                    aliases.insert(resource);
                }
                crate::meta::ResourceKind::DataStream => {
                    data_streams.insert(resource);
                }
                _ => {
                    pure_indices.insert(resource);
                }
            }
        }
        Self {
            local: ResolvedLocal {
                meta: Arc::clone(meta),
                local_all: true,
                pure_indices,
                non_existent: BTreeSet::new(),
                aliases,
                data_streams,
            },
            remote_indices: BTreeSet::new(),
            ignore_unavailable: false,
        }
    }

    /// Mark the request as carrying the `ignore_unavailable` flag.
    pub fn with_ignore_unavailable(mut self, ignore_unavailable: bool) -> Self {
        self.ignore_unavailable = ignore_unavailable;
        self
    }

    /// Return the local part of the resolution.
    pub fn local(&self) -> &ResolvedLocal {
        &self.local
    }

    /// Return the remote cluster references of the request.
    pub fn remote_indices(&self) -> &BTreeSet<String> {
        &self.remote_indices
    }

    /// Return `true` if the request denotes "all local resources".
    pub fn is_local_all(&self) -> bool {
        self.local.local_all
    }

    /// Return `true` if the request carries the `ignore_unavailable` flag.
    pub fn is_ignore_unavailable(&self) -> bool {
        self.ignore_unavailable
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::meta::ResourceKind;

    #[test]
    fn resolution_partitions_by_kind() {
        let meta = Meta::builder()
            .index("logs-2024")
            .alias("sales-alias", &["sales-1"])
            .data_stream("ds-web", &[".ds-web-000001"])
            .build();
        let resolved = ResolvedIndices::of(
            &meta,
            &["logs-2024", "sales-alias", "ds-web", "missing", "remote:logs-*"],
        );
        assert_eq!(resolved.local().pure_indices().len(), 1);
        assert_eq!(resolved.local().aliases().len(), 1);
        assert_eq!(resolved.local().data_streams().len(), 1);
        assert_eq!(resolved.local().non_existent().len(), 1);
        assert_eq!(resolved.remote_indices().len(), 1);
        assert_eq!(resolved.local().len(), 4);
        assert!(!resolved.is_local_all());
    }

    #[test]
    fn local_all_covers_the_whole_catalog() {
        let meta = Meta::builder()
            .index("logs-2024")
            .alias("sales-alias", &["sales-1"])
            .data_stream("ds-web", &[".ds-web-000001"])
            .build();
        let resolved = ResolvedIndices::local_all(&meta);
        assert!(resolved.is_local_all());
        let union = resolved.local().union();
        assert!(union.iter().any(|id| id.name() == "sales-alias"));
        assert!(union.iter().any(|id| id.name() == "ds-web"));
        assert!(union.iter().any(|id| id.name() == "logs-2024"));
        assert!(union.iter().all(|id| id.kind() != ResourceKind::NonExistent));
    }

    #[test]
    fn member_detection_sees_parents() {
        let meta = Meta::builder()
            .alias("sales-alias", &["sales-1"])
            .build();
        let resolved = ResolvedIndices::of(&meta, &["sales-1"]);
        assert!(resolved.local().has_alias_or_data_stream_members());
        let resolved = ResolvedIndices::of(&meta, &["sales-alias"]);
        assert!(!resolved.local().has_alias_or_data_stream_members());
    }
}
