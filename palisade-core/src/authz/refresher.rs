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

//! Debounced background rebuild of the stateful permission index.

use super::stateful::StatefulPermissions;
use crate::conf::StatefulConfig;
use palisade_model::Actions;
use palisade_model::FlattenedActionGroups;
use palisade_model::Meta;
use palisade_model::Pattern;
use palisade_model::Role;
use parking_lot::Mutex;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Supplier of the current cluster resource catalog.
#[async_trait::async_trait]
pub trait MetadataSource: Send + Sync {
    /// Return the current metadata snapshot.
    async fn current_meta(&self) -> Arc<Meta>;
}

/** Debounced, swap based refresh of the stateful permission index.

At most one rebuild task is in flight; further triggers coalesce into the
next loop iteration. Readers clone the current snapshot handle once at
the start of an evaluation; the rebuilt structure is swapped in
atomically and never mutated. Request evaluation never waits on a
rebuild.
*/
pub struct StatefulRefresher {
    roles: Arc<BTreeMap<String, Role>>,
    action_groups: Arc<FlattenedActionGroups>,
    actions: Arc<Actions>,
    universally_denied_indices: Pattern,
    config: StatefulConfig,
    snapshot: Arc<RwLock<Option<Arc<StatefulPermissions>>>>,
    source: Arc<RwLock<Option<Arc<dyn MetadataSource>>>>,
    trigger: Arc<Notify>,
    shutdown: Arc<AtomicBool>,
    worker_started: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl StatefulRefresher {
    /// Return a new instance. No task is spawned until the first update
    /// request.
    pub fn new(
        roles: Arc<BTreeMap<String, Role>>,
        action_groups: Arc<FlattenedActionGroups>,
        actions: Arc<Actions>,
        universally_denied_indices: Pattern,
        config: StatefulConfig,
    ) -> Self {
        Self {
            roles,
            action_groups,
            actions,
            universally_denied_indices,
            config,
            snapshot: Arc::new(RwLock::new(None)),
            source: Arc::new(RwLock::new(None)),
            trigger: Arc::new(Notify::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
            worker_started: AtomicBool::new(false),
            worker: Mutex::new(None),
        }
    }

    /// Return the current snapshot handle, if one was built yet.
    pub fn snapshot(&self) -> Option<Arc<StatefulPermissions>> {
        self.snapshot.read().clone()
    }

    /// Build and swap in a snapshot for `meta` on the calling thread.
    pub fn rebuild_now(&self, meta: &Meta) {
        if !self.config.enabled() {
            return;
        }
        let rebuilt = StatefulPermissions::new(
            &self.roles,
            &self.action_groups,
            &self.actions,
            meta,
            self.universally_denied_indices.clone(),
            self.config.max_heap_size_bytes(),
        );
        if !rebuilt.initialization_errors().is_empty() {
            log::warn!(
                "Stateful permission index for metadata version {} skipped {} role(s) with invalid configuration.",
                meta.version(),
                rebuilt.initialization_errors().len()
            );
        }
        log::debug!(
            "Stateful permission index built for metadata version {}: ~{} bytes{}.",
            meta.version(),
            rebuilt.estimated_size_bytes(),
            if rebuilt.is_truncated() {
                " (truncated)"
            } else {
                ""
            }
        );
        *self.snapshot.write() = Some(Arc::new(rebuilt));
    }

    /** Request an asynchronous rebuild against the source's current
    metadata. Repeated requests while a rebuild is in flight coalesce
    into one follow-up rebuild. */
    pub fn request_update(self: &Arc<Self>, source: Arc<dyn MetadataSource>) {
        if !self.config.enabled() || self.shutdown.load(Ordering::SeqCst) {
            return;
        }
        *self.source.write() = Some(source);
        if !self.worker_started.swap(true, Ordering::SeqCst) {
            let refresher = Arc::clone(self);
            let handle = tokio::spawn(async move { refresher.run_update_loop().await });
            *self.worker.lock() = Some(handle);
        }
        self.trigger.notify_one();
    }

    /// Stop the rebuild loop. Safe to call more than once.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.trigger.notify_one();
        if let Some(handle) = self.worker.lock().take() {
            handle.abort();
        }
    }

    async fn run_update_loop(&self) {
        let mut consecutive_rebuilds = 0u32;
        loop {
            self.trigger.notified().await;
            if self.shutdown.load(Ordering::SeqCst) {
                log::debug!("Stateful permission index refresher is shutting down.");
                return;
            }
            let source = self.source.read().clone();
            let Some(source) = source else {
                continue;
            };
            let meta = source.current_meta().await;
            let current_version = self
                .snapshot
                .read()
                .as_ref()
                .map(|snapshot| snapshot.meta_version());
            if current_version == Some(meta.version()) {
                consecutive_rebuilds = 0;
                continue;
            }
            if log::log_enabled!(log::Level::Debug) {
                log::debug!(
                    "Rebuilding stateful permission index for metadata version {}.",
                    meta.version()
                );
            }
            self.rebuild_now(&meta);
            consecutive_rebuilds += 1;
            if consecutive_rebuilds >= self.config.rebuild_backoff_threshold() {
                // Many rebuilds in a row indicate churning metadata; yield
                // for a while so the rebuild loop cannot starve other work.
                tokio::time::sleep(tokio::time::Duration::from_micros(
                    self.config.rebuild_backoff_micros(),
                ))
                .await;
                consecutive_rebuilds = 0;
            }
        }
    }
}
