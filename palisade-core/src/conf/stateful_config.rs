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

//! Parsing of configuration for the stateful permission index.

use config::ConfigBuilder;
use config::builder::BuilderState;
use serde::{Deserialize, Serialize};

use super::AppConfigDefaults;

/// Configuration for the stateful precomputed permission index.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StatefulConfig {
    /// See [Self::enabled()].
    enabled: bool,
    /// See [Self::max_heap_size_bytes()].
    #[serde(rename = "maxheapsizebytes")]
    max_heap_size_bytes: u64,
    /// See [Self::rebuild_backoff_micros()].
    #[serde(rename = "rebuildbackoffmicros")]
    rebuild_backoff_micros: u64,
    /// See [Self::rebuild_backoff_threshold()].
    #[serde(rename = "rebuildbackoffthreshold")]
    rebuild_backoff_threshold: u32,
}

impl AppConfigDefaults for StatefulConfig {
    /// Provide defaults for this part of the configuration
    fn set_defaults<T: BuilderState>(
        config_builder: ConfigBuilder<T>,
        prefix: &str,
    ) -> ConfigBuilder<T> {
        config_builder
            .set_default(prefix.to_string() + "." + "enabled", "true")
            .unwrap()
            .set_default(
                prefix.to_string() + "." + "maxheapsizebytes",
                "10485760",
            )
            .unwrap()
            .set_default(
                prefix.to_string() + "." + "rebuildbackoffmicros",
                "1000000",
            )
            .unwrap()
            .set_default(prefix.to_string() + "." + "rebuildbackoffthreshold", "8")
            .unwrap()
    }
}

impl StatefulConfig {
    /// Override the heap budget for the precomputed index.
    pub fn with_max_heap_size_bytes(mut self, max_heap_size_bytes: u64) -> Self {
        self.max_heap_size_bytes = max_heap_size_bytes;
        self
    }

    /// Return `true` if the stateful index should be built at all.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /** Return the heap budget in bytes for the precomputed index. Roles
    that do not fit fall back to pattern evaluation; the budget trades
    memory for lookup speed and never changes decisions. */
    pub fn max_heap_size_bytes(&self) -> u64 {
        self.max_heap_size_bytes
    }

    /// Return the backoff sleep inserted after many consecutive rebuilds.
    pub fn rebuild_backoff_micros(&self) -> u64 {
        self.rebuild_backoff_micros
    }

    /// Return the number of consecutive rebuilds after which the backoff
    /// sleep is inserted.
    pub fn rebuild_backoff_threshold(&self) -> u32 {
        self.rebuild_backoff_threshold
    }
}

impl Default for StatefulConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_heap_size_bytes: 10 * 1024 * 1024,
            rebuild_backoff_micros: 1_000_000,
            rebuild_backoff_threshold: 8,
        }
    }
}
