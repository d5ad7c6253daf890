// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration of an authentication engine.
use serde::{Deserialize, Serialize};

use crate::version::{AlgorithmMask, Version};

/// Default maximum number of tasks an engine holds at the same time.
pub const DEFAULT_MAX_TASKS: usize = 64;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Lowest version this device accepts from a peer.
    pub min_version: Version,

    /// Version this device runs. Its algorithm mask decides which protocols are registered.
    pub cur_version: Version,

    /// Maximum number of live tasks. Creating a task beyond it fails with
    /// [`AllocationFailed`](crate::AuthError::AllocationFailed).
    pub max_tasks: usize,
}

impl EngineConfig {
    /// Configuration limited to the given algorithms.
    pub fn with_algorithms(algorithms: AlgorithmMask) -> Self {
        let mut config = Self::default();
        config.min_version.patch = algorithms;
        config.cur_version.patch = algorithms;
        config
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_version: Version::new(1, 0, AlgorithmMask::ALL),
            cur_version: Version::new(2, 0, AlgorithmMask::ALL),
            max_tasks: DEFAULT_MAX_TASKS,
        }
    }
}
