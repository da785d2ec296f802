//! Transport configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Limits and retry policy of an [`Endpoint`](crate::Endpoint).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Largest frame body accepted or sent, in bytes.
    pub max_frame_len: usize,
    /// How many times a push or fetch is retried after a `LockReject`.
    pub max_retries: u32,
    /// Pause before retrying after a `LockReject`.
    pub retry_backoff: Duration,
    /// Added to a long-poll wait when bounding how long a reply may take.
    pub reply_grace: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            max_frame_len: 64 * 1024 * 1024,
            max_retries: 16,
            retry_backoff: Duration::from_millis(25),
            reply_grace: Duration::from_secs(30),
        }
    }
}

/// Builder for [`RemoteConfig`].
#[derive(Debug, Default)]
pub struct RemoteConfigBuilder {
    config: RemoteConfig,
}

impl RemoteConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_frame_len(mut self, len: usize) -> Self {
        self.config.max_frame_len = len;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.config.retry_backoff = backoff;
        self
    }

    pub fn reply_grace(mut self, grace: Duration) -> Self {
        self.config.reply_grace = grace;
        self
    }

    pub fn build(self) -> RemoteConfig {
        self.config
    }
}
