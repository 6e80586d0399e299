//! Storage contract consumed by the sweep engine.
//!
//! The engine only reads targets and rules. Its writes are limited to deleting
//! consumed rules, appending audit entries, marking feed records as seen,
//! pruning the audit log and holding the sweep lease.

use std::time::Duration;

use uuid::Uuid;

use crate::error::Result;
use crate::model::{ChannelConfig, KeywordRule, Target};

pub trait Registry: Send + Sync {
    /// Enabled targets in stable order, most recently created first
    fn list_enabled_targets(&self) -> Result<Vec<Target>>;

    /// Rules currently armed on a target
    fn list_rules(&self, target_id: &Uuid) -> Result<Vec<KeywordRule>>;

    fn delete_rule(&self, rule_id: &Uuid) -> Result<()>;

    fn append_log(
        &self,
        target_id: &Uuid,
        keyword: Option<&str>,
        found: bool,
        message: &str,
    ) -> Result<()>;

    fn channel_config(&self) -> Result<Option<ChannelConfig>>;

    fn is_record_seen(&self, target_id: &Uuid, record_id: &str) -> Result<bool>;

    fn mark_record_seen(&self, target_id: &Uuid, record_id: &str) -> Result<()>;

    /// Keep only the `keep` most recent log entries. Returns how many were removed.
    fn prune_logs(&self, keep: usize) -> Result<usize>;

    /// Take or renew the lease that lets one holder sweep at a time, across
    /// every process sharing the registry. False while another holder's lease
    /// is unexpired.
    fn acquire_sweep_lease(&self, holder: &str, ttl: Duration) -> Result<bool>;

    /// Give the lease back. No-op unless `holder` owns it.
    fn release_sweep_lease(&self, holder: &str) -> Result<()>;
}
