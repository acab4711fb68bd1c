//! Refresh scheduling.
//!
//! [`RefreshSchedule`] turns the expiration hints of a published document into
//! the delay before the next refresh. The background task spawned by
//! [`spawn_refresh_task`] sleeps for that delay, runs the refresh pipeline, and
//! repeats until cancelled or the resolver is dropped.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ResolverConfig;
use crate::resolver::MetadataResolver;

/// Refresh delay policy derived from a [`ResolverConfig`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefreshSchedule {
    min_delay: Duration,
    max_delay: Duration,
    factor: f64,
    failure_delay: Duration,
    jitter: Duration,
}

impl RefreshSchedule {
    /// Build the policy for a configuration.
    #[must_use]
    pub fn from_config(config: &ResolverConfig) -> Self {
        Self {
            min_delay: config.min_refresh_delay,
            max_delay: config.max_refresh_delay,
            factor: config.refresh_delay_factor,
            failure_delay: config.failure_refresh_delay,
            jitter: config.refresh_jitter,
        }
    }

    /// Delay after a successful refresh, with random jitter applied.
    #[must_use]
    pub fn success_delay(&self, now: DateTime<Utc>, expiration: Option<DateTime<Utc>>) -> Duration {
        let jitter = if self.jitter.is_zero() {
            Duration::ZERO
        } else {
            let millis = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
            Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
        };
        self.success_delay_with_jitter(now, expiration, jitter)
    }

    /// Delay after a successful refresh, subtracting a given jitter.
    ///
    /// `(expiration - now) * factor - jitter`, clamped to the configured
    /// bounds. Without an expiration the maximum delay is used.
    #[must_use]
    pub fn success_delay_with_jitter(
        &self,
        now: DateTime<Utc>,
        expiration: Option<DateTime<Utc>>,
        jitter: Duration,
    ) -> Duration {
        let Some(expiration) = expiration else {
            return self.max_delay;
        };

        let remaining = (expiration - now).to_std().unwrap_or(Duration::ZERO);
        let scaled = remaining.mul_f64(self.factor).saturating_sub(jitter);
        scaled.clamp(self.min_delay, self.max_delay)
    }

    /// Delay after a failed refresh.
    #[must_use]
    pub fn failure_delay(&self) -> Duration {
        self.failure_delay
    }
}

/// Spawn the background refresh task for a resolver.
///
/// The task only holds a weak reference, so dropping the last resolver handle
/// ends it. A notification on `reschedule` makes the task re-read the delay
/// computed by the most recent refresh.
pub(crate) fn spawn_refresh_task(
    resolver: Weak<MetadataResolver>,
    cancel: CancellationToken,
    reschedule: Arc<Notify>,
    first_delay: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut delay = first_delay;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = reschedule.notified() => {
                    let Some(resolver) = resolver.upgrade() else { break };
                    delay = resolver.pending_delay();
                    debug!(resolver_id = %resolver.id(), delay_ms = delay.as_millis() as u64, "Refresh rescheduled");
                    continue;
                },
                _ = tokio::time::sleep(delay) => {},
            }

            let Some(resolver) = resolver.upgrade() else { break };
            match resolver.scheduled_refresh().await {
                Some(next) => delay = next,
                None => break,
            }
        }
        info!("Background refresh task stopped");
    })
}
