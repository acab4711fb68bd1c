//! Metadata resolver.
//!
//! Owns the refresh pipeline and serves queries from the most recently
//! published [`EntityIndex`]:
//!
//! ```text
//! fetch ──► parse ──► filters ──► validity ──► build index ──► publish
//!   │          │          │                                      │
//!   └──────────┴──────────┴──── failure: keep current index ─────┘
//! ```
//!
//! ## Concurrency
//!
//! Pipeline runs are serialized by a FIFO mutex. A `refresh()` arriving while
//! another run is in progress waits for it and then performs its own full run.
//! Queries never take that mutex; they load the current index pointer and keep
//! the snapshot they loaded for as long as they iterate.

use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::ResolverConfig;
use crate::criteria::CriteriaSet;
use crate::error::MetadataError;
use crate::filter::MetadataFilter;
use crate::index::{EntityIndex, Resolved};
use crate::metadata::{EntityDescriptor, JsonMetadataParser, MetadataParser};
use crate::scheduler::{spawn_refresh_task, RefreshSchedule};
use crate::source::{CacheValidators, FetchOutcome, SourceFetcher};

/// A failed refresh attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshFailure {
    /// When the attempt failed.
    pub at: DateTime<Utc>,
    /// Error description.
    pub message: String,
    /// Whether the failure came from the source fetcher.
    pub fetch_error: bool,
}

/// Point-in-time view of a resolver's refresh state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolverState {
    /// Last time a refresh published (or confirmed unchanged) metadata.
    pub last_successful_refresh: Option<DateTime<Utc>>,
    /// Last time a refresh started.
    pub last_refresh_attempt: Option<DateTime<Utc>>,
    /// When the background task will refresh next.
    pub next_scheduled_refresh: Option<DateTime<Utc>>,
    /// Failure of the latest refresh; cleared by the next success.
    pub last_failure: Option<RefreshFailure>,
    /// Entities in the published index.
    pub entity_count: usize,
    /// Whether a failed first refresh aborts initialization.
    pub fail_fast_initialization: bool,
    /// Whether invalid entities are excluded.
    pub require_valid_metadata: bool,
    /// Whether the published data came from the backup file.
    pub degraded: bool,
}

/// State only touched inside a pipeline run.
struct PipelineState {
    validators: Option<CacheValidators>,
    expiration: Option<DateTime<Utc>>,
    shut_down: bool,
}

enum CycleOutcome {
    Published {
        index: EntityIndex,
        expiration: Option<DateTime<Utc>>,
        validators: Option<CacheValidators>,
        degraded: bool,
    },
    NotModified,
}

/// Resolves metadata from a single source.
pub struct MetadataResolver {
    config: ResolverConfig,
    schedule: RefreshSchedule,
    fetcher: SourceFetcher,
    parser: Arc<dyn MetadataParser>,
    filters: Vec<Arc<dyn MetadataFilter>>,
    index: ArcSwap<EntityIndex>,
    state: RwLock<ResolverState>,
    pipeline: Mutex<PipelineState>,
    cancel: CancellationToken,
    reschedule: Arc<Notify>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Builder for [`MetadataResolver`].
pub struct MetadataResolverBuilder {
    config: ResolverConfig,
    parser: Arc<dyn MetadataParser>,
    filters: Vec<Arc<dyn MetadataFilter>>,
}

impl MetadataResolverBuilder {
    /// Use a different document parser. Defaults to [`JsonMetadataParser`].
    #[must_use]
    pub fn parser(mut self, parser: impl MetadataParser + 'static) -> Self {
        self.parser = Arc::new(parser);
        self
    }

    /// Use a shared document parser.
    #[must_use]
    pub fn shared_parser(mut self, parser: Arc<dyn MetadataParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Append a filter; filters run in the order added.
    #[must_use]
    pub fn filter(mut self, filter: impl MetadataFilter + 'static) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    /// Run the first refresh and start the background task.
    ///
    /// # Errors
    ///
    /// Returns `MetadataError::Configuration` if the source cannot be set up,
    /// and `MetadataError::Initialization` if the first refresh fails while
    /// fail-fast initialization is enabled.
    #[instrument(skip_all, fields(resolver_id = %self.config.id))]
    pub async fn initialize(self) -> Result<Arc<MetadataResolver>, MetadataError> {
        let fetcher = SourceFetcher::new(self.config.source.clone(), self.config.request_timeout)?;
        let config = self.config;

        info!(
            source = %config.source,
            fail_fast = config.fail_fast_initialization,
            require_valid = config.require_valid_metadata,
            "Initializing metadata resolver"
        );

        let resolver = Arc::new(MetadataResolver {
            schedule: RefreshSchedule::from_config(&config),
            state: RwLock::new(ResolverState {
                last_successful_refresh: None,
                last_refresh_attempt: None,
                next_scheduled_refresh: None,
                last_failure: None,
                entity_count: 0,
                fail_fast_initialization: config.fail_fast_initialization,
                require_valid_metadata: config.require_valid_metadata,
                degraded: false,
            }),
            config,
            fetcher,
            parser: self.parser,
            filters: self.filters,
            index: ArcSwap::from_pointee(EntityIndex::empty()),
            pipeline: Mutex::new(PipelineState {
                validators: None,
                expiration: None,
                shut_down: false,
            }),
            cancel: CancellationToken::new(),
            reschedule: Arc::new(Notify::new()),
            task: std::sync::Mutex::new(None),
        });

        let first_delay = {
            let mut pipeline = resolver.pipeline.lock().await;
            match resolver.run_cycle(&mut pipeline).await {
                Ok(delay) => delay,
                Err(e) if resolver.config.fail_fast_initialization => {
                    return Err(MetadataError::Initialization {
                        resolver_id: resolver.config.id.clone(),
                        source: Box::new(e),
                    });
                },
                Err(_) => {
                    warn!("Continuing with empty metadata; fail-fast initialization is disabled");
                    resolver.schedule.failure_delay()
                },
            }
        };

        if resolver.config.background_refresh {
            let handle = spawn_refresh_task(
                Arc::downgrade(&resolver),
                resolver.cancel.clone(),
                Arc::clone(&resolver.reschedule),
                first_delay,
            );
            if let Ok(mut task) = resolver.task.lock() {
                *task = Some(handle);
            }
        }

        Ok(resolver)
    }
}

impl MetadataResolver {
    /// Start building a resolver for `config`.
    #[must_use]
    pub fn builder(config: ResolverConfig) -> MetadataResolverBuilder {
        MetadataResolverBuilder {
            config,
            parser: Arc::new(JsonMetadataParser::new()),
            filters: Vec::new(),
        }
    }

    /// Diagnostic identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.config.id
    }

    /// The configuration this resolver was built with.
    #[must_use]
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Lazily iterate the entities matching `criteria`.
    ///
    /// The iterator reads the index that was current when this was called,
    /// even if a refresh publishes a new one meanwhile.
    ///
    /// # Errors
    ///
    /// Returns `MetadataError::EmptyCriteria` for an empty set.
    pub fn resolve(&self, criteria: &CriteriaSet) -> Result<Resolved, MetadataError> {
        criteria.ensure_not_empty()?;
        Ok(EntityIndex::query(self.index.load_full(), criteria.clone()))
    }

    /// Resolve at most one entity.
    ///
    /// # Errors
    ///
    /// Returns `MetadataError::EmptyCriteria` for an empty set and
    /// `MetadataError::AmbiguousMatch` if several entities match and the
    /// criteria name no entity identifier.
    pub fn resolve_single(
        &self,
        criteria: &CriteriaSet,
    ) -> Result<Option<Arc<EntityDescriptor>>, MetadataError> {
        let mut resolved = self.resolve(criteria)?;
        let first = resolved.next();
        if first.is_some() && !criteria.has_entity_id() {
            let more = resolved.count();
            if more > 0 {
                return Err(MetadataError::AmbiguousMatch { matches: more + 1 });
            }
        }
        Ok(first)
    }

    /// The currently published index.
    #[must_use]
    pub fn snapshot(&self) -> Arc<EntityIndex> {
        self.index.load_full()
    }

    /// Current refresh state.
    #[must_use]
    pub fn state(&self) -> ResolverState {
        match self.state.read() {
            Ok(state) => state.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Run the refresh pipeline now and wait for it.
    ///
    /// Also resets the background timer to the delay this run computes.
    ///
    /// # Errors
    ///
    /// Returns `MetadataError::ShutDown` after [`shutdown`](Self::shutdown)
    /// and `MetadataError::Refresh` if the pipeline fails; the previously
    /// published index stays in place.
    #[instrument(skip(self), fields(resolver_id = %self.config.id))]
    pub async fn refresh(&self) -> Result<(), MetadataError> {
        let mut pipeline = self.pipeline.lock().await;
        if pipeline.shut_down {
            return Err(MetadataError::ShutDown {
                resolver_id: self.config.id.clone(),
            });
        }

        let result = self.run_cycle(&mut pipeline).await;
        drop(pipeline);
        self.reschedule.notify_one();

        result.map(|_| ()).map_err(|e| MetadataError::Refresh {
            resolver_id: self.config.id.clone(),
            source: Box::new(e),
        })
    }

    /// Stop background refresh.
    ///
    /// Waits for an in-flight pipeline run to finish; no run starts after this
    /// returns. Calling it again does nothing.
    #[instrument(skip(self), fields(resolver_id = %self.config.id))]
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        {
            let mut pipeline = self.pipeline.lock().await;
            if pipeline.shut_down {
                return;
            }
            pipeline.shut_down = true;
        }
        if let Ok(mut state) = self.state.write() {
            state.next_scheduled_refresh = None;
        }

        let handle = self.task.lock().ok().and_then(|mut task| task.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background refresh task ended abnormally");
            }
        }
        info!("Metadata resolver shut down");
    }

    /// Delay until the next scheduled refresh, from the current state.
    pub(crate) fn pending_delay(&self) -> Duration {
        let next = self.state().next_scheduled_refresh;
        next.and_then(|at| (at - Utc::now()).to_std().ok())
            .unwrap_or(Duration::ZERO)
    }

    /// Run a refresh for the background task.
    ///
    /// Returns the next delay, or `None` once the resolver is shut down.
    pub(crate) async fn scheduled_refresh(&self) -> Option<Duration> {
        let mut pipeline = self.pipeline.lock().await;
        if pipeline.shut_down || self.cancel.is_cancelled() {
            return None;
        }
        debug!(resolver_id = %self.config.id, "Scheduled refresh");
        let delay = match self.run_cycle(&mut pipeline).await {
            Ok(delay) => delay,
            Err(_) => self.schedule.failure_delay(),
        };
        Some(delay)
    }

    /// One pipeline run plus state bookkeeping. Returns the next delay.
    async fn run_cycle(&self, pipeline: &mut PipelineState) -> Result<Duration, MetadataError> {
        let started = Utc::now();
        if let Ok(mut state) = self.state.write() {
            state.last_refresh_attempt = Some(started);
        }

        match self.run_pipeline(pipeline).await {
            Ok(outcome) => Ok(self.publish(pipeline, outcome)),
            Err(e) => {
                let delay = self.schedule.failure_delay();
                warn!(
                    resolver_id = %self.config.id,
                    error = %e,
                    retry_secs = delay.as_secs(),
                    "Metadata refresh failed; keeping current metadata"
                );
                if let Ok(mut state) = self.state.write() {
                    state.last_failure = Some(RefreshFailure {
                        at: started,
                        message: e.to_string(),
                        fetch_error: e.is_fetch_error(),
                    });
                    state.next_scheduled_refresh = self.next_refresh_at(delay);
                }
                Err(e)
            },
        }
    }

    async fn run_pipeline(&self, pipeline: &PipelineState) -> Result<CycleOutcome, MetadataError> {
        let fetched = match self.fetcher.fetch(pipeline.validators.as_ref()).await? {
            FetchOutcome::Fetched(fetched) => fetched,
            FetchOutcome::NotModified => return Ok(CycleOutcome::NotModified),
        };

        let mut document = self.parser.parse(&fetched.bytes)?;

        for filter in &self.filters {
            let outcome = filter.filter(document)?;
            for rejected in &outcome.rejected {
                warn!(resolver_id = %self.config.id, filter = filter.name(), "{rejected}");
            }
            document = outcome.document;
        }

        let now = Utc::now();
        let expiration = document.earliest_expiration(now);
        let require_valid = self.config.require_valid_metadata;
        let mut excluded = 0usize;
        let entities = document.flatten().into_iter().filter(|flat| {
            let keep = !require_valid || flat.is_valid_at(now);
            if !keep {
                debug!(entity_id = %flat.entity.entity_id, "Excluding entity outside its validity window");
                excluded += 1;
            }
            keep
        });
        let index = EntityIndex::from_flattened(entities, require_valid);
        if excluded > 0 {
            info!(resolver_id = %self.config.id, excluded, "Excluded invalid entities");
        }

        Ok(CycleOutcome::Published {
            index,
            expiration,
            validators: fetched.validators,
            degraded: fetched.origin.is_degraded(),
        })
    }

    fn publish(&self, pipeline: &mut PipelineState, outcome: CycleOutcome) -> Duration {
        let now = Utc::now();
        let (entity_count, degraded) = match outcome {
            CycleOutcome::Published {
                index,
                expiration,
                validators,
                degraded,
            } => {
                let count = index.len();
                self.index.store(Arc::new(index));
                pipeline.validators = validators;
                pipeline.expiration = expiration;
                (count, degraded)
            },
            CycleOutcome::NotModified => {
                debug!(resolver_id = %self.config.id, "Metadata unchanged");
                let current = self.index.load_full();
                match current.without_expired(now) {
                    Some(pruned) => {
                        let count = pruned.len();
                        info!(
                            resolver_id = %self.config.id,
                            expired = current.len() - count,
                            "Dropped entities whose validity ended"
                        );
                        self.index.store(Arc::new(pruned));
                        (count, false)
                    },
                    None => (current.len(), false),
                }
            },
        };

        let delay = self.schedule.success_delay(now, pipeline.expiration);
        if let Ok(mut state) = self.state.write() {
            state.last_successful_refresh = Some(now);
            state.last_failure = None;
            state.entity_count = entity_count;
            state.degraded = degraded;
            state.next_scheduled_refresh = self.next_refresh_at(delay);
        }

        if degraded {
            warn!(resolver_id = %self.config.id, entities = entity_count, "Serving metadata from backup file");
        } else {
            info!(
                resolver_id = %self.config.id,
                entities = entity_count,
                next_refresh_secs = delay.as_secs(),
                "Metadata published"
            );
        }
        delay
    }

    fn next_refresh_at(&self, delay: Duration) -> Option<DateTime<Utc>> {
        if !self.config.background_refresh {
            return None;
        }
        chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| Utc::now().checked_add_signed(d))
    }
}

impl fmt::Debug for MetadataResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataResolver")
            .field("id", &self.config.id)
            .field("source", &self.config.source)
            .field("entities", &self.index.load().len())
            .finish_non_exhaustive()
    }
}

impl Drop for MetadataResolver {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
