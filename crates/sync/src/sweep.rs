//! Staleness reconciliation sweep.
//!
//! One invocation handles one listing page: every identifier on the page is
//! checked against the origin's metadata, stale objects are re-fetched and
//! objects the origin no longer has are deleted. If the listing continues, the
//! cursor for the next page is put on the work queue and a later invocation
//! picks it up, so each invocation's work is bounded by the page size.

use crate::populate::{PopulateOutcome, Populator};
use crate::queue::{QueueError, SweepMessage, WorkQueue};
use futures::StreamExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use tessera_core::config::SweepConfig;
use tessera_core::{CacheKey, KeyResolver, OriginKind, SizeClass};
use tessera_origin::{BearerToken, MetadataLookup, MetadataSource, TokenProvider};
use tessera_storage::{
    ContinuationToken, ListingOptions, ListingResume, ObjectStore, StorageError,
};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};

/// Why an invocation stopped early.
#[derive(Debug, Error)]
pub enum SweepError {
    /// No bearer token; nothing was listed or enqueued.
    #[error("origin token unavailable")]
    TokenUnavailable,

    #[error("listing failed: {0}")]
    Listing(#[from] StorageError),

    /// The page was processed but its continuation could not be enqueued.
    #[error("failed to enqueue continuation: {source}")]
    Enqueue {
        #[source]
        source: QueueError,
        report: SweepReport,
    },
}

impl SweepError {
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::TokenUnavailable => "token_unavailable",
            Self::Listing(_) => "listing_failed",
            Self::Enqueue { .. } => "enqueue_failed",
        }
    }
}

/// Counters for one invocation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Keys on the page.
    pub listed: usize,
    /// Identifiers whose origin metadata was requested.
    pub checked: usize,
    /// Identifiers left alone.
    pub fresh: usize,
    /// Identifiers whose variants were re-fetched.
    pub refreshed: usize,
    /// Identifiers whose variants were deleted.
    pub deleted: usize,
    /// Malformed keys plus identifiers whose check or action failed.
    pub failed: usize,
    /// Whether a continuation message was enqueued.
    pub continued: bool,
}

/// Tunables for the sweep.
#[derive(Clone, Debug)]
pub struct SweepOptions {
    pub prefix: String,
    pub page_size: usize,
    pub max_concurrent_checks: usize,
}

impl SweepOptions {
    pub fn from_config(config: &SweepConfig) -> Self {
        Self {
            prefix: config.prefix.clone(),
            page_size: config.effective_page_size() as usize,
            max_concurrent_checks: config.effective_concurrency(),
        }
    }
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self::from_config(&SweepConfig::default())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CheckOutcome {
    Fresh,
    Refreshed,
    Deleted,
    Failed,
}

/// Identifiers on a page, with the oldest known upload time among the
/// variants listed for each.
type PageGroups = BTreeMap<(OriginKind, String), Option<OffsetDateTime>>;

/// Reconciles cached objects against the origin, one page per call.
pub struct ReconciliationSweep {
    store: Arc<dyn ObjectStore>,
    tokens: Arc<dyn TokenProvider>,
    metadata: Arc<dyn MetadataSource>,
    populator: Populator,
    resolver: KeyResolver,
    queue: Arc<dyn WorkQueue>,
    options: SweepOptions,
}

impl ReconciliationSweep {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        tokens: Arc<dyn TokenProvider>,
        metadata: Arc<dyn MetadataSource>,
        populator: Populator,
        resolver: KeyResolver,
        queue: Arc<dyn WorkQueue>,
        options: SweepOptions,
    ) -> Self {
        Self {
            store,
            tokens,
            metadata,
            populator,
            resolver,
            queue,
            options,
        }
    }

    /// Process one page. `None` starts a new pass at the beginning of the
    /// keyspace.
    #[instrument(skip_all, fields(resumed = cursor.is_some()))]
    pub async fn run(&self, cursor: Option<ContinuationToken>) -> Result<SweepReport, SweepError> {
        let token = self
            .tokens
            .access_token()
            .await
            .ok_or(SweepError::TokenUnavailable)?;

        let page = self
            .store
            .list_page(
                &self.options.prefix,
                ListingOptions::new(self.options.page_size),
                cursor.map(ListingResume::new),
            )
            .await?;

        let mut report = SweepReport {
            listed: page.objects.len(),
            ..SweepReport::default()
        };

        let mut groups = PageGroups::new();
        for object in &page.objects {
            let key = match CacheKey::parse(&object.key) {
                Ok(key) => key,
                Err(e) => {
                    warn!(key = %object.key, error = %e, "Skipping malformed cache key");
                    report.failed += 1;
                    continue;
                }
            };
            groups
                .entry((key.origin(), key.identifier().to_string()))
                .and_modify(|oldest| {
                    *oldest = match (*oldest, object.last_modified) {
                        (Some(a), Some(b)) => Some(a.min(b)),
                        (a, b) => a.or(b),
                    }
                })
                .or_insert(object.last_modified);
        }

        report.checked = groups.len();
        let concurrency = self
            .options
            .max_concurrent_checks
            .clamp(1, self.options.page_size.max(1));
        let outcomes: Vec<CheckOutcome> = futures::stream::iter(groups)
            .map(|((origin, identifier), uploaded)| {
                self.check(origin, identifier, uploaded, &token)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                CheckOutcome::Fresh => report.fresh += 1,
                CheckOutcome::Refreshed => report.refreshed += 1,
                CheckOutcome::Deleted => report.deleted += 1,
                CheckOutcome::Failed => report.failed += 1,
            }
        }

        if let Some(next) = page.next_token {
            if let Err(source) = self.queue.send(SweepMessage::from_token(&next)).await {
                warn!(error = %source, "Failed to enqueue sweep continuation");
                return Err(SweepError::Enqueue { source, report });
            }
            report.continued = true;
        }

        info!(
            listed = report.listed,
            checked = report.checked,
            fresh = report.fresh,
            refreshed = report.refreshed,
            deleted = report.deleted,
            failed = report.failed,
            continued = report.continued,
            "Sweep page complete"
        );

        Ok(report)
    }

    #[instrument(skip(self, token), fields(origin = %origin))]
    async fn check(
        &self,
        origin: OriginKind,
        identifier: String,
        uploaded: Option<OffsetDateTime>,
        token: &BearerToken,
    ) -> CheckOutcome {
        let lookup = match self.metadata.metadata(origin, &identifier, token).await {
            Ok(lookup) => lookup,
            Err(e) => {
                warn!(error = %e, "Origin metadata lookup failed");
                return CheckOutcome::Failed;
            }
        };

        // Any size class identifies every variant
        let key = match CacheKey::new(&identifier, SizeClass::Small, origin) {
            Ok(key) => key,
            Err(e) => {
                warn!(error = %e, "Invalid identifier on listed key");
                return CheckOutcome::Failed;
            }
        };

        match lookup {
            MetadataLookup::NotFound => self.delete_variants(&key).await,
            MetadataLookup::Found(metadata) => match uploaded {
                Some(uploaded) if metadata.modified_time > uploaded => {
                    debug!(
                        modified = %metadata.modified_time,
                        uploaded = %uploaded,
                        "Origin changed since upload"
                    );
                    self.refresh_variants(&key).await
                }
                Some(_) => CheckOutcome::Fresh,
                None => {
                    debug!("Upload time unknown, leaving object alone");
                    CheckOutcome::Fresh
                }
            },
        }
    }

    async fn delete_variants(&self, key: &CacheKey) -> CheckOutcome {
        let mut outcome = CheckOutcome::Deleted;
        for variant in key.variants() {
            if let Err(e) = self.store.delete(&variant.to_string()).await {
                warn!(key = %variant, error = %e, "Failed to delete object missing at origin");
                outcome = CheckOutcome::Failed;
            }
        }
        if outcome == CheckOutcome::Deleted {
            info!(identifier = key.identifier(), "Deleted objects missing at origin");
        }
        outcome
    }

    async fn refresh_variants(&self, key: &CacheKey) -> CheckOutcome {
        let mut outcome = CheckOutcome::Refreshed;
        for variant in key.variants() {
            let resolved = self.resolver.resolve_key(&variant);
            let populated = self.populator.populate(&resolved, true).await;
            if populated != PopulateOutcome::Stored {
                warn!(key = %variant, outcome = populated.as_str(), "Forced resync failed");
                outcome = CheckOutcome::Failed;
            }
        }
        outcome
    }
}
