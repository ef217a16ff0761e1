//! Polling jobs for fields, activities and crops.
//!
//! A poll reads through the cache: an unexpired payload under the fetch
//! fingerprint is reused, a miss goes upstream with retries. Fresh payloads
//! and the processed snapshot are staged, so they only reach the cache if
//! the run succeeds.
//!
//! # Params
//!
//! - Fetch filters (`farm_id`, `season_id`, `company_id`, `field_id`,
//!   `activity_type`, `updated_since`) narrow the upstream query.
//! - `refresh=true` ignores any cached payload.

use std::sync::atomic::Ordering;

use serde_json::Value;
use tracing::info;

use crate::external::data_source::{fingerprint, is_fetch_param, latest_key, ResourceType};
use crate::jobs::{JobError, RunScope};
use crate::models::JobParams;
use crate::services::cache_service::Lookup;
use crate::services::job_executor::{JobContext, JobResult};
use crate::services::processor::{process_records, ResourceSnapshot};
use crate::services::retry::retry_with_backoff;

/// Cached-or-fetched payload for a resource. Concurrent fetches of the same
/// fingerprint, from this job or any other, share one upstream call.
pub(crate) async fn fetch_resource(
    ctx: &JobContext,
    scope: &RunScope,
    resource: ResourceType,
    params: &JobParams,
    refresh: bool,
) -> Result<Lookup, JobError> {
    let key = fingerprint(resource, params);
    let source = ctx.data_source.clone();
    let policy = ctx.retry.clone();
    let attempts = scope.attempt_counter();
    let counted = attempts.clone();
    let params = params.clone();

    let fetch = move || async move {
        let label = format!("fetch {}", resource);
        retry_with_backoff(&policy, &label, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            let source = source.clone();
            let params = params.clone();
            async move { source.fetch(resource, &params).await }
        })
        .await
    };

    let lookup = if refresh {
        ctx.cache.refresh(&key, fetch).await
    } else {
        ctx.cache.load(&key, fetch).await
    };
    // A run that shared another job's fetch still depended on an upstream call.
    if !matches!(lookup, Ok(Lookup::Cached(_))) {
        counted.fetch_max(1, Ordering::SeqCst);
    }
    Ok(lookup?)
}

/// Stages a fetched payload and, for unfiltered polls, the processed snapshot.
pub(crate) fn stage_results(
    ctx: &JobContext,
    scope: &mut RunScope,
    resource: ResourceType,
    params: &JobParams,
    lookup: &Lookup,
    snapshot: &ResourceSnapshot,
) {
    if !matches!(lookup, Lookup::Cached(_)) {
        scope.stage(
            fingerprint(resource, params),
            lookup.value().clone(),
            ctx.ttls.for_resource(resource),
        );
    }

    // A filtered poll only sees part of the data; it must not replace the
    // snapshot the daily summary reads.
    if !params.keys().any(|name| is_fetch_param(name)) {
        if let Ok(value) = serde_json::to_value(snapshot) {
            scope.stage(latest_key(resource), value, ctx.ttls.snapshot);
        }
    }
}

pub async fn run(ctx: &JobContext, scope: &mut RunScope, resource: ResourceType) -> Result<JobResult, JobError> {
    let params = scope.descriptor().params().clone();
    let refresh = scope
        .descriptor()
        .param("refresh")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    info!("🌾 Polling {} (refresh: {})", resource, refresh);

    let lookup = fetch_resource(ctx, scope, resource, &params, refresh).await?;
    let payload: &Value = lookup.value();
    let snapshot = process_records(resource, payload);

    stage_results(ctx, scope, resource, &params, &lookup, &snapshot);

    let source = match lookup {
        Lookup::Cached(_) => "cache",
        Lookup::Fetched(_) => "upstream",
        Lookup::Joined(_) => "shared fetch",
    };
    info!("✅ Polled {}: {} records (source: {})", resource, snapshot.records.len(), source);

    Ok(JobResult {
        items_processed: snapshot.records.len() as i32,
        items_failed: snapshot.skipped as i32,
        delivery: None,
    })
}
