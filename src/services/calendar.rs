use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::OwnedMutexGuard;
use tracing::{info, warn};

use crate::db::models::{CalendarConnection, CalendarEvent, Provider};
use crate::db::{ConnectionRepository, EventRepository};
use crate::error::{AppError, AppResult};
use crate::ics;
use crate::services::feeds::{redact_feed_url, FeedClient};
use crate::services::reconcile::{self, SyncResult};
use crate::AppState;

/// One async mutex per `(user, provider)` so overlapping syncs of the same
/// calendar run one after the other.
#[derive(Default)]
pub struct SyncLocks {
    inner: Mutex<HashMap<(String, Provider), Arc<tokio::sync::Mutex<()>>>>,
}

impl SyncLocks {
    pub async fn acquire(&self, user_id: &str, provider: Provider) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            map.entry((user_id.to_string(), provider))
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

/// Totals reported by a batch sync over many connections.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct BatchSummary {
    pub connections_processed: usize,
    pub successful_syncs: usize,
    pub total_events_processed: usize,
}

/// Calendar sync manager:
///
/// - fetches ICS feeds for Canvas / Apple connections and parses them;
/// - reconciles the parsed snapshot against the stored events inside one
///   transaction;
/// - records the outcome on the connection row.
pub struct CalendarSyncManager;

impl CalendarSyncManager {
    /// Reconcile `events` against what is stored for `(user_id, provider)`.
    ///
    /// Runs in a single transaction. A failing row is logged and counted in
    /// `errors`; the rest of the batch still commits.
    pub async fn apply(
        pool: &SqlitePool,
        user_id: &str,
        provider: Provider,
        events: Vec<CalendarEvent>,
    ) -> AppResult<SyncResult> {
        let date_fallbacks = events.iter().filter(|e| e.date_fallback).count();
        let mut tx = pool.begin().await?;

        let stored = EventRepository::find_by_user_provider(&mut *tx, user_id, provider).await?;
        let plan = reconcile::plan(events, &stored);

        let mut result = SyncResult {
            processed: plan.processed,
            date_fallbacks,
            ..Default::default()
        };

        for event in &plan.inserts {
            match EventRepository::insert(&mut *tx, user_id, event).await {
                Ok(()) => result.new += 1,
                Err(e) => {
                    warn!(
                        "Failed to insert {} event {} for user {}: {:?}",
                        provider.as_str(),
                        event.source_event_id,
                        user_id,
                        e
                    );
                    result.errors += 1;
                }
            }
        }

        for (id, event) in &plan.updates {
            match EventRepository::update(&mut *tx, id, event).await {
                Ok(()) => result.updated += 1,
                Err(e) => {
                    warn!("Failed to update event {} for user {}: {:?}", id, user_id, e);
                    result.errors += 1;
                }
            }
        }

        for id in &plan.deletes {
            match EventRepository::delete(&mut *tx, id).await {
                Ok(()) => result.deleted += 1,
                Err(e) => {
                    warn!("Failed to delete event {} for user {}: {:?}", id, user_id, e);
                    result.errors += 1;
                }
            }
        }

        tx.commit().await?;

        info!(
            "Reconciled {} events for user {}: {} new, {} updated, {} deleted, {} errors",
            provider.as_str(),
            user_id,
            result.new,
            result.updated,
            result.deleted,
            result.errors
        );
        Ok(result)
    }

    /// Fetch, parse and reconcile one ICS connection, then record the outcome
    /// on the connection.
    pub async fn sync_ics_connection(
        state: &Arc<AppState>,
        connection: &CalendarConnection,
    ) -> AppResult<SyncResult> {
        let provider = connection
            .provider()
            .filter(|p| p.is_ics_feed())
            .ok_or_else(|| {
                AppError::BadRequest(format!(
                    "Connection {} is not an ICS feed connection",
                    connection.id
                ))
            })?;
        let feed_url = connection.feed_url.as_deref().ok_or_else(|| {
            AppError::Validation(format!("Connection {} has no feed URL", connection.id))
        })?;

        let _guard = state
            .sync_locks
            .acquire(&connection.user_id, provider)
            .await;

        let outcome = async {
            let body = FeedClient::new(state.http.clone()).fetch_ics(feed_url).await?;
            let parsed = ics::parse_ics(&body, provider);
            if parsed.date_fallbacks > 0 {
                warn!(
                    "Feed {} needed {} date fallback(s)",
                    redact_feed_url(feed_url),
                    parsed.date_fallbacks
                );
            }
            Self::apply(&state.db, &connection.user_id, provider, parsed.events).await
        }
        .await;

        let error_text = outcome.as_ref().err().map(|e| e.to_string());
        if let Err(e) =
            ConnectionRepository::record_sync(&state.db, &connection.id, error_text.as_deref())
                .await
        {
            warn!(
                "Failed to record sync status for connection {}: {:?}",
                connection.id, e
            );
        }

        outcome
    }

    /// Sync every auto-sync connection of `provider`. A failing connection is
    /// logged and marked failed; the batch continues.
    pub async fn sync_all(state: &Arc<AppState>, provider: Provider) -> AppResult<BatchSummary> {
        info!(
            "Starting {} calendar synchronization for all connections",
            provider.as_str()
        );

        let connections = ConnectionRepository::list_auto_sync(&state.db, provider).await?;
        let mut summary = BatchSummary::default();

        for connection in connections {
            summary.connections_processed += 1;
            match Self::sync_ics_connection(state, &connection).await {
                Ok(result) => {
                    summary.successful_syncs += 1;
                    summary.total_events_processed += result.processed;
                }
                Err(e) => warn!(
                    "Failed to sync {} connection {}: {:?}",
                    provider.as_str(),
                    connection.id,
                    e
                ),
            }
        }

        info!(
            "{} sync finished: {}/{} connections, {} events",
            provider.as_str(),
            summary.successful_syncs,
            summary.connections_processed,
            summary.total_events_processed
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn lock_serialises_same_key_only() {
        let locks = Arc::new(SyncLocks::default());
        let guard = locks.acquire("u1", Provider::Canvas).await;

        // A different provider is independent.
        let other = tokio::time::timeout(
            Duration::from_millis(50),
            locks.acquire("u1", Provider::Apple),
        )
        .await;
        assert!(other.is_ok());

        let same = tokio::time::timeout(
            Duration::from_millis(50),
            locks.acquire("u1", Provider::Canvas),
        )
        .await;
        assert!(same.is_err());

        drop(guard);
        let again = tokio::time::timeout(
            Duration::from_millis(50),
            locks.acquire("u1", Provider::Canvas),
        )
        .await;
        assert!(again.is_ok());
    }
}
