//! Membership, renewal and loyalty-points operations.
//!
//! Every remote call runs through [`MembershipService::with_retry`]: bounded
//! exponential-backoff attempts, then classification by the [`ErrorManager`]
//! and a `membership/error` event. Rows are validated and transformed outside
//! the retry loop; a malformed row is classified the same way but never
//! retried. "No rows" on a single-row lookup is a `None`, not an error.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use messhub_backend::{
    BackendError, ChangeFeed, ChangeFilter, Order, Query, RemoteBackend,
};
use messhub_core::{
    Membership, MembershipStatus, NewRenewalRequest, Page, PointsBenefit, PointsTransaction,
    RenewalEligibility, RenewalRequest, RenewalStatus,
};
use messhub_lifecycle::events::{MembershipFailed, RenewalRequested, RenewalUpdated};
use messhub_lifecycle::{
    retry_with_backoff, Classifiable, ErrorContext, ErrorManager, EventManager, Lifecycle,
    RetryPolicy,
};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{ServiceError, ValidationError};
use crate::transform;

const MEMBERSHIPS: &str = "memberships";
const RENEWAL_REQUESTS: &str = "renewal_requests";
const POINTS_TRANSACTIONS: &str = "points_transactions";

/// Re-fetch attempts after a change notification.
pub const REFETCH_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LookupOptions {
    /// Per-attempt deadline for the backend call.
    pub timeout: Option<Duration>,
}

impl LookupOptions {
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

pub struct MembershipService<B> {
    backend: Arc<B>,
    events: EventManager,
    errors: ErrorManager,
    retry: RetryPolicy,
    lookup_timeout: Option<Duration>,
}

impl<B> Clone for MembershipService<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            events: self.events.clone(),
            errors: self.errors.clone(),
            retry: self.retry,
            lookup_timeout: self.lookup_timeout,
        }
    }
}

impl<B> std::fmt::Debug for MembershipService<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MembershipService")
            .field("retry", &self.retry)
            .field("lookup_timeout", &self.lookup_timeout)
            .finish_non_exhaustive()
    }
}

impl<B> MembershipService<B>
where
    B: RemoteBackend + ChangeFeed + 'static,
{
    #[must_use]
    pub fn new(backend: Arc<B>, lifecycle: &Lifecycle) -> Self {
        Self {
            backend,
            events: lifecycle.events.clone(),
            errors: lifecycle.errors.clone(),
            retry: lifecycle.retry,
            lookup_timeout: None,
        }
    }

    /// Deadline applied to renewal lookups that do not pass their own.
    #[must_use]
    pub fn with_lookup_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    /// Runs `operation` under the retry policy; on exhaustion the last error
    /// is classified and published.
    async fn with_retry<T, F, Fut>(
        &self,
        context: &ErrorContext,
        operation: F,
    ) -> Result<T, ServiceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        match retry_with_backoff(self.retry, operation, |err, attempts| (err, attempts)).await {
            Ok(value) => Ok(value),
            Err((err, attempts)) => {
                let context = context.clone().with("attempts", attempts);
                Err(self.fail(&err, &context).await)
            }
        }
    }

    async fn fail<E>(&self, error: &E, context: &ErrorContext) -> ServiceError
    where
        E: Classifiable + ?Sized,
    {
        let classified = self.errors.process_error_with_context(error, Some(context)).await;
        self.events
            .emit(MembershipFailed {
                operation: context.operation.clone(),
                entity_id: context.entity_id.clone(),
                message: error.to_string(),
            })
            .await;
        match classified {
            Ok(app_error) => ServiceError::App(app_error),
            Err(throttled) => ServiceError::Throttled(throttled),
        }
    }

    async fn validated<T>(
        &self,
        context: &ErrorContext,
        result: Result<T, ValidationError>,
    ) -> Result<T, ServiceError> {
        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                tracing::warn!(
                    operation = %context.operation,
                    error = %err,
                    "backend row rejected"
                );
                Err(self.fail(&err, context).await)
            }
        }
    }

    /// The member's active membership at a mess, if any.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError`] once retries are exhausted or the row is malformed.
    pub async fn get_active_membership(
        &self,
        member_id: Uuid,
        mess_id: Uuid,
    ) -> Result<Option<Membership>, ServiceError> {
        let context = ErrorContext::new("get_active_membership")
            .entity(member_id)
            .with("mess_id", mess_id);
        let query = Query::table(MEMBERSHIPS)
            .eq("member_id", member_id)
            .eq("mess_id", mess_id)
            .eq("status", MembershipStatus::Active)
            .order("end_date", Order::Descending)
            .limit(1);

        let raw = self
            .with_retry(&context, || maybe_single(self.backend.as_ref(), &query, None))
            .await?;
        match raw {
            Some(raw) => self
                .validated(&context, transform::membership(raw))
                .await
                .map(Some),
            None => Ok(None),
        }
    }

    /// The member's latest pending renewal request at a mess, if any.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError`] once retries are exhausted (a timed-out attempt
    /// counts as a failed attempt) or the row is malformed.
    pub async fn get_current_renewal_request(
        &self,
        member_id: Uuid,
        mess_id: Uuid,
        options: LookupOptions,
    ) -> Result<Option<RenewalRequest>, ServiceError> {
        let context = ErrorContext::new("get_current_renewal_request")
            .entity(member_id)
            .with("mess_id", mess_id);
        let query = Query::table(RENEWAL_REQUESTS)
            .eq("member_id", member_id)
            .eq("mess_id", mess_id)
            .eq("status", RenewalStatus::Pending)
            .order("requested_at", Order::Descending)
            .limit(1);
        let timeout = options.timeout.or(self.lookup_timeout);

        let raw = self
            .with_retry(&context, || maybe_single(self.backend.as_ref(), &query, timeout))
            .await?;
        match raw {
            Some(raw) => self
                .validated(&context, transform::renewal_request(raw))
                .await
                .map(Some),
            None => Ok(None),
        }
    }

    /// Whether the member may request a renewal. An active membership
    /// short-circuits the pending-request lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError`] if either lookup fails.
    pub async fn check_renewal_eligibility(
        &self,
        member_id: Uuid,
        mess_id: Uuid,
    ) -> Result<RenewalEligibility, ServiceError> {
        if self.get_active_membership(member_id, mess_id).await?.is_some() {
            return Ok(RenewalEligibility::active_membership_exists());
        }
        let pending = self
            .get_current_renewal_request(member_id, mess_id, LookupOptions::default())
            .await?;
        if pending.is_some() {
            return Ok(RenewalEligibility::pending_request_exists());
        }
        Ok(RenewalEligibility::eligible())
    }

    /// Creates a pending renewal request after an eligibility check.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Ineligible`] when the member may not renew, or
    /// [`ServiceError`] if a backend call fails.
    pub async fn create_renewal_request(
        &self,
        request: NewRenewalRequest,
    ) -> Result<RenewalRequest, ServiceError> {
        let eligibility = self
            .check_renewal_eligibility(request.member_id, request.mess_id)
            .await?;
        if !eligibility.is_eligible {
            tracing::info!(
                member_id = %request.member_id,
                code = %eligibility.code,
                "renewal request refused"
            );
            return Err(ServiceError::Ineligible(eligibility));
        }

        let context = ErrorContext::new("create_renewal_request")
            .entity(request.member_id)
            .with("mess_id", request.mess_id)
            .with("plan_id", request.plan_id);
        let row = transform::renewal_insert_row(&request);

        let raw = self
            .with_retry(&context, || self.backend.insert(RENEWAL_REQUESTS, row.clone()))
            .await?;
        let created = self
            .validated(&context, transform::renewal_request(raw))
            .await?;

        tracing::info!(
            request_id = %created.id,
            member_id = %created.member_id,
            "renewal requested"
        );
        self.events
            .emit(RenewalRequested {
                request_id: created.id,
                member_id: created.member_id,
                mess_id: created.mess_id,
            })
            .await;
        Ok(created)
    }

    /// Cancels a request that is still pending.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError`] if the update fails or no pending request
    /// with that id exists.
    pub async fn cancel_renewal_request(
        &self,
        request_id: Uuid,
    ) -> Result<RenewalRequest, ServiceError> {
        let context = ErrorContext::new("cancel_renewal_request").entity(request_id);
        let query = Query::table(RENEWAL_REQUESTS)
            .eq("id", request_id)
            .eq("status", RenewalStatus::Pending);
        let patch = json!({
            "status": RenewalStatus::Cancelled,
            "processed_at": Utc::now(),
        });

        let rows = self
            .with_retry(&context, || self.backend.update(&query, patch.clone()))
            .await?;
        let raw = rows.into_iter().next().ok_or(ValidationError::NoMatchingRow {
            entity: "renewal request",
            id: request_id.to_string(),
        });
        let cancelled = self
            .validated(&context, raw.and_then(transform::renewal_request))
            .await?;

        tracing::info!(request_id = %cancelled.id, "renewal request cancelled");
        self.events
            .emit(RenewalUpdated {
                request_id: cancelled.id,
                status: cancelled.status.to_string(),
            })
            .await;
        Ok(cancelled)
    }

    /// How many points can be applied to `amount` and what remains to pay.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError`] if the RPC fails or returns a malformed result.
    pub async fn calculate_points_benefit(
        &self,
        member_id: Uuid,
        mess_id: Uuid,
        amount: Decimal,
    ) -> Result<PointsBenefit, ServiceError> {
        let context = ErrorContext::new("calculate_points_benefit")
            .entity(member_id)
            .with("mess_id", mess_id)
            .with("amount", amount);
        let params = json!({
            "p_member_id": member_id,
            "p_mess_id": mess_id,
            "p_amount": amount,
        });

        let raw = self
            .with_retry(&context, || {
                self.backend.rpc("calculate_points_benefit", params.clone())
            })
            .await?;
        self.validated(&context, transform::points_benefit(raw)).await
    }

    /// Newest-first page of points history. Pages are 1-based.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError`] if the query fails or a row is malformed.
    pub async fn get_points_transactions(
        &self,
        member_id: Uuid,
        mess_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<Page<PointsTransaction>, ServiceError> {
        let page = page.max(1);
        let per_page = per_page.max(1);
        let context = ErrorContext::new("get_points_transactions")
            .entity(member_id)
            .with("mess_id", mess_id)
            .with("page", page);
        let (from, to) = self
            .validated(&context, page_bounds(page, per_page))
            .await?;
        let query = Query::table(POINTS_TRANSACTIONS)
            .eq("member_id", member_id)
            .eq("mess_id", mess_id)
            .order("created_at", Order::Descending)
            .range(from, to);

        let raw = self
            .with_retry(&context, || self.backend.select_with_count(&query))
            .await?;
        let items: Result<Vec<_>, _> = raw
            .items
            .into_iter()
            .map(transform::points_transaction)
            .collect();
        let items = self.validated(&context, items).await?;
        Ok(Page {
            items,
            total: raw.total,
        })
    }

    /// # Errors
    ///
    /// Returns [`ServiceError`] if the RPC fails or returns a non-integer.
    pub async fn get_points_balance(
        &self,
        member_id: Uuid,
        mess_id: Uuid,
    ) -> Result<i64, ServiceError> {
        let context = ErrorContext::new("get_points_balance")
            .entity(member_id)
            .with("mess_id", mess_id);
        let params = json!({ "p_member_id": member_id, "p_mess_id": mess_id });

        let raw = self
            .with_retry(&context, || self.backend.rpc("get_points_balance", params.clone()))
            .await?;
        self.validated(&context, transform::points_balance(&raw)).await
    }

    /// Watches one renewal request. Each change notification triggers a fresh
    /// read of the row (up to [`REFETCH_ATTEMPTS`] with backoff) and hands
    /// the result to `on_change`.
    pub fn subscribe_to_renewal_request<F>(
        &self,
        request_id: Uuid,
        on_change: F,
    ) -> RenewalSubscription
    where
        F: Fn(RenewalRequest) + Send + Sync + 'static,
    {
        let channel = format!("renewal_request:{request_id}");
        let mut changes = self.backend.channel(
            &channel,
            RENEWAL_REQUESTS,
            Some(ChangeFilter::eq("id", request_id)),
        );

        let service = self.clone();
        let task = tokio::spawn(async move {
            while changes.recv().await.is_some() {
                match service.refetch_renewal_request(request_id).await {
                    Ok(request) => on_change(request),
                    Err(err) => {
                        tracing::warn!(%request_id, error = %err, "renewal re-fetch abandoned");
                    }
                }
            }
            tracing::debug!(%request_id, "renewal subscription ended");
        });

        let feed: Arc<dyn ChangeFeed> = self.backend.clone();
        RenewalSubscription {
            channel,
            feed,
            task,
        }
    }

    async fn refetch_renewal_request(
        &self,
        request_id: Uuid,
    ) -> Result<RenewalRequest, ServiceError> {
        let context = ErrorContext::new("subscribe_to_renewal_request").entity(request_id);
        let query = Query::table(RENEWAL_REQUESTS).eq("id", request_id);
        let policy = RetryPolicy::new(REFETCH_ATTEMPTS, self.retry.base_delay);

        let fetched = retry_with_backoff(
            policy,
            || self.backend.single(&query),
            |err, attempts| (err, attempts),
        )
        .await;
        match fetched {
            Ok(raw) => {
                self.validated(&context, transform::renewal_request(raw))
                    .await
            }
            Err((err, attempts)) => {
                let context = context.with("attempts", attempts);
                Err(self.fail(&err, &context).await)
            }
        }
    }
}

/// Single-row read where "no rows" is `None`. A `timeout` bounds the call.
async fn maybe_single<B>(
    backend: &B,
    query: &Query,
    timeout: Option<Duration>,
) -> Result<Option<Value>, BackendError>
where
    B: RemoteBackend + ?Sized,
{
    let call = backend.single(query);
    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => {
                return Err(BackendError::Timeout {
                    operation: format!("single {}", query.table_name()),
                    after_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                })
            }
        },
        None => call.await,
    };
    match result {
        Ok(row) => Ok(Some(row)),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err),
    }
}

/// Inclusive row range of a 1-based page.
fn page_bounds(page: u64, per_page: u64) -> Result<(u64, u64), ValidationError> {
    (page - 1)
        .checked_mul(per_page)
        .and_then(|from| from.checked_add(per_page - 1).map(|to| (from, to)))
        .ok_or_else(|| ValidationError::InvalidField {
            entity: "points transactions",
            field: "page",
            reason: format!("page {page} of {per_page} rows is out of range"),
        })
}

/// Handle for a renewal watch. Unsubscribing is idempotent.
pub struct RenewalSubscription {
    channel: String,
    feed: Arc<dyn ChangeFeed>,
    task: JoinHandle<()>,
}

impl std::fmt::Debug for RenewalSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenewalSubscription")
            .field("channel", &self.channel)
            .field("finished", &self.task.is_finished())
            .finish_non_exhaustive()
    }
}

impl RenewalSubscription {
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn unsubscribe(&self) {
        self.feed.remove_channel(&self.channel);
        self.task.abort();
    }
}
