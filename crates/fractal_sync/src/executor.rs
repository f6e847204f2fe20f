//! Plan executor.
//!
//! [`PlanExecutor`] sends the requests of a [`FetchPlan`] to a
//! [`NetworkAdapter`] and hands every response to a [`Reconciler`].
//! Sequential execution checks for cancellation between requests;
//! concurrent execution runs up to `max_in_flight` fetches at once and
//! reconciles each response as it arrives.

use crate::adapter::{EntityFetchRequest, IdListRequest, NetworkAdapter};
use crate::config::ExecutorConfig;
use crate::error::{SyncError, SyncResult};
use crate::reconciler::{CacheReconciler, FetchResponse, ReconcileReport, Reconciler};
use fractal_cache::{CacheContext, DataRequest, DiffEngine, FetchPlan, Intent, RequestMode};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// The current state of the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    /// Nothing has run yet.
    Idle,
    /// Requests are in flight.
    Fetching,
    /// The last run reconciled every request.
    Completed,
    /// The last run was cancelled.
    Cancelled,
    /// The last run stopped on an error.
    Failed,
}

impl ExecutorState {
    /// Returns true while requests are in flight.
    pub fn is_active(&self) -> bool {
        matches!(self, ExecutorState::Fetching)
    }
}

/// Cumulative statistics of an executor.
#[derive(Debug, Clone, Default)]
pub struct ExecutionStats {
    /// Plans run to completion.
    pub plans_executed: u64,
    /// Requests fetched and reconciled.
    pub requests: u64,
    /// Id list slices fetched.
    pub id_lists: u64,
    /// Entity records written.
    pub entities_reconciled: u64,
    /// List positions written.
    pub positions_reconciled: u64,
    /// Runs stopped by an error or cancellation.
    pub failures: u64,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Counts of one plan run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    /// Requests fetched and reconciled.
    pub requests: usize,
    /// Entity records written.
    pub entities: usize,
    /// List positions written.
    pub positions: usize,
}

/// Outcome of resolving an intent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveReport {
    /// Plans executed.
    pub rounds: usize,
    /// Requests sent over all rounds.
    pub requests: usize,
    /// The final plan was empty.
    pub converged: bool,
}

/// Fetches everything one plan request needs.
///
/// List requests fetch their id slice and then the fields of the listed
/// entities. Batched relation requests always fetch at least the foreign key
/// so children can be attributed to their parents.
///
/// # Errors
///
/// Returns the adapter's error unchanged.
pub fn fetch_request<A>(
    adapter: &A,
    request: &DataRequest,
    fetch_listed_entities: bool,
) -> SyncResult<FetchResponse>
where
    A: NetworkAdapter + ?Sized,
{
    let (skip, take) = match &request.mode {
        RequestMode::Ids { ids } => {
            let entities = adapter.fetch_entities(&EntityFetchRequest {
                entity_type: request.entity_type.clone(),
                ids: ids.clone(),
                fields: request.select.clone(),
            })?;
            return Ok(FetchResponse {
                ids: None,
                entities,
            });
        }
        RequestMode::Pagination { skip, take } => (*skip, *take),
    };

    let listed = adapter.fetch_ids(&IdListRequest {
        entity_type: request.entity_type.clone(),
        filter: request.filter.clone(),
        order_by: request.order_by.clone(),
        skip,
        take,
    })?;

    let batched_key = request
        .metadata
        .relation
        .as_ref()
        .filter(|relation| relation.batched)
        .map(|relation| relation.foreign_key.clone());
    let fields = match (fetch_listed_entities, batched_key) {
        (true, _) => Some(request.select.clone()),
        (false, Some(key)) => Some(Some(BTreeSet::from([key]))),
        (false, None) => None,
    };

    let entities = match fields {
        Some(fields) if !listed.ids.is_empty() => adapter.fetch_entities(&EntityFetchRequest {
            entity_type: request.entity_type.clone(),
            ids: listed.ids.clone(),
            fields,
        })?,
        _ => Vec::new(),
    };
    Ok(FetchResponse {
        ids: Some(listed),
        entities,
    })
}

/// Executes fetch plans against a backend.
///
/// Cancellation is sticky: once [`PlanExecutor::cancel`] is called every run
/// fails with [`SyncError::Cancelled`] until [`PlanExecutor::reset_cancel`].
pub struct PlanExecutor<A: NetworkAdapter + 'static> {
    config: ExecutorConfig,
    adapter: Arc<A>,
    context: Arc<CacheContext>,
    engine: Arc<DiffEngine>,
    reconciler: Arc<dyn Reconciler>,
    state: RwLock<ExecutorState>,
    stats: RwLock<ExecutionStats>,
    cancelled: AtomicBool,
}

impl<A: NetworkAdapter + 'static> PlanExecutor<A> {
    /// Creates an executor writing into `context` through a
    /// [`CacheReconciler`].
    pub fn new(adapter: Arc<A>, context: Arc<CacheContext>, engine: Arc<DiffEngine>) -> Self {
        let reconciler = Arc::new(CacheReconciler::new(Arc::clone(&context)));
        Self {
            config: ExecutorConfig::default(),
            adapter,
            context,
            engine,
            reconciler,
            state: RwLock::new(ExecutorState::Idle),
            stats: RwLock::new(ExecutionStats::default()),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Sets the configuration.
    #[must_use]
    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the reconciler.
    #[must_use]
    pub fn with_reconciler(mut self, reconciler: Arc<dyn Reconciler>) -> Self {
        self.reconciler = reconciler;
        self
    }

    /// Gets the configuration.
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Gets the adapter.
    pub fn adapter(&self) -> &Arc<A> {
        &self.adapter
    }

    /// Gets the cache written to.
    pub fn context(&self) -> &Arc<CacheContext> {
        &self.context
    }

    /// Gets the current state.
    pub fn state(&self) -> ExecutorState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> ExecutionStats {
        self.stats.read().clone()
    }

    /// Cancels running and future executions.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Resets the cancelled flag.
    pub fn reset_cancel(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    /// Returns true if execution was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_state(&self, state: ExecutorState) {
        *self.state.write() = state;
    }

    /// Records a failed run and hands the error back.
    fn fail(&self, err: SyncError) -> SyncError {
        let state = if matches!(err, SyncError::Cancelled) {
            ExecutorState::Cancelled
        } else {
            ExecutorState::Failed
        };
        self.set_state(state);
        let mut stats = self.stats.write();
        stats.failures += 1;
        stats.last_error = Some(err.to_string());
        warn!(error = %err, retryable = err.is_retryable(), "plan execution stopped");
        err
    }

    fn record(
        &self,
        report: &mut ExecutionReport,
        response: &FetchResponse,
        reconciled: ReconcileReport,
    ) {
        report.requests += 1;
        report.entities += reconciled.entities;
        report.positions += reconciled.positions;

        let mut stats = self.stats.write();
        stats.requests += 1;
        stats.id_lists += u64::from(response.ids.is_some());
        stats.entities_reconciled += reconciled.entities as u64;
        stats.positions_reconciled += reconciled.positions as u64;
    }

    fn complete(&self, report: &ExecutionReport) {
        self.set_state(ExecutorState::Completed);
        let mut stats = self.stats.write();
        stats.plans_executed += 1;
        stats.last_error = None;
        debug!(
            requests = report.requests,
            entities = report.entities,
            positions = report.positions,
            "executed plan"
        );
    }

    fn fetch_and_reconcile(
        &self,
        request: &DataRequest,
    ) -> SyncResult<(FetchResponse, ReconcileReport)> {
        let response = fetch_request(
            self.adapter.as_ref(),
            request,
            self.config.fetch_listed_entities,
        )?;
        self.check_cancelled()?;
        let reconciled = self.reconciler.reconcile(request, &response)?;
        Ok((response, reconciled))
    }

    /// Runs a plan one request at a time.
    ///
    /// # Errors
    ///
    /// Stops at the first adapter, reconciliation or cancellation error.
    /// Requests reconciled before the error stay in the cache.
    pub fn execute(&self, plan: &FetchPlan) -> SyncResult<ExecutionReport> {
        self.set_state(ExecutorState::Fetching);
        let mut report = ExecutionReport::default();

        for request in &plan.requests {
            let outcome = self
                .check_cancelled()
                .and_then(|()| self.fetch_and_reconcile(request));
            match outcome {
                Ok((response, reconciled)) => self.record(&mut report, &response, reconciled),
                Err(err) => return Err(self.fail(err)),
            }
        }

        self.complete(&report);
        Ok(report)
    }

    /// Runs a plan with up to `max_in_flight` requests in flight.
    ///
    /// Responses are reconciled in completion order. Adapter calls run on
    /// the blocking pool.
    ///
    /// # Errors
    ///
    /// Stops at the first error; fetches still in flight are aborted and
    /// their responses discarded.
    pub async fn execute_concurrent(&self, plan: &FetchPlan) -> SyncResult<ExecutionReport> {
        if let Err(err) = self.check_cancelled() {
            return Err(self.fail(err));
        }
        self.set_state(ExecutorState::Fetching);

        let semaphore = Arc::new(Semaphore::new(self.config.max_in_flight.max(1)));
        let fetch_listed = self.config.fetch_listed_entities;
        let mut tasks = JoinSet::new();
        for request in plan.requests.iter().cloned() {
            let adapter = Arc::clone(&self.adapter);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| SyncError::Cancelled)?;
                let fetched = tokio::task::spawn_blocking(move || {
                    fetch_request(adapter.as_ref(), &request, fetch_listed)
                        .map(|response| (request, response))
                })
                .await??;
                Ok::<_, SyncError>(fetched)
            });
        }

        let mut report = ExecutionReport::default();
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined
                .map_err(SyncError::from)
                .and_then(|fetched| fetched)
                .and_then(|(request, response)| {
                    self.check_cancelled()?;
                    let reconciled = self.reconciler.reconcile(&request, &response)?;
                    Ok((response, reconciled))
                });
            match outcome {
                Ok((response, reconciled)) => self.record(&mut report, &response, reconciled),
                Err(err) => {
                    tasks.abort_all();
                    return Err(self.fail(err));
                }
            }
        }

        self.complete(&report);
        Ok(report)
    }

    /// Plans and executes `intent` until the cache answers it.
    ///
    /// Relation children can only be planned once their parents are cached,
    /// so an intent with includes needs at least one round per nesting level.
    ///
    /// # Errors
    ///
    /// Returns planning errors and the first execution error.
    pub fn resolve(&self, intent: &Intent) -> SyncResult<ResolveReport> {
        let mut outcome = ResolveReport::default();
        loop {
            let plan = self.plan(intent)?;
            if plan.is_empty() {
                outcome.converged = true;
                break;
            }
            if outcome.rounds == self.config.max_rounds {
                break;
            }
            let report = self.execute(&plan)?;
            outcome.rounds += 1;
            outcome.requests += report.requests;
        }
        self.log_resolved(intent, &outcome);
        Ok(outcome)
    }

    /// [`PlanExecutor::resolve`] with concurrent plan execution.
    ///
    /// # Errors
    ///
    /// Returns planning errors and the first execution error.
    pub async fn resolve_concurrent(&self, intent: &Intent) -> SyncResult<ResolveReport> {
        let mut outcome = ResolveReport::default();
        loop {
            let plan = self.plan(intent)?;
            if plan.is_empty() {
                outcome.converged = true;
                break;
            }
            if outcome.rounds == self.config.max_rounds {
                break;
            }
            let report = self.execute_concurrent(&plan).await?;
            outcome.rounds += 1;
            outcome.requests += report.requests;
        }
        self.log_resolved(intent, &outcome);
        Ok(outcome)
    }

    fn plan(&self, intent: &Intent) -> SyncResult<FetchPlan> {
        self.context
            .plan(&self.engine, intent)
            .map_err(|err| self.fail(err.into()))
    }

    fn log_resolved(&self, intent: &Intent, outcome: &ResolveReport) {
        if outcome.converged {
            info!(
                entity_type = %intent.entity_type,
                rounds = outcome.rounds,
                requests = outcome.requests,
                "resolved intent"
            );
        } else {
            warn!(
                entity_type = %intent.entity_type,
                rounds = outcome.rounds,
                requests = outcome.requests,
                "intent still incomplete after round limit"
            );
        }
    }
}
