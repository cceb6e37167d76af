//! TWAP scheduler
//!
//! Splits a large multi-leg order into equal time-spaced slices, one
//! cancellable task per plan. Every leg of a slice must fill; a leg
//! failure compensates the slice's already-filled legs in reverse order
//! and terminates the plan. Pause and resume reuse the recorded
//! progress, so a resumed plan continues from the next unexecuted
//! slice.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::core::events::{EngineEvent, NotificationSink};
use crate::core::gateway::OrderGateway;
use crate::core::types::Leg;
use crate::error::AppError;

/// Lifecycle state of a TWAP plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TwapState {
    Pending,
    Running,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl TwapState {
    /// Terminal states never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TwapState::Completed | TwapState::Cancelled | TwapState::Failed
        )
    }
}

impl std::fmt::Display for TwapState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TwapState::Pending => "pending",
            TwapState::Running => "running",
            TwapState::Paused => "paused",
            TwapState::Completed => "completed",
            TwapState::Cancelled => "cancelled",
            TwapState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Immutable definition of a TWAP plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwapPlan {
    pub plan_id: String,
    pub legs: Vec<Leg>,
    pub total_qty: f64,
    pub slice_qty: f64,
    pub slices_total: u32,
    /// Wait between slices, milliseconds.
    pub interval_ms: u64,
}

/// Mutable progress of a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwapProgress {
    pub state: TwapState,
    pub slices_done: u32,
    pub slices_total: u32,
    pub executed_qty: f64,
    pub remaining_qty: f64,
}

/// Record of one order placed on behalf of a plan, including
/// compensating orders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwapExecution {
    pub ts_ms: i64,
    pub plan_id: String,
    /// Zero-based slice this order belongs to.
    pub slice_index: u32,
    pub leg: Leg,
    pub qty: f64,
    pub order_id: Option<String>,
    pub success: bool,
    pub error: Option<String>,
    /// True for compensating orders.
    pub rollback: bool,
    /// For compensating orders, the id of the order being unwound.
    pub original_order_id: Option<String>,
}

/// Control verbs accepted for an existing plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanAction {
    Start,
    Pause,
    Resume,
    Cancel,
}

/// Plan creation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePlan {
    pub legs: Vec<Leg>,
    pub total_qty: f64,
    pub slice_qty: f64,
    pub interval_ms: u64,
}

impl CreatePlan {
    /// Validate and compute the slice count.
    ///
    /// The total must divide into whole slices, with a small tolerance
    /// for floating point noise in the division.
    pub fn validate(&self) -> crate::error::Result<u32> {
        if self.legs.is_empty() {
            return Err(AppError::InvalidRequest("plan needs at least one leg".to_string()));
        }
        if !(self.total_qty > 0.0) || !self.total_qty.is_finite() {
            return Err(AppError::InvalidRequest("total_qty must be positive".to_string()));
        }
        if !(self.slice_qty > 0.0) || !self.slice_qty.is_finite() {
            return Err(AppError::InvalidRequest("slice_qty must be positive".to_string()));
        }
        if self.slice_qty > self.total_qty {
            return Err(AppError::InvalidRequest(
                "slice_qty cannot exceed total_qty".to_string(),
            ));
        }
        if self.interval_ms == 0 {
            return Err(AppError::InvalidRequest("interval_ms must be positive".to_string()));
        }
        let ratio = self.total_qty / self.slice_qty;
        let slices = ratio.round();
        if (ratio - slices).abs() > 1e-6 {
            return Err(AppError::InvalidRequest(
                "total_qty must be a whole multiple of slice_qty".to_string(),
            ));
        }
        Ok(slices as u32)
    }
}

struct PlanTask {
    handle: JoinHandle<()>,
    token: CancellationToken,
}

#[derive(Default)]
struct TwapInner {
    plans: HashMap<String, TwapPlan>,
    progress: HashMap<String, TwapProgress>,
    executions: HashMap<String, Vec<TwapExecution>>,
}

/// Owns every TWAP plan and its slice task.
pub struct TwapScheduler {
    inner: Arc<Mutex<TwapInner>>,
    tasks: Mutex<HashMap<String, PlanTask>>,
    gateway: Arc<OrderGateway>,
    sink: Arc<dyn NotificationSink>,
}

impl TwapScheduler {
    pub fn new(gateway: Arc<OrderGateway>, sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TwapInner::default())),
            tasks: Mutex::new(HashMap::new()),
            gateway,
            sink,
        }
    }

    /// Register a new plan in PENDING state.
    pub async fn create_plan(&self, request: CreatePlan) -> crate::error::Result<TwapPlan> {
        let slices_total = request.validate()?;
        let plan = TwapPlan {
            plan_id: format!("twap_{}", &Uuid::new_v4().simple().to_string()[..8]),
            legs: request.legs,
            total_qty: request.total_qty,
            slice_qty: request.slice_qty,
            slices_total,
            interval_ms: request.interval_ms,
        };

        let mut inner = self.inner.lock().await;
        inner.progress.insert(
            plan.plan_id.clone(),
            TwapProgress {
                state: TwapState::Pending,
                slices_done: 0,
                slices_total,
                executed_qty: 0.0,
                remaining_qty: plan.total_qty,
            },
        );
        inner.executions.insert(plan.plan_id.clone(), Vec::new());
        inner.plans.insert(plan.plan_id.clone(), plan.clone());

        info!(
            event_type = "twap_created",
            plan_id = %plan.plan_id,
            slices_total,
            total_qty = plan.total_qty,
            "TWAP plan created"
        );
        Ok(plan)
    }

    /// Apply a control verb. Returns false when the plan's current
    /// state does not accept the action.
    pub async fn control(&self, plan_id: &str, action: PlanAction) -> crate::error::Result<bool> {
        match action {
            PlanAction::Start => self.start(plan_id).await,
            PlanAction::Pause => self.pause(plan_id).await,
            PlanAction::Resume => self.resume(plan_id).await,
            PlanAction::Cancel => self.cancel(plan_id).await,
        }
    }

    async fn start(&self, plan_id: &str) -> crate::error::Result<bool> {
        let plan = {
            let mut inner = self.inner.lock().await;
            let plan = inner
                .plans
                .get(plan_id)
                .cloned()
                .ok_or_else(|| AppError::InvalidRequest(format!("unknown plan {plan_id}")))?;
            let progress = inner
                .progress
                .get_mut(plan_id)
                .ok_or_else(|| AppError::InvalidRequest(format!("unknown plan {plan_id}")))?;
            if progress.state != TwapState::Pending {
                return Ok(false);
            }
            progress.state = TwapState::Running;
            plan
        };
        self.publish_state(plan_id, TwapState::Running, None).await;
        self.spawn_plan_task(plan, 0).await;
        Ok(true)
    }

    async fn pause(&self, plan_id: &str) -> crate::error::Result<bool> {
        {
            let mut inner = self.inner.lock().await;
            let progress = inner
                .progress
                .get_mut(plan_id)
                .ok_or_else(|| AppError::InvalidRequest(format!("unknown plan {plan_id}")))?;
            match progress.state {
                // Idempotent: already paused is still a success
                TwapState::Paused => return Ok(true),
                TwapState::Running => progress.state = TwapState::Paused,
                _ => return Ok(false),
            }
        }
        self.stop_task(plan_id).await;
        self.publish_state(plan_id, TwapState::Paused, None).await;
        info!(event_type = "twap_paused", plan_id = %plan_id, "TWAP plan paused");
        Ok(true)
    }

    async fn resume(&self, plan_id: &str) -> crate::error::Result<bool> {
        let (plan, start_index) = {
            let mut inner = self.inner.lock().await;
            let plan = inner
                .plans
                .get(plan_id)
                .cloned()
                .ok_or_else(|| AppError::InvalidRequest(format!("unknown plan {plan_id}")))?;
            let progress = inner
                .progress
                .get_mut(plan_id)
                .ok_or_else(|| AppError::InvalidRequest(format!("unknown plan {plan_id}")))?;
            if progress.state != TwapState::Paused {
                return Ok(false);
            }
            progress.state = TwapState::Running;
            (plan, progress.slices_done)
        };
        self.publish_state(plan_id, TwapState::Running, None).await;
        info!(
            event_type = "twap_resumed",
            plan_id = %plan_id,
            start_slice = start_index,
            "TWAP plan resumed"
        );
        self.spawn_plan_task(plan, start_index).await;
        Ok(true)
    }

    async fn cancel(&self, plan_id: &str) -> crate::error::Result<bool> {
        {
            let mut inner = self.inner.lock().await;
            let progress = inner
                .progress
                .get_mut(plan_id)
                .ok_or_else(|| AppError::InvalidRequest(format!("unknown plan {plan_id}")))?;
            if progress.state.is_terminal() {
                return Ok(false);
            }
            progress.state = TwapState::Cancelled;
        }
        self.stop_task(plan_id).await;
        self.publish_state(plan_id, TwapState::Cancelled, Some("cancelled by operator"))
            .await;
        info!(event_type = "twap_cancelled", plan_id = %plan_id, "TWAP plan cancelled");
        Ok(true)
    }

    /// Replace the definition of a plan that is not currently active.
    ///
    /// Returns Ok(false) while the plan is RUNNING or PAUSED. Progress
    /// and execution history are reinitialized.
    pub async fn update_plan(
        &self,
        plan_id: &str,
        request: CreatePlan,
    ) -> crate::error::Result<bool> {
        let slices_total = request.validate()?;
        let mut inner = self.inner.lock().await;
        let progress = inner
            .progress
            .get(plan_id)
            .ok_or_else(|| AppError::InvalidRequest(format!("unknown plan {plan_id}")))?;
        if matches!(progress.state, TwapState::Running | TwapState::Paused) {
            return Ok(false);
        }

        let plan = TwapPlan {
            plan_id: plan_id.to_string(),
            legs: request.legs,
            total_qty: request.total_qty,
            slice_qty: request.slice_qty,
            slices_total,
            interval_ms: request.interval_ms,
        };
        inner.progress.insert(
            plan_id.to_string(),
            TwapProgress {
                state: TwapState::Pending,
                slices_done: 0,
                slices_total,
                executed_qty: 0.0,
                remaining_qty: plan.total_qty,
            },
        );
        inner.executions.insert(plan_id.to_string(), Vec::new());
        inner.plans.insert(plan_id.to_string(), plan);
        info!(event_type = "twap_updated", plan_id = %plan_id, "TWAP plan replaced");
        Ok(true)
    }

    /// Remove a plan and all its records, stopping its task if any.
    pub async fn delete_plan(&self, plan_id: &str) -> bool {
        self.abort_task(plan_id).await;
        let mut inner = self.inner.lock().await;
        let existed = inner.plans.remove(plan_id).is_some();
        inner.progress.remove(plan_id);
        inner.executions.remove(plan_id);
        if existed {
            info!(event_type = "twap_deleted", plan_id = %plan_id, "TWAP plan deleted");
        }
        existed
    }

    /// Stop every task and drop all plans and records.
    pub async fn clear_all(&self) {
        let mut tasks = self.tasks.lock().await;
        for (_, task) in tasks.drain() {
            task.token.cancel();
            task.handle.abort();
        }
        drop(tasks);

        let mut inner = self.inner.lock().await;
        inner.plans.clear();
        inner.progress.clear();
        inner.executions.clear();
        info!(event_type = "twap_cleared", "All TWAP plans cleared");
    }

    /// Unwind every successful, not-yet-compensated order of a plan, in
    /// reverse placement order.
    ///
    /// There is no guard against repeated invocation: calling this
    /// twice places the compensating orders twice. Callers own that
    /// responsibility.
    pub async fn emergency_rollback(&self, plan_id: &str) -> crate::error::Result<u32> {
        let to_unwind: Vec<TwapExecution> = {
            let inner = self.inner.lock().await;
            let executions = inner
                .executions
                .get(plan_id)
                .ok_or_else(|| AppError::InvalidRequest(format!("unknown plan {plan_id}")))?;
            executions
                .iter()
                .filter(|e| e.success && !e.rollback)
                .rev()
                .cloned()
                .collect()
        };

        warn!(
            event_type = "twap_emergency_rollback",
            plan_id = %plan_id,
            orders = to_unwind.len(),
            "Emergency rollback started"
        );

        let mut unwound = 0u32;
        for record in to_unwind {
            let original_id = record.order_id.clone().unwrap_or_default();
            let outcome = self
                .gateway
                .rollback(&record.leg, record.qty, &original_id)
                .await;
            let rollback_record = TwapExecution {
                ts_ms: chrono::Utc::now().timestamp_millis(),
                plan_id: plan_id.to_string(),
                slice_index: record.slice_index,
                leg: record.leg.inverse(),
                qty: record.qty,
                order_id: outcome.order_id.clone(),
                success: outcome.success,
                error: outcome.error.as_ref().map(|e| e.to_string()),
                rollback: true,
                original_order_id: record.order_id.clone(),
            };
            if outcome.success {
                unwound += 1;
            }
            let mut inner = self.inner.lock().await;
            if let Some(executions) = inner.executions.get_mut(plan_id) {
                executions.push(rollback_record);
            }
        }
        Ok(unwound)
    }

    pub async fn get_progress(&self, plan_id: &str) -> Option<TwapProgress> {
        self.inner.lock().await.progress.get(plan_id).cloned()
    }

    pub async fn get_executions(&self, plan_id: &str) -> Vec<TwapExecution> {
        self.inner
            .lock()
            .await
            .executions
            .get(plan_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn list_plans(&self) -> Vec<(TwapPlan, TwapProgress)> {
        let inner = self.inner.lock().await;
        inner
            .plans
            .values()
            .filter_map(|plan| {
                inner
                    .progress
                    .get(&plan.plan_id)
                    .map(|p| (plan.clone(), p.clone()))
            })
            .collect()
    }

    async fn spawn_plan_task(&self, plan: TwapPlan, start_index: u32) {
        let token = CancellationToken::new();
        let handle = tokio::spawn(run_plan(
            Arc::clone(&self.inner),
            Arc::clone(&self.gateway),
            Arc::clone(&self.sink),
            plan.clone(),
            start_index,
            token.clone(),
        ));
        self.tasks
            .lock()
            .await
            .insert(plan.plan_id, PlanTask { handle, token });
    }

    /// Stop a plan task cooperatively. The task drains its current
    /// order placement and records it before observing the token, so
    /// the execution log never misses a really-placed order.
    async fn stop_task(&self, plan_id: &str) {
        if let Some(task) = self.tasks.lock().await.remove(plan_id) {
            task.token.cancel();
        }
    }

    /// Hard-stop a plan task. Only for paths that discard the plan's
    /// records anyway.
    async fn abort_task(&self, plan_id: &str) {
        if let Some(task) = self.tasks.lock().await.remove(plan_id) {
            task.token.cancel();
            task.handle.abort();
        }
    }

    async fn publish_state(&self, plan_id: &str, state: TwapState, reason: Option<&str>) {
        self.sink.publish(&EngineEvent::TwapStateChanged {
            plan_id: plan_id.to_string(),
            state: state.to_string(),
            reason: reason.map(str::to_string),
        });
    }
}

/// Slice execution loop for one plan.
///
/// The lock over the shared maps is never held across a gateway call.
/// Pause and cancel only signal the token: an order already in flight
/// completes and is recorded, then the task stops at the next
/// between-legs or inter-slice checkpoint.
async fn run_plan(
    inner: Arc<Mutex<TwapInner>>,
    gateway: Arc<OrderGateway>,
    sink: Arc<dyn NotificationSink>,
    plan: TwapPlan,
    start_index: u32,
    token: CancellationToken,
) {
    for slice_index in start_index..plan.slices_total {
        let mut placed: Vec<(Leg, String)> = Vec::new();
        let mut failure: Option<crate::core::gateway::OrderOutcome> = None;

        for leg in &plan.legs {
            if token.is_cancelled() {
                return;
            }
            let outcome = gateway.place_order(leg, plan.slice_qty).await;
            let record = TwapExecution {
                ts_ms: chrono::Utc::now().timestamp_millis(),
                plan_id: plan.plan_id.clone(),
                slice_index,
                leg: leg.clone(),
                qty: plan.slice_qty,
                order_id: outcome.order_id.clone(),
                success: outcome.success,
                error: outcome.error.as_ref().map(|e| e.to_string()),
                rollback: false,
                original_order_id: None,
            };
            {
                let mut inner = inner.lock().await;
                if let Some(executions) = inner.executions.get_mut(&plan.plan_id) {
                    executions.push(record);
                }
            }

            match outcome.order_id.clone() {
                Some(order_id) => placed.push((leg.clone(), order_id)),
                None => {
                    failure = Some(outcome);
                    break;
                }
            }
        }

        if let Some(failed) = failure {
            // Unwind this slice's fills, newest first
            for (leg, order_id) in placed.iter().rev() {
                let outcome = gateway.rollback(leg, plan.slice_qty, order_id).await;
                let record = TwapExecution {
                    ts_ms: chrono::Utc::now().timestamp_millis(),
                    plan_id: plan.plan_id.clone(),
                    slice_index,
                    leg: leg.inverse(),
                    qty: plan.slice_qty,
                    order_id: outcome.order_id.clone(),
                    success: outcome.success,
                    error: outcome.error.as_ref().map(|e| e.to_string()),
                    rollback: true,
                    original_order_id: Some(order_id.clone()),
                };
                let mut inner = inner.lock().await;
                if let Some(executions) = inner.executions.get_mut(&plan.plan_id) {
                    executions.push(record);
                }
            }

            let terminal = if failed.is_unauthorized() {
                TwapState::Failed
            } else {
                TwapState::Cancelled
            };
            let reason = failed
                .error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "slice failed".to_string());

            {
                let mut inner = inner.lock().await;
                if let Some(progress) = inner.progress.get_mut(&plan.plan_id) {
                    progress.state = terminal;
                    // The failed slice still counts as attempted
                    progress.slices_done = slice_index + 1;
                }
            }
            error!(
                event_type = "twap_slice_failed",
                plan_id = %plan.plan_id,
                slice_index,
                state = %terminal,
                reason = %reason,
                "TWAP slice failed, plan terminated"
            );
            sink.publish(&EngineEvent::TwapStateChanged {
                plan_id: plan.plan_id.clone(),
                state: terminal.to_string(),
                reason: Some(reason),
            });
            return;
        }

        let progress_snapshot = {
            let mut inner = inner.lock().await;
            match inner.progress.get_mut(&plan.plan_id) {
                Some(progress) => {
                    progress.slices_done = slice_index + 1;
                    progress.executed_qty += plan.slice_qty;
                    progress.remaining_qty =
                        (progress.remaining_qty - plan.slice_qty).max(0.0);
                    progress.clone()
                }
                // Plan deleted out from under the task
                None => return,
            }
        };

        info!(
            event_type = "twap_slice_done",
            plan_id = %plan.plan_id,
            slice_index,
            slices_done = progress_snapshot.slices_done,
            slices_total = progress_snapshot.slices_total,
            "TWAP slice executed"
        );
        sink.publish(&EngineEvent::TwapProgress {
            plan_id: plan.plan_id.clone(),
            slices_done: progress_snapshot.slices_done,
            slices_total: progress_snapshot.slices_total,
            executed_qty: progress_snapshot.executed_qty,
            remaining_qty: progress_snapshot.remaining_qty,
        });

        let is_last = slice_index + 1 == plan.slices_total;
        if !is_last {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(Duration::from_millis(plan.interval_ms)) => {}
            }
        }
    }

    {
        let mut inner = inner.lock().await;
        match inner.progress.get_mut(&plan.plan_id) {
            Some(progress) if progress.state == TwapState::Running => {
                progress.state = TwapState::Completed;
            }
            _ => return,
        }
    }
    info!(
        event_type = "twap_completed",
        plan_id = %plan.plan_id,
        "TWAP plan completed"
    );
    sink.publish(&EngineEvent::TwapStateChanged {
        plan_id: plan.plan_id.clone(),
        state: TwapState::Completed.to_string(),
        reason: None,
    });
}
