//! 分层执行器
//!
//! 按优先级升序逐层执行：同层动作并发，层与层之间为屏障；
//! 单个动作的错误、panic、超时都只记为该动作的 Failure，不影响同层或后续层。
//! 全局截止时间到达时，未完成的单元被取消，尚未启动的层直接记为超时。

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::FutureExt;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::collaborators::registry::HandlerRegistry;
use crate::collaborators::traits::{ActionContext, ActionHandler};
use crate::dispatch::error::{ActionError, PlanError};
use crate::dispatch::plan::ActionPlan;
use crate::dispatch::types::{ActionKind, ActionOutcome, PriorOutcomes};

/// 截止时间过后，等待单元自行退出的宽限期
const CANCEL_GRACE: Duration = Duration::from_millis(100);

/// 一次执行的结果
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    /// 计划中每个动作恰好一条
    pub outcomes: PriorOutcomes,
    /// 实际启动过的动作，按启动顺序
    pub executed: Vec<ActionKind>,
    pub timed_out: bool,
    pub cancelled: bool,
}

pub struct ActionExecutor {
    handlers: HandlerRegistry,
    timeout: Duration,
}

impl ActionExecutor {
    pub fn new(handlers: HandlerRegistry, timeout: Duration) -> Self {
        Self { handlers, timeout }
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 使用配置的全局超时执行
    pub async fn execute(&self, text: &str, plan: &ActionPlan) -> Result<ExecutionReport, PlanError> {
        let deadline = Instant::now() + self.timeout;
        self.execute_until(text, plan, deadline, CancellationToken::new())
            .await
    }

    /// 在给定截止时间前执行计划；`cancel` 触发时所有未完成动作记为 Cancelled
    pub async fn execute_until(
        &self,
        text: &str,
        plan: &ActionPlan,
        deadline: Instant,
        cancel: CancellationToken,
    ) -> Result<ExecutionReport, PlanError> {
        // 同层或更晚层的依赖在启动前不可能完成，属于计划构造错误
        plan.check_tier_order()?;

        let text: Arc<str> = Arc::from(text);
        let mut outcomes = PriorOutcomes::new();
        let mut executed = Vec::with_capacity(plan.len());
        let mut interruption: Option<ActionError> = None;

        for tier in plan.tiers() {
            if interruption.is_none() {
                interruption = interruption_reason(&cancel, deadline);
            }
            if let Some(reason) = &interruption {
                let now = Utc::now();
                for action in &tier.actions {
                    outcomes.insert(
                        action.kind,
                        ActionOutcome::failure(action.kind, reason.clone(), now, now),
                    );
                }
                warn!(
                    priority = tier.priority,
                    reason = %reason,
                    skipped = tier.actions.len(),
                    "tier not started"
                );
                continue;
            }

            let kinds: Vec<ActionKind> = tier.actions.iter().map(|a| a.kind).collect();
            info!(priority = tier.priority, kinds = ?kinds, "tier started");

            let prior = Arc::new(outcomes.clone());
            let mut units = JoinSet::new();
            for action in &tier.actions {
                executed.push(action.kind);
                let ctx = ActionContext {
                    text: Arc::clone(&text),
                    action: (*action).clone(),
                    prior: Arc::clone(&prior),
                    cancel: cancel.child_token(),
                };
                units.spawn(run_unit(self.handlers.get(action.kind), ctx, deadline));
            }

            // 屏障：等待本层全部结束，最迟到截止时间加宽限期
            let tier_started = Utc::now();
            let hard_stop = deadline + CANCEL_GRACE;
            loop {
                tokio::select! {
                    joined = units.join_next() => match joined {
                        Some(Ok(outcome)) => {
                            log_outcome(&outcome);
                            outcomes.insert(outcome.kind, outcome);
                        }
                        Some(Err(e)) => warn!(error = %e, "execution unit aborted"),
                        None => break,
                    },
                    _ = tokio::time::sleep_until(hard_stop) => {
                        warn!(priority = tier.priority, "tier exceeded deadline, aborting units");
                        units.abort_all();
                        break;
                    }
                }
            }

            let pending: HashSet<ActionKind> = kinds
                .iter()
                .copied()
                .filter(|k| !outcomes.contains_key(k))
                .collect();
            if !pending.is_empty() {
                let reason = interruption_reason(&cancel, deadline).unwrap_or(ActionError::Timeout);
                let now = Utc::now();
                for kind in pending {
                    outcomes.insert(
                        kind,
                        ActionOutcome::failure(kind, reason.clone(), tier_started, now),
                    );
                }
            }
        }

        let timed_out = outcomes
            .values()
            .any(|o| matches!(o.error(), Some(ActionError::Timeout)));
        let cancelled = cancel.is_cancelled();
        info!(
            executed = executed.len(),
            planned = plan.len(),
            succeeded = outcomes.values().filter(|o| o.is_success()).count(),
            timed_out,
            cancelled,
            "plan executed"
        );

        Ok(ExecutionReport {
            outcomes,
            executed,
            timed_out,
            cancelled,
        })
    }
}

fn interruption_reason(cancel: &CancellationToken, deadline: Instant) -> Option<ActionError> {
    if cancel.is_cancelled() {
        Some(ActionError::Cancelled)
    } else if Instant::now() >= deadline {
        Some(ActionError::Timeout)
    } else {
        None
    }
}

/// 单个执行单元：任何结局都转换为 ActionOutcome
async fn run_unit(
    handler: Option<Arc<dyn ActionHandler>>,
    ctx: ActionContext,
    deadline: Instant,
) -> ActionOutcome {
    let kind = ctx.kind();
    let started_at = Utc::now();
    let Some(handler) = handler else {
        return ActionOutcome::failure(kind, ActionError::NoHandler(kind), started_at, Utc::now());
    };

    let cancel = ctx.cancel.clone();
    let call = AssertUnwindSafe(handler.execute(ctx)).catch_unwind();
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ActionError::Cancelled),
        _ = tokio::time::sleep_until(deadline) => {
            cancel.cancel();
            Err(ActionError::Timeout)
        }
        joined = call => match joined {
            Ok(Ok(payload)) if payload.kind() == kind => Ok(payload),
            Ok(Ok(payload)) => Err(ActionError::MismatchedResult {
                expected: kind,
                actual: payload.kind(),
            }),
            Ok(Err(e)) => Err(ActionError::Handler(format!("{e:#}"))),
            Err(panic) => Err(ActionError::Panicked(panic_message(panic.as_ref()))),
        },
    };

    let finished_at = Utc::now();
    match result {
        Ok(payload) => ActionOutcome::success(kind, payload, started_at, finished_at),
        Err(error) => ActionOutcome::failure(kind, error, started_at, finished_at),
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

fn log_outcome(outcome: &ActionOutcome) {
    let duration_ms = (outcome.finished_at - outcome.started_at).num_milliseconds();
    match outcome.error() {
        None => info!(kind = %outcome.kind, duration_ms, "action succeeded"),
        Some(error) => warn!(kind = %outcome.kind, duration_ms, error = %error, "action failed"),
    }
}
