//! 动作路由：文本 + 主意图 -> 校验过的 ActionPlan
//!
//! 按需查询“今天已有任务”（仅当调度规则需要时），然后按规则表折叠；
//! 没有任何规则命中时回退为单个对话动作，保证计划非空。

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use futures_util::FutureExt;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::collaborators::traits::TaskInventory;
use crate::dispatch::cues::CueText;
use crate::dispatch::detectors::{
    needs_existing_tasks_check, run_detectors, DetectionInput, PrimaryIntent,
};
use crate::dispatch::emotion::{detect_in, EmotionalState};
use crate::dispatch::error::PlanError;
use crate::dispatch::executor::panic_message;
use crate::dispatch::plan::ActionPlan;
use crate::dispatch::types::{
    clamp_confidence, ActionKind, ActionPayload, DetectedAction, IntentClassification,
};

/// 无法识别的主意图按对话处理，置信度取最低
pub const UNKNOWN_INTENT_CONFIDENCE: f32 = 0.0;
pub const DEFAULT_FALLBACK_CONFIDENCE: f32 = 0.9;
pub const DEFAULT_FALLBACK_REASONING: &str = "default fallback";

pub struct ActionRouter {
    inventory: Arc<dyn TaskInventory>,
    inventory_timeout: Duration,
}

impl ActionRouter {
    pub fn new(inventory: Arc<dyn TaskInventory>, inventory_timeout: Duration) -> Self {
        Self {
            inventory,
            inventory_timeout,
        }
    }

    /// 生成动作计划；`primary` 为 None 表示分类器不可用，仅依赖词法规则
    pub async fn route(
        &self,
        text: &str,
        primary: Option<&IntentClassification>,
        today: NaiveDate,
    ) -> Result<ActionPlan, PlanError> {
        let deadline = Instant::now() + self.inventory_timeout;
        self.route_until(text, primary, today, deadline).await
    }

    /// 同 `route`，已有任务查询最迟在 `deadline` 结束
    pub async fn route_until(
        &self,
        text: &str,
        primary: Option<&IntentClassification>,
        today: NaiveDate,
        deadline: Instant,
    ) -> Result<ActionPlan, PlanError> {
        let cues = CueText::new(text);
        let mut input = DetectionInput {
            text: &cues,
            primary: primary.map(normalize_primary),
            emotional_state: detect_in(&cues),
            today,
            has_existing_tasks: false,
        };

        if needs_existing_tasks_check(&input) {
            input.has_existing_tasks = self.has_existing_tasks(text, deadline).await;
        }

        let plan = plan_from(&input)?;
        info!(
            kinds = ?plan.kinds(),
            emotion = ?input.emotional_state,
            "action plan built"
        );
        Ok(plan)
    }

    /// 查询失败、panic 或超时按“没有任务”处理
    async fn has_existing_tasks(&self, text: &str, deadline: Instant) -> bool {
        let budget = self
            .inventory_timeout
            .min(deadline.saturating_duration_since(Instant::now()));
        let lookup = AssertUnwindSafe(self.inventory.has_existing_tasks_today(text)).catch_unwind();

        match tokio::time::timeout(budget, lookup).await {
            Ok(Ok(Ok(found))) => found,
            Ok(Ok(Err(e))) => {
                warn!(error = %e, "existing tasks lookup failed, assuming none");
                false
            }
            Ok(Err(panic)) => {
                warn!(
                    panic = %panic_message(panic.as_ref()),
                    "existing tasks lookup panicked, assuming none"
                );
                false
            }
            Err(_) => {
                warn!(
                    timeout_ms = budget.as_millis() as u64,
                    "existing tasks lookup timed out, assuming none"
                );
                false
            }
        }
    }
}

/// 将分类结果归一化为主意图
pub fn normalize_primary(classification: &IntentClassification) -> PrimaryIntent {
    match classification.intent {
        Some(kind) => PrimaryIntent {
            kind,
            confidence: clamp_confidence(classification.confidence),
        },
        None => PrimaryIntent {
            kind: ActionKind::Conversation,
            confidence: UNKNOWN_INTENT_CONFIDENCE,
        },
    }
}

/// 纯函数部分：折叠规则表、补默认对话、校验
pub fn plan_from(input: &DetectionInput<'_>) -> Result<ActionPlan, PlanError> {
    let mut actions = run_detectors(input);
    if actions.is_empty() {
        actions.push(default_fallback(input.emotional_state));
    }
    ActionPlan::new(actions)
}

fn default_fallback(emotional_state: EmotionalState) -> DetectedAction {
    DetectedAction::new(
        ActionPayload::Conversation { emotional_state },
        DEFAULT_FALLBACK_CONFIDENCE,
        DEFAULT_FALLBACK_REASONING,
    )
}
