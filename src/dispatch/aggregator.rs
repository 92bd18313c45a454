//! 结果聚合与回复生成
//!
//! 先为每个动作生成简短的结构化摘要，再交给外部合成器生成自然语言回复；
//! 合成失败（错误、panic、超时、空输出）或调度截止时间已过时使用本地模板，
//! 模板对任何输入都返回非空文本。

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::collaborators::traits::{ReplySynthesizer, SynthesisRequest};
use crate::dispatch::executor::panic_message;
use crate::dispatch::plan::ActionPlan;
use crate::dispatch::types::{ActionKind, ActionResult, PriorOutcomes, ToolType};

const EXCERPT_MAX_CHARS: usize = 80;

pub const TASK_SENTENCE: &str = "好的，我已经帮你记录了这个任务。";
pub const SCHEDULE_SENTENCE: &str = "时间安排已经调整好了。";
pub const CONVERSATION_SENTENCE: &str = "我理解你的感受，希望我的建议对你有帮助。";
pub const TOOL_SENTENCE: &str = "相关信息已经查询完成。";
pub const DEFAULT_SENTENCE: &str = "我理解你的需求，让我来帮你处理。";

/// 单个动作的摘要
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SummaryDetail {
    TaskCreated { title: String },
    SchedulePlanned { adjusted: bool },
    ToolInvoked { tool: ToolType, excerpt: String },
    Conversed,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryItem {
    pub kind: ActionKind,
    #[serde(flatten)]
    pub detail: SummaryDetail,
}

/// 按计划顺序排列的摘要
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DispatchSummary {
    pub items: Vec<SummaryItem>,
}

impl DispatchSummary {
    pub fn build(plan: &ActionPlan, outcomes: &PriorOutcomes) -> Self {
        let items = plan
            .actions()
            .iter()
            .map(|action| {
                let detail = match outcomes.get(&action.kind) {
                    Some(outcome) => match (outcome.payload(), outcome.error()) {
                        (Some(payload), _) => summarize(payload),
                        (None, Some(error)) => SummaryDetail::Failed {
                            error: error.to_string(),
                        },
                        (None, None) => SummaryDetail::Failed {
                            error: "no outcome".to_string(),
                        },
                    },
                    None => SummaryDetail::Failed {
                        error: "no outcome".to_string(),
                    },
                };
                SummaryItem {
                    kind: action.kind,
                    detail,
                }
            })
            .collect();
        Self { items }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// 供提示词使用的逐行描述
    pub fn lines(&self) -> Vec<String> {
        self.items.iter().map(describe).collect()
    }
}

fn summarize(payload: &ActionResult) -> SummaryDetail {
    match payload {
        ActionResult::TaskCreated { task } => SummaryDetail::TaskCreated {
            title: task.title.clone(),
        },
        ActionResult::SchedulePlanned { adjusted, .. } => SummaryDetail::SchedulePlanned {
            adjusted: *adjusted,
        },
        ActionResult::ToolInvoked { tool, data } => SummaryDetail::ToolInvoked {
            tool: *tool,
            excerpt: excerpt(data),
        },
        ActionResult::Conversed { .. } => SummaryDetail::Conversed,
    }
}

/// 工具结果的一行摘录：优先取 `summary` 字段，否则取紧凑 JSON
fn excerpt(data: &serde_json::Value) -> String {
    let raw = match data.get("summary").and_then(|v| v.as_str()) {
        Some(summary) => summary.to_string(),
        None => match data {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        },
    };
    let single_line = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&single_line, EXCERPT_MAX_CHARS)
}

fn describe(item: &SummaryItem) -> String {
    match &item.detail {
        SummaryDetail::TaskCreated { title } => format!("任务创建: 成功创建任务\"{title}\""),
        SummaryDetail::SchedulePlanned { adjusted: true } => "时间调度: 重新安排了日程".to_string(),
        SummaryDetail::SchedulePlanned { adjusted: false } => "时间调度: 日程无需调整".to_string(),
        SummaryDetail::ToolInvoked { tool, excerpt } => match tool {
            ToolType::Weather => format!("天气查询: {excerpt}"),
            ToolType::Route => format!("路线规划: {excerpt}"),
            ToolType::Time => format!("时间查询: {excerpt}"),
            ToolType::Unknown => format!("外部工具: {excerpt}"),
        },
        SummaryDetail::Conversed => "情绪支持: 提供了情感安慰".to_string(),
        SummaryDetail::Failed { error } => format!("{}: 执行失败（{error}）", item.kind),
    }
}

/// 按字符截断，超出部分以省略号表示
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// 本地模板：按计划顺序为每个成功动作拼接一句固定文本，全部失败时返回默认句
pub fn fallback_reply(plan: &ActionPlan, outcomes: &PriorOutcomes) -> String {
    let reply: String = plan
        .actions()
        .iter()
        .filter(|action| outcomes.get(&action.kind).is_some_and(|o| o.is_success()))
        .map(|action| match action.kind {
            ActionKind::TaskCreation => TASK_SENTENCE,
            ActionKind::SchedulePlanning => SCHEDULE_SENTENCE,
            ActionKind::ExternalTool => TOOL_SENTENCE,
            ActionKind::Conversation => CONVERSATION_SENTENCE,
        })
        .collect();

    if reply.is_empty() {
        DEFAULT_SENTENCE.to_string()
    } else {
        reply
    }
}

/// 回复来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplySource {
    Synthesized,
    Fallback,
}

/// 聚合输出
#[derive(Debug, Clone)]
pub struct Aggregation {
    pub summary: DispatchSummary,
    pub reply: String,
    pub source: ReplySource,
}

pub struct ResultAggregator {
    synthesizer: Option<Arc<dyn ReplySynthesizer>>,
    timeout: Duration,
}

impl ResultAggregator {
    pub fn new(synthesizer: Option<Arc<dyn ReplySynthesizer>>, timeout: Duration) -> Self {
        Self {
            synthesizer,
            timeout,
        }
    }

    pub fn has_synthesizer(&self) -> bool {
        self.synthesizer.is_some()
    }

    /// 生成最终回复；不会失败
    pub async fn aggregate(
        &self,
        text: &str,
        plan: &ActionPlan,
        outcomes: &PriorOutcomes,
    ) -> Aggregation {
        let deadline = Instant::now() + self.timeout;
        self.aggregate_until(text, plan, outcomes, deadline).await
    }

    /// 同 `aggregate`，合成最迟在 `deadline` 结束；截止时间已过则直接用模板
    pub async fn aggregate_until(
        &self,
        text: &str,
        plan: &ActionPlan,
        outcomes: &PriorOutcomes,
        deadline: Instant,
    ) -> Aggregation {
        let summary = DispatchSummary::build(plan, outcomes);
        let budget = self
            .timeout
            .min(deadline.saturating_duration_since(Instant::now()));

        if let Some(synthesizer) = &self.synthesizer {
            let request = SynthesisRequest {
                text,
                plan,
                summary: &summary,
            };
            if let Some(reply) = synthesize_within(synthesizer.as_ref(), request, budget).await {
                return Aggregation {
                    reply,
                    summary,
                    source: ReplySource::Synthesized,
                };
            }
        }

        Aggregation {
            reply: fallback_reply(plan, outcomes),
            summary,
            source: ReplySource::Fallback,
        }
    }
}

/// None 表示应使用模板：截止时间已过、错误、panic、超时或空输出
async fn synthesize_within(
    synthesizer: &dyn ReplySynthesizer,
    request: SynthesisRequest<'_>,
    budget: Duration,
) -> Option<String> {
    if budget.is_zero() {
        warn!("dispatch deadline passed, skipping reply synthesis");
        return None;
    }

    let call = AssertUnwindSafe(synthesizer.synthesize(request)).catch_unwind();
    match tokio::time::timeout(budget, call).await {
        Ok(Ok(Ok(reply))) if !reply.trim().is_empty() => {
            info!(reply_chars = reply.chars().count(), "reply synthesized");
            Some(reply.trim().to_string())
        }
        Ok(Ok(Ok(_))) => {
            warn!("synthesizer returned empty reply, using fallback");
            None
        }
        Ok(Ok(Err(e))) => {
            warn!(error = %format!("{e:#}"), "reply synthesis failed, using fallback");
            None
        }
        Ok(Err(panic)) => {
            warn!(panic = %panic_message(panic.as_ref()), "synthesizer panicked, using fallback");
            None
        }
        Err(_) => {
            warn!(
                timeout_ms = budget.as_millis() as u64,
                "reply synthesis timed out, using fallback"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::emotion::EmotionalState;
    use crate::dispatch::error::ActionError;
    use crate::dispatch::types::{
        ActionOutcome, ActionPayload, CreatedTask, DetectedAction, TimeInfo,
    };
    use async_trait::async_trait;
    use chrono::{NaiveDate, Utc};

    fn plan() -> ActionPlan {
        ActionPlan::new(vec![
            DetectedAction::new(
                ActionPayload::TaskCreation {
                    time_info: TimeInfo::default(),
                },
                0.9,
                "t",
            ),
            DetectedAction::new(
                ActionPayload::ExternalTool {
                    tool: ToolType::Weather,
                    destination: None,
                    emotion_triggered: true,
                },
                0.7,
                "t",
            ),
            DetectedAction::new(
                ActionPayload::SchedulePlanning {
                    target_date: NaiveDate::from_ymd_opt(2026, 3, 10).unwrap(),
                    emotional_state: EmotionalState::Tired,
                },
                0.8,
                "t",
            )
            .depending_on(ActionKind::TaskCreation),
            DetectedAction::new(
                ActionPayload::Conversation {
                    emotional_state: EmotionalState::Tired,
                },
                0.7,
                "t",
            ),
        ])
        .unwrap()
    }

    fn success(kind: ActionKind, payload: ActionResult) -> ActionOutcome {
        let now = Utc::now();
        ActionOutcome::success(kind, payload, now, now)
    }

    fn failure(kind: ActionKind) -> ActionOutcome {
        let now = Utc::now();
        ActionOutcome::failure(kind, ActionError::Timeout, now, now)
    }

    fn task_result() -> ActionResult {
        ActionResult::TaskCreated {
            task: CreatedTask {
                id: "t-1".into(),
                title: "开会".into(),
                date: None,
                time_block: None,
                specific_time: None,
            },
        }
    }

    fn mixed_outcomes() -> PriorOutcomes {
        let mut outcomes = PriorOutcomes::new();
        outcomes.insert(
            ActionKind::TaskCreation,
            success(ActionKind::TaskCreation, task_result()),
        );
        outcomes.insert(ActionKind::ExternalTool, failure(ActionKind::ExternalTool));
        outcomes.insert(
            ActionKind::SchedulePlanning,
            failure(ActionKind::SchedulePlanning),
        );
        outcomes.insert(
            ActionKind::Conversation,
            success(
                ActionKind::Conversation,
                ActionResult::Conversed {
                    reply: "辛苦了".into(),
                },
            ),
        );
        outcomes
    }

    #[test]
    fn test_fallback_follows_plan_order() {
        let reply = fallback_reply(&plan(), &mixed_outcomes());
        assert_eq!(reply, format!("{TASK_SENTENCE}{CONVERSATION_SENTENCE}"));
    }

    #[test]
    fn test_fallback_is_total() {
        let plan = plan();
        let mut outcomes = PriorOutcomes::new();
        assert_eq!(fallback_reply(&plan, &outcomes), DEFAULT_SENTENCE);

        for kind in ActionKind::ALL {
            outcomes.insert(kind, failure(kind));
        }
        assert_eq!(fallback_reply(&plan, &outcomes), DEFAULT_SENTENCE);

        assert!(!fallback_reply(&plan, &mixed_outcomes()).is_empty());
    }

    #[test]
    fn test_summary_items() {
        let mut outcomes = mixed_outcomes();
        outcomes.insert(
            ActionKind::ExternalTool,
            success(
                ActionKind::ExternalTool,
                ActionResult::ToolInvoked {
                    tool: ToolType::Weather,
                    data: serde_json::json!({"summary": "上海 晴\n 22°C", "temp": 22}),
                },
            ),
        );
        let summary = DispatchSummary::build(&plan(), &outcomes);
        assert_eq!(summary.items.len(), 4);
        assert_eq!(
            summary.items[0].detail,
            SummaryDetail::TaskCreated {
                title: "开会".into()
            }
        );
        assert_eq!(
            summary.items[1].detail,
            SummaryDetail::ToolInvoked {
                tool: ToolType::Weather,
                excerpt: "上海 晴 22°C".into()
            }
        );
        assert!(matches!(summary.items[2].detail, SummaryDetail::Failed { .. }));
        assert_eq!(summary.items[3].detail, SummaryDetail::Conversed);
        assert!(summary.lines()[0].contains("开会"));
    }

    #[test]
    fn test_truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("你好世界", 2), "你好...");
        assert_eq!(truncate_chars("abc", 5), "abc");
    }

    struct Scripted(anyhow::Result<String>);

    #[async_trait]
    impl ReplySynthesizer for Scripted {
        async fn synthesize(&self, _request: SynthesisRequest<'_>) -> anyhow::Result<String> {
            match &self.0 {
                Ok(s) => Ok(s.clone()),
                Err(e) => Err(anyhow::anyhow!("{e}")),
            }
        }
    }

    struct Slow;

    #[async_trait]
    impl ReplySynthesizer for Slow {
        async fn synthesize(&self, _request: SynthesisRequest<'_>) -> anyhow::Result<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("too late".into())
        }
    }

    struct Panicking;

    #[async_trait]
    impl ReplySynthesizer for Panicking {
        async fn synthesize(&self, _request: SynthesisRequest<'_>) -> anyhow::Result<String> {
            panic!("template engine crashed")
        }
    }

    async fn aggregate_with(synthesizer: Arc<dyn ReplySynthesizer>) -> Aggregation {
        ResultAggregator::new(Some(synthesizer), Duration::from_millis(100))
            .aggregate("x", &plan(), &mixed_outcomes())
            .await
    }

    #[tokio::test]
    async fn test_synthesized_reply_used() {
        let agg = aggregate_with(Arc::new(Scripted(Ok(" 小艾帮你记好了 ".into())))).await;
        assert_eq!(agg.source, ReplySource::Synthesized);
        assert_eq!(agg.reply, "小艾帮你记好了");
    }

    #[tokio::test]
    async fn test_synthesis_failures_fall_back() {
        let synthesizers: Vec<Arc<dyn ReplySynthesizer>> = vec![
            Arc::new(Scripted(Err(anyhow::anyhow!("502")))),
            Arc::new(Scripted(Ok("   ".into()))),
            Arc::new(Slow),
            Arc::new(Panicking),
        ];
        for synthesizer in synthesizers {
            let agg = aggregate_with(synthesizer).await;
            assert_eq!(agg.source, ReplySource::Fallback);
            assert_eq!(agg.reply, format!("{TASK_SENTENCE}{CONVERSATION_SENTENCE}"));
        }
    }

    #[tokio::test]
    async fn test_passed_deadline_skips_synthesis() {
        let aggregator = ResultAggregator::new(
            Some(Arc::new(Scripted(Ok("不该用到".into())))),
            Duration::from_secs(5),
        );
        let agg = aggregator
            .aggregate_until("x", &plan(), &mixed_outcomes(), Instant::now())
            .await;
        assert_eq!(agg.source, ReplySource::Fallback);
        assert_eq!(agg.reply, format!("{TASK_SENTENCE}{CONVERSATION_SENTENCE}"));
    }

    #[tokio::test]
    async fn test_synthesis_clipped_to_deadline() {
        let aggregator = ResultAggregator::new(Some(Arc::new(Slow)), Duration::from_secs(10));
        let started = Instant::now();
        let agg = aggregator
            .aggregate_until(
                "x",
                &plan(),
                &mixed_outcomes(),
                started + Duration::from_millis(100),
            )
            .await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(agg.source, ReplySource::Fallback);
    }

    #[tokio::test]
    async fn test_no_synthesizer_uses_fallback() {
        let agg = ResultAggregator::new(None, Duration::from_millis(100))
            .aggregate("x", &plan(), &PriorOutcomes::new())
            .await;
        assert_eq!(agg.source, ReplySource::Fallback);
        assert_eq!(agg.reply, DEFAULT_SENTENCE);
    }
}
