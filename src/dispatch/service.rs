//! 调度服务：分类 -> 路由 -> 分层执行 -> 聚合
//!
//! 一次调度共享一个全局截止时间（分类、已有任务查询、执行、回复合成都计入）；
//! 除计划校验失败与空输入外，调用方总能拿到带非空回复的 DispatchResult。

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use futures_util::FutureExt;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::collaborators::local::{
    InMemoryTaskStore, LlmConversationHandler, LocalSchedulePlanner, OfflineToolHandler,
};
use crate::collaborators::registry::HandlerRegistry;
use crate::collaborators::traits::IntentClassifier;
use crate::collaborators::{LlmIntentClassifier, LlmReplySynthesizer};
use crate::config::AppConfig;
use crate::dispatch::aggregator::{
    fallback_reply, truncate_chars, Aggregation, DispatchSummary, ReplySource, ResultAggregator,
};
use crate::dispatch::emotion::{detect_emotional_state, EmotionalState};
use crate::dispatch::error::DispatchError;
use crate::dispatch::executor::{panic_message, ActionExecutor};
use crate::dispatch::plan::ActionPlan;
use crate::dispatch::router::ActionRouter;
use crate::dispatch::types::{
    ActionKind, ActionOutcome, ActionResult, CreatedTask, IntentClassification,
};
use crate::llm::LlmClient;

const TEXT_PREVIEW_CHARS: usize = 50;

/// 一次调度的完整结果
#[derive(Debug, Clone, Serialize)]
pub struct DispatchResult {
    pub request_id: String,
    /// 外部分类结果；分类器不可用或失败时为 None
    pub primary_intent: Option<IntentClassification>,
    pub emotional_state: EmotionalState,
    pub plan: ActionPlan,
    pub planned: Vec<ActionKind>,
    pub executed: Vec<ActionKind>,
    pub outcomes: BTreeMap<ActionKind, ActionOutcome>,
    pub summary: DispatchSummary,
    pub synthesized_reply: String,
    pub reply_source: ReplySource,
    pub timed_out: bool,
    pub cancelled: bool,
    pub processing_time_ms: u64,
}

impl DispatchResult {
    fn success_payload(&self, kind: ActionKind) -> Option<&ActionResult> {
        self.outcomes.get(&kind).and_then(|o| o.payload())
    }

    pub fn task_created(&self) -> Option<&CreatedTask> {
        match self.success_payload(ActionKind::TaskCreation)? {
            ActionResult::TaskCreated { task } => Some(task),
            _ => None,
        }
    }

    /// None 表示本次没有成功的调度动作
    pub fn schedule_adjusted(&self) -> Option<bool> {
        match self.success_payload(ActionKind::SchedulePlanning)? {
            ActionResult::SchedulePlanned { adjusted, .. } => Some(*adjusted),
            _ => None,
        }
    }

    pub fn external_tool_result(&self) -> Option<&ActionResult> {
        self.success_payload(ActionKind::ExternalTool)
    }

    /// 对话动作给出的情绪回应
    pub fn emotional_support(&self) -> Option<&str> {
        match self.success_payload(ActionKind::Conversation)? {
            ActionResult::Conversed { reply } => Some(reply),
            _ => None,
        }
    }

    pub fn succeeded(&self) -> Vec<ActionKind> {
        self.outcomes
            .values()
            .filter(|o| o.is_success())
            .map(|o| o.kind)
            .collect()
    }
}

/// 分类器探活结果
#[derive(Debug, Clone, Serialize)]
pub struct ClassifierHealth {
    pub configured: bool,
    pub available: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// healthy / degraded
    pub status: &'static str,
    pub classifier: ClassifierHealth,
    /// 每种动作是否注册了处理器
    pub handlers: BTreeMap<ActionKind, bool>,
    pub synthesizer: bool,
    pub timestamp: DateTime<Utc>,
}

pub struct DispatchService {
    classifier: Option<Arc<dyn IntentClassifier>>,
    classify_timeout: Duration,
    router: ActionRouter,
    executor: ActionExecutor,
    aggregator: ResultAggregator,
}

impl DispatchService {
    pub fn new(router: ActionRouter, executor: ActionExecutor, aggregator: ResultAggregator) -> Self {
        Self {
            classifier: None,
            classify_timeout: Duration::from_secs(8),
            router,
            executor,
            aggregator,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn IntentClassifier>, timeout: Duration) -> Self {
        self.classifier = Some(classifier);
        self.classify_timeout = timeout;
        self
    }

    /// 按配置装配：LLM 分类与合成，进程内任务表、日程整理、离线工具与 LLM 对话
    pub fn from_config(cfg: &AppConfig, llm: Arc<dyn LlmClient>) -> Self {
        let store = Arc::new(InMemoryTaskStore::new());

        let mut handlers = HandlerRegistry::new();
        handlers.register_arc(ActionKind::TaskCreation, store.clone());
        handlers.register(
            ActionKind::SchedulePlanning,
            LocalSchedulePlanner::new(store.clone()),
        );
        handlers.register(
            ActionKind::ExternalTool,
            OfflineToolHandler::new(cfg.tools.clone()),
        );
        handlers.register(
            ActionKind::Conversation,
            LlmConversationHandler::new(llm.clone(), cfg.app.assistant_name.clone()),
        );

        let router = ActionRouter::new(store, cfg.dispatch.inventory_timeout());
        let executor = ActionExecutor::new(handlers, cfg.dispatch.timeout());
        let synthesizer = LlmReplySynthesizer::new(llm.clone(), cfg.app.assistant_name.clone());
        let aggregator =
            ResultAggregator::new(Some(Arc::new(synthesizer)), cfg.dispatch.synthesis_timeout());

        Self::new(router, executor, aggregator).with_classifier(
            Arc::new(LlmIntentClassifier::new(llm)),
            cfg.dispatch.classify_timeout(),
        )
    }

    pub async fn dispatch(&self, text: &str) -> Result<DispatchResult, DispatchError> {
        self.dispatch_with_cancel(text, CancellationToken::new())
            .await
    }

    /// `cancel` 触发后，未完成的动作记为 cancelled，仍返回结果
    pub async fn dispatch_with_cancel(
        &self,
        text: &str,
        cancel: CancellationToken,
    ) -> Result<DispatchResult, DispatchError> {
        let request_id = format!("dispatch-{}", uuid::Uuid::new_v4());
        let span = info_span!("dispatch", request_id = %request_id);
        self.run(request_id, text, cancel).instrument(span).await
    }

    async fn run(
        &self,
        request_id: String,
        text: &str,
        cancel: CancellationToken,
    ) -> Result<DispatchResult, DispatchError> {
        let started = Instant::now();
        let text = text.trim();
        if text.is_empty() {
            return Err(DispatchError::EmptyInput);
        }
        info!(text = %truncate_chars(text, TEXT_PREVIEW_CHARS), "dispatch started");

        let deadline = started + self.executor.timeout();
        let emotional_state = detect_emotional_state(text);
        let primary_intent = self.classify(text, deadline, &cancel).await;

        let plan = self
            .router
            .route_until(
                text,
                primary_intent.as_ref(),
                Local::now().date_naive(),
                deadline,
            )
            .await?;
        let report = self
            .executor
            .execute_until(text, &plan, deadline, cancel)
            .await?;

        let Aggregation {
            summary,
            reply,
            source,
        } = if report.cancelled {
            Aggregation {
                summary: DispatchSummary::build(&plan, &report.outcomes),
                reply: fallback_reply(&plan, &report.outcomes),
                source: ReplySource::Fallback,
            }
        } else {
            self.aggregator
                .aggregate_until(text, &plan, &report.outcomes, deadline)
                .await
        };

        let processing_time_ms = started.elapsed().as_millis() as u64;
        info!(
            planned = ?plan.kinds(),
            executed = ?report.executed,
            reply_source = ?source,
            processing_time_ms,
            "dispatch finished"
        );

        Ok(DispatchResult {
            request_id,
            primary_intent,
            emotional_state,
            planned: plan.kinds(),
            executed: report.executed,
            outcomes: report.outcomes,
            summary,
            synthesized_reply: reply,
            reply_source: source,
            timed_out: report.timed_out,
            cancelled: report.cancelled,
            processing_time_ms,
            plan,
        })
    }

    /// 分类失败、panic、超时或被取消时返回 None，路由只依赖词法规则
    async fn classify(
        &self,
        text: &str,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Option<IntentClassification> {
        let classifier = self.classifier.as_ref()?;
        let budget = self
            .classify_timeout
            .min(deadline.saturating_duration_since(Instant::now()));
        let call = AssertUnwindSafe(classifier.classify(text)).catch_unwind();

        tokio::select! {
            _ = cancel.cancelled() => {
                warn!("dispatch cancelled during classification");
                None
            }
            result = tokio::time::timeout(budget, call) => match result {
                Ok(Ok(Ok(classification))) => Some(classification),
                Ok(Ok(Err(e))) => {
                    warn!(error = %format!("{e:#}"), "intent classification failed, using lexical routing");
                    None
                }
                Ok(Err(panic)) => {
                    warn!(panic = %panic_message(panic.as_ref()), "intent classifier panicked, using lexical routing");
                    None
                }
                Err(_) => {
                    warn!(timeout_ms = budget.as_millis() as u64, "intent classification timed out, using lexical routing");
                    None
                }
            },
        }
    }

    /// 报告各协作者是否就绪；本身不会失败
    pub async fn health_check(&self) -> HealthReport {
        let classifier = match &self.classifier {
            None => ClassifierHealth {
                configured: false,
                available: false,
                error: None,
            },
            Some(classifier) => {
                let probe = AssertUnwindSafe(classifier.health_check()).catch_unwind();
                match tokio::time::timeout(self.classify_timeout, probe).await {
                    Ok(Ok(Ok(()))) => ClassifierHealth {
                        configured: true,
                        available: true,
                        error: None,
                    },
                    Ok(Ok(Err(e))) => ClassifierHealth {
                        configured: true,
                        available: false,
                        error: Some(format!("{e:#}")),
                    },
                    Ok(Err(panic)) => ClassifierHealth {
                        configured: true,
                        available: false,
                        error: Some(format!("panicked: {}", panic_message(panic.as_ref()))),
                    },
                    Err(_) => ClassifierHealth {
                        configured: true,
                        available: false,
                        error: Some("timeout".to_string()),
                    },
                }
            }
        };

        let handlers: BTreeMap<ActionKind, bool> = ActionKind::ALL
            .iter()
            .map(|kind| (*kind, self.executor.handlers().contains(*kind)))
            .collect();
        let healthy = handlers.values().all(|registered| *registered)
            && (!classifier.configured || classifier.available);

        HealthReport {
            status: if healthy { "healthy" } else { "degraded" },
            classifier,
            handlers,
            synthesizer: self.aggregator.has_synthesizer(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::traits::{ActionContext, ActionHandler, TaskInventory};
    use async_trait::async_trait;

    struct NoTasks;

    #[async_trait]
    impl TaskInventory for NoTasks {
        async fn has_existing_tasks_today(&self, _text: &str) -> anyhow::Result<bool> {
            Ok(false)
        }
    }

    struct Reply;

    #[async_trait]
    impl ActionHandler for Reply {
        async fn execute(&self, _ctx: ActionContext) -> anyhow::Result<ActionResult> {
            Ok(ActionResult::Conversed {
                reply: "在呢".into(),
            })
        }
    }

    struct Broken;

    #[async_trait]
    impl IntentClassifier for Broken {
        async fn classify(&self, _text: &str) -> anyhow::Result<IntentClassification> {
            anyhow::bail!("model offline")
        }

        async fn health_check(&self) -> anyhow::Result<()> {
            anyhow::bail!("model offline")
        }
    }

    struct Exploding;

    #[async_trait]
    impl IntentClassifier for Exploding {
        async fn classify(&self, _text: &str) -> anyhow::Result<IntentClassification> {
            panic!("tokenizer out of bounds")
        }

        async fn health_check(&self) -> anyhow::Result<()> {
            panic!("tokenizer out of bounds")
        }
    }

    fn service() -> DispatchService {
        let handlers = HandlerRegistry::new().with(ActionKind::Conversation, Reply);
        DispatchService::new(
            ActionRouter::new(Arc::new(NoTasks), Duration::from_millis(100)),
            ActionExecutor::new(handlers, Duration::from_secs(2)),
            ResultAggregator::new(None, Duration::from_millis(100)),
        )
    }

    #[tokio::test]
    async fn test_empty_input_rejected() {
        assert!(matches!(
            service().dispatch("   ").await,
            Err(DispatchError::EmptyInput)
        ));
    }

    #[tokio::test]
    async fn test_classifier_failure_falls_back_to_lexical_routing() {
        let svc = service().with_classifier(Arc::new(Broken), Duration::from_millis(100));
        let result = svc.dispatch("嗯").await.unwrap();

        assert!(result.primary_intent.is_none());
        assert_eq!(result.planned, vec![ActionKind::Conversation]);
        assert_eq!(result.emotional_support(), Some("在呢"));
        assert!(result.request_id.starts_with("dispatch-"));
        assert!(!result.synthesized_reply.is_empty());
        assert_eq!(result.reply_source, ReplySource::Fallback);
    }

    #[tokio::test]
    async fn test_classifier_panic_falls_back_to_lexical_routing() {
        let svc = service().with_classifier(Arc::new(Exploding), Duration::from_millis(100));
        let result = svc.dispatch("嗯").await.unwrap();
        assert!(result.primary_intent.is_none());
        assert_eq!(result.planned, vec![ActionKind::Conversation]);

        let report = svc.health_check().await;
        assert!(!report.classifier.available);
        assert_eq!(
            report.classifier.error.as_deref(),
            Some("panicked: tokenizer out of bounds")
        );
    }

    #[tokio::test]
    async fn test_health_check_reports_missing_pieces() {
        let svc = service().with_classifier(Arc::new(Broken), Duration::from_millis(100));
        let report = svc.health_check().await;
        assert_eq!(report.status, "degraded");
        assert!(report.classifier.configured);
        assert!(!report.classifier.available);
        assert_eq!(report.handlers[&ActionKind::Conversation], true);
        assert_eq!(report.handlers[&ActionKind::TaskCreation], false);
        assert!(!report.synthesizer);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = service().dispatch_with_cancel("你好", cancel).await.unwrap();
        assert!(result.cancelled);
        assert!(result.executed.is_empty());
        assert_eq!(result.outcomes.len(), result.planned.len());
        assert!(!result.synthesized_reply.is_empty());
    }
}
