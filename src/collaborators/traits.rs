//! 外部协作者接口
//!
//! 调度核心只依赖这些窄接口：意图分类、“今天已有任务”查询、各动作的处理器、回复合成。
//! 实现可以是 LLM 调用、数据库或 HTTP 客户端，返回 anyhow::Result，由核心在边界处转换。

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::dispatch::aggregator::DispatchSummary;
use crate::dispatch::plan::ActionPlan;
use crate::dispatch::types::{
    ActionKind, ActionOutcome, ActionResult, DetectedAction, IntentClassification, PriorOutcomes,
};

/// 文本 -> 主意图
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, text: &str) -> anyhow::Result<IntentClassification>;

    /// 健康检查，默认视为可用
    async fn health_check(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// 今天是否已有待调度的任务
#[async_trait]
pub trait TaskInventory: Send + Sync {
    async fn has_existing_tasks_today(&self, text: &str) -> anyhow::Result<bool>;
}

/// 交给处理器的执行上下文
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub text: Arc<str>,
    pub action: DetectedAction,
    /// 本层开始前已完成的动作结果（只读快照）
    pub prior: Arc<PriorOutcomes>,
    /// 超时或调用方取消时触发
    pub cancel: CancellationToken,
}

impl ActionContext {
    pub fn kind(&self) -> ActionKind {
        self.action.kind
    }

    pub fn prior_outcome(&self, kind: ActionKind) -> Option<&ActionOutcome> {
        self.prior.get(&kind)
    }
}

/// 单个 ActionKind 的处理器
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn execute(&self, ctx: ActionContext) -> anyhow::Result<ActionResult>;
}

/// 回复合成请求
#[derive(Debug, Clone, Copy)]
pub struct SynthesisRequest<'a> {
    pub text: &'a str,
    pub plan: &'a ActionPlan,
    pub summary: &'a DispatchSummary,
}

/// 将多个动作结果合成为自然语言回复
#[async_trait]
pub trait ReplySynthesizer: Send + Sync {
    async fn synthesize(&self, request: SynthesisRequest<'_>) -> anyhow::Result<String>;
}
