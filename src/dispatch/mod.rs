//! 调度核心
//!
//! - **emotion / cues / extract**: 情绪启发式、关键词表、载荷抽取（纯函数）
//! - **detectors**: 每种动作一条检测规则
//! - **plan / router**: 动作计划的构造与校验
//! - **executor**: 分层并发执行、失败隔离、全局超时
//! - **aggregator**: 摘要与回复合成（含本地降级模板）
//! - **service**: 串起整条流水线

pub mod aggregator;
pub mod cues;
pub mod detectors;
pub mod emotion;
pub mod error;
pub mod executor;
pub mod extract;
pub mod plan;
pub mod router;
pub mod service;
pub mod types;

pub use aggregator::{fallback_reply, DispatchSummary, ReplySource, ResultAggregator};
pub use emotion::{detect_emotional_state, EmotionalState};
pub use error::{ActionError, DispatchError, PlanError};
pub use executor::{ActionExecutor, ExecutionReport};
pub use plan::ActionPlan;
pub use router::ActionRouter;
pub use service::{DispatchResult, DispatchService, HealthReport};
pub use types::{
    ActionKind, ActionOutcome, ActionPayload, ActionResult, DetectedAction, IntentClassification,
};
