//! 调度核心数据类型
//!
//! ActionKind 为封闭枚举；DetectedAction 每次请求新建、进入 ActionPlan 后不再修改；
//! ActionOutcome 由执行器逐个产出，最终汇总进 DispatchResult。

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dispatch::emotion::EmotionalState;
use crate::dispatch::error::ActionError;

/// 动作类型（四类，运行时不可扩展）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    /// 任务新增（待办、提醒）
    TaskCreation,
    /// 时间调度（日程安排）
    SchedulePlanning,
    /// 外部工具（天气、路线、时间）
    ExternalTool,
    /// 对话回复（情绪安慰、聊天）
    Conversation,
}

impl ActionKind {
    pub const ALL: [ActionKind; 4] = [
        ActionKind::TaskCreation,
        ActionKind::SchedulePlanning,
        ActionKind::ExternalTool,
        ActionKind::Conversation,
    ];

    /// 与分类器约定的标签
    pub fn label(self) -> &'static str {
        match self {
            ActionKind::TaskCreation => "TASK_CREATION",
            ActionKind::SchedulePlanning => "SCHEDULE_PLANNING",
            ActionKind::ExternalTool => "EXTERNAL_TOOL",
            ActionKind::Conversation => "CONVERSATION",
        }
    }

    /// 宽松解析标签：忽略大小写、首尾空白，`-` 与空格视同 `_`
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized = label.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "TASK_CREATION" => Some(ActionKind::TaskCreation),
            "SCHEDULE_PLANNING" => Some(ActionKind::SchedulePlanning),
            "EXTERNAL_TOOL" => Some(ActionKind::ExternalTool),
            "CONVERSATION" => Some(ActionKind::Conversation),
            _ => None,
        }
    }

    /// 固定优先级：数值越小越早执行，同值并发
    pub fn default_priority(self) -> u8 {
        match self {
            ActionKind::ExternalTool | ActionKind::TaskCreation => 1,
            ActionKind::SchedulePlanning => 2,
            ActionKind::Conversation => 3,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// 时间段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeBlock {
    Morning,
    Forenoon,
    Afternoon,
    Evening,
}

impl TimeBlock {
    /// 时间段的起止时刻（HH:MM）
    pub fn window(self) -> (&'static str, &'static str) {
        match self {
            TimeBlock::Morning => ("08:00", "12:00"),
            TimeBlock::Forenoon => ("09:00", "12:00"),
            TimeBlock::Afternoon => ("14:00", "18:00"),
            TimeBlock::Evening => ("19:00", "22:00"),
        }
    }

    pub fn is_after_noon(self) -> bool {
        matches!(self, TimeBlock::Afternoon | TimeBlock::Evening)
    }
}

/// 从文本中抽取的时间信息
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeInfo {
    pub date: Option<NaiveDate>,
    pub time_block: Option<TimeBlock>,
    pub specific_time: Option<NaiveTime>,
}

impl TimeInfo {
    pub fn is_empty(&self) -> bool {
        self.date.is_none() && self.time_block.is_none() && self.specific_time.is_none()
    }
}

/// 外部工具子类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolType {
    Weather,
    Route,
    Time,
    Unknown,
}

impl fmt::Display for ToolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ToolType::Weather => "weather",
            ToolType::Route => "route",
            ToolType::Time => "time",
            ToolType::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// 动作携带的抽取数据，变体与 ActionKind 一一对应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionPayload {
    TaskCreation {
        time_info: TimeInfo,
    },
    SchedulePlanning {
        target_date: NaiveDate,
        emotional_state: EmotionalState,
    },
    ExternalTool {
        tool: ToolType,
        destination: Option<String>,
        /// 由负面情绪触发（而非文本直接提及）
        emotion_triggered: bool,
    },
    Conversation {
        emotional_state: EmotionalState,
    },
}

impl ActionPayload {
    pub fn kind(&self) -> ActionKind {
        match self {
            ActionPayload::TaskCreation { .. } => ActionKind::TaskCreation,
            ActionPayload::SchedulePlanning { .. } => ActionKind::SchedulePlanning,
            ActionPayload::ExternalTool { .. } => ActionKind::ExternalTool,
            ActionPayload::Conversation { .. } => ActionKind::Conversation,
        }
    }
}

/// 计划中的一个候选动作
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedAction {
    pub kind: ActionKind,
    pub confidence: f32,
    /// 仅用于诊断，不参与控制流
    pub reasoning: String,
    pub priority: u8,
    pub depends_on: BTreeSet<ActionKind>,
    pub payload: ActionPayload,
}

impl DetectedAction {
    /// 按载荷确定类型，优先级取固定策略，置信度截断到 [0, 1]
    pub fn new(payload: ActionPayload, confidence: f32, reasoning: impl Into<String>) -> Self {
        let kind = payload.kind();
        Self {
            kind,
            confidence: clamp_confidence(confidence),
            reasoning: reasoning.into(),
            priority: kind.default_priority(),
            depends_on: BTreeSet::new(),
            payload,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn depending_on(mut self, kind: ActionKind) -> Self {
        self.depends_on.insert(kind);
        self
    }
}

pub(crate) fn clamp_confidence(confidence: f32) -> f32 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

/// 新建的任务
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedTask {
    pub id: String,
    pub title: String,
    pub date: Option<NaiveDate>,
    pub time_block: Option<TimeBlock>,
    pub specific_time: Option<NaiveTime>,
}

/// 动作成功时的结果，变体与 ActionKind 一一对应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionResult {
    TaskCreated {
        task: CreatedTask,
    },
    SchedulePlanned {
        adjusted: bool,
        note: Option<String>,
    },
    ToolInvoked {
        tool: ToolType,
        data: serde_json::Value,
    },
    Conversed {
        reply: String,
    },
}

impl ActionResult {
    pub fn kind(&self) -> ActionKind {
        match self {
            ActionResult::TaskCreated { .. } => ActionKind::TaskCreation,
            ActionResult::SchedulePlanned { .. } => ActionKind::SchedulePlanning,
            ActionResult::ToolInvoked { .. } => ActionKind::ExternalTool,
            ActionResult::Conversed { .. } => ActionKind::Conversation,
        }
    }
}

/// 动作的终态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success { payload: ActionResult },
    Failure { error: ActionError },
}

/// 单个动作的执行结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub kind: ActionKind,
    pub status: OutcomeStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ActionOutcome {
    pub fn success(
        kind: ActionKind,
        payload: ActionResult,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            status: OutcomeStatus::Success { payload },
            started_at,
            finished_at,
        }
    }

    pub fn failure(
        kind: ActionKind,
        error: ActionError,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            status: OutcomeStatus::Failure { error },
            started_at,
            finished_at,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, OutcomeStatus::Success { .. })
    }

    pub fn payload(&self) -> Option<&ActionResult> {
        match &self.status {
            OutcomeStatus::Success { payload } => Some(payload),
            OutcomeStatus::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&ActionError> {
        match &self.status {
            OutcomeStatus::Success { .. } => None,
            OutcomeStatus::Failure { error } => Some(error),
        }
    }
}

/// 已完成动作的只读快照，按类型索引
pub type PriorOutcomes = BTreeMap<ActionKind, ActionOutcome>;

/// 外部意图分类结果；`intent` 为 None 表示标签无法识别
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentClassification {
    pub intent: Option<ActionKind>,
    /// 分类器返回的原始标签
    pub label: String,
    pub confidence: f32,
    pub reasoning: String,
    #[serde(default)]
    pub entities: HashMap<String, String>,
}

impl IntentClassification {
    pub fn new(kind: ActionKind, confidence: f32, reasoning: impl Into<String>) -> Self {
        Self {
            intent: Some(kind),
            label: kind.label().to_string(),
            confidence: clamp_confidence(confidence),
            reasoning: reasoning.into(),
            entities: HashMap::new(),
        }
    }

    /// 由原始标签构造，无法识别的标签保留在 `label` 中
    pub fn from_label(label: impl Into<String>, confidence: f32, reasoning: impl Into<String>) -> Self {
        let label = label.into();
        Self {
            intent: ActionKind::from_label(&label),
            label,
            confidence: clamp_confidence(confidence),
            reasoning: reasoning.into(),
            entities: HashMap::new(),
        }
    }

    pub fn with_entity(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entities.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_roundtrip_is_lenient() {
        for kind in ActionKind::ALL {
            assert_eq!(ActionKind::from_label(kind.label()), Some(kind));
        }
        assert_eq!(ActionKind::from_label(" task-creation "), Some(ActionKind::TaskCreation));
        assert_eq!(ActionKind::from_label("external tool"), Some(ActionKind::ExternalTool));
        assert_eq!(ActionKind::from_label(""), None);
        assert_eq!(ActionKind::from_label("IMAGE_ANALYSIS"), None);
    }

    #[test]
    fn test_fixed_priorities() {
        assert_eq!(ActionKind::ExternalTool.default_priority(), 1);
        assert_eq!(ActionKind::TaskCreation.default_priority(), 1);
        assert_eq!(ActionKind::SchedulePlanning.default_priority(), 2);
        assert_eq!(ActionKind::Conversation.default_priority(), 3);
    }

    #[test]
    fn test_detected_action_clamps_confidence() {
        let payload = ActionPayload::Conversation {
            emotional_state: EmotionalState::Neutral,
        };
        assert_eq!(DetectedAction::new(payload.clone(), 1.7, "x").confidence, 1.0);
        assert_eq!(DetectedAction::new(payload.clone(), -0.2, "x").confidence, 0.0);
        assert_eq!(DetectedAction::new(payload, f32::NAN, "x").confidence, 0.0);
    }

    #[test]
    fn test_unknown_label_classification() {
        let c = IntentClassification::from_label("SMALL_TALK", 0.6, "model said so");
        assert_eq!(c.intent, None);
        assert_eq!(c.label, "SMALL_TALK");
    }

    #[test]
    fn test_outcome_serializes_with_status_tag() {
        let now = Utc::now();
        let outcome = ActionOutcome::failure(ActionKind::ExternalTool, ActionError::Timeout, now, now);
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["kind"], "EXTERNAL_TOOL");
        assert_eq!(json["status"]["status"], "failure");
    }
}
