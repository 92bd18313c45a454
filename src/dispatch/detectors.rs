//! 动作检测规则表
//!
//! 每种 ActionKind 一条纯规则：`(输入, 已检测动作) -> Option<DetectedAction>`。
//! 规则不做 I/O、不报错，未命中返回 None；路由器按表顺序折叠得到候选动作。

use chrono::NaiveDate;
use tracing::debug;

use crate::dispatch::cues::{
    CueText, CONVERSATION_CUES, EXTERNAL_TOOL_CUES, SCHEDULE_CUES, TASK_CUES, TIME_CUES,
};
use crate::dispatch::emotion::EmotionalState;
use crate::dispatch::extract::{detect_tool_type, extract_destination, extract_time_info};
use crate::dispatch::types::{ActionKind, ActionPayload, DetectedAction, ToolType};

pub const TASK_WITH_TIME_CONFIDENCE: f32 = 0.9;
pub const TASK_CONFIDENCE: f32 = 0.7;
pub const SCHEDULE_CONFIDENCE: f32 = 0.8;
pub const EXTERNAL_TOOL_CONFIDENCE: f32 = 0.8;
/// 情绪触发的天气查询，低于直接命中
pub const EMOTION_TOOL_CONFIDENCE: f32 = 0.7;
pub const CONVERSATION_CONFIDENCE: f32 = 0.7;

pub const EMOTION_TOOL_REASONING: &str =
    "negative emotional state detected, checking the weather to suggest going outside";

/// 主意图（已归一化：无法识别的标签视为对话、置信度取最低）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrimaryIntent {
    pub kind: ActionKind,
    pub confidence: f32,
}

/// 规则的只读输入
#[derive(Debug)]
pub struct DetectionInput<'a> {
    pub text: &'a CueText,
    /// None 表示外部分类不可用
    pub primary: Option<PrimaryIntent>,
    pub emotional_state: EmotionalState,
    pub today: NaiveDate,
    /// 外部“今天已有任务”查询结果；未查询时为 false
    pub has_existing_tasks: bool,
}

impl DetectionInput<'_> {
    fn primary_confidence(&self, kind: ActionKind) -> Option<f32> {
        self.primary
            .filter(|p| p.kind == kind)
            .map(|p| p.confidence)
    }
}

pub type Detector = fn(&DetectionInput<'_>, &[DetectedAction]) -> Option<DetectedAction>;

/// 规则表；调度规则读取任务创建的结果，故排在其后
pub const DETECTORS: [(ActionKind, Detector); 4] = [
    (ActionKind::TaskCreation, detect_task_creation),
    (ActionKind::ExternalTool, detect_external_tool),
    (ActionKind::SchedulePlanning, detect_schedule_planning),
    (ActionKind::Conversation, detect_conversation),
];

/// 按表顺序折叠所有规则
pub fn run_detectors(input: &DetectionInput<'_>) -> Vec<DetectedAction> {
    DETECTORS.iter().fold(Vec::new(), |mut detected, (kind, detector)| {
        match detector(input, &detected) {
            Some(action) => {
                debug!(kind = %kind, confidence = action.confidence, reasoning = %action.reasoning, "detector matched");
                detected.push(action);
            }
            None => debug!(kind = %kind, "detector did not match"),
        }
        detected
    })
}

/// 调度规则是否需要外部“已有任务”查询：有调度线索但没有任务创建
pub fn needs_existing_tasks_check(input: &DetectionInput<'_>) -> bool {
    schedule_signal(input).is_some() && detect_task_creation(input, &[]).is_none()
}

pub fn detect_task_creation(
    input: &DetectionInput<'_>,
    _detected: &[DetectedAction],
) -> Option<DetectedAction> {
    let (confidence, reasoning) = if let Some(c) = input.primary_confidence(ActionKind::TaskCreation) {
        (c, "primary intent is task creation")
    } else if input.text.contains_any(TASK_CUES) {
        if input.text.contains_any(TIME_CUES) {
            (TASK_WITH_TIME_CONFIDENCE, "task and time cues present")
        } else {
            (TASK_CONFIDENCE, "task cue present")
        }
    } else {
        return None;
    };

    let payload = ActionPayload::TaskCreation {
        time_info: extract_time_info(input.text, input.today),
    };
    Some(DetectedAction::new(payload, confidence, reasoning))
}

fn schedule_signal(input: &DetectionInput<'_>) -> Option<(f32, &'static str)> {
    if let Some(c) = input.primary_confidence(ActionKind::SchedulePlanning) {
        Some((c, "primary intent is schedule planning"))
    } else if input.text.contains_any(SCHEDULE_CUES) {
        Some((SCHEDULE_CONFIDENCE, "schedule cue present"))
    } else {
        None
    }
}

/// 仅当本计划有任务创建、或今天已有任务时才提出调度；依赖任务创建当且仅当其在计划内
pub fn detect_schedule_planning(
    input: &DetectionInput<'_>,
    detected: &[DetectedAction],
) -> Option<DetectedAction> {
    let (confidence, reasoning) = schedule_signal(input)?;
    let task_planned = detected.iter().any(|a| a.kind == ActionKind::TaskCreation);
    if !task_planned && !input.has_existing_tasks {
        debug!("schedule cue ignored: nothing to schedule");
        return None;
    }

    let task_date = detected.iter().find_map(|a| match &a.payload {
        ActionPayload::TaskCreation { time_info } => time_info.date,
        _ => None,
    });
    let target_date = task_date
        .or_else(|| extract_time_info(input.text, input.today).date)
        .unwrap_or(input.today);

    let payload = ActionPayload::SchedulePlanning {
        target_date,
        emotional_state: input.emotional_state,
    };
    let action = DetectedAction::new(payload, confidence, reasoning);
    Some(if task_planned {
        action.depending_on(ActionKind::TaskCreation)
    } else {
        action
    })
}

/// 直接命中（主意图或关键词）优先；否则负面情绪时以较低置信度追加天气查询
pub fn detect_external_tool(
    input: &DetectionInput<'_>,
    _detected: &[DetectedAction],
) -> Option<DetectedAction> {
    let direct = if let Some(c) = input.primary_confidence(ActionKind::ExternalTool) {
        Some((c, "primary intent is external tool"))
    } else if input.text.contains_any(EXTERNAL_TOOL_CUES) {
        Some((EXTERNAL_TOOL_CONFIDENCE, "external tool cue present"))
    } else {
        None
    };

    if let Some((confidence, reasoning)) = direct {
        let tool = detect_tool_type(input.text);
        let destination = match tool {
            ToolType::Route => extract_destination(input.text),
            _ => None,
        };
        let payload = ActionPayload::ExternalTool {
            tool,
            destination,
            emotion_triggered: false,
        };
        return Some(DetectedAction::new(payload, confidence, reasoning));
    }

    if input.emotional_state.is_negative() {
        let payload = ActionPayload::ExternalTool {
            tool: ToolType::Weather,
            destination: None,
            emotion_triggered: true,
        };
        return Some(DetectedAction::new(
            payload,
            EMOTION_TOOL_CONFIDENCE,
            EMOTION_TOOL_REASONING,
        ));
    }

    None
}

pub fn detect_conversation(
    input: &DetectionInput<'_>,
    _detected: &[DetectedAction],
) -> Option<DetectedAction> {
    let (confidence, reasoning) =
        if let Some(c) = input.primary_confidence(ActionKind::Conversation) {
            (c, "primary intent is conversation")
        } else if input.text.contains_any(CONVERSATION_CUES) {
            (CONVERSATION_CONFIDENCE, "conversation cue present")
        } else {
            return None;
        };

    let payload = ActionPayload::Conversation {
        emotional_state: input.emotional_state,
    };
    Some(DetectedAction::new(payload, confidence, reasoning))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::emotion::detect_in;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 10).unwrap()
    }

    fn input<'a>(text: &'a CueText, primary: Option<PrimaryIntent>) -> DetectionInput<'a> {
        DetectionInput {
            text,
            primary,
            emotional_state: detect_in(text),
            today: today(),
            has_existing_tasks: false,
        }
    }

    #[test]
    fn test_task_creation_confidence_tiers() {
        let text = CueText::new("明天要去取快递");
        let action = detect_task_creation(&input(&text, None), &[]).unwrap();
        assert_eq!(action.confidence, TASK_WITH_TIME_CONFIDENCE);
        match action.payload {
            ActionPayload::TaskCreation { time_info } => {
                assert_eq!(time_info.date, NaiveDate::from_ymd_opt(2026, 3, 11))
            }
            other => panic!("unexpected payload {other:?}"),
        }

        let text = CueText::new("记得买牛奶");
        let action = detect_task_creation(&input(&text, None), &[]).unwrap();
        assert_eq!(action.confidence, TASK_CONFIDENCE);
    }

    #[test]
    fn test_primary_intent_uses_external_confidence() {
        let text = CueText::new("随便");
        let primary = PrimaryIntent {
            kind: ActionKind::TaskCreation,
            confidence: 0.66,
        };
        let action = detect_task_creation(&input(&text, Some(primary)), &[]).unwrap();
        assert_eq!(action.confidence, 0.66);
    }

    #[test]
    fn test_detectors_are_total_on_empty_text() {
        let text = CueText::new("");
        let input = input(&text, None);
        for (_, detector) in DETECTORS {
            assert!(detector(&input, &[]).is_none());
        }
    }

    #[test]
    fn test_schedule_requires_something_to_schedule() {
        let text = CueText::new("帮我重新安排日程");
        let mut inp = input(&text, None);
        // 已检测列表为空，单独检验“已有任务”门控
        assert!(detect_schedule_planning(&inp, &[]).is_none());

        inp.has_existing_tasks = true;
        let action = detect_schedule_planning(&inp, &[]).unwrap();
        assert!(action.depends_on.is_empty());
        assert_eq!(action.priority, 2);
    }

    #[test]
    fn test_schedule_depends_on_planned_task() {
        let text = CueText::new("后天下午安排开会");
        let inp = input(&text, None);
        let task = detect_task_creation(&inp, &[]).unwrap();
        let action = detect_schedule_planning(&inp, std::slice::from_ref(&task)).unwrap();
        assert!(action.depends_on.contains(&ActionKind::TaskCreation));
        match action.payload {
            ActionPayload::SchedulePlanning { target_date, .. } => {
                assert_eq!(Some(target_date), NaiveDate::from_ymd_opt(2026, 3, 12))
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_needs_existing_tasks_check() {
        let text = CueText::new("规划一下日程");
        assert!(needs_existing_tasks_check(&input(&text, None)));

        let text = CueText::new("明天下午要开会");
        assert!(!needs_existing_tasks_check(&input(&text, None)));

        let text = CueText::new("你好");
        assert!(!needs_existing_tasks_check(&input(&text, None)));
    }

    #[test]
    fn test_emotion_triggers_weather_with_lower_confidence() {
        let text = CueText::new("今天好累");
        let action = detect_external_tool(&input(&text, None), &[]).unwrap();
        assert_eq!(action.confidence, EMOTION_TOOL_CONFIDENCE);
        assert_eq!(action.reasoning, EMOTION_TOOL_REASONING);
        assert!(action.confidence < EXTERNAL_TOOL_CONFIDENCE);
        assert!(matches!(
            action.payload,
            ActionPayload::ExternalTool {
                tool: ToolType::Weather,
                emotion_triggered: true,
                ..
            }
        ));
    }

    #[test]
    fn test_direct_tool_match_wins_over_emotion() {
        let text = CueText::new("好累，去机场要多久");
        let action = detect_external_tool(&input(&text, None), &[]).unwrap();
        assert_eq!(action.confidence, EXTERNAL_TOOL_CONFIDENCE);
        assert_ne!(action.reasoning, EMOTION_TOOL_REASONING);
        assert_eq!(
            action.payload,
            ActionPayload::ExternalTool {
                tool: ToolType::Route,
                destination: Some("虹桥机场".to_string()),
                emotion_triggered: false,
            }
        );
    }

    #[test]
    fn test_fold_never_duplicates_kinds() {
        let text = CueText::new("明天下午要开会，好累，天气怎么样，你好");
        let detected = run_detectors(&input(&text, None));
        let mut kinds: Vec<ActionKind> = detected.iter().map(|a| a.kind).collect();
        let before = kinds.len();
        kinds.sort();
        kinds.dedup();
        assert_eq!(kinds.len(), before);
        assert_eq!(before, 4);
    }
}
