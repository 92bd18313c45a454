//! 情绪启发式：按关键词把文本映射为粗粒度情绪标签
//!
//! 只用于决定是否追加辅助动作（负面情绪时主动查天气给出外出建议），不参与意图分类。

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dispatch::cues::{
    CueText, ANGRY_CUES, ANXIOUS_CUES, HAPPY_CUES, SAD_CUES, STRESSED_CUES, TIRED_CUES,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmotionalState {
    Tired,
    Stressed,
    Anxious,
    Sad,
    Angry,
    Happy,
    Neutral,
}

impl EmotionalState {
    pub const NEGATIVE: [EmotionalState; 5] = [
        EmotionalState::Tired,
        EmotionalState::Stressed,
        EmotionalState::Anxious,
        EmotionalState::Sad,
        EmotionalState::Angry,
    ];

    pub fn is_negative(self) -> bool {
        Self::NEGATIVE.contains(&self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EmotionalState::Tired => "tired",
            EmotionalState::Stressed => "stressed",
            EmotionalState::Anxious => "anxious",
            EmotionalState::Sad => "sad",
            EmotionalState::Angry => "angry",
            EmotionalState::Happy => "happy",
            EmotionalState::Neutral => "neutral",
        }
    }
}

impl fmt::Display for EmotionalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 按顺序检查，先命中者优先（“紧张”同时属于压力与焦虑，归为压力）
const EMOTION_TABLE: &[(EmotionalState, &[&str])] = &[
    (EmotionalState::Tired, TIRED_CUES),
    (EmotionalState::Stressed, STRESSED_CUES),
    (EmotionalState::Anxious, ANXIOUS_CUES),
    (EmotionalState::Sad, SAD_CUES),
    (EmotionalState::Angry, ANGRY_CUES),
    (EmotionalState::Happy, HAPPY_CUES),
];

pub fn detect_emotional_state(text: &str) -> EmotionalState {
    detect_in(&CueText::new(text))
}

pub(crate) fn detect_in(text: &CueText) -> EmotionalState {
    EMOTION_TABLE
        .iter()
        .find(|(_, cues)| text.contains_any(cues))
        .map(|(state, _)| *state)
        .unwrap_or(EmotionalState::Neutral)
}
