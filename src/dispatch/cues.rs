//! 关键词表与匹配
//!
//! 中文关键词按子串匹配（与产品原有行为一致）；英文关键词按整词/整短语匹配，
//! 避免 "hi" 命中 "this" 之类的误判。

/// 预处理后的用户文本
#[derive(Debug, Clone)]
pub struct CueText {
    lowered: String,
    /// 仅保留 ASCII 字母数字的词序列，首尾带空格，便于整词匹配
    words: String,
}

impl CueText {
    pub fn new(text: &str) -> Self {
        let lowered = text.to_lowercase();
        let words = format!(" {} ", normalize_words(&lowered));
        Self { lowered, words }
    }

    pub fn lowered(&self) -> &str {
        &self.lowered
    }

    pub fn contains(&self, cue: &str) -> bool {
        if cue.is_ascii() {
            let cue = normalize_words(&cue.to_ascii_lowercase());
            !cue.is_empty() && self.words.contains(&format!(" {cue} "))
        } else {
            self.lowered.contains(cue)
        }
    }

    pub fn contains_any(&self, cues: &[&str]) -> bool {
        cues.iter().any(|cue| self.contains(cue))
    }

    pub fn first_match<'a>(&self, cues: &[&'a str]) -> Option<&'a str> {
        cues.iter().copied().find(|cue| self.contains(cue))
    }
}

fn normalize_words(text: &str) -> String {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

pub const TASK_CUES: &[&str] = &[
    "要", "需要", "打电话", "开会", "取快递", "买", "去", "做", "完成", "提醒", "记住", "安排",
    "预约", "约", "见面", "拜访", "处理",
    "remind", "remember to", "need to", "have to", "call", "meeting", "meet", "buy", "pick up",
    "appointment", "visit", "finish", "todo", "to do", "book",
];

pub const TIME_CUES: &[&str] = &[
    "明天", "后天", "下周", "早上", "上午", "下午", "晚上", "今天",
    "today", "tomorrow", "tonight", "next week", "morning", "afternoon", "evening",
];

pub const SCHEDULE_CUES: &[&str] = &[
    "安排", "规划", "调整", "时间", "日程", "计划", "重新安排", "早上", "上午", "下午", "晚上",
    "几点", "什么时候",
    "schedule", "reschedule", "plan", "planning", "arrange", "rearrange", "calendar", "agenda",
    "what time", "when",
];

pub const EXTERNAL_TOOL_CUES: &[&str] = &[
    "天气", "路线", "多久", "怎么走", "附近", "地图", "导航", "现在几点", "时间", "日期", "今天星期几",
    "weather", "forecast", "route", "directions", "how long", "how far", "nearby", "map",
    "navigate", "what time is it", "date", "what day",
];

pub const CONVERSATION_CUES: &[&str] = &[
    "你好", "谢谢", "感谢", "累", "开心", "难过", "压力", "焦虑", "怎么样", "如何", "为什么", "聊天",
    "说说",
    "hello", "hi", "hey", "thanks", "thank you", "tired", "happy", "sad", "stress", "anxious",
    "how are you", "why", "chat", "talk",
];

pub const WEATHER_CUES: &[&str] = &["天气", "weather", "forecast"];

pub const ROUTE_CUES: &[&str] = &[
    "路线", "多久", "怎么走", "导航", "route", "directions", "how long", "how far", "navigate",
];

pub const CLOCK_CUES: &[&str] = &[
    "时间", "几点", "星期几", "日期", "what time", "what day", "date",
];

pub const TIRED_CUES: &[&str] = &[
    "累", "疲惫", "疲劳", "困", "tired", "exhausted", "sleepy", "worn out",
];

pub const STRESSED_CUES: &[&str] = &[
    "压力", "紧张", "忙", "烦躁", "stressed", "stress", "busy", "overwhelmed", "tense",
];

pub const ANXIOUS_CUES: &[&str] = &[
    "焦虑", "担心", "不安", "紧张", "anxious", "worried", "nervous", "uneasy",
];

pub const SAD_CUES: &[&str] = &[
    "沮丧", "难过", "郁闷", "心情不好", "不开心", "失落", "烦恼", "烦", "糟糕",
    "sad", "upset", "depressed", "unhappy", "frustrated", "terrible", "feeling down",
];

pub const ANGRY_CUES: &[&str] = &[
    "生气", "愤怒", "气愤", "恼火", "angry", "furious", "mad", "annoyed",
];

pub const HAPPY_CUES: &[&str] = &[
    "开心", "高兴", "快乐", "兴奋", "happy", "glad", "joyful", "excited",
];

/// 常见目的地关键词 -> 规范地名
pub const LANDMARKS: &[(&str, &str)] = &[
    ("虹桥站", "虹桥火车站"),
    ("浦东", "浦东机场"),
    ("火车站", "上海火车站"),
    ("南站", "上海南站"),
    ("机场", "虹桥机场"),
    ("虹桥", "虹桥机场"),
    ("外滩", "外滩"),
    ("陆家嘴", "陆家嘴"),
    ("人民广场", "人民广场"),
];
