//! 载荷抽取：时间信息、外部工具子类型、路线目的地
//!
//! 全部为纯函数；“今天”由调用方注入，保证相同输入得到相同结果。

use std::sync::OnceLock;

use chrono::{Days, NaiveDate, NaiveTime};
use regex::Regex;

use crate::dispatch::cues::{CueText, CLOCK_CUES, LANDMARKS, ROUTE_CUES, WEATHER_CUES};
use crate::dispatch::types::{TimeBlock, TimeInfo, ToolType};

static CLOCK_RE: OnceLock<Regex> = OnceLock::new();
static CN_CLOCK_RE: OnceLock<Regex> = OnceLock::new();
static CN_DESTINATION_RE: OnceLock<Regex> = OnceLock::new();

/// 抽取日期、时间段与具体时刻
pub fn extract_time_info(text: &CueText, today: NaiveDate) -> TimeInfo {
    let date = if text.contains("后天") || text.contains("day after tomorrow") {
        today.checked_add_days(Days::new(2))
    } else if text.contains("明天") || text.contains("tomorrow") {
        today.checked_add_days(Days::new(1))
    } else if text.contains("今天") || text.contains("today") || text.contains("tonight") {
        Some(today)
    } else {
        None
    };

    let time_block = if text.contains("早上") || text.contains("morning") {
        Some(TimeBlock::Morning)
    } else if text.contains("上午") || text.contains("forenoon") {
        Some(TimeBlock::Forenoon)
    } else if text.contains("下午") || text.contains("afternoon") {
        Some(TimeBlock::Afternoon)
    } else if text.contains("晚上") || text.contains("evening") || text.contains("tonight") {
        Some(TimeBlock::Evening)
    } else {
        None
    };

    let specific_time = extract_clock_time(text.lowered(), time_block);

    TimeInfo {
        date,
        time_block,
        specific_time,
    }
}

/// 识别 `15:30`、`3点`、`3点半`、`8点15分` 等时刻；下午/晚上的 12 点以前时刻按 12 小时制换算
fn extract_clock_time(text: &str, block: Option<TimeBlock>) -> Option<NaiveTime> {
    let clock = CLOCK_RE
        .get_or_init(|| Regex::new(r"(\d{1,2})[:：](\d{2})").expect("valid clock pattern"));
    let cn_clock = CN_CLOCK_RE.get_or_init(|| {
        Regex::new(r"(\d{1,2})\s*点(?:\s*(半)|\s*(\d{1,2})\s*分)?").expect("valid clock pattern")
    });

    let (hour, minute) = if let Some(caps) = clock.captures(text) {
        (caps[1].parse::<u32>().ok()?, caps[2].parse::<u32>().ok()?)
    } else if let Some(caps) = cn_clock.captures(text) {
        let hour = caps[1].parse::<u32>().ok()?;
        let minute = if caps.get(2).is_some() {
            30
        } else {
            caps.get(3).and_then(|m| m.as_str().parse::<u32>().ok()).unwrap_or(0)
        };
        (hour, minute)
    } else {
        return None;
    };

    let hour = match block {
        Some(b) if b.is_after_noon() && hour < 12 => hour + 12,
        _ => hour,
    };
    NaiveTime::from_hms_opt(hour, minute, 0)
}

/// 外部工具子类型：天气 > 路线 > 时间
pub fn detect_tool_type(text: &CueText) -> ToolType {
    if text.contains_any(WEATHER_CUES) {
        ToolType::Weather
    } else if text.contains_any(ROUTE_CUES) {
        ToolType::Route
    } else if text.contains_any(CLOCK_CUES) {
        ToolType::Time
    } else {
        ToolType::Unknown
    }
}

/// 路线目的地：先查常见地标，再取“到”之后的短语，最后取英文最后一个 `to <place>`
pub fn extract_destination(text: &CueText) -> Option<String> {
    if let Some((_, place)) = LANDMARKS.iter().find(|(cue, _)| text.contains(cue)) {
        return Some((*place).to_string());
    }

    let cn = CN_DESTINATION_RE.get_or_init(|| {
        Regex::new(r"到([^，。,.？?！!\s]+?)(?:需要多久|要多久|多久|怎么走|的路线|路线|[，。,.？?！!\s]|$)")
            .expect("valid destination pattern")
    });
    if let Some(place) = cn
        .captures(text.lowered())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
    {
        return Some(place.to_string());
    }

    let lowered = text.lowered();
    let idx = lowered.rfind(" to ")?;
    let rest = lowered[idx + " to ".len()..].trim_start();
    let rest = rest.strip_prefix("the ").unwrap_or(rest);
    let place: String = rest
        .chars()
        .take_while(|c| c.is_ascii_alphabetic() || *c == ' ')
        .collect();
    let place = place.trim();
    (!place.is_empty()).then(|| place.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 10).unwrap()
    }

    #[test]
    fn test_relative_dates() {
        let info = extract_time_info(&CueText::new("明天要开会"), today());
        assert_eq!(info.date, NaiveDate::from_ymd_opt(2026, 3, 11));

        let info = extract_time_info(&CueText::new("后天去拜访客户"), today());
        assert_eq!(info.date, NaiveDate::from_ymd_opt(2026, 3, 12));

        let info = extract_time_info(&CueText::new("the day after tomorrow"), today());
        assert_eq!(info.date, NaiveDate::from_ymd_opt(2026, 3, 12));

        let info = extract_time_info(&CueText::new("随便聊聊"), today());
        assert!(info.is_empty());
    }

    #[test]
    fn test_time_block_and_clock() {
        let info = extract_time_info(&CueText::new("明天下午3点半开会"), today());
        assert_eq!(info.time_block, Some(TimeBlock::Afternoon));
        assert_eq!(info.specific_time, NaiveTime::from_hms_opt(15, 30, 0));

        let info = extract_time_info(&CueText::new("call mom at 09:45 tomorrow"), today());
        assert_eq!(info.time_block, None);
        assert_eq!(info.specific_time, NaiveTime::from_hms_opt(9, 45, 0));

        let info = extract_time_info(&CueText::new("晚上8点15分提醒我吃药"), today());
        assert_eq!(info.specific_time, NaiveTime::from_hms_opt(20, 15, 0));
    }

    #[test]
    fn test_invalid_clock_is_ignored() {
        let info = extract_time_info(&CueText::new("99:99 的东西"), today());
        assert_eq!(info.specific_time, None);
    }

    #[test]
    fn test_tool_type() {
        assert_eq!(detect_tool_type(&CueText::new("今天天气怎么样")), ToolType::Weather);
        assert_eq!(detect_tool_type(&CueText::new("去机场要多久")), ToolType::Route);
        assert_eq!(detect_tool_type(&CueText::new("现在几点了")), ToolType::Time);
        assert_eq!(detect_tool_type(&CueText::new("附近有什么")), ToolType::Unknown);
    }

    #[test]
    fn test_destination() {
        assert_eq!(
            extract_destination(&CueText::new("去浦东机场要多久")).as_deref(),
            Some("浦东机场")
        );
        assert_eq!(
            extract_destination(&CueText::new("从公司到徐家汇怎么走")).as_deref(),
            Some("徐家汇")
        );
        assert_eq!(
            extract_destination(&CueText::new("How long does it take to get to the stadium?"))
                .as_deref(),
            Some("stadium")
        );
        assert_eq!(extract_destination(&CueText::new("今天天气如何")), None);
    }
}
