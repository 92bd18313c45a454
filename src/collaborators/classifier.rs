//! 基于 LLM 的主意图分类
//!
//! 让模型在四种意图中选出主意图并返回 JSON；解析宽松（去除 markdown 代码块、截取首个 `{...}`），
//! 完全无法解析时返回错误，由调度服务改走纯词法路由。

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;

use crate::collaborators::traits::IntentClassifier;
use crate::dispatch::types::IntentClassification;
use crate::llm::{LlmClient, Message};

/// 模型未给出置信度时的取值
pub const DEFAULT_CONFIDENCE: f32 = 0.8;
const DEFAULT_REASONING: &str = "基于模型分析";

const SYSTEM_PROMPT: &str = r#"你是一个专业的意图识别助手，负责分析用户输入并准确识别用户的意图类型。

请根据用户的输入，判断其属于以下四种意图类型中的哪一种：

1. CONVERSATION - 正常对话：情绪安慰、日常聊天、问候、感情表达等
2. TASK_CREATION - 任务新增：创建新任务、添加待办事项、提到未来需要完成或准备的事情（即使伴随情绪表达）
3. SCHEDULE_PLANNING - 时间调度：时间安排、日程规划、任务时间调整等
4. EXTERNAL_TOOL - 外部工具调用：天气、路线耗时、附近地点、当前时间等需要外部信息的请求

如果一句话包含多个意图，请返回主要意图。"#;

static JSON_BLOCK_RE: OnceLock<Regex> = OnceLock::new();

pub struct LlmIntentClassifier {
    llm: Arc<dyn LlmClient>,
}

impl LlmIntentClassifier {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    fn build_messages(text: &str) -> Vec<Message> {
        let user = format!(
            r#"请分析以下用户输入，并识别其意图类型：

用户输入："{text}"

请返回JSON格式的结果：
{{
  "intent": "CONVERSATION|TASK_CREATION|SCHEDULE_PLANNING|EXTERNAL_TOOL",
  "confidence": 0.95,
  "reasoning": "判断理由的简要说明",
  "extracted_info": {{
    "entities": {{"time": "时间实体", "location": "地点实体", "task": "任务内容"}}
  }}
}}

只返回JSON格式，不要包含其他内容。"#
        );
        vec![Message::system(SYSTEM_PROMPT), Message::user(user)]
    }
}

#[async_trait]
impl IntentClassifier for LlmIntentClassifier {
    async fn classify(&self, text: &str) -> anyhow::Result<IntentClassification> {
        let content = self
            .llm
            .complete(&Self::build_messages(text))
            .await
            .map_err(|e| anyhow!(e))
            .context("intent classification request failed")?;
        let classification = parse_classification(&content)?;
        tracing::info!(
            label = %classification.label,
            confidence = classification.confidence,
            "intent classified"
        );
        Ok(classification)
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        self.classify("你好").await.map(|_| ())
    }
}

#[derive(Debug, Deserialize)]
struct RawClassification {
    #[serde(default)]
    intent: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    extracted_info: Option<RawExtractedInfo>,
}

#[derive(Debug, Default, Deserialize)]
struct RawExtractedInfo {
    #[serde(default)]
    entities: HashMap<String, serde_json::Value>,
}

/// 解析模型输出；缺失的置信度取默认值，越界的截断到 [0, 1]
pub fn parse_classification(content: &str) -> anyhow::Result<IntentClassification> {
    let cleaned = content.replace("```json", "").replace("```", "");
    let raw: RawClassification = match serde_json::from_str(cleaned.trim()) {
        Ok(raw) => raw,
        Err(first) => {
            let block = JSON_BLOCK_RE
                .get_or_init(|| Regex::new(r"(?s)\{.*\}").expect("valid json block pattern"))
                .find(content)
                .ok_or_else(|| anyhow!("no JSON object in classifier output: {first}"))?;
            serde_json::from_str(block.as_str())
                .context("classifier output is not a valid classification")?
        }
    };

    let mut classification = IntentClassification::from_label(
        raw.intent.unwrap_or_default(),
        raw.confidence.map(|c| c as f32).unwrap_or(DEFAULT_CONFIDENCE),
        raw.reasoning
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_REASONING.to_string()),
    );

    let entities = raw.extracted_info.unwrap_or_default().entities;
    for (key, value) in entities {
        if let serde_json::Value::String(s) = value {
            if !s.trim().is_empty() {
                classification = classification.with_entity(key, s);
            }
        }
    }
    Ok(classification)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::types::ActionKind;
    use crate::llm::MockLlmClient;

    #[test]
    fn test_parse_fenced_json() {
        let content = "```json\n{\"intent\": \"TASK_CREATION\", \"confidence\": 0.92, \"reasoning\": \"提到明天开会\", \"extracted_info\": {\"entities\": {\"time\": \"明天\", \"location\": null}}}\n```";
        let c = parse_classification(content).unwrap();
        assert_eq!(c.intent, Some(ActionKind::TaskCreation));
        assert!((c.confidence - 0.92).abs() < 1e-6);
        assert_eq!(c.entities.get("time").map(String::as_str), Some("明天"));
        assert!(!c.entities.contains_key("location"));
    }

    #[test]
    fn test_parse_embedded_json_and_defaults() {
        let content = "好的，结果如下：{\"intent\": \"external_tool\"} 希望有帮助";
        let c = parse_classification(content).unwrap();
        assert_eq!(c.intent, Some(ActionKind::ExternalTool));
        assert_eq!(c.confidence, DEFAULT_CONFIDENCE);
        assert_eq!(c.reasoning, DEFAULT_REASONING);
    }

    #[test]
    fn test_parse_clamps_and_keeps_unknown_label() {
        let c = parse_classification(r#"{"intent": "SHOPPING", "confidence": 3.5}"#).unwrap();
        assert_eq!(c.intent, None);
        assert_eq!(c.label, "SHOPPING");
        assert_eq!(c.confidence, 1.0);
    }

    #[test]
    fn test_parse_garbage_is_error() {
        assert!(parse_classification("我觉得是对话").is_err());
        assert!(parse_classification("{not json}").is_err());
    }

    #[tokio::test]
    async fn test_classify_via_llm() {
        let llm = Arc::new(MockLlmClient::scripted([Ok(
            r#"{"intent": "CONVERSATION", "confidence": 0.7, "reasoning": "问候"}"#,
        )]));
        let classifier = LlmIntentClassifier::new(llm.clone());
        let c = classifier.classify("你好").await.unwrap();
        assert_eq!(c.intent, Some(ActionKind::Conversation));

        let requests = llm.requests();
        assert!(requests[0][1].content.contains("你好"));
        // 预设回复用完，LLM 报错即分类失败
        assert!(classifier.classify("再来").await.is_err());
    }
}
