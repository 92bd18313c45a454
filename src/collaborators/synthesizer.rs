//! 基于 LLM 的统一回复合成

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;

use crate::collaborators::traits::{ReplySynthesizer, SynthesisRequest};
use crate::llm::{LlmClient, Message};

pub struct LlmReplySynthesizer {
    llm: Arc<dyn LlmClient>,
    assistant_name: String,
}

impl LlmReplySynthesizer {
    pub fn new(llm: Arc<dyn LlmClient>, assistant_name: impl Into<String>) -> Self {
        Self {
            llm,
            assistant_name: assistant_name.into(),
        }
    }

    fn system_prompt(&self) -> String {
        let name = &self.assistant_name;
        format!(
            "你是一个智能AI助手{name}，负责将多个服务模块的执行结果整合成一个自然、友好的统一回复。\n\n\
             回复原则：\n\
             - 语调温暖友善，像朋友一样\n\
             - 先处理任务，再给予情感支持\n\
             - 信息要准确完整，失败的部分如实说明\n\
             - 长度控制在150字以内\n\
             - 在回复中自然地提到自己的名字{name}"
        )
    }

    fn user_prompt(request: &SynthesisRequest<'_>) -> String {
        let intents = request
            .plan
            .actions()
            .iter()
            .map(|a| format!("- {} (置信度: {:.2})", a.kind, a.confidence))
            .collect::<Vec<_>>()
            .join("\n");
        let results = request.summary.lines().join("\n");
        format!(
            "请基于以下信息生成一个自然、友好的统一回复：\n\n\
             用户原始输入：\"{}\"\n\n\
             识别到的意图：\n{intents}\n\n\
             各服务执行结果：\n{results}\n\n\
             直接返回回复内容，不需要额外说明。",
            request.text
        )
    }
}

#[async_trait]
impl ReplySynthesizer for LlmReplySynthesizer {
    async fn synthesize(&self, request: SynthesisRequest<'_>) -> anyhow::Result<String> {
        let messages = vec![
            Message::system(self.system_prompt()),
            Message::user(Self::user_prompt(&request)),
        ];
        let reply = self.llm.complete(&messages).await.map_err(|e| anyhow!(e))?;
        let reply = reply.trim();
        if reply.is_empty() {
            anyhow::bail!("synthesizer returned empty output");
        }
        Ok(reply.to_string())
    }
}
