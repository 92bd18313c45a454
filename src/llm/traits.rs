//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / 通义千问 / Mock）实现 LlmClient，调度核心只用非流式完成。

use async_trait::async_trait;

use crate::llm::message::Message;

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成，返回首个候选的文本
    async fn complete(&self, messages: &[Message]) -> Result<String, String>;

    /// 后端与模型名，用于日志
    fn describe(&self) -> String {
        "llm".to_string()
    }
}
