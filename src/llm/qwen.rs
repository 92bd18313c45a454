//! 通义千问（DashScope OpenAI 兼容模式）
//!
//! - Base URL: https://dashscope.aliyuncs.com/compatible-mode/v1
//! - 模型: qwen-plus（默认），可通过配置或 QWEN_MODEL 指定其他型号

use crate::llm::OpenAiClient;

pub const QWEN_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";
pub const QWEN_PLUS: &str = "qwen-plus";

/// 是否配置了 DashScope Key（`DASHSCOPE_API_KEY` 或 `QWEN_API_KEY`）
pub fn qwen_api_key() -> Option<String> {
    std::env::var("DASHSCOPE_API_KEY")
        .ok()
        .or_else(|| std::env::var("QWEN_API_KEY").ok())
}

/// 创建千问客户端；`base_url` 为空时用官方兼容端点
pub fn create_qwen_client(model: Option<&str>, base_url: Option<&str>) -> OpenAiClient {
    let api_key = qwen_api_key();
    let model = model
        .map(String::from)
        .or_else(|| std::env::var("QWEN_MODEL").ok())
        .unwrap_or_else(|| QWEN_PLUS.to_string());

    OpenAiClient::new(
        Some(base_url.unwrap_or(QWEN_BASE_URL)),
        &model,
        api_key.as_deref(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_model_wins() {
        let client = create_qwen_client(Some("qwen-max"), None);
        assert_eq!(client.model(), "qwen-max");
    }
}
