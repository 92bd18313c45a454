//! LLM 层：客户端抽象与实现（OpenAI 兼容 / 通义千问 / Mock）

pub mod message;
pub mod mock;
pub mod openai;
pub mod qwen;
pub mod traits;

use std::sync::Arc;
use std::time::Duration;

pub use message::{Message, Role};
pub use mock::MockLlmClient;
pub use openai::OpenAiClient;
pub use qwen::{create_qwen_client, QWEN_PLUS};
pub use traits::LlmClient;

use crate::config::LlmSection;

/// 根据配置与环境变量选择 LLM 后端；缺少 Key 时退回 Mock（调度走本地降级）
pub fn create_llm_from_config(cfg: &LlmSection) -> Arc<dyn LlmClient> {
    let provider = cfg.provider.to_lowercase();
    let timeout = Duration::from_secs(cfg.timeouts.request);

    match provider.as_str() {
        "qwen" | "dashscope" if qwen::qwen_api_key().is_some() => {
            tracing::info!("Using Qwen LLM ({})", cfg.model);
            Arc::new(
                create_qwen_client(Some(&cfg.model), cfg.base_url.as_deref())
                    .with_request_timeout(timeout),
            )
        }
        "openai" if std::env::var("OPENAI_API_KEY").is_ok() => {
            tracing::info!("Using OpenAI LLM ({})", cfg.model);
            Arc::new(
                OpenAiClient::new(
                    cfg.base_url.as_deref(),
                    &cfg.model,
                    std::env::var("OPENAI_API_KEY").ok().as_deref(),
                )
                .with_request_timeout(timeout),
            )
        }
        "mock" => {
            tracing::info!("Using Mock LLM");
            Arc::new(MockLlmClient::new())
        }
        other => {
            tracing::warn!(provider = other, "No API key set or provider unknown, using Mock LLM");
            Arc::new(MockLlmClient::new())
        }
    }
}
