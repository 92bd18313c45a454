//! AIsiri 智能调度核心
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **collaborators**: 外部协作者接口与实现（意图分类、任务表、动作处理器、回复合成）
//! - **dispatch**: 多意图路由、分层执行与结果聚合
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / 通义千问 / Mock）
//! - **observability**: 日志初始化

pub mod collaborators;
pub mod config;
pub mod dispatch;
pub mod llm;
pub mod observability;

pub use dispatch::{DispatchResult, DispatchService};
