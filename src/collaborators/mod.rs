//! 外部协作者：接口、处理器注册表，以及 LLM / 进程内实现

pub mod classifier;
pub mod local;
pub mod registry;
pub mod synthesizer;
pub mod traits;

pub use classifier::LlmIntentClassifier;
pub use local::{InMemoryTaskStore, LlmConversationHandler, LocalSchedulePlanner, OfflineToolHandler};
pub use registry::HandlerRegistry;
pub use synthesizer::LlmReplySynthesizer;
pub use traits::{
    ActionContext, ActionHandler, IntentClassifier, ReplySynthesizer, SynthesisRequest,
    TaskInventory,
};
