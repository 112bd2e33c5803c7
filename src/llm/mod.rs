//! LLM 层：决策模型的请求/响应抽象与实现（OpenAI 兼容 / 脚本化 Mock）

pub mod message;
pub mod mock;
pub mod openai;
pub mod traits;

pub use message::{Message, Role};
pub use mock::ScriptedLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{LlmClient, LlmError, ModelOutput};
