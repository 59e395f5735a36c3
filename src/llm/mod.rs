//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Mock）、嵌入、分词

pub mod embedding;
pub mod message;
pub mod mock;
pub mod openai;
pub mod tokenizer;
pub mod traits;

pub use embedding::{create_embedder_from_config, EmbeddingProvider, HashingEmbedder, OpenAiEmbedder};
pub use message::{Message, Role};
pub use mock::MockLlmClient;
pub use openai::{create_llm_from_config, OpenAiClient, TokenUsage};
pub use traits::LlmClient;
