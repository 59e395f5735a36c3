//! 嵌入：把工具描述与任务描述编码为向量
//!
//! - OpenAiEmbedder：调用 OpenAI 兼容的 /embeddings 端点
//! - HashingEmbedder：离线特征哈希（词 + 字符 trigram），确定性、无需网络，测试与离线运行使用

use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::types::embeddings::{CreateEmbeddingRequestArgs, EmbeddingInput};
use async_openai::Client;
use async_trait::async_trait;

use crate::config::EmbeddingSection;
use crate::llm::openai::openai_config;
use crate::llm::tokenizer;

/// 嵌入提供方
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 模型标识；持久化的向量只在标识相同时复用
    fn model_id(&self) -> &str;

    /// 将文本编码为向量；失败时返回错误字符串
    async fn embed(&self, text: &str) -> Result<Vec<f32>, String>;
}

/// 使用 async-openai 调用 OpenAI 兼容的 embeddings API
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiEmbedder {
    /// 从环境变量与可选 base_url 创建（与 LLM 共用 OPENAI_API_KEY / base_url）
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        Self {
            client: Client::with_config(openai_config(base_url, api_key)),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, String> {
        let text = text.trim();
        if text.is_empty() {
            return Err("cannot embed empty text".to_string());
        }
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(EmbeddingInput::String(text.to_string()))
            .build()
            .map_err(|e| e.to_string())?;
        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| e.to_string())?;
        response
            .data
            .into_iter()
            .next()
            .map(|e| e.embedding)
            .ok_or_else(|| "embedding response contained no data".to_string())
    }
}

/// 特征哈希嵌入：词特征权重 1.0，字符 trigram 权重 0.5，结果做 L2 归一化
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
    model_id: String,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        let dimensions = dimensions.max(8);
        Self {
            dimensions,
            model_id: format!("hashing-{dimensions}"),
        }
    }

    fn add_feature(&self, vec: &mut [f32], feature: &str, weight: f32) {
        let h = fnv1a(feature.as_bytes());
        let idx = (h % self.dimensions as u64) as usize;
        let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
        vec[idx] += sign * weight;
    }

    /// 同步计算（纯 CPU）
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; self.dimensions];
        for token in tokenizer::tokenize(text) {
            self.add_feature(&mut vec, &token, 1.0);
            let padded: Vec<char> = format!("#{token}#").chars().collect();
            for w in padded.windows(3) {
                let gram: String = w.iter().collect();
                self.add_feature(&mut vec, &gram, 0.5);
            }
        }
        let norm = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vec.iter_mut().for_each(|x| *x /= norm);
        }
        vec
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, String> {
        Ok(self.embed_text(text))
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

/// 从应用配置创建嵌入提供方；openai 但没有 API Key 时退回 hashing
pub fn create_embedder_from_config(section: &EmbeddingSection) -> Arc<dyn EmbeddingProvider> {
    if section.provider.eq_ignore_ascii_case("openai") {
        let key = section
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_default();
        if !key.is_empty() && key != "sk-placeholder" {
            return Arc::new(OpenAiEmbedder::new(
                section.base_url.as_deref(),
                &section.model,
                Some(&key),
            ));
        }
        tracing::warn!("embedding provider openai requested but no OPENAI_API_KEY; using hashing embedder");
    }
    Arc::new(HashingEmbedder::new(section.dimensions))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn test_hashing_is_deterministic_and_normalized() {
        let e = HashingEmbedder::new(64);
        let a = e.embed_text("Add two numbers.");
        assert_eq!(a, e.embed_text("Add two numbers."));
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
        assert_eq!(e.model_id(), "hashing-64");
    }

    #[test]
    fn test_hashing_related_texts_are_closer() {
        let e = HashingEmbedder::default();
        let query = e.embed_text("Add 2 and 5");
        let add = e.embed_text("add:\nAdd two numbers.");
        let echo = e.embed_text("echo:\nEcho the given text back unchanged.");
        assert!(cosine(&query, &add) > cosine(&query, &echo));
    }

    #[test]
    fn test_empty_text_embeds_to_zero() {
        let v = HashingEmbedder::new(16).embed_text("   ");
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_factory_falls_back_without_key() {
        let section = EmbeddingSection {
            provider: "hashing".into(),
            dimensions: 32,
            ..Default::default()
        };
        assert_eq!(create_embedder_from_config(&section).model_id(), "hashing-32");
    }
}
