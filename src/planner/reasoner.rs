//! Reasoner：规划器的 LLM 协作方
//!
//! - LlmReasoner：基于 LlmClient 的实现，要求 JSON 回复（结构由 schemars 生成的 Schema 描述），
//!   解析时先找 ```json 代码块，再找最外层花括号
//! - ScriptedReasoner：按队列回放预设回复的测试替身，并记录每次调用

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::{LlmClient, Message};
use crate::planner::prompts;
use crate::tools::{reply_schema_json, ToolDefinition};

/// 分解请求的上下文
#[derive(Debug, Clone, Default)]
pub struct DecompositionContext {
    /// 不设阈值检索到的工具名（只作参考）
    pub tool_names: Vec<String>,
    /// 已解决的前序任务：(描述, 结果)，由远及近
    pub previous: Vec<(String, String)>,
    /// 之前失败的各代计划
    pub failed_plans: Vec<Vec<String>>,
}

/// Reasoner 请求的一次工具调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ToolCall {
    #[serde(default)]
    pub id: String,
    /// 工具名称（与提供的工具列表一致）
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            arguments,
        }
    }
}

/// 一次调用及其结果文本（失败时为 `Error: ...`）
#[derive(Debug, Clone, PartialEq)]
pub struct ToolExchange {
    pub call: ToolCall,
    pub output: String,
}

/// 求解叶子任务时的上下文
#[derive(Debug, Clone, Default)]
pub struct SolveContext {
    pub previous: Vec<(String, String)>,
    pub transcript: Vec<ToolExchange>,
    pub verbose_ids: bool,
}

/// 求解一步：请求工具调用，或给出答案（空答案表示无法解决）
#[derive(Debug, Clone, PartialEq)]
pub enum SolveStep {
    Calls(Vec<ToolCall>),
    Answer(String),
}

/// 规划器需要的全部判断；实现必须无状态，每次调用都是一次独立往返
#[async_trait]
pub trait Reasoner: Send + Sync {
    /// 有序子任务描述；空表示不再分解
    async fn decompose(&self, task: &str, context: &DecompositionContext) -> Result<Vec<String>, String>;

    async fn choose_tools_and_solve(
        &self,
        task: &str,
        tools: &[ToolDefinition],
        context: &SolveContext,
    ) -> Result<SolveStep, String>;

    /// 由子任务结果汇总出父任务结果；空表示无法汇总
    async fn aggregate(&self, task: &str, child_results: &[(String, String)]) -> Result<String, String>;

    async fn paraphrase(&self, task: &str) -> Result<String, String>;

    /// 为任务生成工具源码；feedback 为上一次被拒绝的原因
    async fn generate_code(&self, task: &str, feedback: Option<&str>) -> Result<String, String>;

    /// 按说明改写已有工具的源码，返回完整的新源码
    async fn update_code(&self, source: &str, instruction: &str) -> Result<String, String>;
}

/// 空答案：空白、`""` 或 `''`
pub fn is_empty_answer(answer: &str) -> bool {
    matches!(answer.trim(), "" | "\"\"" | "''")
}

/// 分解回复
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct DecompositionReply {
    /// 有序的子任务描述；不宜再分解时为空数组
    pub subtasks: Vec<String>,
}

/// 求解回复：tool_calls 非空时执行工具，否则 answer 为最终答案
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SolveReply {
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub answer: Option<String>,
}

/// 从 LLM 文本中提取 JSON：```json 代码块或最外层花括号
pub fn extract_json(output: &str) -> Option<&str> {
    let trimmed = output.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

/// 基于 LlmClient 的 Reasoner
pub struct LlmReasoner {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
    interpreter: String,
}

impl LlmReasoner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            system_prompt: prompts::SYSTEM_PROMPT.to_string(),
            interpreter: "sh".to_string(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: &str) -> Self {
        self.system_prompt = prompt.to_string();
        self
    }

    /// 生成工具时要求的脚本语言
    pub fn with_interpreter(mut self, interpreter: &str) -> Self {
        self.interpreter = interpreter.to_string();
        self
    }

    /// 获取 LLM 累计 token 使用统计
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    async fn ask(&self, prompt: String) -> Result<String, String> {
        tracing::debug!(prompt = %prompt, "reasoner prompt");
        let messages = vec![Message::system(self.system_prompt.clone()), Message::user(prompt)];
        let reply = self.llm.complete(&messages).await?;
        tracing::debug!(reply = %reply, "reasoner reply");
        Ok(reply)
    }
}

#[async_trait]
impl Reasoner for LlmReasoner {
    async fn decompose(&self, task: &str, context: &DecompositionContext) -> Result<Vec<String>, String> {
        let prompt = prompts::decomposition_prompt(
            task,
            &context.tool_names,
            &context.previous,
            &context.failed_plans,
            &reply_schema_json::<DecompositionReply>(),
        );
        let reply = self.ask(prompt).await?;
        let Some(json) = extract_json(&reply) else {
            tracing::warn!(reply = %reply, "decomposition reply has no JSON; treating as no decomposition");
            return Ok(Vec::new());
        };
        match serde_json::from_str::<DecompositionReply>(json) {
            Ok(parsed) => Ok(parsed.subtasks),
            Err(e) => {
                tracing::warn!(error = %e, reply = %json, "malformed decomposition reply; treating as no decomposition");
                Ok(Vec::new())
            }
        }
    }

    async fn choose_tools_and_solve(
        &self,
        task: &str,
        tools: &[ToolDefinition],
        context: &SolveContext,
    ) -> Result<SolveStep, String> {
        let prompt = prompts::task_prompt(
            task,
            tools,
            context.verbose_ids,
            &context.previous,
            &context.transcript,
            &reply_schema_json::<SolveReply>(),
        );
        let reply = self.ask(prompt).await?;
        let parsed = extract_json(&reply).and_then(|json| serde_json::from_str::<SolveReply>(json).ok());
        Ok(match parsed {
            Some(r) if !r.tool_calls.is_empty() => SolveStep::Calls(r.tool_calls),
            Some(r) => SolveStep::Answer(r.answer.unwrap_or_default()),
            // 不是 JSON 时整段视为答案
            None => SolveStep::Answer(reply.trim().to_string()),
        })
    }

    async fn aggregate(&self, task: &str, child_results: &[(String, String)]) -> Result<String, String> {
        let reply = self.ask(prompts::aggregate_prompt(task, child_results)).await?;
        Ok(reply.trim().to_string())
    }

    async fn paraphrase(&self, task: &str) -> Result<String, String> {
        let reply = self.ask(prompts::paraphrase_prompt(task)).await?;
        Ok(reply.trim().to_string())
    }

    async fn generate_code(&self, task: &str, feedback: Option<&str>) -> Result<String, String> {
        self.ask(prompts::tool_create_prompt(task, &self.interpreter, feedback))
            .await
    }

    async fn update_code(&self, source: &str, instruction: &str) -> Result<String, String> {
        self.ask(prompts::tool_update_prompt(source, instruction, &self.interpreter))
            .await
    }
}

/// 记录的一次 Reasoner 调用
#[derive(Debug, Clone, PartialEq)]
pub struct ReasonerCall {
    pub kind: &'static str,
    pub task: String,
    /// decompose 时为之前失败的计划数
    pub failed_plans: usize,
}

/// 测试替身：每种调用一个回复队列，队列为空时用保守的默认值
///
/// decompose 优先取按任务描述登记的回复。
/// 默认值：decompose 返回空；choose_tools_and_solve 在已有工具结果时以最后一个结果作答，
/// 否则返回空答案；aggregate 返回空；paraphrase 原样返回；generate_code / update_code 返回空源码。
#[derive(Debug, Default)]
pub struct ScriptedReasoner {
    decompositions: Mutex<VecDeque<Vec<String>>>,
    decompositions_for: Mutex<HashMap<String, VecDeque<Vec<String>>>>,
    solve_steps: Mutex<VecDeque<SolveStep>>,
    aggregations: Mutex<VecDeque<String>>,
    paraphrases: Mutex<VecDeque<String>>,
    code: Mutex<VecDeque<String>>,
    updates: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<ReasonerCall>>,
}

fn pop<T>(queue: &Mutex<VecDeque<T>>) -> Option<T> {
    queue.lock().ok().and_then(|mut q| q.pop_front())
}

fn push<T>(queue: &Mutex<VecDeque<T>>, item: T) {
    if let Ok(mut q) = queue.lock() {
        q.push_back(item);
    }
}

impl ScriptedReasoner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_decomposition(self, subtasks: &[&str]) -> Self {
        push(&self.decompositions, subtasks.iter().map(|s| s.to_string()).collect());
        self
    }

    /// 只在分解指定任务时使用的回复
    pub fn with_decomposition_for(self, task: &str, subtasks: &[&str]) -> Self {
        if let Ok(mut map) = self.decompositions_for.lock() {
            map.entry(task.to_string())
                .or_default()
                .push_back(subtasks.iter().map(|s| s.to_string()).collect());
        }
        self
    }

    pub fn with_calls(self, calls: Vec<ToolCall>) -> Self {
        push(&self.solve_steps, SolveStep::Calls(calls));
        self
    }

    pub fn with_answer(self, answer: &str) -> Self {
        push(&self.solve_steps, SolveStep::Answer(answer.to_string()));
        self
    }

    pub fn with_aggregation(self, answer: &str) -> Self {
        push(&self.aggregations, answer.to_string());
        self
    }

    pub fn with_paraphrase(self, task: &str) -> Self {
        push(&self.paraphrases, task.to_string());
        self
    }

    pub fn with_code(self, source: &str) -> Self {
        push(&self.code, source.to_string());
        self
    }

    pub fn with_update(self, source: &str) -> Self {
        push(&self.updates, source.to_string());
        self
    }

    pub fn calls(&self) -> Vec<ReasonerCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// 某类调用的次数（decompose / solve / aggregate / paraphrase / generate_code / update_code）
    pub fn count(&self, kind: &str) -> usize {
        self.calls().iter().filter(|c| c.kind == kind).count()
    }

    /// 某个任务被分解时看到的失败计划数，按调用顺序
    pub fn failed_plans_seen(&self, task: &str) -> Vec<usize> {
        self.calls()
            .iter()
            .filter(|c| c.kind == "decompose" && c.task == task)
            .map(|c| c.failed_plans)
            .collect()
    }

    fn record(&self, kind: &'static str, task: &str) {
        self.record_with(kind, task, 0);
    }

    fn record_with(&self, kind: &'static str, task: &str, failed_plans: usize) {
        if let Ok(mut c) = self.calls.lock() {
            c.push(ReasonerCall {
                kind,
                task: task.to_string(),
                failed_plans,
            });
        }
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    async fn decompose(&self, task: &str, context: &DecompositionContext) -> Result<Vec<String>, String> {
        self.record_with("decompose", task, context.failed_plans.len());
        let keyed = self
            .decompositions_for
            .lock()
            .ok()
            .and_then(|mut map| map.get_mut(task).and_then(VecDeque::pop_front));
        Ok(keyed
            .or_else(|| pop(&self.decompositions))
            .unwrap_or_default())
    }

    async fn choose_tools_and_solve(
        &self,
        task: &str,
        _tools: &[ToolDefinition],
        context: &SolveContext,
    ) -> Result<SolveStep, String> {
        self.record("solve", task);
        Ok(pop(&self.solve_steps).unwrap_or_else(|| {
            SolveStep::Answer(
                context
                    .transcript
                    .last()
                    .map(|e| e.output.clone())
                    .unwrap_or_default(),
            )
        }))
    }

    async fn aggregate(&self, task: &str, _child_results: &[(String, String)]) -> Result<String, String> {
        self.record("aggregate", task);
        Ok(pop(&self.aggregations).unwrap_or_default())
    }

    async fn paraphrase(&self, task: &str) -> Result<String, String> {
        self.record("paraphrase", task);
        Ok(pop(&self.paraphrases).unwrap_or_else(|| task.to_string()))
    }

    async fn generate_code(&self, task: &str, _feedback: Option<&str>) -> Result<String, String> {
        self.record("generate_code", task);
        Ok(pop(&self.code).unwrap_or_default())
    }

    async fn update_code(&self, _source: &str, instruction: &str) -> Result<String, String> {
        self.record("update_code", instruction);
        Ok(pop(&self.updates).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use serde_json::json;

    #[test]
    fn test_extract_json_variants() {
        assert_eq!(extract_json("```json\n{\"a\": 1}\n```"), Some("{\"a\": 1}"));
        assert_eq!(extract_json("sure: {\"a\": {\"b\": 2}} done"), Some("{\"a\": {\"b\": 2}}"));
        assert_eq!(extract_json("no json here"), None);
    }

    #[test]
    fn test_empty_answer_forms() {
        assert!(is_empty_answer("  "));
        assert!(is_empty_answer("\"\""));
        assert!(!is_empty_answer("7"));
    }

    #[tokio::test]
    async fn test_llm_reasoner_parses_replies() {
        let llm = Arc::new(MockLlmClient::new([
            r#"```json
{"subtasks": ["Add 2 and 5", "Multiply the result by 3"]}
```"#,
            r#"{"tool_calls": [{"name": "add", "arguments": {"a": 2, "b": 5}}]}"#,
            r#"{"answer": "7"}"#,
            "The answer is 21",
        ]));
        let reasoner = LlmReasoner::new(llm.clone());

        let subtasks = reasoner
            .decompose("(2+5)*3", &DecompositionContext::default())
            .await
            .unwrap();
        assert_eq!(subtasks.len(), 2);

        let ctx = SolveContext::default();
        let step = reasoner.choose_tools_and_solve("Add 2 and 5", &[], &ctx).await.unwrap();
        assert_eq!(step, SolveStep::Calls(vec![ToolCall::new("add", json!({"a": 2, "b": 5}))]));
        let step = reasoner.choose_tools_and_solve("Add 2 and 5", &[], &ctx).await.unwrap();
        assert_eq!(step, SolveStep::Answer("7".into()));

        let agg = reasoner.aggregate("(2+5)*3", &[]).await.unwrap();
        assert_eq!(agg, "The answer is 21");

        let sent = llm.received();
        assert_eq!(sent.len(), 4);
        assert!(sent[0][1].content.contains("\"subtasks\""));
        assert!(reasoner.paraphrase("x").await.is_err());
    }

    #[tokio::test]
    async fn test_malformed_decomposition_is_no_decomposition() {
        let llm = Arc::new(MockLlmClient::new([
            r#"{"steps": ["Add 2 and 5", "Multiply by 3"]}"#,
            "I would just add the numbers.",
            r#"{"subtasks": "not a list"}"#,
        ]));
        let reasoner = LlmReasoner::new(llm);
        let ctx = DecompositionContext::default();
        for _ in 0..3 {
            assert!(reasoner.decompose("(2+5)*3", &ctx).await.unwrap().is_empty());
        }
        assert!(reasoner.decompose("(2+5)*3", &ctx).await.is_err());
    }

    #[tokio::test]
    async fn test_scripted_defaults() {
        let r = ScriptedReasoner::new().with_decomposition(&["a", "b"]);
        let ctx = DecompositionContext::default();
        assert_eq!(r.decompose("t", &ctx).await.unwrap().len(), 2);
        assert!(r.decompose("t", &ctx).await.unwrap().is_empty());
        assert_eq!(r.paraphrase("same").await.unwrap(), "same");
        assert_eq!(r.count("decompose"), 2);
    }
}
