//! 工具执行器
//!
//! run(jobs) 为每个合法调用 spawn 一个 tokio 任务并行执行，按提交顺序返回结果：
//! 参数不合法时不调用工具（InvalidArguments）；单个工具超时（TimeoutExceeded）只中止它自己；
//! 工具返回 Err 记为 ExecutionFailed，任务 panic 记为 ExecutionPanic。执行器从不自动重试。
//! 每次调用输出结构化审计日志（JSON）。
//!
//! 工具的 execute 必须是真正的异步实现（不能阻塞线程），否则超时无法生效。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::core::ToolError;
use crate::tools::{RegisteredTool, ToolId};

/// 未配置超时提示时使用的默认消息
pub const DEFAULT_TIMEOUT_MESSAGE: &str =
    "The tool did not return a response within the specified timeout.";

/// 一次待执行的工具调用
#[derive(Debug, Clone)]
pub struct Job {
    pub call_id: String,
    pub tool: Arc<RegisteredTool>,
    pub parameters: Value,
}

impl Job {
    pub fn new(call_id: impl Into<String>, tool: Arc<RegisteredTool>, parameters: Value) -> Self {
        Self {
            call_id: call_id.into(),
            tool,
            parameters,
        }
    }
}

/// 一次调用的结果：值与错误恰好二选一
#[derive(Debug, Clone, PartialEq)]
pub struct JobResult {
    pub call_id: String,
    pub tool_id: ToolId,
    pub outcome: Result<String, ToolError>,
}

impl JobResult {
    pub fn value(&self) -> Option<&str> {
        self.outcome.as_ref().ok().map(String::as_str)
    }

    pub fn error(&self) -> Option<&ToolError> {
        self.outcome.as_ref().err()
    }

    /// 交给 Reasoner 的文本：成功为值，失败为 `Error: ...`
    pub fn to_feedback(&self) -> String {
        match &self.outcome {
            Ok(v) => v.clone(),
            Err(e) => e.to_feedback(),
        }
    }
}

enum Slot {
    Ready(JobResult),
    Pending {
        call_id: String,
        tool_id: ToolId,
        handle: JoinHandle<Result<String, ToolError>>,
    },
}

/// 工具执行器：可选的并发上限，默认每个调用一个 worker
#[derive(Debug, Clone, Default)]
pub struct ToolExecutor {
    max_concurrency: Option<usize>,
}

impl ToolExecutor {
    pub fn new(max_concurrency: Option<usize>) -> Self {
        Self {
            max_concurrency: max_concurrency.filter(|n| *n > 0),
        }
    }

    pub fn max_concurrency(&self) -> Option<usize> {
        self.max_concurrency
    }

    /// 并行执行一批调用，阻塞直到每个调用返回、失败或超时；结果顺序与提交顺序一致
    pub async fn run(&self, jobs: Vec<Job>) -> Vec<JobResult> {
        if jobs.is_empty() {
            return Vec::new();
        }
        let semaphore = self.max_concurrency.map(|n| Arc::new(Semaphore::new(n)));

        let slots: Vec<Slot> = jobs
            .into_iter()
            .map(|job| {
                let tool_id = job.tool.id().clone();
                if let Err(reason) = job.tool.validate_arguments(&job.parameters) {
                    let err = ToolError::InvalidArguments {
                        tool: tool_id.to_string(),
                        reason,
                    };
                    audit(&tool_id, err.outcome(), Duration::ZERO, &job.parameters);
                    return Slot::Ready(JobResult {
                        call_id: job.call_id,
                        tool_id,
                        outcome: Err(err),
                    });
                }
                let call_id = job.call_id.clone();
                let handle = tokio::spawn(run_job(job, semaphore.clone()));
                Slot::Pending {
                    call_id,
                    tool_id,
                    handle,
                }
            })
            .collect();

        let mut results = Vec::with_capacity(slots.len());
        for slot in slots {
            match slot {
                Slot::Ready(result) => results.push(result),
                Slot::Pending {
                    call_id,
                    tool_id,
                    handle,
                } => {
                    let outcome = match handle.await {
                        Ok(outcome) => outcome,
                        Err(join_err) => {
                            let reason = if join_err.is_panic() {
                                panic_message(join_err.into_panic())
                            } else {
                                "task cancelled".to_string()
                            };
                            tracing::error!(tool = %tool_id, reason = %reason, "tool task died");
                            Err(ToolError::ExecutionPanic {
                                tool: tool_id.to_string(),
                                reason,
                            })
                        }
                    };
                    results.push(JobResult {
                        call_id,
                        tool_id,
                        outcome,
                    });
                }
            }
        }
        results
    }

    /// 执行单个调用
    pub async fn run_one(&self, job: Job) -> JobResult {
        let mut results = self.run(vec![job]).await;
        results.remove(0)
    }
}

async fn run_job(job: Job, semaphore: Option<Arc<Semaphore>>) -> Result<String, ToolError> {
    // 超时只计算真正执行的时间，不含排队
    let _permit = match semaphore {
        Some(sem) => sem.acquire_owned().await.ok(),
        None => None,
    };
    let definition = &job.tool.definition;
    let tool_name = definition.id.to_string();
    let start = Instant::now();
    let call = job.tool.handler.execute(job.parameters.clone());

    let outcome = match definition.timeout {
        Some(limit) => match timeout(limit, call).await {
            Ok(result) => result.map_err(|reason| ToolError::ExecutionFailed {
                tool: tool_name.clone(),
                reason,
            }),
            Err(_) => Err(ToolError::TimeoutExceeded {
                tool: tool_name.clone(),
                timeout: limit,
                message: definition
                    .timeout_message
                    .clone()
                    .unwrap_or_else(|| DEFAULT_TIMEOUT_MESSAGE.to_string()),
            }),
        },
        None => call.await.map_err(|reason| ToolError::ExecutionFailed {
            tool: tool_name.clone(),
            reason,
        }),
    };

    let label = match &outcome {
        Ok(_) => "ok",
        Err(e) => e.outcome(),
    };
    audit(&definition.id, label, start.elapsed(), &job.parameters);
    outcome
}

fn audit(tool: &ToolId, outcome: &str, elapsed: Duration, args: &Value) {
    let audit = serde_json::json!({
        "event": "tool_audit",
        "tool": tool.to_string(),
        "ok": outcome == "ok",
        "outcome": outcome,
        "duration_ms": elapsed.as_millis() as u64,
        "args_preview": args_preview(args),
    });
    tracing::info!(audit = %audit.to_string(), "tool");
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
