//! 工具库持久化（SQLite）
//!
//! 每个工具一行：身份、描述、参数 JSON、来源、超时、顺序提示，以及嵌入向量（小端 f32 BLOB）
//! 与生成它的嵌入模型标识。重新加载时，嵌入键与模型都未变的记录直接复用向量。
//! 主键是 (namespace, name)；顺序提示存为 ToolId 的 JSON，不经过拼接后的名称。

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

use crate::core::RepositoryError;
use crate::tools::{ToolDefinition, ToolId, ToolOrigin, ToolSchema};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tools (
    namespace       TEXT NOT NULL,
    name            TEXT NOT NULL,
    description     TEXT NOT NULL,
    parameters      TEXT NOT NULL,
    origin          TEXT NOT NULL,
    source_path     TEXT,
    timeout_ms      INTEGER,
    timeout_message TEXT,
    predecessor     TEXT,
    successor       TEXT,
    embedding_model TEXT NOT NULL,
    embedding       BLOB NOT NULL,
    updated_at      TEXT NOT NULL,
    PRIMARY KEY (namespace, name)
);
";

/// 持久化的一条工具记录
#[derive(Debug, Clone, PartialEq)]
pub struct StoredTool {
    pub definition: ToolDefinition,
    pub embedding_model: String,
    pub embedding: Vec<f32>,
    pub updated_at: DateTime<Utc>,
}

impl StoredTool {
    pub fn new(definition: ToolDefinition, embedding_model: &str, embedding: Vec<f32>) -> Self {
        Self {
            definition,
            embedding_model: embedding_model.to_string(),
            embedding,
            updated_at: Utc::now(),
        }
    }

    /// 记录中的向量能否用于给定定义与模型
    pub fn reusable_for(&self, definition: &ToolDefinition, model: &str) -> bool {
        self.embedding_model == model
            && !self.embedding.is_empty()
            && self.definition.embedding_text() == definition.embedding_text()
    }
}

/// SQLite 工具表；无路径时使用内存库
pub struct ToolStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for ToolStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolStore").field("path", &self.path).finish()
    }
}

fn encode_embedding(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn encode_hint(id: Option<&ToolId>) -> rusqlite::Result<Option<String>> {
    id.map(serde_json::to_string)
        .transpose()
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn decode_hint(column: usize, text: Option<String>) -> rusqlite::Result<Option<ToolId>> {
    text.map(|t| serde_json::from_str(&t))
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}

fn lock_err<T>(_: T) -> RepositoryError {
    RepositoryError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        "tool store lock poisoned",
    ))
}

impl ToolStore {
    pub fn open(path: Option<&Path>) -> Result<Self, RepositoryError> {
        let conn = match path {
            Some(p) => {
                if let Some(parent) = p.parent().filter(|d| !d.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                Connection::open(p)?
            }
            None => Connection::open_in_memory()?,
        };
        conn.execute_batch(SCHEMA)?;
        tracing::debug!(path = ?path, "tool store opened");
        Ok(Self {
            conn: Mutex::new(conn),
            path: path.map(Path::to_path_buf),
        })
    }

    pub fn in_memory() -> Result<Self, RepositoryError> {
        Self::open(None)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// 在一个事务中写入多条记录（存在则覆盖）
    pub fn upsert_all(&self, records: &[StoredTool]) -> Result<(), RepositoryError> {
        let mut conn = self.conn.lock().map_err(lock_err)?;
        let tx = conn.transaction()?;
        for record in records {
            let def = &record.definition;
            let parameters = serde_json::to_string(&def.schema)
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
            let source_path = match &def.origin {
                ToolOrigin::Script { path } => Some(path.to_string_lossy().into_owned()),
                ToolOrigin::Native => None,
            };
            tx.execute(
                "INSERT OR REPLACE INTO tools (namespace, name, description, parameters, origin, \
                 source_path, timeout_ms, timeout_message, predecessor, successor, embedding_model, \
                 embedding, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    def.id.namespace,
                    def.id.name,
                    def.description,
                    parameters,
                    def.origin.kind(),
                    source_path,
                    def.timeout.map(|t| t.as_millis() as i64),
                    def.timeout_message,
                    encode_hint(def.predecessor.as_ref())?,
                    encode_hint(def.successor.as_ref())?,
                    record.embedding_model,
                    encode_embedding(&record.embedding),
                    record.updated_at,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn upsert(&self, record: &StoredTool) -> Result<(), RepositoryError> {
        self.upsert_all(std::slice::from_ref(record))
    }

    /// 删除一条记录；返回是否存在
    pub fn delete(&self, id: &ToolId) -> Result<bool, RepositoryError> {
        let conn = self.conn.lock().map_err(lock_err)?;
        let n = conn.execute(
            "DELETE FROM tools WHERE namespace = ?1 AND name = ?2",
            params![id.namespace, id.name],
        )?;
        Ok(n > 0)
    }

    pub fn get(&self, id: &ToolId) -> Result<Option<StoredTool>, RepositoryError> {
        let conn = self.conn.lock().map_err(lock_err)?;
        let record = conn
            .query_row(
                &format!("{SELECT} WHERE namespace = ?1 AND name = ?2"),
                params![id.namespace, id.name],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    pub fn load_all(&self) -> Result<Vec<StoredTool>, RepositoryError> {
        let conn = self.conn.lock().map_err(lock_err)?;
        let mut stmt = conn.prepare(&format!("{SELECT} ORDER BY namespace, name"))?;
        let rows = stmt.query_map([], row_to_record)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn count(&self) -> Result<usize, RepositoryError> {
        let conn = self.conn.lock().map_err(lock_err)?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM tools", [], |r| r.get(0))?;
        Ok(n as usize)
    }
}

const SELECT: &str = "SELECT namespace, name, description, parameters, origin, source_path, timeout_ms, \
                      timeout_message, predecessor, successor, embedding_model, embedding, updated_at FROM tools";

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredTool> {
    let parameters: String = row.get(3)?;
    let schema: ToolSchema = serde_json::from_str(&parameters)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;
    let origin_kind: String = row.get(4)?;
    let source_path: Option<String> = row.get(5)?;
    let origin = match (origin_kind.as_str(), source_path) {
        ("script", Some(path)) => ToolOrigin::Script {
            path: PathBuf::from(path),
        },
        _ => ToolOrigin::Native,
    };
    let timeout_ms: Option<i64> = row.get(6)?;
    let predecessor = decode_hint(8, row.get(8)?)?;
    let successor = decode_hint(9, row.get(9)?)?;
    let blob: Vec<u8> = row.get(11)?;

    Ok(StoredTool {
        definition: ToolDefinition {
            id: ToolId::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?),
            description: row.get(2)?,
            schema,
            timeout: timeout_ms.map(|ms| Duration::from_millis(ms.max(0) as u64)),
            timeout_message: row.get(7)?,
            predecessor,
            successor,
            origin,
        },
        embedding_model: row.get(10)?,
        embedding: decode_embedding(&blob),
        updated_at: row.get(12)?,
    })
}
