//! 任务树：以 arena 存放 TaskNode，节点之间的引用都是 TaskId
//!
//! 父节点通过 subtasks（按代分组）拥有子节点；predecessor / successor / supertask 只用于遍历与拼上下文。

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::tools::ToolId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub usize);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 节点的终态结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "lowercase")]
pub enum TaskResult {
    Solved(String),
    Failed(String),
}

impl TaskResult {
    pub fn is_failed(&self) -> bool {
        matches!(self, TaskResult::Failed(_))
    }

    pub fn is_solved(&self) -> bool {
        matches!(self, TaskResult::Solved(_))
    }
}

impl fmt::Display for TaskResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskResult::Solved(s) => f.write_str(s),
            TaskResult::Failed(s) => write!(f, "Error: {s}"),
        }
    }
}

/// 改写前的节点状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub description: String,
    pub tool_candidates: Vec<ToolId>,
    pub result: Option<TaskResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskNode {
    pub id: TaskId,
    pub description: String,
    pub predecessor: Option<TaskId>,
    pub successor: Option<TaskId>,
    pub supertask: Option<TaskId>,
    /// 每次分解产生一代子任务
    pub subtasks: Vec<Vec<TaskId>>,
    pub tool_candidates: Vec<ToolId>,
    pub paraphrased_variants: Vec<TaskSnapshot>,
    pub generated_tools: Vec<ToolId>,
    pub result: Option<TaskResult>,
}

impl TaskNode {
    fn new(id: TaskId, description: String, supertask: Option<TaskId>) -> Self {
        Self {
            id,
            description,
            predecessor: None,
            successor: None,
            supertask,
            subtasks: Vec::new(),
            tool_candidates: Vec::new(),
            paraphrased_variants: Vec::new(),
            generated_tools: Vec::new(),
            result: None,
        }
    }

    pub fn latest_generation(&self) -> Option<&[TaskId]> {
        self.subtasks.last().map(Vec::as_slice)
    }

    pub fn is_leaf(&self) -> bool {
        self.subtasks.is_empty()
    }
}

/// 任务树，TaskId(0) 为根
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTree {
    nodes: Vec<TaskNode>,
}

impl TaskTree {
    pub fn new(root_description: impl Into<String>) -> Self {
        Self {
            nodes: vec![TaskNode::new(TaskId(0), root_description.into(), None)],
        }
    }

    pub fn root(&self) -> TaskId {
        TaskId(0)
    }

    pub fn root_node(&self) -> &TaskNode {
        &self.nodes[0]
    }

    pub fn get(&self, id: TaskId) -> Option<&TaskNode> {
        self.nodes.get(id.0)
    }

    /// TaskId 只由本树产生，越界视为调用方错误
    pub fn node(&self, id: TaskId) -> &TaskNode {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: TaskId) -> &mut TaskNode {
        &mut self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[TaskNode] {
        &self.nodes
    }

    /// 为 parent 追加一代子任务：按顺序串成兄弟链，supertask 指向 parent
    pub fn add_generation(&mut self, parent: TaskId, descriptions: Vec<String>) -> Vec<TaskId> {
        let ids: Vec<TaskId> = descriptions
            .into_iter()
            .map(|d| {
                let id = TaskId(self.nodes.len());
                self.nodes.push(TaskNode::new(id, d, Some(parent)));
                id
            })
            .collect();
        for pair in ids.windows(2) {
            self.nodes[pair[0].0].successor = Some(pair[1]);
            self.nodes[pair[1].0].predecessor = Some(pair[0]);
        }
        self.nodes[parent.0].subtasks.push(ids.clone());
        ids
    }

    /// 前序任务，由近及远；没有兄弟前序时（可选）上溯到父任务继续找
    pub fn predecessors(&self, id: TaskId, include_higher_levels: bool) -> Vec<TaskId> {
        let mut out = Vec::new();
        let mut node = self.node(id);
        loop {
            match node.predecessor {
                Some(prev) => {
                    out.push(prev);
                    node = self.node(prev);
                }
                None => match node.supertask {
                    Some(parent) if include_higher_levels => node = self.node(parent),
                    _ => break,
                },
            }
        }
        out
    }

    /// 记录快照后替换描述
    pub fn paraphrase(&mut self, id: TaskId, new_description: impl Into<String>) {
        let node = self.node_mut(id);
        node.paraphrased_variants.push(TaskSnapshot {
            description: node.description.clone(),
            tool_candidates: node.tool_candidates.clone(),
            result: node.result.clone(),
        });
        node.description = new_description.into();
    }

    pub fn set_result(&mut self, id: TaskId, result: TaskResult) {
        self.node_mut(id).result = Some(result);
    }

    pub fn result(&self, id: TaskId) -> Option<&TaskResult> {
        self.node(id).result.as_ref()
    }

    /// 根的结果文本（失败时带 `Error: ` 前缀）
    pub fn answer(&self) -> Option<String> {
        self.root_node().result.as_ref().map(ToString::to_string)
    }

    pub fn depth(&self, id: TaskId) -> usize {
        let mut depth = 0;
        let mut node = self.node(id);
        while let Some(parent) = node.supertask {
            depth += 1;
            node = self.node(parent);
        }
        depth
    }

    /// 检查最新一代计划中的工具顺序提示
    ///
    /// 每个叶子必须恰好有一个候选工具；若该工具声明了 predecessor，
    /// 它必须等于前一个兄弟叶子的工具。`hint` 返回工具的 predecessor 提示。
    pub fn validate_tool_order(
        &self,
        id: TaskId,
        hint: &dyn Fn(&ToolId) -> Option<ToolId>,
    ) -> Result<bool, String> {
        let node = self.node(id);
        if let Some(generation) = node.latest_generation() {
            let mut valid = true;
            for child in generation {
                valid &= self.validate_tool_order(*child, hint)?;
            }
            return Ok(valid);
        }
        let [tool] = node.tool_candidates.as_slice() else {
            return Err(format!(
                "Number of tool candidates is {} instead of 1 for {}.",
                node.tool_candidates.len(),
                node.description
            ));
        };
        let Some(required) = hint(tool) else {
            return Ok(true);
        };
        let previous_tool = node
            .predecessor
            .and_then(|p| self.node(p).tool_candidates.first());
        Ok(previous_tool == Some(&required))
    }

    /// 缩进文本形式的树，供日志与命令行输出
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_node(self.root(), 0, &mut out);
        out
    }

    fn render_node(&self, id: TaskId, indent: usize, out: &mut String) {
        let node = self.node(id);
        let pad = "  ".repeat(indent);
        let result = node
            .result
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "(unresolved)".to_string());
        out.push_str(&format!("{pad}- {} => {}\n", node.description, result));
        if !node.tool_candidates.is_empty() {
            let tools: Vec<String> = node.tool_candidates.iter().map(ToString::to_string).collect();
            out.push_str(&format!("{pad}  tools: {}\n", tools.join(", ")));
        }
        for (n, generation) in node.subtasks.iter().enumerate() {
            out.push_str(&format!("{pad}  generation {}:\n", n + 1));
            for child in generation {
                self.render_node(*child, indent + 2, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_generation_links_siblings() {
        let mut tree = TaskTree::new("root");
        let ids = tree.add_generation(tree.root(), strings(&["a", "b", "c"]));
        assert_eq!(tree.node(ids[0]).successor, Some(ids[1]));
        assert_eq!(tree.node(ids[1]).predecessor, Some(ids[0]));
        assert_eq!(tree.node(ids[2]).successor, None);
        assert!(ids.iter().all(|i| tree.node(*i).supertask == Some(tree.root())));
        assert_eq!(tree.root_node().subtasks, vec![ids.clone()]);
        assert_eq!(tree.depth(ids[2]), 1);
    }

    #[test]
    fn test_predecessors_climb_to_higher_levels() {
        let mut tree = TaskTree::new("root");
        let top = tree.add_generation(tree.root(), strings(&["x", "y"]));
        let inner = tree.add_generation(top[1], strings(&["y1", "y2"]));
        assert_eq!(tree.predecessors(inner[1], true), vec![inner[0], top[0]]);
        assert_eq!(tree.predecessors(inner[1], false), vec![inner[0]]);
        assert!(tree.predecessors(tree.root(), true).is_empty());
    }

    #[test]
    fn test_paraphrase_snapshots_state() {
        let mut tree = TaskTree::new("sum things");
        let root = tree.root();
        tree.node_mut(root).tool_candidates = vec![ToolId::new("m", "add")];
        tree.paraphrase(root, "add numbers");
        let node = tree.node(root);
        assert_eq!(node.description, "add numbers");
        assert_eq!(node.paraphrased_variants.len(), 1);
        assert_eq!(node.paraphrased_variants[0].description, "sum things");
        assert_eq!(node.paraphrased_variants[0].tool_candidates, vec![ToolId::new("m", "add")]);
    }

    #[test]
    fn test_result_rendering() {
        assert_eq!(TaskResult::Failed("boom".into()).to_string(), "Error: boom");
        assert_eq!(TaskResult::Solved("7".into()).to_string(), "7");
    }

    #[test]
    fn test_validate_tool_order() {
        let mut tree = TaskTree::new("root");
        let ids = tree.add_generation(tree.root(), strings(&["open", "use"]));
        tree.node_mut(ids[0]).tool_candidates = vec![ToolId::new("m", "open")];
        tree.node_mut(ids[1]).tool_candidates = vec![ToolId::new("m", "use")];
        let hint = |t: &ToolId| (t.name == "use").then(|| ToolId::new("m", "open"));
        assert_eq!(tree.validate_tool_order(tree.root(), &hint), Ok(true));

        let wrong = |t: &ToolId| (t.name == "use").then(|| ToolId::new("m", "close"));
        assert_eq!(tree.validate_tool_order(tree.root(), &wrong), Ok(false));

        tree.node_mut(ids[1]).tool_candidates.clear();
        assert!(tree.validate_tool_order(tree.root(), &hint).is_err());
    }

    #[test]
    fn test_tree_serializes() {
        let mut tree = TaskTree::new("root");
        tree.add_generation(tree.root(), strings(&["a", "b"]));
        tree.set_result(tree.root(), TaskResult::Solved("ok".into()));
        let json = serde_json::to_value(&tree).unwrap();
        assert_eq!(json["nodes"][0]["result"]["status"], "solved");
        let back: TaskTree = serde_json::from_value(json).unwrap();
        assert_eq!(back, tree);
        assert!(tree.render().contains("- root => ok"));
    }
}
