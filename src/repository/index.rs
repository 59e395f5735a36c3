//! 嵌入索引：按工具 id 存向量，暴力最近邻
//!
//! 排序按距离升序，距离相同按 id 排序，结果确定。

use std::collections::BTreeMap;

use crate::core::RepositoryError;
use crate::tools::ToolId;

/// 距离度量
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DistanceMetric {
    /// 欧氏距离的平方
    #[default]
    SquaredL2,
    /// 1 - cos
    Cosine,
}

impl DistanceMetric {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "squared_l2" | "l2" => Some(DistanceMetric::SquaredL2),
            "cosine" | "cos" => Some(DistanceMetric::Cosine),
            _ => None,
        }
    }

    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::SquaredL2 => a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum(),
            DistanceMetric::Cosine => {
                let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
                let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
                let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
                if norm_a == 0.0 || norm_b == 0.0 {
                    1.0
                } else {
                    1.0 - dot / (norm_a * norm_b)
                }
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EmbeddingIndex {
    metric: DistanceMetric,
    entries: BTreeMap<ToolId, Vec<f32>>,
}

impl EmbeddingIndex {
    pub fn new(metric: DistanceMetric) -> Self {
        Self {
            metric,
            entries: BTreeMap::new(),
        }
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// 当前向量维度（空索引为 None）
    pub fn dimensions(&self) -> Option<usize> {
        self.entries.values().next().map(Vec::len)
    }

    /// 检查向量维度是否与已有条目一致
    pub fn check_dimensions(&self, vector: &[f32]) -> Result<(), RepositoryError> {
        if vector.is_empty() {
            return Err(RepositoryError::Embedding("empty embedding vector".to_string()));
        }
        match self.dimensions() {
            Some(d) if d != vector.len() => Err(RepositoryError::Embedding(format!(
                "dimension mismatch: index has {d}, got {}",
                vector.len()
            ))),
            _ => Ok(()),
        }
    }

    pub fn insert(&mut self, id: ToolId, vector: Vec<f32>) -> Option<Vec<f32>> {
        self.entries.insert(id, vector)
    }

    pub fn remove(&mut self, id: &ToolId) -> Option<Vec<f32>> {
        self.entries.remove(id)
    }

    pub fn get(&self, id: &ToolId) -> Option<&[f32]> {
        self.entries.get(id).map(Vec::as_slice)
    }

    pub fn contains(&self, id: &ToolId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &ToolId> {
        self.entries.keys()
    }

    /// 全量排序：(id, 距离)，距离升序
    pub fn rank(&self, query: &[f32]) -> Result<Vec<(ToolId, f32)>, RepositoryError> {
        if !self.is_empty() {
            self.check_dimensions(query)?;
        }
        let mut ranked: Vec<(ToolId, f32)> = self
            .entries
            .iter()
            .map(|(id, v)| (id.clone(), self.metric.distance(query, v)))
            .collect();
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        Ok(ranked)
    }
}

/// 前 top_k 个，且在第一个距离 ≥ threshold 处截断
pub fn cutoff(ranked: Vec<(ToolId, f32)>, top_k: usize, threshold: Option<f32>) -> Vec<(ToolId, f32)> {
    ranked
        .into_iter()
        .take(top_k)
        .take_while(|(_, d)| threshold.map_or(true, |t| *d < t))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> ToolId {
        ToolId::new("t", name)
    }

    fn index() -> EmbeddingIndex {
        let mut idx = EmbeddingIndex::default();
        idx.insert(id("a"), vec![1.0, 0.0]);
        idx.insert(id("b"), vec![0.0, 1.0]);
        idx.insert(id("c"), vec![0.6, 0.8]);
        idx
    }

    #[test]
    fn test_rank_ascending_distance() {
        let ranked = index().rank(&[1.0, 0.0]).unwrap();
        let names: Vec<_> = ranked.iter().map(|(i, _)| i.name.as_str()).collect();
        assert_eq!(names, ["a", "c", "b"]);
        assert_eq!(ranked[0].1, 0.0);
        assert!((ranked[2].1 - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_ties_broken_by_id() {
        let mut idx = EmbeddingIndex::default();
        idx.insert(id("z"), vec![1.0, 0.0]);
        idx.insert(id("m"), vec![1.0, 0.0]);
        let ranked = idx.rank(&[1.0, 0.0]).unwrap();
        assert_eq!(ranked[0].0.name, "m");
    }

    #[test]
    fn test_cutoff_is_prefix() {
        let ranked = index().rank(&[1.0, 0.0]).unwrap();
        for top_k in 0..5 {
            for threshold in [None, Some(0.0), Some(0.5), Some(1.0), Some(3.0)] {
                let cut = cutoff(ranked.clone(), top_k, threshold);
                assert!(cut.len() <= top_k);
                assert_eq!(cut[..], ranked[..cut.len()]);
                if let Some(t) = threshold {
                    assert!(cut.iter().all(|(_, d)| *d < t));
                    if cut.len() < top_k.min(ranked.len()) {
                        assert!(ranked[cut.len()].1 >= t);
                    }
                }
            }
        }
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let idx = index();
        assert!(idx.check_dimensions(&[1.0, 2.0, 3.0]).is_err());
        assert!(idx.rank(&[1.0]).is_err());
        assert!(idx.check_dimensions(&[]).is_err());
    }

    #[test]
    fn test_cosine_metric() {
        let d = DistanceMetric::Cosine.distance(&[1.0, 0.0], &[2.0, 0.0]);
        assert!(d.abs() < 1e-6);
        assert_eq!(DistanceMetric::parse("l2"), Some(DistanceMetric::SquaredL2));
    }
}
