//! 依赖图构建和拓扑排序
//!
//! 分析 Pass 之间的资源依赖关系，构建 DAG 并进行拓扑排序。
//! 使用 petgraph 提供图算法实现。

use petgraph::Direction;
use petgraph::algo::{has_path_connecting, tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use slotmap::SecondaryMap;

use crate::handles::{RgBufferHandle, RgImageHandle};

/// 依赖边数据：资源依赖信息
#[derive(Clone, Debug, Default)]
pub struct EdgeData {
    pub images: Vec<RgImageHandle>,
    pub buffers: Vec<RgBufferHandle>,
    /// 通过 `add_dependency` 显式声明
    pub explicit: bool,
}

/// 每个 Pass 声明的资源访问（按添加顺序）
#[derive(Default)]
pub struct PassAccesses<'a> {
    pub image_reads: &'a [Vec<RgImageHandle>],
    pub image_writes: &'a [Vec<RgImageHandle>],
    pub buffer_reads: &'a [Vec<RgBufferHandle>],
    pub buffer_writes: &'a [Vec<RgBufferHandle>],
    /// pass_index -> 必须先于它执行的 pass
    pub explicit_deps: &'a [Vec<usize>],
}

/// 依赖图
///
/// 节点存储 pass 索引，边从生产者指向消费者。
pub struct DependencyGraph {
    graph: DiGraph<usize, EdgeData>,
    node_indices: Vec<NodeIndex>,
}

/// 单个资源的访问历史
struct AccessHistory<K: slotmap::Key> {
    last_writer: SecondaryMap<K, usize>,
    readers_since_write: SecondaryMap<K, Vec<usize>>,
}

impl<K: slotmap::Key> AccessHistory<K> {
    fn new() -> Self {
        Self {
            last_writer: SecondaryMap::new(),
            readers_since_write: SecondaryMap::new(),
        }
    }

    /// 返回需要依赖的 pass
    fn read(&mut self, key: K, pass_idx: usize) -> Option<usize> {
        match self.readers_since_write.get_mut(key) {
            Some(readers) => readers.push(pass_idx),
            None => {
                self.readers_since_write.insert(key, vec![pass_idx]);
            }
        }
        self.last_writer.get(key).copied().filter(|&w| w != pass_idx)
    }

    /// 返回 WAW 的前一个写入者，以及 WAR 的所有读者
    fn write(&mut self, key: K, pass_idx: usize) -> Vec<usize> {
        let mut deps = Vec::new();
        if let Some(&prev_writer) = self.last_writer.get(key)
            && prev_writer != pass_idx
        {
            deps.push(prev_writer);
        }
        if let Some(readers) = self.readers_since_write.remove(key) {
            deps.extend(readers.into_iter().filter(|&r| r != pass_idx));
        }
        self.last_writer.insert(key, pass_idx);
        deps
    }
}

impl DependencyGraph {
    /// 分析资源依赖，构建依赖图
    ///
    /// 规则（按 Pass 的添加顺序）：
    /// - 写后读（RAW）：reader 依赖之前的 writer
    /// - 写后写（WAW）：后一个 writer 依赖前一个 writer
    /// - 读后写（WAR）：writer 依赖上次写入之后的所有 reader
    /// - 显式依赖按声明添加
    pub fn analyze(pass_count: usize, accesses: &PassAccesses) -> Self {
        let mut graph = {
            let mut graph = DiGraph::with_capacity(pass_count, pass_count * 2);
            let node_indices: Vec<NodeIndex> = (0..pass_count).map(|i| graph.add_node(i)).collect();
            Self { graph, node_indices }
        };

        let mut images = AccessHistory::<RgImageHandle>::new();
        let mut buffers = AccessHistory::<RgBufferHandle>::new();

        for pass_idx in 0..pass_count {
            for &img in accesses.image_reads.get(pass_idx).into_iter().flatten() {
                if let Some(writer) = images.read(img, pass_idx) {
                    graph.add_edge(writer, pass_idx, vec![img], vec![]);
                }
            }
            for &img in accesses.image_writes.get(pass_idx).into_iter().flatten() {
                for dep in images.write(img, pass_idx) {
                    graph.add_edge(dep, pass_idx, vec![img], vec![]);
                }
            }

            for &buf in accesses.buffer_reads.get(pass_idx).into_iter().flatten() {
                if let Some(writer) = buffers.read(buf, pass_idx) {
                    graph.add_edge(writer, pass_idx, vec![], vec![buf]);
                }
            }
            for &buf in accesses.buffer_writes.get(pass_idx).into_iter().flatten() {
                for dep in buffers.write(buf, pass_idx) {
                    graph.add_edge(dep, pass_idx, vec![], vec![buf]);
                }
            }

            for &dep in accesses.explicit_deps.get(pass_idx).into_iter().flatten() {
                graph.add_explicit_edge(dep, pass_idx);
            }
        }

        graph
    }

    /// 添加依赖边，已存在的边合并资源列表
    pub fn add_edge(
        &mut self,
        producer: usize,
        consumer: usize,
        images: Vec<RgImageHandle>,
        buffers: Vec<RgBufferHandle>,
    ) {
        let producer_node = self.node_indices[producer];
        let consumer_node = self.node_indices[consumer];

        match self.graph.find_edge(producer_node, consumer_node) {
            Some(edge_idx) => {
                let edge_data = &mut self.graph[edge_idx];
                for img in images {
                    if !edge_data.images.contains(&img) {
                        edge_data.images.push(img);
                    }
                }
                for buf in buffers {
                    if !edge_data.buffers.contains(&buf) {
                        edge_data.buffers.push(buf);
                    }
                }
            }
            None => {
                self.graph.add_edge(
                    producer_node,
                    consumer_node,
                    EdgeData {
                        images,
                        buffers,
                        explicit: false,
                    },
                );
            }
        }
    }

    pub fn add_explicit_edge(&mut self, producer: usize, consumer: usize) {
        self.add_edge(producer, consumer, vec![], vec![]);
        let edge_idx = self.graph.find_edge(self.node_indices[producer], self.node_indices[consumer]);
        if let Some(edge_idx) = edge_idx {
            self.graph[edge_idx].explicit = true;
        }
    }

    /// 执行拓扑排序
    ///
    /// # 返回
    /// - `Ok(order)`: 拓扑排序后的 Pass 索引列表
    /// - `Err(cycle)`: 检测到循环依赖，返回所有处于环中的 Pass 索引
    pub fn topological_sort(&self) -> Result<Vec<usize>, Vec<usize>> {
        match toposort(&self.graph, None) {
            Ok(sorted_nodes) => Ok(sorted_nodes.into_iter().map(|n| self.graph[n]).collect()),
            Err(_) => {
                let mut in_cycle: Vec<usize> = tarjan_scc(&self.graph)
                    .into_iter()
                    .filter(|scc| scc.len() > 1 || self.graph.contains_edge(scc[0], scc[0]))
                    .flatten()
                    .map(|n| self.graph[n])
                    .collect();
                in_cycle.sort_unstable();
                Err(in_cycle)
            }
        }
    }

    /// 获取 Pass 的直接依赖（前驱）
    pub fn get_predecessors(&self, pass_index: usize) -> Vec<usize> {
        let node = self.node_indices[pass_index];
        self.graph.neighbors_directed(node, Direction::Incoming).map(|n| self.graph[n]).collect()
    }

    /// 获取 Pass 的直接后继
    pub fn get_successors(&self, pass_index: usize) -> Vec<usize> {
        let node = self.node_indices[pass_index];
        self.graph.neighbors_directed(node, Direction::Outgoing).map(|n| self.graph[n]).collect()
    }

    /// 没有后继的 Pass
    pub fn sinks(&self) -> Vec<usize> {
        (0..self.node_indices.len()).filter(|&i| self.get_successors(i).is_empty()).collect()
    }

    /// `from` 的结果是否（间接）流向 `to`
    pub fn reaches(&self, from: usize, to: usize) -> bool {
        has_path_connecting(&self.graph, self.node_indices[from], self.node_indices[to], None)
    }

    /// 所有边：(producer, consumer, data)
    pub fn edges(&self) -> impl Iterator<Item = (usize, usize, &EdgeData)> {
        self.graph
            .edge_references()
            .map(|e| (self.graph[e.source()], self.graph[e.target()], e.weight()))
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}

#[cfg(test)]
mod tests {
    use slotmap::SlotMap;

    use super::*;

    fn create_test_image_handles(count: usize) -> (SlotMap<RgImageHandle, ()>, Vec<RgImageHandle>) {
        let mut sm = SlotMap::with_key();
        let handles: Vec<RgImageHandle> = (0..count).map(|_| sm.insert(())).collect();
        (sm, handles)
    }

    #[test]
    fn test_simple_dependency() {
        // Pass 0 写入 image 0
        // Pass 1 读取 image 0
        let (_sm, handles) = create_test_image_handles(1);
        let img0 = handles[0];

        let image_reads = vec![vec![], vec![img0]];
        let image_writes = vec![vec![img0], vec![]];
        let accesses = PassAccesses {
            image_reads: &image_reads,
            image_writes: &image_writes,
            ..Default::default()
        };

        let graph = DependencyGraph::analyze(2, &accesses);
        assert_eq!(graph.topological_sort().unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_parallel_passes() {
        // Pass 0 写入 image 0
        // Pass 1 写入 image 1（无依赖，可并行）
        // Pass 2 读取 image 0 和 image 1
        let (_sm, handles) = create_test_image_handles(2);
        let (img0, img1) = (handles[0], handles[1]);

        let image_reads = vec![vec![], vec![], vec![img0, img1]];
        let image_writes = vec![vec![img0], vec![img1], vec![]];
        let accesses = PassAccesses {
            image_reads: &image_reads,
            image_writes: &image_writes,
            ..Default::default()
        };

        let graph = DependencyGraph::analyze(3, &accesses);
        let order = graph.topological_sort().unwrap();
        assert!(order[0] == 0 || order[0] == 1);
        assert!(order[1] == 0 || order[1] == 1);
        assert_eq!(order[2], 2);
        assert_eq!(graph.sinks(), vec![2]);
    }

    #[test]
    fn test_write_after_read() {
        // Pass 0 读取 image 0（外部内容）
        // Pass 1 读取 image 0
        // Pass 2 覆盖 image 0，必须等两个 reader 结束
        let (_sm, handles) = create_test_image_handles(1);
        let img0 = handles[0];

        let image_reads = vec![vec![img0], vec![img0], vec![]];
        let image_writes = vec![vec![], vec![], vec![img0]];
        let accesses = PassAccesses {
            image_reads: &image_reads,
            image_writes: &image_writes,
            ..Default::default()
        };

        let graph = DependencyGraph::analyze(3, &accesses);
        let mut preds = graph.get_predecessors(2);
        preds.sort_unstable();
        assert_eq!(preds, vec![0, 1]);
        assert!(graph.get_predecessors(1).is_empty());
    }

    #[test]
    fn test_read_write_same_pass_has_no_self_edge() {
        let (_sm, handles) = create_test_image_handles(1);
        let img0 = handles[0];

        let image_reads = vec![vec![], vec![img0]];
        let image_writes = vec![vec![img0], vec![img0]];
        let accesses = PassAccesses {
            image_reads: &image_reads,
            image_writes: &image_writes,
            ..Default::default()
        };

        let graph = DependencyGraph::analyze(2, &accesses);
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.topological_sort().unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_explicit_edge_creates_cycle() {
        // Pass 0 -> Pass 1（资源），再显式声明 Pass 0 依赖 Pass 1
        let (_sm, handles) = create_test_image_handles(1);
        let img0 = handles[0];

        let image_reads = vec![vec![], vec![img0]];
        let image_writes = vec![vec![img0], vec![]];
        let explicit_deps = vec![vec![1], vec![]];
        let accesses = PassAccesses {
            image_reads: &image_reads,
            image_writes: &image_writes,
            explicit_deps: &explicit_deps,
            ..Default::default()
        };

        let graph = DependencyGraph::analyze(2, &accesses);
        assert_eq!(graph.topological_sort().unwrap_err(), vec![0, 1]);
    }

    #[test]
    fn test_explicit_edge_orders_independent_passes() {
        let explicit_deps = vec![vec![1], vec![]];
        let accesses = PassAccesses {
            explicit_deps: &explicit_deps,
            ..Default::default()
        };

        let graph = DependencyGraph::analyze(2, &accesses);
        assert_eq!(graph.topological_sort().unwrap(), vec![1, 0]);
        assert!(graph.edges().all(|(_, _, e)| e.explicit));
        assert!(graph.reaches(1, 0));
        assert!(!graph.reaches(0, 1));
    }
}
