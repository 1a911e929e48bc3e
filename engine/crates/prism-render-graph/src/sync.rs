//! 跨 queue 同步推导
//!
//! 对依赖图中每条跨 queue 的边：消费者等待生产者的 "<pass>-done" semaphore，
//! 等待的 stage 是消费者第一次使用共享资源的 stage。同一个 queue 上的依赖只需要 barrier。

use ash::vk;

use crate::graph::DependencyGraph;
use crate::pass::RgPassNode;

/// 等待另一个 Pass 的完成信号
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RgPassWait {
    pub producer: usize,
    pub stage: vk::PipelineStageFlags2,
}

/// 一个 Pass 提交时的同步信息
#[derive(Clone, Debug, Default)]
pub struct PassSync {
    pub waits: Vec<RgPassWait>,
    /// 是否有其他 queue 上的 Pass 等待它
    pub signal: bool,
}

pub struct SyncCalculator;

impl SyncCalculator {
    pub fn compute(passes: &[RgPassNode<'_>], dep_graph: &DependencyGraph) -> Vec<PassSync> {
        let mut syncs = vec![PassSync::default(); passes.len()];

        for (producer, consumer, edge) in dep_graph.edges() {
            if passes[producer].queue == passes[consumer].queue {
                continue;
            }

            let consumer_node = &passes[consumer];
            let mut stage = vk::PipelineStageFlags2::empty();
            if edge.explicit {
                stage = vk::PipelineStageFlags2::ALL_COMMANDS;
            } else {
                let image_usages = consumer_node.image_usages();
                let buffer_usages = consumer_node.buffer_usages();
                for img in &edge.images {
                    if let Some(usage) = image_usages.get(img) {
                        stage |= usage.state.stage;
                    }
                }
                for buf in &edge.buffers {
                    if let Some(usage) = buffer_usages.get(buf) {
                        stage |= usage.state.stage;
                    }
                }
            }
            if stage.is_empty() {
                stage = vk::PipelineStageFlags2::ALL_COMMANDS;
            }

            let waits = &mut syncs[consumer].waits;
            match waits.iter_mut().find(|w| w.producer == producer) {
                Some(wait) => wait.stage |= stage,
                None => waits.push(RgPassWait { producer, stage }),
            }
            syncs[producer].signal = true;
        }

        for sync in &mut syncs {
            sync.waits.sort_by_key(|w| w.producer);
        }
        syncs
    }
}
