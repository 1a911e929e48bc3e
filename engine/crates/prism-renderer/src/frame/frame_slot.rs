//! frames in flight 环上的一个槽位
//!
//! 槽位持有 CPU 每帧都会改写的对象：per-frame uniform、点光源快照、overflow 计数，
//! 以及命令池、fence 和 "<pass>-done" semaphore。启动时创建，关闭时销毁。

use ash::vk;

use prism_gfx::commands::command_buffer::GfxCommandBuffer;
use prism_gfx::commands::command_pool::GfxCommandPool;
use prism_gfx::commands::fence::GfxFence;
use prism_gfx::commands::semaphore::GfxSemaphore;
use prism_gfx::gfx::Gfx;
use prism_gfx::resources::structured_buffer::GfxStructuredBuffer;
use prism_render_graph::{RgQueue, RgSignalSet};
use prism_render_interface::gpu_data::{ClusterConsts, GpuPerFrameData, GpuPointLight};
use prism_render_interface::truncation_stats::TruncationStats;

use crate::passes::light_culler::PointLightSnapshot;

/// 槽位上一次提交的帧，复用之前需要回读它的截断结果
#[derive(Clone, Copy, Debug)]
struct InFlightFrame {
    frame_id: u64,
    lights_dropped: u64,
}

pub struct FrameSlot {
    label: char,

    /// 最终 Pass 提交时 signal，创建时处于 signaled
    fence: GfxFence,
    image_acquired: GfxSemaphore,
    signals: RgSignalSet,
    /// 按 [`RgQueue::index`] 排列
    command_pools: [GfxCommandPool; 2],
    allocated_cmds: [Vec<GfxCommandBuffer>; 2],

    per_frame: GfxStructuredBuffer<GpuPerFrameData>,
    point_lights: GfxStructuredBuffer<GpuPointLight>,
    /// GPU 上 cluster 光源列表写满后被丢弃的索引数
    overflow: GfxStructuredBuffer<u32>,

    in_flight: Option<InFlightFrame>,
}
// new & init
impl FrameSlot {
    pub fn new(label: char) -> anyhow::Result<Self> {
        let gfx = Gfx::get();
        let qfi = gfx.queue_family_indices();

        let command_pools = [
            GfxCommandPool::new(
                gfx.gfx_queue_family(),
                vk::CommandPoolCreateFlags::TRANSIENT,
                &format!("frame-{label}-graphics"),
            )?,
            GfxCommandPool::new(
                gfx.compute_queue_family(),
                vk::CommandPoolCreateFlags::TRANSIENT,
                &format!("frame-{label}-compute"),
            )?,
        ];

        let per_frame = GfxStructuredBuffer::new(
            format!("frame-{label}-per-frame"),
            1,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            true,
            &qfi,
        )?;
        let point_lights = GfxStructuredBuffer::new_ssbo(
            ClusterConsts::MAX_POINT_LIGHTS,
            true,
            &qfi,
            format!("frame-{label}-point-lights"),
        )?;
        let overflow = GfxStructuredBuffer::new_ssbo(1, true, &qfi, format!("frame-{label}-overflow"))?;
        overflow.write(0, &[0])?;

        Ok(Self {
            label,
            fence: GfxFence::new(true, &format!("frame-{label}-fence"))?,
            image_acquired: GfxSemaphore::new(&format!("frame-{label}-image-acquired"))?,
            signals: RgSignalSet::new(format!("frame-{label}")),
            command_pools,
            allocated_cmds: Default::default(),
            per_frame,
            point_lights,
            overflow,
            in_flight: None,
        })
    }
}
// getters
impl FrameSlot {
    #[inline]
    pub fn label(&self) -> char {
        self.label
    }

    #[inline]
    pub fn fence(&self) -> &GfxFence {
        &self.fence
    }

    #[inline]
    pub fn image_acquired(&self) -> &GfxSemaphore {
        &self.image_acquired
    }

    #[inline]
    pub fn per_frame_buffer(&self) -> vk::Buffer {
        self.per_frame.vk_buffer()
    }

    #[inline]
    pub fn point_light_buffer(&self) -> vk::Buffer {
        self.point_lights.vk_buffer()
    }

    #[inline]
    pub fn overflow_buffer(&self) -> vk::Buffer {
        self.overflow.vk_buffer()
    }

    /// 帧图执行时需要的命令池与 signal 集合
    pub fn graph_resources(&mut self) -> ([&GfxCommandPool; 2], &mut RgSignalSet) {
        let [graphics, compute] = &self.command_pools;
        ([graphics, compute], &mut self.signals)
    }
}
// update
impl FrameSlot {
    /// 每帧的第一个阻塞点：等待槽位上一次提交完成，然后回收它的命令缓冲区并回读截断统计
    pub fn begin(&mut self, stats: &mut TruncationStats) -> anyhow::Result<()> {
        let _span = tracy_client::span!("FrameSlot::begin");
        self.fence.wait()?;
        self.fence.reset()?;

        for queue in RgQueue::ALL {
            let pool = &self.command_pools[queue.index()];
            let cmds = std::mem::take(&mut self.allocated_cmds[queue.index()]);
            if !cmds.is_empty() {
                pool.free_command_buffers(&cmds);
            }
            pool.reset_all_buffers()?;
        }

        let cluster_overflows = self.overflow.read(0)? as u64;
        self.overflow.write(0, &[0])?;
        if let Some(frame) = self.in_flight.take() {
            stats.record_frame(frame.frame_id, frame.lights_dropped, cluster_overflows);
        }
        Ok(())
    }

    pub fn upload(&self, per_frame: &GpuPerFrameData, lights: &PointLightSnapshot) -> anyhow::Result<()> {
        self.per_frame.write(0, std::slice::from_ref(per_frame))?;
        if !lights.lights.is_empty() {
            self.point_lights.write(0, &lights.lights)?;
        }
        Ok(())
    }

    /// 帧图提交之后调用，记录本帧分配的命令缓冲区
    pub fn submitted(&mut self, frame_id: u64, lights_dropped: u64, cmds: [Vec<GfxCommandBuffer>; 2]) {
        for (allocated, cmds) in self.allocated_cmds.iter_mut().zip(cmds) {
            allocated.extend(cmds);
        }
        self.in_flight = Some(InFlightFrame {
            frame_id,
            lights_dropped,
        });
    }
}
// destroy
impl FrameSlot {
    /// 调用前需要等待 device idle
    pub fn destroy(self) {
        for (pool, cmds) in self.command_pools.iter().zip(&self.allocated_cmds) {
            if !cmds.is_empty() {
                pool.free_command_buffers(cmds);
            }
        }
        for pool in self.command_pools {
            pool.destroy();
        }
        self.per_frame.destroy();
        self.point_lights.destroy();
        self.overflow.destroy();
        self.signals.destroy();
        self.image_acquired.destroy();
        self.fence.destroy();
    }
}
