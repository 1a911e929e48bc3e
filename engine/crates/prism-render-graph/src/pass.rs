//! Pass 定义和构建器
//!
//! 提供 `RgPass` trait 用于声明式定义 Pass，
//! 以及 `RgPassBuilder` 用于在 setup 阶段声明资源依赖。

use std::cell::RefCell;
use std::fmt;

use anyhow::Context;
use ash::vk;
use indexmap::IndexMap;

use prism_gfx::commands::command_buffer::GfxCommandBuffer;
use prism_gfx::commands::command_pool::GfxCommandPool;

use crate::executor::RgPassExecutor;
use crate::handles::{RgBufferHandle, RgImageHandle};
use crate::resource_registry::{RgImageResource, RgResourceRegistry};
use crate::resource_state::{RgBufferState, RgImageState};
use crate::semaphore_info::RgSemaphoreInfo;

/// Pass 提交到的硬件 queue
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RgQueue {
    Graphics,
    Compute,
}

impl RgQueue {
    pub const ALL: [RgQueue; 2] = [RgQueue::Graphics, RgQueue::Compute];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            RgQueue::Graphics => 0,
            RgQueue::Compute => 1,
        }
    }
}

impl fmt::Display for RgQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RgQueue::Graphics => write!(f, "graphics"),
            RgQueue::Compute => write!(f, "compute"),
        }
    }
}

/// Pass 执行时的上下文
pub struct RgPassContext<'a> {
    /// 已经 begin 的主命令缓冲区
    pub cmd: &'a GfxCommandBuffer,
    pub pass_name: &'a str,
    pub queue: RgQueue,
    pub frame_id: u64,

    pub(crate) resources: &'a RgResourceRegistry,
    /// 当前 queue 对应的 command pool，用于分配 secondary command buffer
    pub(crate) command_pool: &'a GfxCommandPool,
    pub(crate) secondary_cmds: &'a RefCell<Vec<GfxCommandBuffer>>,
}

impl RgPassContext<'_> {
    pub fn image(&self, handle: RgImageHandle) -> anyhow::Result<&RgImageResource> {
        self.resources
            .get_image(handle)
            .with_context(|| format!("pass \"{}\" uses an image that is not in the graph", self.pass_name))
    }

    #[inline]
    pub fn image_view(&self, handle: RgImageHandle) -> anyhow::Result<vk::ImageView> {
        Ok(self.image(handle)?.view)
    }

    pub fn buffer(&self, handle: RgBufferHandle) -> anyhow::Result<vk::Buffer> {
        self.resources
            .get_buffer(handle)
            .map(|b| b.buffer)
            .with_context(|| format!("pass \"{}\" uses a buffer that is not in the graph", self.pass_name))
    }

    /// 分配一个 secondary command buffer，生命周期跟随 frame slot
    pub fn alloc_secondary(&self, name: &str) -> anyhow::Result<GfxCommandBuffer> {
        let cmd = GfxCommandBuffer::new_secondary(self.command_pool, &format!("{}-{}", self.pass_name, name))?;
        self.secondary_cmds.borrow_mut().push(cmd.clone());
        Ok(cmd)
    }
}

/// Pass 构建器
///
/// 在 `RgPass::setup()` 中使用，声明 Pass 的资源依赖。
pub struct RgPassBuilder<'a> {
    pub(crate) name: String,
    pub(crate) image_reads: Vec<(RgImageHandle, RgImageState)>,
    pub(crate) image_writes: Vec<(RgImageHandle, RgImageState)>,
    pub(crate) buffer_reads: Vec<(RgBufferHandle, RgBufferState)>,
    pub(crate) buffer_writes: Vec<(RgBufferHandle, RgBufferState)>,

    pub(crate) resources: &'a RgResourceRegistry,
}

impl RgPassBuilder<'_> {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn read_image(&mut self, handle: RgImageHandle, state: RgImageState) -> RgImageHandle {
        self.image_reads.push((handle, state));
        handle
    }

    #[inline]
    pub fn write_image(&mut self, handle: RgImageHandle, state: RgImageState) -> RgImageHandle {
        self.image_writes.push((handle, state));
        handle
    }

    #[inline]
    pub fn read_buffer(&mut self, handle: RgBufferHandle, state: RgBufferState) -> RgBufferHandle {
        self.buffer_reads.push((handle, state));
        handle
    }

    #[inline]
    pub fn write_buffer(&mut self, handle: RgBufferHandle, state: RgBufferState) -> RgBufferHandle {
        self.buffer_writes.push((handle, state));
        handle
    }

    pub fn read_write_buffer(&mut self, handle: RgBufferHandle, state: RgBufferState) -> RgBufferHandle {
        self.read_buffer(handle, state);
        self.write_buffer(handle, state)
    }

    /// 按名字查找已经导入的图像
    #[inline]
    pub fn find_image(&self, name: &str) -> Option<RgImageHandle> {
        self.resources.find_image(name)
    }

    #[inline]
    pub fn find_buffer(&self, name: &str) -> Option<RgBufferHandle> {
        self.resources.find_buffer(name)
    }
}

/// 一个资源在某个 Pass 中合并后的使用方式
#[derive(Clone, Copy, Debug)]
pub struct RgUsage<S> {
    pub state: S,
    pub is_write: bool,
}

/// Pass 节点数据（编译后使用）
pub struct RgPassNode<'a> {
    pub name: String,
    pub queue: RgQueue,

    pub image_reads: Vec<(RgImageHandle, RgImageState)>,
    pub image_writes: Vec<(RgImageHandle, RgImageState)>,
    pub buffer_reads: Vec<(RgBufferHandle, RgBufferState)>,
    pub buffer_writes: Vec<(RgBufferHandle, RgBufferState)>,

    /// 显式依赖：这些 Pass 必须先执行
    pub(crate) explicit_deps: Vec<usize>,
    pub(crate) external_waits: Vec<RgSemaphoreInfo>,
    pub(crate) external_signals: Vec<RgSemaphoreInfo>,

    pub(crate) executor: Box<dyn RgPassExecutor + 'a>,
}

impl RgPassNode<'_> {
    /// 同一个图像同时读写时以写入状态为准
    pub fn image_usages(&self) -> IndexMap<RgImageHandle, RgUsage<RgImageState>> {
        let mut usages = IndexMap::new();
        for (handle, state) in &self.image_reads {
            usages.entry(*handle).or_insert(RgUsage {
                state: *state,
                is_write: false,
            });
        }
        for (handle, state) in &self.image_writes {
            usages.insert(
                *handle,
                RgUsage {
                    state: *state,
                    is_write: true,
                },
            );
        }
        usages
    }

    pub fn buffer_usages(&self) -> IndexMap<RgBufferHandle, RgUsage<RgBufferState>> {
        let mut usages = IndexMap::new();
        for (handle, state) in &self.buffer_reads {
            usages.entry(*handle).or_insert(RgUsage {
                state: *state,
                is_write: false,
            });
        }
        for (handle, state) in &self.buffer_writes {
            usages.insert(
                *handle,
                RgUsage {
                    state: *state,
                    is_write: true,
                },
            );
        }
        usages
    }
}

/// 帧图中的一个 Pass
///
/// Pass 可以借用外部资源，生命周期由 `RenderGraphBuilder<'a>` 约束。
pub trait RgPass {
    /// 声明 Pass 的资源依赖
    fn setup(&mut self, builder: &mut RgPassBuilder);

    /// 录制命令，命令缓冲区已经开始录制，pre-barrier 已经插入
    fn execute(&self, ctx: &RgPassContext<'_>) -> anyhow::Result<()>;
}
