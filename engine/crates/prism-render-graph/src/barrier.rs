//! Barrier 自动计算
//!
//! 按执行顺序逐个资源模拟访问历史，生成每个 Pass 的 pre-barrier 和 post-barrier。
//!
//! 跨 queue 的资源使用 CONCURRENT 共享模式，不需要 ownership transfer；
//! 写入的结果被另一个 queue 消费时，layout 转换放在生产者末尾（release），
//! 消费者只需要等待生产者的 semaphore。

use ash::vk;
use slotmap::SecondaryMap;

use prism_gfx::commands::barrier::{GfxBarrierMask, GfxBufferBarrier, GfxImageBarrier};

use crate::error::RgCompileError;
use crate::handles::{RgBufferHandle, RgImageHandle};
use crate::pass::{RgPassNode, RgQueue};
use crate::resource_registry::RgResourceRegistry;

/// 图像 Barrier 描述
#[derive(Clone, Debug, PartialEq)]
pub struct RgImageBarrierDesc {
    pub handle: RgImageHandle,
    pub mask: GfxBarrierMask,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub aspect: vk::ImageAspectFlags,
}

impl RgImageBarrierDesc {
    pub fn to_gfx_barrier(&self, image: vk::Image) -> GfxImageBarrier {
        GfxImageBarrier::new()
            .image(image)
            .layout_transfer(self.old_layout, self.new_layout)
            .mask(self.mask)
            .image_aspect_flag(self.aspect)
    }
}

/// 缓冲区 Barrier 描述
#[derive(Clone, Debug, PartialEq)]
pub struct RgBufferBarrierDesc {
    pub handle: RgBufferHandle,
    pub mask: GfxBarrierMask,
}

impl RgBufferBarrierDesc {
    pub fn to_gfx_barrier(&self, buffer: vk::Buffer) -> GfxBufferBarrier {
        GfxBufferBarrier::new().buffer(buffer, 0, vk::WHOLE_SIZE).mask(self.mask)
    }
}

/// 一个 Pass 前（或后）需要的 Barrier 集合
#[derive(Clone, Debug, Default)]
pub struct PassBarriers {
    pub image_barriers: Vec<RgImageBarrierDesc>,
    pub buffer_barriers: Vec<RgBufferBarrierDesc>,
}

impl PassBarriers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_barriers(&self) -> bool {
        !self.image_barriers.is_empty() || !self.buffer_barriers.is_empty()
    }

    pub fn find_image(&self, handle: RgImageHandle) -> Option<&RgImageBarrierDesc> {
        self.image_barriers.iter().find(|b| b.handle == handle)
    }

    pub fn find_buffer(&self, handle: RgBufferHandle) -> Option<&RgBufferBarrierDesc> {
        self.buffer_barriers.iter().find(|b| b.handle == handle)
    }
}

/// 资源的一次使用，buffer 的 layout 固定为 UNDEFINED
#[derive(Clone, Copy, Debug)]
struct Access {
    pass_idx: usize,
    queue: RgQueue,
    stage: vk::PipelineStageFlags2,
    access: vk::AccessFlags2,
    src_access: vk::AccessFlags2,
    layout: vk::ImageLayout,
    is_write: bool,
}

#[derive(Clone, Copy, Debug)]
struct PendingWrite {
    queue: RgQueue,
    stage: vk::PipelineStageFlags2,
    access: vk::AccessFlags2,
    /// 已经通过 barrier 对这些 stage 可见
    visible_to: vk::PipelineStageFlags2,
}

/// 一个资源当前的同步状态
struct ResourceTrack {
    layout: vk::ImageLayout,
    pending_write: Option<PendingWrite>,
    readers: Vec<(RgQueue, vk::PipelineStageFlags2)>,
    has_content: bool,
}

/// 生成的 barrier，还未区分 image / buffer
struct RawBarrier {
    mask: GfxBarrierMask,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
}

const RELEASE_DST_STAGE: vk::PipelineStageFlags2 = vk::PipelineStageFlags2::ALL_COMMANDS;
const RELEASE_DST_ACCESS: vk::AccessFlags2 =
    vk::AccessFlags2::from_raw(vk::AccessFlags2::MEMORY_READ.as_raw() | vk::AccessFlags2::MEMORY_WRITE.as_raw());

impl ResourceTrack {
    fn new(layout: vk::ImageLayout, has_content: bool) -> Self {
        Self {
            layout,
            pending_write: None,
            readers: Vec::new(),
            has_content,
        }
    }

    /// 计算 `access` 之前需要的 barrier，并更新状态
    fn transition(&mut self, access: &Access) -> Result<Option<RawBarrier>, Vec<usize>> {
        let layout_change = access.layout != self.layout;
        let mut src_stage = vk::PipelineStageFlags2::empty();
        let mut src_access = vk::AccessFlags2::NONE;
        let mut need_barrier = layout_change;

        if let Some(pw) = &self.pending_write {
            if pw.queue != access.queue {
                // 由 semaphore 保证执行顺序和可见性，这里只需要让 layout 转换排在 wait 之后
                src_stage |= vk::PipelineStageFlags2::ALL_COMMANDS;
            } else if access.is_write || layout_change || !pw.visible_to.contains(access.stage) {
                src_stage |= pw.stage;
                src_access |= pw.access;
                need_barrier = true;
            }
        }

        if access.is_write || layout_change {
            for &(queue, stage) in &self.readers {
                if queue == access.queue {
                    src_stage |= stage;
                    need_barrier = true;
                } else if layout_change && !access.is_write {
                    // 只读的 layout 转换没有依赖边，会和另一个 queue 上的读者竞争
                    return Err(vec![access.pass_idx]);
                }
            }
        }

        if src_stage.is_empty() {
            src_stage = vk::PipelineStageFlags2::ALL_COMMANDS;
        }

        let barrier = need_barrier.then(|| RawBarrier {
            mask: GfxBarrierMask {
                src_stage,
                dst_stage: access.stage,
                src_access,
                dst_access: access.access,
            },
            old_layout: self.layout,
            new_layout: access.layout,
        });

        self.layout = access.layout;
        if access.is_write {
            self.pending_write = Some(PendingWrite {
                queue: access.queue,
                stage: access.stage,
                access: access.src_access,
                visible_to: vk::PipelineStageFlags2::empty(),
            });
            self.readers.clear();
            self.has_content = true;
        } else {
            if let Some(pw) = &mut self.pending_write
                && barrier.is_some()
            {
                pw.visible_to |= access.stage;
            }
            self.readers.push((access.queue, access.stage));
        }

        Ok(barrier)
    }

    /// 写入者末尾的 release：写入可见，layout 转换到跨 queue 读者需要的 layout
    fn release(&mut self, writer: &Access, target_layout: vk::ImageLayout) -> RawBarrier {
        let barrier = RawBarrier {
            mask: GfxBarrierMask {
                src_stage: writer.stage,
                dst_stage: RELEASE_DST_STAGE,
                src_access: writer.src_access,
                dst_access: RELEASE_DST_ACCESS,
            },
            old_layout: writer.layout,
            new_layout: target_layout,
        };
        self.layout = target_layout;
        self.pending_write = None;
        self.readers.clear();
        barrier
    }

    /// 帧图结束时转换到导出状态
    fn export(
        &self,
        final_stage: vk::PipelineStageFlags2,
        final_access: vk::AccessFlags2,
        final_layout: vk::ImageLayout,
    ) -> RawBarrier {
        let (src_stage, src_access) = match &self.pending_write {
            Some(pw) => (pw.stage, pw.access),
            None => (vk::PipelineStageFlags2::ALL_COMMANDS, vk::AccessFlags2::NONE),
        };
        RawBarrier {
            mask: GfxBarrierMask {
                src_stage,
                dst_stage: final_stage,
                src_access,
                dst_access: final_access,
            },
            old_layout: self.layout,
            new_layout: final_layout,
        }
    }
}

/// 编译结果：每个 Pass 的 pre / post barrier（按 pass 索引）
pub struct BarrierPlan {
    pub pre: Vec<PassBarriers>,
    pub post: Vec<PassBarriers>,
}

/// Barrier 计算器
pub struct BarrierCalculator;

impl BarrierCalculator {
    pub fn compute(
        passes: &[RgPassNode<'_>],
        execution_order: &[usize],
        resources: &RgResourceRegistry,
    ) -> Result<BarrierPlan, RgCompileError> {
        let mut plan = BarrierPlan {
            pre: vec![PassBarriers::new(); passes.len()],
            post: vec![PassBarriers::new(); passes.len()],
        };

        // 收集每个资源按执行顺序的使用记录
        let mut image_accesses: SecondaryMap<RgImageHandle, Vec<Access>> = SecondaryMap::new();
        let mut buffer_accesses: SecondaryMap<RgBufferHandle, Vec<Access>> = SecondaryMap::new();
        for &pass_idx in execution_order {
            let pass = &passes[pass_idx];
            for (handle, usage) in pass.image_usages() {
                let access = Access {
                    pass_idx,
                    queue: pass.queue,
                    stage: usage.state.stage,
                    access: usage.state.access,
                    src_access: usage.state.src_access(),
                    layout: usage.state.layout,
                    is_write: usage.is_write,
                };
                match image_accesses.get_mut(handle) {
                    Some(list) => list.push(access),
                    None => {
                        image_accesses.insert(handle, vec![access]);
                    }
                }
            }
            for (handle, usage) in pass.buffer_usages() {
                let access = Access {
                    pass_idx,
                    queue: pass.queue,
                    stage: usage.state.stage,
                    access: usage.state.access,
                    src_access: usage.state.src_access(),
                    layout: vk::ImageLayout::UNDEFINED,
                    is_write: usage.is_write,
                };
                match buffer_accesses.get_mut(handle) {
                    Some(list) => list.push(access),
                    None => {
                        buffer_accesses.insert(handle, vec![access]);
                    }
                }
            }
        }

        for (handle, resource) in resources.iter_images() {
            let Some(accesses) = image_accesses.get(handle) else {
                continue;
            };
            let aspect = resource.aspect();
            let mut track = ResourceTrack::new(resource.initial_state.layout, !resource.is_uninitialized());
            let to_desc = |raw: RawBarrier| RgImageBarrierDesc {
                handle,
                mask: raw.mask,
                old_layout: raw.old_layout,
                new_layout: raw.new_layout,
                aspect,
            };

            Self::walk(passes, &resource.name, accesses, &mut track, |pass_idx, raw, is_post| {
                let list = if is_post { &mut plan.post[pass_idx] } else { &mut plan.pre[pass_idx] };
                list.image_barriers.push(to_desc(raw));
            })?;

            if let Some(final_state) = resource.final_state {
                let last = accesses.last().map(|a| a.pass_idx);
                if let Some(last) = last {
                    let raw = track.export(final_state.stage, final_state.access, final_state.layout);
                    plan.post[last].image_barriers.push(to_desc(raw));
                }
            }
        }

        for (handle, resource) in resources.iter_buffers() {
            let Some(accesses) = buffer_accesses.get(handle) else {
                continue;
            };
            let mut track = ResourceTrack::new(vk::ImageLayout::UNDEFINED, !resource.is_uninitialized());
            Self::walk(passes, &resource.name, accesses, &mut track, |pass_idx, raw, is_post| {
                let list = if is_post { &mut plan.post[pass_idx] } else { &mut plan.pre[pass_idx] };
                list.buffer_barriers.push(RgBufferBarrierDesc { handle, mask: raw.mask });
            })?;

            if let Some(final_state) = resource.final_state
                && let Some(last) = accesses.last().map(|a| a.pass_idx)
            {
                let raw = track.export(final_state.stage, final_state.access, vk::ImageLayout::UNDEFINED);
                plan.post[last].buffer_barriers.push(RgBufferBarrierDesc { handle, mask: raw.mask });
            }
        }

        Ok(plan)
    }

    /// 模拟一个资源的全部使用
    ///
    /// `emit(pass_idx, barrier, is_post)`
    fn walk(
        passes: &[RgPassNode<'_>],
        resource_name: &str,
        accesses: &[Access],
        track: &mut ResourceTrack,
        mut emit: impl FnMut(usize, RawBarrier, bool),
    ) -> Result<(), RgCompileError> {
        let pass_name = |idx: usize| passes[idx].name.clone();
        let layout_conflict = |idxs: Vec<usize>| RgCompileError::LayoutConflict {
            resource: resource_name.to_string(),
            passes: idxs.into_iter().map(pass_name).collect(),
        };

        for (i, access) in accesses.iter().enumerate() {
            if !access.is_write && !track.has_content {
                return Err(RgCompileError::UndeclaredProducer {
                    pass: pass_name(access.pass_idx),
                    resource: resource_name.to_string(),
                });
            }

            match track.transition(access) {
                Ok(Some(raw)) => emit(access.pass_idx, raw, false),
                Ok(None) => {}
                Err(conflicting) => return Err(layout_conflict(conflicting)),
            }

            if !access.is_write {
                continue;
            }

            // 直到下一个写入者（包含）之间的使用者
            let segment_end = accesses[i + 1..]
                .iter()
                .position(|a| a.is_write)
                .map_or(accesses.len(), |p| i + 1 + p + 1);
            let segment = &accesses[i + 1..segment_end];
            if !segment.iter().any(|a| a.queue != access.queue) {
                continue;
            }

            let readers = segment.iter().filter(|a| !a.is_write).collect::<Vec<_>>();
            let target_layout = readers
                .first()
                .map(|a| a.layout)
                .or_else(|| segment.last().map(|a| a.layout))
                .unwrap_or(access.layout);
            if readers.iter().any(|a| a.layout != target_layout) {
                return Err(layout_conflict(readers.iter().map(|a| a.pass_idx).collect()));
            }
            emit(access.pass_idx, track.release(access, target_layout), true);
        }

        Ok(())
    }
}
