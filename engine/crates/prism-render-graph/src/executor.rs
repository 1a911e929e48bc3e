//! 帧图构建器和执行器
//!
//! 提供 `RenderGraphBuilder` 用于构建帧图，
//! `CompiledGraph` 保存编译结果，并把每个 Pass 录制到自己的命令缓冲区后提交到对应的 queue。

use std::cell::RefCell;

use anyhow::Context;
use ash::vk;
use itertools::Itertools;

use prism_gfx::basic::color::LabelColor;
use prism_gfx::commands::barrier::{GfxBufferBarrier, GfxImageBarrier};
use prism_gfx::commands::command_buffer::GfxCommandBuffer;
use prism_gfx::commands::command_pool::GfxCommandPool;
use prism_gfx::commands::fence::GfxFence;
use prism_gfx::commands::semaphore::GfxSemaphore;
use prism_gfx::commands::submit_info::GfxSubmitInfo;
use prism_gfx::gfx::Gfx;

use crate::barrier::{BarrierCalculator, PassBarriers};
use crate::error::RgCompileError;
use crate::graph::{DependencyGraph, PassAccesses};
use crate::handles::{RgBufferHandle, RgImageHandle, RgPassHandle};
use crate::pass::{RgPass, RgPassBuilder, RgPassContext, RgPassNode, RgQueue};
use crate::resource_registry::{RgBufferResource, RgImageResource, RgResourceRegistry};
use crate::resource_state::{RgBufferState, RgImageState};
use crate::semaphore_info::{RgSemaphoreInfo, RgSignalSet};
use crate::sync::{PassSync, SyncCalculator};

/// 类型擦除的 Pass 执行器
pub(crate) trait RgPassExecutor {
    fn execute(&self, ctx: &RgPassContext<'_>) -> anyhow::Result<()>;
}

/// 包装 `RgPass` 实现
pub(crate) struct RgPassExecutorWrapper<P: RgPass> {
    pub pass: P,
}

impl<P: RgPass> RgPassExecutor for RgPassExecutorWrapper<P> {
    fn execute(&self, ctx: &RgPassContext<'_>) -> anyhow::Result<()> {
        self.pass.execute(ctx)
    }
}

/// 包装闭包形式的 Pass
pub(crate) struct RgLambdaExecutor<F> {
    pub func: F,
}

impl<F> RgPassExecutor for RgLambdaExecutor<F>
where
    F: Fn(&RgPassContext<'_>) -> anyhow::Result<()>,
{
    fn execute(&self, ctx: &RgPassContext<'_>) -> anyhow::Result<()> {
        (self.func)(ctx)
    }
}

/// 帧图构建器
///
/// # 使用流程
///
/// 1. 创建 builder: `RenderGraphBuilder::new()`
/// 2. 导入外部资源: `builder.import_image(...)`
/// 3. 添加 Pass: `builder.add_pass("name", queue, pass)`，最后添加的 Pass 是最终 Pass
/// 4. 编译: `builder.compile()`
/// 5. 执行: `compiled.execute(...)`
///
/// `'a` 是 Pass 可以借用的外部资源的生命周期。
pub struct RenderGraphBuilder<'a> {
    resources: RgResourceRegistry,
    passes: Vec<RgPassNode<'a>>,
}

impl Default for RenderGraphBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

// new & init
impl<'a> RenderGraphBuilder<'a> {
    pub fn new() -> Self {
        Self {
            resources: RgResourceRegistry::new(),
            passes: Vec::new(),
        }
    }
}

// 资源
impl RenderGraphBuilder<'_> {
    /// 导入外部图像资源
    ///
    /// # 参数
    /// - `initial_state`: 图像当前的状态，`UNDEFINED` 表示内容无效，必须先被某个 Pass 写入
    pub fn import_image(
        &mut self,
        name: impl Into<String>,
        image: vk::Image,
        view: vk::ImageView,
        format: vk::Format,
        initial_state: RgImageState,
    ) -> RgImageHandle {
        self.resources.register_image(RgImageResource {
            name: name.into(),
            image,
            view,
            format,
            initial_state,
            final_state: None,
        })
    }

    /// 导入外部缓冲区资源
    pub fn import_buffer(
        &mut self,
        name: impl Into<String>,
        buffer: vk::Buffer,
        initial_state: RgBufferState,
    ) -> RgBufferHandle {
        self.resources.register_buffer(RgBufferResource {
            name: name.into(),
            buffer,
            initial_state,
            final_state: None,
        })
    }

    /// 帧图结束后图像需要处于的状态（例如 present）
    pub fn export_image(&mut self, handle: RgImageHandle, final_state: RgImageState) {
        match self.resources.get_image_mut(handle) {
            Some(resource) => resource.final_state = Some(final_state),
            None => log::warn!("export of an image that is not in the graph: {:?}", handle),
        }
    }

    /// 帧图结束后缓冲区需要处于的状态（例如 CPU 读回）
    pub fn export_buffer(&mut self, handle: RgBufferHandle, final_state: RgBufferState) {
        match self.resources.get_buffer_mut(handle) {
            Some(resource) => resource.final_state = Some(final_state),
            None => log::warn!("export of a buffer that is not in the graph: {:?}", handle),
        }
    }

    #[inline]
    pub fn resources(&self) -> &RgResourceRegistry {
        &self.resources
    }
}

// Pass
impl<'a> RenderGraphBuilder<'a> {
    /// 添加 Pass
    pub fn add_pass<P: RgPass + 'a>(&mut self, name: impl Into<String>, queue: RgQueue, mut pass: P) -> RgPassHandle {
        let name = name.into();
        let mut builder = self.pass_builder(&name);
        pass.setup(&mut builder);
        let accesses = Self::take_accesses(builder);
        self.push_node(name, queue, accesses, Box::new(RgPassExecutorWrapper { pass }))
    }

    /// 以闭包的形式添加 Pass
    pub fn add_pass_lambda<S, F>(&mut self, name: impl Into<String>, queue: RgQueue, setup: S, execute: F) -> RgPassHandle
    where
        S: FnOnce(&mut RgPassBuilder),
        F: Fn(&RgPassContext<'_>) -> anyhow::Result<()> + 'a,
    {
        let name = name.into();
        let mut builder = self.pass_builder(&name);
        setup(&mut builder);
        let accesses = Self::take_accesses(builder);
        self.push_node(name, queue, accesses, Box::new(RgLambdaExecutor { func: execute }))
    }

    /// 显式声明 `before` 必须先于 `after` 执行
    pub fn add_dependency(&mut self, before: RgPassHandle, after: RgPassHandle) {
        self.passes[after.0].explicit_deps.push(before.0);
    }

    /// Pass 提交时额外等待一个外部 semaphore（例如 image acquired）
    pub fn add_wait(&mut self, pass: RgPassHandle, info: RgSemaphoreInfo) {
        self.passes[pass.0].external_waits.push(info);
    }

    /// Pass 提交时额外发出一个外部 semaphore（例如 render complete）
    pub fn add_signal(&mut self, pass: RgPassHandle, info: RgSemaphoreInfo) {
        self.passes[pass.0].external_signals.push(info);
    }

    #[inline]
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    fn pass_builder(&self, name: &str) -> RgPassBuilder<'_> {
        RgPassBuilder {
            name: name.to_string(),
            image_reads: Vec::new(),
            image_writes: Vec::new(),
            buffer_reads: Vec::new(),
            buffer_writes: Vec::new(),
            resources: &self.resources,
        }
    }

    #[allow(clippy::type_complexity)]
    fn take_accesses(
        builder: RgPassBuilder<'_>,
    ) -> (
        Vec<(RgImageHandle, RgImageState)>,
        Vec<(RgImageHandle, RgImageState)>,
        Vec<(RgBufferHandle, RgBufferState)>,
        Vec<(RgBufferHandle, RgBufferState)>,
    ) {
        (builder.image_reads, builder.image_writes, builder.buffer_reads, builder.buffer_writes)
    }

    #[allow(clippy::type_complexity)]
    fn push_node(
        &mut self,
        name: String,
        queue: RgQueue,
        accesses: (
            Vec<(RgImageHandle, RgImageState)>,
            Vec<(RgImageHandle, RgImageState)>,
            Vec<(RgBufferHandle, RgBufferState)>,
            Vec<(RgBufferHandle, RgBufferState)>,
        ),
        executor: Box<dyn RgPassExecutor + 'a>,
    ) -> RgPassHandle {
        let (image_reads, image_writes, buffer_reads, buffer_writes) = accesses;
        self.passes.push(RgPassNode {
            name,
            queue,
            image_reads,
            image_writes,
            buffer_reads,
            buffer_writes,
            explicit_deps: Vec::new(),
            external_waits: Vec::new(),
            external_signals: Vec::new(),
            executor,
        });
        RgPassHandle(self.passes.len() - 1)
    }
}

// compile
impl<'a> RenderGraphBuilder<'a> {
    /// 编译帧图
    ///
    /// 依赖分析、拓扑排序、barrier 计算和跨 queue 同步推导。
    /// 最后添加的 Pass 是最终 Pass，其余每个 Pass 的结果都必须流向它。
    pub fn compile(self) -> Result<CompiledGraph<'a>, RgCompileError> {
        let _span = tracy_client::span!("RenderGraphBuilder::compile");

        let pass_count = self.passes.len();
        if pass_count == 0 {
            return Err(RgCompileError::Empty);
        }
        if let Some(dup) = self.passes.iter().map(|p| p.name.as_str()).duplicates().next() {
            return Err(RgCompileError::DuplicatePass { pass: dup.to_string() });
        }

        let image_reads = self.passes.iter().map(|p| p.image_reads.iter().map(|s| s.0).collect_vec()).collect_vec();
        let image_writes = self.passes.iter().map(|p| p.image_writes.iter().map(|s| s.0).collect_vec()).collect_vec();
        let buffer_reads = self.passes.iter().map(|p| p.buffer_reads.iter().map(|s| s.0).collect_vec()).collect_vec();
        let buffer_writes = self.passes.iter().map(|p| p.buffer_writes.iter().map(|s| s.0).collect_vec()).collect_vec();
        let explicit_deps = self.passes.iter().map(|p| p.explicit_deps.clone()).collect_vec();

        let dep_graph = DependencyGraph::analyze(
            pass_count,
            &PassAccesses {
                image_reads: &image_reads,
                image_writes: &image_writes,
                buffer_reads: &buffer_reads,
                buffer_writes: &buffer_writes,
                explicit_deps: &explicit_deps,
            },
        );

        let execution_order = dep_graph.topological_sort().map_err(|cycle| RgCompileError::Cycle {
            passes: cycle.iter().map(|&i| self.passes[i].name.clone()).collect(),
        })?;

        let final_pass = pass_count - 1;
        if let Some(dangling) = (0..final_pass).find(|&p| !dep_graph.reaches(p, final_pass)) {
            return Err(RgCompileError::DanglingPass {
                pass: self.passes[dangling].name.clone(),
                final_pass: self.passes[final_pass].name.clone(),
            });
        }

        let barriers = BarrierCalculator::compute(&self.passes, &execution_order, &self.resources)?;
        let syncs = SyncCalculator::compute(&self.passes, &dep_graph);

        Ok(CompiledGraph {
            resources: self.resources,
            passes: self.passes,
            execution_order,
            final_pass,
            pre_barriers: barriers.pre,
            post_barriers: barriers.post,
            syncs,
            dep_graph,
        })
    }
}

/// 执行一帧所需的外部对象，由 frame slot 提供
pub struct RgFrameContext<'a> {
    pub frame_id: u64,
    /// 用于命令缓冲区命名，例如 "[F12A]"
    pub frame_name: &'a str,
    /// 按 [`RgQueue::index`] 排列
    pub command_pools: [&'a GfxCommandPool; 2],
    pub signals: &'a mut RgSignalSet,
    /// 串联相邻帧的 timeline semaphore，第 N 帧的最终 Pass signal N + 1
    pub frame_timeline: Option<&'a GfxSemaphore>,
    /// 最终 Pass 提交时 signal 的 fence
    pub fence: Option<&'a GfxFence>,
}

impl RgFrameContext<'_> {
    /// 本帧所有 "<pass>-done" 的 signal 值
    #[inline]
    pub fn signal_value(&self) -> u64 {
        self.frame_id + 1
    }
}

/// 编译后的帧图
pub struct CompiledGraph<'a> {
    resources: RgResourceRegistry,
    passes: Vec<RgPassNode<'a>>,
    execution_order: Vec<usize>,
    final_pass: usize,
    /// 按 pass 索引
    pre_barriers: Vec<PassBarriers>,
    post_barriers: Vec<PassBarriers>,
    syncs: Vec<PassSync>,
    dep_graph: DependencyGraph,
}

// getters
impl CompiledGraph<'_> {
    #[inline]
    pub fn execution_order(&self) -> &[usize] {
        &self.execution_order
    }

    #[inline]
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    #[inline]
    pub fn pass_name(&self, index: usize) -> &str {
        &self.passes[index].name
    }

    pub fn pass_index(&self, name: &str) -> Option<usize> {
        self.passes.iter().position(|p| p.name == name)
    }

    #[inline]
    pub fn final_pass(&self) -> usize {
        self.final_pass
    }

    #[inline]
    pub fn pre_barriers(&self, index: usize) -> &PassBarriers {
        &self.pre_barriers[index]
    }

    #[inline]
    pub fn post_barriers(&self, index: usize) -> &PassBarriers {
        &self.post_barriers[index]
    }

    #[inline]
    pub fn sync(&self, index: usize) -> &PassSync {
        &self.syncs[index]
    }

    #[inline]
    pub fn resources(&self) -> &RgResourceRegistry {
        &self.resources
    }

    /// `consumer` 等待的所有 Pass 名字
    pub fn waits_of(&self, consumer: &str) -> Vec<&str> {
        self.pass_index(consumer)
            .map(|c| self.syncs[c].waits.iter().map(|w| self.passes[w.producer].name.as_str()).collect())
            .unwrap_or_default()
    }

    /// `pass` 直接依赖的所有 Pass 名字（资源依赖和显式依赖）
    pub fn dependencies_of(&self, pass: &str) -> Vec<&str> {
        self.pass_index(pass)
            .map(|p| {
                self.dep_graph
                    .get_predecessors(p)
                    .into_iter()
                    .sorted()
                    .map(|d| self.passes[d].name.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 执行顺序中的位置
    pub fn position_of(&self, name: &str) -> Option<usize> {
        let idx = self.pass_index(name)?;
        self.execution_order.iter().position(|&i| i == idx)
    }
}

// execute
impl CompiledGraph<'_> {
    /// 录制并提交所有 Pass
    ///
    /// 每个 Pass 一个主命令缓冲区，按拓扑顺序提交到各自的 queue。
    /// 返回本帧分配的所有命令缓冲区（按 [`RgQueue::index`] 分组），frame slot 复用前需要释放回对应的 pool。
    pub fn execute(&self, ctx: &mut RgFrameContext<'_>) -> anyhow::Result<[Vec<GfxCommandBuffer>; 2]> {
        let _span = tracy_client::span!("CompiledGraph::execute");

        let signal_value = ctx.signal_value();
        let secondary_cmds = RefCell::new(Vec::new());
        let mut allocated_cmds: [Vec<GfxCommandBuffer>; 2] = Default::default();
        let mut queue_started = [false; 2];

        for &pass_idx in &self.execution_order {
            let pass = &self.passes[pass_idx];
            let queue_idx = pass.queue.index();
            let command_pool = ctx.command_pools[queue_idx];

            let cmd = GfxCommandBuffer::new(command_pool, &format!("{}-{}", ctx.frame_name, pass.name))?;
            allocated_cmds[queue_idx].push(cmd.clone());

            cmd.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT, &pass.name)?;
            self.record_barriers(&cmd, &self.pre_barriers[pass_idx]);
            {
                let _span = tracy_client::span!("pass execute");
                let pass_ctx = RgPassContext {
                    cmd: &cmd,
                    pass_name: &pass.name,
                    queue: pass.queue,
                    frame_id: ctx.frame_id,
                    resources: &self.resources,
                    command_pool,
                    secondary_cmds: &secondary_cmds,
                };
                pass.executor
                    .execute(&pass_ctx)
                    .with_context(|| format!("failed to record pass \"{}\"", pass.name))?;
            }
            allocated_cmds[queue_idx].append(&mut secondary_cmds.borrow_mut());
            self.record_barriers(&cmd, &self.post_barriers[pass_idx]);
            cmd.end()?;

            let mut submit_info = GfxSubmitInfo::new(std::slice::from_ref(&cmd));
            for wait in &self.syncs[pass_idx].waits {
                let producer = &self.passes[wait.producer].name;
                let semaphore = ctx
                    .signals
                    .get(producer)
                    .with_context(|| format!("pass \"{}\" waits on \"{}\" which never signaled", pass.name, producer))?;
                submit_info = submit_info.wait(semaphore, wait.stage, Some(signal_value));
            }
            for wait in &pass.external_waits {
                submit_info = submit_info.wait(&wait.semaphore, wait.stage, wait.value);
            }
            if !queue_started[queue_idx] {
                queue_started[queue_idx] = true;
                if let Some(frame_timeline) = ctx.frame_timeline
                    && ctx.frame_id > 0
                {
                    submit_info =
                        submit_info.wait(frame_timeline, vk::PipelineStageFlags2::ALL_COMMANDS, Some(ctx.frame_id));
                }
            }

            if self.syncs[pass_idx].signal {
                let semaphore = ctx.signals.get_or_create(&pass.name)?;
                submit_info = submit_info.signal(semaphore, vk::PipelineStageFlags2::ALL_COMMANDS, Some(signal_value));
            }
            for signal in &pass.external_signals {
                submit_info = submit_info.signal(&signal.semaphore, signal.stage, signal.value);
            }

            let is_final = pass_idx == self.final_pass;
            if is_final && let Some(frame_timeline) = ctx.frame_timeline {
                submit_info =
                    submit_info.signal(frame_timeline, vk::PipelineStageFlags2::ALL_COMMANDS, Some(signal_value));
            }

            let queue = match pass.queue {
                RgQueue::Graphics => Gfx::get().gfx_queue(),
                RgQueue::Compute => Gfx::get().compute_queue(),
            };
            queue.begin_label(&pass.name, LabelColor::COLOR_SUBMIT);
            let submitted = queue.submit(&[submit_info], if is_final { ctx.fence } else { None });
            queue.end_label();
            submitted.with_context(|| format!("failed to submit pass \"{}\"", pass.name))?;
        }

        Ok(allocated_cmds)
    }

    fn record_barriers(&self, cmd: &GfxCommandBuffer, barriers: &PassBarriers) {
        if !barriers.has_barriers() {
            return;
        }

        let image_barriers: Vec<GfxImageBarrier> = barriers
            .image_barriers
            .iter()
            .filter_map(|desc| {
                let res = self.resources.get_image(desc.handle)?;
                Some(desc.to_gfx_barrier(res.image))
            })
            .collect();
        let buffer_barriers: Vec<GfxBufferBarrier> = barriers
            .buffer_barriers
            .iter()
            .filter_map(|desc| {
                let res = self.resources.get_buffer(desc.handle)?;
                Some(desc.to_gfx_barrier(res.buffer))
            })
            .collect();

        cmd.pipeline_barrier(vk::DependencyFlags::empty(), &image_barriers, &buffer_barriers);
    }
}

// 调试方法
impl CompiledGraph<'_> {
    /// 打印执行计划
    ///
    /// 包括每个 Pass 的 queue、资源读写、barrier 以及跨 queue 的 wait / signal。
    pub fn print_execution_plan(&self) {
        log::info!("╔══════════════════════════════════════════════════════════════════╗");
        log::info!("║              Frame Graph Execution Plan                          ║");
        log::info!("╠══════════════════════════════════════════════════════════════════╣");
        log::info!(
            "║ Total Passes: {}  |  Execution Order: [{}]",
            self.passes.len(),
            self.execution_order.iter().map(|i| self.passes[*i].name.as_str()).join(" → ")
        );
        log::info!("╚══════════════════════════════════════════════════════════════════╝");

        for (order, &pass_idx) in self.execution_order.iter().enumerate() {
            let pass = &self.passes[pass_idx];
            let sync = &self.syncs[pass_idx];

            log::info!("┌─────────────────────────────────────────────────────────────────┐");
            log::info!("│ [{}/{}] Pass: \"{}\" on {}", order + 1, self.execution_order.len(), pass.name, pass.queue);
            log::info!("├─────────────────────────────────────────────────────────────────┤");

            let deps = self.dependencies_of(&pass.name);
            if !deps.is_empty() {
                log::info!("│   after [{}]", deps.join(", "));
            }
            for (handle, usage) in pass.image_usages() {
                log::info!(
                    "│   {} image \"{}\" @ {:?} (stage: {}, access: {})",
                    if usage.is_write { "write" } else { "read " },
                    self.resources.image_name(handle),
                    usage.state.layout,
                    Self::format_pipeline_stage(usage.state.stage),
                    Self::format_access_flags(usage.state.access)
                );
            }
            for (handle, usage) in pass.buffer_usages() {
                log::info!(
                    "│   {} buffer \"{}\" (stage: {}, access: {})",
                    if usage.is_write { "write" } else { "read " },
                    self.resources.buffer_name(handle),
                    Self::format_pipeline_stage(usage.state.stage),
                    Self::format_access_flags(usage.state.access)
                );
            }

            for wait in &sync.waits {
                log::info!(
                    "│   wait \"{}\" @ {}",
                    RgSignalSet::signal_name(&self.passes[wait.producer].name),
                    Self::format_pipeline_stage(wait.stage)
                );
            }
            if sync.signal {
                log::info!("│   signal \"{}\"", RgSignalSet::signal_name(&pass.name));
            }

            self.print_barriers("pre ", &self.pre_barriers[pass_idx]);
            self.print_barriers("post", &self.post_barriers[pass_idx]);

            log::info!("└─────────────────────────────────────────────────────────────────┘");
        }
    }

    fn print_barriers(&self, tag: &str, barriers: &PassBarriers) {
        for barrier in &barriers.image_barriers {
            log::info!(
                "│   {} barrier image \"{}\": {:?} → {:?}, {} → {}",
                tag,
                self.resources.image_name(barrier.handle),
                barrier.old_layout,
                barrier.new_layout,
                Self::format_pipeline_stage(barrier.mask.src_stage),
                Self::format_pipeline_stage(barrier.mask.dst_stage)
            );
        }
        for barrier in &barriers.buffer_barriers {
            log::info!(
                "│   {} barrier buffer \"{}\": {} → {}",
                tag,
                self.resources.buffer_name(barrier.handle),
                Self::format_pipeline_stage(barrier.mask.src_stage),
                Self::format_pipeline_stage(barrier.mask.dst_stage)
            );
        }
    }

    fn format_pipeline_stage(stage: vk::PipelineStageFlags2) -> String {
        const NAMES: &[(vk::PipelineStageFlags2, &str)] = &[
            (vk::PipelineStageFlags2::TOP_OF_PIPE, "TOP_OF_PIPE"),
            (vk::PipelineStageFlags2::BOTTOM_OF_PIPE, "BOTTOM_OF_PIPE"),
            (vk::PipelineStageFlags2::HOST, "HOST"),
            (vk::PipelineStageFlags2::VERTEX_SHADER, "VERTEX_SHADER"),
            (vk::PipelineStageFlags2::FRAGMENT_SHADER, "FRAGMENT_SHADER"),
            (vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS, "EARLY_FRAGMENT_TESTS"),
            (vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS, "LATE_FRAGMENT_TESTS"),
            (vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT, "COLOR_ATTACHMENT_OUTPUT"),
            (vk::PipelineStageFlags2::COMPUTE_SHADER, "COMPUTE_SHADER"),
            (vk::PipelineStageFlags2::TRANSFER, "TRANSFER"),
            (vk::PipelineStageFlags2::ALL_COMMANDS, "ALL_COMMANDS"),
        ];
        let names = NAMES.iter().filter(|(flag, _)| stage.contains(*flag)).map(|(_, name)| *name).collect_vec();
        if names.is_empty() { format!("{:?}", stage) } else { names.join(" | ") }
    }

    fn format_access_flags(access: vk::AccessFlags2) -> String {
        if access == vk::AccessFlags2::NONE {
            return "NONE".to_string();
        }
        const NAMES: &[(vk::AccessFlags2, &str)] = &[
            (vk::AccessFlags2::UNIFORM_READ, "UNIFORM_READ"),
            (vk::AccessFlags2::SHADER_SAMPLED_READ, "SHADER_SAMPLED_READ"),
            (vk::AccessFlags2::SHADER_STORAGE_READ, "STORAGE_READ"),
            (vk::AccessFlags2::SHADER_STORAGE_WRITE, "STORAGE_WRITE"),
            (vk::AccessFlags2::COLOR_ATTACHMENT_READ, "COLOR_ATTACH_READ"),
            (vk::AccessFlags2::COLOR_ATTACHMENT_WRITE, "COLOR_ATTACH_WRITE"),
            (vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ, "DEPTH_ATTACH_READ"),
            (vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE, "DEPTH_ATTACH_WRITE"),
            (vk::AccessFlags2::TRANSFER_WRITE, "TRANSFER_WRITE"),
            (vk::AccessFlags2::HOST_WRITE, "HOST_WRITE"),
            (vk::AccessFlags2::HOST_READ, "HOST_READ"),
            (vk::AccessFlags2::MEMORY_READ, "MEMORY_READ"),
            (vk::AccessFlags2::MEMORY_WRITE, "MEMORY_WRITE"),
        ];
        let names = NAMES.iter().filter(|(flag, _)| access.contains(*flag)).map(|(_, name)| *name).collect_vec();
        if names.is_empty() { format!("{:?}", access) } else { names.join(" | ") }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &RgPassContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    fn image(builder: &mut RenderGraphBuilder<'_>, name: &str, format: vk::Format, state: RgImageState) -> RgImageHandle {
        builder.import_image(name, vk::Image::null(), vk::ImageView::null(), format, state)
    }

    /// 与一帧的实际结构相同的图：两个 queue 交替
    #[test]
    fn test_frame_like_graph() {
        let mut builder = RenderGraphBuilder::new();
        let depth = image(&mut builder, "depth", vk::Format::D32_SFLOAT, RgImageState::UNDEFINED);
        let albedo = image(&mut builder, "albedo", vk::Format::R8G8B8A8_UNORM, RgImageState::UNDEFINED);
        let ao = image(&mut builder, "ao", vk::Format::R8G8B8A8_UNORM, RgImageState::UNDEFINED);
        let oit = image(&mut builder, "oit", vk::Format::R16G16B16A16_SFLOAT, RgImageState::UNDEFINED);
        let shading = image(&mut builder, "shading", vk::Format::R16G16B16A16_SFLOAT, RgImageState::UNDEFINED);
        let output = image(&mut builder, "output", vk::Format::B8G8R8A8_UNORM, RgImageState::UNDEFINED);
        builder.export_image(output, RgImageState::PRESENT);
        let clusters = builder.import_buffer("clusters", vk::Buffer::null(), RgBufferState::UNDEFINED);
        let lights = builder.import_buffer("lights", vk::Buffer::null(), RgBufferState::HOST_WRITTEN);
        let light_list = builder.import_buffer("light-list", vk::Buffer::null(), RgBufferState::UNDEFINED);

        builder.add_pass_lambda(
            "gbuffer",
            RgQueue::Graphics,
            |b| {
                b.write_image(depth, RgImageState::DEPTH_ATTACHMENT_WRITE);
                b.write_image(albedo, RgImageState::COLOR_ATTACHMENT_WRITE);
            },
            noop,
        );
        builder.add_pass_lambda(
            "clusters",
            RgQueue::Compute,
            |b| {
                b.write_buffer(clusters, RgBufferState::STORAGE_WRITE_COMPUTE);
            },
            noop,
        );
        builder.add_pass_lambda(
            "cull",
            RgQueue::Compute,
            |b| {
                b.read_buffer(clusters, RgBufferState::STORAGE_READ_COMPUTE);
                b.read_buffer(lights, RgBufferState::STORAGE_READ_COMPUTE);
                b.write_buffer(light_list, RgBufferState::STORAGE_WRITE_COMPUTE);
            },
            noop,
        );
        builder.add_pass_lambda(
            "ao",
            RgQueue::Compute,
            |b| {
                b.read_image(depth, RgImageState::DEPTH_READ_COMPUTE);
                b.write_image(ao, RgImageState::STORAGE_WRITE_COMPUTE);
            },
            noop,
        );
        builder.add_pass_lambda(
            "transparency",
            RgQueue::Graphics,
            |b| {
                b.read_image(depth, RgImageState::DEPTH_ATTACHMENT_READ);
                b.read_buffer(light_list, RgBufferState::STORAGE_READ_FRAGMENT);
                b.write_image(oit, RgImageState::COLOR_ATTACHMENT_WRITE);
            },
            noop,
        );
        builder.add_pass_lambda(
            "lighting",
            RgQueue::Compute,
            |b| {
                b.read_image(albedo, RgImageState::SHADER_READ_COMPUTE);
                b.read_image(depth, RgImageState::DEPTH_READ_COMPUTE);
                b.read_image(ao, RgImageState::SHADER_READ_COMPUTE);
                b.read_buffer(light_list, RgBufferState::STORAGE_READ_COMPUTE);
                b.write_image(shading, RgImageState::STORAGE_WRITE_COMPUTE);
            },
            noop,
        );
        builder.add_pass_lambda(
            "composition",
            RgQueue::Graphics,
            |b| {
                b.read_image(shading, RgImageState::SHADER_READ_FRAGMENT);
                b.read_image(oit, RgImageState::SHADER_READ_FRAGMENT);
                b.write_image(output, RgImageState::COLOR_ATTACHMENT_WRITE);
            },
            noop,
        );

        let graph = builder.compile().unwrap();
        let pos = |name: &str| graph.position_of(name).unwrap();
        assert!(pos("gbuffer") < pos("ao"));
        assert!(pos("clusters") < pos("cull"));
        assert!(pos("cull") < pos("transparency"));
        assert!(pos("ao") < pos("lighting"));
        assert_eq!(pos("composition"), 6);

        // 跨 queue 的消费者等待生产者
        assert_eq!(graph.waits_of("ao"), vec!["gbuffer"]);
        assert_eq!(graph.waits_of("transparency"), vec!["cull"]);
        assert_eq!(graph.waits_of("lighting"), vec!["gbuffer"]);
        assert_eq!(graph.waits_of("composition"), vec!["lighting"]);
        assert!(graph.waits_of("cull").is_empty());

        let gbuffer = graph.pass_index("gbuffer").unwrap();
        let cull = graph.pass_index("cull").unwrap();
        let transparency = graph.pass_index("transparency").unwrap();
        let composition = graph.pass_index("composition").unwrap();
        assert!(graph.sync(gbuffer).signal);
        assert!(graph.sync(cull).signal);
        assert!(!graph.sync(composition).signal);

        let cull_wait = graph.sync(transparency).waits[0];
        assert!(cull_wait.stage.contains(vk::PipelineStageFlags2::FRAGMENT_SHADER));

        // depth 在 gbuffer 末尾 release 到只读 layout，消费者不再转换
        let release = graph.post_barriers(gbuffer).find_image(depth).unwrap();
        assert_eq!(release.old_layout, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
        assert_eq!(release.new_layout, vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL);
        assert_eq!(release.aspect, vk::ImageAspectFlags::DEPTH);
        let albedo_release = graph.post_barriers(gbuffer).find_image(albedo).unwrap();
        assert_eq!(albedo_release.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        for name in ["ao", "transparency", "lighting"] {
            let idx = graph.pass_index(name).unwrap();
            assert!(graph.pre_barriers(idx).find_image(depth).is_none(), "{name}");
        }

        // 同一个 queue 上的 RAW 只需要 barrier
        let clusters_barrier = graph.pre_barriers(cull).find_buffer(clusters).unwrap();
        assert_eq!(clusters_barrier.mask.src_access, vk::AccessFlags2::SHADER_STORAGE_WRITE);
        assert_eq!(clusters_barrier.mask.dst_access, vk::AccessFlags2::SHADER_STORAGE_READ);
        assert!(graph.pre_barriers(cull).find_buffer(lights).is_none());
        assert!(graph.post_barriers(cull).find_buffer(light_list).is_some());

        let present = graph.post_barriers(composition).find_image(output).unwrap();
        assert_eq!(present.new_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn test_cycle_rejected() {
        let mut builder = RenderGraphBuilder::new();
        let img = image(&mut builder, "img", vk::Format::R8G8B8A8_UNORM, RgImageState::UNDEFINED);
        let a = builder.add_pass_lambda(
            "a",
            RgQueue::Graphics,
            |b| {
                b.write_image(img, RgImageState::COLOR_ATTACHMENT_WRITE);
            },
            noop,
        );
        let b = builder.add_pass_lambda(
            "b",
            RgQueue::Graphics,
            |b| {
                b.read_image(img, RgImageState::SHADER_READ_FRAGMENT);
            },
            noop,
        );
        builder.add_dependency(b, a);

        match builder.compile() {
            Err(RgCompileError::Cycle { passes }) => assert_eq!(passes, vec!["a".to_string(), "b".to_string()]),
            other => panic!("unexpected result: {:?}", other.err()),
        }
    }

    #[test]
    fn test_dangling_pass_rejected() {
        let mut builder = RenderGraphBuilder::new();
        let x = image(&mut builder, "x", vk::Format::R8G8B8A8_UNORM, RgImageState::UNDEFINED);
        let y = image(&mut builder, "y", vk::Format::R8G8B8A8_UNORM, RgImageState::UNDEFINED);
        builder.add_pass_lambda(
            "orphan",
            RgQueue::Compute,
            |b| {
                b.write_image(x, RgImageState::STORAGE_WRITE_COMPUTE);
            },
            noop,
        );
        builder.add_pass_lambda(
            "final",
            RgQueue::Graphics,
            |b| {
                b.write_image(y, RgImageState::COLOR_ATTACHMENT_WRITE);
            },
            noop,
        );

        assert_eq!(
            builder.compile().err(),
            Some(RgCompileError::DanglingPass {
                pass: "orphan".to_string(),
                final_pass: "final".to_string()
            })
        );
    }

    #[test]
    fn test_undeclared_producer_rejected() {
        let mut builder = RenderGraphBuilder::new();
        let x = image(&mut builder, "x", vk::Format::R8G8B8A8_UNORM, RgImageState::UNDEFINED);
        builder.add_pass_lambda(
            "reader",
            RgQueue::Graphics,
            |b| {
                b.read_image(x, RgImageState::SHADER_READ_FRAGMENT);
            },
            noop,
        );

        assert_eq!(
            builder.compile().err(),
            Some(RgCompileError::UndeclaredProducer {
                pass: "reader".to_string(),
                resource: "x".to_string()
            })
        );
    }

    #[test]
    fn test_duplicate_pass_rejected() {
        let mut builder = RenderGraphBuilder::new();
        builder.add_pass_lambda("same", RgQueue::Graphics, |_| {}, noop);
        builder.add_pass_lambda("same", RgQueue::Graphics, |_| {}, noop);
        assert_eq!(builder.compile().err(), Some(RgCompileError::DuplicatePass { pass: "same".to_string() }));
    }

    #[test]
    fn test_cross_queue_layout_conflict_rejected() {
        let mut builder = RenderGraphBuilder::new();
        let src = image(&mut builder, "src", vk::Format::R8G8B8A8_UNORM, RgImageState::UNDEFINED);
        let a = image(&mut builder, "a", vk::Format::R8G8B8A8_UNORM, RgImageState::UNDEFINED);
        let b = image(&mut builder, "b", vk::Format::R8G8B8A8_UNORM, RgImageState::UNDEFINED);
        let general_read = RgImageState::new(
            vk::PipelineStageFlags2::FRAGMENT_SHADER,
            vk::AccessFlags2::SHADER_STORAGE_READ,
            vk::ImageLayout::GENERAL,
        );

        builder.add_pass_lambda(
            "writer",
            RgQueue::Graphics,
            |p| {
                p.write_image(src, RgImageState::COLOR_ATTACHMENT_WRITE);
            },
            noop,
        );
        builder.add_pass_lambda(
            "compute-reader",
            RgQueue::Compute,
            |p| {
                p.read_image(src, RgImageState::SHADER_READ_COMPUTE);
                p.write_image(a, RgImageState::STORAGE_WRITE_COMPUTE);
            },
            noop,
        );
        builder.add_pass_lambda(
            "graphics-reader",
            RgQueue::Graphics,
            |p| {
                p.read_image(src, general_read);
                p.write_image(b, RgImageState::COLOR_ATTACHMENT_WRITE);
            },
            noop,
        );
        builder.add_pass_lambda(
            "final",
            RgQueue::Graphics,
            |p| {
                p.read_image(a, RgImageState::SHADER_READ_FRAGMENT);
                p.read_image(b, RgImageState::SHADER_READ_FRAGMENT);
            },
            noop,
        );

        match builder.compile() {
            Err(RgCompileError::LayoutConflict { resource, passes }) => {
                assert_eq!(resource, "src");
                assert_eq!(passes.len(), 2);
            }
            other => panic!("unexpected result: {:?}", other.err()),
        }
    }

    #[test]
    fn test_write_after_read_across_queues() {
        let mut builder = RenderGraphBuilder::new();
        let history = image(
            &mut builder,
            "history",
            vk::Format::R16G16B16A16_SFLOAT,
            RgImageState::imported(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
        );
        let out = image(&mut builder, "out", vk::Format::R16G16B16A16_SFLOAT, RgImageState::UNDEFINED);

        builder.add_pass_lambda(
            "reader",
            RgQueue::Compute,
            |b| {
                b.read_image(history, RgImageState::SHADER_READ_COMPUTE);
                b.write_image(out, RgImageState::STORAGE_WRITE_COMPUTE);
            },
            noop,
        );
        builder.add_pass_lambda(
            "writer",
            RgQueue::Graphics,
            |b| {
                b.read_image(out, RgImageState::SHADER_READ_FRAGMENT);
                b.write_image(history, RgImageState::COLOR_ATTACHMENT_WRITE);
            },
            noop,
        );

        let graph = builder.compile().unwrap();
        assert_eq!(graph.execution_order(), &[0, 1]);
        assert_eq!(graph.waits_of("writer"), vec!["reader"]);

        let writer_wait = graph.sync(1).waits[0];
        assert!(writer_wait.stage.contains(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT));
        assert!(writer_wait.stage.contains(vk::PipelineStageFlags2::FRAGMENT_SHADER));

        // reader 没有写 history，不需要它的 barrier；writer 的转换挂在 semaphore wait 之后
        assert!(graph.pre_barriers(0).find_image(history).is_none());
        let transition = graph.pre_barriers(1).find_image(history).unwrap();
        assert_eq!(transition.mask.src_stage, vk::PipelineStageFlags2::ALL_COMMANDS);
        assert_eq!(transition.new_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
    }

    #[test]
    fn test_explicit_dependency_waits_on_all_commands() {
        let mut builder = RenderGraphBuilder::new();
        let first = builder.add_pass_lambda("first", RgQueue::Compute, |_| {}, noop);
        let last = builder.add_pass_lambda("last", RgQueue::Graphics, |_| {}, noop);
        builder.add_dependency(first, last);

        let graph = builder.compile().unwrap();
        assert_eq!(graph.waits_of("last"), vec!["first"]);
        assert_eq!(graph.sync(1).waits[0].stage, vk::PipelineStageFlags2::ALL_COMMANDS);
        assert!(graph.sync(0).signal);
    }

    #[test]
    fn test_buffer_export_for_host_readback() {
        let mut builder = RenderGraphBuilder::new();
        let counter = builder.import_buffer("counter", vk::Buffer::null(), RgBufferState::HOST_WRITTEN);
        let list = builder.import_buffer("list", vk::Buffer::null(), RgBufferState::UNDEFINED);
        let output = image(&mut builder, "output", vk::Format::B8G8R8A8_UNORM, RgImageState::UNDEFINED);
        builder.export_buffer(counter, RgBufferState::HOST_READ);

        builder.add_pass_lambda(
            "cull",
            RgQueue::Compute,
            |b| {
                b.read_write_buffer(counter, RgBufferState::STORAGE_READ_WRITE_COMPUTE);
                b.write_buffer(list, RgBufferState::STORAGE_WRITE_COMPUTE);
            },
            noop,
        );
        builder.add_pass_lambda(
            "draw",
            RgQueue::Graphics,
            |b| {
                b.read_buffer(list, RgBufferState::STORAGE_READ_FRAGMENT);
                b.write_image(output, RgImageState::COLOR_ATTACHMENT_WRITE);
            },
            noop,
        );

        let graph = builder.compile().unwrap();
        let cull = graph.pass_index("cull").unwrap();
        let export = graph.post_barriers(cull).find_buffer(counter).unwrap();
        assert_eq!(export.mask.src_stage, vk::PipelineStageFlags2::COMPUTE_SHADER);
        assert_eq!(export.mask.src_access, vk::AccessFlags2::SHADER_STORAGE_WRITE);
        assert_eq!(export.mask.dst_stage, vk::PipelineStageFlags2::HOST);
        assert_eq!(export.mask.dst_access, vk::AccessFlags2::HOST_READ);

        // 未导出的 buffer 不追加 barrier
        let draw = graph.pass_index("draw").unwrap();
        assert!(graph.post_barriers(draw).find_buffer(list).is_none());
        assert_eq!(graph.dependencies_of("draw"), vec!["cull"]);
    }
}
