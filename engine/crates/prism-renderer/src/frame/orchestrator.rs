//! 帧编排器
//!
//! 每帧的流程：
//! ```ignore
//! slot.begin()         // 等待 slot 的 fence，回收命令缓冲区，回读截断统计
//! present.acquire()    // 第二个阻塞点
//! upload per-frame     // 相机、点光源快照、OIT 深度范围
//! build + compile      // 按 stage 加入 Pass，由帧图推导顺序、barrier 与跨 queue 同步
//! execute              // 每个 Pass 一个命令缓冲区，提交到各自的 queue
//! present.present()
//! ```

use anyhow::Context;
use ash::vk;
use itertools::Itertools;

use prism_gfx::commands::semaphore::GfxSemaphore;
use prism_gfx::gfx::Gfx;
use prism_render_graph::{RenderGraphBuilder, RgFrameContext, RgPassHandle, RgSemaphoreInfo};
use prism_render_interface::binding_cache::OwnerIdAllocator;
use prism_render_interface::descriptor_allocator::GfxDescriptorAllocator;
use prism_render_interface::frame_counter::FrameCounter;
use prism_render_interface::gfx_resource_manager::GfxResourceManager;
use prism_render_interface::render_settings::{DefaultRendererSettings, FrameSettings, RenderSettings};
use prism_render_interface::truncation_stats::TruncationStats;
use prism_scene::{MeshBatch, SceneView};

use crate::frame::extent_resources::{ExtentPlan, ExtentResources};
use crate::frame::frame_slot::FrameSlot;
use crate::frame::graph::{FrameFeatures, FrameImage, FrameStage, FrameTargets, frame_stages, import_frame_resources};
use crate::frame::per_frame::PerFrameInputs;
use crate::frame::present::{OverlayRenderer, PresentImage, PresentTarget};
use crate::passes::active_cluster_marker::{ActiveClusterMarkerPass, ActiveClusterMarkerPipeline};
use crate::passes::ambient_occlusion::{AoBlurPass, AoHorizonPass, AoPipelines, AoResolvePass, BlurDirection};
use crate::passes::cluster_builder::{ClusterBuilderPass, ClusterBuilderPipeline};
use crate::passes::composition::{CompositionPass, CompositionPipeline};
use crate::passes::frame_bindings::{FrameBindingBuffers, FrameBindings};
use crate::passes::gbuffer::{GBufferDraw, GBufferPass, GBufferPipeline, GBufferTarget};
use crate::passes::light_culler::{LightCullerPass, LightCullerPipeline, PointLightSnapshot};
use crate::passes::opaque_lighting::{OpaqueLightingPass, OpaqueLightingPipeline};
use crate::passes::transparency::{
    OitAbsorbancePass, OitDraw, OitPhase, OitPipelines, OitStateMachine, OitTransmittancePass,
    prepare_oit_params,
};
use crate::passes::{MeshDraw, PassSamplers};

/// 所有 Pass 的 pipeline，启动时创建，跨帧复用
struct FramePipelines {
    bindings: FrameBindings,
    gbuffer: GBufferPipeline,
    clusters: ClusterBuilderPipeline,
    marker: ActiveClusterMarkerPipeline,
    culler: LightCullerPipeline,
    ao: AoPipelines,
    oit: OitPipelines,
    lighting: OpaqueLightingPipeline,
    composition: CompositionPipeline,
}
impl FramePipelines {
    fn new(color_format: vk::Format) -> anyhow::Result<Self> {
        let _span = tracy_client::span!("FramePipelines::new");
        let mut owners = OwnerIdAllocator::new();

        let bindings = FrameBindings::new(owners.alloc()).context("frame bindings")?;
        let layout = bindings.layout().handle();
        Ok(Self {
            gbuffer: GBufferPipeline::new(layout, owners.alloc()).context("gbuffer pipeline")?,
            clusters: ClusterBuilderPipeline::new(layout).context("cluster builder pipeline")?,
            marker: ActiveClusterMarkerPipeline::new(layout, owners.alloc()).context("active cluster marker pipeline")?,
            culler: LightCullerPipeline::new(layout).context("light culler pipeline")?,
            ao: AoPipelines::new(layout, owners.alloc()).context("ao pipelines")?,
            oit: OitPipelines::new(layout, owners.alloc()).context("oit pipelines")?,
            lighting: OpaqueLightingPipeline::new(layout, owners.alloc()).context("opaque lighting pipeline")?,
            composition: CompositionPipeline::new(layout, color_format, owners.alloc())
                .context("composition pipeline")?,
            bindings,
        })
    }

    fn destroy(self) {
        self.gbuffer.destroy();
        self.ao.destroy();
    }
}

/// 一帧的绘制列表，在构建帧图之前解析完毕
#[derive(Default)]
struct FrameDraws {
    opaque: Vec<GBufferDraw>,
    transparent: Vec<OitDraw>,
}

pub struct FrameOrchestrator {
    frame_counter: FrameCounter,
    frame_settings: FrameSettings,
    /// 第 N 帧的最终 Pass signal N + 1，串行化相邻帧对分辨率相关资源的访问
    frame_timeline: GfxSemaphore,
    slots: Vec<FrameSlot>,
    /// 每个 present image 一个
    render_complete: Vec<GfxSemaphore>,

    resources: GfxResourceManager,
    descriptors: GfxDescriptorAllocator,
    samplers: PassSamplers,
    pipelines: FramePipelines,
    extent_resources: ExtentResources,

    oit_state: OitStateMachine,
    stats: TruncationStats,
    /// 上一次打印执行计划时的 stage 组合
    last_features: Option<FrameFeatures>,
}

// new & init
impl FrameOrchestrator {
    /// 调用前需要完成 [`Gfx::init`]
    pub fn new(present_target: &dyn PresentTarget, settings: &RenderSettings) -> anyhow::Result<Self> {
        let _span = tracy_client::span!("FrameOrchestrator::new");
        settings.validate().context("invalid render settings")?;

        let depth_format = GBufferTarget::depth_format();
        let supported = Gfx::get().find_supported_format(
            DefaultRendererSettings::DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT | vk::FormatFeatureFlags::SAMPLED_IMAGE,
        );
        anyhow::ensure!(supported.contains(&depth_format), "depth format {depth_format:?} is not supported");

        let frame_settings = FrameSettings {
            color_format: present_target.format(),
            depth_format,
            frame_extent: present_target.extent(),
        };
        log::info!(
            "frame orchestrator: {}x{} {:?}, {} frames in flight, {} present images",
            frame_settings.frame_extent.width,
            frame_settings.frame_extent.height,
            frame_settings.color_format,
            settings.frames_in_flight,
            present_target.image_count()
        );

        let frame_counter = FrameCounter::new(0, settings.frames_in_flight);
        let mut resources = GfxResourceManager::new();
        let plan = ExtentPlan::new(frame_settings.frame_extent, present_target.image_count());
        let extent_resources = ExtentResources::new(&plan, &mut resources).context("extent resources")?;

        Ok(Self {
            frame_timeline: GfxSemaphore::new_timeline(frame_counter.frame_id(), "frame-timeline")?,
            slots: Self::create_slots(settings.frames_in_flight)?,
            render_complete: Self::create_render_complete(present_target.image_count())?,
            frame_counter,
            frame_settings,
            resources,
            descriptors: GfxDescriptorAllocator::new()?,
            samplers: PassSamplers::new()?,
            pipelines: FramePipelines::new(frame_settings.color_format)?,
            extent_resources,
            oit_state: OitStateMachine::default(),
            stats: TruncationStats::default(),
            last_features: None,
        })
    }

    fn create_slots(fif_count: usize) -> anyhow::Result<Vec<FrameSlot>> {
        (0..fif_count).map(|i| FrameSlot::new((b'A' + (i % 26) as u8) as char)).try_collect()
    }

    fn create_render_complete(image_count: usize) -> anyhow::Result<Vec<GfxSemaphore>> {
        (0..image_count).map(|i| GfxSemaphore::new(&format!("render-complete-{i}"))).try_collect()
    }
}

// getters
impl FrameOrchestrator {
    #[inline]
    pub fn frame_counter(&self) -> &FrameCounter {
        &self.frame_counter
    }

    #[inline]
    pub fn frame_settings(&self) -> &FrameSettings {
        &self.frame_settings
    }

    /// 截断统计，滞后 frames in flight 帧
    #[inline]
    pub fn truncation_stats(&self) -> &TruncationStats {
        &self.stats
    }

    /// mesh、material 与贴图由资源层注册到这里
    #[inline]
    pub fn resources(&self) -> &GfxResourceManager {
        &self.resources
    }

    #[inline]
    pub fn resources_mut(&mut self) -> &mut GfxResourceManager {
        &mut self.resources
    }
}

// update
impl FrameOrchestrator {
    /// 渲染并呈现一帧，任何录制或提交错误都会向上返回
    pub fn render_frame(
        &mut self,
        scene: &dyn SceneView,
        present_target: &mut dyn PresentTarget,
        overlay: &dyn OverlayRenderer,
        settings: &RenderSettings,
    ) -> anyhow::Result<()> {
        let _span = tracy_client::span!("FrameOrchestrator::render_frame");
        let frame_name = self.frame_counter.frame_name();

        // 最小化时不渲染；必须在等待 fence 之前返回，否则下一帧会等待一个不会 signal 的 fence
        let extent = present_target.extent();
        if extent.width == 0 || extent.height == 0 {
            return Ok(());
        }
        if settings.frames_in_flight != self.frame_counter.fif_count() {
            self.set_frames_in_flight(settings.frames_in_flight)?;
        }
        if extent != self.frame_settings.frame_extent
            || present_target.format() != self.frame_settings.color_format
            || present_target.image_count() != self.render_complete.len()
        {
            self.resize(present_target)?;
        }

        self.begin_frame().with_context(|| format!("{frame_name} begin frame"))?;

        let image = {
            let _span = tracy_client::span!("acquire present image");
            present_target
                .acquire(self.slots[self.frame_counter.frame_slot()].image_acquired())
                .with_context(|| format!("{frame_name} acquire present image"))?
        };

        self.record_and_submit(scene, overlay, settings, &image, &frame_name)
            .with_context(|| format!("{frame_name} record frame graph"))?;

        {
            let _span = tracy_client::span!("present");
            present_target
                .present(image.index, &self.render_complete[image.index])
                .with_context(|| format!("{frame_name} present image {}", image.index))?;
        }

        self.frame_counter.next_frame();
        Ok(())
    }

    /// 分辨率或 present target 变化时重建所有与之相关的资源
    ///
    /// 旧资源交给延迟销毁队列，缓存的 descriptor set 全部失效
    pub fn resize(&mut self, present_target: &dyn PresentTarget) -> anyhow::Result<()> {
        let _span = tracy_client::span!("FrameOrchestrator::resize");
        let extent = present_target.extent();
        log::info!(
            "resize {}x{} -> {}x{}",
            self.frame_settings.frame_extent.width,
            self.frame_settings.frame_extent.height,
            extent.width,
            extent.height
        );
        Gfx::get().wait_idle()?;

        let frame_id = self.frame_counter.frame_id();
        let plan = ExtentPlan::new(extent, present_target.image_count());
        let new_resources = ExtentResources::new(&plan, &mut self.resources).context("recreate extent resources")?;
        std::mem::replace(&mut self.extent_resources, new_resources).retire(&mut self.resources, frame_id);
        log::debug!("{} resources waiting for release", self.resources.pending_destroy_count());
        self.descriptors.reset()?;

        if present_target.format() != self.pipelines.composition.color_format() {
            log::info!("present format {:?} -> {:?}", self.pipelines.composition.color_format(), present_target.format());
            let old = std::mem::replace(&mut self.pipelines, FramePipelines::new(present_target.format())?);
            old.destroy();
        }
        if present_target.image_count() != self.render_complete.len() {
            let old = std::mem::replace(
                &mut self.render_complete,
                Self::create_render_complete(present_target.image_count())?,
            );
            old.into_iter().for_each(GfxSemaphore::destroy);
        }

        self.frame_settings.color_format = present_target.format();
        self.frame_settings.frame_extent = extent;
        Ok(())
    }

    /// 改变 frames in flight 的数量，旧 slot 的截断统计在销毁前回读
    fn set_frames_in_flight(&mut self, fif_count: usize) -> anyhow::Result<()> {
        anyhow::ensure!(fif_count >= 1, "frames_in_flight must be at least 1");
        log::info!("frames in flight {} -> {}", self.frame_counter.fif_count(), fif_count);
        Gfx::get().wait_idle()?;

        for mut slot in std::mem::replace(&mut self.slots, Self::create_slots(fif_count)?) {
            slot.begin(&mut self.stats)?;
            slot.destroy();
        }
        self.frame_counter = FrameCounter::new(self.frame_counter.frame_id(), fif_count);
        // frame set 按 slot 缓存
        self.descriptors.reset()?;
        Ok(())
    }

    fn begin_frame(&mut self) -> anyhow::Result<()> {
        let _span = tracy_client::span!("FrameOrchestrator::begin_frame");
        let slot = &mut self.slots[self.frame_counter.frame_slot()];
        slot.begin(&mut self.stats)?;
        self.resources.cleanup(self.frame_counter.frame_id(), self.frame_counter.fif_count());
        Ok(())
    }

    /// 解析可见网格的绘制参数；材质有贴图时分配材质 set
    fn resolve_draws(&mut self, batches: &[MeshBatch], oit_enabled: bool) -> anyhow::Result<FrameDraws> {
        let _span = tracy_client::span!("resolve_draws");
        let mut draws = FrameDraws::default();
        for batch in batches {
            let mesh = MeshDraw::resolve(&self.resources, batch.mesh)?;
            let material = self.resources.material(batch.material)?;
            let mut push = GBufferPipeline::push_constants(batch.model, material);

            if batch.transparent {
                if oit_enabled {
                    push.base_color.w = batch.alpha;
                    draws.transparent.push(OitDraw { mesh, draw: push });
                }
                continue;
            }

            let material_set = if material.is_textured() {
                Some(self.pipelines.gbuffer.material_set(
                    &mut self.descriptors,
                    batch.material,
                    material,
                    &self.resources,
                    &self.samplers.linear,
                )?)
            } else {
                None
            };
            draws.opaque.push(GBufferDraw {
                mesh,
                push,
                material_set,
            });
        }
        Ok(draws)
    }

    fn record_and_submit(
        &mut self,
        scene: &dyn SceneView,
        overlay: &dyn OverlayRenderer,
        settings: &RenderSettings,
        image: &PresentImage,
        frame_name: &str,
    ) -> anyhow::Result<()> {
        let frame_id = self.frame_counter.frame_id();
        let slot_index = self.frame_counter.frame_slot();
        let layout = *self.extent_resources.layout();

        // per-frame 数据
        let camera = scene.camera();
        let point_lights = PointLightSnapshot::capture(&scene.point_lights());
        let directional_lights = scene.directional_lights();
        let per_frame = PerFrameInputs {
            camera,
            layout: &layout,
            directional_lights: &directional_lights,
            environment: scene.environment(),
            point_light_count: point_lights.count(),
            settings,
        }
        .build();
        self.slots[slot_index].upload(&per_frame, &point_lights)?;

        let draws = self.resolve_draws(&scene.visible_meshes(), settings.oit.enabled)?;
        let mut features = FrameFeatures::from_settings(settings, !draws.transparent.is_empty());
        let oit_params = if features.oit {
            let mut oit_camera = camera.clone();
            oit_camera.set_aspect_ratio(layout.extent.width, layout.extent.height);
            prepare_oit_params(&oit_camera, scene.transparent_bounds(), &settings.oit)
        } else {
            None
        };
        features.oit = oit_params.is_some();

        // descriptor set，需要在帧图借用 pipeline 之前分配
        let slot = &self.slots[slot_index];
        let frame_set = self.pipelines.bindings.get_or_allocate(
            &mut self.descriptors,
            slot_index,
            &FrameBindingBuffers {
                per_frame: slot.per_frame_buffer(),
                point_lights: slot.point_light_buffer(),
                clusters: self.extent_resources.clusters.buffer,
                light_lists: self.extent_resources.light_lists.buffer,
                active_flags: self.extent_resources.active_flags.buffer,
                overflow: slot.overflow_buffer(),
            },
        )?;
        let depth_view = self.extent_resources.gbuffer(GBufferTarget::Depth).view;
        let depth_set = self.pipelines.marker.depth_set(&mut self.descriptors, depth_view, &self.samplers.point)?;
        let ao_sets = self.pipelines.ao.sets(&mut self.descriptors, &self.extent_resources.ao_views(), &self.samplers)?;
        let ao_params = AoPipelines::params(&settings.ao, &layout);
        let moment_set = self.pipelines.oit.moment_set(
            &mut self.descriptors,
            image.index,
            &self.extent_resources.moment_views(image.index)?,
            &self.samplers.point,
        )?;
        let lighting_set = self.pipelines.lighting.lighting_set(
            &mut self.descriptors,
            &self.extent_resources.lighting_views(),
            scene.environment(),
            &self.resources,
            &self.samplers,
        )?;
        let composite_set = self.pipelines.composition.composite_set(
            &mut self.descriptors,
            image.index,
            &self.extent_resources.composition_views(image.index)?,
            &self.samplers.point,
        )?;

        let oit_images = self
            .extent_resources
            .oit
            .get(image.index)
            .with_context(|| format!("no oit targets for present image {}", image.index))?;
        let targets = FrameTargets {
            per_frame: slot.per_frame_buffer(),
            point_lights: slot.point_light_buffer(),
            overflow: slot.overflow_buffer(),
            clusters: self.extent_resources.clusters.buffer,
            light_lists: self.extent_resources.light_lists.buffer,
            active_flags: self.extent_resources.active_flags.buffer,
            gbuffer: std::array::from_fn(|i| self.extent_resources.gbuffer[i].frame_image()),
            ao_half: self.extent_resources.ao_half.frame_image(),
            ao_blur: self.extent_resources.ao_blur.frame_image(),
            ao_full: self.extent_resources.ao_full.frame_image(),
            lighting: self.extent_resources.lighting.frame_image(),
            oit: std::array::from_fn(|i| oit_images[i].frame_image()),
            present: FrameImage {
                image: image.image,
                view: image.view,
                format: self.frame_settings.color_format,
            },
        };
        let image_acquired = slot.image_acquired().clone();

        if features.oit {
            self.oit_state.advance(OitPhase::Prepare)?;
        }

        // 帧图
        let pipelines = &self.pipelines;
        let extent = layout.extent;
        let mut builder = RenderGraphBuilder::new();
        let imports = import_frame_resources(&mut builder, &targets);
        let mut composition: Option<RgPassHandle> = None;
        for stage in frame_stages(&features) {
            let (name, queue) = (stage.name(), stage.queue());
            let handle = match stage {
                FrameStage::GBuffer => builder.add_pass(
                    name,
                    queue,
                    GBufferPass {
                        io: imports.gbuffer_io(),
                        pipeline: &pipelines.gbuffer,
                        frame_set,
                        draws: &draws.opaque,
                        extent,
                    },
                ),
                FrameStage::Clusters => builder.add_pass(
                    name,
                    queue,
                    ClusterBuilderPass {
                        io: imports.cluster_builder_io(),
                        pipeline: &pipelines.clusters,
                        frame_set,
                        layout,
                    },
                ),
                FrameStage::ActiveClusters => builder.add_pass(
                    name,
                    queue,
                    ActiveClusterMarkerPass {
                        io: imports.active_cluster_marker_io(),
                        pipeline: &pipelines.marker,
                        frame_set,
                        depth_set,
                        layout,
                    },
                ),
                FrameStage::LightCulling => builder.add_pass(
                    name,
                    queue,
                    LightCullerPass {
                        io: imports.light_culler_io(features.depth_gating),
                        pipeline: &pipelines.culler,
                        frame_set,
                        layout,
                    },
                ),
                FrameStage::AoHorizon => builder.add_pass(
                    name,
                    queue,
                    AoHorizonPass {
                        io: imports.ao_horizon_io(),
                        pipelines: &pipelines.ao,
                        frame_set,
                        sets: ao_sets,
                        params: ao_params,
                        layout,
                    },
                ),
                FrameStage::AoBlurH | FrameStage::AoBlurV => {
                    let direction = match stage {
                        FrameStage::AoBlurH => BlurDirection::Horizontal,
                        _ => BlurDirection::Vertical,
                    };
                    builder.add_pass(
                        name,
                        queue,
                        AoBlurPass {
                            io: imports.ao_blur_io(direction),
                            direction,
                            pipelines: &pipelines.ao,
                            frame_set,
                            sets: ao_sets,
                            radius: settings.ao.blur_radius,
                            layout,
                        },
                    )
                }
                FrameStage::AoResolve => builder.add_pass(
                    name,
                    queue,
                    AoResolvePass {
                        io: imports.ao_resolve_io(features.ao),
                        pipelines: &pipelines.ao,
                        frame_set,
                        sets: ao_sets,
                        params: ao_params,
                        layout,
                    },
                ),
                FrameStage::OitAbsorbance | FrameStage::OitTransmittance => {
                    let params = oit_params.context("oit stage scheduled without depth bounds")?;
                    if stage == FrameStage::OitAbsorbance {
                        builder.add_pass(
                            name,
                            queue,
                            OitAbsorbancePass {
                                io: imports.oit_absorbance_io(),
                                pipelines: &pipelines.oit,
                                state: &self.oit_state,
                                frame_set,
                                draws: &draws.transparent,
                                params,
                                extent,
                            },
                        )
                    } else {
                        builder.add_pass(
                            name,
                            queue,
                            OitTransmittancePass {
                                io: imports.oit_transmittance_io(),
                                pipelines: &pipelines.oit,
                                state: &self.oit_state,
                                frame_set,
                                moment_set,
                                draws: &draws.transparent,
                                params,
                                extent,
                            },
                        )
                    }
                }
                FrameStage::Shading => builder.add_pass(
                    name,
                    queue,
                    OpaqueLightingPass {
                        io: imports.opaque_lighting_io(),
                        pipeline: &pipelines.lighting,
                        frame_set,
                        lighting_set,
                        layout,
                    },
                ),
                FrameStage::Composition => builder.add_pass(
                    name,
                    queue,
                    CompositionPass {
                        io: imports.composition_io(features.oit),
                        pipeline: &pipelines.composition,
                        oit_state: &self.oit_state,
                        overlay,
                        frame_set,
                        composite_set,
                        extent,
                    },
                ),
            };
            if stage == FrameStage::Composition {
                composition = Some(handle);
            }
        }

        let composition = composition.context("frame graph has no composition pass")?;
        builder.add_wait(
            composition,
            RgSemaphoreInfo::binary(image_acquired, vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT),
        );
        builder.add_signal(
            composition,
            RgSemaphoreInfo::binary(self.render_complete[image.index].clone(), vk::PipelineStageFlags2::ALL_COMMANDS),
        );

        let graph = {
            let _span = tracy_client::span!("compile frame graph");
            builder.compile().context("compile frame graph")?
        };
        if self.last_features != Some(features) {
            log::info!("frame graph stages changed: {features:?}");
            graph.print_execution_plan();
            self.last_features = Some(features);
        }

        let slot = &mut self.slots[slot_index];
        let fence = slot.fence().clone();
        let (command_pools, signals) = slot.graph_resources();
        let mut ctx = RgFrameContext {
            frame_id,
            frame_name,
            command_pools,
            signals,
            frame_timeline: Some(&self.frame_timeline),
            fence: Some(&fence),
        };
        let cmds = graph.execute(&mut ctx)?;

        slot.submitted(frame_id, point_lights.dropped, cmds);
        Ok(())
    }
}

// destroy
impl FrameOrchestrator {
    pub fn destroy(self) {
        let _span = tracy_client::span!("FrameOrchestrator::destroy");
        if let Err(e) = Gfx::get().wait_idle() {
            log::error!("wait idle before destroy failed: {e:?}");
        }

        for slot in self.slots {
            slot.destroy();
        }
        for semaphore in self.render_complete {
            semaphore.destroy();
        }
        self.frame_timeline.destroy();

        self.pipelines.destroy();
        drop(self.samplers);
        self.descriptors.destroy();

        let mut resources = self.resources;
        let frame_id = self.frame_counter.frame_id();
        self.extent_resources.retire(&mut resources, frame_id);
        resources.destroy();
        log::info!("frame orchestrator destroyed after {frame_id} frames, {:?}", self.stats);
    }
}
