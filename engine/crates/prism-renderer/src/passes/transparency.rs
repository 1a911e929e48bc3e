//! 基于 6 阶 power moment 的 OIT
//!
//! 每帧依次经过 `Prepare -> Absorbance -> Transmittance -> Composite`：
//! - absorbance 把透明片元的吸收率和 moment 加法混合到 `b0`、`b1..b4`、`b5..b6`
//! - transmittance 再画一次透明物体，用 moment 重建每个片元前方的透射率并累积颜色
//! - composition 把累积颜色叠加到不透明结果上
//!
//! 重建公式见 [`crate::reference::moments`]。

use std::cell::Cell;
use std::rc::Rc;

use ash::vk;

use prism_crate_tools::enumed_map;
use prism_crate_tools::resource::PrismPath;
use prism_gfx::descriptors::descriptor::{GfxBindingDesc, GfxDescriptorSet, GfxDescriptorSetLayout};
use prism_gfx::descriptors::descriptor_writer::GfxDescriptorWriter;
use prism_gfx::descriptors::sampler::GfxSampler;
use prism_gfx::pipelines::graphics_pipeline::{GfxGraphicsPipeline, GfxGraphicsPipelineCreateInfo};
use prism_gfx::pipelines::pipeline_layout::GfxPipelineLayout;
use prism_gfx::pipelines::shader::GfxShaderStageInfo;
use prism_render_graph::{RgBufferHandle, RgBufferState, RgImageHandle, RgImageState, RgPass, RgPassBuilder, RgPassContext};
use prism_render_interface::binding_cache::{BindingKey, OwnerId};
use prism_render_interface::descriptor_allocator::GfxDescriptorAllocator;
use prism_render_interface::gpu_data::{GpuDrawPushConstants, GpuOitDrawPushConstants, GpuOitParams, MeshVertex};
use prism_render_interface::render_settings::OitSettings;
use prism_scene::{Aabb, Camera};

use crate::passes::MeshDraw;
use crate::passes::gbuffer::GBufferTarget;

enumed_map!(pub OitTarget<vk::Format>: {
    B0: vk::Format::R32_SFLOAT,
    B1234: vk::Format::R32G32B32A32_SFLOAT,
    B56: vk::Format::R32G32_SFLOAT,
    Accum: vk::Format::R16G16B16A16_SFLOAT,
});
impl OitTarget {
    pub const MOMENTS: [OitTarget; 3] = [OitTarget::B0, OitTarget::B1234, OitTarget::B56];

    pub fn moment_formats() -> Vec<vk::Format> {
        Self::MOMENTS.iter().map(|target| *target.value()).collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OitPhase {
    Prepare,
    Absorbance,
    Transmittance,
    Composite,
}
impl OitPhase {
    #[inline]
    pub fn next(self) -> Self {
        match self {
            OitPhase::Prepare => OitPhase::Absorbance,
            OitPhase::Absorbance => OitPhase::Transmittance,
            OitPhase::Transmittance => OitPhase::Composite,
            OitPhase::Composite => OitPhase::Prepare,
        }
    }
}

/// 跟踪 OIT 当前所处的阶段
///
/// 各个 Pass 在录制时推进，录制是在 CPU 上按拓扑顺序串行进行的
#[derive(Debug)]
pub struct OitStateMachine {
    phase: Cell<OitPhase>,
}
impl Default for OitStateMachine {
    fn default() -> Self {
        Self {
            phase: Cell::new(OitPhase::Composite),
        }
    }
}
impl OitStateMachine {
    #[inline]
    pub fn phase(&self) -> OitPhase {
        self.phase.get()
    }

    pub fn advance(&self, next: OitPhase) -> anyhow::Result<()> {
        let current = self.phase.get();
        anyhow::ensure!(
            current.next() == next,
            "invalid oit transition {:?} -> {:?}, expected {:?}",
            current,
            next,
            current.next()
        );
        self.phase.set(next);
        Ok(())
    }
}

/// 由透明物体的包围球计算 moment 的深度范围
///
/// 没有透明物体时返回 `None`
pub fn prepare_oit_params(camera: &Camera, bounds: Option<Aabb>, settings: &OitSettings) -> Option<GpuOitParams> {
    let sphere = bounds?.bounding_sphere();
    let depth = camera.view_depth(sphere.center);
    let clamp = |d: f32| d.clamp(camera.near, camera.far);

    Some(GpuOitParams {
        ln_depth_min: clamp(depth - sphere.radius).ln(),
        ln_depth_max: clamp(depth + sphere.radius).ln(),
        moment_bias: settings.moment_bias,
        overestimation: settings.overestimation,
    })
}

/// 一次透明绘制，`draw.base_color.w` 是物体的 alpha
#[derive(Clone, Copy, Debug)]
pub struct OitDraw {
    pub mesh: MeshDraw,
    pub draw: GpuDrawPushConstants,
}

/// transmittance pass 的 set 1 需要的 moment view
#[derive(Clone, Copy, Debug)]
pub struct OitMomentViews {
    pub b0: vk::ImageView,
    pub b1234: vk::ImageView,
    pub b56: vk::ImageView,
}

pub struct OitPipelines {
    absorbance: GfxGraphicsPipeline,
    transmittance: GfxGraphicsPipeline,
    absorbance_layout: Rc<GfxPipelineLayout>,
    transmittance_layout: Rc<GfxPipelineLayout>,

    moment_set_layout: GfxDescriptorSetLayout,
    owner: OwnerId,
}
// new & init
impl OitPipelines {
    pub fn new(frame_set_layout: vk::DescriptorSetLayout, owner: OwnerId) -> anyhow::Result<Self> {
        let sampled = vk::DescriptorType::COMBINED_IMAGE_SAMPLER;
        let moment_set_layout = GfxDescriptorSetLayout::new(
            &[
                GfxBindingDesc::new(0, sampled, vk::ShaderStageFlags::FRAGMENT),
                GfxBindingDesc::new(1, sampled, vk::ShaderStageFlags::FRAGMENT),
                GfxBindingDesc::new(2, sampled, vk::ShaderStageFlags::FRAGMENT),
            ],
            "oit-moments",
        )?;

        let push_constant_range = vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
            .offset(0)
            .size(size_of::<GpuOitDrawPushConstants>() as u32);
        let absorbance_layout = Rc::new(GfxPipelineLayout::new(
            &[frame_set_layout],
            std::slice::from_ref(&push_constant_range),
            "oit-absorbance",
        )?);
        let transmittance_layout = Rc::new(GfxPipelineLayout::new(
            &[frame_set_layout, moment_set_layout.handle()],
            std::slice::from_ref(&push_constant_range),
            "oit-transmittance",
        )?);

        let mut absorbance_ci = Self::create_info("oit/absorbance.slang");
        absorbance_ci.attach_info(OitTarget::moment_formats(), Some(GBufferTarget::depth_format()));
        absorbance_ci.color_blend(vec![GfxGraphicsPipelineCreateInfo::additive_blend_state(); OitTarget::MOMENTS.len()]);
        let absorbance = GfxGraphicsPipeline::new(&absorbance_ci, absorbance_layout.clone(), "oit-absorbance")?;

        let mut transmittance_ci = Self::create_info("oit/transmittance.slang");
        transmittance_ci.attach_info(vec![*OitTarget::Accum.value()], Some(GBufferTarget::depth_format()));
        transmittance_ci.color_blend(vec![GfxGraphicsPipelineCreateInfo::additive_blend_state()]);
        let transmittance =
            GfxGraphicsPipeline::new(&transmittance_ci, transmittance_layout.clone(), "oit-transmittance")?;

        Ok(Self {
            absorbance,
            transmittance,
            absorbance_layout,
            transmittance_layout,
            moment_set_layout,
            owner,
        })
    }

    /// 双面、测试深度但不写深度
    fn create_info(shader: &str) -> GfxGraphicsPipelineCreateInfo {
        let shader_path = PrismPath::shader_build_path(shader);
        let mut ci = GfxGraphicsPipelineCreateInfo::default();
        ci.shader_stages(vec![
            GfxShaderStageInfo::new(vk::ShaderStageFlags::VERTEX, shader_path.clone(), c"vsmain"),
            GfxShaderStageInfo::new(vk::ShaderStageFlags::FRAGMENT, shader_path, c"psmain"),
        ]);
        ci.vertex_binding(MeshVertex::vertex_input_bindings());
        ci.vertex_attribute(MeshVertex::vertex_input_attributes());
        ci.cull_mode(vk::CullModeFlags::NONE, vk::FrontFace::COUNTER_CLOCKWISE);
        ci.depth_test(Some(vk::CompareOp::LESS), false);
        ci
    }
}
// tools
impl OitPipelines {
    /// 每个 present image 一组 moment 图像，也就一个 set
    pub fn moment_set(
        &self,
        allocator: &mut GfxDescriptorAllocator,
        image_index: usize,
        views: &OitMomentViews,
        sampler: &GfxSampler,
    ) -> anyhow::Result<GfxDescriptorSet> {
        let key = BindingKey::new(self.owner, image_index, 1);
        allocator.get_or_allocate(key, &self.moment_set_layout, &format!("oit-moments-{image_index}"), |set| {
            let ty = vk::DescriptorType::COMBINED_IMAGE_SAMPLER;
            let layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
            GfxDescriptorWriter::new()
                .image(0, ty, views.b0, layout, Some(sampler.handle()))
                .image(1, ty, views.b1234, layout, Some(sampler.handle()))
                .image(2, ty, views.b56, layout, Some(sampler.handle()))
                .update(set);
            Ok(())
        })
    }

    fn record_draws(
        cmd: &prism_gfx::commands::command_buffer::GfxCommandBuffer,
        layout: vk::PipelineLayout,
        draws: &[OitDraw],
        oit: GpuOitParams,
    ) {
        let stages = vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT;
        for draw in draws {
            let push = GpuOitDrawPushConstants { draw: draw.draw, oit };
            cmd.cmd_push_constants(layout, stages, 0, bytemuck::bytes_of(&push));
            draw.mesh.record(cmd);
        }
    }
}

fn read_only_depth(view: vk::ImageView) -> vk::RenderingAttachmentInfo<'static> {
    vk::RenderingAttachmentInfo::default()
        .image_view(view)
        .image_layout(vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL)
        .load_op(vk::AttachmentLoadOp::LOAD)
        .store_op(vk::AttachmentStoreOp::NONE)
}

fn cleared_color(view: vk::ImageView) -> vk::RenderingAttachmentInfo<'static> {
    vk::RenderingAttachmentInfo::default()
        .image_view(view)
        .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .clear_value(vk::ClearValue {
            color: vk::ClearColorValue { float32: [0.0; 4] },
        })
}

#[derive(Clone, Copy, Debug)]
pub struct OitAbsorbanceIo {
    pub per_frame: RgBufferHandle,
    pub depth: RgImageHandle,
    pub b0: RgImageHandle,
    pub b1234: RgImageHandle,
    pub b56: RgImageHandle,
}
impl OitAbsorbanceIo {
    pub fn declare(&self, builder: &mut RgPassBuilder) {
        builder.read_buffer(self.per_frame, RgBufferState::UNIFORM_GRAPHICS);
        builder.read_image(self.depth, RgImageState::DEPTH_ATTACHMENT_READ);
        // 先清零再累加，不依赖上一帧的内容
        for target in [self.b0, self.b1234, self.b56] {
            builder.write_image(target, RgImageState::COLOR_ATTACHMENT_READ_WRITE);
        }
    }
}

pub struct OitAbsorbancePass<'a> {
    pub io: OitAbsorbanceIo,
    pub pipelines: &'a OitPipelines,
    pub state: &'a OitStateMachine,
    pub frame_set: GfxDescriptorSet,
    pub draws: &'a [OitDraw],
    pub params: GpuOitParams,
    pub extent: vk::Extent2D,
}
impl RgPass for OitAbsorbancePass<'_> {
    fn setup(&mut self, builder: &mut RgPassBuilder) {
        self.io.declare(builder);
    }

    fn execute(&self, ctx: &RgPassContext<'_>) -> anyhow::Result<()> {
        let _span = tracy_client::span!("OitAbsorbancePass::execute");
        self.state.advance(OitPhase::Absorbance)?;

        let color_attachments = [
            cleared_color(ctx.image_view(self.io.b0)?),
            cleared_color(ctx.image_view(self.io.b1234)?),
            cleared_color(ctx.image_view(self.io.b56)?),
        ];
        let depth_attachment = read_only_depth(ctx.image_view(self.io.depth)?);
        let rendering_info = vk::RenderingInfo::default()
            .render_area(self.extent.into())
            .layer_count(1)
            .color_attachments(&color_attachments)
            .depth_attachment(&depth_attachment);

        let layout = self.pipelines.absorbance_layout.handle();
        ctx.cmd.cmd_begin_rendering(&rendering_info);
        ctx.cmd.cmd_set_full_viewport(self.extent);
        ctx.cmd.cmd_bind_pipeline(vk::PipelineBindPoint::GRAPHICS, self.pipelines.absorbance.handle());
        ctx.cmd.cmd_bind_descriptor_sets(vk::PipelineBindPoint::GRAPHICS, layout, 0, &[self.frame_set.handle()]);
        OitPipelines::record_draws(ctx.cmd, layout, self.draws, self.params);
        ctx.cmd.cmd_end_rendering();
        Ok(())
    }
}

#[derive(Clone, Copy, Debug)]
pub struct OitTransmittanceIo {
    pub per_frame: RgBufferHandle,
    pub point_lights: RgBufferHandle,
    pub light_lists: RgBufferHandle,
    pub depth: RgImageHandle,
    pub b0: RgImageHandle,
    pub b1234: RgImageHandle,
    pub b56: RgImageHandle,
    pub accum: RgImageHandle,
}
impl OitTransmittanceIo {
    pub fn declare(&self, builder: &mut RgPassBuilder) {
        builder.read_buffer(self.per_frame, RgBufferState::UNIFORM_GRAPHICS);
        builder.read_buffer(self.point_lights, RgBufferState::STORAGE_READ_FRAGMENT);
        builder.read_buffer(self.light_lists, RgBufferState::STORAGE_READ_FRAGMENT);
        builder.read_image(self.depth, RgImageState::DEPTH_ATTACHMENT_READ);
        for moment in [self.b0, self.b1234, self.b56] {
            builder.read_image(moment, RgImageState::SHADER_READ_FRAGMENT);
        }
        builder.write_image(self.accum, RgImageState::COLOR_ATTACHMENT_READ_WRITE);
    }
}

pub struct OitTransmittancePass<'a> {
    pub io: OitTransmittanceIo,
    pub pipelines: &'a OitPipelines,
    pub state: &'a OitStateMachine,
    pub frame_set: GfxDescriptorSet,
    pub moment_set: GfxDescriptorSet,
    pub draws: &'a [OitDraw],
    pub params: GpuOitParams,
    pub extent: vk::Extent2D,
}
impl RgPass for OitTransmittancePass<'_> {
    fn setup(&mut self, builder: &mut RgPassBuilder) {
        self.io.declare(builder);
    }

    fn execute(&self, ctx: &RgPassContext<'_>) -> anyhow::Result<()> {
        let _span = tracy_client::span!("OitTransmittancePass::execute");
        self.state.advance(OitPhase::Transmittance)?;

        let color_attachments = [cleared_color(ctx.image_view(self.io.accum)?)];
        let depth_attachment = read_only_depth(ctx.image_view(self.io.depth)?);
        let rendering_info = vk::RenderingInfo::default()
            .render_area(self.extent.into())
            .layer_count(1)
            .color_attachments(&color_attachments)
            .depth_attachment(&depth_attachment);

        let layout = self.pipelines.transmittance_layout.handle();
        ctx.cmd.cmd_begin_rendering(&rendering_info);
        ctx.cmd.cmd_set_full_viewport(self.extent);
        ctx.cmd.cmd_bind_pipeline(vk::PipelineBindPoint::GRAPHICS, self.pipelines.transmittance.handle());
        ctx.cmd.cmd_bind_descriptor_sets(
            vk::PipelineBindPoint::GRAPHICS,
            layout,
            0,
            &[self.frame_set.handle(), self.moment_set.handle()],
        );
        OitPipelines::record_draws(ctx.cmd, layout, self.draws, self.params);
        ctx.cmd.cmd_end_rendering();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;
    use crate::reference::moments::warp_depth;

    fn camera() -> Camera {
        Camera {
            near: 0.1,
            far: 100.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_phase_cycle() {
        let state = OitStateMachine::default();
        assert_eq!(state.phase(), OitPhase::Composite);

        for _ in 0..2 {
            for phase in [OitPhase::Prepare, OitPhase::Absorbance, OitPhase::Transmittance, OitPhase::Composite] {
                state.advance(phase).unwrap();
                assert_eq!(state.phase(), phase);
            }
        }
    }

    #[test]
    fn test_out_of_order_transition_is_error() {
        let state = OitStateMachine::default();
        assert!(state.advance(OitPhase::Absorbance).is_err());
        assert_eq!(state.phase(), OitPhase::Composite);

        state.advance(OitPhase::Prepare).unwrap();
        assert!(state.advance(OitPhase::Transmittance).is_err());
        assert!(state.advance(OitPhase::Prepare).is_err());
        state.advance(OitPhase::Absorbance).unwrap();
    }

    #[test]
    fn test_prepare_without_transparency() {
        assert!(prepare_oit_params(&camera(), None, &OitSettings::default()).is_none());
    }

    #[test]
    fn test_prepare_depth_bounds() {
        // 球心在 -10，半径 sqrt(3)
        let bounds = Aabb::from_center_extent(Vec3::new(0.0, 0.0, -10.0), Vec3::ONE);
        let params = prepare_oit_params(&camera(), Some(bounds), &OitSettings::default()).unwrap();

        let r = 3f32.sqrt();
        assert!((params.ln_depth_min - (10.0 - r).ln()).abs() < 1e-4);
        assert!((params.ln_depth_max - (10.0 + r).ln()).abs() < 1e-4);
        assert_eq!(params.moment_bias, 5e-5);
        assert_eq!(params.overestimation, 0.04);

        // 包围盒内的深度都映射到 [-1, 1] 内部
        let warped = warp_depth(10f64.ln(), params.ln_depth_min as f64, params.ln_depth_max as f64);
        assert!(warped.abs() < 0.1);
    }

    #[test]
    fn test_prepare_clamps_to_clip_range() {
        // 跨过近平面并超出远平面
        let bounds = Aabb::new(Vec3::new(-1.0, -1.0, -500.0), Vec3::new(1.0, 1.0, 1.0));
        let params = prepare_oit_params(&camera(), Some(bounds), &OitSettings::default()).unwrap();
        assert!((params.ln_depth_min - 0.1f32.ln()).abs() < 1e-6);
        assert!((params.ln_depth_max - 100f32.ln()).abs() < 1e-6);
    }

    #[test]
    fn test_moment_formats() {
        assert_eq!(
            OitTarget::moment_formats(),
            vec![vk::Format::R32_SFLOAT, vk::Format::R32G32B32A32_SFLOAT, vk::Format::R32G32_SFLOAT]
        );
        assert_eq!(*OitTarget::Accum.value(), vk::Format::R16G16B16A16_SFLOAT);
    }
}
