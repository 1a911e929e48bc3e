//! 最终合成：不透明光照结果 + OIT 累积颜色 → present image
//!
//! 全屏三角形，overlay 在同一个 rendering 范围内绘制

use std::rc::Rc;

use ash::vk;

use prism_crate_tools::resource::PrismPath;
use prism_gfx::descriptors::descriptor::{GfxBindingDesc, GfxDescriptorSet, GfxDescriptorSetLayout};
use prism_gfx::descriptors::descriptor_writer::GfxDescriptorWriter;
use prism_gfx::descriptors::sampler::GfxSampler;
use prism_gfx::pipelines::graphics_pipeline::{GfxGraphicsPipeline, GfxGraphicsPipelineCreateInfo};
use prism_gfx::pipelines::pipeline_layout::GfxPipelineLayout;
use prism_gfx::pipelines::shader::GfxShaderStageInfo;
use prism_render_graph::{RgImageHandle, RgImageState, RgPass, RgPassBuilder, RgPassContext};
use prism_render_interface::binding_cache::{BindingKey, OwnerId};
use prism_render_interface::descriptor_allocator::GfxDescriptorAllocator;
use prism_render_interface::gpu_data::GpuCompositeParams;

use crate::frame::present::OverlayRenderer;
use crate::passes::transparency::{OitPhase, OitStateMachine};

#[derive(Clone, Copy, Debug)]
pub struct CompositionViews {
    pub lighting: vk::ImageView,
    pub b0: vk::ImageView,
    pub accum: vk::ImageView,
}

pub struct CompositionPipeline {
    pipeline: GfxGraphicsPipeline,
    layout: Rc<GfxPipelineLayout>,
    set_layout: GfxDescriptorSetLayout,
    color_format: vk::Format,
    owner: OwnerId,
}
// new & init
impl CompositionPipeline {
    pub fn new(
        frame_set_layout: vk::DescriptorSetLayout,
        color_format: vk::Format,
        owner: OwnerId,
    ) -> anyhow::Result<Self> {
        let sampled = vk::DescriptorType::COMBINED_IMAGE_SAMPLER;
        let stage = vk::ShaderStageFlags::FRAGMENT;
        let set_layout = GfxDescriptorSetLayout::new(
            &[
                GfxBindingDesc::new(0, sampled, stage),
                GfxBindingDesc::new(1, sampled, stage),
                GfxBindingDesc::new(2, sampled, stage),
            ],
            "composition",
        )?;
        let push_constant_range = vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::FRAGMENT)
            .offset(0)
            .size(size_of::<GpuCompositeParams>() as u32);
        let layout = Rc::new(GfxPipelineLayout::new(
            &[frame_set_layout, set_layout.handle()],
            std::slice::from_ref(&push_constant_range),
            "composition",
        )?);

        let shader_path = PrismPath::shader_build_path("composition/composite.slang");
        let mut ci = GfxGraphicsPipelineCreateInfo::default();
        ci.shader_stages(vec![
            GfxShaderStageInfo::new(vk::ShaderStageFlags::VERTEX, shader_path.clone(), c"vsmain"),
            GfxShaderStageInfo::new(vk::ShaderStageFlags::FRAGMENT, shader_path, c"psmain"),
        ]);
        ci.attach_info(vec![color_format], None);
        ci.cull_mode(vk::CullModeFlags::NONE, vk::FrontFace::COUNTER_CLOCKWISE);
        ci.depth_test(None, false);
        let pipeline = GfxGraphicsPipeline::new(&ci, layout.clone(), "composition")?;

        Ok(Self {
            pipeline,
            layout,
            set_layout,
            color_format,
            owner,
        })
    }
}
// getters
impl CompositionPipeline {
    /// present target 的格式变化时需要重建
    #[inline]
    pub fn color_format(&self) -> vk::Format {
        self.color_format
    }
}
// tools
impl CompositionPipeline {
    /// 每个 present image 一个 set，OIT 目标也是按 present image 分配的
    pub fn composite_set(
        &self,
        allocator: &mut GfxDescriptorAllocator,
        image_index: usize,
        views: &CompositionViews,
        sampler: &GfxSampler,
    ) -> anyhow::Result<GfxDescriptorSet> {
        let key = BindingKey::new(self.owner, image_index, 1);
        allocator.get_or_allocate(key, &self.set_layout, &format!("composition-{image_index}"), |set| {
            let ty = vk::DescriptorType::COMBINED_IMAGE_SAMPLER;
            let layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
            GfxDescriptorWriter::new()
                .image(0, ty, views.lighting, layout, Some(sampler.handle()))
                .image(1, ty, views.b0, layout, Some(sampler.handle()))
                .image(2, ty, views.accum, layout, Some(sampler.handle()))
                .update(set);
            Ok(())
        })
    }
}

/// 本帧有透明物体时合成需要读取的 OIT 目标
#[derive(Clone, Copy, Debug)]
pub struct OitComposite {
    pub b0: RgImageHandle,
    pub accum: RgImageHandle,
}

#[derive(Clone, Copy, Debug)]
pub struct CompositionIo {
    pub lighting: RgImageHandle,
    pub oit: Option<OitComposite>,
    pub present: RgImageHandle,
}
impl CompositionIo {
    pub fn declare(&self, builder: &mut RgPassBuilder) {
        builder.read_image(self.lighting, RgImageState::SHADER_READ_FRAGMENT);
        if let Some(oit) = self.oit {
            builder.read_image(oit.b0, RgImageState::SHADER_READ_FRAGMENT);
            builder.read_image(oit.accum, RgImageState::SHADER_READ_FRAGMENT);
        }
        builder.write_image(self.present, RgImageState::COLOR_ATTACHMENT_WRITE);
    }
}

pub struct CompositionPass<'a> {
    pub io: CompositionIo,
    pub pipeline: &'a CompositionPipeline,
    pub oit_state: &'a OitStateMachine,
    pub overlay: &'a dyn OverlayRenderer,
    pub frame_set: GfxDescriptorSet,
    pub composite_set: GfxDescriptorSet,
    pub extent: vk::Extent2D,
}
impl RgPass for CompositionPass<'_> {
    fn setup(&mut self, builder: &mut RgPassBuilder) {
        self.io.declare(builder);
    }

    fn execute(&self, ctx: &RgPassContext<'_>) -> anyhow::Result<()> {
        let _span = tracy_client::span!("CompositionPass::execute");
        let oit_active = self.io.oit.is_some();
        if oit_active {
            self.oit_state.advance(OitPhase::Composite)?;
        }

        let color_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(ctx.image_view(self.io.present)?)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::DONT_CARE)
            .store_op(vk::AttachmentStoreOp::STORE);
        let rendering_info = vk::RenderingInfo::default()
            .render_area(self.extent.into())
            .layer_count(1)
            .color_attachments(std::slice::from_ref(&color_attachment));

        let params = GpuCompositeParams {
            oit_active: oit_active as u32,
            _padding_0: [0; 3],
        };

        ctx.cmd.cmd_begin_rendering(&rendering_info);
        ctx.cmd.cmd_set_full_viewport(self.extent);
        ctx.cmd.cmd_bind_pipeline(vk::PipelineBindPoint::GRAPHICS, self.pipeline.pipeline.handle());
        ctx.cmd.cmd_bind_descriptor_sets(
            vk::PipelineBindPoint::GRAPHICS,
            self.pipeline.layout.handle(),
            0,
            &[self.frame_set.handle(), self.composite_set.handle()],
        );
        ctx.cmd.cmd_push_constants(
            self.pipeline.layout.handle(),
            vk::ShaderStageFlags::FRAGMENT,
            0,
            bytemuck::bytes_of(&params),
        );
        ctx.cmd.cmd_draw(3, 1, 0, 0);

        self.overlay.draw(ctx.cmd, self.extent)?;
        ctx.cmd.cmd_end_rendering();
        Ok(())
    }
}
