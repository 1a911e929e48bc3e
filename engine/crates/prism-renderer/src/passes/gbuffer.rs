//! 不透明物体写入 G-buffer
//!
//! 两个 pipeline 变体：参数化 PBR 只使用 push constant，
//! 贴图 PBR 额外绑定每个材质一个的 descriptor set。
//! 绘制命令录制在 secondary command buffer 中，在主命令缓冲区的 dynamic rendering 范围内执行。

use std::rc::Rc;

use ash::vk;
use slotmap::Key;

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
use prism_render_interface::gfx_resource_manager::{GfxMaterial, GfxResourceManager};
use prism_render_interface::gpu_data::{GpuDrawPushConstants, MeshVertex};
use prism_render_interface::handles::GfxMaterialHandle;

use crate::passes::{MeshDraw, PassTexture};

enumed_map!(pub GBufferTarget<vk::Format>: {
    Normal: vk::Format::R16G16B16A16_SFLOAT,
    Albedo: vk::Format::R8G8B8A8_UNORM,
    MetalRoughness: vk::Format::R8G8_UNORM,
    Depth: vk::Format::D32_SFLOAT,
});
impl GBufferTarget {
    pub const COLOR: [GBufferTarget; 3] = [GBufferTarget::Normal, GBufferTarget::Albedo, GBufferTarget::MetalRoughness];

    pub fn color_formats() -> Vec<vk::Format> {
        Self::COLOR.iter().map(|target| *target.value()).collect()
    }

    #[inline]
    pub fn depth_format() -> vk::Format {
        *GBufferTarget::Depth.value()
    }
}

/// 一次不透明绘制
#[derive(Clone, Copy, Debug)]
pub struct GBufferDraw {
    pub mesh: MeshDraw,
    pub push: GpuDrawPushConstants,
    /// 有贴图的材质才有
    pub material_set: Option<GfxDescriptorSet>,
}

pub struct GBufferPipeline {
    parametric: GfxGraphicsPipeline,
    textured: GfxGraphicsPipeline,
    parametric_layout: Rc<GfxPipelineLayout>,
    textured_layout: Rc<GfxPipelineLayout>,

    material_set_layout: GfxDescriptorSetLayout,
    material_owner: OwnerId,
    /// 缺省贴图
    white: PassTexture,
}
// new & init
impl GBufferPipeline {
    pub fn new(frame_set_layout: vk::DescriptorSetLayout, material_owner: OwnerId) -> anyhow::Result<Self> {
        let material_set_layout = GfxDescriptorSetLayout::new(
            &[
                GfxBindingDesc::new(0, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, vk::ShaderStageFlags::FRAGMENT),
                GfxBindingDesc::new(1, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, vk::ShaderStageFlags::FRAGMENT),
            ],
            "gbuffer-material",
        )?;

        let push_constant_range = vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
            .offset(0)
            .size(size_of::<GpuDrawPushConstants>() as u32);
        let parametric_layout = Rc::new(GfxPipelineLayout::new(
            &[frame_set_layout],
            std::slice::from_ref(&push_constant_range),
            "gbuffer-parametric",
        )?);
        let textured_layout = Rc::new(GfxPipelineLayout::new(
            &[frame_set_layout, material_set_layout.handle()],
            std::slice::from_ref(&push_constant_range),
            "gbuffer-textured",
        )?);

        let parametric = GfxGraphicsPipeline::new(
            &Self::create_info("gbuffer/gbuffer_parametric.slang"),
            parametric_layout.clone(),
            "gbuffer-parametric",
        )?;
        let textured = GfxGraphicsPipeline::new(
            &Self::create_info("gbuffer/gbuffer_textured.slang"),
            textured_layout.clone(),
            "gbuffer-textured",
        )?;

        let white = PassTexture::upload(
            vk::Extent2D { width: 1, height: 1 },
            vk::Format::R8G8B8A8_UNORM,
            &[255, 255, 255, 255],
            "gbuffer-white",
        )?;

        Ok(Self {
            parametric,
            textured,
            parametric_layout,
            textured_layout,
            material_set_layout,
            material_owner,
            white,
        })
    }

    fn create_info(shader: &str) -> GfxGraphicsPipelineCreateInfo {
        let shader_path = PrismPath::shader_build_path(shader);
        let mut ci = GfxGraphicsPipelineCreateInfo::default();
        ci.shader_stages(vec![
            GfxShaderStageInfo::new(vk::ShaderStageFlags::VERTEX, shader_path.clone(), c"vsmain"),
            GfxShaderStageInfo::new(vk::ShaderStageFlags::FRAGMENT, shader_path, c"psmain"),
        ]);
        ci.attach_info(GBufferTarget::color_formats(), Some(GBufferTarget::depth_format()));
        ci.vertex_binding(MeshVertex::vertex_input_bindings());
        ci.vertex_attribute(MeshVertex::vertex_input_attributes());
        ci.depth_test(Some(vk::CompareOp::LESS), true);
        ci
    }
}
// tools
impl GBufferPipeline {
    /// 材质的 descriptor set，按材质 handle 缓存
    pub fn material_set(
        &self,
        allocator: &mut GfxDescriptorAllocator,
        handle: GfxMaterialHandle,
        material: &GfxMaterial,
        resources: &GfxResourceManager,
        sampler: &GfxSampler,
    ) -> anyhow::Result<GfxDescriptorSet> {
        let key = BindingKey::new(self.material_owner, handle.data().as_ffi() as usize, 1);
        let white = self.white.view.handle();
        let albedo = material.albedo_texture.map(|view| resources.image_view(view)).transpose()?.unwrap_or(white);
        let metal_roughness =
            material.metal_roughness_texture.map(|view| resources.image_view(view)).transpose()?.unwrap_or(white);

        allocator.get_or_allocate(key, &self.material_set_layout, "gbuffer-material", |set| {
            let ty = vk::DescriptorType::COMBINED_IMAGE_SAMPLER;
            GfxDescriptorWriter::new()
                .image(0, ty, albedo, vk::ImageLayout::GENERAL, Some(sampler.handle()))
                .image(1, ty, metal_roughness, vk::ImageLayout::GENERAL, Some(sampler.handle()))
                .update(set);
            Ok(())
        })
    }

    pub fn push_constants(model: glam::Mat4, material: &GfxMaterial) -> GpuDrawPushConstants {
        GpuDrawPushConstants {
            model,
            base_color: material.base_color,
            metallic: material.metallic,
            roughness: material.roughness,
            _padding_0: [0.0; 2],
        }
    }
}
// destroy
impl GBufferPipeline {
    pub fn destroy(self) {
        self.white.destroy();
    }
}

#[derive(Clone, Copy, Debug)]
pub struct GBufferIo {
    pub per_frame: RgBufferHandle,
    pub normal: RgImageHandle,
    pub albedo: RgImageHandle,
    pub metal_roughness: RgImageHandle,
    pub depth: RgImageHandle,
}
impl GBufferIo {
    pub fn declare(&self, builder: &mut RgPassBuilder) {
        builder.read_buffer(self.per_frame, RgBufferState::UNIFORM_GRAPHICS);
        for target in self.color_targets() {
            builder.write_image(target, RgImageState::COLOR_ATTACHMENT_WRITE);
        }
        builder.write_image(self.depth, RgImageState::DEPTH_ATTACHMENT_WRITE);
    }

    #[inline]
    fn color_targets(&self) -> [RgImageHandle; 3] {
        [self.normal, self.albedo, self.metal_roughness]
    }
}

pub struct GBufferPass<'a> {
    pub io: GBufferIo,
    pub pipeline: &'a GBufferPipeline,
    pub frame_set: GfxDescriptorSet,
    pub draws: &'a [GBufferDraw],
    pub extent: vk::Extent2D,
}
impl RgPass for GBufferPass<'_> {
    fn setup(&mut self, builder: &mut RgPassBuilder) {
        self.io.declare(builder);
    }

    fn execute(&self, ctx: &RgPassContext<'_>) -> anyhow::Result<()> {
        let _span = tracy_client::span!("GBufferPass::execute");

        let color_attachments = self
            .io
            .color_targets()
            .into_iter()
            .map(|target| {
                Ok(vk::RenderingAttachmentInfo::default()
                    .image_view(ctx.image_view(target)?)
                    .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .load_op(vk::AttachmentLoadOp::CLEAR)
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .clear_value(vk::ClearValue {
                        color: vk::ClearColorValue { float32: [0.0; 4] },
                    }))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        let depth_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(ctx.image_view(self.io.depth)?)
            .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
            });
        let rendering_info = vk::RenderingInfo::default()
            .flags(vk::RenderingFlags::CONTENTS_SECONDARY_COMMAND_BUFFERS)
            .render_area(self.extent.into())
            .layer_count(1)
            .color_attachments(&color_attachments)
            .depth_attachment(&depth_attachment);

        let secondary = ctx.alloc_secondary("draws")?;
        secondary.begin_secondary(&GBufferTarget::color_formats(), GBufferTarget::depth_format(), "gbuffer-draws")?;
        self.record_draws(&secondary);
        secondary.end()?;

        ctx.cmd.cmd_begin_rendering(&rendering_info);
        ctx.cmd.cmd_execute_commands(std::slice::from_ref(&secondary));
        ctx.cmd.cmd_end_rendering();
        Ok(())
    }
}
impl GBufferPass<'_> {
    fn record_draws(&self, cmd: &prism_gfx::commands::command_buffer::GfxCommandBuffer) {
        cmd.cmd_set_full_viewport(self.extent);

        // 先画参数化材质，再画贴图材质，减少 pipeline 切换
        let (parametric, textured): (Vec<&GBufferDraw>, Vec<&GBufferDraw>) =
            self.draws.iter().partition(|draw| draw.material_set.is_none());

        let stages = vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT;
        let variants = [
            (&self.pipeline.parametric, &self.pipeline.parametric_layout, parametric),
            (&self.pipeline.textured, &self.pipeline.textured_layout, textured),
        ];
        for (pipeline, layout, draws) in variants {
            if draws.is_empty() {
                continue;
            }
            cmd.cmd_bind_pipeline(vk::PipelineBindPoint::GRAPHICS, pipeline.handle());
            cmd.cmd_bind_descriptor_sets(vk::PipelineBindPoint::GRAPHICS, layout.handle(), 0, &[self.frame_set.handle()]);

            for draw in draws {
                if let Some(material_set) = draw.material_set {
                    cmd.cmd_bind_descriptor_sets(
                        vk::PipelineBindPoint::GRAPHICS,
                        layout.handle(),
                        1,
                        &[material_set.handle()],
                    );
                }
                cmd.cmd_push_constants(layout.handle(), stages, 0, bytemuck::bytes_of(&draw.push));
                draw.mesh.record(cmd);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gbuffer_formats() {
        assert_eq!(GBufferTarget::COUNT, 4);
        assert_eq!(
            GBufferTarget::color_formats(),
            vec![vk::Format::R16G16B16A16_SFLOAT, vk::Format::R8G8B8A8_UNORM, vk::Format::R8G8_UNORM]
        );
        assert_eq!(GBufferTarget::depth_format(), vk::Format::D32_SFLOAT);
        assert!(GBufferTarget::iter().all(|t| t == GBufferTarget::Depth || GBufferTarget::COLOR.contains(&t)));
    }

    #[test]
    fn test_push_constants_follow_material() {
        let material = GfxMaterial {
            base_color: glam::Vec4::new(0.5, 0.25, 1.0, 0.75),
            metallic: 0.9,
            roughness: 0.1,
            ..Default::default()
        };
        let model = glam::Mat4::from_translation(glam::Vec3::X);
        let push = GBufferPipeline::push_constants(model, &material);
        assert_eq!(push.model, model);
        assert_eq!(push.base_color, material.base_color);
        assert_eq!((push.metallic, push.roughness), (0.9, 0.1));
    }
}
