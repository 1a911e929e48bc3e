//! 不透明物体的延迟着色
//!
//! 读取 G-buffer 与全分辨率 AO，按像素所在 cluster 的光源列表累加点光源，
//! 再加上方向光和乘以 AO 的环境光；没有几何的像素输出天空盒。

use ash::vk;
use slotmap::Key;

use prism_gfx::descriptors::descriptor::{GfxBindingDesc, GfxDescriptorSet, GfxDescriptorSetLayout};
use prism_gfx::descriptors::descriptor_writer::GfxDescriptorWriter;
use prism_render_graph::{RgBufferHandle, RgBufferState, RgImageHandle, RgImageState, RgPass, RgPassBuilder, RgPassContext};
use prism_render_interface::binding_cache::{BindingKey, OwnerId};
use prism_render_interface::descriptor_allocator::GfxDescriptorAllocator;
use prism_render_interface::gfx_resource_manager::GfxResourceManager;
use prism_scene::Environment;

use crate::passes::PassSamplers;
use crate::passes::compute_pass::ComputePass;
use crate::viewport::ViewportLayout;

pub const LIGHTING_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;

/// set 1 中的 binding 编号，与 `shader/src/lighting/shading.slang` 一致
struct LightingBinding;
impl LightingBinding {
    const NORMAL: u32 = 0;
    const ALBEDO: u32 = 1;
    const METAL_ROUGHNESS: u32 = 2;
    const DEPTH: u32 = 3;
    const AO: u32 = 4;
    const IRRADIANCE: u32 = 5;
    const PREFILTERED: u32 = 6;
    const SKYBOX: u32 = 7;
    const OUTPUT: u32 = 8;
}

#[derive(Clone, Copy, Debug)]
pub struct OpaqueLightingViews {
    pub normal: vk::ImageView,
    pub albedo: vk::ImageView,
    pub metal_roughness: vk::ImageView,
    pub depth: vk::ImageView,
    pub ao: vk::ImageView,
    pub lighting: vk::ImageView,
}

pub struct OpaqueLightingPipeline {
    compute: ComputePass<()>,
    set_layout: GfxDescriptorSetLayout,
    owner: OwnerId,
}
// new & init
impl OpaqueLightingPipeline {
    pub fn new(frame_set_layout: vk::DescriptorSetLayout, owner: OwnerId) -> anyhow::Result<Self> {
        let sampled = vk::DescriptorType::COMBINED_IMAGE_SAMPLER;
        let stage = vk::ShaderStageFlags::COMPUTE;
        let set_layout = GfxDescriptorSetLayout::new(
            &[
                GfxBindingDesc::new(LightingBinding::NORMAL, sampled, stage),
                GfxBindingDesc::new(LightingBinding::ALBEDO, sampled, stage),
                GfxBindingDesc::new(LightingBinding::METAL_ROUGHNESS, sampled, stage),
                GfxBindingDesc::new(LightingBinding::DEPTH, sampled, stage),
                GfxBindingDesc::new(LightingBinding::AO, sampled, stage),
                GfxBindingDesc::new(LightingBinding::IRRADIANCE, sampled, stage),
                GfxBindingDesc::new(LightingBinding::PREFILTERED, sampled, stage),
                GfxBindingDesc::new(LightingBinding::SKYBOX, sampled, stage),
                GfxBindingDesc::new(LightingBinding::OUTPUT, vk::DescriptorType::STORAGE_IMAGE, stage),
            ],
            "opaque-lighting",
        )?;
        let compute = ComputePass::new(
            "lighting/shading.slang",
            &[frame_set_layout, set_layout.handle()],
            "opaque-lighting",
        )?;
        Ok(Self {
            compute,
            set_layout,
            owner,
        })
    }
}
// tools
impl OpaqueLightingPipeline {
    /// 按环境贴图区分缓存；没有环境光时 5..=7 不写入，shader 根据 per-frame 中的开关跳过
    pub fn lighting_set(
        &self,
        allocator: &mut GfxDescriptorAllocator,
        views: &OpaqueLightingViews,
        environment: Option<&Environment>,
        resources: &GfxResourceManager,
        samplers: &PassSamplers,
    ) -> anyhow::Result<GfxDescriptorSet> {
        let env_views = environment
            .map(|env| -> anyhow::Result<_> {
                Ok([
                    resources.image_view(env.irradiance)?,
                    resources.image_view(env.prefiltered)?,
                    resources.image_view(env.skybox)?,
                ])
            })
            .transpose()?;
        let slot = environment.map_or(0, |env| env.irradiance.data().as_ffi() as usize);

        allocator.get_or_allocate(BindingKey::new(self.owner, slot, 1), &self.set_layout, "opaque-lighting", |set| {
            let sampled = vk::DescriptorType::COMBINED_IMAGE_SAMPLER;
            let read_only = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
            let point = Some(samplers.point.handle());
            let linear = Some(samplers.linear.handle());

            let mut writer = GfxDescriptorWriter::new()
                .image(LightingBinding::NORMAL, sampled, views.normal, read_only, point)
                .image(LightingBinding::ALBEDO, sampled, views.albedo, read_only, point)
                .image(LightingBinding::METAL_ROUGHNESS, sampled, views.metal_roughness, read_only, point)
                .image(
                    LightingBinding::DEPTH,
                    sampled,
                    views.depth,
                    vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
                    point,
                )
                .image(LightingBinding::AO, sampled, views.ao, read_only, point)
                .image(
                    LightingBinding::OUTPUT,
                    vk::DescriptorType::STORAGE_IMAGE,
                    views.lighting,
                    vk::ImageLayout::GENERAL,
                    None,
                );
            if let Some([irradiance, prefiltered, skybox]) = env_views {
                writer = writer
                    .image(LightingBinding::IRRADIANCE, sampled, irradiance, read_only, linear)
                    .image(LightingBinding::PREFILTERED, sampled, prefiltered, read_only, linear)
                    .image(LightingBinding::SKYBOX, sampled, skybox, read_only, linear);
            }
            writer.update(set);
            Ok(())
        })
    }
}

#[derive(Clone, Copy, Debug)]
pub struct OpaqueLightingIo {
    pub per_frame: RgBufferHandle,
    pub point_lights: RgBufferHandle,
    pub light_lists: RgBufferHandle,
    pub normal: RgImageHandle,
    pub albedo: RgImageHandle,
    pub metal_roughness: RgImageHandle,
    pub depth: RgImageHandle,
    pub ao: RgImageHandle,
    pub lighting: RgImageHandle,
}
impl OpaqueLightingIo {
    pub fn declare(&self, builder: &mut RgPassBuilder) {
        builder.read_buffer(self.per_frame, RgBufferState::UNIFORM_COMPUTE);
        builder.read_buffer(self.point_lights, RgBufferState::STORAGE_READ_COMPUTE);
        builder.read_buffer(self.light_lists, RgBufferState::STORAGE_READ_COMPUTE);
        for gbuffer in [self.normal, self.albedo, self.metal_roughness] {
            builder.read_image(gbuffer, RgImageState::SHADER_READ_COMPUTE);
        }
        builder.read_image(self.depth, RgImageState::DEPTH_READ_COMPUTE);
        builder.read_image(self.ao, RgImageState::SHADER_READ_COMPUTE);
        builder.write_image(self.lighting, RgImageState::STORAGE_WRITE_COMPUTE);
    }
}

pub struct OpaqueLightingPass<'a> {
    pub io: OpaqueLightingIo,
    pub pipeline: &'a OpaqueLightingPipeline,
    pub frame_set: GfxDescriptorSet,
    pub lighting_set: GfxDescriptorSet,
    pub layout: ViewportLayout,
}
impl RgPass for OpaqueLightingPass<'_> {
    fn setup(&mut self, builder: &mut RgPassBuilder) {
        self.io.declare(builder);
    }

    fn execute(&self, ctx: &RgPassContext<'_>) -> anyhow::Result<()> {
        let _span = tracy_client::span!("OpaqueLightingPass::execute");
        self.pipeline.compute.exec(
            ctx.cmd,
            &[self.frame_set, self.lighting_set],
            &(),
            ViewportLayout::image_groups(self.layout.extent),
        );
        Ok(())
    }
}
