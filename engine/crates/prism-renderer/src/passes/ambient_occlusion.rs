//! 半分辨率的 horizon-based AO
//!
//! horizon → 水平模糊 → 垂直模糊 → 上采样到全分辨率。
//! 关闭时只保留 resolve，输出恒为 1.0，shading 不需要区分两种情况。

use ash::vk;
use rand::SeedableRng;

use prism_gfx::descriptors::descriptor::{GfxBindingDesc, GfxDescriptorSet, GfxDescriptorSetLayout};
use prism_gfx::descriptors::descriptor_writer::GfxDescriptorWriter;
use prism_render_graph::{RgBufferHandle, RgBufferState, RgImageHandle, RgImageState, RgPass, RgPassBuilder, RgPassContext};
use prism_render_interface::binding_cache::{BindingKey, OwnerId};
use prism_render_interface::descriptor_allocator::GfxDescriptorAllocator;
use prism_render_interface::gpu_data::{GpuAoParams, GpuBlurPushConstants};
use prism_render_interface::render_settings::AoSettings;

use crate::passes::compute_pass::ComputePass;
use crate::passes::{PassSamplers, PassTexture};
use crate::reference::ao::{NOISE_SIZE, blur_half_kernel, rotation_noise};
use crate::viewport::ViewportLayout;

pub const AO_FORMAT: vk::Format = vk::Format::R16_SFLOAT;

/// 写入 AO descriptor set 的 view
#[derive(Clone, Copy, Debug)]
pub struct AoViews {
    pub depth: vk::ImageView,
    pub normal: vk::ImageView,
    pub ao_half: vk::ImageView,
    pub ao_blur: vk::ImageView,
    pub ao_full: vk::ImageView,
}

/// 各个 AO pass 的 set 1
#[derive(Clone, Copy, Debug)]
pub struct AoSets {
    pub horizon: GfxDescriptorSet,
    pub blur_h: GfxDescriptorSet,
    pub blur_v: GfxDescriptorSet,
    pub resolve: GfxDescriptorSet,
}

pub struct AoPipelines {
    horizon: ComputePass<GpuAoParams>,
    blur: ComputePass<GpuBlurPushConstants>,
    resolve: ComputePass<GpuAoParams>,

    horizon_set_layout: GfxDescriptorSetLayout,
    /// blur 和 resolve 都是 "采样一张，写一张"
    filter_set_layout: GfxDescriptorSetLayout,

    noise: PassTexture,
    owner: OwnerId,
}
// new & init
impl AoPipelines {
    pub fn new(frame_set_layout: vk::DescriptorSetLayout, owner: OwnerId) -> anyhow::Result<Self> {
        let sampled = vk::DescriptorType::COMBINED_IMAGE_SAMPLER;
        let storage = vk::DescriptorType::STORAGE_IMAGE;
        let stage = vk::ShaderStageFlags::COMPUTE;

        let horizon_set_layout = GfxDescriptorSetLayout::new(
            &[
                GfxBindingDesc::new(0, sampled, stage),
                GfxBindingDesc::new(1, sampled, stage),
                GfxBindingDesc::new(2, sampled, stage),
                GfxBindingDesc::new(3, storage, stage),
            ],
            "ao-horizon",
        )?;
        let filter_set_layout = GfxDescriptorSetLayout::new(
            &[GfxBindingDesc::new(0, sampled, stage), GfxBindingDesc::new(1, storage, stage)],
            "ao-filter",
        )?;

        let horizon = ComputePass::new(
            "ao/horizon.slang",
            &[frame_set_layout, horizon_set_layout.handle()],
            "ao-horizon",
        )?;
        let blur = ComputePass::new("ao/blur.slang", &[frame_set_layout, filter_set_layout.handle()], "ao-blur")?;
        let resolve =
            ComputePass::new("ao/resolve.slang", &[frame_set_layout, filter_set_layout.handle()], "ao-resolve")?;

        let mut rng = rand::rngs::StdRng::from_entropy();
        let noise = PassTexture::upload(
            vk::Extent2D {
                width: NOISE_SIZE,
                height: NOISE_SIZE,
            },
            vk::Format::R8G8B8A8_UNORM,
            &rotation_noise(&mut rng),
            "ao-noise",
        )?;

        Ok(Self {
            horizon,
            blur,
            resolve,
            horizon_set_layout,
            filter_set_layout,
            noise,
            owner,
        })
    }
}
// tools
impl AoPipelines {
    /// AO 的 set 都只依赖分辨率相关的图像，resize 后随缓存一起失效
    pub fn sets(
        &self,
        allocator: &mut GfxDescriptorAllocator,
        views: &AoViews,
        samplers: &PassSamplers,
    ) -> anyhow::Result<AoSets> {
        let sampled = vk::DescriptorType::COMBINED_IMAGE_SAMPLER;
        let storage = vk::DescriptorType::STORAGE_IMAGE;
        let point = samplers.point.handle();
        let linear = samplers.linear.handle();

        let horizon = allocator.get_or_allocate(
            BindingKey::new(self.owner, 0, 1),
            &self.horizon_set_layout,
            "ao-horizon",
            |set| {
                GfxDescriptorWriter::new()
                    .image(0, sampled, views.depth, vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL, Some(point))
                    .image(1, sampled, views.normal, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL, Some(point))
                    .image(2, sampled, self.noise.view.handle(), vk::ImageLayout::GENERAL, Some(point))
                    .image(3, storage, views.ao_half, vk::ImageLayout::GENERAL, None)
                    .update(set);
                Ok(())
            },
        )?;

        let mut filter_set = |slot: usize, name: &str, src: vk::ImageView, dst: vk::ImageView, sampler| {
            allocator.get_or_allocate(BindingKey::new(self.owner, slot, 1), &self.filter_set_layout, name, |set| {
                GfxDescriptorWriter::new()
                    .image(0, sampled, src, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL, Some(sampler))
                    .image(1, storage, dst, vk::ImageLayout::GENERAL, None)
                    .update(set);
                Ok(())
            })
        };
        let blur_h = filter_set(1, "ao-blur-h", views.ao_half, views.ao_blur, point)?;
        let blur_v = filter_set(2, "ao-blur-v", views.ao_blur, views.ao_half, point)?;
        let resolve = filter_set(3, "ao-resolve", views.ao_half, views.ao_full, linear)?;

        Ok(AoSets {
            horizon,
            blur_h,
            blur_v,
            resolve,
        })
    }

    pub fn params(settings: &AoSettings, layout: &ViewportLayout) -> GpuAoParams {
        let half = layout.ao_extent();
        GpuAoParams {
            radius: settings.radius,
            strength: settings.strength,
            direction_count: settings.direction_count,
            step_count: settings.step_count,
            half_extent: glam::UVec2::new(half.width, half.height),
            blur_radius: settings.blur_radius,
            enabled: settings.enabled as u32,
        }
    }
}
// destroy
impl AoPipelines {
    pub fn destroy(self) {
        self.noise.destroy();
    }
}

#[derive(Clone, Copy, Debug)]
pub struct AoHorizonIo {
    pub per_frame: RgBufferHandle,
    pub depth: RgImageHandle,
    pub normal: RgImageHandle,
    pub ao_half: RgImageHandle,
}
impl AoHorizonIo {
    pub fn declare(&self, builder: &mut RgPassBuilder) {
        builder.read_buffer(self.per_frame, RgBufferState::UNIFORM_COMPUTE);
        builder.read_image(self.depth, RgImageState::DEPTH_READ_COMPUTE);
        builder.read_image(self.normal, RgImageState::SHADER_READ_COMPUTE);
        builder.write_image(self.ao_half, RgImageState::STORAGE_WRITE_COMPUTE);
    }
}

pub struct AoHorizonPass<'a> {
    pub io: AoHorizonIo,
    pub pipelines: &'a AoPipelines,
    pub frame_set: GfxDescriptorSet,
    pub sets: AoSets,
    pub params: GpuAoParams,
    pub layout: ViewportLayout,
}
impl RgPass for AoHorizonPass<'_> {
    fn setup(&mut self, builder: &mut RgPassBuilder) {
        self.io.declare(builder);
    }

    fn execute(&self, ctx: &RgPassContext<'_>) -> anyhow::Result<()> {
        let _span = tracy_client::span!("AoHorizonPass::execute");
        self.pipelines.horizon.exec(
            ctx.cmd,
            &[self.frame_set, self.sets.horizon],
            &self.params,
            ViewportLayout::image_groups(self.layout.ao_extent()),
        );
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlurDirection {
    Horizontal,
    Vertical,
}

#[derive(Clone, Copy, Debug)]
pub struct AoBlurIo {
    pub src: RgImageHandle,
    pub dst: RgImageHandle,
}
impl AoBlurIo {
    pub fn declare(&self, builder: &mut RgPassBuilder) {
        builder.read_image(self.src, RgImageState::SHADER_READ_COMPUTE);
        builder.write_image(self.dst, RgImageState::STORAGE_WRITE_COMPUTE);
    }
}

pub struct AoBlurPass<'a> {
    pub io: AoBlurIo,
    pub direction: BlurDirection,
    pub pipelines: &'a AoPipelines,
    pub frame_set: GfxDescriptorSet,
    pub sets: AoSets,
    pub radius: u32,
    pub layout: ViewportLayout,
}
impl RgPass for AoBlurPass<'_> {
    fn setup(&mut self, builder: &mut RgPassBuilder) {
        self.io.declare(builder);
    }

    fn execute(&self, ctx: &RgPassContext<'_>) -> anyhow::Result<()> {
        let _span = tracy_client::span!("AoBlurPass::execute");
        let set = match self.direction {
            BlurDirection::Horizontal => self.sets.blur_h,
            BlurDirection::Vertical => self.sets.blur_v,
        };
        let push = GpuBlurPushConstants {
            vertical: (self.direction == BlurDirection::Vertical) as u32,
            radius: self.radius,
            _padding_0: [0; 2],
            weights: blur_half_kernel(self.radius),
        };
        self.pipelines.blur.exec(
            ctx.cmd,
            &[self.frame_set, set],
            &push,
            ViewportLayout::image_groups(self.layout.ao_extent()),
        );
        Ok(())
    }
}

#[derive(Clone, Copy, Debug)]
pub struct AoResolveIo {
    /// AO 关闭时为 `None`，shader 不会采样
    pub source: Option<RgImageHandle>,
    pub ao_full: RgImageHandle,
}
impl AoResolveIo {
    pub fn declare(&self, builder: &mut RgPassBuilder) {
        if let Some(source) = self.source {
            builder.read_image(source, RgImageState::SHADER_READ_COMPUTE);
        }
        builder.write_image(self.ao_full, RgImageState::STORAGE_WRITE_COMPUTE);
    }
}

pub struct AoResolvePass<'a> {
    pub io: AoResolveIo,
    pub pipelines: &'a AoPipelines,
    pub frame_set: GfxDescriptorSet,
    pub sets: AoSets,
    pub params: GpuAoParams,
    pub layout: ViewportLayout,
}
impl RgPass for AoResolvePass<'_> {
    fn setup(&mut self, builder: &mut RgPassBuilder) {
        self.io.declare(builder);
    }

    fn execute(&self, ctx: &RgPassContext<'_>) -> anyhow::Result<()> {
        let _span = tracy_client::span!("AoResolvePass::execute");
        self.pipelines.resolve.exec(
            ctx.cmd,
            &[self.frame_set, self.sets.resolve],
            &self.params,
            ViewportLayout::image_groups(self.layout.extent),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_follow_settings() {
        let layout = ViewportLayout::new(vk::Extent2D { width: 1281, height: 720 });
        let settings = AoSettings {
            enabled: false,
            radius: 1.5,
            ..Default::default()
        };
        let params = AoPipelines::params(&settings, &layout);
        assert_eq!(params.enabled, 0);
        assert_eq!(params.radius, 1.5);
        assert_eq!(params.half_extent, glam::UVec2::new(641, 360));
        assert_eq!(params.direction_count, 8);
        assert_eq!(params.blur_radius, 4);

        assert_eq!(AoPipelines::params(&AoSettings::default(), &layout).enabled, 1);
    }
}
