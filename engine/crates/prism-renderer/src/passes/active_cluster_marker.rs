//! 深度门控：把每个深度像素映射到所在的 cluster 并打上标记
//!
//! 只有开启深度门控时才加入帧图，光源剔除据此跳过没有任何不透明像素的 cluster

use ash::vk;

use prism_gfx::descriptors::descriptor::{GfxBindingDesc, GfxDescriptorSet, GfxDescriptorSetLayout};
use prism_gfx::descriptors::descriptor_writer::GfxDescriptorWriter;
use prism_gfx::descriptors::sampler::GfxSampler;
use prism_render_graph::{RgBufferHandle, RgBufferState, RgImageHandle, RgImageState, RgPass, RgPassBuilder, RgPassContext};
use prism_render_interface::binding_cache::{BindingKey, OwnerId};
use prism_render_interface::descriptor_allocator::GfxDescriptorAllocator;

use crate::passes::compute_pass::ComputePass;
use crate::viewport::ViewportLayout;

pub struct ActiveClusterMarkerPipeline {
    compute: ComputePass<()>,
    set_layout: GfxDescriptorSetLayout,
    owner: OwnerId,
}
// new & init
impl ActiveClusterMarkerPipeline {
    pub fn new(frame_set_layout: vk::DescriptorSetLayout, owner: OwnerId) -> anyhow::Result<Self> {
        let set_layout = GfxDescriptorSetLayout::new(
            &[GfxBindingDesc::new(0, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, vk::ShaderStageFlags::COMPUTE)],
            "active-cluster-marker",
        )?;
        let compute = ComputePass::new(
            "cluster/mark_active_clusters.slang",
            &[frame_set_layout, set_layout.handle()],
            "active-cluster-marker",
        )?;
        Ok(Self {
            compute,
            set_layout,
            owner,
        })
    }
}
// tools
impl ActiveClusterMarkerPipeline {
    pub fn depth_set(
        &self,
        allocator: &mut GfxDescriptorAllocator,
        depth_view: vk::ImageView,
        sampler: &GfxSampler,
    ) -> anyhow::Result<GfxDescriptorSet> {
        allocator.get_or_allocate(BindingKey::new(self.owner, 0, 1), &self.set_layout, "active-cluster-marker", |set| {
            GfxDescriptorWriter::new()
                .image(
                    0,
                    vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    depth_view,
                    vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
                    Some(sampler.handle()),
                )
                .update(set);
            Ok(())
        })
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ActiveClusterMarkerIo {
    pub per_frame: RgBufferHandle,
    pub depth: RgImageHandle,
    pub active_flags: RgBufferHandle,
}
impl ActiveClusterMarkerIo {
    pub fn declare(&self, builder: &mut RgPassBuilder) {
        builder.read_buffer(self.per_frame, RgBufferState::UNIFORM_COMPUTE);
        builder.read_image(self.depth, RgImageState::DEPTH_READ_COMPUTE);
        builder.write_buffer(self.active_flags, RgBufferState::STORAGE_WRITE_COMPUTE);
    }
}

pub struct ActiveClusterMarkerPass<'a> {
    pub io: ActiveClusterMarkerIo,
    pub pipeline: &'a ActiveClusterMarkerPipeline,
    pub frame_set: GfxDescriptorSet,
    pub depth_set: GfxDescriptorSet,
    pub layout: ViewportLayout,
}
impl RgPass for ActiveClusterMarkerPass<'_> {
    fn setup(&mut self, builder: &mut RgPassBuilder) {
        self.io.declare(builder);
    }

    fn execute(&self, ctx: &RgPassContext<'_>) -> anyhow::Result<()> {
        let _span = tracy_client::span!("ActiveClusterMarkerPass::execute");
        let flags = ctx.buffer(self.io.active_flags)?;

        // 标记只会写 1，先整体清零
        ctx.cmd.cmd_fill_buffer(flags, 0, vk::WHOLE_SIZE, 0);
        ctx.cmd.memory_barrier(&[vk::MemoryBarrier2::default()
            .src_stage_mask(vk::PipelineStageFlags2::TRANSFER)
            .src_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
            .dst_stage_mask(vk::PipelineStageFlags2::COMPUTE_SHADER)
            .dst_access_mask(vk::AccessFlags2::SHADER_STORAGE_WRITE)]);

        self.pipeline.compute.exec(
            ctx.cmd,
            &[self.frame_set, self.depth_set],
            &(),
            ViewportLayout::image_groups(self.layout.extent),
        );
        Ok(())
    }
}
