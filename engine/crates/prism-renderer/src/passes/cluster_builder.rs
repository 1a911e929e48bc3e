//! 每帧根据相机重建所有 cluster 的 view space AABB
//!
//! 一个线程负责一个 cluster：由对数切片得到两个深度，
//! 把 tile 的屏幕空间角点在这两个深度上反投影，取包围盒。

use ash::vk;

use prism_gfx::descriptors::descriptor::GfxDescriptorSet;
use prism_render_graph::{RgBufferHandle, RgBufferState, RgPass, RgPassBuilder, RgPassContext};

use crate::passes::compute_pass::ComputePass;
use crate::viewport::ViewportLayout;

pub struct ClusterBuilderPipeline {
    compute: ComputePass<()>,
}
impl ClusterBuilderPipeline {
    pub fn new(frame_set_layout: vk::DescriptorSetLayout) -> anyhow::Result<Self> {
        Ok(Self {
            compute: ComputePass::new("cluster/build_clusters.slang", &[frame_set_layout], "cluster-builder")?,
        })
    }
}

/// 帧图中的资源声明
#[derive(Clone, Copy, Debug)]
pub struct ClusterBuilderIo {
    pub per_frame: RgBufferHandle,
    pub clusters: RgBufferHandle,
}
impl ClusterBuilderIo {
    pub fn declare(&self, builder: &mut RgPassBuilder) {
        builder.read_buffer(self.per_frame, RgBufferState::UNIFORM_COMPUTE);
        builder.write_buffer(self.clusters, RgBufferState::STORAGE_WRITE_COMPUTE);
    }
}

pub struct ClusterBuilderPass<'a> {
    pub io: ClusterBuilderIo,
    pub pipeline: &'a ClusterBuilderPipeline,
    pub frame_set: GfxDescriptorSet,
    pub layout: ViewportLayout,
}
impl RgPass for ClusterBuilderPass<'_> {
    fn setup(&mut self, builder: &mut RgPassBuilder) {
        self.io.declare(builder);
    }

    fn execute(&self, ctx: &RgPassContext<'_>) -> anyhow::Result<()> {
        let _span = tracy_client::span!("ClusterBuilderPass::execute");
        self.pipeline.compute.exec(ctx.cmd, &[self.frame_set], &(), self.layout.cluster_build_groups());
        Ok(())
    }
}
