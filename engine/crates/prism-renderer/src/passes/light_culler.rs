//! 光源剔除
//!
//! 每个 cluster 一个 workgroup（64 线程），每个线程以 64 为步长测试光源的包围球与 cluster AABB，
//! 命中的索引追加到该 cluster 的列表中；列表写满之后每丢弃一个索引，全局 overflow 计数加一。

use ash::vk;

use prism_gfx::descriptors::descriptor::GfxDescriptorSet;
use prism_render_graph::{RgBufferHandle, RgBufferState, RgPass, RgPassBuilder, RgPassContext};
use prism_render_interface::gpu_data::{ClusterConsts, GpuPointLight};
use prism_scene::PointLight;

use crate::passes::compute_pass::ComputePass;
use crate::viewport::ViewportLayout;

/// 本帧上传的点光源，超过上限的部分被截断
#[derive(Clone, Debug, Default)]
pub struct PointLightSnapshot {
    pub lights: Vec<GpuPointLight>,
    /// 超出 [`ClusterConsts::MAX_POINT_LIGHTS`] 而被丢弃的数量
    pub dropped: u64,
}
impl PointLightSnapshot {
    pub fn capture(lights: &[PointLight]) -> Self {
        let kept = lights.len().min(ClusterConsts::MAX_POINT_LIGHTS);
        let dropped = (lights.len() - kept) as u64;
        if dropped > 0 {
            log::warn!(
                "{} point lights exceed the cap of {}, {} dropped",
                lights.len(),
                ClusterConsts::MAX_POINT_LIGHTS,
                dropped
            );
        }

        let lights = lights[..kept]
            .iter()
            .map(|light| GpuPointLight {
                position: light.position,
                range: light.range,
                color: light.color,
                intensity: light.intensity,
            })
            .collect();
        Self { lights, dropped }
    }

    #[inline]
    pub fn count(&self) -> u32 {
        self.lights.len() as u32
    }
}

pub struct LightCullerPipeline {
    compute: ComputePass<()>,
}
impl LightCullerPipeline {
    pub fn new(frame_set_layout: vk::DescriptorSetLayout) -> anyhow::Result<Self> {
        Ok(Self {
            compute: ComputePass::new("cluster/cull_lights.slang", &[frame_set_layout], "light-culler")?,
        })
    }
}

#[derive(Clone, Copy, Debug)]
pub struct LightCullerIo {
    pub per_frame: RgBufferHandle,
    pub point_lights: RgBufferHandle,
    pub clusters: RgBufferHandle,
    /// 仅在深度门控时读取
    pub active_flags: Option<RgBufferHandle>,
    pub light_lists: RgBufferHandle,
    pub overflow: RgBufferHandle,
}
impl LightCullerIo {
    pub fn declare(&self, builder: &mut RgPassBuilder) {
        builder.read_buffer(self.per_frame, RgBufferState::UNIFORM_COMPUTE);
        builder.read_buffer(self.point_lights, RgBufferState::STORAGE_READ_COMPUTE);
        builder.read_buffer(self.clusters, RgBufferState::STORAGE_READ_COMPUTE);
        if let Some(active_flags) = self.active_flags {
            builder.read_buffer(active_flags, RgBufferState::STORAGE_READ_COMPUTE);
        }
        builder.write_buffer(self.light_lists, RgBufferState::STORAGE_WRITE_COMPUTE);
        builder.read_write_buffer(self.overflow, RgBufferState::STORAGE_READ_WRITE_COMPUTE);
    }
}

pub struct LightCullerPass<'a> {
    pub io: LightCullerIo,
    pub pipeline: &'a LightCullerPipeline,
    pub frame_set: GfxDescriptorSet,
    pub layout: ViewportLayout,
}
impl RgPass for LightCullerPass<'_> {
    fn setup(&mut self, builder: &mut RgPassBuilder) {
        self.io.declare(builder);
    }

    fn execute(&self, ctx: &RgPassContext<'_>) -> anyhow::Result<()> {
        let _span = tracy_client::span!("LightCullerPass::execute");
        self.pipeline.compute.exec(ctx.cmd, &[self.frame_set], &(), self.layout.light_cull_groups());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;

    fn light(i: usize) -> PointLight {
        PointLight {
            position: Vec3::new(i as f32, 0.0, -5.0),
            range: 2.0,
            color: Vec3::new(1.0, 0.5, 0.25),
            intensity: 3.0,
        }
    }

    #[test]
    fn test_snapshot_keeps_order_and_fields() {
        let lights = (0..3).map(light).collect::<Vec<_>>();
        let snapshot = PointLightSnapshot::capture(&lights);
        assert_eq!(snapshot.count(), 3);
        assert_eq!(snapshot.dropped, 0);
        assert_eq!(snapshot.lights[2].position, Vec3::new(2.0, 0.0, -5.0));
        assert_eq!(snapshot.lights[2].range, 2.0);
        assert_eq!(snapshot.lights[2].color, Vec3::new(1.0, 0.5, 0.25));
        assert_eq!(snapshot.lights[2].intensity, 3.0);
    }

    #[test]
    fn test_snapshot_truncates_at_cap() {
        let lights = (0..ClusterConsts::MAX_POINT_LIGHTS + 7).map(light).collect::<Vec<_>>();
        let snapshot = PointLightSnapshot::capture(&lights);
        assert_eq!(snapshot.lights.len(), ClusterConsts::MAX_POINT_LIGHTS);
        assert_eq!(snapshot.dropped, 7);
        assert_eq!(snapshot.lights.last().map(|l| l.position.x), Some((ClusterConsts::MAX_POINT_LIGHTS - 1) as f32));
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = PointLightSnapshot::capture(&[]);
        assert_eq!(snapshot.count(), 0);
        assert_eq!(snapshot.dropped, 0);
    }
}
