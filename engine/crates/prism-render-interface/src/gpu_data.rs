//! 与 shader 共享内存布局的数据结构
//!
//! 所有结构体都是 `#[repr(C)]` 且没有隐式 padding，布局需要与 `shader/src/common/gpu_data.slangi` 保持一致。

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, UVec4, Vec2, Vec3, Vec4};

/// 分簇相关的编译期常量
pub struct ClusterConsts;
impl ClusterConsts {
    /// 屏幕空间 tile 的边长（像素）
    pub const TILE_SIZE: u32 = 32;
    /// 深度方向上的对数切片数量
    pub const Z_SLICES: u32 = 16;
    /// 每个 cluster 最多记录的光源数量
    pub const MAX_LIGHTS_PER_CLUSTER: u32 = 1023;
    /// 每帧上传的点光源上限
    pub const MAX_POINT_LIGHTS: usize = 10000;
    pub const MAX_DIRECTIONAL_LIGHTS: usize = 4;
    /// 光源剔除 workgroup 的线程数
    pub const LIGHT_CULL_GROUP_SIZE: u32 = 64;
}

/// AO 模糊核的最大半径，半个核（含中心）放进 push constant
pub const MAX_BLUR_RADIUS: u32 = 11;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable, PartialEq)]
pub struct GpuClusterAabb {
    pub min: Vec4,
    pub max: Vec4,
}

/// 一个 cluster 的光源列表，`count` 饱和于 [`ClusterConsts::MAX_LIGHTS_PER_CLUSTER`]
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct GpuClusterLightList {
    pub count: u32,
    pub indices: [u32; ClusterConsts::MAX_LIGHTS_PER_CLUSTER as usize],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable, PartialEq)]
pub struct GpuPointLight {
    pub position: Vec3,
    pub range: f32,
    pub color: Vec3,
    pub intensity: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable, PartialEq)]
pub struct GpuDirectionalLight {
    pub direction: Vec3,
    pub _padding_0: f32,
    pub color: Vec3,
    pub intensity: f32,
}

/// 每帧更新一次的相机与场景数据
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct GpuPerFrameData {
    pub view: Mat4,
    pub inv_view: Mat4,
    pub projection: Mat4,
    pub inv_projection: Mat4,
    pub view_projection: Mat4,
    pub camera_pos: Vec4,
    /// (width, height, tile_count_x, tile_count_y)
    pub screen: UVec4,

    pub z_near: f32,
    pub z_far: f32,
    /// slice = floor(log2(z) * cluster_scale + cluster_bias)
    pub cluster_scale: f32,
    pub cluster_bias: f32,

    pub point_light_count: u32,
    pub directional_light_count: u32,
    pub env_light_enabled: u32,
    pub ao_enabled: u32,

    pub directional_lights: [GpuDirectionalLight; ClusterConsts::MAX_DIRECTIONAL_LIGHTS],

    pub env_light_intensity: f32,
    /// 为 1 时光源剔除跳过未被标记的 cluster
    pub depth_gating: u32,
    pub _padding_0: [u32; 2],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable, PartialEq)]
pub struct GpuOitParams {
    pub ln_depth_min: f32,
    pub ln_depth_max: f32,
    pub moment_bias: f32,
    pub overestimation: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable, PartialEq)]
pub struct GpuAoParams {
    pub radius: f32,
    pub strength: f32,
    pub direction_count: u32,
    pub step_count: u32,
    /// 半分辨率 AO 的尺寸
    pub half_extent: glam::UVec2,
    pub blur_radius: u32,
    pub enabled: u32,
}

/// 绘制一个 mesh 时的 push constant
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct GpuDrawPushConstants {
    pub model: Mat4,
    /// 透明物体使用 a 作为 alpha
    pub base_color: Vec4,
    pub metallic: f32,
    pub roughness: f32,
    pub _padding_0: [f32; 2],
}

/// 透明物体绘制时的 push constant：mesh 参数 + OIT 深度范围
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct GpuOitDrawPushConstants {
    pub draw: GpuDrawPushConstants,
    pub oit: GpuOitParams,
}

/// 合成 pass 的 push constant
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct GpuCompositeParams {
    /// 为 0 时直接输出不透明结果
    pub oit_active: u32,
    pub _padding_0: [u32; 3],
}

/// G-buffer 与透明 pass 共用的顶点格式
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable, PartialEq)]
pub struct MeshVertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
}
impl MeshVertex {
    pub fn vertex_input_bindings() -> Vec<vk::VertexInputBindingDescription> {
        vec![
            vk::VertexInputBindingDescription::default()
                .binding(0)
                .stride(size_of::<Self>() as u32)
                .input_rate(vk::VertexInputRate::VERTEX),
        ]
    }

    pub fn vertex_input_attributes() -> Vec<vk::VertexInputAttributeDescription> {
        vec![
            vk::VertexInputAttributeDescription::default()
                .location(0)
                .binding(0)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(std::mem::offset_of!(Self, position) as u32),
            vk::VertexInputAttributeDescription::default()
                .location(1)
                .binding(0)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(std::mem::offset_of!(Self, normal) as u32),
            vk::VertexInputAttributeDescription::default()
                .location(2)
                .binding(0)
                .format(vk::Format::R32G32_SFLOAT)
                .offset(std::mem::offset_of!(Self, uv) as u32),
        ]
    }
}

/// 可分离模糊的 push constant
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct GpuBlurPushConstants {
    /// 0：水平，1：垂直
    pub vertical: u32,
    pub radius: u32,
    pub _padding_0: [u32; 2],
    /// 归一化后的半个核，`weights[i / 4][i % 4]` 是偏移 `±i` 的权重
    pub weights: [[f32; 4]; 3],
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[test]
    fn test_layout_sizes() {
        assert_eq!(size_of::<GpuClusterAabb>(), 32);
        // count + 1023 个索引，刚好 4KB
        assert_eq!(size_of::<GpuClusterLightList>(), 4096);
        assert_eq!(size_of::<GpuPointLight>(), 32);
        assert_eq!(size_of::<GpuDirectionalLight>(), 32);
        assert_eq!(size_of::<GpuPerFrameData>() % 16, 0);
        assert_eq!(size_of::<GpuOitParams>(), 16);
        assert_eq!(size_of::<GpuAoParams>(), 32);
        assert_eq!(size_of::<GpuDrawPushConstants>(), 96);
        // 不超过 Vulkan 保证的 128 字节
        assert_eq!(size_of::<GpuOitDrawPushConstants>(), 112);
        assert_eq!(size_of::<GpuBlurPushConstants>(), 64);
        assert!(MAX_BLUR_RADIUS as usize + 1 <= 4 * 3);
        assert_eq!(size_of::<MeshVertex>(), 32);
    }

    #[test]
    fn test_vertex_attributes_follow_layout() {
        let offsets: Vec<_> = MeshVertex::vertex_input_attributes().iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 24]);
        assert_eq!(MeshVertex::vertex_input_bindings()[0].stride, 32);
    }
}
