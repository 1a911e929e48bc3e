use ash::vk;

use prism_gfx::descriptors::descriptor::{GfxBindingDesc, GfxDescriptorSet, GfxDescriptorSetLayout};
use prism_gfx::descriptors::descriptor_writer::GfxDescriptorWriter;
use prism_render_interface::binding_cache::{BindingKey, OwnerId};
use prism_render_interface::descriptor_allocator::GfxDescriptorAllocator;

/// set 0 中的 binding 编号，与 `shader/src/common/frame_bindings.slangi` 一致
pub struct FrameBinding;
impl FrameBinding {
    pub const PER_FRAME: u32 = 0;
    pub const POINT_LIGHTS: u32 = 1;
    pub const CLUSTERS: u32 = 2;
    pub const LIGHT_LISTS: u32 = 3;
    pub const ACTIVE_FLAGS: u32 = 4;
    pub const OVERFLOW: u32 = 5;
}

/// 写入 set 0 的 buffer
///
/// 前两个以及 overflow 属于 frame slot，其余随分辨率重建
#[derive(Clone, Copy, Debug)]
pub struct FrameBindingBuffers {
    pub per_frame: vk::Buffer,
    pub point_lights: vk::Buffer,
    pub clusters: vk::Buffer,
    pub light_lists: vk::Buffer,
    pub active_flags: vk::Buffer,
    pub overflow: vk::Buffer,
}

/// 所有 Pass 共用的 set 0：相机、光源以及分簇数据
pub struct FrameBindings {
    layout: GfxDescriptorSetLayout,
    owner: OwnerId,
}
// new & init
impl FrameBindings {
    pub fn new(owner: OwnerId) -> anyhow::Result<Self> {
        let stages = vk::ShaderStageFlags::COMPUTE | vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT;
        let storage = vk::DescriptorType::STORAGE_BUFFER;
        let layout = GfxDescriptorSetLayout::new(
            &[
                GfxBindingDesc::new(FrameBinding::PER_FRAME, vk::DescriptorType::UNIFORM_BUFFER, stages),
                GfxBindingDesc::new(FrameBinding::POINT_LIGHTS, storage, stages),
                GfxBindingDesc::new(FrameBinding::CLUSTERS, storage, stages),
                GfxBindingDesc::new(FrameBinding::LIGHT_LISTS, storage, stages),
                GfxBindingDesc::new(FrameBinding::ACTIVE_FLAGS, storage, stages),
                GfxBindingDesc::new(FrameBinding::OVERFLOW, storage, stages),
            ],
            "frame-bindings",
        )?;
        Ok(Self { layout, owner })
    }
}
// getters
impl FrameBindings {
    #[inline]
    pub fn layout(&self) -> &GfxDescriptorSetLayout {
        &self.layout
    }
}
// tools
impl FrameBindings {
    /// 每个 frame slot 一个 set，resize 之后缓存失效重新写入
    pub fn get_or_allocate(
        &self,
        allocator: &mut GfxDescriptorAllocator,
        frame_slot: usize,
        buffers: &FrameBindingBuffers,
    ) -> anyhow::Result<GfxDescriptorSet> {
        let key = BindingKey::new(self.owner, frame_slot, 0);
        allocator.get_or_allocate(key, &self.layout, &format!("frame-bindings-{frame_slot}"), |set| {
            let storage = vk::DescriptorType::STORAGE_BUFFER;
            GfxDescriptorWriter::new()
                .buffer(FrameBinding::PER_FRAME, vk::DescriptorType::UNIFORM_BUFFER, buffers.per_frame, vk::WHOLE_SIZE)
                .buffer(FrameBinding::POINT_LIGHTS, storage, buffers.point_lights, vk::WHOLE_SIZE)
                .buffer(FrameBinding::CLUSTERS, storage, buffers.clusters, vk::WHOLE_SIZE)
                .buffer(FrameBinding::LIGHT_LISTS, storage, buffers.light_lists, vk::WHOLE_SIZE)
                .buffer(FrameBinding::ACTIVE_FLAGS, storage, buffers.active_flags, vk::WHOLE_SIZE)
                .buffer(FrameBinding::OVERFLOW, storage, buffers.overflow, vk::WHOLE_SIZE)
                .update(set);
            Ok(())
        })
    }
}
