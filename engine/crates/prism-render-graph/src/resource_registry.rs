use ash::vk;
use indexmap::IndexMap;
use slotmap::SlotMap;

use crate::handles::{RgBufferHandle, RgImageHandle};
use crate::resource_state::{RgBufferState, RgImageState};

/// 导入帧图的图像
///
/// 帧图只记录 Vulkan 句柄，生命周期由外部（resource manager / pass / swapchain）负责
#[derive(Clone, Debug)]
pub struct RgImageResource {
    pub name: String,
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub initial_state: RgImageState,
    /// 帧图结束时需要转换到的状态
    pub final_state: Option<RgImageState>,
}

impl RgImageResource {
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        prism_gfx::resources::image::VulkanFormatUtils::aspect_of(self.format)
    }

    /// 导入时没有可用内容
    #[inline]
    pub fn is_uninitialized(&self) -> bool {
        self.initial_state.layout == vk::ImageLayout::UNDEFINED
    }
}

#[derive(Clone, Debug)]
pub struct RgBufferResource {
    pub name: String,
    pub buffer: vk::Buffer,
    pub initial_state: RgBufferState,
    pub final_state: Option<RgBufferState>,
}

impl RgBufferResource {
    #[inline]
    pub fn is_uninitialized(&self) -> bool {
        !self.initial_state.is_write() && self.initial_state.access == vk::AccessFlags2::NONE
    }
}

/// 资源注册表
///
/// SlotMap 提供稳定的句柄，IndexMap 保存名字到句柄的映射（按注册顺序）。
#[derive(Default)]
pub struct RgResourceRegistry {
    images: SlotMap<RgImageHandle, RgImageResource>,
    buffers: SlotMap<RgBufferHandle, RgBufferResource>,

    image_names: IndexMap<String, RgImageHandle>,
    buffer_names: IndexMap<String, RgBufferHandle>,
}

// new & init
impl RgResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

// register
impl RgResourceRegistry {
    /// 同名资源重复注册时返回已有的句柄
    pub fn register_image(&mut self, resource: RgImageResource) -> RgImageHandle {
        if let Some(&handle) = self.image_names.get(&resource.name) {
            log::warn!("image \"{}\" imported twice, reuse the first import", resource.name);
            return handle;
        }
        let name = resource.name.clone();
        let handle = self.images.insert(resource);
        self.image_names.insert(name, handle);
        handle
    }

    pub fn register_buffer(&mut self, resource: RgBufferResource) -> RgBufferHandle {
        if let Some(&handle) = self.buffer_names.get(&resource.name) {
            log::warn!("buffer \"{}\" imported twice, reuse the first import", resource.name);
            return handle;
        }
        let name = resource.name.clone();
        let handle = self.buffers.insert(resource);
        self.buffer_names.insert(name, handle);
        handle
    }
}

// getter & iter
impl RgResourceRegistry {
    #[inline]
    pub fn get_image(&self, handle: RgImageHandle) -> Option<&RgImageResource> {
        self.images.get(handle)
    }

    #[inline]
    pub fn get_image_mut(&mut self, handle: RgImageHandle) -> Option<&mut RgImageResource> {
        self.images.get_mut(handle)
    }

    #[inline]
    pub fn get_buffer(&self, handle: RgBufferHandle) -> Option<&RgBufferResource> {
        self.buffers.get(handle)
    }

    #[inline]
    pub fn get_buffer_mut(&mut self, handle: RgBufferHandle) -> Option<&mut RgBufferResource> {
        self.buffers.get_mut(handle)
    }

    #[inline]
    pub fn find_image(&self, name: &str) -> Option<RgImageHandle> {
        self.image_names.get(name).copied()
    }

    #[inline]
    pub fn find_buffer(&self, name: &str) -> Option<RgBufferHandle> {
        self.buffer_names.get(name).copied()
    }

    #[inline]
    pub fn image_name(&self, handle: RgImageHandle) -> &str {
        self.images.get(handle).map(|r| r.name.as_str()).unwrap_or("<unknown>")
    }

    #[inline]
    pub fn buffer_name(&self, handle: RgBufferHandle) -> &str {
        self.buffers.get(handle).map(|r| r.name.as_str()).unwrap_or("<unknown>")
    }

    #[inline]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// 按注册顺序迭代
    pub fn iter_images(&self) -> impl Iterator<Item = (RgImageHandle, &RgImageResource)> {
        self.image_names.values().map(|&h| (h, &self.images[h]))
    }

    pub fn iter_buffers(&self) -> impl Iterator<Item = (RgBufferHandle, &RgBufferResource)> {
        self.buffer_names.values().map(|&h| (h, &self.buffers[h]))
    }
}
