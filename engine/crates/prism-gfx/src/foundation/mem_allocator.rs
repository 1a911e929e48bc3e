use std::ops::Deref;

use anyhow::Context;
use ash::vk;

/// vk-mem 分配器
///
/// 必须在 device 之前销毁
pub struct GfxMemAllocator {
    inner: Option<vk_mem::Allocator>,
}

impl GfxMemAllocator {
    pub fn new(instance: &ash::Instance, pdevice: vk::PhysicalDevice, device: &ash::Device) -> anyhow::Result<Self> {
        let _span = tracy_client::span!("GfxMemAllocator::new");

        let mut create_info = vk_mem::AllocatorCreateInfo::new(instance, device, pdevice);
        create_info.vulkan_api_version = vk::API_VERSION_1_3;

        let allocator = unsafe { vk_mem::Allocator::new(create_info) }.context("failed to create vma allocator")?;
        Ok(Self { inner: Some(allocator) })
    }

    pub fn destroy(mut self) {
        log::info!("destroying vma allocator");
        // vk_mem::Allocator 在 drop 时销毁
        self.inner.take();
    }
}

impl Deref for GfxMemAllocator {
    type Target = vk_mem::Allocator;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref().expect("allocator already destroyed")
    }
}
