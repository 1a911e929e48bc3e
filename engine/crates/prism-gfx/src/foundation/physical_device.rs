use std::ffi::CStr;

use anyhow::Context;
use ash::vk;
use itertools::Itertools;

use crate::{commands::command_queue::GfxQueueFamily, foundation::debug_messenger::DebugType};

/// 表示一张物理显卡
pub struct GfxPhysicalDevice {
    pub(crate) vk_handle: vk::PhysicalDevice,

    /// 当前 gpu 的基础属性
    pub(crate) basic_props: vk::PhysicalDeviceProperties,

    /// 全能的 queue family：graphics + compute + transfer
    pub(crate) gfx_queue_family: GfxQueueFamily,
    /// 不支持 graphics 的 compute queue family，用于 async compute
    pub(crate) compute_queue_family: Option<GfxQueueFamily>,
}

impl GfxPhysicalDevice {
    /// 优先选择独立显卡，如果没有则选择第一个可用的显卡
    pub fn new_descrete_physical_device(instance: &ash::Instance) -> anyhow::Result<Self> {
        let pdevices = unsafe { instance.enumerate_physical_devices() }.context("failed to enumerate gpus")?;
        let candidates: Vec<Self> = pdevices.iter().filter_map(|pdevice| Self::new(*pdevice, instance)).collect();

        candidates
            .into_iter()
            .find_or_first(GfxPhysicalDevice::is_descrete_gpu)
            .context("no gpu with a graphics queue family found")
    }

    fn new(pdevice: vk::PhysicalDevice, instance: &ash::Instance) -> Option<Self> {
        let basic_props = unsafe { instance.get_physical_device_properties(pdevice) };
        let physical_device_name = unsafe { CStr::from_ptr(basic_props.device_name.as_ptr()) };
        log::info!("found gpu: {:?}", physical_device_name);

        let queue_family_props = unsafe { instance.get_physical_device_queue_family_properties(pdevice) };
        log::info!("physical device: queue family props:\n{:#?}", queue_family_props);

        // 找到符合条件的 queue family
        let find_queue_family = |name: &str, include_flags: vk::QueueFlags, exclude_flags: vk::QueueFlags| {
            queue_family_props
                .iter()
                .enumerate()
                .find(|(_, props)| {
                    props.queue_flags.contains(include_flags) && (props.queue_flags & exclude_flags).is_empty()
                })
                .map(|(family_idx, props)| GfxQueueFamily {
                    name: name.to_string(),
                    queue_family_index: family_idx as u32,
                    queue_flags: props.queue_flags,
                    queue_count: props.queue_count,
                })
        };

        let gfx_queue_family = find_queue_family(
            "gfx",
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
            vk::QueueFlags::empty(),
        )?;
        let compute_queue_family =
            find_queue_family("compute-only", vk::QueueFlags::COMPUTE, vk::QueueFlags::GRAPHICS);

        Some(Self {
            vk_handle: pdevice,
            basic_props,
            gfx_queue_family,
            compute_queue_family,
        })
    }

    #[inline]
    pub fn is_descrete_gpu(&self) -> bool {
        self.basic_props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU
    }

    #[inline]
    pub fn limits(&self) -> &vk::PhysicalDeviceLimits {
        &self.basic_props.limits
    }
}

impl DebugType for GfxPhysicalDevice {
    fn debug_type_name() -> &'static str {
        "GfxPhysicalDevice"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.vk_handle
    }
}
