use std::ffi::CStr;
use std::rc::Rc;

use anyhow::Context;
use ash::vk;

use crate::{
    commands::command_queue::GfxCommandQueue,
    foundation::{
        debug_messenger::GfxDebugMsger, device::GfxDevice, instance::GfxInstance, physical_device::GfxPhysicalDevice,
    },
};

pub struct GfxCore {
    /// vk 基础函数的接口
    ///
    /// 在 drop 之后，会卸载 dll，因此需要确保该字段最后 drop
    pub(crate) vk_entry: ash::Entry,

    pub(crate) instance: GfxInstance,
    pub(crate) physical_device: GfxPhysicalDevice,

    /// queue 和 command pool 都需要访问 device 的函数指针
    pub(crate) gfx_device: Rc<GfxDevice>,

    pub(crate) debug_utils: GfxDebugMsger,

    pub(crate) gfx_queue: GfxCommandQueue,
    /// async compute queue
    ///
    /// 优先使用独立的 compute queue family；否则使用 gfx family 的第二个 queue；
    /// 都没有时与 gfx queue 是同一个 vk::Queue
    pub(crate) compute_queue: GfxCommandQueue,
}

// 创建与销毁
impl GfxCore {
    pub fn new(app_name: &str, engine_name: &str, instance_extra_exts: &[&'static CStr]) -> anyhow::Result<Self> {
        let vk_pf = unsafe { ash::Entry::load() }.context("failed to load vulkan entry")?;
        let instance = GfxInstance::new(&vk_pf, app_name, engine_name, instance_extra_exts)?;
        let physical_device = GfxPhysicalDevice::new_descrete_physical_device(instance.ash_instance())?;

        let gfx_family = physical_device.gfx_queue_family.clone();
        let compute_family = physical_device.compute_queue_family.clone();

        // 每个 queue family 需要的 queue 数量
        let priorities = [1.0_f32, 1.0];
        let (gfx_queue_cnt, compute_slot) = match &compute_family {
            Some(family) => (1, (family.clone(), 0)),
            None if gfx_family.queue_count >= 2 => (2, (gfx_family.clone(), 1)),
            None => (1, (gfx_family.clone(), 0)),
        };
        let mut queue_create_infos = vec![
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(gfx_family.queue_family_index)
                .queue_priorities(&priorities[..gfx_queue_cnt]),
        ];
        if let Some(family) = &compute_family {
            queue_create_infos.push(
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family.queue_family_index)
                    .queue_priorities(&priorities[..1]),
            );
        }

        let device = Rc::new(GfxDevice::new(&instance.ash_instance, physical_device.vk_handle, &queue_create_infos)?);
        let gfx_queue = GfxCommandQueue {
            vk_queue: unsafe { device.get_device_queue(gfx_family.queue_family_index, 0) },
            queue_family: gfx_family,
            gfx_device: device.clone(),
        };
        let (compute_family, compute_index) = compute_slot;
        let compute_queue = GfxCommandQueue {
            vk_queue: unsafe { device.get_device_queue(compute_family.queue_family_index, compute_index) },
            queue_family: compute_family,
            gfx_device: device.clone(),
        };

        let debug_utils = GfxDebugMsger::new(&vk_pf, &instance.ash_instance)?;

        log::info!("gfx queue's queue family:\n{:#?}", gfx_queue.queue_family);
        log::info!("compute queue's queue family:\n{:#?}", compute_queue.queue_family);
        if compute_queue.vk_queue == gfx_queue.vk_queue {
            log::warn!("no separate compute queue available, async compute work runs on the gfx queue");
        }

        // 在 device 以及 debug_utils 之前创建的 vk::Handle
        {
            device.set_object_debug_name(instance.vk_instance(), "GfxInstance");
            device.set_object_debug_name(physical_device.vk_handle, "GfxPhysicalDevice");
            device.set_object_debug_name(device.vk_handle(), "GfxDevice");
            device.set_object_debug_name(gfx_queue.vk_queue, "GfxCommandQueue-gfx");
            device.set_object_debug_name(compute_queue.vk_queue, "GfxCommandQueue-compute");
        }

        Ok(Self {
            vk_entry: vk_pf,
            instance,
            physical_device,
            gfx_device: device,
            debug_utils,
            gfx_queue,
            compute_queue,
        })
    }

    pub fn destroy(self) {
        let Self {
            vk_entry,
            instance,
            gfx_device,
            debug_utils,
            gfx_queue,
            compute_queue,
            ..
        } = self;
        // queue 持有 device 的引用
        drop(gfx_queue);
        drop(compute_queue);
        debug_utils.destroy();
        gfx_device.destroy();
        drop(gfx_device);
        instance.destroy();
        drop(vk_entry);
    }
}
