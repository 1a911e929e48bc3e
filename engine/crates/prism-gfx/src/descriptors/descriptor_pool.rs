use anyhow::Context;
use ash::vk;

use crate::{
    descriptors::descriptor::{GfxDescriptorSet, GfxDescriptorSetLayout},
    foundation::debug_messenger::DebugType,
    gfx::Gfx,
};

/// 固定容量的描述符池
///
/// 只做 bump 分配：set 不单独释放，`reset` 时整体回收。
pub struct GfxDescriptorPool {
    handle: vk::DescriptorPool,
    max_sets: u32,
    allocated: u32,

    name: String,
    destroyed: bool,
}
impl DebugType for GfxDescriptorPool {
    fn debug_type_name() -> &'static str {
        "GfxDescriptorPool"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}
// new & destroy
impl GfxDescriptorPool {
    pub fn new(max_sets: u32, pool_sizes: &[vk::DescriptorPoolSize], name: &str) -> anyhow::Result<Self> {
        let create_info = vk::DescriptorPoolCreateInfo::default().max_sets(max_sets).pool_sizes(pool_sizes);
        let gfx_device = Gfx::get().gfx_device();
        let handle = unsafe { gfx_device.create_descriptor_pool(&create_info, None) }
            .with_context(|| format!("failed to create descriptor pool <{name}>"))?;
        let pool = Self {
            handle,
            max_sets,
            allocated: 0,
            name: name.to_string(),
            destroyed: false,
        };
        gfx_device.set_debug_name(&pool, name);
        Ok(pool)
    }

    pub fn destroy(mut self) {
        log::info!("Destroying GfxDescriptorPool: {}", self.name);
        unsafe { Gfx::get().gfx_device().destroy_descriptor_pool(self.handle, None) };
        self.destroyed = true;
    }
}
// tools
impl GfxDescriptorPool {
    /// 从 pool 中分配一个 set
    ///
    /// pool 已满时返回 `Ok(None)`，由调用者切换到下一个 pool
    pub fn allocate(
        &mut self,
        layout: &GfxDescriptorSetLayout,
        debug_name: &str,
    ) -> anyhow::Result<Option<GfxDescriptorSet>> {
        if self.allocated >= self.max_sets {
            return Ok(None);
        }
        let set_layouts = [layout.handle()];
        let alloc_info = vk::DescriptorSetAllocateInfo::default().descriptor_pool(self.handle).set_layouts(&set_layouts);
        let gfx_device = Gfx::get().gfx_device();
        match unsafe { gfx_device.allocate_descriptor_sets(&alloc_info) } {
            Ok(sets) => {
                self.allocated += 1;
                let set = GfxDescriptorSet::from_raw(sets[0]);
                gfx_device.set_debug_name(&set, debug_name);
                Ok(Some(set))
            }
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY) | Err(vk::Result::ERROR_FRAGMENTED_POOL) => Ok(None),
            Err(e) => Err(e).with_context(|| format!("failed to allocate descriptor set <{debug_name}> in <{}>", self.name)),
        }
    }

    /// 回收 pool 中所有的 set
    pub fn reset(&mut self) -> anyhow::Result<()> {
        unsafe { Gfx::get().gfx_device().reset_descriptor_pool(self.handle, vk::DescriptorPoolResetFlags::empty()) }
            .with_context(|| format!("failed to reset descriptor pool <{}>", self.name))?;
        self.allocated = 0;
        Ok(())
    }

    #[inline]
    pub fn allocated(&self) -> u32 {
        self.allocated
    }
}
impl Drop for GfxDescriptorPool {
    fn drop(&mut self) {
        debug_assert!(self.destroyed, "GfxDescriptorPool <{}> must be destroyed manually.", self.name);
    }
}
