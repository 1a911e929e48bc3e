use ash::vk;

use prism_gfx::descriptors::{
    descriptor::{GfxDescriptorSet, GfxDescriptorSetLayout},
    descriptor_pool::GfxDescriptorPool,
};

use crate::binding_cache::{BindingCache, BindingKey};

/// 一组固定容量的 descriptor pool，外加按 `(OwnerId, slot, set)` 的缓存
///
/// 当前 pool 满了之后创建新的 pool；`reset` 时所有 pool 一起回收，缓存全部失效。
pub struct GfxDescriptorAllocator {
    pools: Vec<GfxDescriptorPool>,
    current: usize,
    cache: BindingCache<GfxDescriptorSet>,
}
// new & destroy
impl GfxDescriptorAllocator {
    const SETS_PER_POOL: u32 = 256;

    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            pools: vec![Self::new_pool(0)?],
            current: 0,
            cache: BindingCache::new(),
        })
    }

    fn new_pool(index: usize) -> anyhow::Result<GfxDescriptorPool> {
        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: Self::SETS_PER_POOL * 2,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: Self::SETS_PER_POOL * 4,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_IMAGE,
                descriptor_count: Self::SETS_PER_POOL * 4,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: Self::SETS_PER_POOL * 8,
            },
        ];
        GfxDescriptorPool::new(Self::SETS_PER_POOL, &pool_sizes, &format!("descriptor-allocator-{index}"))
    }

    pub fn destroy(mut self) {
        self.cache.invalidate_all();
        for pool in self.pools.drain(..) {
            pool.destroy();
        }
    }
}
// tools
impl GfxDescriptorAllocator {
    /// 命中缓存时直接返回；否则分配新的 set 并用 `write` 写入
    pub fn get_or_allocate(
        &mut self,
        key: BindingKey,
        layout: &GfxDescriptorSetLayout,
        debug_name: &str,
        write: impl FnOnce(GfxDescriptorSet) -> anyhow::Result<()>,
    ) -> anyhow::Result<GfxDescriptorSet> {
        let Self { pools, current, cache } = self;
        cache.get_or_try_insert_with(key, || {
            let set = Self::allocate(pools, current, layout, debug_name)?;
            write(set)?;
            Ok(set)
        })
    }

    fn allocate(
        pools: &mut Vec<GfxDescriptorPool>,
        current: &mut usize,
        layout: &GfxDescriptorSetLayout,
        debug_name: &str,
    ) -> anyhow::Result<GfxDescriptorSet> {
        if let Some(set) = pools[*current].allocate(layout, debug_name)? {
            return Ok(set);
        }
        *current += 1;
        if *current == pools.len() {
            log::info!("descriptor pool {} exhausted, creating a new one", *current - 1);
            pools.push(Self::new_pool(*current)?);
        }
        pools[*current]
            .allocate(layout, debug_name)?
            .ok_or_else(|| anyhow::anyhow!("descriptor set <{debug_name}> does not fit in an empty pool"))
    }

    /// 回收所有的 set，只能在引用这些 set 的命令都执行完毕之后调用
    pub fn reset(&mut self) -> anyhow::Result<()> {
        self.cache.invalidate_all();
        for pool in &mut self.pools {
            pool.reset()?;
        }
        self.current = 0;
        Ok(())
    }

    #[inline]
    pub fn cache(&self) -> &BindingCache<GfxDescriptorSet> {
        &self.cache
    }
}
