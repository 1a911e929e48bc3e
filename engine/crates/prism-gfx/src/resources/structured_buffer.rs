use std::marker::PhantomData;

use ash::vk;

use crate::resources::buffer::{GfxBuffer, GfxBufferCreateInfo};

/// buffer 内存放的是结构体或者结构体的数组
pub struct GfxStructuredBuffer<T: bytemuck::Pod> {
    buffer: GfxBuffer,
    /// 结构体的数量
    ele_num: usize,
    _phantom: PhantomData<T>,
}

// new & init
impl<T: bytemuck::Pod> GfxStructuredBuffer<T> {
    /// storage buffer，`queue_family_indices` 决定是否跨 queue 共享
    #[inline]
    pub fn new_ssbo(len: usize, mapped: bool, queue_family_indices: &[u32], debug_name: impl AsRef<str>) -> anyhow::Result<Self> {
        Self::new(
            debug_name,
            len,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::TRANSFER_SRC,
            mapped,
            queue_family_indices,
        )
    }

    pub fn new(
        debug_name: impl AsRef<str>,
        len: usize,
        buffer_usage_flags: vk::BufferUsageFlags,
        mapped: bool,
        queue_family_indices: &[u32],
    ) -> anyhow::Result<Self> {
        let size = (len * size_of::<T>()) as vk::DeviceSize;
        let create_info = GfxBufferCreateInfo::new(size, buffer_usage_flags)
            .mem_map(mapped)
            .queue_family_indices(queue_family_indices);
        let buffer = GfxBuffer::new(&create_info, debug_name)?;

        Ok(Self {
            buffer,
            ele_num: len,
            _phantom: PhantomData,
        })
    }

    #[inline]
    pub fn destroy(self) {
        self.buffer.destroy();
    }
}
// getters
impl<T: bytemuck::Pod> GfxStructuredBuffer<T> {
    #[inline]
    pub fn vk_buffer(&self) -> vk::Buffer {
        self.buffer.vk_buffer()
    }

    #[inline]
    pub fn buffer(&self) -> &GfxBuffer {
        &self.buffer
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ele_num
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ele_num == 0
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.buffer.size()
    }
}
// tools
impl<T: bytemuck::Pod> GfxStructuredBuffer<T> {
    /// 写入从 first 开始的若干个元素
    pub fn write(&self, first: usize, data: &[T]) -> anyhow::Result<()> {
        anyhow::ensure!(first + data.len() <= self.ele_num, "write out of range in <{}>", self.buffer.name());
        self.buffer.write_by_mmap((first * size_of::<T>()) as vk::DeviceSize, data)
    }

    pub fn read(&self, index: usize) -> anyhow::Result<T> {
        anyhow::ensure!(index < self.ele_num, "read out of range in <{}>", self.buffer.name());
        self.buffer.read_by_mmap((index * size_of::<T>()) as vk::DeviceSize)
    }
}
