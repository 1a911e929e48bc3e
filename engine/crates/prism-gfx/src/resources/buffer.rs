use std::ptr;

use anyhow::Context;
use ash::vk;
use ash::vk::Handle;
use vk_mem::Alloc;

use crate::{foundation::debug_messenger::DebugType, gfx::Gfx};

/// buffer 的创建参数
///
/// `queue_family_indices` 中包含多个不同的 queue family 时，使用 CONCURRENT sharing mode，
/// 这样跨 queue 使用时不需要 ownership transfer
#[derive(Clone, Debug)]
pub struct GfxBufferCreateInfo {
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    pub mem_map: bool,
    pub queue_family_indices: Vec<u32>,
}

impl GfxBufferCreateInfo {
    #[inline]
    pub fn new(size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> Self {
        Self {
            size,
            usage,
            mem_map: false,
            queue_family_indices: vec![],
        }
    }

    /// builder
    #[inline]
    pub fn mem_map(mut self, mem_map: bool) -> Self {
        self.mem_map = mem_map;
        self
    }

    /// builder
    #[inline]
    pub fn queue_family_indices(mut self, queue_family_indices: &[u32]) -> Self {
        self.queue_family_indices = queue_family_indices.to_vec();
        self.queue_family_indices.sort_unstable();
        self.queue_family_indices.dedup();
        self
    }

    #[inline]
    pub fn sharing_mode(&self) -> vk::SharingMode {
        if self.queue_family_indices.len() > 1 { vk::SharingMode::CONCURRENT } else { vk::SharingMode::EXCLUSIVE }
    }
}

pub struct GfxBuffer {
    handle: vk::Buffer,
    allocation: vk_mem::Allocation,

    size: vk::DeviceSize,

    /// 在初始化阶段写死
    map_ptr: Option<*mut u8>,

    debug_name: String,
}
impl DebugType for GfxBuffer {
    fn debug_type_name() -> &'static str {
        "GfxBuffer"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}
impl Drop for GfxBuffer {
    fn drop(&mut self) {
        debug_assert!(self.handle.is_null(), "GfxBuffer <{}> must be destroyed manually.", self.debug_name);
    }
}
// init & destroy
impl GfxBuffer {
    /// - 优先使用 device memory
    /// - mem_map 为 true 时，buffer 在整个生命周期内保持 map 状态
    pub fn new(create_info: &GfxBufferCreateInfo, name: impl AsRef<str>) -> anyhow::Result<Self> {
        let buffer_ci = vk::BufferCreateInfo::default()
            .size(create_info.size)
            .usage(create_info.usage)
            .sharing_mode(create_info.sharing_mode());
        let buffer_ci = if create_info.sharing_mode() == vk::SharingMode::CONCURRENT {
            buffer_ci.queue_family_indices(&create_info.queue_family_indices)
        } else {
            buffer_ci
        };
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            flags: if create_info.mem_map {
                vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM
            } else {
                vk_mem::AllocationCreateFlags::empty()
            },
            ..Default::default()
        };

        let allocator = Gfx::get().allocator();
        let (buffer, mut alloc) = unsafe { allocator.create_buffer_with_alignment(&buffer_ci, &alloc_ci, 16) }
            .with_context(|| format!("failed to create buffer <{}>", name.as_ref()))?;

        let mut mapped_ptr = None;
        if create_info.mem_map {
            let ptr = unsafe { allocator.map_memory(&mut alloc) }
                .with_context(|| format!("failed to map buffer <{}>", name.as_ref()))?;
            mapped_ptr = Some(ptr);
        }

        Gfx::get().gfx_device().set_object_debug_name(buffer, format!("GfxBuffer::{}", name.as_ref()));
        Ok(Self {
            handle: buffer,
            allocation: alloc,
            size: create_info.size,
            map_ptr: mapped_ptr,

            debug_name: name.as_ref().to_string(),
        })
    }

    #[inline]
    pub fn new_stage_buffer(size: vk::DeviceSize, debug_name: impl AsRef<str>) -> anyhow::Result<Self> {
        Self::new(&GfxBufferCreateInfo::new(size, vk::BufferUsageFlags::TRANSFER_SRC).mem_map(true), debug_name)
    }
}
// destroy
impl GfxBuffer {
    #[inline]
    pub fn destroy(mut self) {
        self.destroy_mut();
    }

    pub fn destroy_mut(&mut self) {
        if self.handle.is_null() {
            return;
        }
        log::debug!("Destroying GfxBuffer: {}", self.debug_name);
        let allocator = Gfx::get().allocator();
        unsafe {
            if self.map_ptr.take().is_some() {
                allocator.unmap_memory(&mut self.allocation);
            }
            allocator.destroy_buffer(self.handle, &mut self.allocation);
        }
        self.handle = vk::Buffer::null();
    }
}
// getter
impl GfxBuffer {
    #[inline]
    pub fn vk_buffer(&self) -> vk::Buffer {
        self.handle
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.debug_name
    }
}
// tools
impl GfxBuffer {
    #[inline]
    pub fn mapped_ptr(&self) -> anyhow::Result<*mut u8> {
        self.map_ptr.with_context(|| format!("buffer <{}> is not host visible", self.debug_name))
    }

    #[inline]
    pub fn flush(&self, offset: vk::DeviceSize, size: vk::DeviceSize) -> anyhow::Result<()> {
        Gfx::get()
            .allocator()
            .flush_allocation(&self.allocation, offset, size)
            .with_context(|| format!("failed to flush buffer <{}>", self.debug_name))
    }

    /// 通过 mem map 的方式将 data 写入 buffer 的 offset 处
    pub fn write_by_mmap<T: bytemuck::Pod>(&self, offset: vk::DeviceSize, data: &[T]) -> anyhow::Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        anyhow::ensure!(
            offset + bytes.len() as vk::DeviceSize <= self.size,
            "write of {} bytes at {} overflows buffer <{}> ({} bytes)",
            bytes.len(),
            offset,
            self.debug_name,
            self.size
        );
        let dst = self.mapped_ptr()?;
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), dst.add(offset as usize), bytes.len());
        }
        self.flush(offset, bytes.len() as vk::DeviceSize)
    }

    /// 从 host visible 的 buffer 中读取一个 T，读取前会 invalidate 缓存
    pub fn read_by_mmap<T: bytemuck::Pod>(&self, offset: vk::DeviceSize) -> anyhow::Result<T> {
        let len = size_of::<T>() as vk::DeviceSize;
        anyhow::ensure!(offset + len <= self.size, "read overflows buffer <{}>", self.debug_name);
        let src = self.mapped_ptr()?;
        Gfx::get()
            .allocator()
            .invalidate_allocation(&self.allocation, offset, len)
            .with_context(|| format!("failed to invalidate buffer <{}>", self.debug_name))?;
        let bytes = unsafe { std::slice::from_raw_parts(src.add(offset as usize), len as usize) };
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    /// 创建一个临时的 stage buffer，先将数据放入 stage buffer，再 transfer 到 self
    ///
    /// sync 表示这个函数是同步等待的，会阻塞运行，只在初始化阶段上传大块数据时使用
    pub fn transfer_data_sync<T: bytemuck::Pod>(&self, data: &[T]) -> anyhow::Result<()> {
        let data_size = size_of_val(data) as vk::DeviceSize;
        let stage_buffer = Self::new_stage_buffer(data_size, format!("{}-stage-buffer", self.debug_name))?;
        if let Err(e) = stage_buffer.write_by_mmap(0, data) {
            stage_buffer.destroy();
            return Err(e);
        }

        let cmd_name = format!("{}-transfer-data", &self.debug_name);
        let result = Gfx::get().one_time_exec(
            |cmd| {
                cmd.cmd_copy_buffer(
                    &stage_buffer,
                    self,
                    &[vk::BufferCopy {
                        size: data_size,
                        ..Default::default()
                    }],
                );
            },
            &cmd_name,
        );
        stage_buffer.destroy();
        result
    }
}
