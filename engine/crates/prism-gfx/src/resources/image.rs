use anyhow::Context;
use ash::vk;
use ash::vk::Handle;
use vk_mem::{Alloc, Allocation};

use crate::{
    commands::{barrier::GfxImageBarrier, command_buffer::GfxCommandBuffer},
    foundation::debug_messenger::DebugType,
    gfx::Gfx,
    resources::buffer::GfxBuffer,
};

/// Vulkan 格式相关的工具类
pub struct VulkanFormatUtils;
impl VulkanFormatUtils {
    /// 每个像素需要的字节数，只覆盖需要从 CPU 上传的格式
    pub fn pixel_size_in_bytes(format: vk::Format) -> Option<usize> {
        match format {
            vk::Format::R8_UNORM => Some(1),
            vk::Format::R8G8_UNORM => Some(2),
            vk::Format::R8G8B8A8_UNORM | vk::Format::R8G8B8A8_SRGB | vk::Format::R32_SFLOAT => Some(4),
            vk::Format::R16G16B16A16_SFLOAT | vk::Format::R32G32_SFLOAT => Some(8),
            vk::Format::R32G32B32A32_SFLOAT => Some(16),
            _ => None,
        }
    }

    #[inline]
    pub fn is_depth_format(format: vk::Format) -> bool {
        matches!(
            format,
            vk::Format::D16_UNORM
                | vk::Format::D32_SFLOAT
                | vk::Format::D16_UNORM_S8_UINT
                | vk::Format::D24_UNORM_S8_UINT
                | vk::Format::D32_SFLOAT_S8_UINT
        )
    }

    #[inline]
    pub fn aspect_of(format: vk::Format) -> vk::ImageAspectFlags {
        if Self::is_depth_format(format) { vk::ImageAspectFlags::DEPTH } else { vk::ImageAspectFlags::COLOR }
    }
}

/// Image 来源
pub enum ImageSource {
    /// 由 VMA 分配的 Image
    Allocated(Allocation),
    /// 外部 Image（例如 present target 的 image），不管理其内存生命周期
    External,
}

pub struct GfxImage {
    handle: vk::Image,
    source: ImageSource,

    extent: vk::Extent3D,
    format: vk::Format,
    usage: vk::ImageUsageFlags,

    name: String,
}
// getter
impl GfxImage {
    #[inline]
    pub fn width(&self) -> u32 {
        self.extent.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.extent.height
    }

    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.handle
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn usage(&self) -> vk::ImageUsageFlags {
        self.usage
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}
// new & init
impl GfxImage {
    pub fn new(image_info: &GfxImageCreateInfo, debug_name: &str) -> anyhow::Result<Self> {
        let allocator = Gfx::get().allocator();
        let gfx_device = Gfx::get().gfx_device();
        let alloc_info = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            ..Default::default()
        };
        let (image, alloc) = unsafe { allocator.create_image(&image_info.as_info(), &alloc_info) }
            .with_context(|| format!("failed to create image <{debug_name}>"))?;
        let image = Self {
            handle: image,
            source: ImageSource::Allocated(alloc),
            extent: image_info.inner.extent,
            format: image_info.inner.format,
            usage: image_info.inner.usage,

            name: debug_name.to_string(),
        };
        gfx_device.set_debug_name(&image, debug_name);
        Ok(image)
    }

    /// 包装外部的 image，例如 present target 的 image
    pub fn from_external(
        handle: vk::Image,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        debug_name: &str,
    ) -> Self {
        let image = Self {
            handle,
            source: ImageSource::External,
            extent: extent.into(),
            format,
            usage,
            name: debug_name.to_string(),
        };
        Gfx::get().gfx_device().set_debug_name(&image, debug_name);
        image
    }

    /// 根据 CPU 数据创建一个只读的 2D image，同步上传
    pub fn from_pixels(
        extent: vk::Extent2D,
        format: vk::Format,
        data: &[u8],
        name: impl AsRef<str>,
    ) -> anyhow::Result<Self> {
        let image_create_info = GfxImageCreateInfo::new_image_2d_info(
            extent,
            format,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::STORAGE,
        );
        let image = Self::new(&image_create_info, name.as_ref())?;

        let stage_buffer = Gfx::get().one_time_exec(|cmd| image.transfer_data(cmd, data), name.as_ref())??;
        stage_buffer.destroy();

        Ok(image)
    }
}
impl DebugType for GfxImage {
    fn debug_type_name() -> &'static str {
        "GfxImage2D"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}
// destroy
impl GfxImage {
    pub fn destroy(mut self) {
        self.destroy_mut();
    }
    pub fn destroy_mut(&mut self) {
        if self.handle.is_null() {
            return;
        }
        log::debug!("Destroying GfxImage: {}", self.name);

        match &mut self.source {
            ImageSource::External => (),
            ImageSource::Allocated(allocation) => unsafe {
                Gfx::get().allocator().destroy_image(self.handle, allocation)
            },
        }
        self.handle = vk::Image::null();
    }
}
impl Drop for GfxImage {
    fn drop(&mut self) {
        debug_assert!(self.handle.is_null(), "GfxImage <{}> must be destroyed manually.", self.name);
    }
}
// tools
impl GfxImage {
    /// # 实现步骤
    /// 1. 创建一个 staging buffer，用于存放待复制的数据
    /// 2. 将数据复制到 staging buffer
    /// 3. 进行图像布局转换
    /// 4. 将 staging buffer 的数据复制到图像
    /// 5. 转换为 GENERAL，compute 和 fragment 都可以读取
    ///
    /// 返回的 stage buffer 需要在命令执行完毕之后销毁
    pub fn transfer_data(&self, command_buffer: &GfxCommandBuffer, data: &[u8]) -> anyhow::Result<GfxBuffer> {
        let pixel_size = VulkanFormatUtils::pixel_size_in_bytes(self.format)
            .with_context(|| format!("format {:?} can not be uploaded from cpu", self.format))?;
        let pixels_cnt = (self.width() * self.height()) as usize;
        anyhow::ensure!(
            data.len() == pixel_size * pixels_cnt,
            "image <{}> expects {} bytes, got {}",
            self.name,
            pixel_size * pixels_cnt,
            data.len()
        );

        let stage_buffer = GfxBuffer::new_stage_buffer(size_of_val(data) as vk::DeviceSize, "image-stage-buffer")?;
        if let Err(e) = stage_buffer.write_by_mmap(0, data) {
            stage_buffer.destroy();
            return Err(e);
        }

        let image_barrier = GfxImageBarrier::new()
            .image(self.handle)
            .src_mask(vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::empty())
            .dst_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE)
            .layout_transfer(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .image_aspect_flag(vk::ImageAspectFlags::COLOR);
        command_buffer.image_memory_barrier(vk::DependencyFlags::empty(), std::slice::from_ref(&image_barrier));

        let buffer_image_copy = vk::BufferImageCopy2::default()
            .image_extent(self.extent)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            });
        command_buffer.cmd_copy_buffer_to_image(
            &vk::CopyBufferToImageInfo2::default()
                .src_buffer(stage_buffer.vk_buffer())
                .dst_image(self.handle)
                .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .regions(std::slice::from_ref(&buffer_image_copy)),
        );

        let image_barrier = GfxImageBarrier::new()
            .image(self.handle)
            .src_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE)
            .dst_mask(vk::PipelineStageFlags2::ALL_COMMANDS, vk::AccessFlags2::SHADER_READ)
            .layout_transfer(vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::GENERAL)
            .image_aspect_flag(vk::ImageAspectFlags::COLOR);
        command_buffer.image_memory_barrier(vk::DependencyFlags::empty(), std::slice::from_ref(&image_barrier));

        Ok(stage_buffer)
    }
}

pub struct GfxImageCreateInfo {
    inner: vk::ImageCreateInfo<'static>,

    queue_family_indices: Vec<u32>,
}
impl GfxImageCreateInfo {
    #[inline]
    pub fn new_image_2d_info(extent: vk::Extent2D, format: vk::Format, usage: vk::ImageUsageFlags) -> Self {
        Self {
            inner: vk::ImageCreateInfo {
                image_type: vk::ImageType::TYPE_2D,
                format,
                extent: extent.into(),
                mip_levels: 1,
                array_layers: 1,
                samples: vk::SampleCountFlags::TYPE_1,
                tiling: vk::ImageTiling::OPTIMAL,
                usage,
                sharing_mode: vk::SharingMode::EXCLUSIVE,
                // 这里只能是 UNDEFINED 或者 PREINITIALIZED
                initial_layout: vk::ImageLayout::UNDEFINED,
                ..Default::default()
            },
            queue_family_indices: Vec::new(),
        }
    }

    #[inline]
    pub fn as_info(&self) -> vk::ImageCreateInfo<'_> {
        if self.inner.sharing_mode == vk::SharingMode::CONCURRENT {
            self.inner.queue_family_indices(&self.queue_family_indices)
        } else {
            self.inner
        }
    }

    /// builder
    ///
    /// 只有多个不同的 queue family 时才会使用 CONCURRENT
    #[inline]
    pub fn queue_family_indices(mut self, queue_family_indices: &[u32]) -> Self {
        self.queue_family_indices = queue_family_indices.to_vec();
        self.queue_family_indices.sort_unstable();
        self.queue_family_indices.dedup();
        if self.queue_family_indices.len() > 1 {
            self.inner.sharing_mode = vk::SharingMode::CONCURRENT;
        }
        self
    }
}
