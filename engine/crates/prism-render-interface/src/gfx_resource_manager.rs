use std::collections::HashMap;

use anyhow::Context;
use ash::vk;
use slotmap::{SecondaryMap, SlotMap};

use prism_gfx::resources::{
    buffer::{GfxBuffer, GfxBufferCreateInfo},
    image::{GfxImage, GfxImageCreateInfo},
    image_view::{GfxImageView, GfxImageViewDesc},
};

use crate::{
    handles::{GfxBufferHandle, GfxImageHandle, GfxImageViewHandle, GfxMaterialHandle, GfxMeshHandle},
    retire_queue::RetireQueue,
};

/// 已经上传到 GPU 的网格
#[derive(Clone, Copy, Debug)]
pub struct GfxMesh {
    pub vertex_buffer: GfxBufferHandle,
    pub index_buffer: GfxBufferHandle,
    pub index_count: u32,
}

/// PBR 材质
///
/// 任意一张贴图存在时，GBuffer pass 使用贴图采样的 pipeline 变体，否则使用参数化的变体
#[derive(Clone, Copy, Debug)]
pub struct GfxMaterial {
    pub base_color: glam::Vec4,
    pub metallic: f32,
    pub roughness: f32,
    pub albedo_texture: Option<GfxImageViewHandle>,
    pub metal_roughness_texture: Option<GfxImageViewHandle>,
}
impl Default for GfxMaterial {
    fn default() -> Self {
        Self {
            base_color: glam::Vec4::ONE,
            metallic: 0.0,
            roughness: 0.5,
            albedo_texture: None,
            metal_roughness_texture: None,
        }
    }
}
impl GfxMaterial {
    #[inline]
    pub fn is_textured(&self) -> bool {
        self.albedo_texture.is_some() || self.metal_roughness_texture.is_some()
    }
}

/// 资源管理器
///
/// 负责管理所有的 GPU 资源，包括 Buffer、Image、ImageView 以及上层的 Mesh 和 Material。
/// 使用 SlotMap 存储资源，对外提供轻量级的 Handle。
/// 支持资源的延迟销毁（Frames in Flight）。
pub struct GfxResourceManager {
    buffer_pool: SlotMap<GfxBufferHandle, GfxBuffer>,
    image_pool: SlotMap<GfxImageHandle, GfxImage>,
    image_view_pool: SlotMap<GfxImageViewHandle, GfxImageView>,

    /// 用于快速查询：(ImageHandle, ViewDesc) -> ImageViewHandle
    image_view_lookup: HashMap<(GfxImageHandle, GfxImageViewDesc), GfxImageViewHandle>,
    /// 用于缓存：ImageHandle -> 所有关联的 ImageViewHandle
    image_to_views: SecondaryMap<GfxImageHandle, Vec<GfxImageViewHandle>>,

    meshes: SlotMap<GfxMeshHandle, GfxMesh>,
    materials: SlotMap<GfxMaterialHandle, GfxMaterial>,

    pending_destroy_buffers: RetireQueue<GfxBufferHandle>,
    pending_destroy_images: RetireQueue<GfxImageHandle>,

    destroyed: bool,
}
impl Default for GfxResourceManager {
    fn default() -> Self {
        Self::new()
    }
}
// new & init
impl GfxResourceManager {
    pub fn new() -> Self {
        Self {
            buffer_pool: SlotMap::with_key(),
            image_pool: SlotMap::with_key(),
            image_view_pool: SlotMap::with_key(),
            image_view_lookup: HashMap::new(),
            image_to_views: SecondaryMap::new(),
            meshes: SlotMap::with_key(),
            materials: SlotMap::with_key(),

            pending_destroy_buffers: RetireQueue::new(),
            pending_destroy_images: RetireQueue::new(),

            destroyed: false,
        }
    }
}
// destroy
impl GfxResourceManager {
    pub fn destroy(mut self) {
        self.destroy_mut();
    }
    pub fn destroy_mut(&mut self) {
        let _span = tracy_client::span!("GfxResourceManager::destroy_all");

        for (_, image_view) in self.image_view_pool.drain() {
            image_view.destroy()
        }
        self.image_view_lookup.clear();
        self.image_to_views.clear();

        for (_, image) in self.image_pool.drain() {
            image.destroy()
        }
        for (_, buffer) in self.buffer_pool.drain() {
            buffer.destroy()
        }
        self.meshes.clear();
        self.materials.clear();

        self.pending_destroy_buffers.drain_all();
        self.pending_destroy_images.drain_all();

        self.destroyed = true;
    }
}
impl Drop for GfxResourceManager {
    fn drop(&mut self) {
        debug_assert!(self.destroyed, "GfxResourceManager must be destroyed manually.");
    }
}
// Subsystem API
impl GfxResourceManager {
    /// 清理已过期的资源
    ///
    /// 退役帧号 + fif_count <= current_frame_id 的资源已经不再被 GPU 使用
    pub fn cleanup(&mut self, current_frame_id: u64, fif_count: usize) {
        let _span = tracy_client::span!("GfxResourceManager::cleanup");

        for buffer_handle in self.pending_destroy_buffers.drain_expired(current_frame_id, fif_count as u64) {
            if let Some(buffer) = self.buffer_pool.remove(buffer_handle) {
                buffer.destroy()
            }
        }
        for image_handle in self.pending_destroy_images.drain_expired(current_frame_id, fif_count as u64) {
            self.destroy_image_immediate(image_handle);
        }
    }
}
// Buffer API
impl GfxResourceManager {
    pub fn register_buffer(&mut self, buffer: GfxBuffer) -> GfxBufferHandle {
        self.buffer_pool.insert(buffer)
    }

    pub fn create_buffer(
        &mut self,
        create_info: &GfxBufferCreateInfo,
        name: impl AsRef<str>,
    ) -> anyhow::Result<GfxBufferHandle> {
        let buffer = GfxBuffer::new(create_info, name)?;
        Ok(self.register_buffer(buffer))
    }

    #[inline]
    pub fn get_buffer(&self, handle: GfxBufferHandle) -> Option<&GfxBuffer> {
        self.buffer_pool.get(handle)
    }

    #[inline]
    pub fn buffer(&self, handle: GfxBufferHandle) -> anyhow::Result<&GfxBuffer> {
        self.buffer_pool.get(handle).context("invalid buffer handle")
    }

    /// 将 Buffer 加入待销毁队列，在 `current_frame_id` 对应的帧完成后销毁。
    pub fn destroy_buffer(&mut self, handle: GfxBufferHandle, current_frame_id: u64) {
        self.pending_destroy_buffers.retire(handle, current_frame_id);
    }

    /// 已经退役、还在等待 GPU 用完的 buffer 与 image 数量
    #[inline]
    pub fn pending_destroy_count(&self) -> usize {
        self.pending_destroy_buffers.len() + self.pending_destroy_images.len()
    }
}
// Image API
impl GfxResourceManager {
    pub fn register_image(&mut self, image: GfxImage) -> GfxImageHandle {
        self.image_pool.insert(image)
    }

    pub fn create_image(&mut self, image_info: &GfxImageCreateInfo, debug_name: &str) -> anyhow::Result<GfxImageHandle> {
        let image = GfxImage::new(image_info, debug_name)?;
        Ok(self.register_image(image))
    }

    #[inline]
    pub fn get_image(&self, handle: GfxImageHandle) -> Option<&GfxImage> {
        self.image_pool.get(handle)
    }

    #[inline]
    pub fn image(&self, handle: GfxImageHandle) -> anyhow::Result<&GfxImage> {
        self.image_pool.get(handle).context("invalid image handle")
    }

    /// 将 Image 加入待销毁队列，关联的 ImageView 会一起销毁
    pub fn destroy_image(&mut self, handle: GfxImageHandle, current_frame_id: u64) {
        self.pending_destroy_images.retire(handle, current_frame_id);
    }

    /// 立即销毁 Image 及其关联的所有 ImageView
    ///
    /// 调用者需要确保该资源不再被 GPU 使用
    pub fn destroy_image_immediate(&mut self, handle: GfxImageHandle) {
        if let Some(view_handles) = self.image_to_views.remove(handle) {
            for image_view_handle in view_handles {
                if let Some(image_view) = self.image_view_pool.remove(image_view_handle) {
                    self.image_view_lookup.remove(&(handle, *image_view.desc()));
                    image_view.destroy()
                }
            }
        }

        self.pending_destroy_images.remove_if(|h| *h == handle);

        if let Some(image) = self.image_pool.remove(handle) {
            image.destroy()
        }
    }
}
// ImageView API
impl GfxResourceManager {
    /// 相同 (image, desc) 只会创建一次 ImageView
    pub fn get_or_create_image_view(
        &mut self,
        image_handle: GfxImageHandle,
        view_desc: GfxImageViewDesc,
        name: impl AsRef<str>,
    ) -> anyhow::Result<GfxImageViewHandle> {
        let lookup_key = (image_handle, view_desc);
        if let Some(&existing_handle) = self.image_view_lookup.get(&lookup_key) {
            return Ok(existing_handle);
        }

        let image = self.image_pool.get(image_handle).context("invalid image handle")?;
        let image_view = GfxImageView::new(image.handle(), view_desc, name)?;
        let image_view_handle = self.image_view_pool.insert(image_view);

        self.image_view_lookup.insert(lookup_key, image_view_handle);
        self.image_to_views
            .entry(image_handle)
            .context("image handle removed while creating view")?
            .or_default()
            .push(image_view_handle);

        Ok(image_view_handle)
    }

    #[inline]
    pub fn get_image_view(&self, handle: GfxImageViewHandle) -> Option<&GfxImageView> {
        self.image_view_pool.get(handle)
    }

    #[inline]
    pub fn image_view(&self, handle: GfxImageViewHandle) -> anyhow::Result<vk::ImageView> {
        self.image_view_pool.get(handle).map(|v| v.handle()).context("invalid image view handle")
    }
}
// Mesh & Material API
impl GfxResourceManager {
    /// 上传顶点与索引，索引为 u32
    pub fn create_mesh<V: bytemuck::Pod>(
        &mut self,
        vertices: &[V],
        indices: &[u32],
        name: &str,
    ) -> anyhow::Result<GfxMeshHandle> {
        let vertex_buffer = GfxBuffer::new(
            &GfxBufferCreateInfo::new(
                size_of_val(vertices) as vk::DeviceSize,
                vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            ),
            format!("{name}-vertex"),
        )?;
        if let Err(e) = vertex_buffer.transfer_data_sync(vertices) {
            vertex_buffer.destroy();
            return Err(e);
        }
        let vertex_buffer = self.register_buffer(vertex_buffer);

        let index_buffer = GfxBuffer::new(
            &GfxBufferCreateInfo::new(
                size_of_val(indices) as vk::DeviceSize,
                vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            ),
            format!("{name}-index"),
        )?;
        if let Err(e) = index_buffer.transfer_data_sync(indices) {
            index_buffer.destroy();
            return Err(e);
        }
        let index_buffer = self.register_buffer(index_buffer);

        Ok(self.meshes.insert(GfxMesh {
            vertex_buffer,
            index_buffer,
            index_count: indices.len() as u32,
        }))
    }

    #[inline]
    pub fn mesh(&self, handle: GfxMeshHandle) -> anyhow::Result<&GfxMesh> {
        self.meshes.get(handle).context("invalid mesh handle")
    }

    #[inline]
    pub fn register_material(&mut self, material: GfxMaterial) -> GfxMaterialHandle {
        self.materials.insert(material)
    }

    #[inline]
    pub fn material(&self, handle: GfxMaterialHandle) -> anyhow::Result<&GfxMaterial> {
        self.materials.get(handle).context("invalid material handle")
    }
}
