//! 随分辨率变化的资源
//!
//! G-buffer、AO、光照输出、OIT 目标以及 cluster 相关的 buffer。
//! 全部通过 [`GfxResourceManager`] 创建，resize 时按帧号退役，等 GPU 用完后再销毁。
//! 两个 queue 都会访问这些资源，统一使用 CONCURRENT 共享。

use ash::vk;
use itertools::Itertools;

use prism_gfx::gfx::Gfx;
use prism_gfx::resources::buffer::GfxBufferCreateInfo;
use prism_gfx::resources::image::{GfxImageCreateInfo, VulkanFormatUtils};
use prism_gfx::resources::image_view::GfxImageViewDesc;
use prism_render_interface::gfx_resource_manager::GfxResourceManager;
use prism_render_interface::gpu_data::{GpuClusterAabb, GpuClusterLightList};
use prism_render_interface::handles::{GfxBufferHandle, GfxImageHandle};

use crate::frame::graph::FrameImage;
use crate::passes::ambient_occlusion::{AO_FORMAT, AoViews};
use crate::passes::composition::CompositionViews;
use crate::passes::gbuffer::GBufferTarget;
use crate::passes::opaque_lighting::{LIGHTING_FORMAT, OpaqueLightingViews};
use crate::passes::transparency::{OitMomentViews, OitTarget};
use crate::viewport::ViewportLayout;

/// 一张图像的创建参数
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtentImageDesc {
    pub name: String,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
}
impl ExtentImageDesc {
    fn new(name: impl Into<String>, extent: vk::Extent2D, format: vk::Format, usage: vk::ImageUsageFlags) -> Self {
        Self {
            name: name.into(),
            extent,
            format,
            usage,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtentBufferDesc {
    pub name: &'static str,
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
}

/// 某个分辨率下需要的全部资源，不涉及 GPU
#[derive(Clone, Debug)]
pub struct ExtentPlan {
    pub layout: ViewportLayout,
    /// 按 [`GBufferTarget::index`] 排列
    pub gbuffer: Vec<ExtentImageDesc>,
    pub ao_half: ExtentImageDesc,
    pub ao_blur: ExtentImageDesc,
    pub ao_full: ExtentImageDesc,
    pub lighting: ExtentImageDesc,
    /// 每个 present image 一组，组内按 [`OitTarget::index`] 排列
    pub oit: Vec<Vec<ExtentImageDesc>>,

    pub clusters: ExtentBufferDesc,
    pub light_lists: ExtentBufferDesc,
    pub active_flags: ExtentBufferDesc,
}
impl ExtentPlan {
    pub fn new(extent: vk::Extent2D, present_image_count: usize) -> Self {
        let layout = ViewportLayout::new(extent);
        let sampled = vk::ImageUsageFlags::SAMPLED;
        let attachment = vk::ImageUsageFlags::COLOR_ATTACHMENT | sampled;
        let storage = vk::ImageUsageFlags::STORAGE | sampled;

        let gbuffer = GBufferTarget::iter()
            .map(|target| {
                let format = *target.value();
                let usage = if VulkanFormatUtils::is_depth_format(format) {
                    vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | sampled
                } else {
                    attachment
                };
                ExtentImageDesc::new(format!("gbuffer-{target:?}"), extent, format, usage)
            })
            .collect();

        let ao_extent = layout.ao_extent();
        let oit = (0..present_image_count)
            .map(|image_index| {
                OitTarget::iter()
                    .map(|target| {
                        ExtentImageDesc::new(format!("oit-{target:?}-{image_index}"), extent, *target.value(), attachment)
                    })
                    .collect()
            })
            .collect();

        let cluster_count = layout.cluster_buffer_len() as vk::DeviceSize;
        let storage_buffer = vk::BufferUsageFlags::STORAGE_BUFFER;
        Self {
            layout,
            gbuffer,
            ao_half: ExtentImageDesc::new("ao-half", ao_extent, AO_FORMAT, storage),
            ao_blur: ExtentImageDesc::new("ao-blur", ao_extent, AO_FORMAT, storage),
            ao_full: ExtentImageDesc::new("ao-full", extent, AO_FORMAT, storage),
            lighting: ExtentImageDesc::new("lighting", extent, LIGHTING_FORMAT, storage),
            oit,
            clusters: ExtentBufferDesc {
                name: "clusters",
                size: cluster_count * size_of::<GpuClusterAabb>() as vk::DeviceSize,
                usage: storage_buffer,
            },
            light_lists: ExtentBufferDesc {
                name: "cluster-light-lists",
                size: cluster_count * size_of::<GpuClusterLightList>() as vk::DeviceSize,
                usage: storage_buffer,
            },
            active_flags: ExtentBufferDesc {
                name: "active-clusters",
                size: cluster_count * size_of::<u32>() as vk::DeviceSize,
                usage: storage_buffer | vk::BufferUsageFlags::TRANSFER_DST,
            },
        }
    }

    pub fn images(&self) -> impl Iterator<Item = &ExtentImageDesc> {
        self.gbuffer
            .iter()
            .chain([&self.ao_half, &self.ao_blur, &self.ao_full, &self.lighting])
            .chain(self.oit.iter().flatten())
    }
}

/// 已经创建好的一张图像
#[derive(Clone, Copy, Debug)]
pub struct ExtentImage {
    pub handle: GfxImageHandle,
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub format: vk::Format,
}

impl ExtentImage {
    #[inline]
    pub fn frame_image(&self) -> FrameImage {
        FrameImage {
            image: self.image,
            view: self.view,
            format: self.format,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ExtentBuffer {
    pub handle: GfxBufferHandle,
    pub buffer: vk::Buffer,
}

pub struct ExtentResources {
    layout: ViewportLayout,

    pub gbuffer: Vec<ExtentImage>,
    pub ao_half: ExtentImage,
    pub ao_blur: ExtentImage,
    pub ao_full: ExtentImage,
    pub lighting: ExtentImage,
    pub oit: Vec<Vec<ExtentImage>>,

    pub clusters: ExtentBuffer,
    pub light_lists: ExtentBuffer,
    pub active_flags: ExtentBuffer,
}
// new & init
impl ExtentResources {
    pub fn new(plan: &ExtentPlan, resources: &mut GfxResourceManager) -> anyhow::Result<Self> {
        let _span = tracy_client::span!("ExtentResources::new");
        let extent = plan.layout.extent;
        log::info!(
            "create extent resources {}x{}: {} clusters, {} oit target sets",
            extent.width,
            extent.height,
            plan.layout.cluster_count(),
            plan.oit.len()
        );

        let qfi = Gfx::get().queue_family_indices();
        let mut create_image = |desc: &ExtentImageDesc| -> anyhow::Result<ExtentImage> {
            let info = GfxImageCreateInfo::new_image_2d_info(desc.extent, desc.format, desc.usage)
                .queue_family_indices(&qfi);
            let handle = resources.create_image(&info, &desc.name)?;
            let view_desc = GfxImageViewDesc::new_2d(desc.format, VulkanFormatUtils::aspect_of(desc.format));
            let view = resources.get_or_create_image_view(handle, view_desc, &desc.name)?;
            Ok(ExtentImage {
                handle,
                image: resources.image(handle)?.handle(),
                view: resources.image_view(view)?,
                format: desc.format,
            })
        };

        let gbuffer: Vec<ExtentImage> = plan.gbuffer.iter().map(&mut create_image).try_collect()?;
        let ao_half = create_image(&plan.ao_half)?;
        let ao_blur = create_image(&plan.ao_blur)?;
        let ao_full = create_image(&plan.ao_full)?;
        let lighting = create_image(&plan.lighting)?;
        let oit: Vec<Vec<ExtentImage>> = plan
            .oit
            .iter()
            .map(|targets| targets.iter().map(&mut create_image).try_collect::<_, Vec<_>, _>())
            .try_collect()?;

        let mut create_buffer = |desc: &ExtentBufferDesc| -> anyhow::Result<ExtentBuffer> {
            let info = GfxBufferCreateInfo::new(desc.size, desc.usage).queue_family_indices(&qfi);
            let handle = resources.create_buffer(&info, desc.name)?;
            Ok(ExtentBuffer {
                handle,
                buffer: resources.buffer(handle)?.vk_buffer(),
            })
        };
        let clusters = create_buffer(&plan.clusters)?;
        let light_lists = create_buffer(&plan.light_lists)?;
        let active_flags = create_buffer(&plan.active_flags)?;

        Ok(Self {
            layout: plan.layout,
            gbuffer,
            ao_half,
            ao_blur,
            ao_full,
            lighting,
            oit,
            clusters,
            light_lists,
            active_flags,
        })
    }
}
// getters
impl ExtentResources {
    #[inline]
    pub fn layout(&self) -> &ViewportLayout {
        &self.layout
    }

    #[inline]
    pub fn gbuffer(&self, target: GBufferTarget) -> &ExtentImage {
        &self.gbuffer[target.index()]
    }

    pub fn oit(&self, image_index: usize, target: OitTarget) -> anyhow::Result<&ExtentImage> {
        self.oit
            .get(image_index)
            .map(|targets| &targets[target.index()])
            .ok_or_else(|| anyhow::anyhow!("no oit targets for present image {image_index}"))
    }

    pub fn ao_views(&self) -> AoViews {
        AoViews {
            depth: self.gbuffer(GBufferTarget::Depth).view,
            normal: self.gbuffer(GBufferTarget::Normal).view,
            ao_half: self.ao_half.view,
            ao_blur: self.ao_blur.view,
            ao_full: self.ao_full.view,
        }
    }

    pub fn lighting_views(&self) -> OpaqueLightingViews {
        OpaqueLightingViews {
            normal: self.gbuffer(GBufferTarget::Normal).view,
            albedo: self.gbuffer(GBufferTarget::Albedo).view,
            metal_roughness: self.gbuffer(GBufferTarget::MetalRoughness).view,
            depth: self.gbuffer(GBufferTarget::Depth).view,
            ao: self.ao_full.view,
            lighting: self.lighting.view,
        }
    }

    pub fn moment_views(&self, image_index: usize) -> anyhow::Result<OitMomentViews> {
        Ok(OitMomentViews {
            b0: self.oit(image_index, OitTarget::B0)?.view,
            b1234: self.oit(image_index, OitTarget::B1234)?.view,
            b56: self.oit(image_index, OitTarget::B56)?.view,
        })
    }

    pub fn composition_views(&self, image_index: usize) -> anyhow::Result<CompositionViews> {
        Ok(CompositionViews {
            lighting: self.lighting.view,
            b0: self.oit(image_index, OitTarget::B0)?.view,
            accum: self.oit(image_index, OitTarget::Accum)?.view,
        })
    }
}
// destroy
impl ExtentResources {
    /// 交给资源管理器延迟销毁，`frame_id` 之后 frames in flight 帧才会真正释放
    pub fn retire(self, resources: &mut GfxResourceManager, frame_id: u64) {
        let images = self.gbuffer.iter().chain([&self.ao_half, &self.ao_blur, &self.ao_full, &self.lighting]);
        for image in images.chain(self.oit.iter().flatten()) {
            resources.destroy_image(image.handle, frame_id);
        }
        for buffer in [self.clusters, self.light_lists, self.active_flags] {
            resources.destroy_buffer(buffer.handle, frame_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_render_interface::gpu_data::ClusterConsts;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn test_gbuffer_targets_share_extent() {
        let plan = ExtentPlan::new(extent(1280, 721), 3);
        assert_eq!(plan.gbuffer.len(), GBufferTarget::COUNT);
        assert!(plan.gbuffer.iter().all(|desc| desc.extent == extent(1280, 721)));
        assert_eq!(plan.lighting.extent, extent(1280, 721));
        assert_eq!(plan.ao_full.extent, extent(1280, 721));

        let depth = &plan.gbuffer[GBufferTarget::Depth.index()];
        assert_eq!(depth.format, vk::Format::D32_SFLOAT);
        assert!(depth.usage.contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT));
    }

    #[test]
    fn test_ao_targets_are_half_resolution() {
        let plan = ExtentPlan::new(extent(1281, 721), 2);
        assert_eq!(plan.ao_half.extent, extent(641, 361));
        assert_eq!(plan.ao_blur.extent, plan.ao_half.extent);
        assert!(plan.ao_half.usage.contains(vk::ImageUsageFlags::STORAGE));
    }

    #[test]
    fn test_oit_targets_per_present_image() {
        let plan = ExtentPlan::new(extent(800, 600), 3);
        assert_eq!(plan.oit.len(), 3);
        for targets in &plan.oit {
            let formats = targets.iter().map(|desc| desc.format).collect_vec();
            assert_eq!(formats, OitTarget::array().to_vec());
        }
        let names = plan.images().map(|desc| desc.name.as_str()).collect_vec();
        assert_eq!(names.len(), names.iter().unique().count());
        assert_eq!(names.len(), GBufferTarget::COUNT + 4 + 3 * OitTarget::COUNT);
    }

    #[test]
    fn test_cluster_buffer_sizes() {
        let plan = ExtentPlan::new(extent(1920, 1080), 2);
        let clusters = (60 * 34 * ClusterConsts::Z_SLICES) as u64;
        assert_eq!(plan.clusters.size, clusters * 32);
        assert_eq!(plan.light_lists.size, clusters * 4096);
        assert_eq!(plan.active_flags.size, clusters * 4);
        assert!(plan.active_flags.usage.contains(vk::BufferUsageFlags::TRANSFER_DST));
    }

    /// 不经过 GPU 的资源：句柄只在 slotmap 中占位
    fn placeholder_resources(plan: &ExtentPlan) -> ExtentResources {
        let mut images = slotmap::SlotMap::<GfxImageHandle, ()>::with_key();
        let mut buffers = slotmap::SlotMap::<GfxBufferHandle, ()>::with_key();
        let mut image = |desc: &ExtentImageDesc| ExtentImage {
            handle: images.insert(()),
            image: vk::Image::null(),
            view: vk::ImageView::null(),
            format: desc.format,
        };
        let mut buffer = || ExtentBuffer {
            handle: buffers.insert(()),
            buffer: vk::Buffer::null(),
        };
        ExtentResources {
            layout: plan.layout,
            gbuffer: plan.gbuffer.iter().map(&mut image).collect(),
            ao_half: image(&plan.ao_half),
            ao_blur: image(&plan.ao_blur),
            ao_full: image(&plan.ao_full),
            lighting: image(&plan.lighting),
            oit: plan.oit.iter().map(|targets| targets.iter().map(&mut image).collect()).collect(),
            clusters: buffer(),
            light_lists: buffer(),
            active_flags: buffer(),
        }
    }

    #[test]
    fn test_resize_recomputes_layout_and_retires_old_resources() {
        let before = ExtentPlan::new(extent(1280, 720), 2);
        assert_eq!((before.layout.tile_count_x, before.layout.tile_count_y), (40, 23));
        let old = placeholder_resources(&before);
        let old_handle_count = before.images().count() + 3;

        let after = ExtentPlan::new(extent(1921, 1081), 3);
        assert_eq!((after.layout.tile_count_x, after.layout.tile_count_y), (1921u32.div_ceil(32), 1081u32.div_ceil(32)));
        assert_eq!((after.layout.tile_count_x, after.layout.tile_count_y), (61, 34));
        assert_eq!(after.layout.cluster_count(), 61 * 34 * ClusterConsts::Z_SLICES);
        assert_eq!(after.clusters.size, after.layout.cluster_count() as u64 * 32);
        assert_eq!(after.ao_half.extent, extent(961, 541));
        assert_eq!(after.oit.len(), 3);

        // frame 7 resize，fif = 2：frame 9 开始时旧资源才释放
        let mut resources = GfxResourceManager::new();
        old.retire(&mut resources, 7);
        assert_eq!(resources.pending_destroy_count(), old_handle_count);

        resources.cleanup(8, 2);
        assert_eq!(resources.pending_destroy_count(), old_handle_count);
        resources.cleanup(9, 2);
        assert_eq!(resources.pending_destroy_count(), 0);

        resources.destroy();
    }
}
