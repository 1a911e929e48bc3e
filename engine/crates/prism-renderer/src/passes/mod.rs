//! 帧图中的 Pass
//!
//! 每个 Pass 分为三部分：
//! - `XxxPipeline`：pipeline 与 set layout，由 orchestrator 持有，跨帧复用
//! - `XxxIo`：帧图中的资源声明，与 GPU 对象无关
//! - `XxxPass<'a>`：借用 pipeline 的 [`RgPass`](prism_render_graph::RgPass) 实现，每帧构建

use ash::vk;

use prism_gfx::commands::command_buffer::GfxCommandBuffer;
use prism_gfx::descriptors::sampler::{GfxSampler, GfxSamplerDesc};
use prism_gfx::gfx::Gfx;
use prism_gfx::resources::image::{GfxImage, GfxImageCreateInfo};
use prism_gfx::resources::image_view::{GfxImageView, GfxImageViewDesc};
use prism_render_interface::gfx_resource_manager::GfxResourceManager;
use prism_render_interface::handles::GfxMeshHandle;

pub mod active_cluster_marker;
pub mod ambient_occlusion;
pub mod cluster_builder;
pub mod composition;
pub mod compute_pass;
pub mod frame_bindings;
pub mod gbuffer;
pub mod light_culler;
pub mod opaque_lighting;
pub mod transparency;

/// 录制时需要的网格数据，在构建帧图之前从资源管理器中解析
#[derive(Clone, Copy, Debug)]
pub struct MeshDraw {
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    pub index_count: u32,
}
impl MeshDraw {
    pub fn resolve(resources: &GfxResourceManager, mesh: GfxMeshHandle) -> anyhow::Result<Self> {
        let mesh = resources.mesh(mesh)?;
        Ok(Self {
            vertex_buffer: resources.buffer(mesh.vertex_buffer)?.vk_buffer(),
            index_buffer: resources.buffer(mesh.index_buffer)?.vk_buffer(),
            index_count: mesh.index_count,
        })
    }

    pub fn record(&self, cmd: &GfxCommandBuffer) {
        cmd.cmd_bind_vertex_buffers(0, &[self.vertex_buffer], &[0]);
        cmd.cmd_bind_index_buffer(self.index_buffer, 0, vk::IndexType::UINT32);
        cmd.cmd_draw_indexed(self.index_count, 0, 1, 0, 0);
    }
}

/// 所有 Pass 共用的 sampler
pub struct PassSamplers {
    pub point: GfxSampler,
    pub linear: GfxSampler,
}
impl PassSamplers {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            point: GfxSampler::new(&GfxSamplerDesc::point_clamp(), "point-clamp")?,
            linear: GfxSampler::new(&GfxSamplerDesc::linear_clamp(), "linear-clamp")?,
        })
    }
}

/// Pass 自己持有的小贴图（噪声、默认白色），上传后处于 GENERAL
pub struct PassTexture {
    pub image: GfxImage,
    pub view: GfxImageView,
}
impl PassTexture {
    pub fn upload(extent: vk::Extent2D, format: vk::Format, pixels: &[u8], debug_name: &str) -> anyhow::Result<Self> {
        let image = GfxImage::new(
            &GfxImageCreateInfo::new_image_2d_info(
                extent,
                format,
                vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            )
            .queue_family_indices(&Gfx::get().queue_family_indices()),
            debug_name,
        )?;

        let uploaded = Gfx::get().one_time_exec(|cmd| image.transfer_data(cmd, pixels), debug_name);
        let stage_buffer = match uploaded {
            Ok(Ok(stage_buffer)) => stage_buffer,
            Ok(Err(e)) | Err(e) => {
                image.destroy();
                return Err(e.context(format!("failed to upload texture <{debug_name}>")));
            }
        };
        stage_buffer.destroy();

        let view = match GfxImageView::new(
            image.handle(),
            GfxImageViewDesc::new_2d(format, vk::ImageAspectFlags::COLOR),
            format!("{debug_name}-view"),
        ) {
            Ok(view) => view,
            Err(e) => {
                image.destroy();
                return Err(e);
            }
        };
        Ok(Self { image, view })
    }

    pub fn destroy(self) {
        self.view.destroy();
        self.image.destroy();
    }
}
