use ash::vk;

use prism_render_interface::gpu_data::ClusterConsts;

/// 由画面尺寸推导出的分簇与调度参数
///
/// resize 时整体重新计算
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ViewportLayout {
    pub extent: vk::Extent2D,
    pub tile_count_x: u32,
    pub tile_count_y: u32,
}

// new & init
impl ViewportLayout {
    /// 2D 图像 pass 的 workgroup 边长
    pub const IMAGE_GROUP_SIZE: u32 = 16;
    /// 分簇构建 pass 的 workgroup 线程数
    pub const CLUSTER_GROUP_SIZE: u32 = 64;

    pub fn new(extent: vk::Extent2D) -> Self {
        Self {
            extent,
            tile_count_x: extent.width.div_ceil(ClusterConsts::TILE_SIZE),
            tile_count_y: extent.height.div_ceil(ClusterConsts::TILE_SIZE),
        }
    }
}

// getters
impl ViewportLayout {
    #[inline]
    pub fn cluster_count(&self) -> u32 {
        self.tile_count_x * self.tile_count_y * ClusterConsts::Z_SLICES
    }

    /// cluster 在线性数组中的位置，x 变化最快
    #[inline]
    pub fn cluster_index(&self, tile_x: u32, tile_y: u32, slice: u32) -> u32 {
        tile_x + tile_y * self.tile_count_x + slice * self.tile_count_x * self.tile_count_y
    }

    /// AO 在半分辨率下计算
    #[inline]
    pub fn ao_extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.extent.width.div_ceil(2),
            height: self.extent.height.div_ceil(2),
        }
    }

    pub fn cluster_build_groups(&self) -> glam::UVec3 {
        glam::UVec3::new(self.cluster_count().div_ceil(Self::CLUSTER_GROUP_SIZE), 1, 1)
    }

    /// 光源剔除每个 cluster 一个 workgroup
    pub fn light_cull_groups(&self) -> glam::UVec3 {
        glam::UVec3::new(self.tile_count_x, self.tile_count_y, ClusterConsts::Z_SLICES)
    }

    pub fn image_groups(extent: vk::Extent2D) -> glam::UVec3 {
        glam::UVec3::new(
            extent.width.div_ceil(Self::IMAGE_GROUP_SIZE),
            extent.height.div_ceil(Self::IMAGE_GROUP_SIZE),
            1,
        )
    }

    #[inline]
    pub fn cluster_buffer_len(&self) -> usize {
        self.cluster_count() as usize
    }

    #[inline]
    pub fn screen(&self) -> glam::UVec4 {
        glam::UVec4::new(self.extent.width, self.extent.height, self.tile_count_x, self.tile_count_y)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.extent.width == 0 || self.extent.height == 0
    }
}

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng};

    use super::*;

    #[test]
    fn test_tiles_cover_extent() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        for _ in 0..256 {
            let extent = vk::Extent2D {
                width: rng.gen_range(1..4096),
                height: rng.gen_range(1..4096),
            };
            let layout = ViewportLayout::new(extent);

            assert_eq!(layout.cluster_count(), layout.tile_count_x * layout.tile_count_y * ClusterConsts::Z_SLICES);
            assert!(layout.tile_count_x * ClusterConsts::TILE_SIZE >= extent.width);
            assert!(layout.tile_count_y * ClusterConsts::TILE_SIZE >= extent.height);
            assert!((layout.tile_count_x - 1) * ClusterConsts::TILE_SIZE < extent.width);
            assert!((layout.tile_count_y - 1) * ClusterConsts::TILE_SIZE < extent.height);
        }
    }

    #[test]
    fn test_1080p_layout() {
        let layout = ViewportLayout::new(vk::Extent2D {
            width: 1920,
            height: 1080,
        });
        assert_eq!((layout.tile_count_x, layout.tile_count_y), (60, 34));
        assert_eq!(layout.cluster_count(), 60 * 34 * 16);
        assert!(layout.cluster_build_groups().x * ViewportLayout::CLUSTER_GROUP_SIZE >= layout.cluster_count());
        assert_eq!(layout.light_cull_groups(), glam::UVec3::new(60, 34, 16));
        assert_eq!(layout.cluster_index(59, 33, 15), layout.cluster_count() - 1);
    }

    #[test]
    fn test_ao_extent_rounds_up() {
        let layout = ViewportLayout::new(vk::Extent2D { width: 801, height: 599 });
        assert_eq!(layout.ao_extent(), vk::Extent2D { width: 401, height: 300 });
        assert_eq!(ViewportLayout::image_groups(layout.ao_extent()), glam::UVec3::new(26, 19, 1));
    }
}
