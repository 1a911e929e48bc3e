//! 分簇构建、深度切片标记以及光源分配
//!
//! 与 `shader/src/cluster/*.slang` 的计算一一对应

use glam::{Mat4, Vec2, Vec3, Vec4, Vec4Swizzles};

use prism_render_interface::gpu_data::{ClusterConsts, GpuClusterAabb, GpuPointLight};

use crate::viewport::ViewportLayout;

/// 视空间深度到切片的对数映射
///
/// ```text
/// slice(z)       = floor(log2(z) * scale + bias)
/// slice_depth(k) = near * (far / near)^(k / Z_SLICES)
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SliceMapping {
    pub near: f32,
    pub far: f32,
    pub scale: f32,
    pub bias: f32,
}

impl SliceMapping {
    pub fn new(near: f32, far: f32) -> Self {
        let slices = ClusterConsts::Z_SLICES as f32;
        let log_ratio = (far / near).log2();
        Self {
            near,
            far,
            scale: slices / log_ratio,
            bias: -slices * near.log2() / log_ratio,
        }
    }

    /// 视空间深度（沿视线为正）所在的切片，超出 `[near, far]` 的深度夹到首尾切片
    pub fn slice_of(&self, view_depth: f32) -> u32 {
        let slice = (view_depth.max(self.near).log2() * self.scale + self.bias).floor();
        (slice.max(0.0) as u32).min(ClusterConsts::Z_SLICES - 1)
    }

    /// 第 k 个切片的近端深度，`k = Z_SLICES` 时为 far
    pub fn slice_depth(&self, k: u32) -> f32 {
        self.near * (self.far / self.near).powf(k as f32 / ClusterConsts::Z_SLICES as f32)
    }
}

/// 像素坐标到 NDC，屏幕 y 向下，NDC y 向上
#[inline]
pub fn pixel_to_ndc(pixel: Vec2, extent: Vec2) -> Vec2 {
    Vec2::new(2.0 * pixel.x / extent.x - 1.0, 1.0 - 2.0 * pixel.y / extent.y)
}

/// 把像素反投影到视空间中深度为 `view_depth` 的平面上
pub fn unproject_pixel(inv_projection: &Mat4, pixel: Vec2, extent: Vec2, view_depth: f32) -> Vec3 {
    let ndc = pixel_to_ndc(pixel, extent);
    // NDC z = 0 对应近平面
    let on_near = *inv_projection * Vec4::new(ndc.x, ndc.y, 0.0, 1.0);
    let on_near = on_near.xyz() / on_near.w;
    on_near * (view_depth / -on_near.z)
}

/// `[0, 1]` 的深度缓冲值还原为视空间深度
#[inline]
pub fn linearize_depth(depth: f32, near: f32, far: f32) -> f32 {
    near * far / (far - depth * (far - near))
}

/// 每个 cluster 的视空间包围盒
///
/// tile 的两个对角在切片近端和远端深度上反投影得到 4 个点，取它们的包围盒
pub fn build_cluster_aabbs(inv_projection: &Mat4, layout: &ViewportLayout, slices: &SliceMapping) -> Vec<GpuClusterAabb> {
    let extent = Vec2::new(layout.extent.width as f32, layout.extent.height as f32);
    let tile = ClusterConsts::TILE_SIZE as f32;

    (0..layout.cluster_count())
        .map(|index| {
            let tile_x = index % layout.tile_count_x;
            let tile_y = (index / layout.tile_count_x) % layout.tile_count_y;
            let slice = index / (layout.tile_count_x * layout.tile_count_y);

            let min_pixel = Vec2::new(tile_x as f32, tile_y as f32) * tile;
            let max_pixel = min_pixel + Vec2::splat(tile);
            let near_depth = slices.slice_depth(slice);
            let far_depth = slices.slice_depth(slice + 1);

            let points = [
                unproject_pixel(inv_projection, min_pixel, extent, near_depth),
                unproject_pixel(inv_projection, min_pixel, extent, far_depth),
                unproject_pixel(inv_projection, max_pixel, extent, near_depth),
                unproject_pixel(inv_projection, max_pixel, extent, far_depth),
            ];
            let min = points.iter().fold(Vec3::splat(f32::MAX), |acc, p| acc.min(*p));
            let max = points.iter().fold(Vec3::splat(f32::MIN), |acc, p| acc.max(*p));

            GpuClusterAabb {
                min: min.extend(0.0),
                max: max.extend(0.0),
            }
        })
        .collect()
}

/// 把深度缓冲中的每个像素映射到所在的 cluster 并标记
///
/// `depth` 按行存放，值为 1 的像素是背景，不标记
pub fn mark_active_clusters(depth: &[f32], layout: &ViewportLayout, slices: &SliceMapping) -> Vec<u32> {
    let mut flags = vec![0u32; layout.cluster_buffer_len()];
    let width = layout.extent.width as usize;

    for (i, &d) in depth.iter().enumerate() {
        if d >= 1.0 {
            continue;
        }
        let x = (i % width) as u32;
        let y = (i / width) as u32;
        let view_depth = linearize_depth(d, slices.near, slices.far);
        let index = layout.cluster_index(
            x / ClusterConsts::TILE_SIZE,
            y / ClusterConsts::TILE_SIZE,
            slices.slice_of(view_depth),
        );
        flags[index as usize] = 1;
    }
    flags
}

/// 光源分配的结果
#[derive(Clone, Debug, Default)]
pub struct ClusterLightAssignment {
    pub lists: Vec<Vec<u32>>,
    /// 因为列表已满而丢弃的索引数
    pub overflow: u64,
}

#[inline]
pub fn sphere_intersects_aabb(center: Vec3, radius: f32, aabb: &GpuClusterAabb) -> bool {
    let closest = center.clamp(aabb.min.xyz(), aabb.max.xyz());
    closest.distance_squared(center) <= radius * radius
}

/// 为每个 cluster 收集与之相交的点光源
///
/// `active` 存在时跳过未被标记的 cluster；每个列表最多
/// [`ClusterConsts::MAX_LIGHTS_PER_CLUSTER`] 个，多出来的计入 `overflow`
pub fn assign_lights(
    clusters: &[GpuClusterAabb],
    view: &Mat4,
    lights: &[GpuPointLight],
    active: Option<&[u32]>,
) -> ClusterLightAssignment {
    let cap = ClusterConsts::MAX_LIGHTS_PER_CLUSTER as usize;
    let view_lights: Vec<(Vec3, f32)> =
        lights.iter().map(|light| (view.transform_point3(light.position), light.range)).collect();

    let mut overflow = 0;
    let lists = clusters
        .iter()
        .enumerate()
        .map(|(cluster_idx, aabb)| {
            if active.is_some_and(|flags| flags[cluster_idx] == 0) {
                return Vec::new();
            }
            let mut list = Vec::new();
            for (light_idx, (center, radius)) in view_lights.iter().enumerate() {
                if !sphere_intersects_aabb(*center, *radius, aabb) {
                    continue;
                }
                if list.len() < cap {
                    list.push(light_idx as u32);
                } else {
                    overflow += 1;
                }
            }
            list
        })
        .collect();

    ClusterLightAssignment { lists, overflow }
}

#[cfg(test)]
mod tests {
    use ash::vk;
    use rand::{Rng, SeedableRng};

    use super::*;

    const NEAR: f32 = 0.1;
    const FAR: f32 = 200.0;

    fn layout() -> ViewportLayout {
        ViewportLayout::new(vk::Extent2D {
            width: 320,
            height: 200,
        })
    }

    fn projection(layout: &ViewportLayout) -> Mat4 {
        let aspect = layout.extent.width as f32 / layout.extent.height as f32;
        Mat4::perspective_rh(60f32.to_radians(), aspect, NEAR, FAR)
    }

    #[test]
    fn test_slice_bounds() {
        let slices = SliceMapping::new(NEAR, FAR);
        assert!((slices.slice_depth(0) - NEAR).abs() < 1e-6);
        assert!((slices.slice_depth(ClusterConsts::Z_SLICES) - FAR).abs() < 1e-2);

        assert_eq!(slices.slice_of(NEAR), 0);
        assert_eq!(slices.slice_of(FAR), ClusterConsts::Z_SLICES - 1);
        assert_eq!(slices.slice_of(FAR * 10.0), ClusterConsts::Z_SLICES - 1);
        assert_eq!(slices.slice_of(NEAR * 0.5), 0);

        for k in 0..ClusterConsts::Z_SLICES {
            let mid = (slices.slice_depth(k) * slices.slice_depth(k + 1)).sqrt();
            assert_eq!(slices.slice_of(mid), k);
        }
    }

    #[test]
    fn test_slice_monotonic() {
        let slices = SliceMapping::new(NEAR, FAR);
        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        for _ in 0..10_000 {
            let a = rng.gen_range(NEAR..FAR);
            let b = rng.gen_range(NEAR..FAR);
            let (z1, z2) = if a < b { (a, b) } else { (b, a) };
            assert!(slices.slice_of(z1) <= slices.slice_of(z2), "z1 = {z1}, z2 = {z2}");
        }
    }

    #[test]
    fn test_linearize_depth_matches_projection() {
        let layout = layout();
        let proj = projection(&layout);
        for view_depth in [NEAR, 1.0, 13.5, 150.0] {
            let clip = proj * Vec4::new(0.0, 0.0, -view_depth, 1.0);
            let depth = clip.z / clip.w;
            assert!((linearize_depth(depth, NEAR, FAR) - view_depth).abs() / view_depth < 1e-3);
        }
    }

    #[test]
    fn test_cluster_aabbs_tile_the_frustum() {
        let layout = layout();
        let proj = projection(&layout);
        let slices = SliceMapping::new(NEAR, FAR);
        let clusters = build_cluster_aabbs(&proj.inverse(), &layout, &slices);
        assert_eq!(clusters.len(), layout.cluster_buffer_len());

        // 第一个切片从近平面开始，最后一个切片在远平面结束
        let first = clusters[0];
        assert!((first.max.z + NEAR).abs() < 1e-4);
        let last = clusters[clusters.len() - 1];
        assert!((last.min.z + FAR).abs() < 1e-1);

        // 左上角的 tile 在视空间的左上
        assert!(first.min.x < 0.0 && first.max.y > 0.0);

        // 视锥中的任意一点都落在它所在 cluster 的包围盒中
        let extent = Vec2::new(layout.extent.width as f32, layout.extent.height as f32);
        let mut rng = rand::rngs::StdRng::seed_from_u64(11);
        for _ in 0..2000 {
            let pixel = Vec2::new(rng.gen_range(0.0..extent.x), rng.gen_range(0.0..extent.y));
            let k = rng.gen_range(0..ClusterConsts::Z_SLICES);
            let t = rng.gen_range(0.1..0.9);
            let depth = slices.slice_depth(k) + t * (slices.slice_depth(k + 1) - slices.slice_depth(k));
            let p = unproject_pixel(&proj.inverse(), pixel, extent, depth);

            let index = layout.cluster_index(
                pixel.x as u32 / ClusterConsts::TILE_SIZE,
                pixel.y as u32 / ClusterConsts::TILE_SIZE,
                slices.slice_of(depth),
            );
            let aabb = clusters[index as usize];
            let eps = Vec3::splat(1e-3 * depth);
            assert!(p.cmpge(aabb.min.xyz() - eps).all() && p.cmple(aabb.max.xyz() + eps).all());
        }
    }

    #[test]
    fn test_no_false_negatives() {
        let layout = layout();
        let proj = projection(&layout);
        let inv_proj = proj.inverse();
        let slices = SliceMapping::new(NEAR, FAR);
        let clusters = build_cluster_aabbs(&inv_proj, &layout, &slices);

        let mut rng = rand::rngs::StdRng::seed_from_u64(5);
        let lights: Vec<GpuPointLight> = (0..64)
            .map(|_| GpuPointLight {
                position: Vec3::new(rng.gen_range(-20.0..20.0), rng.gen_range(-15.0..15.0), rng.gen_range(-60.0..-1.0)),
                range: rng.gen_range(0.5..6.0),
                color: Vec3::ONE,
                intensity: 1.0,
            })
            .collect();
        let assignment = assign_lights(&clusters, &Mat4::IDENTITY, &lights, None);
        assert_eq!(assignment.overflow, 0);

        let extent = Vec2::new(layout.extent.width as f32, layout.extent.height as f32);
        for _ in 0..5000 {
            let pixel = Vec2::new(rng.gen_range(0.0..extent.x), rng.gen_range(0.0..extent.y));
            let depth = rng.gen_range(1.0..60.0);
            let p = unproject_pixel(&inv_proj, pixel, extent, depth);
            let index = layout.cluster_index(
                pixel.x as u32 / ClusterConsts::TILE_SIZE,
                pixel.y as u32 / ClusterConsts::TILE_SIZE,
                slices.slice_of(depth),
            );

            for (light_idx, light) in lights.iter().enumerate() {
                // 稍微缩小半径，避开切片边界上的浮点误差
                if light.position.distance(p) < light.range * 0.99 {
                    assert!(assignment.lists[index as usize].contains(&(light_idx as u32)));
                }
            }
        }
    }

    #[test]
    fn test_non_intersecting_light_in_no_list() {
        let layout = layout();
        let slices = SliceMapping::new(NEAR, FAR);
        let clusters = build_cluster_aabbs(&projection(&layout).inverse(), &layout, &slices);

        let behind = GpuPointLight {
            position: Vec3::new(0.0, 0.0, 10.0),
            range: 2.0,
            color: Vec3::ONE,
            intensity: 1.0,
        };
        let assignment = assign_lights(&clusters, &Mat4::IDENTITY, &[behind], None);
        assert!(assignment.lists.iter().all(|list| list.is_empty()));
    }

    #[test]
    fn test_cluster_list_saturates() {
        let cluster = GpuClusterAabb {
            min: Vec4::new(-1.0, -1.0, -2.0, 0.0),
            max: Vec4::new(1.0, 1.0, -1.0, 0.0),
        };
        let lights = vec![
            GpuPointLight {
                position: Vec3::new(0.0, 0.0, -1.5),
                range: 1.0,
                color: Vec3::ONE,
                intensity: 1.0,
            };
            1024
        ];
        let assignment = assign_lights(&[cluster], &Mat4::IDENTITY, &lights, None);
        assert_eq!(assignment.lists[0].len(), ClusterConsts::MAX_LIGHTS_PER_CLUSTER as usize);
        assert_eq!(assignment.overflow, 1);
    }

    #[test]
    fn test_depth_gating() {
        let layout = layout();
        let proj = projection(&layout);
        let slices = SliceMapping::new(NEAR, FAR);
        let clusters = build_cluster_aabbs(&proj.inverse(), &layout, &slices);

        // 整个画面是一堵在深度 10 处的墙
        let clip = proj * Vec4::new(0.0, 0.0, -10.0, 1.0);
        let wall = clip.z / clip.w;
        let pixel_count = (layout.extent.width * layout.extent.height) as usize;
        let mut depth = vec![wall; pixel_count];
        // 第一行是背景
        depth[..layout.extent.width as usize].fill(1.0);

        let flags = mark_active_clusters(&depth, &layout, &slices);
        let wall_slice = slices.slice_of(10.0);
        for (index, flag) in flags.iter().enumerate() {
            let slice = index as u32 / (layout.tile_count_x * layout.tile_count_y);
            assert_eq!(*flag == 1, slice == wall_slice, "cluster {index}");
        }

        // 墙前方的灯光只照亮空 cluster，门控之后不出现在任何列表里
        let light = GpuPointLight {
            position: Vec3::new(0.0, 0.0, -2.0),
            range: 0.5,
            color: Vec3::ONE,
            intensity: 1.0,
        };
        let gated = assign_lights(&clusters, &Mat4::IDENTITY, &[light], Some(&flags));
        assert!(gated.lists.iter().all(|list| list.is_empty()));
        let ungated = assign_lights(&clusters, &Mat4::IDENTITY, &[light], None);
        assert!(ungated.lists.iter().any(|list| !list.is_empty()));
    }
}
