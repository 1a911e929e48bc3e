//! AO 的辅助数据：旋转噪声与高斯权重

use rand::Rng;

use prism_render_interface::gpu_data::MAX_BLUR_RADIUS;

/// 噪声纹理的边长
pub const NOISE_SIZE: u32 = 4;

/// 4x4 的随机旋转，RGBA8：`(cos, sin)` 映射到 `[0, 255]`，b 为随机步进偏移
pub fn rotation_noise(rng: &mut impl Rng) -> Vec<u8> {
    (0..NOISE_SIZE * NOISE_SIZE)
        .flat_map(|_| {
            let angle = rng.gen_range(0.0..std::f32::consts::TAU);
            let (sin, cos) = angle.sin_cos();
            [unorm8(cos * 0.5 + 0.5), unorm8(sin * 0.5 + 0.5), rng.r#gen::<u8>(), 255]
        })
        .collect()
}

#[inline]
fn unorm8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// 半径为 `radius` 的一维高斯核，长度 `2 * radius + 1`，和为 1
pub fn gaussian_weights(radius: u32) -> Vec<f32> {
    let sigma = (radius as f32 * 0.5).max(0.5);
    let weights: Vec<f32> = (-(radius as i32)..=radius as i32)
        .map(|i| (-(i * i) as f32 / (2.0 * sigma * sigma)).exp())
        .collect();
    let sum: f32 = weights.iter().sum();
    weights.into_iter().map(|w| w / sum).collect()
}

/// 模糊 pass 的 push constant 权重：核是对称的，只保留中心和一侧
///
/// 超过 [`MAX_BLUR_RADIUS`] 的部分被截掉
pub fn blur_half_kernel(radius: u32) -> [[f32; 4]; 3] {
    let radius = radius.min(MAX_BLUR_RADIUS);
    let weights = gaussian_weights(radius);
    let mut packed = [[0.0; 4]; 3];
    for (i, w) in weights[radius as usize..].iter().enumerate() {
        packed[i / 4][i % 4] = *w;
    }
    packed
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn test_noise_is_unit_rotations() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(0);
        let noise = rotation_noise(&mut rng);
        assert_eq!(noise.len(), (NOISE_SIZE * NOISE_SIZE * 4) as usize);

        for texel in noise.chunks(4) {
            let cos = texel[0] as f32 / 255.0 * 2.0 - 1.0;
            let sin = texel[1] as f32 / 255.0 * 2.0 - 1.0;
            assert!((cos * cos + sin * sin - 1.0).abs() < 0.02);
            assert_eq!(texel[3], 255);
        }
    }

    #[test]
    fn test_gaussian_weights() {
        for radius in [0, 1, 4, 8] {
            let weights = gaussian_weights(radius);
            assert_eq!(weights.len(), 2 * radius as usize + 1);
            assert!((weights.iter().sum::<f32>() - 1.0).abs() < 1e-5);

            // 对称，并且中心最大
            let center = radius as usize;
            for i in 0..center {
                assert!((weights[i] - weights[weights.len() - 1 - i]).abs() < 1e-7);
                assert!(weights[i] <= weights[i + 1]);
            }
        }
        assert_eq!(gaussian_weights(0), vec![1.0]);
    }

    #[test]
    fn test_half_kernel_sums_to_one() {
        for radius in [0, 4, MAX_BLUR_RADIUS] {
            let packed = blur_half_kernel(radius);
            let flat = packed.as_flattened();
            // shader 对 ±i 都取 flat[i]，中心只取一次
            let total = flat[0] + 2.0 * flat[1..=radius as usize].iter().sum::<f32>();
            assert!((total - 1.0).abs() < 1e-5, "radius {radius}");
            assert!(flat[radius as usize + 1..].iter().all(|w| *w == 0.0));
            assert_eq!(flat[..=radius as usize], gaussian_weights(radius)[radius as usize..]);
        }
    }
}
