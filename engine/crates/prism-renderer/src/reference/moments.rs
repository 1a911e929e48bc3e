//! 6 阶 power moment 的透明度累积与透射率重建
//!
//! 和 `shader/src/oit/moment_math.slangi` 逐项对应。
//! [`MomentAccumulator`] 使用 f64 作为参照；[`SingleMomentAccumulator`] 和 shader 一样使用 f32，
//! 对应 R32 格式的 moment 目标。

/// 把 `ln(view_depth)` 映射到 `[-1, 1]`
pub fn warp_depth(ln_depth: f64, ln_depth_min: f64, ln_depth_max: f64) -> f64 {
    let range = (ln_depth_max - ln_depth_min).max(f64::EPSILON);
    (2.0 * (ln_depth - ln_depth_min) / range - 1.0).clamp(-1.0, 1.0)
}

/// 同一套重建算法在 f32 / f64 上各生成一份
macro_rules! moment_accumulator {
    ($(#[$meta:meta])* $name:ident, $float:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Default, PartialEq)]
        pub struct $name {
            pub b0: $float,
            pub moments: [$float; 6],
        }

        impl $name {
            /// 把 6 阶 moment 向一个合法分布偏移的向量
            const BIAS_VECTOR: [$float; 6] = [0.0, 0.48, 0.0, 0.451, 0.0, 0.45];

            /// `b0` 低于这个值时认为没有透明物体覆盖
            const MIN_TOTAL_ABSORBANCE: $float = 1.0005e-3;

            /// absorbance pass 中每个片元的加法混合
            pub fn add_fragment(&mut self, alpha: $float, warped_depth: $float) {
                let absorbance = -(1.0 - alpha).max(1e-12).ln();
                self.b0 += absorbance;

                let mut z_k = 1.0;
                for moment in &mut self.moments {
                    z_k *= warped_depth;
                    *moment += absorbance * z_k;
                }
            }

            /// 整个像素的透射率
            #[inline]
            pub fn total_transmittance(&self) -> $float {
                (-self.b0).exp()
            }

            /// 在 `warped_depth` 处重建透射率
            pub fn transmittance_at(&self, warped_depth: $float, bias: $float, overestimation: $float) -> $float {
                if self.b0 < Self::MIN_TOTAL_ABSORBANCE {
                    return 1.0;
                }

                let mut b = self.moments.map(|m| m / self.b0);
                for (b, bias_b) in b.iter_mut().zip(Self::BIAS_VECTOR) {
                    *b = (1.0 - bias) * *b + bias * bias_b;
                }

                let absorbance = Self::absorbance_from_moments(&b, warped_depth, overestimation);
                (-self.b0 * absorbance).exp().clamp(0.0, 1.0)
            }

            /// 对 Hankel 矩阵做 Cholesky 分解，求出规范分布的支撑点，
            /// 再用插值多项式求深度之前的权重之和
            fn absorbance_from_moments(b: &[$float; 6], depth: $float, overestimation: $float) -> $float {
                let l21_d11 = -b[0] * b[1] + b[2];
                let d11 = -b[0] * b[0] + b[1];
                let inv_d11 = 1.0 / d11;
                let l21 = l21_d11 * inv_d11;
                let d22 = -l21_d11 * l21 + (-b[1] * b[1] + b[3]);
                let l31_d11 = -b[0] * b[2] + b[3];
                let l31 = l31_d11 * inv_d11;
                let inv_d22 = 1.0 / d22;
                let l32_d22 = -l21_d11 * l31 + (-b[1] * b[2] + b[4]);
                let l32 = l32_d22 * inv_d22;
                let d33 = (-b[2] * b[2] + b[5]) - (l31_d11 * l31 + l32_d22 * l32);
                let inv_d33 = 1.0 / d33;

                let mut c = [1.0, depth, depth * depth, depth * depth * depth];
                // L * c1 = bz
                c[1] -= b[0];
                c[2] -= b[1] + l21 * c[1];
                c[3] -= b[2] + (l31 * c[1] + l32 * c[2]);
                // D * c2 = c1
                c[1] *= inv_d11;
                c[2] *= inv_d22;
                c[3] *= inv_d33;
                // L^T * c3 = c2
                c[2] -= l32 * c[3];
                c[1] -= l21 * c[2] + l31 * c[3];
                c[0] -= b[0] * c[1] + b[1] * c[2] + b[2] * c[3];

                let roots = Self::solve_cubic(c);
                let z = [depth, roots[0], roots[1], roots[2]];

                let f0 = overestimation;
                let f1 = if z[1] < z[0] { 1.0 } else { 0.0 };
                let f2 = if z[2] < z[0] { 1.0 } else { 0.0 };
                let f3 = if z[3] < z[0] { 1.0 } else { 0.0 };

                // 牛顿插值
                let f01 = (f1 - f0) / (z[1] - z[0]);
                let f12 = (f2 - f1) / (z[2] - z[1]);
                let f23 = (f3 - f2) / (z[3] - z[2]);
                let f012 = (f12 - f01) / (z[2] - z[0]);
                let f123 = (f23 - f12) / (z[3] - z[1]);
                let f0123 = (f123 - f012) / (z[3] - z[0]);

                let mut p: [$float; 4] = [0.0; 4];
                p[0] = f012 - f0123 * z[2];
                p[1] = f0123;
                p[2] = p[1];
                p[1] = p[1] * -z[1] + p[0];
                p[0] = p[0] * -z[1] + f01;
                p[3] = p[2];
                p[2] = p[2] * -z[0] + p[1];
                p[1] = p[1] * -z[0] + p[0];
                p[0] = p[0] * -z[0] + f0;

                p[0] + b[0] * p[1] + b[1] * p[2] + b[2] * p[3]
            }

            /// 三次方程 `c[0] + c[1] x + c[2] x^2 + c[3] x^3 = 0` 的三个实根
            ///
            /// 化为 depressed cubic 后用复数立方根的三角形式求解，根不排序
            fn solve_cubic(c: [$float; 4]) -> [$float; 3] {
                let x = c[0] / c[3];
                let y = c[1] / c[3] / 3.0;
                let z = c[2] / c[3] / 3.0;

                // Hessian 与判别式
                let delta = [-z * z + y, -y * z + x, z * x - y * y];
                let discriminant = 4.0 * delta[0] * delta[2] - delta[1] * delta[1];
                let depressed = -2.0 * z * delta[0] + delta[1];

                let theta = discriminant.max(0.0).sqrt().atan2(-depressed) / 3.0;
                let (sin, cos) = theta.sin_cos();
                let half_sqrt3 = 0.5 * (3.0 as $float).sqrt();
                let scale = 2.0 * (-delta[0]).max(0.0).sqrt();

                [cos, -0.5 * cos - half_sqrt3 * sin, -0.5 * cos + half_sqrt3 * sin].map(|root| scale * root - z)
            }
        }
    };
}

moment_accumulator!(
    /// 一个像素上累积的 moment：`b0` 以及 `b1..b6`
    MomentAccumulator,
    f64
);

moment_accumulator!(
    /// 与 GPU 相同精度的累积与重建
    SingleMomentAccumulator,
    f32
);

#[cfg(test)]
mod tests {
    use super::*;

    const BIAS: f64 = 5e-5;
    const OVERESTIMATION: f64 = 0.04;

    #[test]
    fn test_warp_depth_range() {
        let (min, max) = (1f64.ln(), 100f64.ln());
        assert_eq!(warp_depth(min, min, max), -1.0);
        assert_eq!(warp_depth(max, min, max), 1.0);
        assert!(warp_depth(10f64.ln(), min, max).abs() < 1e-12);
        assert_eq!(warp_depth(1000f64.ln(), min, max), 1.0);
    }

    #[test]
    fn test_cubic_roots() {
        // (x - 0.5)(x + 0.25)(x - 0.75)
        let (r0, r1, r2) = (0.5, -0.25, 0.75);
        let c = [-r0 * r1 * r2, r0 * r1 + r1 * r2 + r0 * r2, -(r0 + r1 + r2), 1.0];
        let mut roots = MomentAccumulator::solve_cubic(c);
        roots.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert!((roots[0] - r1).abs() < 1e-9);
        assert!((roots[1] - r0).abs() < 1e-9);
        assert!((roots[2] - r2).abs() < 1e-9);
    }

    #[test]
    fn test_empty_pixel_is_fully_transmissive() {
        let acc = MomentAccumulator::default();
        assert_eq!(acc.transmittance_at(0.3, BIAS, OVERESTIMATION), 1.0);
        assert_eq!(acc.total_transmittance(), 1.0);
    }

    #[test]
    fn test_single_opaque_layer() {
        let mut acc = MomentAccumulator::default();
        acc.add_fragment(0.9999, 0.0);

        let front = acc.transmittance_at(-0.5, BIAS, OVERESTIMATION);
        let behind = acc.transmittance_at(0.5, BIAS, OVERESTIMATION);
        assert!(front > 0.9, "front = {front}");
        assert!(behind < 1e-2, "behind = {behind}");
        assert!((acc.total_transmittance() - 1e-4).abs() < 1e-6);
    }

    #[test]
    fn test_two_half_layers() {
        let mut acc = MomentAccumulator::default();
        acc.add_fragment(0.5, -0.5);
        acc.add_fragment(0.5, 0.5);

        let front = acc.transmittance_at(-0.9, BIAS, OVERESTIMATION);
        let between = acc.transmittance_at(0.1, BIAS, OVERESTIMATION);
        let behind = acc.transmittance_at(0.9, BIAS, OVERESTIMATION);
        assert!(front > 0.95, "front = {front}");
        assert!((between - 0.5).abs() < 0.05, "between = {between}");
        assert!((behind - 0.25).abs() < 0.05, "behind = {behind}");
        assert!(front >= between && between >= behind);
    }

    #[test]
    fn test_transmittance_monotonic_in_depth() {
        let mut acc = MomentAccumulator::default();
        for (alpha, z) in [(0.3, -0.6), (0.6, -0.1), (0.4, 0.4), (0.2, 0.8)] {
            acc.add_fragment(alpha, z);
        }
        let samples: Vec<f64> =
            (0..=20).map(|i| acc.transmittance_at(-1.0 + i as f64 * 0.1, BIAS, OVERESTIMATION)).collect();
        for pair in samples.windows(2) {
            assert!(pair[1] <= pair[0] + 1e-6, "{samples:?}");
        }
        assert!(samples.iter().all(|t| (0.0..=1.0).contains(t)));
    }

    /// 完全不透明的一层：在它之后的任何深度都看不到后面的东西
    #[test]
    fn test_opaque_layer_blocks_behind() {
        for step in 0..=30 {
            let depth = -1.0 + step as f64 * 0.05;
            let mut acc = MomentAccumulator::default();
            acc.add_fragment(1.0, depth);

            let mut single = SingleMomentAccumulator::default();
            single.add_fragment(1.0, depth as f32);

            for offset in 1..=5 {
                let query = depth + offset as f64 * 0.1;
                if query > 1.0 {
                    break;
                }
                let t = acc.transmittance_at(query, BIAS, OVERESTIMATION);
                assert!(t <= 1e-3, "f64: depth {depth}, query {query}, t = {t}");

                let t = single.transmittance_at(query as f32, BIAS as f32, OVERESTIMATION as f32);
                assert!(t.is_finite() && t <= 1e-3, "f32: depth {depth}, query {query}, t = {t}");
            }
        }
    }

    #[test]
    fn test_single_precision_tracks_reference() {
        let layers = [(0.3, -0.6), (0.6, -0.1), (0.4, 0.4), (0.2, 0.8)];
        let mut acc = MomentAccumulator::default();
        let mut single = SingleMomentAccumulator::default();
        for (alpha, z) in layers {
            acc.add_fragment(alpha, z);
            single.add_fragment(alpha as f32, z as f32);
        }
        assert!((single.total_transmittance() as f64 - acc.total_transmittance()).abs() < 1e-5);

        for i in 0..=20 {
            let z = -1.0 + i as f64 * 0.1;
            let reference = acc.transmittance_at(z, BIAS, OVERESTIMATION);
            let t = single.transmittance_at(z as f32, BIAS as f32, OVERESTIMATION as f32);
            assert!(t.is_finite(), "z = {z}");
            assert!((t as f64 - reference).abs() < 2e-2, "z = {z}: f32 {t}, f64 {reference}");
        }
    }
}
