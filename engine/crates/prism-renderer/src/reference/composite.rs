//! 透明结果与不透明结果的合成，对应 `shader/src/composition/composite.slang`

use glam::{Vec3, Vec4, Vec4Swizzles};

/// `out = opaque * exp(-b0) + (1 - exp(-b0)) * accum.rgb / accum.a`
///
/// `b0` 为 0（没有透明物体覆盖）时原样返回不透明结果
pub fn composite(opaque: Vec3, b0: f32, accum: Vec4) -> Vec3 {
    if b0 <= 0.0 {
        return opaque;
    }
    let transmittance = (-b0).exp();
    if accum.w <= 0.0 {
        return opaque * transmittance;
    }
    opaque * transmittance + (1.0 - transmittance) * accum.xyz() / accum.w
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::moments::MomentAccumulator;

    #[test]
    fn test_no_transparency_keeps_opaque() {
        let opaque = Vec3::new(0.3, 0.7, 0.125);
        assert_eq!(composite(opaque, 0.0, Vec4::ZERO), opaque);
        // 即使累积缓冲里有残留，b0 为 0 也不参与
        assert_eq!(composite(opaque, 0.0, Vec4::new(1.0, 1.0, 1.0, 1.0)), opaque);
    }

    #[test]
    fn test_single_layer_blends_like_over() {
        // 单层透明物体，alpha = 0.5，颜色为红色
        let alpha = 0.5f64;
        let mut moments = MomentAccumulator::default();
        moments.add_fragment(alpha, 0.0);

        // 透明层之前没有遮挡，T = 1
        let color = Vec3::X;
        let accum = (color * alpha as f32).extend(alpha as f32);

        let opaque = Vec3::new(0.0, 0.0, 1.0);
        let out = composite(opaque, moments.b0 as f32, accum);
        let expected = opaque * (1.0 - alpha as f32) + color * alpha as f32;
        assert!((out - expected).length() < 1e-5, "{out} vs {expected}");
    }

    #[test]
    fn test_fully_covered_hides_opaque() {
        let out = composite(Vec3::ONE, 50.0, Vec4::new(0.2, 0.4, 0.6, 1.0));
        assert!((out - Vec3::new(0.2, 0.4, 0.6)).length() < 1e-5);
    }
}
