use ash::vk;
use serde::{Deserialize, Serialize};

use crate::gpu_data::MAX_BLUR_RADIUS;

/// 渲染器默认配置
pub struct DefaultRendererSettings;
impl DefaultRendererSettings {
    pub const DEPTH_FORMAT_CANDIDATES: &'static [vk::Format] =
        &[vk::Format::D32_SFLOAT, vk::Format::D32_SFLOAT_S8_UINT, vk::Format::D24_UNORM_S8_UINT];
}

/// 帧级渲染配置，由 present target 决定
#[derive(Copy, Clone, Default, Debug, PartialEq, Eq)]
pub struct FrameSettings {
    pub color_format: vk::Format,
    pub depth_format: vk::Format,
    pub frame_extent: vk::Extent2D,
}

/// 环境光设置
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvLightSettings {
    pub enabled: bool,
    pub intensity: f32,
}
impl Default for EnvLightSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            intensity: 1.0,
        }
    }
}

/// 环境光遮蔽设置
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AoSettings {
    /// 关闭时 resolve 输出 1.0
    pub enabled: bool,
    /// view space 的采样半径
    pub radius: f32,
    pub strength: f32,
    /// 每个像素的采样方向数
    pub direction_count: u32,
    /// 每个方向上的步进次数
    pub step_count: u32,
    /// 可分离高斯模糊的半径（像素）
    pub blur_radius: u32,
}
impl Default for AoSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            radius: 0.5,
            strength: 1.0,
            direction_count: 8,
            step_count: 4,
            blur_radius: 4,
        }
    }
}

/// 基于 moments 的 OIT 设置
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OitSettings {
    pub enabled: bool,
    /// moments 重建时的偏置，避免 Hankel 矩阵奇异
    pub moment_bias: f32,
    /// 透射率重建时对最近遮挡的高估程度
    pub overestimation: f32,
}
impl Default for OitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            moment_bias: 5e-5,
            overestimation: 0.04,
        }
    }
}

/// 分簇光照设置
#[derive(Copy, Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSettings {
    /// 开启后光源剔除会跳过没有任何不透明像素的 cluster，仅在 OIT 关闭时生效
    pub depth_gated_culling: bool,
}

/// 运行时可调的渲染设置，每帧传入 `render_frame`
///
/// 渲染器本身不定义持久化格式，宿主可以用 serde 从任意格式加载
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    pub frames_in_flight: usize,
    pub env_light: EnvLightSettings,
    pub ao: AoSettings,
    pub oit: OitSettings,
    pub cluster: ClusterSettings,
}
impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            frames_in_flight: 1,
            env_light: EnvLightSettings::default(),
            ao: AoSettings::default(),
            oit: OitSettings::default(),
            cluster: ClusterSettings::default(),
        }
    }
}
impl RenderSettings {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.frames_in_flight >= 1, "frames_in_flight must be at least 1");
        anyhow::ensure!(self.ao.radius > 0.0, "ao radius must be positive, got {}", self.ao.radius);
        anyhow::ensure!(
            self.ao.direction_count > 0 && self.ao.step_count > 0,
            "ao needs at least one direction and one step"
        );
        anyhow::ensure!(
            self.ao.blur_radius <= MAX_BLUR_RADIUS,
            "ao blur radius must be at most {}, got {}",
            MAX_BLUR_RADIUS,
            self.ao.blur_radius
        );
        anyhow::ensure!(self.oit.moment_bias >= 0.0, "oit moment bias must not be negative");
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.oit.overestimation),
            "oit overestimation must be in [0, 1], got {}",
            self.oit.overestimation
        );
        Ok(())
    }

    /// active cluster marker 是否参与本帧
    ///
    /// 透明片元可能位于没有任何不透明像素的 cluster 中，所以开启 OIT 时不做深度门控
    #[inline]
    pub fn depth_gating_active(&self) -> bool {
        self.cluster.depth_gated_culling && !self.oit.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = RenderSettings::default();
        assert_eq!(settings.frames_in_flight, 1);
        assert!(settings.env_light.enabled);
        assert!(settings.ao.enabled);
        assert_eq!(settings.ao.radius, 0.5);
        assert_eq!(settings.ao.strength, 1.0);
        assert_eq!(settings.ao.direction_count, 8);
        assert_eq!(settings.ao.step_count, 4);
        assert_eq!(settings.ao.blur_radius, 4);
        assert!(settings.oit.enabled);
        assert_eq!(settings.oit.moment_bias, 5e-5);
        assert_eq!(settings.oit.overestimation, 0.04);
        assert!(!settings.cluster.depth_gated_culling);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let settings = RenderSettings::from_json(r#"{ "frames_in_flight": 2, "ao": { "enabled": false } }"#).unwrap();
        assert_eq!(settings.frames_in_flight, 2);
        assert!(!settings.ao.enabled);
        assert_eq!(settings.ao.direction_count, 8);
        assert!(settings.oit.enabled);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        assert!(RenderSettings::from_json(r#"{ "frames_in_flight": 0 }"#).is_err());
        assert!(RenderSettings::from_json(r#"{ "oit": { "overestimation": 1.5 } }"#).is_err());
        assert!(RenderSettings::from_json(r#"{ "ao": { "blur_radius": 12 } }"#).is_err());
        assert!(RenderSettings::from_json(r#"{ "ao": { "blur_radius": 11 } }"#).is_ok());
    }

    #[test]
    fn test_depth_gating_requires_oit_off() {
        let mut settings = RenderSettings::default();
        settings.cluster.depth_gated_culling = true;
        assert!(!settings.depth_gating_active());
        settings.oit.enabled = false;
        assert!(settings.depth_gating_active());
    }
}
