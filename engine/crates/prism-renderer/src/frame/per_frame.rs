//! 每帧上传到 set 0 的相机与场景常量

use itertools::Itertools;

use prism_render_interface::gpu_data::{ClusterConsts, GpuDirectionalLight, GpuPerFrameData};
use prism_render_interface::render_settings::RenderSettings;
use prism_scene::{Camera, DirectionalLight, Environment};

use crate::reference::cluster::SliceMapping;
use crate::viewport::ViewportLayout;

/// 组装 [`GpuPerFrameData`] 需要的输入
pub struct PerFrameInputs<'a> {
    pub camera: &'a Camera,
    pub layout: &'a ViewportLayout,
    pub directional_lights: &'a [DirectionalLight],
    pub environment: Option<&'a Environment>,
    /// 截断之后实际上传的点光源数量
    pub point_light_count: u32,
    pub settings: &'a RenderSettings,
}

impl PerFrameInputs<'_> {
    /// 投影使用画面的宽高比，保证分簇与光栅化一致
    pub fn build(&self) -> GpuPerFrameData {
        let mut camera = self.camera.clone();
        camera.set_aspect_ratio(self.layout.extent.width, self.layout.extent.height);

        let view = camera.get_view_matrix();
        let projection = camera.get_projection_matrix();
        let slices = SliceMapping::new(camera.near, camera.far);

        if self.directional_lights.len() > ClusterConsts::MAX_DIRECTIONAL_LIGHTS {
            log::warn!(
                "{} directional lights, only the first {} are used",
                self.directional_lights.len(),
                ClusterConsts::MAX_DIRECTIONAL_LIGHTS
            );
        }
        let mut directional_lights = [GpuDirectionalLight::default(); ClusterConsts::MAX_DIRECTIONAL_LIGHTS];
        let used = self
            .directional_lights
            .iter()
            .take(ClusterConsts::MAX_DIRECTIONAL_LIGHTS)
            .map(|light| GpuDirectionalLight {
                direction: light.direction.normalize_or_zero(),
                _padding_0: 0.0,
                color: light.color,
                intensity: light.intensity,
            })
            .collect_vec();
        directional_lights[..used.len()].copy_from_slice(&used);

        let env_light_enabled = self.settings.env_light.enabled && self.environment.is_some();
        let env_light_intensity = self.environment.map_or(0.0, |env| env.intensity * self.settings.env_light.intensity);

        GpuPerFrameData {
            view,
            inv_view: view.inverse(),
            projection,
            inv_projection: projection.inverse(),
            view_projection: projection * view,
            camera_pos: camera.position.extend(1.0),
            screen: self.layout.screen(),

            z_near: camera.near,
            z_far: camera.far,
            cluster_scale: slices.scale,
            cluster_bias: slices.bias,

            point_light_count: self.point_light_count,
            directional_light_count: used.len() as u32,
            env_light_enabled: env_light_enabled as u32,
            ao_enabled: self.settings.ao.enabled as u32,

            directional_lights,

            env_light_intensity,
            depth_gating: self.settings.depth_gating_active() as u32,
            _padding_0: [0; 2],
        }
    }
}

#[cfg(test)]
mod tests {
    use ash::vk;
    use glam::Vec3;
    use slotmap::KeyData;

    use prism_render_interface::handles::GfxImageViewHandle;

    use super::*;

    fn layout() -> ViewportLayout {
        ViewportLayout::new(vk::Extent2D {
            width: 1920,
            height: 1080,
        })
    }

    fn sun(intensity: f32) -> DirectionalLight {
        DirectionalLight {
            direction: Vec3::new(0.0, -2.0, 0.0),
            color: Vec3::ONE,
            intensity,
        }
    }

    #[test]
    fn test_cluster_mapping_matches_camera() {
        let camera = Camera {
            near: 0.5,
            far: 200.0,
            ..Default::default()
        };
        let layout = layout();
        let settings = RenderSettings::default();
        let data = PerFrameInputs {
            camera: &camera,
            layout: &layout,
            directional_lights: &[],
            environment: None,
            point_light_count: 12,
            settings: &settings,
        }
        .build();

        let slices = SliceMapping::new(0.5, 200.0);
        assert_eq!(data.cluster_scale, slices.scale);
        assert_eq!(data.cluster_bias, slices.bias);
        assert_eq!(data.screen, glam::UVec4::new(1920, 1080, 60, 34));
        assert_eq!(data.point_light_count, 12);
        assert_eq!(data.env_light_enabled, 0);
        assert_eq!(data.depth_gating, 0);

        // 投影按画面宽高比重建
        let expected = glam::Mat4::perspective_rh(60f32.to_radians(), 1920.0 / 1080.0, 0.5, 200.0);
        assert!(data.projection.abs_diff_eq(expected, 1e-5));
        assert!((data.inv_view * data.view).abs_diff_eq(glam::Mat4::IDENTITY, 1e-5));
    }

    #[test]
    fn test_directional_lights_are_capped_and_normalized() {
        let camera = Camera::default();
        let layout = layout();
        let settings = RenderSettings::default();
        let lights = (0..6).map(|i| sun(i as f32)).collect_vec();
        let data = PerFrameInputs {
            camera: &camera,
            layout: &layout,
            directional_lights: &lights,
            environment: None,
            point_light_count: 0,
            settings: &settings,
        }
        .build();

        assert_eq!(data.directional_light_count, ClusterConsts::MAX_DIRECTIONAL_LIGHTS as u32);
        assert_eq!(data.directional_lights[3].intensity, 3.0);
        assert!((data.directional_lights[0].direction - Vec3::NEG_Y).length() < 1e-6);
    }

    #[test]
    fn test_environment_flags() {
        let camera = Camera::default();
        let layout = layout();
        let view = GfxImageViewHandle::from(KeyData::from_ffi(1));
        let environment = Environment {
            irradiance: view,
            prefiltered: view,
            skybox: view,
            intensity: 2.0,
        };

        let mut settings = RenderSettings::default();
        settings.env_light.intensity = 0.5;
        settings.ao.enabled = false;
        settings.oit.enabled = false;
        settings.cluster.depth_gated_culling = true;
        let build = |settings: &RenderSettings| {
            PerFrameInputs {
                camera: &camera,
                layout: &layout,
                directional_lights: &[],
                environment: Some(&environment),
                point_light_count: 0,
                settings,
            }
            .build()
        };
        let data = build(&settings);
        assert_eq!(data.env_light_enabled, 1);
        assert_eq!(data.env_light_intensity, 1.0);
        assert_eq!(data.ao_enabled, 0);
        assert_eq!(data.depth_gating, 1);

        settings.env_light.enabled = false;
        let data = build(&settings);
        assert_eq!(data.env_light_enabled, 0);
    }
}
