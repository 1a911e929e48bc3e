use crate::bounds::Frustum;

/// 透视相机
///
/// 右手坐标系，没有旋转时看向 -Z。投影矩阵的深度范围为 `[0, 1]`，NDC 的 y 朝上；
/// 光栅化时通过负高度的 viewport 翻转到屏幕坐标。
#[derive(Clone, Debug)]
pub struct Camera {
    pub position: glam::Vec3,

    pub euler_yaw_deg: f32,
    pub euler_pitch_deg: f32,
    pub euler_roll_deg: f32,

    /// 垂直方向的视野
    pub fov_y_deg: f32,
    pub aspect_ratio: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: glam::Vec3::ZERO,
            euler_yaw_deg: 0.0,
            euler_pitch_deg: 0.0,
            euler_roll_deg: 0.0,
            fov_y_deg: 60.0,
            aspect_ratio: 16.0 / 9.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl Camera {
    /// 相机的上参考向量
    const CAMERA_UP: glam::Vec3 = glam::Vec3::new(0.0, 1.0, 0.0);

    /// YXZ 表示 Y(yaw)-X(Pitch)-Z(Roll) 的旋转顺序
    const CAMERA_EULER: glam::EulerRot = glam::EulerRot::YXZ;

    /// 没有旋转的情况下，相机看向的是 -Z
    const CAMERA_FORWARD: glam::Vec3 = glam::Vec3::new(0.0, 0.0, -1.0);

    const CAMERA_RIGHT: glam::Vec3 = glam::Vec3::new(1.0, 0.0, 0.0);

    const K_PITCH: f32 = 89.5;

    #[inline]
    fn rotation(&self) -> glam::Mat4 {
        glam::Mat4::from_euler(
            Self::CAMERA_EULER,
            self.euler_yaw_deg.to_radians(),
            self.euler_pitch_deg.to_radians(),
            self.euler_roll_deg.to_radians(),
        )
    }
}

// getters
impl Camera {
    pub fn get_view_matrix(&self) -> glam::Mat4 {
        glam::Mat4::look_to_rh(self.position, self.camera_forward(), Self::CAMERA_UP)
    }

    pub fn get_projection_matrix(&self) -> glam::Mat4 {
        glam::Mat4::perspective_rh(self.fov_y_deg.to_radians(), self.aspect_ratio, self.near, self.far)
    }

    #[inline]
    pub fn get_view_projection_matrix(&self) -> glam::Mat4 {
        self.get_projection_matrix() * self.get_view_matrix()
    }

    pub fn frustum(&self) -> Frustum {
        Frustum::from_view_projection(&self.get_view_projection_matrix())
    }

    pub fn camera_forward(&self) -> glam::Vec3 {
        self.rotation().transform_vector3(Self::CAMERA_FORWARD)
    }

    pub fn camera_right(&self) -> glam::Vec3 {
        self.rotation().transform_vector3(Self::CAMERA_RIGHT)
    }

    pub fn camera_up(&self) -> glam::Vec3 {
        self.rotation().transform_vector3(Self::CAMERA_UP)
    }

    /// 世界坐标点在视空间中的深度（沿视线方向为正）
    pub fn view_depth(&self, world_pos: glam::Vec3) -> f32 {
        -self.get_view_matrix().transform_point3(world_pos).z
    }
}

// tools
impl Camera {
    pub fn set_aspect_ratio(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.aspect_ratio = width as f32 / height as f32;
    }

    /// 朝相机看向的方向进行移动
    pub fn move_forward(&mut self, length: f32) {
        self.position += self.camera_forward() * length;
    }

    pub fn move_right(&mut self, length: f32) {
        self.position += self.camera_right() * length;
    }

    /// 朝世界的 Up 进行移动
    pub fn move_up(&mut self, length: f32) {
        self.position += Self::CAMERA_UP * length;
    }

    pub fn rotate_yaw(&mut self, angle: f32) {
        self.euler_yaw_deg += angle;
        self.euler_yaw_deg %= 360.0;
        if self.euler_yaw_deg < 0.0 {
            self.euler_yaw_deg += 360.0;
        }
    }

    pub fn rotate_pitch(&mut self, angle: f32) {
        self.euler_pitch_deg += angle;
        self.euler_pitch_deg = self.euler_pitch_deg.clamp(-Self::K_PITCH, Self::K_PITCH);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_camera_looks_down_neg_z() {
        let camera = Camera::default();
        assert!((camera.camera_forward() - glam::Vec3::NEG_Z).length() < 1e-6);
        assert!((camera.view_depth(glam::Vec3::new(0.0, 0.0, -5.0)) - 5.0).abs() < 1e-5);
    }

    #[test]
    fn test_projection_depth_range() {
        let camera = Camera {
            near: 0.5,
            far: 50.0,
            ..Default::default()
        };
        let proj = camera.get_projection_matrix();

        let near_clip = proj * glam::Vec4::new(0.0, 0.0, -0.5, 1.0);
        let far_clip = proj * glam::Vec4::new(0.0, 0.0, -50.0, 1.0);
        assert!((near_clip.z / near_clip.w).abs() < 1e-5);
        assert!((far_clip.z / far_clip.w - 1.0).abs() < 1e-5);

        let up_clip = proj * glam::Vec4::new(0.0, 1.0, -5.0, 1.0);
        assert!(up_clip.y / up_clip.w > 0.0);
    }

    #[test]
    fn test_yaw_wraps_and_pitch_clamps() {
        let mut camera = Camera::default();
        camera.rotate_yaw(-30.0);
        assert!((camera.euler_yaw_deg - 330.0).abs() < 1e-4);

        camera.rotate_pitch(120.0);
        assert_eq!(camera.euler_pitch_deg, 89.5);
    }

    #[test]
    fn test_frustum_follows_camera() {
        let mut camera = Camera::default();
        camera.position = glam::Vec3::new(0.0, 0.0, 10.0);
        let frustum = camera.frustum();
        assert!(frustum.contains_point(glam::Vec3::ZERO));

        camera.rotate_yaw(180.0);
        assert!(!camera.frustum().contains_point(glam::Vec3::ZERO));
    }
}
