use glam::{Mat4, Vec3, Vec4, Vec4Swizzles};

/// 轴对齐包围盒
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

// new & init
impl Aabb {
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// 不包含任何点的包围盒，用作 merge 的初始值
    pub const fn empty() -> Self {
        Self {
            min: Vec3::new(f32::MAX, f32::MAX, f32::MAX),
            max: Vec3::new(f32::MIN, f32::MIN, f32::MIN),
        }
    }

    pub fn from_center_extent(center: Vec3, half_extent: Vec3) -> Self {
        Self::new(center - half_extent, center + half_extent)
    }

    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        points.into_iter().fold(Self::empty(), |aabb, p| aabb.expand(p))
    }
}

// getters
impl Aabb {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min.cmpgt(self.max).any()
    }

    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    #[inline]
    pub fn half_extent(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    /// 8 个角点，按 xyz 的二进制位排列
    pub fn corners(&self) -> [Vec3; 8] {
        std::array::from_fn(|i| {
            Vec3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            )
        })
    }

    pub fn contains(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    /// 外接球
    pub fn bounding_sphere(&self) -> Sphere {
        Sphere::new(self.center(), self.half_extent().length())
    }
}

// tools
impl Aabb {
    #[must_use]
    pub fn expand(self, p: Vec3) -> Self {
        Self::new(self.min.min(p), self.max.max(p))
    }

    #[must_use]
    pub fn merge(self, other: &Aabb) -> Self {
        if other.is_empty() {
            return self;
        }
        Self::new(self.min.min(other.min), self.max.max(other.max))
    }

    /// 变换后重新求轴对齐包围盒
    #[must_use]
    pub fn transform(&self, m: &Mat4) -> Self {
        if self.is_empty() {
            return *self;
        }
        Self::from_points(self.corners().map(|c| m.transform_point3(c)))
    }

    /// 球与包围盒是否相交：最近点到球心的距离不超过半径
    pub fn intersects_sphere(&self, sphere: &Sphere) -> bool {
        let closest = sphere.center.clamp(self.min, self.max);
        closest.distance_squared(sphere.center) <= sphere.radius * sphere.radius
    }
}

/// 包围球
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sphere {
    pub center: Vec3,
    pub radius: f32,
}

impl Sphere {
    pub const fn new(center: Vec3, radius: f32) -> Self {
        Self { center, radius }
    }

    /// 变换球心，半径按最大缩放放大
    #[must_use]
    pub fn transform(&self, m: &Mat4) -> Self {
        let scale = m.x_axis.xyz().length().max(m.y_axis.xyz().length()).max(m.z_axis.xyz().length());
        Self::new(m.transform_point3(self.center), self.radius * scale)
    }
}

/// 平面 `dot(normal, p) + d = 0`，法线指向内侧
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub d: f32,
}

impl Plane {
    /// 从 `(a, b, c, d)` 构造并归一化
    pub fn from_vec4(v: Vec4) -> Self {
        let len = v.xyz().length();
        Self {
            normal: v.xyz() / len,
            d: v.w / len,
        }
    }

    #[inline]
    pub fn signed_distance(&self, p: Vec3) -> f32 {
        self.normal.dot(p) + self.d
    }
}

/// 视锥体，6 个平面的顺序为 left, right, bottom, top, near, far
#[derive(Clone, Copy, Debug)]
pub struct Frustum {
    pub planes: [Plane; 6],
}

impl Frustum {
    /// 从 view-projection 矩阵提取平面（clip z 范围为 `[0, w]`）
    pub fn from_view_projection(view_proj: &Mat4) -> Self {
        let r0 = view_proj.row(0);
        let r1 = view_proj.row(1);
        let r2 = view_proj.row(2);
        let r3 = view_proj.row(3);

        Self {
            planes: [
                Plane::from_vec4(r3 + r0),
                Plane::from_vec4(r3 - r0),
                Plane::from_vec4(r3 + r1),
                Plane::from_vec4(r3 - r1),
                Plane::from_vec4(r2),
                Plane::from_vec4(r3 - r2),
            ],
        }
    }

    pub fn contains_point(&self, p: Vec3) -> bool {
        self.planes.iter().all(|plane| plane.signed_distance(p) >= 0.0)
    }

    pub fn intersects_sphere(&self, sphere: &Sphere) -> bool {
        self.planes.iter().all(|plane| plane.signed_distance(sphere.center) >= -sphere.radius)
    }

    /// 保守测试：只要 p-vertex 在某个平面外侧就剔除
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        if aabb.is_empty() {
            return false;
        }
        self.planes.iter().all(|plane| {
            let p_vertex = Vec3::select(plane.normal.cmpge(Vec3::ZERO), aabb.max, aabb.min);
            plane.signed_distance(p_vertex) >= 0.0
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_aabb_merge() {
        let a = Aabb::empty();
        assert!(a.is_empty());

        let b = Aabb::new(Vec3::ZERO, Vec3::ONE);
        assert_eq!(a.merge(&b), b);
        assert_eq!(b.merge(&Aabb::empty()), b);
    }

    #[test]
    fn test_aabb_transform() {
        let aabb = Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0));
        let m = Mat4::from_translation(Vec3::new(10.0, 0.0, 0.0)) * Mat4::from_rotation_y(std::f32::consts::FRAC_PI_4);
        let t = aabb.transform(&m);

        let s = std::f32::consts::SQRT_2;
        assert!((t.min.x - (10.0 - s)).abs() < 1e-5);
        assert!((t.max.x - (10.0 + s)).abs() < 1e-5);
        assert!((t.max.y - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_aabb_sphere_intersection() {
        let aabb = Aabb::new(Vec3::ZERO, Vec3::ONE);
        assert!(aabb.intersects_sphere(&Sphere::new(Vec3::new(0.5, 0.5, 0.5), 0.1)));
        assert!(aabb.intersects_sphere(&Sphere::new(Vec3::new(2.0, 0.5, 0.5), 1.0)));
        assert!(!aabb.intersects_sphere(&Sphere::new(Vec3::new(2.0, 2.0, 2.0), 1.0)));
    }

    #[test]
    fn test_sphere_transform_uses_max_scale() {
        let s = Sphere::new(Vec3::X, 1.0);
        let m = Mat4::from_scale(Vec3::new(1.0, 3.0, 2.0));
        let t = s.transform(&m);
        assert_eq!(t.center, Vec3::X);
        assert!((t.radius - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_frustum_culling() {
        let view = Mat4::look_at_rh(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
        let proj = Mat4::perspective_rh(60f32.to_radians(), 1.0, 0.1, 100.0);
        let frustum = Frustum::from_view_projection(&(proj * view));

        assert!(frustum.contains_point(Vec3::new(0.0, 0.0, -10.0)));
        assert!(!frustum.contains_point(Vec3::new(0.0, 0.0, 10.0)));
        assert!(!frustum.contains_point(Vec3::new(0.0, 0.0, -200.0)));

        assert!(frustum.intersects_sphere(&Sphere::new(Vec3::new(0.0, 0.0, 0.5), 1.0)));
        assert!(!frustum.intersects_sphere(&Sphere::new(Vec3::new(0.0, 0.0, 5.0), 1.0)));

        let behind = Aabb::from_center_extent(Vec3::new(0.0, 0.0, 5.0), Vec3::ONE);
        let ahead = Aabb::from_center_extent(Vec3::new(0.0, 0.0, -5.0), Vec3::ONE);
        let straddling = Aabb::from_center_extent(Vec3::new(0.0, 0.0, 0.0), Vec3::ONE);
        assert!(!frustum.intersects_aabb(&behind));
        assert!(frustum.intersects_aabb(&ahead));
        assert!(frustum.intersects_aabb(&straddling));
        assert!(!frustum.intersects_aabb(&Aabb::empty()));
    }
}
