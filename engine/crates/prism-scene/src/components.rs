//! 场景组件
//!
//! 组件是 tagged enum，同类组件存放在同一个 slotmap 中；
//! 渲染器只依赖 [`Renderable`] 和 [`Lightlike`] 这两个能力 trait。

use prism_render_interface::handles::{GfxImageViewHandle, GfxMaterialHandle, GfxMeshHandle};

use crate::bounds::{Aabb, Sphere};

/// 一个网格实例：mesh + material + 变换
#[derive(Clone, Debug)]
pub struct MeshInstance {
    pub name: String,
    pub mesh: GfxMeshHandle,
    pub material: GfxMaterialHandle,
    pub transform: glam::Mat4,
    /// 模型空间的包围盒
    pub local_bounds: Aabb,
}

#[derive(Clone, Debug)]
pub enum MeshComponent {
    Opaque(MeshInstance),
    /// 透明物体，走 OIT 路径
    Transparent { instance: MeshInstance, alpha: f32 },
}

/// 可以被光栅化的组件
pub trait Renderable {
    fn instance(&self) -> &MeshInstance;

    fn is_transparent(&self) -> bool;

    /// 覆盖度，不透明物体为 1
    fn alpha(&self) -> f32;

    fn world_bounds(&self) -> Aabb {
        let instance = self.instance();
        instance.local_bounds.transform(&instance.transform)
    }
}

impl Renderable for MeshComponent {
    fn instance(&self) -> &MeshInstance {
        match self {
            MeshComponent::Opaque(instance) => instance,
            MeshComponent::Transparent { instance, .. } => instance,
        }
    }

    fn is_transparent(&self) -> bool {
        matches!(self, MeshComponent::Transparent { .. })
    }

    fn alpha(&self) -> f32 {
        match self {
            MeshComponent::Opaque(_) => 1.0,
            MeshComponent::Transparent { alpha, .. } => alpha.clamp(0.0, 1.0),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointLight {
    pub position: glam::Vec3,
    /// 影响半径，超出半径的贡献视为 0
    pub range: f32,
    pub color: glam::Vec3,
    pub intensity: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DirectionalLight {
    /// 光线传播方向（世界空间）
    pub direction: glam::Vec3,
    pub color: glam::Vec3,
    pub intensity: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LightComponent {
    Point(PointLight),
    Directional(DirectionalLight),
    /// 暂时关闭的灯光，保留原来的参数
    Disabled(LightKind),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LightKind {
    Point(PointLight),
    Directional(DirectionalLight),
}

/// 可以照亮场景的组件
pub trait Lightlike {
    fn is_active(&self) -> bool;

    /// 有限的影响范围；方向光返回 `None`
    fn influence(&self) -> Option<Sphere>;

    fn intensity(&self) -> f32;
}

impl Lightlike for LightComponent {
    fn is_active(&self) -> bool {
        match self {
            LightComponent::Point(light) => light.intensity > 0.0 && light.range > 0.0,
            LightComponent::Directional(light) => light.intensity > 0.0,
            LightComponent::Disabled(_) => false,
        }
    }

    fn influence(&self) -> Option<Sphere> {
        match self {
            LightComponent::Point(light) => Some(Sphere::new(light.position, light.range)),
            LightComponent::Directional(_) => None,
            LightComponent::Disabled(LightKind::Point(light)) => Some(Sphere::new(light.position, light.range)),
            LightComponent::Disabled(LightKind::Directional(_)) => None,
        }
    }

    fn intensity(&self) -> f32 {
        match self {
            LightComponent::Point(light) => light.intensity,
            LightComponent::Directional(light) => light.intensity,
            LightComponent::Disabled(_) => 0.0,
        }
    }
}

impl LightComponent {
    pub fn disable(&mut self) {
        *self = match *self {
            LightComponent::Point(light) => LightComponent::Disabled(LightKind::Point(light)),
            LightComponent::Directional(light) => LightComponent::Disabled(LightKind::Directional(light)),
            disabled @ LightComponent::Disabled(_) => disabled,
        };
    }

    pub fn enable(&mut self) {
        if let LightComponent::Disabled(kind) = *self {
            *self = match kind {
                LightKind::Point(light) => LightComponent::Point(light),
                LightKind::Directional(light) => LightComponent::Directional(light),
            };
        }
    }
}

/// 环境光照，贴图由预计算模块生成并注册到资源管理器
#[derive(Clone, Copy, Debug)]
pub struct Environment {
    pub irradiance: GfxImageViewHandle,
    pub prefiltered: GfxImageViewHandle,
    pub skybox: GfxImageViewHandle,
    pub intensity: f32,
}

#[cfg(test)]
mod tests {
    use slotmap::KeyData;

    use super::*;

    fn instance(transform: glam::Mat4) -> MeshInstance {
        MeshInstance {
            name: "cube".to_string(),
            mesh: GfxMeshHandle::from(KeyData::from_ffi(1)),
            material: GfxMaterialHandle::from(KeyData::from_ffi(1)),
            transform,
            local_bounds: Aabb::new(glam::Vec3::splat(-1.0), glam::Vec3::splat(1.0)),
        }
    }

    #[test]
    fn test_renderable() {
        let opaque = MeshComponent::Opaque(instance(glam::Mat4::from_translation(glam::Vec3::X * 5.0)));
        assert!(!opaque.is_transparent());
        assert_eq!(opaque.alpha(), 1.0);
        assert_eq!(opaque.world_bounds().center(), glam::Vec3::X * 5.0);

        let glass = MeshComponent::Transparent {
            instance: instance(glam::Mat4::IDENTITY),
            alpha: 1.5,
        };
        assert!(glass.is_transparent());
        assert_eq!(glass.alpha(), 1.0);
    }

    #[test]
    fn test_disable_keeps_parameters() {
        let point = PointLight {
            position: glam::Vec3::ONE,
            range: 4.0,
            color: glam::Vec3::ONE,
            intensity: 2.0,
        };
        let mut light = LightComponent::Point(point);
        assert!(light.is_active());

        light.disable();
        assert!(!light.is_active());
        assert_eq!(light.intensity(), 0.0);
        assert_eq!(light.influence(), Some(Sphere::new(glam::Vec3::ONE, 4.0)));

        light.enable();
        assert_eq!(light, LightComponent::Point(point));
    }
}
