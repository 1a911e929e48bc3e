use slotmap::{SlotMap, new_key_type};

use crate::bounds::{Aabb, Sphere};
use crate::camera::Camera;
use crate::components::{
    DirectionalLight, Environment, LightComponent, Lightlike, MeshComponent, PointLight, Renderable,
};
use crate::scene_view::{MeshBatch, SceneView};

new_key_type! {
    pub struct EntityId;
}

/// 在 CPU 侧管理场景数据
///
/// 网格与灯光分别存放在各自的 slotmap 中，`EntityId` 只在所属的 map 中有效。
#[derive(Default)]
pub struct Scene {
    camera: Camera,
    environment: Option<Environment>,

    meshes: SlotMap<EntityId, MeshComponent>,
    lights: SlotMap<EntityId, LightComponent>,
}

// new & init
impl Scene {
    pub fn new(camera: Camera) -> Self {
        Self {
            camera,
            ..Default::default()
        }
    }
}

// getters
impl Scene {
    #[inline]
    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    #[inline]
    pub fn mesh_map(&self) -> &SlotMap<EntityId, MeshComponent> {
        &self.meshes
    }

    #[inline]
    pub fn light_map(&self) -> &SlotMap<EntityId, LightComponent> {
        &self.lights
    }

    #[inline]
    pub fn mesh_mut(&mut self, id: EntityId) -> Option<&mut MeshComponent> {
        self.meshes.get_mut(id)
    }

    #[inline]
    pub fn light_mut(&mut self, id: EntityId) -> Option<&mut LightComponent> {
        self.lights.get_mut(id)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty() && self.lights.is_empty()
    }
}

// tools
impl Scene {
    pub fn add_mesh(&mut self, mesh: MeshComponent) -> EntityId {
        self.meshes.insert(mesh)
    }

    pub fn add_light(&mut self, light: LightComponent) -> EntityId {
        self.lights.insert(light)
    }

    pub fn remove_mesh(&mut self, id: EntityId) -> Option<MeshComponent> {
        let removed = self.meshes.remove(id);
        if removed.is_none() {
            log::warn!("remove of unknown mesh entity: {:?}", id);
        }
        removed
    }

    pub fn remove_light(&mut self, id: EntityId) -> Option<LightComponent> {
        let removed = self.lights.remove(id);
        if removed.is_none() {
            log::warn!("remove of unknown light entity: {:?}", id);
        }
        removed
    }

    pub fn set_environment(&mut self, environment: Option<Environment>) {
        self.environment = environment;
    }
}

impl SceneView for Scene {
    #[inline]
    fn camera(&self) -> &Camera {
        &self.camera
    }

    fn visible_meshes(&self) -> Vec<MeshBatch> {
        let _span = tracy_client::span!("Scene::visible_meshes");
        let frustum = self.camera.frustum();

        self.meshes
            .values()
            .filter_map(|mesh| {
                let world_bounds = mesh.world_bounds();
                frustum.intersects_aabb(&world_bounds).then(|| {
                    let instance = mesh.instance();
                    MeshBatch {
                        mesh: instance.mesh,
                        material: instance.material,
                        model: instance.transform,
                        world_bounds,
                        transparent: mesh.is_transparent(),
                        alpha: mesh.alpha(),
                    }
                })
            })
            .collect()
    }

    fn point_lights(&self) -> Vec<PointLight> {
        let frustum = self.camera.frustum();
        self.lights
            .values()
            .filter(|light| light.is_active())
            .filter_map(|light| match light {
                LightComponent::Point(point) => Some(*point),
                _ => None,
            })
            .filter(|point| frustum.intersects_sphere(&Sphere::new(point.position, point.range)))
            .collect()
    }

    fn directional_lights(&self) -> Vec<DirectionalLight> {
        self.lights
            .values()
            .filter(|light| light.is_active())
            .filter_map(|light| match light {
                LightComponent::Directional(directional) => Some(*directional),
                _ => None,
            })
            .collect()
    }

    #[inline]
    fn environment(&self) -> Option<&Environment> {
        self.environment.as_ref()
    }

    fn transparent_bounds(&self) -> Option<Aabb> {
        let frustum = self.camera.frustum();
        let bounds = self
            .meshes
            .values()
            .filter(|mesh| mesh.is_transparent())
            .map(|mesh| mesh.world_bounds())
            .filter(|bounds| frustum.intersects_aabb(bounds))
            .fold(Aabb::empty(), |acc, bounds| acc.merge(&bounds));
        (!bounds.is_empty()).then_some(bounds)
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;
    use rand::{Rng, SeedableRng};
    use slotmap::KeyData;

    use prism_render_interface::handles::{GfxMaterialHandle, GfxMeshHandle};

    use super::*;
    use crate::components::{LightKind, MeshInstance};

    fn cube_at(position: Vec3) -> MeshInstance {
        MeshInstance {
            name: "cube".to_string(),
            mesh: GfxMeshHandle::from(KeyData::from_ffi(1)),
            material: GfxMaterialHandle::from(KeyData::from_ffi(1)),
            transform: glam::Mat4::from_translation(position),
            local_bounds: Aabb::new(Vec3::splat(-0.5), Vec3::splat(0.5)),
        }
    }

    /// 相机在原点看向 -Z
    fn scene() -> Scene {
        Scene::new(Camera {
            aspect_ratio: 1.0,
            ..Default::default()
        })
    }

    #[test]
    fn test_visible_meshes_culls_behind_camera() {
        let mut scene = scene();
        scene.add_mesh(MeshComponent::Opaque(cube_at(Vec3::new(0.0, 0.0, -5.0))));
        scene.add_mesh(MeshComponent::Opaque(cube_at(Vec3::new(0.0, 0.0, 5.0))));
        scene.add_mesh(MeshComponent::Transparent {
            instance: cube_at(Vec3::new(1.0, 0.0, -8.0)),
            alpha: 0.5,
        });

        let visible = scene.visible_meshes();
        assert_eq!(visible.len(), 2);
        assert_eq!(visible.iter().filter(|b| b.transparent).count(), 1);
    }

    #[test]
    fn test_transparent_bounds() {
        let mut scene = scene();
        assert_eq!(scene.transparent_bounds(), None);

        scene.add_mesh(MeshComponent::Opaque(cube_at(Vec3::new(0.0, 0.0, -3.0))));
        assert_eq!(scene.transparent_bounds(), None);

        scene.add_mesh(MeshComponent::Transparent {
            instance: cube_at(Vec3::new(0.0, 0.0, -4.0)),
            alpha: 0.5,
        });
        scene.add_mesh(MeshComponent::Transparent {
            instance: cube_at(Vec3::new(0.0, 0.0, -10.0)),
            alpha: 0.5,
        });
        // 相机背后的透明物体不参与
        scene.add_mesh(MeshComponent::Transparent {
            instance: cube_at(Vec3::new(0.0, 0.0, 10.0)),
            alpha: 0.5,
        });

        let bounds = scene.transparent_bounds().unwrap();
        assert_eq!(bounds.min, Vec3::new(-0.5, -0.5, -10.5));
        assert_eq!(bounds.max, Vec3::new(0.5, 0.5, -3.5));

        // 与 trait 默认实现结果一致
        let from_batches = scene
            .visible_meshes()
            .iter()
            .filter(|b| b.transparent)
            .fold(Aabb::empty(), |acc, b| acc.merge(&b.world_bounds));
        assert_eq!(from_batches, bounds);
    }

    #[test]
    fn test_lights_filtering() {
        let mut scene = scene();
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);

        let mut expected_visible = 0;
        for _ in 0..64 {
            let z = if rng.gen_bool(0.5) {
                expected_visible += 1;
                rng.gen_range(-50.0..-2.0)
            } else {
                rng.gen_range(2.0..50.0)
            };
            scene.add_light(LightComponent::Point(PointLight {
                position: Vec3::new(0.0, 0.0, z),
                range: 0.5,
                color: Vec3::ONE,
                intensity: 1.0,
            }));
        }
        let disabled = scene.add_light(LightComponent::Disabled(LightKind::Point(PointLight {
            position: Vec3::new(0.0, 0.0, -5.0),
            range: 1.0,
            color: Vec3::ONE,
            intensity: 1.0,
        })));
        scene.add_light(LightComponent::Directional(DirectionalLight {
            direction: Vec3::NEG_Y,
            color: Vec3::ONE,
            intensity: 3.0,
        }));

        assert_eq!(scene.point_lights().len(), expected_visible);
        assert_eq!(scene.directional_lights().len(), 1);

        scene.light_mut(disabled).unwrap().enable();
        assert_eq!(scene.point_lights().len(), expected_visible + 1);

        assert!(scene.remove_light(disabled).is_some());
        assert!(scene.remove_light(disabled).is_none());
    }
}
