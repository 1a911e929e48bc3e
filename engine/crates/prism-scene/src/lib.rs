//! 渲染器消费的场景接口
//!
//! 渲染器只通过 [`SceneView`] 读取场景；[`Scene`] 是默认实现，
//! 组件是 tagged enum，存放在 slotmap 中。

pub mod bounds;
pub mod camera;
pub mod components;
pub mod scene;
pub mod scene_view;

pub use bounds::{Aabb, Frustum, Plane, Sphere};
pub use camera::Camera;
pub use components::{
    DirectionalLight, Environment, LightComponent, LightKind, Lightlike, MeshComponent, MeshInstance, PointLight,
    Renderable,
};
pub use scene::{EntityId, Scene};
pub use scene_view::{MeshBatch, SceneView};
