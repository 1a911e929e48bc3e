use prism_render_interface::handles::{GfxMaterialHandle, GfxMeshHandle};

use crate::bounds::Aabb;
use crate::camera::Camera;
use crate::components::{DirectionalLight, Environment, PointLight};

/// 剔除之后的一次绘制
#[derive(Clone, Copy, Debug)]
pub struct MeshBatch {
    pub mesh: GfxMeshHandle,
    pub material: GfxMaterialHandle,
    pub model: glam::Mat4,
    pub world_bounds: Aabb,
    pub transparent: bool,
    pub alpha: f32,
}

/// 渲染器每帧从场景读取的全部内容
pub trait SceneView {
    fn camera(&self) -> &Camera;

    /// 视锥剔除之后的网格，包含不透明和透明两类
    fn visible_meshes(&self) -> Vec<MeshBatch>;

    /// 有效并且与视锥相交的点光源
    fn point_lights(&self) -> Vec<PointLight>;

    fn directional_lights(&self) -> Vec<DirectionalLight>;

    fn environment(&self) -> Option<&Environment>;

    /// 可见透明物体的世界空间包围盒，没有透明物体时为 `None`
    fn transparent_bounds(&self) -> Option<Aabb> {
        let bounds = self
            .visible_meshes()
            .iter()
            .filter(|batch| batch.transparent)
            .fold(Aabb::empty(), |acc, batch| acc.merge(&batch.world_bounds));
        (!bounds.is_empty()).then_some(bounds)
    }
}
