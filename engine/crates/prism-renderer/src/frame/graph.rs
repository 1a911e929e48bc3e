//! 一帧的图结构：有哪些 stage、每个 stage 在哪个 queue 上、读写哪些资源
//!
//! 这里只描述拓扑，不涉及 pipeline。orchestrator 用 [`FrameImports`] 生成每个 Pass 的 Io，
//! 测试用同样的 Io 搭建不带 GPU 的帧图。

use ash::vk;

use prism_crate_tools::enumed_map;
use prism_render_graph::{
    RenderGraphBuilder, RgBufferHandle, RgBufferState, RgImageHandle, RgImageState, RgPassBuilder, RgQueue,
};
use prism_render_interface::render_settings::RenderSettings;

use crate::passes::active_cluster_marker::ActiveClusterMarkerIo;
use crate::passes::ambient_occlusion::{AoBlurIo, AoHorizonIo, AoResolveIo, BlurDirection};
use crate::passes::cluster_builder::ClusterBuilderIo;
use crate::passes::composition::{CompositionIo, OitComposite};
use crate::passes::gbuffer::{GBufferIo, GBufferTarget};
use crate::passes::light_culler::LightCullerIo;
use crate::passes::opaque_lighting::OpaqueLightingIo;
use crate::passes::transparency::{OitAbsorbanceIo, OitTarget, OitTransmittanceIo};

enumed_map!(pub FrameStage<(&'static str, RgQueue)>: {
    GBuffer: ("gbuffer", RgQueue::Graphics),
    Clusters: ("clusters", RgQueue::Compute),
    ActiveClusters: ("active-clusters", RgQueue::Compute),
    LightCulling: ("culling", RgQueue::Compute),
    AoHorizon: ("ao-hbao", RgQueue::Compute),
    AoBlurH: ("ao-blur-h", RgQueue::Compute),
    AoBlurV: ("ao-blur-v", RgQueue::Compute),
    AoResolve: ("ao", RgQueue::Compute),
    OitAbsorbance: ("absorbance", RgQueue::Graphics),
    OitTransmittance: ("transmittance", RgQueue::Graphics),
    Shading: ("shading", RgQueue::Compute),
    Composition: ("composition", RgQueue::Graphics),
});

impl FrameStage {
    /// 帧图中的 Pass 名字，也是 "<name>-done" semaphore 的前缀
    #[inline]
    pub fn name(self) -> &'static str {
        self.value().0
    }

    #[inline]
    pub fn queue(self) -> RgQueue {
        self.value().1
    }

    pub fn is_enabled(self, features: &FrameFeatures) -> bool {
        match self {
            Self::ActiveClusters => features.depth_gating,
            Self::AoHorizon | Self::AoBlurH | Self::AoBlurV => features.ao,
            Self::OitAbsorbance | Self::OitTransmittance => features.oit,
            _ => true,
        }
    }

    /// 在 `builder` 上声明这个 stage 的资源读写
    pub fn declare(self, imports: &FrameImports, features: &FrameFeatures, builder: &mut RgPassBuilder) {
        match self {
            Self::GBuffer => imports.gbuffer_io().declare(builder),
            Self::Clusters => imports.cluster_builder_io().declare(builder),
            Self::ActiveClusters => imports.active_cluster_marker_io().declare(builder),
            Self::LightCulling => imports.light_culler_io(features.depth_gating).declare(builder),
            Self::AoHorizon => imports.ao_horizon_io().declare(builder),
            Self::AoBlurH => imports.ao_blur_io(BlurDirection::Horizontal).declare(builder),
            Self::AoBlurV => imports.ao_blur_io(BlurDirection::Vertical).declare(builder),
            Self::AoResolve => imports.ao_resolve_io(features.ao).declare(builder),
            Self::OitAbsorbance => imports.oit_absorbance_io().declare(builder),
            Self::OitTransmittance => imports.oit_transmittance_io().declare(builder),
            Self::Shading => imports.opaque_lighting_io().declare(builder),
            Self::Composition => imports.composition_io(features.oit).declare(builder),
        }
    }
}

/// 本帧参与的可选 stage
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameFeatures {
    pub ao: bool,
    /// OIT 开启并且有可见的透明物体
    pub oit: bool,
    pub depth_gating: bool,
}
impl FrameFeatures {
    pub fn from_settings(settings: &RenderSettings, has_transparent: bool) -> Self {
        Self {
            ao: settings.ao.enabled,
            oit: settings.oit.enabled && has_transparent,
            depth_gating: settings.depth_gating_active(),
        }
    }
}

/// 本帧的 stage，按加入帧图的顺序，合成总是最后一个
pub fn frame_stages(features: &FrameFeatures) -> Vec<FrameStage> {
    FrameStage::iter().filter(|stage| stage.is_enabled(features)).collect()
}

/// 导入帧图之前的一张图像
#[derive(Clone, Copy, Debug)]
pub struct FrameImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub format: vk::Format,
}

/// 一帧用到的全部外部资源
#[derive(Clone, Copy, Debug)]
pub struct FrameTargets {
    /// frame slot 持有，CPU 每帧写入
    pub per_frame: vk::Buffer,
    pub point_lights: vk::Buffer,
    pub overflow: vk::Buffer,

    pub clusters: vk::Buffer,
    pub light_lists: vk::Buffer,
    pub active_flags: vk::Buffer,

    pub gbuffer: [FrameImage; GBufferTarget::COUNT],
    pub ao_half: FrameImage,
    pub ao_blur: FrameImage,
    pub ao_full: FrameImage,
    pub lighting: FrameImage,
    /// 当前 present image 对应的一组
    pub oit: [FrameImage; OitTarget::COUNT],
    pub present: FrameImage,
}

/// 导入之后的帧图句柄
#[derive(Clone, Copy, Debug)]
pub struct FrameImports {
    pub per_frame: RgBufferHandle,
    pub point_lights: RgBufferHandle,
    pub overflow: RgBufferHandle,
    pub clusters: RgBufferHandle,
    pub light_lists: RgBufferHandle,
    pub active_flags: RgBufferHandle,

    pub gbuffer: [RgImageHandle; GBufferTarget::COUNT],
    pub ao_half: RgImageHandle,
    pub ao_blur: RgImageHandle,
    pub ao_full: RgImageHandle,
    pub lighting: RgImageHandle,
    pub oit: [RgImageHandle; OitTarget::COUNT],
    pub present: RgImageHandle,
}

/// 所有资源都以 UNDEFINED 导入，内容由本帧的 Pass 重新生成；CPU 写入的 buffer 除外
pub fn import_frame_resources(builder: &mut RenderGraphBuilder<'_>, targets: &FrameTargets) -> FrameImports {
    let mut image = |name: &str, target: &FrameImage| {
        builder.import_image(name, target.image, target.view, target.format, RgImageState::UNDEFINED)
    };
    let gbuffer_names = GBufferTarget::iter().map(|t| format!("gbuffer-{t:?}")).collect::<Vec<_>>();
    let oit_names = OitTarget::iter().map(|t| format!("oit-{t:?}")).collect::<Vec<_>>();
    let gbuffer = std::array::from_fn(|i| image(&gbuffer_names[i], &targets.gbuffer[i]));
    let oit = std::array::from_fn(|i| image(&oit_names[i], &targets.oit[i]));
    let ao_half = image("ao-half", &targets.ao_half);
    let ao_blur = image("ao-blur", &targets.ao_blur);
    let ao_full = image("ao-full", &targets.ao_full);
    let lighting = image("lighting", &targets.lighting);
    let present = image("present", &targets.present);
    builder.export_image(present, RgImageState::PRESENT);

    // fence 之后 CPU 读回 overflow 计数
    let overflow = builder.import_buffer("overflow", targets.overflow, RgBufferState::HOST_WRITTEN);
    builder.export_buffer(overflow, RgBufferState::HOST_READ);

    FrameImports {
        per_frame: builder.import_buffer("per-frame", targets.per_frame, RgBufferState::HOST_WRITTEN),
        point_lights: builder.import_buffer("point-lights", targets.point_lights, RgBufferState::HOST_WRITTEN),
        overflow,
        clusters: builder.import_buffer("clusters", targets.clusters, RgBufferState::UNDEFINED),
        light_lists: builder.import_buffer("light-lists", targets.light_lists, RgBufferState::UNDEFINED),
        active_flags: builder.import_buffer("active-flags", targets.active_flags, RgBufferState::UNDEFINED),

        gbuffer,
        ao_half,
        ao_blur,
        ao_full,
        lighting,
        oit,
        present,
    }
}

// 每个 Pass 的 Io
impl FrameImports {
    #[inline]
    pub fn gbuffer(&self, target: GBufferTarget) -> RgImageHandle {
        self.gbuffer[target.index()]
    }

    #[inline]
    pub fn oit(&self, target: OitTarget) -> RgImageHandle {
        self.oit[target.index()]
    }

    pub fn gbuffer_io(&self) -> GBufferIo {
        GBufferIo {
            per_frame: self.per_frame,
            normal: self.gbuffer(GBufferTarget::Normal),
            albedo: self.gbuffer(GBufferTarget::Albedo),
            metal_roughness: self.gbuffer(GBufferTarget::MetalRoughness),
            depth: self.gbuffer(GBufferTarget::Depth),
        }
    }

    pub fn cluster_builder_io(&self) -> ClusterBuilderIo {
        ClusterBuilderIo {
            per_frame: self.per_frame,
            clusters: self.clusters,
        }
    }

    pub fn active_cluster_marker_io(&self) -> ActiveClusterMarkerIo {
        ActiveClusterMarkerIo {
            per_frame: self.per_frame,
            depth: self.gbuffer(GBufferTarget::Depth),
            active_flags: self.active_flags,
        }
    }

    pub fn light_culler_io(&self, depth_gating: bool) -> LightCullerIo {
        LightCullerIo {
            per_frame: self.per_frame,
            point_lights: self.point_lights,
            clusters: self.clusters,
            active_flags: depth_gating.then_some(self.active_flags),
            light_lists: self.light_lists,
            overflow: self.overflow,
        }
    }

    pub fn ao_horizon_io(&self) -> AoHorizonIo {
        AoHorizonIo {
            per_frame: self.per_frame,
            depth: self.gbuffer(GBufferTarget::Depth),
            normal: self.gbuffer(GBufferTarget::Normal),
            ao_half: self.ao_half,
        }
    }

    /// 水平方向 half -> blur，垂直方向 blur -> half
    pub fn ao_blur_io(&self, direction: BlurDirection) -> AoBlurIo {
        match direction {
            BlurDirection::Horizontal => AoBlurIo {
                src: self.ao_half,
                dst: self.ao_blur,
            },
            BlurDirection::Vertical => AoBlurIo {
                src: self.ao_blur,
                dst: self.ao_half,
            },
        }
    }

    pub fn ao_resolve_io(&self, ao_enabled: bool) -> AoResolveIo {
        AoResolveIo {
            source: ao_enabled.then_some(self.ao_half),
            ao_full: self.ao_full,
        }
    }

    pub fn oit_absorbance_io(&self) -> OitAbsorbanceIo {
        OitAbsorbanceIo {
            per_frame: self.per_frame,
            depth: self.gbuffer(GBufferTarget::Depth),
            b0: self.oit(OitTarget::B0),
            b1234: self.oit(OitTarget::B1234),
            b56: self.oit(OitTarget::B56),
        }
    }

    pub fn oit_transmittance_io(&self) -> OitTransmittanceIo {
        OitTransmittanceIo {
            per_frame: self.per_frame,
            point_lights: self.point_lights,
            light_lists: self.light_lists,
            depth: self.gbuffer(GBufferTarget::Depth),
            b0: self.oit(OitTarget::B0),
            b1234: self.oit(OitTarget::B1234),
            b56: self.oit(OitTarget::B56),
            accum: self.oit(OitTarget::Accum),
        }
    }

    pub fn opaque_lighting_io(&self) -> OpaqueLightingIo {
        OpaqueLightingIo {
            per_frame: self.per_frame,
            point_lights: self.point_lights,
            light_lists: self.light_lists,
            normal: self.gbuffer(GBufferTarget::Normal),
            albedo: self.gbuffer(GBufferTarget::Albedo),
            metal_roughness: self.gbuffer(GBufferTarget::MetalRoughness),
            depth: self.gbuffer(GBufferTarget::Depth),
            ao: self.ao_full,
            lighting: self.lighting,
        }
    }

    pub fn composition_io(&self, oit_active: bool) -> CompositionIo {
        CompositionIo {
            lighting: self.lighting,
            oit: oit_active.then(|| OitComposite {
                b0: self.oit(OitTarget::B0),
                accum: self.oit(OitTarget::Accum),
            }),
            present: self.present,
        }
    }
}

#[cfg(test)]
mod tests {
    use prism_render_graph::{CompiledGraph, RgPassContext};

    use super::*;

    fn noop(_: &RgPassContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    fn null_image(format: vk::Format) -> FrameImage {
        FrameImage {
            image: vk::Image::null(),
            view: vk::ImageView::null(),
            format,
        }
    }

    fn null_targets() -> FrameTargets {
        FrameTargets {
            per_frame: vk::Buffer::null(),
            point_lights: vk::Buffer::null(),
            overflow: vk::Buffer::null(),
            clusters: vk::Buffer::null(),
            light_lists: vk::Buffer::null(),
            active_flags: vk::Buffer::null(),
            gbuffer: GBufferTarget::array().map(null_image),
            ao_half: null_image(vk::Format::R16_SFLOAT),
            ao_blur: null_image(vk::Format::R16_SFLOAT),
            ao_full: null_image(vk::Format::R16_SFLOAT),
            lighting: null_image(vk::Format::R16G16B16A16_SFLOAT),
            oit: OitTarget::array().map(null_image),
            present: null_image(vk::Format::B8G8R8A8_UNORM),
        }
    }

    /// 与 orchestrator 相同的 stage 与资源声明，Pass 本身为空
    fn compile(features: FrameFeatures) -> CompiledGraph<'static> {
        let mut builder = RenderGraphBuilder::new();
        let imports = import_frame_resources(&mut builder, &null_targets());
        for stage in frame_stages(&features) {
            builder.add_pass_lambda(stage.name(), stage.queue(), |b| stage.declare(&imports, &features, b), noop);
        }
        match builder.compile() {
            Ok(graph) => graph,
            Err(e) => panic!("frame graph {features:?} failed to compile: {e}"),
        }
    }

    const ALL_FEATURES: FrameFeatures = FrameFeatures {
        ao: true,
        oit: true,
        depth_gating: false,
    };

    #[test]
    fn test_stage_selection() {
        let names = |features| frame_stages(&features).into_iter().map(FrameStage::name).collect::<Vec<_>>();
        assert_eq!(
            names(ALL_FEATURES),
            vec![
                "gbuffer",
                "clusters",
                "culling",
                "ao-hbao",
                "ao-blur-h",
                "ao-blur-v",
                "ao",
                "absorbance",
                "transmittance",
                "shading",
                "composition"
            ]
        );
        assert_eq!(
            names(FrameFeatures {
                ao: false,
                oit: false,
                depth_gating: true
            }),
            vec!["gbuffer", "clusters", "active-clusters", "culling", "ao", "shading", "composition"]
        );
    }

    #[test]
    fn test_features_from_settings() {
        let mut settings = RenderSettings::default();
        assert_eq!(FrameFeatures::from_settings(&settings, true), ALL_FEATURES);
        // 没有透明物体时不调度 OIT
        assert!(!FrameFeatures::from_settings(&settings, false).oit);

        // OIT 开启时深度门控不生效
        settings.cluster.depth_gated_culling = true;
        assert!(!FrameFeatures::from_settings(&settings, true).depth_gating);
        settings.oit.enabled = false;
        let features = FrameFeatures::from_settings(&settings, true);
        assert!(features.depth_gating);
        assert!(!features.oit);
    }

    #[test]
    fn test_full_frame_order_and_waits() {
        let graph = compile(ALL_FEATURES);
        let pos = |name: &str| graph.position_of(name).unwrap();

        assert!(pos("gbuffer") < pos("ao-hbao"));
        assert!(pos("clusters") < pos("culling"));
        assert!(pos("ao-hbao") < pos("ao-blur-h"));
        assert!(pos("ao-blur-h") < pos("ao-blur-v"));
        assert!(pos("ao-blur-v") < pos("ao"));
        assert!(pos("ao") < pos("shading"));
        assert!(pos("culling") < pos("shading"));
        assert!(pos("culling") < pos("transmittance"));
        assert!(pos("absorbance") < pos("transmittance"));
        assert_eq!(pos("composition"), graph.pass_count() - 1);

        // 跨 queue 的消费者等待生产者
        assert_eq!(graph.waits_of("ao-hbao"), vec!["gbuffer"]);
        assert_eq!(graph.waits_of("shading"), vec!["gbuffer"]);
        assert_eq!(graph.waits_of("transmittance"), vec!["culling"]);
        assert_eq!(graph.waits_of("composition"), vec!["shading"]);
        for name in ["clusters", "culling", "ao-blur-h", "ao-blur-v", "ao", "absorbance"] {
            assert!(graph.waits_of(name).is_empty(), "{name}");
        }
    }

    #[test]
    fn test_overflow_counter_made_visible_to_host() {
        for features in [ALL_FEATURES, FrameFeatures { ao: false, oit: false, depth_gating: true }] {
            let graph = compile(features);
            let overflow = graph.resources().find_buffer("overflow").unwrap();
            let culling = graph.pass_index("culling").unwrap();

            let export = graph.post_barriers(culling).find_buffer(overflow).unwrap();
            assert_eq!(export.mask.src_stage, vk::PipelineStageFlags2::COMPUTE_SHADER);
            assert_eq!(export.mask.src_access, vk::AccessFlags2::SHADER_STORAGE_WRITE);
            assert_eq!(export.mask.dst_stage, vk::PipelineStageFlags2::HOST);
            assert_eq!(export.mask.dst_access, vk::AccessFlags2::HOST_READ);
        }
    }

    #[test]
    fn test_minimal_frame() {
        let graph = compile(FrameFeatures {
            ao: false,
            oit: false,
            depth_gating: false,
        });
        assert_eq!(graph.pass_count(), 6);
        assert!(graph.pass_index("absorbance").is_none());
        assert!(graph.pass_index("ao-hbao").is_none());

        // AO 关闭时 resolve 不依赖 G-buffer，只有 shading 需要等待
        assert!(graph.waits_of("ao").is_empty());
        assert_eq!(graph.waits_of("shading"), vec!["gbuffer"]);
        assert_eq!(graph.waits_of("composition"), vec!["shading"]);
    }

    #[test]
    fn test_depth_gated_frame() {
        let graph = compile(FrameFeatures {
            ao: true,
            oit: false,
            depth_gating: true,
        });
        let pos = |name: &str| graph.position_of(name).unwrap();
        assert!(pos("active-clusters") < pos("culling"));
        assert_eq!(graph.waits_of("active-clusters"), vec!["gbuffer"]);
        assert!(graph.waits_of("culling").is_empty());

        // gbuffer 只需要 signal 一次，同时供给 compute 上的多个消费者
        let gbuffer = graph.pass_index("gbuffer").unwrap();
        assert!(graph.sync(gbuffer).signal);
        let composition = graph.pass_index("composition").unwrap();
        assert!(!graph.sync(composition).signal);
    }
}
