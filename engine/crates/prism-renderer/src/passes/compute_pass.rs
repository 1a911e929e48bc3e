use std::marker::PhantomData;
use std::rc::Rc;

use ash::vk;

use prism_crate_tools::resource::PrismPath;
use prism_gfx::commands::command_buffer::GfxCommandBuffer;
use prism_gfx::descriptors::descriptor::GfxDescriptorSet;
use prism_gfx::pipelines::compute_pipeline::GfxComputePipeline;
use prism_gfx::pipelines::pipeline_layout::GfxPipelineLayout;
use prism_gfx::pipelines::shader::GfxShaderStageInfo;

/// 泛型参数 P 表示 compute shader 的参数，以 push constant 的形式传入 shader
///
/// P 为 `()` 时不使用 push constant
pub struct ComputePass<P: bytemuck::Pod> {
    pipeline: GfxComputePipeline,

    _phantom: PhantomData<P>,
}
// new & init
impl<P: bytemuck::Pod> ComputePass<P> {
    /// `shader` 是相对于 `shader/src` 的路径，例如 `cluster/build_clusters.slang`
    pub fn new(shader: &str, set_layouts: &[vk::DescriptorSetLayout], debug_name: &str) -> anyhow::Result<Self> {
        let push_constant_ranges = if size_of::<P>() > 0 {
            vec![
                vk::PushConstantRange::default()
                    .stage_flags(vk::ShaderStageFlags::COMPUTE)
                    .offset(0)
                    .size(size_of::<P>() as u32),
            ]
        } else {
            vec![]
        };
        let pipeline_layout = Rc::new(GfxPipelineLayout::new(
            set_layouts,
            &push_constant_ranges,
            format!("{debug_name}-pipeline-layout"),
        )?);

        let stage_info =
            GfxShaderStageInfo::new(vk::ShaderStageFlags::COMPUTE, PrismPath::shader_build_path(shader), c"main");
        let pipeline = GfxComputePipeline::new(&stage_info, pipeline_layout, debug_name)?;

        Ok(Self {
            pipeline,
            _phantom: PhantomData,
        })
    }
}
// getters
impl<P: bytemuck::Pod> ComputePass<P> {
    #[inline]
    pub fn layout(&self) -> vk::PipelineLayout {
        self.pipeline.layout()
    }
}
// tools
impl<P: bytemuck::Pod> ComputePass<P> {
    /// `sets` 从 set 0 开始绑定
    pub fn exec(&self, cmd: &GfxCommandBuffer, sets: &[GfxDescriptorSet], params: &P, group_cnt: glam::UVec3) {
        cmd.cmd_bind_pipeline(vk::PipelineBindPoint::COMPUTE, self.pipeline.handle());
        if size_of::<P>() > 0 {
            cmd.cmd_push_constants(self.layout(), vk::ShaderStageFlags::COMPUTE, 0, bytemuck::bytes_of(params));
        }
        let sets = sets.iter().map(|set| set.handle()).collect::<Vec<_>>();
        cmd.cmd_bind_descriptor_sets(vk::PipelineBindPoint::COMPUTE, self.layout(), 0, &sets);

        cmd.cmd_dispatch(group_cnt);
    }
}
