use std::rc::Rc;

use anyhow::Context;
use ash::vk;

use crate::{
    foundation::debug_messenger::DebugType,
    gfx::Gfx,
    pipelines::{
        pipeline_layout::GfxPipelineLayout,
        shader::{GfxShaderModuleCache, GfxShaderStageInfo},
    },
};

pub struct GfxComputePipeline {
    pipeline: vk::Pipeline,
    pipeline_layout: Rc<GfxPipelineLayout>,
}
impl GfxComputePipeline {
    pub fn new(
        shader_stage: &GfxShaderStageInfo,
        pipeline_layout: Rc<GfxPipelineLayout>,
        debug_name: &str,
    ) -> anyhow::Result<Self> {
        debug_assert_eq!(shader_stage.stage, vk::ShaderStageFlags::COMPUTE);

        let mut shader_modules_cache = GfxShaderModuleCache::new();
        let module = shader_modules_cache.get_or_load(shader_stage.path());
        let module = match module {
            Ok(module) => module,
            Err(e) => {
                shader_modules_cache.destroy();
                return Err(e.context(format!("compute pipeline <{debug_name}>")));
            }
        };

        let stage_info = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(shader_stage.entry_point);
        let pipeline_info = vk::ComputePipelineCreateInfo::default().stage(stage_info).layout(pipeline_layout.handle());

        let gfx_device = Gfx::get().gfx_device();
        let pipelines = unsafe {
            gfx_device.create_compute_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&pipeline_info), None)
        };
        shader_modules_cache.destroy();
        let pipeline = pipelines
            .map_err(|(_, e)| e)
            .with_context(|| format!("failed to create compute pipeline <{debug_name}>"))?[0];

        let pipeline = Self {
            pipeline,
            pipeline_layout,
        };
        gfx_device.set_debug_name(&pipeline, debug_name);
        Ok(pipeline)
    }

    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    #[inline]
    pub fn layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout.handle()
    }
}
impl Drop for GfxComputePipeline {
    fn drop(&mut self) {
        unsafe {
            Gfx::get().gfx_device().destroy_pipeline(self.pipeline, None);
        }
    }
}
impl DebugType for GfxComputePipeline {
    fn debug_type_name() -> &'static str {
        "GfxComputePipeline"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.pipeline
    }
}
