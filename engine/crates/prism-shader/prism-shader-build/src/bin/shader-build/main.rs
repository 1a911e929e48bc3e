//! Shader 编译工具
//!
//! 将 `shader/src` 下所有的 `.slang` 编译为 SPIR-V，输出到 `shader/.build`，目录结构保持不变。
//! `.slangi` 是被 include 的公共代码，不单独编译。

mod task;

use rayon::prelude::*;

use prism_crate_tools::init_log::init_log;
use task::{ShaderCompileTask, ShaderPaths};

fn main() {
    init_log();
    let paths = ShaderPaths::from_workspace();

    log::info!("Shader source path: {:?}", paths.src);
    log::info!("Shader output path: {:?}", paths.build);
    log::info!("slangc: {:?}", paths.slangc);

    let tasks: Vec<ShaderCompileTask> = walkdir::WalkDir::new(&paths.src)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| ShaderCompileTask::new(entry.path(), &paths))
        .collect();

    let failed = tasks
        .par_iter()
        .filter_map(|task| {
            log::info!("Compiling shader: {:?}", task.shader_path);
            task.compile(&paths).err().map(|e| (task, e))
        })
        .inspect(|(task, e)| log::error!("{:?}: {e:#}", task.shader_path))
        .count();

    if failed > 0 {
        log::error!("{failed} of {} shaders failed to compile", tasks.len());
        std::process::exit(1);
    }
    log::info!("Shader compilation completed: {} shaders.", tasks.len());
}
