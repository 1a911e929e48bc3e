use std::path::{Path, PathBuf};

use anyhow::Context;

use prism_crate_tools::resource::PrismPath;

/// 编译需要的目录
#[derive(Debug, Clone)]
pub struct ShaderPaths {
    /// include 的根目录，也是源码的父目录
    pub root: PathBuf,
    pub src: PathBuf,
    pub build: PathBuf,
    pub slangc: PathBuf,
}
impl ShaderPaths {
    pub fn from_workspace() -> Self {
        let root = PrismPath::shader_root_path();
        Self {
            src: root.join("src"),
            build: root.join(".build"),
            slangc: Self::find_slangc(),
            root,
        }
    }

    /// 优先使用 `SLANGC` 环境变量，其次是 `tools/slang/bin` 下的编译器，最后交给 PATH
    fn find_slangc() -> PathBuf {
        if let Some(path) = std::env::var_os("SLANGC") {
            return PathBuf::from(path);
        }
        let exe = if cfg!(windows) { "slangc.exe" } else { "slangc" };
        let mut bundled = PrismPath::tools_path();
        bundled.extend(["slang", "bin", exe]);
        if bundled.is_file() { bundled } else { PathBuf::from(exe) }
    }
}

/// 一个 `.slang` 文件的编译任务
#[derive(Debug, PartialEq, Eq)]
pub struct ShaderCompileTask {
    pub shader_path: PathBuf,
    /// `<build>/<相对路径>.slang.spv`，与 `PrismPath::shader_build_path` 一致
    pub output_path: PathBuf,
}
impl ShaderCompileTask {
    /// 不是 `.slang`，或者不在源码目录下时返回 None
    pub fn new(shader_path: &Path, paths: &ShaderPaths) -> Option<Self> {
        if shader_path.extension()? != "slang" {
            return None;
        }
        let relative_path = shader_path.strip_prefix(&paths.src).ok()?;

        let mut output_path = paths.build.join(relative_path).into_os_string();
        output_path.push(".spv");
        Some(Self {
            shader_path: shader_path.to_path_buf(),
            output_path: output_path.into(),
        })
    }

    pub fn compile(&self, paths: &ShaderPaths) -> anyhow::Result<()> {
        if let Some(parent) = self.output_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("create {parent:?}"))?;
        }

        let output = std::process::Command::new(&paths.slangc)
            .arg("-I")
            .arg(&paths.root)
            .args([
                "-g2",                         // debug info
                "-matrix-layout-column-major", // 和 glam 一致
                "-fvk-use-entrypoint-name",    // vsmain / psmain 放在同一个文件中
                "-target",
                "spirv",
                "-o",
            ])
            .arg(&self.output_path)
            .arg(&self.shader_path)
            .output()
            .with_context(|| format!("failed to run {:?}", paths.slangc))?;

        if !output.stdout.is_empty() {
            log::info!("stdout: {}", String::from_utf8_lossy(&output.stdout));
        }
        if !output.stderr.is_empty() {
            log::warn!("stderr: {}", String::from_utf8_lossy(&output.stderr));
        }
        anyhow::ensure!(output.status.success(), "slangc exited with {}", output.status);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths() -> ShaderPaths {
        let root = PathBuf::from("/ws/shader");
        ShaderPaths {
            src: root.join("src"),
            build: root.join(".build"),
            slangc: PathBuf::from("slangc"),
            root,
        }
    }

    #[test]
    fn test_output_mirrors_source_tree() {
        let task = ShaderCompileTask::new(Path::new("/ws/shader/src/oit/absorbance.slang"), &paths()).unwrap();
        assert_eq!(task.output_path, PathBuf::from("/ws/shader/.build/oit/absorbance.slang.spv"));
    }

    #[test]
    fn test_skips_includes_and_foreign_files() {
        let paths = paths();
        assert!(ShaderCompileTask::new(Path::new("/ws/shader/src/oit/moment_math.slangi"), &paths).is_none());
        assert!(ShaderCompileTask::new(Path::new("/ws/shader/src/README"), &paths).is_none());
        assert!(ShaderCompileTask::new(Path::new("/elsewhere/a.slang"), &paths).is_none());
    }
}
