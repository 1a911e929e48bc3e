use std::path::{Path, PathBuf};

/// 统一资源路径管理
///
/// 所有路径基于工作区根目录（通过 `CARGO_MANIFEST_DIR` 推导）。
///
/// ```ignore
/// let shader = PrismPath::shader_build_path("cluster/build_clusters.slang");
/// // shader/.build/cluster/build_clusters.slang.spv
/// ```
pub struct PrismPath {}
impl PrismPath {
    /// 获取 `shader/.build/` 目录下的着色器路径（编译后的 SPIR-V）
    pub fn shader_build_path(filename: &str) -> PathBuf {
        let mut file = filename.to_string();
        file.push_str(".spv");
        Self::shader_root_path().join(".build").join(file)
    }

    /// 获取工作区根目录
    pub fn workspace_path() -> PathBuf {
        // engine/crates/prism-crate-tools -> workspace root
        Path::new(env!("CARGO_MANIFEST_DIR")).ancestors().nth(3).map(Path::to_path_buf).unwrap_or_default()
    }

    pub fn tools_path() -> PathBuf {
        Self::workspace_path().join("tools")
    }

    pub fn shader_root_path() -> PathBuf {
        Self::workspace_path().join("shader")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shader_build_path() {
        let path = PrismPath::shader_build_path("oit/absorbance.slang");
        assert!(path.ends_with("shader/.build/oit/absorbance.slang.spv"));
        assert!(path.starts_with(PrismPath::workspace_path()));
    }

    #[test]
    fn test_workspace_contains_manifest() {
        assert!(PrismPath::workspace_path().join("Cargo.toml").exists());
    }
}
