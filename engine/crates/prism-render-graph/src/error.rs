use std::fmt;

/// 帧图编译失败的原因
///
/// 由 orchestrator 包装进 `anyhow::Error`，对帧来说都是致命错误
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RgCompileError {
    /// 显式依赖和资源依赖形成了环
    Cycle { passes: Vec<String> },
    /// 两个 Pass 使用了同一个名字（semaphore 按名字区分）
    DuplicatePass { pass: String },
    /// 读取了一个既没有初始内容、之前也没有 Pass 写过的资源
    UndeclaredProducer { pass: String, resource: String },
    /// 跨 queue 的多个读者要求不同的 layout
    LayoutConflict { resource: String, passes: Vec<String> },
    /// Pass 的结果没有流向最终 Pass
    DanglingPass { pass: String, final_pass: String },
    /// 没有任何 Pass
    Empty,
}

impl fmt::Display for RgCompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cycle { passes } => write!(f, "render graph has a cycle involving passes: [{}]", passes.join(", ")),
            Self::DuplicatePass { pass } => write!(f, "pass name \"{pass}\" is used more than once"),
            Self::UndeclaredProducer { pass, resource } => {
                write!(f, "pass \"{pass}\" reads \"{resource}\" but nothing produces it")
            }
            Self::LayoutConflict { resource, passes } => write!(
                f,
                "resource \"{resource}\" is read on several queues with different layouts by: [{}]",
                passes.join(", ")
            ),
            Self::DanglingPass { pass, final_pass } => {
                write!(f, "pass \"{pass}\" does not contribute to the final pass \"{final_pass}\"")
            }
            Self::Empty => write!(f, "render graph has no pass"),
        }
    }
}

impl std::error::Error for RgCompileError {}
