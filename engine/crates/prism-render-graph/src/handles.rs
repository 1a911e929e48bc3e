//! 帧图内部的虚拟句柄
//!
//! 与 `GfxResourceManager` 的物理句柄分离，只在一次构建 / 编译 / 执行中有效。

use std::fmt;

slotmap::new_key_type! {
    /// Graph 内部的 Image 句柄
    pub struct RgImageHandle;
    /// Graph 内部的 Buffer 句柄
    pub struct RgBufferHandle;
}

/// Pass 在 builder 中的位置，按添加顺序递增
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RgPassHandle(pub(crate) usize);

impl RgPassHandle {
    #[inline]
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Debug for RgPassHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RgPass({})", self.0)
    }
}
