//! Prism 的 Vulkan 封装层
//!
//! 通过 [`gfx::Gfx`] 单例访问 device、queue 和内存分配器。
//! 所有 GPU 对象都需要手动 `destroy`，Drop 时只做检查。

pub mod basic;
pub mod commands;
pub mod descriptors;
pub mod foundation;
pub mod gfx;
pub mod gfx_core;
pub mod pipelines;
pub mod resources;
