//! 帧编排器
//!
//! 每帧把 G-buffer、分簇、光源剔除、AO、透明以及合成这些 Pass 加入帧图，
//! 由帧图推导执行顺序、barrier 以及 graphics / compute 两个 queue 之间的同步。
//!
//! - [`passes`]：每个 Pass 持有自己的 pipeline，并提供接入帧图的包装
//! - [`frame`]：frame slot、present 接口、随分辨率变化的资源以及 [`FrameOrchestrator`]
//! - [`reference`]：与 shader 逐项对应的 CPU 实现，用于测试

pub mod fatal;
pub mod frame;
pub mod passes;
pub mod reference;
pub mod viewport;

pub use fatal::fatal;
pub use frame::orchestrator::FrameOrchestrator;
pub use frame::present::{OverlayRenderer, PresentImage, PresentTarget};
pub use viewport::ViewportLayout;
