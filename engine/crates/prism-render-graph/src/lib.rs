//! 声明式帧图
//!
//! 每个 Pass 声明自己所在的 queue 以及读写的资源，编译阶段据此推导：
//!
//! - **执行顺序**：RAW / WAW / WAR 依赖加上显式依赖，拓扑排序，有环则报错
//! - **Barrier**：每个 Pass 前的 pre-barrier，以及跨 queue 消费时在生产者末尾的 release barrier
//! - **同步**：跨 queue 的依赖通过 "<pass>-done" timeline semaphore 表达
//!
//! # 使用流程
//!
//! ```ignore
//! let mut builder = RenderGraphBuilder::new();
//! let depth = builder.import_image("depth", image, view, vk::Format::D32_SFLOAT, RgImageState::UNDEFINED);
//!
//! builder.add_pass_lambda(
//!     "gbuffer",
//!     RgQueue::Graphics,
//!     |b| {
//!         b.write_image(depth, RgImageState::DEPTH_ATTACHMENT_WRITE);
//!     },
//!     |ctx| gbuffer_pass.draw(ctx),
//! );
//!
//! let compiled = builder.compile()?;
//! compiled.execute(&mut frame_ctx)?;
//! ```

pub mod barrier;
pub mod error;
pub mod executor;
pub mod graph;
pub mod handles;
pub mod pass;
pub mod resource_registry;
pub mod resource_state;
pub mod semaphore_info;
pub mod sync;

pub use barrier::{PassBarriers, RgBufferBarrierDesc, RgImageBarrierDesc};
pub use error::RgCompileError;
pub use executor::{CompiledGraph, RenderGraphBuilder, RgFrameContext};
pub use handles::{RgBufferHandle, RgImageHandle, RgPassHandle};
pub use pass::{RgPass, RgPassBuilder, RgPassContext, RgQueue};
pub use resource_registry::{RgBufferResource, RgImageResource, RgResourceRegistry};
pub use resource_state::{RgBufferState, RgImageState};
pub use semaphore_info::{RgSemaphoreInfo, RgSignalSet};
pub use sync::{PassSync, RgPassWait};
