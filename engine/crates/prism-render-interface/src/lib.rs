//! 渲染层与 GPU 之间的接口
//!
//! - [`frame_counter`]：帧序号与 frames in flight
//! - [`render_settings`]：运行时可调的渲染参数
//! - [`gfx_resource_manager`]：基于 slotmap 的 GPU 资源池，带延迟销毁
//! - [`binding_cache`]：按 `(OwnerId, slot, set)` 缓存的 descriptor set
//! - [`gpu_data`]：与 shader 共享内存布局的结构体

pub mod binding_cache;
pub mod descriptor_allocator;
pub mod frame_counter;
pub mod gfx_resource_manager;
pub mod gpu_data;
pub mod handles;
pub mod render_settings;
pub mod retire_queue;
pub mod truncation_stats;
