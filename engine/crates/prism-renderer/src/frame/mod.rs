//! 帧级对象：frame slot、present 接口、随分辨率变化的资源，以及把它们串起来的编排器

pub mod extent_resources;
pub mod frame_slot;
pub mod graph;
pub mod orchestrator;
pub mod per_frame;
pub mod present;
