//! 与 shader 对应的 CPU 实现
//!
//! 噪声、模糊权重和 slice 映射会直接上传给 GPU，其余用来验证分簇、光源分配、moment 重建和合成的数学

pub mod ao;
pub mod cluster;
pub mod composite;
pub mod moments;
