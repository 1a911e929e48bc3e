pub mod descriptor;
pub mod descriptor_pool;
pub mod descriptor_writer;
pub mod sampler;
