pub mod block;
pub mod kernel;
pub mod partitioner;
pub mod pixel;
pub mod pixel_buffer;
