pub mod arena;
pub mod index_pool;

pub use arena::FrameArena;
pub use index_pool::{DeferredRelease, IndexPool};
