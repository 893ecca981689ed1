pub mod engine;
pub mod holding;

pub use engine::*;
pub use holding::*;
