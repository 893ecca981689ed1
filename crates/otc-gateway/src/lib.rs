pub mod adapter;
pub mod broker;
pub mod paper;

pub use adapter::*;
pub use broker::*;
pub use paper::PaperBroker;
