pub mod store;
pub mod workflow;

pub use store::*;
pub use workflow::*;
