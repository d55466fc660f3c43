pub mod barrier;
pub mod event;
pub mod graph;
pub mod node;

pub use barrier::*;
pub use event::*;
pub use graph::*;
pub use node::*;
