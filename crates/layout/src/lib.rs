pub mod axis;
pub mod config;
pub mod engine;
pub mod error;
pub mod naming;
pub mod scene;
pub mod trace;

pub use axis::AxisSystem;
pub use config::LayoutConfig;
pub use engine::*;
pub use error::LayoutError;
pub use naming::NamingContext;
pub use scene::*;
pub use trace::*;
