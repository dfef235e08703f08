pub mod endpoint;
pub mod health;
pub mod stats;

pub use endpoint::*;
pub use health::*;
pub use stats::*;
