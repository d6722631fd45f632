pub mod fleet;
pub mod proxy;

pub use fleet::*;
pub use proxy::*;
