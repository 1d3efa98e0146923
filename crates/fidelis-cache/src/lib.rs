pub mod singleflight;
pub mod store;

pub use singleflight::*;
pub use store::*;
