pub mod comparator;
pub mod elements;
pub mod normalize;
pub mod pairing;
pub mod score;
pub mod severity;
pub mod synthesize;

pub use comparator::*;
pub use elements::*;
pub use normalize::*;
pub use pairing::*;
pub use score::*;
pub use severity::*;
pub use synthesize::*;
