pub mod catalog;
pub mod config;
pub mod discrepancy;
pub mod error;
pub mod fingerprint;
pub mod representation;
pub mod result;
pub mod session;
pub mod traits;
pub mod types;

pub use catalog::*;
pub use config::*;
pub use discrepancy::*;
pub use error::*;
pub use fingerprint::*;
pub use representation::*;
pub use result::*;
pub use session::*;
pub use traits::*;
pub use types::*;
