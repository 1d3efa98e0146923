pub mod error;
pub mod handlers;
pub mod intake;
pub mod reports;
pub mod routes;
pub mod state;

pub use error::*;
pub use routes::*;
pub use state::*;
