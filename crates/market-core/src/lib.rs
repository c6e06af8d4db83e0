pub mod error;
pub mod timefmt;
pub mod traits;
pub mod tuning;
pub mod types;

pub use error::*;
pub use traits::*;
pub use types::*;
