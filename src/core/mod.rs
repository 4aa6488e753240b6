pub mod error;
pub mod principal;
pub mod work;

pub use error::{CoreError, Result};
pub use principal::Principal;
pub use work::{FailureKind, SqlWork, Work, WorkFailure, WorkResult};
