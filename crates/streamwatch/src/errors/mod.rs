//! Application error types

mod types;

pub use types::{AppError, AppResult, PersistenceError};
