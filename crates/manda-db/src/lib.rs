mod error;
mod models;
mod repository;
mod schema;

pub use error::{DbError, Result};
pub use models::*;
pub use repository::MandaDb;
