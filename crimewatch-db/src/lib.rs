pub mod client;
pub mod ledger;
mod record;

pub use client::{DbClient, DbError, DbErrorKind, Result};
