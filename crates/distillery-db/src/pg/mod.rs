//! Postgres backend.
//!
//! Runtime `query_as` calls against row structs; enum columns are stored as
//! text and parsed on the way out, so an unknown value surfaces as
//! [`DbError::Corrupt`] instead of a panic.

use std::str::FromStr;

use sqlx::PgPool;

use crate::DbError;

mod feedback;
mod scrapes;
mod signals;
mod training;

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn parse_column<T>(column: &'static str, raw: &str) -> Result<T, DbError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| DbError::Corrupt(format!("{column}: {e}")))
}
