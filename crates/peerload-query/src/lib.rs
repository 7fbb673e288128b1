//! Query builder for peerload.
//!
//! `peerload-query` turns `Model` metadata into SQL plus bound parameters and
//! executes it through the `Connection` trait from `peerload-core`.
//!
//! - **Expression DSL**: `Expr` builds WHERE clauses with bound parameters.
//! - **Select**: `Select::fetch` materializes a tracked `ResultSet`, so
//!   relation access on any record batches across the whole set.
//! - **Dialect support**: placeholders and quoting for Postgres, MySQL and SQLite.
//!
//! Most users reach these builders through the `peerload` facade crate.

pub mod clause;
pub mod expr;
pub mod select;

pub use clause::{Limit, Offset, OrderBy, OrderDirection, Where};
pub use expr::{BinaryOp, Expr};
pub use peerload_core::Dialect;
pub use select::{Select, decode_all};

use asupersync::{Cx, Outcome};
use peerload_core::{Connection, Row, Value};

/// Create a SELECT query for a model.
///
/// # Example
///
/// ```ignore
/// let heroes = select!(Hero)
///     .filter(Expr::col("age").gt(18))
///     .order_by(OrderBy::asc("name"))
///     .fetch(&cx, &conn)
///     .await;
/// ```
#[macro_export]
macro_rules! select {
    ($model:ty) => {
        $crate::Select::<$model>::new()
    };
}

/// Raw SQL query. Rows come back as-is and are never tracked.
pub async fn raw_query<C: Connection>(
    cx: &Cx,
    conn: &C,
    sql: &str,
    params: &[Value],
) -> Outcome<Vec<Row>, peerload_core::Error> {
    conn.query(cx, sql, params).await
}
