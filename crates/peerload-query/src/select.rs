//! SELECT query builder.

use crate::clause::{Limit, Offset, OrderBy, Where};
use crate::expr::Expr;
use asupersync::{Cx, Outcome};
use peerload_core::{BaseManager, Connection, Dialect, Entity, Error, Model, ResultSet, Row, Value};
use std::marker::PhantomData;

/// A SELECT query builder.
///
/// Every execution is a new query: results from two executions of the
/// same builder never share a result set.
#[derive(Debug, Clone)]
pub struct Select<M: Model> {
    where_clause: Option<Where>,
    order_by: Vec<OrderBy>,
    limit: Option<Limit>,
    offset: Option<Offset>,
    _marker: PhantomData<M>,
}

impl<M: Model> Select<M> {
    pub fn new() -> Self {
        Self {
            where_clause: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
            _marker: PhantomData,
        }
    }

    /// Add a WHERE condition, ANDed with any existing ones.
    pub fn filter(mut self, expr: Expr) -> Self {
        self.where_clause = Some(match self.where_clause.take() {
            Some(existing) => existing.and(expr),
            None => Where::new(expr),
        });
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(Limit(n));
        self
    }

    pub fn offset(mut self, n: u64) -> Self {
        self.offset = Some(Offset(n));
        self
    }

    /// Build SQL with Postgres placeholders.
    pub fn build(&self) -> (String, Vec<Value>) {
        self.build_with_dialect(Dialect::default())
    }

    /// Build the SQL query and parameters for `dialect`.
    pub fn build_with_dialect(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut sql = format!("SELECT * FROM {}", dialect.quote_identifier(M::TABLE_NAME));

        if let Some(where_clause) = &self.where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(&where_clause.build(dialect, &mut params));
        }

        if !self.order_by.is_empty() {
            let terms: Vec<_> = self.order_by.iter().map(|o| o.to_sql(dialect)).collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
        }

        if let Some(Limit(n)) = self.limit {
            sql.push_str(&format!(" LIMIT {}", n));
        }

        if let Some(Offset(n)) = self.offset {
            sql.push_str(&format!(" OFFSET {}", n));
        }

        (sql, params)
    }

    /// Execute and return the raw rows. Rows are never tracked.
    pub async fn rows<C: Connection>(self, cx: &Cx, conn: &C) -> Outcome<Vec<Row>, Error> {
        let (sql, params) = self.build_with_dialect(conn.dialect());
        tracing::debug!(
            target: "peerload::query",
            table = M::TABLE_NAME,
            sql = %sql,
            params = params.len(),
            "executing select"
        );
        conn.query(cx, &sql, &params).await
    }

    /// Execute and decode every row into a bare model.
    pub async fn all<C: Connection>(self, cx: &Cx, conn: &C) -> Outcome<Vec<M>, Error> {
        self.rows(cx, conn).await.and_then(|rows| decode_all(&rows))
    }

    /// Execute with LIMIT 1 and decode the row, if any.
    pub async fn first<C: Connection>(self, cx: &Cx, conn: &C) -> Outcome<Option<M>, Error> {
        let (sql, params) = self.limit(1).build_with_dialect(conn.dialect());
        let row = conn.query_one(cx, &sql, &params).await;

        row.and_then(|opt_row| match opt_row {
            Some(row) => match M::from_row(&row) {
                Ok(model) => Outcome::Ok(Some(model)),
                Err(e) => Outcome::Err(e),
            },
            None => Outcome::Ok(None),
        })
    }

    /// Execute and return the number of matching rows.
    pub async fn count<C: Connection>(self, cx: &Cx, conn: &C) -> Outcome<u64, Error> {
        let dialect = conn.dialect();
        let mut params = Vec::new();
        let mut sql = format!(
            "SELECT COUNT(*) AS count FROM {}",
            dialect.quote_identifier(M::TABLE_NAME)
        );
        if let Some(where_clause) = &self.where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(&where_clause.build(dialect, &mut params));
        }

        let row = conn.query_one(cx, &sql, &params).await;
        row.and_then(|opt_row| match opt_row {
            Some(row) => match row.get_named::<i64>("count") {
                Ok(count) => Outcome::Ok(u64::try_from(count).unwrap_or(0)),
                Err(e) => Outcome::Err(e),
            },
            None => Outcome::Ok(0),
        })
    }
}

impl<M: Entity> Select<M> {
    /// Execute into a tracked result set.
    ///
    /// Every record is linked to the new set before this returns, so the
    /// first relation access on any of them batches across all of them.
    pub async fn fetch<C: Connection>(self, cx: &Cx, conn: &C) -> Outcome<ResultSet<M>, Error> {
        self.fetch_with(cx, conn, BaseManager::Tracking).await
    }

    /// Execute into a result set built the way `manager` says.
    pub async fn fetch_with<C: Connection>(
        self,
        cx: &Cx,
        conn: &C,
        manager: BaseManager,
    ) -> Outcome<ResultSet<M>, Error> {
        self.all(cx, conn)
            .await
            .map(|models| ResultSet::with_manager(models, manager))
    }
}

impl<M: Model> Default for Select<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode every row, failing the whole batch on the first bad row.
pub fn decode_all<M: Model>(rows: &[Row]) -> Outcome<Vec<M>, Error> {
    let mut models = Vec::with_capacity(rows.len());
    for row in rows {
        match M::from_row(row) {
            Ok(model) => models.push(model),
            Err(e) => {
                tracing::trace!(
                    target: "peerload::query",
                    table = M::TABLE_NAME,
                    error = %e,
                    "row decode failed"
                );
                return Outcome::Err(e);
            }
        }
    }
    Outcome::Ok(models)
}
