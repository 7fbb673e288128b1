//! Per-entity query entry points.
//!
//! A [`Manager`] is what `session.objects::<M>()` hands out. Queries run
//! through it always materialize tracked result sets, so their records batch
//! relation access. Only reverse traversal ([`Manager::related`]) builds its
//! result set the way `M::BASE_MANAGER` says.

use std::marker::PhantomData;
use std::sync::Arc;

use peerload_core::{
    BaseManager, Connection, Cx, Entity, Error, Outcome, Relation, RelationError,
    RelationErrorKind, ResultSet, Value,
};
use peerload_query::{Expr, Select};

use crate::Session;

/// Query entry point for one entity type.
pub struct Manager<'s, C: Connection, M: Entity> {
    session: &'s Session<C>,
    _marker: PhantomData<fn() -> M>,
}

impl<'s, C: Connection, M: Entity> Manager<'s, C, M> {
    pub(crate) fn new(session: &'s Session<C>) -> Self {
        Self {
            session,
            _marker: PhantomData,
        }
    }

    /// A fresh SELECT for `M`, to refine and pass to [`Manager::fetch`].
    pub fn select(&self) -> Select<M> {
        Select::new()
    }

    /// Execute `select` into a tracked result set.
    pub async fn fetch(&self, cx: &Cx, select: Select<M>) -> Outcome<ResultSet<M>, Error> {
        select
            .fetch_with(cx, self.session.connection(), BaseManager::Tracking)
            .await
    }

    /// Every row of `M`.
    pub async fn all(&self, cx: &Cx) -> Outcome<ResultSet<M>, Error> {
        self.fetch(cx, self.select()).await
    }

    /// Rows of `M` matching `expr`.
    pub async fn filter(&self, cx: &Cx, expr: Expr) -> Outcome<ResultSet<M>, Error> {
        self.fetch(cx, self.select().filter(expr)).await
    }

    /// The first record `select` yields, if any.
    ///
    /// The record comes from a one-row result set, so its relations fetch
    /// on their own.
    pub async fn first(&self, cx: &Cx, select: Select<M>) -> Outcome<Option<Arc<M>>, Error> {
        self.fetch(cx, select.limit(1))
            .await
            .map(|set| set.first().cloned())
    }

    /// Look a record up by its single-column primary key.
    pub async fn get(&self, cx: &Cx, pk: impl Into<Value>) -> Outcome<Option<Arc<M>>, Error> {
        let pk_column = match M::PRIMARY_KEY {
            [column] => column,
            [] => {
                return Outcome::Err(key_error(
                    M::TABLE_NAME,
                    RelationErrorKind::MissingPrimaryKey,
                    format!("'{}' declares no primary key", M::TABLE_NAME),
                ));
            }
            _ => {
                return Outcome::Err(key_error(
                    M::TABLE_NAME,
                    RelationErrorKind::CompositeKey,
                    format!("'{}' needs a single-column primary key for get()", M::TABLE_NAME),
                ));
            }
        };
        self.first(cx, self.select().filter(Expr::col(*pk_column).eq(pk.into())))
            .await
    }

    pub async fn count(&self, cx: &Cx) -> Outcome<u64, Error> {
        self.select().count(cx, self.session.connection()).await
    }

    /// Records of `M` that point at `parent` through `relation`.
    ///
    /// Each returned record has `relation` pre-resolved to `parent`, so
    /// walking back up costs no query.
    pub async fn related<P: Entity>(
        &self,
        cx: &Cx,
        relation: Relation<M, P>,
        parent: &Arc<P>,
    ) -> Outcome<ResultSet<M>, Error> {
        self.related_select(cx, relation, parent, self.select())
            .await
    }

    /// Like [`Manager::related`], narrowed by `select`'s filters and order.
    ///
    /// The children are tracked only if `M::BASE_MANAGER` is.
    pub async fn related_select<P: Entity>(
        &self,
        cx: &Cx,
        relation: Relation<M, P>,
        parent: &Arc<P>,
        select: Select<M>,
    ) -> Outcome<ResultSet<M>, Error> {
        let info = relation.info();
        if !info.kind.is_forward() {
            return Outcome::Err(Error::Relation(RelationError {
                kind: RelationErrorKind::Direction,
                relation: info.label(),
                message: "reverse traversal needs the forward side of the relation".to_string(),
            }));
        }

        let mut pk = parent.primary_key_value();
        let parent_key = match (pk.pop(), pk.is_empty()) {
            (Some(key), true) if !key.is_null() => key,
            (Some(_), true) => return Outcome::Ok(ResultSet::empty()),
            _ => {
                return Outcome::Err(Error::Relation(RelationError {
                    kind: RelationErrorKind::CompositeKey,
                    relation: info.label(),
                    message: format!("'{}' has no single-column primary key", P::TABLE_NAME),
                }));
            }
        };

        let children = match select
            .filter(Expr::col(info.column).eq(parent_key))
            .fetch_with(cx, self.session.connection(), M::BASE_MANAGER)
            .await
        {
            Outcome::Ok(children) => children,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        let seeded = children
            .iter()
            .filter(|child| relation.seed(child, Arc::clone(parent)))
            .count();
        tracing::debug!(
            target: "peerload::relation",
            relation = %info.label(),
            children = children.len(),
            seeded,
            "reverse traversal seeded parent"
        );

        Outcome::Ok(children)
    }
}

fn key_error(table: &str, kind: RelationErrorKind, message: String) -> Error {
    Error::Relation(RelationError {
        kind,
        relation: table.to_string(),
        message,
    })
}
