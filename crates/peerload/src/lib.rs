//! peerload: lazy, sibling-batched resolution of single-valued relations.
//!
//! Records produced by one query execution remember each other. The first
//! time any of them touches a many-to-one or one-to-one relation, the
//! relation is resolved for every sibling at once, with a single query.
//! Iterating a result set and following a relation on each record costs two
//! queries instead of N+1.
//!
//! - Queries return a [`ResultSet`]; its records hold a weak [`PeerLink`]
//!   back to their [`PeerGroup`].
//! - Relation fields are [`ForeignKey`] / [`ReverseOne`] slots, resolved
//!   through a const [`Relation`] descriptor.
//! - A [`Session`] executes queries and implements [`RelationFetcher`].
//!
//! # Quick Start
//!
//! ```ignore
//! use peerload::prelude::*;
//!
//! struct Hero {
//!     id: i64,
//!     team: ForeignKey<Team>,
//!     peers: PeerLink<Hero>,
//! }
//!
//! fn hero_team(hero: &Hero) -> &ForeignKey<Team> {
//!     &hero.team
//! }
//!
//! impl Hero {
//!     const TEAM: Relation<Hero, Team> =
//!         Relation::many_to_one("team", "team_id", hero_team).nullable(true);
//! }
//!
//! // impl Model for Hero { ... }
//!
//! impl Entity for Hero {
//!     fn peer_link(&self) -> &PeerLink<Self> {
//!         &self.peers
//!     }
//! }
//!
//! async fn list(cx: &Cx, session: &Session<impl Connection>) -> Outcome<(), Error> {
//!     let heroes = match session.objects::<Hero>().all(cx).await {
//!         Outcome::Ok(heroes) => heroes,
//!         other => return other.map(|_| ()),
//!     };
//!     for hero in &heroes {
//!         // the first call loads every hero's team in one query
//!         let team = Hero::TEAM.get(cx, session, hero).await;
//!     }
//!     Outcome::Ok(())
//! }
//! ```

pub use peerload_core::{
    BaseManager, ColumnInfo, Connection, ConnectionError, ConnectionErrorKind, Cx, Dialect,
    Entity, Error, FetchRequest, FieldInfo, ForeignKey, FromValue, Model, Outcome, PeerGroup,
    PeerLink, QueryError, QueryErrorKind, ReferentialAction, Relation, RelationError,
    RelationErrorKind, RelationFetcher, RelationInfo, RelationKind, RelationSlot, Result,
    ResultSet, ReverseOne, Row, TypeError, Value, ValueKey,
};
pub use peerload_query::{Expr, Limit, Offset, OrderBy, OrderDirection, Select, raw_query, select};
pub use peerload_session::{
    CallSite, CheckLevel, CheckMessage, FetchStats, FetchTracker, MAX_CALL_SITES, Manager,
    RelationCounts, Session, SessionConfig, check_entity,
};

/// Everything most callers need.
pub mod prelude {
    pub use crate::{
        BaseManager, Connection, Cx, Entity, Error, Expr, FieldInfo, ForeignKey, Model, OrderBy,
        Outcome, PeerLink, Relation, RelationInfo, Result, ResultSet, ReverseOne, Row, Select,
        Session, SessionConfig, Value, check_entity, select,
    };
}
