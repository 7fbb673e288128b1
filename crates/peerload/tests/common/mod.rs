//! Shared fixtures for the integration tests: a small hero database served
//! by an in-memory connection that understands the SQL `Select` emits.

#![allow(dead_code)]

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use asupersync::runtime::RuntimeBuilder;
use peerload::{
    Connection, Cx, Dialect, Entity, Error, FieldInfo, ForeignKey, Model, Outcome, PeerLink,
    QueryError, QueryErrorKind, ReferentialAction, Relation, RelationInfo, Result, ReverseOne,
    Row, Value,
};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct City {
    pub id: i64,
    pub name: String,
    #[serde(skip)]
    pub peers: PeerLink<City>,
}

impl Model for City {
    const TABLE_NAME: &'static str = "cities";
    const PRIMARY_KEY: &'static [&'static str] = &["id"];

    fn fields() -> &'static [FieldInfo] {
        static FIELDS: [FieldInfo; 2] = [
            FieldInfo::new("id", "id").primary_key(true),
            FieldInfo::new("name", "name"),
        ];
        &FIELDS
    }

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", Value::BigInt(self.id)),
            ("name", Value::Text(self.name.clone())),
        ]
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_named("id")?,
            name: row.get_named("name")?,
            peers: PeerLink::new(),
        })
    }

    fn primary_key_value(&self) -> Vec<Value> {
        vec![Value::BigInt(self.id)]
    }
}

impl Entity for City {
    fn peer_link(&self) -> &PeerLink<Self> {
        &self.peers
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Team {
    pub id: i64,
    pub name: String,
    pub city: ForeignKey<City>,
    #[serde(default)]
    pub headquarters: ReverseOne<Headquarters>,
    #[serde(skip)]
    pub peers: PeerLink<Team>,
}

fn team_city(team: &Team) -> &ForeignKey<City> {
    &team.city
}

fn team_headquarters(team: &Team) -> &ReverseOne<Headquarters> {
    &team.headquarters
}

impl Team {
    pub const CITY: Relation<Team, City> =
        Relation::many_to_one("city", "city_id", team_city).nullable(true);
    pub const HEADQUARTERS: Relation<Team, Headquarters> =
        Relation::reverse_one_to_one("headquarters", "team_id", team_headquarters);
}

impl Model for Team {
    const TABLE_NAME: &'static str = "teams";
    const PRIMARY_KEY: &'static [&'static str] = &["id"];
    const RELATIONSHIPS: &'static [RelationInfo] = &[Team::CITY.info(), Team::HEADQUARTERS.info()];

    fn fields() -> &'static [FieldInfo] {
        static FIELDS: [FieldInfo; 3] = [
            FieldInfo::new("id", "id").primary_key(true),
            FieldInfo::new("name", "name"),
            FieldInfo::new("city", "city_id")
                .nullable(true)
                .foreign_key("cities.id"),
        ];
        &FIELDS
    }

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", Value::BigInt(self.id)),
            ("name", Value::Text(self.name.clone())),
            ("city_id", self.city.key_value()),
        ]
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_named("id")?,
            name: row.get_named("name")?,
            city: ForeignKey::decode(row, "city_id")?,
            headquarters: ReverseOne::new(),
            peers: PeerLink::new(),
        })
    }

    fn primary_key_value(&self) -> Vec<Value> {
        vec![Value::BigInt(self.id)]
    }
}

impl Entity for Team {
    fn peer_link(&self) -> &PeerLink<Self> {
        &self.peers
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Headquarters {
    pub id: i64,
    pub address: String,
    pub team: ForeignKey<Team>,
    #[serde(skip)]
    pub peers: PeerLink<Headquarters>,
}

fn headquarters_team(hq: &Headquarters) -> &ForeignKey<Team> {
    &hq.team
}

impl Headquarters {
    pub const TEAM: Relation<Headquarters, Team> =
        Relation::one_to_one("team", "team_id", headquarters_team)
            .on_delete(ReferentialAction::Cascade);
}

impl Model for Headquarters {
    const TABLE_NAME: &'static str = "headquarters";
    const PRIMARY_KEY: &'static [&'static str] = &["id"];
    const RELATIONSHIPS: &'static [RelationInfo] = &[Headquarters::TEAM.info()];

    fn fields() -> &'static [FieldInfo] {
        &[]
    }

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", Value::BigInt(self.id)),
            ("address", Value::Text(self.address.clone())),
            ("team_id", self.team.key_value()),
        ]
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_named("id")?,
            address: row.get_named("address")?,
            team: ForeignKey::decode(row, "team_id")?,
            peers: PeerLink::new(),
        })
    }

    fn primary_key_value(&self) -> Vec<Value> {
        vec![Value::BigInt(self.id)]
    }
}

impl Entity for Headquarters {
    fn peer_link(&self) -> &PeerLink<Self> {
        &self.peers
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hero {
    pub id: i64,
    pub name: String,
    pub team: ForeignKey<Team>,
    #[serde(skip)]
    pub peers: PeerLink<Hero>,
}

fn hero_team(hero: &Hero) -> &ForeignKey<Team> {
    &hero.team
}

impl Hero {
    pub const TEAM: Relation<Hero, Team> = Relation::many_to_one("team", "team_id", hero_team)
        .nullable(true)
        .on_delete(ReferentialAction::SetNull);

    pub fn new(id: i64, name: &str, team: Option<i64>) -> Self {
        Self {
            id,
            name: name.to_string(),
            team: ForeignKey::new(team.map(Value::BigInt)),
            peers: PeerLink::new(),
        }
    }
}

impl Model for Hero {
    const TABLE_NAME: &'static str = "heroes";
    const PRIMARY_KEY: &'static [&'static str] = &["id"];
    const RELATIONSHIPS: &'static [RelationInfo] = &[Hero::TEAM.info()];

    fn fields() -> &'static [FieldInfo] {
        static FIELDS: [FieldInfo; 3] = [
            FieldInfo::new("id", "id").primary_key(true),
            FieldInfo::new("name", "name"),
            FieldInfo::new("team", "team_id")
                .nullable(true)
                .foreign_key("teams.id"),
        ];
        &FIELDS
    }

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", Value::BigInt(self.id)),
            ("name", Value::Text(self.name.clone())),
            ("team_id", self.team.key_value()),
        ]
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_named("id")?,
            name: row.get_named("name")?,
            team: ForeignKey::decode(row, "team_id")?,
            peers: PeerLink::new(),
        })
    }

    fn primary_key_value(&self) -> Vec<Value> {
        vec![Value::BigInt(self.id)]
    }
}

impl Entity for Hero {
    fn peer_link(&self) -> &PeerLink<Self> {
        &self.peers
    }
}

/// The team table seen through an entity that opted out of tracking.
#[derive(Debug)]
pub struct LegacyTeam {
    pub id: i64,
    pub name: String,
    pub city: ForeignKey<City>,
    pub peers: PeerLink<LegacyTeam>,
}

fn legacy_team_city(team: &LegacyTeam) -> &ForeignKey<City> {
    &team.city
}

impl LegacyTeam {
    pub const CITY: Relation<LegacyTeam, City> =
        Relation::many_to_one("city", "city_id", legacy_team_city).nullable(true);
}

impl Model for LegacyTeam {
    const TABLE_NAME: &'static str = "teams";
    const PRIMARY_KEY: &'static [&'static str] = &["id"];
    const RELATIONSHIPS: &'static [RelationInfo] = &[LegacyTeam::CITY.info()];

    fn fields() -> &'static [FieldInfo] {
        &[]
    }

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", Value::BigInt(self.id)),
            ("name", Value::Text(self.name.clone())),
            ("city_id", self.city.key_value()),
        ]
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_named("id")?,
            name: row.get_named("name")?,
            city: ForeignKey::decode(row, "city_id")?,
            peers: PeerLink::new(),
        })
    }

    fn primary_key_value(&self) -> Vec<Value> {
        vec![Value::BigInt(self.id)]
    }
}

impl Entity for LegacyTeam {
    const BASE_MANAGER: peerload::BaseManager = peerload::BaseManager::Plain;

    fn peer_link(&self) -> &PeerLink<Self> {
        &self.peers
    }
}

/// The hero table seen through an entity that opted out of tracking.
#[derive(Debug)]
pub struct LegacyHero {
    pub id: i64,
    pub team: ForeignKey<LegacyTeam>,
    pub peers: PeerLink<LegacyHero>,
}

fn legacy_hero_team(hero: &LegacyHero) -> &ForeignKey<LegacyTeam> {
    &hero.team
}

impl LegacyHero {
    pub const TEAM: Relation<LegacyHero, LegacyTeam> =
        Relation::many_to_one("team", "team_id", legacy_hero_team).nullable(true);
}

impl Model for LegacyHero {
    const TABLE_NAME: &'static str = "heroes";
    const PRIMARY_KEY: &'static [&'static str] = &["id"];
    const RELATIONSHIPS: &'static [RelationInfo] = &[LegacyHero::TEAM.info()];

    fn fields() -> &'static [FieldInfo] {
        &[]
    }

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![("id", Value::BigInt(self.id)), ("team_id", self.team.key_value())]
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_named("id")?,
            team: ForeignKey::decode(row, "team_id")?,
            peers: PeerLink::new(),
        })
    }

    fn primary_key_value(&self) -> Vec<Value> {
        vec![Value::BigInt(self.id)]
    }
}

impl Entity for LegacyHero {
    const BASE_MANAGER: peerload::BaseManager = peerload::BaseManager::Plain;

    fn peer_link(&self) -> &PeerLink<Self> {
        &self.peers
    }
}

// ---------------------------------------------------------------------------
// In-memory connection
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MockState {
    pub query_calls: usize,
    pub queries: Vec<(String, Vec<Value>)>,
    /// Fail the next this-many queries
    pub fail_next: usize,
}

impl MockState {
    pub fn queries_against(&self, table: &str) -> usize {
        let needle = format!("FROM \"{}\"", table);
        self.queries.iter().filter(|(sql, _)| sql.contains(&needle)).count()
    }
}

pub struct MockConnection {
    pub state: Arc<Mutex<MockState>>,
    tables: HashMap<String, Vec<Row>>,
}

fn row(columns: &[&str], values: Vec<Value>) -> Row {
    Row::new(columns.iter().map(|c| (*c).to_string()).collect(), values)
}

fn opt(id: Option<i64>) -> Value {
    id.map_or(Value::Null, Value::BigInt)
}

impl MockConnection {
    /// The standard fixture:
    ///
    /// - heroes 1..=5 reference teams 1, 2, 3, NULL and a dangling 99
    /// - teams 1..=4 reference cities 1, 2, 1, NULL
    /// - headquarters exist for teams 1 and 2 only
    pub fn heroes() -> Self {
        let mut tables = HashMap::new();
        tables.insert(
            "cities".to_string(),
            vec![
                row(&["id", "name"], vec![Value::BigInt(1), Value::Text("Gotham".into())]),
                row(&["id", "name"], vec![Value::BigInt(2), Value::Text("Metropolis".into())]),
                row(&["id", "name"], vec![Value::BigInt(3), Value::Text("Star City".into())]),
            ],
        );
        tables.insert(
            "teams".to_string(),
            [
                (1, "Preventers", Some(1)),
                (2, "Z-Force", Some(2)),
                (3, "Avengers", Some(1)),
                (4, "Rogues", None),
            ]
            .into_iter()
            .map(|(id, name, city)| {
                row(
                    &["id", "name", "city_id"],
                    vec![Value::BigInt(id), Value::Text(name.into()), opt(city)],
                )
            })
            .collect(),
        );
        tables.insert(
            "headquarters".to_string(),
            [(10, "1 Main St", 1), (20, "2 Side Ave", 2)]
                .into_iter()
                .map(|(id, address, team)| {
                    row(
                        &["id", "address", "team_id"],
                        vec![Value::BigInt(id), Value::Text(address.into()), Value::BigInt(team)],
                    )
                })
                .collect(),
        );
        tables.insert(
            "heroes".to_string(),
            [
                (1, "Deadpond", Some(1)),
                (2, "Rusty-Man", Some(2)),
                (3, "Spider-Boy", Some(3)),
                (4, "Tarantula", None),
                (5, "Dr. Weird", Some(99)),
            ]
            .into_iter()
            .map(|(id, name, team)| {
                row(
                    &["id", "name", "team_id"],
                    vec![Value::BigInt(id), Value::Text(name.into()), opt(team)],
                )
            })
            .collect(),
        );
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            tables,
        }
    }

    /// Replace the rows of `table`.
    pub fn with_table(mut self, table: &str, rows: Vec<Row>) -> Self {
        self.tables.insert(table.to_string(), rows);
        self
    }

    pub fn state(&self) -> Arc<Mutex<MockState>> {
        Arc::clone(&self.state)
    }

    /// Record the call; `Err` if a failure was queued.
    fn begin(&self, sql: &str, params: &[Value]) -> std::result::Result<(), Error> {
        let mut guard = self.state.lock().expect("lock poisoned");
        guard.query_calls += 1;
        guard.queries.push((sql.to_string(), params.to_vec()));
        if guard.fail_next > 0 {
            guard.fail_next -= 1;
            return Err(Error::Query(QueryError {
                kind: QueryErrorKind::Database,
                sql: Some(sql.to_string()),
                sqlstate: None,
                message: "connection reset by peer".to_string(),
                source: None,
            }));
        }
        Ok(())
    }

    /// Evaluate the subset of SQL that `Select` produces: one table, an
    /// AND-chain whose `"col" = $n` / `"col" IN (...)` terms filter (other
    /// terms are ignored), one ORDER BY term, LIMIT.
    fn evaluate(&self, sql: &str, params: &[Value]) -> Vec<Row> {
        let table = between(sql, "FROM \"", "\"").unwrap_or_default();
        let mut rows = self.tables.get(table).cloned().unwrap_or_default();

        let tail_start = sql.find(" ORDER BY ").or_else(|| sql.find(" LIMIT "));
        if let Some(where_start) = sql.find(" WHERE ") {
            let end = tail_start.unwrap_or(sql.len());
            let mut params = params.iter();
            for condition in sql[where_start + 7..end].split(" AND ") {
                let Some(column) = between(condition, "\"", "\"") else {
                    continue;
                };
                let arity = condition.matches('$').count();
                let wanted: Vec<_> = params
                    .by_ref()
                    .take(arity)
                    .cloned()
                    .filter_map(Value::into_key)
                    .collect();
                if !(condition.contains(" IN (") || condition.contains(" = ")) {
                    continue;
                }
                rows.retain(|row| {
                    row.get_by_name(column)
                        .cloned()
                        .and_then(Value::into_key)
                        .is_some_and(|key| wanted.contains(&key))
                });
            }
        }

        if let Some(order) = sql.split(" ORDER BY ").nth(1) {
            if let Some(column) = between(order, "\"", "\"") {
                let descending = order.contains(" DESC");
                rows.sort_by(|a, b| {
                    let ordering = compare(a.get_by_name(column), b.get_by_name(column));
                    if descending { ordering.reverse() } else { ordering }
                });
            }
        }

        if let Some(limit) = sql
            .split(" LIMIT ")
            .nth(1)
            .and_then(|rest| rest.split(' ').next())
            .and_then(|n| n.parse::<usize>().ok())
        {
            rows.truncate(limit);
        }

        rows
    }
}

fn between<'a>(haystack: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = haystack.find(open)? + open.len();
    let len = haystack[start..].find(close)?;
    Some(&haystack[start..start + len])
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Text(a)), Some(Value::Text(b))) => a.cmp(b),
        (Some(a), Some(b)) => a.as_i64().cmp(&b.as_i64()),
        _ => Ordering::Equal,
    }
}

impl Connection for MockConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn query(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        let result = self.begin(sql, params).map(|()| self.evaluate(sql, params));
        async move {
            match result {
                Ok(rows) => Outcome::Ok(rows),
                Err(e) => Outcome::Err(e),
            }
        }
    }

    fn query_one(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Option<Row>, Error>> + Send {
        let result = self.begin(sql, params).map(|()| {
            let rows = self.evaluate(sql, params);
            if sql.starts_with("SELECT COUNT(*)") {
                Some(row(&["count"], vec![Value::BigInt(rows.len() as i64)]))
            } else {
                rows.into_iter().next()
            }
        });
        async move {
            match result {
                Ok(row) => Outcome::Ok(row),
                Err(e) => Outcome::Err(e),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Run one test body on a fresh current-thread runtime.
pub fn block_on<T>(test: impl Future<Output = T>) -> T {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    rt.block_on(test)
}

pub fn unwrap_outcome<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        other => std::panic::panic_any(format!("unexpected outcome: {other:?}")),
    }
}

pub fn query_calls(state: &Arc<Mutex<MockState>>) -> usize {
    state.lock().expect("lock poisoned").query_calls
}

pub fn name_of<T>(target: Option<Arc<T>>, name: impl Fn(&T) -> &str) -> Option<String> {
    target.as_deref().map(|t| name(t).to_string())
}
