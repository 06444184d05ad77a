use std::future::Future;
use std::mem;
use std::sync::Arc;

use crate::db::client::{Client, QueryArgs};
use crate::db::query::QueryResult;
use crate::error::ClientError;
use crate::query::clause::{reduce_all, Clause};
use crate::query::state::QueryState;
use crate::query::value::InsertRow;

/// Fluent statement builder bound to one client.
///
/// Mutators only record clause fragments; nothing is validated until the
/// state is rendered by [`get_sql`](Self::get_sql) or [`run`](Self::run).
/// Variadic mutators take any iterator of [`Clause`]-convertible arguments,
/// e.g. `["id", "name"]` or `clauses!["a = 1", vec!["b = 2"]]`.
pub struct QueryBuilder {
    client: Arc<dyn Client>,
    state: QueryState,
}

impl QueryBuilder {
    pub fn new(client: Arc<dyn Client>) -> Self {
        Self {
            client,
            state: QueryState::default(),
        }
    }

    pub fn client(&self) -> &Arc<dyn Client> {
        &self.client
    }

    pub fn state(&self) -> &QueryState {
        &self.state
    }

    pub fn schema(&mut self, name: impl Into<String>) -> &mut Self {
        self.state.schema = name.into();
        self
    }

    pub fn select<I>(&mut self, columns: I) -> &mut Self
    where
        I: IntoIterator,
        I::Item: Into<Clause>,
    {
        self.state.select.extend(reduce_all(columns));
        self
    }

    pub fn from(&mut self, table: impl Into<String>) -> &mut Self {
        self.state.from = table.into();
        self
    }

    /// Same as [`from`](Self::from); reads better before `insert`.
    ///
    /// Named `into_table` because a bare `into` on an owned builder resolves
    /// to [`Into::into`].
    pub fn into_table(&mut self, table: impl Into<String>) -> &mut Self {
        self.from(table)
    }

    /// Switch to a delete statement against `table`.
    pub fn delete(&mut self, table: impl Into<String>) -> &mut Self {
        self.state.delete = true;
        self.from(table)
    }

    pub fn where_<I>(&mut self, conditions: I) -> &mut Self
    where
        I: IntoIterator,
        I::Item: Into<Clause>,
    {
        self.state.where_.extend(reduce_all(conditions));
        self
    }

    pub fn group_by<I>(&mut self, columns: I) -> &mut Self
    where
        I: IntoIterator,
        I::Item: Into<Clause>,
    {
        self.state.group_by.extend(reduce_all(columns));
        self
    }

    pub fn order_by<I>(&mut self, columns: I) -> &mut Self
    where
        I: IntoIterator,
        I::Item: Into<Clause>,
    {
        self.state.order_by.extend(reduce_all(columns));
        self
    }

    pub fn join<I>(&mut self, joins: I) -> &mut Self
    where
        I: IntoIterator,
        I::Item: Into<Clause>,
    {
        self.state.join.extend(reduce_all(joins));
        self
    }

    pub fn limit(&mut self, n: u64) -> &mut Self {
        self.state.limit = Some(n);
        self
    }

    pub fn offset(&mut self, n: u64) -> &mut Self {
        self.state.offset = Some(n);
        self
    }

    /// Add `column = value` assignments.
    pub fn update<I>(&mut self, assignments: I) -> &mut Self
    where
        I: IntoIterator,
        I::Item: Into<Clause>,
    {
        self.state.update.extend(reduce_all(assignments));
        self
    }

    /// Append rows as given.
    pub fn insert<I>(&mut self, rows: I) -> &mut Self
    where
        I: IntoIterator<Item = InsertRow>,
    {
        self.state.insert.extend(rows);
        self
    }

    /// Render the current state without consuming it.
    pub fn get_sql(&self) -> Result<String, ClientError> {
        self.client.get_sql(&self.state)
    }

    /// Discard everything accumulated so far.
    pub fn reset(&mut self) {
        self.state = QueryState::default();
    }

    /// Render, reset and execute.
    ///
    /// Rendering and reset happen before this returns, so the builder can
    /// accumulate the next statement while the returned future is pending.
    /// The state is reset even when rendering fails.
    pub fn run(
        &mut self,
        args: QueryArgs,
    ) -> impl Future<Output = Result<QueryResult, ClientError>> + Send + 'static {
        let state = mem::take(&mut self.state);
        let rendered = self.client.get_sql(&state);
        let client = Arc::clone(&self.client);

        async move {
            let sql = rendered?;
            client.raw(&sql, &args).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clauses;
    use crate::db::client::RenderOnlyClient;
    use crate::db::connection::Engine;
    use crate::error::RenderError;
    use crate::query::{Clause, QueryState};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Renders with the SQLite dialect and records every executed statement.
    #[derive(Default)]
    struct Recorder {
        executed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Client for Recorder {
        fn engine(&self) -> Engine {
            Engine::Sqlite
        }

        fn uid(&self) -> &str {
            "recorder"
        }

        fn get_sql(&self, state: &QueryState) -> Result<String, ClientError> {
            Ok(self.engine().dialect().render(state)?)
        }

        async fn raw(&self, sql: &str, _args: &QueryArgs) -> Result<QueryResult, ClientError> {
            tokio::task::yield_now().await;
            self.executed.lock().unwrap().push(sql.to_string());
            Ok(QueryResult::empty())
        }
    }

    struct Bare;

    impl Client for Bare {
        fn engine(&self) -> Engine {
            Engine::Postgres
        }

        fn uid(&self) -> &str {
            "bare"
        }
    }

    fn recorder() -> (Arc<Recorder>, QueryBuilder) {
        let client = Arc::new(Recorder::default());
        let builder = QueryBuilder::new(client.clone());
        (client, builder)
    }

    #[test]
    fn test_where_flattens_one_level() {
        let (_, mut qb) = recorder();
        qb.where_(clauses![1, vec![2, 3]]);
        assert_eq!(qb.state().where_clauses(), ["1", "2", "3"]);
    }

    #[test]
    fn test_conditions_replace_only_their_own_call() {
        let (_, mut qb) = recorder();
        qb.where_(["x = 0"]);
        qb.where_(clauses!["dropped = 1", Clause::conditions([("a", "> 1")])]);
        assert_eq!(qb.state().where_clauses(), ["x = 0", "a > 1"]);
    }

    #[test]
    fn test_into_table_matches_from() {
        let (_, mut a) = recorder();
        let (_, mut b) = recorder();
        a.into_table("users");
        b.from("users");
        assert_eq!(a.state(), b.state());
    }

    #[test]
    fn test_into_table_on_owned_builder() {
        let mut qb = QueryBuilder::new(Arc::new(RenderOnlyClient::new(Engine::Postgres, "p")));
        qb.into_table("users")
            .insert([InsertRow::new().set("id", 1)]);
        assert_eq!(
            qb.get_sql().unwrap(),
            "INSERT INTO \"users\" (\"id\") VALUES (1)"
        );
    }

    #[test]
    fn test_delete_sets_flag_and_table() {
        let (_, mut qb) = recorder();
        qb.delete("sessions");
        assert!(qb.state().is_delete());
        assert_eq!(qb.state().from(), "sessions");
        assert_eq!(qb.get_sql().unwrap(), "DELETE FROM \"sessions\"");
    }

    #[test]
    fn test_get_sql_does_not_reset() {
        let (_, mut qb) = recorder();
        qb.select(["id"]).from("t").limit(2);
        assert_eq!(qb.get_sql().unwrap(), "SELECT id FROM \"t\" LIMIT 2");
        assert!(!qb.state().is_default());
    }

    #[test]
    fn test_mysql_rendering_through_builder() {
        let mut qb = QueryBuilder::new(Arc::new(RenderOnlyClient::new(Engine::MySql, "m")));
        qb.schema("shop")
            .select(["id", "total"])
            .from("orders")
            .where_(["total > 100"])
            .order_by(["id DESC"])
            .offset(10);
        assert_eq!(
            qb.get_sql().unwrap(),
            "SELECT id, total FROM `shop`.`orders` WHERE total > 100 ORDER BY id DESC \
             LIMIT 18446744073709551615 OFFSET 10"
        );
    }

    #[tokio::test]
    async fn test_run_resets_state_on_success() {
        let (client, mut qb) = recorder();
        qb.select(["a"]).from("t").where_(["a > 1"]);
        qb.run(QueryArgs::default()).await.unwrap();
        assert!(qb.state().is_default());
        assert_eq!(
            client.executed.lock().unwrap().as_slice(),
            ["SELECT a FROM \"t\" WHERE a > 1"]
        );
    }

    #[tokio::test]
    async fn test_run_resets_state_on_render_failure() {
        let (client, mut qb) = recorder();
        qb.from("t").update(["a = 1"]).delete("t");
        let err = qb.run(QueryArgs::default()).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Render(RenderError::ConflictingModes(_))
        ));
        assert!(qb.state().is_default());
        assert!(client.executed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bare_client_run_is_not_implemented() {
        let mut qb = QueryBuilder::new(Arc::new(Bare));
        qb.select(["1"]);
        let err = qb.run(QueryArgs::default()).await.unwrap_err();
        assert!(err.is_not_implemented());
        assert!(qb.state().is_default());
        assert!(qb.get_sql().unwrap_err().is_not_implemented());
    }

    #[tokio::test]
    async fn test_second_run_does_not_see_first_statement() {
        let (client, mut qb) = recorder();

        qb.select(["a"]).from("t");
        let first = qb.run(QueryArgs::default());

        qb.from("u").where_(["x = 1"]);
        let second = qb.run(QueryArgs::default());

        let (r1, r2) = tokio::join!(first, second);
        r1.unwrap();
        r2.unwrap();

        let mut executed = client.executed.lock().unwrap().clone();
        executed.sort();
        assert_eq!(
            executed,
            vec![
                "SELECT * FROM \"u\" WHERE x = 1".to_string(),
                "SELECT a FROM \"t\"".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_run_future_outlives_builder() {
        let (client, mut qb) = recorder();
        qb.select(["1"]);
        let pending = qb.run(QueryArgs::default());
        drop(qb);
        tokio::spawn(pending).await.unwrap().unwrap();
        assert_eq!(client.executed.lock().unwrap().len(), 1);
    }
}
