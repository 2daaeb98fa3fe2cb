//! Live PostgreSQL tests
//!
//! Run with `DATAGATE_TEST_POSTGRES='{"driver":"postgres","host":"localhost",
//! "port":5432,"username":"postgres","password":"postgres","database":"postgres"}'`.

mod common;

use datagate::engine::{
    DataTypeParams, EngineError, FilterCriterion, InsertedRow, Ordering, PageRequest, QueryShape, SortDirection,
    TableSettings, Value,
};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;

use common::*;

const ENV: &str = "DATAGATE_TEST_POSTGRES";

async fn admin_pool(config: &datagate::engine::ConnectionConfig) -> PgPool {
    let mut options = PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.username)
        .password(&config.password);
    if let Some(database) = &config.database {
        options = options.database(database);
    }
    PgPoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .expect("admin connection")
}

async fn exec(pool: &PgPool, sql: &str) {
    sqlx::query(sql).execute(pool).await.expect(sql);
}

async fn create_users(pool: &PgPool, users: &str, orders: &str) {
    exec(pool, &format!("DROP TABLE IF EXISTS {orders}, {users} CASCADE")).await;
    exec(
        pool,
        &format!(
            "CREATE TABLE {users} (id SERIAL PRIMARY KEY, name TEXT NOT NULL, email TEXT, \
             created_at TIMESTAMPTZ DEFAULT now(), profile JSONB)"
        ),
    )
    .await;
    exec(
        pool,
        &format!("CREATE TABLE {orders} (id SERIAL PRIMARY KEY, user_id INT REFERENCES {users}(id), total NUMERIC)"),
    )
    .await;
    for (name, email) in USERS {
        sqlx::query(&format!("INSERT INTO {users} (name, email) VALUES ($1, $2)"))
            .bind(name)
            .bind(email)
            .execute(pool)
            .await
            .expect("seed user");
    }
}

#[tokio::test]
async fn users_scenario_filters_searches_and_orders() {
    let Some(config) = config_from_env(ENV) else { return };
    let pool = admin_pool(&config).await;
    let users = scratch_table("dg_users_scn");
    let orders = scratch_table("dg_orders_scn");
    create_users(&pool, &users, &orders).await;

    let layer = layer();
    let dao = dao(&layer, &config);
    let settings = TableSettings {
        search_fields: vec!["email".into()],
        ..Default::default()
    };

    let page = dao
        .get_rows(&users, &users_shape(), &settings, PageRequest::default())
        .await
        .expect("rows");
    let names: Vec<&Value> = page.rows.iter().filter_map(|r| r.get("name")).collect();
    assert_eq!(names, vec![&text("Alba"), &text("Alice")]);

    let pagination = page.pagination.expect("paginated");
    assert_eq!(pagination.total, 2);
    assert_eq!(pagination.last_page, 1);
    assert_eq!(pagination.current_page, 1);
    assert!(!page.large_dataset);

    exec(&pool, &format!("DROP TABLE {orders}, {users}")).await;
}

#[tokio::test]
async fn structure_is_stable_and_keys_are_columns() {
    let Some(config) = config_from_env(ENV) else { return };
    let pool = admin_pool(&config).await;
    let users = scratch_table("dg_users_keys");
    let orders = scratch_table("dg_orders_keys");
    create_users(&pool, &users, &orders).await;

    let layer = layer();
    let dao = dao(&layer, &config);

    let first = dao.get_table_structure(&orders).await.expect("structure");
    let second = dao.get_table_structure(&orders).await.expect("structure");
    assert_eq!(first, second);

    let names: Vec<&str> = first.iter().map(|c| c.column_name.as_str()).collect();
    assert_eq!(names, vec!["id", "user_id", "total"]);

    let primary = dao.get_primary_columns(&orders).await.expect("primary keys");
    assert!(primary.iter().all(|pk| names.contains(&pk.column_name.as_str())));

    let foreign = dao.get_foreign_keys(&orders).await.expect("foreign keys");
    assert_eq!(foreign.len(), 1);
    assert_eq!(foreign[0].column_name, "user_id");
    assert_eq!(foreign[0].referenced_table_name, users);
    assert_eq!(foreign[0].referenced_column_name, "id");

    let missing = dao.get_table_structure("dg_no_such_table").await.unwrap_err();
    assert!(matches!(missing, EngineError::Schema { .. }));

    exec(&pool, &format!("DROP TABLE {orders}, {users}")).await;
}

#[tokio::test]
async fn inserted_rows_round_trip_with_json() {
    let Some(config) = config_from_env(ENV) else { return };
    let pool = admin_pool(&config).await;
    let users = scratch_table("dg_users_rt");
    let orders = scratch_table("dg_orders_rt");
    create_users(&pool, &users, &orders).await;

    let layer = layer();
    let dao = dao(&layer, &config);
    let profile = serde_json::json!({ "plan": "pro", "seats": 3 });

    let inserted = dao
        .add_row(
            &users,
            &row(&[
                ("name", text("Carol")),
                ("email", text("carol@example.com")),
                ("profile", Value::Json(profile.clone())),
            ]),
        )
        .await
        .expect("insert");
    let key = match inserted {
        InsertedRow::PrimaryKey(key) => key,
        InsertedRow::Row(row) => panic!("table has a primary key, got {row:?}"),
    };
    assert!(matches!(key.get("id"), Some(Value::Int(_))));

    let stored = dao
        .get_row_by_primary_key(&users, &key, &TableSettings::default())
        .await
        .expect("read")
        .expect("row exists");
    assert_eq!(stored.get("name"), Some(&text("Carol")));
    assert_eq!(stored.get("profile"), Some(&Value::Json(profile)));

    let hidden = TableSettings {
        excluded_fields: vec!["email".into()],
        ..Default::default()
    };
    let projected = dao
        .get_row_by_primary_key(&users, &key, &hidden)
        .await
        .expect("read")
        .expect("row exists");
    assert!(projected.get("email").is_none());

    let updated = dao
        .update_row(&users, &row(&[("email", Value::Null)]), &key)
        .await
        .expect("update");
    assert_eq!(updated.get("email"), Some(&Value::Null));

    let echoed = dao.delete_row(&users, &key).await.expect("delete");
    assert_eq!(echoed, key);
    assert!(dao
        .get_row_by_primary_key(&users, &key, &TableSettings::default())
        .await
        .expect("read")
        .is_none());

    let gone = dao.delete_row(&users, &key).await.unwrap_err();
    assert!(matches!(gone, EngineError::Execution { .. }));

    exec(&pool, &format!("DROP TABLE {orders}, {users}")).await;
}

#[tokio::test]
async fn page_requests_are_clamped_and_can_run_past_the_end() {
    let Some(config) = config_from_env(ENV) else { return };
    let pool = admin_pool(&config).await;
    let users = scratch_table("dg_users_pg");
    let orders = scratch_table("dg_orders_pg");
    create_users(&pool, &users, &orders).await;

    let layer = layer();
    let dao = dao(&layer, &config);
    let settings = TableSettings::default();

    let first = dao
        .get_rows(&users, &QueryShape::default(), &settings, PageRequest::new(0, 3))
        .await
        .expect("page 0");
    let pagination = first.pagination.expect("paginated");
    assert_eq!(pagination.current_page, 1);
    assert_eq!(pagination.last_page, 2);
    assert_eq!(first.rows.len(), 3);

    let past = dao
        .get_rows(&users, &QueryShape::default(), &settings, PageRequest::new(9, 3))
        .await
        .expect("page 9");
    assert!(past.rows.is_empty());
    assert_eq!(past.pagination.expect("paginated").current_page, 9);

    let unknown = QueryShape {
        filters: vec![FilterCriterion::new("name", "like", text("A%"))],
        ..Default::default()
    };
    let err = dao
        .get_rows(&users, &unknown, &settings, PageRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Filter { .. }));

    exec(&pool, &format!("DROP TABLE {orders}, {users}")).await;
}

#[tokio::test]
async fn enum_columns_expose_labels_and_accept_text() {
    let Some(config) = config_from_env(ENV) else { return };
    let pool = admin_pool(&config).await;
    let status = scratch_table("dg_status");
    let accounts = scratch_table("dg_accounts");
    exec(&pool, &format!("DROP TABLE IF EXISTS {accounts}")).await;
    exec(&pool, &format!("DROP TYPE IF EXISTS {status}")).await;
    exec(&pool, &format!("CREATE TYPE {status} AS ENUM ('active', 'inactive')")).await;
    exec(
        &pool,
        &format!("CREATE TABLE {accounts} (id SERIAL PRIMARY KEY, status {status} NOT NULL DEFAULT 'active')"),
    )
    .await;

    let layer = layer();
    let dao = dao(&layer, &config);

    let columns = dao.get_table_structure(&accounts).await.expect("structure");
    let column = columns.iter().find(|c| c.column_name == "status").expect("status column");
    assert_eq!(column.data_type, "enum");
    assert_eq!(
        column.data_type_params,
        Some(DataTypeParams::Labels(vec!["active".into(), "inactive".into()]))
    );

    dao.add_row(&accounts, &row(&[("status", text("inactive"))]))
        .await
        .expect("insert enum as text");
    dao.add_row(&accounts, &row(&[])).await.expect("insert defaults");

    let shape = QueryShape {
        filters: vec![FilterCriterion::new("status", "eq", text("inactive"))],
        ..Default::default()
    };
    let page = dao
        .get_rows(&accounts, &shape, &TableSettings::default(), PageRequest::default())
        .await
        .expect("filter on enum");
    assert_eq!(page.rows.len(), 1);
    assert_eq!(page.rows[0].get("status"), Some(&text("inactive")));

    exec(&pool, &format!("DROP TABLE {accounts}")).await;
    exec(&pool, &format!("DROP TYPE {status}")).await;
}

#[tokio::test]
async fn custom_types_keep_order_precision_and_json_scalars() {
    let Some(config) = config_from_env(ENV) else { return };
    let pool = admin_pool(&config).await;
    let grade = scratch_table("dg_grade");
    let ledger = scratch_table("dg_ledger");
    exec(&pool, &format!("DROP TABLE IF EXISTS {ledger}")).await;
    exec(&pool, &format!("DROP TYPE IF EXISTS {grade}")).await;
    exec(&pool, &format!("CREATE TYPE {grade} AS ENUM ('zeta', 'alpha')")).await;
    exec(
        &pool,
        &format!("CREATE TABLE {ledger} (id SERIAL PRIMARY KEY, grade {grade} NOT NULL, amount NUMERIC, meta JSONB)"),
    )
    .await;
    exec(
        &pool,
        &format!(
            "INSERT INTO {ledger} (grade, amount) VALUES \
             ('alpha', 123456789012345678901234567890123.5), ('zeta', 'NaN')"
        ),
    )
    .await;

    let layer = layer();
    let dao = dao(&layer, &config);

    // Enum order follows the type declaration, not the label text
    let shape = QueryShape {
        ordering: Some(Ordering {
            field: Some("grade".into()),
            direction: Some(SortDirection::Asc),
        }),
        ..Default::default()
    };
    let page = dao
        .get_rows(&ledger, &shape, &TableSettings::default(), PageRequest::default())
        .await
        .expect("ordered rows");
    let grades: Vec<&Value> = page.rows.iter().filter_map(|r| r.get("grade")).collect();
    assert_eq!(grades, vec![&text("zeta"), &text("alpha")]);

    let amounts: Vec<&Value> = page.rows.iter().filter_map(|r| r.get("amount")).collect();
    assert_eq!(amounts, vec![&text("NaN"), &text("123456789012345678901234567890123.5")]);

    let inserted = dao
        .add_row(&ledger, &row(&[("grade", text("alpha")), ("meta", text("hello"))]))
        .await
        .expect("insert json scalar");
    let InsertedRow::PrimaryKey(key) = inserted else {
        panic!("table has a primary key");
    };
    let stored = dao
        .get_row_by_primary_key(&ledger, &key, &TableSettings::default())
        .await
        .expect("read")
        .expect("row exists");
    assert_eq!(stored.get("meta"), Some(&text("hello")));

    let nothing_visible = TableSettings {
        excluded_fields: vec!["id".into(), "grade".into(), "amount".into(), "meta".into()],
        ..Default::default()
    };
    let err = dao
        .get_rows(&ledger, &QueryShape::default(), &nothing_visible, PageRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Filter { .. }));

    exec(&pool, &format!("DROP TABLE {ledger}")).await;
    exec(&pool, &format!("DROP TYPE {grade}")).await;
}

#[tokio::test]
async fn one_handle_per_configuration() {
    let Some(config) = config_from_env(ENV) else { return };
    let layer = layer();
    let dao = dao(&layer, &config);

    let checks = futures::future::join_all((0..8).map(|_| dao.test_connection())).await;
    assert!(checks.iter().all(|status| status.ok));
    assert_eq!(layer.cache().len().await, 1);
    assert_eq!(layer.clear_connection_cache().await, 1);
}
