use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_postgres::{Config, NoTls, SimpleQueryMessage};
use tokio_test::{assert_err, assert_ok};
use ulid::Ulid;

use tally::config::EngineConfig;
use tally::tenant::TenantManager;
use tally::wire;

const HOUR: i64 = 3_600_000;
const T0: i64 = 4_000_000_000_000;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<TenantManager>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("tally_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let tm = Arc::new(TenantManager::new(
        dir,
        1000,
        EngineConfig::default(),
        Duration::from_secs(5),
    ));

    let tm2 = tm.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let tm = tm2.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, tm, "tally".to_string(), None).await;
            });
        }
    });

    (addr, tm)
}

async fn connect(addr: SocketAddr, db: &str) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname(db)
        .user("tally")
        .password("tally");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

async fn create_slot(client: &tokio_postgres::Client, capacity: u32) -> Ulid {
    let id = Ulid::new();
    let service = Ulid::new();
    client
        .batch_execute(&format!(
            r#"INSERT INTO slots (id, service_id, start, "end", capacity) VALUES ('{id}', '{service}', {T0}, {}, {capacity})"#,
            T0 + HOUR
        ))
        .await
        .unwrap();
    id
}

/// Data rows of a simple query as lists of column text.
async fn rows(client: &tokio_postgres::Client, sql: &str) -> Vec<Vec<Option<String>>> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(
                (0..row.len())
                    .map(|i| row.get(i).map(str::to_string))
                    .collect(),
            ),
            _ => None,
        })
        .collect()
}

/// Rows affected by a simple command.
async fn affected(client: &tokio_postgres::Client, sql: &str) -> u64 {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .find_map(|m| match m {
            SimpleQueryMessage::CommandComplete(n) => Some(n),
            _ => None,
        })
        .unwrap_or(0)
}

fn sqlstate(e: &tokio_postgres::Error) -> Option<&str> {
    e.code().map(|c| c.code())
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn slot_round_trip() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "slots").await;

    let id = create_slot(&client, 4).await;
    let found = rows(&client, &format!("SELECT * FROM slots WHERE id = '{id}'")).await;
    assert_eq!(found.len(), 1);
    let row = &found[0];
    assert_eq!(row[0].as_deref(), Some(id.to_string().as_str()));
    assert_eq!(row[4].as_deref(), Some("4")); // total
    assert_eq!(row[5].as_deref(), Some("4")); // available
    assert_eq!(row[6].as_deref(), Some("0")); // booked
}

#[tokio::test]
async fn held_capacity_blocks_other_sessions() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "holds").await;
    let slot = create_slot(&client, 2).await;

    let lock_a = Ulid::new();
    assert_ok!(
        client
            .batch_execute(&format!(
                "INSERT INTO locks (id, slot_id, session_id, units) VALUES ('{lock_a}', '{slot}', 'alice', 2)"
            ))
            .await
    );

    // Bob cannot lock or book while Alice holds everything.
    let lock_b = Ulid::new();
    let err = assert_err!(
        client
            .batch_execute(&format!(
                "INSERT INTO locks (id, slot_id, session_id) VALUES ('{lock_b}', '{slot}', 'bob')"
            ))
            .await
    );
    assert_eq!(sqlstate(&err), Some("53400"));

    let err = assert_err!(
        client
            .batch_execute(&format!(
                "INSERT INTO bookings (id, slot_id, visitor_count) VALUES ('{}', '{slot}', 1)",
                Ulid::new()
            ))
            .await
    );
    assert_eq!(sqlstate(&err), Some("53400"));
    assert_eq!(
        err.as_db_error().map(|d| d.message()),
        Some(wire::UNAVAILABLE_MESSAGE)
    );

    // Alice books through her own lock, which is consumed.
    let booking = Ulid::new();
    assert_ok!(
        client
            .batch_execute(&format!(
                "INSERT INTO bookings (id, slot_id, visitor_count, lock_id) VALUES ('{booking}', '{slot}', 2, '{lock_a}')"
            ))
            .await
    );
    let locks = rows(&client, &format!("SELECT * FROM locks WHERE slot_id = '{slot}'")).await;
    assert!(locks.is_empty());
    let slot_row = rows(&client, &format!("SELECT * FROM slots WHERE id = '{slot}'")).await;
    assert_eq!(slot_row[0][5].as_deref(), Some("0"));
    assert_eq!(slot_row[0][6].as_deref(), Some("2"));
}

#[tokio::test]
async fn cancellation_returns_capacity() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "cancel").await;
    let slot = create_slot(&client, 3).await;

    let booking = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO bookings (id, slot_id, visitor_count) VALUES ('{booking}', '{slot}', 3)"
        ))
        .await
        .unwrap();

    // Stale version is refused.
    let err = assert_err!(
        client
            .batch_execute(&format!(
                "UPDATE bookings SET status = 'cancelled' WHERE id = '{booking}' AND version = 7"
            ))
            .await
    );
    assert_eq!(sqlstate(&err), Some("40001"));

    assert_eq!(
        affected(
            &client,
            &format!("UPDATE bookings SET status = 'cancelled' WHERE id = '{booking}' AND version = 1")
        )
        .await,
        1
    );
    let slot_row = rows(&client, &format!("SELECT * FROM slots WHERE id = '{slot}'")).await;
    assert_eq!(slot_row[0][5].as_deref(), Some("3"));

    // Cancelled is terminal.
    let err = assert_err!(
        client
            .batch_execute(&format!(
                "UPDATE bookings SET status = 'confirmed' WHERE id = '{booking}'"
            ))
            .await
    );
    assert_eq!(sqlstate(&err), Some("40001"));

    let booking_row = rows(&client, &format!("SELECT * FROM bookings WHERE id = '{booking}'")).await;
    assert_eq!(booking_row[0][4].as_deref(), Some("cancelled"));
    assert_eq!(booking_row[0][9].as_deref(), Some("2")); // version
}

#[tokio::test]
async fn package_usage_covers_booking() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "packages").await;

    let slot = Ulid::new();
    let service = Ulid::new();
    client
        .batch_execute(&format!(
            r#"INSERT INTO slots (id, service_id, start, "end", capacity) VALUES ('{slot}', '{service}', {T0}, {}, 10)"#,
            T0 + HOUR
        ))
        .await
        .unwrap();
    let sub = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO package_usage (subscription_id, service_id, quantity) VALUES ('{sub}', '{service}', 2)"
        ))
        .await
        .unwrap();

    let booking = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO bookings (id, slot_id, visitor_count, subscription_id) VALUES ('{booking}', '{slot}', 3, '{sub}')"
        ))
        .await
        .unwrap();

    let b = rows(&client, &format!("SELECT * FROM bookings WHERE id = '{booking}'")).await;
    assert_eq!(b[0][7].as_deref(), Some("2")); // package_covered
    assert_eq!(b[0][8].as_deref(), Some("1")); // paid_quantity

    let usage = rows(
        &client,
        &format!("SELECT * FROM package_usage WHERE subscription_id = '{sub}'"),
    )
    .await;
    assert_eq!(usage[0][3].as_deref(), Some("0")); // remaining
    assert_eq!(usage[0][4].as_deref(), Some("2")); // used
}

#[tokio::test]
async fn extend_missing_lock_is_not_an_error() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "extend").await;

    let n = affected(
        &client,
        &format!("UPDATE locks SET ttl_ms = 60000 WHERE id = '{}'", Ulid::new()),
    )
    .await;
    assert_eq!(n, 0);
    assert_eq!(
        affected(&client, &format!("DELETE FROM locks WHERE id = '{}'", Ulid::new())).await,
        0
    );
}

#[tokio::test]
async fn delete_slot_with_bookings_refused() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "delete").await;
    let slot = create_slot(&client, 1).await;
    client
        .batch_execute(&format!(
            "INSERT INTO bookings (id, slot_id, visitor_count, status) VALUES ('{}', '{slot}', 1, 'pending')",
            Ulid::new()
        ))
        .await
        .unwrap();

    let err = assert_err!(
        client
            .batch_execute(&format!("DELETE FROM slots WHERE id = '{slot}'"))
            .await
    );
    assert_eq!(sqlstate(&err), Some("P0001"));
}

#[tokio::test]
async fn syntax_errors_report_42601() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "syntax").await;
    let err = assert_err!(client.batch_execute("SELEKT nonsense").await);
    assert_eq!(sqlstate(&err), Some("42601"));
}

#[tokio::test]
async fn prepared_statement_with_params() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "prepared").await;
    let slot = create_slot(&client, 5).await;

    let found = client
        .query("SELECT * FROM slots WHERE id = $1", &[&slot.to_string()])
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    let id: String = found[0].get("id");
    assert_eq!(id, slot.to_string());
}

#[tokio::test]
async fn tenants_do_not_share_slots() {
    let (addr, _tm) = start_test_server().await;
    let a = connect(addr, "tenant_a").await;
    let b = connect(addr, "tenant_b").await;

    create_slot(&a, 1).await;
    assert_eq!(rows(&a, "SELECT * FROM slots").await.len(), 1);
    assert!(rows(&b, "SELECT * FROM slots").await.is_empty());
}
