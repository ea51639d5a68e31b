use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_postgres::{Config, NoTls};
use ulid::Ulid;

const HOUR: i64 = 3_600_000; // 1 hour in ms
/// Slots start here so every span passes timestamp validation.
const BASE: i64 = 1_800_000_000_000;

async fn connect(host: &str, port: u16, db: &str) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(db)
        .user("tally")
        .password("tally");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

fn fresh_tenant() -> String {
    format!("bench_{}", Ulid::new())
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

async fn create_slot(client: &tokio_postgres::Client, i: i64, capacity: u32) -> Ulid {
    let id = Ulid::new();
    let service = Ulid::new();
    let start = BASE + i * HOUR;
    client
        .batch_execute(&format!(
            r#"INSERT INTO slots (id, service_id, start, "end", capacity) VALUES ('{id}', '{service}', {start}, {}, {capacity})"#,
            start + HOUR
        ))
        .await
        .unwrap();
    id
}

async fn phase1_sequential(host: &str, port: u16) {
    let client = connect(host, port, &fresh_tenant()).await;
    let n = 2000;
    let slot = create_slot(&client, 0, n as u32).await;

    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();
    for _ in 0..n {
        let bid = Ulid::new();
        let t = Instant::now();
        client
            .batch_execute(&format!(
                "INSERT INTO bookings (id, slot_id, visitor_count) VALUES ('{bid}', '{slot}', 1)"
            ))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

/// Many checkout sessions race for one small slot: lock, then book through the lock.
async fn phase2_checkout_contention(host: &str, port: u16) {
    let tenant = fresh_tenant();
    let capacity = 10u32;
    let setup = connect(host, port, &tenant).await;
    let slot = create_slot(&setup, 0, capacity).await;

    let n_sessions = 100;
    let booked = Arc::new(AtomicUsize::new(0));
    let refused = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();

    for s in 0..n_sessions {
        let host = host.to_string();
        let tenant = tenant.clone();
        let booked = booked.clone();
        let refused = refused.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &tenant).await;
            let lock = Ulid::new();
            let locked = client
                .batch_execute(&format!(
                    "INSERT INTO locks (id, slot_id, session_id) VALUES ('{lock}', '{slot}', 'session-{s}')"
                ))
                .await;
            if locked.is_err() {
                refused.fetch_add(1, Ordering::Relaxed);
                return;
            }
            let bid = Ulid::new();
            match client
                .batch_execute(&format!(
                    "INSERT INTO bookings (id, slot_id, visitor_count, lock_id) VALUES ('{bid}', '{slot}', 1, '{lock}')"
                ))
                .await
            {
                Ok(_) => booked.fetch_add(1, Ordering::Relaxed),
                Err(_) => refused.fetch_add(1, Ordering::Relaxed),
            };
        }));
    }
    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let booked = booked.load(Ordering::Relaxed);
    println!(
        "  {n_sessions} sessions on capacity {capacity}: {booked} booked, {} refused in {:.2}s",
        refused.load(Ordering::Relaxed),
        elapsed.as_secs_f64()
    );
    assert!(booked <= capacity as usize, "oversold: {booked} > {capacity}");
}

async fn phase3_read_under_load(host: &str, port: u16) {
    let tenant = fresh_tenant();
    let setup = connect(host, port, &tenant).await;
    for i in 0..200 {
        create_slot(&setup, i, 10).await;
    }
    let busy = create_slot(&setup, 1000, 1_000_000).await;
    drop(setup);

    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for _ in 0..5 {
        let host = host.to_string();
        let tenant = tenant.clone();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &tenant).await;
            while !stop.load(Ordering::Relaxed) {
                let bid = Ulid::new();
                let _ = client
                    .batch_execute(&format!(
                        "INSERT INTO bookings (id, slot_id, visitor_count) VALUES ('{bid}', '{busy}', 1)"
                    ))
                    .await;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();
    for _ in 0..n_readers {
        let host = host.to_string();
        let tenant = tenant.clone();
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &tenant).await;
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for _ in 0..reads_per_reader {
                let t = Instant::now();
                client.simple_query("SELECT * FROM slots").await.unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }
    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("slot listing", &mut all_latencies);
}

async fn phase4_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let ops_per_conn = 10;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = Arc::new(AtomicUsize::new(0));

    for _ in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &fresh_tenant()).await;
            let slot = create_slot(&client, 0, ops_per_conn).await;
            for _ in 0..ops_per_conn {
                let bid = Ulid::new();
                client
                    .batch_execute(&format!(
                        "INSERT INTO bookings (id, slot_id, visitor_count) VALUES ('{bid}', '{slot}', 1)"
                    ))
                    .await
                    .unwrap();
            }
            success.fetch_add(1, Ordering::Relaxed);
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} ops each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("TALLY_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("TALLY_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid TALLY_PORT");

    println!("=== tally stress benchmark ===");
    println!("target: {host}:{port}\n");

    println!("[phase 1] sequential booking throughput");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] checkout contention on one slot");
    phase2_checkout_contention(&host, port).await;

    println!("\n[phase 3] read latency under write load");
    phase3_read_under_load(&host, port).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}
