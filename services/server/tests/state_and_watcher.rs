use std::time::Duration;

use client::Client;
use serde_json::{json, Map, Value};

async fn start_server() -> (String, String) {
    let secret = "integration-test-secret".to_owned();
    let ops = server::ops::builtin_registry();
    let meta = server::bootstrap(secret.clone(), "127.0.0.1:0", ops).await.expect("server failed to bind");
    (meta.state_router, secret)
}

#[tokio::test]
async fn get_and_set_round_trip_through_the_same_namespace() {
    let (addr, secret) = start_server().await;
    let mut client = Client::connect(&addr, &secret, "round-trip").await.unwrap();

    client.set("greeting", json!("hello")).await.unwrap();
    assert_eq!(client.get("greeting").await.unwrap(), json!("hello"));

    let mut state = Map::new();
    state.insert("a".to_owned(), json!(1));
    state.insert("b".to_owned(), json!(2));
    client.update(state.clone()).await.unwrap();
    assert_eq!(client.get("a").await.unwrap(), json!(1));
    assert_eq!(client.get("b").await.unwrap(), json!(2));
}

#[tokio::test]
async fn namespaces_do_not_leak_into_each_other() {
    let (addr, secret) = start_server().await;
    let mut a = Client::connect(&addr, &secret, "ns-a").await.unwrap();
    let mut b = Client::connect(&addr, &secret, "ns-b").await.unwrap();

    a.set("key", json!("a-value")).await.unwrap();
    assert_eq!(b.get("key").await.unwrap(), Value::Null);
}

#[tokio::test]
async fn increment_is_atomic_under_concurrent_callers() {
    let (addr, secret) = start_server().await;
    let mut seed = Client::connect(&addr, &secret, "counters").await.unwrap();
    seed.set("hits", json!(0)).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..20 {
        let addr = addr.clone();
        let secret = secret.clone();
        handles.push(tokio::spawn(async move {
            let mut client = Client::connect(&addr, &secret, "counters").await.unwrap();
            client
                .run_fn_atomically("increment", vec![json!("hits")], Map::new(), Some(Duration::from_secs(5)))
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(seed.get("hits").await.unwrap(), json!(20));
}

#[tokio::test]
async fn watcher_wakes_on_a_matching_predicate() {
    let (addr, secret) = start_server().await;
    let mut writer = Client::connect(&addr, &secret, "flags").await.unwrap();
    let reader = Client::connect(&addr, &secret, "flags").await.unwrap();
    let mut watcher = reader.watcher().await.unwrap();

    let write_task = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        writer.set("ready", json!(true)).await.unwrap();
    });

    let state = watcher.when_truthy("ready", Some(Duration::from_secs(5))).await.unwrap();
    assert_eq!(state.get("ready"), Some(&json!(true)));
    write_task.await.unwrap();
}

#[tokio::test]
async fn watcher_predicate_times_out_when_it_never_becomes_true() {
    let (addr, secret) = start_server().await;
    let reader = Client::connect(&addr, &secret, "flags-timeout").await.unwrap();
    let mut watcher = reader.watcher().await.unwrap();

    let result = watcher.when_truthy("never", Some(Duration::from_millis(100))).await;
    assert!(matches!(result, Err(proto::ZprocError::Timeout)));
}

#[tokio::test]
async fn watcher_with_a_past_start_time_replays_a_change_made_before_it_connected() {
    let (addr, secret) = start_server().await;
    let mut writer = Client::connect(&addr, &secret, "replay").await.unwrap();
    let cursor = proto::now_seconds() - 1.0;

    writer.set("already-happened", json!(true)).await.unwrap();

    let reader = Client::connect(&addr, &secret, "replay").await.unwrap();
    let mut watcher = reader.watcher().await.unwrap();
    watcher.set_start_time(cursor);

    let reply = watcher.next_change(true, Some(Duration::from_secs(5))).await.unwrap();
    assert_eq!(reply.after.get("already-happened"), Some(&json!(true)));
}

#[tokio::test]
async fn watcher_with_count_yields_exactly_min_n_available_then_stops() {
    let (addr, secret) = start_server().await;
    let mut writer = Client::connect(&addr, &secret, "counted").await.unwrap();
    let reader = Client::connect(&addr, &secret, "counted").await.unwrap();
    let mut watcher = reader.watcher().await.unwrap();
    watcher.set_count(Some(2));

    let write_task = tokio::spawn(async move {
        for i in 0..3 {
            writer.set("n", json!(i)).await.unwrap();
        }
    });
    write_task.await.unwrap();

    watcher.next_change(true, Some(Duration::from_secs(5))).await.unwrap();
    watcher.next_change(true, Some(Duration::from_secs(5))).await.unwrap();
    let result = watcher.next_change(true, Some(Duration::from_secs(5))).await;
    assert!(matches!(result, Err(proto::ZprocError::Stopped)));
}
