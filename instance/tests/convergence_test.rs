//! Integration tests for cross-instance convergence.
//!
//! Every instance runs against its own in-memory SQLite database; they share
//! one store and one channel hub, like tabs of the same origin.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tabsync_engine::{Action, ChangeNotification, MutationIntent, SnapshotKeys};
use tabsync_instance::{
    ChannelHub, DirStore, Instance, KeyValueStore, LocalEvent, MemoryStore, Phase, SnapshotStore,
    Statement, SyncConfig,
};
use tokio::sync::broadcast;

const INSERT: &str = "INSERT INTO patients (first_name, last_name, date_of_birth, gender) \
                      VALUES (?, ?, ?, ?) RETURNING id";

fn config() -> SyncConfig {
    SyncConfig::default().with_settle_delay(Duration::from_millis(10))
}

fn patient(first_name: &str, last_name: &str) -> Statement {
    Statement::new(INSERT)
        .bind(first_name)
        .bind(last_name)
        .bind("1990-01-01")
        .bind("female")
}

async fn open(store: Arc<dyn KeyValueStore>, hub: &Arc<ChannelHub>) -> Instance {
    Instance::open(config(), store, hub.clone()).await.unwrap()
}

async fn next_change(events: &mut broadcast::Receiver<LocalEvent>) -> ChangeNotification {
    let wait = async {
        loop {
            match events.recv().await.unwrap() {
                LocalEvent::Changed(n) => return n,
                LocalEvent::SyncFailed(notice) => panic!("sync failed: {:?}", notice),
            }
        }
    };

    tokio::time::timeout(Duration::from_secs(2), wait)
        .await
        .expect("no change event")
}

async fn table(instance: &Instance) -> Vec<tabsync_engine::Record> {
    instance
        .coordinator()
        .engine()
        .fetch_records()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_concrete_scenario() {
    let store = Arc::new(MemoryStore::new());
    let hub = ChannelHub::new_shared();

    let a = open(store.clone(), &hub).await;
    let b = open(store.clone(), &hub).await;
    let mut b_events = b.subscribe_events();

    let rows = a.execute_query(patient("Jo", "Doe")).await.unwrap();
    assert_eq!(rows[0]["id"], json!(1));

    let stored = SnapshotStore::new(store.clone(), SnapshotKeys::default())
        .restore()
        .unwrap()
        .unwrap();
    assert_eq!(stored.high_water_mark, 1);
    assert_eq!(stored.snapshot.len(), 1);

    let change = next_change(&mut b_events).await;
    assert_eq!(change.table, "patients");
    assert_eq!(change.action, Action::Insert);
    assert_eq!(change.snapshot_at, stored.captured_at);

    let b_table = table(&b).await;
    assert_eq!(b_table.len(), 1);
    assert_eq!(b_table[0].id, 1);
    assert_eq!(b_table[0].field("first_name"), Some(&json!("Jo")));

    let rows = b.execute_query(patient("Ana", "Lee")).await.unwrap();
    assert_eq!(rows[0]["id"], json!(2));
}

#[tokio::test]
async fn test_instances_converge() {
    let store = Arc::new(MemoryStore::new());
    let hub = ChannelHub::new_shared();

    let a = open(store.clone(), &hub).await;
    let b = open(store.clone(), &hub).await;
    let c = open(store.clone(), &hub).await;
    let mut b_events = b.subscribe_events();
    let mut c_events = c.subscribe_events();

    for name in ["Jo", "Ana", "Sam"] {
        a.execute_query(patient(name, "Doe")).await.unwrap();
        next_change(&mut b_events).await;
        next_change(&mut c_events).await;
    }

    let expected = table(&a).await;
    assert_eq!(expected.len(), 3);
    assert_eq!(table(&b).await, expected);
    assert_eq!(table(&c).await, expected);
}

#[tokio::test]
async fn test_free_form_dates_converge() {
    let store = Arc::new(MemoryStore::new());
    let hub = ChannelHub::new_shared();

    let a = open(store.clone(), &hub).await;
    let b = open(store.clone(), &hub).await;
    let mut b_events = b.subscribe_events();

    // The local engine keeps whatever text it was given
    a.execute_query(
        Statement::new(INSERT)
            .bind("Jo")
            .bind("Doe")
            .bind("01/01/1990")
            .bind("female"),
    )
    .await
    .unwrap();
    next_change(&mut b_events).await;

    let b_table = table(&b).await;
    assert_eq!(b_table, table(&a).await);
    assert_eq!(b_table[0].field("date_of_birth"), Some(&json!("01/01/1990")));
}

#[tokio::test]
async fn test_ids_stay_monotonic_after_adoption() {
    let store = Arc::new(MemoryStore::new());
    let hub = ChannelHub::new_shared();

    let a = open(store.clone(), &hub).await;
    let b = open(store.clone(), &hub).await;
    let mut b_events = b.subscribe_events();

    for name in ["Jo", "Ana", "Sam"] {
        a.execute_query(patient(name, "Doe")).await.unwrap();
        next_change(&mut b_events).await;
    }

    let rows = b.execute_query(patient("Kim", "Park")).await.unwrap();
    assert_eq!(rows[0]["id"], json!(4));
}

#[tokio::test]
async fn test_late_joiner_adopts_on_startup() {
    let store = Arc::new(MemoryStore::new());
    let hub = ChannelHub::new_shared();

    let a = open(store.clone(), &hub).await;
    a.execute_query(patient("Jo", "Doe")).await.unwrap();
    a.execute_query(patient("Ana", "Lee")).await.unwrap();

    let b = Instance::new(
        config(),
        Arc::new(
            tabsync_instance::SqliteEngine::connect("sqlite::memory:", config().table)
                .await
                .unwrap(),
        ),
        store.clone(),
        hub.clone(),
    );
    let mut phases = b.phase_watch();
    assert!(b.is_loading());

    b.start().await.unwrap();
    assert_eq!(*phases.borrow_and_update(), Phase::Ready);
    assert_eq!(table(&b).await, table(&a).await);

    let rows = b.execute_query(patient("Sam", "Roe")).await.unwrap();
    assert_eq!(rows[0]["id"], json!(3));
}

#[tokio::test]
async fn test_updates_and_deletes_propagate() {
    let store = Arc::new(MemoryStore::new());
    let hub = ChannelHub::new_shared();

    let a = open(store.clone(), &hub).await;
    let b = open(store.clone(), &hub).await;
    let mut b_events = b.subscribe_events();

    a.execute_query(patient("Jo", "Doe")).await.unwrap();
    next_change(&mut b_events).await;
    a.execute_query(patient("Ana", "Lee")).await.unwrap();
    next_change(&mut b_events).await;

    a.execute_query(
        Statement::new("UPDATE patients SET phone = ? WHERE id = ?")
            .bind("555-0100")
            .bind(1),
    )
    .await
    .unwrap();
    let change = next_change(&mut b_events).await;
    assert_eq!(change.action, Action::Update);

    a.execute_query(
        Statement::new("DELETE FROM patients WHERE id = ?")
            .bind(2)
            .with_intent(MutationIntent::new("patients", Action::Delete)),
    )
    .await
    .unwrap();
    let change = next_change(&mut b_events).await;
    assert_eq!(change.action, Action::Delete);

    let b_table = table(&b).await;
    assert_eq!(b_table.len(), 1);
    assert_eq!(b_table[0].field("phone"), Some(&json!("555-0100")));
}

#[tokio::test]
async fn test_publisher_gets_no_change_event() {
    let store = Arc::new(MemoryStore::new());
    let hub = ChannelHub::new_shared();

    let a = open(store.clone(), &hub).await;
    let _b = open(store.clone(), &hub).await;
    let mut a_events = a.subscribe_events();

    a.execute_query(patient("Jo", "Doe")).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(matches!(
        a_events.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));
}

#[tokio::test]
async fn test_directory_store_shared_between_handles() {
    let dir = tempfile::tempdir().unwrap();
    let hub = ChannelHub::new_shared();

    let a = open(Arc::new(DirStore::open(dir.path()).unwrap()), &hub).await;
    let b = open(Arc::new(DirStore::open(dir.path()).unwrap()), &hub).await;
    let mut b_events = b.subscribe_events();

    a.execute_query(patient("Jo", "Doe")).await.unwrap();
    next_change(&mut b_events).await;

    assert_eq!(table(&b).await, table(&a).await);
    assert!(dir.path().join("patient-db-snapshot").exists());
    assert!(dir.path().join("patient-db-last-id").exists());
}

#[tokio::test]
async fn test_closed_instance_stops_listening() {
    let store = Arc::new(MemoryStore::new());
    let hub = ChannelHub::new_shared();

    let a = open(store.clone(), &hub).await;
    let b = open(store.clone(), &hub).await;
    assert_eq!(hub.topic_member_count("patient-db-channel"), 2);

    b.close().await;
    assert_eq!(hub.topic_member_count("patient-db-channel"), 1);

    a.execute_query(patient("Jo", "Doe")).await.unwrap();
    assert_eq!(b.phase(), Phase::Closed);
}
