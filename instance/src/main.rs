//! tabsync demo - two instances converging through a shared store.
//!
//! Opens two instances ("tabs") against one shared store and one change
//! channel, inserts a patient in the first and shows the second adopting it
//! and continuing the id sequence. Each tab gets its own in-memory database.
//! Set `TABSYNC_STORE_DIR` to keep the shared store on disk.

use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use tabsync_instance::{
    ChannelHub, DirStore, Instance, KeyValueStore, LocalEvent, MemoryStore, QueryRow, Statement,
    SyncConfig,
};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const INSERT_PATIENT: &str = "INSERT INTO patients (first_name, last_name, date_of_birth, gender) \
                              VALUES (?, ?, ?, ?) RETURNING id";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tabsync_instance=debug,tabsync_demo=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = SyncConfig::from_env()?.with_database_url("sqlite::memory:");

    let store: Arc<dyn KeyValueStore> = match &config.store_dir {
        Some(dir) => {
            tracing::info!("Using shared store in {}", dir.display());
            Arc::new(DirStore::open(dir)?)
        }
        None => Arc::new(MemoryStore::new()),
    };
    let hub = ChannelHub::new_shared();

    let tabs = try_join_all(
        (0..2).map(|_| Instance::open(config.clone(), store.clone(), hub.clone())),
    )
    .await?;
    let (a, b) = (&tabs[0], &tabs[1]);

    let mut a_events = a.subscribe_events();
    let mut b_events = b.subscribe_events();

    let rows = a.execute_query(patient("Jo", "Doe")).await?;
    tracing::info!("Tab A inserted Jo Doe as {:?}", inserted_id(&rows));

    wait_for_change(&mut b_events, "B").await;
    let rows = b.execute_query("SELECT id, first_name, last_name FROM patients").await?;
    tracing::info!("Tab B now holds {:?}", rows);

    let rows = b.execute_query(patient("Ana", "Lee")).await?;
    tracing::info!("Tab B inserted Ana Lee as {:?}", inserted_id(&rows));

    wait_for_change(&mut a_events, "A").await;
    let rows = a.execute_query("SELECT id, first_name FROM patients").await?;
    tracing::info!("Tab A now holds {} patients", rows.len());

    for tab in &tabs {
        tab.close().await;
    }

    Ok(())
}

fn patient(first_name: &str, last_name: &str) -> Statement {
    Statement::new(INSERT_PATIENT)
        .bind(first_name)
        .bind(last_name)
        .bind("1990-01-01")
        .bind("female")
}

fn inserted_id(rows: &[QueryRow]) -> Option<i64> {
    rows.first()?.get("id")?.as_i64()
}

async fn wait_for_change(events: &mut broadcast::Receiver<LocalEvent>, tab: &str) {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(LocalEvent::Changed(n)) => return Some(n),
                Ok(LocalEvent::SyncFailed(notice)) => {
                    tracing::warn!("Tab {} sync failed: {}", tab, notice.message);
                }
                Err(_) => return None,
            }
        }
    };

    match tokio::time::timeout(Duration::from_secs(5), wait).await {
        Ok(Some(n)) => tracing::info!("Tab {} caught up after {} on {}", tab, n.action, n.table),
        _ => tracing::warn!("Tab {} did not catch up", tab),
    }
}
