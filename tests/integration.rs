use std::sync::Arc;

use futures_lite::StreamExt;
use iroh_collections::{
    catalog::{MemoryCatalogStore, TEXTDUMP},
    config::{Config, StorageConfig},
    events::ReadOpts,
    log::{Logs, MemoryLog},
    schema::{FieldKind, FieldSpec, TypeSpec},
    Collection, Error, IndexQuery, RawEntry, WriterKey,
};
use serde_json::json;
use testresult::TestResult;
use tracing_test::traced_test;

struct Writers {
    logs: Logs,
    alice: Arc<MemoryLog>,
    bob: Arc<MemoryLog>,
}

fn writers() -> Writers {
    let logs = Logs::default();
    let alice = Arc::new(MemoryLog::new(WriterKey::from_bytes([0xa1; 32])));
    let bob = Arc::new(MemoryLog::new(WriterKey::from_bytes([0xb0; 32])));
    logs.insert(alice.clone());
    logs.insert(bob.clone());
    Writers { logs, alice, bob }
}

fn task_type() -> TypeSpec {
    TypeSpec::new("task")
        .field("title", FieldSpec::new(FieldKind::String).basic().search())
        .field("priority", FieldSpec::new(FieldKind::Number).basic())
        .field("labels", FieldSpec::new(FieldKind::Array).basic())
}

fn task(id: &str, title: &str, priority: u64) -> RawEntry {
    RawEntry::new("tasks/task", id, json!({ "title": title, "priority": priority }))
}

#[tokio::test]
#[traced_test]
async fn two_writers_converge() -> TestResult {
    let w = writers();
    let config = Config {
        namespace: "tasks".to_string(),
        ..Default::default()
    };
    let catalogs = Arc::new(MemoryCatalogStore::new());
    let col = Collection::open(&config, w.logs.clone(), catalogs.clone()).await?;
    let ty = col.put_schema(task_type()).await?;
    assert_eq!(ty, "tasks/task");
    let mut events = col.subscribe(ReadOpts::default());

    // both writers see the same initial task, then edit it concurrently
    let created = col.append(&w.alice, task("t1", "write docs", 1)).await?;
    let edit_a = w
        .alice
        .append_entry(&task("t1", "write better docs", 2).with_links([created]))?;
    let edit_b = w
        .bob
        .append_entry(&task("t1", "write docs today", 3).with_links([created]))?;
    let other = w.bob.append_entry(&task("t2", "review pull request", 1))?;
    let outcome = col.apply(&[edit_a, edit_b, other]).await?;
    assert_eq!(outcome.resolution.current.len(), 3);
    assert_eq!(outcome.resolution.superseded.len(), 1);
    assert_eq!(col.get("t1").await?.len(), 2);

    // bob merges the fork
    let merged = col
        .append(
            &w.bob,
            task("t1", "write docs today", 3).with_links([edit_a, edit_b]),
        )
        .await?;
    let heads = col.get("t1").await?;
    assert_eq!(heads.len(), 1);
    assert_eq!(heads[0].address, merged);

    // three batches were announced, in order
    let mut ids = Vec::new();
    for _ in 0..3 {
        let message = events.next().await.expect("stream ended");
        assert_eq!(message.event, "update");
        ids.push(message.id);
    }
    assert_eq!(ids, vec![1, 2, 3]);

    let hits = col.search(TEXTDUMP, "review", 5).await?;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].doc["id"], json!("t2"));
    // one catalog per searchable type plus the textdump
    assert_eq!(catalogs.created(), 2);
    Ok(())
}

#[tokio::test]
async fn range_queries_over_applied_versions() -> TestResult {
    let w = writers();
    let config = Config {
        namespace: "tasks".to_string(),
        ..Default::default()
    };
    let col = Collection::open(&config, w.logs.clone(), Arc::new(MemoryCatalogStore::new())).await?;
    col.put_schema(task_type()).await?;
    let mut batch = Vec::new();
    for i in 0..10u64 {
        let log = if i % 2 == 0 { &w.alice } else { &w.bob };
        batch.push(log.append_entry(&task(&format!("t{i}"), "task", i))?);
    }
    col.apply(&batch).await?;

    let priorities = |versions: Vec<iroh_collections::Version>| -> Vec<u64> {
        versions
            .iter()
            .filter_map(|v| v.value["priority"].as_u64())
            .collect()
    };
    let query = IndexQuery::field("priority").of_type("task");
    assert_eq!(
        priorities(col.query(&query.clone().gte(7)).await?),
        vec![7, 8, 9]
    );
    assert_eq!(
        priorities(col.query(&query.clone().limit(2).offset(3)).await?),
        vec![3, 4]
    );
    assert_eq!(
        priorities(col.query(&query.clone().lt(3).reverse(true)).await?),
        vec![2, 1, 0]
    );
    let err = col.query(&IndexQuery::default()).await.unwrap_err();
    assert!(matches!(err, Error::MissingField));

    // labels are arrays: one posting per element
    let labeled = w.alice.append_entry(&RawEntry::new(
        "tasks/task",
        "t10",
        json!({ "labels": ["bug", "ui"] }),
    ))?;
    col.apply(&[labeled]).await?;
    let query = IndexQuery::field("tasks/task#labels").value("ui");
    let found = col.query(&query).await?;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].address, labeled);
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn persistent_collection_reopens() -> TestResult {
    let dir = tempfile::tempdir()?;
    let w = writers();
    let config = Config {
        storage: StorageConfig::Persistent(dir.path().join("collection.db")),
        namespace: "tasks".to_string(),
        ..Default::default()
    };
    let catalogs = Arc::new(MemoryCatalogStore::new());
    let first = {
        let col = Collection::open(&config, w.logs.clone(), catalogs.clone()).await?;
        col.put_schema(task_type()).await?;
        col.append(&w.alice, task("t1", "persist me", 5)).await?
    };

    let col = Collection::open(&config, w.logs.clone(), catalogs.clone()).await?;
    assert!(col.schema().get_type("task").is_some());
    assert_eq!(col.get("t1").await?[0].address, first);
    let info = col.index_info().await?;
    assert!(info.contains_key(TEXTDUMP));
    assert!(info.contains_key("tasks/task"));
    // catalogs were re-opened, not created again
    assert_eq!(catalogs.created(), 2);

    let found = col
        .query(&IndexQuery::field("priority").of_type("task").value(5))
        .await?;
    assert_eq!(found.len(), 1);
    Ok(())
}

#[tokio::test]
async fn late_subscribers_catch_up() -> TestResult {
    let w = writers();
    let config = Config {
        event_capacity: 5,
        namespace: "tasks".to_string(),
        ..Default::default()
    };
    let col = Collection::open(&config, w.logs.clone(), Arc::new(MemoryCatalogStore::new())).await?;
    for i in 0..10u64 {
        col.append(&w.alice, task(&format!("t{i}"), "task", i)).await?;
    }
    let mut stream = col.subscribe(ReadOpts::after(6));
    col.append(&w.bob, task("t10", "task", 10)).await?;
    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(stream.next().await.expect("stream ended").id);
    }
    assert_eq!(ids, vec![7, 8, 9, 10, 11]);
    Ok(())
}

#[tokio::test]
async fn concurrent_reads_share_one_fetch() -> TestResult {
    let w = writers();
    let col = Arc::new(
        Collection::open(&Config::default(), w.logs.clone(), Arc::new(MemoryCatalogStore::new()))
            .await?,
    );
    let address = w.alice.append_entry(&task("t1", "cached", 1))?;
    col.apply(&[address]).await?;
    let before = col.cache_stats();
    let reads = (0..8).map(|_| {
        let col = col.clone();
        tokio::spawn(async move { col.get("t1").await })
    });
    for read in reads {
        assert_eq!(read.await??.len(), 1);
    }
    let after = col.cache_stats();
    assert_eq!(after.fetches, before.fetches);
    Ok(())
}
