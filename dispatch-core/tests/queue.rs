use std::collections::HashSet;
use std::time::Duration;

use chrono::Duration as Age;
use dispatch_core::QueueStore;
use serde_json::json;
use sqlx::SqlitePool;

mod common;
use common::{dispatch_aged, names, processors};

const NO_LIMIT: i64 = -1;

fn none() -> HashSet<uuid::Uuid> {
    HashSet::new()
}

#[sqlx::test(migrations = "./migrations")]
async fn dequeue_is_chronological_regardless_of_insert_order(pool: SqlitePool) {
    let store = QueueStore::from_pool(pool);
    let newest = dispatch_aged("newest", Age::seconds(1));
    let oldest = dispatch_aged("oldest", Age::seconds(30));
    let middle = dispatch_aged("middle", Age::seconds(10));

    store
        .store(
            &[newest.clone(), oldest.clone(), middle.clone()],
            &processors(&["p1"]),
        )
        .await
        .unwrap();

    let batch = store.dequeue("p1", NO_LIMIT, &none()).await.unwrap();
    assert_eq!(names(&batch), vec!["oldest", "middle", "newest"]);
}

#[sqlx::test(migrations = "./migrations")]
async fn dequeue_respects_limit_and_leaves_entries_queued(pool: SqlitePool) {
    let store = QueueStore::from_pool(pool);
    for i in 0..5 {
        store
            .store(
                &[dispatch_aged(&format!("e{i}"), Age::seconds(100 - i))],
                &processors(&["p1"]),
            )
            .await
            .unwrap();
    }

    let batch = store.dequeue("p1", 2, &none()).await.unwrap();
    assert_eq!(names(&batch), vec!["e0", "e1"]);

    // Dequeueing is a read: the same entries come back until deleted.
    let again = store.dequeue("p1", 2, &none()).await.unwrap();
    assert_eq!(batch, again);
    assert_eq!(store.size().await.unwrap(), 5);
}

#[sqlx::test(migrations = "./migrations")]
async fn dequeue_skips_excluded_ids(pool: SqlitePool) {
    let store = QueueStore::from_pool(pool);
    let first = dispatch_aged("first", Age::seconds(20));
    let second = dispatch_aged("second", Age::seconds(10));
    store
        .store(&[first.clone(), second.clone()], &processors(&["p1"]))
        .await
        .unwrap();

    let excluding = HashSet::from([first.id()]);
    let batch = store.dequeue("p1", NO_LIMIT, &excluding).await.unwrap();
    assert_eq!(names(&batch), vec!["second"]);
}

#[sqlx::test(migrations = "./migrations")]
async fn restoring_updates_in_place_and_never_duplicates(pool: SqlitePool) {
    let store = QueueStore::from_pool(pool);
    let mut dispatch = dispatch_aged("purchase", Age::seconds(10));
    store
        .store(&[dispatch.clone()], &processors(&["p1"]))
        .await
        .unwrap();

    dispatch.replace_payload(json!({"transformed": true}));
    store
        .store(&[dispatch.clone()], &processors(&["p1"]))
        .await
        .unwrap();

    assert_eq!(store.size().await.unwrap(), 1);
    let batch = store.dequeue("p1", NO_LIMIT, &none()).await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].payload(), &json!({"transformed": true}));
}

#[sqlx::test(migrations = "./migrations")]
async fn restoring_replaces_queue_membership(pool: SqlitePool) {
    let store = QueueStore::from_pool(pool);
    let dispatch = dispatch_aged("purchase", Age::seconds(10));

    store
        .store(&[dispatch.clone()], &processors(&["p1", "p2"]))
        .await
        .unwrap();
    assert_eq!(store.processor_queue_size().await.unwrap(), 2);

    // Re-storing for only p2 pulls the event out of p1's queue.
    store
        .store(&[dispatch.clone()], &processors(&["p2"]))
        .await
        .unwrap();

    assert!(store.dequeue("p1", NO_LIMIT, &none()).await.unwrap().is_empty());
    assert_eq!(
        names(&store.dequeue("p2", NO_LIMIT, &none()).await.unwrap()),
        vec!["purchase"]
    );
    assert_eq!(store.size().await.unwrap(), 1);
    assert_eq!(store.processor_queue_size().await.unwrap(), 1);
}

#[sqlx::test(migrations = "./migrations")]
async fn restoring_moves_an_event_between_disjoint_processor_sets(pool: SqlitePool) {
    let store = QueueStore::from_pool(pool);
    let dispatch = dispatch_aged("purchase", Age::seconds(10));

    store
        .store(&[dispatch.clone()], &processors(&["p1"]))
        .await
        .unwrap();

    // The new membership shares nothing with the old one; the event must
    // survive the handover rather than being garbage-collected mid-swap.
    store
        .store(&[dispatch.clone()], &processors(&["p2"]))
        .await
        .unwrap();

    assert!(store.dequeue("p1", NO_LIMIT, &none()).await.unwrap().is_empty());
    assert_eq!(
        names(&store.dequeue("p2", NO_LIMIT, &none()).await.unwrap()),
        vec!["purchase"]
    );
    assert_eq!(store.size().await.unwrap(), 1);
    assert_eq!(store.processor_queue_size().await.unwrap(), 1);
}

#[sqlx::test(migrations = "./migrations")]
async fn delete_from_last_queue_garbage_collects_the_event(pool: SqlitePool) {
    let store = QueueStore::from_pool(pool);
    let dispatch = dispatch_aged("purchase", Age::seconds(10));
    store
        .store(&[dispatch.clone()], &processors(&["p1", "p2"]))
        .await
        .unwrap();

    store.delete(&[dispatch.clone()], "p1").await.unwrap();
    assert_eq!(store.size().await.unwrap(), 1);

    store.delete(&[dispatch], "p2").await.unwrap();
    assert_eq!(store.size().await.unwrap(), 0);
    assert_eq!(store.processor_queue_size().await.unwrap(), 0);
}

#[sqlx::test(migrations = "./migrations")]
async fn delete_all_empties_only_the_named_queue(pool: SqlitePool) {
    let store = QueueStore::from_pool(pool);
    store
        .store(
            &[
                dispatch_aged("a", Age::seconds(10)),
                dispatch_aged("b", Age::seconds(5)),
            ],
            &processors(&["p1", "p2"]),
        )
        .await
        .unwrap();

    store.delete_all("p1").await.unwrap();

    assert!(store.dequeue("p1", NO_LIMIT, &none()).await.unwrap().is_empty());
    assert_eq!(store.dequeue("p2", NO_LIMIT, &none()).await.unwrap().len(), 2);
    assert_eq!(store.size().await.unwrap(), 2);
}

#[sqlx::test(migrations = "./migrations")]
async fn delete_queues_not_in_drops_stale_processors(pool: SqlitePool) {
    let store = QueueStore::from_pool(pool);
    store
        .store(
            &[dispatch_aged("a", Age::seconds(10))],
            &processors(&["kept", "removed"]),
        )
        .await
        .unwrap();

    store
        .delete_queues_not_in(&processors(&["kept"]))
        .await
        .unwrap();

    assert_eq!(store.size_for_processor("removed").await.unwrap(), 0);
    assert_eq!(store.size_for_processor("kept").await.unwrap(), 1);

    // An empty active set clears everything, including the orphaned events.
    store.delete_queues_not_in(&HashSet::new()).await.unwrap();
    assert_eq!(store.size().await.unwrap(), 0);
}

#[sqlx::test(migrations = "./migrations")]
async fn storing_past_capacity_evicts_oldest_events(pool: SqlitePool) {
    let store = QueueStore::from_pool(pool);
    store.resize(2).await.unwrap();

    store
        .store(
            &[
                dispatch_aged("oldest", Age::seconds(30)),
                dispatch_aged("middle", Age::seconds(20)),
            ],
            &processors(&["p1"]),
        )
        .await
        .unwrap();
    store
        .store(
            &[dispatch_aged("newest", Age::seconds(10))],
            &processors(&["p1"]),
        )
        .await
        .unwrap();

    let batch = store.dequeue("p1", NO_LIMIT, &none()).await.unwrap();
    assert_eq!(names(&batch), vec!["middle", "newest"]);
}

#[sqlx::test(migrations = "./migrations")]
async fn oversized_batch_keeps_only_its_newest_entries(pool: SqlitePool) {
    let store = QueueStore::from_pool(pool);
    store.resize(2).await.unwrap();

    store
        .store(
            &[
                dispatch_aged("a", Age::seconds(40)),
                dispatch_aged("b", Age::seconds(30)),
                dispatch_aged("c", Age::seconds(20)),
                dispatch_aged("d", Age::seconds(10)),
            ],
            &processors(&["p1"]),
        )
        .await
        .unwrap();

    let batch = store.dequeue("p1", NO_LIMIT, &none()).await.unwrap();
    assert_eq!(names(&batch), vec!["c", "d"]);
}

#[sqlx::test(migrations = "./migrations")]
async fn resize_trims_down_but_ignores_negative_sizes(pool: SqlitePool) {
    let store = QueueStore::from_pool(pool);
    store
        .store(
            &[
                dispatch_aged("oldest", Age::seconds(30)),
                dispatch_aged("middle", Age::seconds(20)),
                dispatch_aged("newest", Age::seconds(10)),
            ],
            &processors(&["p1"]),
        )
        .await
        .unwrap();

    store.resize(-5).await.unwrap();
    assert_eq!(store.size().await.unwrap(), 3);

    store.resize(1).await.unwrap();
    assert_eq!(store.size().await.unwrap(), 1);
    let batch = store.dequeue("p1", NO_LIMIT, &none()).await.unwrap();
    assert_eq!(names(&batch), vec!["newest"]);
}

#[sqlx::test(migrations = "./migrations")]
async fn expired_entries_are_invisible_but_linger_until_a_purge(pool: SqlitePool) {
    let store = QueueStore::from_pool(pool);
    store
        .store(
            &[
                dispatch_aged("stale", Age::hours(48)),
                dispatch_aged("fresh", Age::minutes(5)),
            ],
            &processors(&["p1"]),
        )
        .await
        .unwrap();

    // Reads exclude the expired entry but do not delete it.
    let batch = store.dequeue("p1", NO_LIMIT, &none()).await.unwrap();
    assert_eq!(names(&batch), vec!["fresh"]);
    assert_eq!(store.size_for_processor("p1").await.unwrap(), 1);
    assert_eq!(store.size().await.unwrap(), 2);

    // Changing the expiry purges what falls outside the window.
    store
        .set_expiry(Duration::from_secs(60 * 60))
        .await
        .unwrap();
    assert_eq!(store.size().await.unwrap(), 1);
}

#[sqlx::test(migrations = "./migrations")]
async fn widening_the_expiry_window_resurfaces_entries(pool: SqlitePool) {
    let store = QueueStore::from_pool(pool);
    store
        .store(
            &[dispatch_aged("old", Age::hours(48))],
            &processors(&["p1"]),
        )
        .await
        .unwrap();
    assert!(store.dequeue("p1", NO_LIMIT, &none()).await.unwrap().is_empty());

    store
        .set_expiry(Duration::from_secs(72 * 60 * 60))
        .await
        .unwrap();
    assert_eq!(
        names(&store.dequeue("p1", NO_LIMIT, &none()).await.unwrap()),
        vec!["old"]
    );
}

#[sqlx::test(migrations = "./migrations")]
async fn sizes_by_processor_counts_each_queue_separately(pool: SqlitePool) {
    let store = QueueStore::from_pool(pool);
    store
        .store(
            &[dispatch_aged("shared", Age::seconds(20))],
            &processors(&["p1", "p2"]),
        )
        .await
        .unwrap();
    store
        .store(
            &[dispatch_aged("only_p1", Age::seconds(10))],
            &processors(&["p1"]),
        )
        .await
        .unwrap();

    let sizes = store.sizes_by_processor().await.unwrap();
    assert_eq!(sizes.get("p1"), Some(&2));
    assert_eq!(sizes.get("p2"), Some(&1));
    assert_eq!(sizes.get("p3"), None);

    assert_eq!(store.size().await.unwrap(), 2);
    assert_eq!(store.processor_queue_size().await.unwrap(), 3);
}
