//! Two or more devices replicating through one in-memory WebDAV server.

use chrono::{DateTime, TimeZone, Utc};
use ledgersync_engine::{
    EndpointConfig, MemoryDav, PushOutcome, RoundOutcome, SyncConfig, SyncOrchestrator,
};
use ledgersync_model::{Account, AccountKind, EntityId, EntityType, Transaction, TransactionKind};
use ledgersync_protocol::Resolution;
use ledgersync_storage::{InMemoryStore, StateStore};
use std::sync::Arc;

fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).single().unwrap()
}

fn endpoint() -> EndpointConfig {
    EndpointConfig::new("dav.example.org")
        .with_path("/remote.php/dav/files/me/ledger")
        .with_credentials("me", "app-password")
        .with_encryption_key("correct horse battery staple")
}

fn server() -> Arc<MemoryDav> {
    Arc::new(MemoryDav::new().with_credentials("me", "app-password"))
}

fn device(dav: &Arc<MemoryDav>, name: &str) -> SyncOrchestrator<MemoryDav> {
    let store: Arc<dyn StateStore> = Arc::new(InMemoryStore::new());
    SyncOrchestrator::open(SyncConfig::new(name), Arc::clone(dav), store, endpoint()).unwrap()
}

const TXN: [u8; 16] = [7; 16];
const ACCOUNT: [u8; 16] = [9; 16];

fn transaction(amount: i64, updated: i64) -> Transaction {
    Transaction {
        id: EntityId::from_bytes(TXN),
        kind: TransactionKind::Expense,
        amount,
        date: ts(0),
        category_id: EntityId::from_bytes([1; 16]),
        account_id: EntityId::from_bytes(ACCOUNT),
        note: None,
        created_at: ts(0),
        updated_at: ts(updated),
    }
}

fn account(name: &str, updated: i64) -> Account {
    Account {
        id: EntityId::from_bytes(ACCOUNT),
        name: name.into(),
        kind: AccountKind::Bank,
        initial_balance: 150_000,
        created_at: ts(0),
        updated_at: ts(updated),
    }
}

fn amount(sync: &SyncOrchestrator<MemoryDav>) -> Option<i64> {
    sync.replica()
        .lock()
        .ledger()
        .get::<Transaction>(&EntityId::from_bytes(TXN))
        .map(|t| t.amount)
}

fn outbox_for(sync: &SyncOrchestrator<MemoryDav>, entity_type: EntityType, id: [u8; 16]) -> usize {
    let id = EntityId::from_bytes(id);
    sync.replica()
        .lock()
        .outbox()
        .pending_for(entity_type, &id)
        .count()
}

/// Both devices start from a shared transaction with amount 100 at t=10.
async fn shared_transaction(dav: &Arc<MemoryDav>) -> (SyncOrchestrator<MemoryDav>, SyncOrchestrator<MemoryDav>) {
    let a = device(dav, "device-a");
    let b = device(dav, "device-b");
    a.edit(|r| r.upsert(transaction(100, 10), ts(10))).unwrap();
    a.sync_now().await.unwrap();
    a.pull_now().await.unwrap();
    b.sync_now().await.unwrap();
    assert_eq!(amount(&b), Some(100));
    assert_eq!(outbox_for(&a, EntityType::Transaction, TXN), 0);
    (a, b)
}

#[tokio::test]
async fn identical_push_creates_one_changeset() {
    let dav = server();
    let a = device(&dav, "device-a");
    a.edit(|r| r.upsert(transaction(100, 10), ts(10))).unwrap();

    let first = a.push_now().await.unwrap();
    let second = a.push_now().await.unwrap();
    assert_eq!(first.outcome, PushOutcome::Created { sequence: 1 });
    assert_eq!(second.outcome, PushOutcome::Unchanged { sequence: 1 });

    let changesets = dav
        .file_paths()
        .into_iter()
        .filter(|p| p.contains("changeset-"))
        .count();
    assert_eq!(changesets, 1);
}

#[tokio::test]
async fn own_events_come_back_as_echoes() {
    let dav = server();
    let a = device(&dav, "device-a");
    a.edit(|r| r.upsert(transaction(100, 10), ts(10))).unwrap();
    a.push_now().await.unwrap();

    let pull = a.pull_now().await.unwrap();
    assert_eq!(pull.report.echoes, 1);
    assert_eq!(pull.report.applied, 0);
    assert!(pull.report.conflicts.is_empty());
    assert!(a.replica().lock().outbox().is_empty());

    // Nothing left to push: the round makes no new changeset.
    match a.sync_now().await.unwrap() {
        RoundOutcome::Completed { push, .. } => assert_eq!(push.events, 0),
        other => panic!("unexpected outcome: {other}"),
    }
}

#[tokio::test]
async fn concurrent_amount_edits_conflict_once_and_resolve() {
    let dav = server();
    let (a, b) = shared_transaction(&dav).await;

    // Both edit offline from the same ancestor.
    a.edit(|r| r.upsert(transaction(200, 20), ts(20))).unwrap();
    b.edit(|r| r.upsert(transaction(300, 30), ts(30))).unwrap();

    // A goes first: nothing new to pull, so its edit is pushed.
    match a.sync_now().await.unwrap() {
        RoundOutcome::Completed { push, .. } => {
            assert_eq!(push.outcome, PushOutcome::Created { sequence: 2 })
        }
        other => panic!("unexpected outcome: {other}"),
    }

    // B pulls A's edit against its own diverged copy and stops.
    match b.sync_now().await.unwrap() {
        RoundOutcome::ConflictsPending { pull, pending } => {
            assert_eq!(pull.report.conflicts.len(), 1);
            assert_eq!(pending, 1);
        }
        other => panic!("unexpected outcome: {other}"),
    }
    assert_eq!(amount(&b), Some(300));

    // B publishes its edit anyway; A now sees it as a conflict too.
    b.push_now().await.unwrap();
    match a.sync_now().await.unwrap() {
        RoundOutcome::ConflictsPending { pull, .. } => {
            assert_eq!(pull.report.echoes, 1);
            assert_eq!(pull.report.conflicts.len(), 1);
        }
        other => panic!("unexpected outcome: {other}"),
    }

    // Later pulls do not file the same conflicts again.
    assert!(a.pull_now().await.unwrap().report.conflicts.is_empty());
    assert!(b.pull_now().await.unwrap().report.conflicts.is_empty());
    assert_eq!(a.conflicts().len(), 1);
    assert_eq!(b.conflicts().len(), 1);

    // A takes B's amount.
    let conflict = a.conflicts()[0].id.to_string();
    a.resolve(&conflict, Resolution::UseRemote).unwrap();
    assert_eq!(amount(&a), Some(300));
    assert_eq!(outbox_for(&a, EntityType::Transaction, TXN), 0);

    // B keeps its own.
    let conflict = b.conflicts()[0].id.to_string();
    b.resolve(&conflict[..8], Resolution::UseLocal).unwrap();
    assert_eq!(amount(&b), Some(300));

    // Both converge, and replaying the whole log changes nothing.
    a.sync_now().await.unwrap();
    b.sync_now().await.unwrap();
    let key = endpoint().endpoint_key();
    a.replica().lock().set_watermark(&key, 0).unwrap();
    let replay = a.pull_now().await.unwrap();
    assert!(replay.report.conflicts.is_empty());
    assert_eq!(replay.report.applied, 0);
    assert!(a.conflicts().is_empty());
    assert_eq!(amount(&a), Some(300));
}

#[tokio::test]
async fn fresh_device_replays_the_log() {
    let dav = server();
    let (a, _b) = shared_transaction(&dav).await;
    a.edit(|r| r.upsert(transaction(250, 20), ts(20))).unwrap();
    a.edit(|r| r.upsert(account("Checking", 20), ts(20))).unwrap();
    a.sync_now().await.unwrap();

    let c = device(&dav, "device-c");
    let pull = c.pull_now().await.unwrap();
    assert_eq!(pull.changesets, 2);
    assert!(pull.report.conflicts.is_empty());
    assert_eq!(amount(&c), Some(250));
    assert_eq!(c.replica().lock().ledger().count(EntityType::Account), 1);
}

#[tokio::test]
async fn rename_against_delete_is_flagged_and_later_deletion_holds() {
    let dav = server();
    let a = device(&dav, "device-a");
    let b = device(&dav, "device-b");
    a.edit(|r| r.upsert(account("Savings", 10), ts(10))).unwrap();
    a.sync_now().await.unwrap();
    a.pull_now().await.unwrap();
    b.sync_now().await.unwrap();

    // B renames at t=20; A deletes at t=30 without seeing the rename.
    b.edit(|r| r.upsert(account("Rainy day", 20), ts(20))).unwrap();
    b.sync_now().await.unwrap();
    let id = EntityId::from_bytes(ACCOUNT);
    assert!(a
        .edit(|r| r.delete::<Account>(id, ts(30), ts(30)))
        .unwrap());

    // The rename was built on t=10 but A's deletion is newer: flagged.
    match a.sync_now().await.unwrap() {
        RoundOutcome::ConflictsPending { pull, .. } => assert_eq!(pull.report.conflicts.len(), 1),
        other => panic!("unexpected outcome: {other}"),
    }
    assert!(a.replica().lock().ledger().get::<Account>(&id).is_none());

    // Keeping the later deletion publishes it; B has to decide too.
    let conflict = a.conflicts()[0].id.to_string();
    a.resolve(&conflict, Resolution::UseLocal).unwrap();
    a.sync_now().await.unwrap();

    match b.sync_now().await.unwrap() {
        RoundOutcome::ConflictsPending { .. } => {}
        other => panic!("unexpected outcome: {other}"),
    }
    let conflict = b.conflicts()[0].id.to_string();
    b.resolve(&conflict, Resolution::UseRemote).unwrap();

    for sync in [&a, &b] {
        let replica = sync.replica();
        let replica = replica.lock();
        let accounts = replica.ledger().collection::<Account>();
        assert!(accounts.get(&id).is_none());
        assert_eq!(accounts.deleted_at(&id), Some(ts(30)));
    }
}

#[tokio::test]
async fn later_edit_resurrects_deleted_entity_everywhere() {
    let dav = server();
    let a = device(&dav, "device-a");
    let b = device(&dav, "device-b");
    let id = EntityId::from_bytes(ACCOUNT);

    a.edit(|r| r.upsert(account("Savings", 10), ts(10))).unwrap();
    a.sync_now().await.unwrap();
    a.pull_now().await.unwrap();
    b.sync_now().await.unwrap();

    // A deletes, B learns about it.
    a.edit(|r| r.delete::<Account>(id, ts(20), ts(20))).unwrap();
    a.sync_now().await.unwrap();
    a.pull_now().await.unwrap();
    b.sync_now().await.unwrap();
    assert!(b.replica().lock().ledger().get::<Account>(&id).is_none());

    // A restores it with a later edit; the marker is dropped on both sides.
    a.edit(|r| r.upsert(account("Savings", 40), ts(40))).unwrap();
    a.sync_now().await.unwrap();
    b.sync_now().await.unwrap();

    for sync in [&a, &b] {
        let replica = sync.replica();
        let replica = replica.lock();
        let accounts = replica.ledger().collection::<Account>();
        assert_eq!(accounts.get(&id).map(|acc| acc.updated_at), Some(ts(40)));
        assert_eq!(accounts.deleted_at(&id), None);
    }
}

#[tokio::test]
async fn wrong_key_never_applies_anything() {
    let dav = server();
    let a = device(&dav, "device-a");
    a.edit(|r| r.upsert(transaction(100, 10), ts(10))).unwrap();
    a.sync_now().await.unwrap();

    let b = device(&dav, "device-b");
    b.update_endpoint(endpoint().with_encryption_key("wrong"));
    let err = b.pull_now().await.unwrap_err();
    assert!(matches!(err, ledgersync_engine::SyncError::DecryptionFailed));
    assert_eq!(amount(&b), None);
    assert_eq!(b.logs().len(), 1);
}
