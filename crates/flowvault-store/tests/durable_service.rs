//! Full service stack over durable storage: context and token state must
//! survive a database reopen.

use flowvault_core::{AllowAll, CallerContext, ContextService, MemoryKeyService, Value};
use flowvault_store::{RedbStorage, SystemEnv};
use uuid::Uuid;

type DurableService = ContextService<RedbStorage, MemoryKeyService, AllowAll, SystemEnv>;

fn service(storage: RedbStorage, keys: MemoryKeyService) -> DurableService {
    ContextService::new(storage, keys, AllowAll, SystemEnv::new())
}

#[tokio::test]
async fn encrypted_context_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flowvault.redb");
    // The key service must outlive the storage: ciphertext is only readable
    // while its OEK versions remain resolvable.
    let keys = MemoryKeyService::new();
    let ctx = CallerContext::new("owner-a");
    let instance = Uuid::new_v4();
    let value = Value::from("durable payload");

    {
        let storage = RedbStorage::open(&path).unwrap();
        let service = service(storage, keys.clone());
        assert!(service.add(&ctx, instance, "a1", &value).await.unwrap());
    }

    let storage = RedbStorage::open(&path).unwrap();
    let service = service(storage, keys);
    assert_eq!(service.get(&ctx, instance, "a1").await.unwrap(), Some(value));
}

#[tokio::test]
async fn token_ledger_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flowvault.redb");
    let keys = MemoryKeyService::new();
    let ctx = CallerContext::new("owner-a");
    let process = Uuid::new_v4();
    let instance = Uuid::new_v4();
    let element = Uuid::new_v4();
    let t1 = Value::from("T1");
    let t2 = Value::from("T2");

    {
        let storage = RedbStorage::open(&path).unwrap();
        let service = service(storage, keys.clone());
        service.save_token(&ctx, process, instance, Some(element), &t1).await.unwrap();
        service.save_token(&ctx, process, instance, Some(element), &t2).await.unwrap();
        service.remove_token(&ctx, process, instance, Some(element), &t1).await.unwrap();
    }

    let storage = RedbStorage::open(&path).unwrap();
    let service = service(storage, keys);

    let state = service.get_token(&ctx, process, instance, Some(element)).await.unwrap();
    assert_eq!(state.last, Some(t2.clone()));
    assert_eq!(state.tokens, vec![t2]);
}

#[tokio::test]
async fn rotation_and_reopen_compose() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flowvault.redb");
    let keys = MemoryKeyService::new();
    let ctx = CallerContext::new("owner-a");
    let instance = Uuid::new_v4();

    {
        let storage = RedbStorage::open(&path).unwrap();
        let service = service(storage, keys.clone());
        service.add(&ctx, instance, "pre", &Value::from("old key data")).await.unwrap();
    }

    keys.rotate("owner-a", b"new generation".to_vec()).unwrap();

    let storage = RedbStorage::open(&path).unwrap();
    let service = service(storage, keys);
    service.add(&ctx, instance, "post", &Value::from("new key data")).await.unwrap();

    assert_eq!(
        service.get(&ctx, instance, "pre").await.unwrap(),
        Some(Value::from("old key data"))
    );
    assert_eq!(
        service.get(&ctx, instance, "post").await.unwrap(),
        Some(Value::from("new key data"))
    );
}

#[tokio::test]
async fn instance_lifecycle_is_durable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flowvault.redb");
    let keys = MemoryKeyService::new();
    let ctx = CallerContext::new("owner-a");
    let (process, instance) = (Uuid::new_v4(), Uuid::new_v4());

    {
        let storage = RedbStorage::open(&path).unwrap();
        let service = service(storage, keys.clone());
        service.create_instance(&ctx, process, instance).await.unwrap();
    }

    let storage = RedbStorage::open(&path).unwrap();
    let service = service(storage, keys);
    service.complete_instance(&ctx, process, instance).await.unwrap();

    let record = service.get_instance(&ctx, process, instance).await.unwrap().unwrap();
    assert!(record.completed_secs.is_some());
    assert!(record.created_secs <= record.completed_secs.unwrap_or(0));
}
