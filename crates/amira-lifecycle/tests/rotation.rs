//! Master key rotation across the local blob store.

use std::sync::Arc;
use std::time::Duration;

use amira_core::config::UploadConfig;
use amira_crypto::{CryptoError, KdfParams, KeyManager, MasterKey, UserKeyMaterial};
use amira_lifecycle::{
    change_passphrase, open_recording, rotate_recordings, AudioFormat, JournalIndex,
    LifecycleError, OpendalUploader, RecordingController, RecordingState, SyntheticDevice,
    UploadQueue,
};
use amira_storage::{load_key_material, save_key_material, LocalBlobStore};
use secrecy::SecretString;
use tempfile::TempDir;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

const FAST: KdfParams = KdfParams {
    mem_cost_kib: 1024,
    time_cost: 1,
    parallelism: 1,
};

struct Setup {
    _tmp: TempDir,
    keys: Arc<Mutex<KeyManager>>,
    store: LocalBlobStore,
    journal: Arc<Mutex<JournalIndex>>,
    controller: RecordingController,
}

fn setup() -> Setup {
    setup_with(MasterKey::from_bytes([1u8; 32]))
}

fn setup_with(master: MasterKey) -> Setup {
    let tmp = TempDir::new().unwrap();
    let mut km = KeyManager::new(Duration::from_secs(900), Duration::from_secs(60));
    km.unlock_with(master);
    let keys = Arc::new(Mutex::new(km));

    let store = LocalBlobStore::open(&tmp.path().join("blobs")).unwrap();
    let journal = Arc::new(Mutex::new(
        JournalIndex::open(&tmp.path().join("journal.json")).unwrap(),
    ));
    let controller = RecordingController::new(
        Arc::new(SyntheticDevice::new(AudioFormat::default())),
        keys.clone(),
        store.clone(),
        journal.clone(),
        "u1",
    );
    Setup {
        _tmp: tmp,
        keys,
        store,
        journal,
        controller,
    }
}

async fn record(controller: &mut RecordingController, fill: u8) -> String {
    controller.start(None).unwrap();
    controller.write_samples(&[fill; 3000]).unwrap();
    controller.stop().unwrap();
    controller.finalize().await.unwrap().id
}

#[tokio::test]
async fn rotation_rewraps_keys_without_touching_audio() {
    let mut s = setup();
    let a = record(&mut s.controller, 0xA0).await;
    let b = record(&mut s.controller, 0xB0).await;
    let before = s.store.get(&a).unwrap();

    let report = rotate_recordings(&s.keys, &s.store, MasterKey::from_bytes([2u8; 32]))
        .await
        .unwrap();

    let mut rewrapped = report.rewrapped.clone();
    rewrapped.sort();
    let mut expected = vec![a.clone(), b.clone()];
    expected.sort();
    assert_eq!(rewrapped, expected);
    assert!(report.skipped.is_empty());

    let after = s.store.get(&a).unwrap();
    assert_eq!(after.ciphertext, before.ciphertext);
    assert_eq!(after.iv, before.iv);
    assert_ne!(after.wrapped_key, before.wrapped_key);

    // new key is active and decrypts both
    assert_eq!(open_recording(&s.keys, &s.store, &a).await.unwrap().audio.as_slice(), &[0xA0; 3000][..]);
    assert_eq!(open_recording(&s.keys, &s.store, &b).await.unwrap().audio.as_slice(), &[0xB0; 3000][..]);

    // the old key no longer opens anything
    s.keys.lock().await.unlock_with(MasterKey::from_bytes([1u8; 32]));
    assert!(open_recording(&s.keys, &s.store, &a).await.is_err());
}

#[tokio::test]
async fn interrupted_rotation_resumes() {
    let mut s = setup();
    let a = record(&mut s.controller, 1).await;
    let b = record(&mut s.controller, 2).await;

    // simulate a run that rewrapped only `a` before stopping
    let rotation = s
        .keys
        .lock()
        .await
        .begin_rotation(MasterKey::from_bytes([2u8; 32]))
        .unwrap();
    let mut blob = s.store.get(&a).unwrap();
    match rotation.rewrap(&blob.wrapped_key).unwrap() {
        amira_crypto::RewrapOutcome::Rewrapped(w) => blob.wrapped_key = w,
        amira_crypto::RewrapOutcome::AlreadyRotated => panic!("fresh blob reported as rotated"),
    }
    s.store.put(&blob).unwrap();
    drop(rotation);

    let report = rotate_recordings(&s.keys, &s.store, MasterKey::from_bytes([2u8; 32]))
        .await
        .unwrap();
    assert_eq!(report.already_rotated, vec![a.clone()]);
    assert_eq!(report.rewrapped, vec![b.clone()]);

    assert!(open_recording(&s.keys, &s.store, &a).await.is_ok());
    assert!(open_recording(&s.keys, &s.store, &b).await.is_ok());
}

#[tokio::test]
async fn stranded_blob_blocks_install_until_resolved() {
    let mut s = setup();
    let ours = record(&mut s.controller, 5).await;

    // a blob wrapped under some unrelated key
    let stranger = {
        let mut km = KeyManager::new(Duration::from_secs(900), Duration::from_secs(60));
        km.unlock_with(MasterKey::from_bytes([9u8; 32]));
        let key = amira_crypto::generate_recording_key().unwrap();
        let mut blob = amira_crypto::encrypt("stranger", b"not ours", &key).unwrap();
        blob.wrapped_key = km.wrap_recording_key(&key).unwrap();
        blob
    };
    s.store.put(&stranger).unwrap();

    let err = rotate_recordings(&s.keys, &s.store, MasterKey::from_bytes([2u8; 32]))
        .await
        .unwrap_err();
    match err {
        LifecycleError::RotationStranded(ids) => assert_eq!(ids, vec!["stranger".to_string()]),
        other => panic!("unexpected error: {other}"),
    }

    // old key stays active; ours already moved and is reachable with the new key
    assert!(open_recording(&s.keys, &s.store, &ours).await.is_err());
    let new_keys = Mutex::new({
        let mut km = KeyManager::new(Duration::from_secs(900), Duration::from_secs(60));
        km.unlock_with(MasterKey::from_bytes([2u8; 32]));
        km
    });
    assert!(open_recording(&new_keys, &s.store, &ours).await.is_ok());

    // once the stray blob is gone the same rotation finishes
    s.store.erase("stranger").unwrap();
    let report = rotate_recordings(&s.keys, &s.store, MasterKey::from_bytes([2u8; 32]))
        .await
        .unwrap();
    assert_eq!(report.already_rotated, vec![ours.clone()]);
    assert!(report.rewrapped.is_empty());
    assert_eq!(report.moved(), vec![ours.clone()]);
    assert!(open_recording(&s.keys, &s.store, &ours).await.is_ok());
}

#[tokio::test]
async fn interrupted_passphrase_change_resumes_only_with_same_passphrase() {
    let (material, old_master) =
        UserKeyMaterial::create("u1", &SecretString::from("old-pass"), FAST).unwrap();
    let mut s = setup_with(old_master);
    let material_path = s._tmp.path().join("key_material.json");
    save_key_material(&material_path, &material).unwrap();
    let a = record(&mut s.controller, 0x11).await;
    let b = record(&mut s.controller, 0x22).await;

    // crash after every blob was re-wrapped but before the change was completed
    let (pending, new_master) = material.begin_rekey(&SecretString::from("new-one")).unwrap();
    save_key_material(&material_path, &pending).unwrap();
    rotate_recordings(&s.keys, &s.store, new_master).await.unwrap();

    // restart: the old passphrase still unlocks, and the change is visibly pending
    let on_disk = load_key_material(&material_path).unwrap().unwrap();
    assert!(on_disk.rotation_pending());
    let keys = Mutex::new({
        let mut km = KeyManager::new(Duration::from_secs(900), Duration::from_secs(60));
        km.unlock(&SecretString::from("old-pass"), &on_disk).unwrap();
        km
    });

    // a different new passphrase is refused before anything is touched
    let before = s.store.get_bytes(&a).unwrap();
    let err = change_passphrase(
        &keys,
        &s.store,
        &material_path,
        &on_disk,
        &SecretString::from("new-two"),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, LifecycleError::Crypto(CryptoError::RotationMismatch)));
    assert_eq!(s.store.get_bytes(&a).unwrap(), before);
    assert_eq!(load_key_material(&material_path).unwrap().unwrap(), on_disk);

    // the original new passphrase finishes the change
    let (done, report) = change_passphrase(
        &keys,
        &s.store,
        &material_path,
        &on_disk,
        &SecretString::from("new-one"),
    )
    .await
    .unwrap();
    let mut moved = report.moved();
    moved.sort();
    let mut expected = vec![a.clone(), b.clone()];
    expected.sort();
    assert_eq!(moved, expected);
    assert!(report.rewrapped.is_empty());

    assert!(!done.rotation_pending());
    assert_eq!(load_key_material(&material_path).unwrap().unwrap(), done);
    assert!(done.derive(&SecretString::from("new-one")).is_ok());
    assert!(done.derive(&SecretString::from("old-pass")).is_err());
    assert_eq!(
        open_recording(&keys, &s.store, &b).await.unwrap().audio.as_slice(),
        &[0x22; 3000][..]
    );
}

#[tokio::test]
async fn passphrase_change_from_scratch() {
    let (material, old_master) =
        UserKeyMaterial::create("u1", &SecretString::from("old-pass"), FAST).unwrap();
    let mut s = setup_with(old_master);
    let material_path = s._tmp.path().join("key_material.json");
    save_key_material(&material_path, &material).unwrap();
    let id = record(&mut s.controller, 0x33).await;

    let (done, report) = change_passphrase(
        &s.keys,
        &s.store,
        &material_path,
        &material,
        &SecretString::from("fresh"),
    )
    .await
    .unwrap();
    assert_eq!(report.rewrapped, vec![id.clone()]);
    assert_eq!(done.salt, material.salt);
    assert!(!load_key_material(&material_path).unwrap().unwrap().rotation_pending());
    assert!(open_recording(&s.keys, &s.store, &id).await.is_ok());
}

#[tokio::test]
async fn synced_recordings_are_requeued_after_rotation() {
    let mut s = setup();
    let id = record(&mut s.controller, 8).await;

    let uploader = OpendalUploader::new(amira_storage::memory_remote("r").unwrap());
    let queue = UploadQueue::new(s.journal.clone(), s.store.clone(), &UploadConfig::default());
    queue.run_pass(&uploader, &CancellationToken::new()).await.unwrap();
    assert_eq!(s.journal.lock().await.get(&id).unwrap().state, RecordingState::Synced);

    let report = rotate_recordings(&s.keys, &s.store, MasterKey::from_bytes([2u8; 32]))
        .await
        .unwrap();
    assert_eq!(queue.requeue(&report.rewrapped).await.unwrap(), 1);
    assert_eq!(
        s.journal.lock().await.get(&id).unwrap().state,
        RecordingState::QueuedForUpload
    );

    // the fresh upload replaces the stale remote copy
    queue.run_pass(&uploader, &CancellationToken::new()).await.unwrap();
    let remote = uploader.download(&id).await.unwrap();
    assert_eq!(remote, s.store.get_bytes(&id).unwrap());
}
