use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio_test::{assert_err, assert_ok};

use s3ff_client::{
    BytesSource, CancellationToken, FieldId, MemoryStorage, PartPlanner, ProgressEvent,
    RecordedCall, UploadClient, UploadError, UploadPhase, UploadStatus,
};

const FIELD: &str = "core.Video.blob";

/// Test factory functions
fn storage(part_size: u64) -> MemoryStorage {
    MemoryStorage::new(PartPlanner::unconstrained(part_size)).with_field(FIELD)
}

fn client(storage: &MemoryStorage) -> UploadClient {
    UploadClient::new(storage.clone(), storage.clone())
}

fn recording_client(storage: &MemoryStorage) -> (UploadClient, Arc<Mutex<Vec<ProgressEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = {
        let events = events.clone();
        move |event: ProgressEvent| events.lock().unwrap().push(event)
    };
    (client(storage).with_progress(sink), events)
}

fn patterned(len: usize) -> Bytes {
    (0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>().into()
}

fn field() -> FieldId {
    FieldId::from(FIELD)
}

fn put_parts(calls: &[RecordedCall]) -> Vec<(u32, Bytes)> {
    calls
        .iter()
        .filter_map(|call| match call {
            RecordedCall::PutPart { part_number, data } => Some((*part_number, data.clone())),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn successful_upload_assembles_the_object_and_returns_field_value() {
    let storage = storage(4);
    let data = patterned(10);
    let source = BytesSource::new("clip.mp4", data.clone());

    let outcome = assert_ok!(client(&storage).upload_file(&source, &field()).await);

    assert_eq!(outcome.status, UploadStatus::Successful);
    let key = outcome.reference_value.expect("field value");
    assert_eq!(key, "uploads/mpu-1/clip.mp4");
    assert_eq!(storage.object(&key), Some(data));
    assert_eq!(storage.pending_uploads(), 0);
}

#[tokio::test]
async fn phases_run_in_protocol_order() {
    let storage = storage(4);
    let source = BytesSource::new("clip.mp4", patterned(10));

    assert_ok!(client(&storage).upload_file(&source, &field()).await);

    let kinds: Vec<&str> = storage
        .calls()
        .iter()
        .map(|call| match call {
            RecordedCall::Initialize { .. } => "initialize",
            RecordedCall::PutPart { .. } => "put",
            RecordedCall::Complete { .. } => "complete",
            RecordedCall::Assemble { .. } => "assemble",
            RecordedCall::Finalize { .. } => "finalize",
        })
        .collect();
    assert_eq!(
        kinds,
        vec!["initialize", "put", "put", "put", "complete", "assemble", "finalize"]
    );
}

#[tokio::test]
async fn initialize_sends_field_and_file_metadata() {
    let storage = storage(4);
    let source = BytesSource::new("clip.mp4", patterned(10));

    assert_ok!(client(&storage).upload_file(&source, &field()).await);

    assert_eq!(
        storage.calls()[0],
        RecordedCall::Initialize {
            field_id: field(),
            file_name: "clip.mp4".to_string(),
            file_size: 10,
        }
    );
}

#[tokio::test]
async fn two_part_file_is_sliced_at_running_offsets() {
    let storage = storage(3_000_000);
    let data = patterned(5_000_000);
    let source = BytesSource::new("big.bin", data.clone());
    let (client, events) = recording_client(&storage);

    assert_ok!(client.upload_file(&source, &field()).await);

    let puts = put_parts(&storage.calls());
    assert_eq!(puts.len(), 2);
    assert_eq!(puts[0], (1, data.slice(0..3_000_000)));
    assert_eq!(puts[1], (2, data.slice(3_000_000..5_000_000)));

    let events = events.lock().unwrap();
    let sending: Vec<&ProgressEvent> = events
        .iter()
        .filter(|e| e.phase == UploadPhase::Sending)
        .collect();
    assert!(!sending.is_empty());
    assert!(sending.iter().all(|e| e.total == Some(5_000_000)));
    assert_eq!(sending.last().unwrap().loaded, Some(5_000_000));
}

#[tokio::test]
async fn uploaded_parts_cover_the_file_with_contiguous_numbers() {
    let storage = storage(7);
    let source = BytesSource::new("notes.txt", patterned(50));
    let client = client(&storage);

    let session = assert_ok!(client.initialize_upload(&source, &field()).await);
    let parts = assert_ok!(client.upload_parts(&source, &session.parts).await);

    assert_eq!(parts.iter().map(|p| p.size).sum::<u64>(), 50);
    let numbers: Vec<u32> = parts.iter().map(|p| p.part_number).collect();
    assert_eq!(numbers, (1..=8).collect::<Vec<_>>());
    assert!(parts.iter().all(|p| p.etag.starts_with('"') && p.etag.ends_with('"')));
}

#[tokio::test]
async fn part_order_follows_the_given_plan() {
    let storage = storage(4);
    let source = BytesSource::new("clip.mp4", patterned(12));
    let client = client(&storage);

    let session = assert_ok!(client.initialize_upload(&source, &field()).await);
    let mut reversed = session.parts.clone();
    reversed.reverse();

    let parts = assert_ok!(client.upload_parts(&source, &reversed).await);

    let numbers: Vec<u32> = parts.iter().map(|p| p.part_number).collect();
    assert_eq!(numbers, vec![3, 2, 1]);
    let sent: Vec<u32> = put_parts(&storage.calls()).iter().map(|(n, _)| *n).collect();
    assert_eq!(sent, vec![3, 2, 1]);
}

#[tokio::test]
async fn commit_sends_parts_in_index_order() {
    let storage = storage(4);
    let source = BytesSource::new("clip.mp4", patterned(8));
    let client = client(&storage);

    let session = assert_ok!(client.initialize_upload(&source, &field()).await);
    let mut parts = assert_ok!(client.upload_parts(&source, &session.parts).await);
    parts.reverse();

    assert_ok!(client.complete_upload(&session, &parts).await);

    let committed = storage
        .calls()
        .into_iter()
        .find_map(|call| match call {
            RecordedCall::Complete { parts } => Some(parts),
            _ => None,
        })
        .unwrap();
    assert_eq!(committed.iter().map(|p| p.part_number).collect::<Vec<_>>(), vec![1, 2]);
}

#[tokio::test]
async fn sending_progress_never_decreases() {
    let storage = storage(1000);
    let source = BytesSource::new("big.bin", patterned(4500)).with_chunk_size(128);
    let (client, events) = recording_client(&storage);

    assert_ok!(client.upload_file(&source, &field()).await);

    let events = events.lock().unwrap();
    assert_eq!(events.first().unwrap().phase, UploadPhase::Initializing);
    assert_eq!(events.last().unwrap().phase, UploadPhase::Finalizing);

    let loaded: Vec<u64> = events
        .iter()
        .filter(|e| e.phase == UploadPhase::Sending)
        .map(|e| e.loaded.unwrap())
        .collect();
    assert!(loaded.len() > 5, "expected per-chunk progress, got {loaded:?}");
    assert!(loaded.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(*loaded.last().unwrap(), 4500);
}

#[tokio::test]
async fn failed_part_stops_the_upload() {
    let storage = storage(4);
    storage.fail_part(2);
    let source = BytesSource::new("clip.mp4", patterned(12));

    let err = assert_err!(client(&storage).upload_file(&source, &field()).await);

    assert!(matches!(err, UploadError::PartTransferFailed { part_number: 2, .. }));
    assert_eq!(err.remote().and_then(|r| r.status), Some(403));

    let calls = storage.calls();
    let sent: Vec<u32> = put_parts(&calls).iter().map(|(n, _)| *n).collect();
    assert_eq!(sent, vec![1, 2]);
    assert!(!calls
        .iter()
        .any(|c| matches!(c, RecordedCall::Complete { .. } | RecordedCall::Finalize { .. })));
    // part 1 stays orphaned in the store
    assert_eq!(storage.pending_uploads(), 1);
}

#[tokio::test]
async fn unknown_field_is_rejected_before_any_transfer() {
    let storage = storage(4);
    let source = BytesSource::new("clip.mp4", patterned(12));

    let err = assert_err!(
        client(&storage)
            .upload_file(&source, &FieldId::from("core.Other.field"))
            .await
    );

    assert!(matches!(err, UploadError::RequestRejected { .. }));
    assert_eq!(storage.calls().len(), 1);
}

#[tokio::test]
async fn commit_rejection_skips_assembly_and_finalize() {
    let storage = storage(4);
    storage.reject_commit();
    let source = BytesSource::new("clip.mp4", patterned(12));

    let err = assert_err!(client(&storage).upload_file(&source, &field()).await);

    assert!(matches!(err, UploadError::CommitRejected { .. }));
    assert!(!storage
        .calls()
        .iter()
        .any(|c| matches!(c, RecordedCall::Assemble { .. } | RecordedCall::Finalize { .. })));
}

#[tokio::test]
async fn altered_etag_is_refused_at_commit() {
    let storage = storage(4);
    let source = BytesSource::new("clip.mp4", patterned(8));
    let client = client(&storage);

    let session = assert_ok!(client.initialize_upload(&source, &field()).await);
    let mut parts = assert_ok!(client.upload_parts(&source, &session.parts).await);
    parts[1].etag = "\"0000\"".to_string();

    let err = assert_err!(client.complete_upload(&session, &parts).await);
    assert!(matches!(err, UploadError::CommitRejected { .. }));
    assert_eq!(storage.pending_uploads(), 1);
}

#[tokio::test]
async fn assembly_rejection_skips_finalize() {
    let storage = storage(4);
    storage.reject_assembly();
    let source = BytesSource::new("clip.mp4", patterned(12));

    let err = assert_err!(client(&storage).upload_file(&source, &field()).await);

    assert!(matches!(err, UploadError::AssemblyRejected { .. }));
    assert!(!storage
        .calls()
        .iter()
        .any(|c| matches!(c, RecordedCall::Finalize { .. })));
}

#[tokio::test]
async fn finalize_before_commit_is_not_complete() {
    let storage = storage(4);
    let source = BytesSource::new("clip.mp4", patterned(8));
    let client = client(&storage);

    let session = assert_ok!(client.initialize_upload(&source, &field()).await);
    assert_ok!(client.upload_parts(&source, &session.parts).await);

    let err = assert_err!(client.finalize(&session).await);
    assert!(matches!(err, UploadError::NotYetComplete { .. }));
}

#[tokio::test]
async fn forged_signature_is_invalid() {
    let storage = storage(4);
    let source = BytesSource::new("clip.mp4", patterned(8));
    let client = client(&storage);

    let mut session = assert_ok!(client.initialize_upload(&source, &field()).await);
    session.upload_signature = "mpu-1:0000".into();

    let err = assert_err!(client.finalize(&session).await);
    assert!(matches!(err, UploadError::InvalidSignature { .. }));
}

#[tokio::test]
async fn empty_file_still_commits_an_empty_part_list() {
    let storage = storage(4);
    let source = BytesSource::new("empty.txt", Bytes::new());

    let outcome = assert_ok!(client(&storage).upload_file(&source, &field()).await);

    assert!(outcome.is_successful());
    let calls = storage.calls();
    assert!(put_parts(&calls).is_empty());
    assert!(calls
        .iter()
        .any(|c| matches!(c, RecordedCall::Complete { parts } if parts.is_empty())));
    assert_eq!(storage.object("uploads/mpu-1/empty.txt"), Some(Bytes::new()));
}

#[tokio::test]
async fn cancelled_before_start_is_aborted_without_requests() {
    let storage = storage(4);
    let source = BytesSource::new("clip.mp4", patterned(8));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = assert_ok!(
        client(&storage)
            .upload_file_with_cancel(&source, &field(), &cancel)
            .await
    );

    assert_eq!(outcome.status, UploadStatus::Aborted);
    assert_eq!(outcome.reference_value, None);
    assert!(storage.calls().is_empty());
}

#[tokio::test]
async fn cancelled_while_sending_leaves_parts_orphaned() {
    let storage = storage(4);
    let source = BytesSource::new("clip.mp4", patterned(16));
    let cancel = CancellationToken::new();
    let sink = {
        let cancel = cancel.clone();
        move |event: ProgressEvent| {
            if event.phase == UploadPhase::Sending && event.loaded >= Some(8) {
                cancel.cancel();
            }
        }
    };
    let client = client(&storage).with_progress(sink);

    let outcome = assert_ok!(client.upload_file_with_cancel(&source, &field(), &cancel).await);

    assert_eq!(outcome.status, UploadStatus::Aborted);
    let calls = storage.calls();
    let sent: Vec<u32> = put_parts(&calls).iter().map(|(n, _)| *n).collect();
    assert_eq!(sent, vec![1, 2]);
    assert!(!calls
        .iter()
        .any(|c| matches!(c, RecordedCall::Complete { .. } | RecordedCall::Finalize { .. })));
    assert_eq!(storage.pending_uploads(), 1);
}
