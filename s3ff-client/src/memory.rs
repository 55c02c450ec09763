use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use parking_lot::Mutex;

use crate::{
    ByteStream, CompletionRequest, FieldId, MultipartUploadId, ObjectKey, ObjectStore,
    PartPlanner, PartSpec, RemoteError, SigningBackend, UploadSession, UploadSignature,
    UploadedPart,
};

const SIGNING_SECRET: &str = "s3ff-memory-storage";

/// A call observed by [`MemoryStorage`], in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCall {
    Initialize {
        field_id: FieldId,
        file_name: String,
        file_size: u64,
    },
    PutPart {
        part_number: u32,
        data: Bytes,
    },
    Complete {
        parts: Vec<UploadedPart>,
    },
    Assemble {
        complete_url: String,
        body: String,
    },
    Finalize {
        signature: UploadSignature,
    },
}

#[derive(Debug, Default)]
struct Faults {
    fail_part: Option<u32>,
    reject_commit: bool,
    reject_assembly: bool,
}

#[derive(Debug)]
struct PendingUpload {
    object_key: ObjectKey,
    planned: Vec<(u32, u64)>,
    received: BTreeMap<u32, (String, Bytes)>,
    completion: Option<CompletionRequest>,
}

#[derive(Debug, Default)]
struct State {
    fields: HashSet<String>,
    uploads: HashMap<String, PendingUpload>,
    objects: BTreeMap<String, Bytes>,
    next_upload: u64,
    calls: Vec<RecordedCall>,
    faults: Faults,
}

/// In-process signing backend and object store.
///
/// Plans parts with a [`PartPlanner`], signs sessions, hands out `memory://`
/// part URLs, tags parts with quoted MD5 ETags, mints S3
/// `CompleteMultipartUpload` bodies and assembles objects. Clones share
/// state, so one handle can serve as both collaborators of an
/// [`UploadClient`](crate::UploadClient).
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    planner: PartPlanner,
    state: Arc<Mutex<State>>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new(PartPlanner::default())
    }
}

impl MemoryStorage {
    pub fn new(planner: PartPlanner) -> Self {
        Self {
            planner,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Accept uploads for `field_id`
    pub fn with_field<S: Into<String>>(self, field_id: S) -> Self {
        self.state.lock().fields.insert(field_id.into());
        self
    }

    /// Make the store reject the given part with HTTP 403
    pub fn fail_part(&self, part_number: u32) {
        self.state.lock().faults.fail_part = Some(part_number);
    }

    /// Make the backend refuse to certify any completion
    pub fn reject_commit(&self) {
        self.state.lock().faults.reject_commit = true;
    }

    /// Make the store refuse to assemble any upload
    pub fn reject_assembly(&self) {
        self.state.lock().faults.reject_assembly = true;
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().calls.clone()
    }

    /// Contents of an assembled object
    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.state.lock().objects.get(key).cloned()
    }

    /// Multipart uploads started but never assembled
    pub fn pending_uploads(&self) -> usize {
        self.state.lock().uploads.len()
    }

    fn sign(upload_id: &str) -> UploadSignature {
        let digest = md5::compute(format!("{SIGNING_SECRET}:{upload_id}"));
        UploadSignature(format!("{upload_id}:{digest:x}"))
    }

    fn verify(signature: &UploadSignature) -> Result<String, RemoteError> {
        let upload_id = signature
            .as_str()
            .split_once(':')
            .map(|(id, _)| id.to_string())
            .ok_or_else(|| RemoteError::status(403, "malformed signature"))?;
        if Self::sign(&upload_id) != *signature {
            return Err(RemoteError::status(403, "bad signature"));
        }
        Ok(upload_id)
    }

    fn part_url(upload_id: &str, part_number: u32) -> String {
        format!("memory://{upload_id}/parts/{part_number}")
    }

    fn parse_part_url(url: &str) -> Option<(String, u32)> {
        let rest = url.strip_prefix("memory://")?;
        let (upload_id, part) = rest.split_once("/parts/")?;
        Some((upload_id.to_string(), part.parse().ok()?))
    }

    fn complete_body(parts: &[UploadedPart]) -> String {
        let mut body =
            String::from(r#"<CompleteMultipartUpload xmlns="http://s3.amazonaws.com/doc/2006-03-01/">"#);
        for part in parts {
            body.push_str(&format!(
                "<Part><PartNumber>{}</PartNumber><ETag>{}</ETag></Part>",
                part.part_number, part.etag
            ));
        }
        body.push_str("</CompleteMultipartUpload>");
        body
    }
}

#[async_trait]
impl SigningBackend for MemoryStorage {
    async fn initialize(
        &self,
        field_id: &FieldId,
        file_name: &str,
        file_size: u64,
    ) -> Result<UploadSession, RemoteError> {
        let mut state = self.state.lock();
        state.calls.push(RecordedCall::Initialize {
            field_id: field_id.clone(),
            file_name: file_name.to_string(),
            file_size,
        });

        if !state.fields.contains(field_id.as_str()) {
            return Err(RemoteError::status(400, format!("unknown field {field_id}")));
        }

        state.next_upload += 1;
        let upload_id = format!("mpu-{}", state.next_upload);
        let object_key = ObjectKey(format!("uploads/{upload_id}/{file_name}"));
        let planned = self.planner.plan(file_size);
        let parts = planned
            .iter()
            .map(|(part_number, size)| PartSpec {
                part_number: *part_number,
                size: *size,
                upload_url: Self::part_url(&upload_id, *part_number),
            })
            .collect();

        state.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                object_key: object_key.clone(),
                planned,
                received: BTreeMap::new(),
                completion: None,
            },
        );

        Ok(UploadSession {
            upload_signature: Self::sign(&upload_id),
            object_key,
            upload_id: MultipartUploadId(upload_id),
            parts,
        })
    }

    async fn complete(
        &self,
        signature: &UploadSignature,
        upload_id: &MultipartUploadId,
        parts: &[UploadedPart],
    ) -> Result<CompletionRequest, RemoteError> {
        let mut state = self.state.lock();
        state.calls.push(RecordedCall::Complete {
            parts: parts.to_vec(),
        });

        let signed_id = Self::verify(signature)?;
        if signed_id != upload_id.as_str() {
            return Err(RemoteError::status(403, "signature does not cover this upload"));
        }
        if state.faults.reject_commit {
            return Err(RemoteError::status(400, "commit rejected"));
        }

        let upload = state
            .uploads
            .get_mut(upload_id.as_str())
            .ok_or_else(|| RemoteError::status(404, format!("unknown upload {upload_id}")))?;

        if parts.len() != upload.planned.len() {
            return Err(RemoteError::status(
                400,
                format!("expected {} parts, got {}", upload.planned.len(), parts.len()),
            ));
        }
        for (part, (number, size)) in parts.iter().zip(&upload.planned) {
            if part.part_number != *number || part.size != *size {
                return Err(RemoteError::status(
                    400,
                    format!("part {} does not match the authorized plan", part.part_number),
                ));
            }
            match upload.received.get(number) {
                Some((etag, _)) if *etag == part.etag => {}
                _ => {
                    return Err(RemoteError::status(
                        400,
                        format!("part {number} has no stored data with ETag {}", part.etag),
                    ))
                }
            }
        }

        let completion = CompletionRequest {
            complete_url: format!("memory://{upload_id}/complete"),
            body: Self::complete_body(parts),
        };
        upload.completion = Some(completion.clone());
        Ok(completion)
    }

    async fn finalize(&self, signature: &UploadSignature) -> Result<String, RemoteError> {
        let mut state = self.state.lock();
        state.calls.push(RecordedCall::Finalize {
            signature: signature.clone(),
        });

        let upload_id = Self::verify(signature)?;
        if state.uploads.contains_key(&upload_id) {
            return Err(RemoteError::status(400, "object not found"));
        }
        let prefix = format!("uploads/{upload_id}/");
        state
            .objects
            .keys()
            .find(|key| key.starts_with(&prefix))
            .cloned()
            .ok_or_else(|| RemoteError::status(400, "object not found"))
    }
}

#[async_trait]
impl ObjectStore for MemoryStorage {
    async fn put_part(
        &self,
        upload_url: &str,
        size: u64,
        body: ByteStream,
    ) -> Result<String, RemoteError> {
        let mut body = body;
        let mut data = BytesMut::new();
        while let Some(chunk) = body.next().await {
            data.extend_from_slice(&chunk?);
        }
        let data = data.freeze();

        let mut state = self.state.lock();
        let (upload_id, part_number) = Self::parse_part_url(upload_url)
            .ok_or_else(|| RemoteError::status(400, format!("not a part URL: {upload_url}")))?;
        state.calls.push(RecordedCall::PutPart {
            part_number,
            data: data.clone(),
        });

        if state.faults.fail_part == Some(part_number) {
            return Err(RemoteError::status(403, "Request has expired"));
        }
        let upload = state
            .uploads
            .get_mut(&upload_id)
            .ok_or_else(|| RemoteError::status(404, "NoSuchUpload"))?;
        let planned = upload
            .planned
            .iter()
            .find(|(number, _)| *number == part_number)
            .map(|(_, size)| *size)
            .ok_or_else(|| RemoteError::status(400, format!("part {part_number} was not planned")))?;
        if data.len() as u64 != size || size != planned {
            return Err(RemoteError::status(
                400,
                format!("part {part_number} is {} bytes, signed for {planned}", data.len()),
            ));
        }

        let etag = format!("\"{:x}\"", md5::compute(&data));
        upload.received.insert(part_number, (etag.clone(), data));
        Ok(etag)
    }

    async fn complete_upload(&self, request: &CompletionRequest) -> Result<(), RemoteError> {
        let mut state = self.state.lock();
        state.calls.push(RecordedCall::Assemble {
            complete_url: request.complete_url.clone(),
            body: request.body.clone(),
        });

        if state.faults.reject_assembly {
            return Err(RemoteError::status(400, "InvalidPart"));
        }
        let upload_id = request
            .complete_url
            .strip_prefix("memory://")
            .and_then(|rest| rest.strip_suffix("/complete"))
            .ok_or_else(|| RemoteError::status(400, "not a complete URL"))?
            .to_string();
        let upload = state
            .uploads
            .get(&upload_id)
            .ok_or_else(|| RemoteError::status(404, "NoSuchUpload"))?;
        if upload.completion.as_ref() != Some(request) {
            return Err(RemoteError::status(403, "SignatureDoesNotMatch"));
        }

        let mut object = BytesMut::new();
        for (number, _) in &upload.planned {
            let (_, data) = upload
                .received
                .get(number)
                .ok_or_else(|| RemoteError::status(400, format!("InvalidPart {number}")))?;
            object.extend_from_slice(data);
        }

        let key = upload.object_key.to_string();
        state.uploads.remove(&upload_id);
        state.objects.insert(key, object.freeze());
        Ok(())
    }
}
