use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use ciborium::Value;
use sha2::Sha256;

use crate::types::request::{ContextRequest, Fingerprint};

/// Schema version mixed into every request fingerprint
pub const FINGERPRINT_VERSION: u8 = 1;

/// Fingerprint of a request against a given index generation.
///
/// Format: [version, root, description, role, phase, budget, agent, generation]
pub fn compute_request_fingerprint(request: &ContextRequest, generation: u64) -> Fingerprint {
    let mut fields = task_fields(request);
    fields.push(Value::Integer(generation.into()));
    digest(Value::Array(fields))
}

/// Fingerprint without the index generation.
///
/// Stable across code changes, so request patterns learned under one
/// generation still apply after the index moves on.
pub fn compute_task_key(request: &ContextRequest) -> Fingerprint {
    digest(Value::Array(task_fields(request)))
}

fn task_fields(request: &ContextRequest) -> Vec<Value> {
    let description = request
        .task_description
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    vec![
        Value::Integer(FINGERPRINT_VERSION.into()),
        Value::Text(request.project_root.to_string_lossy().into_owned()),
        Value::Text(description),
        Value::Text(request.role().as_str().to_string()),
        Value::Text(request.workflow_phase().as_str().to_string()),
        Value::Integer(request.token_budget.into()),
        Value::Text(request.agent_id()),
    ]
}

/// Build the canonical CBOR preimage and hash it with BLAKE2b-256
fn digest(value: Value) -> Fingerprint {
    let mut buf = Vec::new();
    if ciborium::into_writer(&value, &mut buf).is_err() {
        // Writing to a Vec does not fail; keep the hash total anyway.
        buf = format!("{:?}", value).into_bytes();
    }
    let mut hasher = Blake2b::<U32>::new();
    hasher.update(&buf);
    Fingerprint(hasher.finalize().into())
}

/// Hex-encoded SHA-256 of file content
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
