// Key construction helpers for the memory trees.
//
// Agent ids and task fingerprints are rejected if they contain NUL, so it
// separates key segments. Sequence numbers are big-endian so a prefix scan
// yields records oldest first.

const SEP: u8 = 0;

pub fn agent_prefix(agent_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(agent_id.len() + 1);
    key.extend_from_slice(agent_id.as_bytes());
    key.push(SEP);
    key
}

/// `agent \0 seq`
pub fn record_key(agent_id: &str, seq: u64) -> Vec<u8> {
    let mut key = agent_prefix(agent_id);
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

pub fn task_prefix(agent_id: &str, task_fingerprint: &str) -> Vec<u8> {
    let mut key = agent_prefix(agent_id);
    key.extend_from_slice(task_fingerprint.as_bytes());
    key.push(SEP);
    key
}

/// `agent \0 task_fingerprint \0 seq`
pub fn task_key(agent_id: &str, task_fingerprint: &str, seq: u64) -> Vec<u8> {
    let mut key = task_prefix(agent_id, task_fingerprint);
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

/// Trailing sequence number of a record or task key
pub fn key_seq(key: &[u8]) -> Option<u64> {
    let start = key.len().checked_sub(8)?;
    let arr: [u8; 8] = key[start..].try_into().ok()?;
    Some(u64::from_be_bytes(arr))
}

pub fn is_valid_segment(value: &str) -> bool {
    !value.as_bytes().contains(&SEP)
}
