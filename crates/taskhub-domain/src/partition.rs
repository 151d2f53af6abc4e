use crate::types::InstanceId;

// ── Partition hashing ─────────────────────────────────────────────────────────

const FNV_OFFSET_BASIS: u32 = 2166136261;
const FNV_PRIME: u32 = 16777619;

/// 32-bit FNV-1a over raw bytes.
pub fn fnv1a_32(data: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in data {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Maps an instance id onto one of `partition_count` control partitions.
///
/// Not sticky across partition-count changes; the hub forbids changing the
/// count after creation (see `LeaseStore::get_or_create_task_hub_info`).
pub fn partition_index(instance_id: &InstanceId, partition_count: u32) -> u32 {
    fnv1a_32(instance_id.as_str().as_bytes()) % partition_count
}

// ── Persisted-layout naming ───────────────────────────────────────────────────

/// `<hub>-control-NN`, NN zero-padded to two digits.
pub fn control_queue_name(task_hub_name: &str, partition: u32) -> String {
    format!("{}-control-{:02}", task_hub_name, partition)
}

pub fn work_item_queue_name(task_hub_name: &str) -> String {
    format!("{}-workitems", task_hub_name)
}

pub fn lease_container_name(task_hub_name: &str) -> String {
    format!("{}-leases", task_hub_name)
}

pub fn large_message_container_name(task_hub_name: &str) -> String {
    format!("{}-largemessages", task_hub_name)
}
