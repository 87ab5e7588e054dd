use {
	super::{DataItem, Leaf},
	serde::{Deserialize, Serialize},
	std::{collections::BTreeMap, time::SystemTime},
};

/// Opens an anti-entropy exchange: the requestor's root digest plus its
/// leaf set, so the responder can compute the difference in one pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
	pub requestor_id: String,
	pub tree_hash: String,
	pub leaves: BTreeMap<String, Leaf>,
	pub timestamp: SystemTime,
}

/// Answers a [`SyncRequest`] with the items the requestor is missing or
/// holds stale. An empty diff means the replicas already agree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResponse {
	pub responder_id: String,
	pub tree_hash: String,
	pub diff: Vec<DataItem>,
	pub timestamp: SystemTime,
}
