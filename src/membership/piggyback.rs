use {
	super::peer::MembershipUpdate,
	parking_lot::Mutex,
	std::{
		collections::{HashSet, VecDeque},
		time::{Duration, Instant},
	},
};

/// Delivery-count ceiling per entry. A saturated entry is never selected
/// again but stays queued until its expiry.
pub const MAX_DELIVERY: u32 = 3;

/// One pending membership update with its dissemination metadata.
#[derive(Debug, Clone)]
pub struct PiggybackEntry {
	pub update: MembershipUpdate,
	/// Instant past which the entry is discarded.
	pub expiry: Instant,
	/// Number of probes this entry has ridden on.
	pub delivery_count: u32,
	/// Peers known to have received this entry.
	pub seen_peers: HashSet<String>,
}

impl PiggybackEntry {
	pub fn new(update: MembershipUpdate, ttl: Duration) -> Self {
		Self {
			update,
			expiry: Instant::now() + ttl,
			delivery_count: 0,
			seen_peers: HashSet::new(),
		}
	}
}

/// Bounded queue of pending membership updates, multiplexed onto probe
/// traffic.
///
/// Notes:
///
/// - Entries are ordered newest-first; selection scans from the front so
///   dissemination biases toward recent events while older ones are
///   revisited until they saturate or expire.
///
/// - No two entries carry the identical underlying update.
///
/// - `get_entries` is linearizable: concurrent callers observe disjoint
///   side effects on delivery counts and seen-sets, and the same entry is
///   never handed to the same target twice.
pub struct PiggybackQueue {
	inner: Mutex<Inner>,
}

struct Inner {
	entries: VecDeque<PiggybackEntry>,
	capacity: usize,
}

impl PiggybackQueue {
	pub fn new(capacity: usize) -> Self {
		Self {
			inner: Mutex::new(Inner {
				entries: VecDeque::with_capacity(capacity),
				capacity,
			}),
		}
	}

	pub fn len(&self) -> usize {
		self.inner.lock().entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.inner.lock().entries.is_empty()
	}

	/// Pushes an entry to the front. Duplicates of an already-queued update
	/// are rejected; when full, the oldest entry is evicted first.
	pub fn add_entry(&self, entry: PiggybackEntry) {
		let mut inner = self.inner.lock();

		if inner.entries.iter().any(|queued| queued.update == entry.update) {
			return;
		}

		if inner.entries.len() >= inner.capacity {
			inner.entries.pop_back();
		}

		inner.entries.push_front(entry);
	}

	/// Wraps a freshly observed update and queues it with the given TTL.
	pub fn add_update(&self, update: MembershipUpdate, ttl: Duration) {
		self.add_entry(PiggybackEntry::new(update, ttl));
	}

	/// Removes entries past their expiry.
	pub fn evict_expired(&self) {
		let now = Instant::now();
		self.inner.lock().entries.retain(|entry| entry.expiry > now);
	}

	/// Selects up to `max` updates for the given target, newest first.
	///
	/// Only entries the target has not seen and whose delivery count is
	/// below [`MAX_DELIVERY`] qualify. For every returned entry the
	/// delivery count is incremented and the target recorded in its
	/// seen-set, atomically with the selection.
	pub fn get_entries(
		&self,
		target_peer_id: &str,
		max: usize,
	) -> Vec<MembershipUpdate> {
		let mut inner = self.inner.lock();
		let mut selected = Vec::new();

		for entry in inner.entries.iter_mut() {
			if selected.len() == max {
				break;
			}

			if entry.delivery_count >= MAX_DELIVERY
				|| entry.seen_peers.contains(target_peer_id)
			{
				continue;
			}

			entry.delivery_count += 1;
			entry.seen_peers.insert(target_peer_id.to_owned());
			selected.push(entry.update.clone());
		}

		selected
	}
}
