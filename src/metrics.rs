use {
	crate::membership::PeerState,
	core::time::Duration,
	std::sync::{
		OnceLock,
		atomic::{AtomicU64, Ordering},
	},
};

/// Message type labels tracked by the message counters, in counter order.
pub const MESSAGE_KINDS: [&str; 4] = ["ping", "ping_req", "ack", "nack"];

/// Upper bounds (seconds) of the ping latency histogram buckets.
const LATENCY_BUCKETS: [f64; 11] = [
	0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Process-wide counters read by the monitoring collaborator.
///
/// Everything here is a plain atomic so reads never block the gossip loop
/// and writes stay wait-free on the probe path.
pub struct Metrics {
	messages: [AtomicU64; 4],
	latency_buckets: [AtomicU64; 11],
	latency_count: AtomicU64,
	latency_sum_micros: AtomicU64,
	cluster_size: AtomicU64,
	peers_by_state: [AtomicU64; 4],
}

impl Metrics {
	const fn new() -> Self {
		Self {
			messages: [const { AtomicU64::new(0) }; 4],
			latency_buckets: [const { AtomicU64::new(0) }; 11],
			latency_count: AtomicU64::new(0),
			latency_sum_micros: AtomicU64::new(0),
			cluster_size: AtomicU64::new(0),
			peers_by_state: [const { AtomicU64::new(0) }; 4],
		}
	}

	/// The process-wide metrics instance.
	pub fn global() -> &'static Self {
		static GLOBAL: OnceLock<Metrics> = OnceLock::new();
		GLOBAL.get_or_init(Self::new)
	}

	/// Counts one message of the given wire kind.
	pub fn record_message(&self, kind: &str) {
		if let Some(index) = MESSAGE_KINDS.iter().position(|label| *label == kind)
		{
			self.messages[index].fetch_add(1, Ordering::Relaxed);
		}
	}

	pub fn message_count(&self, kind: &str) -> u64 {
		MESSAGE_KINDS
			.iter()
			.position(|label| *label == kind)
			.map(|index| self.messages[index].load(Ordering::Relaxed))
			.unwrap_or_default()
	}

	/// Records one round-trip ping latency observation.
	pub fn observe_ping_latency(&self, latency: Duration) {
		let seconds = latency.as_secs_f64();
		for (bucket, upper) in
			self.latency_buckets.iter().zip(LATENCY_BUCKETS.iter())
		{
			if seconds <= *upper {
				bucket.fetch_add(1, Ordering::Relaxed);
				break;
			}
		}

		self.latency_count.fetch_add(1, Ordering::Relaxed);
		self
			.latency_sum_micros
			.fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
	}

	pub fn ping_count(&self) -> u64 {
		self.latency_count.load(Ordering::Relaxed)
	}

	/// Cumulative histogram in `(upper_bound_seconds, count)` form.
	pub fn ping_latency_histogram(&self) -> Vec<(f64, u64)> {
		let mut cumulative = 0;
		LATENCY_BUCKETS
			.iter()
			.zip(self.latency_buckets.iter())
			.map(|(upper, bucket)| {
				cumulative += bucket.load(Ordering::Relaxed);
				(*upper, cumulative)
			})
			.collect()
	}

	pub fn set_cluster_size(&self, size: usize) {
		self.cluster_size.store(size as u64, Ordering::Relaxed);
	}

	pub fn cluster_size(&self) -> u64 {
		self.cluster_size.load(Ordering::Relaxed)
	}

	/// Publishes the per-state peer counts, indexed in severity order.
	pub fn set_peers_by_state(&self, counts: [usize; 4]) {
		for (gauge, count) in self.peers_by_state.iter().zip(counts) {
			gauge.store(count as u64, Ordering::Relaxed);
		}
	}

	pub fn peers_in_state(&self, state: PeerState) -> u64 {
		self.peers_by_state[state as usize].load(Ordering::Relaxed)
	}
}
