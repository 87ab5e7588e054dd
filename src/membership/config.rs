use {
	core::time::Duration,
	derive_builder::Builder,
	serde::{Deserialize, Serialize},
};

/// Tunables for the failure detector and gossip layer.
#[derive(Debug, Clone, Builder, Serialize, Deserialize, PartialEq)]
#[builder(pattern = "owned", setter(prefix = "with"), derive(Debug, Clone))]
#[builder_struct_attr(doc(hidden))]
pub struct Config {
	/// The interval between probe rounds.
	#[builder(default = "Duration::from_secs(5)")]
	pub probe_interval: Duration,

	/// The interval between expiry sweeps of the piggyback queue and the
	/// member table.
	#[builder(default = "Duration::from_secs(10)")]
	pub sweep_interval: Duration,

	/// Deadline for a direct probe to be acknowledged.
	#[builder(default = "Duration::from_secs(3)")]
	pub direct_timeout: Duration,

	/// Deadline for each indirect probe issued through a relay.
	#[builder(default = "Duration::from_secs(3)")]
	pub indirect_timeout: Duration,

	/// Number of relays asked to probe a target that missed its direct
	/// probe deadline.
	#[builder(default = "3")]
	pub relay_fanout: usize,

	/// Maximum number of piggybacked updates attached to a single probe or
	/// acknowledgement.
	#[builder(default = "5")]
	pub piggyback_batch: usize,

	/// Capacity of the piggyback queue. The oldest entry is evicted when a
	/// novel update arrives at a full queue.
	#[builder(default = "100")]
	pub queue_capacity: usize,

	/// How long a record may linger in a non-alive state before removal,
	/// and the dissemination TTL of queued updates.
	#[builder(default = "Duration::from_secs(60)")]
	pub peer_ttl: Duration,
}

impl Config {
	/// Creates a new config builder with default values.
	pub fn builder() -> ConfigBuilder {
		ConfigBuilder::default()
	}
}

impl Default for Config {
	fn default() -> Self {
		ConfigBuilder::default()
			.build()
			.expect("all config fields are defaulted")
	}
}
