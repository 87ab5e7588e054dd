pub mod fabric;
pub mod membership;
pub mod metrics;
mod node;
pub mod transport;

pub use node::{Error, Node};

pub mod prelude {
	pub use super::{
		fabric::{DataItem, Leaf, MerkleTree, Stats, SyncRequest, SyncResponse},
		membership::{
			Config,
			MemberTable,
			Membership,
			MembershipUpdate,
			Peer,
			PeerState,
			PiggybackQueue,
		},
		metrics::Metrics,
		node::Node,
		transport::{Envelope, ProbeTransport, QuicTransport},
	};
}
