use {
	serde::{Deserialize, Serialize},
	std::time::Instant,
	strum::Display,
};

/// Liveness of a peer as observed by the local node.
///
/// Variants are ordered by severity. At equal incarnations the more severe
/// state always wins ("least alive wins"), so a peer can never talk its way
/// back to `Alive` without raising its own incarnation first.
#[derive(
	Debug,
	Display,
	Clone,
	Copy,
	Serialize,
	Deserialize,
	PartialEq,
	Eq,
	PartialOrd,
	Ord,
	Hash,
)]
pub enum PeerState {
	Alive = 0,
	Suspected = 1,
	Dead = 2,
	Left = 3,
}

impl PeerState {
	/// Returns true for states that are subject to the terminal-state TTL.
	pub const fn is_terminal(self) -> bool {
		!matches!(self, Self::Alive)
	}
}

/// Membership-level record for a single known node.
///
/// The `incarnation` counter is owned by the peer itself; the only place it
/// is ever raised locally is when the local node refutes a suspicion about
/// its own id.
#[derive(Debug, Clone)]
pub struct Peer {
	/// Stable identifier that survives restarts.
	pub peer_id: String,
	/// Transport endpoint sufficient to initiate a probe.
	pub address: String,
	pub state: PeerState,
	pub incarnation: u64,
	/// Instant the current `(state, incarnation)` pair was adopted.
	pub since_state_update: Instant,
}

impl Peer {
	pub fn alive(
		peer_id: impl Into<String>,
		address: impl Into<String>,
		incarnation: u64,
	) -> Self {
		Self {
			peer_id: peer_id.into(),
			address: address.into(),
			state: PeerState::Alive,
			incarnation,
			since_state_update: Instant::now(),
		}
	}

	/// The wire-level delta describing this record as currently known.
	pub fn as_update(&self) -> MembershipUpdate {
		MembershipUpdate {
			node_id: self.peer_id.clone(),
			address: self.address.clone(),
			incarnation: self.incarnation,
			state: self.state,
		}
	}
}

/// The unit of both transport and piggyback dissemination.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MembershipUpdate {
	pub node_id: String,
	pub address: String,
	pub incarnation: u64,
	pub state: PeerState,
}

impl MembershipUpdate {
	pub fn new(
		node_id: impl Into<String>,
		address: impl Into<String>,
		incarnation: u64,
		state: PeerState,
	) -> Self {
		Self {
			node_id: node_id.into(),
			address: address.into(),
			incarnation,
			state,
		}
	}

	pub fn alive(
		node_id: impl Into<String>,
		address: impl Into<String>,
		incarnation: u64,
	) -> Self {
		Self::new(node_id, address, incarnation, PeerState::Alive)
	}

	pub fn suspected(peer: &Peer) -> Self {
		Self::new(
			peer.peer_id.clone(),
			peer.address.clone(),
			peer.incarnation,
			PeerState::Suspected,
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn state_severity_is_totally_ordered() {
		assert!(PeerState::Alive < PeerState::Suspected);
		assert!(PeerState::Suspected < PeerState::Dead);
		assert!(PeerState::Dead < PeerState::Left);
	}

	#[test]
	fn only_alive_is_non_terminal() {
		assert!(!PeerState::Alive.is_terminal());
		assert!(PeerState::Suspected.is_terminal());
		assert!(PeerState::Dead.is_terminal());
		assert!(PeerState::Left.is_terminal());
	}
}
