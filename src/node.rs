use {
	crate::{
		fabric::{MerkleTree, SyncRequest, SyncResponse},
		membership::{self, Config, Membership},
		transport::{self, QuicTransport},
	},
	core::time::Duration,
	std::{net::SocketAddr, time::SystemTime},
};

/// Bounds stalled QUIC connects.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default depth limit of the anti-entropy tree.
const DEFAULT_MAX_DEPTH: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("transport: {0}")]
	Transport(#[from] transport::Error),

	#[error("membership: {0}")]
	Membership(#[from] membership::Error),
}

/// One node of the key/value fabric: a running membership subsystem plus
/// the local replica's anti-entropy tree.
pub struct Node {
	local_address: String,
	membership: Membership<QuicTransport>,
	tree: MerkleTree,
}

/// Lifecycle API.
impl Node {
	/// Binds a QUIC endpoint on `listen` and starts the gossip loops with
	/// default tuning.
	pub fn bind(listen: SocketAddr) -> Result<Self, Error> {
		Self::with_config(listen, Config::default(), DEFAULT_MAX_DEPTH)
	}

	pub fn with_config(
		listen: SocketAddr,
		config: Config,
		max_depth: usize,
	) -> Result<Self, Error> {
		let transport = QuicTransport::bind(listen, HANDSHAKE_TIMEOUT)?;
		let local_address = transport.local_addr()?.to_string();
		let local_id = format!("node-{local_address}");

		let membership =
			Membership::spawn(local_id, local_address.clone(), transport, config)?;

		Ok(Self {
			local_address,
			membership,
			tree: MerkleTree::new(max_depth),
		})
	}

	/// Joins an existing cluster through a known node's address.
	pub async fn join(&self, known_node: &str) -> Result<(), Error> {
		self.membership.join(known_node).await?;
		Ok(())
	}

	/// Signals the background loops to exit cleanly.
	pub fn shutdown(&self) {
		self.membership.shutdown();
	}
}

/// Query API.
impl Node {
	pub fn local_id(&self) -> &str {
		self.membership.local_id()
	}

	pub fn local_address(&self) -> &str {
		&self.local_address
	}

	pub fn membership(&self) -> &Membership<QuicTransport> {
		&self.membership
	}

	/// The local replica's anti-entropy tree.
	pub fn tree(&self) -> &MerkleTree {
		&self.tree
	}
}

/// Anti-entropy exchange.
///
/// Reconciliation is root-hash-first: a replica opens with its root and
/// leaf digests, and only the differing values travel back.
impl Node {
	/// Opens an exchange with this replica's current root and leaves.
	pub fn sync_request(&self) -> SyncRequest {
		SyncRequest {
			requestor_id: self.local_id().to_owned(),
			tree_hash: self.tree.root_hash(),
			leaves: self.tree.leaves(),
			timestamp: SystemTime::now(),
		}
	}

	/// Answers a peer's exchange with the items it is missing or holds
	/// stale. The diff is empty when the roots already match.
	pub fn handle_sync_request(&self, request: &SyncRequest) -> SyncResponse {
		SyncResponse {
			responder_id: self.local_id().to_owned(),
			tree_hash: self.tree.root_hash(),
			diff: self.tree.diff(&request.tree_hash, &request.leaves),
			timestamp: SystemTime::now(),
		}
	}

	/// Applies the items from a completed exchange to the local replica.
	pub fn apply_sync_response(&self, response: SyncResponse) {
		self.tree.apply_diff(response.diff);
	}
}
