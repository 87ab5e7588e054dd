use {
	crate::transport::ProbeTransport,
	std::sync::Arc,
	tokio::task::JoinHandle,
	tokio_util::sync::{CancellationToken, DropGuard},
};

mod config;
mod detector;
mod error;
mod peer;
mod piggyback;
mod table;

pub use {
	config::{Config, ConfigBuilder},
	detector::Gossip,
	error::Error,
	peer::{MembershipUpdate, Peer, PeerState},
	piggyback::{MAX_DELIVERY, PiggybackEntry, PiggybackQueue},
	table::{ApplyOutcome, MemberTable},
};

/// The membership subsystem: a running failure detector, its sweeper, and
/// the inbound side of the probe protocol.
///
/// This type is cheap to clone; all clones refer to the same gossip
/// engine. Dropping the last clone cancels the background loops.
pub struct Membership<T: ProbeTransport> {
	inner: Arc<Inner<T>>,
}

impl<T: ProbeTransport> Clone for Membership<T> {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

struct Inner<T: ProbeTransport> {
	gossip: Gossip<T>,
	cancel: CancellationToken,
	_worker: JoinHandle<()>,
	_server: JoinHandle<()>,
	_abort: DropGuard,
}

impl<T: ProbeTransport> Membership<T> {
	/// Seeds the member table with the local node and spawns the probe
	/// loop, the sweeper and the transport listener.
	///
	/// An empty node id is an invariant violation and is rejected before
	/// anything is spawned.
	pub fn spawn(
		local_id: impl Into<String>,
		local_address: impl Into<String>,
		transport: T,
		config: Config,
	) -> Result<Self, Error> {
		let local_id = local_id.into();
		if local_id.is_empty() {
			return Err(Error::EmptyNodeId);
		}

		let gossip =
			Gossip::new(local_id, local_address.into(), transport, config);
		let cancel = CancellationToken::new();

		let worker = tokio::spawn(
			detector::WorkerLoop::new(gossip.clone(), cancel.clone()).run(),
		);

		let server = {
			let gossip = gossip.clone();
			let cancel = cancel.clone();
			tokio::spawn(async move {
				gossip.transport().serve(gossip.clone(), cancel).await;
			})
		};

		Ok(Self {
			inner: Arc::new(Inner {
				gossip,
				cancel: cancel.clone(),
				_worker: worker,
				_server: server,
				_abort: cancel.drop_guard(),
			}),
		})
	}

	pub fn local_id(&self) -> &str {
		self.inner.gossip.local_id()
	}

	pub fn gossip(&self) -> &Gossip<T> {
		&self.inner.gossip
	}

	pub fn table(&self) -> &MemberTable {
		self.inner.gossip.table()
	}

	pub fn queue(&self) -> &PiggybackQueue {
		self.inner.gossip.queue()
	}

	/// Joins an existing cluster via a bootstrap address.
	pub async fn join(&self, bootstrap: &str) -> Result<(), Error> {
		self.inner.gossip.join(bootstrap).await
	}

	/// Signals the background loops to exit and stops accepting probes.
	/// In-flight probes complete or time out naturally.
	pub fn shutdown(&self) {
		self.inner.cancel.cancel();
		self.inner.gossip.transport().close();
	}
}

#[cfg(test)]
mod tests {
	use {
		super::*,
		crate::transport::{
			self,
			AckStatus,
			Envelope,
			Ping,
			ProbeHandler,
			ProbeTransport,
		},
		core::time::Duration,
		parking_lot::Mutex,
		std::collections::{HashMap, HashSet},
		tokio_util::sync::CancellationToken,
	};

	/// In-process transport: `send` dispatches straight into the remote
	/// gossip engine's handler. Links can be severed to simulate partitions.
	#[derive(Clone, Default)]
	struct Hub {
		peers: Arc<Mutex<HashMap<String, Gossip<MemoryTransport>>>>,
		severed: Arc<Mutex<HashSet<(String, String)>>>,
	}

	impl Hub {
		fn transport(&self, address: &str) -> MemoryTransport {
			MemoryTransport {
				address: address.to_owned(),
				hub: self.clone(),
			}
		}

		fn node(&self, id: &str, address: &str) -> Gossip<MemoryTransport> {
			let gossip = Gossip::new(
				id.to_owned(),
				address.to_owned(),
				self.transport(address),
				Config::default(),
			);
			self.peers.lock().insert(address.to_owned(), gossip.clone());
			gossip
		}

		fn sever(&self, from: &str, to: &str) {
			self.severed.lock().insert((from.to_owned(), to.to_owned()));
		}
	}

	pub(super) use memory_transport::MemoryTransport;

	mod memory_transport {
		use super::{
			CancellationToken,
			Duration,
			Envelope,
			Gossip,
			Hub,
			ProbeHandler,
			ProbeTransport,
			transport,
		};

		#[derive(Clone)]
		pub(crate) struct MemoryTransport {
			pub(super) address: String,
			pub(super) hub: Hub,
		}

		/// Separate, non-generic item so that resolving `Gossip<MemoryTransport>`'s
		/// handler future does not occur within the scope that defines
		/// `MemoryTransport::send`'s own opaque return type.
		fn dispatch(
			remote: Gossip<MemoryTransport>,
			request: Envelope,
		) -> std::pin::Pin<Box<dyn std::future::Future<Output = Option<Envelope>> + Send>> {
			Box::pin(async move { remote.handle(request).await })
		}

		impl ProbeTransport for MemoryTransport {
			type Address = String;

			fn parse_address(&self, address: &str) -> Result<String, transport::Error> {
				Ok(address.to_owned())
			}

			async fn send(
				&self,
				target: String,
				request: Envelope,
				_deadline: Duration,
			) -> Result<Envelope, transport::Error> {
				let link = (self.address.clone(), target.clone());
				if self.hub.severed.lock().contains(&link) {
					return Err(transport::Error::DeadlineExceeded);
				}

				let remote = self.hub.peers.lock().get(&target).cloned();
				match remote {
					Some(remote) => dispatch(remote, request)
						.await
						.ok_or(transport::Error::NoResponse),
					None => Err(transport::Error::DeadlineExceeded),
				}
			}

			async fn serve<H: ProbeHandler>(
				&self,
				_handler: H,
				cancel: CancellationToken,
			) {
				cancel.cancelled().await;
			}
		}
	}

	fn ping_from(
		sender: &str,
		sender_address: &str,
		target: &str,
		updates: Vec<MembershipUpdate>,
	) -> Envelope {
		Envelope::Ping(Ping {
			sender_id: sender.to_owned(),
			sender_address: sender_address.to_owned(),
			target_id: target.to_owned(),
			updates,
		})
	}

	#[tokio::test]
	async fn join_populates_both_tables() {
		let hub = Hub::default();
		let bootstrap = hub.node("node-a", "a:1");
		let joiner = hub.node("node-b", "b:1");

		joiner.join("a:1").await.unwrap();

		// The joiner learned the bootstrap node from the ack, and the
		// bootstrap node learned the joiner from the ping itself.
		assert!(joiner.table().get("node-a").is_some());
		assert!(bootstrap.table().get("node-b").is_some());
		assert_eq!(joiner.table().get_cluster_size(), 2);
		assert_eq!(bootstrap.table().get_cluster_size(), 2);
	}

	#[tokio::test]
	async fn join_against_a_dead_address_fails() {
		let hub = Hub::default();
		let joiner = hub.node("node-b", "b:1");

		assert!(joiner.join("nowhere:1").await.is_err());
		assert_eq!(joiner.table().get_cluster_size(), 1);
	}

	#[tokio::test]
	async fn probe_round_spreads_piggybacked_updates() {
		let hub = Hub::default();
		let a = hub.node("node-a", "a:1");
		let b = hub.node("node-b", "b:1");
		b.join("a:1").await.unwrap();

		// Seed a with gossip about a third node.
		a.queue().add_update(
			MembershipUpdate::new("node-c", "c:1", 4, PeerState::Suspected),
			Duration::from_secs(60),
		);

		// a's only probe candidate is b; the update rides the ping.
		a.probe_round().await;

		let c = b.table().get("node-c").unwrap();
		assert_eq!(c.state, PeerState::Suspected);
		assert_eq!(c.incarnation, 4);
	}

	#[tokio::test]
	async fn unreachable_peer_with_no_relays_is_suspected() {
		let hub = Hub::default();
		let a = hub.node("node-a", "a:1");
		let b = hub.node("node-b", "b:1");
		b.join("a:1").await.unwrap();

		hub.sever("a:1", "b:1");
		a.probe_round().await;

		assert_eq!(
			a.table().get("node-b").unwrap().state,
			PeerState::Suspected
		);

		// The suspicion is queued for dissemination.
		let queued = a.queue().get_entries("node-x", 10);
		assert!(queued.iter().any(|update| {
			update.node_id == "node-b" && update.state == PeerState::Suspected
		}));
	}

	#[tokio::test]
	async fn relays_keep_a_partitioned_peer_alive() {
		let hub = Hub::default();
		let a = hub.node("node-a", "a:1");
		let b = hub.node("node-b", "b:1");
		let relay = hub.node("node-r", "r:1");
		b.join("a:1").await.unwrap();
		relay.join("a:1").await.unwrap();

		// a learns about b through the relay's join gossip once probes run;
		// wire the tables directly to keep the scenario exact.
		a.table().apply_update(&MembershipUpdate::alive("node-b", "b:1", 1));
		a.table().apply_update(&MembershipUpdate::alive("node-r", "r:1", 1));

		// a cannot reach b directly, but the relay can.
		hub.sever("a:1", "b:1");

		for _ in 0..8 {
			a.probe_round().await;
		}

		assert_eq!(a.table().get("node-b").unwrap().state, PeerState::Alive);
		assert_eq!(a.table().get("node-r").unwrap().state, PeerState::Alive);
	}

	#[tokio::test]
	async fn suspected_node_refutes_through_its_next_ack() {
		let hub = Hub::default();
		let b = hub.node("node-b", "b:1");

		// Gossip reaches b claiming b itself is suspected.
		let response = b
			.handle(ping_from("node-c", "c:1", "node-b", vec![
				MembershipUpdate::new("node-b", "b:1", 1, PeerState::Suspected),
			]))
			.await
			.unwrap();

		// b bumped its incarnation and the refutation rides the ack.
		let local = b.table().local();
		assert_eq!(local.incarnation, 2);
		assert_eq!(local.state, PeerState::Alive);

		let Envelope::Ack(ack) = response else {
			panic!("expected an ack");
		};
		assert_eq!(ack.status, AckStatus::Ack);
		assert!(ack.updates.iter().any(|update| {
			update.node_id == "node-b"
				&& update.incarnation == 2
				&& update.state == PeerState::Alive
		}));
	}

	#[tokio::test]
	async fn probes_from_self_are_ignored() {
		let hub = Hub::default();
		let a = hub.node("node-a", "a:1");

		let response =
			a.handle(ping_from("node-a", "a:1", "node-a", vec![])).await;

		assert!(response.is_none());
	}

	#[tokio::test]
	async fn unsolicited_acks_are_discarded() {
		let hub = Hub::default();
		let a = hub.node("node-a", "a:1");

		let response = a
			.handle(Envelope::Ack(crate::transport::Ack {
				status: AckStatus::Ack,
				sender_id: "node-z".into(),
				sender_address: "z:1".into(),
				incarnation: 1,
				target_id: "node-a".into(),
				updates: vec![],
			}))
			.await;

		assert!(response.is_none());
		assert!(a.table().get("node-z").is_none());
	}

	#[tokio::test]
	async fn empty_node_id_is_rejected() {
		let hub = Hub::default();
		let result = Membership::spawn(
			"",
			"a:1",
			hub.transport("a:1"),
			Config::default(),
		);

		assert!(matches!(result, Err(Error::EmptyNodeId)));
	}
}
