use {
	super::{
		ApplyOutcome,
		Config,
		Error,
		MemberTable,
		MembershipUpdate,
		Peer,
		PiggybackQueue,
	},
	crate::{
		metrics::Metrics,
		transport::{
			Ack,
			AckStatus,
			Envelope,
			Ping,
			PingReq,
			ProbeHandler,
			ProbeTransport,
		},
	},
	rand::seq::IndexedRandom,
	std::{sync::Arc, time::Instant},
	tokio::task::JoinSet,
	tokio_util::sync::CancellationToken,
};

/// The failure detector and gossip engine.
///
/// This type is cheap to clone; all clones share the same member table,
/// piggyback queue and transport. It drives outbound probe rounds and is
/// the [`ProbeHandler`] for everything arriving over the transport.
pub struct Gossip<T: ProbeTransport> {
	shared: Arc<Shared<T>>,
}

impl<T: ProbeTransport> Clone for Gossip<T> {
	fn clone(&self) -> Self {
		Self {
			shared: Arc::clone(&self.shared),
		}
	}
}

struct Shared<T> {
	local_id: String,
	local_address: String,
	table: MemberTable,
	queue: PiggybackQueue,
	transport: T,
	config: Config,
}

/// Public query API.
impl<T: ProbeTransport> Gossip<T> {
	pub(super) fn new(
		local_id: String,
		local_address: String,
		transport: T,
		config: Config,
	) -> Self {
		let table = MemberTable::new(
			Peer::alive(local_id.clone(), local_address.clone(), 1),
			config.peer_ttl,
		);

		// Announce ourselves: the initial alive claim rides the first probes.
		let queue = PiggybackQueue::new(config.queue_capacity);
		queue.add_update(
			MembershipUpdate::alive(local_id.clone(), local_address.clone(), 1),
			config.peer_ttl,
		);

		Self {
			shared: Arc::new(Shared {
				local_id,
				local_address,
				table,
				queue,
				transport,
				config,
			}),
		}
	}

	pub fn local_id(&self) -> &str {
		&self.shared.local_id
	}

	pub fn table(&self) -> &MemberTable {
		&self.shared.table
	}

	pub fn queue(&self) -> &PiggybackQueue {
		&self.shared.queue
	}

	pub fn transport(&self) -> &T {
		&self.shared.transport
	}
}

/// Probe protocol.
impl<T: ProbeTransport> Gossip<T> {
	/// Joins an existing cluster through a bootstrap address. The resulting
	/// acknowledgement seeds the member table.
	pub async fn join(&self, bootstrap: &str) -> Result<(), Error> {
		let shared = &self.shared;
		tracing::info!(bootstrap, "joining cluster");

		let address = shared.transport.parse_address(bootstrap)?;
		let ping = Envelope::Ping(Ping {
			sender_id: shared.local_id.clone(),
			sender_address: shared.local_address.clone(),
			target_id: bootstrap.to_owned(),
			updates: Vec::new(),
		});

		Metrics::global().record_message(ping.kind());
		let response = shared
			.transport
			.send(address, ping, shared.config.direct_timeout)
			.await?;

		match response {
			Envelope::Ack(ack) if ack.is_ack() => {
				self.absorb_ack(&ack);
				self.refresh_gauges();
				Ok(())
			}
			_ => Err(Error::JoinRejected(bootstrap.to_owned())),
		}
	}

	/// One tick of the failure detector: probe a random alive peer, fall
	/// back to indirect probes through relays, and suspect the target when
	/// every path misses its deadline.
	pub async fn probe_round(&self) {
		let shared = &self.shared;

		let Some(target) = self.pick_target() else {
			tracing::trace!("no alive peers to probe");
			return;
		};

		let updates = shared
			.queue
			.get_entries(&target.peer_id, shared.config.piggyback_batch);
		let ping = Envelope::Ping(Ping {
			sender_id: shared.local_id.clone(),
			sender_address: shared.local_address.clone(),
			target_id: target.peer_id.clone(),
			updates,
		});

		Metrics::global().record_message(ping.kind());
		let started = Instant::now();

		let response = match shared.transport.parse_address(&target.address) {
			Ok(address) => {
				shared
					.transport
					.send(address, ping, shared.config.direct_timeout)
					.await
			}
			Err(error) => Err(error),
		};

		match response {
			Ok(Envelope::Ack(ack)) if ack.is_ack() => {
				Metrics::global().observe_ping_latency(started.elapsed());
				self.absorb_ack(&ack);
			}
			Ok(response) => {
				tracing::debug!(
					peer = %target.peer_id,
					response = response.kind(),
					"direct probe rejected"
				);
				self.indirect_probe(&target).await;
			}
			Err(error) => {
				tracing::debug!(
					peer = %target.peer_id,
					error = %error,
					"direct probe missed its deadline"
				);
				self.indirect_probe(&target).await;
			}
		}

		self.refresh_gauges();
	}

	/// Evicts expired piggyback entries and sweeps the member table.
	pub fn sweep(&self) {
		self.shared.table.sweep();
		self.shared.queue.evict_expired();
		self.refresh_gauges();
	}

	/// Asks up to `relay_fanout` alive peers to probe the target on our
	/// behalf. Any ack-bearing response keeps the target alive; a total
	/// miss records the failure.
	async fn indirect_probe(&self, target: &Peer) {
		let shared = &self.shared;
		let relays = self.pick_relays(target);

		let mut probes = JoinSet::new();
		for relay in relays {
			let gossip = self.clone();
			let target = target.clone();
			probes.spawn(async move { gossip.relay_probe(relay, target).await });
		}

		// Every relay is given its full deadline; acks absorbed from any of
		// them count.
		let mut acked = false;
		while let Some(result) = probes.join_next().await {
			if let Ok(Some(ack)) = result {
				self.absorb_ack(&ack);
				acked = true;
			}
		}

		if acked {
			return;
		}

		tracing::info!(peer = %target.peer_id, "all probes failed");
		if let Some(transition) = shared.table.mark_failed(&target.peer_id) {
			tracing::info!(
				peer = %transition.node_id,
				state = %transition.state,
				incarnation = transition.incarnation,
				"peer state transition"
			);
			shared.queue.add_update(transition, shared.config.peer_ttl);
		}
	}

	async fn relay_probe(&self, relay: Peer, target: Peer) -> Option<Ack> {
		let shared = &self.shared;

		let address = match shared.transport.parse_address(&relay.address) {
			Ok(address) => address,
			Err(error) => {
				tracing::trace!(relay = %relay.peer_id, error = %error, "bad relay address");
				return None;
			}
		};

		let updates = shared
			.queue
			.get_entries(&relay.peer_id, shared.config.piggyback_batch);
		let request = Envelope::PingReq(PingReq {
			sender_id: shared.local_id.clone(),
			sender_address: shared.local_address.clone(),
			target_id: target.peer_id.clone(),
			target_address: target.address.clone(),
			request_id: relay.peer_id.clone(),
			request_address: relay.address.clone(),
			updates,
		});

		Metrics::global().record_message(request.kind());
		let response = shared
			.transport
			.send(address, request, shared.config.indirect_timeout)
			.await;

		match response {
			Ok(Envelope::Ack(ack)) if ack.is_ack() => Some(ack),
			Ok(_) => None,
			Err(error) => {
				tracing::trace!(
					relay = %relay.peer_id,
					target = %target.peer_id,
					error = %error,
					"indirect probe failed"
				);
				None
			}
		}
	}

	fn pick_target(&self) -> Option<Peer> {
		let mut candidates = self.shared.table.get_alive_peers();
		candidates.retain(|peer| peer.peer_id != self.shared.local_id);
		candidates.choose(&mut rand::rng()).cloned()
	}

	fn pick_relays(&self, target: &Peer) -> Vec<Peer> {
		let mut candidates = self.shared.table.get_alive_peers();
		candidates.retain(|peer| {
			peer.peer_id != self.shared.local_id
				&& peer.peer_id != target.peer_id
		});
		candidates
			.choose_multiple(&mut rand::rng(), self.shared.config.relay_fanout)
			.cloned()
			.collect()
	}
}

/// Update dissemination.
impl<T: ProbeTransport> Gossip<T> {
	/// Merges a batch of piggybacked updates, feeding every novel one back
	/// into the dissemination queue.
	fn absorb(&self, updates: &[MembershipUpdate]) {
		for update in updates {
			self.absorb_one(update);
		}
	}

	fn absorb_one(&self, update: &MembershipUpdate) {
		let shared = &self.shared;

		// The table lock is released before the queue lock is taken.
		match shared.table.apply_update(update) {
			ApplyOutcome::Applied(applied) => {
				shared.queue.add_update(applied, shared.config.peer_ttl);
			}
			ApplyOutcome::Refuted(refutation) => {
				tracing::info!(
					incarnation = refutation.incarnation,
					"refuting a suspicion about the local node"
				);
				shared.queue.add_update(refutation, shared.config.peer_ttl);
			}
			ApplyOutcome::Stale => {}
		}
	}

	/// Absorbs an acknowledgement: the piggybacked batch plus the implicit
	/// liveness of its sender.
	fn absorb_ack(&self, ack: &Ack) {
		self.absorb_one(&MembershipUpdate::alive(
			ack.sender_id.clone(),
			ack.sender_address.clone(),
			ack.incarnation,
		));
		self.absorb(&ack.updates);
	}

	/// Builds the acknowledgement for a probe from `target_id`, draining a
	/// piggyback batch addressed to it.
	fn ack_for(&self, target_id: &str, status: AckStatus) -> Envelope {
		let shared = &self.shared;
		let local = shared.table.local();
		let updates = shared
			.queue
			.get_entries(target_id, shared.config.piggyback_batch);

		Envelope::Ack(Ack {
			status,
			sender_id: local.peer_id,
			sender_address: local.address,
			incarnation: local.incarnation,
			target_id: target_id.to_owned(),
			updates,
		})
	}

	fn refresh_gauges(&self) {
		let metrics = Metrics::global();
		metrics.set_cluster_size(self.shared.table.get_cluster_size());
		metrics.set_peers_by_state(self.shared.table.state_counts());
	}
}

/// Inbound request handling.
impl<T: ProbeTransport> Gossip<T> {
	fn handle_ping(&self, ping: Ping) -> Option<Envelope> {
		if ping.sender_id == self.shared.local_id {
			tracing::trace!("ignoring probe from self");
			return None;
		}

		// Learn the prober first, then whatever it piggybacked. The implicit
		// liveness claim carries incarnation zero so it can never override
		// gossip about the sender.
		self.absorb_one(&MembershipUpdate::alive(
			ping.sender_id.clone(),
			ping.sender_address.clone(),
			0,
		));
		self.absorb(&ping.updates);

		Some(self.ack_for(&ping.sender_id, AckStatus::Ack))
	}

	/// Relay path: probe the target on the requester's behalf and report
	/// the outcome, always in the structured form.
	async fn handle_ping_req(&self, request: PingReq) -> Option<Envelope> {
		let shared = &self.shared;

		if request.sender_id == shared.local_id {
			tracing::trace!("ignoring relay request from self");
			return None;
		}

		self.absorb_one(&MembershipUpdate::alive(
			request.sender_id.clone(),
			request.sender_address.clone(),
			0,
		));
		self.absorb(&request.updates);

		let outcome = match shared.transport.parse_address(&request.target_address)
		{
			Ok(address) => {
				let updates = shared
					.queue
					.get_entries(&request.target_id, shared.config.piggyback_batch);
				let ping = Envelope::Ping(Ping {
					sender_id: shared.local_id.clone(),
					sender_address: shared.local_address.clone(),
					target_id: request.target_id.clone(),
					updates,
				});

				Metrics::global().record_message(ping.kind());
				Box::pin(shared.transport.send(
					address,
					ping,
					shared.config.direct_timeout,
				))
				.await
			}
			Err(error) => Err(error),
		};

		let status = match outcome {
			Ok(Envelope::Ack(ack)) if ack.is_ack() => {
				self.absorb_ack(&ack);
				AckStatus::Ack
			}
			Ok(_) => AckStatus::Nack,
			Err(error) => {
				tracing::debug!(
					target = %request.target_id,
					error = %error,
					"relayed probe failed"
				);
				AckStatus::Nack
			}
		};

		Some(self.ack_for(&request.sender_id, status))
	}
}

impl<T: ProbeTransport> ProbeHandler for Gossip<T> {
	async fn handle(&self, request: Envelope) -> Option<Envelope> {
		Metrics::global().record_message(request.kind());

		match request {
			Envelope::Ping(ping) => self.handle_ping(ping),
			Envelope::PingReq(request) => self.handle_ping_req(request).await,
			Envelope::Ack(_) => {
				tracing::trace!("discarding unsolicited ack");
				None
			}
		}
	}
}

/// Long-running driver for the probe and sweep cadence.
///
/// The loop owns nothing: all state is reached through the shared
/// [`Gossip`] engine, and the loop exits cleanly when cancelled.
pub(super) struct WorkerLoop<T: ProbeTransport> {
	gossip: Gossip<T>,
	cancel: CancellationToken,
}

impl<T: ProbeTransport> WorkerLoop<T> {
	pub(super) fn new(gossip: Gossip<T>, cancel: CancellationToken) -> Self {
		Self { gossip, cancel }
	}

	pub(super) async fn run(self) {
		let config = &self.gossip.shared.config;
		let start = tokio::time::Instant::now();
		let mut probe =
			tokio::time::interval_at(start + config.probe_interval, config.probe_interval);
		let mut sweep =
			tokio::time::interval_at(start + config.sweep_interval, config.sweep_interval);
		probe.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
		sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

		loop {
			tokio::select! {
				() = self.cancel.cancelled() => {
					tracing::info!("gossip worker loop terminating");
					return;
				}
				_ = probe.tick() => self.gossip.probe_round().await,
				_ = sweep.tick() => self.gossip.sweep(),
			}
		}
	}
}
