use {
	super::peer::{MembershipUpdate, Peer, PeerState},
	parking_lot::RwLock,
	std::{
		collections::{HashMap, hash_map::Entry},
		time::{Duration, Instant},
	},
};

/// Result of merging one membership update into the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
	/// The update carried novel information and was adopted. The adopted
	/// delta is returned so the caller can feed it back into dissemination.
	Applied(MembershipUpdate),

	/// The update was stale or carried nothing new and was discarded.
	Stale,

	/// The update claimed the local node is not alive. The table bumped the
	/// local incarnation and the returned refutation must be disseminated.
	Refuted(MembershipUpdate),
}

/// Mapping from node id to peer record, with the SWIM state-merge rules.
///
/// Notes:
///
/// - The self-entry always exists; its `incarnation` and `state` are owned
///   exclusively by the local process.
///
/// - Reads take snapshots under a read lock; all merges are exclusive,
///   bounded, non-suspending critical sections.
///
/// - Records in a terminal state older than the peer TTL are swept on every
///   merge and on demand.
pub struct MemberTable {
	local_id: String,
	peer_ttl: Duration,
	members: RwLock<HashMap<String, Peer>>,
}

impl MemberTable {
	/// Creates a table seeded with the local node's own record.
	pub fn new(local: Peer, peer_ttl: Duration) -> Self {
		let local_id = local.peer_id.clone();
		let mut members = HashMap::new();
		members.insert(local_id.clone(), local);

		Self {
			local_id,
			peer_ttl,
			members: RwLock::new(members),
		}
	}

	pub fn local_id(&self) -> &str {
		&self.local_id
	}

	/// Snapshot of the local node's own record.
	pub fn local(&self) -> Peer {
		self.members.read()[&self.local_id].clone()
	}

	/// Inserts or silently replaces a record. Callers serialize through the
	/// update path for correctness.
	pub fn add_peer(&self, peer_id: impl Into<String>, peer: Peer) {
		self.members.write().insert(peer_id.into(), peer);
	}

	pub fn get(&self, peer_id: &str) -> Option<Peer> {
		self.members.read().get(peer_id).cloned()
	}

	pub fn len(&self) -> usize {
		self.members.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.members.read().is_empty()
	}

	/// Snapshot of peers currently in `Alive` state. Excluding self is the
	/// caller's responsibility.
	pub fn get_alive_peers(&self) -> Vec<Peer> {
		self
			.members
			.read()
			.values()
			.filter(|peer| peer.state == PeerState::Alive)
			.cloned()
			.collect()
	}

	/// Number of alive peers, including self.
	pub fn get_cluster_size(&self) -> usize {
		self
			.members
			.read()
			.values()
			.filter(|peer| peer.state == PeerState::Alive)
			.count()
	}

	/// Number of known peers per state, in severity order.
	pub fn state_counts(&self) -> [usize; 4] {
		let mut counts = [0usize; 4];
		for peer in self.members.read().values() {
			counts[peer.state as usize] += 1;
		}
		counts
	}

	/// Merges one membership update using the SWIM rules:
	///
	/// 1. Unknown peers are inserted as observed.
	/// 2. A lower incarnation is stale and discarded.
	/// 3. A higher incarnation wins outright.
	/// 4. At equal incarnation the more severe state wins; `Alive` never
	///    defeats `Suspected`.
	///
	/// An update claiming the local node is anything but alive triggers
	/// refutation: the local incarnation is raised and a fresh `Alive`
	/// update is returned for dissemination. This is the only place any
	/// peer raises its own incarnation.
	///
	/// Every merge also sweeps records whose terminal-state TTL expired.
	pub fn apply_update(&self, update: &MembershipUpdate) -> ApplyOutcome {
		let mut members = self.members.write();

		let outcome = if update.node_id == self.local_id {
			self.merge_self(&mut members, update)
		} else {
			Self::merge_remote(&mut members, update)
		};

		Self::sweep_locked(&mut members, &self.local_id, self.peer_ttl);
		outcome
	}

	/// Removes terminal-state records older than the peer TTL.
	pub fn sweep(&self) {
		let mut members = self.members.write();
		Self::sweep_locked(&mut members, &self.local_id, self.peer_ttl);
	}

	/// Records a failed probe of `peer_id`: an alive peer becomes suspected,
	/// and a peer that has been suspected longer than the TTL becomes dead.
	/// Returns the transition as an update when one occurred.
	pub fn mark_failed(&self, peer_id: &str) -> Option<MembershipUpdate> {
		let mut members = self.members.write();
		let peer = members.get_mut(peer_id)?;

		match peer.state {
			PeerState::Alive => {
				peer.state = PeerState::Suspected;
				peer.since_state_update = Instant::now();
				Some(peer.as_update())
			}
			PeerState::Suspected
				if peer.since_state_update.elapsed() > self.peer_ttl =>
			{
				peer.state = PeerState::Dead;
				peer.since_state_update = Instant::now();
				Some(peer.as_update())
			}
			_ => None,
		}
	}

	fn merge_remote(
		members: &mut HashMap<String, Peer>,
		update: &MembershipUpdate,
	) -> ApplyOutcome {
		let peer = match members.entry(update.node_id.clone()) {
			Entry::Vacant(slot) => {
				slot.insert(Peer {
					peer_id: update.node_id.clone(),
					address: update.address.clone(),
					state: update.state,
					incarnation: update.incarnation,
					since_state_update: Instant::now(),
				});
				return ApplyOutcome::Applied(update.clone());
			}
			Entry::Occupied(slot) => slot.into_mut(),
		};

		if update.incarnation < peer.incarnation {
			return ApplyOutcome::Stale;
		}

		if update.incarnation > peer.incarnation {
			peer.incarnation = update.incarnation;
			peer.state = update.state;
			peer.address = update.address.clone();
			peer.since_state_update = Instant::now();
			return ApplyOutcome::Applied(update.clone());
		}

		// Equal incarnation: adopt the more severe state only.
		if update.state > peer.state {
			peer.state = update.state;
			peer.since_state_update = Instant::now();
			return ApplyOutcome::Applied(update.clone());
		}

		ApplyOutcome::Stale
	}

	fn merge_self(
		&self,
		members: &mut HashMap<String, Peer>,
		update: &MembershipUpdate,
	) -> ApplyOutcome {
		if update.state == PeerState::Alive {
			return ApplyOutcome::Stale;
		}

		let local = members
			.get_mut(&self.local_id)
			.expect("self-entry always exists");

		// Refute: raise our incarnation above the suspicion and gossip a
		// fresh alive claim.
		local.incarnation = local.incarnation.max(update.incarnation) + 1;
		local.state = PeerState::Alive;
		local.since_state_update = Instant::now();

		ApplyOutcome::Refuted(local.as_update())
	}

	fn sweep_locked(
		members: &mut HashMap<String, Peer>,
		local_id: &str,
		peer_ttl: Duration,
	) {
		members.retain(|peer_id, peer| {
			peer_id == local_id
				|| !peer.state.is_terminal()
				|| peer.since_state_update.elapsed() <= peer_ttl
		});
	}
}

#[cfg(test)]
mod tests {
	use {super::*, std::time::Duration};

	const TTL: Duration = Duration::from_secs(60);

	fn table() -> MemberTable {
		MemberTable::new(Peer::alive("local", "127.0.0.1:1000", 1), TTL)
	}

	fn update(
		id: &str,
		incarnation: u64,
		state: PeerState,
	) -> MembershipUpdate {
		MembershipUpdate::new(id, "127.0.0.1:2000", incarnation, state)
	}

	#[test]
	fn unknown_peer_is_inserted() {
		let table = table();
		let outcome = table.apply_update(&update("a", 1, PeerState::Alive));

		assert!(matches!(outcome, ApplyOutcome::Applied(_)));
		assert_eq!(table.get("a").unwrap().incarnation, 1);
		assert_eq!(table.get_cluster_size(), 2);
	}

	#[test]
	fn lower_incarnation_is_stale() {
		let table = table();
		table.apply_update(&update("a", 5, PeerState::Alive));

		let outcome = table.apply_update(&update("a", 4, PeerState::Dead));

		assert_eq!(outcome, ApplyOutcome::Stale);
		assert_eq!(table.get("a").unwrap().state, PeerState::Alive);
		assert_eq!(table.get("a").unwrap().incarnation, 5);
	}

	#[test]
	fn higher_incarnation_wins_outright() {
		let table = table();
		table.apply_update(&update("a", 1, PeerState::Alive));

		let outcome = table.apply_update(&update("a", 2, PeerState::Suspected));

		assert!(matches!(outcome, ApplyOutcome::Applied(_)));
		let peer = table.get("a").unwrap();
		assert_eq!(peer.state, PeerState::Suspected);
		assert_eq!(peer.incarnation, 2);
	}

	#[test]
	fn equal_incarnation_alive_never_defeats_suspected() {
		let table = table();
		table.apply_update(&update("a", 3, PeerState::Suspected));

		let outcome = table.apply_update(&update("a", 3, PeerState::Alive));

		assert_eq!(outcome, ApplyOutcome::Stale);
		assert_eq!(table.get("a").unwrap().state, PeerState::Suspected);
	}

	#[test]
	fn equal_incarnation_adopts_more_severe() {
		let table = table();
		table.apply_update(&update("a", 3, PeerState::Suspected));

		let outcome = table.apply_update(&update("a", 3, PeerState::Dead));

		assert!(matches!(outcome, ApplyOutcome::Applied(_)));
		assert_eq!(table.get("a").unwrap().state, PeerState::Dead);
	}

	#[test]
	fn merge_is_commutative_per_peer() {
		let updates = [
			update("a", 1, PeerState::Alive),
			update("a", 2, PeerState::Suspected),
			update("a", 2, PeerState::Alive),
			update("a", 1, PeerState::Dead),
		];

		// All 4! orderings must converge to the same (incarnation, state).
		let mut indices = vec![0, 1, 2, 3];
		let mut outcomes = std::collections::HashSet::new();
		permute(&mut indices, 0, &mut |order: &[usize]| {
			let table = table();
			for &i in order {
				table.apply_update(&updates[i]);
			}
			let peer = table.get("a").unwrap();
			outcomes.insert((peer.incarnation, peer.state));
		});

		assert_eq!(outcomes.len(), 1);
		assert!(outcomes.contains(&(2, PeerState::Suspected)));
	}

	fn permute(items: &mut Vec<usize>, k: usize, visit: &mut impl FnMut(&[usize])) {
		if k == items.len() {
			visit(items);
			return;
		}
		for i in k..items.len() {
			items.swap(k, i);
			permute(items, k + 1, visit);
			items.swap(k, i);
		}
	}

	#[test]
	fn incarnation_never_decreases() {
		let table = table();
		let mut last = 0;

		for update in [
			update("a", 3, PeerState::Alive),
			update("a", 1, PeerState::Dead),
			update("a", 5, PeerState::Suspected),
			update("a", 2, PeerState::Left),
		] {
			table.apply_update(&update);
			let incarnation = table.get("a").unwrap().incarnation;
			assert!(incarnation >= last);
			last = incarnation;
		}
	}

	#[test]
	fn non_alive_self_update_is_refuted() {
		let table = table();

		let outcome = table.apply_update(&MembershipUpdate::new(
			"local",
			"127.0.0.1:1000",
			1,
			PeerState::Suspected,
		));

		let ApplyOutcome::Refuted(refutation) = outcome else {
			panic!("expected refutation, got {outcome:?}");
		};
		assert_eq!(refutation.state, PeerState::Alive);
		assert_eq!(refutation.incarnation, 2);
		assert_eq!(table.local().incarnation, 2);
		assert_eq!(table.local().state, PeerState::Alive);
	}

	#[test]
	fn alive_self_update_is_ignored() {
		let table = table();

		let outcome =
			table.apply_update(&update("local", 1, PeerState::Alive));

		assert_eq!(outcome, ApplyOutcome::Stale);
		assert_eq!(table.local().incarnation, 1);
	}

	/// A table whose TTL is short enough to expire within a test.
	fn short_ttl_table() -> MemberTable {
		MemberTable::new(
			Peer::alive("local", "127.0.0.1:1000", 1),
			Duration::from_millis(10),
		)
	}

	fn wait_past_short_ttl() {
		std::thread::sleep(Duration::from_millis(30));
	}

	#[test]
	fn expired_terminal_records_are_swept() {
		let table = short_ttl_table();
		table.apply_update(&update("a", 1, PeerState::Dead));

		wait_past_short_ttl();
		table.sweep();

		assert!(table.get("a").is_none());
	}

	#[test]
	fn alive_records_are_never_swept() {
		let table = short_ttl_table();
		table.apply_update(&update("a", 1, PeerState::Alive));

		wait_past_short_ttl();
		table.sweep();

		assert!(table.get("a").is_some());
	}

	#[test]
	fn applying_any_update_sweeps_expired_records() {
		let table = short_ttl_table();
		table.apply_update(&update("a", 1, PeerState::Left));

		wait_past_short_ttl();
		table.apply_update(&update("b", 1, PeerState::Alive));

		assert!(table.get("a").is_none());
		assert!(table.get("b").is_some());
	}

	#[test]
	fn self_entry_survives_the_sweep() {
		let table = short_ttl_table();

		{
			let mut local = table.local();
			local.state = PeerState::Suspected;
			table.add_peer("local", local);
		}

		wait_past_short_ttl();
		table.sweep();

		assert!(table.get("local").is_some());
	}

	#[test]
	fn failed_probe_suspects_an_alive_peer() {
		let table = table();
		table.apply_update(&update("a", 1, PeerState::Alive));

		let transition = table.mark_failed("a").unwrap();

		assert_eq!(transition.state, PeerState::Suspected);
		assert_eq!(transition.incarnation, 1);
		assert_eq!(table.get("a").unwrap().state, PeerState::Suspected);
	}

	#[test]
	fn suspected_peer_dies_after_ttl() {
		let table = short_ttl_table();
		table.apply_update(&update("a", 1, PeerState::Suspected));

		// Within the TTL a failed probe changes nothing.
		assert!(table.mark_failed("a").is_none());

		wait_past_short_ttl();
		let transition = table.mark_failed("a").unwrap();
		assert_eq!(transition.state, PeerState::Dead);
	}

	#[test]
	fn state_counts_track_every_state() {
		let table = table();
		table.apply_update(&update("a", 1, PeerState::Alive));
		table.apply_update(&update("b", 1, PeerState::Suspected));
		table.apply_update(&update("c", 1, PeerState::Dead));
		table.apply_update(&update("d", 1, PeerState::Left));

		// Self is alive too.
		assert_eq!(table.state_counts(), [2, 1, 1, 1]);
	}
}
