use {core::time::Duration, weft::prelude::*};

/// Short handshake deadline so probes against dead endpoints fail within
/// a test-sized window.
const HANDSHAKE: Duration = Duration::from_millis(500);

fn fast_config() -> Config {
	Config::builder()
		.with_probe_interval(Duration::from_millis(100))
		.with_sweep_interval(Duration::from_millis(200))
		.with_direct_timeout(Duration::from_millis(500))
		.with_indirect_timeout(Duration::from_millis(500))
		.build()
		.unwrap()
}

fn spawn_node(config: Config) -> (Membership<QuicTransport>, String) {
	let transport =
		QuicTransport::bind("127.0.0.1:0".parse().unwrap(), HANDSHAKE).unwrap();
	let address = transport.local_addr().unwrap().to_string();
	let membership = Membership::spawn(
		format!("node-{address}"),
		address.clone(),
		transport,
		config,
	)
	.unwrap();

	(membership, address)
}

#[tokio::test]
async fn joining_node_and_bootstrap_learn_each_other() {
	let (bootstrap, bootstrap_addr) = spawn_node(fast_config());
	let (joiner, _) = spawn_node(fast_config());

	joiner.join(&bootstrap_addr).await.unwrap();

	assert_eq!(joiner.table().get_cluster_size(), 2);
	assert_eq!(bootstrap.table().get_cluster_size(), 2);
	assert_eq!(
		joiner
			.table()
			.get(bootstrap.local_id())
			.unwrap()
			.state,
		PeerState::Alive
	);
	assert_eq!(
		bootstrap.table().get(joiner.local_id()).unwrap().state,
		PeerState::Alive
	);
}

#[tokio::test]
async fn gossip_spreads_membership_across_the_cluster() {
	let (bootstrap, bootstrap_addr) = spawn_node(fast_config());

	let mut nodes = vec![];
	for _ in 0..3 {
		let (node, _) = spawn_node(fast_config());
		node.join(&bootstrap_addr).await.unwrap();
		nodes.push(node);
	}

	// Let a few probe rounds run; piggybacked updates carry knowledge of
	// every member to every other member.
	tokio::time::sleep(Duration::from_secs(3)).await;

	assert_eq!(bootstrap.table().get_cluster_size(), 4);
	for node in &nodes {
		assert_eq!(
			node.table().get_cluster_size(),
			4,
			"{} has an incomplete member table",
			node.local_id(),
		);
	}
}

#[tokio::test]
async fn unreachable_peer_becomes_suspected() {
	let (observer, observer_addr) = spawn_node(fast_config());
	let (victim, _) = spawn_node(fast_config());

	victim.join(&observer_addr).await.unwrap();
	let victim_id = victim.local_id().to_owned();

	// Take the victim offline; with no relays available, missed probes
	// must suspect it.
	victim.shutdown();
	tokio::time::sleep(Duration::from_secs(3)).await;

	let peer = observer.table().get(&victim_id).unwrap();
	assert_eq!(peer.state, PeerState::Suspected);
}

#[tokio::test]
async fn probe_metrics_are_populated() {
	let (bootstrap, bootstrap_addr) = spawn_node(fast_config());
	let (joiner, _) = spawn_node(fast_config());

	joiner.join(&bootstrap_addr).await.unwrap();
	tokio::time::sleep(Duration::from_secs(2)).await;

	let metrics = Metrics::global();
	assert!(metrics.message_count("ping") > 0);
	assert!(metrics.message_count("ack") > 0);
	assert!(metrics.ping_count() > 0);
	assert!(metrics.cluster_size() >= 2);

	drop((bootstrap, joiner));
}
