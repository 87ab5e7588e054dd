use {clap::Parser, std::net::SocketAddr, weft::Node};

/// Runs one node of the fabric: the gossip loops, the probe listener and
/// the local replica, until interrupted.
#[derive(Debug, Parser)]
pub struct NodeCommand {
	/// Start a new cluster instead of joining an existing one
	#[clap(long)]
	pub bootstrap: bool,

	/// Address of an existing cluster node to join through
	#[clap(long = "node")]
	pub known_node: Option<String>,

	/// UDP port to listen on (0 picks a random port)
	#[clap(long, default_value_t = 0)]
	pub port: u16,
}

impl NodeCommand {
	pub async fn run(&self) -> anyhow::Result<()> {
		let listen: SocketAddr = format!("0.0.0.0:{}", self.port).parse()?;
		let node = Node::bind(listen)?;

		tracing::info!(
			id = %node.local_id(),
			address = %node.local_address(),
			bootstrap = self.bootstrap,
			"node started"
		);

		if !self.bootstrap {
			if let Some(known_node) = &self.known_node {
				node.join(known_node).await?;
			}
		}

		tokio::signal::ctrl_c().await?;
		tracing::info!("shutting down");
		node.shutdown();

		Ok(())
	}
}
