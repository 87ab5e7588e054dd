use clap::{Parser, Subcommand};

pub mod node;

#[derive(Debug, Parser)]
pub struct CliOpts {
	#[clap(subcommand)]
	pub command: CliCommand,
}

impl CliOpts {
	pub async fn run(&self) -> anyhow::Result<()> {
		match &self.command {
			CliCommand::Node(cmd) => cmd.run().await,
		}
	}
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
	/// Run a fabric node
	Node(node::NodeCommand),
}
