use crate::transport;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("local node id must not be empty")]
	EmptyNodeId,

	#[error("transport: {0}")]
	Transport(#[from] transport::Error),

	#[error("join target {0} did not acknowledge")]
	JoinRejected(String),
}
