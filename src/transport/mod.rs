use {core::fmt, core::time::Duration, tokio_util::sync::CancellationToken};

mod quic;
mod wire;

pub use {
	quic::QuicTransport,
	wire::{Ack, AckStatus, Bincode, Envelope, Ping, PingReq, WireCodec},
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("invalid peer address {0:?}")]
	InvalidAddress(String),

	#[error("failed to initiate connection: {0}")]
	Connect(#[from] quinn::ConnectError),

	#[error("connection failed: {0}")]
	Connection(#[from] quinn::ConnectionError),

	#[error("io: {0}")]
	Io(#[from] std::io::Error),

	#[error("failed to encode envelope: {0}")]
	Encode(#[from] bincode::error::EncodeError),

	#[error("failed to decode envelope: {0}")]
	Decode(#[from] bincode::error::DecodeError),

	#[error("tls setup failed: {0}")]
	Tls(#[from] rustls::Error),

	#[error("self-signed identity generation failed: {0}")]
	Certificate(#[from] rcgen::Error),

	#[error("quic crypto setup failed: {0}")]
	Crypto(#[from] quinn::crypto::rustls::NoInitialCipherSuite),

	#[error("idle timeout out of range: {0}")]
	IdleTimeout(#[from] quinn::VarIntBoundsExceeded),

	#[error("deadline exceeded")]
	DeadlineExceeded,

	#[error("peer closed the stream without responding")]
	NoResponse,
}

/// Responds to inbound probe envelopes. Returning `None` signals
/// non-delivery; the transport closes the stream without a response.
pub trait ProbeHandler: Clone + Send + Sync + 'static {
	fn handle(
		&self,
		request: Envelope,
	) -> impl Future<Output = Option<Envelope>> + Send;
}

/// Request/response probe messaging, parameterised by an address type and
/// a [`WireCodec`].
pub trait ProbeTransport: Send + Sync + 'static {
	type Address: Clone + Send + Sync + fmt::Debug + 'static;

	/// Parses a peer record's endpoint string into a dialable address.
	fn parse_address(&self, address: &str) -> Result<Self::Address, Error>;

	/// Sends one request and waits for the decoded response within the
	/// deadline.
	fn send(
		&self,
		target: Self::Address,
		request: Envelope,
		deadline: Duration,
	) -> impl Future<Output = Result<Envelope, Error>> + Send;

	/// Accepts inbound requests until cancelled, invoking the handler once
	/// per request.
	fn serve<H: ProbeHandler>(
		&self,
		handler: H,
		cancel: CancellationToken,
	) -> impl Future<Output = ()> + Send;

	/// Rejects further traffic. In-flight exchanges are allowed to finish
	/// or time out naturally.
	fn close(&self) {}
}
