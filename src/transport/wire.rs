use {
	super::Error,
	crate::membership::MembershipUpdate,
	bincode::config::standard,
	bytes::Bytes,
	serde::{Deserialize, Serialize},
};

/// Direct probe. The receiver answers with an [`Ack`] carrying its own
/// piggyback batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ping {
	pub sender_id: String,
	pub sender_address: String,
	pub target_id: String,
	pub updates: Vec<MembershipUpdate>,
}

/// Indirect probe request. `request_id`/`request_address` identify the
/// relay this message is addressed to; the relay probes `target_id` on the
/// sender's behalf.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PingReq {
	pub sender_id: String,
	pub sender_address: String,
	pub target_id: String,
	pub target_address: String,
	pub request_id: String,
	pub request_address: String,
	pub updates: Vec<MembershipUpdate>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AckStatus {
	Ack,
	Nack,
}

/// Probe response. A relay that could not reach the target still answers
/// with the structured form, carrying [`AckStatus::Nack`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ack {
	pub status: AckStatus,
	pub sender_id: String,
	pub sender_address: String,
	pub incarnation: u64,
	pub target_id: String,
	pub updates: Vec<MembershipUpdate>,
}

impl Ack {
	pub fn is_ack(&self) -> bool {
		self.status == AckStatus::Ack
	}
}

/// The single wire envelope. Every inbound frame is pattern-matched into
/// the handler for its variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Envelope {
	Ping(Ping),
	PingReq(PingReq),
	Ack(Ack),
}

impl Envelope {
	/// Message type label used for logging and the message counters.
	pub const fn kind(&self) -> &'static str {
		match self {
			Self::Ping(_) => "ping",
			Self::PingReq(_) => "ping_req",
			Self::Ack(ack) => match ack.status {
				AckStatus::Ack => "ack",
				AckStatus::Nack => "nack",
			},
		}
	}
}

/// Codec producing opaque byte blobs for the wire envelope.
///
/// The probe transport is parameterised over this trait; the default
/// implementation is [`Bincode`].
pub trait WireCodec: Send + Sync + 'static {
	fn encode(envelope: &Envelope) -> Result<Bytes, Error>;
	fn decode(bytes: &[u8]) -> Result<Envelope, Error>;
}

/// Default codec: bincode with the standard configuration.
pub struct Bincode;

impl WireCodec for Bincode {
	fn encode(envelope: &Envelope) -> Result<Bytes, Error> {
		let encoded = bincode::serde::encode_to_vec(envelope, standard())?;
		Ok(Bytes::from(encoded))
	}

	fn decode(bytes: &[u8]) -> Result<Envelope, Error> {
		let (envelope, _) = bincode::serde::decode_from_slice(bytes, standard())?;
		Ok(envelope)
	}
}
