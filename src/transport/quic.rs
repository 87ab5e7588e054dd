use {
	super::{Bincode, Envelope, Error, ProbeHandler, ProbeTransport, WireCodec},
	core::{marker::PhantomData, time::Duration},
	futures::{SinkExt, StreamExt},
	quinn::{
		Incoming,
		RecvStream,
		SendStream,
		crypto::rustls::{QuicClientConfig, QuicServerConfig},
	},
	rustls::{
		DigitallySignedStruct,
		SignatureScheme,
		client::danger::{
			HandshakeSignatureValid,
			ServerCertVerified,
			ServerCertVerifier,
		},
		crypto::CryptoProvider,
		pki_types::{CertificateDer, PrivatePkcs8KeyDer, ServerName, UnixTime},
	},
	std::{net::SocketAddr, sync::Arc},
	tokio::io::join,
	tokio_util::{
		codec::{Framed, LengthDelimitedCodec},
		sync::CancellationToken,
	},
};

/// TLS protocol identifier, mirrored on both sides of the handshake.
const ALPN: &[u8] = b"quic";

/// Name presented during connect. Never checked: peer identity is
/// intentionally unauthenticated at this layer.
const SERVER_NAME: &str = "weft";

/// Probe transport over connection-oriented QUIC datagrams.
///
/// Notes:
///
/// - One endpoint serves both roles: it listens for inbound probe
///   connections and dials outbound ones. Each request rides its own
///   bidirectional stream, framed with a length-delimited codec.
///
/// - Certificates are self-signed and accepted without verification, so a
///   probe can reach any peer knowing only its socket address. Deployments
///   that need pinned identities replace [`TrustAnyCertificate`].
///
/// - The handshake idle timeout bounds stalled connects; the per-request
///   deadline bounds the stream exchange.
pub struct QuicTransport<C: WireCodec = Bincode> {
	endpoint: quinn::Endpoint,
	handshake_timeout: Duration,
	_codec: PhantomData<C>,
}

impl<C: WireCodec> QuicTransport<C> {
	/// Binds the endpoint to `listen` and prepares both the server and
	/// client TLS configurations.
	pub fn bind(
		listen: SocketAddr,
		handshake_timeout: Duration,
	) -> Result<Self, Error> {
		let provider = Arc::new(rustls::crypto::ring::default_provider());

		let identity =
			rcgen::generate_simple_self_signed(vec![SERVER_NAME.to_owned()])?;
		let cert = identity.cert.der().clone();
		let key = PrivatePkcs8KeyDer::from(identity.key_pair.serialize_der());

		let mut server_crypto =
			rustls::ServerConfig::builder_with_provider(provider.clone())
				.with_protocol_versions(&[&rustls::version::TLS13])?
				.with_no_client_auth()
				.with_single_cert(vec![cert], key.into())?;
		server_crypto.alpn_protocols = vec![ALPN.to_vec()];

		let mut server_config = quinn::ServerConfig::with_crypto(Arc::new(
			QuicServerConfig::try_from(server_crypto)?,
		));
		let mut transport = quinn::TransportConfig::default();
		transport.max_idle_timeout(Some(handshake_timeout.try_into()?));
		server_config.transport_config(Arc::new(transport));

		let mut client_crypto =
			rustls::ClientConfig::builder_with_provider(provider.clone())
				.with_protocol_versions(&[&rustls::version::TLS13])?
				.dangerous()
				.with_custom_certificate_verifier(Arc::new(TrustAnyCertificate(
					provider,
				)))
				.with_no_client_auth();
		client_crypto.alpn_protocols = vec![ALPN.to_vec()];

		let mut endpoint = quinn::Endpoint::server(server_config, listen)?;
		endpoint.set_default_client_config(quinn::ClientConfig::new(Arc::new(
			QuicClientConfig::try_from(client_crypto)?,
		)));

		Ok(Self {
			endpoint,
			handshake_timeout,
			_codec: PhantomData,
		})
	}

	/// The socket address the endpoint is bound to.
	pub fn local_addr(&self) -> Result<SocketAddr, Error> {
		Ok(self.endpoint.local_addr()?)
	}

	async fn handle_connection<H: ProbeHandler>(
		incoming: Incoming,
		handler: H,
		cancel: CancellationToken,
	) {
		let connection = match incoming.await {
			Ok(connection) => connection,
			Err(error) => {
				tracing::trace!(error = %error, "inbound handshake failed");
				return;
			}
		};

		loop {
			tokio::select! {
				() = cancel.cancelled() => return,
				streams = connection.accept_bi() => {
					match streams {
						Ok((tx, rx)) => {
							// one response task per inbound request
							tokio::spawn(Self::respond(tx, rx, handler.clone()));
						}
						Err(_) => return,
					}
				}
			}
		}
	}

	async fn respond<H: ProbeHandler>(
		tx: SendStream,
		rx: RecvStream,
		handler: H,
	) {
		let mut link = Framed::new(join(rx, tx), LengthDelimitedCodec::new());

		let Some(Ok(frame)) = link.next().await else {
			return;
		};

		// A malformed envelope is dropped without penalising the peer.
		let request = match C::decode(&frame) {
			Ok(request) => request,
			Err(error) => {
				tracing::trace!(error = %error, "dropping undecodable frame");
				return;
			}
		};

		let Some(response) = handler.handle(request).await else {
			return;
		};

		match C::encode(&response) {
			Ok(bytes) => {
				if let Err(error) = link.send(bytes).await {
					tracing::trace!(error = %error, "failed to write response");
				}
			}
			Err(error) => {
				tracing::warn!(error = %error, "failed to encode response");
			}
		}
	}
}

impl<C: WireCodec> ProbeTransport for QuicTransport<C> {
	type Address = SocketAddr;

	fn parse_address(&self, address: &str) -> Result<SocketAddr, Error> {
		address
			.parse()
			.map_err(|_| Error::InvalidAddress(address.to_owned()))
	}

	async fn send(
		&self,
		target: SocketAddr,
		request: Envelope,
		deadline: Duration,
	) -> Result<Envelope, Error> {
		let connecting = self.endpoint.connect(target, SERVER_NAME)?;
		let connection = tokio::time::timeout(self.handshake_timeout, connecting)
			.await
			.map_err(|_| Error::DeadlineExceeded)??;

		let exchange = async {
			let (tx, rx) = connection.open_bi().await?;
			let mut link = Framed::new(join(rx, tx), LengthDelimitedCodec::new());

			link.send(C::encode(&request)?).await?;

			let frame = link.next().await.transpose()?.ok_or(Error::NoResponse)?;
			C::decode(&frame)
		};

		let response = tokio::time::timeout(deadline, exchange)
			.await
			.map_err(|_| Error::DeadlineExceeded)?;

		connection.close(0u32.into(), b"");
		response
	}

	async fn serve<H: ProbeHandler>(
		&self,
		handler: H,
		cancel: CancellationToken,
	) {
		loop {
			tokio::select! {
				() = cancel.cancelled() => {
					tracing::debug!("probe transport listener terminating");
					return;
				}
				incoming = self.endpoint.accept() => {
					let Some(incoming) = incoming else { return };
					// one handler task per inbound connection
					tokio::spawn(Self::handle_connection(
						incoming,
						handler.clone(),
						cancel.clone(),
					));
				}
			}
		}
	}

	fn close(&self) {
		self.endpoint.close(0u32.into(), b"");
	}
}

/// A certificate verifier that accepts any peer certificate.
///
/// The membership protocol identifies peers by their gossiped node ids,
/// not by their transport identity, so the TLS layer only provides
/// encryption.
#[derive(Debug)]
struct TrustAnyCertificate(Arc<CryptoProvider>);

impl ServerCertVerifier for TrustAnyCertificate {
	fn verify_server_cert(
		&self,
		_end_entity: &CertificateDer<'_>,
		_intermediates: &[CertificateDer<'_>],
		_server_name: &ServerName<'_>,
		_ocsp_response: &[u8],
		_now: UnixTime,
	) -> Result<ServerCertVerified, rustls::Error> {
		Ok(ServerCertVerified::assertion())
	}

	fn verify_tls12_signature(
		&self,
		message: &[u8],
		cert: &CertificateDer<'_>,
		dss: &DigitallySignedStruct,
	) -> Result<HandshakeSignatureValid, rustls::Error> {
		rustls::crypto::verify_tls12_signature(
			message,
			cert,
			dss,
			&self.0.signature_verification_algorithms,
		)
	}

	fn verify_tls13_signature(
		&self,
		message: &[u8],
		cert: &CertificateDer<'_>,
		dss: &DigitallySignedStruct,
	) -> Result<HandshakeSignatureValid, rustls::Error> {
		rustls::crypto::verify_tls13_signature(
			message,
			cert,
			dss,
			&self.0.signature_verification_algorithms,
		)
	}

	fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
		self.0.signature_verification_algorithms.supported_schemes()
	}
}
