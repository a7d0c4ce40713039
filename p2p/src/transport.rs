//! TCP connection plumbing and the UDP discovery socket. Each accepted or
//! dialed TCP connection gets one recv task and one send task, exactly as
//! `p2p/tcpserver.go`'s `tcpConn.recv`/`tcpConn.send` split them, except
//! the byte-stream-splitting `split` callback is replaced by the fixed
//! `length|crc32|protocol_id|payload` frame already decoded by
//! [`ecoin_proto::message`].

use crate::error::Error;
use crate::handshake::SessionCodec;
use ecoin_crypto::Id;
use ecoin_proto::message::{build_frame, parse_frame_body, parse_frame_header, ProtocolId, FRAME_HEADER_LEN};
use ecoin_proto::DiscoveryMessage;
use ecoin_util::bounds;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener as TokioTcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc;

/// A decoded, still-encrypted-at-rest inbound frame tagged with the peer
/// it came from, handed to whichever protocol runner owns `protocol_id`.
pub struct InboundFrame {
	pub peer: Id,
	pub protocol_id: ProtocolId,
	pub payload: Vec<u8>,
}

/// Handle to one live TCP connection. Cloning is cheap; dropping every
/// clone does not close the socket (the recv/send tasks own it) — call
/// [`TcpConn::close`] explicitly, mirroring `conn.stop()`.
#[derive(Clone)]
pub struct TcpConn {
	pub peer: Id,
	pub remote_addr: SocketAddr,
	send_tx: mpsc::Sender<(ProtocolId, Vec<u8>)>,
	shutdown: ecoin_util::Shutdown,
}

impl TcpConn {
	/// Wrap an already-handshaken `stream` in recv/send tasks. `recv_out`
	/// receives every successfully decrypted frame; a full queue drops
	/// the frame with a warning, matching `conn.loop`'s queue-full path.
	pub fn spawn(
		stream: TcpStream,
		peer: Id,
		remote_addr: SocketAddr,
		codec: Arc<SessionCodec>,
		recv_out: mpsc::Sender<InboundFrame>,
		on_disconnect: impl FnOnce(Id) + Send + 'static,
	) -> TcpConn {
		let (read_half, write_half) = stream.into_split();
		let (send_tx, send_rx) = mpsc::channel(bounds::TCP_SEND);
		let shutdown = ecoin_util::Shutdown::new();

		shutdown.add();
		tokio::spawn(recv_loop(
			read_half,
			peer,
			codec.clone(),
			recv_out,
			shutdown.clone(),
			on_disconnect,
		));

		shutdown.add();
		tokio::spawn(send_loop(write_half, codec, send_rx, shutdown.clone()));

		TcpConn {
			peer,
			remote_addr,
			send_tx,
			shutdown,
		}
	}

	/// Queue `payload` for the given protocol; drops and logs on a full
	/// send queue rather than blocking the caller.
	pub fn send(&self, protocol_id: ProtocolId, payload: Vec<u8>) {
		if self.send_tx.try_send((protocol_id, payload)).is_err() {
			log::warn!("send queue to {:?} full, dropping frame", self.peer);
		}
	}

	pub async fn close(&self) {
		self.shutdown.stop().await;
	}
}

async fn recv_loop(
	mut read_half: OwnedReadHalf,
	peer: Id,
	codec: Arc<SessionCodec>,
	recv_out: mpsc::Sender<InboundFrame>,
	shutdown: ecoin_util::Shutdown,
	on_disconnect: impl FnOnce(Id) + Send + 'static,
) {
	loop {
		tokio::select! {
			_ = shutdown.cancelled() => break,
			result = read_frame(&mut read_half) => {
				match result {
					Ok(Some((protocol_id, ciphertext))) => {
						match codec.decrypt(&ciphertext) {
							Ok(payload) => {
								if recv_out
									.try_send(InboundFrame { peer, protocol_id, payload })
									.is_err()
								{
									log::warn!("recv queue full, dropping frame from {:?}", peer);
								}
							}
							Err(_) => {
								log::warn!("decrypt failed for {:?}, closing connection", peer);
								break;
							}
						}
					}
					Ok(None) => {
						log::info!("connection closed by {:?}", peer);
						break;
					}
					Err(e) => {
						log::warn!("connection to {:?} got unexpected err: {}", peer, e);
						break;
					}
				}
			}
		}
	}
	on_disconnect(peer);
	shutdown.done();
}

async fn read_frame(read_half: &mut OwnedReadHalf) -> Result<Option<(ProtocolId, Vec<u8>)>, Error> {
	let mut header = [0u8; FRAME_HEADER_LEN];
	if let Err(e) = read_half.read_exact(&mut header).await {
		if e.kind() == std::io::ErrorKind::UnexpectedEof {
			return Ok(None);
		}
		return Err(e.into());
	}
	let (length, checksum) = parse_frame_header(&header)?;
	let mut body = vec![0u8; length as usize];
	read_half.read_exact(&mut body).await?;
	let frame = parse_frame_body(length, checksum, &body)?;
	Ok(Some((frame.protocol_id, frame.payload)))
}

async fn send_loop(
	mut write_half: OwnedWriteHalf,
	codec: Arc<SessionCodec>,
	mut send_rx: mpsc::Receiver<(ProtocolId, Vec<u8>)>,
	shutdown: ecoin_util::Shutdown,
) {
	loop {
		tokio::select! {
			_ = shutdown.cancelled() => break,
			maybe = send_rx.recv() => {
				let Some((protocol_id, payload)) = maybe else { break };
				let ciphertext = match codec.encrypt(&payload) {
					Ok(c) => c,
					Err(_) => {
						log::warn!("encrypt failed, closing connection");
						break;
					}
				};
				let frame = build_frame(protocol_id, &ciphertext);
				if let Err(e) = write_half.write_all(&frame).await {
					log::warn!("send failed: {}, closing connection", e);
					break;
				}
			}
		}
	}
	shutdown.done();
}

/// Thin wrapper over [`TokioTcpListener`] with a bounded accept queue,
/// mirroring `tcpServer`'s `acceptConn` channel (drop-on-full rather than
/// blocking the listener).
pub struct TcpListener {
	accept_rx: tokio::sync::Mutex<mpsc::Receiver<TcpStream>>,
	local_addr: SocketAddr,
}

impl TcpListener {
	pub async fn bind(addr: SocketAddr, shutdown: ecoin_util::Shutdown) -> Result<TcpListener, Error> {
		let listener = TokioTcpListener::bind(addr).await?;
		let local_addr = listener.local_addr()?;
		let (tx, rx) = mpsc::channel(bounds::CONN_ACCEPT);

		shutdown.add();
		tokio::spawn(async move {
			loop {
				tokio::select! {
					_ = shutdown.cancelled() => break,
					accepted = listener.accept() => {
						match accepted {
							Ok((stream, _addr)) => {
								if tx.try_send(stream).is_err() {
									log::warn!("accept queue full, dropping incoming connection");
								}
							}
							Err(e) => log::warn!("accept failed: {}", e),
						}
					}
				}
			}
			shutdown.done();
		});

		Ok(TcpListener {
			accept_rx: tokio::sync::Mutex::new(rx),
			local_addr,
		})
	}

	pub fn local_addr(&self) -> SocketAddr {
		self.local_addr
	}

	pub async fn accept(&self) -> Option<TcpStream> {
		self.accept_rx.lock().await.recv().await
	}
}

pub async fn dial(addr: SocketAddr) -> Result<TcpStream, Error> {
	Ok(TcpStream::connect(addr).await?)
}

/// Hands received, staleness-checked discovery datagrams to `out`; drops
/// and logs on decode failure or a full queue, matching the original's
/// informal handling of malformed UDP traffic.
pub async fn spawn_udp(
	addr: SocketAddr,
	out: mpsc::Sender<(SocketAddr, DiscoveryMessage)>,
	shutdown: ecoin_util::Shutdown,
) -> Result<Arc<UdpSocket>, Error> {
	let socket = Arc::new(UdpSocket::bind(addr).await?);
	let recv_socket = socket.clone();

	shutdown.add();
	tokio::spawn(async move {
		let mut buf = vec![0u8; 2048];
		loop {
			tokio::select! {
				_ = shutdown.cancelled() => break,
				result = recv_socket.recv_from(&mut buf) => {
					match result {
						Ok((n, from)) => match DiscoveryMessage::decode(&buf[..n]) {
							Ok(msg) => {
								if out.try_send((from, msg)).is_err() {
									log::warn!("udp recv queue full, dropping datagram from {}", from);
								}
							}
							Err(e) => log::warn!("discard malformed discovery datagram from {}: {}", from, e),
						},
						Err(e) => log::warn!("udp recv error: {}", e),
					}
				}
			}
		}
		shutdown.done();
	});

	Ok(socket)
}

pub async fn send_udp(socket: &UdpSocket, addr: SocketAddr, msg: &DiscoveryMessage) -> Result<(), Error> {
	let bytes = msg.encode()?;
	socket.send_to(&bytes, addr).await?;
	Ok(())
}
