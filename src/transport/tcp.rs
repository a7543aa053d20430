//! TCP channel for diagnostic communication, optionally secured with TLS.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use rustls_pki_types::ServerName;
use tracing::{debug, trace, warn};

use crate::codec::{FrameReader, write_frame};
use crate::config::TcpChannelConfig;
use crate::error::{DoipError, Result};
use crate::frame::{DoipFrame, FrameCodec};
use crate::tls::{self, CipherSuite, ClientTlsStream, TlsClientConfig};
use crate::transport::{ChannelEvent, ChannelState, ChannelStats, EventSink, FrameSink, InboundFrame};

/// Byte stream underneath a channel.
enum DiagStream {
    Plain(TcpStream),
    Tls(Box<ClientTlsStream>),
}

impl Read for DiagStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            DiagStream::Plain(s) => s.read(buf),
            DiagStream::Tls(s) => s.read(buf),
        }
    }
}

impl Write for DiagStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            DiagStream::Plain(s) => s.write(buf),
            DiagStream::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            DiagStream::Plain(s) => s.flush(),
            DiagStream::Tls(s) => s.flush(),
        }
    }
}

struct Shared {
    stream: Mutex<DiagStream>,
    state: Mutex<ChannelState>,
    stats: Mutex<ChannelStats>,
    running: AtomicBool,
}

/// A DoIP TCP channel.
///
/// Owns a connected stream and a receive thread that reassembles frames
/// from the byte stream and hands them to the event sink. Writes and reads
/// share the stream under a lock; the receive thread only holds it for one
/// read of at most the configured poll interval.
pub struct TcpChannel {
    shared: Arc<Shared>,
    control: TcpStream,
    peer_addr: SocketAddr,
    secure: bool,
    negotiated: Option<CipherSuite>,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

impl TcpChannel {
    /// Connect to `addr`, run the TLS handshake when `tls` is given, and
    /// start receiving.
    ///
    /// Frames announcing a payload larger than `max_payload` are skipped by
    /// the receive path.
    pub fn connect(
        addr: SocketAddr,
        config: &TcpChannelConfig,
        tls: Option<&TlsClientConfig>,
        max_payload: usize,
        sink: EventSink,
    ) -> Result<Self> {
        debug!(%addr, tls = tls.is_some(), "Connecting TCP channel");
        let stream = TcpStream::connect_timeout(&addr, config.connect_timeout)
            .map_err(|e| DoipError::from_connect(e, addr))?;
        stream.set_nodelay(true)?;
        stream.set_write_timeout(config.write_timeout)?;
        let control = stream.try_clone()?;

        let (stream, negotiated) = match tls {
            None => (DiagStream::Plain(stream), None),
            Some(tls_config) => {
                let client_config = tls_config.build()?;
                let server_name = match &tls_config.server_name {
                    Some(name) => ServerName::try_from(name.clone()).map_err(|e| {
                        DoipError::invalid_parameter(format!("invalid server name {name}: {e}"))
                    })?,
                    None => ServerName::from(addr.ip()),
                };
                let session =
                    tls::client_handshake(stream, client_config, server_name, config.handshake_timeout)?;
                let suite = session
                    .conn
                    .negotiated_cipher_suite()
                    .and_then(CipherSuite::from_rustls);
                (DiagStream::Tls(Box::new(session)), suite)
            }
        };
        let secure = matches!(stream, DiagStream::Tls(_));
        control.set_read_timeout(Some(config.poll_interval))?;

        let mut stats = ChannelStats::default();
        stats.record_connect();
        let shared = Arc::new(Shared {
            stream: Mutex::new(stream),
            state: Mutex::new(ChannelState::Connected),
            stats: Mutex::new(stats),
            running: AtomicBool::new(true),
        });

        let receiver = {
            let shared = Arc::clone(&shared);
            let codec = FrameCodec::new().with_max_payload_size(max_payload);
            thread::Builder::new()
                .name(format!("doip-tcp-rx-{}", addr.port()))
                .spawn(move || receive_loop(&shared, addr, codec, &sink))?
        };

        debug!(%addr, suite = ?negotiated, "TCP channel connected");
        Ok(Self {
            shared,
            control,
            peer_addr: addr,
            secure,
            negotiated,
            receiver: Mutex::new(Some(receiver)),
        })
    }

    /// Get the peer address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Suite agreed on by the TLS handshake; `None` for plain TCP.
    pub fn negotiated_cipher_suite(&self) -> Option<CipherSuite> {
        self.negotiated
    }

    /// Check if the channel is secured with TLS.
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Get the current state.
    pub fn state(&self) -> ChannelState {
        *self.shared.state.lock()
    }

    /// Check if frames can still be written.
    pub fn is_open(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Get a snapshot of the traffic statistics.
    pub fn stats(&self) -> ChannelStats {
        self.shared.stats.lock().clone()
    }

    /// Shut the socket down and stop the receive thread. Idempotent.
    ///
    /// Safe to call from the event sink; the receive thread is not joined
    /// in that case.
    pub fn close(&self) {
        let was_running = self.shared.running.swap(false, Ordering::AcqRel);
        if was_running {
            let _ = self.control.shutdown(Shutdown::Both);
            *self.shared.state.lock() = ChannelState::Closed;
            self.shared.stats.lock().record_close();
        }
        if let Some(handle) = self.receiver.lock().take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
            debug!(peer = %self.peer_addr, "TCP channel closed");
        }
    }
}

impl FrameSink for TcpChannel {
    fn send_frame(&self, frame: &DoipFrame) -> Result<()> {
        if !self.is_open() {
            return Err(DoipError::SocketClosed);
        }
        {
            let mut stream = self.shared.stream.lock();
            write_frame(&mut *stream, frame)?;
            stream.flush()?;
        }
        self.shared.stats.lock().record_send(frame.total_size());
        trace!(peer = %self.peer_addr, payload_type = ?frame.payload_type(), "TCP frame sent");
        Ok(())
    }
}

impl Drop for TcpChannel {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for TcpChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpChannel")
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state())
            .field("negotiated", &self.negotiated)
            .finish()
    }
}

fn receive_loop(shared: &Shared, peer: SocketAddr, codec: FrameCodec, sink: &EventSink) {
    let mut reader = FrameReader::with_codec(codec);
    let mut buf = [0u8; 4096];

    while shared.running.load(Ordering::Acquire) {
        let read = shared.stream.lock().read(&mut buf);
        match read {
            Ok(0) => {
                debug!(%peer, "TCP peer closed the connection");
                break;
            }
            Ok(n) => {
                shared.stats.lock().record_bytes(n);
                reader.feed(&buf[..n]);
                loop {
                    match reader.try_parse() {
                        Ok(Some(frame)) => {
                            shared.stats.lock().record_receive();
                            trace!(%peer, payload_type = ?frame.payload_type(), "TCP frame received");
                            sink(ChannelEvent::Frame(InboundFrame { frame, source: peer }));
                        }
                        Ok(None) => break,
                        Err(e) => {
                            shared.stats.lock().record_discard();
                            debug!(%peer, error = %e, "Discarding undecodable frame");
                        }
                    }
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) => {}
            Err(e) => {
                if shared.running.load(Ordering::Acquire) {
                    warn!(%peer, error = %e, "TCP receive failed");
                }
                break;
            }
        }
    }

    if shared.running.swap(false, Ordering::AcqRel) {
        *shared.state.lock() = ChannelState::Closed;
        shared.stats.lock().record_close();
        sink(ChannelEvent::Closed);
    }
}
