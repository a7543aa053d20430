//! UDP channel for vehicle discovery and identification.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::config::VdConversationConfig;
use crate::error::Result;
use crate::frame::{DoipFrame, FrameCodec};
use crate::transport::{ChannelEvent, DatagramSink, EventSink, InboundFrame};

/// A DoIP UDP channel.
///
/// Sends broadcast and unicast request frames and delivers decoded inbound
/// datagrams to its event sink from a dedicated receive thread.
pub struct UdpChannel {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

impl UdpChannel {
    /// Bind the socket described by `config` and start receiving.
    pub fn open(config: &VdConversationConfig, sink: EventSink) -> Result<Self> {
        let socket = UdpSocket::bind(config.local_addr)?;
        socket.set_broadcast(true)?;
        socket.set_read_timeout(Some(config.poll_interval))?;
        let local_addr = socket.local_addr()?;

        let socket = Arc::new(socket);
        let running = Arc::new(AtomicBool::new(true));

        let receiver = {
            let socket = Arc::clone(&socket);
            let running = Arc::clone(&running);
            let max_datagram_size = config.max_datagram_size;
            thread::Builder::new()
                .name(format!("doip-udp-rx-{}", local_addr.port()))
                .spawn(move || receive_loop(&socket, &running, &sink, max_datagram_size))?
        };

        debug!(%local_addr, "UDP channel open");
        Ok(Self {
            socket,
            local_addr,
            running,
            receiver: Mutex::new(Some(receiver)),
        })
    }

    /// Get the local address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Check if the receive thread is still running.
    pub fn is_open(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop the receive thread and release the socket. Idempotent.
    pub fn close(&self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.receiver.lock().take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
            debug!(local_addr = %self.local_addr, "UDP channel closed");
        }
    }
}

impl DatagramSink for UdpChannel {
    fn send_to(&self, frame: &DoipFrame, target: SocketAddr) -> Result<()> {
        let data = frame.to_bytes();
        self.socket.send_to(&data, target)?;
        trace!(%target, payload_type = ?frame.payload_type(), len = data.len(), "UDP frame sent");
        Ok(())
    }
}

impl Drop for UdpChannel {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for UdpChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpChannel")
            .field("local_addr", &self.local_addr)
            .field("open", &self.is_open())
            .finish()
    }
}

fn receive_loop(socket: &UdpSocket, running: &AtomicBool, sink: &EventSink, max_datagram_size: usize) {
    let codec = FrameCodec::default();
    let mut buf = vec![0u8; max_datagram_size];

    while running.load(Ordering::Acquire) {
        match socket.recv_from(&mut buf) {
            Ok((len, source)) => match codec.decode(&buf[..len]) {
                Ok(frame) => {
                    trace!(%source, payload_type = ?frame.payload_type(), "UDP frame received");
                    sink(ChannelEvent::Frame(InboundFrame { frame, source }));
                }
                Err(e) => debug!(%source, error = %e, "Discarding undecodable datagram"),
            },
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock
                        | io::ErrorKind::TimedOut
                        | io::ErrorKind::Interrupted
                        | io::ErrorKind::ConnectionReset
                ) => {}
            Err(e) => {
                if running.swap(false, Ordering::AcqRel) {
                    warn!(error = %e, "UDP receive failed, closing channel");
                    sink(ChannelEvent::Closed);
                }
                break;
            }
        }
    }
}
