//! TLS session setup for secured diagnostic channels.
//!
//! The handshake itself is done by `rustls`. This module restricts it to the
//! configured cipher suites and maps its failures onto [`DoipError`].
//!
//! # Example
//!
//! ```no_run
//! use doip_client_rs::tls::{CipherSuite, TlsClientConfig};
//!
//! let tls = TlsClientConfig::from_ca_file("ca.pem")?
//!     .with_cipher_suites([
//!         CipherSuite::Tls13Aes256GcmSha384,
//!         CipherSuite::Tls13Aes128GcmSha256,
//!     ])
//!     .with_server_name("gateway.vehicle");
//! # Ok::<(), doip_client_rs::DoipError>(())
//! ```

mod cipher;
mod config;

use std::io;
use std::net::TcpStream;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rustls::{ClientConnection, ServerConnection, StreamOwned};
use rustls_pki_types::ServerName;
use tracing::debug;

use crate::error::{DoipError, Result};

pub use cipher::{CipherSuite, REGISTRY, TlsVersion, negotiate};
pub use config::{TlsClientConfig, TlsServerConfig};

/// Client side TLS stream.
pub type ClientTlsStream = StreamOwned<ClientConnection, TcpStream>;

/// Server side TLS stream.
pub type ServerTlsStream = StreamOwned<ServerConnection, TcpStream>;

/// Run the client handshake on a connected stream.
pub fn client_handshake(
    stream: TcpStream,
    config: Arc<rustls::ClientConfig>,
    server_name: ServerName<'static>,
    timeout: Duration,
) -> Result<ClientTlsStream> {
    let conn = ClientConnection::new(config, server_name)
        .map_err(|e| DoipError::HandshakeFailure(e.to_string()))?;
    let mut tls = StreamOwned::new(conn, stream);
    drive_handshake(&mut tls.conn, &mut tls.sock, timeout)?;

    debug!(
        suite = ?tls.conn.negotiated_cipher_suite().and_then(CipherSuite::from_rustls),
        "TLS client handshake complete"
    );
    Ok(tls)
}

/// Run the server handshake on an accepted stream.
pub fn server_handshake(
    stream: TcpStream,
    config: Arc<rustls::ServerConfig>,
    timeout: Duration,
) -> Result<ServerTlsStream> {
    let conn =
        ServerConnection::new(config).map_err(|e| DoipError::HandshakeFailure(e.to_string()))?;
    let mut tls = StreamOwned::new(conn, stream);
    drive_handshake(&mut tls.conn, &mut tls.sock, timeout)?;
    Ok(tls)
}

/// Connection types that can be driven through a handshake.
trait Handshake {
    fn handshaking(&self) -> bool;
    fn step(&mut self, sock: &mut TcpStream) -> io::Result<()>;
}

impl Handshake for ClientConnection {
    fn handshaking(&self) -> bool {
        self.is_handshaking()
    }

    fn step(&mut self, sock: &mut TcpStream) -> io::Result<()> {
        self.complete_io(sock).map(|_| ())
    }
}

impl Handshake for ServerConnection {
    fn handshaking(&self) -> bool {
        self.is_handshaking()
    }

    fn step(&mut self, sock: &mut TcpStream) -> io::Result<()> {
        self.complete_io(sock).map(|_| ())
    }
}

fn drive_handshake(conn: &mut impl Handshake, sock: &mut TcpStream, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    let restore_read = sock.read_timeout()?;
    let restore_write = sock.write_timeout()?;

    while conn.handshaking() {
        let remaining = deadline
            .checked_duration_since(Instant::now())
            .filter(|d| !d.is_zero())
            .ok_or(DoipError::HandshakeTimeout)?;
        sock.set_read_timeout(Some(remaining))?;
        sock.set_write_timeout(Some(remaining))?;

        if let Err(e) = conn.step(sock) {
            return Err(match e.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => DoipError::HandshakeTimeout,
                io::ErrorKind::UnexpectedEof => {
                    DoipError::HandshakeFailure("connection closed during handshake".to_string())
                }
                _ => DoipError::HandshakeFailure(e.to_string()),
            });
        }
    }

    sock.set_read_timeout(restore_read)?;
    sock.set_write_timeout(restore_write)?;
    Ok(())
}
