//! Conversation and channel configuration types.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::tls::TlsClientConfig;
use crate::types::{
    ActivationType, DIAGNOSTIC_ACK_TIMEOUT, DOIP_CTRL_TIMEOUT, DOIP_PORT, LogicalAddress,
    P2_CLIENT_MAX, P2_STAR_CLIENT_MAX, ROUTING_ACTIVATION_TIMEOUT,
};

/// Default maximum UDP datagram size.
pub const DEFAULT_MAX_DATAGRAM_SIZE: usize = 65535;

/// Default receive buffer size for diagnostic responses.
pub const DEFAULT_RX_BUFFER_SIZE: usize = 4096;

/// Default logical address of the tester.
pub const DEFAULT_TESTER_ADDRESS: LogicalAddress = LogicalAddress(0x0E80);

/// Default interval at which receive threads check for shutdown.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Retry and timing policy of vehicle identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentificationConfig {
    /// Number of resends after the first attempt times out.
    pub max_retries: u32,
    /// Time to wait for a response to each attempt.
    pub per_attempt_timeout: Duration,
}

impl Default for IdentificationConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            per_attempt_timeout: DOIP_CTRL_TIMEOUT,
        }
    }
}

impl IdentificationConfig {
    /// Create a policy with the given retries and per-attempt timeout.
    pub fn new(max_retries: u32, per_attempt_timeout: Duration) -> Self {
        Self {
            max_retries,
            per_attempt_timeout,
        }
    }

    /// Check if another attempt may be sent after `attempt` (0-indexed) timed out.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// Upper bound of a whole exchange without a response.
    pub fn total_timeout(&self) -> Duration {
        self.per_attempt_timeout * (self.max_retries + 1)
    }
}

/// Configuration of a vehicle discovery conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VdConversationConfig {
    /// Unique conversation name.
    pub name: String,
    /// Local address the UDP socket binds to.
    pub local_addr: SocketAddr,
    /// Destination of discovery broadcasts and unaddressed identification requests.
    pub broadcast_addr: IpAddr,
    /// Destination UDP port.
    pub port: u16,
    /// Default discovery collection window.
    pub discovery_window: Duration,
    /// Identification retry policy.
    pub identification: IdentificationConfig,
    /// Maximum datagram size accepted by the receive path.
    pub max_datagram_size: usize,
    /// Receive thread shutdown polling interval.
    pub poll_interval: Duration,
}

impl Default for VdConversationConfig {
    fn default() -> Self {
        Self {
            name: "VehicleDiscovery".to_string(),
            local_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            broadcast_addr: IpAddr::V4(Ipv4Addr::BROADCAST),
            port: DOIP_PORT,
            discovery_window: DOIP_CTRL_TIMEOUT,
            identification: IdentificationConfig::default(),
            max_datagram_size: DEFAULT_MAX_DATAGRAM_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl VdConversationConfig {
    /// Create a configuration with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the local bind address.
    pub fn with_local_addr(mut self, addr: SocketAddr) -> Self {
        self.local_addr = addr;
        self
    }

    /// Set the broadcast address.
    pub fn with_broadcast_addr(mut self, addr: IpAddr) -> Self {
        self.broadcast_addr = addr;
        self
    }

    /// Set the destination port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the default discovery window.
    pub fn with_discovery_window(mut self, window: Duration) -> Self {
        self.discovery_window = window;
        self
    }

    /// Set the identification retry policy.
    pub fn with_identification(mut self, config: IdentificationConfig) -> Self {
        self.identification = config;
        self
    }

    /// Set the receive thread polling interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Socket address discovery broadcasts are sent to.
    pub fn broadcast_target(&self) -> SocketAddr {
        SocketAddr::new(self.broadcast_addr, self.port)
    }
}

/// Stream channel timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpChannelConfig {
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// TLS handshake timeout.
    pub handshake_timeout: Duration,
    /// Write timeout.
    pub write_timeout: Option<Duration>,
    /// Receive thread shutdown polling interval.
    pub poll_interval: Duration,
}

impl Default for TcpChannelConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(5),
            write_timeout: Some(Duration::from_secs(5)),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl TcpChannelConfig {
    /// Set the connection timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the TLS handshake timeout.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the write timeout.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }

    /// Set the receive thread polling interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Configuration of a diagnostic conversation.
#[derive(Debug, Clone)]
pub struct DmConversationConfig {
    /// Unique conversation name.
    pub name: String,
    /// Logical address of this tester.
    pub source_address: LogicalAddress,
    /// Destination TCP port.
    pub port: u16,
    /// Largest diagnostic response accepted.
    pub rx_buffer_size: usize,
    /// Time to wait for the first response after the acknowledgement.
    pub p2_client_max: Duration,
    /// Time to wait after a response-pending answer.
    pub p2_star_client_max: Duration,
    /// Time to wait for the routing activation response.
    pub routing_activation_timeout: Duration,
    /// Time to wait for the diagnostic message acknowledgement.
    pub ack_timeout: Duration,
    /// Routing activation type requested on connect.
    pub activation_type: ActivationType,
    /// Stream channel timeouts.
    pub channel: TcpChannelConfig,
    /// TLS settings; plain TCP when `None`.
    pub tls: Option<TlsClientConfig>,
}

impl Default for DmConversationConfig {
    fn default() -> Self {
        Self {
            name: "DiagTester".to_string(),
            source_address: DEFAULT_TESTER_ADDRESS,
            port: DOIP_PORT,
            rx_buffer_size: DEFAULT_RX_BUFFER_SIZE,
            p2_client_max: P2_CLIENT_MAX,
            p2_star_client_max: P2_STAR_CLIENT_MAX,
            routing_activation_timeout: ROUTING_ACTIVATION_TIMEOUT,
            ack_timeout: DIAGNOSTIC_ACK_TIMEOUT,
            activation_type: ActivationType::Default,
            channel: TcpChannelConfig::default(),
            tls: None,
        }
    }
}

impl DmConversationConfig {
    /// Create a configuration with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the tester logical address.
    pub fn with_source_address(mut self, address: LogicalAddress) -> Self {
        self.source_address = address;
        self
    }

    /// Set the destination port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the receive buffer size.
    pub fn with_rx_buffer_size(mut self, size: usize) -> Self {
        self.rx_buffer_size = size;
        self
    }

    /// Set P2 and P2* client maximum.
    pub fn with_p2(mut self, p2: Duration, p2_star: Duration) -> Self {
        self.p2_client_max = p2;
        self.p2_star_client_max = p2_star;
        self
    }

    /// Set the acknowledgement timeout.
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Set the routing activation timeout.
    pub fn with_routing_activation_timeout(mut self, timeout: Duration) -> Self {
        self.routing_activation_timeout = timeout;
        self
    }

    /// Set the routing activation type.
    pub fn with_activation_type(mut self, activation_type: ActivationType) -> Self {
        self.activation_type = activation_type;
        self
    }

    /// Set the stream channel timeouts.
    pub fn with_channel(mut self, channel: TcpChannelConfig) -> Self {
        self.channel = channel;
        self
    }

    /// Secure the channel with TLS.
    pub fn with_tls(mut self, tls: TlsClientConfig) -> Self {
        self.tls = Some(tls);
        self
    }
}
