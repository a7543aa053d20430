//! Simulated DoIP entities shared by the integration tests.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use doip_client_rs::codec::{read_frame, write_frame};
use doip_client_rs::payload::{
    DiagnosticMessage, DiagnosticMessageAck, RoutingActivationRequest, RoutingActivationResponse,
};
use doip_client_rs::types::RoutingActivationCode;
use doip_client_rs::{DoipFrame, EntityId, FrameCodec, LogicalAddress, PayloadType, VehicleAddrInfoResponse};
use tracing_subscriber::EnvFilter;

pub const TESTER: LogicalAddress = LogicalAddress(0x0E80);
pub const ECU: LogicalAddress = LogicalAddress(0x1001);

/// Longest a simulated entity waits for the tester.
pub const ENTITY_TIMEOUT: Duration = Duration::from_secs(5);

/// Install a test subscriber honouring `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Announcement payload for `vin`, padded with '0' to 17 characters.
pub fn announcement(vin: &str, logical_address: LogicalAddress, eid: [u8; 6]) -> Bytes {
    let padded = format!("{vin:0<17}");
    VehicleAddrInfoResponse {
        ip_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        logical_address,
        vin: padded.parse().unwrap(),
        eid: EntityId(eid),
        gid: EntityId([0; 6]),
        further_action: 0,
        sync_status: None,
    }
    .to_payload()
}

/// Reply to `to` with an announcement.
pub fn announce(socket: &UdpSocket, to: SocketAddr, vin: &str, logical_address: LogicalAddress) {
    let frame = DoipFrame::new(
        PayloadType::VehicleAnnouncementResponse,
        announcement(vin, logical_address, [0x00, 0x1A, 0x2B, 0x3C, 0x4D, 0x5E]),
    )
    .unwrap();
    socket.send_to(&frame.to_bytes(), to).unwrap();
}

/// Receive one request datagram.
pub fn recv_request(socket: &UdpSocket) -> (DoipFrame, SocketAddr) {
    let mut buf = [0u8; 256];
    let (len, from) = socket.recv_from(&mut buf).unwrap();
    (DoipFrame::from_bytes(&buf[..len]).unwrap(), from)
}

/// Bind a UDP entity and run `script` on it in a thread.
pub fn spawn_udp_entity<F>(script: F) -> (u16, JoinHandle<()>)
where
    F: FnOnce(UdpSocket) + Send + 'static,
{
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket.set_read_timeout(Some(ENTITY_TIMEOUT)).unwrap();
    let port = socket.local_addr().unwrap().port();
    (port, thread::spawn(move || script(socket)))
}

/// Accept one TCP connection and run `script` on it in a thread.
pub fn spawn_tcp_entity<F>(script: F) -> (u16, JoinHandle<()>)
where
    F: FnOnce(TcpStream) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        stream.set_read_timeout(Some(ENTITY_TIMEOUT)).unwrap();
        script(stream);
    });
    (port, handle)
}

pub fn read<S: Read>(stream: &mut S) -> DoipFrame {
    read_frame(stream, &FrameCodec::new()).unwrap()
}

pub fn send<S: Write>(stream: &mut S, payload_type: PayloadType, payload: impl Into<Bytes>) {
    write_frame(stream, &DoipFrame::new(payload_type, payload).unwrap()).unwrap();
    stream.flush().unwrap();
}

/// Answer the routing activation request with `code`.
pub fn answer_routing<S: Read + Write>(stream: &mut S, code: RoutingActivationCode) {
    let frame = read(stream);
    assert_eq!(frame.payload_type(), PayloadType::RoutingActivationRequest);
    let request = RoutingActivationRequest::decode(&frame.payload).unwrap();
    let response = RoutingActivationResponse {
        client_address: request.source_address,
        entity_address: ECU,
        code,
        oem: None,
    };
    send(stream, PayloadType::RoutingActivationResponse, response.to_payload());
}

/// Read a diagnostic request addressed to the ECU.
pub fn read_request<S: Read>(stream: &mut S) -> DiagnosticMessage {
    let frame = read(stream);
    assert_eq!(frame.payload_type(), PayloadType::DiagnosticMessage);
    let message = DiagnosticMessage::decode(&frame.payload).unwrap();
    assert_eq!(message.target_address, ECU);
    message
}

/// Send a positive (`code` 0) or negative acknowledgement.
pub fn acknowledge<S: Write>(stream: &mut S, negative: Option<u8>) {
    let ack = DiagnosticMessageAck {
        source_address: ECU,
        target_address: TESTER,
        code: negative.unwrap_or(0x00),
        previous_message: Bytes::new(),
    };
    let payload_type = match negative {
        Some(_) => PayloadType::DiagnosticMessageNegativeAck,
        None => PayloadType::DiagnosticMessagePositiveAck,
    };
    send(stream, payload_type, ack.to_payload());
}

/// Send a diagnostic response from the ECU to the tester.
pub fn respond<S: Write>(stream: &mut S, user_data: &[u8]) {
    let message = DiagnosticMessage {
        source_address: ECU,
        target_address: TESTER,
        user_data: Bytes::copy_from_slice(user_data),
    };
    send(stream, PayloadType::DiagnosticMessage, message.to_payload());
}

/// Block until the tester closes the connection.
pub fn wait_for_close<S: Read>(stream: &mut S) {
    let codec = FrameCodec::new();
    while read_frame(stream, &codec).is_ok() {}
}
