//! Vehicle discovery and identification against simulated entities.

mod common;

use std::thread;
use std::time::{Duration, Instant};

use common::{ECU, announce, init_tracing, recv_request, spawn_udp_entity};
use doip_client_rs::payload::Preselection;
use doip_client_rs::{
    DoipClient, DoipClientConfig, DoipError, IdentificationConfig, LogicalAddress, PayloadType,
    VdConversation, VdConversationConfig, VehicleAddrInfoRequest,
};

fn loopback(port: u16) -> VdConversationConfig {
    VdConversationConfig::new("discovery")
        .with_local_addr("127.0.0.1:0".parse().unwrap())
        .with_broadcast_addr("127.0.0.1".parse().unwrap())
        .with_port(port)
        .with_poll_interval(Duration::from_millis(10))
}

#[test]
fn test_discovery_through_client() {
    init_tracing();
    let (port, entity) = spawn_udp_entity(|socket| {
        let (request, from) = recv_request(&socket);
        assert_eq!(request.payload_type(), PayloadType::VehicleIdentificationRequest);
        assert_eq!(request.header.protocol_version, 0xFF);

        announce(&socket, from, "AAA", ECU);
        thread::sleep(Duration::from_millis(30));
        announce(&socket, from, "BBB", LogicalAddress(0x2001));
        thread::sleep(Duration::from_millis(30));
        announce(&socket, from, "AAA", ECU);
        // same VIN behind a second gateway is a separate entry
        announce(&socket, from, "AAA", LogicalAddress(0x1002));
    });

    let client = DoipClient::new(DoipClientConfig::default().with_vehicle_discovery(loopback(port)));
    client.initialize().unwrap();
    let vehicles = client.get_diagnostic_server_list(Duration::from_millis(300)).unwrap();
    entity.join().unwrap();

    let mut found: Vec<_> = vehicles
        .iter()
        .map(|v| (v.vin.to_string(), v.logical_address.0))
        .collect();
    found.sort();
    assert_eq!(
        found,
        vec![
            ("AAA00000000000000".to_string(), 0x1001),
            ("AAA00000000000000".to_string(), 0x1002),
            ("BBB00000000000000".to_string(), 0x2001),
        ]
    );
    assert!(vehicles.iter().all(|v| v.ip_address.is_loopback()));
    client.shutdown();
}

#[test]
fn test_identification_retries_until_match() {
    init_tracing();
    let (port, entity) = spawn_udp_entity(|socket| {
        let (first, from) = recv_request(&socket);
        assert_eq!(first.payload_type(), PayloadType::VehicleIdentificationRequestWithVin);
        // wrong vehicle answers the first attempt
        announce(&socket, from, "OTHER", LogicalAddress(0x3001));

        let (second, from) = recv_request(&socket);
        assert_eq!(second, first);
        announce(&socket, from, "WAUZZZ8V9KA123456", ECU);
    });

    let config = loopback(port).with_identification(IdentificationConfig::new(2, Duration::from_millis(150)));
    let conversation = VdConversation::start(config).unwrap();
    let request = VehicleAddrInfoRequest::by_vin("WAUZZZ8V9KA123456").unwrap();

    let started = Instant::now();
    let response = conversation.send_vehicle_identification_request(&request).unwrap();
    let elapsed = started.elapsed();
    entity.join().unwrap();

    assert_eq!(response.logical_address, ECU);
    assert_eq!(response.vin.to_string(), "WAUZZZ8V9KA123456");
    assert!(elapsed >= Duration::from_millis(150), "answered after {elapsed:?}");
}

#[test]
fn test_identification_by_eid_unicast() {
    let (port, entity) = spawn_udp_entity(|socket| {
        let (request, from) = recv_request(&socket);
        assert_eq!(
            Preselection::from_frame(&request).unwrap(),
            Preselection::Eid("00:1a:2b:3c:4d:5e".parse().unwrap())
        );
        announce(&socket, from, "EIDVEHICLE", LogicalAddress(0x4001));
    });

    // nothing listens on the broadcast address
    let config = loopback(port).with_broadcast_addr("127.0.0.2".parse().unwrap());
    let conversation = VdConversation::start(config).unwrap();
    let request = VehicleAddrInfoRequest::by_eid("00:1A:2B:3C:4D:5E")
        .unwrap()
        .with_host("127.0.0.1".parse().unwrap());
    let response = conversation.send_vehicle_identification_request(&request).unwrap();
    entity.join().unwrap();

    assert_eq!(response.logical_address.0, 0x4001);
}

#[test]
fn test_identification_gives_up() {
    let (port, entity) = spawn_udp_entity(|socket| {
        for _ in 0..2 {
            recv_request(&socket);
        }
    });

    let config = loopback(port).with_identification(IdentificationConfig::new(1, Duration::from_millis(100)));
    let conversation = VdConversation::start(config).unwrap();

    let started = Instant::now();
    let result = conversation.send_vehicle_identification_request(&VehicleAddrInfoRequest::default());
    entity.join().unwrap();

    assert!(matches!(result, Err(DoipError::NoResponse { attempts: 2 })));
    assert!(started.elapsed() >= Duration::from_millis(200));
}
