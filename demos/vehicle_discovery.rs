//! Vehicle discovery example.
//!
//! This example broadcasts a vehicle identification request, prints every
//! entity that answers within the discovery window, then identifies the
//! first vehicle again by its VIN.
//!
//! Run with: cargo run --example vehicle_discovery [broadcast-address]
//! Set RUST_LOG=doip_client_rs=debug to see the protocol traffic.

use std::net::IpAddr;
use std::time::Duration;

use doip_client_rs::{
    DoipClient, DoipClientConfig, IdentificationConfig, Preselection, VdConversationConfig,
    VehicleAddrInfoRequest,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("doip_client_rs=info".parse()?),
        )
        .init();

    let broadcast: IpAddr = match std::env::args().nth(1) {
        Some(addr) => addr.parse()?,
        None => "255.255.255.255".parse()?,
    };

    let config = DoipClientConfig::default().with_vehicle_discovery(
        VdConversationConfig::new("discovery")
            .with_broadcast_addr(broadcast)
            .with_identification(IdentificationConfig::new(2, Duration::from_millis(500))),
    );
    let client = DoipClient::new(config);
    client.initialize()?;

    // Example 1: Discover every entity on the network
    println!("--- Example 1: Discovery on {broadcast} ---");
    let vehicles = client.get_diagnostic_server_list(Duration::from_secs(2))?;
    if vehicles.is_empty() {
        println!("No vehicles answered.");
        return Ok(());
    }
    for vehicle in &vehicles {
        println!(
            "VIN {} at {} logical address {} EID {}{}",
            vehicle.vin,
            vehicle.ip_address,
            vehicle.logical_address,
            vehicle.eid,
            if vehicle.further_action_required() {
                " (further action required)"
            } else {
                ""
            }
        );
    }

    // Example 2: Identify the first vehicle by VIN, unicast
    println!("\n--- Example 2: Identification by VIN ---");
    let first = vehicles[0];
    let request =
        VehicleAddrInfoRequest::new(Preselection::Vin(first.vin)).with_host(first.ip_address);
    match client.send_vehicle_identification_request(&request) {
        Ok(vehicle) => println!("{} answered from {}", vehicle.vin, vehicle.ip_address),
        Err(e) => println!("Identification failed: {e}"),
    }

    client.shutdown();
    println!("\nDone!");
    Ok(())
}
