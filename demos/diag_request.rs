//! Diagnostic request example.
//!
//! This example connects to a diagnostic server, activates routing and
//! reads a few data identifiers over UDS.
//!
//! Run with: cargo run --example diag_request <server-ip> [logical-address] [ca.pem]
//! Passing a CA file switches the connection to TLS on port 3496.

use std::net::IpAddr;

use doip_client_rs::{
    DOIP_TLS_PORT, DmConversationConfig, DoipClient, DoipClientConfig, LogicalAddress,
    TlsClientConfig,
};

/// ReadDataByIdentifier requests: VIN, ECU serial number, software version.
const REQUESTS: [(&str, [u8; 3]); 3] = [
    ("VIN", [0x22, 0xF1, 0x90]),
    ("ECU serial number", [0x22, 0xF1, 0x8C]),
    ("Software version", [0x22, 0xF1, 0x95]),
];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("doip_client_rs=info".parse()?),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let host: IpAddr = args
        .next()
        .ok_or("usage: diag_request <server-ip> [logical-address] [ca.pem]")?
        .parse()?;
    let target = match args.next() {
        Some(addr) => LogicalAddress(u16::from_str_radix(addr.trim_start_matches("0x"), 16)?),
        None => LogicalAddress(0x1001),
    };

    let mut config = DmConversationConfig::new("ecu");
    if let Some(ca) = args.next() {
        config = config
            .with_port(DOIP_TLS_PORT)
            .with_tls(TlsClientConfig::from_ca_file(ca)?);
    }

    let client = DoipClient::new(DoipClientConfig::default());
    let id = client.register_diagnostic_conversation(config)?;

    println!("Connecting to {host} (target {target})...");
    client.connect_to_diag_server(id, target, host)?;
    if let Some(suite) = client.dm_conversation(id)?.negotiated_cipher_suite() {
        println!("TLS cipher suite: {suite}");
    }
    println!("Routing activated!");

    for (name, request) in REQUESTS {
        match client.send_diagnostic_request(id, &request) {
            Ok(response) if response.first() == Some(&0x62) => {
                println!("{name}: {:?}", String::from_utf8_lossy(response.get(3..).unwrap_or_default()));
            }
            Ok(response) => println!("{name}: negative response {response:02X?}"),
            Err(e) => println!("{name}: {e}"),
        }
    }

    client.disconnect_from_diag_server(id)?;
    client.shutdown();
    println!("\nDone!");
    Ok(())
}
