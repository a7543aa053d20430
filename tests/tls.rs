//! Diagnostic sessions over TLS against a simulated entity.

mod common;

use std::net::TcpListener;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use common::{ECU, ENTITY_TIMEOUT, acknowledge, answer_routing, init_tracing, read_request, respond, wait_for_close};
use doip_client_rs::tls::{ServerTlsStream, server_handshake};
use doip_client_rs::types::RoutingActivationCode;
use doip_client_rs::{
    CipherSuite, DmConversation, DmConversationConfig, DoipError, ErrorCategory, TlsClientConfig,
    TlsServerConfig,
};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

struct Identity {
    cert: CertificateDer<'static>,
    key: PrivateKeyDer<'static>,
}

fn generate_identity() -> Identity {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    Identity {
        cert: certified.cert.der().clone(),
        key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der())),
    }
}

/// Accept one connection, run the server handshake, then `script`.
///
/// Returns the suite the server negotiated, or the handshake error.
fn spawn_tls_entity<F>(
    identity: &Identity,
    suites: Vec<CipherSuite>,
    script: F,
) -> (u16, JoinHandle<Result<Option<CipherSuite>, DoipError>>)
where
    F: FnOnce(&mut ServerTlsStream) + Send + 'static,
{
    let config = TlsServerConfig::new(vec![identity.cert.clone()], identity.key.clone_key())
        .with_cipher_suites(suites)
        .build()
        .unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        stream.set_read_timeout(Some(ENTITY_TIMEOUT)).unwrap();
        let mut tls = server_handshake(stream, config, Duration::from_secs(2))?;
        let suite = tls.conn.negotiated_cipher_suite().and_then(CipherSuite::from_rustls);
        script(&mut tls);
        Ok(suite)
    });
    (port, handle)
}

fn client_config(identity: &Identity, port: u16, suites: Vec<CipherSuite>) -> DmConversationConfig {
    DmConversationConfig::new("secure-ecu").with_port(port).with_tls(
        TlsClientConfig::new(vec![identity.cert.clone()])
            .with_server_name("localhost")
            .with_cipher_suites(suites),
    )
}

fn serve_one_request(tls: &mut ServerTlsStream) {
    answer_routing(tls, RoutingActivationCode::Success);
    let request = read_request(tls);
    assert_eq!(request.user_data.as_ref(), &[0x22, 0xF1, 0x86]);
    acknowledge(tls, None);
    respond(tls, &[0x62, 0xF1, 0x86, 0x01]);
    wait_for_close(tls);
}

#[test]
fn test_tls_session_uses_client_preference() {
    init_tracing();
    let identity = generate_identity();
    let (port, ecu) = spawn_tls_entity(
        &identity,
        vec![CipherSuite::Tls13Aes128GcmSha256, CipherSuite::Tls13Aes256GcmSha384],
        serve_one_request,
    );

    let config = client_config(
        &identity,
        port,
        vec![
            CipherSuite::Tls13Chacha20Poly1305Sha256,
            CipherSuite::Tls13Aes256GcmSha384,
            CipherSuite::Tls13Aes128GcmSha256,
        ],
    );
    let conversation = DmConversation::start(config).unwrap();
    conversation
        .connect_to_diag_server(ECU, "127.0.0.1".parse().unwrap())
        .unwrap();
    assert_eq!(
        conversation.negotiated_cipher_suite(),
        Some(CipherSuite::Tls13Aes256GcmSha384)
    );

    let response = conversation.send_diagnostic_request(&[0x22, 0xF1, 0x86]).unwrap();
    assert_eq!(response.as_ref(), &[0x62, 0xF1, 0x86, 0x01]);

    conversation.disconnect_from_diag_server().unwrap();
    let server_suite = ecu.join().unwrap().unwrap();
    assert_eq!(server_suite, Some(CipherSuite::Tls13Aes256GcmSha384));
}

#[test]
fn test_tls12_ecdsa_session() {
    let identity = generate_identity();
    let suite = CipherSuite::EcdheEcdsaAes128GcmSha256;
    let (port, ecu) = spawn_tls_entity(&identity, vec![suite], serve_one_request);

    let conversation = DmConversation::start(client_config(&identity, port, vec![suite])).unwrap();
    conversation
        .connect_to_diag_server(ECU, "127.0.0.1".parse().unwrap())
        .unwrap();
    assert_eq!(conversation.negotiated_cipher_suite(), Some(suite));

    let response = conversation.send_diagnostic_request(&[0x22, 0xF1, 0x86]).unwrap();
    assert_eq!(response.as_ref(), &[0x62, 0xF1, 0x86, 0x01]);

    conversation.disconnect_from_diag_server().unwrap();
    assert_eq!(ecu.join().unwrap().unwrap(), Some(suite));
}

#[test]
fn test_no_common_cipher_suite() {
    let identity = generate_identity();
    let (port, ecu) = spawn_tls_entity(
        &identity,
        vec![CipherSuite::Tls13Aes256GcmSha384],
        |_| unreachable!("handshake must fail"),
    );

    let config = client_config(&identity, port, vec![CipherSuite::Tls13Aes128GcmSha256]);
    let conversation = DmConversation::start(config).unwrap();
    let error = conversation
        .connect_to_diag_server(ECU, "127.0.0.1".parse().unwrap())
        .unwrap_err();

    assert!(matches!(error, DoipError::HandshakeFailure(_)), "got {error:?}");
    assert_eq!(error.category(), ErrorCategory::Protocol);
    assert!(!conversation.is_connected());
    assert!(ecu.join().unwrap().is_err());
}

#[test]
fn test_untrusted_certificate() {
    let identity = generate_identity();
    let other = generate_identity();
    let (port, ecu) = spawn_tls_entity(&identity, vec![CipherSuite::Tls13Aes128GcmSha256], |_| {
        unreachable!("handshake must fail")
    });

    let config = client_config(&other, port, vec![CipherSuite::Tls13Aes128GcmSha256]);
    let conversation = DmConversation::start(config).unwrap();
    let result = conversation.connect_to_diag_server(ECU, "127.0.0.1".parse().unwrap());

    assert!(matches!(result, Err(DoipError::HandshakeFailure(_))));
    assert!(ecu.join().unwrap().is_err());
}

#[test]
fn test_backend_cannot_provide_suites() {
    let identity = generate_identity();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let config = client_config(
        &identity,
        port,
        vec![CipherSuite::Tls13Aes128CcmSha256, CipherSuite::EcdheEcdsaAes256CbcSha384],
    );
    let conversation = DmConversation::start(config).unwrap();
    let result = conversation.connect_to_diag_server(ECU, "127.0.0.1".parse().unwrap());

    assert!(matches!(result, Err(DoipError::UnsupportedCipherSuite(_))));
    assert!(!conversation.is_connected());
    drop(listener);
}
