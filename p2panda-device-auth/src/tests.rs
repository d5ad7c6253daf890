// SPDX-License-Identifier: MIT OR Apache-2.0

use rstest::rstest;

use crate::crypto::KeyStore;
use crate::key_alias::KeyPurpose;
use crate::test_utils::{
    TEST_PIN, TestDevice, bind, run_handshake, setup_logging, start_client,
};
use crate::{
    AlgorithmMask, AuthError, EngineConfig, ErrorCode, MessageBody, OpCode, PeerMessage,
    ProtocolMessage, ProtocolType, Role, TaskStatus, UserType, Version, VersionStatus,
};

fn controller(seed: u8) -> TestDevice {
    TestDevice::new(b"controller", UserType::Controller, seed)
}

fn accessory(seed: u8) -> TestDevice {
    TestDevice::new(b"accessory", UserType::Accessory, seed)
}

fn with_algorithms(device: &[u8], user_type: UserType, seed: u8, mask: AlgorithmMask) -> TestDevice {
    TestDevice::with_config(device, user_type, seed, EngineConfig::with_algorithms(mask))
}

/// Protocol the server selected, taken from its first answer.
fn selected_protocol(message: &PeerMessage) -> ProtocolType {
    match &message.body {
        MessageBody::Protocol(message) => message.protocol_type(),
        body => panic!("expected protocol message, got {body:?}"),
    }
}

#[test]
fn authenticate_round_trip() {
    setup_logging();

    let client = with_algorithms(
        b"controller",
        UserType::Controller,
        1,
        AlgorithmMask::EC_PAKE_V2 | AlgorithmMask::ISO,
    );
    let server = accessory(2);
    bind(&client, &server, client.request(OpCode::Bind));

    // Client offers both protocols.
    let (client_task, offer) = start_client(&client, client.request(OpCode::Authenticate));
    let MessageBody::Candidates(candidates) = &offer.body else {
        panic!("expected candidates");
    };
    let offered: Vec<ProtocolType> = candidates.iter().map(ProtocolMessage::protocol_type).collect();
    assert_eq!(offered, vec![ProtocolType::PakeV2, ProtocolType::Iso]);

    let info = client.engine.task_info(client_task).unwrap();
    assert_eq!(info.version_info.status, VersionStatus::VersionConfirmed);
    assert_eq!(info.protocols, offered);

    // Server negotiates down to PAKE v2.
    let (server_task, output) = server
        .engine
        .create_task(Role::Server, server.request(OpCode::Authenticate), Some(&offer))
        .unwrap();
    assert_eq!(output.status, TaskStatus::Continue);
    let second = output.send_to_peer.unwrap();
    assert_eq!(selected_protocol(&second), ProtocolType::PakeV2);
    assert_eq!(
        second.version.unwrap().cur,
        Version::new(2, 0, AlgorithmMask::EC_PAKE_V2)
    );

    // Client prunes the ISO candidate and confirms the key.
    let output = client.engine.process_task(client_task, &second).unwrap();
    assert_eq!(output.status, TaskStatus::Continue);
    let info = client.engine.task_info(client_task).unwrap();
    assert_eq!(info.version_info.status, VersionStatus::VersionDecided);
    assert_eq!(info.protocols, vec![ProtocolType::PakeV2]);
    let third = output.send_to_peer.unwrap();

    // Server finishes after the third message.
    let output = server.engine.process_task(server_task, &third).unwrap();
    assert_eq!(output.status, TaskStatus::Finish);
    let server_key = output.session_key.unwrap();
    let fourth = output.send_to_peer.unwrap();

    let output = client.engine.process_task(client_task, &fourth).unwrap();
    assert_eq!(output.status, TaskStatus::Finish);
    assert!(output.send_to_peer.is_none());
    assert_eq!(output.session_key.unwrap(), server_key);

    assert_eq!(client.engine.live_tasks(), 0);
    assert_eq!(server.engine.live_tasks(), 0);
}

#[test]
fn mismatching_echoed_version() {
    let client = controller(1);
    let server = accessory(2);
    bind(&client, &server, client.request(OpCode::Bind));

    let (client_task, offer) = start_client(&client, client.request(OpCode::Authenticate));
    let (_, output) = server
        .engine
        .create_task(Role::Server, server.request(OpCode::Authenticate), Some(&offer))
        .unwrap();

    // Server claims a version negotiation could never have produced.
    let mut second = output.send_to_peer.unwrap();
    if let Some(version) = second.version.as_mut() {
        version.cur.major = 3;
    }

    let failure = client.engine.process_task(client_task, &second).unwrap_err();
    assert!(matches!(failure.error, AuthError::UnsupportedVersion));
    let report = failure.send_to_peer.unwrap();
    assert_eq!(
        report.body,
        MessageBody::Error(ErrorCode::UnsupportedVersion)
    );

    assert!(matches!(
        client.engine.process_task(client_task, &second),
        Err(failure) if matches!(failure.error, AuthError::TaskNotFound)
    ));
}

#[test]
fn diverging_version_after_decision() {
    let client = controller(1);
    let server = accessory(2);
    bind(&client, &server, client.request(OpCode::Bind));

    let (client_task, offer) = start_client(&client, client.request(OpCode::Authenticate));
    let (server_task, output) = server
        .engine
        .create_task(Role::Server, server.request(OpCode::Authenticate), Some(&offer))
        .unwrap();
    let output = client
        .engine
        .process_task(client_task, &output.send_to_peer.unwrap())
        .unwrap();

    let mut third = output.send_to_peer.unwrap();
    if let Some(version) = third.version.as_mut() {
        version.cur.patch = AlgorithmMask::ALL;
    }
    let failure = server.engine.process_task(server_task, &third).unwrap_err();
    assert!(matches!(failure.error, AuthError::UnsupportedVersion));
    assert_eq!(failure.protocol, Some(ProtocolType::PakeV2));
}

#[test]
fn peer_error_after_decision() {
    let client = controller(1);
    let server = accessory(2);
    bind(&client, &server, client.request(OpCode::Bind));

    let (client_task, offer) = start_client(&client, client.request(OpCode::Authenticate));
    let (_, output) = server
        .engine
        .create_task(Role::Server, server.request(OpCode::Authenticate), Some(&offer))
        .unwrap();
    let second = output.send_to_peer.unwrap();
    client.engine.process_task(client_task, &second).unwrap();

    let error = PeerMessage {
        op_code: OpCode::Authenticate,
        version: second.version,
        body: MessageBody::Error(ErrorCode::ConfirmationMismatch),
    };

    // One local failure and one message for the peer.
    let failure = client.engine.process_task(client_task, &error).unwrap_err();
    assert!(matches!(
        failure.error,
        AuthError::PeerReported(ErrorCode::ConfirmationMismatch)
    ));
    assert_eq!(failure.protocol, Some(ProtocolType::PakeV2));
    assert_eq!(failure.step, Some(3));
    assert!(failure.send_to_peer.unwrap().is_error());

    // Task is gone.
    let failure = client.engine.process_task(client_task, &error).unwrap_err();
    assert!(matches!(failure.error, AuthError::TaskNotFound));
    assert!(failure.send_to_peer.is_none());
}

#[test]
fn peer_error_before_decision_stays_local() {
    let server = accessory(2);
    let error = PeerMessage {
        op_code: OpCode::Authenticate,
        version: None,
        body: MessageBody::Error(ErrorCode::Internal),
    };

    let failure = server
        .engine
        .create_task(Role::Server, server.request(OpCode::Authenticate), Some(&error))
        .unwrap_err();
    assert!(matches!(
        failure.error,
        AuthError::PeerReported(ErrorCode::Internal)
    ));
    assert!(failure.send_to_peer.is_none());
    assert_eq!(server.engine.live_tasks(), 0);
}

#[test]
fn destroy_is_idempotent() {
    let client = controller(1);
    let (task_id, offer) = start_client(&client, client.request(OpCode::Authenticate));
    assert_eq!(client.engine.live_tasks(), 1);

    client.engine.destroy_task(task_id);
    client.engine.destroy_task(task_id);
    assert_eq!(client.engine.live_tasks(), 0);

    assert!(matches!(
        client.engine.task_info(task_id),
        Err(AuthError::TaskNotFound)
    ));
    let failure = client.engine.process_task(task_id, &offer).unwrap_err();
    assert!(matches!(failure.error, AuthError::TaskNotFound));
}

#[test]
fn replayed_message_is_ignored() {
    let client = controller(1);
    let server = accessory(2);
    bind(&client, &server, client.request(OpCode::Bind));

    let (client_task, offer) = start_client(&client, client.request(OpCode::Authenticate));
    let (server_task, output) = server
        .engine
        .create_task(Role::Server, server.request(OpCode::Authenticate), Some(&offer))
        .unwrap();
    let second = output.send_to_peer.unwrap();

    let output = client.engine.process_task(client_task, &second).unwrap();
    let third = output.send_to_peer.unwrap();

    let replay = client.engine.process_task(client_task, &second).unwrap();
    assert_eq!(replay.status, TaskStatus::IgnoreMessage);
    assert!(replay.send_to_peer.is_none());
    assert!(replay.session_key.is_none());

    // The handshake continues as if nothing happened.
    let output = server.engine.process_task(server_task, &third).unwrap();
    let server_key = output.session_key.unwrap();
    let output = client
        .engine
        .process_task(client_task, &output.send_to_peer.unwrap())
        .unwrap();
    assert_eq!(output.session_key.unwrap(), server_key);
}

#[rstest]
#[case(AlgorithmMask::EC_PAKE_V2, ProtocolType::PakeV2)]
#[case(AlgorithmMask::EC_PAKE_V1, ProtocolType::PakeV1)]
#[case(AlgorithmMask::DL_PAKE_V1_2048, ProtocolType::PakeV1)]
#[case(AlgorithmMask::DL_PAKE_V1_3072, ProtocolType::PakeV1)]
#[case(AlgorithmMask::ALL, ProtocolType::PakeV2)]
fn bind_then_authenticate(#[case] mask: AlgorithmMask, #[case] expected: ProtocolType) {
    setup_logging();

    let client = with_algorithms(b"controller", UserType::Controller, 1, mask);
    let server = with_algorithms(b"accessory", UserType::Accessory, 2, mask);

    let binding = bind(&client, &server, client.request(OpCode::Bind));
    assert_eq!(selected_protocol(&binding.messages[1]), expected);
    assert_eq!(binding.client_key, binding.server_key);

    // Both sides persisted the peer's public key and the pre-shared key.
    for (device, peer) in [(&client, &server), (&server, &client)] {
        let peer_params = device.peer_token_params(peer);
        let provider = device.engine.provider();
        assert!(provider.key_exists(&peer_params.alias(KeyPurpose::Psk)).unwrap());
        assert!(
            provider
                .key_exists(&peer_params.alias(KeyPurpose::PeerPublicKey))
                .unwrap()
        );
    }

    let authentication = run_handshake(
        &client,
        client.request(OpCode::Authenticate),
        &server,
        server.request(OpCode::Authenticate),
    )
    .unwrap();
    assert_eq!(selected_protocol(&authentication.messages[1]), expected);
    assert_eq!(authentication.client_key, authentication.server_key);
    assert_ne!(authentication.client_key, binding.client_key);
}

#[test]
fn iso_bind_then_authenticate() {
    let client = with_algorithms(b"controller", UserType::Controller, 1, AlgorithmMask::ISO);
    let server = with_algorithms(b"accessory", UserType::Accessory, 2, AlgorithmMask::ISO);

    let binding = bind(
        &client,
        &server,
        client.request(OpCode::Bind).iso_bind_compatible(),
    );
    assert_eq!(selected_protocol(&binding.messages[1]), ProtocolType::Iso);
    assert_eq!(binding.client_key, binding.server_key);

    for (device, peer) in [(&client, &server), (&server, &client)] {
        let alias = device.peer_token_params(peer).alias(KeyPurpose::AuthToken);
        assert!(device.engine.provider().key_exists(&alias).unwrap());
    }

    let authentication = run_handshake(
        &client,
        client.request(OpCode::Authenticate),
        &server,
        server.request(OpCode::Authenticate),
    )
    .unwrap();
    assert_eq!(selected_protocol(&authentication.messages[1]), ProtocolType::Iso);
    assert_eq!(authentication.client_key, authentication.server_key);
}

#[test]
fn iso_binding_needs_opt_in() {
    let client = with_algorithms(b"controller", UserType::Controller, 1, AlgorithmMask::ISO);

    let failure = client
        .engine
        .create_task(
            Role::Client,
            client.request(OpCode::Bind).with_pin(TEST_PIN),
            None,
        )
        .unwrap_err();
    assert!(matches!(failure.error, AuthError::TaskCreationFailed));
    assert!(failure.send_to_peer.is_none());
    assert_eq!(client.engine.live_tasks(), 0);
}

#[test]
fn server_refuses_iso_binding_without_opt_in() {
    let client = with_algorithms(b"controller", UserType::Controller, 1, AlgorithmMask::ISO);
    let server = accessory(2);

    let failure = run_handshake(
        &client,
        client
            .request(OpCode::Bind)
            .with_pin(TEST_PIN)
            .iso_bind_compatible(),
        &server,
        server.request(OpCode::Bind).with_pin(TEST_PIN),
    )
    .err()
    .unwrap();
    assert!(matches!(failure.error, AuthError::NotSupported));
    assert_eq!(failure.protocol, None);
    assert_eq!(
        failure.send_to_peer.unwrap().body,
        MessageBody::Error(ErrorCode::NotSupported)
    );
    assert_eq!(server.engine.live_tasks(), 0);

    let alias = server.peer_token_params(&client).alias(KeyPurpose::AuthToken);
    assert!(!server.engine.provider().key_exists(&alias).unwrap());

    // The same offer binds once the server allows ISO as well.
    let binding = run_handshake(
        &client,
        client
            .request(OpCode::Bind)
            .with_pin(TEST_PIN)
            .iso_bind_compatible(),
        &server,
        server
            .request(OpCode::Bind)
            .with_pin(TEST_PIN)
            .iso_bind_compatible(),
    )
    .unwrap();
    assert_eq!(selected_protocol(&binding.messages[1]), ProtocolType::Iso);
}

#[rstest]
#[case(AlgorithmMask::EC_PAKE_V2)]
#[case(AlgorithmMask::EC_PAKE_V1)]
#[case(AlgorithmMask::DL_PAKE_V1_2048)]
fn wrong_pin_fails_on_server(#[case] mask: AlgorithmMask) {
    let client = with_algorithms(b"controller", UserType::Controller, 1, mask);
    let server = with_algorithms(b"accessory", UserType::Accessory, 2, mask);

    let failure = run_handshake(
        &client,
        client.request(OpCode::Bind).with_pin("000000"),
        &server,
        server.request(OpCode::Bind).with_pin(TEST_PIN),
    )
    .err()
    .unwrap();
    assert!(matches!(failure.error, AuthError::ConfirmationMismatch));
    assert_eq!(failure.step, Some(2));
    assert_eq!(
        failure.send_to_peer.unwrap().body,
        MessageBody::Error(ErrorCode::ConfirmationMismatch)
    );
    assert_eq!(server.engine.live_tasks(), 0);
}

#[test]
fn wrong_pin_fails_iso_on_client() {
    let client = with_algorithms(b"controller", UserType::Controller, 1, AlgorithmMask::ISO);
    let server = with_algorithms(b"accessory", UserType::Accessory, 2, AlgorithmMask::ISO);

    let failure = run_handshake(
        &client,
        client
            .request(OpCode::Bind)
            .with_pin("000000")
            .iso_bind_compatible(),
        &server,
        server.request(OpCode::Bind).with_pin(TEST_PIN),
    )
    .err()
    .unwrap();
    assert!(matches!(failure.error, AuthError::ConfirmationMismatch));
    assert_eq!(failure.protocol, Some(ProtocolType::Iso));
    assert_eq!(client.engine.live_tasks(), 0);
}

#[test]
fn binding_requires_pin() {
    let client = controller(1);
    let server = accessory(2);

    let (_, offer) = start_client(&client, client.request(OpCode::Bind).with_pin(TEST_PIN));
    let failure = server
        .engine
        .create_task(Role::Server, server.request(OpCode::Bind), Some(&offer))
        .unwrap_err();
    assert!(matches!(failure.error, AuthError::InvalidInput(_)));
    assert!(failure.send_to_peer.is_some());
}

#[rstest]
#[case(AlgorithmMask::EC_PAKE_V2)]
#[case(AlgorithmMask::EC_PAKE_V1)]
#[case(AlgorithmMask::ISO)]
fn unbind_removes_credentials(#[case] mask: AlgorithmMask) {
    let client = with_algorithms(b"controller", UserType::Controller, 1, mask);
    let server = with_algorithms(b"accessory", UserType::Accessory, 2, mask);
    bind(
        &client,
        &server,
        client.request(OpCode::Bind).iso_bind_compatible(),
    );

    let unbinding = run_handshake(
        &client,
        client.request(OpCode::Unbind),
        &server,
        server.request(OpCode::Unbind),
    )
    .unwrap();
    assert_eq!(unbinding.client_key, unbinding.server_key);

    for (device, peer) in [(&client, &server), (&server, &client)] {
        let peer_params = device.peer_token_params(peer);
        let provider = device.engine.provider();
        for purpose in [
            KeyPurpose::Psk,
            KeyPurpose::PeerPublicKey,
            KeyPurpose::AuthToken,
        ] {
            assert!(!provider.key_exists(&peer_params.alias(purpose)).unwrap());
        }
    }

    // Without credentials authentication fails.
    let failure = run_handshake(
        &client,
        client.request(OpCode::Authenticate),
        &server,
        server.request(OpCode::Authenticate),
    )
    .err()
    .unwrap();
    assert!(matches!(failure.error, AuthError::Crypto(_)));
}

#[test]
fn task_table_is_bounded() {
    let config = EngineConfig {
        max_tasks: 1,
        ..EngineConfig::default()
    };
    let client = TestDevice::with_config(b"controller", UserType::Controller, 1, config);

    let (first, _) = start_client(&client, client.request(OpCode::Authenticate));
    let failure = client
        .engine
        .create_task(Role::Client, client.request(OpCode::Authenticate), None)
        .unwrap_err();
    assert!(matches!(failure.error, AuthError::AllocationFailed));

    client.engine.destroy_task(first);
    start_client(&client, client.request(OpCode::Authenticate));
    assert_eq!(client.engine.live_tasks(), 1);
}

#[test]
fn unknown_peer_is_rejected() {
    let client = controller(1);
    let server = accessory(2);

    // Nothing was bound, the server does not know the client.
    let (_, offer) = start_client(&client, client.request(OpCode::Authenticate));
    let failure = server
        .engine
        .create_task(Role::Server, server.request(OpCode::Authenticate), Some(&offer))
        .unwrap_err();
    assert!(matches!(failure.error, AuthError::UnexpectedPeer));
    assert_eq!(failure.protocol, Some(ProtocolType::PakeV2));
    assert!(failure.send_to_peer.is_some());
}

#[test]
fn expected_peer_has_to_match() {
    let client = controller(1);
    let server = accessory(2);
    bind(&client, &server, client.request(OpCode::Bind));

    let failure = run_handshake(
        &client,
        client
            .request(OpCode::Authenticate)
            .with_peer(b"another accessory"),
        &server,
        server.request(OpCode::Authenticate),
    )
    .err()
    .unwrap();
    assert!(matches!(failure.error, AuthError::UnexpectedPeer));
}

#[test]
fn declared_user_type_has_to_match() {
    let client = controller(1);
    let server = accessory(2);
    bind(&client, &server, client.request(OpCode::Bind));

    let failure = run_handshake(
        &client,
        client
            .request(OpCode::Authenticate)
            .with_user_type(UserType::Bridge),
        &server,
        server.request(OpCode::Authenticate),
    )
    .err()
    .unwrap();
    assert!(matches!(failure.error, AuthError::UnexpectedPeer));
}

#[test]
fn operation_has_to_match() {
    let client = controller(1);
    let server = accessory(2);

    let (_, offer) = start_client(&client, client.request(OpCode::Bind).with_pin(TEST_PIN));
    let failure = server
        .engine
        .create_task(Role::Server, server.request(OpCode::Authenticate), Some(&offer))
        .unwrap_err();
    assert!(matches!(failure.error, AuthError::InvalidInput(_)));
}

#[test]
fn incompatible_versions() {
    let config = EngineConfig {
        min_version: Version::new(3, 0, AlgorithmMask::ALL),
        cur_version: Version::new(3, 0, AlgorithmMask::ALL),
        ..EngineConfig::default()
    };
    let client = TestDevice::with_config(b"controller", UserType::Controller, 1, config);
    let server = accessory(2);

    let (_, offer) = start_client(&client, client.request(OpCode::Bind).with_pin(TEST_PIN));
    let failure = server
        .engine
        .create_task(
            Role::Server,
            server.request(OpCode::Bind).with_pin(TEST_PIN),
            Some(&offer),
        )
        .unwrap_err();
    assert!(matches!(failure.error, AuthError::UnsupportedVersion));
    assert!(failure.protocol.is_none());
    assert!(failure.send_to_peer.is_some());
}

#[test]
fn offer_missing_negotiated_protocol() {
    let client = controller(1);
    let server = accessory(2);

    let (_, mut offer) = start_client(&client, client.request(OpCode::Bind).with_pin(TEST_PIN));
    if let MessageBody::Candidates(candidates) = &mut offer.body {
        candidates.retain(|candidate| candidate.protocol_type() != ProtocolType::PakeV2);
    }

    let failure = server
        .engine
        .create_task(
            Role::Server,
            server.request(OpCode::Bind).with_pin(TEST_PIN),
            Some(&offer),
        )
        .unwrap_err();
    assert!(matches!(failure.error, AuthError::InvalidInput(_)));
}

#[test]
fn handshake_over_bytes() {
    let client = controller(1);
    let server = accessory(2);

    let (client_task, offer) =
        start_client(&client, client.request(OpCode::Bind).with_pin(TEST_PIN));
    let offer = PeerMessage::from_bytes(&offer.to_bytes().unwrap()).unwrap();
    let (server_task, output) = server
        .engine
        .create_task(
            Role::Server,
            server.request(OpCode::Bind).with_pin(TEST_PIN),
            Some(&offer),
        )
        .unwrap();
    let second = output.send_to_peer.unwrap().to_bytes().unwrap();

    let (_, third) = client.engine.process_bytes(client_task, &second).unwrap();
    let (output, fourth) = server
        .engine
        .process_bytes(server_task, &third.unwrap())
        .unwrap();
    assert_eq!(output.status, TaskStatus::Finish);
    let server_key = output.session_key.unwrap();

    let (output, nothing) = client
        .engine
        .process_bytes(client_task, &fourth.unwrap())
        .unwrap();
    assert!(nothing.is_none());
    assert_eq!(output.session_key.unwrap(), server_key);
}

#[test]
fn undecodable_bytes_fail_the_task() {
    let client = controller(1);
    let (task_id, _) = start_client(&client, client.request(OpCode::Authenticate));

    let failure = client
        .engine
        .process_bytes(task_id, &[0xff, 0x00, 0x13])
        .unwrap_err();
    assert!(matches!(failure.error, AuthError::Codec(_)));
    assert!(failure.send_to_peer.unwrap().is_error());
    assert_eq!(client.engine.live_tasks(), 0);
}

#[test]
fn token_fan_out() {
    let device = controller(1);
    let params = device.token_params();

    device.engine.register_local_identity(&params).unwrap();
    let public_key = device.engine.get_public_key(&params).unwrap();
    assert_eq!(public_key.len(), 32);

    // Registering again keeps the identity.
    device.engine.register_local_identity(&params).unwrap();
    assert_eq!(device.engine.get_public_key(&params).unwrap(), public_key);

    device.engine.delete_peer_auth_info(&params).unwrap();
    device.engine.unregister_local_identity(&params).unwrap();
    assert!(device.engine.get_public_key(&params).is_err());

    // Symmetric protocols have no public keys.
    let iso = with_algorithms(b"controller", UserType::Controller, 1, AlgorithmMask::ISO);
    assert!(matches!(
        iso.engine.get_public_key(&iso.token_params()),
        Err(AuthError::NotSupported)
    ));
}
