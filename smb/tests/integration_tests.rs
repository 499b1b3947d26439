mod common;

use std::sync::Arc;

use common::*;
use smb::collaborators::ShareAccess;
use smb::error::SmbStatus;
use smb::framer;
use smb::packets::smb1::Command;
use smb::session::SessionState;

#[tokio::test]
async fn session_setup_then_separate_tree_connect_succeeds_against_the_allocated_uid() {
    let dispatcher = test_dispatcher(
        StubShares { name: "SHARE".into(), access: ShareAccess::Writable },
        Arc::new(StubFilesystem::new()),
        Arc::new(StubNotify::default()),
    );
    let mut session = test_session();
    session.complete_negotiate(smb::config::Dialect::NtLm).unwrap();

    // SessionSetupAndX params: MaxBufferSize, MaxMpxCount, VcNumber,
    // SessionKey(lo/hi), CaseInsensitivePwLen, CaseSensitivePwLen,
    // Reserved(lo/hi), Capabilities(lo/hi).
    let password = b"secret";
    let mut byte_area = Vec::new();
    byte_area.extend_from_slice(password);
    byte_area.extend_from_slice(&ascii_cstr("alice"));
    byte_area.extend_from_slice(&ascii_cstr("WORKGROUP"));
    byte_area.extend_from_slice(&ascii_cstr("Unix"));
    byte_area.extend_from_slice(&ascii_cstr("RustSMB"));
    let params = [0u16, 1, 0, 0, 0, 0, password.len() as u16, 0, 0, 0];

    let mut setup_packet = build_request(&dispatcher.pool, Command::SessionSetupAndX as u8, 0, 0, 1, 1, &params, &byte_area).await;
    dispatcher.dispatch(&mut session, &mut setup_packet).await.unwrap();
    let (setup_status, _, _) = read_response(&setup_packet);
    assert_eq!(setup_status, SmbStatus::SUCCESS.nt_status);

    let uid = session.virtual_circuits.all_uids()[0];

    let mut path_bytes = ascii_cstr("\\\\RUSTSMB\\SHARE");
    path_bytes.pop(); // keep the null but rebuild precisely below
    let mut tc_byte_area = ascii_cstr("\\\\RUSTSMB\\SHARE");
    tc_byte_area.extend_from_slice(&ascii_cstr("A:"));
    let mut tc_packet = build_request(&dispatcher.pool, Command::TreeConnectAndX as u8, 0, uid, 2, 1, &[0, 0, 0], &tc_byte_area).await;
    dispatcher.dispatch(&mut session, &mut tc_packet).await.unwrap();
    let (tc_status, _, tc_byte_area_out) = read_response(&tc_packet);

    assert_eq!(tc_status, SmbStatus::SUCCESS.nt_status);
    assert!(!tc_byte_area_out.is_empty()); // service string + native filesystem
    assert_eq!(session.virtual_circuits.get(uid).unwrap().all_tree_ids().len(), 1);
}

#[tokio::test]
async fn session_setup_with_wrong_password_is_denied() {
    let dispatcher = test_dispatcher(
        StubShares { name: "SHARE".into(), access: ShareAccess::Writable },
        Arc::new(StubFilesystem::new()),
        Arc::new(StubNotify::default()),
    );
    let mut session = test_session();
    session.complete_negotiate(smb::config::Dialect::NtLm).unwrap();

    let password = b"wrong password";
    let mut byte_area = Vec::new();
    byte_area.extend_from_slice(password);
    byte_area.extend_from_slice(&ascii_cstr("alice"));
    byte_area.extend_from_slice(&ascii_cstr("WORKGROUP"));
    byte_area.extend_from_slice(&ascii_cstr("Unix"));
    byte_area.extend_from_slice(&ascii_cstr("RustSMB"));
    let params = [0u16, 1, 0, 0, 0, 0, password.len() as u16, 0, 0, 0];

    let mut packet = build_request(&dispatcher.pool, Command::SessionSetupAndX as u8, 0, 0, 1, 1, &params, &byte_area).await;
    dispatcher.dispatch(&mut session, &mut packet).await.unwrap();
    let (status, _, _) = read_response(&packet);

    assert_eq!(status, SmbStatus::LOGON_FAILURE.nt_status);
    assert!(session.virtual_circuits.all_uids().is_empty());
}

/// A chained `SessionSetupAndX` + `TreeConnectAndX` request, where the
/// tree-connect block targets a share that doesn't exist. The chain's
/// first block still succeeds; the second's failure becomes the
/// response's overall status (spec's chained-execution-stops-at-first-
/// error rule), proving the AndX walk reached the second block at all.
#[tokio::test]
async fn andx_chain_parses_both_blocks_and_surfaces_the_second_blocks_failure() {
    let dispatcher = test_dispatcher(
        StubShares { name: "SHARE".into(), access: ShareAccess::Writable },
        Arc::new(StubFilesystem::new()),
        Arc::new(StubNotify::default()),
    );
    let mut session = test_session();
    session.complete_negotiate(smb::config::Dialect::NtLm).unwrap();

    let password = b"secret";
    let mut setup_byte_area = Vec::new();
    setup_byte_area.extend_from_slice(password);
    setup_byte_area.extend_from_slice(&ascii_cstr("alice"));
    setup_byte_area.extend_from_slice(&ascii_cstr("WORKGROUP"));
    setup_byte_area.extend_from_slice(&ascii_cstr("Unix"));
    setup_byte_area.extend_from_slice(&ascii_cstr("RustSMB"));
    let setup_params = vec![0u16, 1, 0, 0, 0, 0, password.len() as u16, 0, 0, 0];

    let mut tc_byte_area = ascii_cstr("\\\\RUSTSMB\\NOSUCHSHARE");
    tc_byte_area.extend_from_slice(&ascii_cstr("A:"));

    let blocks = [
        BlockSpec {
            command: Command::SessionSetupAndX as u8,
            params: setup_params,
            byte_area: setup_byte_area,
        },
        BlockSpec {
            command: Command::TreeConnectAndX as u8,
            params: vec![0, 0, 0],
            byte_area: tc_byte_area,
        },
    ];

    let mut packet = build_chain(&dispatcher.pool, &blocks, 0, 0, 5, 1).await;
    dispatcher.dispatch(&mut session, &mut packet).await.unwrap();
    let (status, _, _) = read_response(&packet);

    assert_eq!(status, SmbStatus::OBJECT_PATH_NOT_FOUND.nt_status);
}

/// Encodes `name` as a 34-byte half-ascii NetBIOS name field (RFC 1001
/// §14.1), the same wire shape a real client sends in a SESSION REQUEST.
fn encode_netbios_name(name: &str) -> Vec<u8> {
    let mut padded = [b' '; 16];
    for (i, b) in name.bytes().take(16).enumerate() {
        padded[i] = b;
    }
    let mut field = vec![32u8];
    for &b in &padded {
        field.push(b'A' + (b >> 4));
        field.push(b'A' + (b & 0x0F));
    }
    field
}

/// Scenario: a NetBIOS `SESSION REQUEST` naming this server (as
/// `*SMBSERVER`) is accepted with a four-byte `POSITIVE SESSION RESPONSE`
/// and moves the session straight to `SMB-Negotiate`.
#[tokio::test]
async fn netbios_session_request_for_smbserver_gets_a_positive_response() {
    let dispatcher = test_dispatcher(
        StubShares { name: "SHARE".into(), access: ShareAccess::Writable },
        Arc::new(StubFilesystem::new()),
        Arc::new(StubNotify::default()),
    );
    let addr: std::net::SocketAddr = "127.0.0.1:139".parse().unwrap();
    let mut session = smb::Session::new(smb::framer::Transport::NetBios, addr, 16);
    assert_eq!(session.state, SessionState::NetBiosSessionRequest);

    let mut wire = vec![0x81u8, 0x00, 0x00, 0x44];
    wire.extend(encode_netbios_name("*SMBSERVER"));
    wire.extend(encode_netbios_name("CLIENT"));

    let mut reader = std::io::Cursor::new(wire);
    let (called, calling) = framer::read_session_request(&mut reader, &dispatcher.pool).await.unwrap();
    assert_eq!(called, "*SMBSERVER");
    assert_eq!(calling, "CLIENT");

    session
        .accept_session_request(&called, &calling, "RUSTSMB", &[])
        .unwrap();
    assert_eq!(session.state, SessionState::SmbNegotiate);

    let mut out = Vec::new();
    framer::write_positive_session_response(&mut out).await.unwrap();
    assert_eq!(out, vec![0x82, 0x00, 0x00, 0x00]);
}
