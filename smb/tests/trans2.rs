mod common;

use std::sync::Arc;

use common::*;
use smb::collaborators::ShareAccess;
use smb::error::SmbStatus;
use smb::packets::smb1::Command;

const TRANS2_QUERY_FILE_INFORMATION: u16 = 0x0007;
const TRANS2_FIND_FIRST2: u16 = 0x0001;
const INFO_LEVEL_STANDARD: u16 = 1;

/// Builds a `Transaction2` request whose parameter block is Fid +
/// InformationLevel, with no secondary packets required (the request
/// already carries every parameter/data byte it declares).
fn build_query_file_info_request(fid: u16) -> (Vec<u16>, Vec<u8>) {
    let mut param_bytes = Vec::new();
    param_bytes.extend_from_slice(&fid.to_le_bytes());
    param_bytes.extend_from_slice(&INFO_LEVEL_STANDARD.to_le_bytes());

    // Transaction2 params: TotalParamCount, TotalDataCount, MaxParamCount,
    // MaxDataCount, MaxSetupCount, Flags, Timeout(lo/hi), Reserved2,
    // ParamCount, ParamOffset, DataCount, DataOffset, SetupCount,
    // Setup[0]=function. (params[9]=ParamCount per the dispatcher's
    // fixed-layout indexing.)
    let params = vec![
        param_bytes.len() as u16, // [0] TotalParamCount
        0,                        // [1] TotalDataCount
        1024,                     // [2] MaxParamCount
        1024,                     // [3] MaxDataCount
        0,                        // [4] MaxSetupCount
        0,                        // [5] Flags
        0,                        // [6] Timeout lo
        0,                        // [7] Timeout hi
        0,                        // [8] Reserved2
        param_bytes.len() as u16, // [9] ParamCount
        0,                        // [10] ParamOffset (relative to this block's byte area)
        0,                        // [11] DataCount
        0,                        // [12] DataOffset
        1,                        // [13] SetupCount
        TRANS2_QUERY_FILE_INFORMATION,
    ];
    (params, param_bytes)
}

#[tokio::test]
async fn query_file_information_reports_the_driver_reported_size() {
    let filesystem = Arc::new(StubFilesystem::new());
    let handle = filesystem.seed("report.doc", b"12345").await;

    let dispatcher = test_dispatcher(
        StubShares { name: "SHARE".into(), access: ShareAccess::Writable },
        filesystem.clone(),
        Arc::new(StubNotify::default()),
    );
    let mut session = test_session();

    let uid = session.virtual_circuits.allocate("alice".into(), false, 16, 16).unwrap();
    let vc = session.virtual_circuits.get_mut(uid).unwrap();
    let mut tree = smb::session::tree::TreeConnection::new(
        0,
        "SHARE".into(),
        smb::collaborators::ShareType::Disk,
        ShareAccess::Writable,
        16,
    );
    let fid = tree
        .open_file(smb::session::tree::NetworkFile {
            handle,
            path: "report.doc".into(),
            write_access: false,
            delete_on_close: false,
        })
        .unwrap();
    let tid = vc.connect_tree(tree).unwrap();

    let (params, byte_area) = build_query_file_info_request(fid);
    let mut packet = build_request(&dispatcher.pool, Command::Transaction2 as u8, tid, uid, 6, 1, &params, &byte_area).await;
    dispatcher.dispatch(&mut session, &mut packet).await.unwrap();
    let (status, _, data) = read_response(&packet);

    assert_eq!(status, SmbStatus::SUCCESS.nt_status);
    assert_eq!(data.len(), 22); // SMB_INFO_STANDARD's fixed size
    let end_of_file = u32::from_le_bytes([data[12], data[13], data[14], data[15]]);
    assert_eq!(end_of_file, 5);
}

#[tokio::test]
async fn query_file_information_with_unknown_fid_is_invalid_handle() {
    let dispatcher = test_dispatcher(
        StubShares { name: "SHARE".into(), access: ShareAccess::Writable },
        Arc::new(StubFilesystem::new()),
        Arc::new(StubNotify::default()),
    );
    let mut session = test_session();

    let uid = session.virtual_circuits.allocate("alice".into(), false, 16, 16).unwrap();
    let vc = session.virtual_circuits.get_mut(uid).unwrap();
    let tree = smb::session::tree::TreeConnection::new(
        0,
        "SHARE".into(),
        smb::collaborators::ShareType::Disk,
        ShareAccess::Writable,
        16,
    );
    let tid = vc.connect_tree(tree).unwrap();

    let (params, byte_area) = build_query_file_info_request(0xBEEF);
    let mut packet = build_request(&dispatcher.pool, Command::Transaction2 as u8, tid, uid, 7, 1, &params, &byte_area).await;
    dispatcher.dispatch(&mut session, &mut packet).await.unwrap();
    let (status, _, _) = read_response(&packet);

    assert_eq!(status, SmbStatus::INVALID_HANDLE.nt_status);
}

/// Builds a `Trans2FindFirst2` request searching `pattern`, with its own
/// parameter block (SearchAttributes, SearchCount, Flags, InformationLevel,
/// SearchStorageType, Pattern) following the usual Transaction2 outer params.
fn build_find_first2_request(pattern: &str, search_count_max: u16) -> (Vec<u16>, Vec<u8>) {
    let mut param_bytes = Vec::new();
    param_bytes.extend_from_slice(&0u16.to_le_bytes()); // SearchAttributes
    param_bytes.extend_from_slice(&search_count_max.to_le_bytes());
    param_bytes.extend_from_slice(&0u16.to_le_bytes()); // Flags: leave the slot open
    param_bytes.extend_from_slice(&INFO_LEVEL_STANDARD.to_le_bytes());
    param_bytes.extend_from_slice(&0u32.to_le_bytes()); // SearchStorageType
    param_bytes.extend_from_slice(pattern.as_bytes());
    param_bytes.push(0); // null terminator

    let params = vec![
        param_bytes.len() as u16, // [0] TotalParamCount
        0,                        // [1] TotalDataCount
        1024,                     // [2] MaxParamCount
        1024,                     // [3] MaxDataCount
        0,                        // [4] MaxSetupCount
        0,                        // [5] Flags
        0,                        // [6] Timeout lo
        0,                        // [7] Timeout hi
        0,                        // [8] Reserved2
        param_bytes.len() as u16, // [9] ParamCount
        0,                        // [10] ParamOffset
        0,                        // [11] DataCount
        0,                        // [12] DataOffset
        1,                        // [13] SetupCount
        TRANS2_FIND_FIRST2,
    ];
    (params, param_bytes)
}

/// Scenario: `Trans2FindFirst2` with wildcard `\*` against a directory
/// holding three files returns `.`, `..` and the three files (five
/// entries total), reports no more files remaining, and a subsequent
/// `FindClose2` releases the search slot it allocated.
#[tokio::test]
async fn find_first2_wildcard_lists_dot_entries_then_every_file_and_find_close2_releases_it() {
    let filesystem = Arc::new(StubFilesystem::new());
    filesystem.seed("one.txt", b"1").await;
    filesystem.seed("two.txt", b"22").await;
    filesystem.seed("three.txt", b"333").await;

    let dispatcher = test_dispatcher(
        StubShares { name: "SHARE".into(), access: ShareAccess::Writable },
        filesystem,
        Arc::new(StubNotify::default()),
    );
    let mut session = test_session();

    let uid = session.virtual_circuits.allocate("alice".into(), false, 16, 16).unwrap();
    let vc = session.virtual_circuits.get_mut(uid).unwrap();
    let tree = smb::session::tree::TreeConnection::new(0, "SHARE".into(), smb::collaborators::ShareType::Disk, ShareAccess::Writable, 16);
    let tid = vc.connect_tree(tree).unwrap();

    let (params, byte_area) = build_find_first2_request("\\*", 10);
    let mut packet = build_request(&dispatcher.pool, Command::Transaction2 as u8, tid, uid, 8, 1, &params, &byte_area).await;
    dispatcher.dispatch(&mut session, &mut packet).await.unwrap();
    let (status, out_params, _) = read_response(&packet);

    assert_eq!(status, SmbStatus::SUCCESS.nt_status);
    let search_id = out_params[0];
    let entry_count = out_params[1];
    let end_of_search = out_params[2];
    assert_eq!(entry_count, 5); // "." + ".." + three seeded files
    assert_eq!(end_of_search, 1);
    assert_ne!(search_id, 0);

    let mut close_packet = build_request(&dispatcher.pool, Command::FindClose2 as u8, tid, uid, 9, 1, &[search_id], &[]).await;
    dispatcher.dispatch(&mut session, &mut close_packet).await.unwrap();
    let (close_status, _, _) = read_response(&close_packet);
    assert_eq!(close_status, SmbStatus::SUCCESS.nt_status);
}
