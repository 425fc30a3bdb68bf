#![allow(missing_docs)]

use common::decode::session::SessionLevel;
use common::error::QueryError;
use common::facade::folders::query_folders;
use common::facade::sessions::{query_sessions, query_sessions_batch};
use common::layout::{PointerWidth, SESSION_INFO_502};
use common::names;
use common::native::fake::{BufferBuilder, FakeNative, Script, folder_path_script};

fn sessions_502(base: u64) -> Result<Vec<u8>, QueryError> {
    let width = PointerWidth::native();
    let layout = SESSION_INFO_502.resolve(width);
    let mut b = BufferBuilder::new(width);
    let first = b.reserve_records(&layout, 2);
    for (i, (user, files)) in [("alice", 3u32), ("bob", 0)].iter().enumerate() {
        let rec = first + i * layout.size();
        b.set_string(&layout, rec, "sesi502_cname", "\\\\10.0.0.5")?;
        b.set_string(&layout, rec, "sesi502_username", user)?;
        b.set_u32(&layout, rec, "sesi502_num_opens", *files)?;
        b.set_string(&layout, rec, "sesi502_transport", "\\Device\\NetbiosSmb")?;
    }
    b.finish(base)
}

#[test]
fn caller_sized_sessions_take_probe_and_fetch() -> Result<(), Box<dyn std::error::Error>> {
    let mut fake = FakeNative::new();
    fake.script("NetSessionEnum", "srv01:502", Script::sized(2, sessions_502));

    let sessions = query_sessions(&fake, Some("srv01"), SessionLevel::Info502)?;
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0].user.as_deref(), Some("alice"));
    assert_eq!(sessions[0].open_files, Some(3));
    assert_eq!(sessions[1].transport.as_deref(), Some("\\Device\\NetbiosSmb"));
    assert_eq!(fake.call_count("NetSessionEnum"), 2);
    assert_eq!(fake.local().allocations(), 1);
    assert_eq!(fake.local().releases(), 1);
    assert_eq!(fake.local().invalid_releases(), 0);
    Ok(())
}

#[test]
fn unscripted_call_surfaces_native_code() {
    let fake = FakeNative::new();
    let result = query_sessions(&fake, None, SessionLevel::Info10);
    assert!(matches!(
        result,
        Err(QueryError::Failure {
            call: "NetSessionEnum",
            code: 120
        })
    ));
    assert_eq!(fake.local().allocations(), 0);
}

#[test]
fn batch_reports_serialize_with_error_codes() -> Result<(), Box<dyn std::error::Error>> {
    let mut fake = FakeNative::new();
    fake.script("NetSessionEnum", "srv01:502", Script::sized(2, sessions_502))
        .deny_host("srv02");
    let targets = vec!["srv01".to_string(), "srv02".to_string()];

    let reports = query_sessions_batch(&fake, &targets, SessionLevel::Info502, None);
    let json = serde_json::to_value(&reports)?;
    assert_eq!(json[0]["target"], "srv01");
    assert_eq!(json[0]["ok"][1]["user"], "bob");
    assert!(json[0]["ok"][0]["client_host"].is_null());
    assert_eq!(json[1]["target"], "srv02");
    assert_eq!(json[1]["error"]["code"], "SYSQ-NATIVE-101");
    assert_eq!(json[1]["error"]["native_code"], 5);
    assert_eq!(fake.local().outstanding(), 0);
    Ok(())
}

#[test]
fn folder_reports_serialize_ids_in_braces() -> Result<(), Box<dyn std::error::Error>> {
    let mut fake = FakeNative::new();
    let id = names::known_folder("ProgramData").ok_or("missing")?;
    fake.script("SHGetKnownFolderPath", &id.to_string(), folder_path_script("C:\\ProgramData"));

    let reports = query_folders(&fake, &["ProgramData".to_string()]);
    let json = serde_json::to_value(&reports)?;
    assert_eq!(json[0]["ok"]["path"], "C:\\ProgramData");
    assert_eq!(json[0]["ok"]["id"], "{62AB5D82-FDC1-4DC3-A9DD-070D1D495D97}");
    assert_eq!(fake.callee().outstanding(), 0);
    Ok(())
}
