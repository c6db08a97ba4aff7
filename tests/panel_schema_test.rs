//! Schema tests for control panel responses

use pretty_assertions::assert_eq;
use serde_json::json;
use world_backup::controller::{
    parse_payload, parse_resources, ControllerError, PowerSignal, ServerDetails, ServerRunState,
};

fn resources_body(state: &str) -> String {
    json!({
        "object": "stats",
        "attributes": {
            "current_state": state,
            "is_suspended": false,
            "resources": {
                "memory_bytes": 588_200_000u64,
                "cpu_absolute": 12.75,
                "disk_bytes": 118_000_000u64,
                "network_rx_bytes": 1_024u64,
                "network_tx_bytes": 2_048u64,
                "uptime": 123_456u64
            }
        }
    })
    .to_string()
}

#[test]
fn test_resources_payload_parses() {
    let resources = parse_resources(&resources_body("running")).unwrap();

    assert_eq!(resources.object, "stats");
    assert_eq!(resources.run_state(), ServerRunState::Running);
    assert!(resources.run_state().is_running());
    assert_eq!(resources.attributes.resources.memory_bytes, 588_200_000);
    assert_eq!(resources.attributes.resources.cpu_absolute, 12.75);
}

#[test]
fn test_every_known_state_maps() {
    for (raw, expected) in [
        ("running", ServerRunState::Running),
        ("starting", ServerRunState::Starting),
        ("stopping", ServerRunState::Stopping),
        ("offline", ServerRunState::Offline),
        ("installing", ServerRunState::Other("installing".to_string())),
    ] {
        let state = parse_resources(&resources_body(raw)).unwrap().run_state();
        assert_eq!(state, expected);
        assert_eq!(state.to_string(), raw);
        assert_eq!(state.is_running(), raw == "running");
    }
}

#[test]
fn test_empty_state_is_rejected() {
    let result = parse_resources(&resources_body("  "));
    assert!(matches!(result, Err(ControllerError::Parse(_))));
}

#[test]
fn test_missing_fields_are_rejected() {
    let body = json!({
        "object": "stats",
        "attributes": { "current_state": "running" }
    })
    .to_string();
    assert!(matches!(parse_resources(&body), Err(ControllerError::Parse(_))));

    assert!(matches!(
        parse_resources("<html>502 Bad Gateway</html>"),
        Err(ControllerError::Parse(_))
    ));
}

#[test]
fn test_server_details_payload_parses() {
    let body = json!({
        "object": "server",
        "attributes": {
            "server_owner": true,
            "identifier": "1a2b3c4d",
            "uuid": "1a2b3c4d-0000-4000-8000-000000000000",
            "name": "Survival",
            "node": "node-sa-1",
            "sftp_details": { "ip": "sftp.example.net", "port": 2022 },
            "description": "",
            "limits": { "memory": 4096, "disk": 10240 },
            "is_suspended": false,
            "is_installing": false
        }
    })
    .to_string();

    let details: ServerDetails = parse_payload(&body).unwrap();
    assert_eq!(details.attributes.identifier, "1a2b3c4d");
    assert_eq!(details.attributes.name, "Survival");
    assert_eq!(details.attributes.sftp_details.ip, "sftp.example.net");
    assert_eq!(details.attributes.sftp_details.port, 2022);
    assert!(!details.attributes.is_installing);
}

#[test]
fn test_power_signal_wire_format() {
    assert_eq!(json!({ "signal": PowerSignal::Restart }), json!({ "signal": "restart" }));
    assert_eq!("STOP".parse::<PowerSignal>().unwrap(), PowerSignal::Stop);
    assert!("reboot".parse::<PowerSignal>().is_err());
}
