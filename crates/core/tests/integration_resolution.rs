//! Resolution of the fixture commands against the fixture site objects

mod common;

use berth_core::errors::ResolutionError;
use common::{load_command, site_resolver, values};

#[test]
fn test_scan_selected_by_matcher_feeds_mount_and_command_line() {
    let command = load_command("scan-recon.json5");
    let resolved = site_resolver()
        .resolve(&command, &values(&[("session", "S1")]))
        .unwrap();

    assert_eq!(resolved.input_value("scan-id"), Some("4"));
    // verbose falls back to its default, whose false-value is empty
    assert_eq!(resolved.command_line(), "recon --scan 4  /input /output");
    assert_eq!(
        resolved.mount("in").unwrap().host_path.as_deref(),
        Some("/data/site/proj/S1/scans/4/DICOM")
    );
    assert_eq!(resolved.mount("out").unwrap().host_path, None);
    assert_eq!(resolved.outputs()[0].path.as_deref(), Some("4.nii.gz"));
    assert_eq!(resolved.working_directory(), Some("/work"));
}

#[test]
fn test_children_follow_parent_order() {
    let command = load_command("scan-recon.json5");
    let resolved = site_resolver()
        .resolve(&command, &values(&[("session", "S1")]))
        .unwrap();

    let names: Vec<&str> = resolved.inputs().iter().map(|i| i.name.as_str()).collect();
    let position = |name: &str| names.iter().position(|n| *n == name).unwrap();
    assert!(position("session") < position("T1"));
    assert!(position("T1") < position("scan-id"));
    assert_eq!(resolved.input("T1").unwrap().parent.as_deref(), Some("session"));
}

#[test]
fn test_no_scan_satisfies_matcher() {
    let command = load_command("scan-recon.json5");
    let err = site_resolver()
        .resolve(&command, &values(&[("session", "S2")]))
        .unwrap_err();
    match err {
        ResolutionError::Input { input, message } => {
            assert_eq!(input, "T1");
            assert!(message.contains("satisfies matcher"), "{}", message);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_unknown_session_leaves_required_input_empty() {
    let command = load_command("scan-recon.json5");
    let err = site_resolver()
        .resolve(&command, &values(&[("session", "S9")]))
        .unwrap_err();
    assert!(
        matches!(
            err,
            ResolutionError::RequiredInput { ref input } | ResolutionError::Input { ref input, .. }
                if input == "session"
        ),
        "{err}"
    );
}

#[test]
fn test_cycle_reports_both_inputs() {
    let command = load_command("cycle.json");
    let err = site_resolver()
        .resolve(&command, &values(&[]))
        .unwrap_err();
    let ResolutionError::CircularParent { path } = err else {
        panic!("expected a cycle, got {err}");
    };
    assert!(path.contains(&"a".to_string()));
    assert!(path.contains(&"b".to_string()));
}

#[test]
fn test_resolution_is_repeatable() {
    let command = load_command("scan-recon.json5");
    let inputs = values(&[("session", "S1"), ("verbose", "true")]);
    let first = site_resolver().resolve(&command, &inputs).unwrap();
    let second = site_resolver().resolve(&command, &inputs).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.command_line(), "recon --scan 4 -v /input /output");
}
