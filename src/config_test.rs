use anyhow::Result;

use crate::config::Config;

#[test]
fn config_deserializes_from_full_env() -> Result<()> {
    let config: Config = envy::from_iter(vec![
        ("RUST_LOG".into(), "error".into()),
        ("IP_ADDRESS".into(), "10.0.0.5".into()),
        ("BACKEND_PORT".into(), "7501".into()),
        ("BACKEND_ID".into(), "42".into()),
        ("LOAD_REPORT_INTERVAL_SECS".into(), "5".into()),
        ("MAX_ALLOWED_MISSED_REPORTS".into(), "3".into()),
        ("RECORDER_DEFUNCT_THRESHOLD_SECS".into(), "60".into()),
        ("MAX_SIMULTANEOUS_WORK".into(), "8".into()),
        ("WINDOW_DURATION_MINS".into(), "15".into()),
        ("WINDOW_END_TOLERANCE_SECS".into(), "30".into()),
        ("POLICY_REFRESH_OFFSET_SECS".into(), "120".into()),
        ("SCHEDULING_BUFFER_SECS".into(), "10".into()),
        ("MAX_WORK_ASSIGNMENT_DELAY_SECS".into(), "90".into()),
        ("SWEEP_INTERVAL_SECS".into(), "2".into()),
        ("POLICY_FETCH_TIMEOUT_SECS".into(), "4".into()),
        ("LEADER_REQUEST_TIMEOUT_SECS".into(), "6".into()),
        ("MAX_PROFILE_MESSAGE_SIZE".into(), "1048576".into()),
        ("PROFILE_DURATION_SECS".into(), "60".into()),
        ("PROFILE_COVERAGE_PCT".into(), "25".into()),
    ])?;

    assert!(config.rust_log == "error", "unexpected value parsed for RUST_LOG, got {}, expected {}", config.rust_log, "error");
    assert!(config.ip_address == "10.0.0.5", "unexpected value parsed for IP_ADDRESS, got {}, expected {}", config.ip_address, "10.0.0.5");
    assert!(config.backend_port == 7501, "unexpected value parsed for BACKEND_PORT, got {}, expected {}", config.backend_port, "7501");
    assert!(config.backend_id == 42, "unexpected value parsed for BACKEND_ID, got {}, expected {}", config.backend_id, "42");
    assert!(
        config.load_report_interval_secs == 5,
        "unexpected value parsed for LOAD_REPORT_INTERVAL_SECS, got {}, expected {}",
        config.load_report_interval_secs,
        "5"
    );
    assert!(
        config.max_allowed_missed_reports == 3,
        "unexpected value parsed for MAX_ALLOWED_MISSED_REPORTS, got {}, expected {}",
        config.max_allowed_missed_reports,
        "3"
    );
    assert!(
        config.recorder_defunct_threshold_secs == 60,
        "unexpected value parsed for RECORDER_DEFUNCT_THRESHOLD_SECS, got {}, expected {}",
        config.recorder_defunct_threshold_secs,
        "60"
    );
    assert!(
        config.max_simultaneous_work == 8,
        "unexpected value parsed for MAX_SIMULTANEOUS_WORK, got {}, expected {}",
        config.max_simultaneous_work,
        "8"
    );
    assert!(
        config.window_duration_mins == 15,
        "unexpected value parsed for WINDOW_DURATION_MINS, got {}, expected {}",
        config.window_duration_mins,
        "15"
    );
    assert!(
        config.max_profile_message_size == 1048576,
        "unexpected value parsed for MAX_PROFILE_MESSAGE_SIZE, got {}, expected {}",
        config.max_profile_message_size,
        "1048576"
    );
    assert!(
        config.advertised_address() == "10.0.0.5:7501",
        "unexpected advertised address, got {}, expected {}",
        config.advertised_address(),
        "10.0.0.5:7501"
    );

    Ok(())
}

#[test]
fn config_deserializes_from_sparse_env() -> Result<()> {
    let config: Config = envy::from_iter(vec![
        ("RUST_LOG".into(), "error".into()),
        ("IP_ADDRESS".into(), "10.0.0.5".into()),
        ("BACKEND_PORT".into(), "7501".into()),
        ("BACKEND_ID".into(), "42".into()),
    ])?;

    assert!(
        config.load_report_interval_secs == 10,
        "unexpected default for LOAD_REPORT_INTERVAL_SECS, got {}, expected {}",
        config.load_report_interval_secs,
        "10"
    );
    assert!(
        config.max_allowed_missed_reports == 2,
        "unexpected default for MAX_ALLOWED_MISSED_REPORTS, got {}, expected {}",
        config.max_allowed_missed_reports,
        "2"
    );
    assert!(
        config.recorder_defunct_threshold_secs == 120,
        "unexpected default for RECORDER_DEFUNCT_THRESHOLD_SECS, got {}, expected {}",
        config.recorder_defunct_threshold_secs,
        "120"
    );
    assert!(
        config.window_duration_mins == 30,
        "unexpected default for WINDOW_DURATION_MINS, got {}, expected {}",
        config.window_duration_mins,
        "30"
    );
    assert!(
        config.window_end_tolerance_secs == 120,
        "unexpected default for WINDOW_END_TOLERANCE_SECS, got {}, expected {}",
        config.window_end_tolerance_secs,
        "120"
    );
    assert!(
        config.policy_refresh_offset_secs == 300,
        "unexpected default for POLICY_REFRESH_OFFSET_SECS, got {}, expected {}",
        config.policy_refresh_offset_secs,
        "300"
    );
    assert!(
        config.max_work_assignment_delay_secs == 120,
        "unexpected default for MAX_WORK_ASSIGNMENT_DELAY_SECS, got {}, expected {}",
        config.max_work_assignment_delay_secs,
        "120"
    );
    assert!(
        config.max_profile_message_size == 4 * 1024 * 1024,
        "unexpected default for MAX_PROFILE_MESSAGE_SIZE, got {}, expected {}",
        config.max_profile_message_size,
        4 * 1024 * 1024
    );

    Ok(())
}
