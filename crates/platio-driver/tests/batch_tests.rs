//! Batch session and batch script tests
//!
//! All tests run against the software backend; no hardware required.

use std::collections::BTreeMap;
use std::sync::Arc;

use platio_driver::{
    run_batch, BatchMode, DomainType, PioError, PlatformIo, RequestKind, SessionState,
    SoftwareBackend, TopologyTable,
};
use proptest::prelude::*;

fn open() -> (Arc<SoftwareBackend>, PlatformIo) {
    let backend = Arc::new(SoftwareBackend::default_platform());
    let pio = PlatformIo::with_table(backend.clone(), TopologyTable::uniform(2, 4, 2))
        .expect("software platform opens");
    (backend, pio)
}

#[test]
fn test_power_limit_on_two_packages() {
    let (backend, pio) = open();
    let session = pio.session();

    let h0 = session
        .push(pio.validate("POWER_LIMIT", "package", 0, RequestKind::Control).unwrap())
        .unwrap();
    let h1 = session
        .push(pio.validate("POWER_LIMIT", "package", 1, RequestKind::Control).unwrap())
        .unwrap();
    assert_eq!(h0.index(), 0);
    assert_eq!(h1.index(), 1);

    session.adjust(h0, 150.0).unwrap();
    session.adjust(h1, 140.0).unwrap();
    assert_eq!(session.commit().unwrap(), 2);
    assert_eq!(session.state(), SessionState::Committed);

    let writes = backend.writes();
    assert_eq!(writes.len(), 2);
    assert_eq!((writes[0].domain, writes[0].index), (DomainType::Package, 0));
    assert!((writes[0].value - 150.0).abs() < f64::EPSILON);
    assert_eq!((writes[1].domain, writes[1].index), (DomainType::Package, 1));
    assert!((writes[1].value - 140.0).abs() < f64::EPSILON);
}

#[test]
fn test_validation_error_leaves_session_usable() {
    let (_, pio) = open();
    let session = pio.session();
    let err = pio
        .validate("POWER_LIMIT", "package", 5, RequestKind::Control)
        .unwrap_err();
    assert!(err.is_validation());
    assert_eq!(session.state(), SessionState::Empty);

    session
        .push(pio.validate("POWER_LIMIT", "package", 1, RequestKind::Control).unwrap())
        .unwrap();
    assert_eq!(session.len(), 1);
}

#[test]
fn test_read_and_write_in_one_session() {
    let (backend, pio) = open();
    backend.set_signal("CPU_ENERGY", 1, 4321.0);

    let session = pio.session();
    let energy = session
        .push(pio.validate("CPU_ENERGY", "package", 1, RequestKind::Signal).unwrap())
        .unwrap();
    let limit = session
        .push(pio.validate("POWER_LIMIT", "package", 1, RequestKind::Control).unwrap())
        .unwrap();

    session.read_all().unwrap();
    session.adjust(limit, 175.0).unwrap();
    session.commit().unwrap();

    assert!((session.sample(energy).unwrap() - 4321.0).abs() < f64::EPSILON);
    assert_eq!(backend.value("POWER_LIMIT", 1), Some(175.0));
}

proptest! {
    /// N distinct controls, each adjusted one or more times, produce exactly
    /// N backend writes carrying the last adjusted value, in handle order.
    #[test]
    fn commit_writes_each_control_once(
        adjustments in prop::collection::btree_map(
            0_usize..16,
            prop::collection::vec(1.0e9_f64..4.0e9, 1..4),
            1..16,
        )
    ) {
        let (backend, pio) = open();
        let session = pio.session();

        let mut expected = BTreeMap::new();
        for (&cpu, values) in &adjustments {
            let request = pio
                .validate("CPU_FREQUENCY_MAX_CONTROL", "cpu", i64::try_from(cpu).unwrap(), RequestKind::Control)
                .unwrap();
            let handle = session.push(request).unwrap();
            for &v in values {
                session.adjust(handle, v).unwrap();
            }
            expected.insert(handle, (cpu, *values.last().unwrap()));
        }

        prop_assert_eq!(session.commit().unwrap(), adjustments.len());
        let writes = backend.writes();
        prop_assert_eq!(writes.len(), adjustments.len());
        for (write, (cpu, value)) in writes.iter().zip(expected.values()) {
            prop_assert_eq!(write.index, *cpu);
            prop_assert_eq!(write.value, *value);
        }
    }
}

// ── Batch scripts ───────────────────────────────────────────────────────────

const SCRIPT: &str = "\
# read, then write both package limits
CPU_ENERGY           package 0
POWER_LIMIT          package 0 150
POWER_LIMIT          1       1 140

CPU_FREQUENCY_STATUS core    3
";

#[test]
fn test_script_runs_reads_and_writes() {
    let (backend, pio) = open();
    let report = run_batch(&pio, SCRIPT, BatchMode::PerLine).unwrap();

    assert!(report.is_success(), "{report:?}");
    assert_eq!(report.reads.len(), 2);
    assert_eq!(report.reads[0].line, 2);
    assert!((report.reads[0].value - 1000.0).abs() < f64::EPSILON);
    assert_eq!(report.reads[1].line, 6);
    assert_eq!(report.writes.len(), 2);
    assert_eq!(report.applied, 2);

    let writes = backend.writes();
    assert_eq!(writes.len(), 2);
    assert!((writes[0].value - 150.0).abs() < f64::EPSILON);
    assert!((writes[1].value - 140.0).abs() < f64::EPSILON);
}

#[test]
fn test_script_isolates_bad_lines() {
    let (backend, pio) = open();
    let input = "\
POWER_LIMIT package 0 150
POWER_LIMIT socket 1 140
NOT_A_CONTROL package 1 1
POWER_LIMIT package x 1
POWER_LIMIT package 1 140
";
    let report = run_batch(&pio, input, BatchMode::PerLine).unwrap();

    let rejected: Vec<usize> = report.rejected.iter().map(|(line, _)| *line).collect();
    assert_eq!(rejected, vec![4, 2, 3]);
    assert!(matches!(report.rejected[0].1, PioError::MalformedRequest { .. }));
    assert!(matches!(report.rejected[1].1, PioError::UnknownDomainName { .. }));
    assert!(matches!(report.rejected[2].1, PioError::UnknownControlName { .. }));
    assert_eq!(report.applied, 2);
    assert_eq!(backend.writes().len(), 2);
}

#[test]
fn test_strict_script_aborts_before_writing() {
    let (backend, pio) = open();
    let input = "POWER_LIMIT package 0 150\nPOWER_LIMIT package 9 140\n";
    let err = run_batch(&pio, input, BatchMode::Strict).unwrap_err();
    assert!(matches!(err, PioError::DomainIndexOutOfRange { index: 9, .. }));
    assert!(backend.writes().is_empty());
}

#[test]
fn test_script_reports_commit_failures() {
    let (backend, pio) = open();
    backend.fail_writes_to("POWER_LIMIT", 1);
    let report = run_batch(
        &pio,
        "POWER_LIMIT package 0 150\nPOWER_LIMIT package 1 140\n",
        BatchMode::PerLine,
    )
    .unwrap();

    assert!(!report.is_success());
    assert_eq!(report.applied, 1);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].handle, report.writes[1].handle);
}

#[test]
fn test_failing_read_does_not_hold_back_writes() {
    let (backend, pio) = open();
    backend.fail_reads_of("CPU_POWER");
    let input = "\
POWER_LIMIT package 0 150
CPU_POWER   package 1
POWER_LIMIT package 1 140
CPU_ENERGY  package 0
";
    let report = run_batch(&pio, input, BatchMode::PerLine).unwrap();

    assert!(!report.is_success());
    assert_eq!(report.unread.len(), 1);
    assert_eq!(report.unread[0].0, 2);
    assert!(matches!(report.unread[0].1, PioError::BackendUnavailable { .. }));

    assert_eq!(report.reads.len(), 1);
    assert_eq!(report.reads[0].line, 4);
    assert!((report.reads[0].value - 1000.0).abs() < f64::EPSILON);

    assert_eq!(report.applied, 2);
    assert_eq!(backend.writes().len(), 2);
    assert_eq!(backend.value("POWER_LIMIT", 1), Some(140.0));
}

#[test]
fn test_all_reads_failing_still_commits() {
    let (backend, pio) = open();
    backend.fail_reads(true);
    let report = run_batch(
        &pio,
        "CPU_ENERGY package 0\nPOWER_LIMIT package 0 150\n",
        BatchMode::Strict,
    )
    .unwrap();

    assert_eq!(report.unread.len(), 1);
    assert!(report.reads.is_empty());
    assert_eq!(report.applied, 1);
    assert_eq!(backend.value("POWER_LIMIT", 0), Some(150.0));
}

#[test]
fn test_script_rejects_finer_than_native_domain() {
    let (backend, pio) = open();
    let input = "POWER_LIMIT package 0 150\nPOWER_LIMIT package 1 140\nCPU_ENERGY cpu 0\n";
    let report = run_batch(&pio, input, BatchMode::PerLine).unwrap();

    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.rejected[0].0, 3);
    assert!(matches!(report.rejected[0].1, PioError::IncompatibleDomains { .. }));
    assert_eq!(report.applied, 2);
    assert_eq!(backend.writes().len(), 2);
}
