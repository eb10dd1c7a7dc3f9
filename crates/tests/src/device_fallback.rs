//! Integration tests for device hot-plug handling
//!
//! These drive the real poll thread against a scripted [`VirtualBackend`] and
//! check what the orchestrator selects and announces on its update loop.

use proptest::prelude::*;
use sonority_core::domain::audio::{AudioBackend, NO_SOUND_DEVICE};
use sonority_core::domain::device_monitor::{DeviceMonitor, MonitorSettings};
use sonority_core::domain::orchestrator::{AudioOrchestrator, LifecycleState, OrchestratorOptions};
use sonority_core::domain::thread::AudioThread;
use sonority_core::domain::virtual_backend::VirtualBackend;
use sonority_tests::{
    added, clips, fast_config, orchestrator, pump_for, pump_until, removed, EventLog,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn on(virt: &VirtualBackend, name: &str) -> bool {
    virt.current_device_name().as_deref() == Some(name)
}

// ============================================================================
// FALLBACK
// ============================================================================

#[test]
fn test_unplugging_preferred_device_falls_back_and_recovers() {
    let virt = Arc::new(VirtualBackend::with_devices(&["Speakers", "Headphones"]));
    let mut audio = orchestrator(&virt, fast_config("Headphones"));
    let log = EventLog::attach(&audio);
    assert_eq!(audio.current_device_name(), "Headphones");

    virt.set_enabled("Headphones", false);
    assert!(pump_until(&mut audio, |_| on(&virt, "Speakers") && !log.is_empty()));
    assert_eq!(log.events(), vec![removed("Headphones")]);
    assert_eq!(audio.audio_device_names(), vec!["Speakers"]);

    virt.set_enabled("Headphones", true);
    assert!(pump_until(&mut audio, |_| on(&virt, "Headphones") && log.len() == 2));
    assert_eq!(log.events(), vec![removed("Headphones"), added("Headphones")]);
    assert_eq!(audio.current_device_name(), "Headphones");
}

#[test]
fn test_missing_preference_uses_os_default() {
    let virt = Arc::new(VirtualBackend::with_devices(&["Speakers", "Headphones"]));
    let audio = orchestrator(&virt, fast_config("USB DAC"));

    assert_eq!(audio.current_device_name(), "Speakers");
    assert_eq!(audio.preferred_device(), "USB DAC");
}

#[test]
fn test_no_default_falls_through_to_no_sound() {
    let virt = Arc::new(VirtualBackend::with_devices(&["Speakers"]));
    virt.set_default(None);
    let audio = orchestrator(&virt, fast_config(""));

    assert_eq!(virt.current_device(), Some(NO_SOUND_DEVICE));
    assert_eq!(audio.current_device_name(), "No sound");
    assert_eq!(audio.state(), LifecycleState::DeviceSelected);
}

#[test]
fn test_preferred_device_appearing_later_is_picked_up() {
    let virt = Arc::new(VirtualBackend::with_devices(&["Speakers"]));
    let mut audio = orchestrator(&virt, fast_config("USB DAC"));
    let log = EventLog::attach(&audio);
    assert_eq!(audio.current_device_name(), "Speakers");

    virt.add_device("USB DAC", true, false);
    assert!(pump_until(&mut audio, |_| on(&virt, "USB DAC")));
    assert!(pump_until(&mut audio, |_| !log.is_empty()));
    assert_eq!(log.events(), vec![added("USB DAC")]);
}

#[test]
fn test_following_os_default_when_no_preference() {
    let virt = Arc::new(VirtualBackend::with_devices(&["Speakers", "Headphones"]));
    let mut audio = orchestrator(&virt, fast_config(""));
    let log = EventLog::attach(&audio);
    assert_eq!(audio.current_device_name(), "Speakers");

    virt.set_default(Some("Headphones"));
    assert!(pump_until(&mut audio, |_| on(&virt, "Headphones")));

    // A default switch changes no device's presence.
    pump_for(&mut audio, Duration::from_millis(50));
    assert!(log.is_empty());
}

#[test]
fn test_new_default_device_is_announced_and_selected() {
    let virt = Arc::new(VirtualBackend::with_devices(&["Speakers"]));
    let mut audio = orchestrator(&virt, fast_config(""));
    let log = EventLog::attach(&audio);
    assert_eq!(audio.current_device_name(), "Speakers");

    virt.add_device("Headphones", true, true);
    assert!(pump_until(&mut audio, |_| on(&virt, "Headphones") && !log.is_empty()));

    pump_for(&mut audio, Duration::from_millis(50));
    assert_eq!(log.events(), vec![added("Headphones")]);
    assert_eq!(audio.current_device_name(), "Headphones");
    assert_eq!(audio.audio_device_names(), vec!["Speakers", "Headphones"]);
}

#[test]
fn test_preference_set_from_another_thread() {
    let virt = Arc::new(VirtualBackend::with_devices(&["Speakers", "Headphones"]));
    let mut audio = orchestrator(&virt, fast_config(""));
    let handle = audio.handle();

    thread::spawn(move || assert!(handle.set_preferred_device("Headphones")))
        .join()
        .unwrap();

    assert!(pump_until(&mut audio, |audio| audio.current_device_name() == "Headphones"));
    assert_eq!(audio.preferred_device(), "Headphones");
}

// ============================================================================
// IDEMPOTENCE AND NOISE
// ============================================================================

#[test]
fn test_stable_topology_never_reinitialises() {
    let virt = Arc::new(VirtualBackend::with_devices(&["Speakers", "Headphones"]));
    let mut audio = orchestrator(&virt, fast_config("Headphones"));
    let log = EventLog::attach(&audio);
    let calls = virt.init_calls();

    pump_for(&mut audio, Duration::from_millis(100));

    assert_eq!(virt.init_calls(), calls);
    assert!(log.is_empty());
}

#[test]
fn test_default_device_selection_is_idempotent() {
    let virt = Arc::new(VirtualBackend::with_devices(&["Speakers"]));
    let mut audio = orchestrator(&virt, fast_config(""));
    let calls = virt.init_calls();

    audio.set_preferred_device("Speakers").unwrap();
    audio.update();
    audio.set_preferred_device("").unwrap();
    audio.update();

    assert_eq!(virt.init_calls(), calls);
    assert_eq!(audio.current_device_name(), "Speakers");
}

#[test]
fn test_simultaneous_changes_arrive_as_one_ordered_batch() {
    let virt = Arc::new(VirtualBackend::with_devices(&["Speakers", "Monitor"]));
    let mut audio = orchestrator(&virt, fast_config(""));
    let log = EventLog::attach(&audio);

    // Hold the poller off while both changes land.
    virt.fail_queries(true);
    virt.set_enabled("Monitor", false);
    virt.add_device("Headphones", true, false);
    virt.fail_queries(false);

    assert!(pump_until(&mut audio, |_| log.len() == 2));
    assert_eq!(log.events(), vec![added("Headphones"), removed("Monitor")]);
}

#[test]
fn test_transient_query_failure_keeps_current_device() {
    let virt = Arc::new(VirtualBackend::with_devices(&["Speakers"]));
    let mut audio = orchestrator(&virt, fast_config("Speakers"));
    let log = EventLog::attach(&audio);

    virt.fail_queries(true);
    pump_for(&mut audio, Duration::from_millis(80));
    virt.fail_queries(false);
    pump_for(&mut audio, Duration::from_millis(40));

    assert!(on(&virt, "Speakers"));
    assert!(log.is_empty());
}

#[test]
fn test_failed_init_falls_back_to_default() {
    let virt = Arc::new(VirtualBackend::with_devices(&["Speakers", "Headphones"]));
    let headphones = virt.index_of("Headphones").unwrap();
    virt.fail_init(headphones, true);

    let audio = orchestrator(&virt, fast_config("Headphones"));
    assert_eq!(audio.current_device_name(), "Speakers");
}

// ============================================================================
// SHUTDOWN
// ============================================================================

#[test]
fn test_dispose_stops_polling_and_delivery() {
    let virt = Arc::new(VirtualBackend::with_devices(&["Speakers", "Headphones"]));
    let mut audio = orchestrator(&virt, fast_config("Headphones"));
    let log = EventLog::attach(&audio);

    audio.dispose();
    let calls = virt.init_calls();

    virt.set_enabled("Headphones", false);
    thread::sleep(Duration::from_millis(60));
    audio.update();

    assert_eq!(audio.state(), LifecycleState::Disposed);
    assert_eq!(virt.init_calls(), calls);
    assert!(log.is_empty());
    assert_eq!(virt.current_device(), None);
}

#[test]
fn test_devices_stay_up_while_another_manager_is_registered() {
    let virt = Arc::new(VirtualBackend::with_devices(&["Speakers"]));
    let thread = Arc::new(AudioThread::new());
    let other = thread.register_manager("other");

    let mut audio = AudioOrchestrator::new(
        virt.clone(),
        Arc::clone(&thread),
        clips(&[]),
        clips(&[]),
        OrchestratorOptions {
            config: fast_config(""),
            ..Default::default()
        },
    )
    .unwrap();

    audio.dispose();
    assert!(on(&virt, "Speakers"));

    thread.unregister_manager(other);
    thread.free_devices(&*virt);
    assert_eq!(virt.current_device(), None);
}

// ============================================================================
// PROPERTIES
// ============================================================================

const NAMES: [&str; 4] = ["Speakers", "Headphones", "HDMI", "USB DAC"];

proptest! {
    #[test]
    fn resync_reports_exact_difference(
        toggles in prop::collection::vec((0usize..NAMES.len(), any::<bool>()), 0..16)
    ) {
        let virt = Arc::new(VirtualBackend::with_devices(&NAMES));
        let monitor = DeviceMonitor::new(
            virt.clone(),
            Arc::new(AudioThread::new()),
            MonitorSettings::default(),
        );
        monitor.resync().unwrap();
        let before = monitor.topology().enabled_names().to_vec();

        for (index, enabled) in toggles {
            virt.set_enabled(NAMES[index], enabled);
        }

        let change = monitor.resync().unwrap();
        let after = change.topology.enabled_names().to_vec();
        let expected_added: Vec<String> =
            after.iter().filter(|n| !before.contains(n)).cloned().collect();
        let expected_removed: Vec<String> =
            before.iter().filter(|n| !after.contains(n)).cloned().collect();

        prop_assert_eq!(&change.added, &expected_added);
        prop_assert_eq!(&change.removed, &expected_removed);
        prop_assert!(!monitor.has_changed().unwrap());
        prop_assert!(!monitor.resync().unwrap().has_changes());
    }
}
