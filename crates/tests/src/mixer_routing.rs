//! Integration tests for mixer routing and component lifecycles
//!
//! These cover whole graphs: fallback re-parenting at scale, shared-sink
//! routing and what happens to playing channels when the device changes.

use sonority_core::domain::audio::{AudioBackend, AudioError};
use sonority_core::domain::component::AudioComponent;
use sonority_core::domain::config::AudioConfig;
use sonority_core::domain::mixer::{ChannelRef, MixerEvent, MixerGraph, MixerId};
use sonority_core::domain::virtual_backend::VirtualBackend;
use sonority_tests::{clips, fast_config, orchestrator_with_resources, pcm, pump_until};
use std::sync::{Arc, Mutex};
use std::thread;

fn live_backend() -> Arc<VirtualBackend> {
    let virt = Arc::new(VirtualBackend::with_devices(&["Speakers", "Headphones"]));
    virt.init_device(2).unwrap();
    virt
}

fn playing_channels(virt: &Arc<VirtualBackend>, count: usize) -> Vec<ChannelRef> {
    (0..count)
        .map(|_| {
            let channel = ChannelRef::create(virt.clone(), &pcm(&[0.1; 16])).unwrap();
            channel.play().unwrap();
            channel
        })
        .collect()
}

fn routed_into(
    graph: &MixerGraph,
    virt: &VirtualBackend,
    mixer: MixerId,
    channel: &ChannelRef,
) -> bool {
    let Some(mixer) = graph.mixer(mixer) else {
        return false;
    };
    let native = mixer.native().unwrap();
    mixer.contains(channel.id()) && virt.children(native).contains(&channel.native())
}

// ============================================================================
// FALLBACK RE-PARENTING
// ============================================================================

#[test]
fn test_every_channel_moves_to_fallback() {
    let virt = live_backend();
    let mut graph = MixerGraph::new(virt.clone(), None);
    let base = graph.create_mixer(Some("base"), None).unwrap();
    let user = graph.create_mixer(None, Some(base.id())).unwrap();

    let channels = playing_channels(&virt, 32);
    for channel in &channels {
        user.add_channel(channel.clone()).unwrap();
    }
    graph.update();
    assert_eq!(graph.mixer(user.id()).unwrap().channel_count(), 32);

    graph.remove_mixer(user.id()).unwrap();

    assert_eq!(graph.mixer(base.id()).unwrap().channel_count(), 32);
    for channel in &channels {
        assert!(routed_into(&graph, &virt, base.id(), channel));
        assert!(channel.is_playing());
    }
    assert!(graph.mixer(user.id()).is_none());
}

#[test]
fn test_deep_chain_resolves_to_first_live_mixer() {
    let virt = live_backend();
    let mut graph = MixerGraph::new(virt.clone(), None);

    let root = graph.create_mixer(Some("root"), None).unwrap();
    let mut chain = vec![root.clone()];
    for depth in 1..12 {
        let parent = chain.last().unwrap().id();
        let mixer = graph
            .create_mixer(Some(&format!("level {}", depth)), Some(parent))
            .unwrap();
        chain.push(mixer);
    }

    // Remove everything between the root and the leaf first.
    for mixer in &chain[1..chain.len() - 1] {
        graph.remove_mixer(mixer.id()).unwrap();
    }

    let leaf = chain.last().unwrap();
    let channels = playing_channels(&virt, 3);
    for channel in &channels {
        leaf.add_channel(channel.clone()).unwrap();
    }
    graph.update();
    graph.remove_mixer(leaf.id()).unwrap();

    for channel in &channels {
        assert!(routed_into(&graph, &virt, root.id(), channel));
    }
    assert_eq!(graph.active_mixers().len(), 1);
}

#[test]
fn test_removal_events_follow_lifecycle() {
    let virt = live_backend();
    let mut graph = MixerGraph::new(virt.clone(), None);
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    graph.subscribe(move |event: &MixerEvent| sink.lock().unwrap().push(event.clone()));

    let first = graph.create_mixer(Some("first"), None).unwrap();
    let second = graph.create_mixer(None, Some(first.id())).unwrap();
    graph.remove_mixer(second.id()).unwrap();

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 3);
    assert!(matches!(&events[0], MixerEvent::Added(info) if info.identifier == "first"));
    assert!(matches!(&events[1], MixerEvent::Added(info) if info.id == second.id()));
    assert!(matches!(&events[2], MixerEvent::Removed(info) if info.id == second.id()));
}

#[test]
fn test_channels_added_from_other_threads_route_on_update() {
    let virt = live_backend();
    let mut graph = MixerGraph::new(virt.clone(), None);
    let mixer = graph.create_mixer(Some("music"), None).unwrap();

    let channels = playing_channels(&virt, 4);
    let workers: Vec<_> = channels
        .iter()
        .cloned()
        .map(|channel| {
            let handle = mixer.clone();
            thread::spawn(move || handle.add_channel(channel).unwrap())
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(graph.mixer(mixer.id()).unwrap().channel_count(), 0);
    graph.update();
    for channel in &channels {
        assert!(routed_into(&graph, &virt, mixer.id(), channel));
    }
}

// ============================================================================
// SHARED SINK
// ============================================================================

#[test]
fn test_shared_sink_is_transparent_to_channels() {
    let virt = live_backend();
    let sink = virt.create_mixer(false).unwrap();
    let mut graph = MixerGraph::new(virt.clone(), Some(sink));
    let mixer = graph.create_mixer(Some("music"), None).unwrap();

    let channel = playing_channels(&virt, 1).remove(0);
    mixer.add_channel(channel.clone()).unwrap();
    graph.update();

    let native = graph.mixer(mixer.id()).unwrap().native().unwrap();
    assert_eq!(virt.is_decode_only(native), Some(true));
    assert!(virt.children(sink).contains(&native));
    assert!(routed_into(&graph, &virt, mixer.id(), &channel));

    graph.set_shared_sink(None);

    let rebuilt = graph.mixer(mixer.id()).unwrap().native().unwrap();
    assert_ne!(rebuilt, native);
    assert!(!virt.exists(native));
    assert_eq!(virt.is_decode_only(rebuilt), Some(false));
    assert!(routed_into(&graph, &virt, mixer.id(), &channel));
    assert!(channel.is_playing());
}

// ============================================================================
// ORCHESTRATED LIFECYCLES
// ============================================================================

#[test]
fn test_device_change_reattaches_playing_channels() {
    let virt = Arc::new(VirtualBackend::with_devices(&["Speakers", "Headphones"]));
    let mut audio = orchestrator_with_resources(
        &virt,
        fast_config("Headphones"),
        clips(&["theme"]),
        clips(&[]),
    );

    let channel = audio.tracks().unwrap().lock().unwrap().get("theme").unwrap();
    channel.play().unwrap();
    audio.update();

    let track_mixer = audio.track_mixer().id();
    let before = audio.mixers().mixer(track_mixer).unwrap().native().unwrap();

    virt.set_enabled("Headphones", false);
    assert!(pump_until(&mut audio, |audio| audio.current_device_name() == "Speakers"));

    let mixer = audio.mixers().mixer(track_mixer).unwrap();
    let after = mixer.native().unwrap();
    assert_ne!(before, after);
    assert!(mixer.contains(channel.id()));
    assert!(virt.children(after).contains(&channel.native()));
}

#[test]
fn test_sample_concurrency_evicts_oldest_playback() {
    let virt = Arc::new(VirtualBackend::with_devices(&["Speakers"]));
    let config = AudioConfig {
        sample_concurrency: 2,
        ..fast_config("")
    };
    let mut audio = orchestrator_with_resources(&virt, config, clips(&[]), clips(&["hit.wav"]));

    let samples = audio.samples().unwrap();
    let mut store = samples.lock().unwrap();
    let sample = store.get("hit").unwrap();
    let played: Vec<ChannelRef> = (0..3).map(|_| sample.play().unwrap()).collect();

    assert!(!played[0].is_playing());
    assert!(played[1].is_playing());
    assert!(played[2].is_playing());
    assert_eq!(sample.playing_channels(), 2);
}

#[test]
fn test_finished_samples_are_cleaned_up() {
    let virt = Arc::new(VirtualBackend::with_devices(&["Speakers"]));
    let mut audio =
        orchestrator_with_resources(&virt, fast_config(""), clips(&[]), clips(&["hit.wav"]));
    let mixers_only = virt.object_count();

    let channel = audio
        .samples()
        .unwrap()
        .lock()
        .unwrap()
        .get("hit")
        .unwrap()
        .play()
        .unwrap();
    audio.update();
    assert!(audio.mixers().mixer(audio.sample_mixer().id()).unwrap().contains(channel.id()));

    virt.finish_all();
    audio.update();
    audio.update();

    assert!(channel.is_disposed());
    assert_eq!(audio.mixers().channel_count(), 0);
    assert_eq!(virt.object_count(), mixers_only);
}

#[test]
fn test_missing_resources_are_reported() {
    let virt = Arc::new(VirtualBackend::with_devices(&["Speakers"]));
    let mut audio = orchestrator_with_resources(&virt, fast_config(""), clips(&[]), clips(&[]));

    let samples = audio.samples().unwrap();
    let result = samples.lock().unwrap().get("nope").map(|_| ());
    assert!(matches!(result, Err(AudioError::ResourceNotFound(name)) if name == "nope"));

    let tracks = audio.tracks().unwrap();
    assert!(matches!(
        tracks.lock().unwrap().get("nope"),
        Err(AudioError::ResourceNotFound(_))
    ));
}

#[test]
fn test_stores_outlived_by_handles_reject_use_after_dispose() {
    let virt = Arc::new(VirtualBackend::with_devices(&["Speakers"]));
    let mut audio =
        orchestrator_with_resources(&virt, fast_config(""), clips(&["theme"]), clips(&["hit.wav"]));

    let samples = audio.samples().unwrap();
    let tracks = audio.tracks().unwrap();
    let user = audio.create_mixer(Some("ui")).unwrap();
    let channel = tracks.lock().unwrap().get("theme").unwrap();

    audio.dispose();

    assert!(samples.lock().unwrap().is_disposed());
    assert!(tracks.lock().unwrap().is_disposed());
    assert!(matches!(samples.lock().unwrap().get("hit"), Err(AudioError::Disposed(_))));
    assert!(matches!(channel.play(), Err(AudioError::Disposed(_))));
    assert!(matches!(
        user.add_channel(channel.clone()),
        Err(AudioError::Disposed(_))
    ));
    assert_eq!(virt.object_count(), 0);
}
