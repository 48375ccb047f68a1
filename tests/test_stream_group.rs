#![cfg(feature = "test-utils")]

mod support;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::support::tracing_init;
use stemdeck::playback::{OutputSink, PlaybackError, StreamGroup, Transport};
use stemdeck::test_support::{synthetic_sample, SyntheticLoader, TestRig};

const TOLERANCE: f64 = 1e-6;

fn approx(a: f64, b: f64, tolerance: f64) -> bool {
    (a - b).abs() <= tolerance
}

/// drums 12s, bass 8s, keys 10s, all 100 Hz mono
async fn loaded_group() -> (TestRig, Arc<StreamGroup>) {
    tracing_init();
    let loader = SyntheticLoader::new(100, 1, 12.0)
        .with_duration("bass", 8.0)
        .with_duration("keys", 10.0);
    let rig = TestRig::new(loader);
    let group = Arc::new(StreamGroup::new(["drums", "bass", "keys"], rig.ctx.clone()));
    group.load(false).await.unwrap();
    (rig, group)
}

#[tokio::test(start_paused = true)]
async fn test_group_duration_is_longest_member() {
    let (_rig, group) = loaded_group().await;
    assert_eq!(group.duration(), Some(12.0));
    assert_eq!(group.members().len(), 3);
    assert_eq!(group.members()[1].duration(), Some(8.0));
}

#[tokio::test(start_paused = true)]
async fn test_group_load_fails_if_any_member_fails() {
    tracing_init();
    let rig = TestRig::new(SyntheticLoader::new(100, 1, 12.0));
    rig.loader.set_failing(true);
    let group = StreamGroup::new(["drums", "bass"], rig.ctx.clone());

    assert!(matches!(
        group.load(false).await,
        Err(PlaybackError::Load(_))
    ));
    assert_eq!(group.duration(), None);
    assert!(matches!(
        group.stream(None).await,
        Err(PlaybackError::NotReady)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_members_share_one_start_clock() {
    let (rig, group) = loaded_group().await;
    rig.delayed.set_delay(Duration::from_millis(50));

    group.stream(Some(0.0)).await.unwrap();
    assert!(group.members().iter().all(|m| m.is_playing()));

    let starts: Vec<f64> = group
        .members()
        .iter()
        .map(|m| rig.sink.scheduled_on(m.chain())[0].when)
        .collect();
    assert!(starts.iter().all(|w| approx(*w, starts[0], TOLERANCE)));

    sleep(Duration::from_millis(1234)).await;
    let group_time = group.current_time();
    for member in group.members() {
        assert!(approx(member.current_time(), group_time, TOLERANCE));
    }
}

#[tokio::test(start_paused = true)]
async fn test_group_is_running_before_the_barrier_resolves() {
    let (rig, group) = loaded_group().await;
    rig.delayed.set_delay(Duration::from_millis(300));

    let streaming = group.clone();
    let handle = tokio::spawn(async move { streaming.stream(Some(2.0)).await });

    sleep(Duration::from_millis(100)).await;
    assert!(group.is_playing());
    assert_eq!(group.current_time(), 2.0);
    assert!(group.members().iter().all(|m| !m.is_playing()));
    assert!(rig.sink.scheduled().is_empty());

    sleep(Duration::from_millis(400)).await;
    handle.await.unwrap().unwrap();

    // All three windows were primed, so they went out together at the barrier
    let scheduled = rig.sink.scheduled();
    assert_eq!(scheduled.len(), 3);
    assert!(scheduled
        .iter()
        .all(|s| approx(s.when, scheduled[0].when, TOLERANCE)));
    assert!(scheduled
        .iter()
        .all(|s| s.first_sample == Some(synthetic_sample(0, 200))));
    assert!(approx(group.current_time(), 2.0 + 0.5 - 0.3, 0.01));
}

#[tokio::test(start_paused = true)]
async fn test_stream_while_running_is_rejected() {
    let (rig, group) = loaded_group().await;
    group.stream(None).await.unwrap();
    let scheduled = rig.sink.scheduled().len();

    assert!(matches!(
        group.stream(Some(4.0)).await,
        Err(PlaybackError::AlreadyPlaying)
    ));
    assert!(group.is_playing());
    assert_eq!(rig.sink.scheduled().len(), scheduled);
    assert!(approx(group.current_time(), 0.0, 0.01));
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_barrier_cancels_the_start() {
    let (rig, group) = loaded_group().await;
    rig.delayed.set_delay(Duration::from_millis(300));

    let streaming = group.clone();
    let handle = tokio::spawn(async move { streaming.stream(Some(2.0)).await });

    sleep(Duration::from_millis(100)).await;
    group.stop();
    assert!(!group.is_playing());

    sleep(Duration::from_secs(1)).await;
    handle.await.unwrap().unwrap();
    assert!(group.members().iter().all(|m| !m.is_playing()));
    assert!(rig.sink.scheduled().is_empty());
    assert_eq!(group.current_time(), 2.0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_folds_elapsed_time_into_offset() {
    let (rig, group) = loaded_group().await;
    group.stream(None).await.unwrap();
    sleep(Duration::from_millis(2500)).await;

    group.stop();
    assert!(!group.is_playing());
    assert!(approx(group.current_time(), 2.5, 0.01));
    for member in group.members() {
        assert!(!member.is_playing());
        assert!(approx(member.current_time(), 2.5, 0.01));
    }

    // Stopped: seeking only moves the cursor
    let scheduled = rig.sink.scheduled().len();
    group.seek(1.0).await.unwrap();
    assert_eq!(group.current_time(), 1.0);
    sleep(Duration::from_millis(100)).await;
    assert_eq!(rig.sink.scheduled().len(), scheduled);
}

#[tokio::test(start_paused = true)]
async fn test_seek_while_playing_restarts_all_members() {
    let (rig, group) = loaded_group().await;
    group.stream(None).await.unwrap();
    sleep(Duration::from_secs(1)).await;

    let old_chains: Vec<_> = group.members().iter().map(|m| m.chain()).collect();
    group.seek(4.0).await.unwrap();

    assert!(old_chains.iter().all(|c| rig.sink.is_detached(*c)));
    assert!(group.members().iter().all(|m| m.is_playing()));
    assert!(approx(group.current_time(), 4.0, 0.01));
    for member in group.members() {
        let first = &rig.sink.scheduled_on(member.chain())[0];
        assert_eq!(first.first_sample, Some(synthetic_sample(0, 400)));
    }
}

#[tokio::test(start_paused = true)]
async fn test_shorter_member_sits_out_past_its_end() {
    let (rig, group) = loaded_group().await;
    group.stream(Some(9.0)).await.unwrap();

    let members = group.members();
    assert!(members[0].is_playing());
    assert!(!members[1].is_playing());
    assert!(members[2].is_playing());
    assert!(rig.sink.scheduled_on(members[1].chain()).is_empty());

    // keys ends at 10s, drums at 12s
    sleep(Duration::from_millis(1100)).await;
    assert!(!members[2].is_playing());
    assert!(members[0].is_playing());
    assert!(group.is_playing());

    sleep(Duration::from_secs(2)).await;
    assert!(!members[0].is_playing());
    assert_eq!(group.current_time(), 0.0);
    assert!(!group.is_playing());
}

#[tokio::test(start_paused = true)]
async fn test_solo_mute_and_unmute() {
    let (rig, group) = loaded_group().await;

    group.solo(1).unwrap();
    assert_eq!(group.gains(), vec![0.0, 1.0, 0.0]);
    group.solo(0).unwrap();
    assert_eq!(group.gains(), vec![1.0, 0.0, 0.0]);
    assert!(matches!(group.solo(3), Err(PlaybackError::NoSuchMember(3))));

    let members = group.members();
    assert_eq!(rig.sink.gain(members[0].chain()), Some(1.0));
    assert_eq!(rig.sink.gain(members[2].chain()), Some(0.0));

    // Gains don't touch the transport
    assert!(!group.is_playing());
    group.stream(None).await.unwrap();
    group.mute(0).unwrap();
    assert!(group.is_playing());
    assert_eq!(group.gains(), vec![0.0, 0.0, 0.0]);

    group.unmute_all();
    assert_eq!(group.gains(), vec![1.0, 1.0, 1.0]);
}

#[tokio::test(start_paused = true)]
async fn test_group_transport() {
    let (_rig, group) = loaded_group().await;
    let transport: &dyn Transport = &*group;
    assert_eq!(transport.duration(), 12.0);

    transport.seek(3.0).await.unwrap();
    transport.play().await.unwrap();
    assert!(transport.is_playing());

    sleep(Duration::from_secs(1)).await;
    transport.pause();
    assert!(approx(transport.current_time(), 4.0, 0.01));
    assert!(matches!(
        group.stream(Some(-1.0)).await,
        Err(PlaybackError::OutOfRange { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_group_clock_matches_sink_clock() {
    let (rig, group) = loaded_group().await;
    let t0 = rig.sink.now();
    group.stream(None).await.unwrap();

    let scheduled = rig.sink.scheduled();
    assert!(scheduled.iter().all(|s| approx(s.when, t0, TOLERANCE)));
}
