//! End-to-end tests of the channel manager against mock collaborators.

use std::sync::Arc;

use daxpanel_channels::{ChannelHandle, ChannelManager, ChannelManagerBuilder};
use daxpanel_core::{
    AudioDevice, ChannelId, ChannelRecord, DeviceRef, Error, Gain, PanelEvent, SampleRate,
    SessionEvent, SettingsStore, StreamId, StreamStatus,
};
use daxpanel_test_harness::{
    MemorySettingsStore, MockEndpointFactory, MockRadioSession, WAIT_TIMEOUT, wait_until,
};
use tokio::sync::broadcast;

struct Fixture {
    session: Arc<MockRadioSession>,
    factory: MockEndpointFactory,
    store: Arc<MemorySettingsStore>,
    manager: ChannelManager,
}

async fn fixture_with(session: MockRadioSession, store: MemorySettingsStore) -> Fixture {
    let session = Arc::new(session);
    let factory = MockEndpointFactory::new();
    let store = Arc::new(store);
    let manager = ChannelManagerBuilder::new(session.clone(), Arc::new(factory.clone()))
        .receive_channels(4)
        .iq_channels(2)
        .settings(store.clone())
        .build()
        .await
        .unwrap();
    Fixture {
        session,
        factory,
        store,
        manager,
    }
}

async fn fixture() -> Fixture {
    fixture_with(MockRadioSession::new(), MemorySettingsStore::new()).await
}

async fn wait_status(channel: &ChannelHandle, status: StreamStatus) -> bool {
    wait_until(WAIT_TIMEOUT, || channel.status() == status).await
}

async fn ready(channel: &ChannelHandle, device: &str) {
    channel
        .set_device(Some(DeviceRef::new(device)))
        .await
        .unwrap();
    channel.set_enabled(true).await.unwrap();
}

#[tokio::test]
async fn connect_starts_stream_and_binds_device() {
    let f = fixture_with(
        MockRadioSession::with_first_stream_id(7),
        MemorySettingsStore::new(),
    )
    .await;
    let rx1 = f.manager.require(ChannelId::receive(1)).unwrap();
    ready(rx1, "D1").await;
    assert_eq!(rx1.status(), StreamStatus::Off);
    assert!(f.session.requests().is_empty());

    f.manager.connectivity_changed(true).await.unwrap();
    assert!(wait_status(rx1, StreamStatus::Streaming).await);

    assert_eq!(f.session.requests().len(), 1);
    let snap = rx1.snapshot();
    assert_eq!(snap.stream_id, Some(StreamId(7)));
    let log = f.factory.log();
    assert_eq!(log.binds.len(), 1);
    assert_eq!(log.binds[0].2, DeviceRef::new("D1"));
}

#[tokio::test]
async fn disconnect_stops_only_streaming_channels() {
    let f = fixture().await;
    f.manager.connectivity_changed(true).await.unwrap();

    let five: Vec<_> = [
        ChannelId::receive(1),
        ChannelId::receive(2),
        ChannelId::receive(3),
        ChannelId::receive(4),
        ChannelId::iq(1),
    ]
    .iter()
    .map(|id| f.manager.require(*id).unwrap().clone())
    .collect();
    for ch in &five[..3] {
        ready(ch, "spk").await;
    }
    for ch in &five[..3] {
        assert!(wait_status(ch, StreamStatus::Streaming).await);
    }

    f.manager.connectivity_changed(false).await.unwrap();

    // Every channel is off as soon as the fan-out returns.
    for ch in &five {
        assert_eq!(ch.status(), StreamStatus::Off);
    }
    assert!(f.session.wait_for_releases(3).await);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(f.session.releases().len(), 3);
    assert_eq!(f.factory.log().stops.len(), 3);
}

#[tokio::test]
async fn device_change_while_streaming_is_live() {
    let f = fixture().await;
    let rx2 = f.manager.require(ChannelId::receive(2)).unwrap();
    ready(rx2, "D1").await;
    f.manager.connectivity_changed(true).await.unwrap();
    assert!(wait_status(rx2, StreamStatus::Streaming).await);
    let stream_id = rx2.snapshot().stream_id;

    rx2.set_device(Some(DeviceRef::new("D2"))).await.unwrap();

    assert_eq!(rx2.status(), StreamStatus::Streaming);
    assert_eq!(rx2.snapshot().stream_id, stream_id);
    assert_eq!(f.session.requests().len(), 1);
    assert!(f.session.releases().is_empty());
    let log = f.factory.log();
    assert_eq!(log.device_changes.len(), 1);
    assert_eq!(log.device_changes[0].1, DeviceRef::new("D2"));
}

#[tokio::test]
async fn gain_change_keeps_stream_id() {
    let f = fixture().await;
    let rx1 = f.manager.require(ChannelId::receive(1)).unwrap();
    ready(rx1, "spk").await;
    f.manager.connectivity_changed(true).await.unwrap();
    assert!(wait_status(rx1, StreamStatus::Streaming).await);
    let before = rx1.snapshot().stream_id;

    rx1.set_gain(Gain::new(90).unwrap()).await.unwrap();

    assert_eq!(rx1.snapshot().stream_id, before);
    assert_eq!(rx1.record().gain.percent(), 90);
    assert_eq!(f.factory.log().gain_changes.len(), 1);
    assert_eq!(f.session.requests().len(), 1);
}

#[tokio::test]
async fn iq_rate_change_restarts_stream() {
    let f = fixture().await;
    let iq1 = f.manager.require(ChannelId::iq(1)).unwrap();
    ready(iq1, "spk").await;
    f.manager.connectivity_changed(true).await.unwrap();
    assert!(wait_status(iq1, StreamStatus::Streaming).await);
    let first = iq1.snapshot().stream_id.unwrap();

    iq1.set_sample_rate(SampleRate::Hz192k).await.unwrap();
    assert!(f.session.wait_for_requests(2).await);
    assert!(wait_status(iq1, StreamStatus::Streaming).await);

    assert_eq!(f.session.releases(), vec![first]);
    let requests = f.session.requests();
    assert_eq!(requests[0].sample_rate, Some(SampleRate::Hz24k));
    assert_eq!(requests[1].sample_rate, Some(SampleRate::Hz192k));
    assert_ne!(iq1.snapshot().stream_id, Some(first));
}

#[tokio::test]
async fn late_completion_after_disable_is_released() {
    let f = fixture().await;
    let rx1 = f.manager.require(ChannelId::receive(1)).unwrap();
    f.session.hold_requests(true);
    ready(rx1, "spk").await;
    f.manager.connectivity_changed(true).await.unwrap();
    assert!(f.session.wait_for_held(1).await);
    assert_eq!(rx1.status(), StreamStatus::Requesting);

    rx1.set_enabled(false).await.unwrap();
    assert_eq!(rx1.status(), StreamStatus::Off);

    f.session.complete_held();
    assert!(f.session.wait_for_releases(1).await);

    assert_eq!(rx1.status(), StreamStatus::Off);
    assert!(f.factory.log().binds.is_empty());
    assert_eq!(f.session.releases(), vec![StreamId(1)]);
}

#[tokio::test]
async fn toggle_storm_never_binds_two_handles() {
    let f = fixture().await;
    let rx1 = f.manager.require(ChannelId::receive(1)).unwrap();
    rx1.set_device(Some(DeviceRef::new("spk"))).await.unwrap();
    f.manager.connectivity_changed(true).await.unwrap();

    for i in 0..20 {
        rx1.set_enabled(i % 2 == 0).await.unwrap();
    }
    // Last toggle was `false`; re-enable and settle.
    rx1.set_enabled(true).await.unwrap();
    assert!(wait_status(rx1, StreamStatus::Streaming).await);
    let requests = f.session.requests().len();
    assert!(f.session.wait_for_releases(requests - 1).await);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let log = f.factory.log();
    assert_eq!(log.binds.len() - log.stops.len(), 1);
    // Every request except the live one has been given back.
    assert_eq!(f.session.releases().len(), f.session.requests().len() - 1);
}

#[tokio::test]
async fn stop_on_idle_channel_makes_no_session_call() {
    let f = fixture().await;
    let rx3 = f.manager.require(ChannelId::receive(3)).unwrap();
    rx3.set_enabled(false).await.unwrap();
    f.manager.connectivity_changed(false).await.unwrap();
    rx3.disappear().await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert!(f.session.requests().is_empty());
    assert!(f.session.releases().is_empty());
}

#[tokio::test]
async fn reconnect_requests_a_new_stream() {
    let f = fixture().await;
    let mic = f.manager.require(ChannelId::microphone()).unwrap();
    ready(mic, "spk").await;
    f.manager.connectivity_changed(true).await.unwrap();
    assert!(wait_status(mic, StreamStatus::Streaming).await);
    let first = mic.snapshot().stream_id.unwrap();

    f.manager.connectivity_changed(false).await.unwrap();
    assert_eq!(mic.status(), StreamStatus::Off);
    assert!(f.session.wait_for_releases(1).await);
    assert_eq!(f.session.releases(), vec![first]);

    f.manager.connectivity_changed(true).await.unwrap();
    assert!(wait_status(mic, StreamStatus::Streaming).await);
    assert_eq!(f.session.requests().len(), 2);
    assert_ne!(mic.snapshot().stream_id, Some(first));
}

#[tokio::test]
async fn request_failure_alerts_and_disables() {
    let f = fixture().await;
    let mut events = f.manager.subscribe();
    f.session.fail_requests(Some("no DAX channels available"));
    let tx = f.manager.require(ChannelId::transmit()).unwrap();
    ready(tx, "mic-in").await;
    f.manager.connectivity_changed(true).await.unwrap();

    assert!(wait_until(WAIT_TIMEOUT, || !tx.record().enabled).await);
    assert_eq!(tx.status(), StreamStatus::Off);

    let mut alerted = false;
    while let Ok(event) = events.try_recv() {
        if let PanelEvent::StreamFailed { channel, reason } = event {
            assert_eq!(channel, ChannelId::transmit());
            assert!(reason.contains("no DAX channels available"));
            alerted = true;
        }
    }
    assert!(alerted);

    // Not retried: reconnecting does not issue another request.
    f.manager.connectivity_changed(false).await.unwrap();
    f.manager.connectivity_changed(true).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert_eq!(f.session.requests().len(), 1);

    assert!(
        wait_until(WAIT_TIMEOUT, || f.store.save_count() >= 3).await,
        "device, enable and disable should all be saved"
    );
    let saved = f.store.get(ChannelId::transmit()).await.unwrap();
    assert!(!saved.enabled);
}

#[tokio::test]
async fn vanished_device_stops_without_alert() {
    let f = fixture().await;
    let mut events = f.manager.subscribe();
    let rx1 = f.manager.require(ChannelId::receive(1)).unwrap();
    let rx2 = f.manager.require(ChannelId::receive(2)).unwrap();
    ready(rx1, "usb-headset").await;
    ready(rx2, "speakers").await;
    f.manager.connectivity_changed(true).await.unwrap();
    assert!(wait_status(rx1, StreamStatus::Streaming).await);
    assert!(wait_status(rx2, StreamStatus::Streaming).await);

    f.manager
        .devices_changed(&[AudioDevice::output("speakers", "Speakers")])
        .await
        .unwrap();

    assert_eq!(rx1.status(), StreamStatus::Off);
    assert!(rx1.record().device.is_none());
    assert!(rx1.record().enabled);
    assert_eq!(rx2.status(), StreamStatus::Streaming);

    let mut lost = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            PanelEvent::DeviceLost { channel, device } => lost.push((channel, device)),
            PanelEvent::StreamFailed { .. } => panic!("device loss must not alert"),
            _ => {}
        }
    }
    assert_eq!(lost, vec![(ChannelId::receive(1), DeviceRef::new("usb-headset"))]);
}

#[tokio::test]
async fn input_device_cannot_serve_receive_channel() {
    let f = fixture().await;
    let rx1 = f.manager.require(ChannelId::receive(1)).unwrap();
    let tx = f.manager.require(ChannelId::transmit()).unwrap();
    ready(rx1, "headset").await;
    ready(tx, "headset").await;

    f.manager
        .devices_changed(&[AudioDevice::input("headset", "Headset")])
        .await
        .unwrap();

    assert!(rx1.record().device.is_none());
    assert_eq!(tx.record().device, Some(DeviceRef::new("headset")));
}

#[tokio::test]
async fn status_events_follow_transitions() {
    let f = fixture().await;
    let mut events = f.manager.subscribe();
    let rx4 = f.manager.require(ChannelId::receive(4)).unwrap();
    ready(rx4, "spk").await;
    f.manager.connectivity_changed(true).await.unwrap();
    assert!(wait_status(rx4, StreamStatus::Streaming).await);

    let mut statuses = Vec::new();
    let mut connectivity = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            PanelEvent::StatusChanged { channel, status } if channel == ChannelId::receive(4) => {
                statuses.push(status)
            }
            PanelEvent::ConnectivityChanged { connected } => connectivity.push(connected),
            _ => {}
        }
    }
    assert_eq!(statuses, vec![StreamStatus::Requesting, StreamStatus::Streaming]);
    assert_eq!(connectivity, vec![true]);

    // Re-announcing the same state does not emit another event.
    f.manager.connectivity_changed(true).await.unwrap();
    assert!(!matches!(
        events.try_recv(),
        Ok(PanelEvent::ConnectivityChanged { .. })
    ));
}

#[tokio::test]
async fn hidden_channel_does_not_stream() {
    let f = fixture().await;
    let rx1 = f.manager.require(ChannelId::receive(1)).unwrap();
    ready(rx1, "spk").await;
    f.manager.connectivity_changed(true).await.unwrap();
    assert!(wait_status(rx1, StreamStatus::Streaming).await);

    rx1.disappear().await.unwrap();
    assert_eq!(rx1.status(), StreamStatus::Off);
    assert!(rx1.record().enabled);

    rx1.appear().await.unwrap();
    assert!(wait_status(rx1, StreamStatus::Streaming).await);
    assert_eq!(f.session.requests().len(), 2);
}

#[tokio::test]
async fn kind_specific_fields_are_rejected() {
    let f = fixture().await;
    let iq1 = f.manager.require(ChannelId::iq(1)).unwrap();
    let rx1 = f.manager.require(ChannelId::receive(1)).unwrap();
    assert!(matches!(
        iq1.set_gain(Gain::MAX).await,
        Err(Error::Unsupported(_))
    ));
    assert!(matches!(
        rx1.set_sample_rate(SampleRate::Hz48k).await,
        Err(Error::Unsupported(_))
    ));
    assert!(f.manager.channel(ChannelId::receive(7)).is_none());
    assert!(matches!(
        f.manager.require(ChannelId::iq(3)),
        Err(Error::InvalidParameter(_))
    ));
}

#[tokio::test]
async fn stored_records_are_loaded() {
    let stored = ChannelRecord::new(ChannelId::receive(3))
        .with_enabled(true)
        .with_device("hdmi");
    let session = MockRadioSession::new();
    session.set_connected(true);
    let f = fixture_with(session, MemorySettingsStore::with_records([stored])).await;

    let rx3 = f.manager.require(ChannelId::receive(3)).unwrap();
    assert!(rx3.record().enabled);
    assert!(f.manager.is_connected());
    assert!(wait_status(rx3, StreamStatus::Streaming).await);
    assert_eq!(f.factory.log().binds[0].2, DeviceRef::new("hdmi"));

    let rx1 = f.manager.require(ChannelId::receive(1)).unwrap();
    assert_eq!(rx1.record(), ChannelRecord::new(ChannelId::receive(1)));
}

#[tokio::test]
async fn deferred_announce_prunes_devices_before_streaming() {
    let unplugged = ChannelRecord::new(ChannelId::receive(1))
        .with_enabled(true)
        .with_device("unplugged");
    let hidden = ChannelRecord::new(ChannelId::iq(1))
        .with_enabled(true)
        .with_device("speakers");
    let session = Arc::new(MockRadioSession::new());
    session.set_connected(true);
    let factory = MockEndpointFactory::new();
    factory.remove_device("unplugged");
    let store = Arc::new(MemorySettingsStore::with_records([unplugged, hidden]));
    let manager = ChannelManagerBuilder::new(session.clone(), Arc::new(factory.clone()))
        .settings(store.clone())
        .announce_connectivity(false)
        .build()
        .await
        .unwrap();
    let mut events = manager.subscribe();
    assert!(!manager.is_connected());

    let rx1 = manager.require(ChannelId::receive(1)).unwrap();
    let iq1 = manager.require(ChannelId::iq(1)).unwrap();
    iq1.disappear().await.unwrap();
    manager
        .devices_changed(&[AudioDevice::output("speakers", "Speakers")])
        .await
        .unwrap();
    manager.connectivity_changed(true).await.unwrap();

    assert_eq!(rx1.status(), StreamStatus::Off);
    assert!(rx1.record().enabled);
    assert!(rx1.record().device.is_none());
    assert_eq!(iq1.status(), StreamStatus::Off);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(session.requests().is_empty());
    assert!(session.releases().is_empty());

    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, PanelEvent::StreamFailed { .. }),
            "a missing device must not alert"
        );
    }
    assert!(store.wait_for_saves(1).await);
    let saved = store.get(ChannelId::receive(1)).await.unwrap();
    assert!(saved.enabled);
    assert!(saved.device.is_none());
}

#[tokio::test]
async fn changes_are_persisted_in_order() {
    let f = fixture().await;
    let iq2 = f.manager.require(ChannelId::iq(2)).unwrap();
    iq2.set_sample_rate(SampleRate::Hz48k).await.unwrap();
    iq2.set_sample_rate(SampleRate::Hz96k).await.unwrap();
    iq2.set_details_visible(false).await.unwrap();
    assert!(f.store.wait_for_saves(3).await);

    let saved = f.store.load().await.unwrap();
    let iq2_saved = saved.iter().find(|r| r.id == ChannelId::iq(2)).unwrap();
    assert_eq!(iq2_saved.sample_rate, SampleRate::Hz96k);
    assert!(!iq2_saved.details_visible);
}

#[tokio::test]
async fn shutdown_releases_live_streams() {
    let f = fixture().await;
    let rx1 = f.manager.require(ChannelId::receive(1)).unwrap().clone();
    ready(&rx1, "spk").await;
    f.manager.connectivity_changed(true).await.unwrap();
    assert!(wait_status(&rx1, StreamStatus::Streaming).await);

    f.manager.shutdown().await;
    assert!(f.session.wait_for_releases(1).await);
    assert_eq!(rx1.status(), StreamStatus::Off);
    assert!(matches!(
        rx1.set_enabled(true).await,
        Err(Error::ChannelClosed(_))
    ));
}

#[tokio::test]
async fn follows_session_events() {
    let f = fixture().await;
    let manager = Arc::new(f.manager);
    let rx1 = manager.require(ChannelId::receive(1)).unwrap().clone();
    ready(&rx1, "spk").await;

    let (session_tx, session_rx) = broadcast::channel(8);
    let follower = manager.spawn_connectivity_follower(session_rx);

    session_tx.send(SessionEvent::Connected).unwrap();
    assert!(wait_status(&rx1, StreamStatus::Streaming).await);
    assert!(manager.is_connected());

    session_tx.send(SessionEvent::Disconnected).unwrap();
    assert!(wait_status(&rx1, StreamStatus::Off).await);

    session_tx.send(SessionEvent::Connected).unwrap();
    assert!(wait_status(&rx1, StreamStatus::Streaming).await);

    // Dropping the session's sender counts as a disconnect.
    drop(session_tx);
    follower.await.unwrap();
    assert!(!manager.is_connected());
    assert_eq!(rx1.status(), StreamStatus::Off);
    assert_eq!(f.session.requests().len(), 2);
}
