use pretty_assertions::assert_eq;
use sharedline_sim::{HOST_DEVICE, PARTNER_DEVICE, SimConfig, run_simulation};
use sharedline_sync::{PairingState, Role};

#[tokio::test]
async fn devices_sync_and_mirror_strokes() {
    let config = SimConfig {
        seed_strokes: 2,
        ..SimConfig::default()
    };
    let report = run_simulation(&config).await.unwrap();

    assert!(report.synced());
    assert!(report.room.is_some());
    assert!(report.anchor_id.is_some());
    assert_eq!(report.host.participant, HOST_DEVICE);
    assert_eq!(report.partner.participant, PARTNER_DEVICE);
    assert!(
        report
            .host
            .transitions
            .contains(&PairingState::AwaitingPartnerAnchorReady(Role::Host))
    );
    assert!(
        report
            .partner
            .transitions
            .contains(&PairingState::PartnerConnecting)
    );

    for device in [&report.host, &report.partner] {
        assert_eq!(device.strokes_sent, 2);
        assert_eq!(device.strokes_received, 2);
        assert!(device.points_received >= 2);
        assert_eq!(device.anchors_resolved, 1);
        assert_eq!(device.uploads_dropped, 0);
    }
}

#[tokio::test]
async fn hosting_failure_stops_both_devices() {
    let config = SimConfig {
        fail_hosting: true,
        ..SimConfig::default()
    };
    let report = run_simulation(&config).await.unwrap();

    assert!(!report.synced());
    assert_eq!(report.host.final_state, PairingState::HostAnchorError);
    assert_eq!(report.partner.final_state, PairingState::HostAnchorError);
    assert_eq!(report.host.strokes_sent, 0);
    assert_eq!(report.partner.strokes_received, 0);
    assert_eq!(report.anchor_id, None);
}

#[tokio::test]
async fn report_lists_state_path() {
    let config = SimConfig {
        seed_strokes: 0,
        ..SimConfig::default()
    };
    let report = run_simulation(&config).await.unwrap();
    let text = report.to_string();

    assert!(text.contains("device-a (synced)"), "{text}");
    assert!(text.contains("discovering -> awaiting_partner_anchor_ready(host)"), "{text}");
    assert!(text.contains("0 sent, 0 received"), "{text}");
}
