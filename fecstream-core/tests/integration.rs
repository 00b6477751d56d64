//! Integration tests: topology assembly, relay binding and the adaptive
//! bitrate loop running end to end against the simulated backend.

use std::sync::Arc;
use std::time::Duration;

use fecstream_core::qos::monitor::FRACTION_LOST_FIELD;
use fecstream_core::topology::plan::{PRIMARY_LEG_PREFIX, REDUNDANCY_LEG_PREFIX};
use fecstream_core::topology::{Leg, TopologyBuilder, TopologyPlan};
use fecstream_core::{
    ConfigError, Engine, PipelineState, PortMap, QosSettings, RunOutcome, SimPipeline, SourceKind,
    StreamConfig, Structure, TopologyMode, Value, VideoProfile,
};
use tokio_util::sync::CancellationToken;

// ── Helpers ──────────────────────────────────────────────────────

fn config(mode: TopologyMode) -> StreamConfig {
    StreamConfig::new(
        "10.0.0.5",
        PortMap::new(5000, 5001, 5002, 5003).unwrap(),
        VideoProfile::default(),
        SourceKind::Synthetic,
        20,
        mode,
        50,
    )
    .unwrap()
}

fn fast_qos() -> QosSettings {
    QosSettings {
        interval_ms: 10,
        ..QosSettings::default()
    }
}

fn encoder_bitrate(sim: &SimPipeline) -> u64 {
    sim.property_of("encoder", "bitrate")
        .and_then(|v| v.as_u64())
        .expect("encoder bitrate")
}

/// Cancel `token` after `ms` milliseconds.
fn cancel_after(token: &CancellationToken, ms: u64) {
    let token = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        token.cancel();
    });
}

// ── Topology ─────────────────────────────────────────────────────

#[test]
fn test_session_relay_plan() {
    let plan = TopologyPlan::for_config(&config(TopologyMode::SessionRelay));

    assert_eq!(plan.nodes_of("rtpbin").count(), 1);
    let legs: Vec<_> = plan.legs().iter().map(|l| l.leg).collect();
    assert_eq!(legs, [Leg::Primary, Leg::Redundancy]);

    let sim = Arc::new(SimPipeline::new());
    let topo = TopologyBuilder::new(sim).build(&plan).unwrap();
    assert_eq!(
        topo.pending_prefixes(),
        [PRIMARY_LEG_PREFIX, REDUNDANCY_LEG_PREFIX]
    );
}

#[test]
fn test_invalid_config_rejected_before_core() {
    let err = StreamConfig::new(
        "10.0.0",
        PortMap::new(5000, 5001, 5002, 5003).unwrap(),
        VideoProfile::default(),
        SourceKind::Screen,
        20,
        TopologyMode::SessionRelay,
        50,
    )
    .unwrap_err();
    assert!(matches!(err, ConfigError::InvalidAddress(_)));

    assert!(matches!(
        PortMap::new(5000, 5000, 5002, 5003),
        Err(ConfigError::DuplicatePort { .. })
    ));
}

#[test]
fn test_degraded_leg_keeps_streaming() {
    let sim = Arc::new(SimPipeline::new());
    sim.refuse_link("rtpbin", "udpsink_fec");

    let session = Engine::new(sim.clone(), config(TopologyMode::SessionRelay))
        .start()
        .unwrap();

    assert_eq!(sim.state(), PipelineState::Playing);
    let topo = session.topology().unwrap();
    let sinks: Vec<_> = topo
        .resolved_edges()
        .into_iter()
        .map(|e| e.sink.name().to_string())
        .collect();
    assert_eq!(sinks, ["udpsink_rtp"]);
    assert!(topo.pending_prefixes().is_empty());
}

// ── Adaptive bitrate ─────────────────────────────────────────────

#[tokio::test]
async fn test_sustained_loss_backs_off_to_floor() {
    let sim = Arc::new(SimPipeline::new());
    sim.set_session_stats(
        "rtpbin",
        Structure::new("application/x-rtp-session-stats").with(
            "source-stats",
            Value::Array(vec![Value::Structure(
                Structure::new("application/x-rtp-source-stats").with(FRACTION_LOST_FIELD, 0.10),
            )]),
        ),
    );

    let mut session = Engine::new(sim.clone(), config(TopologyMode::SessionRelay))
        .with_qos(fast_qos())
        .start()
        .unwrap();

    let cancel = CancellationToken::new();
    cancel_after(&cancel, 300);
    assert_eq!(session.run(&cancel).await, RunOutcome::Cancelled);
    session.shutdown();

    let bitrate = encoder_bitrate(&sim);
    assert!((2400..4000).contains(&bitrate), "bitrate {bitrate}");
    assert_eq!(sim.state(), PipelineState::Null);

    // No write happens once the session is down.
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(encoder_bitrate(&sim), bitrate);
}

#[tokio::test]
async fn test_clean_link_recovers_toward_ceiling() {
    let sim = Arc::new(SimPipeline::new());
    sim.set_session_stats(
        "rtpbin",
        Structure::new("session").with(FRACTION_LOST_FIELD, 0.0),
    );

    let mut session = Engine::new(sim.clone(), config(TopologyMode::SessionRelay))
        .with_qos(fast_qos())
        .start()
        .unwrap();

    let cancel = CancellationToken::new();
    cancel_after(&cancel, 200);
    session.run(&cancel).await;
    session.shutdown();

    let bitrate = encoder_bitrate(&sim);
    assert!(bitrate > 4000 && bitrate <= 6000, "bitrate {bitrate}");
}

#[tokio::test]
async fn test_no_statistics_leaves_bitrate_alone() {
    let sim = Arc::new(SimPipeline::new());

    let outcome = fecstream_core::engine::run(
        Engine::new(sim.clone(), config(TopologyMode::ManualRedundancy)).with_qos(fast_qos()),
        {
            let cancel = CancellationToken::new();
            cancel_after(&cancel, 100);
            cancel
        },
    )
    .await
    .unwrap();

    assert_eq!(outcome, RunOutcome::Cancelled);
    assert_eq!(encoder_bitrate(&sim), 4000);
    assert_eq!(sim.state(), PipelineState::Null);
}
