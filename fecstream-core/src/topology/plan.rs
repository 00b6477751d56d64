//! Declarative topology plans.
//!
//! [`TopologyPlan::for_config`] turns a [`StreamConfig`] into the full set
//! of elements, their properties, the static link chains, the request-pad
//! links and the relay legs that can only be linked at runtime. Both
//! topology modes go through this one function; only the transport tail
//! differs.
//!
//! ```text
//! media chain:  source → convert → scale → rate → caps → buffer
//!                      → encoder → parser → pay
//!
//! SessionRelay:      pay ─► rtpbin ─(send_rtp_src_0)─►  udpsink_rtp
//!                                  ─(send_fec_src_0)─►  udpsink_fec
//!                           rtpbin.send_rtcp_src_0   ─► udpsink_rtcp
//!                    udpsrc_rtcp ─► rtpbin.recv_rtcp_sink_0
//!
//! ManualRedundancy:  pay ─► tee ─► queue_rtp ─► udpsink_rtp
//!                               └► queue_fec ─► fecenc ─► udpsink_fec
//! ```

use crate::config::{SourceKind, StreamConfig, TopologyMode};
use crate::value::{Structure, Value};

/// Element names used by every plan.
pub mod names {
    pub const SOURCE: &str = "source";
    pub const CONVERT: &str = "convert";
    pub const SCALE: &str = "scale";
    pub const RATE: &str = "rate";
    pub const CAPS: &str = "caps";
    pub const BUFFER: &str = "buffer";
    pub const ENCODER: &str = "encoder";
    pub const PARSER: &str = "parser";
    pub const PAY: &str = "pay";
    pub const RELAY: &str = "rtpbin";
    pub const TEE: &str = "tee";
    pub const QUEUE_RTP: &str = "queue_rtp";
    pub const QUEUE_FEC: &str = "queue_fec";
    pub const FEC_ENCODER: &str = "fecenc";
    pub const SINK_RTP: &str = "udpsink_rtp";
    pub const SINK_FEC: &str = "udpsink_fec";
    pub const SINK_RTCP: &str = "udpsink_rtcp";
    pub const SRC_RTCP: &str = "udpsrc_rtcp";
}

use names::*;

/// Pad name prefix of the relay's primary RTP output.
pub const PRIMARY_LEG_PREFIX: &str = "send_rtp_src_0";
/// Pad name prefix of the relay's FEC output.
pub const REDUNDANCY_LEG_PREFIX: &str = "send_fec_src_0";

const PAYLOAD_TYPE: u32 = 96;
const PAYLOAD_MTU: u32 = 1200;
const SINK_TTL: i32 = 64;
const X264_TUNE_ZEROLATENCY: u32 = 0x0000_0004;
const X264_SPEED_ULTRAFAST: i32 = 1;
const QUEUE_LEAKY_DOWNSTREAM: i32 = 2;
const NSEC_PER_MSEC: u64 = 1_000_000;

// ── Plan types ───────────────────────────────────────────────────

/// One element to create and configure.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSpec {
    pub name: &'static str,
    pub factory: &'static str,
    pub properties: Vec<(&'static str, Value)>,
}

impl NodeSpec {
    fn new(name: &'static str, factory: &'static str) -> Self {
        Self {
            name,
            factory,
            properties: Vec::new(),
        }
    }

    fn with(mut self, property: &'static str, value: impl Into<Value>) -> Self {
        self.properties.push((property, value.into()));
        self
    }

    pub fn property(&self, property: &str) -> Option<&Value> {
        self.properties
            .iter()
            .find(|(k, _)| *k == property)
            .map(|(_, v)| v)
    }
}

/// How a link endpoint's pad is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadRef {
    /// Always present on the element.
    Static(&'static str),
    /// Created on demand from a template.
    Request(&'static str),
}

/// A link made at build time through a request pad.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeSpec {
    pub src: &'static str,
    pub src_pad: PadRef,
    pub sink: &'static str,
    pub sink_pad: PadRef,
}

/// A logical output of the session relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Leg {
    Primary,
    Redundancy,
}

impl std::fmt::Display for Leg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Redundancy => write!(f, "redundancy"),
        }
    }
}

/// A relay output that is linked once the relay creates its pad.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegSpec {
    pub leg: Leg,
    pub prefix: &'static str,
    pub sink: &'static str,
}

/// The session relay and its runtime-resolved outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySpec {
    pub name: &'static str,
    pub legs: Vec<LegSpec>,
}

/// Everything the builder needs to assemble one topology.
#[derive(Debug, Clone, PartialEq)]
pub struct TopologyPlan {
    pub mode: TopologyMode,
    pub nodes: Vec<NodeSpec>,
    /// Each chain is linked pairwise in order through static pads.
    pub chains: Vec<Vec<&'static str>>,
    pub request_links: Vec<EdgeSpec>,
    pub relay: Option<RelaySpec>,
}

impl TopologyPlan {
    /// Plan the topology selected by `cfg.mode()`.
    pub fn for_config(cfg: &StreamConfig) -> Self {
        let queue_ns = cfg.queue_time_ms() * NSEC_PER_MSEC;
        let ports = cfg.ports();
        let host = cfg.destination().to_string();
        let percent = u32::from(cfg.redundancy_percent());

        let mut nodes = media_chain(cfg, queue_ns);
        nodes.push(udp_sink(SINK_RTP, &host, ports.rtp));
        nodes.push(udp_sink(SINK_FEC, &host, ports.fec));

        let mut chains = vec![vec![
            SOURCE, CONVERT, SCALE, RATE, CAPS, BUFFER, ENCODER, PARSER, PAY,
        ]];
        let mut request_links = Vec::new();
        let mut relay = None;

        match cfg.mode() {
            TopologyMode::SessionRelay => {
                let fec_encoders = Structure::new("fec")
                    .with("0", format!("rtpulpfecenc percentage={percent}"));
                nodes.push(
                    NodeSpec::new(RELAY, "rtpbin")
                        .with("fec-encoders", fec_encoders)
                        .with("latency", cfg.latency_ms()),
                );
                nodes.push(udp_sink(SINK_RTCP, &host, ports.rtcp_send));
                nodes.push(
                    NodeSpec::new(SRC_RTCP, "udpsrc").with("port", i32::from(ports.rtcp_recv)),
                );

                request_links = vec![
                    EdgeSpec {
                        src: PAY,
                        src_pad: PadRef::Static("src"),
                        sink: RELAY,
                        sink_pad: PadRef::Request("send_rtp_sink_0"),
                    },
                    EdgeSpec {
                        src: RELAY,
                        src_pad: PadRef::Request("send_rtcp_src_0"),
                        sink: SINK_RTCP,
                        sink_pad: PadRef::Static("sink"),
                    },
                    EdgeSpec {
                        src: SRC_RTCP,
                        src_pad: PadRef::Static("src"),
                        sink: RELAY,
                        sink_pad: PadRef::Request("recv_rtcp_sink_0"),
                    },
                ];

                relay = Some(RelaySpec {
                    name: RELAY,
                    legs: vec![
                        LegSpec {
                            leg: Leg::Primary,
                            prefix: PRIMARY_LEG_PREFIX,
                            sink: SINK_RTP,
                        },
                        LegSpec {
                            leg: Leg::Redundancy,
                            prefix: REDUNDANCY_LEG_PREFIX,
                            sink: SINK_FEC,
                        },
                    ],
                });
            }
            TopologyMode::ManualRedundancy => {
                nodes.push(NodeSpec::new(TEE, "tee"));
                nodes.push(bounded_queue(QUEUE_RTP, queue_ns));
                nodes.push(bounded_queue(QUEUE_FEC, queue_ns));
                nodes.push(NodeSpec::new(FEC_ENCODER, "rtpulpfecenc").with("percentage", percent));

                chains.push(vec![PAY, TEE]);
                chains.push(vec![TEE, QUEUE_RTP, SINK_RTP]);
                chains.push(vec![TEE, QUEUE_FEC, FEC_ENCODER, SINK_FEC]);
            }
        }

        Self {
            mode: cfg.mode(),
            nodes,
            chains,
            request_links,
            relay,
        }
    }

    pub fn node(&self, name: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Nodes created from `factory`.
    pub fn nodes_of(&self, factory: &str) -> impl Iterator<Item = &NodeSpec> {
        self.nodes.iter().filter(move |n| n.factory == factory)
    }

    /// Runtime-resolved legs; empty outside SessionRelay mode.
    pub fn legs(&self) -> &[LegSpec] {
        self.relay.as_ref().map_or(&[], |r| r.legs.as_slice())
    }
}

// ── Element presets ──────────────────────────────────────────────

fn media_chain(cfg: &StreamConfig, queue_ns: u64) -> Vec<NodeSpec> {
    let profile = cfg.profile();
    let fps = i32::try_from(profile.fps).unwrap_or(i32::MAX);

    let source = NodeSpec::new(SOURCE, cfg.source().factory());
    let source = match cfg.source() {
        SourceKind::Screen => source.with("use-damage", false).with("show-pointer", false),
        SourceKind::Camera => source.with("io-mode", 4).with("do-timestamp", true),
        SourceKind::Synthetic => source.with("is-live", true).with("pattern", 0),
    };

    let caps = Structure::new("video/x-raw")
        .with("width", Value::Int(i64::from(profile.width)))
        .with("height", Value::Int(i64::from(profile.height)))
        .with("framerate", Value::Fraction(fps, 1))
        .with("format", "I420");

    vec![
        source,
        NodeSpec::new(CONVERT, "videoconvert"),
        NodeSpec::new(SCALE, "videoscale"),
        NodeSpec::new(RATE, "videorate")
            .with("skip-to-first", true)
            .with("drop-only", true)
            .with("max-duplication-time", 0u64),
        NodeSpec::new(CAPS, "capsfilter").with("caps", Value::Caps(caps)),
        bounded_queue(BUFFER, queue_ns),
        NodeSpec::new(ENCODER, "x264enc")
            .with("tune", X264_TUNE_ZEROLATENCY)
            .with("speed-preset", X264_SPEED_ULTRAFAST)
            .with("key-int-max", profile.fps.saturating_mul(2))
            .with("bitrate", profile.bitrate_kbps)
            .with("byte-stream", true)
            .with("bframes", 0u32)
            .with("option-string", "repeat-headers=1"),
        NodeSpec::new(PARSER, "h264parse"),
        NodeSpec::new(PAY, "rtph264pay")
            .with("pt", PAYLOAD_TYPE)
            .with("config-interval", 1)
            .with("mtu", PAYLOAD_MTU),
    ]
}

/// Leaky, time-bounded queue: drop oldest, never block upstream.
fn bounded_queue(name: &'static str, max_ns: u64) -> NodeSpec {
    NodeSpec::new(name, "queue")
        .with("leaky", QUEUE_LEAKY_DOWNSTREAM)
        .with("max-size-buffers", 0u32)
        .with("max-size-bytes", 0u32)
        .with("max-size-time", max_ns)
        .with("min-threshold-time", max_ns / 2)
}

fn udp_sink(name: &'static str, host: &str, port: u16) -> NodeSpec {
    NodeSpec::new(name, "udpsink")
        .with("host", host)
        .with("port", i32::from(port))
        .with("ttl", SINK_TTL)
        .with("sync", false)
        .with("async", false)
        .with("qos", true)
        .with("buffer-size", 0)
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PortMap, VideoProfile};

    fn cfg(mode: TopologyMode, latency_ms: u32) -> StreamConfig {
        StreamConfig::new(
            "10.0.0.5",
            PortMap::new(5000, 5001, 5002, 5003).unwrap(),
            VideoProfile::default(),
            SourceKind::Synthetic,
            20,
            mode,
            latency_ms,
        )
        .unwrap()
    }

    #[test]
    fn source_node_uses_the_kind_factory() {
        for (kind, property) in [
            (SourceKind::Screen, "show-pointer"),
            (SourceKind::Camera, "io-mode"),
            (SourceKind::Synthetic, "is-live"),
        ] {
            let cfg = StreamConfig::new(
                "10.0.0.5",
                PortMap::new(5000, 5001, 5002, 5003).unwrap(),
                VideoProfile::default(),
                kind,
                20,
                TopologyMode::SessionRelay,
                50,
            )
            .unwrap();
            let plan = TopologyPlan::for_config(&cfg);
            let source = plan.node(SOURCE).unwrap();
            assert_eq!(source.factory, kind.factory());
            assert!(source.property(property).is_some(), "{kind:?}");
        }
    }

    #[test]
    fn session_relay_declares_one_relay_with_two_legs() {
        let plan = TopologyPlan::for_config(&cfg(TopologyMode::SessionRelay, 50));

        assert_eq!(plan.nodes_of("rtpbin").count(), 1);
        assert_eq!(plan.nodes_of("tee").count(), 0);

        let legs: Vec<_> = plan.legs().iter().map(|l| (l.leg, l.prefix)).collect();
        assert_eq!(
            legs,
            [
                (Leg::Primary, PRIMARY_LEG_PREFIX),
                (Leg::Redundancy, REDUNDANCY_LEG_PREFIX)
            ]
        );

        let relay = plan.node(RELAY).unwrap();
        let fec = relay.property("fec-encoders").and_then(Value::as_structure).unwrap();
        assert_eq!(fec.get("0").and_then(Value::as_str), Some("rtpulpfecenc percentage=20"));
        assert_eq!(relay.property("latency"), Some(&Value::UInt(50)));
    }

    #[test]
    fn session_relay_links_control_legs_eagerly() {
        let plan = TopologyPlan::for_config(&cfg(TopologyMode::SessionRelay, 50));
        let requests: Vec<_> = plan
            .request_links
            .iter()
            .flat_map(|e| [e.src_pad, e.sink_pad])
            .filter_map(|p| match p {
                PadRef::Request(t) => Some(t),
                PadRef::Static(_) => None,
            })
            .collect();
        assert_eq!(requests, ["send_rtp_sink_0", "send_rtcp_src_0", "recv_rtcp_sink_0"]);
        assert_eq!(plan.chains.len(), 1);
    }

    #[test]
    fn manual_redundancy_fans_out_through_queues() {
        let plan = TopologyPlan::for_config(&cfg(TopologyMode::ManualRedundancy, 50));

        assert!(plan.relay.is_none());
        assert!(plan.request_links.is_empty());
        assert_eq!(
            plan.chains[1..],
            [
                vec![PAY, TEE],
                vec![TEE, QUEUE_RTP, SINK_RTP],
                vec![TEE, QUEUE_FEC, FEC_ENCODER, SINK_FEC],
            ]
        );
        assert_eq!(
            plan.node(FEC_ENCODER).unwrap().property("percentage"),
            Some(&Value::UInt(20))
        );
    }

    #[test]
    fn every_queue_is_leaky_and_time_bounded() {
        let plan = TopologyPlan::for_config(&cfg(TopologyMode::ManualRedundancy, 4));
        let queues: Vec<_> = plan.nodes_of("queue").collect();
        assert_eq!(queues.len(), 3);
        for q in queues {
            assert_eq!(q.property("leaky"), Some(&Value::Int(2)));
            assert_eq!(q.property("max-size-buffers"), Some(&Value::UInt(0)));
            assert_eq!(q.property("max-size-bytes"), Some(&Value::UInt(0)));
            // 4 ms latency is raised to the 10 ms floor.
            assert_eq!(q.property("max-size-time"), Some(&Value::UInt(10_000_000)));
        }
    }

    #[test]
    fn sinks_target_the_configured_ports() {
        let plan = TopologyPlan::for_config(&cfg(TopologyMode::SessionRelay, 50));
        let port = |name| plan.node(name).unwrap().property("port").cloned();
        assert_eq!(port(SINK_RTP), Some(Value::Int(5000)));
        assert_eq!(port(SINK_FEC), Some(Value::Int(5001)));
        assert_eq!(port(SINK_RTCP), Some(Value::Int(5002)));
        assert_eq!(port(SRC_RTCP), Some(Value::Int(5003)));
        assert_eq!(
            plan.node(SINK_RTP).unwrap().property("host"),
            Some(&Value::Str("10.0.0.5".into()))
        );
    }

    #[test]
    fn encoder_starts_at_profile_bitrate() {
        let plan = TopologyPlan::for_config(&cfg(TopologyMode::SessionRelay, 50));
        let enc = plan.node(ENCODER).unwrap();
        assert_eq!(enc.property("bitrate"), Some(&Value::UInt(4000)));
        assert_eq!(enc.property("key-int-max"), Some(&Value::UInt(60)));
    }
}
