//! Stream configuration consumed by the topology builder.
//!
//! A [`StreamConfig`] is validated once at construction and is immutable
//! afterwards. Everything downstream assumes it is well-formed.

use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ── Ports ────────────────────────────────────────────────────────

/// The four UDP port roles of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PortMap {
    /// Primary RTP media (remote).
    pub rtp: u16,
    /// FEC RTP media (remote).
    pub fec: u16,
    /// RTCP sender reports (remote).
    pub rtcp_send: u16,
    /// RTCP receiver reports (local bind).
    pub rtcp_recv: u16,
}

impl PortMap {
    /// Validate raw port numbers and build a map.
    ///
    /// Every port must be in `1..=65535` and the four roles must be
    /// pairwise distinct.
    pub fn new(rtp: i64, fec: i64, rtcp_send: i64, rtcp_recv: i64) -> Result<Self, ConfigError> {
        let ports = Self {
            rtp: checked_port("rtp", rtp)?,
            fec: checked_port("fec", fec)?,
            rtcp_send: checked_port("rtcp-send", rtcp_send)?,
            rtcp_recv: checked_port("rtcp-recv", rtcp_recv)?,
        };

        let roles = ports.roles();
        for (i, (first, a)) in roles.iter().enumerate() {
            for (second, b) in roles.iter().skip(i + 1) {
                if a == b {
                    return Err(ConfigError::DuplicatePort {
                        first,
                        second,
                        port: *a,
                    });
                }
            }
        }

        Ok(ports)
    }

    fn roles(&self) -> [(&'static str, u16); 4] {
        [
            ("rtp", self.rtp),
            ("fec", self.fec),
            ("rtcp-send", self.rtcp_send),
            ("rtcp-recv", self.rtcp_recv),
        ]
    }
}

fn checked_port(role: &'static str, value: i64) -> Result<u16, ConfigError> {
    if value > 0 && value < 65536 {
        Ok(value as u16)
    } else {
        Err(ConfigError::InvalidPort { role, value })
    }
}

// ── VideoProfile ─────────────────────────────────────────────────

/// Capture resolution, frame rate and initial encoder bitrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoProfile {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Initial encoder target in kbps.
    pub bitrate_kbps: u32,
}

impl Default for VideoProfile {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30,
            bitrate_kbps: 4000,
        }
    }
}

// ── Enums ────────────────────────────────────────────────────────

/// Where frames come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Desktop capture.
    #[default]
    Screen,
    /// V4L2 camera.
    Camera,
    /// Live test pattern.
    Synthetic,
}

impl SourceKind {
    /// The element factory that produces this source.
    pub fn factory(self) -> &'static str {
        match self {
            Self::Screen => "ximagesrc",
            Self::Camera => "v4l2src",
            Self::Synthetic => "videotestsrc",
        }
    }
}

/// Which transport topology to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TopologyMode {
    /// RTP session relay owns the primary/FEC legs and RTCP exchange.
    #[default]
    SessionRelay,
    /// Tee fan-out with an explicit redundancy encoder branch.
    ManualRedundancy,
}

impl fmt::Display for TopologyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionRelay => write!(f, "session-relay"),
            Self::ManualRedundancy => write!(f, "manual-redundancy"),
        }
    }
}

// ── StreamConfig ─────────────────────────────────────────────────

/// Validated, immutable stream description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamConfig {
    destination: Ipv4Addr,
    ports: PortMap,
    profile: VideoProfile,
    source: SourceKind,
    redundancy_percent: u8,
    mode: TopologyMode,
    latency_ms: u32,
}

impl StreamConfig {
    /// Default FEC redundancy, enough to ride out roughly 5 % loss.
    pub const DEFAULT_REDUNDANCY_PERCENT: u8 = 20;
    /// Default sender latency hint.
    pub const DEFAULT_LATENCY_MS: u32 = 50;

    /// Build a config, validating the address and profile.
    ///
    /// `redundancy_percent` is clamped into `0..=100`.
    pub fn new(
        destination: &str,
        ports: PortMap,
        profile: VideoProfile,
        source: SourceKind,
        redundancy_percent: i64,
        mode: TopologyMode,
        latency_ms: u32,
    ) -> Result<Self, ConfigError> {
        let destination = parse_dotted_quad(destination)?;
        if profile.width == 0 || profile.height == 0 {
            return Err(ConfigError::InvalidProfile("width and height must be non-zero"));
        }
        if profile.fps == 0 {
            return Err(ConfigError::InvalidProfile("fps must be non-zero"));
        }

        Ok(Self {
            destination,
            ports,
            profile,
            source,
            redundancy_percent: redundancy_percent.clamp(0, 100) as u8,
            mode,
            latency_ms,
        })
    }

    pub fn destination(&self) -> Ipv4Addr {
        self.destination
    }

    pub fn ports(&self) -> PortMap {
        self.ports
    }

    pub fn profile(&self) -> VideoProfile {
        self.profile
    }

    pub fn source(&self) -> SourceKind {
        self.source
    }

    pub fn redundancy_percent(&self) -> u8 {
        self.redundancy_percent
    }

    pub fn mode(&self) -> TopologyMode {
        self.mode
    }

    pub fn latency_ms(&self) -> u32 {
        self.latency_ms
    }

    /// Queue time bound in milliseconds; never below 10 ms.
    pub fn queue_time_ms(&self) -> u64 {
        u64::from(self.latency_ms.max(10))
    }
}

/// Strict dotted-quad parser: four decimal octets of 1–3 digits.
fn parse_dotted_quad(ip: &str) -> Result<Ipv4Addr, ConfigError> {
    let invalid = || ConfigError::InvalidAddress(ip.to_string());

    let mut octets = [0u8; 4];
    let mut count = 0;
    for part in ip.split('.') {
        if count == 4 || part.is_empty() || part.len() > 3 {
            return Err(invalid());
        }
        if !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let value: u16 = part.parse().map_err(|_| invalid())?;
        octets[count] = u8::try_from(value).map_err(|_| invalid())?;
        count += 1;
    }

    if count == 4 {
        Ok(Ipv4Addr::from(octets))
    } else {
        Err(invalid())
    }
}

// ── Tests ────────────────────────────────────────────────────────
