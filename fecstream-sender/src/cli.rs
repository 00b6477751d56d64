//! Command-line interface.
//!
//! ```text
//! fecstream-sender <dest_ip> <rtp> <fec> <rtcp_send> <rtcp_recv> [options]
//! fecstream-sender --gen-config
//! ```
//!
//! Positional ports map to: primary RTP, FEC RTP, RTCP sent to the
//! receiver, RTCP received locally.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use fecstream_core::{ConfigError, PortMap, SourceKind, StreamConfig, TopologyMode, VideoProfile};

use crate::config::SenderConfig;

#[derive(Parser, Debug)]
#[command(
    name = "fecstream-sender",
    version,
    about = "Low-latency H.264 RTP sender with FEC and adaptive bitrate"
)]
pub struct Cli {
    /// Destination IPv4 address (dotted quad).
    #[arg(required_unless_present = "gen_config")]
    pub dest_ip: Option<String>,

    /// Primary RTP port.
    #[arg(required_unless_present = "gen_config", allow_negative_numbers = true)]
    pub rtp_port: Option<i64>,

    /// FEC RTP port.
    #[arg(required_unless_present = "gen_config", allow_negative_numbers = true)]
    pub fec_port: Option<i64>,

    /// RTCP port on the receiver.
    #[arg(required_unless_present = "gen_config", allow_negative_numbers = true)]
    pub rtcp_send_port: Option<i64>,

    /// Local RTCP port for receiver reports.
    #[arg(required_unless_present = "gen_config", allow_negative_numbers = true)]
    pub rtcp_recv_port: Option<i64>,

    /// Video source.
    #[arg(long, value_enum)]
    pub source: Option<SourceArg>,

    /// Capture width in pixels.
    #[arg(long)]
    pub width: Option<u32>,

    /// Capture height in pixels.
    #[arg(long)]
    pub height: Option<u32>,

    /// Frames per second.
    #[arg(long)]
    pub fps: Option<u32>,

    /// Initial encoder bitrate in kbps.
    #[arg(long)]
    pub bitrate: Option<u32>,

    /// FEC redundancy percentage, clamped to 0-100.
    #[arg(long, allow_negative_numbers = true)]
    pub fec: Option<i64>,

    /// Transport topology.
    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,

    /// Target latency in milliseconds.
    #[arg(long)]
    pub latency: Option<u32>,

    /// QoS sampling interval in milliseconds.
    #[arg(long)]
    pub qos_interval_ms: Option<u64>,

    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "fecstream-sender.toml")]
    pub config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    pub gen_config: bool,

    /// Run the control plane against the in-memory pipeline.
    #[arg(long)]
    pub simulate: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceArg {
    /// X11 screen capture.
    #[value(alias = "ximagesrc")]
    Screen,
    /// V4L2 camera.
    #[value(alias = "v4l2src")]
    Camera,
    /// Live test pattern.
    #[value(alias = "videotestsrc")]
    Synthetic,
}

impl From<SourceArg> for SourceKind {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::Screen => Self::Screen,
            SourceArg::Camera => Self::Camera,
            SourceArg::Synthetic => Self::Synthetic,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeArg {
    /// RTP session relay with RTCP feedback.
    #[value(alias = "rtpbin")]
    SessionRelay,
    /// Tee fan-out with a dedicated FEC branch.
    #[value(alias = "manual")]
    ManualRedundancy,
}

impl From<ModeArg> for TopologyMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::SessionRelay => Self::SessionRelay,
            ModeArg::ManualRedundancy => Self::ManualRedundancy,
        }
    }
}

impl Cli {
    /// Resolve the stream configuration.
    ///
    /// Precedence: command line, then settings file, then `profile`
    /// (normally the auto-selected host profile).
    pub fn stream_config(
        &self,
        settings: &SenderConfig,
        profile: VideoProfile,
    ) -> Result<StreamConfig, ConfigError> {
        let ports = PortMap::new(
            port_arg(self.rtp_port, "rtp")?,
            port_arg(self.fec_port, "fec")?,
            port_arg(self.rtcp_send_port, "rtcp-send")?,
            port_arg(self.rtcp_recv_port, "rtcp-recv")?,
        )?;

        let profile = VideoProfile {
            width: self.width.unwrap_or(profile.width),
            height: self.height.unwrap_or(profile.height),
            fps: self.fps.unwrap_or(profile.fps),
            bitrate_kbps: self.bitrate.unwrap_or(profile.bitrate_kbps),
        };

        let stream = &settings.stream;
        StreamConfig::new(
            self.dest_ip.as_deref().unwrap_or_default(),
            ports,
            profile,
            self.source.map_or(stream.source, SourceKind::from),
            self.fec.unwrap_or(stream.redundancy_percent),
            self.mode.map_or(stream.mode, TopologyMode::from),
            self.latency.unwrap_or(stream.latency_ms),
        )
    }
}

fn port_arg(value: Option<i64>, role: &'static str) -> Result<i64, ConfigError> {
    value.ok_or(ConfigError::InvalidPort { role, value: 0 })
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["fecstream-sender"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    const PORTS: [&str; 5] = ["10.0.0.5", "5000", "5001", "5002", "5003"];

    #[test]
    fn positional_only_uses_defaults() {
        let cli = parse(&PORTS);
        let cfg = cli
            .stream_config(&SenderConfig::default(), VideoProfile::default())
            .unwrap();

        assert_eq!(cfg.destination().to_string(), "10.0.0.5");
        assert_eq!(cfg.ports().rtcp_recv, 5003);
        assert_eq!(cfg.redundancy_percent(), 20);
        assert_eq!(cfg.mode(), TopologyMode::SessionRelay);
        assert_eq!(cfg.latency_ms(), 50);
        assert_eq!(cfg.source(), SourceKind::Screen);
        assert_eq!(cfg.profile(), VideoProfile::default());
    }

    #[test]
    fn flags_override_profile_and_settings() {
        let mut args = PORTS.to_vec();
        args.extend([
            "--source", "camera", "--width", "640", "--fps", "15", "--fec", "150", "--mode",
            "manual-redundancy", "--latency", "20",
        ]);
        let cfg = parse(&args)
            .stream_config(&SenderConfig::default(), VideoProfile::default())
            .unwrap();

        assert_eq!(cfg.source(), SourceKind::Camera);
        assert_eq!(cfg.profile().width, 640);
        assert_eq!(cfg.profile().height, 720);
        assert_eq!(cfg.profile().fps, 15);
        assert_eq!(cfg.redundancy_percent(), 100);
        assert_eq!(cfg.mode(), TopologyMode::ManualRedundancy);
        assert_eq!(cfg.latency_ms(), 20);
    }

    #[test]
    fn factory_names_are_accepted_as_sources() {
        let mut args = PORTS.to_vec();
        args.extend(["--source", "videotestsrc"]);
        assert_eq!(parse(&args).source, Some(SourceArg::Synthetic));
    }

    #[test]
    fn out_of_range_port_is_a_config_error() {
        let cli = parse(&["10.0.0.5", "5000", "70000", "5002", "5003"]);
        let err = cli
            .stream_config(&SenderConfig::default(), VideoProfile::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPort { role: "fec", value: 70000 }));
    }

    #[test]
    fn bad_address_is_a_config_error() {
        let cli = parse(&["10.0.0.256", "5000", "5001", "5002", "5003"]);
        assert!(
            cli.stream_config(&SenderConfig::default(), VideoProfile::default())
                .is_err()
        );
    }

    #[test]
    fn gen_config_needs_no_positionals() {
        assert!(parse(&["--gen-config"]).gen_config);
    }

    #[test]
    fn missing_ports_are_rejected() {
        assert!(Cli::try_parse_from(["fecstream-sender", "10.0.0.5", "5000"]).is_err());
    }
}
