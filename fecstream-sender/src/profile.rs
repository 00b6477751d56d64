//! Host-based default video profile.

use sysinfo::System;
use tracing::info;

use fecstream_core::VideoProfile;

/// The host resources the profile heuristic looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostInfo {
    pub cores: usize,
    pub memory_mb: u64,
}

impl HostInfo {
    /// Query core count and total memory.
    pub fn probe() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu();
        sys.refresh_memory();

        Self {
            cores: sys.cpus().len().max(1),
            memory_mb: sys.total_memory() / (1024 * 1024),
        }
    }
}

/// Pick a capture profile the host can encode in real time.
pub fn auto_select(host: HostInfo) -> VideoProfile {
    let profile = if host.cores >= 8 && host.memory_mb >= 8000 {
        VideoProfile {
            width: 1920,
            height: 1080,
            fps: 60,
            bitrate_kbps: 8000,
        }
    } else if host.cores >= 4 {
        VideoProfile {
            width: 1280,
            height: 720,
            fps: 30,
            bitrate_kbps: 4000,
        }
    } else {
        VideoProfile {
            width: 854,
            height: 480,
            fps: 30,
            bitrate_kbps: 1500,
        }
    };

    info!(
        cores = host.cores,
        memory_mb = host.memory_mb,
        "auto profile {}x{}@{} {} kbps",
        profile.width,
        profile.height,
        profile.fps,
        profile.bitrate_kbps
    );
    profile
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(cores: usize, memory_mb: u64) -> HostInfo {
        HostInfo { cores, memory_mb }
    }

    #[test]
    fn large_host_gets_1080p60() {
        let p = auto_select(host(8, 16000));
        assert_eq!((p.width, p.height, p.fps, p.bitrate_kbps), (1920, 1080, 60, 8000));
    }

    #[test]
    fn many_cores_without_memory_falls_to_720p() {
        let p = auto_select(host(16, 4000));
        assert_eq!((p.width, p.height, p.fps, p.bitrate_kbps), (1280, 720, 30, 4000));
    }

    #[test]
    fn small_host_gets_480p() {
        let p = auto_select(host(2, 2048));
        assert_eq!((p.width, p.height, p.bitrate_kbps), (854, 480, 1500));
    }

    #[test]
    fn probe_reports_at_least_one_core() {
        assert!(HostInfo::probe().cores >= 1);
    }
}
