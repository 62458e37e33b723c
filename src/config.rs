//! Centralized constants for scr-ignore.
//!
//! Markers, the profile URL shape, capture filters and timing knobs live here so
//! the detection modules and the capture backends agree on one set of values.

use std::time::Duration;

/// Cheap pre-filter: every matchmaking profile request contains this path segment.
pub const PROFILE_API_MARKER: &[u8] = b"aurora-profile-by-toon";

/// Payload marker sent by the client while the match loading screen is up.
pub const OPPONENT_LOADED_MARKER: &[u8] = b"scr_mmgameloading";

/// Payload marker sent when the user opens a player's profile in-game.
pub const PROFILE_SELECTED_MARKER: &[u8] = b"scr_tooninfo";

/// Matches `/aurora-profile-by-toon/{player_id}/{gateway_number}`.
/// Group 1 is the still percent-encoded player identifier.
pub const PROFILE_PATH_PATTERN: &str = r"/aurora-profile-by-toon/([^/?]+)/\d+";

/// Preferred WinDivert filter. `outbound` is left out on purpose: loopback
/// direction is undefined at the network layer and the combination is rejected.
pub const WINDIVERT_LOOPBACK_FILTER: &str = "loopback and tcp.PayloadLength > 0";

/// Fallback WinDivert filter for driver versions that reject the loopback form.
pub const WINDIVERT_ANY_TCP_FILTER: &str = "tcp.PayloadLength > 0";

/// BPF program for the pcap backend: TCP segments with a non-empty payload.
/// The IPv6 branch is narrowed further in userspace.
pub const BPF_TCP_PAYLOAD_FILTER: &str =
    "(ip and tcp and (((ip[2:2] - ((ip[0]&0xf)<<2)) - ((tcp[12]&0xf0)>>2)) != 0)) or (ip6 and tcp)";

/// Size of the per-tap receive buffer (one maximum-size IP packet).
pub const RECV_BUFFER_SIZE: usize = 65535;

/// Read timeout of the pcap backend; bounds how long a closed tap takes to notice.
pub const PCAP_READ_TIMEOUT_MS: i32 = 200;

/// Back-off after a failed read before the next attempt.
pub const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Consecutive read failures after which the capture facility is considered gone.
pub const MAX_CONSECUTIVE_RECV_ERRORS: u32 = 50;

/// Upper bound on how long `stop()` waits for the capture thread to exit.
pub const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Chat command verbs typed into the game for the pending player.
pub const IGNORE_COMMAND: &str = "/ignore";
pub const UNIGNORE_COMMAND: &str = "/unignore";

/// Default tracing directive when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "scr_ignore_lib=info";

/// Name of the dedicated capture thread.
pub const CAPTURE_THREAD_NAME: &str = "scr-capture";
