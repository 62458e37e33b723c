//! Whether the current process may open a packet tap.
//!
//! WinDivert needs Administrator; raw capture on Unix needs root (or
//! CAP_NET_RAW, which this check does not look for).

#[cfg(target_os = "windows")]
pub fn is_elevated() -> bool {
    #[link(name = "shell32")]
    extern "system" {
        fn IsUserAnAdmin() -> i32;
    }
    unsafe { IsUserAnAdmin() != 0 }
}

#[cfg(unix)]
pub fn is_elevated() -> bool {
    nix::unistd::geteuid().is_root()
}

#[cfg(not(any(target_os = "windows", unix)))]
pub fn is_elevated() -> bool {
    false
}

/// Message shown when capture is attempted without the privilege.
pub fn elevation_hint() -> &'static str {
    if cfg!(target_os = "windows") {
        "This program must be run as Administrator. Right-click it and choose \"Run as administrator\"."
    } else {
        "This program must be run as root (e.g. with sudo)."
    }
}
