//! libpcap capture for Linux and macOS, enabled with the `pcap` feature.
//!
//! The loopback filter binds to the first loopback device. The fallback binds
//! to the Linux `any` pseudo-device when present, else the default device. Reads time out periodically so a closed tap is noticed
//! within `PCAP_READ_TIMEOUT_MS`.

use std::sync::Arc;

use pcap::{Active, Capture, Device, Linktype};

use crate::capture::{
    tcp_payload_bounds, CaptureFilter, CloseFlag, OpenedTap, PacketTap, TapError, TapProvider,
};
use crate::config;

pub struct PcapProvider;

impl TapProvider for PcapProvider {
    fn name(&self) -> &'static str {
        "libpcap"
    }

    fn open(&self, filter: CaptureFilter) -> Result<OpenedTap, TapError> {
        let open_err = |reason: String| TapError::Open {
            filter: filter.to_string(),
            reason,
        };

        let device = select_device(filter).map_err(open_err)?;
        tracing::info!("Opening pcap on {} ({filter})", device.name);

        let mut capture = Capture::from_device(device)
            .and_then(|c| {
                c.promisc(false)
                    .snaplen(config::RECV_BUFFER_SIZE as i32)
                    .timeout(config::PCAP_READ_TIMEOUT_MS)
                    .immediate_mode(true)
                    .open()
            })
            .map_err(|e| open_err(e.to_string()))?;
        capture
            .filter(config::BPF_TCP_PAYLOAD_FILTER, true)
            .map_err(|e| open_err(e.to_string()))?;

        let link_header_len = link_header_len(capture.get_datalink())
            .ok_or_else(|| open_err(format!("unsupported link type {:?}", capture.get_datalink())))?;

        let closed = CloseFlag::default();
        Ok(OpenedTap {
            tap: Box::new(PcapTap {
                capture,
                link_header_len,
                buf: Vec::with_capacity(config::RECV_BUFFER_SIZE),
                closed: closed.clone(),
            }),
            closer: Arc::new(closed),
        })
    }
}

const ANY_DEVICE: &str = "any";

fn select_device(filter: CaptureFilter) -> Result<Device, String> {
    let devices = Device::list().map_err(|e| e.to_string())?;
    if let Some(device) = pick_device(filter, devices) {
        return Ok(device);
    }
    if filter.is_loopback_only() {
        return Err("no loopback device found".into());
    }
    Device::lookup()
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "no default capture device".to_string())
}

/// Device from `devices` that covers loopback traffic for `filter`.
fn pick_device(filter: CaptureFilter, devices: Vec<Device>) -> Option<Device> {
    if filter.is_loopback_only() {
        devices.into_iter().find(|d| d.flags.is_loopback())
    } else {
        devices.into_iter().find(|d| d.name == ANY_DEVICE)
    }
}

/// Bytes in front of the IP header for the link types loopback devices use.
fn link_header_len(link: Linktype) -> Option<usize> {
    match link.0 {
        0 | 108 => Some(4),    // NULL / LOOP (BSD loopback)
        1 => Some(14),         // Ethernet (Linux lo)
        12 | 14 | 101 => Some(0), // raw IP
        113 => Some(16),       // Linux cooked v1
        276 => Some(20),       // Linux cooked v2
        _ => None,
    }
}

struct PcapTap {
    capture: Capture<Active>,
    link_header_len: usize,
    buf: Vec<u8>,
    closed: CloseFlag,
}

impl PacketTap for PcapTap {
    fn next_payload(&mut self) -> Result<Option<&[u8]>, TapError> {
        loop {
            if self.closed.is_closed() {
                return Err(TapError::Closed);
            }
            match self.capture.next_packet() {
                Ok(packet) => {
                    let Some(ip) = packet.data.get(self.link_header_len..) else {
                        return Ok(None);
                    };
                    let Some(range) = tcp_payload_bounds(ip) else {
                        return Ok(None);
                    };
                    self.buf.clear();
                    self.buf.extend_from_slice(&ip[range]);
                    return Ok(Some(&self.buf));
                }
                Err(pcap::Error::TimeoutExpired) => continue,
                Err(pcap::Error::NoMorePackets) => return Err(TapError::Closed),
                Err(e) => return Err(TapError::Recv(e.to_string())),
            }
        }
    }
}
