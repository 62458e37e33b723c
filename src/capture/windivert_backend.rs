//! Windows packet capture using WinDivert 2.x in SNIFF mode.
//!
//! SNIFF hands us a copy of each matching packet while the original continues
//! through the network stack untouched, so there is nothing to reinject.
//! Opening a handle requires Administrator and the WinDivert driver files next
//! to the executable.
//!
//! `recv` has no timeout, so closing the tap also pushes one loopback TCP
//! segment with a payload through the stack. Both capture filters match it,
//! which returns a blocked `recv` to a reader that then sees the close flag.

use std::io::Write;
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::sync::Arc;

use windivert::prelude::*;

use crate::capture::{
    tcp_payload_bounds, CaptureFilter, CloseFlag, OpenedTap, PacketTap, TapCloser, TapError,
    TapProvider,
};
use crate::config;

pub struct WinDivertProvider;

impl TapProvider for WinDivertProvider {
    fn name(&self) -> &'static str {
        "WinDivert"
    }

    fn open(&self, filter: CaptureFilter) -> Result<OpenedTap, TapError> {
        let expr = filter.windivert_expr();
        let flags = WinDivertFlags::new().set_sniff();

        tracing::info!("Opening WinDivert handle with filter: {expr}");
        let handle = WinDivert::network(expr, 0, flags).map_err(|e| TapError::Open {
            filter: expr.to_string(),
            reason: format!("{e:?}"),
        })?;

        let closed = CloseFlag::default();
        Ok(OpenedTap {
            tap: Box::new(WinDivertTap {
                handle,
                buf: vec![0u8; config::RECV_BUFFER_SIZE],
                closed: closed.clone(),
            }),
            closer: Arc::new(WinDivertCloser { closed }),
        })
    }
}

struct WinDivertCloser {
    closed: CloseFlag,
}

impl TapCloser for WinDivertCloser {
    fn close(&self) {
        self.closed.close();
        if let Err(e) = wake_reader() {
            tracing::debug!("Could not wake WinDivert reader: {e}");
        }
    }
}

/// Send one payload byte over a throwaway loopback connection.
fn wake_reader() -> std::io::Result<()> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    let mut client = TcpStream::connect(listener.local_addr()?)?;
    let (_server, _) = listener.accept()?;
    client.write_all(&[0])?;
    client.flush()
}

struct WinDivertTap {
    handle: WinDivert<NetworkLayer>,
    buf: Vec<u8>,
    closed: CloseFlag,
}

impl PacketTap for WinDivertTap {
    fn next_payload(&mut self) -> Result<Option<&[u8]>, TapError> {
        if self.closed.is_closed() {
            return Err(TapError::Closed);
        }

        let bounds = {
            let packet = match self.handle.recv(Some(&mut self.buf)) {
                Ok(packet) => packet,
                Err(_) if self.closed.is_closed() => return Err(TapError::Closed),
                Err(e) => return Err(TapError::Recv(e.to_string())),
            };
            tcp_payload_bounds(&packet.data)
        };

        // A packet may have raced with stop(); drop it rather than report it late.
        if self.closed.is_closed() {
            return Err(TapError::Closed);
        }
        Ok(bounds.map(|range| &self.buf[range]))
    }
}
