//! C5: Broadcaster — a tagged publish socket, high-water-mark 1, used by
//! the collector to push aggregated and single-frame snapshots to
//! subscribing GUIs.
//!
//! Wire format: two frames per message, frame-1 the UTF-8 tag, frame-2 a
//! MessagePack-encoded payload. Grounded directly on the canonical
//! publisher socket wrapper this replaces: same IP-autodetection trick
//! (connect a UDP socket to an unreachable external address and read back
//! the local endpoint), same `set_hwm(1)`, same two-`send()` multipart
//! message. MessagePack stands in for that wrapper's pickle framing so the
//! wire format stays language-portable.

use std::net::UdpSocket;

use common::{OmError, OmResult};
use serde::Serialize;

const DEFAULT_PROBE_ADDR: &str = "8.8.8.8:80";

/// Tag for an aggregated batch of `ProcessedRecord`s.
pub const TAG_ONDADATA: &str = "ondadata";
/// Tag for a one-element list containing a single sampled frame.
pub const TAG_ONDAFRAMEDATA: &str = "ondaframedata";

pub struct Broadcaster {
    socket: zmq::Socket,
}

impl Broadcaster {
    /// Bind a PUB socket to `ip:port`. If `ip` is `None`, autodetect the
    /// local outbound address. Bind failure is fatal.
    pub fn bind(ip: Option<String>, port: u16) -> OmResult<Self> {
        let ip = match ip {
            Some(ip) => ip,
            None => detect_local_ip()?,
        };

        let context = zmq::Context::new();
        let socket = context
            .socket(zmq::PUB)
            .map_err(|e| OmError::Transport(format!("failed to create PUB socket: {e}")))?;
        socket
            .set_sndhwm(1)
            .map_err(|e| OmError::Transport(format!("failed to set send HWM: {e}")))?;

        let endpoint = format!("tcp://{ip}:{port}");
        socket
            .bind(&endpoint)
            .map_err(|e| OmError::Transport(format!("failed to bind {endpoint}: {e}")))?;

        tracing::info!(endpoint = %endpoint, "broadcaster bound");
        Ok(Self { socket })
    }

    /// Send a tagged, MessagePack-encoded message. A send failure is
    /// logged and dropped rather than propagated: the HWM=1 policy means
    /// a slow subscriber is expected to miss messages.
    pub fn send<T: Serialize>(&self, tag: &str, payload: &T) {
        let bytes = match rmp_serde::to_vec_named(payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(tag, error = %e, "failed to encode broadcast payload, dropping");
                return;
            }
        };

        if let Err(e) = self.socket.send(tag.as_bytes(), zmq::SNDMORE) {
            tracing::warn!(tag, error = %e, "failed to send broadcast tag frame, dropping");
            return;
        }
        if let Err(e) = self.socket.send(bytes, 0) {
            tracing::warn!(tag, error = %e, "failed to send broadcast payload frame, dropping");
        }
    }
}

/// Open a UDP socket and "connect" it to an unreachable external address
/// purely to force the kernel to pick a route and a local address; no
/// packet needs to actually be delivered.
fn detect_local_ip() -> OmResult<String> {
    let socket = UdpSocket::bind("0.0.0.0:0")
        .map_err(|e| OmError::Dependency(format!("failed to open probe socket: {e}")))?;
    socket
        .connect(DEFAULT_PROBE_ADDR)
        .map_err(|e| OmError::Dependency(format!("failed to probe route for local IP: {e}")))?;
    let addr = socket
        .local_addr()
        .map_err(|e| OmError::Dependency(format!("failed to read local address: {e}")))?;
    Ok(addr.ip().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_local_ip_returns_something() {
        // This only exercises the route-lookup trick; it requires no real
        // network traffic since UDP connect performs no handshake.
        let ip = detect_local_ip();
        assert!(ip.is_ok());
    }
}
