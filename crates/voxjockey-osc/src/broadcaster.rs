use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use parking_lot::Mutex;
use rosc::{encoder, OscMessage, OscPacket, OscType};

use voxjockey_foundation::error::OscError;
use voxjockey_telemetry::PipelineMetrics;

use crate::types::PromptResult;

/// Thread-safe UDP OSC sender with atomic target reconfiguration (§4.A).
///
/// Holds at most one connected socket at a time behind a mutex. `send` is
/// best-effort: network errors are logged and counted, never propagated —
/// OSC has no retry or delivery guarantee by design.
pub struct OscBroadcaster {
    inner: Mutex<Inner>,
    metrics: PipelineMetrics,
}

struct Inner {
    socket: Option<UdpSocket>,
    target: SocketAddr,
}

impl OscBroadcaster {
    pub fn new(target_ip: &str, target_port: u16, metrics: PipelineMetrics) -> Result<Self, OscError> {
        let target = Self::resolve(target_ip, target_port)?;
        Ok(Self {
            inner: Mutex::new(Inner {
                socket: None,
                target,
            }),
            metrics,
        })
    }

    fn resolve(ip: &str, port: u16) -> Result<SocketAddr, OscError> {
        (ip, port)
            .to_socket_addrs()
            .map_err(|e| OscError::InvalidTarget(format!("{ip}:{port}: {e}")))?
            .next()
            .ok_or_else(|| OscError::InvalidTarget(format!("{ip}:{port}")))
    }

    /// Open the UDP sender. Idempotent: calling `connect()` while already
    /// connected is a no-op.
    pub fn connect(&self) -> Result<(), OscError> {
        let mut inner = self.inner.lock();
        if inner.socket.is_some() {
            return Ok(());
        }
        let socket = UdpSocket::bind("0.0.0.0:0")
            .map_err(|e| OscError::SendFailed(format!("failed to bind local socket: {e}")))?;
        socket
            .connect(inner.target)
            .map_err(|e| OscError::SendFailed(format!("failed to connect to {}: {e}", inner.target)))?;
        tracing::info!("osc broadcaster connected to {}", inner.target);
        inner.socket = Some(socket);
        Ok(())
    }

    pub fn disconnect(&self) {
        let mut inner = self.inner.lock();
        inner.socket = None;
        tracing::info!("osc broadcaster disconnected");
    }

    /// Atomically replace the send target. If currently connected, rebinds
    /// a fresh socket to the new target; any buffer in flight on the old
    /// socket may be silently dropped during the swap (§4.A contract).
    pub fn update_target(&self, ip: &str, port: u16) -> Result<(), OscError> {
        let target = Self::resolve(ip, port)?;
        let mut inner = self.inner.lock();
        let was_connected = inner.socket.is_some();
        inner.target = target;
        inner.socket = None;
        drop(inner);
        if was_connected {
            self.connect()?;
        }
        tracing::info!("osc target updated to {}", target);
        Ok(())
    }

    /// Send a raw OSC message. A no-op (warn, not a failure) when
    /// disconnected.
    pub fn send(&self, address: &str, args: Vec<OscType>) {
        let inner = self.inner.lock();
        let Some(socket) = inner.socket.as_ref() else {
            tracing::warn!("osc send to {} skipped: not connected", address);
            return;
        };

        let packet = OscPacket::Message(OscMessage {
            addr: address.to_string(),
            args,
        });
        match encoder::encode(&packet) {
            Ok(buf) => match socket.send(&buf) {
                Ok(_) => self.metrics.record_osc_sent(),
                Err(e) => {
                    tracing::warn!("osc send to {} failed: {}", address, e);
                    self.metrics.record_osc_error();
                }
            },
            Err(e) => {
                tracing::warn!("osc encode for {} failed: {:?}", address, e);
                self.metrics.record_osc_error();
            }
        }
    }

    pub fn send_text(&self, address: &str, text: impl Into<String>) {
        self.send(address, vec![OscType::String(text.into())]);
    }

    /// Emit the four Fast Brain messages in order (§4.A): prompt, style,
    /// mood, then the whole result as a JSON string.
    pub fn send_prompt(&self, result: &PromptResult) {
        self.send_text("/visual/prompt", result.prompt.clone());
        self.send_text("/visual/style", result.style.clone());
        self.send_text("/visual/mood", result.mood.clone());
        match serde_json::to_string(result) {
            Ok(json) => self.send_text("/visual/json", json),
            Err(e) => tracing::warn!("failed to serialize prompt result: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broadcaster() -> (OscBroadcaster, UdpSocket) {
        let listener = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        listener.set_read_timeout(Some(std::time::Duration::from_millis(500))).unwrap();
        let bc = OscBroadcaster::new("127.0.0.1", port, PipelineMetrics::default()).unwrap();
        (bc, listener)
    }

    #[test]
    fn send_without_connect_is_a_noop() {
        let (bc, _listener) = broadcaster();
        bc.send_text("/visual/prompt", "hello");
        assert_eq!(bc.metrics.snapshot().osc_messages_sent, 0);
    }

    #[test]
    fn connect_then_send_delivers_a_packet() {
        let (bc, listener) = broadcaster();
        bc.connect().unwrap();
        bc.send_text("/visual/prompt", "neon skyline");

        let mut buf = [0u8; 1024];
        let (n, _) = listener.recv_from(&mut buf).unwrap();
        let packet = rosc::decoder::decode_udp(&buf[..n]).unwrap().1;
        match packet {
            OscPacket::Message(msg) => {
                assert_eq!(msg.addr, "/visual/prompt");
                assert_eq!(msg.args, vec![OscType::String("neon skyline".to_string())]);
            }
            _ => panic!("expected a message packet"),
        }
    }

    #[test]
    fn send_prompt_emits_four_messages_in_order() {
        let (bc, listener) = broadcaster();
        bc.connect().unwrap();
        bc.send_prompt(&PromptResult {
            prompt: "a glowing forest".into(),
            style: "painterly".into(),
            mood: "serene".into(),
        });

        let expected_addrs = ["/visual/prompt", "/visual/style", "/visual/mood", "/visual/json"];
        for expected in expected_addrs {
            let mut buf = [0u8; 1024];
            let (n, _) = listener.recv_from(&mut buf).unwrap();
            let packet = rosc::decoder::decode_udp(&buf[..n]).unwrap().1;
            match packet {
                OscPacket::Message(msg) => assert_eq!(msg.addr, expected),
                _ => panic!("expected a message packet"),
            }
        }
    }

    #[test]
    fn update_target_reconnects_without_error() {
        let (bc, _listener) = broadcaster();
        bc.connect().unwrap();

        let listener2 = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port2 = listener2.local_addr().unwrap().port();
        listener2.set_read_timeout(Some(std::time::Duration::from_millis(500))).unwrap();

        bc.update_target("127.0.0.1", port2).unwrap();
        bc.send_text("/visual/prompt", "retargeted");

        let mut buf = [0u8; 1024];
        let (n, _) = listener2.recv_from(&mut buf).unwrap();
        assert!(n > 0);
    }

    #[test]
    fn disconnect_then_send_is_a_noop_again() {
        let (bc, _listener) = broadcaster();
        bc.connect().unwrap();
        bc.disconnect();
        bc.send_text("/visual/prompt", "hello");
        assert_eq!(bc.metrics.snapshot().osc_messages_sent, 0);
    }
}
