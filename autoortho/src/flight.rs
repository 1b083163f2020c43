//! The Flight Follower: a telemetry subscriber that maintains the current
//! aircraft state consumed by the Read-Path Policy.
//!
//! Flight State is single-writer (this module), many-reader, torn-read
//! tolerant: each scalar is an independent atomic, so readers may observe
//! a snapshot that mixes values from two different packets but never a
//! torn individual number.

use std::collections::HashMap;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Telemetry indices the Flight Follower extracts from a decoded packet,
/// per §4.3/§6: 0=lat, 1=lon, 3=alt, 4=hdg, 6=spd.
const IDX_LAT: u32 = 0;
const IDX_LON: u32 = 1;
const IDX_ALT: u32 = 3;
const IDX_HDG: u32 = 4;
const IDX_SPD: u32 = 6;

/// The wire decoder is an external collaborator (§1): it turns a raw UDP
/// datagram into an indexed map of doubles, and builds the subscription
/// request sent to re-arm the feed. [`XplaneRrefDecoder`] is a concrete
/// decoder for X-Plane's RREF dataref-subscription protocol, used as the
/// default; tests substitute a synthetic decoder.
pub trait TelemetryDecoder: Send + Sync {
    /// The datagram sent to (re-)subscribe to the datarefs this decoder cares about.
    fn subscription_request(&self) -> Vec<u8>;

    /// Decode a received datagram into `index -> value`. Malformed or
    /// unrecognized packets decode to an empty map (best-effort; never errors).
    fn decode(&self, data: &[u8]) -> HashMap<u32, f64>;
}

/// Decoder for X-Plane's `RREF` UDP dataref-subscription protocol: the
/// subscription request is a `RREF\0` header followed by fixed-size
/// records of `(frequency: i32, index: i32, dataref: [u8; 400])`; the
/// response is an `RREF,` header followed by repeated `(index: i32,
/// value: f32)` 8-byte records.
pub struct XplaneRrefDecoder {
    datarefs: Vec<(i32, &'static str)>,
}

impl Default for XplaneRrefDecoder {
    fn default() -> Self {
        Self {
            datarefs: vec![
                (IDX_LAT as i32, "sim/flightmodel/position/latitude"),
                (IDX_LON as i32, "sim/flightmodel/position/longitude"),
                (IDX_ALT as i32, "sim/flightmodel/position/elevation"),
                (IDX_HDG as i32, "sim/flightmodel/position/psi"),
                (IDX_SPD as i32, "sim/flightmodel/position/groundspeed"),
            ],
        }
    }
}

const RREF_NAME_LEN: usize = 400;
const RREF_FREQUENCY_HZ: i32 = 5;

impl TelemetryDecoder for XplaneRrefDecoder {
    fn subscription_request(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(5 + self.datarefs.len() * (8 + RREF_NAME_LEN));
        buf.extend_from_slice(b"RREF\0");
        for (index, dataref) in &self.datarefs {
            buf.extend_from_slice(&RREF_FREQUENCY_HZ.to_le_bytes());
            buf.extend_from_slice(&index.to_le_bytes());
            let mut name = dataref.as_bytes().to_vec();
            name.resize(RREF_NAME_LEN, 0);
            buf.extend_from_slice(&name);
        }
        buf
    }

    fn decode(&self, data: &[u8]) -> HashMap<u32, f64> {
        let mut values = HashMap::new();
        if data.len() < 5 || &data[0..4] != b"RREF" {
            return values;
        }
        let mut offset = 5;
        while offset + 8 <= data.len() {
            let index = i32::from_le_bytes(data[offset..offset + 4].try_into().unwrap());
            let value = f32::from_le_bytes(data[offset + 4..offset + 8].try_into().unwrap());
            if index >= 0 {
                values.insert(index as u32, value as f64);
            }
            offset += 8;
        }
        values
    }
}

/// A point-in-time read of [`FlightState`], suitable for passing to the
/// Read-Path Policy. `connected = false` means the policy must fall back
/// to the quick strategy regardless of the other fields.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlightSnapshot {
    pub connected: bool,
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
    pub hdg: f64,
    pub spd: f64,
}

/// `(connected, lat, lon, alt, hdg, spd)` shared between the Flight
/// Follower (sole writer) and any number of policy-engine readers.
/// Each scalar is its own atomic so writes never block readers and reads
/// never torn-read a single field, only the tuple as a whole.
#[derive(Debug)]
pub struct FlightState {
    connected: AtomicBool,
    lat: AtomicU64,
    lon: AtomicU64,
    alt: AtomicU64,
    hdg: AtomicU64,
    spd: AtomicU64,
}

impl Default for FlightState {
    fn default() -> Self {
        Self {
            connected: AtomicBool::new(false),
            lat: AtomicU64::new(0f64.to_bits()),
            lon: AtomicU64::new(0f64.to_bits()),
            alt: AtomicU64::new(0f64.to_bits()),
            hdg: AtomicU64::new(0f64.to_bits()),
            spd: AtomicU64::new(0f64.to_bits()),
        }
    }
}

impl FlightState {
    pub fn snapshot(&self) -> FlightSnapshot {
        FlightSnapshot {
            connected: self.connected.load(Ordering::Relaxed),
            lat: f64::from_bits(self.lat.load(Ordering::Relaxed)),
            lon: f64::from_bits(self.lon.load(Ordering::Relaxed)),
            alt: f64::from_bits(self.alt.load(Ordering::Relaxed)),
            hdg: f64::from_bits(self.hdg.load(Ordering::Relaxed)),
            spd: f64::from_bits(self.spd.load(Ordering::Relaxed)),
        }
    }

    fn publish(&self, lat: f64, lon: f64, alt: f64, hdg: f64, spd: f64) {
        self.lat.store(lat.to_bits(), Ordering::Relaxed);
        self.lon.store(lon.to_bits(), Ordering::Relaxed);
        self.alt.store(alt.to_bits(), Ordering::Relaxed);
        self.hdg.store(hdg.to_bits(), Ordering::Relaxed);
        self.spd.store(spd.to_bits(), Ordering::Relaxed);
        self.connected.store(true, Ordering::Relaxed);
    }

    fn set_disconnected(&self) {
        self.connected.store(false, Ordering::Relaxed);
    }
}

/// Subscribes to a telemetry feed over UDP and keeps [`FlightState`]
/// current. Never exits; on receive timeout it flips `connected = false`
/// and re-sends the subscription request.
pub struct FlightFollower {
    state: Arc<FlightState>,
}

impl FlightFollower {
    /// Spawns the background worker thread and returns immediately; the
    /// worker owns the socket for its entire lifetime.
    pub fn spawn(
        addr: impl std::net::ToSocketAddrs,
        timeout: Duration,
        decoder: Arc<dyn TelemetryDecoder>,
    ) -> std::io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect(addr)?;
        socket.set_read_timeout(Some(timeout))?;

        let state = Arc::new(FlightState::default());
        let worker_state = Arc::clone(&state);
        std::thread::spawn(move || Self::run(socket, worker_state, decoder));

        Ok(Self { state })
    }

    pub fn state(&self) -> Arc<FlightState> {
        Arc::clone(&self.state)
    }

    fn run(socket: UdpSocket, state: Arc<FlightState>, decoder: Arc<dyn TelemetryDecoder>) {
        tracing::info!("starting flight follower thread");
        Self::resubscribe(&socket, decoder.as_ref());

        let mut buf = [0u8; 1024];
        loop {
            match socket.recv(&mut buf) {
                Ok(n) => {
                    let values = decoder.decode(&buf[..n]);
                    if let (Some(&lat), Some(&lon), Some(&alt), Some(&hdg), Some(&spd)) = (
                        values.get(&IDX_LAT),
                        values.get(&IDX_LON),
                        values.get(&IDX_ALT),
                        values.get(&IDX_HDG),
                        values.get(&IDX_SPD),
                    ) {
                        tracing::debug!(lat, lon, alt, hdg, spd, "flight state update");
                        state.publish(lat, lon, alt, hdg, spd);
                    }
                }
                Err(err)
                    if err.kind() == std::io::ErrorKind::WouldBlock
                        || err.kind() == std::io::ErrorKind::TimedOut =>
                {
                    tracing::debug!("telemetry socket timeout, resubscribing");
                    state.set_disconnected();
                    Self::resubscribe(&socket, decoder.as_ref());
                }
                Err(err) => {
                    tracing::warn!(error = %err, "telemetry recv error");
                    state.set_disconnected();
                }
            }
        }
    }

    fn resubscribe(socket: &UdpSocket, decoder: &dyn TelemetryDecoder) {
        if let Err(err) = socket.send(&decoder.subscription_request()) {
            tracing::warn!(error = %err, "failed to send telemetry subscription request");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_is_disconnected() {
        let state = FlightState::default();
        assert!(!state.snapshot().connected);
    }

    #[test]
    fn publish_then_snapshot_round_trips_values() {
        let state = FlightState::default();
        state.publish(50.0, 10.0, 3000.0, 90.0, 250.0);
        let snap = state.snapshot();
        assert!(snap.connected);
        assert_eq!(snap.lat, 50.0);
        assert_eq!(snap.lon, 10.0);
        assert_eq!(snap.alt, 3000.0);
        assert_eq!(snap.hdg, 90.0);
        assert_eq!(snap.spd, 250.0);
    }

    #[test]
    fn disconnect_clears_connected_flag_only() {
        let state = FlightState::default();
        state.publish(1.0, 2.0, 3.0, 4.0, 5.0);
        state.set_disconnected();
        let snap = state.snapshot();
        assert!(!snap.connected);
        assert_eq!(snap.lat, 1.0);
    }

    #[test]
    fn rref_subscription_request_has_expected_header_and_length() {
        let decoder = XplaneRrefDecoder::default();
        let req = decoder.subscription_request();
        assert_eq!(&req[0..5], b"RREF\0");
        assert_eq!(req.len(), 5 + 5 * (8 + RREF_NAME_LEN));
    }

    #[test]
    fn rref_decode_round_trips_a_synthetic_packet() {
        let decoder = XplaneRrefDecoder::default();
        let mut packet = Vec::new();
        packet.extend_from_slice(b"RREF,");
        for (index, value) in [(0i32, 50.5f32), (1, 10.25), (3, 3000.0), (4, 90.0), (6, 250.0)] {
            packet.extend_from_slice(&index.to_le_bytes());
            packet.extend_from_slice(&value.to_le_bytes());
        }
        let values = decoder.decode(&packet);
        assert_eq!(values.get(&0), Some(&50.5));
        assert_eq!(values.get(&6), Some(&250.0));
    }

    #[test]
    fn rref_decode_ignores_malformed_packet() {
        let decoder = XplaneRrefDecoder::default();
        assert!(decoder.decode(b"garbage").is_empty());
    }
}
