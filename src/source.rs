use std::f64::consts::TAU;
use std::io::{BufRead, BufReader};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use crate::error::{SignalError, SignalResult};
use crate::types::{ConnectionParams, ModeProfile, SourceKind};

/// An acquisition board: something that can be connected, armed, and drained
/// of the multi-channel samples it accumulated since the last drain.
///
/// `disconnect` and `stop_stream` are idempotent. `drain` before enough
/// samples exist returns an empty window, not an error.
pub trait SignalSource: Send {
    fn connect(&mut self) -> SignalResult<()>;
    fn disconnect(&mut self);
    fn is_connected(&self) -> bool;
    fn start_stream(&mut self) -> SignalResult<()>;
    fn stop_stream(&mut self);
    /// Return and clear the per-channel buffer accumulated since last call.
    fn drain(&mut self) -> SignalResult<Vec<Vec<f32>>>;
    fn sample_rate_hz(&self) -> f64;
    fn channels(&self) -> usize;
    fn kind(&self) -> SourceKind;
}

// ---------------------------------------------------------------------------
// Hardware variant
// ---------------------------------------------------------------------------

/// Serial read timeout; also bounds how long stop_stream waits per read.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Physical board reached through a serial transport (USB cable or BLE
/// dongle). A reader thread parses the board's CSV sample lines
/// (`index,ch1µV,ch2µV,...`) into a shared buffer; `drain` swaps that buffer
/// out without ever blocking on the wire.
pub struct SerialBoard {
    params: ConnectionParams,
    baud: u32,
    channels: usize,
    sample_rate_hz: f64,
    port: Option<Box<dyn serialport::SerialPort>>,
    buffer: Arc<Mutex<Vec<Vec<f32>>>>,
    stop_flag: Arc<AtomicBool>,
    reader: Option<std::thread::JoinHandle<()>>,
}

impl SerialBoard {
    pub fn new(params: ConnectionParams, baud: u32, channels: usize, sample_rate_hz: f64) -> Self {
        Self {
            params,
            baud,
            channels,
            sample_rate_hz,
            port: None,
            buffer: Arc::new(Mutex::new(vec![Vec::new(); channels])),
            stop_flag: Arc::new(AtomicBool::new(false)),
            reader: None,
        }
    }

    /// The dongle port doubles as the serial path when both are given; the
    /// board's own MAC is resolved by the dongle firmware.
    fn transport_path(&self) -> SignalResult<String> {
        self.params
            .dongle_port
            .clone()
            .or_else(|| self.params.serial_port.clone())
            .ok_or_else(|| {
                SignalError::Connection(
                    "no serial or dongle port resolved for the hardware transport".to_string(),
                )
            })
    }
}

impl SignalSource for SerialBoard {
    fn connect(&mut self) -> SignalResult<()> {
        if self.port.is_some() {
            return Ok(());
        }
        let path = self.transport_path()?;
        if let Some(mac) = &self.params.mac_address {
            debug!("pairing against board {mac} via {path}");
        }
        let port = serialport::new(&path, self.baud)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| SignalError::Connection(format!("failed to open {path}: {e}")))?;
        info!("serial transport open on {path} at {} baud", self.baud);
        self.port = Some(port);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.stop_stream();
        if self.port.take().is_some() {
            info!("serial transport released");
        }
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    fn start_stream(&mut self) -> SignalResult<()> {
        let port = self.port.as_ref().ok_or(SignalError::NotConnected)?;
        if self.reader.is_some() {
            return Ok(());
        }
        let reader_port = port
            .try_clone()
            .map_err(|e| SignalError::Connection(format!("failed to clone port handle: {e}")))?;

        self.stop_flag.store(false, Ordering::Relaxed);
        let stop = self.stop_flag.clone();
        let buffer = self.buffer.clone();
        let channels = self.channels;
        self.reader = Some(std::thread::spawn(move || {
            read_sample_lines(reader_port, channels, buffer, stop);
        }));
        info!("hardware stream armed");
        Ok(())
    }

    fn stop_stream(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.reader.take() {
            if handle.join().is_err() {
                warn!("serial reader thread panicked");
            }
        }
    }

    fn drain(&mut self) -> SignalResult<Vec<Vec<f32>>> {
        let mut guard = self.buffer.lock();
        let drained = std::mem::replace(&mut *guard, vec![Vec::new(); self.channels]);
        Ok(drained)
    }

    fn sample_rate_hz(&self) -> f64 {
        self.sample_rate_hz
    }

    fn channels(&self) -> usize {
        self.channels
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Hardware
    }
}

fn read_sample_lines(
    port: Box<dyn serialport::SerialPort>,
    channels: usize,
    buffer: Arc<Mutex<Vec<Vec<f32>>>>,
    stop: Arc<AtomicBool>,
) {
    let mut reader = BufReader::new(port);
    let mut line = String::new();
    while !stop.load(Ordering::Relaxed) {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => std::thread::sleep(READ_TIMEOUT),
            Ok(_) => {
                if let Some(values) = parse_sample_line(line.trim(), channels) {
                    let mut guard = buffer.lock();
                    for (channel, value) in guard.iter_mut().zip(values) {
                        channel.push(value);
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => {
                warn!("serial read failed: {e}");
                std::thread::sleep(READ_TIMEOUT);
            }
        }
    }
}

/// Parse one `index,ch1,ch2,...` sample line into per-channel µV values.
/// Header lines and partial reads simply fail the parse and are skipped.
fn parse_sample_line(line: &str, channels: usize) -> Option<Vec<f32>> {
    let mut fields = line.split(',');
    fields.next()?.trim().parse::<u64>().ok()?;
    let values: Vec<f32> = fields
        .take(channels)
        .map(|f| f.trim().parse::<f32>())
        .collect::<Result<_, _>>()
        .ok()?;
    if values.is_empty() {
        return None;
    }
    Some(values)
}

// ---------------------------------------------------------------------------
// Synthetic variant
// ---------------------------------------------------------------------------

/// Per-band sinusoid amplitudes (µV) plus a noise floor, the waveform
/// recipe behind one mode profile. A placeholder signal, not a
/// physiological model: each band contributes one tone at a representative
/// center frequency.
#[derive(Debug, Clone, Copy)]
struct BandMix {
    theta: f64,
    alpha: f64,
    beta: f64,
    gamma: f64,
    noise: f64,
}

const THETA_TONE_HZ: f64 = 6.0;
const ALPHA_TONE_HZ: f64 = 10.0;
const BETA_TONE_HZ: f64 = 20.0;
const GAMMA_TONE_HZ: f64 = 40.0;

fn mix_for(profile: ModeProfile) -> BandMix {
    match profile {
        ModeProfile::Calm => BandMix {
            theta: 8.0,
            alpha: 40.0,
            beta: 6.0,
            gamma: 3.0,
            noise: 2.0,
        },
        ModeProfile::Stressed => BandMix {
            theta: 6.0,
            alpha: 9.0,
            beta: 32.0,
            gamma: 18.0,
            noise: 3.0,
        },
        ModeProfile::Normal => BandMix {
            theta: 14.0,
            alpha: 16.0,
            beta: 13.0,
            gamma: 11.0,
            noise: 2.5,
        },
    }
}

/// Cap on how many samples one drain may synthesize, so a long stall does
/// not balloon into a giant window.
const MAX_DRAIN_SAMPLES: u64 = 4096;

/// Non-hardware source generating mode-parameterized waveform mixtures at
/// the configured rate, paced by wall-clock time. The RNG is seeded per
/// instance, so two boards with the same profile produce the same stream.
pub struct SyntheticBoard {
    sample_rate_hz: f64,
    channel_count: usize,
    profile: ModeProfile,
    connected: bool,
    streaming: bool,
    started_at: Option<Instant>,
    emitted: u64,
    rng: StdRng,
}

impl SyntheticBoard {
    pub fn new(sample_rate_hz: f64, channels: usize) -> Self {
        Self {
            sample_rate_hz,
            channel_count: channels,
            profile: ModeProfile::Normal,
            connected: false,
            streaming: false,
            started_at: None,
            emitted: 0,
            rng: StdRng::seed_from_u64(0x0EE6_B0A2),
        }
    }

    /// Select the waveform parameterization. Absent from the hardware
    /// variant, where the signal is whatever the electrodes measure.
    pub fn set_profile(&mut self, profile: ModeProfile) {
        self.profile = profile;
    }

    pub fn profile(&self) -> ModeProfile {
        self.profile
    }

    /// Synthesize the next `n` samples for every channel, advancing the
    /// sample clock.
    pub(crate) fn generate(&mut self, n: usize) -> Vec<Vec<f32>> {
        let mix = mix_for(self.profile);
        let mut out = vec![Vec::with_capacity(n); self.channel_count];
        for i in 0..n {
            let t = (self.emitted + i as u64) as f64 / self.sample_rate_hz;
            for (ch, samples) in out.iter_mut().enumerate() {
                // Small per-channel phase skew keeps channels decorrelated
                let phase = ch as f64 * 0.4;
                let v = mix.theta * (TAU * THETA_TONE_HZ * t + phase).sin()
                    + mix.alpha * (TAU * ALPHA_TONE_HZ * t + phase).sin()
                    + mix.beta * (TAU * BETA_TONE_HZ * t + phase).sin()
                    + mix.gamma * (TAU * GAMMA_TONE_HZ * t + phase).sin()
                    + mix.noise * self.rng.gen_range(-1.0..1.0);
                samples.push(v as f32);
            }
        }
        self.emitted += n as u64;
        out
    }
}

impl SignalSource for SyntheticBoard {
    fn connect(&mut self) -> SignalResult<()> {
        if self.sample_rate_hz <= 0.0 {
            return Err(SignalError::Connection(format!(
                "synthetic board rejects sample rate {} Hz",
                self.sample_rate_hz
            )));
        }
        self.connected = true;
        info!("synthetic board ready ({:?} profile)", self.profile);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
        self.streaming = false;
        self.started_at = None;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn start_stream(&mut self) -> SignalResult<()> {
        if !self.connected {
            return Err(SignalError::NotConnected);
        }
        self.started_at = Some(Instant::now());
        self.emitted = 0;
        self.streaming = true;
        Ok(())
    }

    fn stop_stream(&mut self) {
        self.streaming = false;
    }

    fn drain(&mut self) -> SignalResult<Vec<Vec<f32>>> {
        let Some(started) = self.started_at.filter(|_| self.streaming) else {
            return Ok(Vec::new());
        };
        let target = (started.elapsed().as_secs_f64() * self.sample_rate_hz) as u64;
        let pending = target.saturating_sub(self.emitted).min(MAX_DRAIN_SAMPLES);
        Ok(self.generate(pending as usize))
    }

    fn sample_rate_hz(&self) -> f64 {
        self.sample_rate_hz
    }

    fn channels(&self) -> usize {
        self.channel_count
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Synthetic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spectral;

    #[test]
    fn parses_well_formed_sample_lines() {
        let values = parse_sample_line("17,12.500000,-3.250000,0.125000,9.000000", 4).unwrap();
        assert_eq!(values, vec![12.5, -3.25, 0.125, 9.0]);
    }

    #[test]
    fn rejects_headers_and_garbage() {
        assert!(parse_sample_line("Sample Index,Channel 1 (µV)", 4).is_none());
        assert!(parse_sample_line("", 4).is_none());
        assert!(parse_sample_line("42,not-a-number", 4).is_none());
        assert!(parse_sample_line("42", 4).is_none());
    }

    #[test]
    fn extra_columns_are_truncated_to_channel_count() {
        let values = parse_sample_line("1,1.0,2.0,3.0,4.0,5.0,6.0", 4).unwrap();
        assert_eq!(values.len(), 4);
    }

    #[test]
    fn serial_board_requires_connect_before_streaming() {
        let mut board = SerialBoard::new(ConnectionParams::default(), 115_200, 4, 250.0);
        assert!(matches!(
            board.start_stream(),
            Err(SignalError::NotConnected)
        ));
    }

    #[test]
    fn serial_board_surfaces_bad_ports_as_connection_errors() {
        let params = ConnectionParams {
            dongle_port: Some("/dev/nonexistent-dongle-0".to_string()),
            ..Default::default()
        };
        let mut board = SerialBoard::new(params, 115_200, 4, 250.0);
        assert!(matches!(board.connect(), Err(SignalError::Connection(_))));
        assert!(!board.is_connected());
    }

    #[test]
    fn serial_board_disconnect_is_idempotent() {
        let mut board = SerialBoard::new(ConnectionParams::default(), 115_200, 4, 250.0);
        board.disconnect();
        board.disconnect();
        assert!(!board.is_connected());
    }

    #[test]
    fn synthetic_board_requires_connect_before_streaming() {
        let mut board = SyntheticBoard::new(250.0, 4);
        assert!(matches!(
            board.start_stream(),
            Err(SignalError::NotConnected)
        ));
    }

    #[test]
    fn synthetic_drain_before_arming_is_empty_not_an_error() {
        let mut board = SyntheticBoard::new(250.0, 4);
        board.connect().unwrap();
        assert!(board.drain().unwrap().is_empty());
    }

    #[test]
    fn calm_profile_generates_an_alpha_dominant_window() {
        let mut board = SyntheticBoard::new(250.0, 4);
        board.set_profile(ModeProfile::Calm);
        let window = board.generate(60).remove(0);
        let p = spectral::band_powers(&window, 250.0).unwrap();
        assert!(p.alpha > p.theta);
        assert!(p.alpha > p.beta);
        assert!(p.alpha > p.gamma);
    }

    #[test]
    fn stressed_profile_generates_a_high_arousal_window() {
        let mut board = SyntheticBoard::new(250.0, 4);
        board.set_profile(ModeProfile::Stressed);
        let window = board.generate(500).remove(0);
        let p = spectral::band_powers(&window, 250.0).unwrap();
        assert!(p.beta + p.gamma > p.alpha + p.theta);
    }

    #[test]
    fn generate_produces_every_channel() {
        let mut board = SyntheticBoard::new(250.0, 3);
        let channels = board.generate(16);
        assert_eq!(channels.len(), 3);
        assert!(channels.iter().all(|c| c.len() == 16));
    }
}
