//! Auto-detection for the physical dongle transport: enumerate serial
//! ports, keep the USB candidates, and probe each one with a real connect
//! until one answers.

use serialport::SerialPortType;
use tracing::{info, warn};

use crate::error::{SignalError, SignalResult};
use crate::source::{SerialBoard, SignalSource};
use crate::types::ConnectionParams;

/// USB serial ports present on this machine, in discovery order.
pub fn candidate_ports() -> Vec<String> {
    match serialport::available_ports() {
        Ok(ports) => ports
            .into_iter()
            .filter(|p| matches!(p.port_type, SerialPortType::UsbPort(_)))
            .map(|p| p.port_name)
            .collect(),
        Err(e) => {
            warn!("serial port enumeration failed: {e}");
            Vec::new()
        }
    }
}

/// Probe every candidate port and return the first board that connects.
pub fn auto_connect(baud: u32, channels: usize, sample_rate_hz: f64) -> SignalResult<SerialBoard> {
    let candidates = candidate_ports();
    if candidates.is_empty() {
        return Err(no_transport_error(&[]));
    }
    info!("auto-detection probing {} candidate port(s)", candidates.len());

    for path in &candidates {
        let params = ConnectionParams {
            dongle_port: Some(path.clone()),
            ..Default::default()
        };
        let mut board = SerialBoard::new(params, baud, channels, sample_rate_hz);
        match board.connect() {
            Ok(()) => {
                info!("auto-detection succeeded on {path}");
                return Ok(board);
            }
            Err(e) => warn!("auto-detection failed on {path}: {e}"),
        }
    }
    Err(no_transport_error(&candidates))
}

/// Connection failure that tells the operator every manual way out.
pub fn no_transport_error(probed: &[String]) -> SignalError {
    let lead = if probed.is_empty() {
        "no usable acquisition dongle found".to_string()
    } else {
        format!(
            "auto-detection failed on {} candidate port(s): {}",
            probed.len(),
            probed.join(", ")
        )
    };
    SignalError::Connection(format!(
        "{lead}. Options: \
         1. plug in the acquisition dongle; \
         2. set BOARD_DONGLE_PORT (or BOARD_SERIAL_PORT) in the environment or .env; \
         3. pass serial_port/dongle_port on the start_recording command; \
         4. check the board is powered on and in range"
    ))
}
