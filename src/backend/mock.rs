use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::Instant;

use crate::config::PullMode;
use crate::error::AppError;
use crate::gpio::GpioInput;

#[derive(Default)]
pub struct MockGpioBackend {
    pins: RwLock<HashMap<u32, Mutex<MockPin>>>, // keyed by port
}

struct MockPin {
    bounce_ms: u64,
    level: bool,
    armed: bool,
    edge_pending: bool,
    last_edge: Option<Instant>,
}

impl MockGpioBackend {
    /// Drives the simulated line level. A level flip on an armed pin latches
    /// an edge unless it falls inside the debounce window.
    pub fn set_level(&self, port: u32, level: bool) -> Result<(), AppError> {
        let pins = self
            .pins
            .read()
            .map_err(|e| AppError::Gpio(format!("lock poisoned: {e}")))?;
        let pin_lock = pins
            .get(&port)
            .ok_or_else(|| AppError::Gpio(format!("port {port} not configured as input")))?;
        let mut pin = pin_lock
            .lock()
            .map_err(|e| AppError::Gpio(format!("lock poisoned: {e}")))?;

        if pin.level == level {
            return Ok(());
        }
        pin.level = level;

        if pin.armed {
            let now = Instant::now();
            let bounce = pin.bounce_ms;
            let allow = pin
                .last_edge
                .map(|t| now.duration_since(t).as_millis() >= bounce as u128)
                .unwrap_or(true);
            if allow {
                pin.last_edge = Some(now);
                pin.edge_pending = true;
            }
        }

        Ok(())
    }
}

impl GpioInput for MockGpioBackend {
    fn setup_input(&self, port: u32, pull_mode: PullMode) -> Result<(), AppError> {
        let mut pins = self
            .pins
            .write()
            .map_err(|e| AppError::Gpio(format!("lock poisoned: {e}")))?;

        // pull resistor sets the idle level absent external drive
        pins.insert(
            port,
            Mutex::new(MockPin {
                bounce_ms: 0,
                level: pull_mode == PullMode::Up,
                armed: false,
                edge_pending: false,
                last_edge: None,
            }),
        );

        Ok(())
    }

    fn setup_edge_detect(&self, port: u32, bounce_ms: u64) -> Result<(), AppError> {
        let pins = self
            .pins
            .read()
            .map_err(|e| AppError::Gpio(format!("lock poisoned: {e}")))?;
        let pin_lock = pins
            .get(&port)
            .ok_or_else(|| AppError::Gpio(format!("port {port} not configured as input")))?;
        let mut pin = pin_lock
            .lock()
            .map_err(|e| AppError::Gpio(format!("lock poisoned: {e}")))?;

        pin.bounce_ms = bounce_ms;
        pin.armed = true;
        pin.edge_pending = false;
        pin.last_edge = None;

        Ok(())
    }

    fn read_edge_events(&self, port: u32) -> Result<bool, AppError> {
        let pins = self
            .pins
            .read()
            .map_err(|e| AppError::Gpio(format!("lock poisoned: {e}")))?;
        let pin_lock = pins
            .get(&port)
            .ok_or_else(|| AppError::Gpio(format!("port {port} not configured as input")))?;
        let mut pin = pin_lock
            .lock()
            .map_err(|e| AppError::Gpio(format!("lock poisoned: {e}")))?;

        if !pin.armed {
            return Err(AppError::Gpio(format!(
                "edge detection not armed on port {port}"
            )));
        }

        let pending = pin.edge_pending;
        pin.edge_pending = false;

        Ok(pending)
    }

    fn read_input(&self, port: u32) -> Result<bool, AppError> {
        let pins = self
            .pins
            .read()
            .map_err(|e| AppError::Gpio(format!("lock poisoned: {e}")))?;
        let pin_lock = pins
            .get(&port)
            .ok_or_else(|| AppError::Gpio(format!("port {port} not configured as input")))?;
        let pin = pin_lock
            .lock()
            .map_err(|e| AppError::Gpio(format!("lock poisoned: {e}")))?;

        Ok(pin.level)
    }

    fn release(&self, port: u32) -> Result<(), AppError> {
        let mut pins = self
            .pins
            .write()
            .map_err(|e| AppError::Gpio(format!("lock poisoned: {e}")))?;
        pins.remove(&port)
            .ok_or_else(|| AppError::Gpio(format!("port {port} not configured as input")))?;

        Ok(())
    }
}
