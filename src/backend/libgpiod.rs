use std::path::PathBuf;
use std::time::Duration;

use libgpiod::{chip::Chip, line, line::EventClock, request};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::config::PullMode;
use crate::error::AppError;
use crate::gpio::GpioInput;

const LIBGPIOD_BACKEND_EVENT_BUFFER_CAPACITY: usize = 64;

pub struct LibgpiodBackend {
    chip_path: String,
    pins: RwLock<FxHashMap<u32, Mutex<PinHandle>>>, // keyed by line offset
}

struct PinHandle {
    request: request::Request,
    buffer: request::Buffer,
    pull: PullMode,
}

impl LibgpiodBackend {
    pub fn new(chip_path: &str) -> Result<Self, AppError> {
        Ok(Self {
            chip_path: chip_path.to_string(),
            pins: RwLock::new(FxHashMap::default()),
        })
    }

    fn open_chip(&self) -> Result<Chip, AppError> {
        let p = PathBuf::from(&self.chip_path);
        Chip::open(&p).map_err(|e| AppError::Gpio(format!("open chip {}: {e}", self.chip_path)))
    }

    fn request_lines(chip: &Chip, line_cfg: &line::Config) -> Result<request::Request, AppError> {
        let mut req_cfg =
            request::Config::new().map_err(|e| AppError::Gpio(format!("request config: {e}")))?;
        req_cfg
            .set_consumer(env!("CARGO_PKG_NAME"))
            .map_err(|e| AppError::Gpio(format!("request consumer: {e}")))?;
        chip.request_lines(Some(&req_cfg), line_cfg)
            .map_err(|e| AppError::Gpio(format!("request lines: {e}")))
    }

    fn make_line_settings(
        pull: PullMode,
        edge_bounce_ms: Option<u64>,
    ) -> Result<line::Settings, AppError> {
        let mut ls =
            line::Settings::new().map_err(|e| AppError::Gpio(format!("libgpiod settings: {e}")))?;

        ls.set_direction(line::Direction::Input)
            .map_err(|e| AppError::Gpio(format!("set direction: {e}")))?;
        let bias = match pull {
            PullMode::Up => line::Bias::PullUp,
            PullMode::Down => line::Bias::PullDown,
        };
        ls.set_bias(Some(bias))
            .map_err(|e| AppError::Gpio(format!("set bias: {e}")))?;

        if let Some(bounce_ms) = edge_bounce_ms {
            ls.set_edge_detection(Some(line::Edge::Both))
                .map_err(|e| AppError::Gpio(format!("set edge detection: {e}")))?;
            ls.set_event_clock(EventClock::Realtime)
                .map_err(|e| AppError::Gpio(format!("set event clock: {e}")))?;
            ls.set_debounce_period(Duration::from_millis(bounce_ms));
        }

        Ok(ls)
    }

    fn make_line_config(offset: u32, settings: line::Settings) -> Result<line::Config, AppError> {
        let mut cfg =
            line::Config::new().map_err(|e| AppError::Gpio(format!("line config: {e}")))?;
        cfg.add_line_settings(&[offset], settings)
            .map_err(|e| AppError::Gpio(format!("line config add settings: {e}")))?;
        Ok(cfg)
    }
}

impl GpioInput for LibgpiodBackend {
    fn setup_input(&self, port: u32, pull_mode: PullMode) -> Result<(), AppError> {
        let settings = Self::make_line_settings(pull_mode, None)?;
        let line_cfg = Self::make_line_config(port, settings)?;

        let chip = self.open_chip()?;
        let request = Self::request_lines(&chip, &line_cfg)?;
        let buffer = request::Buffer::new(LIBGPIOD_BACKEND_EVENT_BUFFER_CAPACITY)
            .map_err(|e| AppError::Gpio(format!("event buffer: {e}")))?;

        let mut pins = self.pins.write();
        // replacing an existing handle drops its line request first
        pins.insert(
            port,
            Mutex::new(PinHandle {
                request,
                buffer,
                pull: pull_mode,
            }),
        );

        Ok(())
    }

    fn setup_edge_detect(&self, port: u32, bounce_ms: u64) -> Result<(), AppError> {
        let pins = self.pins.read();
        let pin_lock = pins
            .get(&port)
            .ok_or_else(|| AppError::Gpio(format!("port {port} not configured as input")))?;

        let pull = pin_lock.lock().pull;
        let settings = Self::make_line_settings(pull, Some(bounce_ms))?;
        let line_cfg = Self::make_line_config(port, settings)?;

        pin_lock
            .lock()
            .request
            .reconfigure_lines(&line_cfg)
            .map_err(|e| AppError::Gpio(format!("reconfigure lines: {e}")))?;

        Ok(())
    }

    fn read_edge_events(&self, port: u32) -> Result<bool, AppError> {
        let pins = self.pins.read();
        let pin_lock = pins
            .get(&port)
            .ok_or_else(|| AppError::Gpio(format!("port {port} not configured as input")))?;
        let mut pin = pin_lock.lock();
        let PinHandle {
            request, buffer, ..
        } = &mut *pin;

        let has_event = request
            .wait_edge_events(Some(Duration::ZERO))
            .map_err(|e| AppError::Gpio(format!("wait edge events: {e}")))?;
        if !has_event {
            return Ok(false);
        }

        // drain latched events so the next tick starts clean
        request
            .read_edge_events(buffer)
            .map_err(|e| AppError::Gpio(format!("read edge events: {e}")))?;

        Ok(true)
    }

    fn read_input(&self, port: u32) -> Result<bool, AppError> {
        let pins = self.pins.read();
        let pin_lock = pins
            .get(&port)
            .ok_or_else(|| AppError::Gpio(format!("port {port} not configured as input")))?;
        let value = pin_lock
            .lock()
            .request
            .value(port)
            .map_err(|e| AppError::Gpio(format!("get value: {e}")))?;

        Ok(match value {
            line::Value::InActive => false,
            line::Value::Active => true,
        })
    }

    fn release(&self, port: u32) -> Result<(), AppError> {
        let mut pins = self.pins.write();
        pins.remove(&port)
            .ok_or_else(|| AppError::Gpio(format!("port {port} not configured as input")))?;

        Ok(())
    }
}
