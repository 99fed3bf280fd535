use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::warn;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::{AppConfig, PullMode, SensorConfig};
use crate::error::AppError;

/// GPIO access layer consumed by the sensors. `read_edge_events` is a
/// zero-wait consuming check: true iff an edge latched since the last call.
pub trait GpioInput: Send + Sync {
    fn setup_input(&self, port: u32, pull_mode: PullMode) -> Result<(), AppError>;
    fn setup_edge_detect(&self, port: u32, bounce_ms: u64) -> Result<(), AppError>;
    fn read_edge_events(&self, port: u32) -> Result<bool, AppError>;
    fn read_input(&self, port: u32) -> Result<bool, AppError>;
    fn release(&self, port: u32) -> Result<(), AppError>;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BinaryState {
    Unknown,
    On,
    Off,
}

#[derive(Debug, Clone, Serialize)]
pub struct StateChange {
    pub port: u32,
    pub name: String,
    pub state: BinaryState,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SensorDescriptor {
    pub info: SensorConfig,
    pub state: BinaryState,
}

pub struct GpioBinarySensor {
    config: SensorConfig,
    raw_state: Option<bool>,
}

impl GpioBinarySensor {
    /// Configures the port as an input with the requested pull resistor and
    /// arms edge detection. Any backend failure propagates and the sensor is
    /// never constructed.
    pub fn open(config: SensorConfig, backend: &dyn GpioInput) -> Result<Self, AppError> {
        backend.setup_input(config.port, config.pull_mode)?;
        backend.setup_edge_detect(config.port, config.bounce_time_ms)?;

        Ok(Self {
            config,
            raw_state: None,
        })
    }

    pub fn config(&self) -> &SensorConfig {
        &self.config
    }

    /// Single best-effort level read, no retry.
    pub fn update(&mut self, backend: &dyn GpioInput) -> Result<(), AppError> {
        self.raw_state = Some(backend.read_input(self.config.port)?);
        Ok(())
    }

    pub fn state(&self) -> BinaryState {
        match self.raw_state {
            None => BinaryState::Unknown,
            Some(raw) => {
                if raw != self.config.invert_logic {
                    BinaryState::On
                } else {
                    BinaryState::Off
                }
            }
        }
    }

    /// One edge-check tick: skip the read entirely unless an edge latched
    /// since the previous tick.
    pub fn poll(&mut self, backend: &dyn GpioInput) -> Result<Option<StateChange>, AppError> {
        if !backend.read_edge_events(self.config.port)? {
            return Ok(None);
        }

        self.update(backend)?;

        Ok(Some(self.state_change()))
    }

    pub fn close(&mut self, backend: &dyn GpioInput) -> Result<(), AppError> {
        self.raw_state = None;
        backend.release(self.config.port)
    }

    fn state_change(&self) -> StateChange {
        StateChange {
            port: self.config.port,
            name: self.config.name.clone(),
            state: self.state(),
            timestamp_ms: epoch_millis(),
        }
    }
}

pub struct StateChangePublisher {
    change_tx: broadcast::Sender<StateChange>,
    change_history: FxHashMap<u32, RwLock<VecDeque<StateChange>>>,
    change_history_capacity: usize,
}

impl StateChangePublisher {
    pub fn new(
        change_tx: broadcast::Sender<StateChange>,
        change_history: FxHashMap<u32, RwLock<VecDeque<StateChange>>>,
        change_history_capacity: usize,
    ) -> Self {
        Self {
            change_tx,
            change_history,
            change_history_capacity,
        }
    }

    pub fn dispatch(&self, change: StateChange) {
        {
            let change = change.clone();
            if let Some(history_lock) = self.change_history.get(&change.port) {
                let mut history = history_lock.write();
                while history.len() >= self.change_history_capacity {
                    history.pop_front();
                }
                history.push_back(change);
            }
        }
        let _ = self.change_tx.send(change);
    }
}

pub struct SensorRuntime<B: GpioInput> {
    backend: Arc<B>,
    sensors: FxHashMap<u32, RwLock<GpioBinarySensor>>,
    publisher: Arc<StateChangePublisher>,
}

impl<B: GpioInput> SensorRuntime<B> {
    /// Opens every configured sensor and performs the initial forced read so
    /// each entity reports a state before it is served. A failed initial read
    /// leaves that sensor unknown; a failed open aborts setup.
    pub fn new(config: &AppConfig, backend: Arc<B>) -> Result<Self, AppError> {
        let sensor_configs = config.platform.sensor_configs()?;

        let (change_tx, _) = broadcast::channel(config.broadcast_capacity);

        let mut history = FxHashMap::default();
        for cfg in &sensor_configs {
            history.insert(cfg.port, RwLock::new(VecDeque::new()));
        }

        let publisher = Arc::new(StateChangePublisher::new(
            change_tx,
            history,
            config.history_capacity,
        ));

        let mut sensors = FxHashMap::default();
        for cfg in sensor_configs {
            let port = cfg.port;
            let mut sensor = GpioBinarySensor::open(cfg, backend.as_ref())?;

            if let Err(e) = sensor.update(backend.as_ref()) {
                warn!("Initial read failed for port {port}: {e}");
            }

            sensors.insert(port, RwLock::new(sensor));
        }

        Ok(Self {
            backend,
            sensors,
            publisher,
        })
    }

    fn sensor(&self, port: u32) -> Result<&RwLock<GpioBinarySensor>, AppError> {
        self.sensors
            .get(&port)
            .ok_or_else(|| AppError::NotFoundSensor(port.to_string()))
    }

    pub async fn list_sensors(&self) -> HashMap<u32, SensorDescriptor> {
        self.sensors
            .iter()
            .map(|(port, lock)| {
                let sensor = lock.read();
                (
                    *port,
                    SensorDescriptor {
                        info: sensor.config().clone(),
                        state: sensor.state(),
                    },
                )
            })
            .collect()
    }

    pub async fn get_descriptor(&self, port: u32) -> Result<SensorDescriptor, AppError> {
        let sensor = self.sensor(port)?.read();

        Ok(SensorDescriptor {
            info: sensor.config().clone(),
            state: sensor.state(),
        })
    }

    pub async fn get_state(&self, port: u32) -> Result<BinaryState, AppError> {
        Ok(self.sensor(port)?.read().state())
    }

    /// One tick for one sensor: check for a latched edge, refresh and publish
    /// only if one occurred.
    pub fn poll_sensor(&self, port: u32) -> Result<Option<StateChange>, AppError> {
        let mut sensor = self.sensor(port)?.write();
        let change = sensor.poll(self.backend.as_ref())?;

        if let Some(change) = &change {
            self.publisher.dispatch(change.clone());
        }

        Ok(change)
    }

    /// Forced refresh: unconditional read followed by a published change.
    pub async fn refresh_sensor(&self, port: u32) -> Result<StateChange, AppError> {
        let mut sensor = self.sensor(port)?.write();
        sensor.update(self.backend.as_ref())?;

        let change = sensor.state_change();
        self.publisher.dispatch(change.clone());

        Ok(change)
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<StateChange> {
        self.publisher.change_tx.subscribe()
    }

    pub async fn get_changes(
        &self,
        port: u32,
        limit: Option<usize>,
    ) -> Result<Vec<StateChange>, AppError> {
        self.sensor(port)?;
        let map = &self.publisher.change_history;

        Ok(map
            .get(&port)
            .map(|d| {
                let changes: Vec<StateChange> = if let Some(lim) = limit {
                    d.read().iter().rev().take(lim).cloned().collect()
                } else {
                    d.read().iter().cloned().collect()
                };
                changes.into_iter().rev().collect()
            })
            .unwrap_or_default())
    }

    pub async fn get_last_change(&self, port: u32) -> Result<Option<StateChange>, AppError> {
        self.sensor(port)?;
        let map = &self.publisher.change_history;

        Ok(map.get(&port).and_then(|d| d.read().back().cloned()))
    }

    /// Releases every pin and disarms edge detection.
    pub fn close_all(&self) {
        for lock in self.sensors.values() {
            let mut sensor = lock.write();
            let port = sensor.config().port;
            if let Err(e) = sensor.close(self.backend.as_ref()) {
                warn!("Failed to release port {port}: {e}");
            }
        }
    }
}

impl<B: GpioInput + 'static> SensorRuntime<B> {
    /// One tick task per sensor, each at its own debounce cadence. Default
    /// host polling stays off; edges drive the refreshes.
    pub fn spawn_pollers(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        let cadences: Vec<(u32, u64)> = self
            .sensors
            .iter()
            .map(|(port, lock)| (*port, lock.read().config().bounce_time_ms))
            .collect();

        cadences
            .into_iter()
            .map(|(port, bounce_ms)| Self::spawn_poller(Arc::clone(&self), port, bounce_ms))
            .collect()
    }

    fn spawn_poller(runtime: Arc<Self>, port: u32, bounce_ms: u64) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(bounce_ms));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = runtime.poll_sensor(port) {
                    warn!("Edge check failed for port {port}: {e}");
                }
            }
        })
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
