use std::sync::Arc;

use pinwatch::backend::MockGpioBackend;
use pinwatch::config::{AppConfig, PlatformConfig, PullMode, SensorConfig};
use pinwatch::error::AppError;
use pinwatch::gpio::{BinaryState, GpioBinarySensor, GpioInput, SensorRuntime};

fn platform(json: &str) -> PlatformConfig {
    serde_json::from_str(json).expect("valid platform config")
}

fn sensor_config(port: u32, invert_logic: bool) -> SensorConfig {
    SensorConfig {
        name: format!("Sensor {port}"),
        port,
        pull_mode: PullMode::Up,
        bounce_time_ms: 50,
        invert_logic,
        unique_id: None,
    }
}

#[test]
fn legacy_config_yields_one_sensor_per_port() {
    let platform = platform(
        r#"{
            "ports": { "17": "Door", "27": "Window", "22": "" },
            "pull_mode": "DOWN",
            "bounce_time": 80,
            "invert_logic": true
        }"#,
    );

    let configs = platform.sensor_configs().unwrap();
    assert_eq!(configs.len(), 3);

    // legacy entries are ordered by port and share the platform defaults
    assert_eq!(configs[0].port, 17);
    assert_eq!(configs[0].name, "Door");
    assert_eq!(configs[1].port, 22);
    assert_eq!(configs[1].name, "Unnamed Device");
    assert_eq!(configs[2].port, 27);
    assert_eq!(configs[2].name, "Window");

    for cfg in &configs {
        assert_eq!(cfg.pull_mode, PullMode::Down);
        assert_eq!(cfg.bounce_time_ms, 80);
        assert!(cfg.invert_logic);
        assert!(cfg.unique_id.is_none());
    }
}

#[test]
fn modern_config_fills_defaults_per_entry() {
    let platform = platform(
        r#"{
            "sensors": [
                { "name": "Door", "port": 17 },
                {
                    "name": "Window",
                    "port": 27,
                    "pull_mode": "DOWN",
                    "bounce_time": 20,
                    "invert_logic": true,
                    "unique_id": "window-1"
                }
            ]
        }"#,
    );

    let configs = platform.sensor_configs().unwrap();
    assert_eq!(configs.len(), 2);

    let door = &configs[0];
    assert_eq!(door.name, "Door");
    assert_eq!(door.pull_mode, PullMode::Up);
    assert_eq!(door.bounce_time_ms, 50);
    assert!(!door.invert_logic);
    assert!(door.unique_id.is_none());

    let window = &configs[1];
    assert_eq!(window.pull_mode, PullMode::Down);
    assert_eq!(window.bounce_time_ms, 20);
    assert!(window.invert_logic);
    assert_eq!(window.unique_id.as_deref(), Some("window-1"));
}

#[test]
fn both_shapes_rejected() {
    let platform = platform(
        r#"{
            "ports": { "17": "Door" },
            "sensors": [ { "name": "Door", "port": 17 } ]
        }"#,
    );

    assert!(matches!(
        platform.sensor_configs(),
        Err(AppError::Config(_))
    ));
}

#[test]
fn neither_shape_rejected() {
    let platform = platform("{}");

    assert!(matches!(
        platform.sensor_configs(),
        Err(AppError::Config(_))
    ));
}

#[test]
fn zero_port_rejected() {
    let platform = platform(r#"{ "sensors": [ { "name": "Door", "port": 0 } ] }"#);

    assert!(matches!(
        platform.sensor_configs(),
        Err(AppError::Config(_))
    ));
}

#[test]
fn duplicate_port_rejected() {
    let platform = platform(
        r#"{
            "sensors": [
                { "name": "Door", "port": 17 },
                { "name": "Window", "port": 17 }
            ]
        }"#,
    );

    assert!(matches!(
        platform.sensor_configs(),
        Err(AppError::Config(_))
    ));
}

#[test]
fn state_is_unknown_before_first_update() {
    let backend = MockGpioBackend::default();
    let sensor = GpioBinarySensor::open(sensor_config(17, false), &backend).unwrap();

    assert_eq!(sensor.state(), BinaryState::Unknown);
}

#[test]
fn invert_logic_complements_raw_level() {
    let backend = MockGpioBackend::default();

    let mut plain = GpioBinarySensor::open(sensor_config(17, false), &backend).unwrap();
    backend.set_level(17, true).unwrap();
    plain.update(&backend).unwrap();
    assert_eq!(plain.state(), BinaryState::On);

    let mut inverted = GpioBinarySensor::open(sensor_config(27, true), &backend).unwrap();
    backend.set_level(27, true).unwrap();
    inverted.update(&backend).unwrap();
    assert_eq!(inverted.state(), BinaryState::Off);

    backend.set_level(27, false).unwrap();
    inverted.update(&backend).unwrap();
    assert_eq!(inverted.state(), BinaryState::On);
}

#[test]
fn poll_without_edge_does_nothing() {
    let backend = MockGpioBackend::default();
    let mut sensor = GpioBinarySensor::open(sensor_config(17, false), &backend).unwrap();

    assert!(sensor.poll(&backend).unwrap().is_none());
    assert_eq!(sensor.state(), BinaryState::Unknown);
}

#[test]
fn poll_with_edge_refreshes_once() {
    let backend = MockGpioBackend::default();
    let mut sensor = GpioBinarySensor::open(sensor_config(17, false), &backend).unwrap();

    backend.set_level(17, false).unwrap();

    let change = sensor.poll(&backend).unwrap().expect("edge was latched");
    assert_eq!(change.port, 17);
    assert_eq!(change.state, BinaryState::Off);
    assert_eq!(sensor.state(), BinaryState::Off);

    // the latched edge was consumed, the next tick is quiet
    assert!(sensor.poll(&backend).unwrap().is_none());
}

#[test]
fn closed_sensor_releases_its_port() {
    let backend = MockGpioBackend::default();
    let mut sensor = GpioBinarySensor::open(sensor_config(17, false), &backend).unwrap();

    sensor.close(&backend).unwrap();

    assert_eq!(sensor.state(), BinaryState::Unknown);
    assert!(backend.read_input(17).is_err());
}

fn runtime_config() -> AppConfig {
    serde_json::from_str(
        r#"
        {
            "http": { "host": "localhost", "path": "/api/v1", "timeout": 30 },
            "platform": {
                "sensors": [ { "name": "Door", "port": 17 } ]
            }
        }
        "#,
    )
    .expect("valid runtime config")
}

#[actix_rt::test]
async fn runtime_publishes_exactly_one_change_per_edge() {
    let cfg = runtime_config();
    let backend = Arc::new(MockGpioBackend::default());
    let runtime = SensorRuntime::new(&cfg, backend.clone()).unwrap();
    let mut rx = runtime.subscribe_changes();

    // quiet tick: no refresh, no broadcast
    assert!(runtime.poll_sensor(17).unwrap().is_none());
    assert!(rx.try_recv().is_err());

    backend.set_level(17, false).unwrap();

    let change = runtime.poll_sensor(17).unwrap().expect("edge was latched");
    assert_eq!(change.state, BinaryState::Off);

    let published = rx.try_recv().expect("one change broadcast");
    assert_eq!(published.port, 17);
    assert_eq!(published.state, BinaryState::Off);
    assert!(rx.try_recv().is_err());
}

#[actix_rt::test]
async fn runtime_runs_initial_read_before_serving() {
    let cfg = runtime_config();
    let backend = Arc::new(MockGpioBackend::default());
    let runtime = SensorRuntime::new(&cfg, backend).unwrap();

    // pull-up idles high, so the sensor is already known at startup
    assert_eq!(runtime.get_state(17).await.unwrap(), BinaryState::On);
}

#[actix_rt::test]
async fn close_all_releases_every_port() {
    let cfg = runtime_config();
    let backend = Arc::new(MockGpioBackend::default());
    let runtime = SensorRuntime::new(&cfg, backend.clone()).unwrap();

    runtime.close_all();

    assert!(backend.read_input(17).is_err());
}
