//! Desktop simulator for the airq acquisition pipeline.
//!
//! Runs the real drivers and acquisition task on an embassy std executor
//! against an emulated I2C bus, with a second task consuming fused samples
//! the way a display or uplink would.
//!
//! Set `RUST_LOG=debug` to see every published sample.

mod bus;

use airq_core::AcquisitionConfig;
use airq_core::AcquisitionTask;
use airq_core::async_i2c_bus::{AsyncI2cDevice, SharedI2cBus};
use airq_core::exchange::{FusedSample, SampleExchange};
use airq_core::metrics::Co2Level;
use airq_core::sensors::{Sgp30Sensor, Sht3xSensor};
use airq_core::storage::MemoryStore;
use embassy_executor::Spawner;
use embassy_sync::mutex::Mutex;
use embassy_time::{Delay, Duration, Instant, Ticker};
use log::{debug, error, info};
use static_cell::StaticCell;

use bus::SimulatedBus;

/// How often the consumer looks for a new sample.
const CONSUMER_INTERVAL: Duration = Duration::from_secs(5);

/// Every n-th emulated measurement frame is corrupted.
const CORRUPT_EVERY: u32 = 97;

/// Shortened calibration schedule so training and persistence show up within
/// a few minutes of running.
const SIMULATOR_CONFIG: AcquisitionConfig = AcquisitionConfig {
    period_ms: 1_000,
    climate_divisor: 10,
    training_period_secs: 120,
    persist_interval_secs: 30,
};

type Device = AsyncI2cDevice<'static, SimulatedBus>;
type SimulatedTask = AcquisitionTask<
    'static,
    Sht3xSensor<Device, Delay>,
    Sgp30Sensor<Device, Delay>,
    MemoryStore,
>;

static BUS: StaticCell<SharedI2cBus<SimulatedBus>> = StaticCell::new();
static EXCHANGE: SampleExchange = SampleExchange::new();

#[embassy_executor::task]
async fn acquisition_task(mut task: SimulatedTask) {
    if let Err(e) = task.start().await {
        error!("Acquisition startup failed: {}", e);
        return;
    }
    task.run().await
}

#[embassy_executor::task]
async fn consumer_task(exchange: &'static SampleExchange) {
    let mut ticker = Ticker::every(CONSUMER_INTERVAL);
    loop {
        ticker.next().await;
        match exchange.try_read() {
            Some(sample) => report(&sample),
            None => info!("No new sample"),
        }
    }
}

fn report(sample: &FusedSample) {
    let level = Co2Level::assess(sample.eco2);
    info!(
        "[{:>8} ms] {:.2} C {:.1} %RH eCO2 {} ppm ({}) TVOC {} ppb",
        sample.timestamp_ms,
        sample.temperature,
        sample.humidity,
        sample.eco2,
        level.label(),
        sample.tvoc
    );

    let mut buffer = [0u8; FusedSample::MAX_ENCODED_LEN];
    match sample.encode(&mut buffer) {
        Ok(bytes) => debug!("Wire frame: {:02x?}", bytes),
        Err(e) => error!("Failed to encode sample: {:?}", e),
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("Starting airq simulator");

    let bus = BUS.init(Mutex::new(
        SimulatedBus::new().with_corruption(CORRUPT_EVERY),
    ));

    let climate = Sht3xSensor::new(AsyncI2cDevice::new(bus), Delay);
    let air_quality = Sgp30Sensor::new(AsyncI2cDevice::new(bus), Delay);
    let task = AcquisitionTask::new(
        climate,
        air_quality,
        MemoryStore::new(),
        &EXCHANGE,
        SIMULATOR_CONFIG,
        Instant::now(),
    );

    if let Err(e) = spawner.spawn(acquisition_task(task)) {
        error!("Failed to spawn acquisition task: {:?}", e);
    }
    if let Err(e) = spawner.spawn(consumer_task(&EXCHANGE)) {
        error!("Failed to spawn consumer task: {:?}", e);
    }
}
