//! Device registry
//!
//! Holds the canonical set of known devices with their sensors, profiles
//! and options. Static metadata is cached at discovery; option values are
//! re-read from the backend on every query.

use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::backend::HardwareBackend;
use super::run_blocking;
use super::types::{DeviceInfo, OptionInfo, OptionValue, SensorInfo, StreamRequest};
use crate::error::{AppError, Result};
use crate::events::{EventBus, SystemEvent};

struct DeviceEntry {
    info: DeviceInfo,
    sensors: Vec<SensorInfo>,
}

impl DeviceEntry {
    fn sensor(&self, sensor_id: &str) -> Result<&SensorInfo> {
        self.sensors
            .iter()
            .find(|s| s.sensor_id == sensor_id)
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "sensor {} on device {}",
                    sensor_id, self.info.device_id
                ))
            })
    }

    fn sensor_mut(&mut self, sensor_id: &str) -> Option<&mut SensorInfo> {
        self.sensors.iter_mut().find(|s| s.sensor_id == sensor_id)
    }
}

type OptionKey = (String, String, String);

/// Registry of discovered devices
pub struct DeviceRegistry {
    backend: Arc<dyn HardwareBackend>,
    events: Arc<EventBus>,
    /// Discovery order is preserved
    devices: RwLock<Vec<DeviceEntry>>,
    /// Serializes writes per (device, sensor, option)
    option_locks: Mutex<HashMap<OptionKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl DeviceRegistry {
    pub fn new(backend: Arc<dyn HardwareBackend>, events: Arc<EventBus>) -> Self {
        Self {
            backend,
            events,
            devices: RwLock::new(Vec::new()),
            option_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn backend(&self) -> &Arc<dyn HardwareBackend> {
        &self.backend
    }

    /// Scan the backend and merge the result into the registry
    ///
    /// Devices that are still present keep their streaming flag; devices
    /// that disappeared are dropped.
    pub async fn discover(&self) -> Result<Vec<DeviceInfo>> {
        let backend = self.backend.clone();
        let found = run_blocking(move || backend.enumerate()).await?;

        let mut added = Vec::new();
        let mut removed = Vec::new();
        {
            let mut devices = self.devices.write();
            let streaming: HashSet<String> = devices
                .iter()
                .filter(|d| d.info.is_streaming)
                .map(|d| d.info.device_id.clone())
                .collect();
            let known: HashSet<String> =
                devices.iter().map(|d| d.info.device_id.clone()).collect();
            let present: HashSet<&str> = found.iter().map(|d| d.info.device_id.as_str()).collect();

            removed.extend(known.iter().filter(|id| !present.contains(id.as_str())).cloned());

            let mut next = Vec::with_capacity(found.len());
            for desc in &found {
                let mut info = desc.info.clone();
                info.is_streaming = streaming.contains(&info.device_id);
                if !known.contains(&info.device_id) {
                    added.push(info.clone());
                }
                next.push(DeviceEntry {
                    info,
                    sensors: desc.sensors.clone(),
                });
            }
            *devices = next;
        }

        for id in &removed {
            info!("Device {} no longer present", id);
            self.drop_option_locks(id);
            self.events.publish(SystemEvent::DeviceLost {
                device_id: id.clone(),
                reason: "not found during discovery".to_string(),
            });
        }
        for info in added {
            info!(
                "Discovered device {} ({}, serial {})",
                info.device_id, info.name, info.serial_number
            );
            self.events
                .publish(SystemEvent::DeviceDiscovered { device: info });
        }

        Ok(self.list_devices())
    }

    /// All devices in discovery order
    pub fn list_devices(&self) -> Vec<DeviceInfo> {
        self.devices.read().iter().map(|d| d.info.clone()).collect()
    }

    pub fn get_device(&self, device_id: &str) -> Result<DeviceInfo> {
        self.devices
            .read()
            .iter()
            .find(|d| d.info.device_id == device_id)
            .map(|d| d.info.clone())
            .ok_or_else(|| not_found_device(device_id))
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.devices
            .read()
            .iter()
            .any(|d| d.info.device_id == device_id)
    }

    pub fn get_sensors(&self, device_id: &str) -> Result<Vec<SensorInfo>> {
        self.with_entry(device_id, |e| Ok(e.sensors.clone()))
    }

    pub fn get_sensor(&self, device_id: &str, sensor_id: &str) -> Result<SensorInfo> {
        self.with_entry(device_id, |e| e.sensor(sensor_id).cloned())
    }

    /// Options of a sensor with current values read from the hardware
    ///
    /// A failed read keeps the cached value.
    pub async fn get_sensor_options(
        &self,
        device_id: &str,
        sensor_id: &str,
    ) -> Result<Vec<OptionInfo>> {
        let cached = self.get_sensor(device_id, sensor_id)?.options;
        let ids: Vec<String> = cached.iter().map(|o| o.option_id.clone()).collect();

        let backend = self.backend.clone();
        let (dev, sen) = (device_id.to_string(), sensor_id.to_string());
        let reads = run_blocking(move || {
            Ok(ids
                .iter()
                .map(|id| backend.read_option(&dev, &sen, id))
                .collect::<Vec<_>>())
        })
        .await?;

        let mut options = cached;
        for (opt, read) in options.iter_mut().zip(reads) {
            match read {
                Ok(value) => opt.current_value = value,
                Err(e) => warn!(
                    "Failed to read {} on {}/{}, using cached value: {}",
                    opt.option_id, device_id, sensor_id, e
                ),
            }
        }

        self.refresh_cache(device_id, sensor_id, &options);
        Ok(options)
    }

    /// One option with its current value read from the hardware
    pub async fn get_option(
        &self,
        device_id: &str,
        sensor_id: &str,
        option_id: &str,
    ) -> Result<OptionInfo> {
        let mut option = self.cached_option(device_id, sensor_id, option_id)?;

        let backend = self.backend.clone();
        let (dev, sen, opt) = (
            device_id.to_string(),
            sensor_id.to_string(),
            option_id.to_string(),
        );
        match run_blocking(move || backend.read_option(&dev, &sen, &opt)).await {
            Ok(value) => {
                option.current_value = value;
                self.refresh_cache(device_id, sensor_id, std::slice::from_ref(&option));
            }
            Err(e) => warn!(
                "Failed to read {} on {}/{}, using cached value: {}",
                option_id, device_id, sensor_id, e
            ),
        }
        Ok(option)
    }

    /// Validate and write an option value
    ///
    /// Validation happens before any hardware access; a rejected value
    /// leaves the option untouched.
    pub async fn set_option(
        &self,
        device_id: &str,
        sensor_id: &str,
        option_id: &str,
        value: OptionValue,
    ) -> Result<OptionInfo> {
        let mut option = self.cached_option(device_id, sensor_id, option_id)?;
        let value = option.validate(&value)?;

        let lock = self.option_lock(device_id, sensor_id, option_id);
        let _guard = lock.lock().await;

        let backend = self.backend.clone();
        let (dev, sen, opt) = (
            device_id.to_string(),
            sensor_id.to_string(),
            option_id.to_string(),
        );
        let written = value.clone();
        run_blocking(move || backend.write_option(&dev, &sen, &opt, &written)).await?;

        option.current_value = value.clone();
        self.refresh_cache(device_id, sensor_id, std::slice::from_ref(&option));
        debug!("Set {} on {}/{} to {}", option_id, device_id, sensor_id, value);

        self.events.publish(SystemEvent::OptionChanged {
            device_id: device_id.to_string(),
            sensor_id: sensor_id.to_string(),
            option_id: option_id.to_string(),
            value,
        });
        Ok(option)
    }

    /// Check a stream request against the advertised profiles
    ///
    /// An empty request (nothing enabled) is valid here; callers decide
    /// whether joining an existing session is acceptable.
    pub fn validate_request(&self, device_id: &str, request: &StreamRequest) -> Result<()> {
        self.with_entry(device_id, |entry| {
            let mut seen = HashSet::new();
            for cfg in request.enabled() {
                let sensor = entry.sensor(&cfg.sensor_id)?;
                if !sensor.supports(cfg) {
                    return Err(AppError::InvalidConfig(format!(
                        "sensor {} does not offer {} {} {}@{}fps",
                        cfg.sensor_id, cfg.stream_type, cfg.format, cfg.resolution, cfg.framerate
                    )));
                }
                if !seen.insert(cfg.stream_type) {
                    return Err(AppError::InvalidConfig(format!(
                        "stream {} requested more than once",
                        cfg.stream_type
                    )));
                }
            }
            if let Some(align) = request.align_to {
                if request.has_enabled() && !seen.contains(&align) {
                    return Err(AppError::InvalidConfig(format!(
                        "align target {} is not an enabled stream",
                        align
                    )));
                }
            }
            Ok(())
        })
    }

    pub fn set_streaming(&self, device_id: &str, streaming: bool) {
        if let Some(entry) = self
            .devices
            .write()
            .iter_mut()
            .find(|d| d.info.device_id == device_id)
        {
            entry.info.is_streaming = streaming;
        }
    }

    /// Drop a device after a disconnect; returns its last known info
    pub fn invalidate(&self, device_id: &str) -> Option<DeviceInfo> {
        let removed = {
            let mut devices = self.devices.write();
            let pos = devices.iter().position(|d| d.info.device_id == device_id)?;
            devices.remove(pos).info
        };
        self.drop_option_locks(device_id);
        info!("Device {} removed from registry", device_id);
        Some(removed)
    }

    fn with_entry<R>(
        &self,
        device_id: &str,
        f: impl FnOnce(&DeviceEntry) -> Result<R>,
    ) -> Result<R> {
        let devices = self.devices.read();
        let entry = devices
            .iter()
            .find(|d| d.info.device_id == device_id)
            .ok_or_else(|| not_found_device(device_id))?;
        f(entry)
    }

    fn cached_option(
        &self,
        device_id: &str,
        sensor_id: &str,
        option_id: &str,
    ) -> Result<OptionInfo> {
        self.with_entry(device_id, |e| {
            e.sensor(sensor_id)?.option(option_id).cloned().ok_or_else(|| {
                AppError::NotFound(format!(
                    "option {} on sensor {}",
                    option_id, sensor_id
                ))
            })
        })
    }

    fn refresh_cache(&self, device_id: &str, sensor_id: &str, fresh: &[OptionInfo]) {
        let mut devices = self.devices.write();
        let Some(sensor) = devices
            .iter_mut()
            .find(|d| d.info.device_id == device_id)
            .and_then(|d| d.sensor_mut(sensor_id))
        else {
            return;
        };
        for f in fresh {
            if let Some(o) = sensor.options.iter_mut().find(|o| o.option_id == f.option_id) {
                o.current_value = f.current_value.clone();
            }
        }
    }

    fn option_lock(
        &self,
        device_id: &str,
        sensor_id: &str,
        option_id: &str,
    ) -> Arc<tokio::sync::Mutex<()>> {
        self.option_locks
            .lock()
            .entry((
                device_id.to_string(),
                sensor_id.to_string(),
                option_id.to_string(),
            ))
            .or_default()
            .clone()
    }

    fn drop_option_locks(&self, device_id: &str) {
        self.option_locks
            .lock()
            .retain(|(dev, _, _), _| dev != device_id);
    }
}

fn not_found_device(device_id: &str) -> AppError {
    AppError::NotFound(format!("device {}", device_id))
}
