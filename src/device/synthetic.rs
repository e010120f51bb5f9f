//! Synthetic test-pattern backend
//!
//! Emulates D4xx-style devices (a stereo module with depth and infrared, an
//! RGB camera) and produces deterministic frames at the configured rate.
//! Faults can be injected for tests: busy claims, refused configurations,
//! failed starts, slow starts and unplugs.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use super::backend::{ClaimHandle, DeviceDescriptor, FrameStream, HardwareBackend, HotplugEvent};
use super::format::{Resolution, StreamFormat, StreamType};
use super::types::{
    DeviceInfo, OptionInfo, OptionKind, OptionValue, SensorInfo, StreamConfig, StreamProfile,
    StreamRequest,
};
use crate::capture::Frame;
use crate::error::{AppError, Result};

/// Identity of one emulated device
#[derive(Debug, Clone)]
pub struct SyntheticDeviceSpec {
    pub device_id: String,
    pub serial_number: String,
    pub stereo_sensor_id: String,
    pub color_sensor_id: String,
}

impl SyntheticDeviceSpec {
    pub fn new(device_id: impl Into<String>) -> Self {
        let device_id = device_id.into();
        Self {
            serial_number: format!("SYN{:0>9}", device_id.len() * 7919),
            stereo_sensor_id: format!("{}-stereo", device_id),
            color_sensor_id: format!("{}-rgb", device_id),
            device_id,
        }
    }

    pub fn with_sensor_ids(
        mut self,
        stereo: impl Into<String>,
        color: impl Into<String>,
    ) -> Self {
        self.stereo_sensor_id = stereo.into();
        self.color_sensor_id = color.into();
        self
    }

    fn descriptor(&self, index: usize) -> DeviceDescriptor {
        let stereo_profiles = vec![
            StreamProfile {
                stream_type: StreamType::Depth,
                resolutions: vec![Resolution::VGA, Resolution::WVGA, Resolution::HD720],
                fps: vec![6, 15, 30, 60],
                formats: vec![StreamFormat::Z16],
            },
            StreamProfile {
                stream_type: StreamType::Infrared,
                resolutions: vec![Resolution::VGA, Resolution::WVGA, Resolution::HD720],
                fps: vec![6, 15, 30, 60],
                formats: vec![StreamFormat::Y8],
            },
        ];
        let color_profiles = vec![StreamProfile {
            stream_type: StreamType::Color,
            resolutions: vec![Resolution::VGA, Resolution::HD720, Resolution::HD1080],
            fps: vec![6, 15, 30],
            formats: vec![StreamFormat::Rgb8, StreamFormat::Bgr8, StreamFormat::Yuyv],
        }];

        let stereo = SensorInfo {
            sensor_id: self.stereo_sensor_id.clone(),
            name: "Stereo Module".to_string(),
            sensor_type: StreamType::Depth,
            supported_stream_profiles: stereo_profiles,
            options: vec![
                numeric_option("exposure", "Exposure", "Depth exposure time", 8500.0, 1.0, 165000.0, 1.0, Some("us")),
                numeric_option("laser_power", "Laser Power", "Projector power", 150.0, 0.0, 360.0, 30.0, Some("mW")),
                OptionInfo {
                    option_id: "emitter_enabled".to_string(),
                    name: "Emitter Enabled".to_string(),
                    description: "Turn the IR projector on or off".to_string(),
                    current_value: OptionValue::Boolean(true),
                    default_value: OptionValue::Boolean(true),
                    kind: OptionKind::Boolean,
                    units: None,
                    read_only: false,
                },
                OptionInfo {
                    read_only: true,
                    ..numeric_option("asic_temperature", "ASIC Temperature", "Current ASIC temperature", 38.0, -40.0, 125.0, 0.0, Some("C"))
                },
            ],
        };
        let color = SensorInfo {
            sensor_id: self.color_sensor_id.clone(),
            name: "RGB Camera".to_string(),
            sensor_type: StreamType::Color,
            supported_stream_profiles: color_profiles,
            options: vec![
                numeric_option("brightness", "Brightness", "UVC image brightness", 0.0, -64.0, 64.0, 1.0, None),
                OptionInfo {
                    option_id: "enable_auto_exposure".to_string(),
                    name: "Enable Auto Exposure".to_string(),
                    description: "Let the camera pick exposure".to_string(),
                    current_value: OptionValue::Boolean(true),
                    default_value: OptionValue::Boolean(true),
                    kind: OptionKind::Boolean,
                    units: None,
                    read_only: false,
                },
            ],
        };

        DeviceDescriptor {
            info: DeviceInfo {
                device_id: self.device_id.clone(),
                name: "Synthetic RealSense D435".to_string(),
                serial_number: self.serial_number.clone(),
                firmware_version: "5.16.0.1".to_string(),
                physical_port: format!("synthetic-usb-{}", index + 1),
                usb_type: "3.2".to_string(),
                product_id: "0B07".to_string(),
                sensors: vec![stereo.sensor_id.clone(), color.sensor_id.clone()],
                is_streaming: false,
            },
            sensors: vec![stereo, color],
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn numeric_option(
    id: &str,
    name: &str,
    description: &str,
    value: f64,
    min: f64,
    max: f64,
    step: f64,
    units: Option<&str>,
) -> OptionInfo {
    OptionInfo {
        option_id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        current_value: OptionValue::Numeric(value),
        default_value: OptionValue::Numeric(value),
        kind: OptionKind::Numeric {
            min: Some(min),
            max: Some(max),
            step: if step > 0.0 { Some(step) } else { None },
        },
        units: units.map(str::to_string),
        read_only: false,
    }
}

/// Running producer threads of one device
struct Pipeline {
    stop: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl Pipeline {
    fn shutdown(self) {
        self.stop.store(true, Ordering::SeqCst);
        for t in self.threads {
            let _ = t.join();
        }
    }
}

struct SyntheticDevice {
    descriptor: DeviceDescriptor,
    /// (sensor_id, option_id) -> live value
    options: HashMap<(String, String), OptionValue>,
    claim: Option<u64>,
    busy_elsewhere: bool,
    reject_next_configure: bool,
    fail_next_start: Option<String>,
    configured: Option<StreamRequest>,
    pipeline: Option<Pipeline>,
    point_cloud: Arc<AtomicBool>,
}

impl SyntheticDevice {
    fn new(spec: &SyntheticDeviceSpec, index: usize) -> Self {
        let descriptor = spec.descriptor(index);
        let options = descriptor
            .sensors
            .iter()
            .flat_map(|s| {
                s.options.iter().map(move |o| {
                    ((s.sensor_id.clone(), o.option_id.clone()), o.current_value.clone())
                })
            })
            .collect();
        Self {
            descriptor,
            options,
            claim: None,
            busy_elsewhere: false,
            reject_next_configure: false,
            fail_next_start: None,
            configured: None,
            pipeline: None,
            point_cloud: Arc::new(AtomicBool::new(false)),
        }
    }

    fn stop_pipeline(&mut self) {
        if let Some(p) = self.pipeline.take() {
            p.shutdown();
        }
        self.point_cloud.store(false, Ordering::SeqCst);
    }
}

/// Backend producing deterministic frames without hardware
pub struct SyntheticBackend {
    devices: Mutex<Vec<SyntheticDevice>>,
    next_token: AtomicU64,
    starts: AtomicUsize,
    start_delay: Mutex<Option<Duration>>,
    hotplug_tx: broadcast::Sender<HotplugEvent>,
}

impl SyntheticBackend {
    /// Create `count` devices named `synthetic-0`, `synthetic-1`, ...
    pub fn new(count: usize) -> Self {
        let specs = (0..count)
            .map(|i| SyntheticDeviceSpec::new(format!("synthetic-{}", i)))
            .collect();
        Self::with_devices(specs)
    }

    pub fn with_devices(specs: Vec<SyntheticDeviceSpec>) -> Self {
        let devices = specs
            .iter()
            .enumerate()
            .map(|(i, s)| SyntheticDevice::new(s, i))
            .collect();
        let (hotplug_tx, _) = broadcast::channel(16);
        Self {
            devices: Mutex::new(devices),
            next_token: AtomicU64::new(1),
            starts: AtomicUsize::new(0),
            start_delay: Mutex::new(None),
            hotplug_tx,
        }
    }

    /// Pretend another process holds the device
    pub fn set_busy(&self, device_id: &str, busy: bool) {
        if let Some(d) = self.devices.lock().iter_mut().find(|d| id_of(d) == device_id) {
            d.busy_elsewhere = busy;
        }
    }

    /// Make the next `start` on the device fail with the given reason
    pub fn fail_next_start(&self, device_id: &str, reason: impl Into<String>) {
        if let Some(d) = self.devices.lock().iter_mut().find(|d| id_of(d) == device_id) {
            d.fail_next_start = Some(reason.into());
        }
    }

    /// Make the next `configure` on the device report `Unsupported`
    pub fn reject_next_configure(&self, device_id: &str) {
        if let Some(d) = self.devices.lock().iter_mut().find(|d| id_of(d) == device_id) {
            d.reject_next_configure = true;
        }
    }

    /// Delay every `start` call, to widen race windows in tests
    pub fn set_start_delay(&self, delay: Option<Duration>) {
        *self.start_delay.lock() = delay;
    }

    /// Remove a device as if its cable was pulled
    pub fn unplug(&self, device_id: &str) {
        let removed = {
            let mut devices = self.devices.lock();
            match devices.iter().position(|d| id_of(d) == device_id) {
                Some(pos) => Some(devices.remove(pos)),
                None => None,
            }
        };
        if let Some(mut device) = removed {
            info!("Synthetic device {} unplugged", device_id);
            device.stop_pipeline();
            let _ = self.hotplug_tx.send(HotplugEvent::Removed(device_id.to_string()));
        }
    }

    /// Add a device at runtime
    pub fn plug(&self, spec: SyntheticDeviceSpec) {
        let mut devices = self.devices.lock();
        let index = devices.len();
        devices.push(SyntheticDevice::new(&spec, index));
        let _ = self.hotplug_tx.send(HotplugEvent::Added(spec.device_id));
    }

    /// Number of successful pipeline starts since creation
    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn is_claimed(&self, device_id: &str) -> bool {
        self.devices
            .lock()
            .iter()
            .any(|d| id_of(d) == device_id && d.claim.is_some())
    }

    pub fn is_running(&self, device_id: &str) -> bool {
        self.devices
            .lock()
            .iter()
            .any(|d| id_of(d) == device_id && d.pipeline.is_some())
    }

    fn with_device<R>(
        &self,
        device_id: &str,
        f: impl FnOnce(&mut SyntheticDevice) -> Result<R>,
    ) -> Result<R> {
        let mut devices = self.devices.lock();
        let device = devices
            .iter_mut()
            .find(|d| id_of(d) == device_id)
            .ok_or_else(|| AppError::NotFound(format!("device {}", device_id)))?;
        f(device)
    }

    fn with_claimed<R>(
        &self,
        handle: &ClaimHandle,
        f: impl FnOnce(&mut SyntheticDevice) -> Result<R>,
    ) -> Result<R> {
        self.with_device(&handle.device_id, |d| {
            if d.claim != Some(handle.token) {
                return Err(AppError::Hardware(format!(
                    "stale claim on device {}",
                    handle.device_id
                )));
            }
            f(d)
        })
    }
}

fn id_of(d: &SyntheticDevice) -> &str {
    &d.descriptor.info.device_id
}

impl HardwareBackend for SyntheticBackend {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>> {
        Ok(self
            .devices
            .lock()
            .iter()
            .map(|d| d.descriptor.clone())
            .collect())
    }

    fn claim(&self, device_id: &str) -> Result<ClaimHandle> {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        self.with_device(device_id, |d| {
            if d.claim.is_some() || d.busy_elsewhere {
                return Err(AppError::DeviceBusy(device_id.to_string()));
            }
            d.claim = Some(token);
            Ok(ClaimHandle {
                device_id: device_id.to_string(),
                token,
            })
        })
    }

    fn configure(&self, handle: &ClaimHandle, request: &StreamRequest) -> Result<()> {
        self.with_claimed(handle, |d| {
            if std::mem::take(&mut d.reject_next_configure) {
                return Err(AppError::Unsupported(format!(
                    "device {} refused the stream combination",
                    handle.device_id
                )));
            }
            for cfg in request.enabled() {
                let supported = d
                    .descriptor
                    .sensors
                    .iter()
                    .any(|s| s.sensor_id == cfg.sensor_id && s.supports(cfg));
                if !supported {
                    return Err(AppError::Unsupported(format!(
                        "{} {} {}@{}",
                        cfg.stream_type, cfg.format, cfg.resolution, cfg.framerate
                    )));
                }
            }
            d.configured = Some(request.normalized());
            Ok(())
        })
    }

    fn start(&self, handle: &ClaimHandle) -> Result<FrameStream> {
        let delay = *self.start_delay.lock();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        self.with_claimed(handle, |d| {
            if let Some(reason) = d.fail_next_start.take() {
                return Err(AppError::CaptureStartFailed {
                    device: handle.device_id.clone(),
                    reason,
                });
            }
            let request = d.configured.clone().ok_or_else(|| {
                AppError::Hardware(format!("device {} is not configured", handle.device_id))
            })?;
            d.stop_pipeline();

            let (tx, stream) = FrameStream::channel();
            let stop = Arc::new(AtomicBool::new(false));
            let mut threads = Vec::new();
            for cfg in request.enabled() {
                let producer = Producer {
                    config: cfg.clone(),
                    tx: tx.clone(),
                    stop: stop.clone(),
                    point_cloud: d.point_cloud.clone(),
                };
                let thread = std::thread::Builder::new()
                    .name(format!("synth-{}-{}", handle.device_id, cfg.stream_type))
                    .spawn(move || producer.run())
                    .map_err(|e| AppError::CaptureStartFailed {
                        device: handle.device_id.clone(),
                        reason: format!("failed to spawn producer: {}", e),
                    });
                match thread {
                    Ok(t) => threads.push(t),
                    Err(e) => {
                        Pipeline { stop, threads }.shutdown();
                        return Err(e);
                    }
                }
            }
            d.pipeline = Some(Pipeline { stop, threads });
            self.starts.fetch_add(1, Ordering::SeqCst);
            debug!("Synthetic pipeline started on {}", handle.device_id);
            Ok(stream)
        })
    }

    fn stop(&self, handle: &ClaimHandle) -> Result<()> {
        // Join outside the device lock
        let pipeline = self.with_claimed(handle, |d| {
            d.point_cloud.store(false, Ordering::SeqCst);
            Ok(d.pipeline.take())
        })?;
        if let Some(p) = pipeline {
            p.shutdown();
        }
        Ok(())
    }

    fn release(&self, handle: ClaimHandle) {
        let pipeline = {
            let mut devices = self.devices.lock();
            match devices.iter_mut().find(|d| id_of(d) == handle.device_id) {
                Some(d) if d.claim == Some(handle.token) => {
                    d.claim = None;
                    d.configured = None;
                    d.point_cloud.store(false, Ordering::SeqCst);
                    d.pipeline.take()
                }
                Some(_) => {
                    warn!("Ignoring release of stale claim on {}", handle.device_id);
                    None
                }
                // unplugged while claimed
                None => None,
            }
        };
        if let Some(p) = pipeline {
            p.shutdown();
        }
    }

    fn read_option(
        &self,
        device_id: &str,
        sensor_id: &str,
        option_id: &str,
    ) -> Result<OptionValue> {
        self.with_device(device_id, |d| {
            d.options
                .get(&(sensor_id.to_string(), option_id.to_string()))
                .cloned()
                .ok_or_else(|| {
                    AppError::NotFound(format!("option {} on sensor {}", option_id, sensor_id))
                })
        })
    }

    fn write_option(
        &self,
        device_id: &str,
        sensor_id: &str,
        option_id: &str,
        value: &OptionValue,
    ) -> Result<()> {
        self.with_device(device_id, |d| {
            match d
                .options
                .get_mut(&(sensor_id.to_string(), option_id.to_string()))
            {
                Some(slot) => {
                    *slot = value.clone();
                    Ok(())
                }
                None => Err(AppError::NotFound(format!(
                    "option {} on sensor {}",
                    option_id, sensor_id
                ))),
            }
        })
    }

    fn set_point_cloud(&self, handle: &ClaimHandle, enabled: bool) -> Result<()> {
        self.with_claimed(handle, |d| {
            if d.pipeline.is_none() {
                return Err(AppError::Hardware(format!(
                    "device {} is not streaming",
                    handle.device_id
                )));
            }
            d.point_cloud.store(enabled, Ordering::SeqCst);
            Ok(())
        })
    }

    fn hotplug(&self) -> Option<broadcast::Receiver<HotplugEvent>> {
        Some(self.hotplug_tx.subscribe())
    }
}

/// Frame producer for one stream
struct Producer {
    config: StreamConfig,
    tx: mpsc::Sender<Frame>,
    stop: Arc<AtomicBool>,
    point_cloud: Arc<AtomicBool>,
}

impl Producer {
    fn run(self) {
        let interval = Duration::from_millis(1000 / self.config.framerate.max(1) as u64);
        let pattern = test_pattern(&self.config);
        let mut sequence = 0u64;

        while !self.stop.load(Ordering::SeqCst) {
            std::thread::sleep(interval);
            if self.stop.load(Ordering::SeqCst) {
                break;
            }

            let frame = Frame::new(
                pattern.clone(),
                self.config.stream_type,
                self.config.format,
                self.config.resolution,
                sequence,
            );
            if !self.push(frame) {
                break;
            }

            if self.config.stream_type == StreamType::Depth
                && self.point_cloud.load(Ordering::SeqCst)
                && !self.push(Frame::point_cloud(&point_grid(sequence), sequence))
            {
                break;
            }
            sequence += 1;
        }
        debug!(
            "Synthetic producer for {} exiting after {} frames",
            self.config.stream_type, sequence
        );
    }

    /// Returns false once the consumer is gone
    fn push(&self, frame: Frame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            // Consumer is slow; drop rather than block capture
            Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Gradient test pattern sized for the stream's format and resolution
fn test_pattern(config: &StreamConfig) -> Bytes {
    let size = config
        .format
        .frame_size(config.resolution)
        .unwrap_or(4096);
    let width = config.resolution.width.max(1) as usize;
    let data: Vec<u8> = (0..size).map(|i| ((i % width) & 0xff) as u8).collect();
    Bytes::from(data)
}

/// Small undulating surface, 32 x 24 points
fn point_grid(sequence: u64) -> Vec<[f32; 3]> {
    let phase = (sequence % 360) as f32 * std::f32::consts::PI / 180.0;
    let mut points = Vec::with_capacity(32 * 24);
    for y in 0..24 {
        for x in 0..32 {
            let fx = x as f32 / 32.0 - 0.5;
            let fy = y as f32 / 24.0 - 0.5;
            let z = 1.0 + 0.1 * (fx * 6.0 + phase).sin();
            points.push([fx, fy, z]);
        }
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;

    fn depth_request(sensor: &str) -> StreamRequest {
        StreamRequest::new(vec![StreamConfig {
            sensor_id: sensor.to_string(),
            stream_type: StreamType::Depth,
            format: StreamFormat::Z16,
            resolution: Resolution::VGA,
            framerate: 60,
            enable: true,
        }])
    }

    #[test]
    fn test_enumerate() {
        let backend = SyntheticBackend::new(2);
        let devices = backend.enumerate().unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].info.device_id, "synthetic-0");
        assert_eq!(devices[0].sensors.len(), 2);
    }

    #[test]
    fn test_claim_is_exclusive() {
        let backend = SyntheticBackend::new(1);
        let handle = backend.claim("synthetic-0").unwrap();
        assert!(matches!(
            backend.claim("synthetic-0"),
            Err(AppError::DeviceBusy(_))
        ));
        backend.release(handle);
        assert!(backend.claim("synthetic-0").is_ok());
    }

    #[test]
    fn test_busy_elsewhere() {
        let backend = SyntheticBackend::new(1);
        backend.set_busy("synthetic-0", true);
        assert!(matches!(
            backend.claim("synthetic-0"),
            Err(AppError::DeviceBusy(_))
        ));
    }

    #[tokio::test]
    async fn test_start_produces_frames() {
        let backend = SyntheticBackend::with_devices(vec![
            SyntheticDeviceSpec::new("D1").with_sensor_ids("S1", "S2"),
        ]);
        let handle = backend.claim("D1").unwrap();
        backend.configure(&handle, &depth_request("S1")).unwrap();
        let mut stream = backend.start(&handle).unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame.stream_type, StreamType::Depth);
        assert_eq!(frame.len(), 640 * 480 * 2);

        backend.release(handle);
        // producers exit and the stream ends
        let end = tokio::time::timeout(Duration::from_secs(2), async {
            while stream.next().await.is_some() {}
        })
        .await;
        assert!(end.is_ok());
    }

    #[test]
    fn test_fail_next_start() {
        let backend = SyntheticBackend::new(1);
        backend.fail_next_start("synthetic-0", "usb reset");
        let handle = backend.claim("synthetic-0").unwrap();
        backend
            .configure(&handle, &depth_request("synthetic-0-stereo"))
            .unwrap();
        assert!(matches!(
            backend.start(&handle),
            Err(AppError::CaptureStartFailed { .. })
        ));
        assert!(!backend.is_running("synthetic-0"));
    }

    #[test]
    fn test_configure_rejects_unknown_profile() {
        let backend = SyntheticBackend::new(1);
        let handle = backend.claim("synthetic-0").unwrap();
        let mut req = depth_request("synthetic-0-stereo");
        req.configs[0].framerate = 90;
        assert!(matches!(
            backend.configure(&handle, &req),
            Err(AppError::Unsupported(_))
        ));
    }

    #[test]
    fn test_unplug_emits_hotplug() {
        let backend = SyntheticBackend::new(1);
        let mut rx = backend.hotplug().unwrap();
        backend.unplug("synthetic-0");
        assert_eq!(
            rx.try_recv().unwrap(),
            HotplugEvent::Removed("synthetic-0".to_string())
        );
        assert!(backend.enumerate().unwrap().is_empty());
    }
}
