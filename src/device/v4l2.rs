//! V4L2 backend for RealSense UVC nodes
//!
//! A RealSense camera shows up as several `/dev/video*` nodes sharing one
//! USB bus path. Nodes are grouped into devices by bus info and each capture
//! node becomes a sensor: Z16 nodes are depth, grey-only nodes are infrared,
//! everything else is color. V4L2 controls are exposed as options.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use v4l::buffer::Type as BufferType;
use v4l::capability::Flags;
use v4l::control::{self, Control};
use v4l::io::mmap::Stream as MmapStream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Format, FourCC};

use super::backend::{ClaimHandle, DeviceDescriptor, FrameStream, HardwareBackend};
use super::format::{Resolution, StreamFormat, StreamType};
use super::types::{
    DeviceInfo, OptionInfo, OptionKind, OptionValue, SensorInfo, StreamConfig, StreamProfile,
    StreamRequest,
};
use crate::capture::Frame;
use crate::error::{AppError, Result};

const CAPTURE_BUFFERS: u32 = 4;
const START_TIMEOUT: Duration = Duration::from_secs(5);

/// How a control's value is carried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlKind {
    Integer,
    Boolean,
    String,
}

/// V4L2 control backing an option
#[derive(Debug, Clone, Copy)]
struct ControlRef {
    id: u32,
    kind: ControlKind,
}

/// One capture node of a physical camera
struct Node {
    path: PathBuf,
    /// option id -> control
    controls: HashMap<String, ControlRef>,
}

/// Per-device backend state
struct V4l2Device {
    nodes: HashMap<String, Node>,
    claim: Option<u64>,
    /// Opened and formatted nodes waiting for `start`
    configured: Vec<(StreamConfig, Device)>,
    pipeline: Option<Pipeline>,
}

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

/// Backend driving RealSense cameras through their UVC video nodes
pub struct V4l2Backend {
    dev_root: PathBuf,
    devices: Mutex<HashMap<String, V4l2Device>>,
    next_token: AtomicU64,
}

impl V4l2Backend {
    pub fn new() -> Self {
        Self::with_root("/dev")
    }

    /// Scan a different directory for `video*` nodes
    pub fn with_root(dev_root: impl Into<PathBuf>) -> Self {
        Self {
            dev_root: dev_root.into(),
            devices: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
        }
    }

    fn node_path(&self, device_id: &str, sensor_id: &str) -> Result<PathBuf> {
        let devices = self.devices.lock();
        let device = devices
            .get(device_id)
            .ok_or_else(|| AppError::NotFound(format!("device {}", device_id)))?;
        device
            .nodes
            .get(sensor_id)
            .map(|n| n.path.clone())
            .ok_or_else(|| AppError::NotFound(format!("sensor {}", sensor_id)))
    }

    fn control(&self, device_id: &str, sensor_id: &str, option_id: &str) -> Result<ControlRef> {
        let devices = self.devices.lock();
        devices
            .get(device_id)
            .and_then(|d| d.nodes.get(sensor_id))
            .and_then(|n| n.controls.get(option_id))
            .copied()
            .ok_or_else(|| {
                AppError::NotFound(format!("option {} on sensor {}", option_id, sensor_id))
            })
    }

    fn with_claimed<R>(
        &self,
        handle: &ClaimHandle,
        f: impl FnOnce(&mut V4l2Device) -> Result<R>,
    ) -> Result<R> {
        let mut devices = self.devices.lock();
        let device = devices
            .get_mut(&handle.device_id)
            .ok_or_else(|| AppError::NotFound(format!("device {}", handle.device_id)))?;
        if device.claim != Some(handle.token) {
            return Err(AppError::Hardware(format!(
                "stale claim on device {}",
                handle.device_id
            )));
        }
        f(device)
    }
}

impl Default for V4l2Backend {
    fn default() -> Self {
        Self::new()
    }
}

/// A probed capture node before grouping
struct ProbedNode {
    sensor_id: String,
    path: PathBuf,
    card: String,
    bus: String,
    sensor: SensorInfo,
    controls: HashMap<String, ControlRef>,
}

impl HardwareBackend for V4l2Backend {
    fn name(&self) -> &'static str {
        "v4l2"
    }

    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>> {
        info!("Enumerating V4L2 nodes under {:?}", self.dev_root);

        let mut paths: Vec<PathBuf> = std::fs::read_dir(&self.dev_root)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("video"))
            })
            .collect();
        paths.sort();

        // bus info -> nodes, ordered by bus for stable discovery order
        let mut groups: BTreeMap<String, Vec<ProbedNode>> = BTreeMap::new();
        for path in paths {
            match probe_node(&path) {
                Ok(Some(node)) => groups.entry(node.bus.clone()).or_default().push(node),
                Ok(None) => debug!("Skipping non-capture node {:?}", path),
                Err(e) => debug!("Failed to probe {:?}: {}", path, e),
            }
        }

        let mut found = Vec::new();
        let mut state = self.devices.lock();
        let mut next_state = HashMap::new();
        for (bus, nodes) in groups {
            let Some(first) = nodes.first() else {
                continue;
            };
            let usb = UsbAttributes::read(&first.path);
            let device_id = usb
                .serial
                .clone()
                .unwrap_or_else(|| sanitize_id(&bus));

            let info = DeviceInfo {
                device_id: device_id.clone(),
                name: first.card.clone(),
                serial_number: usb.serial.clone().unwrap_or_default(),
                firmware_version: usb.firmware.clone().unwrap_or_default(),
                physical_port: bus.clone(),
                usb_type: usb.usb_type.clone().unwrap_or_default(),
                product_id: usb.product_id.clone().unwrap_or_default(),
                sensors: nodes.iter().map(|n| n.sensor_id.clone()).collect(),
                is_streaming: false,
            };
            info!(
                "Found camera {} ({}) with {} capture nodes",
                info.name,
                device_id,
                nodes.len()
            );

            // Keep claims and pipelines of devices that are still present
            let previous = state.remove(&device_id);
            let mut sensors = Vec::with_capacity(nodes.len());
            let mut node_map = HashMap::new();
            for n in nodes {
                sensors.push(n.sensor);
                node_map.insert(
                    n.sensor_id,
                    Node {
                        path: n.path,
                        controls: n.controls,
                    },
                );
            }
            let device = match previous {
                Some(mut prev) => {
                    prev.nodes = node_map;
                    prev
                }
                None => V4l2Device {
                    nodes: node_map,
                    claim: None,
                    configured: Vec::new(),
                    pipeline: None,
                },
            };
            next_state.insert(device_id, device);
            found.push(DeviceDescriptor { info, sensors });
        }
        for (device_id, mut gone) in std::mem::replace(&mut *state, next_state) {
            if let Some(p) = gone.pipeline.take() {
                warn!("Device {} vanished while streaming", device_id);
                p.shutdown();
            }
        }

        Ok(found)
    }

    fn claim(&self, device_id: &str) -> Result<ClaimHandle> {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        let mut devices = self.devices.lock();
        let device = devices
            .get_mut(device_id)
            .ok_or_else(|| AppError::NotFound(format!("device {}", device_id)))?;
        if device.claim.is_some() {
            return Err(AppError::DeviceBusy(device_id.to_string()));
        }
        device.claim = Some(token);
        Ok(ClaimHandle {
            device_id: device_id.to_string(),
            token,
        })
    }

    fn configure(&self, handle: &ClaimHandle, request: &StreamRequest) -> Result<()> {
        let mut opened = Vec::new();
        for cfg in request.enabled() {
            let path = self.node_path(&handle.device_id, &cfg.sensor_id)?;
            let fourcc = cfg.format.to_fourcc().ok_or_else(|| {
                AppError::Unsupported(format!("{} has no V4L2 equivalent", cfg.format))
            })?;
            let dev = Device::with_path(&path).map_err(|e| {
                AppError::DeviceBusy(format!("{} ({:?}): {}", handle.device_id, path, e))
            })?;
            let wanted = Format::new(cfg.resolution.width, cfg.resolution.height, fourcc);
            let actual = dev
                .set_format(&wanted)
                .map_err(|e| AppError::Unsupported(format!("set_format on {:?}: {}", path, e)))?;
            if actual.width != wanted.width
                || actual.height != wanted.height
                || actual.fourcc != wanted.fourcc
            {
                return Err(AppError::Unsupported(format!(
                    "{:?} negotiated {}x{} {} instead of {} {}",
                    path, actual.width, actual.height, actual.fourcc, cfg.resolution, cfg.format
                )));
            }
            if let Err(e) = dev.set_params(&Parameters::with_fps(cfg.framerate)) {
                warn!("Failed to set {} fps on {:?}: {}", cfg.framerate, path, e);
            }
            opened.push((cfg.clone(), dev));
        }

        self.with_claimed(handle, |d| {
            d.configured = opened;
            Ok(())
        })
    }

    fn start(&self, handle: &ClaimHandle) -> Result<FrameStream> {
        let configured = self.with_claimed(handle, |d| {
            if d.configured.is_empty() {
                return Err(AppError::Hardware(format!(
                    "device {} is not configured",
                    handle.device_id
                )));
            }
            Ok(std::mem::take(&mut d.configured))
        })?;

        let (tx, stream) = FrameStream::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let (init_tx, init_rx) = std::sync::mpsc::channel();
        let mut threads = Vec::new();
        let count = configured.len();

        for (cfg, dev) in configured {
            let reader = NodeReader {
                config: cfg,
                tx: tx.clone(),
                stop: stop.clone(),
            };
            let init_tx = init_tx.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("v4l2-{}", reader.config.sensor_id))
                .spawn(move || reader.run(dev, init_tx));
            match spawned {
                Ok(t) => threads.push(t),
                Err(e) => {
                    Pipeline { stop, threads }.shutdown();
                    return Err(AppError::CaptureStartFailed {
                        device: handle.device_id.clone(),
                        reason: format!("failed to spawn reader: {}", e),
                    });
                }
            }
        }
        drop(init_tx);

        let pipeline = Pipeline { stop, threads };
        for _ in 0..count {
            let outcome = init_rx
                .recv_timeout(START_TIMEOUT)
                .unwrap_or_else(|e| Err(format!("reader did not report: {}", e)));
            if let Err(reason) = outcome {
                pipeline.shutdown();
                return Err(AppError::CaptureStartFailed {
                    device: handle.device_id.clone(),
                    reason,
                });
            }
        }

        self.with_claimed(handle, |d| {
            d.pipeline = Some(pipeline);
            Ok(())
        })?;
        Ok(stream)
    }

    fn stop(&self, handle: &ClaimHandle) -> Result<()> {
        let pipeline = self.with_claimed(handle, |d| Ok(d.pipeline.take()))?;
        if let Some(p) = pipeline {
            p.shutdown();
        }
        Ok(())
    }

    fn release(&self, handle: ClaimHandle) {
        let pipeline = {
            let mut devices = self.devices.lock();
            match devices.get_mut(&handle.device_id) {
                Some(d) if d.claim == Some(handle.token) => {
                    d.claim = None;
                    d.configured.clear();
                    d.pipeline.take()
                }
                Some(_) => {
                    warn!("Ignoring release of stale claim on {}", handle.device_id);
                    None
                }
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
        let desc = self.control(device_id, sensor_id, option_id)?;
        let path = self.node_path(device_id, sensor_id)?;
        let dev = Device::with_path(&path)?;
        let ctrl = dev
            .control(desc.id)
            .map_err(|e| AppError::Hardware(format!("read {} on {:?}: {}", option_id, path, e)))?;
        match ctrl.value {
            control::Value::Integer(v) => Ok(OptionValue::Numeric(v as f64)),
            control::Value::Boolean(b) => Ok(OptionValue::Boolean(b)),
            control::Value::String(s) => Ok(OptionValue::Text(s)),
            other => Err(AppError::Unsupported(format!(
                "control {} has value {:?}",
                option_id, other
            ))),
        }
    }

    fn write_option(
        &self,
        device_id: &str,
        sensor_id: &str,
        option_id: &str,
        value: &OptionValue,
    ) -> Result<()> {
        let desc = self.control(device_id, sensor_id, option_id)?;
        let path = self.node_path(device_id, sensor_id)?;
        let value = match (desc.kind, value) {
            (ControlKind::Boolean, v) => control::Value::Boolean(v.as_f64() == Some(1.0)),
            (ControlKind::String, OptionValue::Text(s)) => control::Value::String(s.clone()),
            (_, v) => control::Value::Integer(v.as_f64().unwrap_or_default().round() as i64),
        };
        let dev = Device::with_path(&path)?;
        dev.set_control(Control { id: desc.id, value })
            .map_err(|e| AppError::Hardware(format!("write {} on {:?}: {}", option_id, path, e)))
    }

    fn set_point_cloud(&self, _handle: &ClaimHandle, _enabled: bool) -> Result<()> {
        Err(AppError::Unsupported(
            "point cloud output needs the camera SDK; the V4L2 backend streams raw nodes only"
                .to_string(),
        ))
    }
}

/// Open a node and describe it as a sensor; `None` for non-capture nodes
fn probe_node(path: &Path) -> Result<Option<ProbedNode>> {
    let dev = Device::with_path(path)?;
    let caps = dev
        .query_caps()
        .map_err(|e| AppError::Hardware(format!("query caps on {:?}: {}", path, e)))?;
    if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
        return Ok(None);
    }

    let mut formats = Vec::new();
    for desc in dev
        .enum_formats()
        .map_err(|e| AppError::Hardware(format!("enum formats on {:?}: {}", path, e)))?
    {
        match StreamFormat::from_fourcc(desc.fourcc) {
            Some(f) => formats.push((f, desc.fourcc)),
            None => debug!("Skipping format {} on {:?}", desc.fourcc, path),
        }
    }
    // metadata nodes advertise nothing we can stream
    if formats.is_empty() {
        return Ok(None);
    }

    let sensor_type = if formats.iter().any(|(f, _)| *f == StreamFormat::Z16) {
        StreamType::Depth
    } else if formats
        .iter()
        .all(|(f, _)| matches!(f, StreamFormat::Y8 | StreamFormat::Y16))
    {
        StreamType::Infrared
    } else {
        StreamType::Color
    };

    let mut profiles: BTreeMap<StreamType, StreamProfile> = BTreeMap::new();
    for (format, fourcc) in &formats {
        let stream_type = match (sensor_type, format.natural_stream_type()) {
            (StreamType::Depth, StreamType::Depth) => StreamType::Depth,
            (StreamType::Depth, _) => StreamType::Infrared,
            (t, _) => t,
        };
        let profile = profiles.entry(stream_type).or_insert_with(|| StreamProfile {
            stream_type,
            resolutions: Vec::new(),
            fps: Vec::new(),
            formats: Vec::new(),
        });
        profile.formats.push(*format);
        for (resolution, fps) in enumerate_sizes(&dev, *fourcc) {
            if !profile.resolutions.contains(&resolution) {
                profile.resolutions.push(resolution);
            }
            for f in fps {
                if !profile.fps.contains(&f) {
                    profile.fps.push(f);
                }
            }
        }
    }
    for p in profiles.values_mut() {
        p.resolutions.sort();
        p.fps.sort_unstable();
    }

    let (options, controls) = read_controls(&dev);
    let sensor_id = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("video")
        .to_string();
    let name = match sensor_type {
        StreamType::Depth => "Stereo Module".to_string(),
        StreamType::Infrared => "Infrared Camera".to_string(),
        _ => "RGB Camera".to_string(),
    };

    Ok(Some(ProbedNode {
        sensor: SensorInfo {
            sensor_id: sensor_id.clone(),
            name,
            sensor_type,
            supported_stream_profiles: profiles.into_values().collect(),
            options,
        },
        sensor_id,
        path: path.to_path_buf(),
        card: caps.card,
        bus: caps.bus,
        controls,
    }))
}

/// Discrete frame sizes and their framerates for a format
fn enumerate_sizes(dev: &Device, fourcc: FourCC) -> Vec<(Resolution, Vec<u32>)> {
    let sizes = match dev.enum_framesizes(fourcc) {
        Ok(sizes) => sizes,
        Err(e) => {
            debug!("Failed to enumerate frame sizes for {}: {}", fourcc, e);
            return Vec::new();
        }
    };

    let mut out = Vec::new();
    for size in sizes {
        let v4l::framesize::FrameSizeEnum::Discrete(d) = size.size else {
            // RealSense nodes only advertise discrete sizes
            continue;
        };
        let mut fps = Vec::new();
        if let Ok(intervals) = dev.enum_frameintervals(fourcc, d.width, d.height) {
            for interval in intervals {
                if let v4l::frameinterval::FrameIntervalEnum::Discrete(fraction) =
                    interval.interval
                {
                    if fraction.numerator > 0 {
                        fps.push(fraction.denominator / fraction.numerator);
                    }
                }
            }
        }
        out.push((Resolution::new(d.width, d.height), fps));
    }
    out
}

/// Map V4L2 controls to options, keyed by snake_case control name
fn read_controls(dev: &Device) -> (Vec<OptionInfo>, HashMap<String, ControlRef>) {
    let descriptions = match dev.query_controls() {
        Ok(d) => d,
        Err(e) => {
            debug!("Failed to query controls: {}", e);
            return (Vec::new(), HashMap::new());
        }
    };

    let mut options = Vec::new();
    let mut controls = HashMap::new();
    for desc in descriptions {
        let (kind, control_kind) = match desc.typ {
            control::Type::Integer | control::Type::Integer64 | control::Type::Menu => (
                OptionKind::Numeric {
                    min: Some(desc.minimum as f64),
                    max: Some(desc.maximum as f64),
                    step: (desc.step > 0).then_some(desc.step as f64),
                },
                ControlKind::Integer,
            ),
            control::Type::Boolean => (OptionKind::Boolean, ControlKind::Boolean),
            control::Type::String => (OptionKind::String, ControlKind::String),
            // classes, buttons and compound controls are not options
            _ => continue,
        };
        if desc.flags.contains(control::Flags::DISABLED) {
            continue;
        }

        let default_value = match kind {
            OptionKind::Boolean => OptionValue::Boolean(desc.default != 0),
            OptionKind::String => OptionValue::Text(String::new()),
            OptionKind::Numeric { .. } => OptionValue::Numeric(desc.default as f64),
        };
        let current_value = match dev.control(desc.id).map(|c| c.value) {
            Ok(control::Value::Integer(v)) => OptionValue::Numeric(v as f64),
            Ok(control::Value::Boolean(b)) => OptionValue::Boolean(b),
            Ok(control::Value::String(s)) => OptionValue::Text(s),
            _ => default_value.clone(),
        };
        let current_value = match (&kind, current_value) {
            (OptionKind::Boolean, OptionValue::Numeric(v)) => OptionValue::Boolean(v != 0.0),
            (_, v) => v,
        };

        let option_id = option_id_from_name(&desc.name);
        options.push(OptionInfo {
            option_id: option_id.clone(),
            name: desc.name.clone(),
            description: format!("V4L2 control 0x{:08x}", desc.id),
            current_value,
            default_value,
            kind,
            units: None,
            read_only: desc.flags.contains(control::Flags::READ_ONLY),
        });
        controls.insert(
            option_id,
            ControlRef {
                id: desc.id,
                kind: control_kind,
            },
        );
    }
    (options, controls)
}

/// "Exposure, Auto Priority" -> "exposure_auto_priority"
fn option_id_from_name(name: &str) -> String {
    let mut id = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            id.push(c.to_ascii_lowercase());
        } else if !id.ends_with('_') && !id.is_empty() {
            id.push('_');
        }
    }
    id.trim_end_matches('_').to_string()
}

fn sanitize_id(bus: &str) -> String {
    bus.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

/// USB descriptor attributes read from sysfs, best effort
#[derive(Debug, Default)]
struct UsbAttributes {
    serial: Option<String>,
    product_id: Option<String>,
    firmware: Option<String>,
    usb_type: Option<String>,
}

impl UsbAttributes {
    fn read(node: &Path) -> Self {
        let Some(name) = node.file_name().and_then(|n| n.to_str()) else {
            return Self::default();
        };
        // .../videoN/device is the UVC interface; its parent is the USB device
        let usb_dir = Path::new("/sys/class/video4linux")
            .join(name)
            .join("device")
            .join("..");
        let read = |attr: &str| {
            std::fs::read_to_string(usb_dir.join(attr))
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        Self {
            serial: read("serial"),
            product_id: read("idProduct").map(|s| s.to_uppercase()),
            firmware: read("bcdDevice"),
            usb_type: read("speed").map(|speed| usb_type_from_speed(&speed)),
        }
    }
}

/// sysfs `speed` (Mbit/s) to the USB generation RealSense tools report
fn usb_type_from_speed(speed: &str) -> String {
    match speed.trim().parse::<u32>() {
        Ok(s) if s >= 10000 => "3.2".to_string(),
        Ok(s) if s >= 5000 => "3.0".to_string(),
        Ok(s) if s >= 480 => "2.0".to_string(),
        Ok(_) => "1.1".to_string(),
        Err(_) => speed.to_string(),
    }
}

/// Reader thread for one video node
struct NodeReader {
    config: StreamConfig,
    tx: mpsc::Sender<Frame>,
    stop: Arc<AtomicBool>,
}

impl NodeReader {
    fn run(self, dev: Device, init: std::sync::mpsc::Sender<std::result::Result<(), String>>) {
        let mut stream = match MmapStream::with_buffers(&dev, BufferType::VideoCapture, CAPTURE_BUFFERS)
        {
            Ok(s) => {
                let _ = init.send(Ok(()));
                s
            }
            Err(e) => {
                let _ = init.send(Err(format!(
                    "failed to start {} stream on {}: {}",
                    self.config.stream_type, self.config.sensor_id, e
                )));
                return;
            }
        };
        drop(init);

        let mut sequence = 0u64;
        while !self.stop.load(Ordering::SeqCst) {
            let (buf, meta) = match CaptureStream::next(&mut stream) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(
                        "Capture on {} ended: {}",
                        self.config.sensor_id, e
                    );
                    break;
                }
            };
            let len = (meta.bytesused as usize).min(buf.len());
            let frame = Frame::new(
                Bytes::copy_from_slice(&buf[..len]),
                self.config.stream_type,
                self.config.format,
                self.config.resolution,
                sequence,
            );
            sequence += 1;
            match self.tx.try_send(frame) {
                Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => {}
                Err(mpsc::error::TrySendError::Closed(_)) => break,
            }
        }
        debug!(
            "Reader for {} exiting after {} frames",
            self.config.sensor_id, sequence
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_id_from_name() {
        assert_eq!(option_id_from_name("Exposure, Auto Priority"), "exposure_auto_priority");
        assert_eq!(option_id_from_name("Brightness"), "brightness");
        assert_eq!(option_id_from_name("  Gain (dB) "), "gain_db");
    }

    #[test]
    fn test_usb_type_from_speed() {
        assert_eq!(usb_type_from_speed("5000"), "3.0");
        assert_eq!(usb_type_from_speed("480\n"), "2.0");
        assert_eq!(usb_type_from_speed("weird"), "weird");
    }

    #[test]
    fn test_enumerate_empty_root() {
        let dir = tempfile::tempdir().unwrap();
        let backend = V4l2Backend::with_root(dir.path());
        assert!(backend.enumerate().unwrap().is_empty());
        assert!(matches!(backend.claim("x"), Err(AppError::NotFound(_))));
    }
}
