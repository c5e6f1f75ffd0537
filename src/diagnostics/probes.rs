use crate::config::DiagnosticsConfig;
use crate::diagnostics::tools::{SystemTools, ToolRunner};
use crate::diagnostics::{HardwareProbe, ProbeError, ProbeReport, TestName};
use serde_json::json;
use std::fs;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Normalized peak below which a capture counts as silence.
pub const SILENCE_THRESHOLD: f64 = 0.001;
const TONE_HZ: f64 = 440.0;
const TONE_SECS: f64 = 0.5;
const TONE_RATE: u32 = 22_050;
const CAPTURE_RATE: u32 = 16_000;
const EV_KEY: u32 = 1;
const EV_REP: u32 = 20;

/// Filesystem roots, devices and the tool runner the Linux probes use. Tests
/// point these at a temporary tree and canned tools.
#[derive(Clone)]
pub struct ProbeEnv {
    pub sys_root: PathBuf,
    pub proc_root: PathBuf,
    pub dev_root: PathBuf,
    pub camera_device: PathBuf,
    pub microphone_seconds: u32,
    pub tools: Arc<dyn ToolRunner>,
}

impl Default for ProbeEnv {
    fn default() -> Self {
        Self::from_config(&DiagnosticsConfig::default())
    }
}

impl ProbeEnv {
    pub fn from_config(cfg: &DiagnosticsConfig) -> Self {
        Self {
            sys_root: PathBuf::from("/sys"),
            proc_root: PathBuf::from("/proc"),
            dev_root: PathBuf::from("/dev"),
            camera_device: cfg.camera_device.clone(),
            microphone_seconds: cfg.microphone_seconds,
            tools: Arc::new(SystemTools),
        }
    }
}

/// One probe per test for the current platform.
pub fn platform_probes(env: &ProbeEnv) -> Vec<Arc<dyn HardwareProbe>> {
    if !cfg!(target_os = "linux") {
        return TestName::ALL
            .iter()
            .map(|&test| Arc::new(UnsupportedProbe { test }) as Arc<dyn HardwareProbe>)
            .collect();
    }
    vec![
        Arc::new(BluetoothProbe {
            sys_root: env.sys_root.clone(),
            tools: env.tools.clone(),
        }),
        Arc::new(WifiProbe {
            sys_root: env.sys_root.clone(),
            tools: env.tools.clone(),
        }),
        Arc::new(CameraProbe {
            device: env.camera_device.clone(),
            tools: env.tools.clone(),
        }),
        Arc::new(MicrophoneProbe {
            dev_root: env.dev_root.clone(),
            seconds: env.microphone_seconds,
            tools: env.tools.clone(),
        }),
        Arc::new(SpeakerProbe {
            dev_root: env.dev_root.clone(),
            tools: env.tools.clone(),
        }),
        Arc::new(InputProbe {
            test: TestName::Keyboard,
            proc_root: env.proc_root.clone(),
        }),
        Arc::new(InputProbe {
            test: TestName::Mouse,
            proc_root: env.proc_root.clone(),
        }),
    ]
}

pub struct UnsupportedProbe {
    pub test: TestName,
}

impl HardwareProbe for UnsupportedProbe {
    fn test(&self) -> TestName {
        self.test
    }

    fn probe(&self, _budget: Duration) -> Result<ProbeReport, ProbeError> {
        Err(ProbeError::Unsupported(
            "not supported on this platform".to_string(),
        ))
    }
}

pub struct BluetoothProbe {
    pub sys_root: PathBuf,
    pub tools: Arc<dyn ToolRunner>,
}

impl HardwareProbe for BluetoothProbe {
    fn test(&self) -> TestName {
        TestName::Bluetooth
    }

    fn probe(&self, budget: Duration) -> Result<ProbeReport, ProbeError> {
        let class = self.sys_root.join("class/bluetooth");
        let adapters = list_entries(&class, |name| name.starts_with("hci")).map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                ProbeError::NoDevice("bluetooth subsystem not present".to_string())
            } else {
                ProbeError::io(format!("reading {}", class.display()), err)
            }
        })?;
        if adapters.is_empty() {
            return Err(ProbeError::NoDevice(
                "no bluetooth adapter found".to_string(),
            ));
        }

        let out = self.tools.run("bluetoothctl", &["devices"], None, budget)?;
        if !out.success {
            return Err(ProbeError::command(
                "bluetoothctl devices",
                out.failure_reason(),
            ));
        }
        let devices = parse_bluetoothctl_devices(&String::from_utf8_lossy(&out.stdout));
        let details = json!({
            "adapters": adapters,
            "devices": devices
                .iter()
                .map(|(address, name)| json!({ "address": address, "name": name }))
                .collect::<Vec<_>>(),
        });
        let report = if devices.is_empty() {
            ProbeReport::fail(format!(
                "adapter {} present but no devices found",
                adapters[0]
            ))
        } else {
            ProbeReport::pass(format!("found {} bluetooth device(s)", devices.len()))
        };
        Ok(report.with_details(details))
    }
}

pub struct WifiProbe {
    pub sys_root: PathBuf,
    pub tools: Arc<dyn ToolRunner>,
}

impl HardwareProbe for WifiProbe {
    fn test(&self) -> TestName {
        TestName::Wifi
    }

    fn probe(&self, budget: Duration) -> Result<ProbeReport, ProbeError> {
        let interfaces = wireless_interfaces(&self.sys_root);
        if interfaces.is_empty() {
            return Err(ProbeError::NoDevice(
                "no wireless interface found".to_string(),
            ));
        }

        let out = self.tools.run(
            "nmcli",
            &["-t", "-f", "IN-USE,SSID,SIGNAL,SECURITY", "dev", "wifi", "list"],
            None,
            budget,
        )?;
        if !out.success {
            return Ok(ProbeReport::fail(format!(
                "wireless scan failed: {}",
                out.failure_reason()
            ))
            .with_details(json!({ "interfaces": interfaces })));
        }

        let networks = parse_nmcli_wifi(&String::from_utf8_lossy(&out.stdout));
        let connected = networks.iter().find(|n| n.in_use).map(|n| n.ssid.clone());
        let details = json!({
            "interfaces": interfaces,
            "connected": connected,
            "networks": networks
                .iter()
                .map(|n| json!({ "ssid": n.ssid, "signal": n.signal, "security": n.security }))
                .collect::<Vec<_>>(),
        });
        Ok(ProbeReport::pass(format!(
            "{} wireless network(s) visible on {}",
            networks.len(),
            interfaces.join(", ")
        ))
        .with_details(details))
    }
}

pub struct CameraProbe {
    pub device: PathBuf,
    pub tools: Arc<dyn ToolRunner>,
}

impl HardwareProbe for CameraProbe {
    fn test(&self) -> TestName {
        TestName::Camera
    }

    fn probe(&self, budget: Duration) -> Result<ProbeReport, ProbeError> {
        let device = self.device.display().to_string();
        let direct = {
            let mut file = fs::File::open(&self.device).map_err(|err| {
                if err.kind() == ErrorKind::NotFound {
                    ProbeError::NoDevice(format!("camera device {device} not found"))
                } else {
                    ProbeError::io(format!("opening {device}"), err)
                }
            })?;
            let mut buf = vec![0_u8; 64 * 1024];
            file.read(&mut buf)
        };

        match direct {
            Ok(n) if n > 0 => {
                return Ok(ProbeReport::pass(format!("read {n} bytes of frame data from {device}"))
                    .with_details(json!({ "device": device, "bytes": n, "method": "read" })));
            }
            Ok(_) => debug!(device = %device, "camera read returned no data, trying ffmpeg"),
            // Most V4L2 drivers only support streaming I/O and reject read().
            Err(err) => debug!(device = %device, error = %err, "camera read failed, trying ffmpeg"),
        }

        let frame = self.tools.run(
            "ffmpeg",
            &[
                "-hide_banner",
                "-loglevel",
                "error",
                "-f",
                "v4l2",
                "-i",
                &device,
                "-frames:v",
                "1",
                "-f",
                "rawvideo",
                "-",
            ],
            None,
            budget,
        );
        match frame {
            Ok(out) if out.success && !out.stdout.is_empty() => Ok(ProbeReport::pass(format!(
                "captured one frame ({} bytes) from {device}",
                out.stdout.len()
            ))
            .with_details(json!({ "device": device, "bytes": out.stdout.len(), "method": "ffmpeg" }))),
            Ok(out) => Ok(ProbeReport::fail(format!(
                "{device} opened but produced no frame: {}",
                out.failure_reason()
            ))),
            Err(err) => Ok(ProbeReport::fail(format!(
                "{device} opened but produced no frame: {err}"
            ))),
        }
    }
}

pub struct MicrophoneProbe {
    pub dev_root: PathBuf,
    pub seconds: u32,
    pub tools: Arc<dyn ToolRunner>,
}

impl HardwareProbe for MicrophoneProbe {
    fn test(&self) -> TestName {
        TestName::Microphone
    }

    fn probe(&self, budget: Duration) -> Result<ProbeReport, ProbeError> {
        let devices = pcm_devices(&self.dev_root, PcmDirection::Capture);
        if devices.is_empty() {
            return Err(ProbeError::NoDevice(
                "no audio capture device found".to_string(),
            ));
        }

        let seconds = self.seconds.to_string();
        let rate = CAPTURE_RATE.to_string();
        let out = self.tools.run(
            "arecord",
            &[
                "-q", "-d", &seconds, "-f", "S16_LE", "-r", &rate, "-c", "1", "-t", "raw",
            ],
            None,
            budget,
        )?;
        if !out.success {
            return Err(ProbeError::command("arecord", out.failure_reason()));
        }
        if out.stdout.len() < 2 {
            return Ok(ProbeReport::fail("capture returned no audio"));
        }

        let peak = peak_amplitude(&out.stdout);
        let details = json!({
            "devices": devices,
            "samples": out.stdout.len() / 2,
            "peak": peak,
        });
        let report = if peak > SILENCE_THRESHOLD {
            ProbeReport::pass(format!("captured audio with peak amplitude {peak:.4}"))
        } else {
            ProbeReport::fail(format!("captured audio is silent (peak {peak:.4})"))
        };
        Ok(report.with_details(details))
    }
}

pub struct SpeakerProbe {
    pub dev_root: PathBuf,
    pub tools: Arc<dyn ToolRunner>,
}

impl HardwareProbe for SpeakerProbe {
    fn test(&self) -> TestName {
        TestName::Speaker
    }

    fn probe(&self, budget: Duration) -> Result<ProbeReport, ProbeError> {
        let devices = pcm_devices(&self.dev_root, PcmDirection::Playback);
        if devices.is_empty() {
            return Err(ProbeError::NoDevice(
                "no audio playback device found".to_string(),
            ));
        }

        let tone = sine_tone(TONE_HZ, TONE_SECS, TONE_RATE);
        let rate = TONE_RATE.to_string();
        let out = self.tools.run(
            "aplay",
            &[
                "-q", "-f", "S16_LE", "-r", &rate, "-c", "1", "-t", "raw", "-",
            ],
            Some(tone.as_slice()),
            budget,
        )?;
        if !out.success {
            return Ok(ProbeReport::fail(format!(
                "tone playback failed: {}",
                out.failure_reason()
            )));
        }
        Ok(
            ProbeReport::pass(format!("played {TONE_SECS}s {TONE_HZ} Hz test tone"))
                .with_details(json!({ "devices": devices })),
        )
    }
}

/// Keyboard and mouse both come from the kernel input device registry.
pub struct InputProbe {
    pub test: TestName,
    pub proc_root: PathBuf,
}

impl HardwareProbe for InputProbe {
    fn test(&self) -> TestName {
        self.test
    }

    fn probe(&self, _budget: Duration) -> Result<ProbeReport, ProbeError> {
        let path = self.proc_root.join("bus/input/devices");
        let text = fs::read_to_string(&path)
            .map_err(|err| ProbeError::io(format!("reading {}", path.display()), err))?;
        let devices = parse_input_devices(&text);
        let (kind, matched): (&str, Vec<&InputDevice>) = match self.test {
            TestName::Mouse => ("mouse", devices.iter().filter(|d| d.is_mouse()).collect()),
            _ => (
                "keyboard",
                devices.iter().filter(|d| d.is_keyboard()).collect(),
            ),
        };
        if matched.is_empty() {
            return Ok(ProbeReport::fail(format!("no {kind} detected")));
        }
        let names: Vec<&str> = matched.iter().map(|d| d.name.as_str()).collect();
        Ok(
            ProbeReport::pass(format!("{} {kind}(s) detected", matched.len()))
                .with_details(json!({ "devices": names })),
        )
    }
}

fn list_entries(dir: &Path, keep: impl Fn(&str) -> bool) -> std::io::Result<Vec<String>> {
    let mut names: Vec<String> = fs::read_dir(dir)?
        .flatten()
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .filter(|name| keep(name))
        .collect();
    names.sort();
    Ok(names)
}

fn wireless_interfaces(sys_root: &Path) -> Vec<String> {
    let net = sys_root.join("class/net");
    list_entries(&net, |_| true)
        .unwrap_or_default()
        .into_iter()
        .filter(|iface| {
            let dir = net.join(iface);
            dir.join("wireless").exists() || dir.join("phy80211").exists()
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PcmDirection {
    Capture,
    Playback,
}

/// ALSA PCM nodes, `pcmC<card>D<device>c` for capture and `...p` for playback.
fn pcm_devices(dev_root: &Path, direction: PcmDirection) -> Vec<String> {
    let suffix = match direction {
        PcmDirection::Capture => 'c',
        PcmDirection::Playback => 'p',
    };
    list_entries(&dev_root.join("snd"), |name| {
        name.starts_with("pcmC") && name.contains('D') && name.ends_with(suffix)
    })
    .unwrap_or_default()
}

/// Lines of `bluetoothctl devices`: `Device AA:BB:CC:DD:EE:FF Some Name`.
pub fn parse_bluetoothctl_devices(output: &str) -> Vec<(String, String)> {
    output
        .lines()
        .filter_map(|line| {
            let rest = line.trim().strip_prefix("Device ")?;
            let (address, name) = rest.split_once(' ').unwrap_or((rest, ""));
            let valid = address.len() == 17 && address.split(':').count() == 6;
            valid.then(|| (address.to_string(), name.trim().to_string()))
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct WifiNetwork {
    pub in_use: bool,
    pub ssid: String,
    pub signal: Option<u8>,
    pub security: String,
}

/// `nmcli -t` output with fields `IN-USE,SSID,SIGNAL,SECURITY`. Literal colons
/// in values are escaped as `\:`. Hidden networks are dropped.
pub fn parse_nmcli_wifi(output: &str) -> Vec<WifiNetwork> {
    output
        .lines()
        .filter_map(|line| {
            let fields = split_terse(line);
            if fields.len() < 4 {
                return None;
            }
            let ssid = fields[1].clone();
            if ssid.is_empty() {
                return None;
            }
            Some(WifiNetwork {
                in_use: fields[0].trim() == "*",
                ssid,
                signal: fields[2].trim().parse().ok(),
                security: fields[3].trim().to_string(),
            })
        })
        .collect()
}

fn split_terse(line: &str) -> Vec<String> {
    let mut fields = vec![String::new()];
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    if let Some(field) = fields.last_mut() {
                        field.push(next);
                    }
                }
            }
            ':' => fields.push(String::new()),
            _ => {
                if let Some(field) = fields.last_mut() {
                    field.push(c);
                }
            }
        }
    }
    fields
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputDevice {
    pub name: String,
    pub handlers: Vec<String>,
    pub ev_bits: u64,
}

impl InputDevice {
    pub fn is_keyboard(&self) -> bool {
        let autorepeat = (1 << EV_KEY) | (1 << EV_REP);
        self.handlers.iter().any(|h| h == "kbd") && self.ev_bits & autorepeat == autorepeat
    }

    pub fn is_mouse(&self) -> bool {
        self.handlers.iter().any(|h| h.starts_with("mouse"))
    }
}

/// Blank-line separated blocks of `/proc/bus/input/devices`.
pub fn parse_input_devices(text: &str) -> Vec<InputDevice> {
    let mut devices = Vec::new();
    let mut current: Option<InputDevice> = None;
    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            devices.extend(current.take());
            continue;
        }
        let dev = current.get_or_insert_with(InputDevice::default);
        if let Some(name) = line.strip_prefix("N: Name=") {
            dev.name = name.trim_matches('"').to_string();
        } else if let Some(handlers) = line.strip_prefix("H: Handlers=") {
            dev.handlers = handlers.split_whitespace().map(str::to_string).collect();
        } else if let Some(ev) = line.strip_prefix("B: EV=") {
            dev.ev_bits = u64::from_str_radix(ev.trim(), 16).unwrap_or(0);
        }
    }
    devices.extend(current);
    devices
}

/// Largest absolute S16LE sample, normalized to `0..=1`.
pub fn peak_amplitude(pcm: &[u8]) -> f64 {
    pcm.chunks_exact(2)
        .map(|b| (i16::from_le_bytes([b[0], b[1]]) as f64).abs() / 32768.0)
        .fold(0.0, f64::max)
}

/// Mono S16LE sine wave at half scale.
pub fn sine_tone(freq_hz: f64, seconds: f64, rate: u32) -> Vec<u8> {
    let samples = (seconds * rate as f64) as usize;
    let mut out = Vec::with_capacity(samples * 2);
    for i in 0..samples {
        let t = i as f64 / rate as f64;
        let v = (2.0 * std::f64::consts::PI * freq_hz * t).sin() * 0.5 * i16::MAX as f64;
        out.extend_from_slice(&(v as i16).to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::tools::ToolOutput;

    const BUDGET: Duration = Duration::from_secs(5);

    /// Answers each program with a fixed output; anything else is missing.
    struct CannedTools {
        outputs: Vec<(&'static str, ToolOutput)>,
    }

    impl ToolRunner for CannedTools {
        fn run(
            &self,
            program: &str,
            _args: &[&str],
            _stdin: Option<&[u8]>,
            _limit: Duration,
        ) -> Result<ToolOutput, ProbeError> {
            self.outputs
                .iter()
                .find(|(name, _)| *name == program)
                .map(|(_, out)| out.clone())
                .ok_or_else(|| ProbeError::command(program, "command not found"))
        }
    }

    fn canned(program: &'static str, out: ToolOutput) -> Arc<dyn ToolRunner> {
        Arc::new(CannedTools {
            outputs: vec![(program, out)],
        })
    }

    fn no_tools() -> Arc<dyn ToolRunner> {
        Arc::new(CannedTools {
            outputs: Vec::new(),
        })
    }

    fn exited(code: i32, stdout: &[u8]) -> ToolOutput {
        ToolOutput {
            success: code == 0,
            code: Some(code),
            stdout: stdout.to_vec(),
            stderr: Vec::new(),
        }
    }

    fn pcm_tree(node: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let snd = dir.path().join("snd");
        fs::create_dir_all(&snd).unwrap();
        fs::write(snd.join(node), b"").unwrap();
        dir
    }

    const INPUT_DEVICES: &str = "\
I: Bus=0011 Vendor=0001 Product=0001 Version=ab41
N: Name=\"AT Translated Set 2 keyboard\"
P: Phys=isa0060/serio0/input0
H: Handlers=sysrq kbd event0 leds
B: PROP=0
B: EV=120013

I: Bus=0019 Vendor=0000 Product=0001 Version=0000
N: Name=\"Power Button\"
H: Handlers=kbd event1
B: PROP=0
B: EV=3

I: Bus=0003 Vendor=046d Product=c077 Version=0111
N: Name=\"Logitech USB Optical Mouse\"
H: Handlers=mouse0 event2
B: PROP=0
B: EV=17
";

    #[test]
    fn input_registry_parses_keyboards_and_mice() {
        let devices = parse_input_devices(INPUT_DEVICES);
        assert_eq!(devices.len(), 3);
        let keyboards: Vec<&str> = devices
            .iter()
            .filter(|d| d.is_keyboard())
            .map(|d| d.name.as_str())
            .collect();
        // The power button has a kbd handler but no autorepeat.
        assert_eq!(keyboards, vec!["AT Translated Set 2 keyboard"]);
        assert!(devices[2].is_mouse());
        assert!(!devices[0].is_mouse());
    }

    #[test]
    fn bluetoothctl_lines_are_parsed() {
        let out = "Device 00:1A:7D:DA:71:13 WH-1000XM4\nDevice 11:22:33:44:55:66\nAgent registered\n";
        let devices = parse_bluetoothctl_devices(out);
        assert_eq!(
            devices,
            vec![
                ("00:1A:7D:DA:71:13".to_string(), "WH-1000XM4".to_string()),
                ("11:22:33:44:55:66".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn nmcli_terse_output_handles_escapes() {
        let out = "*:Home\\:5G:78:WPA2\n :Cafe:41:\n :::\n";
        let networks = parse_nmcli_wifi(out);
        assert_eq!(networks.len(), 2);
        assert!(networks[0].in_use);
        assert_eq!(networks[0].ssid, "Home:5G");
        assert_eq!(networks[0].signal, Some(78));
        assert_eq!(networks[1].security, "");
    }

    #[test]
    fn silence_and_signal_peaks() {
        assert_eq!(peak_amplitude(&[0, 0, 0, 0]), 0.0);
        let tone = sine_tone(TONE_HZ, TONE_SECS, TONE_RATE);
        assert_eq!(tone.len(), (TONE_SECS * TONE_RATE as f64) as usize * 2);
        let peak = peak_amplitude(&tone);
        assert!(peak > 0.45 && peak <= 0.5, "peak {peak}");
    }

    #[test]
    fn keyboard_probe_reads_proc_root() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("bus/input");
        fs::create_dir_all(&input).unwrap();
        fs::write(input.join("devices"), INPUT_DEVICES).unwrap();

        let probe = InputProbe {
            test: TestName::Keyboard,
            proc_root: dir.path().to_path_buf(),
        };
        let report = probe.probe(BUDGET).unwrap();
        assert!(report.passed);
        assert_eq!(report.message, "1 keyboard(s) detected");
    }

    #[test]
    fn mouse_probe_fails_without_mouse_handler() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("bus/input");
        fs::create_dir_all(&input).unwrap();
        fs::write(input.join("devices"), "N: Name=\"kbd\"\nH: Handlers=kbd event0\n").unwrap();

        let probe = InputProbe {
            test: TestName::Mouse,
            proc_root: dir.path().to_path_buf(),
        };
        assert!(!probe.probe(BUDGET).unwrap().passed);
    }

    #[test]
    fn missing_input_registry_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let probe = InputProbe {
            test: TestName::Keyboard,
            proc_root: dir.path().to_path_buf(),
        };
        assert!(matches!(probe.probe(BUDGET), Err(ProbeError::Io { .. })));
    }

    #[test]
    fn bluetooth_without_adapter_is_no_device() {
        let dir = tempfile::tempdir().unwrap();
        let probe = BluetoothProbe {
            sys_root: dir.path().to_path_buf(),
            tools: no_tools(),
        };
        assert!(matches!(probe.probe(BUDGET), Err(ProbeError::NoDevice(_))));

        fs::create_dir_all(dir.path().join("class/bluetooth")).unwrap();
        let err = probe.probe(BUDGET).unwrap_err();
        assert_eq!(err.to_string(), "no bluetooth adapter found");
    }

    #[test]
    fn bluetooth_adapter_without_devices_fails() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("class/bluetooth/hci0")).unwrap();

        let probe = BluetoothProbe {
            sys_root: dir.path().to_path_buf(),
            tools: canned("bluetoothctl", exited(0, b"Agent registered\n")),
        };
        let report = probe.probe(BUDGET).unwrap();
        assert!(!report.passed);
        assert_eq!(report.message, "adapter hci0 present but no devices found");

        let probe = BluetoothProbe {
            sys_root: dir.path().to_path_buf(),
            tools: canned(
                "bluetoothctl",
                exited(0, b"Device 00:1A:7D:DA:71:13 WH-1000XM4\n"),
            ),
        };
        assert!(probe.probe(BUDGET).unwrap().passed);

        let probe = BluetoothProbe {
            sys_root: dir.path().to_path_buf(),
            tools: no_tools(),
        };
        assert!(matches!(probe.probe(BUDGET), Err(ProbeError::Command { .. })));
    }

    #[test]
    fn wifi_without_wireless_interface_is_no_device() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("class/net/eth0")).unwrap();
        let probe = WifiProbe {
            sys_root: dir.path().to_path_buf(),
            tools: no_tools(),
        };
        assert!(matches!(probe.probe(BUDGET), Err(ProbeError::NoDevice(_))));

        fs::create_dir_all(dir.path().join("class/net/wlan0/wireless")).unwrap();
        assert_eq!(wireless_interfaces(dir.path()), vec!["wlan0".to_string()]);
    }

    #[test]
    fn wifi_scan_failure_fails() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("class/net/wlan0/wireless")).unwrap();

        let mut out = exited(10, b"");
        out.stderr = b"Error: NetworkManager is not running.\n".to_vec();
        let probe = WifiProbe {
            sys_root: dir.path().to_path_buf(),
            tools: canned("nmcli", out),
        };
        let report = probe.probe(BUDGET).unwrap();
        assert!(!report.passed);
        assert_eq!(
            report.message,
            "wireless scan failed: Error: NetworkManager is not running."
        );

        let probe = WifiProbe {
            sys_root: dir.path().to_path_buf(),
            tools: canned("nmcli", exited(0, b"")),
        };
        let report = probe.probe(BUDGET).unwrap();
        assert!(report.passed);
        assert_eq!(report.message, "0 wireless network(s) visible on wlan0");
    }

    #[test]
    fn audio_probes_need_pcm_nodes() {
        let dir = pcm_tree("pcmC0D0p");
        fs::write(dir.path().join("snd/controlC0"), b"").unwrap();

        assert_eq!(pcm_devices(dir.path(), PcmDirection::Playback), vec!["pcmC0D0p"]);
        let mic = MicrophoneProbe {
            dev_root: dir.path().to_path_buf(),
            seconds: 1,
            tools: no_tools(),
        };
        let err = mic.probe(BUDGET).unwrap_err();
        assert_eq!(err.to_string(), "no audio capture device found");
    }

    #[test]
    fn silent_capture_fails() {
        let dir = pcm_tree("pcmC0D0c");
        let mic = |out: ToolOutput| MicrophoneProbe {
            dev_root: dir.path().to_path_buf(),
            seconds: 1,
            tools: canned("arecord", out),
        };

        let report = mic(exited(0, &[0_u8; 3200])).probe(BUDGET).unwrap();
        assert!(!report.passed);
        assert!(report.message.starts_with("captured audio is silent"));

        let tone = sine_tone(TONE_HZ, 0.1, CAPTURE_RATE);
        assert!(mic(exited(0, &tone)).probe(BUDGET).unwrap().passed);

        let err = mic(exited(1, b"")).probe(BUDGET).unwrap_err();
        assert!(matches!(err, ProbeError::Command { .. }));
    }

    #[test]
    fn speaker_playback_failure_fails() {
        let dir = pcm_tree("pcmC0D0p");
        let speaker = |tools: Arc<dyn ToolRunner>| SpeakerProbe {
            dev_root: dir.path().to_path_buf(),
            tools,
        };

        let report = speaker(canned("aplay", exited(1, b""))).probe(BUDGET).unwrap();
        assert!(!report.passed);
        assert_eq!(report.message, "tone playback failed: exited with status 1");

        assert!(speaker(canned("aplay", exited(0, b""))).probe(BUDGET).unwrap().passed);
        assert!(matches!(
            speaker(no_tools()).probe(BUDGET),
            Err(ProbeError::Command { .. })
        ));
    }

    #[test]
    fn camera_reads_frame_bytes_directly() {
        let dir = tempfile::tempdir().unwrap();
        let device = dir.path().join("video0");
        fs::write(&device, vec![7_u8; 4096]).unwrap();
        let report = CameraProbe {
            device,
            tools: no_tools(),
        }
        .probe(BUDGET)
        .unwrap();
        assert!(report.passed);
        assert!(report.message.contains("4096 bytes"));
    }

    #[test]
    fn camera_without_frame_fails() {
        let dir = tempfile::tempdir().unwrap();
        let device = dir.path().join("video0");
        fs::write(&device, b"").unwrap();

        let report = CameraProbe {
            device: device.clone(),
            tools: canned("ffmpeg", exited(1, b"")),
        }
        .probe(BUDGET)
        .unwrap();
        assert!(!report.passed);
        assert!(report.message.contains("produced no frame"));

        let report = CameraProbe {
            device,
            tools: canned("ffmpeg", exited(0, &[1_u8; 512])),
        }
        .probe(BUDGET)
        .unwrap();
        assert!(report.passed);
        assert!(report.message.contains("512 bytes"));
    }

    #[test]
    fn missing_camera_is_no_device() {
        let dir = tempfile::tempdir().unwrap();
        let probe = CameraProbe {
            device: dir.path().join("video9"),
            tools: no_tools(),
        };
        assert!(matches!(probe.probe(BUDGET), Err(ProbeError::NoDevice(_))));
    }

    #[test]
    fn platform_probes_cover_every_test() {
        let mut tests: Vec<TestName> = platform_probes(&ProbeEnv::default())
            .iter()
            .map(|p| p.test())
            .collect();
        tests.sort();
        assert_eq!(tests, TestName::ALL.to_vec());
    }
}
