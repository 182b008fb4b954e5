//! Per-device pin and DMA table emission
//!
//! For every requested device three artifacts are written:
//! - `<pins_root>/<dir>/gpio_pins.in`: `GPIO_PIN`/`GPIO_AF` declarations
//! - `<targets_root>/<dir>/gpio.yaml`: pin name to classified signals
//! - `<targets_root>/<dir>/dma.yaml`: classified signals with their DMA location
//!
//! `<dir>` is the first nine characters of the requested part number.

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::cache::{CacheError, DescriptorCache};
use crate::descriptor::{DescriptorSource, Device};
use crate::signal::{classify, SignalMapping, SignalTag};

/// Length of the per-device output directory name, e.g. `stm32f405`
const TARGET_DIR_LEN: usize = 9;

#[derive(Error, Debug)]
pub enum EmitError {
    #[error("Failed to write {}: {source}", .path.display())]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to serialize YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Where generated artifacts are written
#[derive(Debug, Clone)]
pub struct OutputLayout {
    /// Root of the firmware source tree receiving `gpio_pins.in`
    pub pins_root: PathBuf,
    /// Root of the target description tree receiving the YAML tables
    pub targets_root: PathBuf,
}

impl OutputLayout {
    pub fn gpio_pins_path(&self, dir: &str) -> PathBuf {
        self.pins_root.join(dir).join("gpio_pins.in")
    }

    pub fn gpio_yaml_path(&self, dir: &str) -> PathBuf {
        self.targets_root.join(dir).join("gpio.yaml")
    }

    pub fn dma_yaml_path(&self, dir: &str) -> PathBuf {
        self.targets_root.join(dir).join("dma.yaml")
    }
}

/// Output directory name for a requested part number
pub fn target_dir_name(device: &str) -> &str {
    match device.char_indices().nth(TARGET_DIR_LEN) {
        Some((end, _)) => &device[..end],
        None => device,
    }
}

/// Classified signals per pin, serialized as a map in pin order
#[derive(Debug, Clone, Default)]
pub struct PinSignals(pub Vec<(String, Vec<SignalMapping>)>);

impl Serialize for PinSignals {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (pin, signals) in &self.0 {
            map.serialize_entry(pin, signals)?;
        }
        map.end()
    }
}

/// Pin declarations of one device
#[derive(Debug, Clone, Default)]
pub struct GpioTable {
    /// `GPIO_PIN` and `GPIO_AF` lines, upper-cased
    pub lines: Vec<String>,
    /// Pins carrying at least one signal record
    pub pins: PinSignals,
}

impl GpioTable {
    /// Number of `GPIO_AF` bindings
    pub fn alternate_functions(&self) -> usize {
        self.pins.0.iter().map(|(_, signals)| signals.len()).sum()
    }
}

/// Build the pin table of a device from its gpio drivers
pub fn gpio_table(device: &Device) -> GpioTable {
    let mut table = GpioTable::default();
    for driver in device.drivers("gpio") {
        for pin in &driver.gpio {
            table
                .lines
                .push(format!("GPIO_PIN({}, {})", pin.port, pin.pin).to_uppercase());
            if pin.signal.is_empty() {
                continue;
            }

            let mut signals = Vec::new();
            for signal in &pin.signal {
                let Some(mapping) = classify(signal) else {
                    debug!(pin = %pin.name(), signal = ?signal, "Skipping unclassified signal");
                    continue;
                };
                table.lines.push(
                    format!(
                        "GPIO_AF(PIN_{}{}, {}, {})",
                        pin.port,
                        pin.pin,
                        mapping.af,
                        mapping.tag.token()
                    )
                    .to_uppercase(),
                );
                signals.push(mapping);
            }
            table.pins.0.push((pin.name(), signals));
        }
    }
    table
}

/// DMA controller and stream of a stream-based DMA
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StreamLocation {
    pub port: u32,
    pub stream: u32,
}

/// Where a signal is reachable by DMA
///
/// The stream channel sits beside the `dma` map, as the target tables expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum DmaLocation {
    Stream { dma: StreamLocation, channel: u32 },
    Request { request: u32 },
}

/// A classified signal and the DMA location serving it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DmaAssociation {
    pub tag: SignalTag,
    #[serde(flatten)]
    pub location: DmaLocation,
}

/// Collect the DMA associations of a device, in descriptor order
pub fn dma_index(device: &Device) -> Vec<DmaAssociation> {
    let mut index = Vec::new();
    for driver in device.drivers("dma") {
        for controller in &driver.streams {
            for stream in &controller.stream {
                for channel in &stream.channel {
                    let location = DmaLocation::Stream {
                        dma: StreamLocation {
                            port: controller.instance,
                            stream: stream.position,
                        },
                        channel: channel.position,
                    };
                    index.extend(channel.signal.iter().filter_map(classify).map(|m| {
                        DmaAssociation {
                            tag: m.tag,
                            location,
                        }
                    }));
                }
            }
        }
        for requests in &driver.requests {
            for request in &requests.request {
                let location = DmaLocation::Request {
                    request: request.position,
                };
                index.extend(request.signal.iter().filter_map(classify).map(|m| {
                    DmaAssociation {
                        tag: m.tag,
                        location,
                    }
                }));
            }
        }
    }
    index
}

/// What was emitted for one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmitSummary {
    pub device: String,
    pub pins: usize,
    pub alternate_functions: usize,
    pub dma: usize,
}

fn write_file(path: &Path, content: &str) -> Result<(), EmitError> {
    let io_error = |source: std::io::Error| EmitError::IoError {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_error)?;
    }
    std::fs::write(path, content).map_err(io_error)
}

/// Write the three artifacts of one device into `dir` under `layout`
pub fn emit_device(device: &Device, dir: &str, layout: &OutputLayout) -> Result<EmitSummary, EmitError> {
    let gpio = gpio_table(device);
    let dma = dma_index(device);

    let mut pins_in = gpio.lines.join("\n");
    if !pins_in.is_empty() {
        pins_in.push('\n');
    }
    write_file(&layout.gpio_pins_path(dir), &pins_in)?;
    write_file(&layout.gpio_yaml_path(dir), &serde_yaml::to_string(&gpio.pins)?)?;
    write_file(&layout.dma_yaml_path(dir), &serde_yaml::to_string(&dma)?)?;

    Ok(EmitSummary {
        device: device.partname.clone(),
        pins: gpio.lines.iter().filter(|l| l.starts_with("GPIO_PIN")).count(),
        alternate_functions: gpio.alternate_functions(),
        dma: dma.len(),
    })
}

/// Emit artifacts for every requested device
///
/// Each entry of `devices` is a part number prefix resolved through the
/// cache; a prefix matching no known device is an error.
pub fn generate<S: DescriptorSource>(
    cache: &mut DescriptorCache<S>,
    devices: &[String],
    layout: &OutputLayout,
) -> Result<Vec<EmitSummary>, EmitError> {
    let mut summaries = Vec::with_capacity(devices.len());
    for requested in devices {
        let device = cache.resolve_prefix(requested)?;
        let summary = emit_device(device, target_dir_name(requested), layout)?;
        info!(
            requested = %requested,
            device = %summary.device,
            pins = summary.pins,
            alternate_functions = summary.alternate_functions,
            dma = summary.dma,
            "Emitted device tables"
        );
        summaries.push(summary);
    }
    Ok(summaries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheOptions, MemoryCacheStore};
    use crate::descriptor::Descriptor;
    use crate::signal::TagKind;
    use crate::testing::*;
    use tempfile::TempDir;

    fn device(xml: &str, partname: &str) -> Device {
        Descriptor::from_xml(xml)
            .unwrap()
            .device
            .into_iter()
            .find(|d| d.partname == partname)
            .unwrap()
    }

    #[test]
    fn test_target_dir_name() {
        assert_eq!(target_dir_name("stm32f405vg"), "stm32f405");
        assert_eq!(target_dir_name("stm32g473ceu6"), "stm32g473");
        assert_eq!(target_dir_name("stm32"), "stm32");
    }

    #[test]
    fn test_gpio_table() {
        let table = gpio_table(&device(F4_XML, "stm32f405vgt6"));
        assert_eq!(
            table.lines,
            vec![
                "GPIO_PIN(A, 0)",
                "GPIO_AF(PIN_A0, 1, TIMER_TAG(TIMER2, TIMER_CH1))",
                "GPIO_AF(PIN_A0, 2, TIMER_TAG(TIMER5, TIMER_CH1))",
                "GPIO_AF(PIN_A0, 8, SERIAL_TAG(SERIAL_PORT4, RES_SERIAL_TX))",
                "GPIO_AF(PIN_A0, -1, ADC_TAG(ADC_DEVICE1, 0))",
                "GPIO_PIN(A, 5)",
                "GPIO_AF(PIN_A5, 5, SPI_TAG(SPI_PORT1, RES_SPI_SCK))",
                "GPIO_PIN(A, 13)",
                "GPIO_PIN(H, 1)",
            ]
        );

        // PH1 has no signal records and is left out of the map
        let pins: Vec<(&str, usize)> = table
            .pins
            .0
            .iter()
            .map(|(name, signals)| (name.as_str(), signals.len()))
            .collect();
        assert_eq!(pins, vec![("PA0", 4), ("PA5", 1), ("PA13", 0)]);
        assert_eq!(table.alternate_functions(), 5);
    }

    #[test]
    fn test_gpio_yaml_keeps_pin_order() {
        let table = gpio_table(&device(F4_XML, "stm32f405vgt6"));
        let yaml = serde_yaml::to_string(&table.pins).unwrap();
        let pa0 = yaml.find("PA0:").unwrap();
        let pa5 = yaml.find("PA5:").unwrap();
        let pa13 = yaml.find("PA13:").unwrap();
        assert!(pa0 < pa5 && pa5 < pa13);
        assert!(yaml.contains("type: timer"));
        assert!(yaml.contains("af: 8"));
        assert!(!yaml.contains("PH1"));
    }

    #[test]
    fn test_stream_dma_index() {
        let index = dma_index(&device(F4_XML, "stm32f405vgt6"));
        assert_eq!(index.len(), 2);
        assert_eq!(index[0].tag.kind, TagKind::Spi);
        assert_eq!(index[0].tag.func, "miso");
        assert_eq!(
            index[0].location,
            DmaLocation::Stream {
                dma: StreamLocation { port: 2, stream: 0 },
                channel: 3,
            }
        );
        assert_eq!(index[1].tag.kind, TagKind::Adc);

        // The channel is a sibling of the dma map, not part of it
        let yaml = serde_yaml::to_string(&index[..1]).unwrap();
        assert_eq!(
            yaml,
            "- tag:\n    type: spi\n    index: 1\n    func: miso\n  dma:\n    port: 2\n    stream: 0\n  channel: 3\n"
        );
    }

    #[test]
    fn test_request_dma_index() {
        let index = dma_index(&device(G4_XML, "stm32g473ceu6"));
        assert_eq!(index.len(), 2);
        assert_eq!(index[0].location, DmaLocation::Request { request: 5 });
        assert_eq!(index[1].tag.kind, TagKind::Serial);
        assert_eq!(index[1].location, DmaLocation::Request { request: 24 });

        let yaml = serde_yaml::to_string(&index).unwrap();
        assert!(yaml.contains("request: 24"));
        assert!(!yaml.contains("dma:"));
    }

    #[test]
    fn test_generate_writes_artifacts() {
        let temp_dir = TempDir::new().unwrap();
        let layout = OutputLayout {
            pins_root: temp_dir.path().join("src/system"),
            targets_root: temp_dir.path().join("Targets/mcu"),
        };
        let source = sample_source();
        let mut store = MemoryCacheStore::new();
        let options = CacheOptions {
            roots: vec![PathBuf::from(DEVICES_ROOT)],
            families: vec!["stm32".to_string()],
            force_rebuild: false,
        };
        let mut cache = DescriptorCache::build(&source, &mut store, &options).unwrap();

        let devices = vec!["stm32f405vg".to_string(), "stm32g473ceu6".to_string()];
        let summaries = generate(&mut cache, &devices, &layout).unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(
            summaries[0],
            EmitSummary {
                device: "stm32f405vgt6".to_string(),
                pins: 4,
                alternate_functions: 5,
                dma: 2,
            }
        );

        let pins_in = std::fs::read_to_string(layout.gpio_pins_path("stm32f405")).unwrap();
        assert!(pins_in.starts_with("GPIO_PIN(A, 0)\n"));
        assert!(pins_in.ends_with("GPIO_PIN(H, 1)\n"));
        assert!(layout.gpio_yaml_path("stm32g473").exists());
        let dma = std::fs::read_to_string(layout.dma_yaml_path("stm32g473")).unwrap();
        assert!(dma.contains("request: 5"));
    }

    #[test]
    fn test_device_without_pins_writes_empty_table() {
        let temp_dir = TempDir::new().unwrap();
        let layout = OutputLayout {
            pins_root: temp_dir.path().join("pins"),
            targets_root: temp_dir.path().join("targets"),
        };
        let device = device(NRF_XML, "nrf52840");
        let summary = emit_device(&device, "nrf52840", &layout).unwrap();
        assert_eq!(summary.pins, 0);

        let pins_in = std::fs::read_to_string(layout.gpio_pins_path("nrf52840")).unwrap();
        assert_eq!(pins_in, "");
    }

    #[test]
    fn test_generate_unknown_device() {
        let temp_dir = TempDir::new().unwrap();
        let layout = OutputLayout {
            pins_root: temp_dir.path().join("pins"),
            targets_root: temp_dir.path().join("targets"),
        };
        let source = sample_source();
        let mut store = MemoryCacheStore::new();
        let mut cache =
            DescriptorCache::build(&source, &mut store, &CacheOptions::default()).unwrap();

        let err = generate(&mut cache, &["stm32l476rg".to_string()], &layout).unwrap_err();
        assert!(matches!(err, EmitError::Cache(CacheError::UnknownDevice(_))));
        assert!(!layout.pins_root.exists());
    }
}
