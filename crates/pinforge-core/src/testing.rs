//! In-memory descriptor source for cache and emission tests

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use crate::descriptor::{Descriptor, DescriptorError, DescriptorSource, Device};

/// Descriptor files held in memory, counting every parse
#[derive(Default)]
pub(crate) struct MemorySource {
    files: RefCell<BTreeMap<PathBuf, String>>,
    markers: RefCell<HashMap<PathBuf, String>>,
    parses: Cell<usize>,
}

impl MemorySource {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_file(self, path: &str, xml: &str) -> Self {
        self.set_file(path, xml);
        self
    }

    pub(crate) fn set_file(&self, path: &str, xml: &str) {
        self.files.borrow_mut().insert(PathBuf::from(path), xml.to_string());
    }

    pub(crate) fn remove_file(&self, path: &str) {
        self.files.borrow_mut().remove(Path::new(path));
    }

    pub(crate) fn set_marker(&self, root: &str, marker: &str) {
        self.markers.borrow_mut().insert(PathBuf::from(root), marker.to_string());
    }

    pub(crate) fn parse_count(&self) -> usize {
        self.parses.get()
    }
}

impl DescriptorSource for MemorySource {
    fn discover(&self) -> Result<Vec<PathBuf>, DescriptorError> {
        Ok(self.files.borrow().keys().cloned().collect())
    }

    fn read(&self, path: &Path) -> Result<Option<Vec<u8>>, DescriptorError> {
        Ok(self.files.borrow().get(path).map(|xml| xml.as_bytes().to_vec()))
    }

    fn root_marker(&self, root: &Path) -> Result<String, DescriptorError> {
        Ok(self.markers.borrow().get(root).cloned().unwrap_or_else(|| "v1".to_string()))
    }

    fn parse(&self, path: &Path) -> Result<Vec<Device>, DescriptorError> {
        self.parses.set(self.parses.get() + 1);
        let xml = self.files.borrow().get(path).cloned().ok_or_else(|| DescriptorError::IoError {
            path: path.to_path_buf(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        })?;
        Ok(Descriptor::from_bytes(path, xml.as_bytes())?.device)
    }
}

/// Two devices sharing one stream-DMA descriptor
pub(crate) const F4_XML: &str = r#"<family name="stm32f4">
    <device partname="stm32f405rgt6">
        <driver name="gpio" type="stm32-f2f4">
            <gpio port="a" pin="0">
                <signal driver="tim" instance="2" name="ch1" af="1"/>
            </gpio>
        </driver>
    </device>
    <device partname="stm32f405vgt6">
        <driver name="gpio" type="stm32-f2f4">
            <gpio port="a" pin="0">
                <signal driver="tim" instance="2" name="ch1" af="1"/>
                <signal driver="tim" instance="5" name="ch1" af="2"/>
                <signal driver="uart" instance="4" name="tx" af="8"/>
                <signal driver="adc" instance="1" name="in0"/>
                <signal driver="sys" name="wkup"/>
            </gpio>
            <gpio port="a" pin="5">
                <signal driver="spi" instance="1" name="sck" af="5"/>
                <signal driver="dac" instance="1" name="out2"/>
            </gpio>
            <gpio port="a" pin="13">
                <signal driver="sys" name="jtms-swdio" af="0"/>
            </gpio>
            <gpio port="h" pin="1"/>
        </driver>
        <driver name="dma" type="stm32-stream-channel">
            <streams instance="2">
                <stream position="0">
                    <channel position="3">
                        <signal driver="spi" instance="1" name="rx"/>
                    </channel>
                    <channel position="0">
                        <signal driver="adc" instance="1"/>
                        <signal driver="i2c" instance="1" name="rx"/>
                    </channel>
                </stream>
            </streams>
        </driver>
    </device>
</family>"#;

/// One device using request-multiplexed DMA
pub(crate) const G4_XML: &str = r#"<family name="stm32g4">
    <device partname="stm32g473ceu6">
        <driver name="gpio" type="stm32-g4">
            <gpio port="b" pin="6">
                <signal driver="usart" instance="1" name="tx" af="7"/>
            </gpio>
        </driver>
        <driver name="dma" type="stm32-mux">
            <requests>
                <request position="5"><signal driver="adc" instance="1"/></request>
                <request position="24"><signal driver="usart" instance="1" name="rx"/></request>
            </requests>
        </driver>
    </device>
</family>"#;

/// A descriptor for a family outside the supported set
pub(crate) const NRF_XML: &str = r#"<family name="nrf52">
    <device partname="nrf52840"/>
</family>"#;

pub(crate) const F4_PATH: &str = "/devices/stm32/stm32f4-05_15.xml";
pub(crate) const G4_PATH: &str = "/devices/stm32/stm32g4-73.xml";
pub(crate) const NRF_PATH: &str = "/devices/nrf/nrf52-840.xml";

pub(crate) const PROJECT_ROOT: &str = "/project";
pub(crate) const DEVICES_ROOT: &str = "/devices";

/// Source populated with the sample corpus
pub(crate) fn sample_source() -> MemorySource {
    MemorySource::new()
        .with_file(F4_PATH, F4_XML)
        .with_file(G4_PATH, G4_XML)
        .with_file(NRF_PATH, NRF_XML)
}
