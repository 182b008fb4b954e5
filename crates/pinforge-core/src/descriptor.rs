//! Device descriptor parsing
//!
//! A descriptor file is an XML document describing one hardware family.
//! Each file lists every part number (device) it covers, and for each
//! device the drivers it carries: the `gpio` driver with its pins and
//! their alternate-function signals, and one or more `dma` drivers with
//! either stream/channel or request based wiring.
//!
//! ```xml
//! <family name="stm32f4">
//!     <device partname="stm32f405vgt6">
//!         <driver name="gpio" type="stm32-f2f4">
//!             <gpio port="a" pin="0">
//!                 <signal driver="tim" instance="2" name="ch1" af="1"/>
//!             </gpio>
//!         </driver>
//!     </device>
//! </family>
//! ```

use quick_xml::de::from_str;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

use crate::fingerprint::fingerprint;

#[derive(Error, Debug)]
pub enum DescriptorError {
    #[error("Failed to read {}: {source}", .path.display())]
    IoError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to parse descriptor {}: {message}", .path.display())]
    ParseError { path: PathBuf, message: String },
    #[error("Failed to walk descriptor root: {0}")]
    WalkError(#[from] walkdir::Error),
}

/// Raw peripheral signal attached to a pin or DMA channel
///
/// All fields are kept exactly as written in the descriptor; only the
/// signal classifier interprets them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    #[serde(rename = "@driver", default)]
    pub driver: Option<String>,
    #[serde(rename = "@name", default)]
    pub name: Option<String>,
    #[serde(rename = "@instance", default)]
    pub instance: Option<String>,
    /// Alternate-function selector, absent on families without pin muxing
    #[serde(rename = "@af", default)]
    pub af: Option<String>,
}

/// A single GPIO pin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpioPin {
    #[serde(rename = "@port")]
    pub port: String,
    #[serde(rename = "@pin")]
    pub pin: String,
    #[serde(default)]
    pub signal: Vec<Signal>,
}

impl GpioPin {
    /// Pin name as used in generated tables, e.g. `PA0`
    pub fn name(&self) -> String {
        format!("P{}{}", self.port, self.pin).to_uppercase()
    }
}

/// One DMA controller in a stream/channel based DMA driver
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DmaController {
    #[serde(rename = "@instance")]
    pub instance: u32,
    #[serde(default)]
    pub stream: Vec<DmaStream>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DmaStream {
    #[serde(rename = "@position")]
    pub position: u32,
    #[serde(default)]
    pub channel: Vec<DmaChannel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DmaChannel {
    #[serde(rename = "@position")]
    pub position: u32,
    #[serde(default)]
    pub signal: Vec<Signal>,
}

/// Request table of a request-multiplexed DMA driver
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DmaRequests {
    #[serde(default)]
    pub request: Vec<DmaRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DmaRequest {
    #[serde(rename = "@position")]
    pub position: u32,
    #[serde(default)]
    pub signal: Vec<Signal>,
}

/// A driver block of a device (gpio, dma, tim, spi, ...)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@type", default)]
    pub driver_type: Option<String>,
    #[serde(default)]
    pub gpio: Vec<GpioPin>,
    #[serde(default)]
    pub streams: Vec<DmaController>,
    #[serde(default)]
    pub requests: Vec<DmaRequests>,
}

/// Parsed model of one part number
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    #[serde(rename = "@partname")]
    pub partname: String,
    #[serde(default)]
    pub driver: Vec<Driver>,
}

impl Device {
    /// All drivers with the given name, in descriptor order
    pub fn drivers<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Driver> + 'a {
        self.driver.iter().filter(move |d| d.name == name)
    }
}

/// Root of a descriptor file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename = "family")]
pub struct Descriptor {
    #[serde(rename = "@name", default)]
    pub name: Option<String>,
    #[serde(default)]
    pub device: Vec<Device>,
}

impl Descriptor {
    /// Parse a descriptor from an XML string
    pub fn from_xml(xml: &str) -> Result<Self, quick_xml::DeError> {
        from_str(xml)
    }

    /// Parse a descriptor from raw file content, attributing errors to `path`
    pub fn from_bytes(path: &Path, bytes: &[u8]) -> Result<Self, DescriptorError> {
        let xml = std::str::from_utf8(bytes).map_err(|e| DescriptorError::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_xml(xml).map_err(|e| DescriptorError::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}

/// Supplier of descriptor files and their parsed device models
pub trait DescriptorSource {
    /// List every descriptor file available, in a stable order
    fn discover(&self) -> Result<Vec<PathBuf>, DescriptorError>;

    /// Read a descriptor file, or `None` if it no longer exists
    fn read(&self, path: &Path) -> Result<Option<Vec<u8>>, DescriptorError>;

    /// Opaque marker for a tracked repository root
    fn root_marker(&self, root: &Path) -> Result<String, DescriptorError>;

    /// Parse a descriptor file into every device it describes
    fn parse(&self, path: &Path) -> Result<Vec<Device>, DescriptorError> {
        let bytes = self.read(path)?.ok_or_else(|| DescriptorError::IoError {
            path: path.to_path_buf(),
            source: io::Error::from(io::ErrorKind::NotFound),
        })?;
        Ok(Descriptor::from_bytes(path, &bytes)?.device)
    }
}

impl<T: DescriptorSource + ?Sized> DescriptorSource for &T {
    fn discover(&self) -> Result<Vec<PathBuf>, DescriptorError> {
        (**self).discover()
    }

    fn read(&self, path: &Path) -> Result<Option<Vec<u8>>, DescriptorError> {
        (**self).read(path)
    }

    fn root_marker(&self, root: &Path) -> Result<String, DescriptorError> {
        (**self).root_marker(root)
    }

    fn parse(&self, path: &Path) -> Result<Vec<Device>, DescriptorError> {
        (**self).parse(path)
    }
}

/// Descriptor source backed by a directory tree of `*.xml` files
#[derive(Debug, Clone)]
pub struct FsDescriptorSource {
    root: PathBuf,
}

impl FsDescriptorSource {
    /// Create a source rooted at `root`; the path is made absolute
    pub fn new(root: &Path) -> Result<Self, DescriptorError> {
        let root = root.canonicalize().map_err(|source| DescriptorError::IoError {
            path: root.to_path_buf(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl DescriptorSource for FsDescriptorSource {
    fn discover(&self) -> Result<Vec<PathBuf>, DescriptorError> {
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.root).follow_links(true) {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type().is_file() && path.extension().is_some_and(|ext| ext == "xml") {
                files.push(path.to_path_buf());
            }
        }
        files.sort();
        Ok(files)
    }

    fn read(&self, path: &Path) -> Result<Option<Vec<u8>>, DescriptorError> {
        match std::fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(DescriptorError::IoError {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// The descriptor root is marked by a fingerprint of its file listing,
    /// so added or removed descriptors invalidate the cache. Any other
    /// root is marked by the generator version.
    fn root_marker(&self, root: &Path) -> Result<String, DescriptorError> {
        if root != self.root {
            return Ok(format!("pinforge-{}", env!("CARGO_PKG_VERSION")));
        }
        let listing: Vec<String> = self
            .discover()?
            .iter()
            .map(|p| p.strip_prefix(&self.root).unwrap_or(p).display().to_string())
            .collect();
        Ok(fingerprint(listing.join("\n").as_bytes()).to_string())
    }
}
