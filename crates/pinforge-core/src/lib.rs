//! Pinforge Core - Descriptor cache, signal classification, and table emission
//!
//! This crate turns vendor device descriptor files into the generated
//! tables a firmware build consumes:
//! - Descriptor parsing into per-device models (pins, signals, DMA wiring)
//! - A fingerprint-gated descriptor cache with lazily parsed entries
//! - Signal classification into a small closed tag vocabulary
//! - Tag rendering and per-device pin/DMA artifact emission

pub mod cache;
pub mod descriptor;
pub mod emit;
pub mod fingerprint;
pub mod signal;
pub mod tag;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{
    CacheEntry, CacheError, CacheOptions, CacheStore, DescriptorCache, FileCacheStore,
    MemoryCacheStore,
};
pub use descriptor::{Descriptor, DescriptorError, DescriptorSource, Device, FsDescriptorSource, Signal};
pub use emit::{generate, DmaAssociation, DmaLocation, EmitError, EmitSummary, OutputLayout};
pub use fingerprint::{fingerprint, Fingerprint};
pub use signal::{classify, SignalMapping, SignalTag, TagKind};
pub use tag::format_tag;
