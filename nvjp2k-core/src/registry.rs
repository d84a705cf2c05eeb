//! Decoder registry: name -> factory.
//!
//! The host picks a decoder by name and gets a fresh, unopened instance.
//! Nothing registers itself; [`DecoderRegistry::with_defaults`] lists the
//! built-in decoders explicitly.

use std::collections::BTreeMap;

use crate::decoder::{Jp2kDecoder, VideoDecoder, NVJP2K_NAME};
use crate::error::{Jp2kError, Result};
use crate::nvjpeg2k::NvJpeg2kBackend;
use crate::options::DecoderParameters;

pub type DecoderFactory =
    Box<dyn Fn(DecoderParameters) -> Result<Box<dyn VideoDecoder>> + Send + Sync>;

#[derive(Default)]
pub struct DecoderRegistry {
    factories: BTreeMap<String, DecoderFactory>,
}

impl DecoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the nvJPEG2000 decoder under `"nvjp2k"`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(NVJP2K_NAME, |params| {
            let backend = NvJpeg2kBackend::load()?;
            Ok(Box::new(Jp2kDecoder::new(backend, params)) as Box<dyn VideoDecoder>)
        });
        registry
    }

    /// Add or replace the factory for `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(DecoderParameters) -> Result<Box<dyn VideoDecoder>> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.factories.insert(name.clone(), Box::new(factory)).is_some() {
            tracing::debug!("Replaced decoder factory {}", name);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Construct an unopened decoder.
    pub fn create(&self, name: &str, params: DecoderParameters) -> Result<Box<dyn VideoDecoder>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Jp2kError::UnknownDecoder(name.to_string()))?;
        factory(params)
    }
}
