use super::{ChunkEncoder, MsgpackEncoder, RawEncoder};
use std::sync::Arc;

/// A requested format name that no built-in encoder provides.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("Unknown encoding format: {0}")]
pub struct UnknownFormat(pub String);

/// Immutable mapping from format names to encoders.
///
/// Built once at startup and shared between sessions behind an `Arc`.
/// Registration order is preserved and reported by [`names`](Self::names).
#[derive(Clone, Default)]
pub struct EncoderRegistry {
    encoders: Vec<Arc<dyn ChunkEncoder>>,
}

impl EncoderRegistry {
    pub fn builder() -> EncoderRegistryBuilder {
        EncoderRegistryBuilder::default()
    }

    /// Every built-in encoder: `raw` then `msgpack`.
    pub fn with_defaults() -> Self {
        Self::builder()
            .register(RawEncoder)
            .register(MsgpackEncoder)
            .build()
    }

    /// Registers only the named built-in encoders, in the given order.
    pub fn only<I, S>(names: I) -> Result<Self, UnknownFormat>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let defaults = Self::with_defaults();
        let mut builder = Self::builder();
        for name in names {
            let name = name.as_ref().trim();
            let encoder = defaults
                .get(name)
                .ok_or_else(|| UnknownFormat(name.to_owned()))?;
            builder = builder.register_arc(Arc::clone(encoder));
        }
        Ok(builder.build())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ChunkEncoder>> {
        self.encoders.iter().find(|e| e.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> Vec<&str> {
        self.encoders.iter().map(|e| e.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.encoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.encoders.is_empty()
    }
}

impl core::fmt::Debug for EncoderRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[derive(Default)]
pub struct EncoderRegistryBuilder {
    encoders: Vec<Arc<dyn ChunkEncoder>>,
}

impl EncoderRegistryBuilder {
    /// Adds an encoder. A later registration under the same name replaces the
    /// earlier one in place.
    #[must_use]
    pub fn register(self, encoder: impl ChunkEncoder) -> Self {
        self.register_arc(Arc::new(encoder))
    }

    #[must_use]
    pub fn register_arc(mut self, encoder: Arc<dyn ChunkEncoder>) -> Self {
        match self
            .encoders
            .iter_mut()
            .find(|e| e.name() == encoder.name())
        {
            Some(slot) => *slot = encoder,
            None => self.encoders.push(encoder),
        }
        self
    }

    pub fn build(self) -> EncoderRegistry {
        EncoderRegistry {
            encoders: self.encoders,
        }
    }
}
