use prometheus::{Encoder, Registry, TextEncoder};

/// Text encoder with its output buffer, kept in a [`crate::pool::Pool`] so
/// scrapes do not reallocate the exposition body every time.
pub struct PooledMetrics {
    pub encoder: TextEncoder,
    pub buffer:  Vec<u8>,
}

impl Default for PooledMetrics {
    fn default() -> Self { Self { encoder: TextEncoder::new(), buffer: vec![] } }
}

impl PooledMetrics {
    /// Encode every family of `registry` in the text exposition format.
    /// The previous content of the buffer is discarded.
    pub fn encode(
        &mut self,
        registry: &Registry,
    ) -> prometheus::Result<&[u8]> {
        self.buffer.clear();
        self.encoder.encode(&registry.gather(), &mut self.buffer)?;
        Ok(&self.buffer)
    }

    pub fn content_type(&self) -> &str { self.encoder.format_type() }
}
