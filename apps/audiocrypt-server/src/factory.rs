//! Wires the concrete producer-side collaborators behind
//! [`TrackProcessorFactory`] for a standalone deployment.

use std::sync::Arc;

use audiocrypt_core::{
    AesGcmProcessor, CompressionProcessor, CryptoProcessor, DeflateProcessor,
    EcdhP256ServerProcessor, FormatParser, HashGenerator, HeaderFormatParser, NanoidGenerator,
    SequentialGenerator, ServerKeyExchangeProcessor, SliceIdGenerator, TimestampGenerator,
    TrackProcessorFactory, UuidV4Generator,
};

use crate::config::SliceIdStrategy;

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub struct StandardTrackProcessorFactory {
    slice_id_strategy: SliceIdStrategy,
}

impl StandardTrackProcessorFactory {
    #[must_use]
    pub fn new(slice_id_strategy: SliceIdStrategy) -> Self {
        Self { slice_id_strategy }
    }
}

impl TrackProcessorFactory for StandardTrackProcessorFactory {
    fn key_exchange(&self) -> Box<dyn ServerKeyExchangeProcessor> {
        Box::new(EcdhP256ServerProcessor::default())
    }

    fn crypto(&self) -> Arc<dyn CryptoProcessor> {
        Arc::new(AesGcmProcessor)
    }

    fn compression(&self) -> Arc<dyn CompressionProcessor> {
        Arc::new(DeflateProcessor)
    }

    fn slice_id_generator(&self) -> Arc<dyn SliceIdGenerator> {
        match self.slice_id_strategy {
            SliceIdStrategy::Nanoid => Arc::new(NanoidGenerator),
            SliceIdStrategy::Uuid => Arc::new(UuidV4Generator),
            SliceIdStrategy::Sequential => Arc::new(SequentialGenerator {
                prefix: "slice".to_string(),
            }),
            SliceIdStrategy::Timestamp => Arc::new(TimestampGenerator::new(now_ms())),
            SliceIdStrategy::Hash => Arc::new(HashGenerator),
        }
    }

    fn format_parser(&self) -> Arc<dyn FormatParser> {
        Arc::new(HeaderFormatParser)
    }
}
