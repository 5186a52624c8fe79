//! Source providers: turn a source identifier into a stream of PCM bytes
//!
//! The engine only relies on [`SourceProvider`] and [`SourceReader`]; the
//! default provider covers HTTP(S) streams, local files and (with the
//! `device-io` feature) line-in capture.

use bytes::{Bytes, BytesMut};
use futures_util::future::BoxFuture;
use std::time::Duration;
use tokio::io::AsyncReadExt;

use crate::error::{Error, Result, StageError};
use crate::pipeline::icy::{IcyDemuxer, StreamMetadata};
use crate::status::SourceKind;

/// A validated source identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub identifier: String,
    pub kind: SourceKind,
}

impl Source {
    /// Parse an identifier; empty identifiers are rejected
    pub fn parse(identifier: &str) -> Result<Self> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(Error::InvalidArgument("source identifier is empty".into()));
        }
        Ok(Self {
            identifier: identifier.to_string(),
            kind: SourceKind::detect(identifier),
        })
    }
}

/// One item produced by a reader
#[derive(Debug, Clone, PartialEq)]
pub enum SourceChunk {
    /// Raw interleaved s16le PCM
    Data(Bytes),
    Metadata(StreamMetadata),
}

/// An open source
pub trait SourceReader: Send {
    /// Next chunk, `Ok(None)` at end of stream
    fn next_chunk(&mut self) -> BoxFuture<'_, std::result::Result<Option<SourceChunk>, StageError>>;
}

/// Opens readers for source identifiers
pub trait SourceProvider: Send + Sync {
    fn open(
        &self,
        source: Source,
    ) -> BoxFuture<'static, std::result::Result<Box<dyn SourceReader>, StageError>>;
}

/// Provider for network streams, local files and line-in
///
/// Every reader yields raw interleaved s16le PCM at the configured input
/// rate and channel count, which is what the decoder stage expects. HTTP
/// streams must therefore carry raw PCM; an MP3 or AAC body is passed
/// through undecoded and plays as noise.
pub struct DefaultSourceProvider {
    client: reqwest::Client,
    chunk_bytes: usize,
    #[cfg_attr(not(feature = "device-io"), allow(dead_code))]
    input_sample_rate: u32,
    #[cfg_attr(not(feature = "device-io"), allow(dead_code))]
    input_channels: u16,
}

impl DefaultSourceProvider {
    pub fn new(config: &crate::config::EngineConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("netradio/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::ResourceExhausted(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            chunk_bytes: config.chunk_bytes,
            input_sample_rate: config.input_sample_rate,
            input_channels: config.input_channels,
        })
    }
}

impl SourceProvider for DefaultSourceProvider {
    fn open(
        &self,
        source: Source,
    ) -> BoxFuture<'static, std::result::Result<Box<dyn SourceReader>, StageError>> {
        let client = self.client.clone();
        let chunk_bytes = self.chunk_bytes;
        #[cfg(feature = "device-io")]
        let (rate, channels) = (self.input_sample_rate, self.input_channels);

        Box::pin(async move {
            match source.kind {
                SourceKind::NetworkStream => {
                    let reader = HttpReader::connect(&client, &source.identifier).await?;
                    Ok(Box::new(reader) as Box<dyn SourceReader>)
                }
                SourceKind::LocalFile => {
                    let reader = FileReader::open(&source.identifier, chunk_bytes).await?;
                    Ok(Box::new(reader) as Box<dyn SourceReader>)
                }
                #[cfg(feature = "device-io")]
                SourceKind::LineInput => {
                    let device = source
                        .identifier
                        .split_once(':')
                        .map(|(_, name)| name)
                        .unwrap_or_default();
                    let reader = crate::audio::capture::LineInReader::open(device, rate, channels)?;
                    Ok(Box::new(reader) as Box<dyn SourceReader>)
                }
                other => Err(StageError::Unsupported(format!(
                    "{:?} source {}",
                    other, source.identifier
                ))),
            }
        })
    }
}

/// HTTP(S) stream reader with optional ICY metadata demuxing
pub struct HttpReader {
    response: reqwest::Response,
    demux: Option<IcyDemuxer>,
    pending: std::collections::VecDeque<SourceChunk>,
}

impl HttpReader {
    pub async fn connect(
        client: &reqwest::Client,
        url: &str,
    ) -> std::result::Result<Self, StageError> {
        let response = client
            .get(url)
            .header("Icy-MetaData", "1")
            .send()
            .await
            .map_err(|e| StageError::Open(e.to_string()))?
            .error_for_status()
            .map_err(|e| StageError::Open(e.to_string()))?;

        let metaint = response
            .headers()
            .get("icy-metaint")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|n| *n > 0);

        let mut pending = std::collections::VecDeque::new();
        if let Some(name) = response
            .headers()
            .get("icy-name")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
        {
            pending.push_back(SourceChunk::Metadata(StreamMetadata {
                title: name.to_string(),
                artist: String::new(),
            }));
        }

        tracing::info!("Connected to {} (icy-metaint: {:?})", url, metaint);

        Ok(Self {
            response,
            demux: metaint.map(IcyDemuxer::new),
            pending,
        })
    }
}

impl SourceReader for HttpReader {
    fn next_chunk(&mut self) -> BoxFuture<'_, std::result::Result<Option<SourceChunk>, StageError>> {
        Box::pin(async move {
            loop {
                if let Some(chunk) = self.pending.pop_front() {
                    return Ok(Some(chunk));
                }
                let raw = match self.response.chunk().await {
                    Ok(Some(raw)) => raw,
                    Ok(None) => return Ok(None),
                    Err(e) => return Err(StageError::Read(e.to_string())),
                };
                match self.demux.as_mut() {
                    None => return Ok(Some(SourceChunk::Data(raw))),
                    Some(demux) => {
                        let mut audio = Vec::with_capacity(raw.len());
                        for meta in demux.feed(&raw, &mut audio) {
                            self.pending.push_back(SourceChunk::Metadata(meta));
                        }
                        if !audio.is_empty() {
                            return Ok(Some(SourceChunk::Data(Bytes::from(audio))));
                        }
                    }
                }
            }
        })
    }
}

/// Local raw PCM file reader
pub struct FileReader {
    file: tokio::fs::File,
    chunk_bytes: usize,
}

impl FileReader {
    pub async fn open(identifier: &str, chunk_bytes: usize) -> std::result::Result<Self, StageError> {
        let path = identifier.strip_prefix("file://").unwrap_or(identifier);
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| StageError::Open(format!("{}: {}", path, e)))?;
        tracing::info!("Opened local file {}", path);
        Ok(Self {
            file,
            chunk_bytes: chunk_bytes.max(4),
        })
    }
}

impl SourceReader for FileReader {
    fn next_chunk(&mut self) -> BoxFuture<'_, std::result::Result<Option<SourceChunk>, StageError>> {
        Box::pin(async move {
            let mut buf = BytesMut::with_capacity(self.chunk_bytes);
            let n = self
                .file
                .read_buf(&mut buf)
                .await
                .map_err(|e| StageError::Read(e.to_string()))?;
            if n == 0 {
                return Ok(None);
            }
            Ok(Some(SourceChunk::Data(buf.freeze())))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use std::io::Write;

    #[test]
    fn test_parse_rejects_empty() {
        assert!(matches!(Source::parse("  "), Err(Error::InvalidArgument(_))));
        let source = Source::parse(" http://stream.example/radio ").unwrap();
        assert_eq!(source.identifier, "http://stream.example/radio");
        assert_eq!(source.kind, SourceKind::NetworkStream);
    }

    #[tokio::test]
    async fn test_file_reader_reads_to_end() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[1u8; 10_000]).unwrap();

        let config = EngineConfig {
            chunk_bytes: 4096,
            ..EngineConfig::default()
        };
        let provider = DefaultSourceProvider::new(&config).unwrap();
        let source = Source::parse(file.path().to_str().unwrap()).unwrap();
        let mut reader = provider.open(source).await.unwrap();

        let mut total = 0;
        while let Some(chunk) = reader.next_chunk().await.unwrap() {
            match chunk {
                SourceChunk::Data(bytes) => total += bytes.len(),
                SourceChunk::Metadata(_) => panic!("files carry no metadata"),
            }
        }
        assert_eq!(total, 10_000);
    }

    #[tokio::test]
    async fn test_missing_file_fails_to_open() {
        let provider = DefaultSourceProvider::new(&EngineConfig::default()).unwrap();
        let source = Source::parse("/nonexistent/definitely/missing.pcm").unwrap();
        assert!(matches!(provider.open(source).await, Err(StageError::Open(_))));
    }

    #[tokio::test]
    async fn test_bluetooth_unsupported() {
        let provider = DefaultSourceProvider::new(&EngineConfig::default()).unwrap();
        let source = Source::parse("bt:phone").unwrap();
        assert!(matches!(
            provider.open(source).await,
            Err(StageError::Unsupported(_))
        ));
    }
}
