use bytes::Bytes;
use futures::{Stream, StreamExt};

use crate::errors::{RembgError, Result};

/// Buffers a chunked byte stream while enforcing a hard byte ceiling.
///
/// The reader stops pulling from the source as soon as the running total crosses the
/// limit, so an oversized upload costs at most one chunk beyond `max_bytes`.
pub struct BoundedReader<S> {
    stream: S,
    max_bytes: u64,
    max_mb: u64,
}

impl<S, E> BoundedReader<S>
where
    S: Stream<Item = std::result::Result<Bytes, E>>,
    E: Into<RembgError>,
{
    pub const fn new(stream: S, max_bytes: u64, max_mb: u64) -> Self {
        Self {
            stream,
            max_bytes,
            max_mb,
        }
    }

    pub async fn read_to_end(self) -> Result<Vec<u8>> {
        let Self {
            stream,
            max_bytes,
            max_mb,
        } = self;
        let mut stream = std::pin::pin!(stream);
        let mut buffer = Vec::new();
        let mut bytes_read: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(Into::into)?;
            bytes_read += chunk.len() as u64;
            if bytes_read > max_bytes {
                tracing::debug!(bytes_read, max_bytes, "upload exceeded limit");
                return Err(RembgError::PayloadTooLarge { max_mb });
            }
            buffer.extend_from_slice(&chunk);
        }

        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn chunks(sizes: &[usize]) -> Vec<std::result::Result<Bytes, RembgError>> {
        sizes
            .iter()
            .map(|&size| Ok(Bytes::from(vec![7u8; size])))
            .collect()
    }

    #[tokio::test]
    async fn test_reads_everything_under_limit() -> Result<()> {
        let reader = BoundedReader::new(stream::iter(chunks(&[3, 4, 3])), 10, 1);
        let bytes = reader.read_to_end().await?;
        assert_eq!(bytes.len(), 10);
        assert!(bytes.iter().all(|&b| b == 7));
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_stream_yields_empty_buffer() -> Result<()> {
        let reader = BoundedReader::new(stream::iter(chunks(&[])), 10, 1);
        assert!(reader.read_to_end().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_stops_at_first_chunk_over_limit() {
        let pulled = AtomicUsize::new(0);
        let source = stream::iter(chunks(&[6, 6, 6, 6])).inspect(|_| {
            pulled.fetch_add(1, Ordering::SeqCst);
        });

        let result = BoundedReader::new(source, 10, 3).read_to_end().await;

        assert!(matches!(result, Err(RembgError::PayloadTooLarge { max_mb: 3 })));
        assert_eq!(pulled.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_source_errors_propagate() {
        let source = stream::iter(vec![
            Ok(Bytes::from_static(b"abc")),
            Err(RembgError::MalformedRequest {
                message: "truncated".to_string(),
            }),
        ]);

        let result = BoundedReader::new(source, 10, 1).read_to_end().await;
        assert!(matches!(result, Err(RembgError::MalformedRequest { .. })));
    }
}
