/// Lazy download streams.
///
/// A fetch holds its pooled connection until the end-of-stream sentinel or
/// an error, whichever comes first; both paths put the connection back.
/// Stopping early — via `close` or by dropping the handle mid-stream —
/// condemns the socket (frames may still be in flight on it) and returns
/// it for disposal, so the pool stays balanced and never recycles a dirty
/// connection. Streams are single-shot: after the sentinel, an error, or
/// `close`, every `next` returns `None`.
use crate::errors::Error;
use crate::pool::PooledSocket;
use crate::proto;
use crate::versioning::Versioned;

struct FetchCore {
    conn: Option<PooledSocket>,
}

impl FetchCore {
    fn new(conn: PooledSocket) -> FetchCore {
        FetchCore { conn: Some(conn) }
    }

    async fn next_response(&mut self) -> Option<Result<proto::FetchPartitionEntriesResponse, Error>> {
        let conn = self.conn.as_mut()?;

        match conn
            .read_stream_frame::<proto::FetchPartitionEntriesResponse>()
            .await
        {
            // Sentinel: the stream is drained and the socket is clean.
            Ok(None) => {
                self.conn = None;
                None
            }
            Ok(Some(response)) => {
                if let Some(err) = response.error {
                    let mapped = Error::from_server(err.error_code, &err.error_message);
                    self.abort();
                    return Some(Err(mapped));
                }

                Some(Ok(response))
            }
            // The connection already condemned itself on the I/O failure.
            Err(err) => {
                self.conn = None;
                Some(Err(err))
            }
        }
    }

    fn abort(&mut self) {
        if let Some(conn) = self.conn.as_mut() {
            conn.mark_bad();
        }

        self.conn = None;
    }
}

// Only the sentinel hands the socket back clean. A handle dropped before
// that still has response frames in flight, so the connection must be
// condemned, never reused.
impl Drop for FetchCore {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.as_mut() {
            conn.mark_bad();
        }
    }
}

/// Entries streamed out of one node's partitions.
pub struct FetchEntriesStream {
    core: FetchCore,
}

impl FetchEntriesStream {
    pub(crate) fn new(conn: PooledSocket) -> FetchEntriesStream {
        FetchEntriesStream {
            core: FetchCore::new(conn),
        }
    }

    /// Next `(key, versioned value)` pair, or `None` once the stream ends.
    pub async fn next(&mut self) -> Option<Result<(Vec<u8>, Versioned<Vec<u8>>), Error>> {
        match self.core.next_response().await? {
            Ok(response) => match response.partition_entry {
                Some(proto::PartitionEntry {
                    key,
                    versioned: Some(versioned),
                }) => Some(Ok((key, Versioned::from_proto(versioned)))),
                _ => {
                    self.core.abort();
                    Some(Err(Error::Protocol(
                        "stream record carries no partition entry".to_string(),
                    )))
                }
            },
            Err(err) => Some(Err(err)),
        }
    }

    /// Abandon the stream early and give the connection up for disposal.
    pub fn close(&mut self) {
        self.core.abort();
    }
}

/// Keys streamed out of one node's partitions.
pub struct FetchKeysStream {
    core: FetchCore,
}

impl FetchKeysStream {
    pub(crate) fn new(conn: PooledSocket) -> FetchKeysStream {
        FetchKeysStream {
            core: FetchCore::new(conn),
        }
    }

    /// Next key, or `None` once the stream ends.
    pub async fn next(&mut self) -> Option<Result<Vec<u8>, Error>> {
        match self.core.next_response().await? {
            Ok(response) => match response.key {
                Some(key) => Some(Ok(key)),
                None => {
                    self.core.abort();
                    Some(Err(Error::Protocol(
                        "stream record carries no key".to_string(),
                    )))
                }
            },
            Err(err) => Some(Err(err)),
        }
    }

    /// Abandon the stream early and give the connection up for disposal.
    pub fn close(&mut self) {
        self.core.abort();
    }
}
