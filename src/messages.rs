/// Helper functions to frame protocol messages on the wire.
///
/// Requests and one-shot responses are protobuf records prefixed with their
/// varint-encoded length. Download streams prefix every record with a fixed
/// big-endian i32 instead, so the end-of-stream sentinel `-1` can be
/// recognized without peeking into a varint.
use bytes::{BufMut, BytesMut};
use prost::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::errors::Error;

/// Terminates both stream directions.
pub const END_OF_STREAM: i32 = -1;

/// Longest frame we are willing to buffer (64 MiB).
const MAX_FRAME_SIZE: u64 = 64 * 1024 * 1024;

/// Serialize a message and write it varint-length-prefixed. Does not flush;
/// the caller decides where the batch boundaries are.
pub async fn write_message<S, M>(stream: &mut S, message: &M) -> Result<(), Error>
where
    S: AsyncWrite + Unpin,
    M: Message,
{
    let mut buf = BytesMut::with_capacity(message.encoded_len() + 5);

    message
        .encode_length_delimited(&mut buf)
        .map_err(|err| Error::Protocol(format!("frame encoding failed: {}", err)))?;

    match stream.write_all(&buf).await {
        Ok(_) => Ok(()),
        Err(err) => Err(Error::Socket(err.to_string())),
    }
}

/// Read one varint-length-prefixed message and parse it.
pub async fn read_message<S, M>(stream: &mut S) -> Result<M, Error>
where
    S: AsyncRead + Unpin,
    M: Message + Default,
{
    let len = read_varint(stream).await?;

    if len > MAX_FRAME_SIZE {
        return Err(Error::Protocol(format!("frame of {} bytes refused", len)));
    }

    let mut buf = vec![0u8; len as usize];

    match stream.read_exact(&mut buf).await {
        Ok(_) => (),
        Err(err) => return Err(Error::Socket(err.to_string())),
    };

    M::decode(&buf[..]).map_err(|err| Error::Protocol(format!("malformed frame: {}", err)))
}

/// Write the four-byte end-of-stream sentinel. Does not flush.
pub async fn write_end_of_stream<S>(stream: &mut S) -> Result<(), Error>
where
    S: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::with_capacity(4);

    buf.put_i32(END_OF_STREAM);

    match stream.write_all(&buf).await {
        Ok(_) => Ok(()),
        Err(err) => Err(Error::Socket(err.to_string())),
    }
}

/// Read a big-endian i32, the framing used on download streams.
pub async fn read_int32<S>(stream: &mut S) -> Result<i32, Error>
where
    S: AsyncRead + Unpin,
{
    match stream.read_i32().await {
        Ok(value) => Ok(value),
        Err(err) => Err(Error::Socket(err.to_string())),
    }
}

/// Read one i32-length-prefixed stream record. `Ok(None)` at the sentinel.
pub async fn read_stream_frame<S, M>(stream: &mut S) -> Result<Option<M>, Error>
where
    S: AsyncRead + Unpin,
    M: Message + Default,
{
    let len = read_int32(stream).await?;

    if len == END_OF_STREAM {
        return Ok(None);
    }

    if len < 0 || len as u64 > MAX_FRAME_SIZE {
        return Err(Error::Protocol(format!("bad stream frame length {}", len)));
    }

    let mut buf = vec![0u8; len as usize];

    match stream.read_exact(&mut buf).await {
        Ok(_) => (),
        Err(err) => return Err(Error::Socket(err.to_string())),
    };

    match M::decode(&buf[..]) {
        Ok(message) => Ok(Some(message)),
        Err(err) => Err(Error::Protocol(format!("malformed stream frame: {}", err))),
    }
}

async fn read_varint<S>(stream: &mut S) -> Result<u64, Error>
where
    S: AsyncRead + Unpin,
{
    let mut value: u64 = 0;
    let mut shift: u32 = 0;

    loop {
        let byte = match stream.read_u8().await {
            Ok(byte) => byte,
            Err(err) => return Err(Error::Socket(err.to_string())),
        };

        value |= ((byte & 0x7f) as u64) << shift;

        if byte & 0x80 == 0 {
            return Ok(value);
        }

        shift += 7;

        if shift >= 64 {
            return Err(Error::Protocol("varint length prefix overflow".to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto;
    use std::io::Cursor;

    #[tokio::test]
    async fn message_round_trips_through_varint_framing() {
        let request = proto::AsyncOperationStatusRequest { request_id: 42 };

        let mut wire: Cursor<Vec<u8>> = Cursor::new(Vec::new());
        write_message(&mut wire, &request).await.unwrap();

        let buf = wire.into_inner();
        let decoded: proto::AsyncOperationStatusRequest =
            read_message(&mut &buf[..]).await.unwrap();

        assert_eq!(decoded, request);
    }

    #[tokio::test]
    async fn multiple_frames_read_back_in_order() {
        let mut wire: Cursor<Vec<u8>> = Cursor::new(Vec::new());

        for id in 0..3 {
            let request = proto::AsyncOperationStatusRequest { request_id: id };
            write_message(&mut wire, &request).await.unwrap();
        }

        let buf = wire.into_inner();
        let mut reader = &buf[..];

        for id in 0..3 {
            let decoded: proto::AsyncOperationStatusRequest =
                read_message(&mut reader).await.unwrap();
            assert_eq!(decoded.request_id, id);
        }
    }

    #[tokio::test]
    async fn end_of_stream_sentinel_is_minus_one() {
        let mut wire: Cursor<Vec<u8>> = Cursor::new(Vec::new());
        write_end_of_stream(&mut wire).await.unwrap();

        let buf = wire.into_inner();
        assert_eq!(buf, vec![0xff, 0xff, 0xff, 0xff]);

        let value = read_int32(&mut &buf[..]).await.unwrap();
        assert_eq!(value, END_OF_STREAM);
    }

    #[tokio::test]
    async fn stream_frame_reader_stops_at_sentinel() {
        let record = proto::FetchPartitionEntriesResponse {
            key: Some(b"k1".to_vec()),
            ..Default::default()
        };

        let mut wire = BytesMut::new();
        let bytes = record.encode_to_vec();
        wire.put_i32(bytes.len() as i32);
        wire.put_slice(&bytes);
        wire.put_i32(END_OF_STREAM);

        let buf = wire.to_vec();
        let mut reader = &buf[..];

        let first: Option<proto::FetchPartitionEntriesResponse> =
            read_stream_frame(&mut reader).await.unwrap();
        assert_eq!(first.unwrap().key.unwrap(), b"k1".to_vec());

        let second: Option<proto::FetchPartitionEntriesResponse> =
            read_stream_frame(&mut reader).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn truncated_frame_is_a_socket_error() {
        let request = proto::AsyncOperationStatusRequest { request_id: 7 };

        let mut wire: Cursor<Vec<u8>> = Cursor::new(Vec::new());
        write_message(&mut wire, &request).await.unwrap();

        let mut buf = wire.into_inner();
        buf.truncate(buf.len() - 1);

        let result: Result<proto::AsyncOperationStatusRequest, Error> =
            read_message(&mut &buf[..]).await;

        assert!(matches!(result, Err(Error::Socket(_))));
    }
}
