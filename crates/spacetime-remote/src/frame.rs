//! Length-prefixed CBOR framing.
//!
//! A frame is a 4-byte big-endian body length followed by the CBOR
//! encoding of one [`Message`].

use crate::error::{RemoteError, Result};
use crate::message::Message;
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

pub async fn write_frame<W>(writer: &mut W, message: &Message, max_len: usize) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_cbor::to_vec(message)?;
    let len = u32::try_from(body.len())
        .ok()
        .filter(|len| *len as usize <= max_len)
        .ok_or(RemoteError::FrameTooLarge {
            len: body.len(),
            max: max_len,
        })?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    trace!(len, "Wrote frame");
    Ok(())
}

/// Read one frame. `None` means the peer closed the stream between frames.
pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> Result<Option<Message>>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 4];
    match reader.read_exact(&mut prefix).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(prefix) as usize;
    if len > max_len {
        return Err(RemoteError::FrameTooLarge { len, max: max_len });
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    trace!(len, "Read frame");
    Ok(Some(serde_cbor::from_slice(&body)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Request, Response, Status};
    use serde_json::json;
    use spacetime_core::{Delta, Eid, Event, ObjectChange, VersionId};
    use spacetime_graph::{Edge, GetResult};
    use std::collections::BTreeMap;

    fn offer() -> GetResult {
        let mut delta = Delta::new();
        delta.insert(
            "Counter",
            "0",
            ObjectChange::new("Counter", Event::New).with_dim("count", json!(1)),
        );
        GetResult {
            edges: vec![Edge::new(VersionId::root(), "V1", delta, Eid::from("e1"))],
            head: "V1".into(),
            remote_refs: BTreeMap::from([("A".into(), "V1".into())]),
            frontier: BTreeMap::from([("C".into(), BTreeMap::new())]),
            transaction_id: Some("tx".into()),
        }
    }

    #[tokio::test]
    async fn test_frames_cross_a_pipe() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let push = Message::Request(Request::push("A".into(), offer(), true, vec![]));
        let reply = Message::Response(Response::refusal("B".into(), Status::LockReject));

        write_frame(&mut a, &push, 1 << 20).await.unwrap();
        write_frame(&mut a, &reply, 1 << 20).await.unwrap();
        drop(a);

        assert_eq!(read_frame(&mut b, 1 << 20).await.unwrap(), Some(push));
        assert_eq!(read_frame(&mut b, 1 << 20).await.unwrap(), Some(reply));
        assert_eq!(read_frame(&mut b, 1 << 20).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_oversized_frames_are_rejected() {
        let message = Message::Request(Request::push("A".into(), offer(), false, vec![]));
        let (mut a, mut b) = tokio::io::duplex(1024);
        let err = write_frame(&mut a, &message, 8).await.unwrap_err();
        assert!(matches!(err, RemoteError::FrameTooLarge { max: 8, .. }));

        write_frame(&mut a, &message, 1 << 20).await.unwrap();
        let err = read_frame(&mut b, 8).await.unwrap_err();
        assert!(matches!(err, RemoteError::FrameTooLarge { max: 8, .. }));
    }

    #[tokio::test]
    async fn test_garbage_body_is_a_codec_error() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&3u32.to_be_bytes()).await.unwrap();
        a.write_all(&[0xff, 0xff, 0xff]).await.unwrap();
        let err = read_frame(&mut b, 64).await.unwrap_err();
        assert!(matches!(err, RemoteError::Codec(_)));
    }
}
