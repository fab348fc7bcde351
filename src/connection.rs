use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::codec::Decoder;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::codec::FrameCodec;
use crate::frame::{DecodeOptions, Frame};
use crate::pool::BufferPool;
use crate::request::Request;
use crate::Error;

/// The byte stream a connection runs on: a TCP socket, a TLS stream handed over by a pool, or an
/// in-memory pipe.
pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ByteStream for T {}

pub struct Connection<S> {
    pub id: Uuid,
    stream: S,
    // Data is read from the socket into the read buffer. When a frame is parsed, the corresponding
    // data is removed from the buffer.
    buffer: BytesMut,
    codec: FrameCodec,
    pool: Arc<BufferPool>,
    poisoned: bool,
    push_sink: Option<UnboundedSender<Frame>>,
    attributes: Option<Vec<(Frame, Frame)>>,
}

impl<S: ByteStream> Connection<S> {
    pub fn new(stream: S) -> Connection<S> {
        Connection::with_options(stream, FrameCodec::default(), Arc::new(BufferPool::default()))
    }

    pub fn with_options(stream: S, codec: FrameCodec, pool: Arc<BufferPool>) -> Connection<S> {
        Connection {
            id: Uuid::new_v4(),
            stream,
            // Allocate the buffer with 4kb of capacity.
            buffer: BytesMut::with_capacity(4096),
            codec,
            pool,
            poisoned: false,
            push_sink: None,
            attributes: None,
        }
    }

    pub fn with_decode_options(stream: S, options: DecodeOptions) -> Connection<S> {
        Connection::with_options(
            stream,
            FrameCodec::new(options),
            Arc::new(BufferPool::default()),
        )
    }

    /// Reads the next frame as sent by the server, out-of-band frames included.
    ///
    /// Returns `None` when the server closed the connection between frames.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, Error> {
        self.ensure_usable()?;

        loop {
            match self.codec.decode(&mut self.buffer) {
                Ok(Some(frame)) => {
                    trace!(connection_id = %self.id, ?frame, "frame received");
                    return Ok(Some(frame));
                }
                Ok(None) => {}
                Err(err) => return Err(self.fail(err)),
            }

            let read = self.stream.read_buf(&mut self.buffer).await;
            match read {
                Ok(0) if self.buffer.is_empty() => return Ok(None),
                Ok(0) => return Err(self.fail(Error::ConnectionClosed)),
                Ok(_) => {}
                Err(err) => return Err(self.fail(err.into())),
            }
        }
    }

    /// Reads the reply to the next pending command.
    ///
    /// Attribute frames are kept as metadata for the reply that follows them and push frames are
    /// handed to the push sink; neither is ever returned as a reply.
    pub async fn read_reply(&mut self) -> Result<Frame, Error> {
        self.attributes = None;

        loop {
            let frame = match self.read_frame().await? {
                Some(frame) => frame,
                None => return Err(self.fail(Error::ConnectionClosed)),
            };

            match frame {
                Frame::Attribute(attributes) => {
                    trace!(connection_id = %self.id, "attributes received");
                    self.attributes = Some(attributes);
                }
                Frame::Push(items) => self.dispatch_push(Frame::Push(items)),
                reply => return Ok(reply),
            }
        }
    }

    /// Writes one request and flushes it.
    pub async fn write_request(&mut self, request: &Request) -> Result<(), Error> {
        self.write_requests(std::iter::once(request)).await
    }

    /// Writes a batch of requests with a single write.
    pub async fn write_requests<'r, I>(&mut self, requests: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = &'r Request>,
    {
        self.ensure_usable()?;

        let pool = Arc::clone(&self.pool);
        let mut buf = pool.get();
        let mut count = 0;
        for request in requests {
            trace!(connection_id = %self.id, %request, "encoding request");
            request.encode(&mut buf);
            count += 1;
        }
        if count == 0 {
            return Ok(());
        }

        debug!(connection_id = %self.id, count, bytes = buf.len(), "writing requests");
        let written = match self.stream.write_all(&buf).await {
            Ok(()) => self.stream.flush().await,
            Err(err) => Err(err),
        };
        written.map_err(|err| self.fail(err.into()))
    }

    /// Routes future push frames to `sink` instead of dropping them.
    pub fn set_push_sink(&mut self, sink: UnboundedSender<Frame>) {
        self.push_sink = Some(sink);
    }

    /// Attributes that preceded the last reply read, if any.
    pub fn last_attributes(&self) -> Option<&[(Frame, Frame)]> {
        self.attributes.as_deref()
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Marks the connection unusable. Every later operation fails with `Error::Poisoned`.
    pub fn poison(&mut self) {
        if !self.poisoned {
            warn!(connection_id = %self.id, "connection poisoned");
        }
        self.poisoned = true;
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    fn ensure_usable(&self) -> Result<(), Error> {
        if self.poisoned {
            return Err(Error::Poisoned);
        }
        Ok(())
    }

    fn fail(&mut self, err: Error) -> Error {
        if err.is_fatal() {
            debug!(connection_id = %self.id, %err, "fatal connection error");
            self.poison();
        }
        err
    }

    fn dispatch_push(&mut self, push: Frame) {
        let delivered = match &self.push_sink {
            Some(sink) => sink.send(push).is_ok(),
            None => false,
        };
        if !delivered {
            debug!(connection_id = %self.id, "discarding push frame");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame;
    use bytes::Bytes;
    use tokio::io::duplex;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn read_reply_skips_attributes_and_push() {
        let (client, mut server) = duplex(1024);
        let mut conn = Connection::new(client);
        let (tx, mut rx) = mpsc::unbounded_channel();
        conn.set_push_sink(tx);

        server
            .write_all(b">2\r\n+message\r\n+hi\r\n|1\r\n+ttl\r\n:10\r\n$3\r\nfoo\r\n")
            .await
            .unwrap();

        let reply = conn.read_reply().await.unwrap();

        assert_eq!(reply, Frame::Bulk(Bytes::from("foo")));
        assert_eq!(
            conn.last_attributes(),
            Some(&[(Frame::simple("ttl"), Frame::Integer(10))][..])
        );
        assert_eq!(
            rx.recv().await,
            Some(Frame::Push(vec![Frame::simple("message"), Frame::simple("hi")]))
        );
    }

    #[tokio::test]
    async fn attributes_are_cleared_for_next_reply() {
        let (client, mut server) = duplex(1024);
        let mut conn = Connection::new(client);

        server
            .write_all(b"|1\r\n+a\r\n+b\r\n:1\r\n:2\r\n")
            .await
            .unwrap();

        conn.read_reply().await.unwrap();
        assert!(conn.last_attributes().is_some());
        conn.read_reply().await.unwrap();
        assert!(conn.last_attributes().is_none());
    }

    #[tokio::test]
    async fn write_requests_batches() {
        let (client, mut server) = duplex(1024);
        let mut conn = Connection::new(client);

        let requests = [
            Request::new("set").arg("k").arg(1),
            Request::new("get").arg("k"),
        ];
        conn.write_requests(requests.iter()).await.unwrap();
        drop(conn);

        let mut sent = Vec::new();
        server.read_to_end(&mut sent).await.unwrap();
        assert_eq!(
            sent,
            b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\n1\r\n*2\r\n$3\r\nGET\r\n$1\r\nk\r\n"
        );
    }

    #[tokio::test]
    async fn eof_mid_frame_is_fatal() {
        let (client, mut server) = duplex(1024);
        let mut conn = Connection::new(client);

        server.write_all(b"$10\r\nhel").await.unwrap();
        drop(server);

        let err = conn.read_reply().await.unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
        assert!(conn.is_poisoned());
        assert!(matches!(conn.read_reply().await, Err(Error::Poisoned)));
    }

    #[tokio::test]
    async fn clean_eof_between_frames() {
        let (client, server) = duplex(1024);
        let mut conn = Connection::new(client);
        drop(server);

        assert_eq!(conn.read_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn protocol_error_poisons() {
        let (client, mut server) = duplex(1024);
        let mut conn = Connection::new(client);

        server.write_all(b"?bogus\r\n").await.unwrap();

        assert!(matches!(
            conn.read_reply().await,
            Err(Error::Protocol(frame::Error::InvalidDataType(b'?')))
        ));
        assert!(conn.is_poisoned());
    }

    #[tokio::test]
    async fn content_error_does_not_poison() {
        let (client, mut server) = duplex(1024);
        let mut conn = Connection::new(client);

        server.write_all(b"#maybe\r\n+OK\r\n").await.unwrap();

        assert!(matches!(
            conn.read_reply().await,
            Err(Error::Protocol(frame::Error::InvalidBoolean(_)))
        ));
        assert!(!conn.is_poisoned());
        assert_eq!(conn.read_reply().await.unwrap(), Frame::simple("OK"));
    }
}
