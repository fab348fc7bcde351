use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, instrument};

use crate::codec::FrameCodec;
use crate::config::Options;
use crate::connection::{ByteStream, Connection};
use crate::context::Context;
use crate::convert::FromFrame;
use crate::frame::Frame;
use crate::handshake::{Handshake, Hello, Session};
use crate::pipeline::{Mode, Pipeline};
use crate::pool::BufferPool;
use crate::request::Request;
use crate::Error;

/// A client bound to one connection.
///
/// The session is negotiated once, on the first command or eagerly by `connect`, and cached for
/// the life of the connection.
pub struct Client<S> {
    conn: Connection<S>,
    handshake: Box<dyn Handshake<S>>,
    session: Option<Session>,
}

impl<S: ByteStream> Client<S> {
    /// Wraps a connection without talking to the server yet.
    pub fn new(conn: Connection<S>, handshake: Box<dyn Handshake<S>>) -> Self {
        Self {
            conn,
            handshake,
            session: None,
        }
    }

    /// Negotiates a session on `stream` with `HELLO`. No client is returned if that fails.
    pub async fn connect(stream: S, options: &Options) -> Result<Self, Error> {
        Client::connect_with_pool(stream, options, Arc::new(BufferPool::default())).await
    }

    /// Like `connect`, encoding requests with buffers from a pool shared with other clients.
    pub async fn connect_with_pool(
        stream: S,
        options: &Options,
        pool: Arc<BufferPool>,
    ) -> Result<Self, Error> {
        let conn = Connection::with_options(stream, FrameCodec::new(options.decode), pool);
        let mut client = Client::new(conn, Box::new(Hello::from(options)));
        client.ensure_session().await?;
        Ok(client)
    }

    /// The negotiated session, once there is one.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Sends one command and returns its reply, checked against the request's reply type.
    ///
    /// A null reply is returned as `Frame::Null`; use [`Client::query`] to get `Error::Nil`.
    #[instrument(skip_all, fields(command = %request.name()))]
    pub async fn dispatch(&mut self, ctx: &Context, request: Request) -> Result<Frame, Error> {
        let mut pipeline = self.pipeline();
        let pending = pipeline.enqueue(request);
        pipeline.exec(ctx).await?;
        pending.result()
    }

    /// Sends one command and converts its reply.
    pub async fn query<T: FromFrame>(&mut self, ctx: &Context, request: Request) -> Result<T, Error> {
        T::from_frame(self.dispatch(ctx, request).await?)
    }

    pub fn pipeline(&mut self) -> Pipeline<'_, S> {
        Pipeline::new(self, Mode::Plain)
    }

    /// A pipeline wrapped in `MULTI` / `EXEC`.
    pub fn transaction(&mut self) -> Pipeline<'_, S> {
        Pipeline::new(self, Mode::Transaction)
    }

    /// True once the connection hit an error after which it must be discarded.
    pub fn is_poisoned(&self) -> bool {
        self.conn.is_poisoned()
    }

    pub fn set_push_sink(&mut self, sink: UnboundedSender<Frame>) {
        self.conn.set_push_sink(sink);
    }

    pub fn last_attributes(&self) -> Option<&[(Frame, Frame)]> {
        self.conn.last_attributes()
    }

    pub fn connection(&self) -> &Connection<S> {
        &self.conn
    }

    pub(crate) fn connection_mut(&mut self) -> &mut Connection<S> {
        &mut self.conn
    }

    pub(crate) async fn ensure_session(&mut self) -> Result<(), Error> {
        if self.session.is_some() {
            return Ok(());
        }

        match self.handshake.handshake(&mut self.conn).await {
            Ok(session) => {
                debug!(connection_id = %self.conn.id, proto = session.proto, "handshake complete");
                self.session = Some(session);
                Ok(())
            }
            Err(err) => {
                self.conn.poison();
                Err(err.into())
            }
        }
    }
}
