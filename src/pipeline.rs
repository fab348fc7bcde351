use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, instrument, trace};

use crate::client::Client;
use crate::connection::ByteStream;
use crate::context::Context;
use crate::convert::FromFrame;
use crate::data_type::DataType;
use crate::frame::{self, Frame};
use crate::request::Request;
use crate::Error;

const QUEUED: &str = "QUEUED";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Every request is written in one batch, then one reply is read per request.
    Plain,
    /// The batch is wrapped in `MULTI` / `EXEC` and runs atomically on the server.
    Transaction,
}

type Slot = Arc<Mutex<Result<Frame, Error>>>;

/// The handle to a queued command. Its result is filled in when the pipeline executes and stays
/// `Error::NotExecuted` if it never does.
#[derive(Clone)]
pub struct PendingCommand {
    request: Arc<Request>,
    slot: Slot,
}

impl PendingCommand {
    fn new(request: Request) -> Self {
        Self {
            request: Arc::new(request),
            slot: Arc::new(Mutex::new(Err(Error::NotExecuted))),
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn result(&self) -> Result<Frame, Error> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get<T: FromFrame>(&self) -> Result<T, Error> {
        T::from_frame(self.result()?)
    }

    pub fn is_executed(&self) -> bool {
        !matches!(
            *self.slot.lock().unwrap_or_else(PoisonError::into_inner),
            Err(Error::NotExecuted)
        )
    }

    fn set(&self, result: Result<Frame, Error>) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = result;
    }

    /// Stores a reply, checked against the type the request expects.
    fn resolve(&self, reply: Frame) {
        self.set(reply.into_result(self.request.expected()));
    }
}

impl fmt::Debug for PendingCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCommand")
            .field("request", &self.request.to_string())
            .field("result", &self.result())
            .finish()
    }
}

/// A batch of commands sent over one connection.
///
/// The pipeline holds the client mutably for its whole life, so no other command can interleave
/// with the batch.
pub struct Pipeline<'c, S> {
    client: &'c mut Client<S>,
    mode: Mode,
    queued: Vec<PendingCommand>,
}

impl<'c, S: ByteStream> Pipeline<'c, S> {
    pub(crate) fn new(client: &'c mut Client<S>, mode: Mode) -> Self {
        Self {
            client,
            mode,
            queued: Vec::new(),
        }
    }

    pub fn enqueue(&mut self, request: Request) -> PendingCommand {
        let pending = PendingCommand::new(request);
        self.queued.push(pending.clone());
        pending
    }

    pub fn len(&self) -> usize {
        self.queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Sends the queued commands and fills in their results.
    ///
    /// Failures confined to one reply (an error reply, an unexpected type, malformed content) are
    /// only stored in that command's result and `exec` still succeeds. A failure that stops the
    /// batch is returned and stored in every command it prevented from completing.
    #[instrument(
        name = "pipeline",
        skip_all,
        fields(connection_id = %self.client.connection().id, mode = ?self.mode, commands = self.queued.len())
    )]
    pub async fn exec(self, ctx: &Context) -> Result<(), Error> {
        if self.queued.is_empty() {
            return Ok(());
        }

        let Pipeline {
            client,
            mode,
            queued,
        } = self;

        if let Err(err) = ctx.check() {
            return Err(fail_from(&queued, 0, err));
        }
        if let Err(err) = client.ensure_session().await {
            return Err(fail_from(&queued, 0, err));
        }

        match mode {
            Mode::Plain => exec_plain(client, &queued).await,
            Mode::Transaction => exec_transaction(client, ctx, &queued).await,
        }
    }
}

async fn exec_plain<S: ByteStream>(
    client: &mut Client<S>,
    queued: &[PendingCommand],
) -> Result<(), Error> {
    let conn = client.connection_mut();

    let requests = queued.iter().map(|pending| pending.request());
    if let Err(err) = conn.write_requests(requests).await {
        return Err(fail_from(queued, 0, err));
    }

    for (i, pending) in queued.iter().enumerate() {
        match conn.read_reply().await {
            Ok(reply) => pending.resolve(reply),
            Err(err) if !err.is_fatal() => {
                debug!(index = i, %err, "reply failed");
                pending.set(Err(err));
            }
            Err(err) => return Err(fail_from(queued, i, err)),
        }
    }

    Ok(())
}

async fn exec_transaction<S: ByteStream>(
    client: &mut Client<S>,
    ctx: &Context,
    queued: &[PendingCommand],
) -> Result<(), Error> {
    let conn = client.connection_mut();

    let multi = Request::new("multi").reply_type(DataType::SimpleString);
    if let Err(err) = conn.write_request(&multi).await {
        return Err(fail_from(queued, 0, err));
    }
    match conn.read_reply().await {
        Ok(Frame::Simple(status)) if status == "OK" => {}
        Ok(reply) if !reply.is_error() => {
            debug!(?reply, "unexpected MULTI reply");
            conn.poison();
            return Err(fail_from(queued, 0, Error::UnexpectedAck(reply)));
        }
        reply => {
            // Error replies leave the server outside MULTI.
            let err = match reply.and_then(|r| r.into_result(multi.expected())) {
                Err(err) => err,
                Ok(reply) => Error::UnexpectedAck(reply),
            };
            return Err(fail_from(queued, 0, err));
        }
    }

    for (i, pending) in queued.iter().enumerate() {
        // The server is left inside MULTI if we stop here.
        if let Err(err) = ctx.check() {
            conn.poison();
            return Err(fail_from(queued, i, err));
        }

        if let Err(err) = conn.write_request(pending.request()).await {
            return Err(fail_from(queued, i, err));
        }
        match conn.read_reply().await {
            Ok(Frame::Simple(ack)) if ack == QUEUED => {
                trace!(index = i, "queued");
            }
            Ok(ack) => {
                debug!(index = i, ?ack, "unexpected acknowledgement");
                conn.poison();
                return Err(fail_from(queued, i, Error::UnexpectedAck(ack)));
            }
            Err(err) => {
                conn.poison();
                return Err(fail_from(queued, i, err));
            }
        }
    }

    if let Err(err) = ctx.check() {
        conn.poison();
        return Err(fail_from(queued, 0, err));
    }

    let exec = Request::new("exec").reply_type(DataType::Array);
    if let Err(err) = conn.write_request(&exec).await {
        return Err(fail_from(queued, 0, err));
    }
    let reply = match conn.read_reply().await {
        Ok(reply) => reply,
        Err(err) => return Err(fail_from(queued, 0, err)),
    };

    match reply {
        Frame::Array(replies) if replies.len() == queued.len() => {
            for (pending, reply) in queued.iter().zip(replies) {
                pending.resolve(reply);
            }
            Ok(())
        }
        Frame::Array(replies) => {
            let err = Error::Protocol(frame::Error::InvalidLength(format!(
                "EXEC replied with {} results for {} commands",
                replies.len(),
                queued.len()
            )));
            conn.poison();
            Err(fail_from(queued, 0, err))
        }
        Frame::Null => {
            debug!("transaction aborted by the server");
            Err(fail_from(queued, 0, Error::TransactionAborted))
        }
        reply => {
            let err = match reply.into_result(exec.expected()) {
                Err(err) => err,
                Ok(reply) => Error::UnexpectedType {
                    expected: DataType::Array,
                    actual: reply.data_type(),
                },
            };
            Err(fail_from(queued, 0, err))
        }
    }
}

/// Stores `err` in every command from `start` on and hands it back.
fn fail_from(queued: &[PendingCommand], start: usize, err: Error) -> Error {
    for pending in queued.iter().skip(start) {
        pending.set(Err(err.clone()));
    }
    err
}
