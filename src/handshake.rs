use futures::future::BoxFuture;
use futures::FutureExt;
use thiserror::Error as ThisError;
use tracing::{debug, instrument};

use crate::config::{Options, DEFAULT_PROTOCOL, DEFAULT_USERNAME};
use crate::connection::{ByteStream, Connection};
use crate::convert::FromFrame;
use crate::data_type::DataType;
use crate::frame::Frame;
use crate::request::Request;
use crate::Error;

/// What the server reported about itself when the session was negotiated.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Session {
    pub server: String,
    pub version: String,
    pub proto: i64,
    pub id: i64,
    pub mode: String,
    pub role: String,
    pub modules: Vec<Module>,
}

/// A server extension module, e.g. `bf` or `timeseries`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Module {
    pub name: String,
    pub version: i64,
}

impl TryFrom<Frame> for Session {
    type Error = Error;

    fn try_from(frame: Frame) -> Result<Self, Self::Error> {
        let pairs = match frame {
            Frame::Map(pairs) => pairs,
            frame => {
                return Err(Error::UnexpectedType {
                    expected: DataType::Map,
                    actual: frame.data_type(),
                })
            }
        };

        let mut session = Session::default();
        let mut proto = None;
        for (key, value) in pairs {
            match String::from_frame(key)?.as_str() {
                "server" => session.server = String::from_frame(value)?,
                "version" => session.version = String::from_frame(value)?,
                "proto" => proto = Some(i64::from_frame(value)?),
                "id" => session.id = i64::from_frame(value)?,
                "mode" => session.mode = String::from_frame(value)?,
                "role" => session.role = String::from_frame(value)?,
                "modules" => {
                    session.modules = Vec::<Frame>::from_frame(value)?
                        .into_iter()
                        .map(Module::try_from)
                        .collect::<Result<_, _>>()?
                }
                _ => {}
            }
        }

        session.proto = proto.ok_or_else(|| {
            Error::Conversion(String::from("handshake reply is missing the protocol version"))
        })?;

        Ok(session)
    }
}

impl TryFrom<Frame> for Module {
    type Error = Error;

    fn try_from(frame: Frame) -> Result<Self, Self::Error> {
        let mut module = Module::default();
        for (key, value) in Vec::<(String, Frame)>::from_frame(frame)? {
            match key.as_str() {
                "name" => module.name = String::from_frame(value)?,
                "ver" => module.version = i64::from_frame(value)?,
                _ => {}
            }
        }
        Ok(module)
    }
}

/// A failed handshake. When only the database selection failed, the negotiated session is kept
/// for diagnostics.
#[derive(Clone, Debug, ThisError)]
#[error("{source}")]
pub struct HandshakeError {
    pub session: Option<Session>,
    pub source: Error,
}

impl HandshakeError {
    fn greeting(source: Error) -> Self {
        Self {
            session: None,
            source,
        }
    }
}

/// Negotiates a session on a fresh connection before any command is sent.
///
/// The strategy is handed to the client explicitly, so transports and tests can substitute their
/// own.
pub trait Handshake<S>: Send + Sync {
    fn handshake<'a>(
        &'a self,
        conn: &'a mut Connection<S>,
    ) -> BoxFuture<'a, Result<Session, HandshakeError>>;
}

/// `HELLO <proto> [AUTH <user> <password>] [SETNAME <name>]`, followed by `SELECT <db>` when a
/// database other than 0 is requested.
#[derive(Clone, Debug)]
pub struct Hello {
    pub protocol: u8,
    pub username: String,
    pub password: Option<String>,
    pub client_name: Option<String>,
    pub database: u32,
}

impl Default for Hello {
    fn default() -> Self {
        Self {
            protocol: DEFAULT_PROTOCOL,
            username: String::from(DEFAULT_USERNAME),
            password: None,
            client_name: None,
            database: 0,
        }
    }
}

impl From<&Options> for Hello {
    fn from(options: &Options) -> Self {
        Self {
            protocol: options.protocol,
            username: options.username.clone(),
            password: options.password.clone(),
            client_name: options.client_name.clone(),
            database: options.database,
        }
    }
}

impl Hello {
    pub fn request(&self) -> Request {
        let mut request = Request::new("hello")
            .arg(self.protocol)
            .reply_type(DataType::Map);
        let username = if self.username.is_empty() {
            DEFAULT_USERNAME
        } else {
            self.username.as_str()
        };
        // A named user without a password still authenticates, with an empty password.
        if self.password.is_some() || username != DEFAULT_USERNAME {
            let password = self.password.as_deref().unwrap_or_default();
            request = request.arg("AUTH").arg(username).arg(password);
        }
        if let Some(name) = &self.client_name {
            request = request.arg("SETNAME").arg(name.as_str());
        }
        request
    }

    #[instrument(name = "handshake", skip_all, fields(connection_id = %conn.id))]
    async fn negotiate<S: ByteStream>(
        &self,
        conn: &mut Connection<S>,
    ) -> Result<Session, HandshakeError> {
        let request = self.request();
        let session = round_trip(conn, &request)
            .await
            .and_then(Session::try_from)
            .map_err(HandshakeError::greeting)?;

        if session.proto != i64::from(self.protocol) {
            return Err(HandshakeError::greeting(Error::Conversion(format!(
                "server negotiated protocol {} instead of {}",
                session.proto, self.protocol
            ))));
        }

        debug!(
            server = %session.server,
            version = %session.version,
            role = %session.role,
            modules = session.modules.len(),
            "session negotiated"
        );

        if self.database != 0 {
            let select = Request::new("select")
                .arg(self.database)
                .reply_type(DataType::SimpleString);
            let selected = round_trip(conn, &select).await.and_then(|reply| match reply {
                Frame::Simple(status) if status == "OK" => Ok(()),
                reply => Err(Error::Conversion(format!(
                    "SELECT {} replied {:?} instead of OK",
                    self.database, reply
                ))),
            });
            if let Err(source) = selected {
                return Err(HandshakeError {
                    session: Some(session),
                    source,
                });
            }
            debug!(database = self.database, "database selected");
        }

        Ok(session)
    }
}

impl<S: ByteStream> Handshake<S> for Hello {
    fn handshake<'a>(
        &'a self,
        conn: &'a mut Connection<S>,
    ) -> BoxFuture<'a, Result<Session, HandshakeError>> {
        self.negotiate(conn).boxed()
    }
}

/// Skips negotiation, for servers or proxies that speak RESP3 without `HELLO`.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoHandshake;

impl<S: ByteStream> Handshake<S> for NoHandshake {
    fn handshake<'a>(
        &'a self,
        _conn: &'a mut Connection<S>,
    ) -> BoxFuture<'a, Result<Session, HandshakeError>> {
        futures::future::ready(Ok(Session::default())).boxed()
    }
}

async fn round_trip<S: ByteStream>(
    conn: &mut Connection<S>,
    request: &Request,
) -> Result<Frame, Error> {
    conn.write_request(request).await?;
    conn.read_reply().await?.into_result(request.expected())
}
