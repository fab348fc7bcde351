// Protocol specification: https://github.com/redis/redis-specifications/blob/master/protocol/RESP3.md

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::io::Cursor;
use std::mem;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error as ThisError;

use crate::data_type::DataType;

pub(crate) static CRLF: &[u8; 2] = b"\r\n";

pub const DEFAULT_MAX_PAYLOAD_LEN: usize = 512 * 1024 * 1024;

pub const DEFAULT_MAX_DEPTH: usize = 64;

#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum Error {
    #[error("not enough data is available to parse an entire frame")]
    Incomplete,
    #[error("invalid frame data type: {0:#04x}")]
    InvalidDataType(u8),
    #[error("invalid length: {0:?}")]
    InvalidLength(String),
    #[error("invalid frame terminator, expected CRLF")]
    InvalidTerminator,
    #[error("payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("line of {len} bytes exceeds the {max} byte limit")]
    LineTooLong { len: usize, max: usize },
    #[error("nesting depth {0} exceeds limit")]
    NestingTooDeep(usize),
    #[error("invalid integer: {0:?}")]
    InvalidInteger(String),
    #[error("invalid double: {0:?}")]
    InvalidDouble(String),
    #[error("invalid boolean: {0:?}")]
    InvalidBoolean(String),
    #[error("invalid big number: {0:?}")]
    InvalidBigNumber(String),
    #[error("invalid null: {0:?}")]
    InvalidNull(String),
    #[error("verbatim string is missing the encoding separator")]
    InvalidVerbatim,
    #[error("invalid UTF-8 string")]
    InvalidUtf8,
}

impl Error {
    /// After a framing error the stream is out of sync. Content errors skip one whole frame.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::InvalidInteger(_)
                | Error::InvalidDouble(_)
                | Error::InvalidBoolean(_)
                | Error::InvalidBigNumber(_)
                | Error::InvalidNull(_)
                | Error::InvalidVerbatim
                | Error::InvalidUtf8
        )
    }

    pub fn is_incomplete(&self) -> bool {
        matches!(self, Error::Incomplete)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecodeOptions {
    pub max_payload_len: usize,
    pub max_depth: usize,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// `$-1`, `*-1` and `_` all decode to `Frame::Null`.
#[derive(Clone, Debug)]
pub enum Frame {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    Array(Vec<Frame>),
    Null,
    Boolean(bool),
    Double(f64),
    BigNumber(String),
    BulkError(Bytes),
    Verbatim {
        encoding: String,
        data: Bytes,
    },
    Map(Vec<(Frame, Frame)>),
    Attribute(Vec<(Frame, Frame)>),
    Set(Vec<Frame>),
    Push(Vec<Frame>),
}

impl Frame {
    pub fn data_type(&self) -> DataType {
        match self {
            Frame::Simple(_) => DataType::SimpleString,
            Frame::Error(_) => DataType::SimpleError,
            Frame::Integer(_) => DataType::Integer,
            Frame::Bulk(_) => DataType::BulkString,
            Frame::Array(_) => DataType::Array,
            Frame::Null => DataType::Null,
            Frame::Boolean(_) => DataType::Boolean,
            Frame::Double(_) => DataType::Double,
            Frame::BigNumber(_) => DataType::BigNumber,
            Frame::BulkError(_) => DataType::BulkError,
            Frame::Verbatim { .. } => DataType::VerbatimString,
            Frame::Map(_) => DataType::Map,
            Frame::Attribute(_) => DataType::Attribute,
            Frame::Set(_) => DataType::Set,
            Frame::Push(_) => DataType::Push,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Frame::Null)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Frame::Error(_) | Frame::BulkError(_))
    }

    pub fn bulk(data: impl Into<Bytes>) -> Frame {
        Frame::Bulk(data.into())
    }

    pub fn simple(s: impl Into<String>) -> Frame {
        Frame::Simple(s.into())
    }

    pub fn verbatim(data: impl Into<Bytes>) -> Frame {
        Frame::Verbatim {
            encoding: String::from("txt"),
            data: data.into(),
        }
    }

    /// Walks one complete frame without building it, validating its framing and the configured
    /// limits. On success the cursor is positioned right after the frame.
    pub fn check(src: &mut Cursor<&[u8]>, options: &DecodeOptions) -> Result<(), Error> {
        check_at(src, options, 0)
    }

    pub fn parse(src: &mut Cursor<&[u8]>, options: &DecodeOptions) -> Result<Frame, Error> {
        parse_at(src, options, 0)
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            Frame::Simple(s) => put_line(dst, b'+', s.as_bytes()),
            Frame::Error(s) => put_line(dst, b'-', s.as_bytes()),
            Frame::Integer(i) => {
                dst.put_u8(b':');
                put_decimal(dst, *i);
                dst.put_slice(CRLF);
            }
            Frame::Bulk(data) => put_blob(dst, b'$', &[&data[..]]),
            Frame::Array(frames) => {
                put_header(dst, b'*', frames.len());
                frames.iter().for_each(|frame| frame.encode(dst));
            }
            Frame::Null => dst.put_slice(b"_\r\n"),
            Frame::Boolean(b) => dst.put_slice(if *b { b"#t\r\n" } else { b"#f\r\n" }),
            Frame::Double(d) => put_line(dst, b',', format_double(*d).as_bytes()),
            Frame::BigNumber(n) => put_line(dst, b'(', n.as_bytes()),
            Frame::BulkError(msg) => put_blob(dst, b'!', &[&msg[..]]),
            Frame::Verbatim { encoding, data } => {
                put_blob(dst, b'=', &[encoding.as_bytes(), &b":"[..], &data[..]])
            }
            Frame::Map(pairs) => put_pairs(dst, b'%', pairs),
            Frame::Attribute(pairs) => put_pairs(dst, b'|', pairs),
            Frame::Set(frames) => {
                put_header(dst, b'~', frames.len());
                frames.iter().for_each(|frame| frame.encode(dst));
            }
            Frame::Push(frames) => {
                put_header(dst, b'>', frames.len());
                frames.iter().for_each(|frame| frame.encode(dst));
            }
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut dst = BytesMut::new();
        self.encode(&mut dst);
        dst.to_vec()
    }
}

impl From<Frame> for Vec<u8> {
    fn from(frame: Frame) -> Self {
        frame.serialize()
    }
}

// Doubles compare by bit pattern so that `Frame` can be `Eq + Hash` and used as a map key.
impl PartialEq for Frame {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Frame::Simple(a), Frame::Simple(b)) => a == b,
            (Frame::Error(a), Frame::Error(b)) => a == b,
            (Frame::Integer(a), Frame::Integer(b)) => a == b,
            (Frame::Bulk(a), Frame::Bulk(b)) => a == b,
            (Frame::Array(a), Frame::Array(b)) => a == b,
            (Frame::Null, Frame::Null) => true,
            (Frame::Boolean(a), Frame::Boolean(b)) => a == b,
            (Frame::Double(a), Frame::Double(b)) => a.to_bits() == b.to_bits(),
            (Frame::BigNumber(a), Frame::BigNumber(b)) => a == b,
            (Frame::BulkError(a), Frame::BulkError(b)) => a == b,
            (
                Frame::Verbatim {
                    encoding: a_encoding,
                    data: a_data,
                },
                Frame::Verbatim {
                    encoding: b_encoding,
                    data: b_data,
                },
            ) => a_encoding == b_encoding && a_data == b_data,
            (Frame::Map(a), Frame::Map(b)) => a == b,
            (Frame::Attribute(a), Frame::Attribute(b)) => a == b,
            (Frame::Set(a), Frame::Set(b)) => a == b,
            (Frame::Push(a), Frame::Push(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Frame {}

impl Hash for Frame {
    fn hash<H: Hasher>(&self, state: &mut H) {
        mem::discriminant(self).hash(state);
        match self {
            Frame::Simple(s) | Frame::Error(s) | Frame::BigNumber(s) => s.hash(state),
            Frame::Integer(i) => i.hash(state),
            Frame::Bulk(data) | Frame::BulkError(data) => data.hash(state),
            Frame::Array(frames) | Frame::Set(frames) | Frame::Push(frames) => frames.hash(state),
            Frame::Null => {}
            Frame::Boolean(b) => b.hash(state),
            Frame::Double(d) => d.to_bits().hash(state),
            Frame::Verbatim { encoding, data } => {
                encoding.hash(state);
                data.hash(state);
            }
            Frame::Map(pairs) | Frame::Attribute(pairs) => pairs.hash(state),
        }
    }
}

// Renders frames the way redis-cli prints replies.
impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Simple(s) => write!(f, "{}", s),
            Frame::Error(s) => write!(f, "(error) {}", s),
            Frame::Integer(i) => write!(f, "(integer) {}", i),
            Frame::Bulk(data) => write!(f, "{:?}", String::from_utf8_lossy(data)),
            Frame::Null => write!(f, "(nil)"),
            Frame::Boolean(b) => write!(f, "({})", b),
            Frame::Double(d) => write!(f, "(double) {}", format_double(*d)),
            Frame::BigNumber(n) => write!(f, "(big number) {}", n),
            Frame::BulkError(msg) => write!(f, "(error) {}", String::from_utf8_lossy(msg)),
            Frame::Verbatim { data, .. } => write!(f, "{}", String::from_utf8_lossy(data)),
            Frame::Array(frames) | Frame::Set(frames) | Frame::Push(frames) => {
                if frames.is_empty() {
                    return write!(f, "(empty array)");
                }
                for (i, frame) in frames.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}) {}", i + 1, frame)?;
                }
                Ok(())
            }
            Frame::Map(pairs) | Frame::Attribute(pairs) => {
                if pairs.is_empty() {
                    return write!(f, "(empty hash)");
                }
                for (i, (key, value)) in pairs.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}# {} => {}", i + 1, key, value)?;
                }
                Ok(())
            }
        }
    }
}

fn check_at(src: &mut Cursor<&[u8]>, options: &DecodeOptions, depth: usize) -> Result<(), Error> {
    let data_type = DataType::try_from(get_byte(src)?)?;

    match data_type {
        DataType::SimpleString
        | DataType::SimpleError
        | DataType::Integer
        | DataType::Null
        | DataType::Boolean
        | DataType::Double
        | DataType::BigNumber => {
            get_line(src, options.max_payload_len)?;
            Ok(())
        }
        DataType::BulkString | DataType::BulkError | DataType::VerbatimString => {
            get_payload(src, options)?;
            Ok(())
        }
        DataType::Array | DataType::Set | DataType::Push => {
            if let Some(count) = get_count(src, depth, options)? {
                for _ in 0..count {
                    check_at(src, options, depth + 1)?;
                }
            }
            Ok(())
        }
        DataType::Map | DataType::Attribute => {
            if let Some(count) = get_count(src, depth, options)? {
                for _ in 0..count {
                    check_at(src, options, depth + 1)?;
                    check_at(src, options, depth + 1)?;
                }
            }
            Ok(())
        }
        DataType::Any => unreachable!("`Any` has no wire representation"),
    }
}

fn parse_at(src: &mut Cursor<&[u8]>, options: &DecodeOptions, depth: usize) -> Result<Frame, Error> {
    let data_type = DataType::try_from(get_byte(src)?)?;

    match data_type {
        // +<string>\r\n
        DataType::SimpleString => {
            let line = get_line(src, options.max_payload_len)?;
            Ok(Frame::Simple(utf8(line)?))
        }
        // -<error>\r\n
        DataType::SimpleError => {
            let line = get_line(src, options.max_payload_len)?;
            Ok(Frame::Error(utf8(line)?))
        }
        // :[<+|->]<value>\r\n
        DataType::Integer => {
            let line = get_line(src, options.max_payload_len)?;
            parse_decimal(line)
                .map(Frame::Integer)
                .ok_or_else(|| Error::InvalidInteger(lossy(line)))
        }
        // _\r\n
        DataType::Null => {
            let line = get_line(src, options.max_payload_len)?;
            if !line.is_empty() {
                return Err(Error::InvalidNull(lossy(line)));
            }
            Ok(Frame::Null)
        }
        // #<t|f>\r\n
        DataType::Boolean => match get_line(src, options.max_payload_len)? {
            b"t" => Ok(Frame::Boolean(true)),
            b"f" => Ok(Frame::Boolean(false)),
            line => Err(Error::InvalidBoolean(lossy(line))),
        },
        // ,[<+|->]<integral>[.<fractional>][<E|e>[sign]<exponent>]\r\n
        DataType::Double => {
            let line = get_line(src, options.max_payload_len)?;
            std::str::from_utf8(line)
                .ok()
                .and_then(|s| s.parse::<f64>().ok())
                .map(Frame::Double)
                .ok_or_else(|| Error::InvalidDouble(lossy(line)))
        }
        // ([+|-]<number>\r\n
        DataType::BigNumber => {
            let line = get_line(src, options.max_payload_len)?;
            let digits = line.strip_prefix(b"-").or(line.strip_prefix(b"+")).unwrap_or(line);
            if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
                return Err(Error::InvalidBigNumber(lossy(line)));
            }
            Ok(Frame::BigNumber(lossy(line)))
        }
        // $<length>\r\n<data>\r\n
        DataType::BulkString => match get_payload(src, options)? {
            Some(data) => Ok(Frame::Bulk(Bytes::copy_from_slice(data))),
            None => Ok(Frame::Null),
        },
        // !<length>\r\n<error>\r\n
        DataType::BulkError => match get_payload(src, options)? {
            Some(data) => Ok(Frame::BulkError(Bytes::copy_from_slice(data))),
            // NOTE: the protocol does not specify a way to represent a null bulk error
            None => Ok(Frame::Null),
        },
        // =<length>\r\n<encoding>:<data>\r\n
        DataType::VerbatimString => match get_payload(src, options)? {
            Some(payload) => {
                let separator = payload
                    .iter()
                    .position(|b| *b == b':')
                    .ok_or(Error::InvalidVerbatim)?;
                let encoding = utf8(&payload[..separator])?;
                let data = Bytes::copy_from_slice(&payload[separator + 1..]);
                Ok(Frame::Verbatim { encoding, data })
            }
            None => Ok(Frame::Null),
        },
        // *<number-of-elements>\r\n<element-1>...<element-n>
        DataType::Array | DataType::Set | DataType::Push => {
            let count = match get_count(src, depth, options)? {
                Some(count) => count,
                None => return Ok(Frame::Null),
            };

            // Every element takes at least three bytes, so a count larger than what is buffered
            // can never complete and must not drive the allocation.
            let mut frames = Vec::with_capacity(count.min(src.remaining()));
            for _ in 0..count {
                // Null members are kept so positions line up with the request.
                frames.push(parse_at(src, options, depth + 1)?);
            }

            Ok(match data_type {
                DataType::Array => Frame::Array(frames),
                DataType::Set => Frame::Set(frames),
                _ => Frame::Push(frames),
            })
        }
        // %<number-of-entries>\r\n<key-1><value-1>...<key-n><value-n>
        DataType::Map | DataType::Attribute => {
            let count = match get_count(src, depth, options)? {
                Some(count) => count,
                None => return Ok(Frame::Null),
            };

            let capacity = count.min(src.remaining());
            let mut pairs: Vec<(Frame, Frame)> = Vec::with_capacity(capacity);
            let mut positions: HashMap<Frame, usize> = HashMap::with_capacity(capacity);
            for _ in 0..count {
                let key = parse_at(src, options, depth + 1)?;
                let value = parse_at(src, options, depth + 1)?;
                match positions.get(&key) {
                    Some(&position) => pairs[position].1 = value,
                    None => {
                        positions.insert(key.clone(), pairs.len());
                        pairs.push((key, value));
                    }
                }
            }

            Ok(match data_type {
                DataType::Map => Frame::Map(pairs),
                _ => Frame::Attribute(pairs),
            })
        }
        DataType::Any => unreachable!("`Any` has no wire representation"),
    }
}

fn get_byte(src: &mut Cursor<&[u8]>) -> Result<u8, Error> {
    if !src.has_remaining() {
        return Err(Error::Incomplete);
    }
    Ok(src.get_u8())
}

/// A line longer than `max` fails whether or not its CRLF has arrived yet.
fn get_line<'a>(src: &mut Cursor<&'a [u8]>, max: usize) -> Result<&'a [u8], Error> {
    let start = src.position() as usize;
    let buf: &'a [u8] = *src.get_ref();

    let end = buf[start..]
        .windows(2)
        .position(|window| window == CRLF)
        .map(|index| start + index);

    let len = end.unwrap_or(buf.len()) - start;
    if len > max {
        return Err(Error::LineTooLong { len, max });
    }
    let end = end.ok_or(Error::Incomplete)?;

    src.set_position((end + CRLF.len()) as u64);

    Ok(&buf[start..end])
}

/// Reads a length or count prefix. `-1` is the null marker and yields `None`.
fn get_length(src: &mut Cursor<&[u8]>, max: usize) -> Result<Option<usize>, Error> {
    let line = get_line(src, max)?;
    match parse_decimal(line) {
        Some(-1) => Ok(None),
        Some(length) if length >= 0 => {
            usize::try_from(length).map(Some).map_err(|_| Error::InvalidLength(lossy(line)))
        }
        _ => Err(Error::InvalidLength(lossy(line))),
    }
}

fn get_count(
    src: &mut Cursor<&[u8]>,
    depth: usize,
    options: &DecodeOptions,
) -> Result<Option<usize>, Error> {
    if depth >= options.max_depth {
        return Err(Error::NestingTooDeep(depth + 1));
    }
    get_length(src, options.max_payload_len)
}

/// The declared length is checked before waiting for the payload.
fn get_payload<'a>(
    src: &mut Cursor<&'a [u8]>,
    options: &DecodeOptions,
) -> Result<Option<&'a [u8]>, Error> {
    let len = match get_length(src, options.max_payload_len)? {
        Some(len) => len,
        None => return Ok(None),
    };

    if len > options.max_payload_len {
        return Err(Error::PayloadTooLarge {
            len,
            max: options.max_payload_len,
        });
    }

    let start = src.position() as usize;
    let buf: &'a [u8] = *src.get_ref();
    if buf.len() - start < len + CRLF.len() {
        return Err(Error::Incomplete);
    }
    if &buf[start + len..start + len + CRLF.len()] != CRLF {
        return Err(Error::InvalidTerminator);
    }

    src.set_position((start + len + CRLF.len()) as u64);

    Ok(Some(&buf[start..start + len]))
}

fn parse_decimal(line: &[u8]) -> Option<i64> {
    std::str::from_utf8(line).ok()?.parse::<i64>().ok()
}

fn utf8(bytes: &[u8]) -> Result<String, Error> {
    String::from_utf8(bytes.to_vec()).map_err(|_| Error::InvalidUtf8)
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn format_double(d: f64) -> String {
    if d.is_nan() {
        String::from("nan")
    } else if d.is_infinite() {
        String::from(if d > 0.0 { "inf" } else { "-inf" })
    } else {
        // Shortest representation that parses back to the same value.
        d.to_string()
    }
}

pub(crate) fn put_decimal(dst: &mut BytesMut, n: i64) {
    let mut buf = [0u8; 20];
    let mut pos = buf.len();
    let mut value = n.unsigned_abs();
    loop {
        pos -= 1;
        buf[pos] = b'0' + (value % 10) as u8;
        value /= 10;
        if value == 0 {
            break;
        }
    }
    if n < 0 {
        dst.put_u8(b'-');
    }
    dst.put_slice(&buf[pos..]);
}

pub(crate) fn put_header(dst: &mut BytesMut, tag: u8, len: usize) {
    dst.put_u8(tag);
    put_decimal(dst, len as i64);
    dst.put_slice(CRLF);
}

fn put_line(dst: &mut BytesMut, tag: u8, line: &[u8]) {
    dst.put_u8(tag);
    dst.put_slice(line);
    dst.put_slice(CRLF);
}

fn put_blob(dst: &mut BytesMut, tag: u8, parts: &[&[u8]]) {
    let len = parts.iter().map(|part| part.len()).sum();
    put_header(dst, tag, len);
    parts.iter().for_each(|part| dst.put_slice(part));
    dst.put_slice(CRLF);
}

fn put_pairs(dst: &mut BytesMut, tag: u8, pairs: &[(Frame, Frame)]) {
    put_header(dst, tag, pairs.len());
    for (key, value) in pairs {
        key.encode(dst);
        value.encode(dst);
    }
}
