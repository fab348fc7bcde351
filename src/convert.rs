use std::collections::HashMap;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::str;

use bytes::Bytes;
use itertools::Itertools;
use num_traits::NumCast;

use crate::data_type::DataType;
use crate::error::ServerError;
use crate::frame::Frame;
use crate::Error;

/// Typed extraction from a reply.
///
/// Error replies become `Error::Server` and the null reply becomes `Error::Nil`, except for
/// `Option<T>` (null is `None`) and `Frame` itself (null is `Frame::Null`).
pub trait FromFrame: Sized {
    fn from_frame(frame: Frame) -> Result<Self, Error>;
}

impl Frame {
    /// Routes a reply into the value or error channel given the type the caller asked for.
    ///
    /// Error replies are errors unless an error type was expected. Null always passes, so the
    /// caller can tell "not found" apart from a type mismatch.
    pub fn into_result(self, expected: DataType) -> Result<Frame, Error> {
        match self {
            Frame::Error(message) if !expected.is_error() => {
                Err(Error::Server(ServerError::new(message)))
            }
            Frame::BulkError(message) if !expected.is_error() => Err(Error::Server(
                ServerError::new(String::from_utf8_lossy(&message)),
            )),
            frame if frame.is_null() || expected.equal(frame.data_type()) => Ok(frame),
            frame => Err(Error::UnexpectedType {
                expected,
                actual: frame.data_type(),
            }),
        }
    }

    pub fn convert<T: FromFrame>(self) -> Result<T, Error> {
        T::from_frame(self)
    }
}

/// The error for a frame that the requested type cannot be built from.
fn reject(frame: Frame, expected: DataType) -> Error {
    match frame.into_result(expected) {
        Err(err) => err,
        Ok(Frame::Null) => Error::Nil,
        Ok(frame) => Error::UnexpectedType {
            expected,
            actual: frame.data_type(),
        },
    }
}

fn text(frame: &Frame) -> Option<&str> {
    match frame {
        Frame::Simple(s) | Frame::BigNumber(s) => Some(s),
        Frame::Bulk(data) | Frame::Verbatim { data, .. } => str::from_utf8(data).ok(),
        _ => None,
    }
}

fn out_of_range(value: impl fmt::Display, target: &str) -> Error {
    Error::Conversion(format!("{value} is out of range for {target}"))
}

fn parse_text<T: str::FromStr>(s: &str, target: &str) -> Result<T, Error> {
    s.parse()
        .map_err(|_| Error::Conversion(format!("{s:?} is not a valid {target}")))
}

impl FromFrame for Frame {
    fn from_frame(frame: Frame) -> Result<Self, Error> {
        frame.into_result(DataType::Any)
    }
}

impl FromFrame for () {
    fn from_frame(frame: Frame) -> Result<Self, Error> {
        frame.into_result(DataType::Any).map(|_| ())
    }
}

impl FromFrame for bool {
    fn from_frame(frame: Frame) -> Result<Self, Error> {
        match frame {
            Frame::Boolean(b) => Ok(b),
            Frame::Integer(n) => Ok(n != 0),
            Frame::Simple(ref s) if s == "OK" => Ok(true),
            ref frame @ (Frame::Simple(_) | Frame::Bulk(_)) => match text(frame) {
                Some("1") => Ok(true),
                Some("0") => Ok(false),
                _ => Err(Error::Conversion(format!("{frame:?} is not a boolean"))),
            },
            frame => Err(reject(frame, DataType::Boolean)),
        }
    }
}

macro_rules! impl_from_frame_for_integer {
    ($($t:ty),*) => {
        $(
            impl FromFrame for $t {
                fn from_frame(frame: Frame) -> Result<Self, Error> {
                    match frame {
                        Frame::Integer(n) => <$t as NumCast>::from(n)
                            .ok_or_else(|| out_of_range(n, stringify!($t))),
                        Frame::Double(d) if d.fract() == 0.0 => <$t as NumCast>::from(d)
                            .ok_or_else(|| out_of_range(d, stringify!($t))),
                        Frame::Simple(_) | Frame::Bulk(_) | Frame::BigNumber(_) => match text(&frame) {
                            Some(s) => parse_text(s, stringify!($t)),
                            None => Err(Error::Conversion(String::from("integer reply is not utf-8"))),
                        },
                        frame => Err(reject(frame, DataType::Integer)),
                    }
                }
            }
        )*
    };
}

impl_from_frame_for_integer!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);

macro_rules! impl_from_frame_for_float {
    ($($t:ty),*) => {
        $(
            impl FromFrame for $t {
                fn from_frame(frame: Frame) -> Result<Self, Error> {
                    match frame {
                        Frame::Double(d) => Ok(d as $t),
                        Frame::Integer(n) => Ok(n as $t),
                        Frame::Simple(_) | Frame::Bulk(_) | Frame::BigNumber(_) => match text(&frame) {
                            Some(s) => parse_text(s, stringify!($t)),
                            None => Err(Error::Conversion(String::from("double reply is not utf-8"))),
                        },
                        frame => Err(reject(frame, DataType::Double)),
                    }
                }
            }
        )*
    };
}

impl_from_frame_for_float!(f32, f64);

impl FromFrame for String {
    fn from_frame(frame: Frame) -> Result<Self, Error> {
        match frame {
            Frame::Simple(s) | Frame::BigNumber(s) => Ok(s),
            Frame::Bulk(data) | Frame::Verbatim { data, .. } => String::from_utf8(data.to_vec())
                .map_err(|_| Error::Conversion(String::from("string reply is not utf-8"))),
            Frame::Integer(n) => Ok(n.to_string()),
            Frame::Double(d) => Ok(d.to_string()),
            frame => Err(reject(frame, DataType::BulkString)),
        }
    }
}

impl FromFrame for Bytes {
    fn from_frame(frame: Frame) -> Result<Self, Error> {
        match frame {
            Frame::Bulk(data) | Frame::Verbatim { data, .. } => Ok(data),
            Frame::Simple(s) | Frame::BigNumber(s) => Ok(Bytes::from(s)),
            frame => Err(reject(frame, DataType::BulkString)),
        }
    }
}

impl<T: FromFrame> FromFrame for Option<T> {
    fn from_frame(frame: Frame) -> Result<Self, Error> {
        match frame {
            Frame::Null => Ok(None),
            frame => T::from_frame(frame).map(Some),
        }
    }
}

/// Array-like replies convert element-wise. A map converts entry by entry, each entry presented
/// as a two element array, so `Vec<(K, V)>` keeps the wire order of a map reply.
impl<T: FromFrame> FromFrame for Vec<T> {
    fn from_frame(frame: Frame) -> Result<Self, Error> {
        match frame {
            Frame::Array(items) | Frame::Set(items) | Frame::Push(items) => {
                items.into_iter().map(T::from_frame).collect()
            }
            Frame::Map(pairs) | Frame::Attribute(pairs) => pairs
                .into_iter()
                .map(|(key, value)| T::from_frame(Frame::Array(vec![key, value])))
                .collect(),
            frame => Err(reject(frame, DataType::Array)),
        }
    }
}

/// Accepts a map reply, or the flat `[k1, v1, k2, v2, ...]` array RESP2-era commands reply with.
impl<K, V, H> FromFrame for HashMap<K, V, H>
where
    K: FromFrame + Eq + Hash,
    V: FromFrame,
    H: BuildHasher + Default,
{
    fn from_frame(frame: Frame) -> Result<Self, Error> {
        let pairs = match frame {
            Frame::Map(pairs) | Frame::Attribute(pairs) => pairs,
            Frame::Array(items) | Frame::Set(items) => {
                if items.len() % 2 != 0 {
                    return Err(Error::Conversion(format!(
                        "cannot pair an array of {} elements into a map",
                        items.len()
                    )));
                }
                items.into_iter().tuples().collect()
            }
            frame => return Err(reject(frame, DataType::Map)),
        };

        pairs
            .into_iter()
            .map(|(key, value)| Ok((K::from_frame(key)?, V::from_frame(value)?)))
            .collect()
    }
}

impl<A: FromFrame, B: FromFrame> FromFrame for (A, B) {
    fn from_frame(frame: Frame) -> Result<Self, Error> {
        match frame {
            Frame::Array(items) | Frame::Set(items) if items.len() == 2 => {
                let mut items = items.into_iter();
                match (items.next(), items.next()) {
                    (Some(a), Some(b)) => Ok((A::from_frame(a)?, B::from_frame(b)?)),
                    _ => Err(Error::Conversion(String::from("expected a pair"))),
                }
            }
            Frame::Array(items) | Frame::Set(items) => Err(Error::Conversion(format!(
                "expected a pair, got {} elements",
                items.len()
            ))),
            frame => Err(reject(frame, DataType::Array)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_frames_go_to_the_error_channel() {
        let err = Frame::Error(String::from("WRONGTYPE Operation against a key"))
            .into_result(DataType::BulkString)
            .unwrap_err();
        assert_eq!(err.server_error().map(|e| e.kind()), Some("WRONGTYPE"));

        let err = Frame::BulkError(Bytes::from("SYNTAX invalid"))
            .into_result(DataType::Array)
            .unwrap_err();
        assert_eq!(err.to_string(), "SYNTAX invalid");

        // An error reply is a value when an error was asked for.
        assert_eq!(
            Frame::Error(String::from("ERR x")).into_result(DataType::BulkError),
            Ok(Frame::Error(String::from("ERR x")))
        );
    }

    #[test]
    fn into_result_checks_compatibility_groups() {
        assert!(Frame::simple("OK").into_result(DataType::BulkString).is_ok());
        assert!(Frame::Set(vec![]).into_result(DataType::Array).is_ok());
        assert!(Frame::Null.into_result(DataType::Integer).is_ok());
        assert!(matches!(
            Frame::Integer(1).into_result(DataType::BulkString),
            Err(Error::UnexpectedType {
                expected: DataType::BulkString,
                actual: DataType::Integer
            })
        ));
    }

    #[test]
    fn null_bulk_is_nil_for_string() {
        assert!(String::from_frame(Frame::Null).unwrap_err().is_nil());
        assert_eq!(Option::<String>::from_frame(Frame::Null).unwrap(), None);
        assert_eq!(String::from_frame(Frame::bulk("")).unwrap(), "");
    }

    #[test]
    fn integers() {
        assert_eq!(i64::from_frame(Frame::Integer(-7)).unwrap(), -7);
        assert_eq!(u16::from_frame(Frame::bulk("65535")).unwrap(), 65535);
        assert!(u128::from_frame(Frame::BigNumber(String::from(
            "3492890328409238509324850943850943825024385"
        )))
        .is_err());
        assert_eq!(
            i128::from_frame(Frame::BigNumber(String::from("-170141183460469231731687303715884105728")))
                .unwrap(),
            i128::MIN
        );
        assert_eq!(i32::from_frame(Frame::Double(3.0)).unwrap(), 3);
        assert!(matches!(
            u8::from_frame(Frame::Integer(256)),
            Err(Error::Conversion(_))
        ));
        assert!(matches!(
            u32::from_frame(Frame::Integer(-1)),
            Err(Error::Conversion(_))
        ));
        assert!(matches!(
            i64::from_frame(Frame::Array(vec![])),
            Err(Error::UnexpectedType { .. })
        ));
        assert!(i64::from_frame(Frame::Null).unwrap_err().is_nil());
    }

    #[test]
    fn floats() {
        assert_eq!(f64::from_frame(Frame::Double(1.5)).unwrap(), 1.5);
        assert_eq!(f64::from_frame(Frame::bulk("3.25")).unwrap(), 3.25);
        assert_eq!(f64::from_frame(Frame::Integer(2)).unwrap(), 2.0);
        assert!(f64::from_frame(Frame::bulk("inf")).unwrap().is_infinite());
        assert!(matches!(
            f32::from_frame(Frame::bulk("abc")),
            Err(Error::Conversion(_))
        ));
    }

    #[test]
    fn booleans() {
        assert!(bool::from_frame(Frame::Boolean(true)).unwrap());
        assert!(!bool::from_frame(Frame::Integer(0)).unwrap());
        assert!(bool::from_frame(Frame::simple("OK")).unwrap());
        assert!(bool::from_frame(Frame::bulk("1")).unwrap());
        assert!(bool::from_frame(Frame::bulk("yes")).is_err());
    }

    #[test]
    fn strings_and_bytes() {
        assert_eq!(String::from_frame(Frame::simple("PONG")).unwrap(), "PONG");
        assert_eq!(
            String::from_frame(Frame::verbatim("hello")).unwrap(),
            "hello"
        );
        assert_eq!(String::from_frame(Frame::Integer(12)).unwrap(), "12");
        assert!(matches!(
            String::from_frame(Frame::Bulk(Bytes::from_static(&[0xff, 0xfe]))),
            Err(Error::Conversion(_))
        ));
        assert_eq!(
            Bytes::from_frame(Frame::Bulk(Bytes::from_static(&[0xff, 0xfe]))).unwrap(),
            Bytes::from_static(&[0xff, 0xfe])
        );
    }

    #[test]
    fn vectors_keep_null_members() {
        let frame = Frame::Array(vec![Frame::bulk("a"), Frame::Null, Frame::bulk("c")]);

        assert_eq!(
            Vec::<Option<String>>::from_frame(frame.clone()).unwrap(),
            vec![Some(String::from("a")), None, Some(String::from("c"))]
        );
        assert!(Vec::<String>::from_frame(frame).unwrap_err().is_nil());
    }

    #[test]
    fn maps_from_map_and_flat_array() {
        let map: HashMap<String, i64> = Frame::Map(vec![
            (Frame::bulk("a"), Frame::Integer(1)),
            (Frame::bulk("b"), Frame::Integer(2)),
        ])
        .convert()
        .unwrap();
        assert_eq!(map.get("a"), Some(&1));
        assert_eq!(map.len(), 2);

        let flat: HashMap<String, String> = Frame::Array(vec![
            Frame::bulk("field"),
            Frame::bulk("value"),
            Frame::bulk("other"),
            Frame::bulk("x"),
        ])
        .convert()
        .unwrap();
        assert_eq!(flat.get("other").map(String::as_str), Some("x"));

        assert!(matches!(
            HashMap::<String, String>::from_frame(Frame::Array(vec![Frame::bulk("odd")])),
            Err(Error::Conversion(_))
        ));
    }

    #[test]
    fn map_entries_as_pairs_keep_order() {
        let pairs: Vec<(String, f64)> = Frame::Map(vec![
            (Frame::bulk("z"), Frame::Double(2.0)),
            (Frame::bulk("a"), Frame::Double(1.0)),
        ])
        .convert()
        .unwrap();

        assert_eq!(
            pairs,
            vec![(String::from("z"), 2.0), (String::from("a"), 1.0)]
        );
    }

    #[test]
    fn pairs() {
        let (member, score): (String, f64) =
            Frame::Array(vec![Frame::bulk("m"), Frame::Double(0.5)])
                .convert()
                .unwrap();
        assert_eq!((member.as_str(), score), ("m", 0.5));

        assert!(matches!(
            <(String, String)>::from_frame(Frame::Array(vec![Frame::bulk("only")])),
            Err(Error::Conversion(_))
        ));
    }

    #[test]
    fn server_error_inside_conversion() {
        let err = i64::from_frame(Frame::Error(String::from("ERR value is not an integer")))
            .unwrap_err();
        assert!(err.server_error().is_some());
    }
}
