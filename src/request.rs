use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::data_type::DataType;
use crate::frame::{put_header, CRLF};

/// The reply type only drives validation of the reply and never changes the encoded bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    args: Vec<Bytes>,
    reply_type: DataType,
}

impl Request {
    /// The command name is upper-cased.
    pub fn new(name: &str) -> Self {
        Self {
            args: vec![Bytes::from(name.to_ascii_uppercase())],
            reply_type: DataType::Any,
        }
    }

    pub fn arg(mut self, arg: impl ToArg) -> Self {
        self.args.push(arg.to_arg());
        self
    }

    pub fn args<I>(mut self, args: I) -> Self
    where
        I: IntoIterator,
        I::Item: ToArg,
    {
        self.args.extend(args.into_iter().map(|arg| arg.to_arg()));
        self
    }

    pub fn reply_type(mut self, reply_type: DataType) -> Self {
        self.reply_type = reply_type;
        self
    }

    pub fn expected(&self) -> DataType {
        self.reply_type
    }

    pub fn name(&self) -> &str {
        // The name was built from a `&str`.
        std::str::from_utf8(&self.args[0]).unwrap_or_default()
    }

    pub fn arguments(&self) -> &[Bytes] {
        &self.args[1..]
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        let len = self.args.iter().map(|arg| arg.len() + 16).sum();
        dst.reserve(len);

        put_header(dst, b'*', self.args.len());
        for arg in &self.args {
            put_header(dst, b'$', arg.len());
            dst.put_slice(arg);
            dst.put_slice(CRLF);
        }
    }

    /// Clears `dst` and writes the wire form into it, keeping its allocation.
    pub fn encode_into(&self, dst: &mut BytesMut) {
        dst.clear();
        self.encode(dst);
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut dst = BytesMut::new();
        self.encode(&mut dst);
        dst.to_vec()
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", String::from_utf8_lossy(arg))?;
        }
        Ok(())
    }
}

pub trait ToArg {
    fn to_arg(&self) -> Bytes;
}

impl<T: ToArg + ?Sized> ToArg for &T {
    fn to_arg(&self) -> Bytes {
        (**self).to_arg()
    }
}

impl ToArg for str {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl ToArg for String {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl ToArg for [u8] {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl<const N: usize> ToArg for [u8; N] {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl ToArg for Vec<u8> {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl ToArg for Bytes {
    fn to_arg(&self) -> Bytes {
        self.clone()
    }
}

impl ToArg for bool {
    fn to_arg(&self) -> Bytes {
        Bytes::from_static(if *self { b"true" } else { b"false" })
    }
}

impl ToArg for char {
    fn to_arg(&self) -> Bytes {
        Bytes::from(self.to_string())
    }
}

macro_rules! display_arg {
    ($($t:ty),*) => {
        $(
            impl ToArg for $t {
                fn to_arg(&self) -> Bytes {
                    Bytes::from(self.to_string())
                }
            }
        )*
    };
}

// `Display` for floats already prints the shortest representation that reads back to the same
// value, and never uses an exponent.
display_arg!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64);

/// Wraps anything with a textual representation so it can be used as an argument.
#[derive(Clone, Copy, Debug)]
pub struct Text<T>(pub T);

impl<T: fmt::Display> ToArg for Text<T> {
    fn to_arg(&self) -> Bytes {
        Bytes::from(self.0.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_ping() {
        let request = Request::new("ping").arg("hello");

        assert_eq!(request.serialize(), b"*2\r\n$4\r\nPING\r\n$5\r\nhello\r\n");
    }

    #[test]
    fn reply_type_does_not_change_bytes() {
        let any = Request::new("get").arg("key");
        let typed = Request::new("get")
            .arg("key")
            .reply_type(DataType::BulkString);

        assert_eq!(any.expected(), DataType::Any);
        assert_eq!(typed.expected(), DataType::BulkString);
        assert_eq!(any.serialize(), typed.serialize());
    }

    #[test]
    fn canonical_arguments() {
        let request = Request::new("cmd")
            .arg(42u8)
            .arg(-7i64)
            .arg(u128::MAX)
            .arg(1.5f64)
            .arg(0.1f32)
            .arg(true)
            .arg(false)
            .arg(&b"\x00\xff"[..])
            .arg(String::from("text"))
            .arg(Bytes::from_static(b"bytes"))
            .arg(Text(std::net::Ipv4Addr::LOCALHOST));

        let args: Vec<&[u8]> = request.arguments().iter().map(|a| &a[..]).collect();
        let expected: [&[u8]; 11] = [
            b"42",
            b"-7",
            b"340282366920938463463374607431768211455",
            b"1.5",
            b"0.1",
            b"true",
            b"false",
            b"\x00\xff",
            b"text",
            b"bytes",
            b"127.0.0.1",
        ];
        assert_eq!(args, expected);
    }

    #[test]
    fn float_arguments_round_trip() {
        for value in [0.1f64, 1e21, 1e-7, -2.5, 123456.789] {
            let arg = value.to_arg();
            let parsed: f64 = std::str::from_utf8(&arg).unwrap().parse().unwrap();
            assert_eq!(parsed, value);
        }
    }

    #[test]
    fn name_is_uppercased() {
        let request = Request::new("hgetall").arg("Key");

        assert_eq!(request.name(), "HGETALL");
        assert_eq!(request.arguments(), &[Bytes::from("Key")]);
        assert_eq!(request.to_string(), "HGETALL Key");
    }

    #[test]
    fn args_from_iterator() {
        let request = Request::new("del").args(["a", "b", "c"]);

        assert_eq!(
            request.serialize(),
            b"*4\r\n$3\r\nDEL\r\n$1\r\na\r\n$1\r\nb\r\n$1\r\nc\r\n"
        );
    }

    #[test]
    fn encode_into_reuses_buffer() {
        let mut buf = BytesMut::with_capacity(64);
        Request::new("get").arg("a-long-key-name").encode_into(&mut buf);
        Request::new("ping").encode_into(&mut buf);

        assert_eq!(&buf[..], b"*1\r\n$4\r\nPING\r\n");
        assert!(buf.capacity() >= 64);
    }

    #[test]
    fn matches_redis_crate_encoding() {
        let ours = Request::new("SET")
            .arg("key")
            .arg(12345i64)
            .arg(&b"binary\r\nvalue"[..])
            .serialize();
        let theirs = redis::cmd("SET")
            .arg("key")
            .arg(12345i64)
            .arg(&b"binary\r\nvalue"[..])
            .get_packed_command();

        assert_eq!(ours, theirs);
    }
}
