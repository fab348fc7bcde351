// https://github.com/redis/redis-specifications/blob/master/protocol/RESP3.md

use strum_macros::{Display, EnumIter};

use crate::frame::Error;

/// The RESP3 type tags. The first byte of every serialized element identifies its type.
///
/// `Any` is not a wire type: requests use it when the shape of the reply is not known ahead of
/// time, and it is never written to or read from the stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum DataType {
    SimpleString,   // '+'
    SimpleError,    // '-'
    Integer,        // ':'
    BulkString,     // '$'
    Array,          // '*'
    // Due to historical reasons, RESP2 features two specially crafted values for representing null
    // values of bulk strings and arrays. This duality has always been a redundancy that added zero
    // semantical value to the protocol itself. The null type, introduced in RESP3, aims to fix
    // this wrong.
    Null,           // '_'
    Boolean,        // '#'
    Double,         // ','
    BigNumber,      // '('
    BulkError,      // '!'
    VerbatimString, // '='
    Map,            // '%'
    Attribute,      // '|'
    Set,            // '~'
    Push,           // '>'
    Any,
}

impl DataType {
    /// Type compatibility used when validating a reply against the type a request expects.
    ///
    /// Types within the same group are interchangeable: the server may pick either concrete
    /// representation and the caller does not need to know which.
    pub fn equal(self, other: DataType) -> bool {
        if self == DataType::Any || other == DataType::Any {
            return true;
        }
        self.group() == other.group()
    }

    pub fn is_error(self) -> bool {
        matches!(self, DataType::SimpleError | DataType::BulkError)
    }

    pub fn is_aggregate(self) -> bool {
        matches!(
            self,
            DataType::Array
                | DataType::Set
                | DataType::Push
                | DataType::Map
                | DataType::Attribute
        )
    }

    fn group(self) -> DataType {
        match self {
            DataType::BulkString => DataType::SimpleString,
            DataType::BulkError => DataType::SimpleError,
            DataType::Set => DataType::Array,
            DataType::Attribute => DataType::Map,
            other => other,
        }
    }
}

impl TryFrom<u8> for DataType {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            b'+' => Ok(Self::SimpleString),
            b'-' => Ok(Self::SimpleError),
            b':' => Ok(Self::Integer),
            b'$' => Ok(Self::BulkString),
            b'*' => Ok(Self::Array),
            b'_' => Ok(Self::Null),
            b'#' => Ok(Self::Boolean),
            b',' => Ok(Self::Double),
            b'(' => Ok(Self::BigNumber),
            b'!' => Ok(Self::BulkError),
            b'=' => Ok(Self::VerbatimString),
            b'%' => Ok(Self::Map),
            b'|' => Ok(Self::Attribute),
            b'~' => Ok(Self::Set),
            b'>' => Ok(Self::Push),
            _ => Err(Error::InvalidDataType(byte)),
        }
    }
}

impl DataType {
    /// The wire tag, `None` for `Any`.
    pub fn tag(self) -> Option<u8> {
        let byte = match self {
            DataType::SimpleString => b'+',
            DataType::SimpleError => b'-',
            DataType::Integer => b':',
            DataType::BulkString => b'$',
            DataType::Array => b'*',
            DataType::Null => b'_',
            DataType::Boolean => b'#',
            DataType::Double => b',',
            DataType::BigNumber => b'(',
            DataType::BulkError => b'!',
            DataType::VerbatimString => b'=',
            DataType::Map => b'%',
            DataType::Attribute => b'|',
            DataType::Set => b'~',
            DataType::Push => b'>',
            DataType::Any => return None,
        };
        Some(byte)
    }
}
