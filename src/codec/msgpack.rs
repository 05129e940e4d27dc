//! MsgPack payload codec using `rmp-serde`.
//!
//! Structs are written with `to_vec_named` (struct-as-map), so peers in other
//! languages can decode them by field name.
//!
//! # Example
//!
//! ```
//! use framewire::codec::MsgPackCodec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Say {
//!     room: u32,
//!     text: String,
//! }
//!
//! let msg = Say { room: 1, text: "hi".to_string() };
//! let encoded = MsgPackCodec::encode(&msg).unwrap();
//! let decoded: Say = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, msg);
//! ```

use bytes::{BufMut, BytesMut};

use crate::error::Result;

/// MessagePack codec for structured payloads.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (struct-as-map).
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Encode a value, appending to an existing buffer.
    pub fn encode_into<T: serde::Serialize>(value: &T, buf: &mut BytesMut) -> Result<()> {
        let mut writer = buf.writer();
        value.serialize(&mut rmp_serde::Serializer::new(&mut writer).with_struct_map())?;
        Ok(())
    }

    /// Decode MsgPack bytes to a value.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Say {
        room: u32,
        text: String,
        urgent: bool,
    }

    fn sample() -> Say {
        Say {
            room: 7,
            text: "hello".to_string(),
            urgent: false,
        }
    }

    #[test]
    fn test_encode_decode_struct() {
        let encoded = MsgPackCodec::encode(&sample()).unwrap();
        let decoded: Say = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, sample());
    }

    #[test]
    fn test_struct_encoded_as_map() {
        let encoded = MsgPackCodec::encode(&sample()).unwrap();
        // fixmap with 3 entries, not fixarray (0x93)
        assert_eq!(encoded[0], 0x83);
    }

    #[test]
    fn test_encode_into_appends() {
        let mut buf = BytesMut::from(&b"\xAA"[..]);
        MsgPackCodec::encode_into(&sample(), &mut buf).unwrap();

        assert_eq!(buf[0], 0xAA);
        assert_eq!(&buf[1..], &MsgPackCodec::encode(&sample()).unwrap()[..]);
    }

    #[test]
    fn test_decode_error_on_invalid_data() {
        let result: Result<Say> = MsgPackCodec::decode(b"not valid msgpack");
        assert!(result.is_err());
    }

    #[test]
    fn test_none_is_nil() {
        let encoded = MsgPackCodec::encode(&Option::<u32>::None).unwrap();
        assert_eq!(encoded, vec![0xc0]);
    }
}
