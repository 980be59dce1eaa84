use std::convert::TryInto;

use crate::error::{GraphError, Result};
use crate::model::{PropertyMap, PropertyValue};

/// Type descriptors. Non-negative values mean TEXT of that many bytes;
/// the negative range enumerates the scalar types.
pub(crate) const DESC_BOOL: i32 = -1;
pub(crate) const DESC_INT: i32 = -2;
pub(crate) const DESC_UINT: i32 = -3;
pub(crate) const DESC_FLOAT: i32 = -4;
pub(crate) const DESC_CHAR: i32 = -5;

/// Smallest legal framed record: `rec_len` plus `num_props`.
pub(crate) const MIN_RECORD_LEN: u32 = 8;

/// Encodes a property map as a framed record:
/// `rec_len (u32, total incl. itself) · num_props (u32) · pairs`.
pub(crate) fn encode_record(props: &PropertyMap) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; 4];

    let num_props: u32 = props
        .len()
        .try_into()
        .map_err(|_| GraphError::InvalidArgument("too many properties to encode".into()))?;
    buf.extend_from_slice(&num_props.to_be_bytes());

    for (key, value) in props.iter() {
        write_key(&mut buf, key)?;
        write_value(&mut buf, value)?;
    }

    let rec_len: u32 = buf
        .len()
        .try_into()
        .map_err(|_| GraphError::InvalidArgument("property record exceeds u32 framing".into()))?;
    buf[..4].copy_from_slice(&rec_len.to_be_bytes());
    Ok(buf)
}

/// Decodes a full framed record, `rec_len` included. Duplicate keys keep
/// their first occurrence.
pub(crate) fn decode_record(bytes: &[u8]) -> Result<PropertyMap> {
    let mut cursor = Cursor::new(bytes);

    let rec_len = cursor.read_u32()?;
    if rec_len as usize != bytes.len() {
        return Err(GraphError::Corruption(format!(
            "record frame claims {rec_len} bytes but {} were read",
            bytes.len()
        )));
    }

    let num_props = cursor.read_u32()?;
    let mut props = PropertyMap::new();
    for _ in 0..num_props {
        let key = cursor.read_key()?;
        let value = cursor.read_value()?;
        if !props.contains_key(&key) {
            props.insert(key, value);
        }
    }

    cursor.ensure_consumed()?;
    Ok(props)
}

fn write_key(buf: &mut Vec<u8>, key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(GraphError::InvalidArgument(
            "property keys must be non-empty".into(),
        ));
    }
    let bytes = key.as_bytes();
    let len: u32 = bytes
        .len()
        .try_into()
        .map_err(|_| GraphError::InvalidArgument("property key length exceeds u32::MAX".into()))?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(bytes);
    Ok(())
}

pub(crate) fn write_value(buf: &mut Vec<u8>, value: &PropertyValue) -> Result<()> {
    match value {
        PropertyValue::Bool(v) => {
            buf.extend_from_slice(&DESC_BOOL.to_be_bytes());
            buf.push(u8::from(*v));
        }
        PropertyValue::Int(v) => {
            buf.extend_from_slice(&DESC_INT.to_be_bytes());
            buf.extend_from_slice(&v.to_be_bytes());
        }
        PropertyValue::Uint(v) => {
            buf.extend_from_slice(&DESC_UINT.to_be_bytes());
            buf.extend_from_slice(&v.to_be_bytes());
        }
        PropertyValue::Float(v) => {
            buf.extend_from_slice(&DESC_FLOAT.to_be_bytes());
            buf.extend_from_slice(&v.to_be_bytes());
        }
        PropertyValue::Char(v) => {
            buf.extend_from_slice(&DESC_CHAR.to_be_bytes());
            buf.extend_from_slice(&(*v as u32).to_be_bytes());
        }
        PropertyValue::Text(s) => {
            let desc: i32 = s.len().try_into().map_err(|_| {
                GraphError::InvalidArgument("text value length exceeds i32::MAX".into())
            })?;
            buf.extend_from_slice(&desc.to_be_bytes());
            buf.extend_from_slice(s.as_bytes());
        }
    }
    Ok(())
}

pub(crate) struct Cursor<'a> {
    data: &'a [u8],
    index: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, index: 0 }
    }

    fn read_exact(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.data.len() - self.index {
            return Err(GraphError::Corruption(
                "unexpected end of property record".into(),
            ));
        }
        let start = self.index;
        self.index += len;
        Ok(&self.data[start..start + len])
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32> {
        let bytes: [u8; 4] = self
            .read_exact(4)?
            .try_into()
            .expect("slice has exactly 4 bytes");
        Ok(u32::from_be_bytes(bytes))
    }

    fn read_i32(&mut self) -> Result<i32> {
        let bytes: [u8; 4] = self
            .read_exact(4)?
            .try_into()
            .expect("slice has exactly 4 bytes");
        Ok(i32::from_be_bytes(bytes))
    }

    fn read_key(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        let bytes = self.read_exact(len)?;
        let key = String::from_utf8(bytes.to_vec())
            .map_err(|_| GraphError::Corruption("property key is not valid UTF-8".into()))?;
        if key.is_empty() {
            return Err(GraphError::Corruption("empty property key".into()));
        }
        Ok(key)
    }

    pub(crate) fn read_value(&mut self) -> Result<PropertyValue> {
        let desc = self.read_i32()?;
        if desc >= 0 {
            let bytes = self.read_exact(desc as usize)?;
            let text = String::from_utf8(bytes.to_vec())
                .map_err(|_| GraphError::Corruption("text value is not valid UTF-8".into()))?;
            return Ok(PropertyValue::Text(text));
        }
        match desc {
            DESC_BOOL => {
                let byte = self.read_exact(1)?[0];
                Ok(PropertyValue::Bool(byte != 0))
            }
            DESC_INT => Ok(PropertyValue::Int(self.read_i32()?)),
            DESC_UINT => Ok(PropertyValue::Uint(self.read_u32()?)),
            DESC_FLOAT => {
                let bytes: [u8; 4] = self
                    .read_exact(4)?
                    .try_into()
                    .expect("slice has exactly 4 bytes");
                Ok(PropertyValue::Float(f32::from_be_bytes(bytes)))
            }
            DESC_CHAR => {
                let point = self.read_u32()?;
                char::from_u32(point)
                    .map(PropertyValue::Char)
                    .ok_or_else(|| {
                        GraphError::Corruption(format!("invalid code point {point:#x}"))
                    })
            }
            other => Err(GraphError::Corruption(format!("unknown val_desc {other}"))),
        }
    }

    pub(crate) fn ensure_consumed(&self) -> Result<()> {
        if self.index != self.data.len() {
            return Err(GraphError::Corruption(
                "trailing bytes in property record".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_map() -> PropertyMap {
        PropertyMap::from([
            ("name", PropertyValue::Text("alice".into())),
            ("age", PropertyValue::Int(-7)),
            ("score", PropertyValue::Float(0.25)),
            ("active", PropertyValue::Bool(true)),
            ("grade", PropertyValue::Char('A')),
            ("slot", PropertyValue::Uint(42)),
        ])
    }

    #[test]
    fn record_round_trip_preserves_order_and_tags() {
        let map = sample_map();
        let bytes = encode_record(&map).expect("encode");
        let decoded = decode_record(&bytes).expect("decode");
        assert_eq!(map, decoded);

        let keys: Vec<_> = decoded.keys().collect();
        assert_eq!(keys, vec!["name", "age", "score", "active", "grade", "slot"]);
    }

    #[test]
    fn empty_map_is_eight_bytes() {
        let bytes = encode_record(&PropertyMap::new()).expect("encode");
        assert_eq!(bytes, vec![0, 0, 0, 8, 0, 0, 0, 0]);
        assert!(decode_record(&bytes).expect("decode").is_empty());
    }

    #[test]
    fn text_desc_is_the_byte_length() {
        let map = PropertyMap::from([("k", PropertyValue::Text("ab".into()))]);
        let bytes = encode_record(&map).expect("encode");
        // rec_len(4) num_props(4) key_strlen(4) 'k' val_desc(4) "ab"
        let desc = i32::from_be_bytes(bytes[13..17].try_into().unwrap());
        assert_eq!(desc, 2);
    }

    #[test]
    fn unknown_val_desc_is_corruption() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(-6i32).to_be_bytes());
        let err = Cursor::new(&buf).read_value().unwrap_err();
        assert!(matches!(err, GraphError::Corruption(_)));
    }

    #[test]
    fn nonzero_bool_byte_decodes_true() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&DESC_BOOL.to_be_bytes());
        buf.push(7);
        let value = Cursor::new(&buf).read_value().expect("decode");
        assert_eq!(value, PropertyValue::Bool(true));
    }

    #[test]
    fn truncated_value_is_corruption() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&DESC_INT.to_be_bytes());
        buf.extend_from_slice(&[1, 2]); // two bytes short
        let err = Cursor::new(&buf).read_value().unwrap_err();
        assert!(matches!(err, GraphError::Corruption(_)));
    }

    #[test]
    fn trailing_bytes_are_corruption() {
        let mut bytes = encode_record(&sample_map()).expect("encode");
        bytes.extend_from_slice(&[0, 1, 2]);
        // Frame length no longer matches the buffer.
        let err = decode_record(&bytes).unwrap_err();
        assert!(matches!(err, GraphError::Corruption(_)));
    }

    #[test]
    fn frame_length_mismatch_is_corruption() {
        let mut bytes = encode_record(&PropertyMap::new()).expect("encode");
        bytes[..4].copy_from_slice(&9u32.to_be_bytes());
        let err = decode_record(&bytes).unwrap_err();
        assert!(matches!(err, GraphError::Corruption(_)));
    }

    #[test]
    fn duplicate_keys_keep_first_occurrence() {
        // Hand-build a record with "k" twice: first Int(1), then Int(2).
        let mut body = Vec::new();
        body.extend_from_slice(&2u32.to_be_bytes());
        for v in [1i32, 2] {
            body.extend_from_slice(&1u32.to_be_bytes());
            body.push(b'k');
            body.extend_from_slice(&DESC_INT.to_be_bytes());
            body.extend_from_slice(&v.to_be_bytes());
        }
        let mut record = ((body.len() + 4) as u32).to_be_bytes().to_vec();
        record.extend_from_slice(&body);

        let decoded = decode_record(&record).expect("decode");
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded.get("k"), Some(&PropertyValue::Int(1)));
    }

    #[test]
    fn invalid_utf8_text_is_corruption() {
        let mut body = Vec::new();
        body.extend_from_slice(&1u32.to_be_bytes());
        body.extend_from_slice(&1u32.to_be_bytes());
        body.push(b'k');
        body.extend_from_slice(&2i32.to_be_bytes());
        body.extend_from_slice(&[0xff, 0xfe]);
        let mut record = ((body.len() + 4) as u32).to_be_bytes().to_vec();
        record.extend_from_slice(&body);

        let err = decode_record(&record).unwrap_err();
        assert!(matches!(err, GraphError::Corruption(_)));
    }
}
