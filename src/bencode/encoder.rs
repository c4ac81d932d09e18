//! Bencode encoding: turns a [`BencodeValue`] back into bytes.
//!
//! Because [`BencodeValue::Dict`] is a [`BTreeMap`], iterating it already
//! yields keys in ascending byte order, so encoding is canonical with no
//! separate sort step.
use super::BencodeEncodeError;
use super::BencodeValue;
use super::EncodeResult;
use std::collections::BTreeMap;
use std::io::Write;
use tracing::instrument;

#[instrument(skip(writer, s), level = "trace")]
fn encode_string<W: Write>(writer: &mut W, s: &[u8]) -> EncodeResult<()> {
    write!(writer, "{}:", s.len())?;
    writer.write_all(s)?;
    Ok(())
}

#[instrument(skip(writer), level = "trace")]
fn encode_integer<W: Write>(writer: &mut W, i: i64) -> EncodeResult<()> {
    write!(writer, "i{}e", i)?;
    Ok(())
}

#[instrument(skip(writer, list), level = "trace")]
fn encode_list<W: Write>(writer: &mut W, list: &[BencodeValue]) -> EncodeResult<()> {
    writer.write_all(b"l")?;
    for item in list {
        encode_value(writer, item)?;
    }
    writer.write_all(b"e")?;
    Ok(())
}

#[instrument(skip(writer, dict), level = "trace")]
fn encode_dict<W: Write>(writer: &mut W, dict: &BTreeMap<Vec<u8>, BencodeValue>) -> EncodeResult<()> {
    writer.write_all(b"d")?;
    for (key, value) in dict.iter() {
        encode_string(writer, key)?;
        encode_value(writer, value)?;
    }
    writer.write_all(b"e")?;
    Ok(())
}

#[instrument(skip(writer), level = "trace")]
fn encode_value<W: Write>(writer: &mut W, value: &BencodeValue) -> EncodeResult<()> {
    match value {
        BencodeValue::String(s) => encode_string(writer, s),
        BencodeValue::Integer(i) => encode_integer(writer, *i),
        BencodeValue::List(list) => encode_list(writer, list),
        BencodeValue::Dict(dict) => encode_dict(writer, dict),
    }
}

#[instrument(skip(writer), level = "debug")]
pub fn encode<W: Write>(writer: &mut W, value: &BencodeValue) -> EncodeResult<()> {
    encode_value(writer, value)
}

/// Convenience wrapper for the common case of encoding into an owned buffer.
pub fn encode_to_vec(value: &BencodeValue) -> EncodeResult<Vec<u8>> {
    let mut buffer = Vec::new();
    encode(&mut buffer, value)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dict_value(pairs: &[(&[u8], BencodeValue)]) -> BencodeValue {
        let mut dict = BTreeMap::new();
        for (key, value) in pairs {
            dict.insert(key.to_vec(), value.clone());
        }
        BencodeValue::Dict(dict)
    }

    #[test]
    fn encodes_string() {
        let value = BencodeValue::String(b"spam".to_vec());
        assert_eq!(encode_to_vec(&value).unwrap(), b"4:spam");
    }

    #[test]
    fn encodes_negative_and_zero_integers() {
        assert_eq!(
            encode_to_vec(&BencodeValue::Integer(-42)).unwrap(),
            b"i-42e"
        );
        assert_eq!(encode_to_vec(&BencodeValue::Integer(0)).unwrap(), b"i0e");
    }

    #[test]
    fn encodes_list() {
        let value = BencodeValue::List(vec![
            BencodeValue::String(b"a".to_vec()),
            BencodeValue::Integer(1),
        ]);
        assert_eq!(encode_to_vec(&value).unwrap(), b"l1:ai1ee");
    }

    #[test]
    fn encodes_dict_sorted_by_key_regardless_of_insertion_order() {
        let value = dict_value(&[
            (b"zebra", BencodeValue::Integer(1)),
            (b"apple", BencodeValue::Integer(2)),
        ]);
        assert_eq!(encode_to_vec(&value).unwrap(), b"d5:applei2e5:zebrai1ee");
    }
}
