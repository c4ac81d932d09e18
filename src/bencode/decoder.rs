//! Bencode decoding: turns a byte stream into a [`BencodeValue`].
use super::BencodeDecodeError;
use super::BencodeValue;
use super::DecodeResult;
use std::collections::BTreeMap;
use std::io::{self, Read};
use tracing::instrument;

/// Decodes one complete bencode value from `reader`.
///
/// Trailing bytes after the value are left unread; callers decoding a whole
/// file should check the reader is exhausted if that matters to them.
#[instrument(skip(reader), level = "debug")]
pub fn decode<R: Read>(reader: R) -> DecodeResult<BencodeValue> {
    let mut peekable = reader.bytes().peekable();
    decode_next(&mut peekable)
}

type ByteStream<R> = std::iter::Peekable<io::Bytes<R>>;

fn peek_byte<R: Read>(reader: &mut ByteStream<R>) -> DecodeResult<u8> {
    let byte_result = reader.peek().ok_or(BencodeDecodeError::UnexpectedEof)?;
    match byte_result {
        Ok(b) => Ok(*b),
        Err(e) => Err(BencodeDecodeError::Io(io::Error::new(e.kind(), e.to_string()))),
    }
}

fn next_byte<R: Read>(reader: &mut ByteStream<R>) -> DecodeResult<u8> {
    reader
        .next()
        .ok_or(BencodeDecodeError::UnexpectedEof)?
        .map_err(BencodeDecodeError::Io)
}

/// Reads bytes until `delimiter`, returning everything read before it as a
/// UTF-8 string. Used for the length prefix of strings and the digits of
/// integers, both of which are ASCII in valid bencode.
#[instrument(skip(reader), level = "trace")]
fn read_until<R: Read>(reader: &mut ByteStream<R>, delimiter: u8) -> DecodeResult<String> {
    let mut buffer = Vec::new();

    loop {
        let current = next_byte(reader)?;
        if current == delimiter {
            break;
        }
        buffer.push(current);
    }

    String::from_utf8(buffer)
        .map_err(|e| BencodeDecodeError::InvalidFormat(format!("non-UTF8 digits: {}", e)))
}

#[instrument(skip(reader), level = "trace")]
pub fn decode_string<R: Read>(reader: &mut ByteStream<R>) -> DecodeResult<Vec<u8>> {
    let length_str = read_until(reader, b':')?;
    let length = length_str
        .parse::<usize>()
        .map_err(|_| BencodeDecodeError::InvalidStringLength)?;

    let mut bytes = vec![0u8; length];
    for slot in bytes.iter_mut() {
        *slot = next_byte(reader)?;
    }
    Ok(bytes)
}

#[instrument(skip(reader), level = "trace")]
fn decode_integer<R: Read>(reader: &mut ByteStream<R>) -> DecodeResult<i64> {
    let tag = next_byte(reader)?;
    if tag != b'i' {
        return Err(BencodeDecodeError::InvalidFormat(
            "integer must start with 'i'".to_string(),
        ));
    }

    let digits = read_until(reader, b'e')?;

    if digits.is_empty() {
        return Err(BencodeDecodeError::InvalidInteger);
    }
    if digits == "-0" {
        return Err(BencodeDecodeError::InvalidInteger);
    }
    let unsigned_part = digits.strip_prefix('-').unwrap_or(&digits);
    if unsigned_part.len() > 1 && unsigned_part.starts_with('0') {
        return Err(BencodeDecodeError::InvalidInteger);
    }

    digits
        .parse::<i64>()
        .map_err(|_| BencodeDecodeError::InvalidInteger)
}

#[instrument(skip(reader), level = "trace")]
fn decode_list<R: Read>(reader: &mut ByteStream<R>) -> DecodeResult<Vec<BencodeValue>> {
    let tag = next_byte(reader)?;
    if tag != b'l' {
        return Err(BencodeDecodeError::InvalidFormat(
            "list must start with 'l'".to_string(),
        ));
    }

    let mut items = Vec::new();
    loop {
        if peek_byte(reader)? == b'e' {
            next_byte(reader)?;
            break;
        }
        items.push(decode_next(reader)?);
    }
    Ok(items)
}

#[instrument(skip(reader), level = "trace")]
fn decode_dict<R: Read>(
    reader: &mut ByteStream<R>,
) -> DecodeResult<BTreeMap<Vec<u8>, BencodeValue>> {
    let tag = next_byte(reader)?;
    if tag != b'd' {
        return Err(BencodeDecodeError::InvalidFormat(
            "dictionary must start with 'd'".to_string(),
        ));
    }

    let mut dict = BTreeMap::new();
    loop {
        if peek_byte(reader)? == b'e' {
            next_byte(reader)?;
            break;
        }

        if peek_byte(reader)?.is_ascii_digit() {
            let key = decode_string(reader)?;
            let value = decode_next(reader)?;
            if dict.insert(key.clone(), value).is_some() {
                return Err(BencodeDecodeError::DuplicateKey(key));
            }
        } else {
            return Err(BencodeDecodeError::DictKeyNotString);
        }
    }
    Ok(dict)
}

#[instrument(skip(reader), level = "trace")]
fn decode_next<R: Read>(reader: &mut ByteStream<R>) -> DecodeResult<BencodeValue> {
    let tag = peek_byte(reader)?;
    match tag {
        b'0'..=b'9' => decode_string(reader).map(BencodeValue::String),
        b'i' => decode_integer(reader).map(BencodeValue::Integer),
        b'l' => decode_list(reader).map(BencodeValue::List),
        b'd' => decode_dict(reader).map(BencodeValue::Dict),
        other => Err(BencodeDecodeError::InvalidFormat(format!(
            "unexpected leading byte: {}",
            other as char
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::encoder::encode_to_vec;

    fn decode_slice(bytes: &[u8]) -> DecodeResult<BencodeValue> {
        decode(bytes)
    }

    #[test]
    fn decodes_dictionary() {
        let value = decode_slice(b"d3:cow3:moo4:spam4:eggse").unwrap();
        let dict = value.as_dict().unwrap();
        assert_eq!(
            dict.get(b"cow".as_slice()).unwrap().as_string(),
            Some(b"moo".as_slice())
        );
        assert_eq!(
            dict.get(b"spam".as_slice()).unwrap().as_string(),
            Some(b"eggs".as_slice())
        );

        // already sorted, so re-encoding reproduces the input exactly
        assert_eq!(encode_to_vec(&value).unwrap(), b"d3:cow3:moo4:spam4:eggse");
    }

    #[test]
    fn decodes_integers() {
        assert_eq!(decode_slice(b"i-42e").unwrap(), BencodeValue::Integer(-42));
        assert_eq!(decode_slice(b"i0e").unwrap(), BencodeValue::Integer(0));
        assert!(decode_slice(b"i-0e").is_err());
        assert!(decode_slice(b"i03e").is_err());
    }

    #[test]
    fn decodes_list() {
        let value = decode_slice(b"li42ei-1ee").unwrap();
        assert_eq!(
            value,
            BencodeValue::List(vec![BencodeValue::Integer(42), BencodeValue::Integer(-1)])
        );
    }

    #[test]
    fn rejects_duplicate_keys() {
        let err = decode_slice(b"d3:fooi1e3:fooi2ee").unwrap_err();
        assert!(matches!(err, BencodeDecodeError::DuplicateKey(_)));
    }

    #[test]
    fn rejects_truncated_input() {
        assert!(decode_slice(b"5:hel").is_err());
        assert!(decode_slice(b"i42").is_err());
        assert!(decode_slice(b"l").is_err());
    }
}
