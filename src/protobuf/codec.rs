//! スキーマレスデコーダー / エンコーダー
//!
//! tag = (field_number << 3) | wire_type のvarintに続いて値が並ぶ形式。
//! length-delimitedの中身は再帰的にメッセージとして解釈を試みる。

use super::value::{PbField, PbValue, WireType};
use super::CodecError;

/// ネストの最大深さ（スタックオーバーフロー防止）
const MAX_NESTING_DEPTH: usize = 64;

/// varintの最大バイト数（u64）
const MAX_VARINT_LEN: usize = 10;

/// パース失敗の種類
///
/// トップレベルでは `Underrun` のみがエラーとなり、
/// それ以外はバイト列へのフォールバックで吸収する。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    Underrun,
    Invalid(&'static str),
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn is_end(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn varint(&mut self) -> Result<u64, Fault> {
        let mut result: u64 = 0;
        for i in 0..MAX_VARINT_LEN {
            let byte = *self.buf.get(self.pos).ok_or(Fault::Underrun)?;
            self.pos += 1;
            let bits = u64::from(byte & 0x7f);
            if i == MAX_VARINT_LEN - 1 && bits > 1 {
                return Err(Fault::Invalid("varint overflow"));
            }
            result |= bits << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(Fault::Invalid("varint too long"))
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], Fault> {
        if len > self.remaining() {
            return Err(Fault::Underrun);
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn fixed<const N: usize>(&mut self) -> Result<[u8; N], Fault> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }
}

/// バイト列をPbValueにデコード
///
/// # Errors
/// varintや長さプレフィックスが途中で切れている場合、
/// または空バッファの場合に `MalformedBuffer` を返す。
/// protobufとして解釈できないだけの入力はエラーにせず、
/// 文字列/バイト列の値として返す。
pub fn decode(buf: &[u8]) -> Result<PbValue, CodecError> {
    if buf.is_empty() {
        return Err(CodecError::MalformedBuffer("empty buffer".to_string()));
    }

    match parse_message(buf, 0) {
        Ok(fields) => {
            let value = PbValue::Message(fields);
            if encode(&value) == buf {
                Ok(value)
            } else {
                log::debug!("Non-canonical top-level message, keeping raw bytes");
                Ok(raw_value(buf))
            }
        }
        Err(Fault::Underrun) => Err(CodecError::MalformedBuffer(format!(
            "unexpected end of buffer ({} bytes)",
            buf.len()
        ))),
        Err(Fault::Invalid(reason)) => {
            log::debug!("Top-level buffer is not a message ({}), keeping raw bytes", reason);
            Ok(raw_value(buf))
        }
    }
}

fn parse_message(buf: &[u8], depth: usize) -> Result<Vec<PbField>, Fault> {
    if buf.is_empty() {
        return Err(Fault::Invalid("empty message"));
    }

    let mut reader = Reader::new(buf);
    let mut fields = Vec::new();

    while !reader.is_end() {
        let tag = reader.varint()?;
        let number = tag >> 3;
        if number == 0 {
            return Err(Fault::Invalid("field number 0"));
        }

        let value = match WireType::from_tag(tag) {
            Some(WireType::Varint) => PbValue::Varint(reader.varint()?),
            Some(WireType::Fixed64) => PbValue::Fixed64(u64::from_le_bytes(reader.fixed::<8>()?)),
            Some(WireType::Fixed32) => PbValue::Fixed32(u32::from_le_bytes(reader.fixed::<4>()?)),
            Some(WireType::LengthDelimited) => {
                let len = usize::try_from(reader.varint()?).map_err(|_| Fault::Underrun)?;
                let payload = reader.take(len)?;
                interpret_payload(payload, depth + 1)
            }
            None => return Err(Fault::Invalid("unsupported wire type")),
        };

        fields.push(PbField::new(number, value));
    }

    Ok(fields)
}

/// length-delimitedペイロードの解釈
///
/// 再エンコードで元のバイト列に戻る場合のみネストしたメッセージとして扱う。
fn interpret_payload(payload: &[u8], depth: usize) -> PbValue {
    if depth <= MAX_NESTING_DEPTH {
        if let Ok(fields) = parse_message(payload, depth) {
            let value = PbValue::Message(fields);
            if encode(&value) == payload {
                return value;
            }
        }
    }
    raw_value(payload)
}

fn raw_value(payload: &[u8]) -> PbValue {
    match std::str::from_utf8(payload) {
        Ok(s) => PbValue::String(s.to_string()),
        Err(_) => PbValue::Bytes(payload.to_vec()),
    }
}

/// PbValueをバイト列にエンコード
///
/// メッセージ以外の値はそのペイロード（varintはvarint表現）をそのまま返す。
pub fn encode(value: &PbValue) -> Vec<u8> {
    let mut out = Vec::new();
    match value {
        PbValue::Message(fields) => {
            for field in fields {
                encode_field(field, &mut out);
            }
        }
        PbValue::Varint(n) => encode_varint(*n, &mut out),
        PbValue::Fixed64(n) => out.extend_from_slice(&n.to_le_bytes()),
        PbValue::Fixed32(n) => out.extend_from_slice(&n.to_le_bytes()),
        PbValue::String(s) => out.extend_from_slice(s.as_bytes()),
        PbValue::Bytes(b) => out.extend_from_slice(b),
    }
    out
}

fn encode_field(field: &PbField, out: &mut Vec<u8>) {
    let wire_type = field.value.wire_type();
    encode_varint((field.number << 3) | wire_type as u64, out);

    match &field.value {
        PbValue::Varint(n) => encode_varint(*n, out),
        PbValue::Fixed64(n) => out.extend_from_slice(&n.to_le_bytes()),
        PbValue::Fixed32(n) => out.extend_from_slice(&n.to_le_bytes()),
        PbValue::String(s) => encode_length_delimited(s.as_bytes(), out),
        PbValue::Bytes(b) => encode_length_delimited(b, out),
        PbValue::Message(_) => encode_length_delimited(&encode(&field.value), out),
    }
}

fn encode_length_delimited(payload: &[u8], out: &mut Vec<u8>) {
    encode_varint(payload.len() as u64, out);
    out.extend_from_slice(payload);
}

pub(crate) fn encode_varint(mut n: u64, out: &mut Vec<u8>) {
    while n >= 0x80 {
        out.push((n as u8 & 0x7f) | 0x80);
        n >>= 7;
    }
    out.push(n as u8);
}

#[cfg(test)]
mod tests {
    use super::*;

    /// {1: "abc", 2: 42}
    const SIMPLE: &[u8] = &[0x0a, 0x03, b'a', b'b', b'c', 0x10, 0x2a];

    #[test]
    fn test_decode_simple_message() {
        let value = decode(SIMPLE).unwrap();
        assert_eq!(value.get(1).and_then(|v| v.as_str()), Some("abc"));
        assert_eq!(value.get(2).and_then(|v| v.as_u64()), Some(42));
        assert_eq!(encode(&value), SIMPLE);
    }

    #[test]
    fn test_varint_encoding() {
        let mut out = Vec::new();
        encode_varint(300, &mut out);
        assert_eq!(out, vec![0xac, 0x02]);

        let mut out = Vec::new();
        encode_varint(u64::MAX, &mut out);
        assert_eq!(out.len(), 10);
        assert_eq!(Reader::new(&out).varint(), Ok(u64::MAX));
    }

    #[test]
    fn test_large_field_number() {
        // continuationの外側フィールド（119693434）
        let buf = [0xd2, 0x87, 0xcc, 0xc8, 0x03, 0x02, 0x30, 0x01];
        let value = decode(&buf).unwrap();
        assert_eq!(value.get_path(&[119_693_434, 6]), Some(&PbValue::Varint(1)));
        assert_eq!(encode(&value), buf);
    }

    #[test]
    fn test_fixed_width_values() {
        let mut buf = vec![0x09];
        buf.extend_from_slice(&0x0102_0304_0506_0708u64.to_le_bytes());
        buf.push(0x15);
        buf.extend_from_slice(&7u32.to_le_bytes());

        let value = decode(&buf).unwrap();
        assert_eq!(value.get(1), Some(&PbValue::Fixed64(0x0102_0304_0506_0708)));
        assert_eq!(value.get(2), Some(&PbValue::Fixed32(7)));
        assert_eq!(encode(&value), buf);
    }

    #[test]
    fn test_duplicate_fields_keep_order() {
        let buf = [0x08, 0x01, 0x10, 0x05, 0x08, 0x02];
        let value = decode(&buf).unwrap();
        let numbers: Vec<u64> = value.fields().iter().map(|f| f.number).collect();
        assert_eq!(numbers, vec![1, 2, 1]);
        assert_eq!(decode(&encode(&value)).unwrap(), value);
    }

    #[test]
    fn test_nested_message() {
        // {1: {2: "foo"}}
        let buf = [0x0a, 0x05, 0x12, 0x03, b'f', b'o', b'o'];
        let value = decode(&buf).unwrap();
        assert_eq!(value.get_path(&[1, 2]).and_then(|v| v.as_str()), Some("foo"));
        assert_eq!(encode(&value), buf);
    }

    #[test]
    fn test_payload_fallback_to_bytes() {
        // 0xff 0xff はメッセージにもUTF-8にもならない
        let buf = [0x0a, 0x02, 0xff, 0xff];
        let value = decode(&buf).unwrap();
        assert_eq!(value.get(1), Some(&PbValue::Bytes(vec![0xff, 0xff])));
        assert_eq!(encode(&value), buf);
    }

    #[test]
    fn test_empty_payload_is_empty_string() {
        let buf = [0x0a, 0x00, 0x10, 0x01];
        let value = decode(&buf).unwrap();
        assert_eq!(value.get(1), Some(&PbValue::String(String::new())));
        assert_eq!(encode(&value), buf);
    }

    #[test]
    fn test_non_canonical_varint_kept_raw() {
        // {1: {1: 0}} だが内側のvarintが冗長表現（0x80 0x00）
        let buf = [0x0a, 0x03, 0x08, 0x80, 0x00];
        let value = decode(&buf).unwrap();
        assert_eq!(value.get(1), Some(&PbValue::Bytes(vec![0x08, 0x80, 0x00])));
        assert_eq!(encode(&value), buf);
    }

    #[test]
    fn test_top_level_invalid_wire_type_falls_back() {
        // wire type 3（start group）は非対応
        let value = decode(b"Cgwq").unwrap();
        assert_eq!(value, PbValue::String("Cgwq".to_string()));
        assert_eq!(encode(&value), b"Cgwq");
    }

    #[test]
    fn test_empty_buffer_is_malformed() {
        assert!(matches!(decode(&[]), Err(CodecError::MalformedBuffer(_))));
    }

    #[test]
    fn test_truncated_prefixes_are_malformed() {
        let buf = [
            0x0a, 0x05, 0x12, 0x03, b'f', b'o', b'o', // {1: {2: "foo"}}
            0x10, 0xac, 0x02, // {2: 300}
            0x1a, 0x03, b'b', b'a', b'r', // {3: "bar"}
        ];
        assert!(decode(&buf).is_ok());

        // フィールド境界以外で切れたプレフィックスはすべてエラー
        let boundaries = [7, 10];
        for len in 1..buf.len() {
            if boundaries.contains(&len) {
                continue;
            }
            let result = decode(&buf[..len]);
            assert!(
                matches!(result, Err(CodecError::MalformedBuffer(_))),
                "prefix of length {} should be malformed: {:?}",
                len,
                result
            );
        }
    }

    #[test]
    fn test_truncated_varint_is_malformed() {
        assert!(matches!(
            decode(&[0x08, 0xff]),
            Err(CodecError::MalformedBuffer(_))
        ));
    }

    #[test]
    fn test_deep_nesting_does_not_overflow() {
        let mut buf = vec![0x08, 0x01];
        for _ in 0..200 {
            let mut outer = vec![0x0a];
            encode_varint(buf.len() as u64, &mut outer);
            outer.extend_from_slice(&buf);
            buf = outer;
        }
        let value = decode(&buf).unwrap();
        assert_eq!(encode(&value), buf);
    }
}
