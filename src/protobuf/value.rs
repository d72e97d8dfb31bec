//! デコード結果の値ツリー（PbValue）

use serde_json::{json, Value};

use super::codec;

/// ワイヤータイプ（tagの下位3ビット）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    Varint = 0,
    Fixed64 = 1,
    LengthDelimited = 2,
    Fixed32 = 5,
}

impl WireType {
    /// tagからワイヤータイプを取り出す（非対応の型はNone）
    pub fn from_tag(tag: u64) -> Option<Self> {
        match tag & 0x7 {
            0 => Some(WireType::Varint),
            1 => Some(WireType::Fixed64),
            2 => Some(WireType::LengthDelimited),
            5 => Some(WireType::Fixed32),
            _ => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            WireType::Varint => "v",
            WireType::Fixed64 => "f64",
            WireType::LengthDelimited => "ld",
            WireType::Fixed32 => "f32",
        }
    }
}

/// スキーマなしでデコードした値
///
/// `Message` のフィールドは出現順を保持し、同じフィールド番号の重複も許容する。
/// 値は不変として扱い、変更系メソッドは新しい値を返す。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PbValue {
    Varint(u64),
    Fixed64(u64),
    Fixed32(u32),
    /// メッセージとして解釈できなかったUTF-8文字列
    String(String),
    /// メッセージとしても文字列としても解釈できなかったバイト列
    Bytes(Vec<u8>),
    Message(Vec<PbField>),
}

/// メッセージ内の1フィールド
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PbField {
    pub number: u64,
    pub value: PbValue,
}

impl PbField {
    pub fn new(number: u64, value: PbValue) -> Self {
        Self { number, value }
    }
}

impl PbValue {
    pub fn message(fields: Vec<PbField>) -> Self {
        PbValue::Message(fields)
    }

    pub fn wire_type(&self) -> WireType {
        match self {
            PbValue::Varint(_) => WireType::Varint,
            PbValue::Fixed64(_) => WireType::Fixed64,
            PbValue::Fixed32(_) => WireType::Fixed32,
            PbValue::String(_) | PbValue::Bytes(_) | PbValue::Message(_) => {
                WireType::LengthDelimited
            }
        }
    }

    /// フィールド一覧（メッセージ以外は空）
    pub fn fields(&self) -> &[PbField] {
        match self {
            PbValue::Message(fields) => fields,
            _ => &[],
        }
    }

    /// 指定番号の最初のフィールド値を取得
    pub fn get(&self, number: u64) -> Option<&PbValue> {
        self.fields()
            .iter()
            .find(|f| f.number == number)
            .map(|f| &f.value)
    }

    /// 指定番号のフィールド値をすべて出現順で取得
    pub fn get_all(&self, number: u64) -> impl Iterator<Item = &PbValue> {
        self.fields()
            .iter()
            .filter(move |f| f.number == number)
            .map(|f| &f.value)
    }

    /// ネストしたフィールドをパスで辿る（各段で最初の出現を使用）
    pub fn get_path(&self, path: &[u64]) -> Option<&PbValue> {
        path.iter().try_fold(self, |value, number| value.get(*number))
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            PbValue::Varint(n) | PbValue::Fixed64(n) => Some(*n),
            PbValue::Fixed32(n) => Some(u64::from(*n)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PbValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            PbValue::String(s) => Some(s.as_bytes()),
            PbValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_message(&self) -> Option<&[PbField]> {
        match self {
            PbValue::Message(fields) => Some(fields),
            _ => None,
        }
    }

    /// length-delimited値の生ペイロードを取得
    ///
    /// 短い文字列が偶然メッセージとして解釈されることがあるため、
    /// 呼び出し側が別の解釈を試したい場合に使う。
    pub fn payload_bytes(&self) -> Option<Vec<u8>> {
        match self {
            PbValue::String(s) => Some(s.as_bytes().to_vec()),
            PbValue::Bytes(b) => Some(b.clone()),
            PbValue::Message(_) => Some(codec::encode(self)),
            _ => None,
        }
    }

    /// length-delimited値をUTF-8テキストとして取得
    pub fn as_text(&self) -> Option<String> {
        match self {
            PbValue::String(s) => Some(s.clone()),
            _ => self
                .payload_bytes()
                .and_then(|bytes| String::from_utf8(bytes).ok()),
        }
    }

    /// 指定番号の最初のフィールドを置き換えた新しい値を返す
    ///
    /// フィールドが存在しない場合は末尾に追加する。
    /// メッセージ以外の値は空メッセージとして扱う。
    pub fn with_field(&self, number: u64, value: PbValue) -> PbValue {
        let mut fields = self.fields().to_vec();
        match fields.iter_mut().find(|f| f.number == number) {
            Some(field) => field.value = value,
            None => fields.push(PbField::new(number, value)),
        }
        PbValue::Message(fields)
    }

    /// ネストしたフィールドをパス指定で置き換えた新しい値を返す
    ///
    /// 途中のメッセージが存在しない場合は作成する。
    pub fn with_path(&self, path: &[u64], value: PbValue) -> PbValue {
        match path {
            [] => value,
            [number, rest @ ..] => {
                let child = self
                    .get(*number)
                    .cloned()
                    .unwrap_or_else(|| PbValue::Message(Vec::new()));
                self.with_field(*number, child.with_path(rest, value))
            }
        }
    }

    /// デバッグ用のJSON表現
    pub fn to_json(&self) -> Value {
        match self {
            PbValue::Varint(n) | PbValue::Fixed64(n) => json!(n.to_string()),
            PbValue::Fixed32(n) => json!(n),
            PbValue::String(s) => json!(s),
            PbValue::Bytes(b) => json!(b),
            PbValue::Message(fields) => Value::Array(
                fields
                    .iter()
                    .map(|f| {
                        json!({
                            "fid": f.number,
                            "type": f.value.wire_type().label(),
                            "v": f.value.to_json(),
                        })
                    })
                    .collect(),
            ),
        }
    }

    pub(crate) fn type_label(&self) -> &'static str {
        self.wire_type().label()
    }
}
