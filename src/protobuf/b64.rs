//! base64バリアント変換
//!
//! プラットフォームはパラメータ埋め込みに複数のbase64表現を使い分けている。
//!
//! | タグ  | 表現                                               |
//! |-------|----------------------------------------------------|
//! | `b`   | 標準アルファベット・パディングあり                 |
//! | `u`   | URLセーフ・パディングなし（デコード時は有無を問わない） |
//! | `bu`  | 標準base64をパーセントエンコード（continuation用）  |
//! | `bub` | `bu` の文字列をさらに標準base64でエンコード        |

use std::fmt;
use std::str::FromStr;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};

use super::CodecError;

/// URLセーフ（エンコード時はパディングなし、デコード時は有無を問わない）
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum B64Variant {
    #[serde(rename = "b")]
    Standard,
    #[serde(rename = "u")]
    UrlSafe,
    #[serde(rename = "bu")]
    UrlEncoded,
    #[serde(rename = "bub")]
    DoubleEncoded,
}

impl B64Variant {
    pub fn tag(&self) -> &'static str {
        match self {
            B64Variant::Standard => "b",
            B64Variant::UrlSafe => "u",
            B64Variant::UrlEncoded => "bu",
            B64Variant::DoubleEncoded => "bub",
        }
    }
}

impl fmt::Display for B64Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for B64Variant {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "b" => Ok(B64Variant::Standard),
            "u" => Ok(B64Variant::UrlSafe),
            "bu" => Ok(B64Variant::UrlEncoded),
            "bub" => Ok(B64Variant::DoubleEncoded),
            other => Err(CodecError::UnknownVariant(other.to_string())),
        }
    }
}

/// バイト列を指定バリアントでエンコード
pub fn b64encode(bytes: &[u8], variant: B64Variant) -> String {
    match variant {
        B64Variant::Standard => STANDARD.encode(bytes),
        B64Variant::UrlSafe => URL_SAFE_LENIENT.encode(bytes),
        B64Variant::UrlEncoded => url_encode(&STANDARD.encode(bytes)),
        B64Variant::DoubleEncoded => {
            STANDARD.encode(url_encode(&STANDARD.encode(bytes)).as_bytes())
        }
    }
}

/// 指定バリアントの文字列をバイト列にデコード
pub fn b64decode(token: &str, variant: B64Variant) -> Result<Vec<u8>, CodecError> {
    match variant {
        B64Variant::Standard => standard_decode(token),
        B64Variant::UrlSafe => URL_SAFE_LENIENT
            .decode(token)
            .map_err(|e| CodecError::InvalidBase64(e.to_string())),
        B64Variant::UrlEncoded => standard_decode(&url_decode(token)?),
        B64Variant::DoubleEncoded => {
            let inner = standard_decode(token)?;
            let inner = String::from_utf8(inner).map_err(|_| CodecError::InvalidUtf8)?;
            standard_decode(&url_decode(&inner)?)
        }
    }
}

fn standard_decode(s: &str) -> Result<Vec<u8>, CodecError> {
    STANDARD
        .decode(s)
        .map_err(|e| CodecError::InvalidBase64(e.to_string()))
}

/// encodeURIComponent相当（base64文字列では `+` `/` `=` のみが対象）
fn url_encode(s: &str) -> String {
    utf8_percent_encode(s, NON_ALPHANUMERIC).to_string()
}

fn url_decode(s: &str) -> Result<String, CodecError> {
    percent_decode_str(s)
        .decode_utf8()
        .map(|cow| cow.into_owned())
        .map_err(|_| CodecError::InvalidUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [B64Variant; 4] = [
        B64Variant::Standard,
        B64Variant::UrlSafe,
        B64Variant::UrlEncoded,
        B64Variant::DoubleEncoded,
    ];

    #[test]
    fn test_symmetry_for_all_variants() {
        let inputs: [&[u8]; 5] = [b"", b"a", b"ab", &[0xfb, 0xff, 0xfe, 0x00], b"\xd2\x87\xcc\xc8\x03"];
        for variant in ALL {
            for input in inputs {
                let encoded = b64encode(input, variant);
                assert_eq!(
                    b64decode(&encoded, variant).unwrap(),
                    input,
                    "variant {} input {:?}",
                    variant,
                    input
                );
            }
        }
    }

    #[test]
    fn test_url_safe_is_unpadded() {
        assert_eq!(b64encode(&[0xfb, 0xff], B64Variant::UrlSafe), "-_8");
        // パディング付きの入力も受け付ける
        assert_eq!(b64decode("-_8=", B64Variant::UrlSafe).unwrap(), vec![0xfb, 0xff]);
    }

    #[test]
    fn test_url_encoded_escapes_padding() {
        assert_eq!(b64encode(b"a", B64Variant::UrlEncoded), "YQ%3D%3D");
        // 未エンコードの入力もそのままデコードできる
        assert_eq!(b64decode("YQ==", B64Variant::UrlEncoded).unwrap(), b"a");
    }

    #[test]
    fn test_double_encoded() {
        let encoded = b64encode(b"a", B64Variant::DoubleEncoded);
        assert_eq!(encoded, STANDARD.encode("YQ%3D%3D"));
    }

    #[test]
    fn test_variant_tags() {
        for variant in ALL {
            assert_eq!(variant.tag().parse::<B64Variant>().unwrap(), variant);
        }
        assert_eq!(
            "b64x".parse::<B64Variant>(),
            Err(CodecError::UnknownVariant("b64x".to_string()))
        );
    }

    #[test]
    fn test_invalid_input() {
        assert!(matches!(
            b64decode("!!!", B64Variant::Standard),
            Err(CodecError::InvalidBase64(_))
        ));
    }
}
