//! スパチャ（有料メッセージ）の金額・色解析モジュール
//!
//! ## 機能
//! - 金額表示文字列から金額と通貨コードを抽出
//! - 通貨記号からISO通貨コードへの変換
//! - ヘッダー背景色から色区分と重要度(1-7)を判定

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// 金額部分（数字・ピリオド・カンマの連続）
static AMOUNT_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\d.,]+").unwrap());

/// 通貨記号 → ISO通貨コード
const SYMBOL_TO_CURRENCY: &[(&str, &str)] = &[
    ("$", "USD"),
    ("£", "GBP"),
    ("¥", "JPY"),
    ("JP¥", "JPY"),
    ("₩", "KRW"),
    ("₪", "ILS"),
    ("€", "EUR"),
    ("₱", "PHP"),
    ("₹", "INR"),
    ("A$", "AUD"),
    ("CA$", "CAD"),
    ("HK$", "HKD"),
    ("MX$", "MXN"),
    ("NT$", "TWD"),
    ("NZ$", "NZD"),
    ("R$", "BRL"),
];

/// ヘッダー背景色（ARGB）による色区分
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuperChatColor {
    Blue,
    LightBlue,
    Green,
    Yellow,
    Orange,
    Magenta,
    Red,
}

impl SuperChatColor {
    /// ヘッダー背景色から色区分を判定（未知の色はNone）
    pub fn from_header_color(argb: u64) -> Option<Self> {
        match argb {
            4_279_592_384 => Some(SuperChatColor::Blue),
            4_278_237_396 => Some(SuperChatColor::LightBlue),
            4_278_239_141 => Some(SuperChatColor::Green),
            4_294_947_584 => Some(SuperChatColor::Yellow),
            4_293_284_096 => Some(SuperChatColor::Orange),
            4_290_910_299 => Some(SuperChatColor::Magenta),
            4_291_821_568 => Some(SuperChatColor::Red),
            _ => None,
        }
    }

    /// 重要度（1 = 最低額帯, 7 = 最高額帯）
    pub fn significance(&self) -> u8 {
        match self {
            SuperChatColor::Blue => 1,
            SuperChatColor::LightBlue => 2,
            SuperChatColor::Green => 3,
            SuperChatColor::Yellow => 4,
            SuperChatColor::Orange => 5,
            SuperChatColor::Magenta => 6,
            SuperChatColor::Red => 7,
        }
    }
}

/// RGBA色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    /// ARGB整数から変換
    pub fn from_argb(argb: u64) -> Self {
        Self {
            a: ((argb >> 24) & 0xff) as u8,
            r: ((argb >> 16) & 0xff) as u8,
            g: ((argb >> 8) & 0xff) as u8,
            b: (argb & 0xff) as u8,
        }
    }
}

/// スパチャの金額情報
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuperChat {
    pub amount: f64,
    /// ISO通貨コード（変換できない場合は表示上の記号そのまま）
    pub currency: String,
    pub color: Option<SuperChatColor>,
    pub significance: Option<u8>,
    pub header_background_color: Color,
    pub header_text_color: Color,
    pub body_background_color: Color,
    pub body_text_color: Color,
}

impl SuperChat {
    /// 金額表示文字列と色情報から組み立てる
    ///
    /// 金額が解析できない場合はNone。
    pub fn from_parts(
        purchase_amount_text: &str,
        header_background_color: u64,
        header_text_color: u64,
        body_background_color: u64,
        body_text_color: u64,
    ) -> Option<Self> {
        let (amount, currency) = parse_amount_text(purchase_amount_text)?;
        let color = SuperChatColor::from_header_color(header_background_color);
        if color.is_none() {
            log::debug!("Unknown superchat header color: {}", header_background_color);
        }

        Some(Self {
            amount,
            currency,
            color,
            significance: color.map(|c| c.significance()),
            header_background_color: Color::from_argb(header_background_color),
            header_text_color: Color::from_argb(header_text_color),
            body_background_color: Color::from_argb(body_background_color),
            body_text_color: Color::from_argb(body_text_color),
        })
    }
}

/// 通貨記号をISO通貨コードに変換（未知の記号はそのまま返す）
pub fn to_currency_code(symbol: &str) -> String {
    SYMBOL_TO_CURRENCY
        .iter()
        .find(|(s, _)| *s == symbol)
        .map(|(_, code)| code.to_string())
        .unwrap_or_else(|| symbol.to_string())
}

/// 金額表示文字列から金額と通貨コードを抽出
/// 例: "¥1,000" → (1000.0, "JPY")
///
/// ## エッジケース
/// - 数字を含まない場合はNone
/// - 欧州形式（"€5,00"）はカンマを小数点として扱う
pub fn parse_amount_text(text: &str) -> Option<(f64, String)> {
    let found = AMOUNT_REGEX.find(text)?;
    let digits = found.as_str();

    // 欧州形式の判定: カンマの後に1-2桁の数字で終わる（例: "5,00", "1.000,50"）
    let has_comma_decimal = match digits.rfind(',') {
        Some(comma_pos) => {
            let after_comma = &digits[comma_pos + 1..];
            !after_comma.is_empty()
                && after_comma.len() <= 2
                && after_comma.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    };

    let cleaned = if has_comma_decimal {
        digits.replace('.', "").replace(',', ".")
    } else {
        digits.replace(',', "")
    };

    let amount: f64 = match cleaned.parse() {
        Ok(amount) => amount,
        Err(_) => {
            log::warn!("Failed to parse superchat amount: '{}' (cleaned: '{}')", text, cleaned);
            return None;
        }
    };

    let symbol = AMOUNT_REGEX.replace(text, "");
    Some((amount, to_currency_code(symbol.trim())))
}
