//! デバッグ用のツリー表示

use std::fmt::Write;

use super::value::PbValue;

const INDENT: &str = "    ";

/// 値ツリーをインデント付きテキストに整形
///
/// 各フィールドは `[番号 (型)] -> 値` の形式で1行ずつ出力される。
/// 同じ入力に対しては常に同じ出力になる。
pub fn pretty(value: &PbValue) -> String {
    let mut out = String::new();
    write_value(value, 0, &mut out);
    out
}

fn write_value(value: &PbValue, depth: usize, out: &mut String) {
    match value {
        PbValue::Message(fields) => {
            for field in fields {
                let pad = INDENT.repeat(depth);
                match &field.value {
                    PbValue::Message(_) => {
                        let _ = writeln!(
                            out,
                            "{}[{} ({})] ->",
                            pad,
                            field.number,
                            field.value.type_label()
                        );
                        write_value(&field.value, depth + 1, out);
                    }
                    other => {
                        let _ = writeln!(
                            out,
                            "{}[{} ({})] -> {}",
                            pad,
                            field.number,
                            other.type_label(),
                            scalar(other)
                        );
                    }
                }
            }
        }
        other => {
            let _ = writeln!(out, "{}{}", INDENT.repeat(depth), scalar(other));
        }
    }
}

fn scalar(value: &PbValue) -> String {
    match value {
        PbValue::Varint(n) | PbValue::Fixed64(n) => n.to_string(),
        PbValue::Fixed32(n) => n.to_string(),
        PbValue::String(s) => format!("{:?}", s),
        PbValue::Bytes(b) => {
            let hex: Vec<String> = b.iter().map(|byte| format!("{:02x}", byte)).collect();
            format!("<{}>", hex.join(" "))
        }
        PbValue::Message(_) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protobuf::value::PbField;

    #[test]
    fn test_pretty_nested() {
        let value = PbValue::message(vec![
            PbField::new(1, PbValue::String("abc".to_string())),
            PbField::new(
                2,
                PbValue::message(vec![PbField::new(3, PbValue::Varint(7))]),
            ),
            PbField::new(4, PbValue::Bytes(vec![0xff, 0x00])),
        ]);

        let expected = "[1 (ld)] -> \"abc\"\n[2 (ld)] ->\n    [3 (v)] -> 7\n[4 (ld)] -> <ff 00>\n";
        assert_eq!(pretty(&value), expected);
        assert_eq!(pretty(&value), pretty(&value.clone()));
    }

    #[test]
    fn test_pretty_scalar_root() {
        assert_eq!(pretty(&PbValue::String("x".to_string())), "\"x\"\n");
    }
}
