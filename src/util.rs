/// 秘匿情報をマスキングしてログ出力用の文字列を生成
///
/// 最初の4文字と最後の4文字のみを表示し、中間を***でマスキング。
/// Cookie・APIキー・認可ヘッダーのログ出力に使用する。
///
/// # Examples
/// ```
/// use ytlivechat::util::mask_secret;
/// assert_eq!(mask_secret("AIzaSyABC123def456GHI789"), "AIza***I789");
/// ```
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        // 短い値は全体をマスク
        return "***".to_string();
    }

    let prefix: String = chars[..4].iter().collect();
    let suffix: String = chars[chars.len() - 4..].iter().collect();
    format!("{}***{}", prefix, suffix)
}
