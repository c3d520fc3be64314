/// 缺失内容时使用的省略号
pub const ELLIPSIS: &str = "...";

/// 地址统一为小写
pub fn normalize_address(address: &str) -> String {
    address.trim().to_lowercase()
}

/// 缩短地址：前 6 个字符 + ... + 后 4 个字符
pub fn shorten_address(address: &str) -> String {
    let chars: Vec<char> = address.chars().collect();
    if chars.len() <= 10 {
        return address.to_string();
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}{}", head, ELLIPSIS, tail)
}

/// 按字符截断，超长时追加省略号
pub fn truncate_preview(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(max_chars).collect();
    format!("{}{}", cut.trim_end(), ELLIPSIS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shorten_address() {
        assert_eq!(
            shorten_address("0x1234567890abcdef1234"),
            "0x1234...1234"
        );
        assert_eq!(shorten_address("0xabc"), "0xabc");
    }

    #[test]
    fn test_truncate_preview() {
        assert_eq!(truncate_preview("short", 10), "short");
        assert_eq!(truncate_preview("hello world again", 11), "hello world...");
        // 多字节字符按字符计数
        assert_eq!(truncate_preview("彩虹彩虹彩虹", 2), "彩虹...");
    }

    #[test]
    fn test_normalize_address() {
        assert_eq!(normalize_address(" 0xABCdef "), "0xabcdef");
    }
}
