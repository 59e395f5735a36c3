//! 分词模块
//!
//! 提供中英文混合分词能力，供离线的哈希嵌入使用。
//! 使用 jieba-rs 进行中文分词，英文按空白分词并去掉首尾标点。

use std::sync::OnceLock;

use jieba_rs::Jieba;

/// 全局 Jieba 实例（延迟初始化）
static JIEBA: OnceLock<Jieba> = OnceLock::new();

fn get_jieba() -> &'static Jieba {
    JIEBA.get_or_init(Jieba::new)
}

/// 判断字符是否为 CJK（中日韩）字符
fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}' |   // CJK Unified Ideographs
        '\u{3400}'..='\u{4DBF}' |   // CJK Unified Ideographs Extension A
        '\u{F900}'..='\u{FAFF}' |   // CJK Compatibility Ideographs
        '\u{3040}'..='\u{309F}' |   // Hiragana
        '\u{30A0}'..='\u{30FF}'     // Katakana
    )
}

/// 判断文本是否包含 CJK 字符
pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(is_cjk)
}

fn clean(token: &str) -> String {
    token
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase()
}

/// 智能分词：根据文本内容自动选择分词策略
/// - 包含 CJK 字符时使用 jieba 分词
/// - 纯英文时使用空白分词
pub fn tokenize(text: &str) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    if contains_cjk(text) {
        // 搜索引擎模式，更细粒度
        get_jieba()
            .cut_for_search(text, true)
            .into_iter()
            .map(clean)
            .filter(|s| !s.is_empty() && (s.len() > 1 || is_cjk(s.chars().next().unwrap_or(' '))))
            .collect()
    } else {
        text.split_whitespace()
            .map(clean)
            .filter(|s| !s.is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_chinese() {
        let tokens = tokenize("我喜欢编程和人工智能");
        assert!(!tokens.is_empty());
        assert!(tokens.iter().any(|t| t.contains("编程") || t.contains("人工") || t.contains("智能")));
    }

    #[test]
    fn test_tokenize_english_strips_punctuation() {
        let tokens = tokenize("add:\nAdd two numbers.");
        assert_eq!(tokens, ["add", "add", "two", "numbers"]);
    }

    #[test]
    fn test_tokenize_mixed() {
        let tokens = tokenize("我喜欢 Rust 编程语言");
        assert!(tokens.iter().any(|t| t == "rust" || t.contains("编程")));
    }

    #[test]
    fn test_contains_cjk() {
        assert!(contains_cjk("你好"));
        assert!(contains_cjk("Hello 世界"));
        assert!(!contains_cjk("Hello World"));
    }
}
