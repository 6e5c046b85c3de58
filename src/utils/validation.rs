use crate::error::{AppError, Result};
use url::Url;

/// 地址无法解析时提示用户的文案
pub const INVALID_URL_MESSAGE: &str = "Please enter a valid URL (including http:// or https://)";

/// 判断是否为带主机部分的绝对 URL
pub fn is_absolute_url(input: &str) -> bool {
    match Url::parse(input) {
        Ok(url) => url.has_host(),
        Err(_) => false,
    }
}

/// 校验书签目标地址
pub fn validate_target_url(input: &str) -> Result<()> {
    if !is_absolute_url(input) {
        return Err(AppError::Validation(INVALID_URL_MESSAGE.to_string()));
    }
    Ok(())
}

/// 空白字段视为未填写
pub fn is_blank(input: &str) -> bool {
    input.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_valid_urls() {
        assert!(is_absolute_url("https://github.com"));
        assert!(is_absolute_url("http://localhost:8080/path?q=1#frag"));
        assert!(is_absolute_url("ftp://files.example.com/pub"));
    }

    #[test]
    fn test_invalid_urls() {
        assert!(!is_absolute_url(""));
        assert!(!is_absolute_url("not a url"));
        assert!(!is_absolute_url("ftp-not-a-url"));
        assert!(!is_absolute_url("github.com"));
        assert!(!is_absolute_url("/relative/path"));
        assert!(!is_absolute_url("mailto:someone@example.com"));
    }

    #[test]
    fn test_validate_target_url_message() {
        match validate_target_url("not a url") {
            Err(AppError::Validation(msg)) => assert_eq!(msg, INVALID_URL_MESSAGE),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_is_blank() {
        assert!(is_blank(""));
        assert!(is_blank("   \t"));
        assert!(!is_blank(" GitHub "));
    }

    proptest! {
        #[test]
        fn prop_strings_without_colon_are_rejected(s in "[a-zA-Z0-9 ./_-]{0,40}") {
            prop_assert!(!is_absolute_url(&s));
        }

        #[test]
        fn prop_http_urls_with_host_are_accepted(host in "[a-z]{1,12}", tld in "(com|org|dev|io)") {
            let url = format!("https://{}.{}/", host, tld);
            prop_assert!(is_absolute_url(&url));
        }
    }
}
