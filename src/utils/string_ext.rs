//! String helpers shared by logging, metrics and failure contexts

/// Trimmed copy, `None` when nothing is left
///
/// # Example
/// ```ignore
/// let env = clean_optional_string(std::env::var("APP_ENVIRONMENT").ok().as_ref());
/// ```
#[inline]
pub fn clean_optional_string(s: Option<&String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

pub trait StringExt {
    /// Trimmed copy, `None` for blank input
    fn clean(&self) -> Option<String>;

    /// Cut to at most `max_chars` characters; longer input keeps
    /// `max_chars - 3` characters followed by "..."
    fn truncate_ellipsis(&self, max_chars: usize) -> String;
}

impl StringExt for str {
    #[inline]
    fn clean(&self) -> Option<String> {
        let trimmed = self.trim();
        if trimmed.is_empty() { None } else { Some(trimmed.to_string()) }
    }

    fn truncate_ellipsis(&self, max_chars: usize) -> String {
        if self.chars().count() <= max_chars {
            return self.to_string();
        }
        let keep = max_chars.saturating_sub(3);
        let mut out: String = self.chars().take(keep).collect();
        out.push_str("...");
        out
    }
}

impl StringExt for String {
    #[inline]
    fn clean(&self) -> Option<String> {
        self.as_str().clean()
    }

    #[inline]
    fn truncate_ellipsis(&self, max_chars: usize) -> String {
        self.as_str().truncate_ellipsis(max_chars)
    }
}
