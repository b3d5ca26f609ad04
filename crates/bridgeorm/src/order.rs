//! ORDER BY helpers shared by both backends.

/// Reverse every term of a comma-separated order clause.
///
/// `ASC` becomes `DESC` and vice versa (matched case-insensitively); a term
/// with no direction gets ` DESC` appended. Blank input is returned as-is.
///
/// ```
/// assert_eq!(
///     bridgeorm::reverse_order("a ASC, b DESC, c"),
///     "a DESC, b ASC, c DESC"
/// );
/// ```
pub fn reverse_order(order: &str) -> String {
    if order.trim().is_empty() {
        return order.to_string();
    }

    order
        .split(',')
        .map(|term| {
            let term = term.trim_end();
            let (head, last) = match term.rfind(char::is_whitespace) {
                Some(idx) => (&term[..idx], term[idx..].trim_start()),
                None => (term, ""),
            };
            if last.eq_ignore_ascii_case("asc") {
                format!("{head} DESC")
            } else if last.eq_ignore_ascii_case("desc") {
                format!("{head} ASC")
            } else {
                format!("{term} DESC")
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Natural-order direction for document backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    /// Any order string containing `DESC` sorts descending.
    ///
    /// The match is case-sensitive: `"id desc"` sorts ascending.
    pub fn from_order(order: &str) -> Self {
        if order.contains("DESC") {
            SortDirection::Descending
        } else {
            SortDirection::Ascending
        }
    }

    /// The `$natural` sort value (`1` / `-1`).
    pub fn as_i32(self) -> i32 {
        match self {
            SortDirection::Ascending => 1,
            SortDirection::Descending => -1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reverses_each_term() {
        assert_eq!(reverse_order("a ASC, b DESC, c"), "a DESC, b ASC, c DESC");
        assert_eq!(reverse_order("name desc"), "name ASC");
    }

    #[test]
    fn only_the_direction_token_changes() {
        assert_eq!(reverse_order("cascade asc"), "cascade DESC");
        assert_eq!(reverse_order("description"), "description DESC");
        assert_eq!(reverse_order("ascore DESC"), "ascore ASC");
    }

    #[test]
    fn blank_order_is_unchanged() {
        assert_eq!(reverse_order(""), "");
        assert_eq!(reverse_order("  "), "  ");
    }

    #[test]
    fn desc_detection_is_case_sensitive() {
        assert_eq!(SortDirection::from_order("id DESC"), SortDirection::Descending);
        assert_eq!(SortDirection::from_order("id desc"), SortDirection::Ascending);
        assert_eq!(SortDirection::from_order("id").as_i32(), 1);
        assert_eq!(SortDirection::Descending.as_i32(), -1);
    }
}
