/// Single-quotes `value` for POSIX `sh`, closing and reopening the quote
/// around embedded single quotes.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Seconds with millisecond precision, as accepted by `sleep`.
pub fn sleep_arg(ms: u64) -> String {
    format!("{}.{:03}", ms / 1000, ms % 1000)
}

#[cfg(test)]
mod tests {
    use super::{shell_quote, sleep_arg};

    #[test]
    fn quotes_plain_and_embedded_quotes() {
        assert_eq!(shell_quote("abc"), "'abc'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
        assert_eq!(shell_quote("a \"b\" $c"), "'a \"b\" $c'");
    }

    #[test]
    fn sleep_arg_formats_millis() {
        assert_eq!(sleep_arg(2_000), "2.000");
        assert_eq!(sleep_arg(250), "0.250");
        assert_eq!(sleep_arg(0), "0.000");
    }
}
