/// Approximate a token count by counting whitespace-delimited words.
///
/// This is deliberately not a model tokenizer: usage figures produced from it
/// are estimates and must not be billed against.
pub fn estimate(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_whitespace_separated_words() {
        assert_eq!(estimate("a  b   c"), 3);
        assert_eq!(estimate("hello world"), 2);
        assert_eq!(estimate("one"), 1);
    }

    #[test]
    fn empty_and_blank_input_count_zero() {
        assert_eq!(estimate(""), 0);
        assert_eq!(estimate("   \t\n  "), 0);
    }

    #[test]
    fn leading_and_trailing_whitespace_ignored() {
        assert_eq!(estimate("  padded text  "), 2);
    }
}
