//! Output truncation helpers.
//!
//! Command output can be arbitrarily large (`find /`, `cat big_log.txt`).
//! Middle-omission truncation preserves both the beginning (invocation
//! context) and the end (final result / error) of the output.

/// Internal buffer cap per stream (stdout / stderr).
pub const INTERNAL_MAX_CHARS: usize = 50_000;

/// Maximum characters returned to the model from one command.
pub const MODEL_MAX_CHARS: usize = 4_000;

/// Truncate `output` to at most `max_chars` characters using middle-omission.
///
/// The split is done on character boundaries, so multi-byte sequences are
/// never broken.
pub fn truncate_output(output: &str, max_chars: usize) -> String {
    if output.len() <= max_chars {
        return output.to_owned();
    }

    let chars: Vec<char> = output.chars().collect();
    let total = chars.len();
    if total <= max_chars {
        return output.to_owned();
    }

    let half = max_chars / 2;
    let head: String = chars[..half].iter().collect();
    let tail: String = chars[total - half..].iter().collect();
    let omitted = total - max_chars;

    format!("{head}\n\n... [output truncated: {omitted} chars omitted] ...\n\n{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_input_returned_as_is() {
        assert_eq!(truncate_output("hello", MODEL_MAX_CHARS), "hello");
    }

    #[test]
    fn over_boundary_preserves_head_and_tail() {
        let input = format!("{}{}{}", "A".repeat(3000), "B".repeat(3000), "C".repeat(3000));
        let result = truncate_output(&input, MODEL_MAX_CHARS);
        assert!(result.starts_with('A'));
        assert!(result.ends_with('C'));
        assert!(result.contains("output truncated"));
    }

    #[test]
    fn unicode_does_not_break_on_boundary() {
        let s: String = "€".repeat(10_000);
        let result = truncate_output(&s, MODEL_MAX_CHARS);
        assert!(result.contains("output truncated"));
    }
}
