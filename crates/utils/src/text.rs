/// Appends `suffix` to `value`, cutting `value` short so the result is at most
/// `max_len` bytes. The suffix is always kept whole.
pub fn truncate_with_suffix(value: &str, suffix: &str, max_len: usize) -> String {
    if value.len() + suffix.len() <= max_len {
        return format!("{value}{suffix}");
    }

    let mut end = max_len.saturating_sub(suffix.len()).min(value.len());
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &value[..end], suffix)
}
