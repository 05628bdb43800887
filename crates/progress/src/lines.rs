/// Splits a chunk of tool output into trimmed, non-empty lines.
///
/// Carriage returns are treated as line breaks because the package tool
/// redraws progress bars with `\r`.
pub fn split_lines(chunk: &str) -> impl Iterator<Item = &str> {
    chunk
        .split(['\n', '\r'])
        .map(str::trim)
        .filter(|line| !line.is_empty())
}
