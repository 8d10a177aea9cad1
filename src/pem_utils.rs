/// Characters per base64 line inside a PEM block.
pub const LINE_WIDTH: usize = 64;

/// Removes all whitespace, including embedded line breaks, from a base64
/// payload.
pub fn strip_whitespace(payload: &str) -> String {
    payload.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Splits a base64 payload into lines of at most [`LINE_WIDTH`] characters.
pub fn wrap_lines(payload: &str) -> Vec<String> {
    let chars: Vec<char> = payload.chars().collect();
    chars
        .chunks(LINE_WIDTH)
        .map(|line| line.iter().collect())
        .collect()
}

/// Frames a base64 payload as a PEM block with the given label, LF line
/// endings and a trailing newline.
pub fn frame(label: &str, payload: &str) -> String {
    let mut block = format!("-----BEGIN {label}-----\n");
    for line in wrap_lines(&strip_whitespace(payload)) {
        block.push_str(&line);
        block.push('\n');
    }
    block.push_str(&format!("-----END {label}-----\n"));
    block
}

/// Parses every PEM block in `text`, returning `(label, DER)` pairs.
pub fn parse_blocks(text: &str) -> Result<Vec<(String, Vec<u8>)>, pem::PemError> {
    Ok(pem::parse_many(text)?
        .into_iter()
        .map(|p| (p.tag().to_string(), p.contents().to_vec()))
        .collect())
}
