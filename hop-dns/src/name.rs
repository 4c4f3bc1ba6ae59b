//! Question name extraction

/// Fixed DNS header length; the question section starts here
pub const HEADER_LEN: usize = 12;

/// Read the first question's name from a raw DNS query
///
/// Labels are joined with `.`. Compression pointers are not followed: a
/// pointer ends the name with the labels read so far. Truncated input yields
/// an empty string.
pub fn parse_query_name(msg: &[u8]) -> String {
    let mut labels: Vec<String> = Vec::new();
    let mut pos = HEADER_LEN;

    loop {
        let Some(&len) = msg.get(pos) else {
            return String::new();
        };
        if len == 0 || len & 0xC0 == 0xC0 {
            break;
        }
        let start = pos + 1;
        let end = start + len as usize;
        let Some(label) = msg.get(start..end) else {
            return String::new();
        };
        labels.push(String::from_utf8_lossy(label).into_owned());
        pos = end;
    }

    labels.join(".")
}
