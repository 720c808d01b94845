use crate::error::ProxyError;

/// Maximum number of compression-pointer jumps followed while decoding a
/// single name, guarding against pointer loops in malformed input.
const MAX_POINTER_JUMPS: usize = 32;

/// Decode a domain name starting at `pos` in `buf`, following RFC 1035
/// §4.1.4 compression pointers. Returns the dotted, lowercase,
/// trailing-dot-terminated name and the offset just past the name *in
/// the original (non-pointer-followed) stream*.
pub fn decode_name(buf: &[u8], pos: usize) -> Result<(String, usize), ProxyError> {
    let mut labels: Vec<String> = Vec::new();
    let mut cursor = pos;
    let mut end_of_name: Option<usize> = None;
    let mut jumps = 0usize;

    loop {
        let len_byte = *buf.get(cursor).ok_or(ProxyError::MalformedQuery)?;

        if len_byte == 0 {
            cursor += 1;
            if end_of_name.is_none() {
                end_of_name = Some(cursor);
            }
            break;
        }

        if len_byte & 0xC0 == 0xC0 {
            let second = *buf.get(cursor + 1).ok_or(ProxyError::MalformedQuery)?;
            let pointer = (((len_byte as u16) & 0x3F) << 8) | second as u16;
            if end_of_name.is_none() {
                end_of_name = Some(cursor + 2);
            }
            jumps += 1;
            if jumps > MAX_POINTER_JUMPS {
                return Err(ProxyError::MalformedQuery);
            }
            cursor = pointer as usize;
            continue;
        }

        if len_byte & 0xC0 != 0 {
            return Err(ProxyError::MalformedQuery);
        }

        let label_len = len_byte as usize;
        let start = cursor + 1;
        let end = start + label_len;
        let label_bytes = buf.get(start..end).ok_or(ProxyError::MalformedQuery)?;
        let label =
            String::from_utf8(label_bytes.to_vec()).map_err(|_| ProxyError::MalformedQuery)?;
        labels.push(label.to_lowercase());
        cursor = end;
    }

    let mut name = labels.join(".");
    name.push('.');
    if name == "." && labels.is_empty() {
        name = ".".to_string();
    }
    Ok((name, end_of_name.unwrap_or(cursor)))
}

/// Encode a canonical (trailing-dot) domain name without compression.
/// Compression on write is not required by the spec and is skipped for
/// simplicity; every response remains valid, just not maximally compact.
pub fn encode_name(name: &str, out: &mut Vec<u8>) -> Result<(), ProxyError> {
    let trimmed = name.trim_end_matches('.');
    if trimmed.is_empty() {
        out.push(0);
        return Ok(());
    }
    for label in trimmed.split('.') {
        if label.len() > 63 {
            return Err(ProxyError::MalformedQuery);
        }
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);
    Ok(())
}

/// Canonicalize a user- or file-supplied domain to the storage form used
/// throughout the crate: lowercase with a trailing dot (spec §3, §9).
pub fn canonicalize(name: &str) -> String {
    let lower = name.to_lowercase();
    if lower.ends_with('.') {
        lower
    } else {
        format!("{lower}.")
    }
}

/// Inverse of [`canonicalize`] for display at external boundaries (spec
/// §9 Open Question: "external API returns dotless").
pub fn display_without_dot(name: &str) -> String {
    name.trim_end_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_plain_name() {
        let mut buf = Vec::new();
        encode_name("example.com.", &mut buf).unwrap();
        let (name, end) = decode_name(&buf, 0).unwrap();
        assert_eq!(name, "example.com.");
        assert_eq!(end, buf.len());
    }

    #[test]
    fn decodes_root() {
        let mut buf = Vec::new();
        encode_name(".", &mut buf).unwrap();
        let (name, _) = decode_name(&buf, 0).unwrap();
        assert_eq!(name, ".");
    }

    #[test]
    fn follows_compression_pointer() {
        let mut buf = Vec::new();
        encode_name("example.com.", &mut buf).unwrap(); // offset 0
        let pointer_offset = buf.len();
        buf.push(0xC0);
        buf.push(0x00);
        let (name, end) = decode_name(&buf, pointer_offset).unwrap();
        assert_eq!(name, "example.com.");
        assert_eq!(end, pointer_offset + 2);
    }

    #[test]
    fn rejects_pointer_loop() {
        let buf = vec![0xC0, 0x00];
        assert!(decode_name(&buf, 0).is_err());
    }

    #[test]
    fn canonicalizes_case_and_dot() {
        assert_eq!(canonicalize("Example.COM"), "example.com.");
        assert_eq!(canonicalize("example.com."), "example.com.");
        assert_eq!(display_without_dot("example.com."), "example.com");
    }
}
