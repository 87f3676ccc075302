use crate::conversions::bytes_to_utf16;

/// Parse a raw UTF-16 environment block into `(key, value)` pairs.
///
/// Entries are NUL-terminated `KEY=VALUE` strings ending with an empty entry.
/// Keys may start with `=` (per-drive directories such as `=C:=C:\dir`), so
/// the separator is the first `=` after the first character. Entries without
/// a separator are skipped, as is an unterminated trailing entry left by a
/// clamped read.
pub fn parse_environment_block(bytes: &[u8]) -> Vec<(String, String)> {
    let units = bytes_to_utf16(bytes);
    let mut vars = Vec::new();
    let mut start = 0;

    while start < units.len() {
        let end = match units[start..].iter().position(|&c| c == 0) {
            Some(len) => start + len,
            None => break,
        };

        if end == start {
            break;
        }

        let entry = String::from_utf16_lossy(&units[start..end]);
        if let Some((key, value)) = split_entry(&entry) {
            vars.push((key.to_string(), value.to_string()));
        }
        start = end + 1;
    }

    vars
}

fn split_entry(entry: &str) -> Option<(&str, &str)> {
    let mut chars = entry.char_indices();
    let (_, first) = chars.next()?;
    let skip = first.len_utf8();
    let sep = entry[skip..].find('=')? + skip;
    Some((&entry[..sep], &entry[sep + 1..]))
}

/// Find a variable by case-insensitive key, as Windows does.
pub fn lookup<'a>(vars: &'a [(String, String)], key: &str) -> Option<&'a str> {
    vars.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(entries: &[&str]) -> Vec<u8> {
        let mut units: Vec<u16> = Vec::new();
        for e in entries {
            units.extend(e.encode_utf16());
            units.push(0);
        }
        units.push(0);
        units.iter().flat_map(|u| u.to_le_bytes()).collect()
    }

    #[test]
    fn parses_plain_entries() {
        let vars = parse_environment_block(&block(&["PATH=C:\\bin", "HOME=C:\\Users\\me"]));
        assert_eq!(
            vars,
            vec![
                ("PATH".to_string(), "C:\\bin".to_string()),
                ("HOME".to_string(), "C:\\Users\\me".to_string()),
            ]
        );
    }

    #[test]
    fn keeps_drive_letter_keys() {
        let vars = parse_environment_block(&block(&["=C:=C:\\dir", "=ExitCode=00000000"]));
        assert_eq!(vars[0], ("=C:".to_string(), "C:\\dir".to_string()));
        assert_eq!(vars[1], ("=ExitCode".to_string(), "00000000".to_string()));
    }

    #[test]
    fn value_may_contain_equals() {
        let vars = parse_environment_block(&block(&["OPTS=a=b=c"]));
        assert_eq!(vars[0], ("OPTS".to_string(), "a=b=c".to_string()));
    }

    #[test]
    fn truncated_tail_is_dropped() {
        let mut bytes = block(&["A=1", "B=2"]);
        let tail: Vec<u8> = "C=partial".encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
        // Replace the final terminator with an unterminated entry.
        bytes.truncate(bytes.len() - 2);
        bytes.extend(tail);
        let vars = parse_environment_block(&bytes);
        assert_eq!(vars.len(), 2);
        assert_eq!(lookup(&vars, "b"), Some("2"));
    }

    #[test]
    fn odd_byte_count_is_tolerated() {
        let mut bytes = block(&["A=1"]);
        bytes.push(0x7f);
        assert_eq!(parse_environment_block(&bytes).len(), 1);
    }

    #[test]
    fn entries_without_separator_are_skipped() {
        let vars = parse_environment_block(&block(&["garbage", "=", "K=v"]));
        assert_eq!(vars, vec![("K".to_string(), "v".to_string())]);
    }

    #[test]
    fn empty_block() {
        assert!(parse_environment_block(&[]).is_empty());
        assert!(parse_environment_block(&[0, 0]).is_empty());
    }
}
