//! Source locations extracted from the engine's goto replies.

use std::sync::LazyLock;

use regex::Regex;

/// A resolved definition site: file plus byte offset within it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: String,
    pub offset: u64,
}

/// Wire shape of the engine's goto reply: `(goto "<file>" <offset>)`.
///
/// The shape is engine-defined; this pattern is the single place it is
/// interpreted.
static GOTO_REPLY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\(goto\s+"([^"]+)"\s+(\d+)\)"#).expect("goto reply pattern is valid")
});

/// Extract a source location from an output chunk, if one is present.
///
/// Chunks are unframed, so the reply may be surrounded by unrelated output;
/// the first well-formed reply in the chunk wins.
pub fn extract_location(chunk: &str) -> Option<SourceLocation> {
    let caps = GOTO_REPLY.captures(chunk)?;
    let offset = caps[2].parse().ok()?;
    Some(SourceLocation {
        file: caps[1].to_string(),
        offset,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_a_bare_reply() {
        let location = extract_location("(goto \"lib/widgets/button.src\" 1042)").unwrap();
        assert_eq!(location.file, "lib/widgets/button.src");
        assert_eq!(location.offset, 1042);
    }

    #[test]
    fn extracts_a_reply_embedded_in_noise() {
        let chunk = "resolving reference...\n(goto \"core/defs.src\" 7)\nready> ";
        let location = extract_location(chunk).unwrap();
        assert_eq!(location.file, "core/defs.src");
        assert_eq!(location.offset, 7);
    }

    #[test]
    fn ignores_chunks_without_a_reply() {
        assert_eq!(extract_location("compiling core/defs.src\n"), None);
        assert_eq!(extract_location(""), None);
    }

    #[test]
    fn rejects_malformed_replies() {
        // Missing quotes around the file.
        assert_eq!(extract_location("(goto core/defs.src 7)"), None);
        // Non-numeric offset.
        assert_eq!(extract_location("(goto \"core/defs.src\" seven)"), None);
    }

    #[test]
    fn first_reply_in_a_chunk_wins() {
        let chunk = "(goto \"a.src\" 1)(goto \"b.src\" 2)";
        let location = extract_location(chunk).unwrap();
        assert_eq!(location.file, "a.src");
        assert_eq!(location.offset, 1);
    }

    #[test]
    fn zero_offset_is_valid() {
        let location = extract_location("(goto \"a.src\" 0)").unwrap();
        assert_eq!(location.offset, 0);
    }
}
