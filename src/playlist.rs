use std::fmt::Write as _;

/// Renders the sliding-window playlist, in the exact literal format expected
/// by downstream HLS players.
///
/// `TARGETDURATION` and every `EXTINF` are hardcoded to `10` when
/// `hardcoded_duration` is `true` (the legacy behavior this crate preserves
/// by default, see DESIGN.md's REDESIGN FLAGS entry); set it to `false` to
/// render the real configured segment duration instead.
pub fn render(names: &[String], deleted_count: u64, segment_duration_secs: u64, hardcoded_duration: bool) -> String {
    let duration = if hardcoded_duration { 10 } else { segment_duration_secs };

    let mut out = String::new();
    let _ = writeln!(out, "#EXTM3U");
    let _ = writeln!(out, "#EXT-X-VERSION:3");
    let _ = writeln!(out, "#EXT-X-ALLOW-CACHE:NO");
    let _ = writeln!(out, "#EXT-X-TARGETDURATION:{duration}");
    let _ = writeln!(out, "#EXT-X-MEDIA-SEQUENCE:{deleted_count}");
    for name in names {
        let _ = writeln!(out, "#EXTINF:{duration},");
        let _ = writeln!(out, "{name}.ts");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_exact_literal_format() {
        let names = vec!["a".to_string(), "b".to_string()];
        let out = render(&names, 4, 1, true);
        let expected = "#EXTM3U\n\
#EXT-X-VERSION:3\n\
#EXT-X-ALLOW-CACHE:NO\n\
#EXT-X-TARGETDURATION:10\n\
#EXT-X-MEDIA-SEQUENCE:4\n\
#EXTINF:10,\n\
a.ts\n\
#EXTINF:10,\n\
b.ts\n";
        assert_eq!(out, expected);
    }

    #[test]
    fn non_hardcoded_mode_uses_real_duration() {
        let names = vec!["x".to_string()];
        let out = render(&names, 0, 4, false);
        assert!(out.contains("#EXT-X-TARGETDURATION:4"));
        assert!(out.contains("#EXTINF:4,"));
    }

    #[test]
    fn rendering_twice_with_same_input_is_byte_identical() {
        let names = vec!["seg1".to_string()];
        assert_eq!(render(&names, 2, 10, true), render(&names, 2, 10, true));
    }

    #[test]
    fn empty_window_still_renders_header_only() {
        let out = render(&[], 0, 10, true);
        assert!(out.starts_with("#EXTM3U\n"));
        assert!(!out.contains("#EXTINF"));
    }
}
