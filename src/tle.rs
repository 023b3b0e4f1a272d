//! Two-line-element text parsing and serialization.
//!
//! Accepts both the 3-line format (name line followed by the two element
//! lines) and the bare 2-line format, and serializes stored records back
//! to byte-identical element lines for export.

use crate::store::OrbitRecord;

/// One parsed TLE group: optional name line plus the two element lines,
/// trailing whitespace stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TleGroup {
    pub name: Option<String>,
    pub line1: String,
    pub line2: String,
}

/// Scan raw TLE text for element-line pairs.
///
/// A group is recognized when a line starting `"2 "` follows a line
/// starting `"1 "`, both at least 69 characters. The line before the
/// pair, when present, is taken as the satellite name; a Spacetrack
/// `"0 "` prefix is stripped. Anything that never forms a valid pair is
/// skipped, so arbitrary junk between groups is tolerated.
pub fn parse_tle_text(text: &str) -> Vec<TleGroup> {
    let mut groups = Vec::new();
    let mut b0 = "";
    let mut b1 = "";

    for raw in text.lines() {
        let b2 = raw.trim_end();
        if b2.starts_with("2 ") && b2.len() >= 69 && b1.starts_with("1 ") && b1.len() >= 69 {
            let name = match b0 {
                "" => None,
                n => Some(n.strip_prefix("0 ").unwrap_or(n).to_string()),
            };
            groups.push(TleGroup {
                name,
                line1: b1.to_string(),
                line2: b2.to_string(),
            });
            // don't accidentally use line 2 as the next satellite's name
            b0 = "";
            b1 = "";
        } else {
            b0 = b1;
            b1 = b2;
        }
    }

    groups
}

/// Serialize records back to TLE text.
///
/// Element lines are written exactly as stored; the name line is omitted
/// for records imported from the 2-line format, so a parse/serialize
/// round trip reproduces the input modulo trailing whitespace.
pub fn to_tle_text(records: &[OrbitRecord]) -> String {
    let mut out = String::new();
    for record in records {
        if !record.name.is_empty() {
            out.push_str(&record.name);
            out.push('\n');
        }
        out.push_str(&record.line1);
        out.push('\n');
        out.push_str(&record.line2);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINE1: &str = "1 25544U 98067A   08264.51782528 -.00002182  00000-0 -11606-4 0  2927";
    const LINE2: &str = "2 25544  51.6416 247.4627 0006703 130.5360 325.0288 15.72125391563537";

    #[test]
    fn parses_three_line_format() {
        let text = format!("ISS (ZARYA)\n{}\n{}\n", LINE1, LINE2);
        let groups = parse_tle_text(&text);

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name.as_deref(), Some("ISS (ZARYA)"));
        assert_eq!(groups[0].line1, LINE1);
        assert_eq!(groups[0].line2, LINE2);
    }

    #[test]
    fn parses_two_line_format_without_name() {
        let text = format!("{}\n{}\n", LINE1, LINE2);
        let groups = parse_tle_text(&text);

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, None);
    }

    #[test]
    fn strips_spacetrack_name_prefix() {
        let text = format!("0 ISS (ZARYA)\n{}\n{}\n", LINE1, LINE2);
        let groups = parse_tle_text(&text);

        assert_eq!(groups[0].name.as_deref(), Some("ISS (ZARYA)"));
    }

    #[test]
    fn tolerates_junk_between_groups() {
        let text = format!("# comment\n\n{}\n{}\ntrailing noise\n", LINE1, LINE2);
        let groups = parse_tle_text(&text);

        assert_eq!(groups.len(), 1, "junk lines must not hide the group");
    }

    #[test]
    fn short_element_lines_are_rejected() {
        let text = format!("NAME\n1 25544U 98067A   08264.51782528\n{}\n", LINE2);
        assert!(parse_tle_text(&text).is_empty());
    }

    #[test]
    fn strips_trailing_whitespace_from_lines() {
        let text = format!("ISS (ZARYA)  \r\n{}  \r\n{}\r\n", LINE1, LINE2);
        let groups = parse_tle_text(&text);

        assert_eq!(groups[0].name.as_deref(), Some("ISS (ZARYA)"));
        assert_eq!(groups[0].line1, LINE1);
    }
}
