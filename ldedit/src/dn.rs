//! Distinguished-name arithmetic.
//!
//! The core treats DNs as opaque byte strings except for the rename path,
//! which needs the leftmost RDN and the parent suffix. A comma separates
//! RDNs only when the run of backslashes immediately before it has even
//! length (including zero); `\,` is an escaped comma, `\\,` a literal
//! backslash followed by a separator, and so on.

/// Split a DN at the first separating comma.
///
/// Returns the leftmost RDN and, when the DN has more than one component,
/// the parent suffix after the comma.
pub fn split_first_rdn(dn: &str) -> (&str, Option<&str>) {
    match separator_positions(dn).first() {
        Some(&i) => (&dn[..i], Some(&dn[i + 1..])),
        None => (dn, None),
    }
}

/// The leftmost RDN of a DN (the whole DN if it has one component).
pub fn first_rdn(dn: &str) -> &str {
    split_first_rdn(dn).0
}

/// Split a DN into its RDN components.
pub fn explode(dn: &str) -> Vec<&str> {
    if dn.is_empty() {
        return Vec::new();
    }
    let mut parts = Vec::new();
    let mut start = 0;
    for i in separator_positions(dn) {
        parts.push(&dn[start..i]);
        start = i + 1;
    }
    parts.push(&dn[start..]);
    parts
}

/// Join RDN components back into a DN.
pub fn join(rdns: &[&str]) -> String {
    rdns.join(",")
}

/// Parse an RDN into attribute-value assertions.
/// `"cn=test+sn=foo"` yields `[("cn", b"test"), ("sn", b"foo")]`.
/// Components without an `=` are dropped.
pub fn rdn_avas(rdn: &str) -> Vec<(String, Vec<u8>)> {
    let mut avas = Vec::new();
    let mut start = 0;
    for i in plus_positions(rdn) {
        push_ava(&rdn[start..i], &mut avas);
        start = i + 1;
    }
    push_ava(&rdn[start..], &mut avas);
    avas
}

fn push_ava(s: &str, avas: &mut Vec<(String, Vec<u8>)>) {
    if let Some(eq) = s.find('=') {
        let ad = s[..eq].trim();
        let value = &s[eq + 1..];
        avas.push((ad.to_string(), value.as_bytes().to_vec()));
    }
}

fn separator_positions(dn: &str) -> Vec<usize> {
    unescaped_positions(dn, b',')
}

fn plus_positions(rdn: &str) -> Vec<usize> {
    unescaped_positions(rdn, b'+')
}

/// Byte positions of every unescaped occurrence of `sep`. A backslash
/// consumes the byte after it, so separators inside an even backslash run
/// count and those after an odd run do not.
fn unescaped_positions(s: &str, sep: u8) -> Vec<usize> {
    let bytes = s.as_bytes();
    let mut positions = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 1 < bytes.len() {
            i += 2;
        } else {
            if bytes[i] == sep {
                positions.push(i);
            }
            i += 1;
        }
    }
    positions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_plain() {
        assert_eq!(
            split_first_rdn("cn=foo,dc=example,dc=com"),
            ("cn=foo", Some("dc=example,dc=com"))
        );
    }

    #[test]
    fn split_single_component() {
        assert_eq!(split_first_rdn("dc=com"), ("dc=com", None));
    }

    #[test]
    fn split_escaped_comma() {
        assert_eq!(
            split_first_rdn("cn=foo\\,bar,dc=com"),
            ("cn=foo\\,bar", Some("dc=com"))
        );
    }

    #[test]
    fn split_escaped_backslash_then_comma() {
        // `\\` is a literal backslash, so the comma after it separates.
        assert_eq!(
            split_first_rdn("cn=foo\\\\,dc=com"),
            ("cn=foo\\\\", Some("dc=com"))
        );
    }

    #[test]
    fn explode_components() {
        assert_eq!(
            explode("cn=foo,dc=example,dc=com"),
            vec!["cn=foo", "dc=example", "dc=com"]
        );
        assert_eq!(explode("cn=foo"), vec!["cn=foo"]);
        assert_eq!(
            explode("cn=foo\\,bar,dc=com"),
            vec!["cn=foo\\,bar", "dc=com"]
        );
        assert!(explode("").is_empty());
    }

    #[test]
    fn join_inverts_explode() {
        let dn = "cn=foo,dc=example,dc=com";
        assert_eq!(join(&explode(dn)), dn);
    }

    #[test]
    fn avas_single() {
        assert_eq!(rdn_avas("cn=test"), vec![("cn".to_string(), b"test".to_vec())]);
    }

    #[test]
    fn avas_multi_valued_rdn() {
        assert_eq!(
            rdn_avas("cn=test+sn=foo"),
            vec![
                ("cn".to_string(), b"test".to_vec()),
                ("sn".to_string(), b"foo".to_vec()),
            ]
        );
    }

    #[test]
    fn avas_escaped_plus() {
        assert_eq!(
            rdn_avas("cn=a\\+b"),
            vec![("cn".to_string(), b"a\\+b".to_vec())]
        );
    }

    #[test]
    fn avas_without_equals_dropped() {
        assert!(rdn_avas("garbage").is_empty());
    }
}
