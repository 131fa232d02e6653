pub mod store;

/// Turns a TFVC branch leaf into a legal Git ref component.
///
/// Runs of disallowed characters (ASCII controls, space, `\ ? * [ ~ ^ :`,
/// DEL and `-` itself) collapse into a single `-`; runs at the start or end
/// of the name are dropped entirely so the result never begins or ends with
/// `-`.
pub fn legalize_ref_name(raw_name: &str) -> String {
    let mut legal_name = String::with_capacity(raw_name.len());
    let mut pending_sep = false;

    for chr in raw_name.chars() {
        let disallowed = chr <= ' '
            || chr.is_control()
            || matches!(chr, '\\' | '?' | '*' | '[' | '~' | '^' | ':' | '\x7f' | '-');
        if disallowed {
            if !legal_name.is_empty() {
                pending_sep = true;
            }
        } else {
            if pending_sep {
                legal_name.push('-');
                pending_sep = false;
            }
            legal_name.push(chr);
        }
    }

    if legal_name.is_empty() {
        legal_name.push_str("branch");
    }

    legal_name
}

#[cfg(test)]
mod tests {
    use super::legalize_ref_name;

    #[test]
    fn legalizes_names() {
        assert_eq!(legalize_ref_name("Release"), "Release");
        assert_eq!(legalize_ref_name("Release 1.0"), "Release-1.0");
        assert_eq!(legalize_ref_name("a  b"), "a-b");
        assert_eq!(legalize_ref_name("a-~-b"), "a-b");
        assert_eq!(legalize_ref_name("weird:name?"), "weird-name");
        assert_eq!(legalize_ref_name(" lead and trail "), "lead-and-trail");
        assert_eq!(legalize_ref_name("---"), "branch");
        assert_eq!(legalize_ref_name("v1.2"), "v1.2");
    }
}
