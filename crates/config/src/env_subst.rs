/// Replace `${ENV_VAR}` placeholders in raw config text.
///
/// Unresolvable variables are left as-is.
pub fn substitute_env(input: &str) -> String {
    substitute_env_with(input, |name| std::env::var(name).ok())
}

/// Same as [`substitute_env`] with an injectable lookup, so tests never touch
/// the process environment.
fn substitute_env_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let Some(end) = after.find('}') else {
            // Unterminated: keep the tail verbatim.
            out.push_str(&rest[start..]);
            return out;
        };

        let name = &after[..end];
        match lookup(name).filter(|_| !name.is_empty()) {
            Some(value) => out.push_str(&value),
            None => out.push_str(&rest[start..start + end + 3]),
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "ROOST_TEST_DIR" => Some("/srv/features".to_string()),
            "ROOST_TEST_WORD" => Some("spam".to_string()),
            _ => None,
        }
    }

    #[test]
    fn substitutes_known_vars() {
        assert_eq!(
            substitute_env_with("dir = \"${ROOST_TEST_DIR}\" # ${ROOST_TEST_WORD}", lookup),
            "dir = \"/srv/features\" # spam"
        );
    }

    #[test]
    fn leaves_unknown_and_empty_placeholders() {
        assert_eq!(
            substitute_env_with("${ROOST_NOPE} and ${}", lookup),
            "${ROOST_NOPE} and ${}"
        );
    }

    #[test]
    fn keeps_unterminated_tail() {
        assert_eq!(
            substitute_env_with("a ${ROOST_TEST_WORD} ${oops", lookup),
            "a spam ${oops"
        );
    }

    #[test]
    fn no_placeholders() {
        assert_eq!(substitute_env("plain text"), "plain text");
    }
}
