/// Replace `${ENV_VAR}` placeholders in raw config text.
///
/// Unset variables and unterminated placeholders are left as written.
pub fn substitute_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let name = &after[..end];
        match std::env::var(name) {
            Ok(val) if !name.is_empty() => out.push_str(&val),
            _ => out.push_str(&rest[start..start + 2 + end + 1]),
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_known_var() {
        let path = std::env::var("PATH").unwrap_or_default();
        assert_eq!(substitute_env("p=${PATH};"), format!("p={path};"));
    }

    #[test]
    fn leaves_unknown_var() {
        assert_eq!(
            substitute_env("url = \"${HOOKGATE_NONEXISTENT_XYZ}/hook\""),
            "url = \"${HOOKGATE_NONEXISTENT_XYZ}/hook\""
        );
    }

    #[test]
    fn leaves_unterminated_placeholder() {
        assert_eq!(substitute_env("a ${OPEN"), "a ${OPEN");
        assert_eq!(substitute_env("${}"), "${}");
    }

    #[test]
    fn no_placeholders() {
        assert_eq!(substitute_env("plain text"), "plain text");
    }
}
