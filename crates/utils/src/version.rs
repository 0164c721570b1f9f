use std::sync::LazyLock;

/// Defines the application version.
pub static VERSION: LazyLock<String> = LazyLock::new(|| {
    format_version(
        env!("CARGO_PKG_VERSION"),
        option_env!("VERGEN_GIT_SHA"),
        option_env!("VERGEN_GIT_DIRTY") == Some("true"),
    )
});

fn format_version(version: &str, sha: Option<&str>, dirty: bool) -> String {
    match sha {
        Some(sha) => format!(
            "{version}-{}{}",
            sha.get(..8).unwrap_or(sha),
            if dirty { "-dirty" } else { "" }
        ),
        None => version.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn sha_is_shortened() {
        assert_eq!(
            format_version("0.1.0", Some("0123456789abcdef"), false),
            "0.1.0-01234567"
        );
        assert_eq!(format_version("0.1.0", Some("abc"), true), "0.1.0-abc-dirty");
        assert_eq!(format_version("0.1.0", None, true), "0.1.0");
    }

    #[test]
    fn version_starts_with_the_package_version() {
        assert!(VERSION.starts_with(env!("CARGO_PKG_VERSION")));
    }
}
