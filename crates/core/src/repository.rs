//! Repository name validation.

/// Minimum repository name length.
pub const MIN_REPOSITORY_NAME_LEN: usize = 3;

/// Maximum repository name length.
pub const MAX_REPOSITORY_NAME_LEN: usize = 64;

/// Validate a repository name.
///
/// Names are 3-64 characters of lowercase ASCII alphanumerics, `-` and `_`,
/// and must start and end with an alphanumeric character.
pub fn validate_repository_name(name: &str) -> crate::Result<()> {
    if name.len() < MIN_REPOSITORY_NAME_LEN || name.len() > MAX_REPOSITORY_NAME_LEN {
        return Err(crate::Error::InvalidRepositoryName(format!(
            "name must be {MIN_REPOSITORY_NAME_LEN}-{MAX_REPOSITORY_NAME_LEN} characters, got {}",
            name.len()
        )));
    }

    if let Some(c) = name
        .chars()
        .find(|c| !matches!(c, 'a'..='z' | '0'..='9' | '-' | '_'))
    {
        return Err(crate::Error::InvalidRepositoryName(format!(
            "invalid character {c:?}; use lowercase letters, digits, '-' or '_'"
        )));
    }

    let edge_ok = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric());
    if !edge_ok(name.chars().next()) || !edge_ok(name.chars().last()) {
        return Err(crate::Error::InvalidRepositoryName(
            "name must start and end with a letter or digit".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_valid_names() {
        for name in ["docs", "team-a", "build_artifacts", "r2d2", "abc"] {
            assert!(validate_repository_name(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn test_rejects_invalid_names() {
        for name in [
            "ab",
            "Docs",
            "-docs",
            "docs-",
            "_docs",
            "docs;drop table",
            "docs/sub",
            "d\u{e9}cor",
            &"a".repeat(65),
        ] {
            assert!(validate_repository_name(name).is_err(), "{name}");
        }
    }
}
