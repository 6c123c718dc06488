use std::path::{Path, PathBuf};

/// Expands a leading `~` to the home directory of the current user.
/// Other paths (including `~user` forms) are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    let rest = match path.strip_prefix('~') {
        Some("") => "",
        Some(rest) if rest.starts_with('/') => &rest[1..],
        _ => return PathBuf::from(path),
    };
    match dirs::home_dir() {
        Some(home) if rest.is_empty() => home,
        Some(home) => home.join(rest),
        None => PathBuf::from(path),
    }
}

pub fn absolute_path(path: &Path) -> std::io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        std::path::absolute(path)
    }
}

#[cfg(test)]
mod tests {
    use super::{absolute_path, expand_home};
    use std::path::{Path, PathBuf};

    #[test]
    fn test_expand_home_plain_path() {
        assert_eq!(expand_home("/data/x"), PathBuf::from("/data/x"));
        assert_eq!(expand_home("relative/x"), PathBuf::from("relative/x"));
    }

    #[test]
    fn test_expand_home_named_user_is_kept() {
        assert_eq!(expand_home("~alice/x"), PathBuf::from("~alice/x"));
    }

    #[test]
    fn test_expand_home_prefix() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand_home("~"), home);
        assert_eq!(expand_home("~/images/a.sif"), home.join("images/a.sif"));
    }

    #[test]
    fn test_absolute_path() {
        assert_eq!(absolute_path(Path::new("/x/y")).unwrap(), PathBuf::from("/x/y"));
        let path = absolute_path(Path::new("x")).unwrap();
        assert!(path.is_absolute());
        assert!(path.ends_with("x"));
    }
}
