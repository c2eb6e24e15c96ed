//! The sandbox root shared by the file and script tools.

use std::path::{Path, PathBuf};

use super::ToolError;

/// A directory that all tool file access is confined to.
///
/// Filenames are reduced to their final segment before being joined to the
/// root, so no argument value can name a path outside it.
#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    /// Use `root` as the sandbox, creating it if it does not exist.
    ///
    /// The stored root is absolute, so resolved paths stay valid for child
    /// processes that run with the sandbox as their working directory.
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let root = std::fs::canonicalize(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a caller-supplied filename to a path directly inside the root.
    ///
    /// Both `/` and `\` count as separators regardless of platform.
    pub fn resolve(&self, filename: &str) -> Result<PathBuf, ToolError> {
        let base = filename.rsplit(&['/', '\\'][..]).next().unwrap_or_default();
        match base {
            "" | "." | ".." => Err(ToolError::InvalidFilename(filename.to_string())),
            name => Ok(self.root.join(name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox() -> (tempfile::TempDir, Sandbox) {
        let dir = tempfile::tempdir().expect("tempdir");
        let sandbox = Sandbox::new(dir.path().join("out")).expect("sandbox");
        (dir, sandbox)
    }

    #[test]
    fn creates_missing_root() {
        let (_dir, sandbox) = sandbox();
        assert!(sandbox.root().is_dir());
    }

    #[test]
    fn relative_root_is_made_absolute() {
        let dir = tempfile::tempdir_in(".").expect("tempdir");
        let name = dir.path().file_name().expect("tempdir name");
        let relative = Path::new(".").join(name).join("code_output");

        let sandbox = Sandbox::new(&relative).expect("sandbox");
        assert!(sandbox.root().is_absolute());
        assert!(sandbox.root().ends_with("code_output"));
        assert!(sandbox.resolve("x.py").expect("resolve").is_absolute());
    }

    #[test]
    fn hostile_names_stay_under_root() {
        let (_dir, sandbox) = sandbox();
        let cases = [
            ("report.md", "report.md"),
            ("../../etc/passwd", "passwd"),
            ("/etc/shadow", "shadow"),
            ("nested/dir/script.py", "script.py"),
            ("..\\..\\windows\\evil.bat", "evil.bat"),
            ("./a/../b.txt", "b.txt"),
            ("...", "..."),
        ];
        for (input, expected) in cases {
            let resolved = sandbox.resolve(input).expect(input);
            assert_eq!(resolved.parent(), Some(sandbox.root()), "{}", input);
            assert_eq!(resolved.file_name().and_then(|n| n.to_str()), Some(expected));
        }
    }

    #[test]
    fn names_without_a_file_are_rejected() {
        let (_dir, sandbox) = sandbox();
        for input in ["", ".", "..", "dir/", "a/..", "/", "..\\"] {
            assert!(
                matches!(sandbox.resolve(input), Err(ToolError::InvalidFilename(_))),
                "{:?} should be rejected",
                input
            );
        }
    }
}
