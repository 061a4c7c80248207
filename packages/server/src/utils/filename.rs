/// Longest accepted artifact name in bytes.
///
/// Merged artifacts are stored as `{fingerprint}-{name}`; the 65-byte prefix
/// plus this limit stays within the common 255-byte filename limit.
pub const MAX_FILENAME_LEN: usize = 190;

/// Why a client-supplied filename was refused.
#[derive(Debug, PartialEq, Eq)]
pub enum FilenameError {
    /// Filename is empty or whitespace-only.
    Empty,
    TooLong(usize),
    /// Filename contains `/` or `\`.
    ContainsPathSeparator,
    /// Filename is `.` or `..`.
    PathTraversal,
    /// Filename starts with a dot. Dotfiles are reserved for store metadata.
    Hidden,
    /// Filename contains NUL or another control character.
    ControlCharacter,
}

impl FilenameError {
    pub fn message(&self) -> String {
        match self {
            Self::Empty => "Filename cannot be empty".into(),
            Self::TooLong(len) => {
                format!("Filename is {len} bytes, at most {MAX_FILENAME_LEN} are allowed")
            }
            Self::ContainsPathSeparator => {
                "Invalid filename: path separators are not allowed".into()
            }
            Self::PathTraversal => "Invalid filename: '.' and '..' are not allowed".into(),
            Self::Hidden => {
                "Invalid filename: names starting with '.' are not allowed".into()
            }
            Self::ControlCharacter => {
                "Invalid filename: control characters are not allowed".into()
            }
        }
    }
}

/// Validates the name of a merged artifact, returning it trimmed.
///
/// The name must be a single path component so the artifact can never land
/// outside the merged directory.
pub fn validate_flat_filename(filename: &str) -> Result<&str, FilenameError> {
    let trimmed = filename.trim();

    if trimmed.is_empty() {
        return Err(FilenameError::Empty);
    }
    if trimmed.len() > MAX_FILENAME_LEN {
        return Err(FilenameError::TooLong(trimmed.len()));
    }
    if trimmed.chars().any(char::is_control) {
        return Err(FilenameError::ControlCharacter);
    }
    if trimmed.contains(['/', '\\']) {
        return Err(FilenameError::ContainsPathSeparator);
    }
    if trimmed == "." || trimmed == ".." {
        return Err(FilenameError::PathTraversal);
    }
    if trimmed.starts_with('.') {
        return Err(FilenameError::Hidden);
    }

    Ok(trimmed)
}
