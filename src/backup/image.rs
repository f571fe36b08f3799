//! Named, versioned filesystem tree (§3 `Image`).

use serde::{Deserialize, Serialize};

use super::filesystem::FileSystem;

/// A textual, slash-delimited path identifying an image externally (§3).
pub type ImageName = String;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Image {
    pub file_system: FileSystem,
    #[serde(default)]
    pub created_by: String,
    /// Unix seconds.
    #[serde(default)]
    pub created_on: i64,
    /// `None` means the image never expires.
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub release_notes: Option<String>,
}

impl Image {
    /// True once a non-zero expiry has been stamped (§4.5 archive-mode
    /// expiry suppression checks exactly this).
    pub fn is_expiring(&self) -> bool {
        matches!(self.expires_at, Some(t) if t != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_detection() {
        let mut img = Image {
            file_system: FileSystem::new(0),
            created_by: "alice".into(),
            created_on: 1,
            expires_at: None,
            release_notes: None,
        };
        assert!(!img.is_expiring());
        img.expires_at = Some(0);
        assert!(!img.is_expiring());
        img.expires_at = Some(123);
        assert!(img.is_expiring());
    }
}
