//! Blob key layout for student asset folders.
//!
//! ```text
//! {prefix}/{class}/{enrollment}_{name}/{enrollment}_{name}_{index}.jpg
//! ```
//!
//! `class` and `name` are cleaned with [`clean_token`]; the enrollment is used
//! as entered (trimmed) and must pass [`enrollment_is_key_safe`].

/// Default asset root inside the blob store.
pub const DEFAULT_ASSET_PREFIX: &str = "student_images";

/// Characters an enrollment may not contain: key separators and the
/// separator between enrollment and name in a folder.
pub const ENROLLMENT_RESERVED: [char; 3] = ['/', '\\', '_'];

/// Trim, collapse every internal whitespace run to a single `_` and map key
/// separators to `_`.
pub fn clean_token(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .replace(['/', '\\'], "_")
}

/// Whether `enrollment` round-trips through a folder name unchanged.
pub fn enrollment_is_key_safe(enrollment: &str) -> bool {
    !enrollment.contains(ENROLLMENT_RESERVED)
}

/// Enrollment encoded in a student folder name: the token before the first `_`.
pub fn enrollment_from_folder(folder: &str) -> &str {
    folder.split_once('_').map_or(folder, |(head, _)| head)
}

/// A `{class}/{student_folder}` pair found under the asset root.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct StudentFolder {
    pub class_name: String,
    pub folder: String,
}

impl StudentFolder {
    pub fn enrollment(&self) -> &str {
        enrollment_from_folder(&self.folder)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetLayout {
    prefix: String,
}

impl Default for AssetLayout {
    fn default() -> Self {
        Self::new(DEFAULT_ASSET_PREFIX)
    }
}

impl AssetLayout {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix: String = prefix.into();
        Self {
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Listing prefix covering every asset under the root.
    pub fn root_prefix(&self) -> String {
        if self.prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", self.prefix)
        }
    }

    /// Folder key for a student. `class_name` and `name` may be raw input.
    pub fn folder_key(&self, class_name: &str, enrollment: &str, name: &str) -> String {
        format!(
            "{}{}/{}",
            self.root_prefix(),
            clean_token(class_name),
            student_dir(enrollment, name)
        )
    }

    /// Key of the `index`-th (1-based) image inside `folder_key`.
    pub fn image_key(&self, folder_key: &str, enrollment: &str, name: &str, index: usize) -> String {
        format!("{folder_key}/{}_{index}.jpg", student_dir(enrollment, name))
    }

    /// Split a blob key into its student folder, if it lies inside one.
    pub fn parse_student_folder(&self, key: &str) -> Option<StudentFolder> {
        let rest = key.strip_prefix(&self.root_prefix())?;
        let mut parts = rest.splitn(3, '/');
        let class_name = parts.next()?;
        let folder = parts.next()?;
        // A file directly under the class has no student folder
        parts.next()?;
        Some(StudentFolder {
            class_name: class_name.to_string(),
            folder: folder.to_string(),
        })
    }

    pub fn folder_key_of(&self, folder: &StudentFolder) -> String {
        format!("{}{}/{}", self.root_prefix(), folder.class_name, folder.folder)
    }
}

fn student_dir(enrollment: &str, name: &str) -> String {
    format!("{}_{}", enrollment.trim(), clean_token(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_token() {
        assert_eq!(clean_token("  Jane   Doe "), "Jane_Doe");
        assert_eq!(clean_token("10 A"), "10_A");
        assert_eq!(clean_token("Mary\tAnn\nLee"), "Mary_Ann_Lee");
        assert_eq!(clean_token("   "), "");
        assert_eq!(clean_token("10/A"), "10_A");
        assert_eq!(clean_token(r"a\b / c"), "a_b___c");
    }

    #[test]
    fn test_enrollment_is_key_safe() {
        assert!(enrollment_is_key_safe("E1"));
        assert!(enrollment_is_key_safe("2024-017"));
        assert!(!enrollment_is_key_safe("CS_01"));
        assert!(!enrollment_is_key_safe("10/1"));
        assert!(!enrollment_is_key_safe(r"10\1"));
    }

    #[test]
    fn test_slash_in_class_stays_one_segment() {
        let layout = AssetLayout::default();
        let folder = layout.folder_key("10/A", "E1", "Jane Doe");
        assert_eq!(folder, "student_images/10_A/E1_Jane_Doe");
        let parsed = layout
            .parse_student_folder(&layout.image_key(&folder, "E1", "Jane Doe", 1))
            .unwrap();
        assert_eq!(parsed.class_name, "10_A");
        assert_eq!(parsed.enrollment(), "E1");
    }

    #[test]
    fn test_keys() {
        let layout = AssetLayout::default();
        let folder = layout.folder_key(" 10A ", "E1", "Jane  Doe");
        assert_eq!(folder, "student_images/10A/E1_Jane_Doe");
        assert_eq!(
            layout.image_key(&folder, "E1", "Jane Doe", 100),
            "student_images/10A/E1_Jane_Doe/E1_Jane_Doe_100.jpg"
        );
    }

    #[test]
    fn test_prefix_is_normalized() {
        assert_eq!(AssetLayout::new("/assets/").folder_key("9", "E2", "Bo"), "assets/9/E2_Bo");
        assert_eq!(AssetLayout::new("").folder_key("9", "E2", "Bo"), "9/E2_Bo");
    }

    #[test]
    fn test_parse_student_folder() {
        let layout = AssetLayout::default();
        let folder = layout
            .parse_student_folder("student_images/10A/E1_Jane_Doe/E1_Jane_Doe_1.jpg")
            .unwrap();
        assert_eq!(folder.class_name, "10A");
        assert_eq!(folder.folder, "E1_Jane_Doe");
        assert_eq!(folder.enrollment(), "E1");
        assert_eq!(layout.folder_key_of(&folder), "student_images/10A/E1_Jane_Doe");

        assert!(layout.parse_student_folder("student_images/10A/stray.jpg").is_none());
        assert!(layout.parse_student_folder("other/10A/E1_A/E1_A_1.jpg").is_none());
    }

    #[test]
    fn test_enrollment_from_folder() {
        assert_eq!(enrollment_from_folder("E1_Jane_Doe"), "E1");
        assert_eq!(enrollment_from_folder("E1"), "E1");
    }
}
