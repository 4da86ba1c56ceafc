use anyhow::{Context, Result};
use lop_core::{CollaboratorError, MemberDirectory, MemberProfile};
use std::fs;
use std::path::Path;

/// Member list exported from the chat platform, served to claim-all for any guild.
pub struct FileDirectory {
    members: Vec<MemberProfile>,
}

impl FileDirectory {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read member list {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Invalid member list {}", path.display()))
    }

    fn parse(raw: &str) -> Result<Self> {
        let members: Vec<MemberProfile> =
            serde_json::from_str(raw).context("expected a JSON array of members")?;
        Ok(Self { members })
    }
}

impl MemberDirectory for FileDirectory {
    fn list_members(&self, _guild_id: &str) -> Result<Vec<MemberProfile>, CollaboratorError> {
        Ok(self.members.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_members_with_optional_names() {
        let directory = FileDirectory::parse(
            r#"[
                {"id": "1", "handle": "rook", "nickname": "Rook"},
                {"id": "2", "handle": "dj", "display_name": "DJ", "is_bot": true}
            ]"#,
        )
        .expect("valid member list");

        let members = directory.list_members("any").expect("members");
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].nickname.as_deref(), Some("Rook"));
        assert!(members[0].display_name.is_none());
        assert!(members[1].is_bot);
    }

    #[test]
    fn rejects_non_array_documents() {
        assert!(FileDirectory::parse(r#"{"id": "1"}"#).is_err());
    }

    #[test]
    fn load_reports_missing_files() {
        let dir = tempfile::tempdir().expect("temp dir");
        let err = FileDirectory::load(&dir.path().join("absent.json"))
            .err()
            .expect("missing file");
        assert!(err.to_string().contains("absent.json"));
    }
}
