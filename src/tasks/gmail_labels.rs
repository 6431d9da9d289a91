//! Bidirectional mapping between folder ids and Gmail labels.
//!
//! Special-use folders are addressed by their SPECIAL-USE name in
//! X-GM-LABELS rather than by their path: "INBOX" is `\Inbox`,
//! "[Gmail]/Sent Mail" is `\Sent`.

use super::protocol::{AccountFolders, FolderType};
use std::collections::HashMap;
use tracing::debug;

pub struct GmailLabelMapper {
    label_to_folder_id: HashMap<String, String>,
    folder_id_to_label: HashMap<String, String>,
}

impl GmailLabelMapper {
    pub fn new(folders: &AccountFolders) -> Self {
        let mut label_to_folder_id = HashMap::new();
        let mut folder_id_to_label = HashMap::new();

        for folder in &folders.folders {
            let label = match folder.folder_type {
                FolderType::Nomail => continue,
                FolderType::Inbox => "\\Inbox".to_string(),
                FolderType::Drafts => "\\Drafts".to_string(),
                FolderType::All | FolderType::Archive => "\\All".to_string(),
                FolderType::Important => "\\Important".to_string(),
                FolderType::Sent => "\\Sent".to_string(),
                FolderType::Starred => "\\Flagged".to_string(),
                FolderType::Trash => "\\Trash".to_string(),
                FolderType::Junk => "\\Junk".to_string(),
                _ => match &folder.server_path {
                    Some(path) => path.clone(),
                    None => continue,
                },
            };
            label_to_folder_id.insert(label.clone(), folder.id.clone());
            folder_id_to_label.insert(folder.id.clone(), label);
        }

        Self {
            label_to_folder_id,
            folder_id_to_label,
        }
    }

    /// Map X-GM-LABELS values to folder ids, dropping unknown labels
    pub fn labels_to_folder_ids<S: AsRef<str>>(&self, labels: &[S]) -> Vec<String> {
        labels
            .iter()
            .filter_map(|label| {
                let folder_id = self.label_to_folder_id.get(label.as_ref());
                if folder_id.is_none() {
                    debug!("No folder for Gmail label {}", label.as_ref());
                }
                folder_id.cloned()
            })
            .collect()
    }

    /// The label X-GM-LABELS understands for a folder. Never shown to users.
    pub fn folder_id_to_label(&self, folder_id: &str) -> Option<&str> {
        self.folder_id_to_label.get(folder_id).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::protocol::FolderInfo;

    fn folders() -> AccountFolders {
        AccountFolders {
            account_id: "0".into(),
            folders: vec![
                FolderInfo::new("0.1", "Inbox", Some("INBOX"), FolderType::Inbox),
                FolderInfo::new("0.2", "[Gmail]", Some("[Gmail]"), FolderType::Nomail),
                FolderInfo::new("0.3", "Sent Mail", Some("[Gmail]/Sent Mail"), FolderType::Sent),
                FolderInfo::new("0.4", "Work", Some("Work"), FolderType::Normal),
                FolderInfo::new("0.5", "Outbox", None, FolderType::Outbox),
            ],
        }
    }

    #[test]
    fn test_special_use_labels() {
        let mapper = GmailLabelMapper::new(&folders());
        assert_eq!(mapper.folder_id_to_label("0.1"), Some("\\Inbox"));
        assert_eq!(mapper.folder_id_to_label("0.3"), Some("\\Sent"));
        assert_eq!(mapper.folder_id_to_label("0.4"), Some("Work"));
        assert_eq!(mapper.folder_id_to_label("0.2"), None);
        assert_eq!(mapper.folder_id_to_label("0.5"), None);
    }

    #[test]
    fn test_labels_to_folder_ids_skips_unknown() {
        let mapper = GmailLabelMapper::new(&folders());
        assert_eq!(
            mapper.labels_to_folder_ids(&["\\Inbox", "Personal", "Work"]),
            vec!["0.1".to_string(), "0.4".to_string()]
        );
    }
}
