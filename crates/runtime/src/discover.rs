use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

pub const SAVE_FILE_NAME: &str = "AstralKeys.lua";
const SAVED_VARIABLES_DIR: &str = "SavedVariables";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Flavour {
    Retail,
    Classic,
}

impl Flavour {
    fn from_path(path: &Path) -> Self {
        let classic = path.components().any(|component| {
            component
                .as_os_str()
                .to_string_lossy()
                .to_ascii_lowercase()
                .contains("_classic")
        });
        if classic { Flavour::Classic } else { Flavour::Retail }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    pub account: String,
    pub flavour: Flavour,
}

/// Find `<root>/<account>/SavedVariables/AstralKeys.lua` under each root.
/// Roots that do not exist are skipped.  Results are sorted by path.
pub fn scan_for_save_files<P: AsRef<Path>>(roots: &[P]) -> Vec<DiscoveredFile> {
    let mut found = Vec::new();
    for root in roots {
        let root = root.as_ref();
        if !root.is_dir() {
            debug!(root = %root.display(), "discovery root missing; skipped");
            continue;
        }

        for entry in WalkDir::new(root)
            .min_depth(3)
            .max_depth(3)
            .into_iter()
            .filter_map(Result::ok)
        {
            if !entry.file_type().is_file() || entry.file_name() != SAVE_FILE_NAME {
                continue;
            }
            let path = entry.into_path();
            let Some(saved_vars) = path.parent() else {
                continue;
            };
            if saved_vars.file_name().is_none_or(|name| name != SAVED_VARIABLES_DIR) {
                continue;
            }
            let Some(account) = saved_vars.parent().and_then(Path::file_name) else {
                continue;
            };
            found.push(DiscoveredFile {
                account: account.to_string_lossy().into_owned(),
                flavour: Flavour::from_path(&path),
                path,
            });
        }
    }
    found.sort_by(|a, b| a.path.cmp(&b.path));
    found.dedup_by(|a, b| a.path == b.path);
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn plant(root: &Path, account: &str) -> PathBuf {
        let dir = root.join(account).join(SAVED_VARIABLES_DIR);
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join(SAVE_FILE_NAME);
        std::fs::write(&file, "AstralKeys = {}\n").unwrap();
        file
    }

    #[test]
    fn finds_files_per_account_and_flavour() {
        let dir = TempDir::new().unwrap();
        let retail = dir.path().join("_retail_/WTF/Account");
        let classic = dir.path().join("_classic_/WTF/Account");
        let a = plant(&retail, "ACCOUNT1");
        let b = plant(&classic, "ACCOUNT2");
        std::fs::create_dir_all(retail.join("EMPTY/SavedVariables")).unwrap();
        std::fs::write(retail.join("ACCOUNT1/SavedVariables/Other.lua"), "").unwrap();

        let found = scan_for_save_files(&[retail.clone(), classic.clone(), dir.path().join("missing")]);
        assert_eq!(found.len(), 2);

        let by_account = |name: &str| found.iter().find(|f| f.account == name).unwrap();
        assert_eq!(by_account("ACCOUNT1").path, a);
        assert_eq!(by_account("ACCOUNT1").flavour, Flavour::Retail);
        assert_eq!(by_account("ACCOUNT2").path, b);
        assert_eq!(by_account("ACCOUNT2").flavour, Flavour::Classic);
    }

    #[test]
    fn ignores_files_at_the_wrong_depth() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(SAVE_FILE_NAME), "").unwrap();
        let nested = dir.path().join("ACC/SavedVariables/deeper");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join(SAVE_FILE_NAME), "").unwrap();
        assert!(scan_for_save_files(&[dir.path()]).is_empty());
    }

    #[test]
    fn overlapping_roots_report_once() {
        let dir = TempDir::new().unwrap();
        plant(dir.path(), "ACC");
        let found = scan_for_save_files(&[dir.path(), dir.path()]);
        assert_eq!(found.len(), 1);
    }
}
