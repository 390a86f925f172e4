//! Bulk account importer — reads a line-oriented `username,password` file
//! and upserts every well-formed line into the store. A missing file is a
//! warning, not a startup failure: a fresh deployment may add accounts
//! later via the HTTP surface's admin routes.

use std::path::Path;

use tracing::warn;

use crate::store::Store;

pub async fn import_file(store: &Store, path: &Path) -> anyhow::Result<usize> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) => {
            warn!(path = %path.display(), err = %e, "accounts file not found, skipping import");
            return Ok(0);
        }
    };

    let mut pairs = Vec::new();
    for (lineno, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split(',').collect();
        if parts.len() != 2 {
            warn!(line = lineno + 1, "malformed account line, skipping: {line:?}");
            continue;
        }
        pairs.push((parts[0].trim().to_string(), parts[1].trim().to_string()));
    }

    let count = pairs.len();
    store.upsert_many(&pairs).await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn skips_malformed_lines_and_imports_the_rest() {
        let store = Store::in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.txt");
        tokio::fs::write(&path, "alice,secret1\nnot-a-valid-line\nbob,secret2\n")
            .await
            .unwrap();

        let imported = import_file(&store, &path).await.unwrap();
        assert_eq!(imported, 2);

        assert!(store.find_by_username("alice").await.unwrap().is_some());
        assert!(store.find_by_username("bob").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn missing_file_is_not_an_error() {
        let store = Store::in_memory().await.unwrap();
        let imported = import_file(&store, Path::new("/nonexistent/accounts.txt"))
            .await
            .unwrap();
        assert_eq!(imported, 0);
    }
}
