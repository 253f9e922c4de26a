use serde::{Deserialize, Serialize};

use crate::error::AgentError;

/// One entry per `algorithmId` in the catalog (`spec.md` §3).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AlgorithmRecord {
    pub algorithm_id: String,
    pub algorithm_name: String,
    pub algorithm_version: String,
    pub algorithm_version_id: String,
    pub algorithm_data_url: String,
    pub file_size: i64,
    pub md5: String,
    pub local_path: String,
    pub created_at: Option<i64>,
    pub updated_at: Option<i64>,
}

/// Durable `algorithmId -> AlgorithmRecord` mapping with transactional
/// updates (component A). Backed by a single `sled::Tree`, values encoded as
/// JSON so the on-disk format is human-inspectable.
#[derive(Clone)]
pub struct Catalog {
    tree: sled::Tree,
}

impl Catalog {
    pub fn open(path: &str) -> Result<Self, AgentError> {
        let db = sled::open(path).map_err(|e| AgentError::CatalogIo(e.to_string()))?;
        let tree = db
            .open_tree("algorithms")
            .map_err(|e| AgentError::CatalogIo(e.to_string()))?;
        Ok(Self { tree })
    }

    /// Ephemeral catalog backed by a temporary on-disk sled instance, for
    /// tests that don't need persistence across process restarts.
    pub fn open_temp() -> Result<Self, AgentError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| AgentError::CatalogIo(e.to_string()))?;
        let tree = db
            .open_tree("algorithms")
            .map_err(|e| AgentError::CatalogIo(e.to_string()))?;
        Ok(Self { tree })
    }

    pub fn get(&self, algorithm_id: &str) -> Result<Option<AlgorithmRecord>, AgentError> {
        let raw = self
            .tree
            .get(algorithm_id.as_bytes())
            .map_err(|e| AgentError::CatalogIo(e.to_string()))?;
        match raw {
            Some(bytes) => {
                let record = serde_json::from_slice(&bytes)
                    .map_err(|e| AgentError::CatalogIo(e.to_string()))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Find by `(algorithmId, algorithmVersion)` — the version-duplicate
    /// check of `spec.md` §4.3 install step 1.
    pub fn get_matching_version(
        &self,
        algorithm_id: &str,
        algorithm_version: &str,
    ) -> Result<Option<AlgorithmRecord>, AgentError> {
        Ok(self
            .get(algorithm_id)?
            .filter(|r| r.algorithm_version == algorithm_version))
    }

    pub fn list(&self) -> Result<Vec<AlgorithmRecord>, AgentError> {
        let mut out = Vec::new();
        for item in self.tree.iter() {
            let (_, bytes) = item.map_err(|e| AgentError::CatalogIo(e.to_string()))?;
            let record: AlgorithmRecord =
                serde_json::from_slice(&bytes).map_err(|e| AgentError::CatalogIo(e.to_string()))?;
            out.push(record);
        }
        Ok(out)
    }

    /// Insert a brand-new record. Fails if one already exists for this id —
    /// callers must hold the per-`algorithmId` lock and have already checked
    /// for a prior record (`spec.md` §4.3 install step 8).
    pub fn insert(&self, mut record: AlgorithmRecord) -> Result<(), AgentError> {
        let now = now_unix();
        record.created_at = Some(now);
        record.updated_at = Some(now);
        let encoded = serde_json::to_vec(&record).map_err(|e| AgentError::CatalogIo(e.to_string()))?;
        self.tree
            .insert(record.algorithm_id.as_bytes(), encoded)
            .map_err(|e| AgentError::CatalogIo(e.to_string()))?;
        self.tree.flush().map_err(|e| AgentError::CatalogIo(e.to_string()))?;
        Ok(())
    }

    /// Update an existing record in place, preserving `created_at`.
    pub fn update(&self, mut record: AlgorithmRecord) -> Result<(), AgentError> {
        let created_at = self.get(&record.algorithm_id)?.and_then(|r| r.created_at);
        record.created_at = created_at;
        record.updated_at = Some(now_unix());
        let encoded = serde_json::to_vec(&record).map_err(|e| AgentError::CatalogIo(e.to_string()))?;
        self.tree
            .insert(record.algorithm_id.as_bytes(), encoded)
            .map_err(|e| AgentError::CatalogIo(e.to_string()))?;
        self.tree.flush().map_err(|e| AgentError::CatalogIo(e.to_string()))?;
        Ok(())
    }

    pub fn remove(&self, algorithm_id: &str) -> Result<(), AgentError> {
        self.tree
            .remove(algorithm_id.as_bytes())
            .map_err(|e| AgentError::CatalogIo(e.to_string()))?;
        self.tree.flush().map_err(|e| AgentError::CatalogIo(e.to_string()))?;
        Ok(())
    }
}

fn now_unix() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: &str, version: &str) -> AlgorithmRecord {
        AlgorithmRecord {
            algorithm_id: id.to_string(),
            algorithm_name: "detector".to_string(),
            algorithm_version: version.to_string(),
            algorithm_version_id: "V1".to_string(),
            algorithm_data_url: "http://x/a.zip".to_string(),
            file_size: 123,
            md5: "d41d8cd98f00b204e9800998ecf8427e".to_string(),
            local_path: "/tmp/A/V1".to_string(),
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn insert_then_get_roundtrips() {
        let catalog = Catalog::open_temp().unwrap();
        catalog.insert(sample("A", "1.0.0")).unwrap();
        let fetched = catalog.get("A").unwrap().unwrap();
        assert_eq!(fetched.algorithm_version, "1.0.0");
        assert!(fetched.created_at.is_some());
    }

    #[test]
    fn get_matching_version_filters_by_version() {
        let catalog = Catalog::open_temp().unwrap();
        catalog.insert(sample("A", "1.0.0")).unwrap();
        assert!(catalog.get_matching_version("A", "1.0.0").unwrap().is_some());
        assert!(catalog.get_matching_version("A", "1.0.1").unwrap().is_none());
    }

    #[test]
    fn update_preserves_created_at() {
        let catalog = Catalog::open_temp().unwrap();
        catalog.insert(sample("A", "1.0.0")).unwrap();
        let created = catalog.get("A").unwrap().unwrap().created_at;

        let mut upgraded = sample("A", "1.0.1");
        upgraded.local_path = "/tmp/A/V2".to_string();
        catalog.update(upgraded).unwrap();

        let fetched = catalog.get("A").unwrap().unwrap();
        assert_eq!(fetched.algorithm_version, "1.0.1");
        assert_eq!(fetched.created_at, created);
    }

    #[test]
    fn remove_deletes_record() {
        let catalog = Catalog::open_temp().unwrap();
        catalog.insert(sample("A", "1.0.0")).unwrap();
        catalog.remove("A").unwrap();
        assert!(catalog.get("A").unwrap().is_none());
    }

    #[test]
    fn list_returns_all_records() {
        let catalog = Catalog::open_temp().unwrap();
        catalog.insert(sample("A", "1.0.0")).unwrap();
        catalog.insert(sample("B", "2.0.0")).unwrap();
        let mut ids: Vec<_> = catalog.list().unwrap().into_iter().map(|r| r.algorithm_id).collect();
        ids.sort();
        assert_eq!(ids, vec!["A".to_string(), "B".to_string()]);
    }
}
