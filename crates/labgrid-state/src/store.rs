//! StateStore: redb-backed resource ledger.
//!
//! Provides typed operations over templates, tables and deployed
//! resources. The store supports both on-disk and in-memory backends
//! (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{Stage, StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Error-mapping closure for a redb or serde_json failure.
macro_rules! map_err {
    (Open) => {
        |e| StateError::Open(e.to_string())
    };
    (Serialize) => {
        |e| StateError::Encode(e.to_string())
    };
    (Deserialize) => {
        |e| StateError::Decode(e.to_string())
    };
    ($stage:ident) => {
        |e| StateError::storage(Stage::$stage, e)
    };
}

/// Thread-safe ledger backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent ledger at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "ledger opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory ledger (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory ledger opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(TEMPLATES).map_err(map_err!(Table))?;
        txn.open_table(TABLES).map_err(map_err!(Table))?;
        txn.open_table(RESOURCES).map_err(map_err!(Table))?;
        txn.open_table(RESOURCE_INDEX).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Templates ──────────────────────────────────────────────────

    /// Register a template, or re-register an existing name.
    ///
    /// New names are appended to the registration order; a re-registered
    /// name keeps its first position.
    pub fn register_template(&self, template: &Template) -> StateResult<Template> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let stored;
        {
            let mut table = txn.open_table(TEMPLATES).map_err(map_err!(Table))?;
            let mut existing_seq = None;
            let mut max_seq = 0;
            for entry in table.iter().map_err(map_err!(Read))? {
                let (key, value) = entry.map_err(map_err!(Read))?;
                let t: Template =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                if key.value() == template.name {
                    existing_seq = Some(t.seq);
                }
                max_seq = max_seq.max(t.seq);
            }

            stored = Template {
                seq: existing_seq.unwrap_or(max_seq + 1),
                ..template.clone()
            };
            let value = serde_json::to_vec(&stored).map_err(map_err!(Serialize))?;
            table
                .insert(stored.name.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(name = %stored.name, seq = stored.seq, role = %stored.role, "template registered");
        Ok(stored)
    }

    /// Get a template by name.
    pub fn get_template(&self, name: &str) -> StateResult<Option<Template>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TEMPLATES).map_err(map_err!(Table))?;
        match table.get(name).map_err(map_err!(Read))? {
            Some(guard) => {
                let template: Template =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(template))
            }
            None => Ok(None),
        }
    }

    /// List all templates in registration order.
    pub fn list_templates(&self) -> StateResult<Vec<Template>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TEMPLATES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let template: Template =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(template);
        }
        results.sort_by_key(|t| t.seq);
        Ok(results)
    }

    /// Templates with the given role, in registration order.
    pub fn templates_for_role(&self, role: TemplateRole) -> StateResult<Vec<Template>> {
        Ok(self
            .list_templates()?
            .into_iter()
            .filter(|t| t.role == role)
            .collect())
    }

    // ── Tables ─────────────────────────────────────────────────────

    /// Create the table row if absent. Returns the row and whether it was created.
    pub fn upsert_table(
        &self,
        table_number: TableNumber,
        now: u64,
    ) -> StateResult<(TableLab, bool)> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let result;
        {
            let mut table = txn.open_table(TABLES).map_err(map_err!(Table))?;
            let existing = table
                .get(table_number)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec());
            result = match existing {
                Some(bytes) => {
                    let lab: TableLab =
                        serde_json::from_slice(&bytes).map_err(map_err!(Deserialize))?;
                    (lab, false)
                }
                None => {
                    let lab = TableLab::new(table_number, now);
                    let value = serde_json::to_vec(&lab).map_err(map_err!(Serialize))?;
                    table
                        .insert(table_number, value.as_slice())
                        .map_err(map_err!(Write))?;
                    (lab, true)
                }
            };
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(table = table_number, created = result.1, "table upserted");
        Ok(result)
    }

    /// Get a table by number.
    pub fn get_table(&self, table_number: TableNumber) -> StateResult<Option<TableLab>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TABLES).map_err(map_err!(Table))?;
        match table.get(table_number).map_err(map_err!(Read))? {
            Some(guard) => {
                let lab: TableLab =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(lab))
            }
            None => Ok(None),
        }
    }

    /// List all tables, ordered by table number.
    pub fn list_tables(&self) -> StateResult<Vec<TableLab>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TABLES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let lab: TableLab =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(lab);
        }
        Ok(results)
    }

    /// Set or clear a table's label. Returns false if the table is unknown.
    pub fn set_table_label(
        &self,
        table_number: TableNumber,
        label: Option<String>,
    ) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let found;
        {
            let mut table = txn.open_table(TABLES).map_err(map_err!(Table))?;
            let existing = table
                .get(table_number)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec());
            found = existing.is_some();
            if let Some(bytes) = existing {
                let mut lab: TableLab =
                    serde_json::from_slice(&bytes).map_err(map_err!(Deserialize))?;
                lab.label = label;
                let value = serde_json::to_vec(&lab).map_err(map_err!(Serialize))?;
                table
                    .insert(table_number, value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(found)
    }

    // ── Resources ──────────────────────────────────────────────────

    /// Record a deployed resource.
    ///
    /// The owning table must exist and the resource id must not already be
    /// recorded (for this or any other table).
    pub fn put_resource(&self, resource: &DeployedResource) -> StateResult<()> {
        let key = resource.table_key();
        let value = serde_json::to_vec(resource).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let tables = txn.open_table(TABLES).map_err(map_err!(Table))?;
            if tables
                .get(resource.table_number)
                .map_err(map_err!(Read))?
                .is_none()
            {
                return Err(StateError::NotFound(format!(
                    "table {}",
                    resource.table_number
                )));
            }

            let mut index = txn.open_table(RESOURCE_INDEX).map_err(map_err!(Table))?;
            let owner = index
                .get(resource.vmid)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value());
            if let Some(owner) = owner {
                return Err(StateError::Conflict(format!(
                    "resource {} already recorded for table {owner}",
                    resource.vmid
                )));
            }
            index
                .insert(resource.vmid, resource.table_number)
                .map_err(map_err!(Write))?;

            let mut resources = txn.open_table(RESOURCES).map_err(map_err!(Table))?;
            resources
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, node = %resource.node, kind = %resource.kind, "resource recorded");
        Ok(())
    }

    /// Get a resource by its cluster id.
    pub fn get_resource(&self, vmid: ResourceId) -> StateResult<Option<DeployedResource>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let index = txn.open_table(RESOURCE_INDEX).map_err(map_err!(Table))?;
        let Some(table_number) = index
            .get(vmid)
            .map_err(map_err!(Read))?
            .map(|guard| guard.value())
        else {
            return Ok(None);
        };
        let resources = txn.open_table(RESOURCES).map_err(map_err!(Table))?;
        let key = resource_key(table_number, vmid);
        match resources.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let resource: DeployedResource =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(resource))
            }
            None => Ok(None),
        }
    }

    /// List a table's resources in ledger order (ascending vmid).
    pub fn list_resources_for_table(
        &self,
        table_number: TableNumber,
    ) -> StateResult<Vec<DeployedResource>> {
        let (start, end) = resource_range(table_number);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RESOURCES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table
            .range(start.as_str()..end.as_str())
            .map_err(map_err!(Read))?
        {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let resource: DeployedResource =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(resource);
        }
        Ok(results)
    }

    /// List every recorded resource, grouped by table.
    pub fn list_resources(&self) -> StateResult<Vec<DeployedResource>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RESOURCES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let resource: DeployedResource =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(resource);
        }
        Ok(results)
    }

    /// Remove a resource row. Returns true if it existed.
    pub fn delete_resource(&self, vmid: ResourceId) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut index = txn.open_table(RESOURCE_INDEX).map_err(map_err!(Table))?;
            let owner = index
                .remove(vmid)
                .map_err(map_err!(Write))?
                .map(|guard| guard.value());
            existed = owner.is_some();
            if let Some(table_number) = owner {
                let mut resources = txn.open_table(RESOURCES).map_err(map_err!(Table))?;
                let key = resource_key(table_number, vmid);
                resources.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(vmid, existed, "resource deleted");
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_resource(table_number: TableNumber, vmid: ResourceId) -> DeployedResource {
        DeployedResource {
            vmid,
            table_number,
            node: "proxmox1".to_string(),
            kind: ResourceKind::Container,
            role: TemplateRole::Target,
            name: format!("T{table_number}-Target1"),
            template: "dvwa".to_string(),
            address: "10.10.57.101/24".to_string(),
            created_at: 1000,
        }
    }

    // ── Templates ──────────────────────────────────────────────────

    #[test]
    fn template_register_assigns_order() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .register_template(&Template::new("kali", 9000, TemplateRole::Attacker, false))
            .unwrap();
        store
            .register_template(&Template::new("dvwa", 9001, TemplateRole::Target, true))
            .unwrap();
        store
            .register_template(&Template::new("alpine", 9002, TemplateRole::Target, true))
            .unwrap();

        let all = store.list_templates().unwrap();
        let names: Vec<_> = all.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["kali", "dvwa", "alpine"]);
        assert_eq!(all[0].seq, 1);
        assert_eq!(all[2].seq, 3);
    }

    #[test]
    fn template_reregister_keeps_position() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .register_template(&Template::new("dvwa", 9001, TemplateRole::Target, true))
            .unwrap();
        store
            .register_template(&Template::new("alpine", 9002, TemplateRole::Target, true))
            .unwrap();
        let updated = store
            .register_template(&Template::new("dvwa", 9100, TemplateRole::Target, true))
            .unwrap();

        assert_eq!(updated.seq, 1);
        let targets = store.templates_for_role(TemplateRole::Target).unwrap();
        assert_eq!(targets[0].name, "dvwa");
        assert_eq!(targets[0].vmid, 9100);
        assert_eq!(targets.len(), 2);
    }

    #[test]
    fn templates_filtered_by_role() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .register_template(&Template::new("kali", 9000, TemplateRole::Attacker, false))
            .unwrap();
        store
            .register_template(&Template::new("dvwa", 9001, TemplateRole::Target, true))
            .unwrap();

        assert_eq!(store.templates_for_role(TemplateRole::Attacker).unwrap().len(), 1);
        assert_eq!(
            store.get_template("dvwa").unwrap().map(|t| t.role),
            Some(TemplateRole::Target)
        );
        assert!(store.get_template("nope").unwrap().is_none());
    }

    // ── Tables ─────────────────────────────────────────────────────

    #[test]
    fn table_upsert_is_idempotent() {
        let store = StateStore::open_in_memory().unwrap();

        let (first, created) = store.upsert_table(7, 1000).unwrap();
        assert!(created);
        assert_eq!(first.vlan(), 57);

        let (second, created) = store.upsert_table(7, 2000).unwrap();
        assert!(!created);
        assert_eq!(second.created_at, 1000);

        assert_eq!(store.list_tables().unwrap().len(), 1);
    }

    #[test]
    fn table_label_update() {
        let store = StateStore::open_in_memory().unwrap();
        store.upsert_table(3, 1000).unwrap();

        assert!(store.set_table_label(3, Some("alice".to_string())).unwrap());
        assert_eq!(
            store.get_table(3).unwrap().unwrap().label.as_deref(),
            Some("alice")
        );
        assert!(!store.set_table_label(4, Some("bob".to_string())).unwrap());
        assert!(store.get_table(4).unwrap().is_none());
    }

    #[test]
    fn tables_listed_in_numeric_order() {
        let store = StateStore::open_in_memory().unwrap();
        for n in [12, 3, 100] {
            store.upsert_table(n, 1000).unwrap();
        }
        let numbers: Vec<_> = store
            .list_tables()
            .unwrap()
            .iter()
            .map(|t| t.table_number)
            .collect();
        assert_eq!(numbers, [3, 12, 100]);
    }

    // ── Resources ──────────────────────────────────────────────────

    #[test]
    fn resource_put_requires_table() {
        let store = StateStore::open_in_memory().unwrap();
        let err = store.put_resource(&test_resource(7, 101)).unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
    }

    #[test]
    fn resource_put_and_point_lookup() {
        let store = StateStore::open_in_memory().unwrap();
        store.upsert_table(7, 1000).unwrap();
        let resource = test_resource(7, 101);

        store.put_resource(&resource).unwrap();

        assert_eq!(store.get_resource(101).unwrap(), Some(resource));
        assert!(store.get_resource(999).unwrap().is_none());
    }

    #[test]
    fn resource_duplicate_id_rejected() {
        let store = StateStore::open_in_memory().unwrap();
        store.upsert_table(7, 1000).unwrap();
        store.upsert_table(8, 1000).unwrap();
        store.put_resource(&test_resource(7, 101)).unwrap();

        let err = store.put_resource(&test_resource(8, 101)).unwrap_err();
        assert!(matches!(err, StateError::Conflict(_)));
        assert!(store.list_resources_for_table(8).unwrap().is_empty());
    }

    #[test]
    fn resources_range_by_table_in_vmid_order() {
        let store = StateStore::open_in_memory().unwrap();
        store.upsert_table(1, 1000).unwrap();
        store.upsert_table(10, 1000).unwrap();
        store.put_resource(&test_resource(1, 105)).unwrap();
        store.put_resource(&test_resource(10, 103)).unwrap();
        store.put_resource(&test_resource(1, 99)).unwrap();
        store.put_resource(&test_resource(1, 1000)).unwrap();

        let ids: Vec<_> = store
            .list_resources_for_table(1)
            .unwrap()
            .iter()
            .map(|r| r.vmid)
            .collect();
        assert_eq!(ids, [99, 105, 1000]);
        assert_eq!(store.list_resources_for_table(10).unwrap().len(), 1);
        assert_eq!(store.list_resources().unwrap().len(), 4);
    }

    #[test]
    fn resource_delete() {
        let store = StateStore::open_in_memory().unwrap();
        store.upsert_table(7, 1000).unwrap();
        store.put_resource(&test_resource(7, 101)).unwrap();

        assert!(store.delete_resource(101).unwrap());
        assert!(!store.delete_resource(101).unwrap());
        assert!(store.get_resource(101).unwrap().is_none());
        assert!(store.list_resources_for_table(7).unwrap().is_empty());
        // The table row survives its resources.
        assert!(store.get_table(7).unwrap().is_some());
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("ledger.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.upsert_table(7, 1000).unwrap();
            store.put_resource(&test_resource(7, 101)).unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        assert!(store.get_table(7).unwrap().is_some());
        assert_eq!(store.list_resources_for_table(7).unwrap().len(), 1);
    }

    // ── Edge cases ─────────────────────────────────────────────────

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();

        assert!(store.list_templates().unwrap().is_empty());
        assert!(store.list_tables().unwrap().is_empty());
        assert!(store.list_resources().unwrap().is_empty());
        assert!(store.list_resources_for_table(0).unwrap().is_empty());
        assert!(!store.delete_resource(1).unwrap());
    }
}
