// ==========================================
// 表格导入引擎 - 查找管理器
// ==========================================
// 职责: 按 (目标表, 查找字段) 批量预取外部实体,避免逐行查询
// 缓存: 单个 chunk 内有效;步骤写入后登记新实体,已缓存的未命中需作废
// ==========================================

use crate::domain::import_config::StepPlan;
use crate::domain::import_record::RowRecord;
use crate::domain::types::{CellValue, EntityId, FieldValues};
use crate::repository::entity_store::EntityStore;
use crate::repository::error::StoreResult;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

type LookupKey = (String, String);

/// 查找缓存: (表, 字段) → { 规范化取值 → 命中 id | 已确认未命中 }
#[derive(Debug, Default)]
pub struct LookupCache {
    entries: HashMap<LookupKey, HashMap<String, Option<EntityId>>>,
}

impl LookupCache {
    fn pair(&self, table: &str, field: &str) -> Option<&HashMap<String, Option<EntityId>>> {
        self.entries.get(&(table.to_string(), field.to_string()))
    }

    fn pair_mut(&mut self, table: &str, field: &str) -> &mut HashMap<String, Option<EntityId>> {
        self.entries
            .entry((table.to_string(), field.to_string()))
            .or_default()
    }

    pub fn is_cached(&self, table: &str, field: &str, key: &str) -> bool {
        self.pair(table, field)
            .map(|m| m.contains_key(key))
            .unwrap_or(false)
    }
}

pub struct LookupManager<'a> {
    store: &'a dyn EntityStore,
    cache: LookupCache,
}

impl<'a> LookupManager<'a> {
    pub fn new(store: &'a dyn EntityStore) -> Self {
        Self {
            store,
            cache: LookupCache::default(),
        }
    }

    /// 预取一组取值
    ///
    /// # 参数
    /// - values: 行中出现的原始取值（空值与已缓存值会被跳过）
    ///
    /// # 说明
    /// - 每次调用至多发起一次逻辑查询（按存储参数上限分片）
    /// - 同一取值对应多个实体时取 id 最小者
    pub fn prefetch(&mut self, table: &str, field: &str, values: &[CellValue]) -> StoreResult<()> {
        let mut pending: BTreeMap<String, CellValue> = BTreeMap::new();
        for value in values {
            if let Some(key) = value.as_key() {
                if !self.cache.is_cached(table, field, &key) {
                    pending.entry(key).or_insert_with(|| value.clone());
                }
            }
        }
        if pending.is_empty() {
            return Ok(());
        }

        let query_values: Vec<CellValue> = pending.values().cloned().collect();
        let found = self.store.find_by_values(table, field, &query_values)?;

        let entry = self.cache.pair_mut(table, field);
        let mut hits = 0;
        for entity in found {
            let key = match entity.values.get(field).and_then(CellValue::as_key) {
                Some(k) => k,
                None => continue,
            };
            let slot = entry.entry(key).or_insert(None);
            if slot.map_or(true, |existing| entity.id < existing) {
                if slot.is_none() {
                    hits += 1;
                }
                *slot = Some(entity.id);
            }
        }
        for key in pending.into_keys() {
            entry.entry(key).or_insert(None);
        }

        debug!(table, field, requested = query_values.len(), hits, "查找预取");
        Ok(())
    }

    /// 为步骤预取全部查找字段（同一 (表, 字段) 只查询一次）
    pub fn prefetch_step(
        &mut self,
        step: &StepPlan,
        rows: &[RowRecord],
        applicable: &[usize],
    ) -> StoreResult<()> {
        let mut grouped: BTreeMap<LookupKey, Vec<CellValue>> = BTreeMap::new();
        for spec in step.lookups() {
            let values = grouped
                .entry((spec.table.clone(), spec.lookup_field.clone()))
                .or_default();
            values.extend(applicable.iter().map(|&i| rows[i].cell(&spec.column).clone()));
        }
        for ((table, field), values) in grouped {
            self.prefetch(&table, &field, &values)?;
        }
        Ok(())
    }

    /// 解析取值
    ///
    /// # 返回
    /// - Some(id): 已持久化或本次运行中已落库的实体
    /// - None: 未命中（或未预取）
    pub fn resolve(&self, table: &str, field: &str, value: &CellValue) -> Option<EntityId> {
        let key = value.as_key()?;
        self.cache.pair(table, field)?.get(&key).copied().flatten()
    }

    /// 未命中时创建目标实体（create_if_missing）
    pub fn create_missing(
        &mut self,
        table: &str,
        field: &str,
        value: &CellValue,
    ) -> StoreResult<EntityId> {
        let mut record = FieldValues::new();
        record.insert(field.to_string(), value.clone());
        let id = self.store.insert_one(table, &record)?;
        debug!(table, field, %value, id, "查找未命中,已创建目标实体");
        self.register(table, &record, id);
        Ok(id)
    }

    /// 登记已落库实体（使后续步骤能够解析同一次运行中创建的实体）
    pub fn register(&mut self, table: &str, values: &FieldValues, id: EntityId) {
        for ((t, field), entries) in self.cache.entries.iter_mut() {
            if t != table {
                continue;
            }
            if let Some(key) = values.get(field).and_then(CellValue::as_key) {
                entries.insert(key, Some(id));
            }
        }
    }

    /// 作废某表已缓存的未命中项（批量创建不回传 id,需要重新查询）
    pub fn forget_misses(&mut self, table: &str) {
        for ((t, _), entries) in self.cache.entries.iter_mut() {
            if t == table {
                entries.retain(|_, id| id.is_some());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::entity_store::StoredEntity;
    use crate::repository::error::StoreError;
    use std::cell::{Cell, RefCell};
    use std::collections::HashSet;

    /// 记录查询次数的内存存储
    #[derive(Default)]
    struct CountingStore {
        rows: RefCell<Vec<StoredEntity>>,
        queries: Cell<usize>,
    }

    impl CountingStore {
        fn with_codes(codes: &[(&str, EntityId)]) -> Self {
            let store = Self::default();
            for (code, id) in codes {
                let mut values = FieldValues::new();
                values.insert("code".into(), CellValue::from(*code));
                store.rows.borrow_mut().push(StoredEntity { id: *id, values });
            }
            store
        }
    }

    impl EntityStore for CountingStore {
        fn column_names(&self, _table: &str) -> StoreResult<Vec<String>> {
            Ok(vec!["id".into(), "code".into()])
        }
        fn find_by_values(
            &self,
            _table: &str,
            field: &str,
            values: &[CellValue],
        ) -> StoreResult<Vec<StoredEntity>> {
            self.queries.set(self.queries.get() + 1);
            let keys: HashSet<String> = values.iter().filter_map(CellValue::as_key).collect();
            Ok(self
                .rows
                .borrow()
                .iter()
                .filter(|e| {
                    e.values
                        .get(field)
                        .and_then(CellValue::as_key)
                        .map(|k| keys.contains(&k))
                        .unwrap_or(false)
                })
                .cloned()
                .collect())
        }
        fn find_by_keys(
            &self,
            _table: &str,
            _fields: &[String],
            _keys: &[Vec<CellValue>],
        ) -> StoreResult<Vec<StoredEntity>> {
            Ok(Vec::new())
        }
        fn list_all(&self, _table: &str, _fields: &[String]) -> StoreResult<Vec<StoredEntity>> {
            Ok(self.rows.borrow().clone())
        }
        fn insert_batch(&self, _table: &str, records: &[FieldValues]) -> StoreResult<usize> {
            Ok(records.len())
        }
        fn insert_one(&self, _table: &str, record: &FieldValues) -> StoreResult<EntityId> {
            let id = 100 + self.rows.borrow().len() as EntityId;
            self.rows.borrow_mut().push(StoredEntity {
                id,
                values: record.clone(),
            });
            Ok(id)
        }
        fn update_batch(
            &self,
            _table: &str,
            updates: &[(EntityId, FieldValues)],
            _fields: &[String],
        ) -> StoreResult<usize> {
            Ok(updates.len())
        }
        fn update_one(&self, table: &str, id: EntityId, _record: &FieldValues) -> StoreResult<()> {
            Err(StoreError::NotFound {
                table: table.to_string(),
                id,
            })
        }
        fn delete_all(&self, _table: &str) -> StoreResult<usize> {
            Ok(0)
        }
        fn savepoint(&self, _name: &str) -> StoreResult<()> {
            Ok(())
        }
        fn release_savepoint(&self, _name: &str) -> StoreResult<()> {
            Ok(())
        }
        fn rollback_to_savepoint(&self, _name: &str) -> StoreResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_prefetch_queries_once_and_caches_misses() {
        let store = CountingStore::with_codes(&[("WAL", 1), ("SCO", 2)]);
        let mut lookups = LookupManager::new(&store);

        let values = vec![
            CellValue::from("WAL"),
            CellValue::from("WAL"),
            CellValue::from("XX"),
            CellValue::Null,
        ];
        lookups.prefetch("country", "code", &values).unwrap();
        assert_eq!(store.queries.get(), 1);
        assert_eq!(lookups.resolve("country", "code", &CellValue::from("WAL")), Some(1));
        assert_eq!(lookups.resolve("country", "code", &CellValue::from("XX")), None);

        // 全部已缓存,不再查询
        lookups.prefetch("country", "code", &values).unwrap();
        assert_eq!(store.queries.get(), 1);
    }

    #[test]
    fn test_register_makes_new_entity_resolvable() {
        let store = CountingStore::default();
        let mut lookups = LookupManager::new(&store);
        lookups
            .prefetch("country", "code", &[CellValue::from("WAL")])
            .unwrap();
        assert_eq!(lookups.resolve("country", "code", &CellValue::from("WAL")), None);

        let mut values = FieldValues::new();
        values.insert("code".into(), CellValue::from("WAL"));
        lookups.register("country", &values, 9);
        assert_eq!(lookups.resolve("country", "code", &CellValue::from("WAL")), Some(9));
    }

    #[test]
    fn test_forget_misses_forces_requery() {
        let store = CountingStore::default();
        let mut lookups = LookupManager::new(&store);
        let wal = [CellValue::from("WAL")];
        lookups.prefetch("country", "code", &wal).unwrap();

        // 模拟批量创建（无 id 回传）
        store.insert_one("country", &{
            let mut v = FieldValues::new();
            v.insert("code".into(), CellValue::from("WAL"));
            v
        })
        .unwrap();
        lookups.forget_misses("country");
        lookups.prefetch("country", "code", &wal).unwrap();

        assert_eq!(store.queries.get(), 2);
        assert_eq!(lookups.resolve("country", "code", &wal[0]), Some(100));
    }

    #[test]
    fn test_create_missing_registers_id() {
        let store = CountingStore::default();
        let mut lookups = LookupManager::new(&store);
        lookups
            .prefetch("country", "code", &[CellValue::from("NEW")])
            .unwrap();
        let id = lookups
            .create_missing("country", "code", &CellValue::from("NEW"))
            .unwrap();
        assert_eq!(lookups.resolve("country", "code", &CellValue::from("NEW")), Some(id));
    }

    #[test]
    fn test_numeric_text_matches_integer() {
        let store = CountingStore::default();
        store.rows.borrow_mut().push(StoredEntity {
            id: 5,
            values: {
                let mut v = FieldValues::new();
                v.insert("code".into(), CellValue::Integer(42));
                v
            },
        });
        let mut lookups = LookupManager::new(&store);
        lookups
            .prefetch("country", "code", &[CellValue::from("42")])
            .unwrap();
        assert_eq!(lookups.resolve("country", "code", &CellValue::Real(42.0)), Some(5));
    }
}
