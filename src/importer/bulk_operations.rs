// ==========================================
// 表格导入引擎 - 批量落库
// ==========================================
// 职责: 先整批写入,失败则回滚到保存点并逐条降级写入
// 归因: 逐条写入的数据类错误记录到对应条目,不影响其余条目
// 升级: 非数据类错误（连接、锁、SQL 结构）直接上抛,由 chunk 级处理
// ==========================================

use crate::domain::import_config::StepPlan;
use crate::domain::import_record::{PendingUpdate, StagedEntity};
use crate::domain::types::{EntityId, FieldValues};
use crate::repository::entity_store::EntityStore;
use crate::repository::error::{StoreError, StoreResult};
use std::collections::BTreeSet;
use tracing::{debug, warn};

const BULK_SAVEPOINT: &str = "bulk_write";
const ROW_SAVEPOINT: &str = "bulk_row";

/// 批量写入结果（与输入一一对应）
#[derive(Debug, Default)]
pub struct PersistOutcome {
    /// 新实体 id（整批创建时为 None）
    pub ids: Vec<Option<EntityId>>,
    /// (输入下标, 错误)
    pub errors: Vec<(usize, StoreError)>,
}

impl PersistOutcome {
    pub fn error_for(&self, index: usize) -> Option<&StoreError> {
        self.errors
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, e)| e)
    }

    pub fn succeeded(&self) -> usize {
        self.ids.len() - self.errors.len()
    }
}

pub struct BulkOperations<'a> {
    store: &'a dyn EntityStore,
    batch_size: usize,
}

impl<'a> BulkOperations<'a> {
    /// # 参数
    /// - batch_size: 单条批量语句覆盖的记录数上限
    pub fn new(store: &'a dyn EntityStore, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }

    /// 新建暂存实体
    ///
    /// 被后续步骤引用的步骤跳过整批尝试,逐条写入以取得 id
    pub fn persist_creates(
        &self,
        step: &StepPlan,
        staged: &[StagedEntity],
    ) -> StoreResult<PersistOutcome> {
        if staged.is_empty() {
            return Ok(PersistOutcome::default());
        }

        if !step.referenced_later {
            let records: Vec<FieldValues> = staged.iter().map(|s| s.values.clone()).collect();
            let attempt = self.in_savepoint(BULK_SAVEPOINT, || {
                for batch in records.chunks(self.batch_size) {
                    self.store.insert_batch(&step.table, batch)?;
                }
                Ok(())
            })?;
            match attempt {
                Ok(()) => {
                    debug!(step = %step.name, count = staged.len(), "整批创建成功");
                    return Ok(PersistOutcome {
                        ids: vec![None; staged.len()],
                        errors: Vec::new(),
                    });
                }
                Err(e) => {
                    warn!(step = %step.name, error = %e, "整批创建失败,降级为逐条写入");
                }
            }
        }

        self.one_by_one(staged.len(), |i| {
            self.store.insert_one(&step.table, &staged[i].values).map(Some)
        })
    }

    /// 更新已存在实体
    pub fn persist_updates(
        &self,
        step: &StepPlan,
        updates: &[PendingUpdate],
    ) -> StoreResult<PersistOutcome> {
        if updates.is_empty() {
            return Ok(PersistOutcome::default());
        }

        let fields: Vec<String> = updates
            .iter()
            .flat_map(|u| u.values.keys().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let pairs: Vec<(EntityId, FieldValues)> =
            updates.iter().map(|u| (u.id, u.values.clone())).collect();

        let attempt = self.in_savepoint(BULK_SAVEPOINT, || {
            for batch in pairs.chunks(self.batch_size) {
                self.store.update_batch(&step.table, batch, &fields)?;
            }
            Ok(())
        })?;
        match attempt {
            Ok(()) => {
                debug!(step = %step.name, count = updates.len(), "整批更新成功");
                return Ok(PersistOutcome {
                    ids: updates.iter().map(|u| Some(u.id)).collect(),
                    errors: Vec::new(),
                });
            }
            Err(e) => {
                warn!(step = %step.name, error = %e, "整批更新失败,降级为逐条写入");
            }
        }

        self.one_by_one(updates.len(), |i| {
            let update = &updates[i];
            self.store
                .update_one(&step.table, update.id, &update.values)
                .map(|_| Some(update.id))
        })
    }

    /// 逐条写入,每条使用独立保存点
    fn one_by_one<F>(&self, count: usize, mut write: F) -> StoreResult<PersistOutcome>
    where
        F: FnMut(usize) -> StoreResult<Option<EntityId>>,
    {
        let mut outcome = PersistOutcome {
            ids: Vec::with_capacity(count),
            errors: Vec::new(),
        };
        for i in 0..count {
            match self.in_savepoint(ROW_SAVEPOINT, || write(i))? {
                Ok(id) => outcome.ids.push(id),
                Err(e) if e.is_row_level() => {
                    outcome.ids.push(None);
                    outcome.errors.push((i, e));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(outcome)
    }

    /// 在保存点内执行写入
    ///
    /// # 返回
    /// - Ok(Ok(v)): 成功,保存点已释放
    /// - Ok(Err(e)): 写入失败,已回滚到保存点
    /// - Err: 保存点本身无法建立/回滚
    fn in_savepoint<T, F>(&self, name: &str, f: F) -> StoreResult<StoreResult<T>>
    where
        F: FnOnce() -> StoreResult<T>,
    {
        self.store.savepoint(name)?;
        match f() {
            Ok(v) => {
                self.store.release_savepoint(name)?;
                Ok(Ok(v))
            }
            Err(e) => {
                self.store.rollback_to_savepoint(name)?;
                self.store.release_savepoint(name)?;
                Ok(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::import_config::FieldMapping;
    use crate::domain::types::CellValue;
    use crate::repository::entity_store_impl::SqliteEntityStore;
    use rusqlite::Connection;
    use std::sync::{Arc, Mutex};

    fn store() -> SqliteEntityStore {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE person (id INTEGER PRIMARY KEY, email TEXT NOT NULL UNIQUE, name TEXT);",
        )
        .unwrap();
        SqliteEntityStore::from_connection(Arc::new(Mutex::new(conn)))
    }

    fn step(referenced_later: bool) -> StepPlan {
        StepPlan {
            name: "person".into(),
            table: "person".into(),
            mappings: vec![FieldMapping::Direct {
                field: "email".into(),
                column: "email".into(),
            }],
            unique_by: vec![],
            update_if_exists: false,
            required_fields: vec![],
            only_if_present: vec![],
            referenced_later,
        }
    }

    fn staged(email: Option<&str>, idx: usize) -> StagedEntity {
        let mut values = FieldValues::new();
        values.insert(
            "email".into(),
            email.map(CellValue::from).unwrap_or(CellValue::Null),
        );
        StagedEntity::new(values, idx)
    }

    fn count(store: &SqliteEntityStore) -> usize {
        store.list_all("person", &[]).unwrap().len()
    }

    #[test]
    fn test_bulk_create_success_has_no_ids() {
        let store = store();
        let bulk = BulkOperations::new(&store, 1);
        let outcome = bulk
            .persist_creates(&step(false), &[staged(Some("a@x.com"), 0), staged(Some("b@x.com"), 1)])
            .unwrap();
        assert_eq!(outcome.ids, vec![None, None]);
        assert_eq!(outcome.succeeded(), 2);
        assert_eq!(count(&store), 2);
    }

    #[test]
    fn test_bulk_failure_falls_back_per_row() {
        let store = store();
        let bulk = BulkOperations::new(&store, 250);
        let entities = [
            staged(Some("a@x.com"), 0),
            staged(None, 1), // NOT NULL 违反
            staged(Some("c@x.com"), 2),
        ];
        let outcome = bulk.persist_creates(&step(false), &entities).unwrap();

        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.error_for(1).is_some());
        assert!(outcome.ids[0].is_some());
        assert!(outcome.ids[2].is_some());
        assert_eq!(count(&store), 2);
    }

    #[test]
    fn test_referenced_step_always_returns_ids() {
        let store = store();
        let bulk = BulkOperations::new(&store, 250);
        let outcome = bulk
            .persist_creates(&step(true), &[staged(Some("a@x.com"), 0)])
            .unwrap();
        assert!(outcome.ids[0].is_some());
    }

    #[test]
    fn test_update_missing_entity_is_attributed() {
        let store = store();
        let bulk = BulkOperations::new(&store, 250);
        let id = store
            .insert_one("person", &staged(Some("a@x.com"), 0).values)
            .unwrap();

        let mut values = FieldValues::new();
        values.insert("name".into(), CellValue::from("A"));
        let updates = vec![
            PendingUpdate {
                id,
                values: values.clone(),
                row_index: 0,
            },
            PendingUpdate {
                id: 999,
                values,
                row_index: 1,
            },
        ];
        let outcome = bulk.persist_updates(&step(false), &updates).unwrap();
        assert_eq!(outcome.errors.len(), 1);
        assert!(matches!(outcome.error_for(1), Some(StoreError::NotFound { .. })));

        let names = store.list_all("person", &["name".to_string()]).unwrap();
        assert_eq!(names[0].values["name"], CellValue::from("A"));
    }
}
