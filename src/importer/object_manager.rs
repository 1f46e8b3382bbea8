// ==========================================
// 表格导入引擎 - 对象管理器
// ==========================================
// 职责: 按唯一键对行去重,区分新建 / 更新 / 重复拒绝
// 范围: 同时检查已持久化实体与本次运行中已暂存的实体
// 红线: 按行号顺序处理;暂存实体立即登记进唯一键索引
// ==========================================

use crate::domain::import_config::StepPlan;
use crate::domain::import_record::{PendingUpdate, RowError, RowRecord, StagedEntity};
use crate::domain::types::{CellValue, EntityId, FieldValues};
use crate::repository::entity_store::EntityStore;
use crate::repository::error::StoreResult;
use std::collections::HashMap;
use tracing::debug;

/// 唯一键索引的命中目标
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyTarget {
    Persisted(EntityId),
    /// creates 中的下标
    Staged(usize),
}

/// 单步骤的分类结果
#[derive(Debug, Default)]
pub struct Classification {
    pub creates: Vec<StagedEntity>,
    pub updates: Vec<PendingUpdate>,
    /// 因唯一键重复被拒绝的行数
    pub rejected: usize,
}

pub struct ObjectManager<'a> {
    store: &'a dyn EntityStore,
}

impl<'a> ObjectManager<'a> {
    pub fn new(store: &'a dyn EntityStore) -> Self {
        Self { store }
    }

    /// 计算唯一键元组（任一分量为空返回 None）
    pub fn unique_key(step: &StepPlan, values: &FieldValues) -> Option<Vec<String>> {
        if step.unique_by.is_empty() {
            return None;
        }
        step.unique_by
            .iter()
            .map(|f| values.get(f).and_then(CellValue::as_key))
            .collect()
    }

    /// 对步骤内的行做新建/更新/拒绝分类
    ///
    /// # 参数
    /// - computed: (行下标, 字段值),必须按行号递增
    /// - rows: chunk 内全部行,重复行在此被标记失败
    pub fn classify(
        &self,
        step: &StepPlan,
        computed: Vec<(usize, FieldValues)>,
        rows: &mut [RowRecord],
    ) -> StoreResult<Classification> {
        let mut index = self.prefetch_index(step, &computed)?;
        let mut result = Classification::default();

        for (row_index, values) in computed {
            let key = match Self::unique_key(step, &values) {
                Some(k) => k,
                None => {
                    // 唯一键不完整: 不参与去重,直接新建
                    result.creates.push(StagedEntity::new(values, row_index));
                    continue;
                }
            };

            match index.get(&key).copied() {
                None => {
                    index.insert(key, KeyTarget::Staged(result.creates.len()));
                    result.creates.push(StagedEntity::new(values, row_index));
                }
                Some(_) if !step.update_if_exists => {
                    rows[row_index].mark_failed(Self::duplicate_error(step, &key));
                    result.rejected += 1;
                }
                Some(KeyTarget::Persisted(id)) => {
                    result.updates.push(PendingUpdate {
                        id,
                        values,
                        row_index,
                    });
                }
                Some(KeyTarget::Staged(pos)) => {
                    result.creates[pos].merge(values, row_index);
                }
            }
        }

        debug!(
            step = %step.name,
            creates = result.creates.len(),
            updates = result.updates.len(),
            rejected = result.rejected,
            "唯一键分类完成"
        );
        Ok(result)
    }

    /// 查询与本批唯一键匹配的已持久化实体
    fn prefetch_index(
        &self,
        step: &StepPlan,
        computed: &[(usize, FieldValues)],
    ) -> StoreResult<HashMap<Vec<String>, KeyTarget>> {
        let mut index = HashMap::new();
        if step.unique_by.is_empty() {
            return Ok(index);
        }

        let mut seen = HashMap::new();
        for (_, values) in computed {
            if let Some(key) = Self::unique_key(step, values) {
                seen.entry(key).or_insert_with(|| {
                    step.unique_by
                        .iter()
                        .map(|f| values.get(f).cloned().unwrap_or_default())
                        .collect::<Vec<CellValue>>()
                });
            }
        }
        if seen.is_empty() {
            return Ok(index);
        }

        let keys: Vec<Vec<CellValue>> = seen.into_values().collect();
        let existing = self.store.find_by_keys(&step.table, &step.unique_by, &keys)?;
        for entity in existing {
            if let Some(key) = Self::unique_key(step, &entity.values) {
                let target = index.entry(key).or_insert(KeyTarget::Persisted(entity.id));
                // 库中已存在重复键时取 id 最小者
                if let KeyTarget::Persisted(id) = target {
                    if entity.id < *id {
                        *id = entity.id;
                    }
                }
            }
        }
        Ok(index)
    }

    fn duplicate_error(step: &StepPlan, key: &[String]) -> RowError {
        let pairs: Vec<String> = step
            .unique_by
            .iter()
            .zip(key)
            .map(|(field, value)| format!("{}={}", field, value))
            .collect();
        let field = step.unique_by.first().map(|first| {
            step.mappings
                .iter()
                .rev()
                .find(|m| m.field() == first)
                .map(|m| m.error_field())
                .unwrap_or_else(|| first.clone())
        });
        RowError::new(field, format!("唯一键重复: {}", pairs.join(", ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::import_config::FieldMapping;
    use crate::domain::types::RowStatus;
    use crate::repository::entity_store_impl::SqliteEntityStore;
    use rusqlite::Connection;
    use std::sync::{Arc, Mutex};

    fn store() -> SqliteEntityStore {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE person (id INTEGER PRIMARY KEY, email TEXT UNIQUE, name TEXT);
            INSERT INTO person (id, email, name) VALUES (5, 'old@x.com', 'Old');
            "#,
        )
        .unwrap();
        SqliteEntityStore::from_connection(Arc::new(Mutex::new(conn)))
    }

    fn step(update_if_exists: bool) -> StepPlan {
        StepPlan {
            name: "person".into(),
            table: "person".into(),
            mappings: vec![
                FieldMapping::Direct {
                    field: "email".into(),
                    column: "email".into(),
                },
                FieldMapping::Direct {
                    field: "name".into(),
                    column: "name".into(),
                },
            ],
            unique_by: vec!["email".into()],
            update_if_exists,
            required_fields: vec![],
            only_if_present: vec![],
            referenced_later: false,
        }
    }

    fn values(email: &str, name: &str) -> FieldValues {
        let mut v = FieldValues::new();
        v.insert("email".into(), CellValue::from_raw_text(email));
        v.insert("name".into(), CellValue::from(name));
        v
    }

    fn rows(n: usize) -> Vec<RowRecord> {
        (0..n).map(|i| RowRecord::new(i + 2, HashMap::new())).collect()
    }

    #[test]
    fn test_duplicate_in_batch_rejected_without_update() {
        let store = store();
        let manager = ObjectManager::new(&store);
        let mut rows = rows(2);
        let computed = vec![(0, values("a@x.com", "A")), (1, values("a@x.com", "A"))];

        let result = manager.classify(&step(false), computed, &mut rows).unwrap();
        assert_eq!(result.creates.len(), 1);
        assert_eq!(result.rejected, 1);
        assert_eq!(rows[0].status(), RowStatus::Pending);
        assert_eq!(rows[1].status(), RowStatus::Failed);
        assert_eq!(rows[1].errors()[0].field.as_deref(), Some("email"));
        assert!(rows[1].errors()[0].message.contains("a@x.com"));
    }

    #[test]
    fn test_duplicate_in_batch_merged_with_update() {
        let store = store();
        let manager = ObjectManager::new(&store);
        let mut rows = rows(2);
        let computed = vec![(0, values("a@x.com", "A")), (1, values("a@x.com", "B"))];

        let result = manager.classify(&step(true), computed, &mut rows).unwrap();
        assert_eq!(result.creates.len(), 1);
        assert_eq!(result.creates[0].rows, vec![0, 1]);
        assert_eq!(result.creates[0].values["name"], CellValue::from("B"));
        assert!(rows.iter().all(|r| !r.is_failed()));
    }

    #[test]
    fn test_existing_entity_update_or_reject() {
        let store = store();
        let manager = ObjectManager::new(&store);

        let mut rows_a = rows(1);
        let updated = manager
            .classify(&step(true), vec![(0, values("old@x.com", "New"))], &mut rows_a)
            .unwrap();
        assert_eq!(updated.updates.len(), 1);
        assert_eq!(updated.updates[0].id, 5);

        let mut rows_b = rows(1);
        let rejected = manager
            .classify(&step(false), vec![(0, values("old@x.com", "New"))], &mut rows_b)
            .unwrap();
        assert_eq!(rejected.rejected, 1);
        assert!(rows_b[0].is_failed());
    }

    #[test]
    fn test_incomplete_key_always_creates() {
        let store = store();
        let manager = ObjectManager::new(&store);
        let mut rows = rows(2);
        let computed = vec![(0, values("", "A")), (1, values("", "B"))];

        let result = manager.classify(&step(false), computed, &mut rows).unwrap();
        assert_eq!(result.creates.len(), 2);
        assert_eq!(result.rejected, 0);
    }
}
