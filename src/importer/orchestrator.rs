// ==========================================
// 表格导入引擎 - 导入编排器
// ==========================================
// 流程: 解析 → 分块 → (每个步骤: 预取 → 计算 → 去重 → 落库) → 汇总
// 事务: run(仅 Replace) → chunk → 批量写入,逐层保存点
// 红线: 行状态单调;chunk 级异常只影响本 chunk
// ==========================================

use crate::config::import_settings_trait::ImportSettings;
use crate::domain::import_config::{ImportPlan, StepPlan};
use crate::domain::import_record::{ImportReport, ImportSummary, RowError, RowOutcome, RowRecord};
use crate::domain::types::ImportMode;
use crate::importer::bulk_operations::BulkOperations;
use crate::importer::data_processor::DataProcessor;
use crate::importer::error::ImportResult;
use crate::importer::file_parser::FileReader;
use crate::importer::lookup_manager::LookupManager;
use crate::importer::object_manager::ObjectManager;
use crate::importer::transforms::TransformRegistry;
use crate::repository::entity_store::EntityStore;
use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

const RUN_SAVEPOINT: &str = "import_run";
const CHUNK_SAVEPOINT: &str = "import_chunk";

/// 单次导入的调用参数
#[derive(Debug, Clone, Copy, Default)]
pub struct ImportOptions {
    pub mode: ImportMode,
    /// 覆盖配置中的 chunk_size
    pub chunk_size: Option<usize>,
}

/// chunk 内的计数（chunk 失败时整体丢弃）
#[derive(Debug, Default, Clone, Copy)]
struct ChunkCounts {
    created: usize,
    updated: usize,
}

// ==========================================
// TableImporter - 导入编排器
// ==========================================
pub struct TableImporter<'a, S>
where
    S: EntityStore,
{
    store: &'a S,
    transforms: &'a TransformRegistry,
    settings: ImportSettings,
}

impl<'a, S> TableImporter<'a, S>
where
    S: EntityStore,
{
    /// # 参数
    /// - store: 目标存储
    /// - transforms: 配置中引用的转换函数/生成器
    /// - settings: 批量大小、错误展示上限等运行参数
    pub fn new(store: &'a S, transforms: &'a TransformRegistry, settings: ImportSettings) -> Self {
        Self {
            store,
            transforms,
            settings,
        }
    }

    /// 导入一个文件
    ///
    /// # 返回
    /// - Ok(ImportReport): 完整汇总（行级失败只体现在汇总中）
    /// - Err: 文件格式错误,或 Replace 模式下无法建立/清空数据
    pub fn import_table(
        &self,
        plan: &ImportPlan,
        bytes: &[u8],
        options: ImportOptions,
    ) -> ImportResult<ImportReport> {
        self.import_table_with_progress(plan, bytes, options, &mut |_, _| {})
    }

    /// 导入一个文件,每个 chunk 结束后回调 (已处理行数, 总行数)
    #[instrument(
        skip(self, plan, bytes, progress),
        fields(run_id = tracing::field::Empty, mode = %options.mode)
    )]
    pub fn import_table_with_progress(
        &self,
        plan: &ImportPlan,
        bytes: &[u8],
        options: ImportOptions,
        progress: &mut dyn FnMut(usize, usize),
    ) -> ImportResult<ImportReport> {
        let start_time = Instant::now();
        let run_id = Uuid::new_v4().to_string();
        tracing::Span::current().record("run_id", run_id.as_str());

        let mut rows = FileReader::read(bytes, plan)?;
        let total = rows.len();
        let chunk_size = options
            .chunk_size
            .or(plan.chunk_size)
            .or(self.settings.default_chunk_size)
            .unwrap_or(total)
            .max(1);

        info!(
            run_id = %run_id,
            total_rows = total,
            chunk_size,
            steps = plan.steps.len(),
            "开始导入"
        );

        let replace = options.mode == ImportMode::Replace;
        let mut deleted_count = 0;
        if replace {
            deleted_count = self.begin_replace(plan)?;
        }

        let mut counts = ChunkCounts::default();
        let mut aborted: Option<String> = None;
        let mut processed = 0;

        for chunk in rows.chunks_mut(chunk_size) {
            if let Some(reason) = &aborted {
                Self::fail_pending(chunk, reason);
            } else {
                match self.process_chunk(plan, chunk) {
                    Ok(chunk_counts) => {
                        counts.created += chunk_counts.created;
                        counts.updated += chunk_counts.updated;
                    }
                    Err(e) => {
                        let message = e.to_string();
                        error!(
                            first_row = chunk.first().map(|r| r.row_number),
                            error = %message,
                            "chunk 处理失败,整块标记失败"
                        );
                        Self::fail_pending(chunk, &message);
                        if replace {
                            aborted = Some(format!("导入已中止: {}", message));
                        }
                    }
                }
            }
            processed += chunk.len();
            progress(processed, total);
        }

        let any_failed = rows.iter().any(RowRecord::is_failed);
        let mut rolled_back = false;
        if replace {
            if any_failed {
                self.store.rollback_to_savepoint(RUN_SAVEPOINT)?;
                self.store.release_savepoint(RUN_SAVEPOINT)?;
                warn!(run_id = %run_id, "Replace 模式存在失败行,已整体回滚");
                rolled_back = true;
                deleted_count = 0;
                counts = ChunkCounts::default();
            } else {
                self.store.release_savepoint(RUN_SAVEPOINT)?;
            }
        }

        let summary = ImportSummary::from_rows(
            &rows,
            counts.created,
            counts.updated,
            self.settings.failed_rows_display_limit,
        );
        let elapsed_ms = start_time.elapsed().as_millis();

        info!(
            run_id = %run_id,
            processed = summary.processed,
            created = summary.created,
            updated = summary.updated,
            failed = summary.failed,
            elapsed_ms = elapsed_ms as u64,
            "导入完成"
        );

        Ok(ImportReport {
            run_id,
            mode: options.mode,
            summary,
            deleted_count,
            rolled_back,
            rows: rows.iter().map(RowOutcome::from).collect(),
            elapsed_ms,
        })
    }

    /// Replace 模式: 建立 run 保存点并按步骤逆序清空目标表
    fn begin_replace(&self, plan: &ImportPlan) -> ImportResult<usize> {
        self.store.savepoint(RUN_SAVEPOINT)?;

        let mut seen = HashSet::new();
        let mut deleted = 0;
        for step in plan.steps.iter().rev() {
            if !seen.insert(step.table.as_str()) {
                continue;
            }
            match self.store.delete_all(&step.table) {
                Ok(n) => {
                    debug!(table = %step.table, deleted = n, "已清空目标表");
                    deleted += n;
                }
                Err(e) => {
                    self.store.rollback_to_savepoint(RUN_SAVEPOINT)?;
                    self.store.release_savepoint(RUN_SAVEPOINT)?;
                    return Err(e.into());
                }
            }
        }
        Ok(deleted)
    }

    /// 处理一个 chunk（独立保存点）
    fn process_chunk(&self, plan: &ImportPlan, rows: &mut [RowRecord]) -> ImportResult<ChunkCounts> {
        self.store.savepoint(CHUNK_SAVEPOINT)?;

        match self.run_steps(plan, rows) {
            Ok(counts) => {
                self.store.release_savepoint(CHUNK_SAVEPOINT)?;
                for row in rows.iter_mut() {
                    row.mark_succeeded();
                }
                Ok(counts)
            }
            Err(e) => {
                if let Err(rollback_err) = self
                    .store
                    .rollback_to_savepoint(CHUNK_SAVEPOINT)
                    .and_then(|_| self.store.release_savepoint(CHUNK_SAVEPOINT))
                {
                    error!(error = %rollback_err, "chunk 回滚失败");
                }
                Err(e)
            }
        }
    }

    /// 依声明顺序执行全部步骤
    fn run_steps(&self, plan: &ImportPlan, rows: &mut [RowRecord]) -> ImportResult<ChunkCounts> {
        let mut lookups = LookupManager::new(self.store);
        let mut counts = ChunkCounts::default();
        for step in &plan.steps {
            let step_counts = self.run_step(step, rows, &mut lookups)?;
            counts.created += step_counts.created;
            counts.updated += step_counts.updated;
        }
        Ok(counts)
    }

    fn run_step(
        &self,
        step: &StepPlan,
        rows: &mut [RowRecord],
        lookups: &mut LookupManager<'_>,
    ) -> ImportResult<ChunkCounts> {
        let mut counts = ChunkCounts::default();

        // 失败行不再参与后续步骤
        let applicable: Vec<usize> = rows
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.is_failed() && DataProcessor::applies_to(step, r))
            .map(|(i, _)| i)
            .collect();
        if applicable.is_empty() {
            return Ok(counts);
        }

        lookups.prefetch_step(step, rows, &applicable)?;

        let processor = DataProcessor::new(self.transforms);
        let mut computed = Vec::with_capacity(applicable.len());
        for idx in applicable {
            match processor.compute_row(step, &rows[idx], lookups)? {
                Ok(values) => computed.push((idx, values)),
                Err(row_error) => {
                    rows[idx].mark_failed(row_error);
                }
            }
        }

        let classification = ObjectManager::new(self.store).classify(step, computed, rows)?;
        let bulk = BulkOperations::new(self.store, self.settings.batch_size);

        // ===== 新建 =====
        let created = bulk.persist_creates(step, &classification.creates)?;
        for (i, staged) in classification.creates.iter().enumerate() {
            if let Some(e) = created.error_for(i) {
                for &idx in &staged.rows {
                    rows[idx].mark_failed(RowError::new(None, format!("落库失败: {}", e)));
                }
                continue;
            }
            counts.created += 1;
            // 合并到同一暂存实体的后续行计为更新
            counts.updated += staged.rows.len() - 1;
            if let Some(id) = created.ids[i] {
                for &idx in &staged.rows {
                    rows[idx].record_reference(&step.name, id);
                }
                lookups.register(&step.table, &staged.values, id);
            }
        }
        if !classification.creates.is_empty() {
            lookups.forget_misses(&step.table);
        }

        // ===== 更新 =====
        let updated = bulk.persist_updates(step, &classification.updates)?;
        for (i, update) in classification.updates.iter().enumerate() {
            let row = &mut rows[update.row_index];
            if let Some(e) = updated.error_for(i) {
                row.mark_failed(RowError::new(None, format!("落库失败: {}", e)));
                continue;
            }
            counts.updated += 1;
            row.record_reference(&step.name, update.id);
            lookups.register(&step.table, &update.values, update.id);
        }

        debug!(
            step = %step.name,
            created = counts.created,
            updated = counts.updated,
            rejected = classification.rejected,
            "步骤完成"
        );
        Ok(counts)
    }

    /// 将 chunk 内尚未终结的行标记为失败
    fn fail_pending(rows: &mut [RowRecord], message: &str) {
        for row in rows.iter_mut() {
            row.mark_failed(RowError::new(None, message));
        }
    }
}
