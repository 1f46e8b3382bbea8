// ==========================================
// 表格导入引擎 - 命令行入口
// ==========================================
// 用法:
//   table-import <config.json> <data-file> [--db <path>] [--replace] [--chunk-size N] [--template]
//
// 退出码: 配置/文件错误或存在失败行时返回 1
// ==========================================

use anyhow::{anyhow, bail, Context};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use table_import::db::open_sqlite_connection;
use table_import::{
    logging, parse_config, ColumnOrder, ConfigManager, ConfigValidator, ImportMode, ImportOptions,
    ImportSettings, ImportTemplate, SqliteEntityStore, TableImporter, TransformRegistry,
};
use tracing::{error, info};

struct CliArgs {
    config_path: PathBuf,
    data_path: Option<PathBuf>,
    db_path: Option<String>,
    replace: bool,
    chunk_size: Option<usize>,
    template: bool,
}

fn usage() -> &'static str {
    "用法: table-import <config.json> <data-file> [--db <path>] [--replace] [--chunk-size N] [--template]"
}

fn parse_args() -> anyhow::Result<CliArgs> {
    let mut positional = Vec::new();
    let mut db_path = None;
    let mut replace = false;
    let mut chunk_size = None;
    let mut template = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--db" => db_path = Some(args.next().ok_or_else(|| anyhow!("--db 缺少路径"))?),
            "--replace" => replace = true,
            "--template" => template = true,
            "--chunk-size" => {
                let raw = args.next().ok_or_else(|| anyhow!("--chunk-size 缺少数值"))?;
                let n: usize = raw
                    .parse()
                    .with_context(|| format!("--chunk-size 不是正整数: {}", raw))?;
                if n == 0 {
                    bail!("--chunk-size 必须 >= 1");
                }
                chunk_size = Some(n);
            }
            "-h" | "--help" => bail!("{}", usage()),
            other if other.starts_with("--") => bail!("未知参数: {}\n{}", other, usage()),
            _ => positional.push(PathBuf::from(arg)),
        }
    }

    let mut positional = positional.into_iter();
    let config_path = positional.next().ok_or_else(|| anyhow!("{}", usage()))?;
    let data_path = positional.next();
    if data_path.is_none() && !template {
        bail!("{}", usage());
    }

    Ok(CliArgs {
        config_path,
        data_path,
        db_path,
        replace,
        chunk_size,
        template,
    })
}

/// 默认数据库路径: TABLE_IMPORT_DB_PATH > 用户数据目录 > 当前目录
fn get_default_db_path() -> String {
    if let Ok(path) = std::env::var("TABLE_IMPORT_DB_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./table_import.db");
    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("table-import");
        std::fs::create_dir_all(&dir).ok();
        path = dir.join("table_import.db");
    }
    path.to_string_lossy().to_string()
}

fn run() -> anyhow::Result<bool> {
    let args = parse_args()?;

    let config_text = std::fs::read_to_string(&args.config_path)
        .with_context(|| format!("读取配置失败: {}", args.config_path.display()))?;
    let raw = parse_config(&config_text)?;

    let db_path = args.db_path.clone().unwrap_or_else(get_default_db_path);
    info!(db_path = %db_path, "使用数据库");
    let conn = Arc::new(Mutex::new(open_sqlite_connection(&db_path)?));
    let store = SqliteEntityStore::from_connection(conn.clone());
    let config_manager = ConfigManager::from_connection(conn).map_err(|e| anyhow!("{}", e))?;
    let settings = ImportSettings::load(&config_manager).map_err(|e| anyhow!("{}", e))?;

    let transforms = TransformRegistry::with_builtins();
    let plan = ConfigValidator::new(&transforms, &store).validate(&raw)?;

    if args.template {
        print!("{}", ImportTemplate::from_plan(&plan, ColumnOrder::RequiredFirst).to_csv()?);
        return Ok(true);
    }

    let data_path = args.data_path.ok_or_else(|| anyhow!("{}", usage()))?;
    let bytes = std::fs::read(&data_path)
        .with_context(|| format!("读取数据文件失败: {}", data_path.display()))?;

    let options = ImportOptions {
        mode: if args.replace {
            ImportMode::Replace
        } else {
            ImportMode::Append
        },
        chunk_size: args.chunk_size,
    };

    let importer = TableImporter::new(&store, &transforms, settings);
    let report = importer.import_table_with_progress(&plan, &bytes, options, &mut |done, total| {
        info!(done, total, "导入进度");
    })?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(report.summary.failed == 0)
}

fn main() -> ExitCode {
    logging::init();
    info!("{} v{}", table_import::APP_NAME, table_import::VERSION);

    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!(error = %e, "导入失败");
            eprintln!("{:#}", e);
            ExitCode::from(1)
        }
    }
}
