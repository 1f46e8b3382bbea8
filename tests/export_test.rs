// ==========================================
// 导出与模板集成测试
// ==========================================
// 测试目标: 导入后的数据可按列头导出;模板表头与导入配置一致
// ==========================================

mod test_helpers;

use chrono::NaiveDate;
use table_import::{
    import_table, validate_config, ColumnOrder, CsvExporter, ImportOptions, ImportTemplate,
    TransformRegistry,
};
use test_helpers::{country_city_config, create_test_db, insert_country, open_store, person_config};

#[test]
fn test_export_imported_rows() {
    let (_tmp, db_path) = create_test_db().unwrap();
    insert_country(&db_path, "Wales", "WAL").unwrap();
    insert_country(&db_path, "=cmd", "BAD").unwrap();
    let store = open_store(&db_path);

    let mut exporter =
        CsvExporter::new(vec!["code".into(), "name".into()]).with_label("code", "代码");
    exporter.document_titles = vec!["国家".into()];
    exporter.working_date = NaiveDate::from_ymd_opt(2025, 3, 1);

    let bytes = exporter.export_table(&store, "country").unwrap();
    let text = String::from_utf8(bytes).unwrap();
    let lines: Vec<&str> = text.lines().collect();

    assert_eq!(
        lines,
        vec!["国家", "\"\"", "代码,name", "WAL,Wales", "BAD,'=cmd", "\"\"", "日期: 2025-03-01"]
    );
}

#[test]
fn test_export_empty_table() {
    let (_tmp, db_path) = create_test_db().unwrap();
    let store = open_store(&db_path);

    let exporter = CsvExporter::new(vec!["email".into()]);
    assert!(exporter.export_table(&store, "person").unwrap().is_empty());
}

#[test]
fn test_template_round_trips_into_import() {
    let (_tmp, db_path) = create_test_db().unwrap();
    let store = open_store(&db_path);
    let transforms = TransformRegistry::new();

    let plan = validate_config(&person_config(), &transforms, &store).unwrap();
    let header = ImportTemplate::from_plan(&plan, ColumnOrder::RequiredFirst)
        .to_csv()
        .unwrap();
    assert_eq!(header, "email,name\n");

    // 只有表头的模板可以直接导入（零行）
    let report = import_table(
        header.as_bytes(),
        &person_config(),
        &transforms,
        &store,
        ImportOptions::default(),
    )
    .unwrap();
    assert_eq!(report.summary.processed, 0);
}

#[test]
fn test_template_lists_every_declared_column() {
    let (_tmp, db_path) = create_test_db().unwrap();
    let store = open_store(&db_path);
    let transforms = TransformRegistry::new();

    let plan = validate_config(&country_city_config(false), &transforms, &store).unwrap();
    let columns = ImportTemplate::from_plan(&plan, ColumnOrder::Declared).columns;
    // 按配置文档中的声明顺序
    assert_eq!(columns, vec!["name", "code", "country_code"]);
}
