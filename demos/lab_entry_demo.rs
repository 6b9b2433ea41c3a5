//! 检验录入演示程序
//!
//! 展示参考范围判定、派生指标级联计算与提交报文的构造

use scanalyze::{Gender, PatientRecord, SubmissionPayload, TestCatalog, TestEntrySession};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("🧪 Scanalyze检验录入演示");
    println!("================================");

    // 1. 加载内置检验目录
    let catalog = Arc::new(TestCatalog::builtin()?);
    println!("\n📚 检验目录: {}", catalog.category_names().join(", "));

    // 2. 创建患者与录入会话
    let patient = PatientRecord {
        id: "P-1001".to_string(),
        name: "Mona Adel".to_string(),
        gender: Some(Gender::Female),
        age: Some(50),
        national_id: None,
    };
    let mut session = TestEntrySession::new(catalog, patient.context());
    session.select_category("Kidney Function")?;
    session.select_category("Complete Blood Count")?;
    session.select_category("Liver Function")?;
    println!("✅ 会话 {} 已选择 {} 项检验", session.id(), session.selected().len());

    // 3. 逐项录入，派生指标随之重算
    let entries = [
        ("Kidney Function", "Creatinine", "0.8"),
        ("Complete Blood Count", "Hemoglobin", "13.5"),
        ("Complete Blood Count", "Hematocrit", "40"),
        ("Complete Blood Count", "RBC", "4.5"),
        ("Complete Blood Count", "Platelet", "250"),
        ("Liver Function", "AST", "30"),
        ("Liver Function", "ALT", "25"),
    ];

    println!("\n✍️  录入结果:");
    for (category, test, value) in entries {
        let updated = session.on_value_changed(category, test, value);
        println!("   {} = {}", test, value);
        for key in updated {
            if let Some(result) = session.results().get(&key) {
                let status = result
                    .status
                    .as_ref()
                    .map(|s| s.status.as_str())
                    .unwrap_or("-");
                println!("     ↳ {} = {} ({})", key.test, result.value, status);
            }
        }
    }

    // 4. 修改患者年龄，依赖年龄的指标重新计算
    println!("\n🔄 更新患者年龄: 50 -> 65");
    let mut context = session.patient().clone();
    context.age = Some(65);
    for key in session.update_patient(context) {
        if let Some(result) = session.results().get(&key) {
            println!("   {} = {}", key.test, result.value);
        }
    }

    // 5. 构造提交报文
    let payload = SubmissionPayload::build(&session, &patient);
    println!("\n📤 提交报文 ({} 项):", payload.test_count());
    println!("{}", serde_json::to_string_pretty(&payload)?);

    Ok(())
}
