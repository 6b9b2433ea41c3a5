//! Scanalyze 检验录入命令行

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use scanalyze_admin::{init_logging, ConfigManager, ScanalyzeConfig};
use scanalyze_core::{Gender, PatientRecord};
use scanalyze_lab::{
    JsonFileSink, ResultKey, SubmissionPayload, Submitter, TestCatalog, TestEntrySession,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Scanalyze命令行参数
#[derive(Parser, Debug)]
#[command(name = "scanalyze")]
#[command(about = "检验结果录入、派生指标计算与提交")]
struct Args {
    /// 检验目录 JSON 文件，默认使用内置目录
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// 配置文件路径
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 日志级别，覆盖配置文件
    #[arg(short, long)]
    log_level: Option<String>,

    /// 患者年龄
    #[arg(long)]
    age: Option<u32>,

    /// 患者性别 (male / female)
    #[arg(long)]
    gender: Option<Gender>,

    /// 患者编号
    #[arg(long, default_value = "anonymous")]
    patient_id: String,

    /// 患者姓名
    #[arg(long, default_value = "")]
    name: String,

    /// 身份证号
    #[arg(long)]
    national_id: Option<String>,

    /// 选择的检验分类，可重复，默认全部
    #[arg(long = "select")]
    select: Vec<String>,

    /// 录入值，格式 `分类:项目=数值`，按顺序应用
    #[arg(long = "value")]
    values: Vec<String>,

    /// 提交文件输出目录，未设置时打印报文
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// 要求必填项目均已录入
    #[arg(long)]
    strict: bool,
}

/// 解析 `分类:项目=数值`
fn parse_value_arg(raw: &str) -> Result<(ResultKey, String)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected Category:Test=Value, got '{}'", raw))?;
    let key = ResultKey::parse(key.trim())
        .ok_or_else(|| anyhow!("expected Category:Test before '=', got '{}'", key))?;
    Ok((key, value.trim().to_string()))
}

fn load_catalog(path: Option<&Path>) -> Result<TestCatalog> {
    let catalog = match path {
        Some(path) => TestCatalog::from_path(path)
            .with_context(|| format!("Failed to load catalog {}", path.display()))?,
        None => TestCatalog::builtin().context("Failed to load builtin catalog")?,
    };
    Ok(catalog)
}

fn load_config(args: &Args) -> Result<ScanalyzeConfig> {
    let mut config = ConfigManager::new(args.config.as_deref())?.into_config();

    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if let Some(catalog) = &args.catalog {
        config.lab.catalog_path = Some(catalog.display().to_string());
    }
    if let Some(dir) = &args.output_dir {
        config.submission.output_dir = Some(dir.display().to_string());
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(&args)?;
    init_logging(&config.logging)?;

    info!("启动Scanalyze检验录入...");

    let catalog = Arc::new(load_catalog(config.lab.catalog_path.as_deref().map(Path::new))?);
    info!("检验目录: {} 个分类", catalog.categories.len());

    let patient = PatientRecord {
        id: args.patient_id.clone(),
        name: args.name.clone(),
        gender: args.gender,
        age: args.age,
        national_id: args.national_id.clone(),
    };

    let mut session =
        TestEntrySession::with_config(catalog.clone(), patient.context(), config.lab.propagation);

    if args.select.is_empty() {
        for category in catalog.category_names() {
            session.select_category(category)?;
        }
    } else {
        for category in &args.select {
            session
                .select_category(category)
                .with_context(|| format!("Cannot select category '{}'", category))?;
        }
    }

    for raw in &args.values {
        let (key, value) = parse_value_arg(raw)?;
        if catalog.test(&key.category, &key.test).is_none() {
            warn!("跳过未知检验项目: {}", key);
            continue;
        }
        let updated = session.on_value_changed(&key.category, &key.test, &value);
        for derived in &updated {
            if let Some(result) = session.results().get(derived) {
                info!("  {} = {}", derived, result.value);
            }
        }
    }

    let payload = if args.strict {
        SubmissionPayload::build_validated(&session, &patient)?
    } else {
        SubmissionPayload::build(&session, &patient)
    };
    info!("报文包含 {} 项检验结果", payload.test_count());

    match &config.submission.output_dir {
        Some(dir) => {
            let submitter = Submitter::new(
                JsonFileSink::new(dir),
                config.submission.retry_policy(),
            );
            match submitter.submit(&payload).await {
                Ok(receipt) => {
                    info!("提交成功: {}", receipt.submission_id);
                    if let Some(location) = receipt.location {
                        println!("{}", location);
                    }
                }
                Err(e) => {
                    error!("提交失败: {}", e);
                    return Err(e.into());
                }
            }
        }
        None => println!("{}", payload.to_json_pretty()?),
    }

    Ok(())
}
