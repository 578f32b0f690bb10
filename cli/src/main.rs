use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{NaiveDate, NaiveDateTime};
use clap::Parser;
use hie_core::{DashboardConfig, DashboardSnapshot};
use hie_fhir::{snapshot_from_bundle_strs, FhirQuery, FhirSettings, HttpBundleSource, RefreshPipeline};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info,hie_fhir=info,hie_core=info";

#[derive(Parser, Debug)]
#[command(
    name = "hie-cli",
    about = "Tổng hợp thời gian xử lý xét nghiệm gen từ máy chủ FHIR hoặc bundle đã lưu."
)]
struct Args {
    /// Các trang bundle JSON đã lưu; khi có thì không gọi máy chủ.
    #[arg(short, long, num_args = 1..)]
    input: Vec<PathBuf>,

    /// Ngày bắt đầu timeline.
    #[arg(long)]
    anchor: Option<NaiveDate>,

    /// Số ngày của timeline.
    #[arg(long)]
    days: Option<u32>,

    /// Chỉ tính bản ghi sau thời điểm này (UTC, ví dụ 2025-12-01T00:00:00).
    #[arg(long)]
    cutoff: Option<NaiveDateTime>,

    /// Cận dưới `_lastUpdated` khi truy vấn máy chủ.
    #[arg(long)]
    updated_after: Option<NaiveDate>,

    /// Hệ mã của chỉ định lâm sàng.
    #[arg(long)]
    indication_system: Option<String>,

    /// In các bảng dạng JSON thay vì tóm tắt.
    #[arg(long)]
    json: bool,
}

impl Args {
    fn dashboard_config(&self) -> DashboardConfig {
        let mut config = DashboardConfig::default();
        if let Some(anchor) = self.anchor {
            config.timeline_anchor = anchor;
        }
        if let Some(days) = self.days {
            config.timeline_days = days;
        }
        if self.cutoff.is_some() {
            config.reporting_cutoff = self.cutoff;
        }
        if let Some(system) = &self.indication_system {
            config.indication_system = Some(system.clone());
        }
        config
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = args.dashboard_config();

    let snapshot = if args.input.is_empty() {
        from_server(&args, config)?
    } else {
        Arc::new(from_files(&args.input, &config)?)
    };

    if args.json {
        let views = serde_json::to_string_pretty(snapshot.views())
            .context("Không serialize được các bảng")?;
        println!("{views}");
    } else {
        print_summary(&snapshot);
    }

    Ok(())
}

fn from_files(paths: &[PathBuf], config: &DashboardConfig) -> anyhow::Result<DashboardSnapshot> {
    let pages = paths
        .iter()
        .map(|path| {
            std::fs::read_to_string(path).with_context(|| format!("Không đọc được file {:?}", path))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    tracing::info!(pages = pages.len(), "building snapshot from saved bundles");
    snapshot_from_bundle_strs(&pages, config).context("Không tạo được snapshot từ bundle")
}

fn from_server(args: &Args, config: DashboardConfig) -> anyhow::Result<Arc<DashboardSnapshot>> {
    let settings = FhirSettings::from_env().context("Thiếu cấu hình máy chủ FHIR")?;
    tracing::debug!(?settings, "using FHIR server");

    let mut query = FhirQuery::default();
    if args.updated_after.is_some() {
        query.last_updated_after = args.updated_after;
    }
    let start_url = query.url(&settings.base_url());

    let source = HttpBundleSource::new(&settings)?;
    let mut pipeline = RefreshPipeline::new(source, start_url, config);
    let snapshot = pipeline
        .refresh()
        .with_context(|| format!("Làm mới từ {} thất bại", settings.server))?;

    let config = pipeline.config();
    tracing::info!(
        anchor = %config.timeline_anchor,
        days = config.timeline_days,
        stale = pipeline.status().is_stale(),
        "refresh complete"
    );
    Ok(snapshot)
}

fn print_summary(snapshot: &DashboardSnapshot) {
    let views = snapshot.views();
    let busiest_day = views
        .timeline
        .iter()
        .filter_map(|day| day.report_sent.map(|count| (day.date, count)))
        .max_by_key(|(_, count)| *count);

    println!("Generated at: {}", snapshot.generated_at);
    println!("Reports: {}", snapshot.record_count());
    println!("Requester/test groups: {}", views.reports_by_requester.len());
    println!("Requester/indication groups: {}", views.orders_by_indication.len());
    println!("Testing duration groups: {}", views.testing_durations.len());
    println!("Release duration groups: {}", views.release_durations.len());
    match busiest_day {
        Some((date, count)) => println!("Busiest reporting day: {date} ({count} reports)"),
        None => println!("Busiest reporting day: none in timeline"),
    }
}
