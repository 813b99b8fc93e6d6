use std::sync::Arc;

use actix_web::middleware::{Logger, NormalizePath};
use actix_web::web::Data;
use actix_web::{App, HttpResponse, HttpServer, Responder, get};
use anyhow::Context;
use chrono::Datelike;
use dotenvy::dotenv;
use tracing::{info, warn};
use tracing_appender::rolling;
use utoipa::OpenApi; // ← needed for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

use hrm_attendance::config::Config;
use hrm_attendance::db::init_db;
use hrm_attendance::docs::ApiDoc;
use hrm_attendance::engine::aggregator::SummaryAggregator;
use hrm_attendance::engine::holiday_calendar::HolidayCalendar;
use hrm_attendance::routes;
use hrm_attendance::scheduler::Scheduler;
use hrm_attendance::scheduler::jobs::attendance_jobs;
use hrm_attendance::store::Stores;
use hrm_attendance::store::mysql::MySqlStore;

#[get("/health")]
async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let config = Config::from_env()?;

    // Rolling daily log
    let file_appender = rolling::daily(&config.log_dir, "attendance.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_max_level(config.log_level)
        .with_ansi(false)
        .with_target(false) // removes module path
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .pretty()
        .init();

    info!("Server starting...");

    let pool = init_db(&config.database_url).await?;
    let stores = Stores::from_backend(Arc::new(MySqlStore::new(pool)));

    let calendar = Arc::new(HolidayCalendar::new(
        stores.holidays.clone(),
        config.holiday_cache_years,
        config.holiday_cache_ttl(),
    ));
    let aggregator = Arc::new(SummaryAggregator::new(
        stores,
        calendar.clone(),
        config.recompute_concurrency,
    ));

    let mut scheduler = Scheduler::new(config.scheduler_timezone);
    for job in attendance_jobs(&aggregator) {
        scheduler.register(job);
    }
    let scheduler = Arc::new(scheduler);

    // Warm up the current year's holidays
    let calendar_for_warmup = calendar.clone();
    let year = scheduler.today().year();
    actix_web::rt::spawn(async move {
        if let Err(e) = calendar_for_warmup.refresh_cache(year).await {
            warn!(error = %e, year, "Failed to warm up holiday cache");
        }
    });

    scheduler
        .start(&config.schedules())
        .await
        .context("Failed to start scheduler")?;

    let server_addr = config.server_addr.clone();
    let config_data = config.clone();
    let calendar_data = Data::from(calendar);
    let aggregator_data = Data::from(aggregator);
    let scheduler_data = Data::from(scheduler.clone());

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(NormalizePath::trim())
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}") // ← wildcard {_:.*} to match JS/CSS files
                    .url("/api-doc/openapi.json", ApiDoc::openapi()),
            )
            .app_data(calendar_data.clone())
            .app_data(aggregator_data.clone())
            .app_data(scheduler_data.clone())
            .service(health)
            .configure(|cfg| routes::configure(cfg, config_data.clone()))
    })
    .bind(&server_addr)
    .with_context(|| format!("Failed to bind {server_addr}"))?
    .run()
    .await?;

    scheduler.shutdown(config.shutdown_timeout()).await;
    info!("Server stopped");
    Ok(())
}
