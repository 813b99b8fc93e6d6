use crate::{
    api::{assignment, attendance, holiday, jobs},
    config::Config,
};
use actix_governor::{
    Governor, GovernorConfigBuilder, PeerIpKeyExtractor, governor::middleware::NoOpMiddleware,
};
use actix_web::web;
use std::sync::Arc;

// Per-route limiter; `None` when the builder rejects the quota.
fn build_limiter(requests_per_min: u32) -> Option<Governor<PeerIpKeyExtractor, NoOpMiddleware>> {
    let requests_per_min = requests_per_min.max(1);
    let per_ms = 60_000 / u64::from(requests_per_min);
    let cfg = GovernorConfigBuilder::default()
        .per_millisecond(per_ms.max(1))
        .burst_size(requests_per_min)
        .key_extractor(PeerIpKeyExtractor)
        .finish()?;
    Some(Governor::new(&cfg))
}

pub fn configure(cfg: &mut web::ServiceConfig, config: Config) {
    let trigger_limiter = build_limiter(config.rate_trigger_per_min).map(Arc::new);

    let run_resource = web::resource("/{job}/run").route(web::post().to(jobs::run_job));
    let jobs_scope = web::scope("/jobs")
        // /jobs
        .service(web::resource("").route(web::get().to(jobs::list_jobs)));
    let jobs_scope = match trigger_limiter {
        // /jobs/{job}/run
        Some(limiter) => jobs_scope.service(run_resource.wrap(limiter)),
        None => {
            tracing::warn!(
                rate = config.rate_trigger_per_min,
                "Invalid trigger rate limit, job runs are not rate limited"
            );
            jobs_scope.service(run_resource)
        }
    };

    cfg.service(
        web::scope(&config.api_prefix)
            .service(jobs_scope)
            .service(
                web::scope("/holidays")
                    // /holidays
                    .service(web::resource("").route(web::put().to(holiday::upsert_holiday)))
                    // /holidays/{year}/{month}
                    .service(
                        web::resource("/{year}/{month}")
                            .route(web::get().to(holiday::holidays_in_month)),
                    )
                    // /holidays/{year}/{month}/count
                    .service(
                        web::resource("/{year}/{month}/count")
                            .route(web::get().to(holiday::holiday_count)),
                    ),
            )
            .service(
                web::scope("/assignments")
                    .service(web::resource("").route(web::post().to(assignment::assign_policy))),
            )
            .service(
                web::scope("/attendance")
                    // /attendance/{employee_id}/{year_month}
                    .service(
                        web::resource("/{employee_id}/{year_month}")
                            .route(web::get().to(attendance::month_records)),
                    )
                    // /attendance/{employee_id}/{date}/recompute
                    .service(
                        web::resource("/{employee_id}/{date}/recompute")
                            .route(web::post().to(attendance::recompute_day)),
                    ),
            ),
    );
}
