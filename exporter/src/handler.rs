use actix_web::http::header::CONTENT_TYPE;
use actix_web::{web, HttpResponse};
use helper::pool::Pool;
use helper::prom_metrics::PooledMetrics;
use prometheus::Registry;

pub async fn metrics(
    registry: web::Data<Registry>,
    pool: web::Data<Pool<PooledMetrics>>,
) -> HttpResponse {
    let mut pooled = pool.take();
    let content_type = pooled.content_type().to_string();

    let response = match pooled.encode(&registry) {
        Ok(body) => HttpResponse::Ok()
            .insert_header((CONTENT_TYPE, content_type))
            .body(body.to_vec()),
        Err(err) => {
            error!("Failed to encode prometheus metrics: {}", err);
            HttpResponse::InternalServerError()
                .body("Failed to encode prometheus metrics")
        }
    };

    pool.give_back(pooled);
    response
}

pub async fn health() -> HttpResponse { HttpResponse::Ok().finish() }
