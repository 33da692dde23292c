//! HTTP surface.
//!
//! Thin adapter over the engine: submissions, statistics, recent terminal
//! documents, and a health probe. Delivery outcomes are not reported here;
//! callers observe them through `/api/stats` or the terminal listings.

use std::collections::HashMap;

use actix_web::{get, http::StatusCode, post, web, HttpResponse, Responder, Scope};
use serde::{Deserialize, Serialize};

use crate::{error::Error, message::Message, scheduler::Scheduler};

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub content: String,
    pub message_id: Option<String>,
    pub metadata: Option<HashMap<String, String>>,
}

#[derive(Debug, Serialize)]
pub struct SendResponse {
    pub message_id: String,
}

#[post("/send")]
async fn send(
    scheduler: web::Data<Scheduler>,
    body: web::Json<SendRequest>,
) -> Result<impl Responder, Error> {
    let SendRequest {
        content,
        message_id,
        metadata,
    } = body.into_inner();

    let message = Message {
        message_id: message_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        content,
        metadata,
    };

    let message_id = scheduler.submit(message).await?;
    Ok((web::Json(SendResponse { message_id }), StatusCode::ACCEPTED))
}

#[derive(Debug, Deserialize)]
pub struct SendBulkRequest {
    pub content: String,
    pub count: usize,
    pub metadata: Option<HashMap<String, String>>,
}

#[derive(Debug, Serialize)]
pub struct SendBulkResponse {
    pub submitted: usize,
}

#[post("/send-bulk")]
async fn send_bulk(
    scheduler: web::Data<Scheduler>,
    body: web::Json<SendBulkRequest>,
) -> Result<impl Responder, Error> {
    let SendBulkRequest {
        content,
        count,
        metadata,
    } = body.into_inner();

    if count == 0 {
        return Err(Error::invalid_parameter("count must be at least 1"));
    }

    let mut submitted = 0;
    for index in 0..count {
        let mut metadata = metadata.clone().unwrap_or_default();
        metadata.insert("bulk_index".to_owned(), index.to_string());

        let message = Message {
            message_id: uuid::Uuid::new_v4().to_string(),
            content: content.clone(),
            metadata: Some(metadata),
        };
        scheduler.submit(message).await?;
        submitted += 1;
    }

    Ok((
        web::Json(SendBulkResponse { submitted }),
        StatusCode::ACCEPTED,
    ))
}

#[get("/stats")]
async fn stats(scheduler: web::Data<Scheduler>) -> impl Responder {
    web::Json(scheduler.stats().await)
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct RecentResponse {
    pub count: usize,
    pub messages: Vec<serde_json::Value>,
}

const DEFAULT_RECENT_LIMIT: usize = 100;

#[get("/success")]
async fn recent_success(
    scheduler: web::Data<Scheduler>,
    query: web::Query<RecentQuery>,
) -> Result<impl Responder, Error> {
    let messages = scheduler
        .store()
        .recent_success(query.limit.unwrap_or(DEFAULT_RECENT_LIMIT))
        .await?;
    Ok(web::Json(RecentResponse {
        count: messages.len(),
        messages,
    }))
}

#[get("/failed")]
async fn recent_failed(
    scheduler: web::Data<Scheduler>,
    query: web::Query<RecentQuery>,
) -> Result<impl Responder, Error> {
    let messages = scheduler
        .store()
        .recent_failed(query.limit.unwrap_or(DEFAULT_RECENT_LIMIT))
        .await?;
    Ok(web::Json(RecentResponse {
        count: messages.len(),
        messages,
    }))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    scheduler_running: bool,
}

#[get("/health")]
pub async fn health(scheduler: web::Data<Scheduler>) -> impl Responder {
    let scheduler_running = scheduler.is_running();
    let gateway_reachable = scheduler.store().probe().await.is_ok();

    if scheduler_running && gateway_reachable {
        HttpResponse::Ok().json(HealthResponse {
            status: "healthy",
            scheduler_running,
        })
    } else {
        HttpResponse::ServiceUnavailable().json(HealthResponse {
            status: "unhealthy",
            scheduler_running,
        })
    }
}

pub fn service() -> Scope {
    web::scope("/api")
        .service(send)
        .service(send_bulk)
        .service(stats)
        .service(recent_success)
        .service(recent_failed)
}
