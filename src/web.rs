use actix_web::{
    get, http::StatusCode, post, web, App, HttpMessage, HttpResponse, HttpServer, Responder,
    ResponseError, Result,
};
use bytes::BytesMut;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::error::{Error, ErrorKind};
use crate::intake::BatchIntake;
use crate::models::{MediaFile, ProcessingOptions};
use crate::tracker::BatchTracker;

struct AppState {
    intake: Arc<BatchIntake>,
    tracker: Arc<BatchTracker>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitParams {
    sources: Vec<String>,
    #[serde(default)]
    options: ProcessingOptions,
    timeout_secs: Option<u64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    batch_id: Uuid,
    total_files: usize,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorKind,
    description: String,
}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidInput(_) | Error::Download(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.kind(),
            description: self.to_string(),
        })
    }
}

#[post("/batches")]
async fn submit(
    data: web::Data<AppState>,
    submit_params: web::Json<SubmitParams>,
) -> Result<impl Responder, Error> {
    let params = submit_params.into_inner();

    // reject oversized batches before downloading anything
    let max_files = data.intake.max_files();
    if params.sources.is_empty() || params.sources.len() > max_files {
        return Err(Error::invalid(format!(
            "a batch holds between 1 and {} files, got {}",
            max_files,
            params.sources.len()
        )));
    }

    let mut files = Vec::with_capacity(params.sources.len());
    for url in &params.sources {
        info!("downloading source URL {}", url);
        files.push(download(url).await?);
    }

    let handle = data
        .intake
        .submit(files, params.options, params.timeout_secs.map(Duration::from_secs))
        .await?;

    Ok(HttpResponse::build(StatusCode::ACCEPTED).json(SubmitResponse {
        batch_id: handle.batch_id,
        total_files: handle.total_files,
    }))
}

#[get("/batches/{id}")]
async fn status(data: web::Data<AppState>, path: web::Path<Uuid>) -> Result<impl Responder, Error> {
    Ok(web::Json(data.tracker.status(path.into_inner())?))
}

#[get("/batches/{id}/jobs")]
async fn jobs(data: web::Data<AppState>, path: web::Path<Uuid>) -> Result<impl Responder, Error> {
    Ok(web::Json(data.tracker.jobs(path.into_inner())?))
}

async fn download(url: &str) -> Result<MediaFile, Error> {
    let mut res = awc::Client::default()
        .get(url)
        .send()
        .await
        .map_err(|e| Error::Download(format!("GET {url} failed: {e}")))?;

    if !res.status().is_success() {
        return Err(Error::Download(format!("GET {url} returned {}", res.status())));
    }

    let mut payload = res.take_payload();
    let mut data = BytesMut::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(|e| Error::Download(format!("reading {url} failed: {e}")))?;
        data.extend_from_slice(&chunk);
    }

    let name = url.rsplit('/').next().filter(|s| !s.is_empty());
    Ok(MediaFile {
        name: name.map(str::to_owned),
        data: data.freeze(),
    })
}

pub async fn start_web_server(
    intake: Arc<BatchIntake>,
    tracker: Arc<BatchTracker>,
    port: u16,
) -> std::io::Result<()> {
    let app_state = web::Data::new(AppState { intake, tracker });

    info!("Starting web server at 0.0.0.0:{port}...");

    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .service(submit)
            .service(status)
            .service(jobs)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
