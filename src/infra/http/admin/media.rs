use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::{
    application::{error::HttpError, registry::ServiceRegistry},
    domain::content::VolumeId,
};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(super) struct TransformImagesForm {
    forced: bool,
    volumes: Vec<VolumeId>,
}

#[derive(Debug, Serialize)]
struct Enqueued {
    enqueued: usize,
}

#[derive(Debug, Serialize)]
struct JobAccepted {
    job_id: String,
}

pub(super) async fn transform_images(
    State(registry): State<ServiceRegistry>,
    Json(form): Json<TransformImagesForm>,
) -> Result<Response, HttpError> {
    let enqueued = registry
        .transform_images(form.forced, &form.volumes)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(Enqueued { enqueued })).into_response())
}

pub(super) async fn remove_transforms(
    State(registry): State<ServiceRegistry>,
) -> Result<Response, HttpError> {
    let job_id = registry.remove_transforms().await?;
    Ok((StatusCode::ACCEPTED, Json(JobAccepted { job_id })).into_response())
}
