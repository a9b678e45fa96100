use crate::capture::decode_frame;
use crate::error::ScanError;
use crate::pipeline::PlateScan;
use crate::state::ScannerState;
use crate::vision::annotate::outline_plate;
use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use base64::{prelude::BASE64_STANDARD, Engine};
use common::plates::normalize_plate;
use common::scans::{
    CameraScanParams, NormalizeRequest, NormalizeResponse, RasterImage, ScanRequest,
    ScanResponse, VehicleLookupResponse,
};
use image::ImageFormat;
use serde_json::json;
use std::io::Cursor;
use std::time::Instant;

const OUTLINE_THICKNESS: u32 = 3;

/// Scan an uploaded still image
pub async fn scan_image(
    State(state): State<ScannerState>,
    Json(request): Json<ScanRequest>,
) -> Result<Json<ScanResponse>, ScanError> {
    let started = Instant::now();

    let (payload, data_url_format) = split_data_url(&request.data);
    let bytes = BASE64_STANDARD
        .decode(payload.trim())
        .map_err(|e| ScanError::tensor_prep(format!("invalid base64 image data: {}", e)))?;
    let format = request.format.as_deref().or(data_url_format);
    let frame = decode_frame(&bytes, format)?;

    let annotate_from = request.include_annotated.then(|| frame.clone());
    let scan = state.scanner().detect_plate(frame).await?;

    let mut response = scan_response(&scan, request.include_crop, started)?;
    if let Some(frame) = annotate_from {
        let annotated = outline_plate(&frame, &scan.crop.rect, OUTLINE_THICKNESS);
        response.annotated_png = Some(png_base64(&annotated)?);
    }

    Ok(Json(response))
}

/// Grab a frame from the configured camera and scan it
pub async fn scan_camera(
    State(state): State<ScannerState>,
    Query(params): Query<CameraScanParams>,
) -> Result<Json<ScanResponse>, ScanError> {
    let started = Instant::now();

    let camera = state
        .camera()
        .ok_or_else(|| ScanError::camera("no camera configured"))?;
    let scan = state.scanner().scan_source(camera).await?;

    Ok(Json(scan_response(&scan, params.include_crop, started)?))
}

/// Canonicalize a manually entered plate
pub async fn normalize(Json(request): Json<NormalizeRequest>) -> impl IntoResponse {
    Json(NormalizeResponse {
        plate: normalize_plate(&request.text),
    })
}

/// Look a plate up in the external vehicle registry
pub async fn lookup_vehicle(
    State(state): State<ScannerState>,
    Path(plate): Path<String>,
) -> impl IntoResponse {
    let Some(vehicles) = state.vehicles() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "vehicle lookup is not configured" })),
        )
            .into_response();
    };

    let normalized = normalize_plate(&plate);
    if normalized.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": format!("'{}' contains no plate characters", plate) })),
        )
            .into_response();
    }

    match vehicles.lookup(&normalized).await {
        Ok(record) => (
            StatusCode::OK,
            Json(VehicleLookupResponse {
                plate: normalized,
                record,
            }),
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Vehicle lookup for {} failed: {:#}", normalized, e);
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": format!("vehicle lookup failed: {:#}", e) })),
            )
                .into_response()
        }
    }
}

/// Health check endpoint
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "scan-service"
        })),
    )
}

/// Readiness check endpoint, loads the models if needed
pub async fn readyz(State(state): State<ScannerState>) -> impl IntoResponse {
    let sessions = state.scanner().sessions();

    match sessions.preload().await {
        Ok(()) => {
            let models: Vec<&str> = sessions.loaded().await.iter().map(|k| k.as_str()).collect();
            (
                StatusCode::OK,
                Json(json!({
                    "status": "ready",
                    "node_id": state.node_id(),
                    "models": models,
                    "busy": state.scanner().is_busy()
                })),
            )
        }
        Err(e) => {
            tracing::warn!("Readiness check failed: {:#}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "not ready",
                    "node_id": state.node_id(),
                    "error": format!("{:#}", e)
                })),
            )
        }
    }
}

/// Prometheus metrics endpoint
pub async fn metrics() -> impl IntoResponse {
    match telemetry::metrics::encode_metrics() {
        Ok(body) => body.into_response(),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}

/// Split `data:<mime>;base64,<payload>` into payload and MIME type
fn split_data_url(data: &str) -> (&str, Option<&str>) {
    let Some(rest) = data.strip_prefix("data:") else {
        return (data, None);
    };

    match rest.split_once(',') {
        Some((header, payload)) => {
            let mime = header.trim_end_matches(";base64");
            (payload, (!mime.is_empty()).then_some(mime))
        }
        None => (data, None),
    }
}

fn scan_response(
    scan: &PlateScan,
    include_crop: bool,
    started: Instant,
) -> Result<ScanResponse, ScanError> {
    let crop_png = if include_crop {
        Some(png_base64(&scan.crop.image)?)
    } else {
        None
    };

    Ok(ScanResponse {
        plate_text: scan.plate_text.clone(),
        confidence: scan.confidence,
        raw_text: scan.raw_text.clone(),
        detection_score: scan.detection.score,
        tensor_bbox: scan.detection.bbox,
        source_rect: scan.crop.rect,
        crop_png,
        annotated_png: None,
        processing_time_ms: started.elapsed().as_millis() as u64,
    })
}

fn png_base64(image: &RasterImage) -> Result<String, ScanError> {
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .context("Failed to encode PNG")?;
    Ok(BASE64_STANDARD.encode(out.into_inner()))
}
