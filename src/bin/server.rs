use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use bytes::BufMut;
use clap::Parser;
use futures_util::TryStreamExt;
use serde_json::json;
use warp::Filter;
use warp::Reply as _;
use warp::http::StatusCode;
use warp::multipart::{FormData, Part};

use fitroom::{
    AssetStore, DeviceInfo, FitroomError, GarmentDescriptor, GarmentResolver, LabelFont,
    OverlayCompositor, SystemClock, TryOnPipeline, TryOnRequest, UploadedAsset,
};

#[derive(Parser, Debug)]
#[command(name = "fitroom-server", version)]
struct Args {
    /// Address to bind.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8000)]
    port: u16,

    /// Data root holding the uploads/ and results/ namespaces.
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Label font file. A system sans-serif face is discovered when omitted.
    #[arg(long)]
    font: Option<PathBuf>,

    /// Maximum accepted multipart body size in bytes.
    #[arg(long, default_value_t = 16 * 1024 * 1024)]
    max_upload_bytes: u64,

    /// Base URL used when building result links, e.g. https://tryon.example.com.
    #[arg(long)]
    public_url: Option<String>,
}

struct AppState {
    pipeline: TryOnPipeline,
    store: AssetStore,
    device: DeviceInfo,
    public_url: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let device = DeviceInfo::detect();
    let font = Arc::new(match &args.font {
        Some(path) => LabelFont::from_path(path)?,
        None => LabelFont::discover()?,
    });
    let store = AssetStore::open(&args.data_dir)?;

    let resolver = GarmentResolver::new(font.clone());
    let compositor = OverlayCompositor::new(device, font, Arc::new(SystemClock));
    let pipeline = TryOnPipeline::new(store.clone(), resolver, Box::new(compositor));

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .context("parse bind address")?;
    let public_url = args
        .public_url
        .unwrap_or_else(|| format!("http://{addr}"));

    let state = Arc::new(AppState {
        pipeline,
        store,
        device,
        public_url,
    });

    let tryon = warp::path!("api" / "virtual-tryon")
        .and(warp::post())
        .and(warp::multipart::form().max_length(args.max_upload_bytes))
        .and(with_state(state.clone()))
        .and_then(handle_tryon);
    let results = warp::path!("api" / "results" / String)
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handle_result);
    let health = warp::path!("api" / "health")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handle_health);
    let index = warp::path::end().and(warp::get()).and_then(handle_index);

    let cors = warp::cors()
        .allow_any_origin()
        .allow_headers(vec!["content-type"])
        .allow_methods(vec!["GET", "POST", "OPTIONS"]);
    let routes = tryon
        .or(results)
        .or(health)
        .or(index)
        .with(cors)
        .recover(handle_rejection);

    tracing::info!(
        %addr,
        device = %state.device,
        threads = state.device.threads(),
        data_dir = %args.data_dir.display(),
        "fitroom server listening"
    );
    warp::serve(routes).run(addr).await;
    Ok(())
}

fn with_state(
    state: Arc<AppState>,
) -> impl Filter<Extract = (Arc<AppState>,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn json_reply(status: StatusCode, value: serde_json::Value) -> warp::reply::Response {
    warp::reply::with_status(warp::reply::json(&value), status).into_response()
}

fn error_reply(err: &FitroomError) -> warp::reply::Response {
    match err {
        FitroomError::Validation(msg) => json_reply(
            StatusCode::BAD_REQUEST,
            json!({"success": false, "error": msg}),
        ),
        FitroomError::NotFound(_) => json_reply(
            StatusCode::NOT_FOUND,
            json!({"error": "Result not found"}),
        ),
        FitroomError::Decode(msg) | FitroomError::Processing(msg) => json_reply(
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({"success": false, "error": format!("Processing error: {msg}")}),
        ),
        FitroomError::Other(e) => {
            tracing::error!(error = %e, "internal failure");
            json_reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({"success": false, "error": "Processing error: internal failure"}),
            )
        }
    }
}

async fn part_bytes(part: Part) -> Result<Vec<u8>, warp::Error> {
    part.stream()
        .try_fold(Vec::new(), |mut acc, data| {
            acc.put(data);
            async move { Ok(acc) }
        })
        .await
}

async fn handle_tryon(
    mut form: FormData,
    state: Arc<AppState>,
) -> Result<warp::reply::Response, Infallible> {
    let mut person: Option<UploadedAsset> = None;
    let mut garment: Option<UploadedAsset> = None;
    let mut fields: HashMap<String, String> = HashMap::new();

    loop {
        let part = match form.try_next().await {
            Ok(Some(part)) => part,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "malformed multipart body");
                return Ok(json_reply(
                    StatusCode::BAD_REQUEST,
                    json!({"success": false, "error": "Malformed multipart body"}),
                ));
            }
        };
        let name = part.name().to_string();
        let filename = part.filename().unwrap_or_default().to_string();
        let bytes = match part_bytes(part).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, field = %name, "failed to read multipart field");
                return Ok(json_reply(
                    StatusCode::BAD_REQUEST,
                    json!({"success": false, "error": "Malformed multipart body"}),
                ));
            }
        };
        match name.as_str() {
            "person_image" => person = Some(UploadedAsset { bytes, filename }),
            "clothing_image" => garment = Some(UploadedAsset { bytes, filename }),
            _ => {
                fields.insert(name, String::from_utf8_lossy(&bytes).into_owned());
            }
        }
    }

    let Some(person) = person else {
        return Ok(json_reply(
            StatusCode::BAD_REQUEST,
            json!({"success": false, "error": "No person image provided"}),
        ));
    };

    let field = |key: &str, default: &str| -> String {
        fields
            .get(key)
            .map(String::as_str)
            .unwrap_or(default)
            .to_string()
    };
    let request = TryOnRequest {
        person,
        garment,
        descriptor: GarmentDescriptor {
            name: field("clothing_name", "Unknown"),
            kind: field("clothing_type", "unknown"),
            color: field("clothing_color", "#000000"),
            size: field("clothing_size", "M"),
        },
    };

    let worker_state = state.clone();
    let outcome =
        tokio::task::spawn_blocking(move || worker_state.pipeline.run(&request)).await;
    let result = match outcome {
        Ok(Ok(result)) => result,
        Ok(Err(err)) => return Ok(error_reply(&err)),
        Err(e) => {
            tracing::error!(error = %e, "try-on task failed");
            return Ok(json_reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({"success": false, "error": "Processing error: internal failure"}),
            ));
        }
    };

    let url = format!(
        "{}/api/results/{}",
        state.public_url.trim_end_matches('/'),
        result.id
    );
    Ok(json_reply(
        StatusCode::OK,
        json!({
            "success": true,
            "result_image_url": url,
            "message": "Virtual try-on completed successfully",
        }),
    ))
}

async fn handle_result(
    id: String,
    state: Arc<AppState>,
) -> Result<warp::reply::Response, Infallible> {
    match state.store.fetch(&id) {
        Ok(bytes) => {
            let response = warp::http::Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "image/jpeg")
                .body(bytes);
            match response {
                Ok(response) => Ok(response.into_response()),
                Err(e) => {
                    tracing::error!(error = %e, "failed to build result response");
                    Ok(json_reply(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        json!({"success": false, "error": "Internal server error"}),
                    ))
                }
            }
        }
        Err(err) => Ok(error_reply(&err)),
    }
}

async fn handle_health(state: Arc<AppState>) -> Result<warp::reply::Response, Infallible> {
    Ok(json_reply(
        StatusCode::OK,
        json!({
            "status": "healthy",
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "device": state.device.to_string(),
        }),
    ))
}

async fn handle_index() -> Result<warp::reply::Response, Infallible> {
    Ok(json_reply(
        StatusCode::OK,
        json!({
            "name": "Virtual Try-On API",
            "version": env!("CARGO_PKG_VERSION"),
            "endpoints": {
                "POST /api/virtual-tryon": "Process a virtual try-on request",
                "GET /api/results/{id}": "Retrieve a processed result image",
                "GET /api/health": "Health check",
            },
            "status": "running",
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }),
    ))
}

async fn handle_rejection(
    err: warp::Rejection,
) -> Result<warp::reply::Response, Infallible> {
    if err.is_not_found() {
        return Ok(json_reply(
            StatusCode::NOT_FOUND,
            json!({"error": "Not found"}),
        ));
    }
    if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        return Ok(json_reply(
            StatusCode::PAYLOAD_TOO_LARGE,
            json!({"success": false, "error": "Uploaded file too large"}),
        ));
    }
    tracing::error!(?err, "unhandled rejection");
    Ok(json_reply(
        StatusCode::INTERNAL_SERVER_ERROR,
        json!({"success": false, "error": "Internal server error"}),
    ))
}
