//! HTTP API handlers

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::audio::device::{list_output_devices, OutputDeviceInfo};
use crate::client::{ClientCommand, ClientSnapshot};
use crate::config::AudioSettings;
use crate::network::health::HealthSnapshot;
use crate::protocol::mode::ReceiverMode;
use crate::protocol::settings::AudioWindow;
use crate::ui::server::AppState;

/// API response wrapper
#[derive(serde::Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

type CommandReply = (StatusCode, Json<ApiResponse<()>>);

fn dispatch(state: &AppState, command: ClientCommand) -> CommandReply {
    match state.commands.send(command) {
        Ok(()) => (StatusCode::ACCEPTED, Json(ApiResponse::ok(()))),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse::error("client is shutting down")),
        ),
    }
}

/// Latest client snapshot
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<ApiResponse<ClientSnapshot>> {
    let snapshot = state.snapshot.borrow().clone();
    Json(ApiResponse::ok(snapshot))
}

/// Link health per channel
pub async fn get_connections(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<HealthSnapshot>> {
    let health = state.health.borrow().clone();
    Json(ApiResponse::ok(health))
}

/// Get available output devices
pub async fn get_devices() -> Json<ApiResponse<Vec<OutputDeviceInfo>>> {
    Json(ApiResponse::ok(list_output_devices()))
}

/// Replace the listening settings
pub async fn update_settings(
    State(state): State<Arc<AppState>>,
    Json(settings): Json<AudioSettings>,
) -> CommandReply {
    dispatch(&state, ClientCommand::UpdateSettings(settings))
}

#[derive(Debug, Deserialize)]
pub struct ReceiverRequest {
    pub receiver_id: String,
}

pub async fn select_receiver(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReceiverRequest>,
) -> CommandReply {
    let id = req.receiver_id.trim();
    if id.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("receiver_id must not be empty")),
        );
    }
    dispatch(&state, ClientCommand::SelectReceiver(id.to_string()))
}

#[derive(Debug, Default, Deserialize)]
pub struct TuneRequest {
    #[serde(default)]
    pub frequency_hz: Option<f64>,
    /// Mode name, case-insensitive
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub window: Option<AudioWindow>,
}

impl TuneRequest {
    fn into_command(self) -> Result<ClientCommand, String> {
        if let Some(hz) = self.frequency_hz {
            if !hz.is_finite() || hz < 0.0 {
                return Err(format!("invalid frequency: {}", hz));
            }
        }
        let mode = self
            .mode
            .as_deref()
            .map(str::parse::<ReceiverMode>)
            .transpose()?;
        Ok(ClientCommand::Tune {
            frequency_hz: self.frequency_hz,
            mode,
            window: self.window,
        })
    }
}

pub async fn tune(State(state): State<Arc<AppState>>, Json(req): Json<TuneRequest>) -> CommandReply {
    match req.into_command() {
        Ok(command) => dispatch(&state, command),
        Err(e) => (StatusCode::BAD_REQUEST, Json(ApiResponse::error(e))),
    }
}

/// Stands in for the user gesture that unlocks playback
pub async fn resume(State(state): State<Arc<AppState>>) -> CommandReply {
    dispatch(&state, ClientCommand::Resume)
}

pub async fn start_recording(State(state): State<Arc<AppState>>) -> CommandReply {
    dispatch(&state, ClientCommand::StartRecording)
}

pub async fn stop_recording(State(state): State<Arc<AppState>>) -> CommandReply {
    dispatch(&state, ClientCommand::StopRecording)
}

/// Last finished recording as a WAV attachment
pub async fn download_recording(State(state): State<Arc<AppState>>) -> Response {
    let Some(recording) = state.recording.borrow().clone() else {
        return (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::<()>::error("no finished recording")),
        )
            .into_response();
    };
    let disposition = format!("attachment; filename=\"{}\"", recording.file_name());
    (
        [
            (header::CONTENT_TYPE, "audio/wav".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        recording.wav.clone(),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::recorder::{Recorder, Recording};
    use crate::client::ClientStatus;
    use tokio::sync::{mpsc, watch};

    fn state_with(
        recording: Option<Arc<Recording>>,
    ) -> (Arc<AppState>, mpsc::UnboundedReceiver<ClientCommand>) {
        let (_snap_tx, snapshot) = watch::channel(ClientSnapshot {
            status: ClientStatus::Ready,
            ..Default::default()
        });
        let (_health_tx, health) = watch::channel(HealthSnapshot::default());
        let (_rec_tx, recording) = watch::channel(recording);
        let (commands, rx) = mpsc::unbounded_channel();
        (
            Arc::new(AppState {
                snapshot,
                health,
                recording,
                commands,
            }),
            rx,
        )
    }

    fn state() -> (Arc<AppState>, mpsc::UnboundedReceiver<ClientCommand>) {
        state_with(None)
    }

    #[tokio::test]
    async fn test_status_returns_snapshot() {
        let (state, _rx) = state();
        let Json(resp) = get_status(State(state)).await;
        assert!(resp.success);
        assert_eq!(resp.data.unwrap().status, ClientStatus::Ready);
    }

    #[tokio::test]
    async fn test_tune_parses_mode() {
        let (state, mut rx) = state();
        let req = TuneRequest {
            frequency_hz: Some(7_100_000.0),
            mode: Some("lsb".into()),
            window: None,
        };
        let (code, _) = tune(State(state), Json(req)).await;
        assert_eq!(code, StatusCode::ACCEPTED);
        assert_eq!(
            rx.try_recv().unwrap(),
            ClientCommand::Tune {
                frequency_hz: Some(7_100_000.0),
                mode: Some(ReceiverMode::Lsb),
                window: None,
            }
        );
    }

    #[tokio::test]
    async fn test_tune_rejects_bad_input() {
        let (state, mut rx) = state();
        let bad_mode = TuneRequest {
            mode: Some("psk".into()),
            ..Default::default()
        };
        let (code, Json(resp)) = tune(State(state.clone()), Json(bad_mode)).await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert!(resp.error.unwrap().contains("psk"));

        let bad_freq = TuneRequest {
            frequency_hz: Some(-1.0),
            ..Default::default()
        };
        let (code, _) = tune(State(state), Json(bad_freq)).await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_empty_receiver_rejected() {
        let (state, _rx) = state();
        let req = ReceiverRequest {
            receiver_id: "  ".into(),
        };
        let (code, _) = select_receiver(State(state), Json(req)).await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_command_after_shutdown() {
        let (state, rx) = state();
        drop(rx);
        let (code, Json(resp)) = resume(State(state)).await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!resp.success);
    }

    #[tokio::test]
    async fn test_recording_start_stop_dispatch() {
        let (state, mut rx) = state();
        let (code, _) = start_recording(State(state.clone())).await;
        assert_eq!(code, StatusCode::ACCEPTED);
        let (code, _) = stop_recording(State(state)).await;
        assert_eq!(code, StatusCode::ACCEPTED);
        assert_eq!(rx.try_recv().unwrap(), ClientCommand::StartRecording);
        assert_eq!(rx.try_recv().unwrap(), ClientCommand::StopRecording);
    }

    #[tokio::test]
    async fn test_download_without_recording() {
        let (state, _rx) = state();
        let resp = download_recording(State(state)).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_download_serves_wav() {
        let mut recorder = Recorder::start(8000, ReceiverMode::Usb, 20);
        recorder.write(&[0.25; 400]);
        let recording = Arc::new(recorder.finish().unwrap());
        let (state, _rx) = state_with(Some(recording.clone()));

        let resp = download_recording(State(state)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "audio/wav");
        let disposition = resp.headers()[header::CONTENT_DISPOSITION].to_str().unwrap().to_string();
        assert!(disposition.contains(&recording.file_name()));

        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body, recording.wav);
        let reader = hound::WavReader::new(std::io::Cursor::new(body.to_vec())).unwrap();
        assert_eq!(reader.len(), 400);
    }
}
