use std::time::Duration;

use anyhow::Context;
use canvas_contracts::api::{
    EditImageRequest, GenerateImageRequest, GenerateImageResult, EDIT_IMAGE_PATH,
    GENERATE_IMAGE_PATH,
};
use reqwest::blocking::Client as HttpClient;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub const GENERATE_FAILED: &str = "Failed to generate image";
pub const EDIT_FAILED: &str = "Failed to edit image";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// The server answered with a non-2xx status.
    #[error("{message}")]
    Api { status: u16, message: String },
    /// No usable answer: connect, timeout, or an unreadable body.
    #[error("{message}")]
    Transport { message: String },
}

impl ClientError {
    pub fn message(&self) -> &str {
        match self {
            ClientError::Api { message, .. } | ClientError::Transport { message } => message,
        }
    }
}

/// The two backend calls a canvas needs.
pub trait ImageGenerationApi: Send + Sync {
    fn generate_image(
        &self,
        request: &GenerateImageRequest,
    ) -> Result<GenerateImageResult, ClientError>;

    fn generate_image_edit(
        &self,
        request: &EditImageRequest,
    ) -> Result<GenerateImageResult, ClientError>;
}

/// Talks to a canvas server over HTTP.
pub struct HttpImageClient {
    base_url: String,
    http: HttpClient,
}

impl HttpImageClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .context("failed to build canvas HTTP client")?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    fn post<T: Serialize>(
        &self,
        path: &str,
        body: &T,
        fallback: &str,
    ) -> Result<GenerateImageResult, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        let transport = |detail: String| {
            tracing::error!(%url, error = %detail, "{fallback}");
            ClientError::Transport {
                message: fallback.to_string(),
            }
        };

        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .map_err(|err| transport(err.to_string()))?;
        let status = response.status();
        let text = response.text().map_err(|err| transport(err.to_string()))?;
        if !status.is_success() {
            tracing::error!(%url, status = status.as_u16(), body = %text, "{fallback}");
            return Err(ClientError::Api {
                status: status.as_u16(),
                message: error_message(&text, fallback),
            });
        }
        serde_json::from_str(&text).map_err(|err| transport(err.to_string()))
    }
}

impl ImageGenerationApi for HttpImageClient {
    fn generate_image(
        &self,
        request: &GenerateImageRequest,
    ) -> Result<GenerateImageResult, ClientError> {
        self.post(GENERATE_IMAGE_PATH, request, GENERATE_FAILED)
    }

    fn generate_image_edit(
        &self,
        request: &EditImageRequest,
    ) -> Result<GenerateImageResult, ClientError> {
        self.post(EDIT_IMAGE_PATH, request, EDIT_FAILED)
    }
}

/// The body's `error` string, or `fallback` when there is none.
fn error_message(body: &str, fallback: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|payload| {
            payload
                .get("error")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|message| !message.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| fallback.to_string())
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread::{self, JoinHandle};

    use anyhow::{anyhow, Result};

    use super::*;

    /// Answers exactly one request with `status` and `body`, returning the
    /// raw request it received.
    fn one_shot_server(status: &'static str, body: &'static str) -> Result<(String, JoinHandle<String>)> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let base = format!("http://{}", listener.local_addr()?);
        let handle = thread::spawn(move || {
            let Ok((mut stream, _)) = listener.accept() else {
                return String::new();
            };
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let Ok(read) = stream.read(&mut buf) else {
                    break;
                };
                if read == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..read]);
                if request_complete(&raw) {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = stream.write_all(response.as_bytes());
            let _ = stream.flush();
            String::from_utf8_lossy(&raw).into_owned()
        });
        Ok((base, handle))
    }

    fn request_complete(raw: &[u8]) -> bool {
        let text = String::from_utf8_lossy(raw);
        let Some((head, body)) = text.split_once("\r\n\r\n") else {
            return false;
        };
        let length = head
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        body.len() >= length
    }

    fn join(handle: JoinHandle<String>) -> Result<String> {
        handle.join().map_err(|_| anyhow!("server thread panicked"))
    }

    fn cat_request() -> GenerateImageRequest {
        GenerateImageRequest {
            prompt: "a cat".to_string(),
            model: "dall-e-3".to_string(),
            resolution: "512x512".to_string(),
        }
    }

    #[test]
    fn error_message_prefers_body_error() {
        assert_eq!(
            error_message(r#"{"error":"Prompt is required"}"#, GENERATE_FAILED),
            "Prompt is required"
        );
        assert_eq!(error_message(r#"{"error":""}"#, EDIT_FAILED), EDIT_FAILED);
        assert_eq!(error_message("<html>502</html>", EDIT_FAILED), EDIT_FAILED);
    }

    #[test]
    fn generate_posts_json_and_parses_result() -> Result<()> {
        let (base, server) = one_shot_server(
            "200 OK",
            r#"{"imageUrl":"https://cdn.test/cat.png","metadata":{"model":"dall-e-3","seed":0,"timestamp":"2025-01-01T00:00:00.000Z"}}"#,
        )?;
        let client = HttpImageClient::new(format!("{base}/"), Duration::from_secs(5))?;

        let result = client.generate_image(&cat_request())?;
        assert_eq!(result.image_url, "https://cdn.test/cat.png");
        assert_eq!(result.metadata.seed, Some(0));

        let raw = join(server)?;
        assert!(raw.starts_with("POST /api/generate-image "));
        assert!(raw.contains(r#""resolution":"512x512""#));
        Ok(())
    }

    #[test]
    fn server_error_body_becomes_the_message() -> Result<()> {
        let (base, server) =
            one_shot_server("400 Bad Request", r#"{"error":"Images are required"}"#)?;
        let client = HttpImageClient::new(base, Duration::from_secs(5))?;

        let err = client
            .generate_image_edit(&EditImageRequest {
                prompt: "x".to_string(),
                model: "gpt-image-1".to_string(),
                images: Vec::new(),
                mask_index: None,
            })
            .err();
        assert_eq!(
            err,
            Some(ClientError::Api {
                status: 400,
                message: "Images are required".to_string()
            })
        );
        assert!(join(server)?.starts_with("POST /api/edit-image "));
        Ok(())
    }

    #[test]
    fn unreachable_server_uses_fallback_message() -> Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let base = format!("http://{}", listener.local_addr()?);
        drop(listener);

        let client = HttpImageClient::new(base, Duration::from_secs(2))?;
        let err = client.generate_image(&cat_request()).err();
        assert_eq!(
            err.as_ref().map(ClientError::message),
            Some(GENERATE_FAILED)
        );
        assert!(matches!(err, Some(ClientError::Transport { .. })));
        Ok(())
    }
}
