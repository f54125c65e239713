//! Posting a report payload to the coverage service.

use chrono::Utc;
use tracing::{debug, info};

use crate::error::{CovError, Result};
use crate::report::ReportPayload;

pub const COVERALLS_JOBS_URL: &str = "https://coveralls.io/api/v1/jobs";

/// Form field the jobs API reads the JSON payload from.
pub const JSON_FIELD: &str = "json_file";

/// Something that can deliver bytes as one named form field.
pub trait Transport {
    fn send_form_field(&self, field: &str, content_type: &str, body: &[u8]) -> Result<()>;
}

/// Serialize `payload` and send it as the `json_file` field.
pub fn submit(transport: &dyn Transport, payload: &ReportPayload) -> Result<()> {
    let json = payload.to_json()?;
    transport.send_form_field(JSON_FIELD, "application/json", json.as_bytes())?;
    info!(files = payload.source_files.len(), "coverage report submitted");
    Ok(())
}

/// `multipart/form-data` POST over HTTP. Any status other than 200 is an
/// error; nothing is retried.
pub struct HttpTransport {
    endpoint: String,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(COVERALLS_JOBS_URL)
    }
}

impl Transport for HttpTransport {
    fn send_form_field(&self, field: &str, content_type: &str, body: &[u8]) -> Result<()> {
        let boundary = format!("==={}===", Utc::now().timestamp_millis());
        let multipart = multipart_body(&boundary, field, content_type, body);

        debug!(endpoint = %self.endpoint, bytes = multipart.len(), "posting coverage");
        let resp = ureq::post(&self.endpoint)
            .set(
                "Content-Type",
                &format!("multipart/form-data; boundary={boundary}"),
            )
            .set("User-Agent", concat!("linecov/", env!("CARGO_PKG_VERSION")))
            .send_bytes(&multipart);

        match resp {
            Ok(resp) if resp.status() == 200 => {
                let status = resp.status();
                let body = resp.into_string().unwrap_or_default();
                debug!(status, body = %body, "coverage service accepted report");
                Ok(())
            }
            Ok(resp) => Err(CovError::Transport(format!(
                "Server returned non-OK status: {}",
                resp.status()
            ))),
            Err(ureq::Error::Status(code, resp)) => {
                let body = resp.into_string().unwrap_or_default();
                Err(CovError::Transport(format!(
                    "Server returned non-OK status: {code}: {body}"
                )))
            }
            Err(e) => Err(CovError::Transport(e.to_string())),
        }
    }
}

/// Encode a single file part as a `multipart/form-data` body.
pub fn multipart_body(boundary: &str, field: &str, content_type: &str, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(content.len() + 256);
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"{field}\"; filename=\"{field}\"\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Transfer-Encoding: binary\r\n\r\n");
    body.extend_from_slice(content);
    body.extend_from_slice(b"\r\n");
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    body
}
