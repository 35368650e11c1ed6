use serde::{Deserialize, Serialize};

/// Generic envelope used by every non-streaming response (errors,
/// health checks). Streaming responses never go through this type —
/// see `streaming::engine`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ResponseBody<T> {
    pub message: String,
    pub data: T,
}

impl<T> ResponseBody<T> {
    pub fn new(message: &str, data: T) -> ResponseBody<T> {
        ResponseBody {
            message: message.to_string(),
            data,
        }
    }
}
