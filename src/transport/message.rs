use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Submit content for storage and fan-out.
    #[serde(rename = "add")]
    Add { content: String },

    /// Stream the backlog followed by live messages on this connection.
    #[serde(rename = "feed")]
    Feed,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "accepted")]
    Accepted,

    #[serde(rename = "error")]
    Error { code: String, message: String },
}
